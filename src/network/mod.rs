pub mod crypt;
pub mod opcodes;
pub mod packet;
pub mod throttle;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest payload a 2-byte length header can describe.
pub const MAX_PAYLOAD: usize = 0xFFFF - 2;

/// Errors raised while reading or writing length-prefixed frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid frame length: {0}")]
    BadLength(usize),

    #[error("Connection closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Read one frame and return its payload (opcode first, header stripped).
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut header = [0u8; 2];
    match stream.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameError::Closed),
        Err(e) => return Err(e.into()),
    }
    let total = u16::from_le_bytes(header) as usize;
    if total < 3 {
        return Err(FrameError::BadLength(total));
    }
    let mut buf = vec![0u8; total - 2];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one frame: `u16 LE` total length followed by the payload.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    if payload.is_empty() || payload.len() > MAX_PAYLOAD {
        return Err(FrameError::BadLength(payload.len()));
    }
    let total = (payload.len() + 2) as u16;
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.extend_from_slice(&total.to_le_bytes());
    out.extend_from_slice(payload);
    stream.write_all(&out).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_through_duplex() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &[14, 1, 2, 3]).await.unwrap();
        let got = read_frame(&mut b).await.unwrap();
        assert_eq!(got, vec![14, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_header_counts_itself() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &[1, 2, 3]).await.unwrap();
        let mut raw = [0u8; 5];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..2], &5u16.to_le_bytes());
    }

    #[tokio::test]
    async fn test_rejects_impossible_length() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&[2, 0]).await.unwrap();
        assert!(matches!(read_frame(&mut b).await, Err(FrameError::BadLength(2))));
    }

    #[tokio::test]
    async fn test_premature_eof() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        a.write_all(&[10, 0, 1, 2]).await.unwrap();
        drop(a);
        assert!(read_frame(&mut b).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_payload_rejected() {
        let (mut a, _b) = tokio::io::duplex(64);
        assert!(write_frame(&mut a, &[]).await.is_err());
    }
}
