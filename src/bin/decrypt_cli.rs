use anyhow::{bail, Context, Result};
use aden::network::crypt::Decoder;

/// Decrypts captured frames of one direction of a session. Frames must be
/// given in the order they were sent since the key rolls after each one.
/// The plaintext init packet must not be part of the capture.
fn main() -> Result<()> {
    let mut seed: Option<u32> = None;
    let mut with_length = false;
    let mut frames: Vec<String> = Vec::new();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "--h" | "--?" | "/?" => {
                println!("Usage: decrypt_cli --seed SEED [--framed] HEX...");
                println!("  SEED     handshake seed, decimal or 0x-prefixed hex");
                println!("  --framed HEX is a raw stream of length-prefixed frames");
                return Ok(());
            }
            "--seed" => {
                if i + 1 < args.len() {
                    i += 1;
                    seed = Some(parse_seed(&args[i])?);
                } else {
                    eprintln!("Error: --seed requires a SEED argument");
                    return Ok(());
                }
            }
            "--framed" => with_length = true,
            other => frames.push(other.to_string()),
        }
        i += 1;
    }

    let Some(seed) = seed else {
        bail!("--seed is required");
    };
    let frames = if with_length {
        split_stream(&frames.concat())?
    } else {
        frames.iter().map(|f| decode_hex(f)).collect::<Result<Vec<_>>>()?
    };

    let mut dec = Decoder::new(seed);
    for (n, mut data) in frames.into_iter().enumerate() {
        dec.decrypt(&mut data);
        let opcode = data.first().copied().unwrap_or_default();
        println!("#{} opcode={} len={} {}", n, opcode, data.len(), hex::encode(&data));
    }
    Ok(())
}

fn parse_seed(s: &str) -> Result<u32> {
    let seed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(h) => u32::from_str_radix(h, 16),
        None => s.parse(),
    };
    seed.with_context(|| format!("bad seed: {}", s))
}

fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let cleaned: String = s.chars().filter(|c| !c.is_whitespace() && *c != ':').collect();
    hex::decode(&cleaned).with_context(|| format!("not hex: {}", s))
}

/// Cut a captured stream into frame payloads using the length headers.
fn split_stream(s: &str) -> Result<Vec<Vec<u8>>> {
    let data = decode_hex(s)?;
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        if data.len() - pos < 2 {
            bail!("trailing byte at offset {}", pos);
        }
        let total = u16::from_le_bytes([data[pos], data[pos + 1]]) as usize;
        if total < 3 || pos + total > data.len() {
            bail!("bad frame length {} at offset {}", total, pos);
        }
        frames.push(data[pos + 2..pos + total].to_vec());
        pos += total;
    }
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_stream() {
        let frames = split_stream("0500aabbcc 0400dd ee").unwrap();
        assert_eq!(frames, vec![vec![0xaa, 0xbb, 0xcc], vec![0xdd, 0xee]]);
        assert!(split_stream("0900aabb").is_err());
    }

    #[test]
    fn test_parse_seed() {
        assert_eq!(parse_seed("0x10").unwrap(), 16);
        assert_eq!(parse_seed("42").unwrap(), 42);
        assert!(parse_seed("zz").is_err());
    }
}
