//! Frame obfuscation used by the 3.80C client.
//!
//! Each direction keeps its own 8-byte key. The key is derived from the seed
//! sent in the init packet and is rolled forward after every frame using the
//! first four plaintext bytes of that frame.

/// Key schedule constants.
const MASK_1: u32 = 0x9c30_d539;
const MASK_2: u32 = 0x930f_d7e2;
const MASK_3: u32 = 0x7c72_e993;
const MASK_4: u32 = 0x287e_ffc3;

/// Static tail of the init packet after the seed.
pub const INIT_TAIL: [u8; 11] = [0x9d, 0xd1, 0xd6, 0x7a, 0xf4, 0x62, 0xe7, 0xa0, 0x66, 0x02, 0xfa];

/// Derives the initial 8-byte key from a handshake seed.
pub fn initial_key(seed: u32) -> [u8; 8] {
    let k0 = (seed ^ MASK_1).rotate_left(19);
    let k1 = MASK_2 ^ k0 ^ MASK_3;
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&k0.to_le_bytes());
    key[4..].copy_from_slice(&k1.to_le_bytes());
    key
}

fn roll_key(key: &mut [u8; 8], plain_head: [u8; 4]) {
    for (k, p) in key[..4].iter_mut().zip(plain_head) {
        *k ^= p;
    }
    let hi = u32::from_le_bytes([key[4], key[5], key[6], key[7]]).wrapping_add(MASK_4);
    key[4..].copy_from_slice(&hi.to_le_bytes());
}

/// Outbound half of a session cipher.
#[derive(Debug, Clone)]
pub struct Encoder {
    key: [u8; 8],
}

impl Encoder {
    pub fn new(seed: u32) -> Self {
        Self { key: initial_key(seed) }
    }

    /// Encrypts one frame body (opcode included) in place.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        if data.len() < 4 {
            return;
        }
        let head = [data[0], data[1], data[2], data[3]];
        let k = self.key;

        data[0] ^= k[0];
        for i in 1..data.len() {
            data[i] ^= data[i - 1] ^ k[i & 7];
        }
        data[3] ^= k[2];
        data[2] ^= k[3] ^ data[3];
        data[1] ^= k[4] ^ data[2];
        data[0] ^= k[5] ^ data[1];

        roll_key(&mut self.key, head);
    }
}

/// Inbound half of a session cipher.
#[derive(Debug, Clone)]
pub struct Decoder {
    key: [u8; 8],
}

impl Decoder {
    pub fn new(seed: u32) -> Self {
        Self { key: initial_key(seed) }
    }

    /// Decrypts one frame body in place.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        if data.len() < 4 {
            return;
        }
        let k = self.key;

        data[0] ^= k[5] ^ data[1];
        data[1] ^= k[4] ^ data[2];
        data[2] ^= k[3] ^ data[3];
        data[3] ^= k[2];
        for i in (1..data.len()).rev() {
            data[i] ^= data[i - 1] ^ k[i & 7];
        }
        data[0] ^= k[0];

        roll_key(&mut self.key, [data[0], data[1], data[2], data[3]]);
    }
}

/// Both directions for one connection, split so the writer task can own the encoder.
#[derive(Debug, Clone)]
pub struct Cipher {
    pub encoder: Encoder,
    pub decoder: Decoder,
}

impl Cipher {
    pub fn new(seed: u32) -> Self {
        Self {
            encoder: Encoder::new(seed),
            decoder: Decoder::new(seed),
        }
    }

    pub fn split(self) -> (Encoder, Decoder) {
        (self.encoder, self.decoder)
    }
}

/// Picks a handshake seed in the range the client accepts.
pub fn random_seed() -> u32 {
    rand::random_range(1..=0x7FFF_FFFEu32)
}

/// Builds the plaintext init packet body (opcode + seed + static tail).
pub fn init_packet_body(seed: u32) -> Vec<u8> {
    let mut body = Vec::with_capacity(16);
    body.push(super::opcodes::S_INIT_PACKET);
    body.extend_from_slice(&seed.to_le_bytes());
    body.extend_from_slice(&INIT_TAIL);
    body
}
