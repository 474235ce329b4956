pub mod aes;
pub mod twofish;

use super::CryptoError;
use self::aes::StandardAesEngine;
use self::twofish::TwofishEngine;

pub const KEY_SIZE: usize = 32;
pub const BLOCK_SIZE: usize = 16;

static ENGINE_STANDARD_AES: StandardAesEngine = StandardAesEngine{};
static ENGINE_TWOFISH: TwofishEngine = TwofishEngine{};

/// Content ciphers a KeePass 1.x file can be encrypted with.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PwAlgorithm {
    Aes,
    Twofish,
}

impl Default for PwAlgorithm {
    fn default() -> PwAlgorithm {
        PwAlgorithm::Aes
    }
}

pub fn get_cipher_engine(algorithm: PwAlgorithm) -> &'static dyn CipherEngine {
    match algorithm {
        PwAlgorithm::Aes => &ENGINE_STANDARD_AES,
        PwAlgorithm::Twofish => &ENGINE_TWOFISH,
    }
}

/// Direction a block cipher instance is used in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

pub trait CipherEngine: Sync {
    fn algorithm(&self) -> PwAlgorithm;

    /// Name displayed in the list of available encryption/decryption engines in the GUI.
    fn display_name(&self) -> &'static str;

    /// Keyed single-block (ECB) cipher.
    fn block_cipher(&self, key: &[u8], direction: Direction) -> Result<Box<dyn BlockTransform>, CryptoError>;

    /// CBC encryption of a whole buffer with PKCS#7 padding. Always adds at least one byte.
    fn pad_encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Inverse of `pad_encrypt`. Fails with `BadPadding` if the last block is not validly padded.
    fn pad_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// CBC decryption without removing padding. Used to salvage damaged files.
    fn raw_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}

/// A keyed block cipher working on one 16 byte block at a time.
pub trait BlockTransform: Send + Sync {
    fn direction(&self) -> Direction;
    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]);
}

fn check_key_iv(key: &[u8], iv: &[u8]) -> Result<(), CryptoError> {
    if key.len() != KEY_SIZE || iv.len() != BLOCK_SIZE {
        Err(CryptoError::InvalidKeyLength)
    } else {
        Ok(())
    }
}

fn check_ciphertext(ciphertext: &[u8]) -> Result<(), CryptoError> {
    if ciphertext.len() % BLOCK_SIZE != 0 {
        Err(CryptoError::InvalidDataLength)
    } else {
        Ok(())
    }
}

/// Removes PKCS#7 padding from a decrypted buffer. The pad length must be in
/// `1..=BLOCK_SIZE` and every pad byte must carry that length.
fn strip_padding(plaintext: &mut Vec<u8>) -> Result<(), CryptoError> {
    let len = plaintext.len();
    let pad = match plaintext.last() {
        Some(&pad) => pad as usize,
        None => return Err(CryptoError::BadPadding),
    };

    if pad == 0 || pad > BLOCK_SIZE || pad > len {
        return Err(CryptoError::BadPadding);
    }

    if plaintext[(len - pad)..].iter().any(|&b| b as usize != pad) {
        return Err(CryptoError::BadPadding);
    }

    zeroize::Zeroize::zeroize(&mut plaintext[(len - pad)..]);
    plaintext.truncate(len - pad);
    Ok(())
}

/// Shared `pad_decrypt` on top of an engine's `raw_decrypt`.
fn unpad_decrypt<E: CipherEngine + ?Sized>(engine: &E, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut plaintext = engine.raw_decrypt(key, iv, ciphertext)?;
    if let Err(err) = strip_padding(&mut plaintext) {
        zeroize::Zeroize::zeroize(&mut plaintext);
        return Err(err);
    }
    Ok(plaintext)
}

#[cfg(test)]
mod test {
    use super::*;

    const KEY: [u8; 32] = [
        0x60, 0x3d, 0xeb, 0x10, 0x15, 0xca, 0x71, 0xbe, 0x2b, 0x73, 0xae, 0xf0, 0x85, 0x7d, 0x77, 0x81,
        0x1f, 0x35, 0x2c, 0x07, 0x3b, 0x61, 0x08, 0xd7, 0x2d, 0x98, 0x10, 0xa3, 0x09, 0x14, 0xdf, 0xf4,
    ];
    const IV: [u8; 16] = [
        0x39, 0xF2, 0x33, 0x69, 0xA9, 0xD9, 0xBA, 0xCF, 0xA5, 0x30, 0xE2, 0x63, 0x04, 0x23, 0x14, 0x61,
    ];

    fn engines() -> [&'static dyn CipherEngine; 2] {
        [get_cipher_engine(PwAlgorithm::Aes), get_cipher_engine(PwAlgorithm::Twofish)]
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|n| (n * 31 + 7) as u8).collect()
    }

    #[test]
    fn round_trip_lengths() {
        for engine in engines().iter() {
            for &len in [0usize, 1, 15, 16, 17, 1_000_000].iter() {
                let plaintext = sample(len);
                let ciphertext = engine.pad_encrypt(&KEY, &IV, &plaintext).expect("encrypt");
                assert_eq!(ciphertext.len(), (len / BLOCK_SIZE + 1) * BLOCK_SIZE, "{} {}", engine.display_name(), len);
                let decrypted = engine.pad_decrypt(&KEY, &IV, &ciphertext).expect("decrypt");
                assert_eq!(decrypted, plaintext, "{} {}", engine.display_name(), len);
            }
        }
    }

    #[test]
    fn tampered_padding_is_rejected() {
        for engine in engines().iter() {
            // 16 bytes of data plus a full block of 0x10 padding. Flipping bit 0 of
            // the last byte of the second-to-last ciphertext block turns the final
            // plaintext byte into 0x11, which is never valid padding.
            let plaintext = sample(16);
            let mut ciphertext = engine.pad_encrypt(&KEY, &IV, &plaintext).expect("encrypt");
            assert_eq!(ciphertext.len(), 32);
            ciphertext[15] ^= 0x01;
            assert_eq!(engine.pad_decrypt(&KEY, &IV, &ciphertext), Err(CryptoError::BadPadding));
        }
    }

    #[test]
    fn tampered_last_block_is_rejected() {
        // With these KEY/IV/sample inputs, flipping bit 0 of the first byte of
        // the last ciphertext block never leaves valid padding behind.
        for engine in engines().iter() {
            for &len in [0usize, 1, 15, 16, 17].iter() {
                let mut ciphertext = engine.pad_encrypt(&KEY, &IV, &sample(len)).expect("encrypt");
                let last_block = ciphertext.len() - BLOCK_SIZE;
                ciphertext[last_block] ^= 0x01;
                assert_eq!(engine.pad_decrypt(&KEY, &IV, &ciphertext), Err(CryptoError::BadPadding),
                    "{} {}", engine.display_name(), len);
            }
        }
    }

    #[test]
    fn tampered_iv_on_single_block_is_rejected() {
        for engine in engines().iter() {
            let ciphertext = engine.pad_encrypt(&KEY, &IV, &[]).expect("encrypt");
            let mut iv = IV;
            iv[15] ^= 0x20;
            assert_eq!(engine.pad_decrypt(&KEY, &iv, &ciphertext), Err(CryptoError::BadPadding));
        }
    }

    #[test]
    fn partial_block_is_rejected() {
        for engine in engines().iter() {
            assert_eq!(engine.pad_decrypt(&KEY, &IV, &[0u8; 17]), Err(CryptoError::InvalidDataLength));
            assert_eq!(engine.pad_decrypt(&KEY, &IV, &[]), Err(CryptoError::BadPadding));
        }
    }

    #[test]
    fn bad_key_length() {
        for engine in engines().iter() {
            assert_eq!(engine.pad_encrypt(&KEY[..16], &IV, b"x").err(), Some(CryptoError::InvalidKeyLength));
            assert_eq!(engine.pad_decrypt(&KEY, &IV[..8], &[0u8; 16]).err(), Some(CryptoError::InvalidKeyLength));
            assert!(engine.block_cipher(&KEY[..31], Direction::Encrypt).is_err());
        }
    }

    #[test]
    fn raw_decrypt_keeps_padding() {
        for engine in engines().iter() {
            let ciphertext = engine.pad_encrypt(&KEY, &IV, b"hello").expect("encrypt");
            let raw = engine.raw_decrypt(&KEY, &IV, &ciphertext).expect("decrypt");
            assert_eq!(&raw[..5], b"hello");
            assert!(raw[5..].iter().all(|&b| b == 11));
        }
    }

    #[test]
    fn block_cipher_is_invertible() {
        for engine in engines().iter() {
            let enc = engine.block_cipher(&KEY, Direction::Encrypt).expect("key");
            let dec = engine.block_cipher(&KEY, Direction::Decrypt).expect("key");
            assert_eq!(enc.direction(), Direction::Encrypt);
            let mut block = IV;
            enc.transform_block(&mut block);
            assert_ne!(block, IV);
            dec.transform_block(&mut block);
            assert_eq!(block, IV);
        }
    }
}
