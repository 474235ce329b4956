use zeroize::Zeroize;
use crate::crypto::hash::{sha256, HashContext};
use crate::crypto::kdf;
use crate::error::Error;
use crate::security::SecretKey;

/// Turns the contents of a key file into a 32 byte key.
///
/// A file of exactly 32 bytes is the key itself, a file of 64 hex digits is
/// decoded, and anything else is hashed with SHA-256.
pub fn key_from_key_file(data: &[u8]) -> [u8; 32] {
    let mut key = [0u8; 32];
    match data.len() {
        32 => key.copy_from_slice(data),
        64 => match hex::decode(data) {
            Ok(mut decoded) => {
                key.copy_from_slice(&decoded);
                decoded.zeroize();
            }
            Err(_) => key = sha256(data),
        },
        _ => key = sha256(data),
    }
    key
}

/// Builds the raw master key from a password, a key file, or both.
///
/// With both, the key is SHA-256(SHA-256(password) || file key).
pub fn composite_key(password: Option<&str>, key_file: Option<&[u8]>) -> Result<SecretKey, Error> {
    let password = password.filter(|p| !p.is_empty());

    let mut key = match (password, key_file) {
        (None, None) => return Err(Error::InvalidParam("a password or a key file is required")),
        (Some(password), None) => sha256(password.as_bytes()),
        (None, Some(file)) => key_from_key_file(file),
        (Some(password), Some(file)) => {
            let mut password_hash = sha256(password.as_bytes());
            let mut file_key = key_from_key_file(file);
            let mut ctx = HashContext::new();
            ctx.update(&password_hash);
            ctx.update(&file_key);
            password_hash.zeroize();
            file_key.zeroize();
            ctx.finalize()
        }
    };

    Ok(SecretKey::new(&mut key))
}

/// Runs the key transformation and mixes in the master seed, giving the key
/// the content is encrypted with.
pub fn final_key(raw_key: &SecretKey, master_seed: &[u8; 16], transform_seed: &[u8; 32], rounds: u32) -> Result<SecretKey, Error> {
    let mut transformed = *raw_key.as_bytes();
    kdf::transform_rounds(&mut transformed, transform_seed, rounds as u64)?;

    let mut ctx = HashContext::new();
    ctx.update(master_seed);
    ctx.update(&transformed);
    transformed.zeroize();

    let mut key = ctx.finalize();
    Ok(SecretKey::new(&mut key))
}
