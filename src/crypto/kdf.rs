//! The KeePass 1.x key transformation: the 32 byte composite key is encrypted
//! `rounds` times with AES-256 in ECB mode using the header's transform seed
//! as key, then hashed with SHA-256.
//!
//! The two 16 byte halves never interact, so they are transformed on two
//! rayon tasks and joined before the final hash.

use std::time::{Duration, Instant};
use zeroize::Zeroize;
use super::cipher::{self, BlockTransform, Direction, PwAlgorithm, BLOCK_SIZE, KEY_SIZE};
use super::hash::sha256;
use super::CryptoError;

pub const NAME: &str = "AES-KDF";

/// Rounds encrypted between two clock reads while benchmarking.
pub const BENCH_STEP: u64 = 3001;

fn transform_cipher(seed: &[u8; KEY_SIZE]) -> Result<Box<dyn BlockTransform>, CryptoError> {
    cipher::get_cipher_engine(PwAlgorithm::Aes).block_cipher(seed, Direction::Encrypt)
}

fn transform_half(cipher: &dyn BlockTransform, half: &mut [u8; BLOCK_SIZE], rounds: u64) {
    for _ in 0..rounds {
        cipher.transform_block(half);
    }
}

fn split(buffer: &[u8; KEY_SIZE]) -> ([u8; BLOCK_SIZE], [u8; BLOCK_SIZE]) {
    let mut left = [0u8; BLOCK_SIZE];
    let mut right = [0u8; BLOCK_SIZE];
    left.copy_from_slice(&buffer[..BLOCK_SIZE]);
    right.copy_from_slice(&buffer[BLOCK_SIZE..]);
    (left, right)
}

fn finish(buffer: &mut [u8; KEY_SIZE], mut left: [u8; BLOCK_SIZE], mut right: [u8; BLOCK_SIZE]) {
    buffer[..BLOCK_SIZE].copy_from_slice(&left);
    buffer[BLOCK_SIZE..].copy_from_slice(&right);
    left.zeroize();
    right.zeroize();

    let mut hashed = sha256(&buffer[..]);
    buffer.copy_from_slice(&hashed);
    hashed.zeroize();
}

/// Transforms `buffer` in place. On failure the buffer is zeroed.
pub fn transform_rounds(buffer: &mut [u8; KEY_SIZE], seed: &[u8; KEY_SIZE], rounds: u64) -> Result<(), CryptoError> {
    let cipher = match transform_cipher(seed) {
        Ok(cipher) => cipher,
        Err(err) => {
            buffer.zeroize();
            return Err(err);
        }
    };

    let (mut left, mut right) = split(buffer);
    {
        let cipher = &*cipher;
        let left = &mut left;
        let right = &mut right;
        rayon::join(
            || transform_half(cipher, left, rounds),
            || transform_half(cipher, right, rounds),
        );
    }

    finish(buffer, left, right);
    Ok(())
}

/// Same result as `transform_rounds`, on the calling thread only.
pub fn transform_rounds_sequential(buffer: &mut [u8; KEY_SIZE], seed: &[u8; KEY_SIZE], rounds: u64) -> Result<(), CryptoError> {
    let cipher = match transform_cipher(seed) {
        Ok(cipher) => cipher,
        Err(err) => {
            buffer.zeroize();
            return Err(err);
        }
    };

    let (mut left, mut right) = split(buffer);
    transform_half(&*cipher, &mut left, rounds);
    transform_half(&*cipher, &mut right, rounds);
    finish(buffer, left, right);
    Ok(())
}

/// Counts how many rounds of the single-half transform complete within
/// `millis` milliseconds.
pub fn benchmark(millis: u64) -> u64 {
    let seed = [0x4Bu8; KEY_SIZE];
    let cipher = match transform_cipher(&seed) {
        Ok(cipher) => cipher,
        Err(_) => return 0,
    };

    let budget = Duration::from_millis(millis);
    let mut block = [0u8; BLOCK_SIZE];
    let mut rounds = 0u64;
    let start = Instant::now();

    loop {
        transform_half(&*cipher, &mut block, BENCH_STEP);
        rounds += BENCH_STEP;

        if start.elapsed() >= budget {
            break;
        }
    }

    tracing::debug!(millis, rounds, "benchmarked key transformation");
    rounds
}
