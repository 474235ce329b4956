use sha2::{Digest as _, Sha256};

pub const HASH_SIZE: usize = 32;

/// SHA-256 of a single buffer.
pub fn sha256(data: &[u8]) -> [u8; HASH_SIZE] {
    let mut ctx = HashContext::new();
    ctx.update(data);
    ctx.finalize()
}

/// Incremental SHA-256, for content that is produced piece by piece.
#[derive(Clone, Default)]
pub struct HashContext {
    hasher: Sha256,
}

impl HashContext {
    pub fn new() -> HashContext {
        HashContext { hasher: Sha256::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> [u8; HASH_SIZE] {
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(&self.hasher.finalize());
        out
    }
}
