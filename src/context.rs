use byteorder::{ByteOrder, LittleEndian};
use rand::RngCore;
use zeroize::Zeroize;
use crate::crypto::hash::HashContext;

/// Entropy pool used for every random value a database needs: seeds, IVs,
/// the session key, group ids and entry UUIDs.
///
/// Output blocks are SHA-256(pool || counter || fresh thread RNG bytes).
pub struct CryptoRandom {
    entropy_pool: [u8; 32],
    counter: u64,
    pub generated_bytes_count: u64,
}

impl CryptoRandom {
    pub fn new() -> CryptoRandom {
        let mut entropy_data = [0u8; 64];
        rand::thread_rng().fill_bytes(&mut entropy_data);

        let mut hasher = HashContext::new();
        hasher.update(&entropy_data);
        entropy_data.zeroize();

        CryptoRandom {
            entropy_pool: hasher.finalize(),
            counter: 0,
            generated_bytes_count: 0,
        }
    }

    /// Mixes caller supplied data into the pool.
    pub fn add_entropy(&mut self, entropy: &[u8]) {
        let mut hasher = HashContext::new();
        hasher.update(&self.entropy_pool);
        hasher.update(entropy);
        self.entropy_pool.zeroize();
        self.entropy_pool = hasher.finalize();
    }

    fn get_csp_random(&self) -> [u8; 32] {
        let mut buf = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }

    pub fn generate_random_256(&mut self) -> [u8; 32] {
        self.counter = self.counter.wrapping_add(0x74D8B29E4D38E161);
        let mut counter = [0u8; 8];
        LittleEndian::write_u64(&mut counter, self.counter);
        let mut csp = self.get_csp_random();

        let mut hasher = HashContext::new();
        hasher.update(&self.entropy_pool);
        hasher.update(&counter);
        hasher.update(&csp);

        counter.zeroize();
        csp.zeroize();

        self.generated_bytes_count += 32;
        hasher.finalize()
    }

    /// Get a number of cryptographically strong random bytes.
    pub fn get_random_bytes(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(32) {
            let mut random256 = self.generate_random_256();
            chunk.copy_from_slice(&random256[..chunk.len()]);
            random256.zeroize();
        }
    }

    pub fn random_u32(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        self.get_random_bytes(&mut buf);
        LittleEndian::read_u32(&buf)
    }
}

impl Default for CryptoRandom {
    fn default() -> CryptoRandom {
        CryptoRandom::new()
    }
}

impl Drop for CryptoRandom {
    fn drop(&mut self) {
        self.entropy_pool.zeroize();
    }
}
