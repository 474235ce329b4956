pub mod cipher;
pub mod hash;
pub mod kdf;

/// Failures reported by the cipher engines and the key transformation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Key or IV of the wrong size for the engine.
    #[error("invalid key or IV length")]
    InvalidKeyLength,

    /// Ciphertext that is not a whole number of blocks.
    #[error("data length is not a multiple of the block size")]
    InvalidDataLength,

    /// The final block does not carry valid padding (wrong key or tampering).
    #[error("bad padding")]
    BadPadding,
}
