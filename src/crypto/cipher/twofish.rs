use twofish::Twofish;
use twofish::cipher::{BlockDecrypt, BlockEncrypt, NewBlockCipher};
use twofish::cipher::generic_array::GenericArray;
use block_modes::{BlockMode, Cbc};
use block_modes::block_padding::{NoPadding, Pkcs7};
use super::{BlockTransform, CipherEngine, Direction, PwAlgorithm, BLOCK_SIZE, KEY_SIZE};
use super::{check_ciphertext, check_key_iv, unpad_decrypt};
use crate::crypto::CryptoError;

type TwofishCbc = Cbc<Twofish, Pkcs7>;
type TwofishCbcRaw = Cbc<Twofish, NoPadding>;

pub struct TwofishEngine;

impl TwofishEngine {
    pub const NAME: &'static str = "Twofish (256)";
}

impl CipherEngine for TwofishEngine {
    fn algorithm(&self) -> PwAlgorithm {
        PwAlgorithm::Twofish
    }

    fn display_name(&self) -> &'static str {
        TwofishEngine::NAME
    }

    fn block_cipher(&self, key: &[u8], direction: Direction) -> Result<Box<dyn BlockTransform>, CryptoError> {
        // Twofish accepts shorter keys as well; only the 256 bit variant is used here.
        if key.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKeyLength);
        }
        let twofish = Twofish::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Box::new(TwofishBlock { twofish, direction }))
    }

    fn pad_encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key_iv(key, iv)?;
        let cbc = TwofishCbc::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(cbc.encrypt_vec(plaintext))
    }

    fn pad_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        unpad_decrypt(self, key, iv, ciphertext)
    }

    fn raw_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key_iv(key, iv)?;
        check_ciphertext(ciphertext)?;
        let cbc = TwofishCbcRaw::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
        cbc.decrypt_vec(ciphertext).map_err(|_| CryptoError::InvalidDataLength)
    }
}

struct TwofishBlock {
    twofish: Twofish,
    direction: Direction,
}

impl BlockTransform for TwofishBlock {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self.direction {
            Direction::Encrypt => self.twofish.encrypt_block(block),
            Direction::Decrypt => self.twofish.decrypt_block(block),
        }
    }
}
