use aes::Aes256;
use aes::cipher::{BlockDecrypt, BlockEncrypt, NewBlockCipher};
use aes::cipher::generic_array::GenericArray;
use block_modes::{BlockMode, Cbc};
use block_modes::block_padding::{NoPadding, Pkcs7};
use super::{BlockTransform, CipherEngine, Direction, PwAlgorithm, BLOCK_SIZE};
use super::{check_ciphertext, check_key_iv, unpad_decrypt};
use crate::crypto::CryptoError;

type Aes256Cbc = Cbc<Aes256, Pkcs7>;
type Aes256CbcRaw = Cbc<Aes256, NoPadding>;

pub struct StandardAesEngine;

impl StandardAesEngine {
    pub const NAME: &'static str = "AES/Rijndael (256, FIPS 197)";
}

impl CipherEngine for StandardAesEngine {
    fn algorithm(&self) -> PwAlgorithm {
        PwAlgorithm::Aes
    }

    fn display_name(&self) -> &'static str {
        StandardAesEngine::NAME
    }

    fn block_cipher(&self, key: &[u8], direction: Direction) -> Result<Box<dyn BlockTransform>, CryptoError> {
        let aes = Aes256::new_from_slice(key).map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(Box::new(AesBlock { aes, direction }))
    }

    fn pad_encrypt(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key_iv(key, iv)?;
        let cbc = Aes256Cbc::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
        Ok(cbc.encrypt_vec(plaintext))
    }

    fn pad_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        unpad_decrypt(self, key, iv, ciphertext)
    }

    fn raw_decrypt(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        check_key_iv(key, iv)?;
        check_ciphertext(ciphertext)?;
        let cbc = Aes256CbcRaw::new_from_slices(key, iv).map_err(|_| CryptoError::InvalidKeyLength)?;
        cbc.decrypt_vec(ciphertext).map_err(|_| CryptoError::InvalidDataLength)
    }
}

/// AES256 in ECB mode, one block at a time.
struct AesBlock {
    aes: Aes256,
    direction: Direction,
}

impl BlockTransform for AesBlock {
    fn direction(&self) -> Direction {
        self.direction
    }

    fn transform_block(&self, block: &mut [u8; BLOCK_SIZE]) {
        let block = GenericArray::from_mut_slice(&mut block[..]);
        match self.direction {
            Direction::Encrypt => self.aes.encrypt_block(block),
            Direction::Decrypt => self.aes.decrypt_block(block),
        }
    }
}

#[cfg(test)]
pub mod test {
    use super::*;

    fn bytes(s: &str) -> Vec<u8> {
        hex::decode(s).expect("valid hex")
    }

    #[test]
    pub fn aes_test_ecb_fips197() {
        // FIPS 197 appendix C.3
        let key = bytes("000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f");
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(&bytes("00112233445566778899aabbccddeeff"));

        let enc = StandardAesEngine.block_cipher(&key, Direction::Encrypt).expect("key");
        enc.transform_block(&mut block);
        assert_eq!(&block[..], &bytes("8ea2b7ca516745bfeafc49904b496089")[..]);

        let dec = StandardAesEngine.block_cipher(&key, Direction::Decrypt).expect("key");
        dec.transform_block(&mut block);
        assert_eq!(&block[..], &bytes("00112233445566778899aabbccddeeff")[..]);
    }

    #[test]
    pub fn aes_test_cbc_single_block() {
        // NIST SP 800-38A F.2.5, fourth block (IV is the third ciphertext block).
        let key = bytes("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4");
        let iv = bytes("39F23369A9D9BACFA530E26304231461");
        let plaintext = bytes("f69f2445df4f9b17ad2b417be66c3710");
        let ciphertext = bytes("b2eb05e2c39be9fcda6c19078c6a9d1b");

        let encrypted = StandardAesEngine.pad_encrypt(&key, &iv, &plaintext).expect("encrypt");
        assert_eq!(encrypted.len(), 32);
        assert_eq!(&encrypted[..16], &ciphertext[..]);

        let decrypted = StandardAesEngine.pad_decrypt(&key, &iv, &encrypted).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    pub fn aes_test_cbc_multi_block() {
        let key = bytes("603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4");
        let iv = bytes("39F23369A9D9BACFA530E26304231461");

        // 44 bytes (more than one block and not divisible by 16)
        let plaintext = bytes("f69f2445df4f9b17ad2b417be66c37109da71b2378a854f670ed165bac3dbc4814f4da5f00a08772b63c6a04");

        let encrypted = StandardAesEngine.pad_encrypt(&key, &iv, &plaintext).expect("encrypt");
        assert_eq!(encrypted.len(), 48);
        let decrypted = StandardAesEngine.pad_decrypt(&key, &iv, &encrypted).expect("decrypt");
        assert_eq!(decrypted, plaintext);
    }
}
