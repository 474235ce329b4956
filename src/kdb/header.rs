use byteorder::{ByteOrder, LittleEndian};
use crate::constants::{DATABASE_VERSION, DATABASE_VERSION_MASK};
use crate::crypto::cipher::PwAlgorithm;
use crate::crypto::hash::HashContext;
use crate::error::Error;
use super::*;

const OFFSET_FLAGS: usize = 8;
const OFFSET_VERSION: usize = 12;
const OFFSET_MASTER_SEED: usize = 16;
const OFFSET_IV: usize = 32;
const OFFSET_GROUPS: usize = 48;
const OFFSET_ENTRIES: usize = 52;
const OFFSET_CONTENTS_HASH: usize = 56;
const OFFSET_TRANSFORM_SEED: usize = 88;
const OFFSET_ROUNDS: usize = 120;

/// The fixed 124 byte header in front of the encrypted content.
///
/// A header is parsed once on load and built from scratch on every save; it
/// is never updated in place.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdbHeader {
    pub flags: HeaderFlags,
    pub version: u32,
    pub master_seed: [u8; 16],
    pub encryption_iv: [u8; 16],
    pub num_groups: u32,
    pub num_entries: u32,
    pub contents_hash: [u8; 32],
    pub transform_seed: [u8; 32],
    pub key_enc_rounds: u32,
}

/// Checks the two signature words at the start of `data`.
pub fn check_signature(data: &[u8]) -> Result<(), Error> {
    if data.len() < 8 {
        return Err(Error::InvalidFileHeader("file is too short"));
    }

    let signature = (LittleEndian::read_u32(&data[0..4]), LittleEndian::read_u32(&data[4..8]));
    if signature == FILE_SIGNATURE_KDBX || signature == FILE_SIGNATURE_KDBX_PRE_RELEASE {
        return Err(Error::UnsupportedKdbx);
    }
    if signature != FILE_SIGNATURE {
        return Err(Error::InvalidFileSignature(signature.0, signature.1));
    }
    Ok(())
}

impl KdbHeader {
    /// A header for a new file. The hash and counts are filled in by the writer.
    pub fn new(algorithm: PwAlgorithm, key_enc_rounds: u32) -> KdbHeader {
        let cipher = match algorithm {
            PwAlgorithm::Aes => HeaderFlags::RIJNDAEL,
            PwAlgorithm::Twofish => HeaderFlags::TWOFISH,
        };

        KdbHeader {
            flags: HeaderFlags::SHA2 | cipher,
            version: DATABASE_VERSION,
            master_seed: [0u8; 16],
            encryption_iv: [0u8; 16],
            num_groups: 0,
            num_entries: 0,
            contents_hash: [0u8; 32],
            transform_seed: [0u8; 32],
            key_enc_rounds,
        }
    }

    pub fn parse(data: &[u8]) -> Result<KdbHeader, Error> {
        check_signature(data)?;

        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidFileHeader("header is truncated"));
        }

        let version = LittleEndian::read_u32(&data[OFFSET_VERSION..]);
        if (version & DATABASE_VERSION_MASK) != (DATABASE_VERSION & DATABASE_VERSION_MASK) {
            return Err(Error::InvalidFileHeader("unsupported file version"));
        }

        let flags = HeaderFlags::from_bits_truncate(LittleEndian::read_u32(&data[OFFSET_FLAGS..]));

        let mut header = KdbHeader {
            flags,
            version,
            master_seed: [0u8; 16],
            encryption_iv: [0u8; 16],
            num_groups: LittleEndian::read_u32(&data[OFFSET_GROUPS..]),
            num_entries: LittleEndian::read_u32(&data[OFFSET_ENTRIES..]),
            contents_hash: [0u8; 32],
            transform_seed: [0u8; 32],
            key_enc_rounds: LittleEndian::read_u32(&data[OFFSET_ROUNDS..]),
        };

        header.master_seed.copy_from_slice(&data[OFFSET_MASTER_SEED..OFFSET_IV]);
        header.encryption_iv.copy_from_slice(&data[OFFSET_IV..OFFSET_GROUPS]);
        header.contents_hash.copy_from_slice(&data[OFFSET_CONTENTS_HASH..OFFSET_TRANSFORM_SEED]);
        header.transform_seed.copy_from_slice(&data[OFFSET_TRANSFORM_SEED..OFFSET_ROUNDS]);

        header.algorithm()?;
        Ok(header)
    }

    /// The content cipher. Exactly one of the two cipher bits must be set.
    pub fn algorithm(&self) -> Result<PwAlgorithm, Error> {
        let aes = self.flags.contains(HeaderFlags::RIJNDAEL);
        let twofish = self.flags.contains(HeaderFlags::TWOFISH);
        match (aes, twofish) {
            (true, false) => Ok(PwAlgorithm::Aes),
            (false, true) => Ok(PwAlgorithm::Twofish),
            (true, true) => Err(Error::InvalidFileHeader("more than one cipher selected")),
            (false, false) => Err(Error::InvalidFileHeader("no supported cipher selected")),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut out[0..4], FILE_SIGNATURE.0);
        LittleEndian::write_u32(&mut out[4..8], FILE_SIGNATURE.1);
        LittleEndian::write_u32(&mut out[OFFSET_FLAGS..], self.flags.bits());
        LittleEndian::write_u32(&mut out[OFFSET_VERSION..], self.version);
        out[OFFSET_MASTER_SEED..OFFSET_IV].copy_from_slice(&self.master_seed);
        out[OFFSET_IV..OFFSET_GROUPS].copy_from_slice(&self.encryption_iv);
        LittleEndian::write_u32(&mut out[OFFSET_GROUPS..], self.num_groups);
        LittleEndian::write_u32(&mut out[OFFSET_ENTRIES..], self.num_entries);
        out[OFFSET_CONTENTS_HASH..OFFSET_TRANSFORM_SEED].copy_from_slice(&self.contents_hash);
        out[OFFSET_TRANSFORM_SEED..OFFSET_ROUNDS].copy_from_slice(&self.transform_seed);
        LittleEndian::write_u32(&mut out[OFFSET_ROUNDS..], self.key_enc_rounds);
        out
    }

    /// SHA-256 over the header with the contents hash left out, as stored in
    /// the first group's extra data.
    pub fn header_hash(&self) -> [u8; 32] {
        header_hash_of(&self.to_bytes())
    }
}

pub fn header_hash_of(bytes: &[u8; HEADER_SIZE]) -> [u8; 32] {
    let mut ctx = HashContext::new();
    ctx.update(&bytes[..OFFSET_CONTENTS_HASH]);
    ctx.update(&bytes[OFFSET_TRANSFORM_SEED..]);
    ctx.finalize()
}
