pub mod header;
pub mod meta;
pub mod read;
pub mod write;

pub use self::header::KdbHeader;
pub use self::meta::{Metadata, MetaStream, UiState};
pub use self::read::*;
pub use self::write::*;

/// KeePass 1.x signature.
pub const FILE_SIGNATURE: (u32, u32) = (0x9AA2D903, 0xB54BFB65);
/// KeePass 2.x signature.
pub const FILE_SIGNATURE_KDBX: (u32, u32) = (0x9AA2D903, 0xB54BFB67);
/// KeePass 2.x pre-release (alpha and beta) signature.
pub const FILE_SIGNATURE_KDBX_PRE_RELEASE: (u32, u32) = (0x9AA2D903, 0xB54BFB66);

pub const HEADER_SIZE: usize = 124;

bitflags::bitflags! {
    pub struct HeaderFlags: u32 {
        const SHA2 = 1;
        const RIJNDAEL = 2;
        const ARCFOUR = 4;
        const TWOFISH = 8;
    }
}

// Group fields
pub const GROUP_FIELD_EXT_DATA: u16 = 0x0000;
pub const GROUP_FIELD_ID: u16 = 0x0001;
pub const GROUP_FIELD_NAME: u16 = 0x0002;
pub const GROUP_FIELD_CREATION: u16 = 0x0003;
pub const GROUP_FIELD_LAST_MOD: u16 = 0x0004;
pub const GROUP_FIELD_LAST_ACCESS: u16 = 0x0005;
pub const GROUP_FIELD_EXPIRE: u16 = 0x0006;
pub const GROUP_FIELD_IMAGE: u16 = 0x0007;
pub const GROUP_FIELD_LEVEL: u16 = 0x0008;
pub const GROUP_FIELD_FLAGS: u16 = 0x0009;

// Entry fields
pub const ENTRY_FIELD_EXT_DATA: u16 = 0x0000;
pub const ENTRY_FIELD_UUID: u16 = 0x0001;
pub const ENTRY_FIELD_GROUP_ID: u16 = 0x0002;
pub const ENTRY_FIELD_IMAGE: u16 = 0x0003;
pub const ENTRY_FIELD_TITLE: u16 = 0x0004;
pub const ENTRY_FIELD_URL: u16 = 0x0005;
pub const ENTRY_FIELD_USERNAME: u16 = 0x0006;
pub const ENTRY_FIELD_PASSWORD: u16 = 0x0007;
pub const ENTRY_FIELD_NOTES: u16 = 0x0008;
pub const ENTRY_FIELD_CREATION: u16 = 0x0009;
pub const ENTRY_FIELD_LAST_MOD: u16 = 0x000A;
pub const ENTRY_FIELD_LAST_ACCESS: u16 = 0x000B;
pub const ENTRY_FIELD_EXPIRE: u16 = 0x000C;
pub const ENTRY_FIELD_BINARY_DESC: u16 = 0x000D;
pub const ENTRY_FIELD_BINARY_DATA: u16 = 0x000E;

/// Terminates a group or entry record, and the header-hash stream.
pub const FIELD_END: u16 = 0xFFFF;

// Fields inside the first group's extra data.
pub const EXT_FIELD_HEADER_HASH: u16 = 0x0001;
pub const EXT_FIELD_RANDOM_DATA: u16 = 0x0002;

/// How strictly `load_kdb` treats damaged input.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LoadMode {
    /// Any hash mismatch or malformed record fails the load.
    Strict,

    /// Best effort recovery. Hash checks are skipped, unknown fields are
    /// dropped and parsing stops at the first truncated record. Damaged or
    /// malicious bytes can end up in the database.
    Repair,
}

/// Statistics of a load, mostly of interest after a repair.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairInfo {
    /// Group count declared in the header.
    pub original_group_count: u32,
    /// Entry count declared in the header (meta-streams included).
    pub original_entry_count: u32,
    /// Meta-stream entries found, known or not.
    pub recognized_meta_stream_count: u32,
    /// Groups that were fully parsed.
    pub recovered_group_count: u32,
    /// Entries that were fully parsed (meta-streams included).
    pub recovered_entry_count: u32,
}
