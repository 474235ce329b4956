/// Version of the database format encoded as 32-bit unsigned integer.
/// Files are accepted if they match this value in every byte except the last one.
pub const DATABASE_VERSION: u32 = 0x00030004;

/// Mask applied to the version word before comparing it to `DATABASE_VERSION`.
pub const DATABASE_VERSION_MASK: u32 = 0xFFFFFF00;

/// Default number of master key encryption/transformation rounds
/// (making dictionary attacks harder).
pub const DEFAULT_KEY_ENCRYPTION_ROUNDS: u32 = 6000;

/// Name of the group that receives copies of deleted or edited entries.
pub const BACKUP_GROUP_NAME: &str = "Backup";

/// Icon used when the backup group has to be created.
pub const BACKUP_GROUP_ICON: u32 = 4;

/// Name of the group used by front ends to show search results.
pub const SEARCH_GROUP_NAME: &str = "Search Results";


/// Group IDs that are never assigned to a real group.
pub const INVALID_GROUP_ID_ZERO: u32 = 0;
pub const INVALID_GROUP_ID_MAX: u32 = 0xFFFFFFFF;

/// Check whether a group name is one of the reserved names (compared case-insensitively).
pub fn is_reserved_group_name(name: &str) -> bool {
    is_backup_group_name(name) || name.eq_ignore_ascii_case(SEARCH_GROUP_NAME)
}

/// Check whether a group name designates the backup group.
pub fn is_backup_group_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(BACKUP_GROUP_NAME)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reserved_names_ignore_case() {
        assert!(is_reserved_group_name("backup"));
        assert!(is_reserved_group_name("SEARCH RESULTS"));
        assert!(!is_reserved_group_name("Backups"));
        assert!(is_backup_group_name("BaCkUp"));
        assert!(!is_backup_group_name("Search Results"));
    }
}
