use std::fmt;
use std::path::Path;
use crate::constants;
use crate::context::CryptoRandom;
use crate::crypto::cipher::PwAlgorithm;
use crate::crypto::kdf;
use crate::cryptoutil;
use crate::error::Error;
use crate::kdb::{self, LoadMode, Metadata, RepairInfo};
use crate::security::{PasswordGuard, ProtectedPassword, SecretKey, SessionKey};
use crate::time::PwTime;

pub mod merge;
pub mod search;
pub mod tree;

pub use self::merge::MergeMode;
pub use self::search::{SearchFlags, SearchOptions};
pub use self::tree::SortField;

pub const UUID_SIZE: usize = 16;

/// 16 byte entry identifier. All zeroes means "no entry".
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PwUUID([u8; UUID_SIZE]);

impl PwUUID {
    pub const SIZE: usize = 16;
    pub const ZERO: PwUUID = PwUUID([0u8; UUID_SIZE]);

    /// Wrap an array of bytes of the correct size in a PwUUID.
    pub const fn wrap(data: [u8; UUID_SIZE]) -> PwUUID {
        PwUUID(data)
    }

    /// `None` unless `data` is exactly 16 bytes long.
    pub fn from_slice(data: &[u8]) -> Option<PwUUID> {
        if data.len() != UUID_SIZE {
            return None;
        }
        let mut uuid = PwUUID::zero();
        uuid.0.copy_from_slice(data);
        Some(uuid)
    }

    /// Creates a UUID with all bytes set to zero.
    pub const fn zero() -> PwUUID {
        PwUUID::ZERO
    }

    /// Create a new random, non-zero UUID.
    pub fn random(random: &mut CryptoRandom) -> PwUUID {
        let mut uuid = Self::zero();
        loop {
            random.get_random_bytes(&mut uuid.0);
            if !uuid.is_zero() {
                break
            }
        }
        uuid
    }

    pub fn is_zero(&self) -> bool {
        self.0 == PwUUID::ZERO.0
    }

    pub fn as_bytes(&self) -> &[u8; UUID_SIZE] {
        &self.0
    }
}

impl Default for PwUUID {
    fn default() -> PwUUID {
        PwUUID::zero()
    }
}

impl fmt::Display for PwUUID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let hex = hex::encode_upper(&self.0);
        for (idx, chunk) in hex.as_bytes().chunks(UUID_SIZE / 2).enumerate() {
            if idx > 0 {
                f.write_str("-")?;
            }
            // hex output is always ASCII
            f.write_str(std::str::from_utf8(chunk).map_err(|_| fmt::Error)?)?;
        }
        Ok(())
    }
}

impl fmt::Debug for PwUUID {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "PwUUID({})", self)
    }
}

/// A group. Groups form a tree through their `level`: the parent of a group
/// is the closest group before it whose level is one less.
///
/// `name` is stored NUL terminated; anything after an embedded NUL does not
/// survive a save.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PwGroup {
    pub group_id: u32,
    pub image_id: u32,
    pub name: String,

    pub creation: PwTime,
    pub last_mod: PwTime,
    pub last_access: PwTime,
    pub expire: PwTime,

    /// Depth in the tree, 0 for top level groups.
    pub level: u16,

    /// Front end flags (e.g. expanded state). Not interpreted here.
    pub flags: u32,

    /// Unknown extra data from the file, written back unchanged.
    pub(crate) ext_data: Vec<u8>,
}

impl PwGroup {
    /// A top level group with the current time as creation time and no
    /// expiry. The id is assigned when the group is added to a database.
    pub fn new<S: Into<String>>(name: S) -> PwGroup {
        let now = PwTime::now();
        PwGroup {
            group_id: 0,
            image_id: 0,
            name: name.into(),
            creation: now,
            last_mod: now,
            last_access: now,
            expire: PwTime::NEVER_EXPIRE,
            level: 0,
            flags: 0,
            ext_data: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: u16) -> PwGroup {
        self.level = level;
        self
    }

    pub fn with_image(mut self, image_id: u32) -> PwGroup {
        self.image_id = image_id;
        self
    }
}

/// A password entry.
///
/// String fields and the password are stored NUL terminated. Text after an
/// embedded NUL is dropped when the database is saved and reloaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PwEntry {
    pub uuid: PwUUID,
    pub group_id: u32,
    pub image_id: u32,

    pub title: String,
    pub url: String,
    pub username: String,

    /// Locked with the owning database's session key while stored in it.
    pub(crate) password: ProtectedPassword,

    pub notes: String,

    pub creation: PwTime,
    pub last_mod: PwTime,
    pub last_access: PwTime,
    pub expire: PwTime,

    /// Name of the attached file, if any.
    pub binary_desc: String,

    /// Attached file contents. `None` and an empty attachment are the same on disk.
    pub binary_data: Option<Vec<u8>>,

    pub(crate) ext_data: Vec<u8>,
}

impl PwEntry {
    /// An entry for the group `group_id`. The UUID is assigned when the entry
    /// is added to a database.
    pub fn new<S: Into<String>>(group_id: u32, title: S) -> PwEntry {
        let now = PwTime::now();
        PwEntry {
            uuid: PwUUID::zero(),
            group_id,
            image_id: 0,
            title: title.into(),
            url: String::new(),
            username: String::new(),
            password: ProtectedPassword::default(),
            notes: String::new(),
            creation: now,
            last_mod: now,
            last_access: now,
            expire: PwTime::NEVER_EXPIRE,
            binary_desc: String::new(),
            binary_data: None,
            ext_data: Vec::new(),
        }
    }

    /// Replaces the password with a plaintext value. The database locks it
    /// again when the entry is added or stored.
    pub fn set_password(&mut self, plaintext: &str) {
        self.password.set(plaintext.as_bytes());
    }

    pub fn password(&self) -> &ProtectedPassword {
        &self.password
    }

    pub fn has_attachment(&self) -> bool {
        self.binary_data.as_ref().map_or(false, |data| !data.is_empty())
    }

    /// True if the entry has a real expiry time that is before `now`.
    pub fn is_expired(&self, now: &PwTime) -> bool {
        !self.expire.is_effectively_never() && self.expire < *now
    }
}

/// Settings a database starts with. Nothing is read from global state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub algorithm: PwAlgorithm,
    pub key_enc_rounds: u32,
    pub backup_group_name: String,
    pub search_group_name: String,
}

impl Default for DatabaseConfig {
    fn default() -> DatabaseConfig {
        DatabaseConfig {
            algorithm: PwAlgorithm::Aes,
            key_enc_rounds: constants::DEFAULT_KEY_ENCRYPTION_ROUNDS,
            backup_group_name: constants::BACKUP_GROUP_NAME.to_string(),
            search_group_name: constants::SEARCH_GROUP_NAME.to_string(),
        }
    }
}

/// An open KeePass 1.x database: a flat list of groups in tree order, a flat
/// list of entries, the metadata carried in meta-streams and the key state.
///
/// There is no internal locking; one thread at a time.
pub struct PwDatabase {
    pub(crate) random: CryptoRandom,
    config: DatabaseConfig,

    algorithm: PwAlgorithm,
    key_enc_rounds: u32,

    pub(crate) groups: Vec<PwGroup>,
    pub(crate) entries: Vec<PwEntry>,

    /// Data stored in meta-stream entries (UI state, custom key/value pairs, ...).
    pub metadata: Metadata,

    /// Raw composite key, before the key transformation.
    master_key: Option<SecretKey>,

    /// XOR key for the in-memory password obfuscation. New for every database value.
    pub(crate) session_key: SessionKey,
}

impl PwDatabase {
    pub fn new() -> PwDatabase {
        PwDatabase::with_config(DatabaseConfig::default())
    }

    pub fn with_config(config: DatabaseConfig) -> PwDatabase {
        let mut random = CryptoRandom::new();
        let session_key = SessionKey::random(&mut random);
        PwDatabase {
            random,
            algorithm: config.algorithm,
            key_enc_rounds: config.key_enc_rounds,
            config,
            groups: Vec::new(),
            entries: Vec::new(),
            metadata: Metadata::default(),
            master_key: None,
            session_key,
        }
    }

    /// Drops all groups, entries, metadata and the master key and restores
    /// the configured algorithm and rounds.
    pub fn new_database(&mut self) {
        self.groups.clear();
        self.entries.clear();
        self.metadata = Metadata::default();
        self.master_key = None;
        self.algorithm = self.config.algorithm;
        self.key_enc_rounds = self.config.key_enc_rounds;
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    // Key state

    /// Sets the master key from a password, key file contents, or both.
    pub fn set_master_key(&mut self, password: Option<&str>, key_file: Option<&[u8]>) -> Result<(), Error> {
        let key = cryptoutil::composite_key(password, key_file)?;
        self.master_key = Some(key);
        Ok(())
    }

    /// Same as `set_master_key` with the key file read from disk.
    pub fn set_master_key_from_file<P: AsRef<Path>>(&mut self, password: Option<&str>, key_file: P) -> Result<(), Error> {
        let mut data = std::fs::read(key_file).map_err(Error::NoFileAccessRead)?;
        let result = self.set_master_key(password, Some(&data[..]));
        crate::memutil::secure_erase(&mut data);
        result
    }

    pub fn has_master_key(&self) -> bool {
        self.master_key.is_some()
    }

    /// Forgets the master key. The key bytes are zeroed.
    pub fn clear_master_key(&mut self) {
        self.master_key = None;
    }

    pub(crate) fn master_key(&self) -> Option<&SecretKey> {
        self.master_key.as_ref()
    }

    pub fn algorithm(&self) -> PwAlgorithm {
        self.algorithm
    }

    pub fn set_algorithm(&mut self, algorithm: PwAlgorithm) {
        self.algorithm = algorithm;
    }

    pub fn key_enc_rounds(&self) -> u32 {
        self.key_enc_rounds
    }

    pub fn set_key_enc_rounds(&mut self, rounds: u32) {
        self.key_enc_rounds = rounds;
    }

    /// Rounds the key transformation manages in `millis` milliseconds on this
    /// machine, capped to what the header can store.
    pub fn benchmark_key_transform(millis: u64) -> u32 {
        let rounds = kdf::benchmark(millis);
        if rounds > u32::max_value() as u64 {
            u32::max_value()
        } else {
            rounds as u32
        }
    }

    // File IO

    /// Loads a database file with full integrity checks, replacing the
    /// current content. The master key must be set.
    pub fn open_database<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        self.open_database_ex(path, LoadMode::Strict).map(|_| ())
    }

    /// Like `open_database`, optionally in repair mode.
    pub fn open_database_ex<P: AsRef<Path>>(&mut self, path: P, mode: LoadMode) -> Result<RepairInfo, Error> {
        kdb::load_kdb_file(path, self, mode)
    }

    /// Encrypts and writes the database. The file is replaced atomically.
    pub fn save_database<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        kdb::save_kdb_file(path, self)
    }

    // Groups

    pub fn number_of_groups(&self) -> u32 {
        self.groups.len() as u32
    }

    pub fn groups(&self) -> &[PwGroup] {
        &self.groups
    }

    pub fn get_group(&self, index: usize) -> Option<&PwGroup> {
        self.groups.get(index)
    }

    pub fn get_group_by_id(&self, group_id: u32) -> Option<&PwGroup> {
        self.groups.iter().find(|g| g.group_id == group_id)
    }

    pub fn get_group_index(&self, group_id: u32) -> Option<usize> {
        self.groups.iter().position(|g| g.group_id == group_id)
    }

    /// Appends a group at the end of the tree and returns its id. A zero id
    /// in the template is replaced by a fresh one.
    pub fn add_group(&mut self, template: &PwGroup) -> Result<u32, Error> {
        let max_level = self.groups.last().map_or(0, |g| g.level as u32 + 1);
        if template.level as u32 > max_level {
            return Err(Error::InvalidParam("group level skips a tree level"));
        }

        let mut group = template.clone();
        self.assign_group_id(&mut group)?;
        let group_id = group.group_id;
        self.groups.push(group);
        Ok(group_id)
    }

    /// Overwrites the group at `index`. Its id and level are kept.
    pub fn set_group(&mut self, index: usize, template: &PwGroup) -> Result<(), Error> {
        let group = self.groups.get_mut(index).ok_or(Error::InvalidParam("group index out of range"))?;
        let group_id = group.group_id;
        let level = group.level;
        *group = template.clone();
        group.group_id = group_id;
        group.level = level;
        Ok(())
    }

    /// Deletes a group with all its subgroups and their entries. With
    /// `backup_entries` the entries are copied to the backup group first.
    pub fn delete_group_by_id(&mut self, group_id: u32, backup_entries: bool) -> Result<(), Error> {
        let index = self.get_group_index(group_id).ok_or(Error::InvalidParam("unknown group id"))?;
        let end = self.subtree_end(index);
        let doomed: Vec<u32> = self.groups[index..end].iter().map(|g| g.group_id).collect();

        if backup_entries {
            let backup_is_doomed = self.backup_group_index().map_or(false, |b| b >= index && b < end);
            if !backup_is_doomed {
                let affected: Vec<usize> = self.entries.iter().enumerate()
                    .filter(|(_, e)| doomed.contains(&e.group_id))
                    .map(|(idx, _)| idx)
                    .collect();
                for idx in affected {
                    self.backup_entry(idx)?;
                }
            }
        }

        self.entries.retain(|e| !doomed.contains(&e.group_id));
        self.groups.drain(index..end);
        tracing::debug!(group_id, removed = doomed.len(), "deleted group subtree");
        Ok(())
    }

    pub(crate) fn assign_group_id(&mut self, group: &mut PwGroup) -> Result<(), Error> {
        if group.group_id == constants::INVALID_GROUP_ID_ZERO || group.group_id == constants::INVALID_GROUP_ID_MAX {
            group.group_id = self.new_group_id();
        } else if self.get_group_index(group.group_id).is_some() {
            return Err(Error::InvalidParam("group id already in use"));
        }
        Ok(())
    }

    /// A random id that is neither reserved nor in use.
    pub(crate) fn new_group_id(&mut self) -> u32 {
        loop {
            let id = self.random.random_u32();
            if id != constants::INVALID_GROUP_ID_ZERO
                && id != constants::INVALID_GROUP_ID_MAX
                && self.get_group_index(id).is_none()
            {
                return id;
            }
        }
    }

    /// True if `name` is the backup or the search results group name.
    pub fn is_reserved_group_name(&self, name: &str) -> bool {
        constants::is_reserved_group_name(name)
            || name.eq_ignore_ascii_case(&self.config.backup_group_name)
            || name.eq_ignore_ascii_case(&self.config.search_group_name)
    }

    fn is_backup_group_name(&self, name: &str) -> bool {
        constants::is_backup_group_name(name) || name.eq_ignore_ascii_case(&self.config.backup_group_name)
    }

    pub fn backup_group_index(&self) -> Option<usize> {
        self.groups.iter().position(|g| self.is_backup_group_name(&g.name))
    }

    /// Id of the backup group, creating it at the top level if needed.
    pub fn ensure_backup_group(&mut self) -> Result<u32, Error> {
        if let Some(index) = self.backup_group_index() {
            return Ok(self.groups[index].group_id);
        }
        let group = PwGroup::new(self.config.backup_group_name.clone()).with_image(constants::BACKUP_GROUP_ICON);
        self.add_group(&group)
    }

    // Entries

    pub fn number_of_entries(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn entries(&self) -> &[PwEntry] {
        &self.entries
    }

    pub fn get_entry(&self, index: usize) -> Option<&PwEntry> {
        self.entries.get(index)
    }

    pub fn get_entry_by_uuid(&self, uuid: &PwUUID) -> Option<&PwEntry> {
        self.entries.iter().find(|e| e.uuid == *uuid)
    }

    pub fn get_entry_index(&self, uuid: &PwUUID) -> Option<usize> {
        self.entries.iter().position(|e| e.uuid == *uuid)
    }

    /// The `n`th entry of a group, in list order.
    pub fn get_entry_by_group(&self, group_id: u32, n: usize) -> Option<&PwEntry> {
        self.get_entry_index_by_group(group_id, n).map(|idx| &self.entries[idx])
    }

    pub fn get_entry_index_by_group(&self, group_id: u32, n: usize) -> Option<usize> {
        self.entries.iter().enumerate()
            .filter(|(_, e)| e.group_id == group_id)
            .nth(n)
            .map(|(idx, _)| idx)
    }

    pub fn number_of_items_in_group(&self, group_id: u32) -> u32 {
        self.entries.iter().filter(|e| e.group_id == group_id).count() as u32
    }

    /// Appends an entry and returns its UUID. The group must exist; a zero
    /// UUID in the template is replaced by a fresh one.
    pub fn add_entry(&mut self, template: &PwEntry) -> Result<PwUUID, Error> {
        if self.get_group_index(template.group_id).is_none() {
            return Err(Error::InvalidParam("entry group does not exist"));
        }
        self.check_password_owner(template)?;

        let mut entry = template.clone();
        if entry.uuid.is_zero() {
            entry.uuid = self.new_uuid();
        } else if self.get_entry_index(&entry.uuid).is_some() {
            return Err(Error::InvalidParam("entry uuid already in use"));
        }

        entry.password.lock(&self.session_key);
        let uuid = entry.uuid;
        self.entries.push(entry);
        Ok(uuid)
    }

    /// Overwrites the entry at `index`. Its UUID is kept.
    pub fn set_entry(&mut self, index: usize, template: &PwEntry) -> Result<(), Error> {
        if index >= self.entries.len() {
            return Err(Error::InvalidParam("entry index out of range"));
        }
        if self.get_group_index(template.group_id).is_none() {
            return Err(Error::InvalidParam("entry group does not exist"));
        }
        self.check_password_owner(template)?;

        let uuid = self.entries[index].uuid;
        let mut entry = template.clone();
        entry.uuid = uuid;
        entry.password.lock(&self.session_key);
        self.entries[index] = entry;
        Ok(())
    }

    /// Removes an entry. With `backup` it is first copied to the backup
    /// group, unless it already lives there.
    pub fn delete_entry(&mut self, index: usize, backup: bool) -> Result<(), Error> {
        if index >= self.entries.len() {
            return Err(Error::InvalidParam("entry index out of range"));
        }

        if backup {
            let in_backup = self.backup_group_index()
                .map_or(false, |b| self.groups[b].group_id == self.entries[index].group_id);
            if !in_backup {
                self.backup_entry(index)?;
            }
        }

        self.entries.remove(index);
        Ok(())
    }

    /// Copies an entry into the backup group under a new UUID.
    pub fn backup_entry(&mut self, index: usize) -> Result<PwUUID, Error> {
        if index >= self.entries.len() {
            return Err(Error::InvalidParam("entry index out of range"));
        }

        let backup_id = self.ensure_backup_group()?;
        let mut copy = self.entries[index].clone();
        copy.uuid = self.new_uuid();
        copy.group_id = backup_id;
        let uuid = copy.uuid;
        self.entries.push(copy);
        Ok(uuid)
    }

    /// Moves an entry to another existing group.
    pub fn set_entry_group(&mut self, index: usize, group_id: u32) -> Result<(), Error> {
        if self.get_group_index(group_id).is_none() {
            return Err(Error::InvalidParam("unknown group id"));
        }
        let entry = self.entries.get_mut(index).ok_or(Error::InvalidParam("entry index out of range"))?;
        entry.group_id = group_id;
        Ok(())
    }

    /// Updates the access time, and the modification time when `modified`.
    pub fn touch_entry(&mut self, index: usize, modified: bool) -> bool {
        match self.entries.get_mut(index) {
            Some(entry) => {
                let now = PwTime::now();
                entry.last_access = now;
                if modified {
                    entry.last_mod = now;
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn new_uuid(&mut self) -> PwUUID {
        loop {
            let uuid = PwUUID::random(&mut self.random);
            if self.get_entry_index(&uuid).is_none() {
                return uuid;
            }
        }
    }

    // Passwords

    /// Unlocks the password of an entry for reading; it is locked again when
    /// the guard is dropped.
    pub fn entry_password(&mut self, index: usize) -> Option<PasswordGuard> {
        let session_key = &self.session_key;
        self.entries.get_mut(index).map(move |e| PasswordGuard::new(&mut e.password, session_key))
    }

    /// Sets the plaintext password of a stored entry.
    pub fn set_entry_password(&mut self, index: usize, plaintext: &str) -> bool {
        let session_key = &self.session_key;
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.password.set(plaintext.as_bytes());
                entry.password.lock(session_key);
                true
            }
            None => false,
        }
    }

    pub fn lock_entry_password(&mut self, index: usize) -> bool {
        let session_key = &self.session_key;
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.password.lock(session_key);
                true
            }
            None => false,
        }
    }

    /// Leaves the password unlocked until `lock_entry_password` is called.
    /// Prefer `entry_password`.
    pub fn unlock_entry_password(&mut self, index: usize) -> bool {
        let session_key = &self.session_key;
        match self.entries.get_mut(index) {
            Some(entry) => {
                entry.password.unlock(session_key);
                true
            }
            None => false,
        }
    }

    /// Plaintext copy of a password, lock state unchanged.
    pub fn entry_password_plaintext(&self, index: usize) -> Option<zeroize::Zeroizing<Vec<u8>>> {
        self.entries.get(index).and_then(|e| e.password.plaintext(&self.session_key))
    }

    /// Copy of an entry with its password unlocked, so it can be added to
    /// another database.
    pub fn detached_entry(&self, index: usize) -> Option<PwEntry> {
        let entry = self.entries.get(index)?;
        let plaintext = entry.password.plaintext(&self.session_key)?;
        let mut copy = entry.clone();
        copy.password = ProtectedPassword::new(&plaintext);
        Some(copy)
    }

    // Entries cloned from another database carry passwords locked with that
    // database's session key.
    fn check_password_owner(&self, template: &PwEntry) -> Result<(), Error> {
        if template.password.is_readable_with(&self.session_key) {
            Ok(())
        } else {
            Err(Error::InvalidParam("entry password is locked by another database"))
        }
    }
}

impl Default for PwDatabase {
    fn default() -> PwDatabase {
        PwDatabase::new()
    }
}
