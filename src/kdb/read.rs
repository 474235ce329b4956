use std::collections::HashSet;
use std::io::prelude::*;
use std::path::Path;
use byteorder::{ByteOrder, LittleEndian};
use zeroize::Zeroizing;

use crate::constants;
use crate::context::CryptoRandom;
use crate::crypto::CryptoError;
use crate::crypto::cipher::get_cipher_engine;
use crate::crypto::hash::sha256;
use crate::cryptoutil;
use crate::database::{PwDatabase, PwEntry, PwGroup, PwUUID};
use crate::error::Error;
use crate::ioutil::{Field, SliceReader};
use crate::memutil;
use crate::security::{ProtectedPassword, SessionKey};
use crate::strutil::decode_cstring;
use crate::time::PwTime;

use super::*;
use super::header::header_hash_of;
use super::meta;

/// Reads a whole database file into `database`. See `load_kdb`.
pub fn load_kdb_file<P: AsRef<Path>>(path: P, database: &mut PwDatabase, mode: LoadMode) -> Result<RepairInfo, Error> {
    let mut file = std::fs::File::open(path).map_err(Error::NoFileAccessRead)?;
    let mut data = Vec::new();
    file.read_to_end(&mut data).map_err(Error::FileErrorRead)?;
    load_kdb(&data, database, mode)
}

/// Decrypts and parses a KeePass 1.x file image. On success the groups,
/// entries, metadata, algorithm and rounds of `database` are replaced; on
/// failure `database` is left untouched.
///
/// The master key must already be set on `database`.
pub fn load_kdb(data: &[u8], database: &mut PwDatabase, mode: LoadMode) -> Result<RepairInfo, Error> {
    let repair = mode == LoadMode::Repair;
    let header = KdbHeader::parse(data)?;
    let algorithm = header.algorithm()?;

    tracing::debug!(?algorithm, rounds = header.key_enc_rounds, groups = header.num_groups,
        entries = header.num_entries, ?mode, "opening kdb database");

    let mut body = &data[HEADER_SIZE..];
    if body.is_empty() && !repair {
        return Err(Error::InvalidFileStructure("no encrypted content"));
    }
    let partial = body.len() % 16;
    if partial != 0 {
        if !repair {
            return Err(Error::InvalidFileStructure("encrypted content is not a whole number of blocks"));
        }
        tracing::warn!(dropped = partial, "dropping trailing partial block");
        body = &body[..body.len() - partial];
    }

    let final_key = {
        let raw_key = database.master_key().ok_or(Error::InvalidKey)?;
        cryptoutil::final_key(raw_key, &header.master_seed, &header.transform_seed, header.key_enc_rounds)?
    };

    let engine = get_cipher_engine(algorithm);
    let plaintext = if body.is_empty() {
        Zeroizing::new(Vec::new())
    } else {
        match engine.pad_decrypt(final_key.as_bytes(), &header.encryption_iv, body) {
            Ok(plaintext) => Zeroizing::new(plaintext),
            Err(CryptoError::BadPadding) if repair => {
                tracing::warn!("bad padding, parsing the raw decrypted content");
                Zeroizing::new(engine.raw_decrypt(final_key.as_bytes(), &header.encryption_iv, body)?)
            }
            Err(CryptoError::BadPadding) => return Err(Error::InvalidKey),
            Err(e) => return Err(e.into()),
        }
    };
    drop(final_key);

    if !repair {
        if !memutil::constant_time_eq(&sha256(&plaintext), &header.contents_hash) {
            return Err(Error::InvalidKey);
        }
        if header.num_groups == 0 {
            return Err(Error::DbEmpty);
        }
    }

    let mut info = RepairInfo {
        original_group_count: header.num_groups,
        original_entry_count: header.num_entries,
        ..RepairInfo::default()
    };

    let session_key = &database.session_key;
    let mut reader = SliceReader::new(&plaintext);

    let mut groups = Vec::new();
    let mut complete = true;
    for _ in 0..header.num_groups {
        match read_group(&mut reader, mode)? {
            Some(group) => groups.push(group),
            None => {
                complete = false;
                break
            }
        }
    }

    let mut entries = Vec::new();
    if complete {
        for _ in 0..header.num_entries {
            match read_entry(&mut reader, mode, session_key)? {
                Some(entry) => entries.push(entry),
                None => break,
            }
        }
    }

    info.recovered_group_count = groups.len() as u32;
    info.recovered_entry_count = entries.len() as u32;

    if !repair {
        if let Some(first) = groups.first() {
            check_header_hash(data, &first.ext_data)?;
        }
    }
    // Regenerated on every save.
    if let Some(first) = groups.first_mut() {
        first.ext_data.clear();
    }

    check_groups(&mut groups, mode, &mut database.random)?;

    let mut metadata = Metadata::default();
    let mut real_entries = Vec::with_capacity(entries.len());
    for entry in entries {
        if meta::is_meta_stream(&entry) {
            info.recognized_meta_stream_count += 1;
            metadata.absorb(meta::stream_from_entry(&entry));
        } else {
            real_entries.push(entry);
        }
    }

    check_entries(&mut real_entries, &groups, mode, &mut database.random)?;

    tracing::debug!(groups = groups.len(), entries = real_entries.len(),
        meta_streams = info.recognized_meta_stream_count, "kdb database loaded");

    database.groups = groups;
    database.entries = real_entries;
    database.metadata = metadata;
    database.set_algorithm(algorithm);
    database.set_key_enc_rounds(header.key_enc_rounds);

    Ok(info)
}

/// `Ok(None)` in repair mode, an error otherwise.
fn truncated<T>(mode: LoadMode, what: &'static str) -> Result<Option<T>, Error> {
    match mode {
        LoadMode::Strict => Err(Error::InvalidFileStructure(what)),
        LoadMode::Repair => {
            tracing::warn!("{}, stopping", what);
            Ok(None)
        }
    }
}

fn unknown_field(mode: LoadMode, record: &'static str, field: &Field) -> Result<(), Error> {
    match mode {
        LoadMode::Strict => Err(Error::InvalidFileStructure("unknown field type")),
        LoadMode::Repair => {
            tracing::warn!(record, field_type = field.field_type, size = field.data.len(), "skipping unknown field");
            Ok(())
        }
    }
}

/// Checks the size of a fixed size field. In repair mode a mismatch skips the field.
fn sized<'a>(field: &Field<'a>, size: usize, mode: LoadMode) -> Result<Option<&'a [u8]>, Error> {
    if field.data.len() == size {
        return Ok(Some(field.data));
    }
    match mode {
        LoadMode::Strict => Err(Error::InvalidFileStructure("field has the wrong size")),
        LoadMode::Repair => {
            tracing::warn!(field_type = field.field_type, size = field.data.len(), expected = size,
                "skipping field with the wrong size");
            Ok(None)
        }
    }
}

fn field_u16(field: &Field, mode: LoadMode) -> Result<Option<u16>, Error> {
    Ok(sized(field, 2, mode)?.map(LittleEndian::read_u16))
}

fn field_u32(field: &Field, mode: LoadMode) -> Result<Option<u32>, Error> {
    Ok(sized(field, 4, mode)?.map(LittleEndian::read_u32))
}

fn field_time(field: &Field, mode: LoadMode) -> Result<Option<PwTime>, Error> {
    Ok(sized(field, crate::time::PACKED_TIME_SIZE, mode)?.and_then(PwTime::unpack_slice))
}

fn read_group(reader: &mut SliceReader, mode: LoadMode) -> Result<Option<PwGroup>, Error> {
    let mut group = PwGroup::new(String::new());

    loop {
        let field = match reader.read_field() {
            Some(field) => field,
            None => return truncated(mode, "group record is truncated"),
        };

        match field.field_type {
            FIELD_END => return Ok(Some(group)),
            GROUP_FIELD_EXT_DATA => group.ext_data = field.data.to_vec(),
            GROUP_FIELD_ID => if let Some(v) = field_u32(&field, mode)? { group.group_id = v },
            GROUP_FIELD_NAME => group.name = decode_cstring(field.data),
            GROUP_FIELD_CREATION => if let Some(t) = field_time(&field, mode)? { group.creation = t },
            GROUP_FIELD_LAST_MOD => if let Some(t) = field_time(&field, mode)? { group.last_mod = t },
            GROUP_FIELD_LAST_ACCESS => if let Some(t) = field_time(&field, mode)? { group.last_access = t },
            GROUP_FIELD_EXPIRE => if let Some(t) = field_time(&field, mode)? { group.expire = t },
            GROUP_FIELD_IMAGE => if let Some(v) = field_u32(&field, mode)? { group.image_id = v },
            GROUP_FIELD_LEVEL => if let Some(v) = field_u16(&field, mode)? { group.level = v },
            GROUP_FIELD_FLAGS => if let Some(v) = field_u32(&field, mode)? { group.flags = v },
            _ => unknown_field(mode, "group", &field)?,
        }
    }
}

fn read_entry(reader: &mut SliceReader, mode: LoadMode, session_key: &SessionKey) -> Result<Option<PwEntry>, Error> {
    let mut entry = PwEntry::new(0, String::new());

    loop {
        let field = match reader.read_field() {
            Some(field) => field,
            None => return truncated(mode, "entry record is truncated"),
        };

        match field.field_type {
            FIELD_END => return Ok(Some(entry)),
            ENTRY_FIELD_EXT_DATA => entry.ext_data = field.data.to_vec(),
            ENTRY_FIELD_UUID => {
                if let Some(data) = sized(&field, PwUUID::SIZE, mode)? {
                    entry.uuid = PwUUID::from_slice(data).unwrap_or_default();
                }
            }
            ENTRY_FIELD_GROUP_ID => if let Some(v) = field_u32(&field, mode)? { entry.group_id = v },
            ENTRY_FIELD_IMAGE => if let Some(v) = field_u32(&field, mode)? { entry.image_id = v },
            ENTRY_FIELD_TITLE => entry.title = decode_cstring(field.data),
            ENTRY_FIELD_URL => entry.url = decode_cstring(field.data),
            ENTRY_FIELD_USERNAME => entry.username = decode_cstring(field.data),
            ENTRY_FIELD_PASSWORD => {
                let end = field.data.iter().position(|&b| b == 0).unwrap_or(field.data.len());
                entry.password = ProtectedPassword::locked_with(&field.data[..end], session_key);
            }
            ENTRY_FIELD_NOTES => entry.notes = decode_cstring(field.data),
            ENTRY_FIELD_CREATION => if let Some(t) = field_time(&field, mode)? { entry.creation = t },
            ENTRY_FIELD_LAST_MOD => if let Some(t) = field_time(&field, mode)? { entry.last_mod = t },
            ENTRY_FIELD_LAST_ACCESS => if let Some(t) = field_time(&field, mode)? { entry.last_access = t },
            ENTRY_FIELD_EXPIRE => if let Some(t) = field_time(&field, mode)? { entry.expire = t },
            ENTRY_FIELD_BINARY_DESC => entry.binary_desc = decode_cstring(field.data),
            ENTRY_FIELD_BINARY_DATA => {
                entry.binary_data = if field.data.is_empty() { None } else { Some(field.data.to_vec()) };
            }
            _ => unknown_field(mode, "entry", &field)?,
        }
    }
}

/// Finds the header hash in the first group's extra data. A missing hash is
/// accepted; files from older writers do not have one.
fn check_header_hash(data: &[u8], ext_data: &[u8]) -> Result<(), Error> {
    let mut reader = SliceReader::new(ext_data);
    while let Some(field) = reader.read_field() {
        match field.field_type {
            EXT_FIELD_HEADER_HASH if field.data.len() == 32 => {
                let mut header_bytes = [0u8; HEADER_SIZE];
                header_bytes.copy_from_slice(&data[..HEADER_SIZE]);
                if !memutil::constant_time_eq(&header_hash_of(&header_bytes), field.data) {
                    return Err(Error::InvalidFileHeader("header hash mismatch"));
                }
                return Ok(());
            }
            FIELD_END => break,
            _ => {}
        }
    }
    Ok(())
}

fn is_valid_group_id(group_id: u32) -> bool {
    group_id != constants::INVALID_GROUP_ID_ZERO && group_id != constants::INVALID_GROUP_ID_MAX
}

/// Validates ids and the level sequence. Repair mode fixes what it can.
fn check_groups(groups: &mut [PwGroup], mode: LoadMode, random: &mut CryptoRandom) -> Result<(), Error> {
    let mut seen = HashSet::with_capacity(groups.len());
    let mut prev_level: Option<u16> = None;

    for group in groups.iter_mut() {
        if !is_valid_group_id(group.group_id) || seen.contains(&group.group_id) {
            if mode == LoadMode::Strict {
                return Err(Error::InvalidFileStructure("invalid or duplicate group id"));
            }
            let old = group.group_id;
            group.group_id = loop {
                let id = random.random_u32();
                if is_valid_group_id(id) && !seen.contains(&id) {
                    break id;
                }
            };
            tracing::warn!(old, new = group.group_id, "reassigned group id");
        }
        seen.insert(group.group_id);

        let max_level = prev_level.map_or(0, |l| l.saturating_add(1));
        if group.level > max_level {
            if mode == LoadMode::Strict {
                return Err(Error::InvalidFileStructure("group level skips a tree level"));
            }
            tracing::warn!(group_id = group.group_id, level = group.level, max_level, "clamped group level");
            group.level = max_level;
        }
        prev_level = Some(group.level);
    }

    Ok(())
}

/// Every entry needs a unique non-zero UUID and an existing group. Repair
/// mode hands out new UUIDs and moves orphans into the first group.
fn check_entries(entries: &mut Vec<PwEntry>, groups: &[PwGroup], mode: LoadMode, random: &mut CryptoRandom) -> Result<(), Error> {
    let group_ids: HashSet<u32> = groups.iter().map(|g| g.group_id).collect();
    let strict = mode == LoadMode::Strict;

    if !strict && groups.is_empty() && !entries.is_empty() {
        tracing::warn!(dropped = entries.len(), "no groups recovered, dropping entries");
        entries.clear();
        return Ok(());
    }

    let mut seen = HashSet::with_capacity(entries.len());
    for entry in entries.iter_mut() {
        if entry.uuid.is_zero() || seen.contains(&entry.uuid) {
            if strict {
                return Err(Error::InvalidFileStructure("invalid or duplicate entry uuid"));
            }
            entry.uuid = loop {
                let uuid = PwUUID::random(random);
                if !seen.contains(&uuid) {
                    break uuid;
                }
            };
            tracing::warn!(uuid = %entry.uuid, "assigned new entry uuid");
        }
        seen.insert(entry.uuid);

        if !group_ids.contains(&entry.group_id) {
            if strict {
                return Err(Error::InvalidFileStructure("entry references a missing group"));
            }
            tracing::warn!(uuid = %entry.uuid, group_id = entry.group_id, "moved orphaned entry into the first group");
            entry.group_id = groups[0].group_id;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ioutil::{write_field, write_string_field, write_u32_field};

    fn keyed_database() -> PwDatabase {
        let mut db = PwDatabase::new();
        db.set_master_key(Some("secret"), None).expect("key");
        db.set_key_enc_rounds(50);
        db
    }

    /// Encrypts a hand-built body the way the writer would.
    fn encrypt_body(db: &PwDatabase, num_groups: u32, num_entries: u32, body: &[u8]) -> Vec<u8> {
        let mut header = KdbHeader::new(db.algorithm(), db.key_enc_rounds());
        header.master_seed = [3; 16];
        header.encryption_iv = [4; 16];
        header.transform_seed = [5; 32];
        header.num_groups = num_groups;
        header.num_entries = num_entries;
        header.contents_hash = sha256(body);

        let raw = db.master_key().expect("key");
        let key = cryptoutil::final_key(raw, &header.master_seed, &header.transform_seed, header.key_enc_rounds).expect("final");
        let ct = get_cipher_engine(db.algorithm()).pad_encrypt(key.as_bytes(), &header.encryption_iv, body).expect("encrypt");

        let mut out = header.to_bytes().to_vec();
        out.extend_from_slice(&ct);
        out
    }

    fn group_record(out: &mut Vec<u8>, id: u32, name: &str, level: u16) {
        write_u32_field(out, GROUP_FIELD_ID, id);
        write_string_field(out, GROUP_FIELD_NAME, name);
        write_field(out, GROUP_FIELD_LEVEL, &level.to_le_bytes());
        write_field(out, FIELD_END, &[]);
    }

    fn entry_record(out: &mut Vec<u8>, uuid: u8, group_id: u32, title: &str) {
        write_field(out, ENTRY_FIELD_UUID, &[uuid; 16]);
        write_u32_field(out, ENTRY_FIELD_GROUP_ID, group_id);
        write_string_field(out, ENTRY_FIELD_TITLE, title);
        write_string_field(out, ENTRY_FIELD_PASSWORD, "pw");
        write_field(out, FIELD_END, &[]);
    }

    #[test]
    fn minimal_body_without_header_hash() {
        let mut db = keyed_database();
        let mut body = Vec::new();
        group_record(&mut body, 1, "General", 0);
        entry_record(&mut body, 7, 1, "Mail");
        let file = encrypt_body(&db, 1, 1, &body);

        let info = load_kdb(&file, &mut db, LoadMode::Strict).expect("load");
        assert_eq!(info.recovered_group_count, 1);
        assert_eq!(info.recovered_entry_count, 1);
        assert_eq!(db.get_group(0).map(|g| g.name.as_str()), Some("General"));
        assert_eq!(db.get_entry(0).map(|e| e.uuid), Some(PwUUID::wrap([7; 16])));
        assert_eq!(&*db.entry_password_plaintext(0).expect("pw"), b"pw");
    }

    #[test]
    fn missing_key_is_invalid_key() {
        let keyed = keyed_database();
        let mut body = Vec::new();
        group_record(&mut body, 1, "General", 0);
        let file = encrypt_body(&keyed, 1, 0, &body);

        let mut db = PwDatabase::new();
        assert!(matches!(load_kdb(&file, &mut db, LoadMode::Strict), Err(Error::InvalidKey)));
    }

    #[test]
    fn unknown_field_strict_and_repair() {
        let mut db = keyed_database();
        let mut body = Vec::new();
        write_field(&mut body, 0x0042, &[1, 2, 3]);
        group_record(&mut body, 1, "General", 0);
        let file = encrypt_body(&db, 1, 0, &body);

        assert!(matches!(load_kdb(&file, &mut db, LoadMode::Strict), Err(Error::InvalidFileStructure(_))));
        load_kdb(&file, &mut db, LoadMode::Repair).expect("repair");
        assert_eq!(db.get_group(0).map(|g| g.name.as_str()), Some("General"));
    }

    #[test]
    fn level_gap_is_clamped_in_repair() {
        let mut db = keyed_database();
        let mut body = Vec::new();
        group_record(&mut body, 1, "Root", 0);
        group_record(&mut body, 2, "Deep", 3);
        let file = encrypt_body(&db, 2, 0, &body);

        assert!(matches!(load_kdb(&file, &mut db, LoadMode::Strict), Err(Error::InvalidFileStructure(_))));
        load_kdb(&file, &mut db, LoadMode::Repair).expect("repair");
        assert_eq!(db.get_group(1).map(|g| g.level), Some(1));
    }

    #[test]
    fn orphan_entry_moves_to_first_group_in_repair() {
        let mut db = keyed_database();
        let mut body = Vec::new();
        group_record(&mut body, 1, "General", 0);
        entry_record(&mut body, 7, 99, "Lost");
        let file = encrypt_body(&db, 1, 1, &body);

        assert!(matches!(load_kdb(&file, &mut db, LoadMode::Strict), Err(Error::InvalidFileStructure(_))));
        load_kdb(&file, &mut db, LoadMode::Repair).expect("repair");
        assert_eq!(db.get_entry(0).map(|e| e.group_id), Some(1));
    }

    #[test]
    fn zero_groups_is_empty() {
        let mut db = keyed_database();
        let file = encrypt_body(&db, 0, 0, &[]);
        assert!(matches!(load_kdb(&file, &mut db, LoadMode::Strict), Err(Error::DbEmpty)));
    }

    #[test]
    fn failed_load_leaves_database_untouched() {
        let mut db = keyed_database();
        db.add_group(&PwGroup::new("Keep me")).expect("group");
        let mut body = Vec::new();
        group_record(&mut body, 1, "General", 0);
        let mut file = encrypt_body(&db, 1, 0, &body);
        let last = file.len() - 1;
        file[last] ^= 1;

        assert!(load_kdb(&file, &mut db, LoadMode::Strict).is_err());
        assert_eq!(db.get_group(0).map(|g| g.name.as_str()), Some("Keep me"));
    }

    #[test]
    fn partial_block_rejected_in_strict_mode() {
        let mut db = keyed_database();
        let mut body = Vec::new();
        group_record(&mut body, 1, "General", 0);
        let mut file = encrypt_body(&db, 1, 0, &body);
        file.push(0);
        assert!(matches!(load_kdb(&file, &mut db, LoadMode::Strict), Err(Error::InvalidFileStructure(_))));
        load_kdb(&file, &mut db, LoadMode::Repair).expect("repair");
        assert_eq!(db.number_of_groups(), 1);
    }
}
