use std::fs;
use std::io::prelude::*;
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

use crate::crypto::cipher::get_cipher_engine;
use crate::crypto::hash::sha256;
use crate::cryptoutil;
use crate::database::{PwDatabase, PwEntry, PwGroup};
use crate::error::Error;
use crate::security::SessionKey;
use crate::ioutil::{write_field, write_string_field, write_u16_field, write_u32_field};

use super::*;
use super::header::header_hash_of;
use super::meta;

/// Encrypts `database` and replaces the file at `path` atomically: the data
/// goes to a temporary file next to it, which is synced and then renamed
/// over the target. A failed save leaves the previous file in place.
pub fn save_kdb_file<P: AsRef<Path>>(path: P, database: &mut PwDatabase) -> Result<(), Error> {
    let path = path.as_ref();
    let data = serialize_kdb(database)?;
    let tmp = temp_path(path)?;

    let result = write_and_replace(&tmp, path, &data);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    } else {
        tracing::debug!(path = %path.display(), size = data.len(), "kdb database saved");
    }
    result
}

fn temp_path(path: &Path) -> Result<PathBuf, Error> {
    let name = path.file_name().ok_or(Error::InvalidParam("path has no file name"))?;
    Ok(path.with_file_name(format!(".{}.tmp", name.to_string_lossy())))
}

fn write_and_replace(tmp: &Path, path: &Path, data: &[u8]) -> Result<(), Error> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    // Owner read/write only, from the moment the file exists.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(tmp).map_err(Error::NoFileAccessWrite)?;

    // A stale temp file left by a crash keeps its old mode.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600)).map_err(Error::NoFileAccessWrite)?;
    }

    file.write_all(data).map_err(Error::FileErrorWrite)?;
    file.sync_all().map_err(Error::FileErrorWrite)?;
    drop(file);

    fs::rename(tmp, path).map_err(Error::FileErrorWrite)
}

/// Produces the complete file image of `database`.
///
/// Seeds and IV are generated fresh for every call, so two saves of the same
/// database never share key material.
pub fn serialize_kdb(database: &mut PwDatabase) -> Result<Vec<u8>, Error> {
    if database.groups.is_empty() {
        return Err(Error::DbEmpty);
    }
    if !database.has_master_key() {
        return Err(Error::InvalidKey);
    }

    let mut header = KdbHeader::new(database.algorithm(), database.key_enc_rounds());
    database.random.get_random_bytes(&mut header.master_seed);
    database.random.get_random_bytes(&mut header.encryption_iv);
    database.random.get_random_bytes(&mut header.transform_seed);
    let mut random_data = [0u8; 32];
    database.random.get_random_bytes(&mut random_data);

    let first_group_id = database.groups[0].group_id;
    let streams = database.metadata.to_streams();
    let mut meta_entries = Vec::with_capacity(streams.len());
    for stream in &streams {
        let uuid = database.new_uuid();
        meta_entries.push(meta::meta_stream_entry(stream, first_group_id, uuid));
    }

    header.num_groups = database.groups.len() as u32;
    header.num_entries = (database.entries.len() + meta_entries.len()) as u32;

    // The header hash leaves the contents hash out, so it can be taken
    // before the body exists.
    let header_hash = header_hash_of(&header.to_bytes());
    let mut first_ext = Vec::with_capacity(2 * (6 + 32) + 6);
    write_field(&mut first_ext, EXT_FIELD_HEADER_HASH, &header_hash);
    write_field(&mut first_ext, EXT_FIELD_RANDOM_DATA, &random_data);
    write_field(&mut first_ext, FIELD_END, &[]);

    let session_key = &database.session_key;
    let mut body = Vec::new();
    for (idx, group) in database.groups.iter().enumerate() {
        let ext_data = if idx == 0 { &first_ext[..] } else { &group.ext_data[..] };
        write_group(&mut body, group, ext_data);
    }
    for entry in database.entries.iter().chain(meta_entries.iter()) {
        if let Err(err) = write_entry(&mut body, entry, session_key) {
            body.zeroize();
            return Err(err);
        }
    }

    header.contents_hash = sha256(&body);

    let final_key = {
        let raw_key = database.master_key().ok_or(Error::InvalidKey)?;
        cryptoutil::final_key(raw_key, &header.master_seed, &header.transform_seed, header.key_enc_rounds)
    };
    let encrypted = final_key.and_then(|key| {
        get_cipher_engine(header.algorithm()?)
            .pad_encrypt(key.as_bytes(), &header.encryption_iv, &body)
            .map_err(Error::from)
    });
    body.zeroize();
    random_data.zeroize();
    let encrypted = encrypted?;

    let mut out = Vec::with_capacity(HEADER_SIZE + encrypted.len());
    out.extend_from_slice(&header.to_bytes());
    out.extend_from_slice(&encrypted);
    Ok(out)
}

fn write_group(out: &mut Vec<u8>, group: &PwGroup, ext_data: &[u8]) {
    if !ext_data.is_empty() {
        write_field(out, GROUP_FIELD_EXT_DATA, ext_data);
    }
    write_u32_field(out, GROUP_FIELD_ID, group.group_id);
    write_string_field(out, GROUP_FIELD_NAME, &group.name);
    write_field(out, GROUP_FIELD_CREATION, &group.creation.pack());
    write_field(out, GROUP_FIELD_LAST_MOD, &group.last_mod.pack());
    write_field(out, GROUP_FIELD_LAST_ACCESS, &group.last_access.pack());
    write_field(out, GROUP_FIELD_EXPIRE, &group.expire.pack());
    write_u32_field(out, GROUP_FIELD_IMAGE, group.image_id);
    write_u16_field(out, GROUP_FIELD_LEVEL, group.level);
    write_u32_field(out, GROUP_FIELD_FLAGS, group.flags);
    write_field(out, FIELD_END, &[]);
}

fn write_entry(out: &mut Vec<u8>, entry: &PwEntry, session_key: &SessionKey) -> Result<(), Error> {
    let mut password = entry.password.plaintext(session_key)
        .ok_or(Error::InvalidParam("entry password is locked by another database"))?;

    if !entry.ext_data.is_empty() {
        write_field(out, ENTRY_FIELD_EXT_DATA, &entry.ext_data);
    }
    write_field(out, ENTRY_FIELD_UUID, entry.uuid.as_bytes());
    write_u32_field(out, ENTRY_FIELD_GROUP_ID, entry.group_id);
    write_u32_field(out, ENTRY_FIELD_IMAGE, entry.image_id);
    write_string_field(out, ENTRY_FIELD_TITLE, &entry.title);
    write_string_field(out, ENTRY_FIELD_URL, &entry.url);
    write_string_field(out, ENTRY_FIELD_USERNAME, &entry.username);

    password.push(0);
    write_field(out, ENTRY_FIELD_PASSWORD, &password);
    drop(password);

    write_string_field(out, ENTRY_FIELD_NOTES, &entry.notes);
    write_field(out, ENTRY_FIELD_CREATION, &entry.creation.pack());
    write_field(out, ENTRY_FIELD_LAST_MOD, &entry.last_mod.pack());
    write_field(out, ENTRY_FIELD_LAST_ACCESS, &entry.last_access.pack());
    write_field(out, ENTRY_FIELD_EXPIRE, &entry.expire.pack());
    write_string_field(out, ENTRY_FIELD_BINARY_DESC, &entry.binary_desc);
    write_field(out, ENTRY_FIELD_BINARY_DATA, entry.binary_data.as_deref().unwrap_or(&[]));
    write_field(out, FIELD_END, &[]);
    Ok(())
}
