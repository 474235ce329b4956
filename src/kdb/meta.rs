use byteorder::{ByteOrder, LittleEndian};
use crate::database::{PwEntry, PwUUID};
use crate::ioutil::SliceReader;
use crate::strutil::{decode_cstring, encode_cstring};
use crate::time::PwTime;

// Marker values of a meta-stream entry.
pub const META_STREAM_TITLE: &str = "Meta-Info";
pub const META_STREAM_USERNAME: &str = "SYSTEM";
pub const META_STREAM_URL: &str = "$";
pub const META_STREAM_BINARY_DESC: &str = "bin-stream";

// Stream names (the entry's notes).
pub const STREAM_SIMPLE_UI_STATE: &str = "Simple UI State";
pub const STREAM_DEFAULT_USER_NAME: &str = "Default User Name";
pub const STREAM_SEARCH_HISTORY_ITEM: &str = "Search History Item";
pub const STREAM_CUSTOM_KVP: &str = "Custom KVP";
pub const STREAM_DATABASE_COLOR: &str = "Database Color";
pub const STREAM_GROUP_TREE_STATE: &str = "KPX_GROUP_TREE_STATE";

const UI_STATE_SIZE: usize = 40;

/// A meta-stream as stored in the file: its name and raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetaStream {
    pub name: String,
    pub data: Vec<u8>,
}

/// Front end state restored when the database is opened.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UiState {
    pub last_selected_group: u32,
    pub last_top_visible_group: u32,
    pub last_selected_entry: PwUUID,
    pub last_top_visible_entry: PwUUID,
}

impl UiState {
    fn parse(data: &[u8]) -> Option<UiState> {
        if data.len() != UI_STATE_SIZE {
            return None;
        }
        let mut reader = SliceReader::new(data);
        Some(UiState {
            last_selected_group: reader.read_u32()?,
            last_top_visible_group: reader.read_u32()?,
            last_selected_entry: PwUUID::wrap(reader.read_array_16()?),
            last_top_visible_entry: PwUUID::wrap(reader.read_array_16()?),
        })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; UI_STATE_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.last_selected_group);
        LittleEndian::write_u32(&mut out[4..8], self.last_top_visible_group);
        out[8..24].copy_from_slice(self.last_selected_entry.as_bytes());
        out[24..40].copy_from_slice(self.last_top_visible_entry.as_bytes());
        out
    }
}

/// Database level data that KeePass 1.x keeps in meta-stream entries.
///
/// Streams with a name this crate does not know, or with a payload that does
/// not parse, end up in `unknown_streams` and are written back unchanged.
/// Unknown streams with an empty name or payload are not written.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    pub ui_state: Option<UiState>,
    pub default_user_name: Option<String>,
    pub search_history: Vec<String>,
    pub custom_kvps: Vec<(String, String)>,
    pub database_color: Option<u32>,
    /// `(group id, expanded)` pairs.
    pub group_tree_state: Vec<(u32, bool)>,
    pub unknown_streams: Vec<MetaStream>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        *self == Metadata::default()
    }

    pub fn custom_kvp(&self, key: &str) -> Option<&str> {
        self.custom_kvps.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Adds or replaces a custom key/value pair.
    pub fn set_custom_kvp<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
        let key = key.into();
        let value = value.into();
        match self.custom_kvps.iter_mut().find(|(k, _)| *k == key) {
            Some(pair) => pair.1 = value,
            None => self.custom_kvps.push((key, value)),
        }
    }

    /// Takes in one stream read from a file. Returns false if the stream was
    /// kept as unknown.
    pub fn absorb(&mut self, stream: MetaStream) -> bool {
        if self.parse_known(&stream) {
            return true;
        }
        tracing::warn!(name = %stream.name, size = stream.data.len(), "keeping unknown meta-stream");
        self.unknown_streams.push(stream);
        false
    }

    fn parse_known(&mut self, stream: &MetaStream) -> bool {
        let data = &stream.data[..];
        match stream.name.as_str() {
            STREAM_SIMPLE_UI_STATE => match UiState::parse(data) {
                Some(state) => {
                    self.ui_state = Some(state);
                    true
                }
                None => false,
            },
            STREAM_DEFAULT_USER_NAME => {
                self.default_user_name = Some(decode_cstring(data));
                true
            }
            STREAM_SEARCH_HISTORY_ITEM => {
                self.search_history.push(decode_cstring(data));
                true
            }
            STREAM_CUSTOM_KVP => match parse_kvp(data) {
                Some(pair) => {
                    self.custom_kvps.push(pair);
                    true
                }
                None => false,
            },
            STREAM_DATABASE_COLOR if data.len() == 4 => {
                self.database_color = Some(LittleEndian::read_u32(data));
                true
            }
            STREAM_GROUP_TREE_STATE => match parse_tree_state(data) {
                Some(state) => {
                    self.group_tree_state = state;
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Serializes everything into streams, known ones first.
    pub fn to_streams(&self) -> Vec<MetaStream> {
        let mut streams = Vec::new();
        let mut push = |name: &str, data: Vec<u8>| streams.push(MetaStream { name: name.to_string(), data });

        if let Some(ref state) = self.ui_state {
            push(STREAM_SIMPLE_UI_STATE, state.to_bytes());
        }
        if let Some(ref name) = self.default_user_name {
            push(STREAM_DEFAULT_USER_NAME, encode_cstring(name));
        }
        for item in &self.search_history {
            push(STREAM_SEARCH_HISTORY_ITEM, encode_cstring(item));
        }
        for (key, value) in &self.custom_kvps {
            push(STREAM_CUSTOM_KVP, kvp_to_bytes(key, value));
        }
        if let Some(color) = self.database_color {
            let mut buf = vec![0u8; 4];
            LittleEndian::write_u32(&mut buf, color);
            push(STREAM_DATABASE_COLOR, buf);
        }
        if !self.group_tree_state.is_empty() {
            push(STREAM_GROUP_TREE_STATE, tree_state_to_bytes(&self.group_tree_state));
        }

        for stream in &self.unknown_streams {
            // Neither would be recognized as a meta-stream on the next load.
            if stream.name.is_empty() || stream.data.is_empty() {
                tracing::warn!(name = %stream.name, "dropping meta-stream without name or payload");
                continue;
            }
            streams.push(stream.clone());
        }
        streams
    }
}

fn parse_kvp(data: &[u8]) -> Option<(String, String)> {
    let mut reader = SliceReader::new(data);
    let key_len = reader.read_u32()? as usize;
    let key = reader.read_bytes(key_len)?;
    let value_len = reader.read_u32()? as usize;
    let value = reader.read_bytes(value_len)?;
    if !reader.is_empty() {
        return None;
    }
    let key = String::from_utf8(key.to_vec()).ok()?;
    let value = String::from_utf8(value.to_vec()).ok()?;
    Some((key, value))
}

fn kvp_to_bytes(key: &str, value: &str) -> Vec<u8> {
    let mut out = vec![0u8; 8 + key.len() + value.len()];
    LittleEndian::write_u32(&mut out[0..4], key.len() as u32);
    out[4..4 + key.len()].copy_from_slice(key.as_bytes());
    let value_start = 8 + key.len();
    LittleEndian::write_u32(&mut out[4 + key.len()..value_start], value.len() as u32);
    out[value_start..].copy_from_slice(value.as_bytes());
    out
}

fn parse_tree_state(data: &[u8]) -> Option<Vec<(u32, bool)>> {
    let mut reader = SliceReader::new(data);
    let count = reader.read_u32()? as usize;
    if reader.remaining() != count.checked_mul(5)? {
        return None;
    }
    let mut state = Vec::with_capacity(count);
    for _ in 0..count {
        let group_id = reader.read_u32()?;
        let expanded = reader.read_u8()? != 0;
        state.push((group_id, expanded));
    }
    Some(state)
}

fn tree_state_to_bytes(state: &[(u32, bool)]) -> Vec<u8> {
    let mut out = vec![0u8; 4 + state.len() * 5];
    LittleEndian::write_u32(&mut out[0..4], state.len() as u32);
    for (idx, &(group_id, expanded)) in state.iter().enumerate() {
        let at = 4 + idx * 5;
        LittleEndian::write_u32(&mut out[at..at + 4], group_id);
        out[at + 4] = expanded as u8;
    }
    out
}

/// True if the entry carries a meta-stream rather than a password.
pub fn is_meta_stream(entry: &PwEntry) -> bool {
    entry.binary_data.is_some()
        && !entry.notes.is_empty()
        && entry.binary_desc == META_STREAM_BINARY_DESC
        && entry.title == META_STREAM_TITLE
        && entry.username == META_STREAM_USERNAME
        && entry.url == META_STREAM_URL
        && entry.image_id == 0
}

pub fn stream_from_entry(entry: &PwEntry) -> MetaStream {
    MetaStream {
        name: entry.notes.clone(),
        data: entry.binary_data.clone().unwrap_or_default(),
    }
}

/// Builds the entry a stream is saved as.
pub fn meta_stream_entry(stream: &MetaStream, group_id: u32, uuid: PwUUID) -> PwEntry {
    let mut entry = PwEntry::new(group_id, META_STREAM_TITLE);
    entry.uuid = uuid;
    entry.username = META_STREAM_USERNAME.to_string();
    entry.url = META_STREAM_URL.to_string();
    entry.notes = stream.name.clone();
    entry.binary_desc = META_STREAM_BINARY_DESC.to_string();
    entry.binary_data = Some(stream.data.clone());
    entry.expire = PwTime::NEVER_EXPIRE;
    entry
}
