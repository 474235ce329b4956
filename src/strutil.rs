/// Decodes a NUL terminated string field. Everything from the first NUL on is
/// ignored and invalid UTF-8 is replaced.
pub fn decode_cstring(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).into_owned()
}

/// Encodes a string field: the UTF-8 bytes followed by a NUL.
///
/// The format has no length-safe string type, so text after an embedded NUL
/// is lost once the field is read back.
pub fn encode_cstring(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 1);
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    out
}

/// Case-insensitive substring test. Uses full Unicode lowercasing.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Orders two strings the way group and entry lists are sorted.
pub fn compare_ignore_case(a: &str, b: &str) -> std::cmp::Ordering {
    a.to_lowercase().cmp(&b.to_lowercase())
}
