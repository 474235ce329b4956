use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

/// Reads little-endian values from a byte slice without ever going past its end.
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> SliceReader<'a> {
        SliceReader { data, pos: 0 }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the next `len` bytes, or `None` (without advancing) if fewer remain.
    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if len > self.remaining() {
            return None;
        }
        let bytes = &self.data[self.pos..(self.pos + len)];
        self.pos += len;
        Some(bytes)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        self.read_bytes(1).map(|b| b[0])
    }

    pub fn read_u16(&mut self) -> Option<u16> {
        self.read_bytes(2).map(LittleEndian::read_u16)
    }

    pub fn read_u32(&mut self) -> Option<u32> {
        self.read_bytes(4).map(LittleEndian::read_u32)
    }

    pub fn read_array_16(&mut self) -> Option<[u8; 16]> {
        let mut out = [0u8; 16];
        out.copy_from_slice(self.read_bytes(16)?);
        Some(out)
    }
}

/// One `{type: u16, length: u32, data}` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field<'a> {
    pub field_type: u16,
    pub data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    /// Reads a type-length-value field. `None` if the header or the declared
    /// data runs past the end of the buffer; the reader is left where the
    /// field started in that case.
    pub fn read_field(&mut self) -> Option<Field<'a>> {
        let start = self.pos;
        let field = (|| {
            let field_type = self.read_u16()?;
            let len = self.read_u32()? as usize;
            let data = self.read_bytes(len)?;
            Some(Field { field_type, data })
        })();
        if field.is_none() {
            self.pos = start;
        }
        field
    }
}

/// Appends a type-length-value field.
pub fn write_field(out: &mut Vec<u8>, field_type: u16, data: &[u8]) {
    // Writes into a Vec cannot fail.
    let _ = out.write_u16::<LittleEndian>(field_type);
    let _ = out.write_u32::<LittleEndian>(data.len() as u32);
    out.extend_from_slice(data);
}

pub fn write_u16_field(out: &mut Vec<u8>, field_type: u16, value: u16) {
    let mut buf = [0u8; 2];
    LittleEndian::write_u16(&mut buf, value);
    write_field(out, field_type, &buf);
}

pub fn write_u32_field(out: &mut Vec<u8>, field_type: u16, value: u32) {
    let mut buf = [0u8; 4];
    LittleEndian::write_u32(&mut buf, value);
    write_field(out, field_type, &buf);
}

/// Writes a NUL terminated UTF-8 string field.
pub fn write_string_field(out: &mut Vec<u8>, field_type: u16, value: &str) {
    write_field(out, field_type, &crate::strutil::encode_cstring(value));
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_round_trip() {
        let mut out = Vec::new();
        write_u32_field(&mut out, 0x0001, 0xDEADBEEF);
        write_string_field(&mut out, 0x0002, "abc");
        write_field(&mut out, 0xFFFF, &[]);
        assert_eq!(&out[..10], &[0x01, 0x00, 0x04, 0x00, 0x00, 0x00, 0xEF, 0xBE, 0xAD, 0xDE]);

        let mut reader = SliceReader::new(&out);
        let f = reader.read_field().expect("first");
        assert_eq!((f.field_type, f.data), (0x0001, &[0xEF, 0xBE, 0xAD, 0xDE][..]));
        let f = reader.read_field().expect("second");
        assert_eq!((f.field_type, f.data), (0x0002, &b"abc\0"[..]));
        let f = reader.read_field().expect("end");
        assert_eq!(f.field_type, 0xFFFF);
        assert!(f.data.is_empty());
        assert!(reader.is_empty());
    }

    #[test]
    fn truncated_field_does_not_advance() {
        let mut out = Vec::new();
        write_field(&mut out, 0x0004, b"hello world");
        out.truncate(out.len() - 3);

        let mut reader = SliceReader::new(&out);
        assert!(reader.read_field().is_none());
        assert_eq!(reader.remaining(), out.len());

        let mut reader = SliceReader::new(&out[..3]);
        assert!(reader.read_field().is_none());
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn huge_declared_length_is_rejected() {
        let data = [0x01, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0x00];
        let mut reader = SliceReader::new(&data);
        assert!(reader.read_field().is_none());
    }
}
