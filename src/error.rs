use crate::crypto::CryptoError;

/// Everything that can go wrong while opening, saving or editing a database.
///
/// The variants mirror the result codes a front end has to branch on. Use
/// [`Error::category`] to pick the message shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A caller supplied an argument that cannot be used (empty password, bad group level, ...).
    #[error("Invalid Parameter `{0}`")]
    InvalidParam(&'static str),

    /// Wrong master key, or a content hash mismatch that cannot be told apart from one.
    #[error("Invalid Key")]
    InvalidKey,

    /// The database file could not be opened for reading.
    #[error("Cannot Open File For Reading `{0}`")]
    NoFileAccessRead(#[source] std::io::Error),

    /// The destination could not be opened or created for writing.
    #[error("Cannot Open File For Writing `{0}`")]
    NoFileAccessWrite(#[source] std::io::Error),

    /// Reading from an opened file failed.
    #[error("Read Error `{0}`")]
    FileErrorRead(#[source] std::io::Error),

    /// Writing, flushing or replacing the file failed.
    #[error("Write Error `{0}`")]
    FileErrorWrite(#[source] std::io::Error),

    /// The decrypted content does not follow the record layout.
    #[error("Invalid File Structure `{0}`")]
    InvalidFileStructure(&'static str),

    /// The first two words of the file are not a KeePass signature.
    #[error("Invalid Signature `signature 0x{0:08X}, 0x{1:08X}`")]
    InvalidFileSignature(u32, u32),

    /// The signature matched but the rest of the header is unusable.
    #[error("Invalid File Header `{0}`")]
    InvalidFileHeader(&'static str),

    /// The cipher engine refused the key, IV or data.
    #[error("Crypto Error `{0}`")]
    Crypt(#[from] CryptoError),

    /// The file is a KDBX database, which this codec does not read.
    #[error("Unsupported Format `KeePass 2.x`")]
    UnsupportedKdbx,

    /// A database without any group cannot be saved.
    #[error("Database Is Empty")]
    DbEmpty,
}

/// Coarse grouping of errors by the guidance a user needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Re-enter the password or pick the right key file.
    WrongKey,
    /// The file is damaged or not a database; repair may help.
    Corrupted,
    /// The file needs a different application version.
    Unsupported,
    /// Permissions or a missing file.
    Permission,
    /// Any other IO failure.
    Io,
    /// The caller passed something that makes no sense.
    InvalidInput,
    /// Nothing to save.
    Empty,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidKey => ErrorCategory::WrongKey,
            Error::InvalidFileStructure(_) |
            Error::InvalidFileSignature(..) |
            Error::InvalidFileHeader(_) |
            Error::Crypt(_) => ErrorCategory::Corrupted,
            Error::UnsupportedKdbx => ErrorCategory::Unsupported,
            Error::NoFileAccessRead(_) |
            Error::NoFileAccessWrite(_) => ErrorCategory::Permission,
            Error::FileErrorRead(_) |
            Error::FileErrorWrite(_) => ErrorCategory::Io,
            Error::InvalidParam(_) => ErrorCategory::InvalidInput,
            Error::DbEmpty => ErrorCategory::Empty,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn signature_display_is_hex() {
        let err = Error::InvalidFileSignature(0x1234, 0xABCD);
        assert_eq!(err.to_string(), "Invalid Signature `signature 0x00001234, 0x0000ABCD`");
    }

    #[test]
    fn categories_separate_key_from_format_problems() {
        assert_eq!(Error::InvalidKey.category(), ErrorCategory::WrongKey);
        assert_eq!(Error::UnsupportedKdbx.category(), ErrorCategory::Unsupported);
        assert_eq!(Error::InvalidFileSignature(0, 0).category(), ErrorCategory::Corrupted);
        assert_eq!(Error::DbEmpty.category(), ErrorCategory::Empty);

        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(Error::NoFileAccessRead(denied).category(), ErrorCategory::Permission);
    }
}
