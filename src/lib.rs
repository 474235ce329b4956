//! Reader and writer for KeePass 1.x (`.kdb`) password databases, together
//! with the in-memory group/entry store they are loaded into.
//!
//! ```no_run
//! use keepass1::database::{PwDatabase, PwEntry, PwGroup};
//!
//! # fn main() -> Result<(), keepass1::error::Error> {
//! let mut db = PwDatabase::new();
//! db.set_master_key(Some("correct horse"), None)?;
//! let group = db.add_group(&PwGroup::new("Internet"))?;
//! let mut entry = PwEntry::new(group, "Mail");
//! entry.set_password("hunter2");
//! db.add_entry(&entry)?;
//! db.save_database("passwords.kdb")?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod constants;
pub mod time;
pub mod crypto;
pub mod context;
pub mod cryptoutil;
pub mod security;
pub mod database;
pub mod kdb;
pub mod memutil;
mod ioutil;
mod strutil;

pub use crate::database::{PwDatabase, PwEntry, PwGroup, PwUUID};
pub use crate::error::Error;
pub use crate::kdb::{LoadMode, RepairInfo};
