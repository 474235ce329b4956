use std::collections::HashMap;
use crate::error::Error;
use crate::security::ProtectedPassword;
use super::{PwDatabase, PwGroup};

/// How `merge_in` resolves groups and entries that exist on both sides.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MergeMode {
    /// Everything from the other database is added under fresh ids and
    /// UUIDs. Nothing is overwritten.
    CreateNewUuids,
    /// Matching groups (by id) and entries (by UUID) are replaced.
    OverwriteExisting,
    /// Matching items are replaced only if the other side was modified later.
    OverwriteIfNewer,
}

impl PwDatabase {
    /// Merges the groups and entries of `other` into this database. New
    /// groups keep their place in the tree under their (merged) parent.
    pub fn merge_in(&mut self, other: &PwDatabase, mode: MergeMode) -> Result<(), Error> {
        // other's group id -> our group id
        let mut group_map: HashMap<u32, u32> = HashMap::with_capacity(other.groups.len());

        for (idx, group) in other.groups.iter().enumerate() {
            let existing = match mode {
                MergeMode::CreateNewUuids => None,
                _ => self.get_group_index(group.group_id),
            };

            let our_id = match existing {
                Some(ours) => {
                    if mode == MergeMode::OverwriteExisting || group.last_mod > self.groups[ours].last_mod {
                        self.set_group(ours, group)?;
                    }
                    group.group_id
                }
                None => {
                    let parent = other.parent_group_index(idx)
                        .and_then(|p| group_map.get(&other.groups[p].group_id).copied());
                    let mut template: PwGroup = group.clone();
                    if mode == MergeMode::CreateNewUuids {
                        template.group_id = 0;
                    }
                    self.add_group_under(parent, &template)?
                }
            };
            group_map.insert(group.group_id, our_id);
        }

        let mut added = 0usize;
        let mut replaced = 0usize;
        for entry in &other.entries {
            let group_id = match group_map.get(&entry.group_id) {
                Some(&id) => id,
                None => {
                    tracing::warn!(uuid = %entry.uuid, "skipping entry without a group");
                    continue;
                }
            };

            let mut copy = entry.clone();
            copy.group_id = group_id;
            let plaintext = entry.password.plaintext(&other.session_key)
                .ok_or(Error::InvalidParam("entry password is locked by another database"))?;
            copy.password = ProtectedPassword::locked_with(&plaintext, &self.session_key);

            let existing = match mode {
                MergeMode::CreateNewUuids => None,
                _ => self.get_entry_index(&entry.uuid),
            };

            match existing {
                Some(ours) => {
                    if mode == MergeMode::OverwriteExisting || entry.last_mod > self.entries[ours].last_mod {
                        self.entries[ours] = copy;
                        replaced += 1;
                    }
                }
                None => {
                    if mode == MergeMode::CreateNewUuids || copy.uuid.is_zero() {
                        copy.uuid = self.new_uuid();
                    }
                    self.entries.push(copy);
                    added += 1;
                }
            }
        }

        tracing::debug!(?mode, added, replaced, "merged database");
        Ok(())
    }
}
