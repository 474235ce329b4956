//! Operations on the group tree and on the order of entries.
//!
//! Groups live in one list in pre-order; a group's subtree is the run of
//! following groups with a deeper level. Moving a group always moves its
//! whole subtree.

use std::cmp::Ordering;
use crate::error::Error;
use crate::strutil::compare_ignore_case;
use super::{PwDatabase, PwEntry, PwGroup};

/// Key for `sort_group_entries`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SortField {
    Title,
    Username,
    Url,
    Notes,
    Creation,
    LastMod,
    LastAccess,
    Expire,
    Uuid,
    Attachment,
}

fn compare_entries(a: &PwEntry, b: &PwEntry, field: SortField) -> Ordering {
    match field {
        SortField::Title => compare_ignore_case(&a.title, &b.title),
        SortField::Username => compare_ignore_case(&a.username, &b.username),
        SortField::Url => compare_ignore_case(&a.url, &b.url),
        SortField::Notes => compare_ignore_case(&a.notes, &b.notes),
        SortField::Creation => a.creation.cmp(&b.creation),
        SortField::LastMod => a.last_mod.cmp(&b.last_mod),
        SortField::LastAccess => a.last_access.cmp(&b.last_access),
        SortField::Expire => a.expire.cmp(&b.expire),
        SortField::Uuid => a.uuid.cmp(&b.uuid),
        SortField::Attachment => compare_ignore_case(&a.binary_desc, &b.binary_desc),
    }
}

/// Sorts a run of sibling subtrees by name, then each subtree's children.
fn sort_forest(groups: Vec<PwGroup>) -> Vec<PwGroup> {
    let base = match groups.first() {
        Some(group) => group.level,
        None => return groups,
    };

    let mut blocks: Vec<Vec<PwGroup>> = Vec::new();
    for group in groups {
        match blocks.last_mut() {
            Some(block) if group.level > base => block.push(group),
            _ => blocks.push(vec![group]),
        }
    }

    blocks.sort_by(|a, b| compare_ignore_case(&a[0].name, &b[0].name));
    blocks.into_iter()
        .flat_map(|mut block| {
            let children = block.split_off(1);
            block.extend(sort_forest(children));
            block
        })
        .collect()
}

impl PwDatabase {
    /// Index of the parent group, `None` for top level groups.
    pub fn parent_group_index(&self, index: usize) -> Option<usize> {
        let level = self.groups.get(index)?.level;
        if level == 0 {
            return None;
        }
        self.groups[..index].iter().rposition(|g| g.level == level - 1)
    }

    /// One past the last group of the subtree rooted at `index`.
    pub fn subtree_end(&self, index: usize) -> usize {
        let level = match self.groups.get(index) {
            Some(group) => group.level,
            None => return index,
        };
        self.groups[index + 1..].iter()
            .position(|g| g.level <= level)
            .map_or(self.groups.len(), |p| index + 1 + p)
    }

    /// Adds a group as the last child of `parent_id`, or as the last top
    /// level group. The template's level is ignored.
    pub fn add_group_under(&mut self, parent_id: Option<u32>, template: &PwGroup) -> Result<u32, Error> {
        let (position, level) = match parent_id {
            None => (self.groups.len(), 0),
            Some(parent_id) => {
                let parent = self.get_group_index(parent_id).ok_or(Error::InvalidParam("unknown parent group"))?;
                let level = self.groups[parent].level.checked_add(1).ok_or(Error::InvalidParam("group tree is too deep"))?;
                (self.subtree_end(parent), level)
            }
        };

        let mut group = template.clone();
        group.level = level;
        self.assign_group_id(&mut group)?;
        let group_id = group.group_id;
        self.groups.insert(position, group);
        Ok(group_id)
    }

    fn group_index_or_err(&self, group_id: u32) -> Result<usize, Error> {
        self.get_group_index(group_id).ok_or(Error::InvalidParam("unknown group id"))
    }

    fn previous_sibling(&self, index: usize) -> Option<usize> {
        let level = self.groups[index].level;
        for idx in (0..index).rev() {
            match self.groups[idx].level.cmp(&level) {
                Ordering::Equal => return Some(idx),
                Ordering::Less => return None,
                Ordering::Greater => {}
            }
        }
        None
    }

    fn next_sibling(&self, index: usize) -> Option<usize> {
        let level = self.groups[index].level;
        let end = self.subtree_end(index);
        self.groups.get(end).filter(|g| g.level == level).map(|_| end)
    }

    /// Moves a group with its subtree past `offset` siblings (negative moves
    /// up). Returns false if it could not move at all.
    pub fn move_group_ex(&mut self, group_id: u32, offset: i32) -> Result<bool, Error> {
        let mut index = self.group_index_or_err(group_id)?;
        let mut moved = false;

        for _ in 0..offset.unsigned_abs() {
            let end = self.subtree_end(index);
            if offset < 0 {
                let prev = match self.previous_sibling(index) {
                    Some(prev) => prev,
                    None => break,
                };
                self.groups[prev..end].rotate_left(index - prev);
                index = prev;
            } else {
                let next = match self.next_sibling(index) {
                    Some(next) => next,
                    None => break,
                };
                let next_end = self.subtree_end(next);
                self.groups[index..next_end].rotate_left(end - index);
                index += next_end - end;
            }
            moved = true;
        }

        Ok(moved)
    }

    /// Makes a group the last child of its previous sibling.
    pub fn indent_group(&mut self, group_id: u32) -> Result<(), Error> {
        let index = self.group_index_or_err(group_id)?;
        if self.previous_sibling(index).is_none() {
            return Err(Error::InvalidParam("group has no previous sibling"));
        }
        let end = self.subtree_end(index);
        if self.groups[index..end].iter().any(|g| g.level == u16::max_value()) {
            return Err(Error::InvalidParam("group tree is too deep"));
        }
        for group in &mut self.groups[index..end] {
            group.level += 1;
        }
        Ok(())
    }

    /// Makes a group the next sibling of its parent. Following siblings stay
    /// with the parent.
    pub fn outdent_group(&mut self, group_id: u32) -> Result<(), Error> {
        let index = self.group_index_or_err(group_id)?;
        let parent = self.parent_group_index(index).ok_or(Error::InvalidParam("group is at the top level"))?;
        let end = self.subtree_end(index);
        let parent_end = self.subtree_end(parent);
        let len = end - index;

        self.groups[index..parent_end].rotate_left(len);
        for group in &mut self.groups[parent_end - len..parent_end] {
            group.level -= 1;
        }
        Ok(())
    }

    /// Sorts all groups by name, case-insensitively, within their parent.
    pub fn sort_group_list(&mut self) {
        let groups = std::mem::replace(&mut self.groups, Vec::new());
        self.groups = sort_forest(groups);
    }

    /// Moves the entry at position `from` within a group to position `to`,
    /// counting only that group's entries. Other groups' entries keep their
    /// places in the list.
    pub fn move_entry(&mut self, group_id: u32, from: usize, to: usize) -> Result<(), Error> {
        let slots: Vec<usize> = self.entries.iter().enumerate()
            .filter(|(_, e)| e.group_id == group_id)
            .map(|(idx, _)| idx)
            .collect();
        if from >= slots.len() || to >= slots.len() {
            return Err(Error::InvalidParam("entry position out of range"));
        }

        if from < to {
            for k in from..to {
                self.entries.swap(slots[k], slots[k + 1]);
            }
        } else {
            for k in (to..from).rev() {
                self.entries.swap(slots[k], slots[k + 1]);
            }
        }
        Ok(())
    }

    /// Stable sort of one group's entries. They stay in the list slots the
    /// group already occupies.
    pub fn sort_group_entries(&mut self, group_id: u32, field: SortField) {
        let slots: Vec<usize> = self.entries.iter().enumerate()
            .filter(|(_, e)| e.group_id == group_id)
            .map(|(idx, _)| idx)
            .collect();

        let mut order = slots.clone();
        order.sort_by(|&a, &b| compare_entries(&self.entries[a], &self.entries[b], field));

        let mut source: Vec<usize> = (0..self.entries.len()).collect();
        for (&slot, &from) in slots.iter().zip(order.iter()) {
            source[slot] = from;
        }

        let mut taken: Vec<Option<PwEntry>> = std::mem::replace(&mut self.entries, Vec::new())
            .into_iter()
            .map(Some)
            .collect();
        self.entries = source.into_iter().filter_map(|from| taken[from].take()).collect();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // A(0) A1(1) A2(1) B(0) B1(1) C(0)
    fn tree() -> (PwDatabase, Vec<u32>) {
        let mut db = PwDatabase::new();
        let mut ids = Vec::new();
        for (name, level) in &[("A", 0), ("A1", 1), ("A2", 1), ("B", 0), ("B1", 1), ("C", 0)] {
            ids.push(db.add_group(&PwGroup::new(*name).with_level(*level)).expect("group"));
        }
        (db, ids)
    }

    fn layout(db: &PwDatabase) -> Vec<(String, u16)> {
        db.groups().iter().map(|g| (g.name.clone(), g.level)).collect()
    }

    fn expect(items: &[(&str, u16)]) -> Vec<(String, u16)> {
        items.iter().map(|(n, l)| (n.to_string(), *l)).collect()
    }

    #[test]
    fn parents_and_subtrees() {
        let (db, _) = tree();
        assert_eq!(db.parent_group_index(0), None);
        assert_eq!(db.parent_group_index(2), Some(0));
        assert_eq!(db.parent_group_index(4), Some(3));
        assert_eq!(db.subtree_end(0), 3);
        assert_eq!(db.subtree_end(1), 2);
        assert_eq!(db.subtree_end(5), 6);
    }

    #[test]
    fn add_under_parent() {
        let (mut db, ids) = tree();
        db.add_group_under(Some(ids[0]), &PwGroup::new("A3").with_level(7)).expect("add");
        assert_eq!(db.get_group(3).map(|g| (g.name.as_str(), g.level)), Some(("A3", 1)));
        assert!(db.add_group_under(Some(12345), &PwGroup::new("X")).is_err());
    }

    #[test]
    fn move_groups_with_subtrees() {
        let (mut db, ids) = tree();
        assert!(db.move_group_ex(ids[3], -1).expect("move"));
        assert_eq!(layout(&db), expect(&[("B", 0), ("B1", 1), ("A", 0), ("A1", 1), ("A2", 1), ("C", 0)]));

        assert!(db.move_group_ex(ids[3], 2).expect("move"));
        assert_eq!(layout(&db), expect(&[("A", 0), ("A1", 1), ("A2", 1), ("C", 0), ("B", 0), ("B1", 1)]));

        assert!(!db.move_group_ex(ids[3], 1).expect("move"));
        assert!(!db.move_group_ex(ids[1], -1).expect("move"));
        assert!(db.move_group_ex(ids[1], 1).expect("move"));
        assert_eq!(db.get_group(1).map(|g| g.name.as_str()), Some("A2"));
    }

    #[test]
    fn indent_and_outdent() {
        let (mut db, ids) = tree();
        assert!(db.indent_group(ids[0]).is_err());

        db.indent_group(ids[3]).expect("indent");
        assert_eq!(layout(&db), expect(&[("A", 0), ("A1", 1), ("A2", 1), ("B", 1), ("B1", 2), ("C", 0)]));

        db.outdent_group(ids[1]).expect("outdent");
        assert_eq!(layout(&db), expect(&[("A", 0), ("A2", 1), ("B", 1), ("B1", 2), ("A1", 0), ("C", 0)]));

        assert!(db.outdent_group(ids[5]).is_err());
    }

    #[test]
    fn sort_groups_recursively() {
        let mut db = PwDatabase::new();
        for (name, level) in &[("zeta", 0), ("Beta", 1), ("alpha", 1), ("Alpha", 0), ("y", 1), ("x", 2)] {
            db.add_group(&PwGroup::new(*name).with_level(*level)).expect("group");
        }
        db.sort_group_list();
        assert_eq!(layout(&db), expect(&[("Alpha", 0), ("y", 1), ("x", 2), ("zeta", 0), ("alpha", 1), ("Beta", 1)]));
    }

    #[test]
    fn reorder_entries_within_group() {
        let (mut db, ids) = tree();
        for (group, title) in &[(0, "c"), (3, "other"), (0, "a"), (0, "b")] {
            db.add_entry(&PwEntry::new(ids[*group], *title)).expect("entry");
        }
        let titles = |db: &PwDatabase| db.entries().iter().map(|e| e.title.clone()).collect::<Vec<_>>();

        db.sort_group_entries(ids[0], SortField::Title);
        assert_eq!(titles(&db), vec!["a", "other", "b", "c"]);

        db.move_entry(ids[0], 2, 0).expect("move");
        assert_eq!(titles(&db), vec!["c", "other", "a", "b"]);

        db.move_entry(ids[0], 0, 1).expect("move");
        assert_eq!(titles(&db), vec!["a", "other", "c", "b"]);
        assert!(db.move_entry(ids[0], 0, 3).is_err());
    }
}
