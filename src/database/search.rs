use regex::{Regex, RegexBuilder};
use zeroize::Zeroizing;
use crate::error::Error;
use crate::strutil;
use crate::time::PwTime;
use super::{PwDatabase, PwEntry};

bitflags::bitflags! {
    /// Entry fields a search looks at.
    pub struct SearchFlags: u32 {
        const TITLE = 1;
        const USERNAME = 2;
        const URL = 4;
        const PASSWORD = 8;
        const NOTES = 16;
        const UUID = 32;
        const GROUP_NAME = 64;
        const ATTACHMENT = 128;
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    pub fields: SearchFlags,
    pub case_sensitive: bool,
    /// Treat the search text as a regular expression.
    pub regex: bool,
    /// Skip matches in the backup and search results groups.
    pub exclude_backups: bool,
    pub exclude_expired: bool,
}

impl Default for SearchOptions {
    fn default() -> SearchOptions {
        SearchOptions {
            fields: SearchFlags::TITLE | SearchFlags::USERNAME | SearchFlags::URL | SearchFlags::NOTES,
            case_sensitive: false,
            regex: false,
            exclude_backups: false,
            exclude_expired: false,
        }
    }
}

enum Matcher<'t> {
    Plain { needle: &'t str, case_sensitive: bool },
    Regex(Regex),
}

impl<'t> Matcher<'t> {
    fn new(text: &'t str, options: &SearchOptions) -> Result<Matcher<'t>, Error> {
        if options.regex {
            let regex = RegexBuilder::new(text)
                .case_insensitive(!options.case_sensitive)
                .build()
                .map_err(|_| Error::InvalidParam("invalid regular expression"))?;
            Ok(Matcher::Regex(regex))
        } else {
            Ok(Matcher::Plain { needle: text, case_sensitive: options.case_sensitive })
        }
    }

    fn is_match(&self, haystack: &str) -> bool {
        match self {
            Matcher::Plain { needle, case_sensitive: true } => haystack.contains(needle),
            Matcher::Plain { needle, case_sensitive: false } => strutil::contains_ignore_case(haystack, needle),
            Matcher::Regex(regex) => regex.is_match(haystack),
        }
    }
}

impl PwDatabase {
    /// Index of the first entry at or after `start` that matches `text`.
    pub fn find(&self, text: &str, options: &SearchOptions, start: usize) -> Result<Option<usize>, Error> {
        let matcher = Matcher::new(text, options)?;
        let now = PwTime::now();
        Ok((start..self.entries.len()).find(|&idx| self.search_hit(idx, &matcher, options, &now)))
    }

    /// Indices of all matching entries, in list order.
    pub fn find_all(&self, text: &str, options: &SearchOptions) -> Result<Vec<usize>, Error> {
        let matcher = Matcher::new(text, options)?;
        let now = PwTime::now();
        Ok((0..self.entries.len()).filter(|&idx| self.search_hit(idx, &matcher, options, &now)).collect())
    }

    // Exclusions are checked after the field match.
    fn search_hit(&self, idx: usize, matcher: &Matcher, options: &SearchOptions, now: &PwTime) -> bool {
        let entry = &self.entries[idx];
        if !self.entry_matches(entry, matcher, options.fields) {
            return false;
        }
        if options.exclude_backups && self.in_reserved_group(entry) {
            return false;
        }
        if options.exclude_expired && entry.is_expired(now) {
            return false;
        }
        true
    }

    fn entry_matches(&self, entry: &PwEntry, matcher: &Matcher, fields: SearchFlags) -> bool {
        let text_fields = [
            (SearchFlags::TITLE, &entry.title),
            (SearchFlags::USERNAME, &entry.username),
            (SearchFlags::URL, &entry.url),
            (SearchFlags::NOTES, &entry.notes),
            (SearchFlags::ATTACHMENT, &entry.binary_desc),
        ];
        for (flag, value) in text_fields.iter() {
            if fields.contains(*flag) && matcher.is_match(value) {
                return true;
            }
        }

        if fields.contains(SearchFlags::UUID) && matcher.is_match(&hex::encode(entry.uuid.as_bytes())) {
            return true;
        }

        if fields.contains(SearchFlags::GROUP_NAME) {
            if let Some(group) = self.get_group_by_id(entry.group_id) {
                if matcher.is_match(&group.name) {
                    return true;
                }
            }
        }

        if fields.contains(SearchFlags::PASSWORD) {
            if let Some(plaintext) = entry.password.plaintext(&self.session_key) {
                let password = Zeroizing::new(String::from_utf8_lossy(&plaintext).into_owned());
                if matcher.is_match(&password) {
                    return true;
                }
            }
        }

        false
    }

    fn in_reserved_group(&self, entry: &PwEntry) -> bool {
        self.get_group_by_id(entry.group_id)
            .map_or(false, |g| self.is_reserved_group_name(&g.name))
    }

    /// Entries whose expiry time has passed. "Never" sentinels never expire.
    pub fn find_expired(&self, now: &PwTime, exclude_backups: bool) -> Vec<usize> {
        self.entries.iter().enumerate()
            .filter(|(_, e)| e.is_expired(now))
            .filter(|(_, e)| !(exclude_backups && self.in_reserved_group(e)))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Entries that are not expired yet but will be within `days` days.
    pub fn find_expiring_soon(&self, now: &PwTime, days: u32, exclude_backups: bool) -> Vec<usize> {
        let horizon = match now.plus_days(days) {
            Some(horizon) => horizon,
            None => return Vec::new(),
        };
        self.entries.iter().enumerate()
            .filter(|(_, e)| !e.expire.is_effectively_never() && e.expire >= *now && e.expire <= horizon)
            .filter(|(_, e)| !(exclude_backups && self.in_reserved_group(e)))
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::database::PwGroup;

    fn sample() -> PwDatabase {
        let mut db = PwDatabase::new();
        let general = db.add_group(&PwGroup::new("General")).expect("group");
        let backup = db.add_group(&PwGroup::new("Backup")).expect("group");

        let mut gmail = PwEntry::new(general, "Gmail");
        gmail.username = "user@gmail.com".to_string();
        gmail.set_password("hunter2");
        db.add_entry(&gmail).expect("entry");

        let mut github = PwEntry::new(general, "GitHub");
        github.username = "developer".to_string();
        github.notes = "test account".to_string();
        db.add_entry(&github).expect("entry");

        let mut banking = PwEntry::new(general, "Banking");
        banking.notes = "Online banking".to_string();
        db.add_entry(&banking).expect("entry");

        let mut old = PwEntry::new(backup, "test backup");
        old.notes = "test".to_string();
        db.add_entry(&old).expect("entry");
        db
    }

    fn title_only(case_sensitive: bool) -> SearchOptions {
        SearchOptions { fields: SearchFlags::TITLE, case_sensitive, ..SearchOptions::default() }
    }

    #[test]
    fn title_search_case() {
        let db = sample();
        assert_eq!(db.find_all("gmail", &title_only(false)).expect("search"), vec![0]);
        assert_eq!(db.find_all("gmail", &title_only(true)).expect("search"), Vec::<usize>::new());
        assert_eq!(db.find("Gmail", &title_only(true), 0).expect("search"), Some(0));
        assert_eq!(db.find("Gmail", &title_only(true), 1).expect("search"), None);
    }

    #[test]
    fn exclude_backups_after_match() {
        let db = sample();
        let mut options = SearchOptions {
            fields: SearchFlags::TITLE | SearchFlags::NOTES,
            ..SearchOptions::default()
        };
        assert_eq!(db.find_all("test", &options).expect("search"), vec![1, 3]);
        options.exclude_backups = true;
        assert_eq!(db.find_all("test", &options).expect("search"), vec![1]);
    }

    #[test]
    fn regex_and_other_fields() {
        let db = sample();
        let options = SearchOptions { fields: SearchFlags::TITLE, regex: true, ..SearchOptions::default() };
        assert_eq!(db.find_all("^g", &options).expect("search"), vec![0, 1]);
        assert!(matches!(db.find_all("(", &options), Err(Error::InvalidParam(_))));

        let password = SearchOptions { fields: SearchFlags::PASSWORD, ..SearchOptions::default() };
        assert_eq!(db.find_all("HUNTER", &password).expect("search"), vec![0]);
        assert!(db.get_entry(0).expect("entry").password().is_locked());

        let group = SearchOptions { fields: SearchFlags::GROUP_NAME, ..SearchOptions::default() };
        assert_eq!(db.find_all("backup", &group).expect("search"), vec![3]);

        let uuid = db.get_entry(2).expect("entry").uuid;
        let by_uuid = SearchOptions { fields: SearchFlags::UUID, ..SearchOptions::default() };
        assert_eq!(db.find_all(&hex::encode_upper(uuid.as_bytes()), &by_uuid).expect("search"), vec![2]);
    }

    #[test]
    fn expiry_queries() {
        let mut db = sample();
        let now = PwTime::new(2024, 6, 15, 12, 0, 0);

        let mut template = db.get_entry(0).expect("entry").clone();
        template.expire = PwTime::new(2024, 6, 1, 0, 0, 0);
        db.set_entry(0, &template).expect("set");

        let mut template = db.get_entry(1).expect("entry").clone();
        template.expire = PwTime::new(2024, 6, 20, 0, 0, 0);
        db.set_entry(1, &template).expect("set");

        let mut template = db.get_entry(2).expect("entry").clone();
        template.expire = PwTime::NEVER_EXPIRE_ALT;
        db.set_entry(2, &template).expect("set");

        let mut template = db.get_entry(3).expect("entry").clone();
        template.expire = PwTime::new(2020, 1, 1, 0, 0, 0);
        db.set_entry(3, &template).expect("set");

        assert_eq!(db.find_expired(&now, false), vec![0, 3]);
        assert_eq!(db.find_expired(&now, true), vec![0]);
        assert_eq!(db.find_expiring_soon(&now, 7, false), vec![1]);
        assert_eq!(db.find_expiring_soon(&now, 2, false), Vec::<usize>::new());

        // find_all compares against the current time, long after these dates.
        let options = SearchOptions { exclude_expired: true, ..title_only(false) };
        assert_eq!(db.find_all("g", &options).expect("search"), vec![2]);
    }
}
