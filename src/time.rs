use std::cmp::Ordering;
use std::fmt;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

/// Size of a packed timestamp on disk.
pub const PACKED_TIME_SIZE: usize = 5;

/// A calendar timestamp as stored in KeePass 1.x databases.
///
/// Field order matters: the derived ordering compares year, month, day, hour,
/// minute and second in that priority.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PwTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl PwTime {
    /// "Never expires" as written by KeePass 1.x.
    pub const NEVER_EXPIRE: PwTime = PwTime::new(2999, 12, 28, 23, 59, 59);

    /// A second "never" value found in files from other writers. Expiration
    /// scans treat it like `NEVER_EXPIRE`, but it is kept distinct.
    pub const NEVER_EXPIRE_ALT: PwTime = PwTime::new(4092, 12, 28, 23, 59, 59);

    pub const fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> PwTime {
        PwTime { year, month, day, hour, minute, second }
    }

    /// Current local time. Seconds are kept; they are only lost when packed.
    pub fn now() -> PwTime {
        PwTime::from_naive(&Local::now().naive_local())
    }

    pub fn from_naive(dt: &NaiveDateTime) -> PwTime {
        PwTime {
            year: dt.year().max(0).min(0x3FFF) as u16,
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
        }
    }

    /// Converts to a chrono value. Returns `None` for impossible dates.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_opt(self.hour as u32, self.minute as u32, self.second as u32)
    }

    /// This time moved forward by a number of days.
    pub fn plus_days(&self, days: u32) -> Option<PwTime> {
        let dt = self.to_naive()?.checked_add_signed(chrono::Duration::days(days as i64))?;
        Some(PwTime::from_naive(&dt))
    }

    /// Packs into the 5 byte on-disk form.
    ///
    /// Bit layout: `00YYYYYY YYYYYYYY MMMMDDDD DHHHHHMM MMMMSSSS`. The seconds
    /// bits are always written as zero.
    pub fn pack(&self) -> [u8; PACKED_TIME_SIZE] {
        let year = self.year as u32;
        let month = self.month as u32;
        let day = self.day as u32;
        let hour = self.hour as u32;
        let minute = self.minute as u32;

        [
            ((year >> 6) & 0x3F) as u8,
            (((year & 0x3F) << 2) | ((month >> 2) & 0x03)) as u8,
            (((month & 0x03) << 6) | ((day & 0x1F) << 1) | ((hour >> 4) & 0x01)) as u8,
            (((hour & 0x0F) << 4) | ((minute >> 2) & 0x0F)) as u8,
            ((minute & 0x03) << 6) as u8,
        ]
    }

    /// Inverse of `pack`. `second` is always 0.
    pub fn unpack(bytes: &[u8; PACKED_TIME_SIZE]) -> PwTime {
        let b0 = bytes[0] as u32;
        let b1 = bytes[1] as u32;
        let b2 = bytes[2] as u32;
        let b3 = bytes[3] as u32;
        let b4 = bytes[4] as u32;

        PwTime {
            year: ((b0 << 6) | (b1 >> 2)) as u16,
            month: (((b1 & 0x03) << 2) | (b2 >> 6)) as u8,
            day: ((b2 >> 1) & 0x1F) as u8,
            hour: (((b2 & 0x01) << 4) | (b3 >> 4)) as u8,
            minute: (((b3 & 0x0F) << 2) | (b4 >> 6)) as u8,
            second: 0,
        }
    }

    /// Reads a packed time from a field of arbitrary length.
    pub fn unpack_slice(bytes: &[u8]) -> Option<PwTime> {
        if bytes.len() != PACKED_TIME_SIZE {
            return None;
        }
        let mut packed = [0u8; PACKED_TIME_SIZE];
        packed.copy_from_slice(bytes);
        Some(PwTime::unpack(&packed))
    }

    /// True iff this is the KeePass 1.x "never expires" sentinel (year 2999).
    pub fn is_never_expire(&self) -> bool {
        self.year == PwTime::NEVER_EXPIRE.year
    }

    /// True for either of the two "never" sentinels.
    pub fn is_effectively_never(&self) -> bool {
        self.is_never_expire() || self.year == PwTime::NEVER_EXPIRE_ALT.year
    }

    /// The same time with seconds cleared, i.e. what survives a save.
    pub fn truncated(&self) -> PwTime {
        PwTime { second: 0, ..*self }
    }
}

/// Compares two timestamps, returning -1, 0 or 1.
pub fn compare(a: &PwTime, b: &PwTime) -> i32 {
    match a.cmp(b) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

impl fmt::Display for PwTime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn never_expire_packs_like_keepass() {
        // 2999-12-28 23:59 as written by KeePass 1.x (seconds cleared).
        let packed = PwTime::NEVER_EXPIRE.pack();
        assert_eq!(packed, [0x2E, 0xDF, 0x39, 0x7E, 0xC0]);
        let back = PwTime::unpack(&packed);
        assert_eq!(back, PwTime::new(2999, 12, 28, 23, 59, 0));
        assert!(back.is_never_expire());
    }

    #[test]
    fn sentinels_diverge() {
        assert!(PwTime::NEVER_EXPIRE.is_never_expire());
        assert!(!PwTime::NEVER_EXPIRE_ALT.is_never_expire());
        assert!(PwTime::NEVER_EXPIRE_ALT.is_effectively_never());
        assert!(!PwTime::new(2024, 1, 1, 0, 0, 0).is_effectively_never());
    }

    #[test]
    fn unpack_slice_checks_length() {
        assert!(PwTime::unpack_slice(&[0u8; 4]).is_none());
        assert!(PwTime::unpack_slice(&[0u8; 6]).is_none());
        assert!(PwTime::unpack_slice(&[0u8; 5]).is_some());
    }

    #[test]
    fn compare_orders_by_priority() {
        let a = PwTime::new(2020, 5, 1, 0, 0, 0);
        let b = PwTime::new(2020, 4, 30, 23, 59, 59);
        assert_eq!(compare(&a, &b), 1);
        assert_eq!(compare(&b, &a), -1);
        assert_eq!(compare(&a, &a), 0);
        assert_eq!(compare(&PwTime::new(2020, 1, 1, 0, 0, 1), &PwTime::new(2020, 1, 1, 0, 0, 0)), 1);
    }

    #[test]
    fn plus_days_crosses_month() {
        let t = PwTime::new(2021, 1, 30, 12, 0, 0);
        assert_eq!(t.plus_days(3), Some(PwTime::new(2021, 2, 2, 12, 0, 0)));
        assert_eq!(PwTime::new(2021, 2, 30, 0, 0, 0).plus_days(1), None);
    }

    fn any_time() -> impl Strategy<Value = PwTime> {
        (0u16..=0x3FFF, 1u8..=12, 1u8..=31, 0u8..=23, 0u8..=59, 0u8..=59)
            .prop_map(|(y, mo, d, h, mi, s)| PwTime::new(y, mo, d, h, mi, s))
    }

    proptest! {
        #[test]
        fn pack_round_trips_without_seconds(t in any_time()) {
            let back = PwTime::unpack(&t.pack());
            prop_assert_eq!(back.second, 0);
            prop_assert_eq!(back, t.truncated());
        }

        #[test]
        fn compare_is_antisymmetric(a in any_time(), b in any_time()) {
            prop_assert_eq!(compare(&a, &b), -compare(&b, &a));
            prop_assert_eq!(compare(&a, &a), 0);
        }

        #[test]
        fn compare_is_transitive(a in any_time(), b in any_time(), c in any_time()) {
            if compare(&a, &b) <= 0 && compare(&b, &c) <= 0 {
                prop_assert!(compare(&a, &c) <= 0);
            }
        }
    }
}
