//! Calendar date/time conversions using O(1) algorithms
//!
//! Implements Howard Hinnant's civil_from_days and days_from_civil algorithms.
//! Reference: http://howardhinnant.github.io/date_algorithms.html
//!
//! Used to decide whether the wall clock holds a plausible date and to
//! render timestamps as ISO 8601, in UTC on the wire or at a fixed local
//! offset for display. One-second resolution.

use core::fmt;

const SECONDS_PER_DAY: u64 = 86_400;

/// Earliest year accepted as a synchronized wall clock
pub const MIN_PLAUSIBLE_YEAR: i32 = 2020;

/// Broken-down UTC time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Check if year is a leap year (Gregorian calendar)
///
/// - Divisible by 4: leap year
/// - EXCEPT divisible by 100: not a leap year
/// - EXCEPT divisible by 400: leap year
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Convert Unix seconds to broken-down UTC
pub fn civil_from_unix(unix_secs: u64) -> CivilTime {
    let days_since_epoch = (unix_secs / SECONDS_PER_DAY) as i64;
    let secs_today = unix_secs % SECONDS_PER_DAY;

    let (year, month, day) = civil_from_days(days_since_epoch);

    CivilTime {
        year,
        month,
        day,
        hour: (secs_today / 3600) as u8,
        minute: ((secs_today % 3600) / 60) as u8,
        second: (secs_today % 60) as u8,
    }
}

/// Convert a UTC calendar date and time to Unix seconds
///
/// Dates before 1970 clamp to 0.
pub fn unix_from_civil(t: CivilTime) -> u64 {
    let days = days_from_civil(t.year, t.month, t.day);
    if days < 0 {
        return 0;
    }
    (days as u64) * SECONDS_PER_DAY
        + (t.hour as u64) * 3600
        + (t.minute as u64) * 60
        + (t.second as u64)
}

/// Whether `unix_secs` looks like a clock that has actually been set
pub fn is_plausible(unix_secs: u64) -> bool {
    civil_from_unix(unix_secs).year >= MIN_PLAUSIBLE_YEAR
}

/// Convert days since Unix epoch to civil date (year, month, day)
fn civil_from_days(days_since_epoch: i64) -> (i32, u8, u8) {
    // Shift epoch from 1970-01-01 to 0000-03-01 so the leap day ends the year
    let z = days_since_epoch + 719_468;

    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32; // day of era [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365; // [0, 399]
    let y = (yoe as i64) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11], 0 = March
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = if m <= 2 { y + 1 } else { y };

    (year as i32, m, d)
}

/// Convert civil date (year, month, day) to days since Unix epoch
fn days_from_civil(year: i32, month: u8, day: u8) -> i64 {
    let (y, m) = if month <= 2 {
        (year as i64 - 1, month as i64 + 9)
    } else {
        (year as i64, month as i64 - 3)
    };

    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32; // year of era [0, 399]
    let doy = (153 * (m as u32) + 2) / 5 + (day as u32) - 1; // day of year [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // day of era [0, 146096]

    era * 146_097 + (doe as i64) - 719_468
}

/// ISO 8601 rendering of Unix seconds: `YYYY-MM-DDTHH:MM:SSZ`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iso8601(pub u64);

impl fmt::Display for Iso8601 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = civil_from_unix(self.0);
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
            t.year, t.month, t.day, t.hour, t.minute, t.second
        )
    }
}

/// Fixed offset from UTC, east positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UtcOffset {
    pub secs: i32,
}

impl UtcOffset {
    pub const UTC: Self = Self { secs: 0 };

    /// Standard-time offset of a POSIX `TZ` string
    ///
    /// Accepts `UTC0`, `EST5`, `CET-1CEST,M3.5.0,M10.5.0/3`, `<+0530>-5:30`
    /// and the like. Any daylight-saving part is ignored. POSIX counts hours
    /// west of Greenwich, so `EST5` is five hours behind UTC.
    pub fn from_posix_tz(tz: &str) -> Option<Self> {
        let rest = match tz.strip_prefix('<') {
            Some(quoted) => &quoted[quoted.find('>')? + 1..],
            None => {
                let name_len = tz.bytes().take_while(u8::is_ascii_alphabetic).count();
                if name_len < 3 {
                    return None;
                }
                &tz[name_len..]
            }
        };

        let (west, rest) = match rest.as_bytes().first()? {
            b'-' => (false, &rest[1..]),
            b'+' => (true, &rest[1..]),
            _ => (true, rest),
        };
        let end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == ':'))
            .unwrap_or(rest.len());

        let mut fields = rest[..end].split(':');
        let hours: i32 = fields.next()?.parse().ok()?;
        let minutes: i32 = match fields.next() {
            Some(m) => m.parse().ok()?,
            None => 0,
        };
        let seconds: i32 = match fields.next() {
            Some(s) => s.parse().ok()?,
            None => 0,
        };
        if fields.next().is_some() || hours > 24 || minutes > 59 || seconds > 59 {
            return None;
        }

        let secs = hours * 3600 + minutes * 60 + seconds;
        Some(Self {
            secs: if west { -secs } else { secs },
        })
    }
}

/// ISO 8601 rendering at a fixed offset: `YYYY-MM-DDTHH:MM:SS+HH:MM`
///
/// A zero offset renders with `Z`, exactly like [`Iso8601`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalIso8601 {
    pub unix_secs: u64,
    pub offset: UtcOffset,
}

impl fmt::Display for LocalIso8601 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = (self.unix_secs as i64 + self.offset.secs as i64).max(0) as u64;
        let t = civil_from_unix(local);
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
            t.year, t.month, t.day, t.hour, t.minute, t.second
        )?;
        if self.offset.secs == 0 {
            return f.write_str("Z");
        }
        let sign = if self.offset.secs < 0 { '-' } else { '+' };
        let abs = self.offset.secs.unsigned_abs();
        write!(f, "{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leap_year() {
        assert!(is_leap_year(2000)); // Divisible by 400
        assert!(is_leap_year(2024)); // Divisible by 4
        assert!(!is_leap_year(1900)); // Divisible by 100, not 400
        assert!(!is_leap_year(2023)); // Not divisible by 4
        assert!(!is_leap_year(2100)); // Divisible by 100, not 400
    }

    #[test]
    fn test_unix_epoch() {
        let t = civil_from_unix(0);
        assert_eq!((t.year, t.month, t.day), (1970, 1, 1));
        assert_eq!((t.hour, t.minute, t.second), (0, 0, 0));
    }

    #[test]
    fn test_known_instants() {
        let test_dates = [
            0u64,       // 1970-01-01 00:00:00
            946684800,  // 2000-01-01 00:00:00
            1709164800, // 2024-02-29 00:00:00
            2147483647, // 2038-01-19 03:14:07
            4102444800, // 2100-01-01 00:00:00
        ];

        for &unix_secs in &test_dates {
            assert_eq!(
                unix_from_civil(civil_from_unix(unix_secs)),
                unix_secs,
                "conversion mismatch for {}",
                unix_secs
            );
        }
    }

    #[test]
    fn test_leap_day_2024() {
        let t = civil_from_unix(1709164800);
        assert_eq!((t.year, t.month, t.day), (2024, 2, 29));
    }

    #[test]
    fn test_iso8601_format() {
        assert_eq!(Iso8601(0).to_string(), "1970-01-01T00:00:00Z");
        assert_eq!(Iso8601(1763035200).to_string(), "2025-11-13T12:00:00Z");
        assert_eq!(Iso8601(946684799).to_string(), "1999-12-31T23:59:59Z");
    }

    #[test]
    fn test_posix_tz_offsets() {
        let offset = |tz| UtcOffset::from_posix_tz(tz).map(|o| o.secs);
        assert_eq!(offset("UTC0"), Some(0));
        assert_eq!(offset("EST5"), Some(-5 * 3600));
        assert_eq!(offset("EST5EDT,M3.2.0,M11.1.0"), Some(-5 * 3600));
        assert_eq!(offset("CET-1CEST,M3.5.0,M10.5.0/3"), Some(3600));
        assert_eq!(offset("<+0530>-5:30"), Some(5 * 3600 + 30 * 60));
        assert_eq!(offset("NPT-5:45"), Some(5 * 3600 + 45 * 60));
        assert_eq!(offset("XY5"), None);
        assert_eq!(offset("UTC"), None);
        assert_eq!(offset("EST5:99"), None);
        assert_eq!(offset(""), None);
    }

    #[test]
    fn test_local_iso8601_format() {
        let at = |secs| LocalIso8601 {
            unix_secs: 1763035200,
            offset: UtcOffset { secs },
        };
        assert_eq!(at(0).to_string(), "2025-11-13T12:00:00Z");
        assert_eq!(at(-5 * 3600).to_string(), "2025-11-13T07:00:00-05:00");
        assert_eq!(at(13 * 3600).to_string(), "2025-11-14T01:00:00+13:00");
        assert_eq!(at(5 * 3600 + 1800).to_string(), "2025-11-13T17:30:00+05:30");
    }

    #[test]
    fn test_plausibility_floor() {
        assert!(!is_plausible(0));
        assert!(!is_plausible(1_577_836_799)); // 2019-12-31T23:59:59Z
        assert!(is_plausible(1_577_836_800)); // 2020-01-01T00:00:00Z
    }
}
