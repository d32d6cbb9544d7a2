use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

pub const WEEKDAYS: [(&str, Weekday); 7] = [
    ("mon", Weekday::Mon),
    ("tue", Weekday::Tue),
    ("wed", Weekday::Wed),
    ("thu", Weekday::Thu),
    ("fri", Weekday::Fri),
    ("sat", Weekday::Sat),
    ("sun", Weekday::Sun),
];

/// Half-open opening window `[start, end)` in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayRange {
    pub start: u16,
    pub end: u16,
}

impl DayRange {
    pub fn new(start: u16, end: u16) -> Option<Self> {
        if start < end && end < MINUTES_PER_DAY {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Parses `HHMM-HHMM`. Whitespace is ignored; an empty value means closed.
    pub fn parse(value: &str) -> Result<Option<Self>, String> {
        let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        if compact.is_empty() {
            return Ok(None);
        }
        let (from, to) = compact
            .split_once('-')
            .ok_or_else(|| "missing '-' separator".to_string())?;
        let start = parse_hhmm(from)?;
        let end = parse_hhmm(to)?;
        Self::new(start, end)
            .map(Some)
            .ok_or_else(|| "start must be before end".to_string())
    }

    pub fn contains(&self, minute: u16) -> bool {
        self.start <= minute && minute < self.end
    }
}

fn parse_hhmm(value: &str) -> Result<u16, String> {
    if value.len() != 4 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("'{}' is not HHMM", value));
    }
    let hour: u16 = value[..2].parse().map_err(|_| format!("'{}' is not HHMM", value))?;
    let minute: u16 = value[2..].parse().map_err(|_| format!("'{}' is not HHMM", value))?;
    if hour > 23 || minute > 59 {
        return Err(format!("'{}' is out of range", value));
    }
    Ok(hour * 60 + minute)
}

/// Weekly opening hours, one optional window per day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoursCalendar {
    pub name: String,
    days: [Option<DayRange>; 7],
}

impl HoursCalendar {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            days: [None; 7],
        }
    }

    pub fn with_day(mut self, weekday: Weekday, range: Option<DayRange>) -> Self {
        self.set_day(weekday, range);
        self
    }

    pub fn set_day(&mut self, weekday: Weekday, range: Option<DayRange>) {
        self.days[weekday.num_days_from_monday() as usize] = range;
    }

    pub fn day(&self, weekday: Weekday) -> Option<DayRange> {
        self.days[weekday.num_days_from_monday() as usize]
    }

    /// Open/closed for a wall-clock time already converted to local time.
    pub fn is_open_local<T: Datelike + Timelike>(&self, local: &T) -> bool {
        let minute = (local.hour() * 60 + local.minute()) as u16;
        self.day(local.weekday())
            .map(|range| range.contains(minute))
            .unwrap_or(false)
    }

    pub fn is_open_at(&self, timezone: &Tz, now: DateTime<Utc>) -> bool {
        self.is_open_local(&timezone.from_utc_datetime(&now.naive_utc()))
    }
}
