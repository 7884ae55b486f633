use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Day of the week, ordered Monday first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Accepts three-letter abbreviations and full English names, any case.
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let day = match lower.as_str() {
            "mon" | "monday" => Weekday::Mon,
            "tue" | "tues" | "tuesday" => Weekday::Tue,
            "wed" | "wednesday" => Weekday::Wed,
            "thu" | "thur" | "thurs" | "thursday" => Weekday::Thu,
            "fri" | "friday" => Weekday::Fri,
            "sat" | "saturday" => Weekday::Sat,
            "sun" | "sunday" => Weekday::Sun,
            _ => return None,
        };
        Some(day)
    }
}

/// Opening interval in minutes since midnight. `close` may be 1440 (24:00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeRange {
    pub open: u16,
    pub close: u16,
}

pub const MINUTES_PER_DAY: u16 = 24 * 60;

impl TimeRange {
    pub fn new(open: u16, close: u16) -> Result<Self, String> {
        if close > MINUTES_PER_DAY {
            return Err(format!("closing time {} is past 24:00", fmt_minutes(close)));
        }
        if open >= close {
            return Err(format!(
                "opening time {} is not before closing time {}",
                fmt_minutes(open),
                fmt_minutes(close)
            ));
        }
        Ok(Self { open, close })
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.open < other.close && other.open < self.close
    }
}

fn fmt_minutes(m: u16) -> String {
    format!("{:02}:{:02}", m / 60, m % 60)
}

/// Parse `HH:MM` (or `H:MM`) into minutes since midnight. `24:00` is allowed.
pub fn parse_clock(s: &str) -> Option<u16> {
    let (h, m) = s.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    let h: u16 = h.parse().ok()?;
    let m: u16 = m.parse().ok()?;
    if m >= 60 || h > 24 || (h == 24 && m != 0) {
        return None;
    }
    Some(h * 60 + m)
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", fmt_minutes(self.open), fmt_minutes(self.close))
    }
}

impl From<TimeRange> for String {
    fn from(r: TimeRange) -> Self {
        r.to_string()
    }
}

impl TryFrom<String> for TimeRange {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        let (open, close) = s
            .split_once('-')
            .ok_or_else(|| format!("'{s}' is not a HH:MM-HH:MM range"))?;
        let open = parse_clock(open).ok_or_else(|| format!("invalid time '{open}'"))?;
        let close = parse_clock(close).ok_or_else(|| format!("invalid time '{close}'"))?;
        TimeRange::new(open, close)
    }
}

/// Weekly opening hours. A day mapped to an empty list is closed;
/// a day absent from the map has unknown hours.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklyHours(pub BTreeMap<Weekday, Vec<TimeRange>>);

impl WeeklyHours {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn day(&self, day: Weekday) -> Option<&[TimeRange]> {
        self.0.get(&day).map(Vec::as_slice)
    }

    pub fn is_closed(&self, day: Weekday) -> bool {
        matches!(self.0.get(&day), Some(ranges) if ranges.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_parses_names_and_abbreviations() {
        assert_eq!(Weekday::parse("MON"), Some(Weekday::Mon));
        assert_eq!(Weekday::parse("thursday"), Some(Weekday::Thu));
        assert_eq!(Weekday::parse(" Sun "), Some(Weekday::Sun));
        assert_eq!(Weekday::parse("funday"), None);
    }

    #[test]
    fn clock_parsing_bounds() {
        assert_eq!(parse_clock("09:30"), Some(570));
        assert_eq!(parse_clock("9:05"), Some(545));
        assert_eq!(parse_clock("24:00"), Some(1440));
        assert_eq!(parse_clock("24:01"), None);
        assert_eq!(parse_clock("12:60"), None);
        assert_eq!(parse_clock("1200"), None);
    }

    #[test]
    fn range_requires_open_before_close() {
        assert!(TimeRange::new(600, 540).is_err());
        assert!(TimeRange::new(600, 600).is_err());
        assert!(TimeRange::new(0, 1440).is_ok());
    }

    #[test]
    fn overlapping_ranges_detected() {
        let a = TimeRange::new(540, 720).unwrap();
        let b = TimeRange::new(700, 900).unwrap();
        let c = TimeRange::new(720, 900).unwrap();
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn weekly_hours_serializes_as_day_map() {
        let mut hours = WeeklyHours::new();
        hours.0.insert(Weekday::Mon, vec![TimeRange::new(540, 1020).unwrap()]);
        hours.0.insert(Weekday::Sun, vec![]);

        let json = serde_json::to_value(&hours).unwrap();
        assert_eq!(json["mon"][0], "09:00-17:00");
        assert_eq!(json["sun"], serde_json::json!([]));

        let back: WeeklyHours = serde_json::from_value(json).unwrap();
        assert_eq!(back, hours);
        assert!(back.is_closed(Weekday::Sun));
        assert!(!back.is_closed(Weekday::Tue));
    }

    #[test]
    fn deserializing_bad_range_fails() {
        let json = serde_json::json!({"mon": ["17:00-09:00"]});
        assert!(serde_json::from_value::<WeeklyHours>(json).is_err());
    }
}
