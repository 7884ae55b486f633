//! Opening-hours parser for the seed sheet's `hours` column.
//!
//! Accepted form: `;`-separated segments of `<days> <ranges>`, e.g.
//! `Mon-Fri 09:00-17:00; Sat 10:00-14:00, 15:00-18:00; Sun closed`.
//! `24h` means open all day.

use thiserror::Error;

use crate::models::hours::{parse_clock, TimeRange, Weekday, WeeklyHours, MINUTES_PER_DAY};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum HoursError {
    #[error("segment '{0}' has no time ranges")]
    MissingRanges(String),

    #[error("unknown day '{0}'")]
    UnknownDay(String),

    #[error("invalid time range '{0}'")]
    InvalidRange(String),

    #[error("{0}")]
    BadInterval(String),

    #[error("overlapping ranges on {0:?}")]
    Overlap(Weekday),
}

pub fn parse_hours(text: &str) -> Result<WeeklyHours, HoursError> {
    let mut hours = WeeklyHours::new();

    for segment in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let (days_part, ranges_part) = split_segment(segment)?;
        let days = parse_days(days_part)?;
        let ranges = parse_ranges(ranges_part)?;

        for day in days {
            let entry = hours.0.entry(day).or_default();
            for range in &ranges {
                if entry.iter().any(|existing| existing.overlaps(range)) {
                    return Err(HoursError::Overlap(day));
                }
                entry.push(*range);
            }
            entry.sort();
        }
    }

    Ok(hours)
}

/// Days end at the first token that starts with a digit or is a keyword.
fn split_segment(segment: &str) -> Result<(&str, &str), HoursError> {
    let split_at = segment
        .char_indices()
        .find(|(i, c)| {
            let rest = segment[*i..].to_ascii_lowercase();
            c.is_ascii_digit() || rest.starts_with("closed") || rest.starts_with("24h")
        })
        .map(|(i, _)| i)
        .ok_or_else(|| HoursError::MissingRanges(segment.to_string()))?;

    let days = segment[..split_at].trim().trim_end_matches(':').trim();
    let ranges = segment[split_at..].trim();
    if days.is_empty() {
        return Err(HoursError::UnknownDay(String::new()));
    }
    Ok((days, ranges))
}

fn parse_days(text: &str) -> Result<Vec<Weekday>, HoursError> {
    let mut days = Vec::new();
    for part in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let lower = part.to_ascii_lowercase();
        if lower == "daily" || lower == "everyday" || lower == "every day" {
            days.extend(Weekday::ALL);
            continue;
        }
        match part.split_once('-') {
            Some((from, to)) => {
                let from = Weekday::parse(from).ok_or_else(|| HoursError::UnknownDay(from.trim().into()))?;
                let to = Weekday::parse(to).ok_or_else(|| HoursError::UnknownDay(to.trim().into()))?;
                // Ranges may wrap the week, e.g. Fri-Mon.
                let mut i = from.index();
                loop {
                    days.push(Weekday::ALL[i]);
                    if i == to.index() {
                        break;
                    }
                    i = (i + 1) % 7;
                }
            }
            None => {
                days.push(Weekday::parse(part).ok_or_else(|| HoursError::UnknownDay(part.into()))?);
            }
        }
    }
    days.sort();
    days.dedup();
    Ok(days)
}

fn parse_ranges(text: &str) -> Result<Vec<TimeRange>, HoursError> {
    let lower = text.to_ascii_lowercase();
    if lower == "closed" {
        return Ok(Vec::new());
    }
    if lower == "24h" || lower == "24 hours" {
        return TimeRange::new(0, MINUTES_PER_DAY)
            .map(|r| vec![r])
            .map_err(HoursError::BadInterval);
    }

    let mut ranges: Vec<TimeRange> = Vec::new();
    for part in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (open, close) = part
            .split_once('-')
            .or_else(|| part.split_once('–'))
            .ok_or_else(|| HoursError::InvalidRange(part.into()))?;
        let open = parse_clock(open).ok_or_else(|| HoursError::InvalidRange(part.into()))?;
        let close = parse_clock(close).ok_or_else(|| HoursError::InvalidRange(part.into()))?;
        ranges.push(TimeRange::new(open, close).map_err(HoursError::BadInterval)?);
    }
    if ranges.is_empty() {
        return Err(HoursError::MissingRanges(text.into()));
    }
    Ok(ranges)
}
