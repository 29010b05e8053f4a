//! Best-effort reading of opaque `opening_hours` data.
//!
//! Venue records arrive in whatever shape the caller's place source uses:
//! a free-text string ("Mon-Sun 18:00-02:00"), a list of weekday lines
//! ("Monday: 9:00 AM – 5:00 PM"), or an object with `weekday_text` or
//! `periods`. Anything unreadable is treated as unknown, and unknown hours
//! never count as a conflict. Ranges in side-service clauses ("happy hour
//! 4-6pm") are ignored.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::model::SchedulePattern;

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A venue whose last close is before this is "closing early" for night owls.
pub const LATE_CLOSE_MINUTES: u32 = 21 * 60;

/// A venue whose first open is at or after this is evening-only.
pub const EVENING_OPEN_MINUTES: u32 = 17 * 60;

/// One open interval in minutes from midnight.
///
/// `closes` exceeds a day's minutes when the venue closes after midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpeningWindow {
    pub opens: u32,
    pub closes: u32,
}

impl OpeningWindow {
    fn new(opens: u32, closes: u32) -> Self {
        let closes = if closes <= opens {
            closes + MINUTES_PER_DAY
        } else {
            closes
        };
        Self { opens, closes }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HoursSummary {
    pub windows: Vec<OpeningWindow>,
    /// Closing times stated without an opening time ("open until 2am").
    pub closes_at: Vec<u32>,
    pub always_open: bool,
}

impl HoursSummary {
    /// Read whatever hours information `hours` carries, or `None` if nothing parses.
    pub fn read(hours: &Value) -> Option<Self> {
        let mut summary = HoursSummary::default();
        collect(hours, &mut summary);
        if summary.windows.is_empty() && summary.closes_at.is_empty() && !summary.always_open {
            None
        } else {
            Some(summary)
        }
    }

    pub fn latest_close(&self) -> Option<u32> {
        self.windows
            .iter()
            .map(|w| w.closes)
            .chain(self.closes_at.iter().copied())
            .max()
    }

    pub fn earliest_open(&self) -> Option<u32> {
        self.windows.iter().map(|w| w.opens).min()
    }

    /// Whether these hours demonstrably clash with a pair's schedule.
    pub fn conflicts_with(&self, pattern: SchedulePattern) -> bool {
        if self.always_open {
            return false;
        }
        match pattern {
            SchedulePattern::NightOwl => self
                .latest_close()
                .is_some_and(|close| close < LATE_CLOSE_MINUTES),
            SchedulePattern::EarlyBird => self
                .earliest_open()
                .is_some_and(|open| open >= EVENING_OPEN_MINUTES),
            SchedulePattern::Mixed => false,
        }
    }
}

/// True only when hours are known and clash with `pattern`.
pub fn conflicts(hours: Option<&Value>, pattern: SchedulePattern) -> bool {
    hours
        .and_then(HoursSummary::read)
        .is_some_and(|h| h.conflicts_with(pattern))
}

fn collect(value: &Value, summary: &mut HoursSummary) {
    match value {
        Value::String(text) => read_text(text, summary),
        Value::Array(items) => items.iter().for_each(|item| collect(item, summary)),
        Value::Object(map) => {
            if let Some(Value::Array(periods)) = map.get("periods") {
                periods.iter().for_each(|p| read_period(p, summary));
                return;
            }
            map.values().for_each(|v| collect(v, summary));
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Google-style period: `{"open": {"time": "0900"}, "close": {"time": "1700"}}`.
fn read_period(period: &Value, summary: &mut HoursSummary) {
    let time_of = |key: &str| {
        period
            .get(key)
            .and_then(|v| v.get("time"))
            .and_then(Value::as_str)
            .and_then(parse_hhmm)
    };

    match (time_of("open"), time_of("close")) {
        (Some(opens), Some(closes)) => summary.windows.push(OpeningWindow::new(opens, closes)),
        // An open with no close is how "open 24 hours" is encoded.
        (Some(_), None) => summary.always_open = true,
        _ => {}
    }
}

fn parse_hhmm(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: u32 = digits[..2].parse().ok()?;
    let minutes: u32 = digits[2..].parse().ok()?;
    (hours <= 24 && minutes < 60).then_some(hours * 60 + minutes)
}

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d{1,2})(?::?(\d{2}))?\s*(a\.?m\.?|p\.?m\.?)?\s*(?:-|–|—|to)\s*(\d{1,2})(?::?(\d{2}))?\s*(a\.?m\.?|p\.?m\.?)?",
    )
    .expect("Invalid opening hours range regex")
});

static UNTIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:until|till|til)\s+(?:(\d{1,2})(?::?(\d{2}))?\s*(a\.?m\.?|p\.?m\.?)?|(midnight))",
    )
    .expect("Invalid opening hours close regex")
});

/// Clauses about these are not the venue's own opening hours.
const SIDE_SERVICES: &[&str] = &["happy hour", "kitchen", "delivery", "takeout", "take-out"];

/// A bare close before this is read as after midnight ("until 2am").
const EARLY_MORNING_MINUTES: u32 = 6 * 60;

fn read_text(text: &str, summary: &mut HoursSummary) {
    let lower = text.to_lowercase();
    if lower.contains("24 hours") || lower.contains("24/7") {
        summary.always_open = true;
        return;
    }

    for clause in text.split([',', ';', '\n', '|']) {
        let lower = clause.to_lowercase();
        if SIDE_SERVICES.iter().any(|label| lower.contains(label)) {
            continue;
        }
        for caps in RANGE_RE.captures_iter(clause) {
            if let Some(window) = window_from_captures(&caps) {
                summary.windows.push(window);
            }
        }
        for caps in UNTIL_RE.captures_iter(clause) {
            if let Some(close) = close_from_captures(&caps) {
                summary.closes_at.push(close);
            }
        }
    }
}

fn close_from_captures(caps: &Captures<'_>) -> Option<u32> {
    if caps.get(4).is_some() {
        return Some(MINUTES_PER_DAY);
    }
    let close = to_minutes(clock(caps, 1, 2)?, meridiem(caps, 3));
    Some(if close < EARLY_MORNING_MINUTES {
        close + MINUTES_PER_DAY
    } else {
        close
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Meridiem {
    Am,
    Pm,
}

fn meridiem(caps: &Captures<'_>, idx: usize) -> Option<Meridiem> {
    caps.get(idx).map(|m| {
        if m.as_str().to_lowercase().starts_with('p') {
            Meridiem::Pm
        } else {
            Meridiem::Am
        }
    })
}

fn clock(caps: &Captures<'_>, hour_idx: usize, minute_idx: usize) -> Option<(u32, u32)> {
    let hour: u32 = caps.get(hour_idx)?.as_str().parse().ok()?;
    let minute: u32 = match caps.get(minute_idx) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    (hour <= 24 && minute < 60).then_some((hour, minute))
}

fn to_minutes((hour, minute): (u32, u32), meridiem: Option<Meridiem>) -> u32 {
    let hour = match (meridiem, hour) {
        (Some(Meridiem::Am), 12) => 0,
        (Some(Meridiem::Pm), h) if h < 12 => h + 12,
        (_, h) => h,
    };
    hour * 60 + minute
}

fn window_from_captures(caps: &Captures<'_>) -> Option<OpeningWindow> {
    let open_clock = clock(caps, 1, 2)?;
    let close_clock = clock(caps, 4, 5)?;
    let close_meridiem = meridiem(caps, 6);

    // "9 – 5 PM": the opening time borrows the closing meridiem unless that
    // would put it after the close.
    let open_meridiem = meridiem(caps, 3).or_else(|| {
        let borrowed = close_meridiem?;
        let candidate = to_minutes(open_clock, Some(borrowed));
        (candidate <= to_minutes(close_clock, close_meridiem)).then_some(borrowed)
    });

    Some(OpeningWindow::new(
        to_minutes(open_clock, open_meridiem),
        to_minutes(close_clock, close_meridiem),
    ))
}
