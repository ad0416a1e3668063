//! Parsing and punching of day-row interval strings such as `"09:00-10:30 13:15-"`.

const SEGMENT_SEPARATOR: char = ' ';
const OPEN_MARKER: char = '-';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Punch {
    Opened,
    Closed,
}

/// Minutes since midnight for an `H:MM` or `HH:MM` clock label.
pub fn minutes_from_string(value: &str) -> Option<i64> {
    let (hours, minutes) = value.split_once(':')?;
    if hours.is_empty() || hours.len() > 2 || minutes.len() != 2 {
        return None;
    }
    if !hours.bytes().all(|byte| byte.is_ascii_digit())
        || !minutes.bytes().all(|byte| byte.is_ascii_digit())
    {
        return None;
    }

    let hours: i64 = hours.parse().ok()?;
    let minutes: i64 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    Some(hours * 60 + minutes)
}

/// Closed span as `(start, end)` minutes. Open or malformed segments yield `None`.
pub fn closed_span(segment: &str) -> Option<(i64, i64)> {
    let mut parts = segment.split(OPEN_MARKER);
    let start = parts.next()?;
    let end = parts.next()?;
    if parts.next().is_some() || start.is_empty() || end.is_empty() {
        return None;
    }

    Some((minutes_from_string(start)?, minutes_from_string(end)?))
}

pub fn segment_minutes(segment: &str) -> i64 {
    closed_span(segment)
        .map(|(start, end)| (end - start).max(0))
        .unwrap_or(0)
}

pub fn total_minutes(intervals: &str) -> i64 {
    intervals.split(SEGMENT_SEPARATOR).map(segment_minutes).sum()
}

pub fn has_open_interval(intervals: &str) -> bool {
    intervals.ends_with(OPEN_MARKER)
}

pub fn open_interval(time_label: &str) -> String {
    format!("{time_label}{OPEN_MARKER}")
}

/// Closes a trailing open interval, or starts a new one.
pub fn punch(intervals: &mut String, time_label: &str) -> Punch {
    if has_open_interval(intervals) {
        intervals.push_str(time_label);
        return Punch::Closed;
    }

    if intervals.trim().is_empty() {
        *intervals = open_interval(time_label);
    } else {
        intervals.push(SEGMENT_SEPARATOR);
        intervals.push_str(&open_interval(time_label));
    }
    Punch::Opened
}

/// Checks a hand-edited interval string. Only the final segment may be open, and only when
/// `allow_open` is set.
pub fn validate(intervals: &str, allow_open: bool) -> Result<(), String> {
    if intervals.is_empty() {
        return Ok(());
    }

    let segments = intervals.split(SEGMENT_SEPARATOR).collect::<Vec<_>>();
    let last_index = segments.len() - 1;
    for (index, segment) in segments.iter().enumerate() {
        if closed_span(segment).is_some() {
            continue;
        }

        let is_open = segment
            .strip_suffix(OPEN_MARKER)
            .and_then(minutes_from_string)
            .is_some();
        if is_open && index == last_index {
            if allow_open {
                continue;
            }
            return Err(format!("open interval `{segment}` is only allowed on the last row"));
        }

        return Err(format!("malformed interval `{segment}`"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Punch, minutes_from_string, punch, total_minutes, validate};

    #[test]
    fn parses_clock_labels_in_range() {
        assert_eq!(minutes_from_string("00:00"), Some(0));
        assert_eq!(minutes_from_string("9:05"), Some(545));
        assert_eq!(minutes_from_string("23:59"), Some(1439));
    }

    #[test]
    fn rejects_malformed_clock_labels() {
        for value in ["24:00", "12:60", "1:5", "123:00", ":30", "ab:cd", "12-30", "", "+1:30", "12:3x"] {
            assert_eq!(minutes_from_string(value), None, "{value} should be rejected");
        }
    }

    #[test]
    fn sums_closed_segments_and_skips_the_rest() {
        assert_eq!(total_minutes("09:00-10:30 11:00-11:15"), 105);
        assert_eq!(total_minutes("09:00-10:00 13:00-"), 60);
        assert_eq!(total_minutes("garbage 09:00-09:30 25:00-26:00"), 30);
        assert_eq!(total_minutes("10:00-09:00"), 0);
        assert_eq!(total_minutes("09:00-10:00-11:00"), 0);
        assert_eq!(total_minutes(""), 0);
    }

    #[test]
    fn punching_alternates_between_open_and_closed() {
        let mut intervals = String::new();
        assert_eq!(punch(&mut intervals, "09:00"), Punch::Opened);
        assert_eq!(intervals, "09:00-");
        assert_eq!(punch(&mut intervals, "10:00"), Punch::Closed);
        assert_eq!(punch(&mut intervals, "11:00"), Punch::Opened);
        assert_eq!(intervals, "09:00-10:00 11:00-");
        assert_eq!(punch(&mut intervals, "11:45"), Punch::Closed);
        assert_eq!(intervals, "09:00-10:00 11:00-11:45");
        assert_eq!(total_minutes(&intervals), 105);
    }

    #[test]
    fn validation_only_allows_a_trailing_open_interval() {
        assert!(validate("09:00-10:00 11:00-", true).is_ok());
        assert!(validate("09:00-10:00 11:00-", false).is_err());
        assert!(validate("09:00- 11:00-12:00", true).is_err());
        assert!(validate("09:00-1000", true).is_err());
        assert!(validate("", false).is_ok());
    }
}
