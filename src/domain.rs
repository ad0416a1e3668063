use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};

use crate::intervals;

const ID_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: String,
    pub title: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayRow {
    pub id: String,
    pub date_label: String,
    #[serde(default)]
    pub intervals: String,
    #[serde(default)]
    pub annotation: String,
}

impl DayRow {
    pub fn new(date_label: impl Into<String>, intervals: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            date_label: date_label.into(),
            intervals: intervals.into(),
            annotation: String::new(),
        }
    }

    pub fn minutes(&self) -> i64 {
        intervals::total_minutes(&self.intervals)
    }

    pub fn is_open(&self) -> bool {
        intervals::has_open_interval(&self.intervals)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub rows: Vec<DayRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_id: Option<String>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            name: name.into(),
            rows: Vec::new(),
            label_id: None,
        }
    }

    pub fn minutes(&self) -> i64 {
        self.rows.iter().map(DayRow::minutes).sum()
    }

    /// A project is running while its last row ends with an open interval.
    pub fn is_running(&self) -> bool {
        self.rows.last().is_some_and(DayRow::is_open)
    }
}

pub fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_LEN)
        .map(char::from)
        .collect()
}

pub fn format_minutes(minutes: i64) -> String {
    let minutes = minutes.max(0);
    format!("{}h {}m", minutes / 60, minutes % 60)
}

/// Accepts `RRGGBB` with an optional leading `#` and returns `#RRGGBB`.
pub fn normalize_hex_color(input: &str) -> Option<String> {
    let digits = input.trim().trim_start_matches('#');
    if digits.len() != 6 || !digits.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("#{}", digits.to_ascii_uppercase()))
}

pub fn rgb_from_hex(color: &str) -> Option<(u8, u8, u8)> {
    let normalized = normalize_hex_color(color)?;
    let value = u32::from_str_radix(&normalized[1..], 16).ok()?;
    Some(((value >> 16) as u8, (value >> 8) as u8, value as u8))
}

#[cfg(test)]
mod tests {
    use super::{DayRow, Project, format_minutes, normalize_hex_color, rgb_from_hex};

    #[test]
    fn formats_minutes_as_hours_and_minutes() {
        assert_eq!(format_minutes(0), "0h 0m");
        assert_eq!(format_minutes(59), "0h 59m");
        assert_eq!(format_minutes(125), "2h 5m");
        assert_eq!(format_minutes(-10), "0h 0m");
    }

    #[test]
    fn normalizes_hex_colors() {
        assert_eq!(normalize_hex_color("#ff8800"), Some("#FF8800".to_string()));
        assert_eq!(normalize_hex_color("00aa11"), Some("#00AA11".to_string()));
        assert_eq!(normalize_hex_color("#fff"), None);
        assert_eq!(normalize_hex_color("#gg0000"), None);
        assert_eq!(rgb_from_hex("#102030"), Some((0x10, 0x20, 0x30)));
    }

    #[test]
    fn only_the_last_row_decides_running_state() {
        let mut project = Project::new("Work");
        assert!(!project.is_running());
        project.rows.push(DayRow::new("Oct 17, 2026", "09:00-"));
        project.rows.push(DayRow::new("Oct 18, 2026", "09:00-10:00"));
        assert!(!project.is_running());
        assert_eq!(project.minutes(), 60);
    }

    #[test]
    fn serializes_with_camel_case_keys() {
        let mut project = Project::new("Work");
        project.label_id = Some("lbl".to_string());
        project.rows.push(DayRow::new("Oct 18, 2026", "09:00-"));
        let json = serde_json::to_value(&project).expect("project should serialize");
        assert_eq!(json["labelId"], "lbl");
        assert_eq!(json["rows"][0]["dateLabel"], "Oct 18, 2026");
    }
}
