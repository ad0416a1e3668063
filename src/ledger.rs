use std::fmt::{Display, Formatter};

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::domain::{DayRow, Label, Project, format_minutes, generate_id, normalize_hex_color};
use crate::intervals::{self, Punch};

pub const DEFAULT_DATE_LABEL_FORMAT: &str = "%b %-d, %Y";
pub const TIME_LABEL_FORMAT: &str = "%H:%M";
const BACKUP_SUFFIX_FORMAT: &str = "%B %y";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("backup not found: {0}")]
    BackupNotFound(String),
    #[error("label not found: {0}")]
    LabelNotFound(String),
    #[error("row {index} not found in project {project}")]
    RowNotFound { project: String, index: usize },
    #[error("{0} is required")]
    Required(&'static str),
    #[error("invalid color `{0}`: expected six hex digits such as #3A7BD5")]
    InvalidColor(String),
    #[error("invalid intervals: {0}")]
    InvalidIntervals(String),
    #[error("no project selected")]
    NoSelection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDirection {
    Next,
    Previous,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    DayStarted {
        project: String,
        date_label: String,
    },
    IntervalOpened {
        project: String,
        time_label: String,
    },
    IntervalClosed {
        project: String,
        time_label: String,
        row_minutes: i64,
    },
    RolledOver {
        project: String,
        backup_name: String,
        rows: usize,
    },
    BackupFailed {
        backup_name: String,
        reason: String,
    },
    SelectionChanged {
        project_id: Option<String>,
    },
    LabelCleared {
        label_id: String,
        projects: usize,
    },
}

impl Display for LedgerEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerEvent::DayStarted {
                project,
                date_label,
            } => write!(f, "{project}: new day {date_label}"),
            LedgerEvent::IntervalOpened {
                project,
                time_label,
            } => write!(f, "{project}: started at {time_label}"),
            LedgerEvent::IntervalClosed {
                project,
                time_label,
                row_minutes,
            } => write!(
                f,
                "{project}: stopped at {time_label} (today {})",
                format_minutes(*row_minutes)
            ),
            LedgerEvent::RolledOver {
                project,
                backup_name,
                rows,
            } => write!(f, "{project}: moved {rows} rows to backup `{backup_name}`"),
            LedgerEvent::BackupFailed {
                backup_name,
                reason,
            } => write!(f, "failed to write backup `{backup_name}`: {reason}"),
            LedgerEvent::SelectionChanged {
                project_id: Some(id),
            } => write!(f, "selected project {id}"),
            LedgerEvent::SelectionChanged { project_id: None } => {
                write!(f, "no project selected")
            }
            LedgerEvent::LabelCleared { label_id, projects } => {
                write!(f, "label {label_id} removed from {projects} projects")
            }
        }
    }
}

/// Rows taken out of a live project, waiting to be written as a backup record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollover {
    pub backup: Project,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub events: Vec<LedgerEvent>,
    pub rollover: Option<Rollover>,
}

/// Sticky selection state, remembered across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_label_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Ledger {
    pub projects: Vec<Project>,
    pub backups: Vec<Project>,
    pub labels: Vec<Label>,
    pub selection: Selection,
    date_label_format: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::with_date_label_format(DEFAULT_DATE_LABEL_FORMAT)
    }

    pub fn with_date_label_format(format: impl Into<String>) -> Self {
        Self {
            projects: Vec::new(),
            backups: Vec::new(),
            labels: Vec::new(),
            selection: Selection::default(),
            date_label_format: format.into(),
        }
    }

    pub fn date_label(&self, now: NaiveDateTime) -> String {
        now.format(&self.date_label_format).to_string()
    }

    pub fn parse_date_label(&self, label: &str) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(label, &self.date_label_format).ok()
    }

    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    fn project_mut(&mut self, id: &str) -> Result<&mut Project, LedgerError> {
        self.projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or_else(|| LedgerError::ProjectNotFound(id.to_string()))
    }

    pub fn backup(&self, id: &str) -> Option<&Project> {
        self.backups.iter().find(|backup| backup.id == id)
    }

    pub fn label(&self, id: &str) -> Option<&Label> {
        self.labels.iter().find(|label| label.id == id)
    }

    fn label_mut(&mut self, id: &str) -> Result<&mut Label, LedgerError> {
        self.labels
            .iter_mut()
            .find(|label| label.id == id)
            .ok_or_else(|| LedgerError::LabelNotFound(id.to_string()))
    }

    pub fn current_project(&self) -> Option<&Project> {
        self.selection
            .current_project_id
            .as_deref()
            .and_then(|id| self.project(id))
    }

    pub fn resolve_project(&self, query: &str) -> Result<String, LedgerError> {
        resolve_by_id_or_name(&self.projects, query, |project| &project.name)
            .ok_or_else(|| LedgerError::ProjectNotFound(query.to_string()))
    }

    pub fn resolve_backup(&self, query: &str) -> Result<String, LedgerError> {
        resolve_by_id_or_name(&self.backups, query, |backup| &backup.name)
            .ok_or_else(|| LedgerError::BackupNotFound(query.to_string()))
    }

    pub fn resolve_label(&self, query: &str) -> Result<String, LedgerError> {
        self.labels
            .iter()
            .find(|label| label.id == query)
            .or_else(|| {
                self.labels
                    .iter()
                    .find(|label| label.title.eq_ignore_ascii_case(query))
            })
            .map(|label| label.id.clone())
            .ok_or_else(|| LedgerError::LabelNotFound(query.to_string()))
    }

    pub fn add_project(&mut self, name: &str) -> Result<(String, Vec<LedgerEvent>), LedgerError> {
        let name = required_text(name, "project name")?;
        let project = Project::new(name);
        let id = project.id.clone();
        self.projects.push(project);

        let mut events = Vec::new();
        if self.current_project().is_none() {
            events.extend(self.set_current(Some(id.clone())));
        }
        Ok((id, events))
    }

    pub fn rename_project(&mut self, id: &str, name: &str) -> Result<(), LedgerError> {
        let name = required_text(name, "project name")?;
        self.project_mut(id)?.name = name;
        Ok(())
    }

    pub fn delete_project(&mut self, id: &str) -> Result<Vec<LedgerEvent>, LedgerError> {
        let index = self
            .projects
            .iter()
            .position(|project| project.id == id)
            .ok_or_else(|| LedgerError::ProjectNotFound(id.to_string()))?;
        self.projects.remove(index);

        if self.selection.current_project_id.as_deref() == Some(id) {
            return Ok(self.select_first_candidate());
        }
        Ok(Vec::new())
    }

    pub fn select_project(&mut self, id: &str) -> Result<Vec<LedgerEvent>, LedgerError> {
        if self.project(id).is_none() {
            return Err(LedgerError::ProjectNotFound(id.to_string()));
        }
        Ok(self.set_current(Some(id.to_string())).into_iter().collect())
    }

    pub fn set_project_label(
        &mut self,
        project_id: &str,
        label_id: Option<&str>,
    ) -> Result<(), LedgerError> {
        if let Some(label_id) = label_id {
            if self.label(label_id).is_none() {
                return Err(LedgerError::LabelNotFound(label_id.to_string()));
            }
        }
        self.project_mut(project_id)?.label_id = label_id.map(str::to_string);
        Ok(())
    }

    pub fn set_row_annotation(
        &mut self,
        project_id: &str,
        index: usize,
        annotation: &str,
    ) -> Result<(), LedgerError> {
        let project = self.project_mut(project_id)?;
        let row = project
            .rows
            .get_mut(index)
            .ok_or_else(|| LedgerError::RowNotFound {
                project: project_id.to_string(),
                index,
            })?;
        row.annotation = annotation.trim().to_string();
        Ok(())
    }

    pub fn set_row_intervals(
        &mut self,
        project_id: &str,
        index: usize,
        value: &str,
    ) -> Result<(), LedgerError> {
        let project = self.project_mut(project_id)?;
        let is_last_row = index + 1 == project.rows.len();
        let row = project
            .rows
            .get_mut(index)
            .ok_or_else(|| LedgerError::RowNotFound {
                project: project_id.to_string(),
                index,
            })?;

        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        intervals::validate(&value, is_last_row).map_err(LedgerError::InvalidIntervals)?;
        row.intervals = value;
        Ok(())
    }

    pub fn toggle_current(&mut self, now: NaiveDateTime) -> Result<ToggleOutcome, LedgerError> {
        let id = self
            .current_project()
            .map(|project| project.id.clone())
            .ok_or(LedgerError::NoSelection)?;
        self.toggle(&id, now)
    }

    /// Presses the timer button of a project at `now` (local wall-clock time).
    pub fn toggle(
        &mut self,
        project_id: &str,
        now: NaiveDateTime,
    ) -> Result<ToggleOutcome, LedgerError> {
        let today_label = self.date_label(now);
        let time_label = now.format(TIME_LABEL_FORMAT).to_string();
        let last_date = self
            .project(project_id)
            .ok_or_else(|| LedgerError::ProjectNotFound(project_id.to_string()))?
            .rows
            .last()
            .filter(|row| row.date_label != today_label)
            .and_then(|row| {
                let parsed = self.parse_date_label(&row.date_label);
                if parsed.is_none() {
                    debug!(date_label = %row.date_label, "last row date does not parse; skipping rollover check");
                }
                parsed
            });

        let project = self.project_mut(project_id)?;
        let mut outcome = ToggleOutcome::default();

        if let Some(last_date) = last_date {
            if is_other_month(last_date, now.date()) {
                let backup = Project {
                    id: generate_id(),
                    name: backup_name(&project.name, last_date),
                    rows: std::mem::take(&mut project.rows),
                    label_id: project.label_id.clone(),
                };
                info!(
                    project = %project.name,
                    backup = %backup.name,
                    rows = backup.rows.len(),
                    "rolling project over into monthly backup"
                );
                outcome.events.push(LedgerEvent::RolledOver {
                    project: project.name.clone(),
                    backup_name: backup.name.clone(),
                    rows: backup.rows.len(),
                });
                outcome.rollover = Some(Rollover { backup });
            }
        }

        match project
            .rows
            .last_mut()
            .filter(|row| row.date_label == today_label)
        {
            Some(row) => {
                match intervals::punch(&mut row.intervals, &time_label) {
                    Punch::Opened => outcome.events.push(LedgerEvent::IntervalOpened {
                        project: project.name.clone(),
                        time_label,
                    }),
                    Punch::Closed => outcome.events.push(LedgerEvent::IntervalClosed {
                        project: project.name.clone(),
                        time_label,
                        row_minutes: row.minutes(),
                    }),
                }
            }
            None => {
                project.rows.push(DayRow::new(
                    today_label.clone(),
                    intervals::open_interval(&time_label),
                ));
                outcome.events.push(LedgerEvent::DayStarted {
                    project: project.name.clone(),
                    date_label: today_label,
                });
                outcome.events.push(LedgerEvent::IntervalOpened {
                    project: project.name.clone(),
                    time_label,
                });
            }
        }

        debug!(project = %project.name, events = outcome.events.len(), "toggled project");
        Ok(outcome)
    }

    /// Projects taking part in cycling: every project, or only the locked label's members.
    pub fn cycle_candidates(&self) -> Vec<&Project> {
        match self.selection.locked_label_id.as_deref() {
            Some(label_id) => self
                .projects
                .iter()
                .filter(|project| project.label_id.as_deref() == Some(label_id))
                .collect(),
            None => self.projects.iter().collect(),
        }
    }

    pub fn cycle_project(&mut self, direction: CycleDirection) -> Option<LedgerEvent> {
        let current = self.selection.current_project_id.clone()?;
        let candidates = self.cycle_candidates();
        let count = candidates.len();
        if count < 2 {
            return None;
        }

        let next = match candidates.iter().position(|project| project.id == current) {
            Some(index) => match direction {
                CycleDirection::Next => (index + 1) % count,
                CycleDirection::Previous => (index + count - 1) % count,
            },
            None => 0,
        };
        let next_id = candidates[next].id.clone();
        self.set_current(Some(next_id))
    }

    pub fn add_label(&mut self, title: &str, color: &str) -> Result<String, LedgerError> {
        let title = required_text(title, "label title")?;
        let color =
            normalize_hex_color(color).ok_or_else(|| LedgerError::InvalidColor(color.to_string()))?;
        let id = generate_id();
        self.labels.push(Label {
            id: id.clone(),
            title,
            color,
        });
        Ok(id)
    }

    pub fn rename_label(&mut self, id: &str, title: &str) -> Result<(), LedgerError> {
        let title = required_text(title, "label title")?;
        self.label_mut(id)?.title = title;
        Ok(())
    }

    pub fn recolor_label(&mut self, id: &str, color: &str) -> Result<(), LedgerError> {
        let color =
            normalize_hex_color(color).ok_or_else(|| LedgerError::InvalidColor(color.to_string()))?;
        self.label_mut(id)?.color = color;
        Ok(())
    }

    /// Removes a label and clears every reference to it, in live and backup projects alike.
    pub fn delete_label(&mut self, id: &str) -> Result<Vec<LedgerEvent>, LedgerError> {
        let index = self
            .labels
            .iter()
            .position(|label| label.id == id)
            .ok_or_else(|| LedgerError::LabelNotFound(id.to_string()))?;
        self.labels.remove(index);

        let mut cleared = 0;
        for project in self.projects.iter_mut().chain(self.backups.iter_mut()) {
            if project.label_id.as_deref() == Some(id) {
                project.label_id = None;
                cleared += 1;
            }
        }

        let mut events = vec![LedgerEvent::LabelCleared {
            label_id: id.to_string(),
            projects: cleared,
        }];
        if self.selection.locked_label_id.as_deref() == Some(id) {
            self.selection.locked_label_id = None;
        }
        events.extend(self.reconcile_selection());
        Ok(events)
    }

    pub fn lock_label(&mut self, label_id: Option<&str>) -> Result<Vec<LedgerEvent>, LedgerError> {
        if let Some(label_id) = label_id {
            if self.label(label_id).is_none() {
                return Err(LedgerError::LabelNotFound(label_id.to_string()));
            }
        }
        self.selection.locked_label_id = label_id.map(str::to_string);

        let current_is_candidate = self.current_project().is_some_and(|project| {
            self.cycle_candidates()
                .iter()
                .any(|candidate| candidate.id == project.id)
        });
        if current_is_candidate {
            return Ok(Vec::new());
        }
        Ok(self.select_first_candidate())
    }

    pub fn delete_backup(&mut self, id: &str) -> Result<Project, LedgerError> {
        let index = self
            .backups
            .iter()
            .position(|backup| backup.id == id)
            .ok_or_else(|| LedgerError::BackupNotFound(id.to_string()))?;
        Ok(self.backups.remove(index))
    }

    /// Drops selection ids whose referent no longer exists and picks a fallback project.
    pub fn reconcile_selection(&mut self) -> Vec<LedgerEvent> {
        if let Some(label_id) = self.selection.locked_label_id.clone() {
            if self.label(&label_id).is_none() {
                self.selection.locked_label_id = None;
            }
        }

        if self.current_project().is_some() {
            return Vec::new();
        }
        self.select_first_candidate()
    }

    fn select_first_candidate(&mut self) -> Vec<LedgerEvent> {
        let fallback = self
            .cycle_candidates()
            .first()
            .map(|project| project.id.clone())
            .or_else(|| self.projects.first().map(|project| project.id.clone()));
        self.set_current(fallback).into_iter().collect()
    }

    fn set_current(&mut self, project_id: Option<String>) -> Option<LedgerEvent> {
        if self.selection.current_project_id == project_id {
            return None;
        }
        self.selection.current_project_id = project_id.clone();
        Some(LedgerEvent::SelectionChanged { project_id })
    }
}

pub fn backup_name(project_name: &str, last_date: NaiveDate) -> String {
    format!("{project_name} {}", last_date.format(BACKUP_SUFFIX_FORMAT))
}

fn is_other_month(left: NaiveDate, right: NaiveDate) -> bool {
    (left.year(), left.month()) != (right.year(), right.month())
}

fn resolve_by_id_or_name(
    projects: &[Project],
    query: &str,
    name: impl Fn(&Project) -> &String,
) -> Option<String> {
    projects
        .iter()
        .find(|project| project.id == query)
        .or_else(|| {
            projects
                .iter()
                .find(|project| name(project).eq_ignore_ascii_case(query))
        })
        .map(|project| project.id.clone())
}

fn required_text(input: &str, field_name: &'static str) -> Result<String, LedgerError> {
    let value = input.trim();
    if value.is_empty() {
        Err(LedgerError::Required(field_name))
    } else {
        Ok(value.to_string())
    }
}
