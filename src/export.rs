use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Label, Project, format_minutes};
use crate::ledger::{Ledger, LedgerEvent};
use crate::storage::{StorageError, write_atomic, write_json};

/// Everything needed to restore a ledger on another machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub projects: Vec<Project>,
    #[serde(default)]
    pub backup_projects: Vec<Project>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub locked_label_id: Option<String>,
}

impl Bundle {
    pub fn from_ledger(ledger: &Ledger) -> Self {
        Self {
            projects: ledger.projects.clone(),
            backup_projects: ledger.backups.clone(),
            labels: ledger.labels.clone(),
            locked_label_id: ledger.selection.locked_label_id.clone(),
        }
    }

    /// Replaces projects, backups, labels and the locked label wholesale.
    pub fn apply(self, ledger: &mut Ledger) -> Vec<LedgerEvent> {
        ledger.projects = self.projects;
        ledger.backups = self.backup_projects;
        ledger.labels = self.labels;
        ledger.selection.locked_label_id = self.locked_label_id;
        ledger.reconcile_selection()
    }
}

pub fn write_bundle(path: &Path, bundle: &Bundle) -> Result<(), StorageError> {
    write_json(path, bundle)?;
    info!(
        path = %path.display(),
        projects = bundle.projects.len(),
        backups = bundle.backup_projects.len(),
        labels = bundle.labels.len(),
        "exported bundle"
    );
    Ok(())
}

/// Unlike the canonical records, a malformed bundle is an error.
pub fn read_bundle(path: &Path) -> Result<Bundle, StorageError> {
    let raw = fs::read_to_string(path).map_err(|err| StorageError::io(path, err))?;
    serde_json::from_str(&raw).map_err(|source| StorageError::JsonDecode {
        path: path.to_path_buf(),
        source,
    })
}

/// One `name,total` header per project, then `date,"intervals",total,"annotation"` rows.
pub fn csv_report(projects: &[Project]) -> String {
    let mut out = String::new();
    for (index, project) in projects.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }

        out.push_str(&csv_escape(&project.name));
        out.push(',');
        out.push_str(&format_minutes(project.minutes()));
        out.push('\n');

        for row in &project.rows {
            let fields = [
                csv_escape(&row.date_label),
                csv_quote(&row.intervals),
                format_minutes(row.minutes()),
                csv_quote(&row.annotation),
            ];
            out.push_str(&fields.join(","));
            out.push('\n');
        }
    }
    out
}

pub fn write_csv(path: &Path, report: &str) -> Result<(), StorageError> {
    write_atomic(path, report.as_bytes())
}

fn csv_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn csv_escape(value: &str) -> String {
    let needs_quote = value.contains(',')
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');
    if needs_quote {
        csv_quote(value)
    } else {
        value.to_string()
    }
}
