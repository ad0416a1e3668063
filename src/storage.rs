use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::domain::{Label, Project};
use crate::ledger::{Ledger, LedgerEvent, Rollover, Selection, ToggleOutcome};

const PROJECTS_FILE: &str = "projects.json";
const LABELS_FILE: &str = "labels.json";
const PREFERENCES_FILE: &str = "preferences.toml";
const BACKUPS_DIR: &str = "backups";
const RECORD_EXTENSION: &str = "json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse JSON record {}: {source}", path.display())]
    JsonDecode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode JSON record: {0}")]
    JsonEncode(#[source] serde_json::Error),
    #[error("failed to encode TOML preferences: {0}")]
    TomlEncode(#[source] toml::ser::Error),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A data directory holding the canonical projects record, the label registry, sticky
/// preferences and one record per monthly backup.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn backups_dir(&self) -> PathBuf {
        self.root.join(BACKUPS_DIR)
    }

    pub fn init(&self) -> Result<(), StorageError> {
        let backups = self.backups_dir();
        fs::create_dir_all(&backups).map_err(|err| StorageError::io(&backups, err))
    }

    pub fn load(&self, date_label_format: &str) -> Result<Ledger, StorageError> {
        let mut ledger = Ledger::with_date_label_format(date_label_format);
        ledger.projects = read_json_or_default(&self.root.join(PROJECTS_FILE))?;
        ledger.labels = read_json_or_default::<Vec<Label>>(&self.root.join(LABELS_FILE))?;
        ledger.selection = self.load_selection()?;
        ledger.backups = self.load_backups()?;

        let events = ledger.reconcile_selection();
        if !events.is_empty() {
            debug!(?events, "selection reconciled after load");
        }
        Ok(ledger)
    }

    fn load_selection(&self) -> Result<Selection, StorageError> {
        let path = self.root.join(PREFERENCES_FILE);
        let Some(raw) = read_optional(&path)? else {
            return Ok(Selection::default());
        };

        let parsed = std::str::from_utf8(&raw)
            .map_err(|err| err.to_string())
            .and_then(|raw| toml::from_str(raw).map_err(|err| err.to_string()));
        match parsed {
            Ok(selection) => Ok(selection),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "ignoring malformed preferences");
                Ok(Selection::default())
            }
        }
    }

    /// Every `*.json` record in the backups directory, sorted by name. Malformed records are
    /// skipped.
    pub fn load_backups(&self) -> Result<Vec<Project>, StorageError> {
        let mut backups = Vec::new();
        for path in self.backup_record_paths()? {
            let raw = fs::read(&path).map_err(|err| StorageError::io(&path, err))?;
            match serde_json::from_slice::<Project>(&raw) {
                Ok(backup) => backups.push(backup),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping malformed backup record");
                }
            }
        }

        backups.sort_by(|left, right| left.name.cmp(&right.name));
        Ok(backups)
    }

    /// Writes the live projects, labels and selection. Backups are written separately.
    pub fn save(&self, ledger: &Ledger) -> Result<(), StorageError> {
        write_json(&self.root.join(PROJECTS_FILE), &ledger.projects)?;
        write_json(&self.root.join(LABELS_FILE), &ledger.labels)?;
        let preferences = toml::to_string_pretty(&ledger.selection).map_err(StorageError::TomlEncode)?;
        write_atomic(&self.root.join(PREFERENCES_FILE), preferences.as_bytes())
    }

    pub fn write_backup(&self, backup: &Project) -> Result<PathBuf, StorageError> {
        let path = self.backup_path(&backup.name);
        write_json(&path, backup)?;
        Ok(path)
    }

    pub fn delete_backup(&self, backup: &Project) -> Result<(), StorageError> {
        let path = self.backup_path(&backup.name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(&path, err)),
        }
    }

    /// Rewrites the backups directory so that it holds exactly `backups`. New records are
    /// written before stale ones are removed.
    pub fn replace_backups(&self, backups: &[Project]) -> Result<(), StorageError> {
        let mut written = HashSet::new();
        for backup in backups {
            written.insert(self.write_backup(backup)?);
        }

        for path in self.backup_record_paths()? {
            if written.contains(&path) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::io(&path, err)),
            }
        }
        Ok(())
    }

    /// Writes a rollover's backup record, then reloads the backup collection from disk. Only
    /// the write can fail; a failed reload keeps the in-memory copy.
    pub fn commit_rollover(&self, ledger: &mut Ledger, rollover: &Rollover) -> Result<(), StorageError> {
        let path = self.write_backup(&rollover.backup)?;
        info!(backup = %rollover.backup.name, path = %path.display(), "wrote monthly backup");

        match self.load_backups() {
            Ok(backups) => ledger.backups = backups,
            Err(err) => {
                warn!(error = %err, "backup was written but reloading backups failed");
                ledger.backups.retain(|backup| backup.name != rollover.backup.name);
                ledger.backups.push(rollover.backup.clone());
                ledger.backups.sort_by(|left, right| left.name.cmp(&right.name));
            }
        }
        Ok(())
    }

    /// Persists the result of a toggle. A failed backup write is reported as an event; the
    /// live ledger is saved either way.
    pub fn commit_toggle(
        &self,
        ledger: &mut Ledger,
        outcome: ToggleOutcome,
    ) -> Result<Vec<LedgerEvent>, StorageError> {
        let mut events = outcome.events;
        if let Some(rollover) = outcome.rollover {
            if let Err(err) = self.commit_rollover(ledger, &rollover) {
                error!(
                    backup = %rollover.backup.name,
                    error = %err,
                    "failed to write monthly backup; live rows were already cleared"
                );
                events.push(LedgerEvent::BackupFailed {
                    backup_name: rollover.backup.name.clone(),
                    reason: err.to_string(),
                });
            }
        }

        self.save(ledger)?;
        Ok(events)
    }

    fn backup_record_paths(&self) -> Result<Vec<PathBuf>, StorageError> {
        let dir = self.backups_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StorageError::io(&dir, err)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|err| StorageError::io(&dir, err))?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some(RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    fn backup_path(&self, name: &str) -> PathBuf {
        self.backups_dir()
            .join(format!("{}.{RECORD_EXTENSION}", backup_file_stem(name)))
    }
}

/// Percent-escapes path-hostile characters so that distinct names never share a file and
/// identical names always do.
fn backup_file_stem(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }

    let mut stem = String::with_capacity(name.len());
    for (index, ch) in name.chars().enumerate() {
        let escape = match ch {
            '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => true,
            '.' => index == 0,
            ch => ch.is_control(),
        };
        if escape {
            let mut buffer = [0; 4];
            for byte in ch.encode_utf8(&mut buffer).bytes() {
                stem.push_str(&format!("%{byte:02X}"));
            }
        } else {
            stem.push(ch);
        }
    }
    stem
}

/// Blank and missing files read as `None`.
fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path) {
        Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Ok(None),
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StorageError::io(path, err)),
    }
}

/// Missing and malformed records both load as the default value.
fn read_json_or_default<T>(path: &Path) -> Result<T, StorageError>
where
    T: DeserializeOwned + Default,
{
    let Some(raw) = read_optional(path)? else {
        return Ok(T::default());
    };

    match serde_json::from_slice(&raw) {
        Ok(value) => Ok(value),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring malformed record");
            Ok(T::default())
        }
    }
}

pub(crate) fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let mut payload = serde_json::to_vec_pretty(value).map_err(StorageError::JsonEncode)?;
    payload.push(b'\n');
    write_atomic(path, &payload)
}

/// Writes into a sibling temporary file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, payload: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| StorageError::io(parent, err))?;
        }
    }

    let mut temp_name = path.file_name().unwrap_or_default().to_os_string();
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let result = fs::File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(payload)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&temp_path, path));

    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(StorageError::io(path, err));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::{NaiveDate, NaiveDateTime};

    use super::{Store, backup_file_stem};
    use crate::domain::{DayRow, Project};
    use crate::ledger::{DEFAULT_DATE_LABEL_FORMAT, Ledger, LedgerEvent};

    fn at(year: i32, month: u32, day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .expect("date should be valid")
            .and_hms_opt(hour, 0, 0)
            .expect("time should be valid")
    }

    #[test]
    fn round_trips_projects_labels_and_selection() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(dir.path());
        let mut ledger = Ledger::new();
        let (project, _) = ledger.add_project("Writing").expect("project should be created");
        let label = ledger.add_label("Personal", "#00ffaa").expect("label should be created");
        ledger.set_project_label(&project, Some(&label)).expect("label should be set");
        ledger.lock_label(Some(&label)).expect("lock should work");
        let outcome = ledger.toggle(&project, at(2026, 10, 18, 9)).expect("toggle should work");
        store.commit_toggle(&mut ledger, outcome).expect("save should succeed");

        let loaded = store.load(DEFAULT_DATE_LABEL_FORMAT).expect("load should succeed");
        assert_eq!(loaded.projects, ledger.projects);
        assert_eq!(loaded.labels, ledger.labels);
        assert_eq!(loaded.selection, ledger.selection);
        assert!(loaded.backups.is_empty());
    }

    #[test]
    fn malformed_records_load_as_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        fs::write(dir.path().join("projects.json"), "{ not json").expect("write fixture");
        fs::write(dir.path().join("labels.json"), "[1, 2").expect("write fixture");
        fs::write(dir.path().join("preferences.toml"), "current_project_id = [").expect("write fixture");
        fs::create_dir_all(dir.path().join("backups")).expect("create backups dir");
        fs::write(dir.path().join("backups").join("broken.json"), "nope").expect("write fixture");

        let ledger = Store::new(dir.path())
            .load(DEFAULT_DATE_LABEL_FORMAT)
            .expect("load should degrade, not fail");
        assert!(ledger.projects.is_empty());
        assert!(ledger.labels.is_empty());
        assert!(ledger.backups.is_empty());
        assert_eq!(ledger.selection.current_project_id, None);
    }

    #[test]
    fn rollover_writes_a_backup_record_and_reloads_backups() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(dir.path());
        let mut ledger = Ledger::new();
        let (project, _) = ledger.add_project("Work").expect("project should be created");
        let outcome = ledger.toggle(&project, at(2026, 9, 30, 9)).expect("toggle should work");
        store.commit_toggle(&mut ledger, outcome).expect("save should succeed");

        let outcome = ledger.toggle(&project, at(2026, 10, 1, 9)).expect("toggle should work");
        let events = store.commit_toggle(&mut ledger, outcome).expect("save should succeed");
        assert!(matches!(events[0], LedgerEvent::RolledOver { .. }));
        assert!(dir.path().join("backups").join("Work September 26.json").exists());
        assert_eq!(ledger.backups.len(), 1);
        assert_eq!(ledger.backups[0].rows[0].date_label, "Sep 30, 2026");

        let reloaded = store.load(DEFAULT_DATE_LABEL_FORMAT).expect("load should succeed");
        assert_eq!(reloaded.backups, ledger.backups);
        assert_eq!(reloaded.projects[0].rows.len(), 1);
    }

    #[test]
    fn failed_backup_write_still_clears_live_rows() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(dir.path());
        fs::write(dir.path().join("backups"), "a file where the directory should be")
            .expect("write fixture");

        let mut ledger = Ledger::new();
        let (project, _) = ledger.add_project("Work").expect("project should be created");
        ledger.toggle(&project, at(2026, 9, 30, 9)).expect("toggle should work");
        let outcome = ledger.toggle(&project, at(2026, 10, 1, 9)).expect("toggle should work");

        let events = store.commit_toggle(&mut ledger, outcome).expect("live save should succeed");
        assert!(
            events
                .iter()
                .any(|event| matches!(event, LedgerEvent::BackupFailed { .. }))
        );
        assert!(ledger.backups.is_empty());
        let live = ledger.project(&project).expect("project exists");
        assert_eq!(live.rows.len(), 1);
        assert_eq!(live.rows[0].date_label, "Oct 1, 2026");
    }

    #[test]
    fn backup_names_collide_by_overwriting() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(dir.path());
        let mut first = crate::domain::Project::new("Work September 26");
        first.rows.push(crate::domain::DayRow::new("Sep 1, 2026", "09:00-10:00"));
        let second = crate::domain::Project::new("Work September 26");
        store.write_backup(&first).expect("write should succeed");
        store.write_backup(&second).expect("write should succeed");

        let backups = store.load_backups().expect("load should succeed");
        assert_eq!(backups, vec![second]);
    }

    #[test]
    fn escapes_backup_file_names_without_collisions() {
        assert_eq!(backup_file_stem("Work October 26"), "Work October 26");
        assert_eq!(backup_file_stem("A/B October 26"), "A%2FB October 26");
        assert_eq!(backup_file_stem("A_B October 26"), "A_B October 26");
        assert_eq!(backup_file_stem("A%2FB October 26"), "A%252FB October 26");
        assert_eq!(backup_file_stem(".hidden"), "%2Ehidden");
        assert_eq!(backup_file_stem(""), "%");
    }

    #[test]
    fn non_utf8_records_load_as_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let garbage = [0xff_u8, 0xfe, 0x00];
        fs::write(dir.path().join("projects.json"), garbage).expect("write fixture");
        fs::write(dir.path().join("labels.json"), garbage).expect("write fixture");
        fs::write(dir.path().join("preferences.toml"), garbage).expect("write fixture");
        let store = Store::new(dir.path());
        let mut kept = Project::new("Work September 26");
        kept.rows.push(DayRow::new("Sep 2, 2026", "09:00-10:00"));
        store.write_backup(&kept).expect("write should succeed");
        fs::write(dir.path().join("backups").join("bad.json"), garbage).expect("write fixture");

        let ledger = store
            .load(DEFAULT_DATE_LABEL_FORMAT)
            .expect("load should degrade, not fail");
        assert!(ledger.projects.is_empty());
        assert!(ledger.labels.is_empty());
        assert_eq!(ledger.selection.current_project_id, None);
        assert_eq!(ledger.backups, vec![kept]);
    }

    #[test]
    fn replacing_backups_keeps_distinct_names_apart() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(dir.path());
        let stale = Project::new("Old March 26");
        store.write_backup(&stale).expect("write should succeed");

        let mut slashed = Project::new("A/B October 26");
        slashed.rows.push(DayRow::new("Oct 3, 2026", "09:00-11:00"));
        let underscored = Project::new("A_B October 26");
        let mut ledger = Ledger::new();
        ledger.backups = vec![slashed.clone(), underscored.clone()];
        store.replace_backups(&ledger.backups).expect("replace should succeed");
        store.save(&ledger).expect("save should succeed");

        let reloaded = store.load(DEFAULT_DATE_LABEL_FORMAT).expect("load should succeed");
        assert_eq!(reloaded.backups, vec![slashed.clone(), underscored.clone()]);

        store.delete_backup(&slashed).expect("delete should succeed");
        store.delete_backup(&slashed).expect("deleting twice is fine");
        assert_eq!(store.load_backups().expect("load should succeed"), vec![underscored]);
    }

    #[test]
    fn failed_backup_reload_is_not_a_failed_write() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Store::new(dir.path());
        fs::create_dir_all(dir.path().join("backups").join("stray.json")).expect("create fixture");

        let mut ledger = Ledger::new();
        let (project, _) = ledger.add_project("Work").expect("project should be created");
        ledger.toggle(&project, at(2026, 9, 30, 9)).expect("toggle should work");
        let outcome = ledger.toggle(&project, at(2026, 10, 1, 9)).expect("toggle should work");

        let events = store.commit_toggle(&mut ledger, outcome).expect("live save should succeed");
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, LedgerEvent::BackupFailed { .. }))
        );
        assert!(dir.path().join("backups").join("Work September 26.json").exists());
        assert_eq!(ledger.backups.len(), 1);
        assert_eq!(ledger.backups[0].name, "Work September 26");
    }
}
