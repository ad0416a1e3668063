use std::env;
use std::fs;
use std::path::PathBuf;

pub const DATA_DIR_ENV: &str = "CHRONOS_PUNCH_DIR";
const APP_DIR_NAME: &str = "chronos_punchcard";

pub fn resolve_data_dir(cli_path: Option<PathBuf>) -> PathBuf {
	if let Some(path) = cli_path {
		return absolutize(path);
	}

	if let Some(path) = env::var_os(DATA_DIR_ENV) {
		let path = PathBuf::from(path);
		if !path.as_os_str().is_empty() {
			return absolutize(path);
		}
	}

	default_data_dir()
}

fn default_data_dir() -> PathBuf {
	#[cfg(target_os = "windows")]
	{
		if let Some(path) = env::var_os("LOCALAPPDATA") {
			return PathBuf::from(path).join(APP_DIR_NAME);
		}
	}

	if let Some(path) = env::var_os("XDG_DATA_HOME") {
		return PathBuf::from(path).join(APP_DIR_NAME);
	}

	if let Some(path) = env::var_os("HOME") {
		return PathBuf::from(path)
			.join(".local")
			.join("share")
			.join(APP_DIR_NAME);
	}

	absolutize(PathBuf::from(format!(".{APP_DIR_NAME}")))
}

fn absolutize(path: PathBuf) -> PathBuf {
	let path = if path.is_absolute() {
		path
	} else if let Ok(cwd) = env::current_dir() {
		cwd.join(path)
	} else {
		path
	};

	if path.exists() {
		fs::canonicalize(&path).unwrap_or(path)
	} else {
		path
	}
}

#[cfg(test)]
mod tests {
	use super::resolve_data_dir;

	#[test]
	fn explicit_path_wins_and_is_absolute() {
		let dir = tempfile::tempdir().expect("temp dir");
		let resolved = resolve_data_dir(Some(dir.path().to_path_buf()));
		assert!(resolved.is_absolute());
		assert_eq!(
			resolved,
			std::fs::canonicalize(dir.path()).expect("temp dir should canonicalize")
		);
	}

	#[test]
	fn relative_paths_are_anchored_at_the_working_directory() {
		let resolved = resolve_data_dir(Some("punch-data-not-created".into()));
		assert!(resolved.is_absolute());
		assert!(resolved.ends_with("punch-data-not-created"));
	}
}
