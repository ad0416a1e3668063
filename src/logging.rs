use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

const LOG_DIR: &str = "logs";
const LOG_PREFIX: &str = "punchcard";
const MAX_LOG_FILES: usize = 5;

/// Logs go to a daily rolling file under `<data_dir>/logs`, and to stderr when `show_stderr`
/// is set. The dashboard owns the terminal, so it never logs to stderr.
pub fn enable_logging(data_dir: &Path, filter: &str, show_stderr: bool) -> Result<()> {
	let appender = tracing_appender::rolling::Builder::new()
		.rotation(Rotation::DAILY)
		.max_log_files(MAX_LOG_FILES)
		.filename_prefix(LOG_PREFIX)
		.filename_suffix("log")
		.build(data_dir.join(LOG_DIR))?;

	let stderr = std::io::stderr.with_filter(move |_| show_stderr);

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_new(filter).with_context(|| format!("invalid log filter `{filter}`"))?)
		.with_ansi(false)
		.with_writer(stderr.and(appender))
		.compact()
		.try_init()
		.map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::enable_logging;

	#[test]
	fn invalid_filters_are_rejected_before_installing() {
		let dir = tempfile::tempdir().expect("temp dir");
		let err = enable_logging(dir.path(), "chronos_punchcard=notalevel", false).expect_err("filter should be rejected");
		assert!(err.to_string().contains("invalid log filter"));
	}
}
