mod config;
mod data_dir;
mod domain;
mod export;
mod intervals;
mod ledger;
mod logging;
mod storage;
mod ui;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::{CONFIG_FILE, load_config, write_default_config};
use crate::data_dir::resolve_data_dir;
use crate::domain::{Project, format_minutes};
use crate::export::{Bundle, csv_report, read_bundle, write_bundle, write_csv};
use crate::ledger::{CycleDirection, Ledger, LedgerError, LedgerEvent};
use crate::logging::enable_logging;
use crate::storage::Store;
use crate::ui::run_dashboard;

#[derive(Debug, Parser)]
#[command(name = "chronos-punchcard", about = "Punch-clock time tracker")]
struct Cli {
	#[arg(long, global = true)]
	data_dir: Option<PathBuf>,
	/// Also print logs to stderr.
	#[arg(short, long, global = true)]
	verbose: bool,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Init,
	Dashboard,
	Projects,
	Show {
		#[arg(long)]
		project: Option<String>,
	},
	AddProject {
		#[arg(long)]
		name: String,
	},
	RenameProject {
		#[arg(long)]
		project: String,
		#[arg(long)]
		name: String,
	},
	DeleteProject {
		#[arg(long)]
		project: String,
	},
	Select {
		#[arg(long)]
		project: String,
	},
	Cycle {
		#[arg(long)]
		previous: bool,
	},
	/// Start or stop the timer of a project (the selected one by default).
	Toggle {
		#[arg(long)]
		project: Option<String>,
	},
	Annotate {
		#[arg(long)]
		project: String,
		#[arg(long)]
		row: usize,
		#[arg(long)]
		text: String,
	},
	EditRow {
		#[arg(long)]
		project: String,
		#[arg(long)]
		row: usize,
		#[arg(long)]
		intervals: String,
	},
	Labels,
	AddLabel {
		#[arg(long)]
		title: String,
		#[arg(long)]
		color: String,
	},
	RenameLabel {
		#[arg(long)]
		label: String,
		#[arg(long)]
		title: String,
	},
	RecolorLabel {
		#[arg(long)]
		label: String,
		#[arg(long)]
		color: String,
	},
	DeleteLabel {
		#[arg(long)]
		label: String,
	},
	/// Assign a label to a project, or clear it when `--label` is omitted.
	AssignLabel {
		#[arg(long)]
		project: String,
		#[arg(long)]
		label: Option<String>,
	},
	/// Restrict cycling to one label, or lift the restriction when `--label` is omitted.
	LockLabel {
		#[arg(long)]
		label: Option<String>,
	},
	Backups,
	ShowBackup {
		#[arg(long)]
		backup: String,
	},
	DeleteBackup {
		#[arg(long)]
		backup: String,
	},
	Export {
		#[arg(long)]
		output: PathBuf,
	},
	/// Replace every project, backup and label with the content of a bundle.
	Import {
		#[arg(long)]
		input: PathBuf,
		#[arg(long)]
		yes: bool,
	},
	ExportCsv {
		#[arg(long)]
		output: Option<PathBuf>,
		#[arg(long)]
		include_backups: bool,
	},
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err:#}");
		std::process::exit(1);
	}
}

fn run() -> Result<()> {
	let cli = Cli::parse();
	let command = cli.command.unwrap_or(Command::Dashboard);

	let data_dir = resolve_data_dir(cli.data_dir);
	let config = load_config(&data_dir.join(CONFIG_FILE))?;
	let show_stderr = cli.verbose && !matches!(command, Command::Dashboard);
	enable_logging(&data_dir, &config.effective_log_filter(), show_stderr)?;

	let store = Store::new(&data_dir);
	let mut ledger = store
		.load(&config.date_label_format)
		.with_context(|| format!("failed to load ledger from {}", data_dir.display()))?;

	match command {
		Command::Init => {
			store.init()?;
			if write_default_config(&data_dir.join(CONFIG_FILE))? {
				info!(path = %data_dir.display(), "wrote default config");
			}
			store.save(&ledger)?;
			println!("initialized data directory at {}", store.root().display());
		}
		Command::Dashboard => {
			run_dashboard(&mut ledger, &store)?;
		}
		Command::Projects => {
			print_projects(&ledger);
		}
		Command::Show { project } => {
			let id = match project {
				Some(query) => ledger.resolve_project(&query)?,
				None => ledger
					.current_project()
					.map(|project| project.id.clone())
					.ok_or(LedgerError::NoSelection)?,
			};
			if let Some(project) = ledger.project(&id) {
				print_rows(project);
			}
		}
		Command::AddProject { name } => {
			let (id, events) = ledger.add_project(&name)?;
			store.save(&ledger)?;
			println!("created project {id}");
			print_events(&events);
		}
		Command::RenameProject { project, name } => {
			let id = ledger.resolve_project(&project)?;
			ledger.rename_project(&id, &name)?;
			store.save(&ledger)?;
			println!("renamed project {id}");
		}
		Command::DeleteProject { project } => {
			let id = ledger.resolve_project(&project)?;
			let events = ledger.delete_project(&id)?;
			store.save(&ledger)?;
			println!("deleted project {id}");
			print_events(&events);
		}
		Command::Select { project } => {
			let id = ledger.resolve_project(&project)?;
			let events = ledger.select_project(&id)?;
			store.save(&ledger)?;
			print_events(&events);
		}
		Command::Cycle { previous } => {
			let direction = if previous {
				CycleDirection::Previous
			} else {
				CycleDirection::Next
			};
			match ledger.cycle_project(direction) {
				Some(event) => {
					store.save(&ledger)?;
					print_events(&[event]);
				}
				None => println!("nothing to cycle to"),
			}
		}
		Command::Toggle { project } => {
			let now = Local::now().naive_local();
			let outcome = match project {
				Some(query) => {
					let id = ledger.resolve_project(&query)?;
					ledger.toggle(&id, now)?
				}
				None => ledger.toggle_current(now)?,
			};
			let events = store.commit_toggle(&mut ledger, outcome)?;
			print_events(&events);
		}
		Command::Annotate { project, row, text } => {
			let id = ledger.resolve_project(&project)?;
			ledger.set_row_annotation(&id, row, &text)?;
			store.save(&ledger)?;
			println!("annotated row {row}");
		}
		Command::EditRow {
			project,
			row,
			intervals,
		} => {
			let id = ledger.resolve_project(&project)?;
			ledger.set_row_intervals(&id, row, &intervals)?;
			store.save(&ledger)?;
			println!("updated row {row}");
		}
		Command::Labels => {
			print_labels(&ledger);
		}
		Command::AddLabel { title, color } => {
			let id = ledger.add_label(&title, &color)?;
			store.save(&ledger)?;
			println!("created label {id}");
		}
		Command::RenameLabel { label, title } => {
			let id = ledger.resolve_label(&label)?;
			ledger.rename_label(&id, &title)?;
			store.save(&ledger)?;
			println!("renamed label {id}");
		}
		Command::RecolorLabel { label, color } => {
			let id = ledger.resolve_label(&label)?;
			ledger.recolor_label(&id, &color)?;
			store.save(&ledger)?;
			println!("recolored label {id}");
		}
		Command::DeleteLabel { label } => {
			let id = ledger.resolve_label(&label)?;
			let events = ledger.delete_label(&id)?;
			store.save(&ledger)?;
			store.replace_backups(&ledger.backups)?;
			print_events(&events);
		}
		Command::AssignLabel { project, label } => {
			let project_id = ledger.resolve_project(&project)?;
			let label_id = label.map(|query| ledger.resolve_label(&query)).transpose()?;
			ledger.set_project_label(&project_id, label_id.as_deref())?;
			store.save(&ledger)?;
			println!("updated label of project {project_id}");
		}
		Command::LockLabel { label } => {
			let label_id = label.map(|query| ledger.resolve_label(&query)).transpose()?;
			let events = ledger.lock_label(label_id.as_deref())?;
			store.save(&ledger)?;
			match label_id {
				Some(id) => println!("cycling restricted to label {id}"),
				None => println!("cycling over all projects"),
			}
			print_events(&events);
		}
		Command::Backups => {
			print_backups(&ledger);
		}
		Command::ShowBackup { backup } => {
			let id = ledger.resolve_backup(&backup)?;
			if let Some(backup) = ledger.backup(&id) {
				print_rows(backup);
			}
		}
		Command::DeleteBackup { backup } => {
			let id = ledger.resolve_backup(&backup)?;
			let removed = ledger.delete_backup(&id)?;
			store.delete_backup(&removed)?;
			println!("deleted backup {}", removed.name);
		}
		Command::Export { output } => {
			write_bundle(&output, &Bundle::from_ledger(&ledger))?;
			println!("exported bundle to {}", output.display());
		}
		Command::Import { input, yes } => {
			let bundle = read_bundle(&input)?;
			if !yes {
				bail!(
					"importing {} would replace {} projects, {} backups and {} labels with {}, {} and {}; rerun with --yes to confirm",
					input.display(),
					ledger.projects.len(),
					ledger.backups.len(),
					ledger.labels.len(),
					bundle.projects.len(),
					bundle.backup_projects.len(),
					bundle.labels.len()
				);
			}

			let events = bundle.apply(&mut ledger);
			store.replace_backups(&ledger.backups)?;
			store.save(&ledger)?;
			info!(path = %input.display(), "imported bundle");
			println!(
				"imported {} projects, {} backups and {} labels",
				ledger.projects.len(),
				ledger.backups.len(),
				ledger.labels.len()
			);
			print_events(&events);
		}
		Command::ExportCsv {
			output,
			include_backups,
		} => {
			let mut projects = ledger.projects.clone();
			if include_backups || config.csv_include_backups {
				projects.extend(ledger.backups.iter().cloned());
			}
			let report = csv_report(&projects);
			match output {
				Some(path) => {
					write_csv(&path, &report)?;
					println!("exported CSV to {}", path.display());
				}
				None => print!("{report}"),
			}
		}
	}

	Ok(())
}

fn print_events(events: &[LedgerEvent]) {
	for event in events {
		println!("{event}");
	}
}

fn print_projects(ledger: &Ledger) {
	if ledger.projects.is_empty() {
		println!("no projects yet");
		return;
	}

	let current = ledger.selection.current_project_id.as_deref();
	for project in &ledger.projects {
		let label = project
			.label_id
			.as_deref()
			.and_then(|id| ledger.label(id))
			.map(|label| label.title.clone())
			.unwrap_or_else(|| "-".to_string());
		println!(
			"{} {} | {} | {} | {}{}",
			if current == Some(project.id.as_str()) { "*" } else { " " },
			project.id,
			project.name,
			label,
			format_minutes(project.minutes()),
			if project.is_running() { " | running" } else { "" }
		);
	}
}

fn print_rows(project: &Project) {
	println!("{} | total {}", project.name, format_minutes(project.minutes()));
	if project.rows.is_empty() {
		println!("no rows yet");
		return;
	}

	for (index, row) in project.rows.iter().enumerate() {
		println!(
			"{:>3}. {} | {} | {}{}",
			index,
			row.date_label,
			row.intervals,
			format_minutes(row.minutes()),
			if row.annotation.is_empty() {
				String::new()
			} else {
				format!(" | {}", row.annotation)
			}
		);
	}
}

fn print_labels(ledger: &Ledger) {
	if ledger.labels.is_empty() {
		println!("no labels yet");
		return;
	}

	let locked = ledger.selection.locked_label_id.as_deref();
	for label in &ledger.labels {
		let members = ledger
			.projects
			.iter()
			.filter(|project| project.label_id.as_deref() == Some(label.id.as_str()))
			.count();
		println!(
			"{} {} | {} | {} | {} projects",
			if locked == Some(label.id.as_str()) { "*" } else { " " },
			label.id,
			label.title,
			label.color,
			members
		);
	}
}

fn print_backups(ledger: &Ledger) {
	if ledger.backups.is_empty() {
		println!("no backups yet");
		return;
	}

	for backup in &ledger.backups {
		println!(
			"{} | {} | {} rows | {}",
			backup.id,
			backup.name,
			backup.rows.len(),
			format_minutes(backup.minutes())
		);
	}
}
