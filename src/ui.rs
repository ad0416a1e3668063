use std::io;
use std::time::Duration as StdDuration;

use anyhow::Result;
use chrono::Local;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, ExecutableCommand};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};
use tracing::warn;

use crate::domain::{format_minutes, rgb_from_hex, Project};
use crate::ledger::{CycleDirection, Ledger, LedgerEvent};
use crate::storage::Store;

const FOCUSED_PANEL_BORDER_COLOR: Color = Color::Yellow;
const INACTIVE_PANEL_BORDER_COLOR: Color = Color::DarkGray;
const HIGHLIGHT_BACKGROUND_COLOR: Color = Color::Rgb(42, 45, 52);
const RUNNING_COLOR: Color = Color::LightGreen;

pub fn run_dashboard(ledger: &mut Ledger, store: &Store) -> Result<()> {
	enable_raw_mode()?;
	let mut stdout = io::stdout();
	stdout.execute(EnterAlternateScreen)?;
	let backend = CrosstermBackend::new(stdout);
	let mut terminal = Terminal::new(backend)?;

	let result = run_event_loop(&mut terminal, ledger, store);

	disable_raw_mode()?;
	execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
	terminal.show_cursor()?;

	result
}

fn run_event_loop(
	terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
	ledger: &mut Ledger,
	store: &Store,
) -> Result<()> {
	let mut app = App::new(ledger);

	loop {
		app.clamp_selection(ledger);
		terminal.draw(|frame| draw_dashboard(frame, &app, ledger))?;

		if event::poll(StdDuration::from_millis(250))? {
			if let CEvent::Key(key) = event::read()? {
				if key.kind != KeyEventKind::Press {
					continue;
				}

				let should_quit = match &app.mode {
					InputMode::Prompt(_) => handle_prompt_key(&mut app, key.code, ledger, store),
					InputMode::Normal => handle_normal_key(&mut app, key.code, ledger, store),
				};

				if should_quit {
					break;
				}
			}
		}
	}

	Ok(())
}

fn draw_dashboard(frame: &mut Frame, app: &App, ledger: &Ledger) {
	let layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Min(8), Constraint::Length(4)])
		.split(frame.area());

	let body = Layout::default()
		.direction(Direction::Horizontal)
		.constraints([Constraint::Percentage(38), Constraint::Percentage(62)])
		.split(layout[0]);

	render_projects_panel(frame, body[0], app, ledger);
	render_rows_panel(frame, body[1], ledger);
	render_footer(frame, layout[1], app);
}

fn render_projects_panel(frame: &mut Frame, area: Rect, app: &App, ledger: &Ledger) {
	let current = ledger.selection.current_project_id.as_deref();
	let items = ledger
		.projects
		.iter()
		.map(|project| ListItem::new(project_line(ledger, project, current == Some(project.id.as_str()))))
		.collect::<Vec<_>>();

	let mut state = ListState::default();
	if !ledger.projects.is_empty() {
		state.select(Some(app.project_index.min(ledger.projects.len() - 1)));
	}

	let title = match ledger
		.selection
		.locked_label_id
		.as_deref()
		.and_then(|id| ledger.label(id))
	{
		Some(label) => format!("Projects | locked to {}", label.title),
		None => "Projects".to_string(),
	};
	let list = List::new(if items.is_empty() {
		vec![ListItem::new("(no projects, press p)")]
	} else {
		items
	})
	.block(
		Block::default()
			.borders(Borders::ALL)
			.title(title)
			.border_style(border_style(true)),
	)
	.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR).add_modifier(Modifier::BOLD));

	frame.render_stateful_widget(list, area, &mut state);
}

fn project_line(ledger: &Ledger, project: &Project, is_current: bool) -> Line<'static> {
	let label_style = project
		.label_id
		.as_deref()
		.and_then(|id| ledger.label(id))
		.and_then(|label| rgb_from_hex(&label.color))
		.map(|(red, green, blue)| Style::default().fg(Color::Rgb(red, green, blue)))
		.unwrap_or_default();

	let mut spans = vec![
		Span::raw(if is_current { "> " } else { "  " }),
		Span::styled("■ ", label_style),
		Span::raw(project.name.clone()),
		Span::raw(format!(" | {}", format_minutes(project.minutes()))),
	];
	if project.is_running() {
		spans.push(Span::styled(" ● running", Style::default().fg(RUNNING_COLOR)));
	}
	Line::from(spans)
}

fn render_rows_panel(frame: &mut Frame, area: Rect, ledger: &Ledger) {
	let Some(project) = ledger.current_project() else {
		let panel = Paragraph::new("no project selected")
			.block(Block::default().borders(Borders::ALL).title("Days"));
		frame.render_widget(panel, area);
		return;
	};

	let mut lines = project
		.rows
		.iter()
		.rev()
		.map(|row| {
			let mut spans = vec![
				Span::styled(format!("{:<14}", row.date_label), Style::default().add_modifier(Modifier::BOLD)),
				Span::raw(format!("{:>8}  ", format_minutes(row.minutes()))),
				Span::raw(row.intervals.clone()),
			];
			if !row.annotation.is_empty() {
				spans.push(Span::styled(
					format!("  {}", row.annotation),
					Style::default().fg(Color::Gray).add_modifier(Modifier::ITALIC),
				));
			}
			Line::from(spans)
		})
		.collect::<Vec<_>>();

	if lines.is_empty() {
		lines.push(Line::from("(no days recorded, press space to start)"));
	}

	let title = format!("{} | total {}", project.name, format_minutes(project.minutes()));
	let panel = Paragraph::new(lines).block(
		Block::default()
			.borders(Borders::ALL)
			.title(title)
			.border_style(border_style(false)),
	);
	frame.render_widget(panel, area);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
	let footer_lines = match &app.mode {
		InputMode::Normal => vec![
			Line::from("space start/stop | h/l or left/right cycle | j/k move | Enter select | q quit"),
			Line::from("p new project | a annotate last day | L rotate locked label"),
			Line::from(app.status.clone()),
		],
		InputMode::Prompt(prompt) => vec![
			Line::from(prompt.title.clone()),
			Line::from(format!("> {}", prompt.input)),
			Line::from("Enter submit | Esc cancel"),
		],
	};

	let footer = Paragraph::new(footer_lines).block(Block::default().borders(Borders::ALL).title("Shortcuts"));
	frame.render_widget(footer, area);
}

fn handle_normal_key(app: &mut App, code: KeyCode, ledger: &mut Ledger, store: &Store) -> bool {
	match code {
		KeyCode::Char('q') | KeyCode::Esc => true,
		KeyCode::Up | KeyCode::Char('k') => {
			app.project_index = app.project_index.saturating_sub(1);
			false
		}
		KeyCode::Down | KeyCode::Char('j') => {
			app.project_index += 1;
			false
		}
		KeyCode::Enter => {
			if let Some(id) = ledger.projects.get(app.project_index).map(|project| project.id.clone()) {
				app.select(ledger, store, &id);
			}
			false
		}
		KeyCode::Left | KeyCode::Char('h') => {
			let events = ledger.cycle_project(CycleDirection::Previous).into_iter().collect::<Vec<_>>();
			app.apply_events(ledger, store, &events);
			false
		}
		KeyCode::Right | KeyCode::Char('l') => {
			let events = ledger.cycle_project(CycleDirection::Next).into_iter().collect::<Vec<_>>();
			app.apply_events(ledger, store, &events);
			false
		}
		KeyCode::Char(' ') => {
			match ledger.toggle_current(Local::now().naive_local()) {
				Ok(outcome) => match store.commit_toggle(ledger, outcome) {
					Ok(events) => app.status = describe(&events),
					Err(err) => app.status = format!("save failed: {err}"),
				},
				Err(err) => app.status = err.to_string(),
			}
			false
		}
		KeyCode::Char('L') => {
			let next = next_locked_label(ledger);
			match ledger.lock_label(next.as_deref()) {
				Ok(events) => {
					app.apply_events(ledger, store, &events);
					app.status = match next.as_deref().and_then(|id| ledger.label(id)) {
						Some(label) => format!("cycling locked to {}", label.title),
						None => "cycling over all projects".to_string(),
					};
				}
				Err(err) => app.status = err.to_string(),
			}
			false
		}
		KeyCode::Char('p') => {
			app.mode = InputMode::Prompt(PromptState::new("New project name", PromptKind::NewProject));
			false
		}
		KeyCode::Char('a') => {
			match ledger.current_project() {
				Some(project) if !project.rows.is_empty() => {
					let prompt = PromptState {
						title: format!("Annotation for {}", project.rows[project.rows.len() - 1].date_label),
						input: project.rows[project.rows.len() - 1].annotation.clone(),
						kind: PromptKind::Annotation {
							project_id: project.id.clone(),
							row: project.rows.len() - 1,
						},
					};
					app.mode = InputMode::Prompt(prompt);
				}
				Some(_) => app.status = "nothing to annotate yet".to_string(),
				None => app.status = "no project selected".to_string(),
			}
			false
		}
		_ => false,
	}
}

fn handle_prompt_key(app: &mut App, code: KeyCode, ledger: &mut Ledger, store: &Store) -> bool {
	let InputMode::Prompt(prompt) = &mut app.mode else {
		return false;
	};

	match code {
		KeyCode::Esc => {
			app.mode = InputMode::Normal;
			app.status = "Cancelled".to_string();
		}
		KeyCode::Backspace => {
			prompt.input.pop();
		}
		KeyCode::Char(ch) => {
			prompt.input.push(ch);
		}
		KeyCode::Enter => {
			let prompt = prompt.clone();
			app.mode = InputMode::Normal;
			submit_prompt(app, prompt, ledger, store);
		}
		_ => {}
	}
	false
}

fn submit_prompt(app: &mut App, prompt: PromptState, ledger: &mut Ledger, store: &Store) {
	let result = match prompt.kind {
		PromptKind::NewProject => ledger.add_project(&prompt.input).map(|(id, events)| {
			app.project_index = ledger.projects.len().saturating_sub(1);
			(format!("created project {id}"), events)
		}),
		PromptKind::Annotation { project_id, row } => ledger
			.set_row_annotation(&project_id, row, &prompt.input)
			.map(|()| ("annotation saved".to_string(), Vec::new())),
	};

	match result {
		Ok((message, events)) => {
			if app.apply_events(ledger, store, &events) {
				app.status = message;
			}
		}
		Err(err) => app.status = err.to_string(),
	}
}

/// Rotates through no lock, then each label in order.
fn next_locked_label(ledger: &Ledger) -> Option<String> {
	let position = ledger
		.selection
		.locked_label_id
		.as_deref()
		.and_then(|id| ledger.labels.iter().position(|label| label.id == id));
	let next = match position {
		Some(index) => index + 1,
		None => 0,
	};
	ledger.labels.get(next).map(|label| label.id.clone())
}

fn describe(events: &[LedgerEvent]) -> String {
	if events.is_empty() {
		return "Ready".to_string();
	}
	events
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join(" | ")
}

fn border_style(focused: bool) -> Style {
	if focused {
		Style::default()
			.fg(FOCUSED_PANEL_BORDER_COLOR)
			.add_modifier(Modifier::BOLD)
	} else {
		Style::default().fg(INACTIVE_PANEL_BORDER_COLOR)
	}
}

#[derive(Debug, Clone)]
enum PromptKind {
	NewProject,
	Annotation { project_id: String, row: usize },
}

#[derive(Debug, Clone)]
struct PromptState {
	title: String,
	input: String,
	kind: PromptKind,
}

impl PromptState {
	fn new(title: impl Into<String>, kind: PromptKind) -> Self {
		Self {
			title: title.into(),
			input: String::new(),
			kind,
		}
	}
}

#[derive(Debug, Clone)]
enum InputMode {
	Normal,
	Prompt(PromptState),
}

#[derive(Debug, Clone)]
struct App {
	project_index: usize,
	mode: InputMode,
	status: String,
}

impl App {
	fn new(ledger: &Ledger) -> Self {
		let project_index = ledger
			.selection
			.current_project_id
			.as_deref()
			.and_then(|id| ledger.projects.iter().position(|project| project.id == id))
			.unwrap_or(0);
		Self {
			project_index,
			mode: InputMode::Normal,
			status: "Ready".to_string(),
		}
	}

	fn clamp_selection(&mut self, ledger: &Ledger) {
		if ledger.projects.is_empty() {
			self.project_index = 0;
		} else {
			self.project_index = self.project_index.min(ledger.projects.len() - 1);
		}
	}

	/// Saves after a mutation and moves the highlight onto the selected project.
	fn select(&mut self, ledger: &mut Ledger, store: &Store, id: &str) {
		match ledger.select_project(id) {
			Ok(events) => {
				self.apply_events(ledger, store, &events);
			}
			Err(err) => self.status = err.to_string(),
		}
	}

	fn apply_events(&mut self, ledger: &Ledger, store: &Store, events: &[LedgerEvent]) -> bool {
		if let Err(err) = store.save(ledger) {
			warn!(error = %err, "dashboard change was not persisted");
			self.status = format!("save failed: {err}");
			return false;
		}

		for event in events {
			if let LedgerEvent::SelectionChanged { project_id: Some(id) } = event {
				if let Some(index) = ledger.projects.iter().position(|project| &project.id == id) {
					self.project_index = index;
				}
			}
		}
		self.status = describe(events);
		true
	}
}

#[cfg(test)]
mod tests {
	use super::{App, describe, next_locked_label};
	use crate::ledger::{Ledger, LedgerEvent};
	use crate::storage::Store;

	#[test]
	fn locked_label_rotation_ends_with_no_lock() {
		let mut ledger = Ledger::new();
		let first = ledger.add_label("One", "#111111").expect("label should be created");
		let second = ledger.add_label("Two", "#222222").expect("label should be created");

		assert_eq!(next_locked_label(&ledger), Some(first.clone()));
		ledger.lock_label(Some(&first)).expect("lock should work");
		assert_eq!(next_locked_label(&ledger), Some(second.clone()));
		ledger.lock_label(Some(&second)).expect("lock should work");
		assert_eq!(next_locked_label(&ledger), None);
	}

	#[test]
	fn describes_events_for_the_status_line() {
		assert_eq!(describe(&[]), "Ready");
		let events = vec![
			LedgerEvent::IntervalOpened {
				project: "Work".to_string(),
				time_label: "09:00".to_string(),
			},
			LedgerEvent::SelectionChanged { project_id: None },
		];
		assert_eq!(describe(&events), "Work: started at 09:00 | no project selected");
	}

	#[test]
	fn selecting_a_missing_project_reports_the_error() {
		let dir = tempfile::tempdir().expect("temp dir");
		let store = Store::new(dir.path());
		let mut ledger = Ledger::new();
		let (work, _) = ledger.add_project("Work").expect("project should be created");
		let (study, _) = ledger.add_project("Study").expect("project should be created");
		let mut app = App::new(&ledger);

		app.select(&mut ledger, &store, "gone");
		assert_eq!(app.status, "project not found: gone");
		assert_eq!(ledger.selection.current_project_id, Some(work));

		app.select(&mut ledger, &store, &study);
		assert_eq!(app.project_index, 1);
		assert_eq!(ledger.selection.current_project_id, Some(study));
	}
}
