mod help;
mod state;

use crate::cli::AppConfig;
use crate::client::HttpClient;
use crate::list_view::{actions_for, ListState, NoticeKind, RunAction};
use crate::model::{RunRecord, RunStatus};
use crate::orchestrator::{self, AppEvent, Services, UiCommand};
use crate::wizard::{WizardController, WizardMode, WizardStep, WizardTransition};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use help::draw_help;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs, Wrap},
    Terminal,
};
use state::{UiState, TAB_HELP, TAB_RUNS, TAB_WIZARD};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

pub async fn run(app: AppConfig) -> Result<()> {
    let client = HttpClient::new(&app.client)?;
    let services = Services::from_client(client);

    let (event_tx, event_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_app = app.clone();
    let ui_handle = std::thread::spawn(move || run_threaded(ui_app, event_rx, cmd_tx));

    let res = orchestrator::run_controller(services, app.poll_interval, event_tx, cmd_rx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
pub fn run_threaded(
    app: AppConfig,
    mut event_rx: UnboundedReceiver<AppEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState::new(app.project.clone(), app.available_gpus);
    if state.list.project().is_none() {
        state.info = "No project selected. Pass --project or set EDGEAI_PROJECT.".into();
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            for cmd in apply_event(&mut state, ev) {
                let _ = cmd_tx.send(cmd);
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let out = handle_key(&mut state, k);
                for cmd in out.commands {
                    let _ = cmd_tx.send(cmd);
                }
                if out.quit {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

#[derive(Debug, Default)]
struct KeyOutcome {
    commands: Vec<UiCommand>,
    quit: bool,
}

impl KeyOutcome {
    fn send(cmd: UiCommand) -> Self {
        Self {
            commands: vec![cmd],
            quit: false,
        }
    }
}

fn switch_tab(state: &mut UiState, tab: usize) -> Vec<UiCommand> {
    if state.tab == tab {
        return Vec::new();
    }
    let was_runs = state.tab == TAB_RUNS;
    state.tab = tab;
    let mut cmds = Vec::new();
    if tab == TAB_RUNS {
        state.list.activate();
        cmds.push(UiCommand::SetPolling(true));
        cmds.extend(state.list.begin_refresh().map(UiCommand::List));
    } else if was_runs {
        state.list.deactivate();
        cmds.push(UiCommand::SetPolling(false));
    }
    cmds
}

fn take_notice(state: &mut UiState) {
    if let Some(n) = state.list.notice() {
        state.info = n.text.clone();
        state.list.clear_notice();
    }
}

fn handle_key(state: &mut UiState, k: KeyEvent) -> KeyOutcome {
    if let (KeyModifiers::CONTROL, KeyCode::Char('c')) = (k.modifiers, k.code) {
        return KeyOutcome {
            commands: Vec::new(),
            quit: true,
        };
    }
    if k.code == KeyCode::Tab {
        let next = (state.tab + 1) % 3;
        return KeyOutcome {
            commands: switch_tab(state, next),
            quit: false,
        };
    }
    match state.tab {
        TAB_RUNS => handle_runs_key(state, k),
        TAB_WIZARD => handle_wizard_key(state, k),
        _ => match k.code {
            KeyCode::Char('q') => KeyOutcome {
                commands: Vec::new(),
                quit: true,
            },
            KeyCode::Esc => KeyOutcome {
                commands: switch_tab(state, TAB_RUNS),
                quit: false,
            },
            _ => KeyOutcome::default(),
        },
    }
}

fn handle_runs_key(state: &mut UiState, k: KeyEvent) -> KeyOutcome {
    if let Some(run) = state.list.pending_delete().map(str::to_string) {
        return match k.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                state.info = format!("Deleting run '{run}'...");
                state
                    .list
                    .confirm_delete()
                    .map(|e| KeyOutcome::send(UiCommand::List(e)))
                    .unwrap_or_default()
            }
            _ => {
                state.list.cancel_delete();
                state.info = "Delete cancelled".into();
                KeyOutcome::default()
            }
        };
    }

    let selected = state.list.selected_run().cloned();
    let trigger = |state: &mut UiState, run: &RunRecord, action: RunAction| {
        match state.list.trigger(&run.id, action) {
            Some(effect) => KeyOutcome::send(UiCommand::List(effect)),
            None => {
                if state.list.pending_delete().is_some() {
                    state.info = format!("Delete run '{}'? (y/n)", run.id);
                } else if state.list.is_busy(&run.id, action) {
                    state.info = format!("{} '{}'", action.busy_label(), run.id);
                }
                KeyOutcome::default()
            }
        }
    };

    match (k.modifiers, k.code) {
        (_, KeyCode::Char('q')) => KeyOutcome {
            commands: Vec::new(),
            quit: true,
        },
        (_, KeyCode::Char('?')) => KeyOutcome {
            commands: switch_tab(state, TAB_HELP),
            quit: false,
        },
        (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
            state.list.select_prev();
            KeyOutcome::default()
        }
        (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
            state.list.select_next();
            KeyOutcome::default()
        }
        (_, KeyCode::Char('r')) => {
            state.info = "Refreshing...".into();
            state
                .list
                .begin_refresh()
                .map(|e| KeyOutcome::send(UiCommand::List(e)))
                .unwrap_or_default()
        }
        (_, KeyCode::Char('n')) => {
            if matches!(state.wizard.mode(), WizardMode::Edit { .. }) {
                state.reset_wizard();
            }
            KeyOutcome {
                commands: switch_tab(state, TAB_WIZARD),
                quit: false,
            }
        }
        (_, KeyCode::Esc) => {
            state.list.close_logs();
            state.log_scroll = 0;
            KeyOutcome::default()
        }
        (_, KeyCode::PageUp) => {
            state.log_scroll = state.log_scroll.saturating_add(10);
            KeyOutcome::default()
        }
        (_, KeyCode::PageDown) => {
            state.log_scroll = state.log_scroll.saturating_sub(10);
            KeyOutcome::default()
        }
        (_, KeyCode::Char(c)) if "seld".contains(c) => {
            let Some(run) = selected else {
                state.info = "No run selected".into();
                return KeyOutcome::default();
            };
            let action = match c {
                's' => actions_for(run.status)[0],
                'e' => RunAction::Edit,
                'l' => {
                    state.log_scroll = 0;
                    RunAction::Logs
                }
                _ => RunAction::Delete,
            };
            trigger(state, &run, action)
        }
        _ => KeyOutcome::default(),
    }
}

fn handle_wizard_key(state: &mut UiState, k: KeyEvent) -> KeyOutcome {
    let field = state.current_field();
    match (k.modifiers, k.code) {
        (_, KeyCode::Enter) => wizard_next(state),
        (_, KeyCode::Esc) => {
            if state.wizard.step() == WizardStep::Basic {
                state.reset_wizard();
                state.info = "Wizard cancelled".into();
                KeyOutcome {
                    commands: switch_tab(state, TAB_RUNS),
                    quit: false,
                }
            } else {
                state.wizard.back();
                state.field = 0;
                KeyOutcome::default()
            }
        }
        (_, KeyCode::Up) => {
            state.field = state.field.saturating_sub(1);
            KeyOutcome::default()
        }
        (_, KeyCode::Down) => {
            state.field = (state.field + 1).min(state.fields().len() - 1);
            KeyOutcome::default()
        }
        (_, KeyCode::Left) => {
            state.cycle_field(field, false);
            KeyOutcome::default()
        }
        (_, KeyCode::Right) => {
            state.cycle_field(field, true);
            KeyOutcome::default()
        }
        (KeyModifiers::CONTROL, KeyCode::Char('a')) => {
            if state.wizard.step() == WizardStep::Selection {
                match state.wizard.add_module(None) {
                    Ok(name) => state.info = format!("Added module {name}"),
                    Err(e) => state.info = e.to_string(),
                }
            }
            KeyOutcome::default()
        }
        (KeyModifiers::CONTROL, KeyCode::Char('g')) => {
            let on = !state.wizard.regenerates();
            state.wizard.set_regenerate(on);
            state.info = if state.wizard.regenerates() {
                "Code will be regenerated on save".into()
            } else {
                "Stored code will be kept".into()
            };
            KeyOutcome::default()
        }
        (_, KeyCode::Backspace) => {
            if let Some(buf) = state.text_buffer(field) {
                buf.pop();
            }
            KeyOutcome::default()
        }
        (m, KeyCode::Char(c)) if !m.contains(KeyModifiers::CONTROL) => {
            if let Some(buf) = state.text_buffer(field) {
                buf.push(c);
            } else if c == ' ' {
                state.cycle_field(field, true);
            }
            KeyOutcome::default()
        }
        _ => KeyOutcome::default(),
    }
}

fn wizard_next(state: &mut UiState) -> KeyOutcome {
    state.sync_numbers();
    match state.wizard.next() {
        Ok(WizardTransition::Advanced(_)) => {
            state.field = 0;
            state.info.clear();
            KeyOutcome::default()
        }
        Ok(WizardTransition::LoadSelectionData { ticket, project }) => {
            state.field = 0;
            state.info = "Loading models and datasets...".into();
            KeyOutcome::send(UiCommand::LoadSelection { ticket, project })
        }
        Ok(WizardTransition::Submit(req)) => {
            state.info = state.wizard.submit_label().into();
            KeyOutcome::send(UiCommand::Submit(req))
        }
        Err(e) => {
            state.info = e.to_string();
            if let Some(key) = state.wizard.error_field() {
                if let Some(i) = state.fields().iter().position(|f| f.error_key() == key) {
                    state.field = i;
                }
            }
            KeyOutcome::default()
        }
    }
}

fn apply_event(state: &mut UiState, ev: AppEvent) -> Vec<UiCommand> {
    let mut cmds = Vec::new();
    match ev {
        AppEvent::PollTick => {
            cmds.extend(state.list.poll().into_iter().map(UiCommand::List));
        }
        AppEvent::List(outcome) => {
            let applied = state.list.apply(outcome);
            cmds.extend(applied.effects.into_iter().map(UiCommand::List));
            take_notice(state);
            if let Some((record, code)) = applied.open_editor {
                let project = state.list.project().unwrap_or_default().to_string();
                let wizard = WizardController::edit(project, &record, state.available_gpus, code);
                state.open_wizard(wizard);
                state.info = format!("Editing run '{}'", record.id);
                cmds.extend(switch_tab(state, TAB_WIZARD));
            }
        }
        AppEvent::SelectionLoaded { ticket, result } => {
            state.wizard.apply_selection_data(ticket, result);
            match state.wizard.error() {
                Some(e) => state.info = e.to_string(),
                None if !state.wizard.catalog_loading() => state.info.clear(),
                None => {}
            }
        }
        AppEvent::Submitted(result) => {
            state.wizard.finish_submit(result);
            if let Some(record) = state.wizard.submitted() {
                let verb = match state.wizard.mode() {
                    WizardMode::Create => "created",
                    WizardMode::Edit { .. } => "saved",
                };
                let msg = format!("Run '{}' {verb}.", record.id);
                state.reset_wizard();
                cmds.extend(switch_tab(state, TAB_RUNS));
                state.info = msg;
            } else if let Some(e) = state.wizard.error() {
                state.info = e.to_string();
            }
        }
    }
    cmds
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0), Constraint::Length(1)].as_ref())
        .split(area);

    let wizard_title = match state.wizard.mode() {
        WizardMode::Create => "New Run",
        WizardMode::Edit { .. } => "Edit Run",
    };
    let title = match state.list.project() {
        Some(p) => format!("edgeai-runs [{p}]"),
        None => "edgeai-runs".to_string(),
    };
    let tabs = Tabs::new(vec![
        Line::from("Runs"),
        Line::from(wizard_title),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title(title))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        TAB_RUNS => draw_runs(chunks[1], f, state),
        TAB_WIZARD => draw_wizard(chunks[1], f, state),
        _ => draw_help(chunks[1], f),
    }

    let info = Line::from(vec![
        Span::styled("Info: ", Style::default().fg(Color::Gray)),
        Span::raw(state.info.as_str()),
    ]);
    f.render_widget(Paragraph::new(info), chunks[2]);
}

fn status_color(status: RunStatus) -> Color {
    match status {
        RunStatus::Running => Color::Green,
        RunStatus::Completed => Color::Cyan,
        RunStatus::Failed => Color::Red,
        RunStatus::Pending => Color::Yellow,
        RunStatus::NotRunning => Color::Gray,
    }
}

fn draw_runs(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let (table_area, log_area) = match state.list.log_view() {
        Some(_) => {
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Percentage(45), Constraint::Percentage(55)].as_ref())
                .split(area);
            (parts[0], Some(parts[1]))
        }
        None => (area, None),
    };

    let mut lines: Vec<Line> = Vec::new();
    lines.push(Line::from(vec![
        Span::styled("↑/↓/j/k", Style::default().fg(Color::Magenta)),
        Span::raw(": navigate, "),
        Span::styled("s", Style::default().fg(Color::Magenta)),
        Span::raw(": start/stop, "),
        Span::styled("e", Style::default().fg(Color::Magenta)),
        Span::raw(": edit, "),
        Span::styled("l", Style::default().fg(Color::Magenta)),
        Span::raw(": logs, "),
        Span::styled("d", Style::default().fg(Color::Magenta)),
        Span::raw(": delete, "),
        Span::styled("n", Style::default().fg(Color::Magenta)),
        Span::raw(": new, "),
        Span::styled("r", Style::default().fg(Color::Magenta)),
        Span::raw(": refresh"),
    ]));
    lines.push(Line::from(""));

    match state.list.state().placeholder() {
        Some(text) => {
            let color = match state.list.state() {
                ListState::Error(_) => Color::Red,
                _ => Color::Gray,
            };
            lines.push(Line::from(Span::styled(text, Style::default().fg(color))));
        }
        None => {
            lines.push(Line::from(Span::styled(
                format!(
                    "  {:<20} {:<12} {:<16} {:<14} {:<8} {:>5}  {}",
                    "NAME", "STATUS", "MODEL", "DATASET", "GPUS", "PROG", "CREATED"
                ),
                Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD),
            )));
            let max_items = (table_area.height as usize).saturating_sub(7).max(1);
            let selected = state.list.selected_index();
            let offset = selected.saturating_sub(max_items - 1);
            for (i, r) in state.list.runs().iter().enumerate().skip(offset).take(max_items) {
                let marker = if i == selected { "> " } else { "  " };
                let row_style = if i == selected {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default()
                };
                lines.push(Line::from(vec![
                    Span::styled(format!("{marker}{:<20} ", truncate(&r.id, 20)), row_style),
                    Span::styled(
                        format!("{:<12} ", r.status.label()),
                        Style::default().fg(status_color(r.status)),
                    ),
                    Span::styled(
                        format!(
                            "{:<16} {:<14} {:<8} {:>4}%  {}",
                            truncate(&r.model, 16),
                            truncate(&r.dataset, 14),
                            truncate(&r.gpu_list(), 8),
                            r.progress,
                            r.created_date.as_deref().unwrap_or("-"),
                        ),
                        row_style,
                    ),
                ]));
            }
        }
    }

    if let Some(run) = state.list.selected_run() {
        lines.push(Line::from(""));
        if state.list.pending_delete() == Some(run.id.as_str()) {
            lines.push(Line::from(Span::styled(
                format!("Delete run '{}'? This cannot be undone. (y/n)", run.id),
                Style::default().fg(Color::Red),
            )));
        } else {
            let mut spans = vec![Span::styled("Actions: ", Style::default().fg(Color::Gray))];
            for action in actions_for(run.status) {
                let style = if state.list.is_busy(&run.id, action) {
                    Style::default().fg(Color::DarkGray)
                } else {
                    Style::default().fg(Color::Magenta)
                };
                spans.push(Span::styled(
                    format!("[{}] ", state.list.action_label(&run.id, action)),
                    style,
                ));
            }
            lines.push(Line::from(spans));
        }
    }

    if let Some(notice) = state.list.notice() {
        let color = match notice.kind {
            NoticeKind::Info => Color::Gray,
            NoticeKind::Error => Color::Red,
        };
        lines.push(Line::from(Span::styled(notice.text.clone(), Style::default().fg(color))));
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Runs"));
    f.render_widget(p, table_area);

    if let (Some(area), Some(logs)) = (log_area, state.list.log_view()) {
        draw_logs(area, f, logs, state.log_scroll);
    }
}

fn draw_logs(area: Rect, f: &mut ratatui::Frame, logs: &crate::list_view::LogView, scroll: usize) {
    let visible = (area.height as usize).saturating_sub(2).max(1);
    let lines: Vec<Line> = if logs.loading && logs.lines.is_empty() {
        vec![Line::from(Span::styled("Loading logs...", Style::default().fg(Color::Gray)))]
    } else {
        let end = logs.lines.len().saturating_sub(scroll);
        let start = end.saturating_sub(visible);
        logs.lines[start..end].iter().map(|l| Line::from(l.as_str())).collect()
    };
    let title = format!("Logs: {} (Esc close, PgUp/PgDn scroll)", logs.run);
    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn draw_wizard(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let w = &state.wizard;
    let step = w.step();
    let mut lines: Vec<Line> = Vec::new();

    lines.push(Line::from(vec![
        Span::styled(
            format!("Step {}/{}: {}", step.number(), WizardStep::TOTAL, step.title()),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("   "),
        Span::styled("Enter", Style::default().fg(Color::Magenta)),
        Span::raw(if step == WizardStep::Selection { ": submit, " } else { ": next, " }),
        Span::styled("Esc", Style::default().fg(Color::Magenta)),
        Span::raw(if step == WizardStep::Basic { ": cancel, " } else { ": back, " }),
        Span::styled("←/→", Style::default().fg(Color::Magenta)),
        Span::raw(": change choice"),
    ]));
    if let WizardMode::Edit { original_name } = w.mode() {
        lines.push(Line::from(Span::styled(
            format!("Editing '{original_name}'"),
            Style::default().fg(Color::Cyan),
        )));
    }
    if w.project().is_empty() {
        lines.push(Line::from(Span::styled(
            crate::list_view::NO_PROJECT,
            Style::default().fg(Color::Red),
        )));
    }
    lines.push(Line::from(""));

    let error_key = w.error_field();
    let current = state.current_field();
    for field in state.fields() {
        let focused = *field == current;
        let label_style = if error_key == Some(field.error_key()) {
            Style::default().fg(Color::Red)
        } else if focused {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Gray)
        };
        let mut value = state.field_value(*field);
        if focused && field.is_text() {
            value.push('_');
        } else if !field.is_text() {
            value = format!("< {value} >");
        }
        lines.push(Line::from(vec![
            Span::raw(if focused { "> " } else { "  " }),
            Span::styled(format!("{:<14}", field.label()), label_style),
            Span::raw(value),
        ]));
    }

    if step == WizardStep::Training && !w.draft.run_type.requires_training() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            format!("Training fields are not checked for {} runs.", w.draft.run_type.as_str()),
            Style::default().fg(Color::Gray),
        )));
    }

    if step == WizardStep::Selection {
        lines.push(Line::from(""));
        if w.catalog_loading() {
            lines.push(Line::from(Span::styled(
                "Loading models and datasets...",
                Style::default().fg(Color::Gray),
            )));
        }
        lines.push(Line::from(vec![
            Span::styled("Available GPUs: ", Style::default().fg(Color::Gray)),
            Span::raw(state.available_gpus.to_string()),
            Span::styled("   Modules: ", Style::default().fg(Color::Gray)),
            Span::raw(w.module_count().to_string()),
            Span::styled("   Regenerate code: ", Style::default().fg(Color::Gray)),
            Span::raw(if w.regenerates() {
                "yes"
            } else if w.refreshes_config() {
                "config.yaml only"
            } else {
                "no"
            }),
        ]));
        lines.push(Line::from(vec![
            Span::styled("Ctrl-A", Style::default().fg(Color::Magenta)),
            Span::raw(": add module, "),
            Span::styled("Ctrl-G", Style::default().fg(Color::Magenta)),
            Span::raw(": toggle code regeneration"),
        ]));
        lines.push(Line::from(""));
        let submit_style = if w.is_submitting() {
            Style::default().fg(Color::DarkGray)
        } else {
            Style::default().fg(Color::Green)
        };
        lines.push(Line::from(Span::styled(format!("[{}]", w.submit_label()), submit_style)));
    }

    if let Some(e) = w.error() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(e.to_string(), Style::default().fg(Color::Red))));
    }

    let title = match w.mode() {
        WizardMode::Create => "New Run",
        WizardMode::Edit { .. } => "Edit Run",
    };
    let p = Paragraph::new(lines)
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(p, area);
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
