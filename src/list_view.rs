//! Run list: placeholder states, per-run actions, polling and the log pane.
//!
//! Like the wizard, the view never awaits. It hands out `ListEffect`s, the event loop
//! executes them and feeds the `ListOutcome` back through `apply`.

use crate::client::RunLifecycle;
use crate::error::ClientError;
use crate::model::{Ack, GeneratedCode, LogTail, RunFile, RunRecord, RunStatus};
use std::collections::HashSet;

pub const NO_PROJECT: &str = "No project selected";
pub const NO_RUNS: &str = "No runs found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListState {
    NoProject,
    /// Waiting for the first answer for this project.
    Loading,
    Empty,
    Loaded,
    Error(String),
}

impl ListState {
    /// Text shown in place of the table, if any.
    pub fn placeholder(&self) -> Option<String> {
        match self {
            ListState::NoProject => Some(NO_PROJECT.to_string()),
            ListState::Loading => Some("Loading runs...".to_string()),
            ListState::Empty => Some(NO_RUNS.to_string()),
            ListState::Loaded => None,
            ListState::Error(msg) => Some(format!("Error loading runs: {msg} (press r to retry)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunAction {
    Start,
    Stop,
    Edit,
    Logs,
    Delete,
}

impl RunAction {
    pub fn label(self) -> &'static str {
        match self {
            RunAction::Start => "Start",
            RunAction::Stop => "Stop",
            RunAction::Edit => "Edit",
            RunAction::Logs => "Logs",
            RunAction::Delete => "Delete",
        }
    }

    pub fn busy_label(self) -> &'static str {
        match self {
            RunAction::Start => "Starting...",
            RunAction::Stop => "Stopping...",
            RunAction::Edit => "Loading...",
            RunAction::Logs => "Fetching...",
            RunAction::Delete => "Deleting...",
        }
    }

    fn past_tense(self) -> &'static str {
        match self {
            RunAction::Start => "started",
            RunAction::Stop => "stopped",
            RunAction::Delete => "deleted",
            RunAction::Edit | RunAction::Logs => "updated",
        }
    }
}

/// Actions offered for a run in the given status.
pub fn actions_for(status: RunStatus) -> [RunAction; 4] {
    let toggle = if status == RunStatus::Running {
        RunAction::Stop
    } else {
        RunAction::Start
    };
    [toggle, RunAction::Edit, RunAction::Logs, RunAction::Delete]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

/// A one-line message for the status bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogView {
    pub run: String,
    pub lines: Vec<String>,
    pub loading: bool,
}

/// Backend work requested by the view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListEffect {
    Refresh {
        seq: u64,
        project: String,
    },
    Lifecycle {
        project: String,
        run: String,
        action: RunAction,
    },
    FetchLogs {
        seq: u64,
        project: String,
        run: String,
        background: bool,
    },
    LoadForEdit {
        project: String,
        run: String,
    },
}

/// Result of a `ListEffect`, fed back to `RunListView::apply`.
#[derive(Debug, Clone, PartialEq)]
pub enum ListOutcome {
    Refreshed {
        seq: u64,
        result: Result<Vec<RunRecord>, ClientError>,
    },
    ActionDone {
        run: String,
        action: RunAction,
        result: Result<Ack, ClientError>,
    },
    Logs {
        seq: u64,
        run: String,
        background: bool,
        result: Result<LogTail, ClientError>,
    },
    EditLoaded {
        run: String,
        result: Result<(RunRecord, GeneratedCode), ClientError>,
    },
}

impl ListEffect {
    pub async fn execute(self, client: &dyn RunLifecycle) -> ListOutcome {
        match self {
            ListEffect::Refresh { seq, project } => ListOutcome::Refreshed {
                seq,
                result: client.list(&project).await,
            },
            ListEffect::Lifecycle { project, run, action } => {
                let result = match action {
                    RunAction::Start => client.start(&project, &run).await,
                    RunAction::Stop => client.stop(&project, &run).await,
                    RunAction::Delete => client.delete(&project, &run).await,
                    RunAction::Edit | RunAction::Logs => Ok(Ack::default()),
                };
                ListOutcome::ActionDone { run, action, result }
            }
            ListEffect::FetchLogs {
                seq,
                project,
                run,
                background,
            } => {
                let result = client.list_log_tail(&project, &run).await;
                ListOutcome::Logs {
                    seq,
                    run,
                    background,
                    result,
                }
            }
            ListEffect::LoadForEdit { project, run } => {
                let result = load_for_edit(client, &project, &run).await;
                ListOutcome::EditLoaded { run, result }
            }
        }
    }
}

async fn load_for_edit(
    client: &dyn RunLifecycle,
    project: &str,
    run: &str,
) -> Result<(RunRecord, GeneratedCode), ClientError> {
    let (record, engine_py, config_yaml) = futures::try_join!(
        client.get(project, run),
        client.get_file(project, run, RunFile::EnginePy),
        client.get_file(project, run, RunFile::ConfigYaml),
    )?;
    Ok((
        record,
        GeneratedCode {
            engine_py,
            config_yaml,
        },
    ))
}

/// What applying an outcome asks of the caller.
#[derive(Debug, Default, PartialEq)]
pub struct Applied {
    pub effects: Vec<ListEffect>,
    /// A run whose details arrived and should be opened in the wizard.
    pub open_editor: Option<(RunRecord, GeneratedCode)>,
}

#[derive(Debug, Clone)]
pub struct RunListView {
    project: Option<String>,
    state: ListState,
    runs: Vec<RunRecord>,
    selected: usize,
    issued_seq: u64,
    applied_seq: u64,
    issued_log_seq: u64,
    applied_log_seq: u64,
    busy: HashSet<(String, RunAction)>,
    pending_delete: Option<String>,
    log_view: Option<LogView>,
    notice: Option<Notice>,
    active: bool,
}

impl RunListView {
    pub fn new(project: Option<String>) -> Self {
        let project = project.filter(|p| !p.trim().is_empty());
        let state = if project.is_some() {
            ListState::Loading
        } else {
            ListState::NoProject
        };
        Self {
            project,
            state,
            runs: Vec::new(),
            selected: 0,
            issued_seq: 0,
            applied_seq: 0,
            issued_log_seq: 0,
            applied_log_seq: 0,
            busy: HashSet::new(),
            pending_delete: None,
            log_view: None,
            notice: None,
            active: true,
        }
    }

    pub fn project(&self) -> Option<&str> {
        self.project.as_deref()
    }

    pub fn state(&self) -> &ListState {
        &self.state
    }

    pub fn runs(&self) -> &[RunRecord] {
        &self.runs
    }

    pub fn run(&self, id: &str) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.id == id)
    }

    pub fn selected_index(&self) -> usize {
        self.selected
    }

    pub fn selected_run(&self) -> Option<&RunRecord> {
        self.runs.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if !self.runs.is_empty() {
            self.selected = (self.selected + 1) % self.runs.len();
        }
    }

    pub fn select_prev(&mut self) {
        if !self.runs.is_empty() {
            self.selected = (self.selected + self.runs.len() - 1) % self.runs.len();
        }
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn set_notice(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn log_view(&self) -> Option<&LogView> {
        self.log_view.as_ref()
    }

    pub fn close_logs(&mut self) {
        self.log_view = None;
    }

    pub fn pending_delete(&self) -> Option<&str> {
        self.pending_delete.as_deref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Stop producing poll work, e.g. when the view closes.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn is_busy(&self, run: &str, action: RunAction) -> bool {
        self.busy.contains(&(run.to_string(), action))
    }

    /// Label for an action control, reflecting an outstanding call.
    pub fn action_label(&self, run: &str, action: RunAction) -> &'static str {
        if self.is_busy(run, action) {
            action.busy_label()
        } else {
            action.label()
        }
    }

    /// Ask for a full reload of the list.
    pub fn begin_refresh(&mut self) -> Option<ListEffect> {
        let Some(project) = self.project.clone() else {
            self.state = ListState::NoProject;
            self.runs.clear();
            return None;
        };
        self.issued_seq += 1;
        if matches!(self.state, ListState::NoProject) {
            self.state = ListState::Loading;
        }
        Some(ListEffect::Refresh {
            seq: self.issued_seq,
            project,
        })
    }

    /// Work for one poll tick: a refresh plus a quiet log reload if logs are open.
    pub fn poll(&mut self) -> Vec<ListEffect> {
        if !self.active {
            return Vec::new();
        }
        let mut effects: Vec<ListEffect> = self.begin_refresh().into_iter().collect();
        let logs_run = self.log_view.as_ref().map(|l| l.run.clone());
        if let (Some(project), Some(run)) = (self.project.clone(), logs_run) {
            effects.push(self.fetch_logs(project, run, true));
        }
        effects
    }

    fn fetch_logs(&mut self, project: String, run: String, background: bool) -> ListEffect {
        self.issued_log_seq += 1;
        ListEffect::FetchLogs {
            seq: self.issued_log_seq,
            project,
            run,
            background,
        }
    }

    /// Request an action on a run. Returns `None` when the control is busy, when the
    /// action needs confirmation first, or when there is no project.
    pub fn trigger(&mut self, run: &str, action: RunAction) -> Option<ListEffect> {
        let project = self.project.clone()?;
        if self.is_busy(run, action) {
            tracing::debug!(run, ?action, "action already in flight");
            return None;
        }
        match action {
            RunAction::Delete => {
                self.pending_delete = Some(run.to_string());
                None
            }
            RunAction::Logs => {
                self.log_view = Some(LogView {
                    run: run.to_string(),
                    lines: Vec::new(),
                    loading: true,
                });
                Some(self.fetch_logs(project, run.to_string(), false))
            }
            RunAction::Edit => {
                self.busy.insert((run.to_string(), action));
                Some(ListEffect::LoadForEdit {
                    project,
                    run: run.to_string(),
                })
            }
            RunAction::Start | RunAction::Stop => {
                self.busy.insert((run.to_string(), action));
                Some(ListEffect::Lifecycle {
                    project,
                    run: run.to_string(),
                    action,
                })
            }
        }
    }

    /// The user confirmed the pending delete.
    pub fn confirm_delete(&mut self) -> Option<ListEffect> {
        let run = self.pending_delete.take()?;
        let project = self.project.clone()?;
        if !self.busy.insert((run.clone(), RunAction::Delete)) {
            return None;
        }
        Some(ListEffect::Lifecycle {
            project,
            run,
            action: RunAction::Delete,
        })
    }

    pub fn cancel_delete(&mut self) {
        self.pending_delete = None;
    }

    pub fn apply(&mut self, outcome: ListOutcome) -> Applied {
        let mut applied = Applied::default();
        match outcome {
            ListOutcome::Refreshed { seq, result } => self.apply_refresh(seq, result),
            ListOutcome::ActionDone { run, action, result } => {
                self.busy.remove(&(run.clone(), action));
                match result {
                    Ok(ack) => {
                        let text = ack
                            .message
                            .unwrap_or_else(|| format!("Run '{run}' {}.", action.past_tense()));
                        self.notice = Some(Notice::info(text));
                        if action == RunAction::Delete
                            && self.log_view.as_ref().is_some_and(|l| l.run == run)
                        {
                            self.log_view = None;
                        }
                        applied.effects.extend(self.begin_refresh());
                    }
                    // Status stays as last reported by the server.
                    Err(e) => self.notice = Some(Notice::error(e.message())),
                }
            }
            ListOutcome::Logs {
                seq,
                run,
                background,
                result,
            } => self.apply_logs(seq, &run, background, result),
            ListOutcome::EditLoaded { run, result } => {
                self.busy.remove(&(run, RunAction::Edit));
                match result {
                    Ok(loaded) => applied.open_editor = Some(loaded),
                    Err(e) => self.notice = Some(Notice::error(e.message())),
                }
            }
        }
        applied
    }

    fn apply_refresh(&mut self, seq: u64, result: Result<Vec<RunRecord>, ClientError>) {
        if seq <= self.applied_seq {
            tracing::debug!(seq, applied = self.applied_seq, "stale refresh dropped");
            return;
        }
        self.applied_seq = seq;
        match result {
            Ok(runs) => {
                let keep = self.selected_run().map(|r| r.id.clone());
                self.runs = runs;
                self.selected = keep
                    .and_then(|id| self.runs.iter().position(|r| r.id == id))
                    .unwrap_or_else(|| self.selected.min(self.runs.len().saturating_sub(1)));
                self.state = if self.runs.is_empty() {
                    ListState::Empty
                } else {
                    ListState::Loaded
                };
            }
            Err(e) => {
                tracing::warn!(error = %e, "run list refresh failed");
                self.runs.clear();
                self.selected = 0;
                self.state = ListState::Error(e.message().to_string());
            }
        }
    }

    fn apply_logs(
        &mut self,
        seq: u64,
        run: &str,
        background: bool,
        result: Result<LogTail, ClientError>,
    ) {
        if seq <= self.applied_log_seq {
            tracing::debug!(seq, applied = self.applied_log_seq, "stale log tail dropped");
            return;
        }
        let Some(view) = self.log_view.as_mut().filter(|v| v.run == run) else {
            return;
        };
        self.applied_log_seq = seq;
        match result {
            Ok(tail) => {
                view.lines = tail.lines();
                view.loading = false;
            }
            Err(e) if background => {
                tracing::debug!(run, error = %e, "background log refresh failed");
            }
            Err(e) => {
                view.loading = false;
                self.notice = Some(Notice::error(e.message()));
            }
        }
    }

    /// Refresh inline against a client.
    pub async fn refresh(&mut self, client: &dyn RunLifecycle) -> &ListState {
        if let Some(effect) = self.begin_refresh() {
            let outcome = effect.execute(client).await;
            self.apply(outcome);
        }
        &self.state
    }

    /// Execute an effect inline and apply its outcome, following up on any refresh.
    pub async fn run_effect(&mut self, client: &dyn RunLifecycle, effect: ListEffect) -> Applied {
        let outcome = effect.execute(client).await;
        let mut applied = self.apply(outcome);
        for follow in std::mem::take(&mut applied.effects) {
            let outcome = follow.execute(client).await;
            self.apply(outcome);
        }
        applied
    }
}
