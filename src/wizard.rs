//! Three-step run wizard: basic info, training, selection.
//!
//! The controller is a synchronous state machine. Steps that need the backend return a
//! `WizardTransition` describing the request; the event loop runs it and reports back
//! through `apply_selection_data` / `finish_submit`. `advance` does both inline.

use crate::builder::{validate_run_name, RunConfigBuilder};
use crate::client::{
    load_selection_data, RunLifecycle, SelectionCatalog, SelectionData, TemplateStore,
};
use crate::error::{ClientError, ConfigError, WizardError};
use crate::model::{
    CatalogEntry, GeneratedCode, RunRecord, RunType, Selection, SubmissionPayload,
    TrainingInput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum WizardStep {
    Basic = 1,
    Training = 2,
    Selection = 3,
}

impl WizardStep {
    pub const TOTAL: u8 = 3;

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn title(self) -> &'static str {
        match self {
            WizardStep::Basic => "Basic info",
            WizardStep::Training => "Training",
            WizardStep::Selection => "Model & dataset",
        }
    }

    fn prev(self) -> Option<Self> {
        match self {
            WizardStep::Basic => None,
            WizardStep::Training => Some(WizardStep::Basic),
            WizardStep::Selection => Some(WizardStep::Training),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardMode {
    Create,
    /// Editing an existing run. `original_name` identifies it even if the name changes.
    Edit { original_name: String },
}

/// Field values as the user has typed them. Validated on `next()`.
#[derive(Debug, Clone, PartialEq)]
pub struct WizardDraft {
    pub name: String,
    pub run_type: RunType,
    pub description: String,
    pub training: TrainingInput,
    pub model_id: String,
    pub dataset_id: String,
    pub optimization_id: String,
    pub num_gpus: Option<u32>,
}

impl Default for WizardDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            run_type: RunType::Train,
            description: String::new(),
            training: TrainingInput::default(),
            model_id: String::new(),
            dataset_id: String::new(),
            optimization_id: String::new(),
            num_gpus: Some(1),
        }
    }
}

/// A create or edit call the event loop must perform.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    pub project: String,
    pub original_name: Option<String>,
    pub payload: SubmissionPayload,
}

impl SubmitRequest {
    pub async fn send(&self, client: &dyn RunLifecycle) -> Result<RunRecord, ClientError> {
        match &self.original_name {
            Some(original) => client.edit(&self.project, original, &self.payload).await,
            None => client.create(&self.project, &self.payload).await,
        }
    }
}

/// Outcome of `next()`.
#[derive(Debug, Clone, PartialEq)]
pub enum WizardTransition {
    /// Moved to a step that needs nothing from the backend.
    Advanced(WizardStep),
    /// Moved to the selection step; catalog and templates must be (re)loaded.
    LoadSelectionData { ticket: u64, project: String },
    /// All steps valid; the run must be submitted.
    Submit(SubmitRequest),
}

/// Backends `advance` talks to.
pub struct WizardServices<'a> {
    pub lifecycle: &'a dyn RunLifecycle,
    pub catalog: &'a dyn SelectionCatalog,
    pub templates: &'a dyn TemplateStore,
}

#[derive(Debug, Clone)]
pub struct WizardController {
    project: String,
    mode: WizardMode,
    step: WizardStep,
    builder: RunConfigBuilder,
    pub draft: WizardDraft,
    catalog: SelectionData,
    catalog_loading: bool,
    load_ticket: u64,
    /// Selection the edited run was saved with; its code is kept unless this changes.
    original_selection: Option<Selection>,
    /// Training values the edited run was saved with; `config.yaml` is recomposed if they change.
    original_training: Option<TrainingInput>,
    regenerate: bool,
    submitting: bool,
    submitted: Option<RunRecord>,
    error: Option<WizardError>,
}

impl WizardController {
    pub fn new(project: impl Into<String>, available_gpus: u32) -> Self {
        Self {
            project: project.into(),
            mode: WizardMode::Create,
            step: WizardStep::Basic,
            builder: RunConfigBuilder::new(available_gpus),
            draft: WizardDraft::default(),
            catalog: SelectionData::default(),
            catalog_loading: false,
            load_ticket: 0,
            original_selection: None,
            original_training: None,
            regenerate: true,
            submitting: false,
            submitted: None,
            error: None,
        }
    }

    /// Open the wizard on an existing run, seeded with its stored code.
    pub fn edit(
        project: impl Into<String>,
        record: &RunRecord,
        available_gpus: u32,
        code: GeneratedCode,
    ) -> Self {
        let mut w = Self::new(project, available_gpus);
        w.builder = RunConfigBuilder::from_record(record, available_gpus, code);
        let basic = w.builder.basic().clone();
        let selection = w.builder.selection().clone();
        let training = TrainingInput::from(*w.builder.training());
        w.draft = WizardDraft {
            name: basic.name,
            run_type: basic.run_type,
            description: basic.description,
            training,
            model_id: selection.model_id.clone(),
            dataset_id: selection.dataset_id.clone(),
            optimization_id: selection.optimization_id.clone(),
            num_gpus: Some(selection.num_gpus),
        };
        w.mode = WizardMode::Edit {
            original_name: record.id.clone(),
        };
        w.original_selection = Some(selection);
        w.original_training = Some(training);
        w.regenerate = false;
        w
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn mode(&self) -> &WizardMode {
        &self.mode
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn builder(&self) -> &RunConfigBuilder {
        &self.builder
    }

    pub fn module_count(&self) -> usize {
        self.builder.modules().len()
    }

    pub fn catalog(&self) -> &SelectionData {
        &self.catalog
    }

    pub fn catalog_loading(&self) -> bool {
        self.catalog_loading
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn submitted(&self) -> Option<&RunRecord> {
        self.submitted.as_ref()
    }

    pub fn error(&self) -> Option<&WizardError> {
        self.error.as_ref()
    }

    /// Field the current error belongs to, for highlighting.
    pub fn error_field(&self) -> Option<&'static str> {
        match &self.error {
            Some(WizardError::Config(e)) => e.field(),
            _ => None,
        }
    }

    /// Label for the submit control.
    pub fn submit_label(&self) -> &'static str {
        match (&self.mode, self.submitting) {
            (WizardMode::Create, false) => "Create",
            (WizardMode::Create, true) => "Creating...",
            (WizardMode::Edit { .. }, false) => "Save",
            (WizardMode::Edit { .. }, true) => "Saving...",
        }
    }

    /// Force code regeneration at submit even when editing.
    pub fn set_regenerate(&mut self, regenerate: bool) {
        self.regenerate = regenerate;
    }

    /// Whether both generated files are rebuilt from templates at submit.
    pub fn regenerates(&self) -> bool {
        self.regenerate || self.original_selection.as_ref() != Some(&self.selection_from_draft())
    }

    /// Whether `config.yaml` is recomposed at submit, alone or with `engine.py`.
    pub fn refreshes_config(&self) -> bool {
        self.regenerates() || self.original_training.as_ref() != Some(&self.draft.training)
    }

    pub fn add_module(&mut self, name: Option<&str>) -> Result<String, ConfigError> {
        self.builder.add_module(name).inspect_err(|e| {
            self.error = Some(WizardError::Config(e.clone()));
        })
    }

    fn selection_from_draft(&self) -> Selection {
        Selection {
            model_id: self.draft.model_id.trim().to_string(),
            dataset_id: self.draft.dataset_id.trim().to_string(),
            optimization_id: self.draft.optimization_id.trim().to_string(),
            num_gpus: self.draft.num_gpus.unwrap_or(1),
        }
    }

    /// Validate the current step and move forward, or produce a submission at the last step.
    ///
    /// On error the step does not change and the error is kept for display.
    pub fn next(&mut self) -> Result<WizardTransition, WizardError> {
        if self.submitting {
            return Err(WizardError::Busy);
        }
        let result = self.try_next();
        match &result {
            Ok(t) => {
                self.error = None;
                tracing::debug!(
                    step = self.step.number(),
                    transition = ?transition_name(t),
                    "wizard next"
                );
            }
            Err(e) => {
                tracing::debug!(step = self.step.number(), error = %e, "wizard step rejected");
                self.error = Some(e.clone());
            }
        }
        result
    }

    fn try_next(&mut self) -> Result<WizardTransition, WizardError> {
        match self.step {
            WizardStep::Basic => {
                let d = &self.draft;
                self.builder.set_basic(&d.name, d.run_type, &d.description)?;
                self.step = WizardStep::Training;
                Ok(WizardTransition::Advanced(WizardStep::Training))
            }
            WizardStep::Training => {
                self.builder.set_training(&self.draft.training)?;
                self.step = WizardStep::Selection;
                self.load_ticket += 1;
                self.catalog_loading = true;
                Ok(WizardTransition::LoadSelectionData {
                    ticket: self.load_ticket,
                    project: self.project.clone(),
                })
            }
            WizardStep::Selection => self.prepare_submit().map(WizardTransition::Submit),
        }
    }

    fn prepare_submit(&mut self) -> Result<SubmitRequest, WizardError> {
        validate_run_name(self.builder.basic().name.as_str())?;
        let d = &self.draft;
        // The backend refuses edits without an optimization; creates may leave it out.
        if matches!(self.mode, WizardMode::Edit { .. }) && d.optimization_id.trim().is_empty() {
            return Err(ConfigError::validation(
                "optimization",
                "Please select an optimization method",
            )
            .into());
        }
        self.builder.set_selection(
            &d.model_id,
            &d.dataset_id,
            Some(d.optimization_id.as_str()),
            d.num_gpus,
        )?;
        if self.regenerates() {
            let templates = self.catalog.templates.clone().unwrap_or_default();
            self.builder.generate_code(&templates);
        } else if self.refreshes_config() {
            self.builder.refresh_config();
        }
        let payload = self.builder.to_submission_payload(&self.project)?;
        self.submitting = true;
        let original_name = match &self.mode {
            WizardMode::Create => None,
            WizardMode::Edit { original_name } => Some(original_name.clone()),
        };
        Ok(SubmitRequest {
            project: self.project.clone(),
            original_name,
            payload,
        })
    }

    /// Step back without validation. No-op at the first step or while submitting.
    pub fn back(&mut self) {
        if self.submitting {
            return;
        }
        if let Some(prev) = self.step.prev() {
            self.step = prev;
            self.error = None;
        }
    }

    /// Back to step 1 with a fresh builder. Edit mode is left behind.
    pub fn reset(&mut self) {
        let gpus = self.builder.available_gpus();
        *self = Self::new(std::mem::take(&mut self.project), gpus);
    }

    /// Apply a catalog load. Results for superseded tickets are ignored.
    pub fn apply_selection_data(
        &mut self,
        ticket: u64,
        result: Result<SelectionData, ClientError>,
    ) {
        if ticket != self.load_ticket {
            tracing::debug!(ticket, current = self.load_ticket, "stale selection data dropped");
            return;
        }
        self.catalog_loading = false;
        match result {
            Ok(data) => self.catalog = data,
            Err(e) => {
                tracing::warn!(error = %e, "selection data failed to load");
                self.error = Some(WizardError::Client(e));
            }
        }
    }

    /// Apply the outcome of a submission. Failure keeps every entered value for a retry.
    pub fn finish_submit(&mut self, result: Result<RunRecord, ClientError>) {
        self.submitting = false;
        match result {
            Ok(record) => {
                tracing::info!(run = %record.id, "run submitted");
                self.error = None;
                self.submitted = Some(record);
            }
            Err(e) => {
                tracing::warn!(error = %e, "run submission failed");
                self.error = Some(WizardError::Client(e));
            }
        }
    }

    /// Run `next()` and any backend work it asks for.
    pub async fn advance(
        &mut self,
        services: &WizardServices<'_>,
    ) -> Result<WizardTransition, WizardError> {
        let transition = self.next()?;
        match &transition {
            WizardTransition::Advanced(_) => {}
            WizardTransition::LoadSelectionData { ticket, project } => {
                let data = load_selection_data(services.catalog, services.templates, project).await;
                let failed = data.as_ref().err().cloned();
                self.apply_selection_data(*ticket, data);
                if let Some(e) = failed {
                    return Err(e.into());
                }
            }
            WizardTransition::Submit(req) => {
                let result = req.send(services.lifecycle).await;
                let failed = result.as_ref().err().cloned();
                self.finish_submit(result);
                if let Some(e) = failed {
                    return Err(e.into());
                }
            }
        }
        Ok(transition)
    }

    /// Step through the selectable entries of a catalog list, starting from "none".
    pub fn cycle_choice(current: &str, entries: &[CatalogEntry], forward: bool) -> String {
        if entries.is_empty() {
            return String::new();
        }
        let pos = entries.iter().position(|e| e.id == current);
        let n = entries.len();
        let next = match (pos, forward) {
            (None, true) => Some(0),
            (None, false) => Some(n - 1),
            (Some(i), true) if i + 1 < n => Some(i + 1),
            (Some(_), true) => None,
            (Some(0), false) => None,
            (Some(i), false) => Some(i - 1),
        };
        next.map(|i| entries[i].id.clone()).unwrap_or_default()
    }
}

fn transition_name(t: &WizardTransition) -> &'static str {
    match t {
        WizardTransition::Advanced(_) => "advanced",
        WizardTransition::LoadSelectionData { .. } => "load-selection",
        WizardTransition::Submit(_) => "submit",
    }
}
