use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Kind of run the wizard produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    #[default]
    Train,
    Finetune,
    Eval,
    Inference,
}

impl RunType {
    pub const ALL: [RunType; 4] = [
        RunType::Train,
        RunType::Finetune,
        RunType::Eval,
        RunType::Inference,
    ];

    /// Training hyperparameters are only required (and validated) for these types.
    pub fn requires_training(self) -> bool {
        matches!(self, RunType::Train | RunType::Finetune)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunType::Train => "train",
            RunType::Finetune => "finetune",
            RunType::Eval => "eval",
            RunType::Inference => "inference",
        }
    }

    /// Neighbouring choice, wrapping at either end.
    pub fn cycle(self, forward: bool) -> Self {
        cycle_in(&Self::ALL, self, forward)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Optimizer {
    #[default]
    Adam,
    AdamW,
    Sgd,
    RmsProp,
}

impl Optimizer {
    pub const ALL: [Optimizer; 4] = [
        Optimizer::Adam,
        Optimizer::AdamW,
        Optimizer::Sgd,
        Optimizer::RmsProp,
    ];

    /// Class name used in the generated config (torch.optim naming).
    pub fn class_name(self) -> &'static str {
        match self {
            Optimizer::Adam => "Adam",
            Optimizer::AdamW => "AdamW",
            Optimizer::Sgd => "SGD",
            Optimizer::RmsProp => "RMSprop",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Optimizer::Adam => "adam",
            Optimizer::AdamW => "adamw",
            Optimizer::Sgd => "sgd",
            Optimizer::RmsProp => "rmsprop",
        }
    }

    /// Neighbouring choice, wrapping at either end.
    pub fn cycle(self, forward: bool) -> Self {
        cycle_in(&Self::ALL, self, forward)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheduler {
    #[default]
    Cosine,
    Step,
    Linear,
    None,
}

impl Scheduler {
    pub const ALL: [Scheduler; 4] = [
        Scheduler::Cosine,
        Scheduler::Step,
        Scheduler::Linear,
        Scheduler::None,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Scheduler::Cosine => "cosine",
            Scheduler::Step => "step",
            Scheduler::Linear => "linear",
            Scheduler::None => "none",
        }
    }

    /// Neighbouring choice, wrapping at either end.
    pub fn cycle(self, forward: bool) -> Self {
        cycle_in(&Self::ALL, self, forward)
    }
}

fn cycle_in<T: Copy + PartialEq>(all: &[T], current: T, forward: bool) -> T {
    let idx = all.iter().position(|v| *v == current).unwrap_or(0);
    let next = if forward { idx + 1 } else { idx + all.len() - 1 };
    all[next % all.len()]
}

/// Step 1 of the wizard.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub name: String,
    pub run_type: RunType,
    #[serde(default)]
    pub description: String,
}

/// Raw training input as typed by the user. Values are signed so that
/// non-positive input can be reported instead of silently wrapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingInput {
    pub batch_size: i64,
    pub epochs: i64,
    pub learning_rate: f64,
    pub optimizer: Optimizer,
    pub scheduler: Scheduler,
    pub weight_decay: f64,
}

impl Default for TrainingInput {
    fn default() -> Self {
        TrainingParams::default().into()
    }
}

impl From<TrainingParams> for TrainingInput {
    fn from(p: TrainingParams) -> Self {
        Self {
            batch_size: i64::from(p.batch_size),
            epochs: i64::from(p.epochs),
            learning_rate: p.learning_rate,
            optimizer: p.optimizer,
            scheduler: p.scheduler,
            weight_decay: p.weight_decay,
        }
    }
}

/// Validated training hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingParams {
    pub batch_size: u32,
    pub epochs: u32,
    pub learning_rate: f64,
    pub optimizer: Optimizer,
    pub scheduler: Scheduler,
    pub weight_decay: f64,
}

impl Default for TrainingParams {
    fn default() -> Self {
        Self {
            batch_size: 32,
            epochs: 100,
            learning_rate: 0.001,
            optimizer: Optimizer::Adam,
            scheduler: Scheduler::Cosine,
            weight_decay: 0.0,
        }
    }
}

/// Step 3 of the wizard. Empty strings mean "not selected".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub model_id: String,
    pub dataset_id: String,
    #[serde(default)]
    pub optimization_id: String,
    pub num_gpus: u32,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            model_id: String::new(),
            dataset_id: String::new(),
            optimization_id: String::new(),
            num_gpus: 1,
        }
    }
}

/// Boilerplate text the engine code is composed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTemplates {
    pub import_text: String,
    pub engine_text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedCode {
    pub engine_py: String,
    pub config_yaml: String,
}

/// An auxiliary code unit attached to a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunModule {
    pub name: String,
    pub source: String,
}

/// Extra metadata sent alongside a run in the `misc` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMisc {
    pub seed: u64,
    pub run_type: RunType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub training: TrainingParams,
}

/// Body of `POST /runs/create` (and `/runs/edit`, which adds `original_run_name`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionPayload {
    pub project_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_run_name: Option<String>,
    pub run_name: String,
    pub model_name: String,
    pub dataset_name: String,
    pub optimization_name: String,
    pub num_gpus: u32,
    pub misc: RunMisc,
    pub engine_py: String,
    pub config_yaml: String,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "serialize_modules"
    )]
    pub modules: Vec<RunModule>,
}

/// Modules go over the wire as a map, in insertion order.
fn serialize_modules<S: Serializer>(modules: &[RunModule], s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(modules.iter().map(|m| (&m.name, &m.source)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunStatus {
    #[default]
    NotRunning,
    Running,
    Completed,
    Failed,
    Pending,
}

impl RunStatus {
    /// Normalize a backend status string. Unknown values map to `NotRunning`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "pending" | "init" => RunStatus::Pending,
            _ => RunStatus::NotRunning,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RunStatus::NotRunning => "Not Running",
            RunStatus::Running => "Running",
            RunStatus::Completed => "Completed",
            RunStatus::Failed => "Failed",
            RunStatus::Pending => "Pending",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Client-side view of a persisted run. Owned by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub status: RunStatus,
    pub model: String,
    pub dataset: String,
    pub optimization: String,
    pub progress: u8,
    pub gpu_ids: Vec<u32>,
    pub created_date: Option<String>,
    pub pid: Option<u32>,
    pub num_gpus: u32,
    pub run_type: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Hyperparameters the run was last saved with, if the server kept them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingParams>,
}

impl RunRecord {
    /// A run that has never been started has no process and no GPUs.
    pub fn never_started(&self) -> bool {
        self.pid.is_none() && self.gpu_ids.is_empty()
    }

    pub fn gpu_list(&self) -> String {
        if self.gpu_ids.is_empty() {
            return "N/A".into();
        }
        self.gpu_ids
            .iter()
            .map(|g| g.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Acknowledgement for start/stop/delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub message: Option<String>,
}

pub const LOGS_NOT_STARTED: &str = "Run has not been started yet. No logs available.";

/// Result of a log tail request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTail {
    NotStarted,
    Lines(Vec<String>),
}

impl LogTail {
    pub fn lines(&self) -> Vec<String> {
        match self {
            LogTail::NotStarted => vec![LOGS_NOT_STARTED.to_string()],
            LogTail::Lines(lines) => lines.clone(),
        }
    }
}

/// Files stored alongside a run on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunFile {
    EnginePy,
    ConfigYaml,
}

impl RunFile {
    pub fn file_name(self) -> &'static str {
        match self {
            RunFile::EnginePy => "engine.py",
            RunFile::ConfigYaml => "config.yaml",
        }
    }
}

/// One selectable model, dataset or optimization method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub display_name: String,
}

impl CatalogEntry {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
        }
    }
}
