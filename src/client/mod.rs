//! Backend access: run lifecycle, selection catalog and code templates.
//!
//! The traits are the seams the wizard and list view talk to. `HttpClient` implements
//! all three against the REST API; tests substitute in-memory fakes.

mod http;
mod wire;

pub use http::{ClientConfig, HttpClient};

use crate::error::ClientError;
use crate::model::{
    Ack, CatalogEntry, LogTail, RunFile, RunRecord, RunTemplates, SubmissionPayload,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Which family of endpoints the backend exposes for runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    /// `/runs/*`, runs keyed by `run_name`.
    #[default]
    Runs,
    /// `/experiments/runs/*`, runs keyed by `run_id`. Has no edit, log or file endpoints.
    Experiments,
}

impl ApiFlavor {
    pub(crate) fn run_path(self, op: &str) -> String {
        match self {
            ApiFlavor::Runs => format!("/runs/{op}"),
            ApiFlavor::Experiments => format!("/experiments/runs/{op}"),
        }
    }

    pub(crate) fn id_key(self) -> &'static str {
        match self {
            ApiFlavor::Runs => "run_name",
            ApiFlavor::Experiments => "run_id",
        }
    }
}

/// Backend operations, used for logging and for generic failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Edit,
    Start,
    Stop,
    Delete,
    Get,
    List,
    Logs,
    File,
    Templates,
    Catalog,
}

impl Operation {
    /// Message shown when the request itself failed.
    pub fn failure_message(self) -> &'static str {
        match self {
            Operation::Create => "Failed to create run.",
            Operation::Edit => "Failed to edit run.",
            Operation::Start => "Failed to start run.",
            Operation::Stop => "Failed to stop run.",
            Operation::Delete => "Failed to delete run.",
            Operation::Get => "Failed to fetch run details.",
            Operation::List => "An error occurred while loading runs.",
            Operation::Logs => "Failed to fetch logs.",
            Operation::File => "Failed to fetch run file.",
            Operation::Templates => "Failed to load code templates.",
            Operation::Catalog => "Error loading models or datasets.",
        }
    }
}

/// Request/response wrapper for run lifecycle calls. No call retries on its own.
#[async_trait]
pub trait RunLifecycle: Send + Sync {
    async fn create(
        &self,
        project: &str,
        payload: &SubmissionPayload,
    ) -> Result<RunRecord, ClientError>;

    /// Update a run; `original_name` identifies it so the payload may rename it.
    async fn edit(
        &self,
        project: &str,
        original_name: &str,
        payload: &SubmissionPayload,
    ) -> Result<RunRecord, ClientError>;

    async fn start(&self, project: &str, run: &str) -> Result<Ack, ClientError>;

    async fn stop(&self, project: &str, run: &str) -> Result<Ack, ClientError>;

    /// Destructive. Callers must have confirmed with the user.
    async fn delete(&self, project: &str, run: &str) -> Result<Ack, ClientError>;

    async fn get(&self, project: &str, run: &str) -> Result<RunRecord, ClientError>;

    async fn list(&self, project: &str) -> Result<Vec<RunRecord>, ClientError>;

    /// Log lines of a run, or `LogTail::NotStarted` if it never ran.
    async fn list_log_tail(&self, project: &str, run: &str) -> Result<LogTail, ClientError>;

    async fn get_file(&self, project: &str, run: &str, file: RunFile)
        -> Result<String, ClientError>;
}

/// Read-only lists of what a run can be built from.
#[async_trait]
pub trait SelectionCatalog: Send + Sync {
    async fn list_models(&self, project: &str) -> Result<Vec<CatalogEntry>, ClientError>;

    async fn list_datasets(&self, project: &str) -> Result<Vec<CatalogEntry>, ClientError>;

    async fn list_optimizations(&self, project: &str)
        -> Result<Vec<CatalogEntry>, ClientError>;
}

/// Server-provided boilerplate for new runs.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn run_templates(&self) -> Result<RunTemplates, ClientError>;
}

/// Everything the wizard needs when entering the selection step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionData {
    pub models: Vec<CatalogEntry>,
    pub datasets: Vec<CatalogEntry>,
    pub optimizations: Vec<CatalogEntry>,
    pub templates: Option<RunTemplates>,
}

/// Load the catalog lists and templates for `project`.
///
/// Models and datasets are required; optimizations and templates degrade to empty.
pub async fn load_selection_data(
    catalog: &dyn SelectionCatalog,
    templates: &dyn TemplateStore,
    project: &str,
) -> Result<SelectionData, ClientError> {
    let (models, datasets, optimizations, tmpl) = futures::join!(
        catalog.list_models(project),
        catalog.list_datasets(project),
        catalog.list_optimizations(project),
        templates.run_templates(),
    );
    let optimizations = optimizations.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "optimization list unavailable");
        Vec::new()
    });
    let templates = match tmpl {
        Ok(t) => Some(t),
        Err(e) => {
            tracing::warn!(error = %e, "run templates unavailable");
            None
        }
    };
    Ok(SelectionData {
        models: models?,
        datasets: datasets?,
        optimizations,
        templates,
    })
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory backend used by wizard, list view and orchestrator tests.

    use super::*;
    use crate::model::{GeneratedCode, RunStatus};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeBackend {
        pub runs: Mutex<Vec<RunRecord>>,
        pub calls: Mutex<Vec<String>>,
        /// Errors returned by the next calls, in order, before normal behavior resumes.
        pub fail_next: Mutex<VecDeque<ClientError>>,
        pub logs: Mutex<Vec<String>>,
        pub files: Mutex<GeneratedCode>,
        pub models: Vec<CatalogEntry>,
        pub datasets: Vec<CatalogEntry>,
        pub optimizations: Vec<CatalogEntry>,
        pub templates: RunTemplates,
        pub catalog_error: Option<ClientError>,
    }

    impl FakeBackend {
        pub fn with_catalog() -> Self {
            Self {
                models: vec![CatalogEntry::new("resnet50"), CatalogEntry::new("vit_b_16")],
                datasets: vec![CatalogEntry::new("CIFAR10"), CatalogEntry::new("CIFAR100")],
                optimizations: vec![CatalogEntry::new("quantize_16bit")],
                templates: RunTemplates {
                    import_text: "import os".into(),
                    engine_text: "train()".into(),
                },
                ..Self::default()
            }
        }

        pub fn add_run(&self, id: &str, status: RunStatus) {
            self.runs.lock().unwrap().push(RunRecord {
                id: id.into(),
                status,
                num_gpus: 1,
                ..RunRecord::default()
            });
        }

        pub fn fail_next(&self, err: ClientError) {
            self.fail_next.lock().unwrap().push_back(err);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<(), ClientError> {
            self.calls.lock().unwrap().push(call);
            match self.fail_next.lock().unwrap().pop_front() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn find(&self, run: &str) -> Result<RunRecord, ClientError> {
            self.runs
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == run)
                .cloned()
                .ok_or_else(|| ClientError::Backend(format!("Run '{run}' not found.")))
        }

        fn set_status(&self, run: &str, status: RunStatus) -> Result<(), ClientError> {
            let mut runs = self.runs.lock().unwrap();
            let r = runs
                .iter_mut()
                .find(|r| r.id == run)
                .ok_or_else(|| ClientError::Backend(format!("Run '{run}' not found.")))?;
            r.status = status;
            if status == RunStatus::Running {
                r.pid = Some(4242);
                r.gpu_ids = (0..r.num_gpus).collect();
            } else {
                r.pid = None;
                r.gpu_ids.clear();
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RunLifecycle for FakeBackend {
        async fn create(
            &self,
            project: &str,
            payload: &SubmissionPayload,
        ) -> Result<RunRecord, ClientError> {
            self.record(format!("create {project} {}", payload.run_name))?;
            if self.find(&payload.run_name).is_ok() {
                return Err(ClientError::Backend(format!(
                    "Run '{}' already exists.",
                    payload.run_name
                )));
            }
            let record = RunRecord {
                id: payload.run_name.clone(),
                model: payload.model_name.clone(),
                dataset: payload.dataset_name.clone(),
                optimization: payload.optimization_name.clone(),
                num_gpus: payload.num_gpus,
                description: payload.misc.description.clone(),
                training: Some(payload.misc.training),
                ..RunRecord::default()
            };
            self.runs.lock().unwrap().push(record.clone());
            Ok(record)
        }

        async fn edit(
            &self,
            project: &str,
            original_name: &str,
            payload: &SubmissionPayload,
        ) -> Result<RunRecord, ClientError> {
            self.record(format!(
                "edit {project} {original_name}->{}",
                payload.run_name
            ))?;
            let mut runs = self.runs.lock().unwrap();
            let r = runs
                .iter_mut()
                .find(|r| r.id == original_name)
                .ok_or_else(|| {
                    ClientError::Backend(format!("Run '{original_name}' does not exist."))
                })?;
            r.id = payload.run_name.clone();
            r.model = payload.model_name.clone();
            r.dataset = payload.dataset_name.clone();
            r.optimization = payload.optimization_name.clone();
            r.num_gpus = payload.num_gpus;
            r.description = payload.misc.description.clone();
            r.training = Some(payload.misc.training);
            Ok(r.clone())
        }

        async fn start(&self, project: &str, run: &str) -> Result<Ack, ClientError> {
            self.record(format!("start {project} {run}"))?;
            self.set_status(run, RunStatus::Running)?;
            Ok(Ack::default())
        }

        async fn stop(&self, project: &str, run: &str) -> Result<Ack, ClientError> {
            self.record(format!("stop {project} {run}"))?;
            self.set_status(run, RunStatus::NotRunning)?;
            Ok(Ack::default())
        }

        async fn delete(&self, project: &str, run: &str) -> Result<Ack, ClientError> {
            self.record(format!("delete {project} {run}"))?;
            self.find(run)?;
            self.runs.lock().unwrap().retain(|r| r.id != run);
            Ok(Ack::default())
        }

        async fn get(&self, project: &str, run: &str) -> Result<RunRecord, ClientError> {
            self.record(format!("get {project} {run}"))?;
            self.find(run)
        }

        async fn list(&self, project: &str) -> Result<Vec<RunRecord>, ClientError> {
            self.record(format!("list {project}"))?;
            Ok(self.runs.lock().unwrap().clone())
        }

        async fn list_log_tail(&self, project: &str, run: &str) -> Result<LogTail, ClientError> {
            self.record(format!("logs {project} {run}"))?;
            let record = self.find(run)?;
            if record.never_started() {
                return Ok(LogTail::NotStarted);
            }
            Ok(LogTail::Lines(self.logs.lock().unwrap().clone()))
        }

        async fn get_file(
            &self,
            project: &str,
            run: &str,
            file: RunFile,
        ) -> Result<String, ClientError> {
            self.record(format!("file {project} {run} {}", file.file_name()))?;
            let files = self.files.lock().unwrap();
            Ok(match file {
                RunFile::EnginePy => files.engine_py.clone(),
                RunFile::ConfigYaml => files.config_yaml.clone(),
            })
        }
    }

    #[async_trait]
    impl SelectionCatalog for FakeBackend {
        async fn list_models(&self, _project: &str) -> Result<Vec<CatalogEntry>, ClientError> {
            match &self.catalog_error {
                Some(e) => Err(e.clone()),
                None => Ok(self.models.clone()),
            }
        }

        async fn list_datasets(&self, _project: &str) -> Result<Vec<CatalogEntry>, ClientError> {
            Ok(self.datasets.clone())
        }

        async fn list_optimizations(
            &self,
            _project: &str,
        ) -> Result<Vec<CatalogEntry>, ClientError> {
            Ok(self.optimizations.clone())
        }
    }

    #[async_trait]
    impl TemplateStore for FakeBackend {
        async fn run_templates(&self) -> Result<RunTemplates, ClientError> {
            Ok(self.templates.clone())
        }
    }
}
