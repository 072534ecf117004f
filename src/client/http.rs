use super::wire::{
    self, catalog_entries, CreatedExperiment, ExperimentRunWire, FileContent, LoadedTemplate,
    LogLines, RunList, RunWire,
};
use super::{ApiFlavor, Operation, RunLifecycle, SelectionCatalog, TemplateStore};
use crate::error::ClientError;
use crate::model::{
    Ack, CatalogEntry, LogTail, RunFile, RunRecord, RunTemplates, SubmissionPayload,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    /// Raw `Cookie` header value issued by the console's login.
    pub session_cookie: Option<String>,
    pub flavor: ApiFlavor,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".into(),
            timeout: Duration::from_secs(10),
            user_agent: format!("edgeai-runs/{}", env!("CARGO_PKG_VERSION")),
            session_cookie: None,
            flavor: ApiFlavor::Runs,
        }
    }
}

/// REST client for the console backend.
#[derive(Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    base: Url,
    flavor: ApiFlavor,
}

impl HttpClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &cfg.session_cookie {
            let mut v = HeaderValue::from_str(cookie).context("invalid session cookie")?;
            v.set_sensitive(true);
            headers.insert(COOKIE, v);
        }
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .timeout(cfg.timeout)
            .default_headers(headers)
            .build()
            .context("build http client")?;

        // Join relative paths against the base, so it needs a trailing slash.
        let mut raw = cfg.base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw).with_context(|| format!("invalid base url {}", cfg.base_url))?;

        Ok(Self {
            http,
            base,
            flavor: cfg.flavor,
        })
    }

    pub fn flavor(&self) -> ApiFlavor {
        self.flavor
    }

    fn url(&self, path: &str, op: Operation) -> Result<Url, ClientError> {
        self.base.join(path.trim_start_matches('/')).map_err(|e| {
            tracing::warn!(?op, path, error = %e, "cannot build request url");
            ClientError::Transport(op.failure_message().to_string())
        })
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        op: Operation,
    ) -> Result<Value, ClientError> {
        let resp = req.send().await.map_err(|e| transport(op, e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport(op, e))?;
        wire::interpret(status, &body, op)
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        op: Operation,
    ) -> Result<Value, ClientError> {
        let url = self.url(path, op)?;
        tracing::debug!(?op, %url, "POST");
        self.send(self.http.post(url).json(body), op).await
    }

    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        op: Operation,
    ) -> Result<Value, ClientError> {
        let mut url = self.url(path, op)?;
        url.query_pairs_mut().extend_pairs(query);
        tracing::debug!(?op, %url, "GET");
        self.send(self.http.get(url), op).await
    }

    /// Raw text GET; only the status code decides success.
    async fn get_text(
        &self,
        path: &str,
        query: &[(&str, &str)],
        op: Operation,
    ) -> Result<String, ClientError> {
        let mut url = self.url(path, op)?;
        url.query_pairs_mut().extend_pairs(query);
        tracing::debug!(?op, %url, "GET");
        let resp = self.http.get(url).send().await.map_err(|e| transport(op, e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| transport(op, e))?;
        if !status.is_success() {
            return wire::interpret(status, &body, op).map(|_| String::new());
        }
        Ok(body)
    }

    fn run_ref(&self, project: &str, run: &str) -> Value {
        let mut body = json!({ "project_name": project });
        body[self.flavor.id_key()] = Value::String(run.to_string());
        body
    }

    async fn run_action(
        &self,
        op_name: &str,
        project: &str,
        run: &str,
        op: Operation,
    ) -> Result<Ack, ClientError> {
        let body = self.run_ref(project, run);
        let v = self.post_json(&self.flavor.run_path(op_name), &body, op).await?;
        tracing::info!(?op, project, run, "run action accepted");
        Ok(Ack {
            message: v.get("message").and_then(Value::as_str).map(str::to_string),
        })
    }

    /// Synthesized record for when the server accepted a write but cannot report it back.
    fn record_from_payload(id: String, payload: &SubmissionPayload) -> RunRecord {
        RunRecord {
            id,
            model: payload.model_name.clone(),
            dataset: payload.dataset_name.clone(),
            optimization: payload.optimization_name.clone(),
            num_gpus: payload.num_gpus,
            run_type: Some(payload.misc.run_type.as_str().to_string()),
            description: payload.misc.description.clone(),
            training: Some(payload.misc.training),
            ..RunRecord::default()
        }
    }

    async fn fetch_after_write(
        &self,
        project: &str,
        id: String,
        payload: &SubmissionPayload,
    ) -> RunRecord {
        match self.get(project, &id).await {
            Ok(rec) => rec,
            Err(e) => {
                tracing::warn!(run = %id, error = %e, "run saved but could not be re-read");
                Self::record_from_payload(id, payload)
            }
        }
    }

    fn experiment_config(payload: &SubmissionPayload) -> Value {
        json!({
            "experiment_name": payload.run_name,
            "basic": {
                "type": payload.misc.run_type,
                "description": payload.misc.description,
            },
            "model": { "module": payload.model_name, "name": payload.model_name },
            "dataset": { "module": payload.dataset_name, "name": payload.dataset_name },
            "optimization": { "name": payload.optimization_name },
            "training": payload.misc.training,
            "num_gpus": payload.num_gpus,
            "engine_py": payload.engine_py,
            "yaml_content": payload.config_yaml,
        })
    }
}

/// The experiments API has no endpoint for `what`; fail without sending anything.
fn unsupported(what: &str) -> ClientError {
    ClientError::Backend(format!("{what} is not supported by the experiments API."))
}

fn transport(op: Operation, e: reqwest::Error) -> ClientError {
    tracing::warn!(?op, error = %e, timeout = e.is_timeout(), "request failed");
    ClientError::Transport(op.failure_message().to_string())
}

#[async_trait]
impl RunLifecycle for HttpClient {
    async fn create(
        &self,
        project: &str,
        payload: &SubmissionPayload,
    ) -> Result<RunRecord, ClientError> {
        let id = match self.flavor {
            ApiFlavor::Runs => {
                self.post_json("/runs/create", payload, Operation::Create).await?;
                payload.run_name.clone()
            }
            ApiFlavor::Experiments => {
                let body = json!({
                    "project_name": project,
                    "config": Self::experiment_config(payload),
                });
                let v = self
                    .post_json("/experiments/runs/create", &body, Operation::Create)
                    .await?;
                match wire::decode::<CreatedExperiment>(v, Operation::Create)?.run_id {
                    Value::String(s) => s,
                    other => other.to_string(),
                }
            }
        };
        tracing::info!(project, run = %id, "run created");
        Ok(self.fetch_after_write(project, id, payload).await)
    }

    async fn edit(
        &self,
        project: &str,
        original_name: &str,
        payload: &SubmissionPayload,
    ) -> Result<RunRecord, ClientError> {
        let mut payload = payload.clone();
        payload.original_run_name = Some(original_name.to_string());
        let id = match self.flavor {
            ApiFlavor::Runs => {
                self.post_json("/runs/edit", &payload, Operation::Edit).await?;
                payload.run_name.clone()
            }
            ApiFlavor::Experiments => return Err(unsupported("Editing a run")),
        };
        tracing::info!(project, from = original_name, to = %payload.run_name, "run edited");
        Ok(self.fetch_after_write(project, id, &payload).await)
    }

    async fn start(&self, project: &str, run: &str) -> Result<Ack, ClientError> {
        self.run_action("start", project, run, Operation::Start).await
    }

    async fn stop(&self, project: &str, run: &str) -> Result<Ack, ClientError> {
        self.run_action("stop", project, run, Operation::Stop).await
    }

    async fn delete(&self, project: &str, run: &str) -> Result<Ack, ClientError> {
        self.run_action("delete", project, run, Operation::Delete).await
    }

    async fn get(&self, project: &str, run: &str) -> Result<RunRecord, ClientError> {
        match self.flavor {
            ApiFlavor::Runs => {
                // No single-run endpoint; find it in the list.
                let runs = self.list(project).await.map_err(|e| match e {
                    ClientError::Transport(_) => {
                        ClientError::Transport(Operation::Get.failure_message().to_string())
                    }
                    other => other,
                })?;
                runs.into_iter()
                    .find(|r| r.id == run)
                    .ok_or_else(|| ClientError::Backend(format!("Run '{run}' not found.")))
            }
            ApiFlavor::Experiments => {
                let body = self.run_ref(project, run);
                let v = self
                    .post_json("/experiments/runs/get", &body, Operation::Get)
                    .await?;
                let inner = v.get("run").cloned().unwrap_or(v);
                Ok(wire::decode::<ExperimentRunWire>(inner, Operation::Get)?.into())
            }
        }
    }

    async fn list(&self, project: &str) -> Result<Vec<RunRecord>, ClientError> {
        let body = json!({ "project_name": project });
        let v = self
            .post_json(&self.flavor.run_path("list"), &body, Operation::List)
            .await?;
        let runs: Vec<RunRecord> = match self.flavor {
            ApiFlavor::Runs => wire::decode::<RunList<RunWire>>(v, Operation::List)?
                .runs
                .into_iter()
                .map(RunRecord::from)
                .collect(),
            ApiFlavor::Experiments => {
                wire::decode::<RunList<ExperimentRunWire>>(v, Operation::List)?
                    .runs
                    .into_iter()
                    .map(RunRecord::from)
                    .collect()
            }
        };
        tracing::debug!(project, count = runs.len(), "runs listed");
        Ok(runs)
    }

    async fn list_log_tail(&self, project: &str, run: &str) -> Result<LogTail, ClientError> {
        if self.flavor == ApiFlavor::Experiments {
            return Err(unsupported("Fetching run logs"));
        }
        let record = self.get(project, run).await.map_err(|e| match e {
            ClientError::Transport(_) => {
                ClientError::Transport(Operation::Logs.failure_message().to_string())
            }
            other => other,
        })?;
        if record.never_started() {
            return Ok(LogTail::NotStarted);
        }
        let v = self
            .get_json(
                "/runs/logs",
                &[("project_name", project), ("run_name", run)],
                Operation::Logs,
            )
            .await?;
        Ok(LogTail::Lines(wire::decode::<LogLines>(v, Operation::Logs)?.lines))
    }

    async fn get_file(
        &self,
        project: &str,
        run: &str,
        file: RunFile,
    ) -> Result<String, ClientError> {
        if self.flavor == ApiFlavor::Experiments {
            return Err(unsupported("Fetching run files"));
        }
        let v = self
            .get_json(
                "/runs/get_file",
                &[("project_name", project), ("run_name", run), ("file", file.file_name())],
                Operation::File,
            )
            .await?;
        Ok(wire::decode::<FileContent>(v, Operation::File)?.content)
    }
}

#[async_trait]
impl SelectionCatalog for HttpClient {
    async fn list_models(&self, project: &str) -> Result<Vec<CatalogEntry>, ClientError> {
        let body = json!({ "project_name": project });
        let v = self.post_json("/models/list", &body, Operation::Catalog).await?;
        catalog_entries(&v, "models", "model_name")
    }

    async fn list_datasets(&self, project: &str) -> Result<Vec<CatalogEntry>, ClientError> {
        let body = json!({ "project_name": project });
        let v = self.post_json("/datasets/list", &body, Operation::Catalog).await?;
        catalog_entries(&v, "datasets", "dataset_name")
    }

    async fn list_optimizations(&self, project: &str) -> Result<Vec<CatalogEntry>, ClientError> {
        let body = json!({ "project_name": project });
        let v = self
            .post_json("/optimizations/list", &body, Operation::Catalog)
            .await?;
        catalog_entries(&v, "optimizations", "optimize_method_name")
    }
}

#[async_trait]
impl TemplateStore for HttpClient {
    async fn run_templates(&self) -> Result<RunTemplates, ClientError> {
        match self.flavor {
            ApiFlavor::Runs => {
                let (import_text, engine_text) = futures::try_join!(
                    self.get_text(
                        "/runs/get_template",
                        &[("file", "import.txt")],
                        Operation::Templates
                    ),
                    self.get_text(
                        "/runs/get_template",
                        &[("file", "engine.txt")],
                        Operation::Templates
                    ),
                )?;
                Ok(RunTemplates {
                    import_text,
                    engine_text,
                })
            }
            ApiFlavor::Experiments => {
                let v = self
                    .post_json("/experiments/load_template", &json!({}), Operation::Templates)
                    .await?;
                let t = wire::decode::<LoadedTemplate>(v, Operation::Templates)?;
                Ok(RunTemplates {
                    import_text: String::new(),
                    engine_text: t.runs_py,
                })
            }
        }
    }
}
