//! Response interpretation and wire shapes.
//!
//! The backend is loose about shapes: errors arrive as `{error}` or `{err}` with any status
//! code, runs come in two flavors, and numbers sometimes arrive as strings.

use super::Operation;
use crate::error::ClientError;
use crate::model::{CatalogEntry, RunRecord, RunStatus, TrainingParams};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Turn a raw HTTP answer into the JSON body or a `ClientError`.
///
/// An error field in the body wins over the status code. A non-2xx answer without one is a
/// transport failure, as is a 2xx body that is not JSON.
pub(crate) fn interpret(
    status: StatusCode,
    body: &str,
    op: Operation,
) -> Result<Value, ClientError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if let Some(msg) = parsed.as_ref().and_then(error_message) {
        tracing::debug!(?op, %status, error = %msg, "backend reported error");
        return Err(ClientError::Backend(msg));
    }
    if !status.is_success() {
        tracing::warn!(?op, %status, body = %truncate(body), "request failed");
        return Err(ClientError::Transport(op.failure_message().to_string()));
    }
    match parsed {
        Some(v) => Ok(v),
        None if body.trim().is_empty() => Ok(Value::Object(Default::default())),
        None => {
            tracing::warn!(?op, body = %truncate(body), "response is not JSON");
            Err(ClientError::Transport(op.failure_message().to_string()))
        }
    }
}

/// Decode a required shape out of an interpreted body.
pub(crate) fn decode<T: DeserializeOwned>(value: Value, op: Operation) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| {
        tracing::warn!(?op, error = %e, "unexpected response shape");
        ClientError::Transport(op.failure_message().to_string())
    })
}

fn error_message(v: &Value) -> Option<String> {
    let obj = v.as_object()?;
    ["error", "err"].iter().find_map(|k| match obj.get(*k)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    })
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(200) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

/// A run as `/runs/list` reports it.
#[derive(Debug, Deserialize)]
pub(crate) struct RunWire {
    pub run_name: String,
    #[serde(default)]
    pub created_date: Option<String>,
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub dataset_name: String,
    #[serde(default)]
    pub optimization_name: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub gpu_ids: Vec<u32>,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default, deserialize_with = "lenient_u32")]
    pub num_gpus: u32,
    #[serde(default)]
    pub misc: Option<Value>,
}

impl From<RunWire> for RunRecord {
    fn from(w: RunWire) -> Self {
        let misc = w.misc.unwrap_or(Value::Null);
        let run_type = misc
            .get("run_type")
            .and_then(Value::as_str)
            .map(str::to_string);
        let description = misc
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        // Runs saved by other clients may carry a differently shaped block; ignore it then.
        let training = misc
            .get("training")
            .and_then(|t| serde_json::from_value::<TrainingParams>(t.clone()).ok());
        RunRecord {
            id: w.run_name,
            status: RunStatus::parse(&w.status),
            model: w.model_name,
            dataset: w.dataset_name,
            optimization: w.optimization_name.unwrap_or_default(),
            progress: 0,
            gpu_ids: w.gpu_ids,
            created_date: w.created_date,
            pid: w.pid,
            num_gpus: w.num_gpus,
            run_type,
            description,
            training,
        }
    }
}

/// A run as `/experiments/runs/list` reports it.
#[derive(Debug, Deserialize)]
pub(crate) struct ExperimentRunWire {
    pub id: Value,
    #[serde(default, rename = "type")]
    pub run_type: Option<String>,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub dataset: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "lenient_ids")]
    pub gpu_ids: Vec<u32>,
    #[serde(default)]
    pub pid: Option<u32>,
}

impl From<ExperimentRunWire> for RunRecord {
    fn from(w: ExperimentRunWire) -> Self {
        let id = match w.id {
            Value::String(s) => s,
            other => other.to_string(),
        };
        RunRecord {
            id,
            status: RunStatus::parse(&w.status),
            model: w.model,
            dataset: w.dataset,
            optimization: String::new(),
            progress: clamp_progress(w.progress),
            num_gpus: w.gpu_ids.len() as u32,
            gpu_ids: w.gpu_ids,
            created_date: w.created_at,
            pid: w.pid,
            run_type: w.run_type,
            ..RunRecord::default()
        }
    }
}

/// Progress is reported as a percentage, sometimes fractional or out of range.
pub(crate) fn clamp_progress(p: Option<f64>) -> u8 {
    match p {
        Some(v) if v.is_finite() => v.round().clamp(0.0, 100.0) as u8,
        _ => 0,
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunList<T> {
    #[serde(default = "Vec::new")]
    pub runs: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogLines {
    #[serde(default)]
    pub lines: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FileContent {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoadedTemplate {
    #[serde(default)]
    pub runs_py: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreatedExperiment {
    pub run_id: Value,
}

/// Pull `[{<name_key>: ...}]` out of `{<list_key>: [...]}`.
pub(crate) fn catalog_entries(
    body: &Value,
    list_key: &str,
    name_key: &str,
) -> Result<Vec<CatalogEntry>, ClientError> {
    let items = body
        .get(list_key)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            tracing::warn!(list_key, "catalog response lacks list");
            ClientError::Transport(Operation::Catalog.failure_message().to_string())
        })?;
    Ok(items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            other => other.get(name_key).and_then(Value::as_str).map(str::to_string),
        })
        .map(CatalogEntry::new)
        .collect())
}

fn lenient_ids<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u32>, D::Error> {
    let raw = Option::<Value>::deserialize(d)?;
    let ids = match raw {
        Some(Value::Array(items)) => items.iter().filter_map(value_as_u32).collect(),
        Some(Value::String(s)) => s
            .split(',')
            .filter_map(|p| p.trim().parse().ok())
            .collect(),
        _ => Vec::new(),
    };
    Ok(ids)
}

fn lenient_u32<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
    let raw = Option::<Value>::deserialize(d)?;
    Ok(raw.as_ref().and_then(value_as_u32).unwrap_or(0))
}

fn value_as_u32(v: &Value) -> Option<u32> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn error_body_wins_over_status() {
        let err =
            interpret(StatusCode::OK, r#"{"error":"GPU busy"}"#, Operation::Start).unwrap_err();
        assert_eq!(err, ClientError::Backend("GPU busy".into()));

        let err = interpret(
            StatusCode::NOT_FOUND,
            r#"{"error":"Run 'x' not found."}"#,
            Operation::Start,
        )
        .unwrap_err();
        assert_eq!(err, ClientError::Backend("Run 'x' not found.".into()));

        let err = interpret(
            StatusCode::BAD_REQUEST,
            r#"{"err":"bad template"}"#,
            Operation::Templates,
        )
        .unwrap_err();
        assert_eq!(err, ClientError::Backend("bad template".into()));
    }

    #[test]
    fn non_success_without_error_is_transport() {
        let err =
            interpret(StatusCode::BAD_GATEWAY, "<html>oops</html>", Operation::Stop).unwrap_err();
        assert_eq!(err, ClientError::Transport("Failed to stop run.".into()));
    }

    #[test]
    fn empty_and_null_errors_are_ignored() {
        let v = interpret(StatusCode::OK, r#"{"error":null,"runs":[]}"#, Operation::List).unwrap();
        assert_eq!(v["runs"], json!([]));
        let v = interpret(StatusCode::OK, "", Operation::Delete).unwrap();
        assert_eq!(v, json!({}));
        assert!(interpret(StatusCode::OK, "not json", Operation::List).is_err());
    }

    #[test]
    fn runs_flavor_record() {
        let body = json!({
            "run_name": "exp1",
            "created_date": "2025-01-02 10:00:00",
            "model_name": "resnet50",
            "dataset_name": "CIFAR10",
            "optimization_name": "",
            "status": "Running",
            "gpu_ids": [0, 1],
            "pid": 1234,
            "num_gpus": 2,
            "misc": {"run_type": "train"}
        });
        let rec: RunRecord = decode::<RunWire>(body, Operation::List).unwrap().into();
        assert_eq!(rec.id, "exp1");
        assert_eq!(rec.status, RunStatus::Running);
        assert_eq!(rec.gpu_list(), "0, 1");
        assert_eq!(rec.pid, Some(1234));
        assert_eq!(rec.run_type.as_deref(), Some("train"));
        assert_eq!(rec.training, None);
    }

    #[test]
    fn stored_misc_survives_decoding() {
        let body = json!({
            "run_name": "exp1",
            "misc": {
                "seed": 42,
                "run_type": "finetune",
                "description": "warm start",
                "training": {
                    "batch_size": 64, "epochs": 10, "learning_rate": 0.01,
                    "optimizer": "sgd", "scheduler": "step", "weight_decay": 0.0001
                }
            }
        });
        let rec: RunRecord = decode::<RunWire>(body, Operation::List).unwrap().into();
        assert_eq!(rec.description, "warm start");
        let t = rec.training.unwrap();
        assert_eq!((t.batch_size, t.epochs), (64, 10));
        assert_eq!(t.optimizer, crate::model::Optimizer::Sgd);

        let body = json!({"run_name": "exp2", "misc": {"training": {"epochs": "many"}}});
        let rec: RunRecord = decode::<RunWire>(body, Operation::List).unwrap().into();
        assert_eq!(rec.training, None);
    }

    #[test]
    fn experiments_flavor_record() {
        let body = json!({
            "id": 7, "name": "exp", "type": "train", "model": "m", "dataset": "d",
            "status": "completed", "progress": 140.2, "created_at": "2025-01-02"
        });
        let rec: RunRecord = decode::<ExperimentRunWire>(body, Operation::List)
            .unwrap()
            .into();
        assert_eq!(rec.id, "7");
        assert_eq!(rec.status, RunStatus::Completed);
        assert_eq!(rec.progress, 100);
        assert!(rec.never_started());
    }

    #[test]
    fn lenient_numbers() {
        let body = json!({"run_name": "a", "gpu_ids": "0, 2", "num_gpus": "2"});
        let rec: RunRecord = decode::<RunWire>(body, Operation::List).unwrap().into();
        assert_eq!(rec.gpu_ids, vec![0, 2]);
        assert_eq!(rec.num_gpus, 2);
        assert_eq!(clamp_progress(Some(-3.0)), 0);
        assert_eq!(clamp_progress(Some(f64::NAN)), 0);
        assert_eq!(clamp_progress(Some(42.6)), 43);
    }

    #[test]
    fn catalog_lists() {
        let body = json!({
            "models": [{"model_name": "resnet50"}, {"model_name": "vit"}, {"other": 1}]
        });
        let entries = catalog_entries(&body, "models", "model_name").unwrap();
        assert_eq!(entries, vec![CatalogEntry::new("resnet50"), CatalogEntry::new("vit")]);
        assert!(catalog_entries(&json!({}), "datasets", "dataset_name").is_err());
    }
}
