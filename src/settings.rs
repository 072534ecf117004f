//! Optional settings file with defaults for the command-line flags.
//!
//! Lives at `<config dir>/edgeai-runs/settings.json`. Every key is optional; flags and
//! environment variables win over anything set here.

use crate::client::ApiFlavor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "edgeai-runs";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub base_url: Option<String>,
    pub project: Option<String>,
    pub api: Option<ApiFlavor>,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Option<Duration>,
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
    pub available_gpus: Option<u32>,
    pub session_cookie: Option<String>,
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("settings.json"))
}

/// Where the TUI writes its log, since stderr is covered by the alternate screen.
pub fn log_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_DIR).join("edgeai-runs.log"))
}

/// Load settings from `path`, or the default location. A missing file yields defaults.
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let explicit = path.is_some();
    let Some(path) = path.map(Path::to_path_buf).or_else(default_path) else {
        return Ok(Settings::default());
    };
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("read settings {}", path.display()));
        }
    };
    let settings: Settings = serde_json::from_str(&raw)
        .with_context(|| format!("parse settings {}", path.display()))?;
    tracing::debug!(path = %path.display(), "settings loaded");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("edgeai-runs-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn parses_durations_and_flavor() {
        let path = temp_file(
            "full.json",
            r#"{"base_url":"http://gpu-box:5000","project":"vision","api":"experiments",
                "poll_interval":"2s","timeout":"1m","available_gpus":4}"#,
        );
        let s = load(Some(&path)).unwrap();
        assert_eq!(
            s,
            Settings {
                base_url: Some("http://gpu-box:5000".into()),
                project: Some("vision".into()),
                api: Some(ApiFlavor::Experiments),
                poll_interval: Some(Duration::from_secs(2)),
                timeout: Some(Duration::from_secs(60)),
                available_gpus: Some(4),
                session_cookie: None,
            }
        );
    }

    #[test]
    fn empty_object_is_all_defaults() {
        let path = temp_file("empty.json", "{}");
        assert_eq!(load(Some(&path)).unwrap(), Settings::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("edgeai-runs-definitely-missing.json");
        let err = load(Some(&path)).unwrap_err();
        assert!(format!("{err:#}").contains("read settings"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let path = temp_file("typo.json", r#"{"poll_intervall":"2s"}"#);
        assert!(load(Some(&path)).is_err());
    }
}
