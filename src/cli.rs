use crate::client::{ApiFlavor, ClientConfig, HttpClient, RunLifecycle};
use crate::settings::{self, Settings};
use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "edgeai-runs",
    version,
    about = "Create, launch and monitor EdgeAI training runs"
)]
pub struct Cli {
    /// Base URL of the EdgeAI console backend
    #[arg(long, env = "EDGEAI_BASE_URL")]
    pub base_url: Option<String>,

    /// Project whose runs are shown and created
    #[arg(long, short, env = "EDGEAI_PROJECT")]
    pub project: Option<String>,

    /// Endpoint family the backend exposes for runs
    #[arg(long, value_enum)]
    pub api: Option<ApiFlavor>,

    /// How often the run list (and an open log view) is refreshed
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,

    /// Per-request timeout
    #[arg(long)]
    pub timeout: Option<humantime::Duration>,

    /// Number of GPUs a run may request
    #[arg(long, env = "EDGEAI_GPU_COUNT")]
    pub gpus: Option<u32>,

    /// Session cookie issued by the console login, sent as the Cookie header
    #[arg(long, env = "EDGEAI_SESSION_COOKIE", hide_env_values = true)]
    pub session_cookie: Option<String>,

    /// Settings file (defaults to <config dir>/edgeai-runs/settings.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug logging (RUST_LOG still takes precedence)
    #[arg(long, short)]
    pub verbose: bool,

    /// Print the run list as JSON and exit (no TUI)
    #[arg(long)]
    pub json: bool,

    /// Print the run list as a table and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// Start a run and exit
    #[arg(long, value_name = "RUN", conflicts_with_all = ["stop", "delete", "logs"])]
    pub start: Option<String>,

    /// Stop a run and exit
    #[arg(long, value_name = "RUN", conflicts_with_all = ["delete", "logs"])]
    pub stop: Option<String>,

    /// Delete a run and exit (requires --yes)
    #[arg(long, value_name = "RUN", conflicts_with = "logs")]
    pub delete: Option<String>,

    /// Print a run's log tail and exit
    #[arg(long, value_name = "RUN")]
    pub logs: Option<String>,

    /// Confirm a destructive action
    #[arg(long)]
    pub yes: bool,
}

impl Cli {
    fn one_shot(&self) -> Option<OneShot> {
        if let Some(run) = &self.start {
            return Some(OneShot::Start(run.clone()));
        }
        if let Some(run) = &self.stop {
            return Some(OneShot::Stop(run.clone()));
        }
        if let Some(run) = &self.delete {
            return Some(OneShot::Delete(run.clone()));
        }
        self.logs.clone().map(OneShot::Logs)
    }

    /// Whether this invocation takes over the terminal.
    pub fn wants_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.json && !self.text && self.one_shot().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OneShot {
    Start(String),
    Stop(String),
    Delete(String),
    Logs(String),
}

/// Fully resolved configuration: flags, then environment, then settings file, then defaults.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub project: Option<String>,
    pub poll_interval: Duration,
    pub available_gpus: u32,
}

/// Merge CLI arguments over settings.
pub fn build_config(args: &Cli, settings: &Settings) -> Result<AppConfig> {
    let poll_interval = args
        .poll_interval
        .as_ref()
        .map(|d| **d)
        .or(settings.poll_interval)
        .unwrap_or(DEFAULT_POLL_INTERVAL);
    if poll_interval.is_zero() {
        bail!("--poll-interval must be greater than zero");
    }
    let available_gpus = args.gpus.or(settings.available_gpus).unwrap_or(1);
    if available_gpus == 0 {
        bail!("--gpus must be at least 1");
    }
    let project = args
        .project
        .clone()
        .or_else(|| settings.project.clone())
        .filter(|p| !p.trim().is_empty());

    Ok(AppConfig {
        client: ClientConfig {
            base_url: args
                .base_url
                .clone()
                .or_else(|| settings.base_url.clone())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            timeout: args
                .timeout
                .as_ref()
                .map(|d| **d)
                .or(settings.timeout)
                .unwrap_or(DEFAULT_TIMEOUT),
            user_agent: format!("edgeai-runs/{}", env!("CARGO_PKG_VERSION")),
            session_cookie: args
                .session_cookie
                .clone()
                .or_else(|| settings.session_cookie.clone()),
            flavor: args.api.or(settings.api).unwrap_or_default(),
        },
        project,
        poll_interval,
        available_gpus,
    })
}

pub async fn run(args: Cli) -> Result<()> {
    let settings = settings::load(args.config.as_deref())?;
    let app = build_config(&args, &settings)?;
    tracing::debug!(
        base_url = %app.client.base_url,
        project = ?app.project,
        flavor = ?app.client.flavor,
        "configuration resolved"
    );

    if let Some(action) = args.one_shot() {
        return run_one_shot(&app, action, args.yes).await;
    }

    if args.wants_tui() {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(app).await;
        }
    }

    if args.json {
        return run_json(&app).await;
    }

    run_text(&app).await
}

fn require_project(app: &AppConfig) -> Result<&str> {
    app.project
        .as_deref()
        .context("no project selected; pass --project or set EDGEAI_PROJECT")
}

async fn run_one_shot(app: &AppConfig, action: OneShot, confirmed: bool) -> Result<()> {
    let project = require_project(app)?;
    let client = HttpClient::new(&app.client)?;
    let (out_tx, out_handle) = spawn_output_writer();

    let res = one_shot(&client, project, action, confirmed, &out_tx).await;

    drop(out_tx);
    let _ = out_handle.await;
    res
}

async fn one_shot(
    client: &dyn RunLifecycle,
    project: &str,
    action: OneShot,
    confirmed: bool,
    out_tx: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let ack = match &action {
        OneShot::Start(run) => client
            .start(project, run)
            .await
            .with_context(|| format!("start run '{run}'"))?,
        OneShot::Stop(run) => client
            .stop(project, run)
            .await
            .with_context(|| format!("stop run '{run}'"))?,
        OneShot::Delete(run) => {
            if !confirmed {
                bail!("refusing to delete run '{run}' without --yes");
            }
            client
                .delete(project, run)
                .await
                .with_context(|| format!("delete run '{run}'"))?
        }
        OneShot::Logs(run) => {
            let tail = client
                .list_log_tail(project, run)
                .await
                .with_context(|| format!("fetch logs for run '{run}'"))?;
            for line in tail.lines() {
                let _ = out_tx.send(OutputLine::Stdout(line));
            }
            return Ok(());
        }
    };
    let msg = ack.message.unwrap_or_else(|| match &action {
        OneShot::Start(run) => format!("Run '{run}' started."),
        OneShot::Stop(run) => format!("Run '{run}' stopped."),
        OneShot::Delete(run) => format!("Run '{run}' deleted."),
        OneShot::Logs(_) => String::new(),
    });
    let _ = out_tx.send(OutputLine::Stderr(msg));
    Ok(())
}

async fn run_json(app: &AppConfig) -> Result<()> {
    let project = require_project(app)?;
    let client = HttpClient::new(&app.client)?;
    let runs = client.list(project).await.context("list runs")?;
    let (out_tx, out_handle) = spawn_output_writer();
    let out = serde_json::to_string_pretty(&runs)?;
    let _ = out_tx.send(OutputLine::Stdout(out));
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

async fn run_text(app: &AppConfig) -> Result<()> {
    let runs = match app.project.as_deref() {
        Some(project) => {
            let client = HttpClient::new(&app.client)?;
            client.list(project).await.context("list runs")?
        }
        None => Vec::new(),
    };
    let summary = crate::text_summary::build_text_summary(
        app.project.as_deref(),
        &runs,
        crate::text_summary::now(),
    )?;
    let (out_tx, out_handle) = spawn_output_writer();
    for line in summary.lines {
        let _ = out_tx.send(OutputLine::Stdout(line));
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeBackend;
    use crate::error::ClientError;
    use crate::model::{RunStatus, LOGS_NOT_STARTED};

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["edgeai-runs"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutputLine>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(line) = rx.try_recv() {
            match line {
                OutputLine::Stdout(s) | OutputLine::Stderr(s) => out.push(s),
            }
        }
        out
    }

    #[test]
    fn flags_override_settings() {
        let settings = Settings {
            base_url: Some("http://from-settings".into()),
            project: Some("vision".into()),
            poll_interval: Some(Duration::from_secs(30)),
            available_gpus: Some(8),
            ..Settings::default()
        };
        let args = parse(&["--base-url", "http://flag:5000", "--poll-interval", "2s"]);
        let app = build_config(&args, &settings).unwrap();
        assert_eq!(app.client.base_url, "http://flag:5000");
        assert_eq!(app.project.as_deref(), Some("vision"));
        assert_eq!(app.poll_interval, Duration::from_secs(2));
        assert_eq!(app.available_gpus, 8);
        assert_eq!(app.client.flavor, ApiFlavor::Runs);
    }

    #[test]
    fn defaults_apply() {
        let app = build_config(&parse(&[]), &Settings::default()).unwrap();
        assert_eq!(app.poll_interval, DEFAULT_POLL_INTERVAL);
        assert_eq!(app.client.timeout, DEFAULT_TIMEOUT);
        assert_eq!(app.available_gpus, 1);
        assert!(app.client.user_agent.starts_with("edgeai-runs/"));
    }

    #[test]
    fn rejects_zero_gpus() {
        assert!(build_config(&parse(&["--gpus", "0"]), &Settings::default()).is_err());
    }

    #[test]
    fn one_shot_flags_conflict() {
        let argv = ["edgeai-runs", "--start", "a", "--stop", "b"];
        assert!(Cli::try_parse_from(argv).is_err());
        let args = parse(&["--api", "experiments", "--logs", "exp1"]);
        assert_eq!(args.one_shot(), Some(OneShot::Logs("exp1".into())));
        assert_eq!(args.api, Some(ApiFlavor::Experiments));
        assert!(!args.wants_tui());
    }

    #[tokio::test]
    async fn delete_needs_confirmation() {
        let backend = FakeBackend::default();
        backend.add_run("exp1", RunStatus::NotRunning);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = one_shot(&backend, "p", OneShot::Delete("exp1".into()), false, &tx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("--yes"));
        assert!(backend.calls().is_empty());

        one_shot(&backend, "p", OneShot::Delete("exp1".into()), true, &tx)
            .await
            .unwrap();
        assert_eq!(backend.calls(), vec!["delete p exp1".to_string()]);
    }

    #[tokio::test]
    async fn backend_message_is_the_cause() {
        let backend = FakeBackend::default();
        backend.add_run("exp1", RunStatus::NotRunning);
        backend.fail_next(ClientError::Backend("GPU busy".into()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = one_shot(&backend, "p", OneShot::Start("exp1".into()), false, &tx)
            .await
            .unwrap_err();
        assert_eq!(format!("{err:#}"), "start run 'exp1': GPU busy");
    }

    #[tokio::test]
    async fn logs_print_placeholder_for_unstarted_runs() {
        let backend = FakeBackend::default();
        backend.add_run("exp1", RunStatus::NotRunning);
        let (tx, mut rx) = mpsc::unbounded_channel();
        one_shot(&backend, "p", OneShot::Logs("exp1".into()), false, &tx)
            .await
            .unwrap();
        assert_eq!(drain(&mut rx), vec![LOGS_NOT_STARTED.to_string()]);
    }
}
