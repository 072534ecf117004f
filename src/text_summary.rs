//! Text summary builder for CLI output.
//!
//! Formats the run list as a fixed-width table for `--text` mode.

use crate::list_view::{NO_PROJECT, NO_RUNS};
use crate::model::RunRecord;
use anyhow::{Context, Result};
use time::{macros::format_description, OffsetDateTime};

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Local time, or UTC when the local offset cannot be determined.
pub(crate) fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Build a text table of `runs` for `project`, stamped with `at`.
pub(crate) fn build_text_summary(
    project: Option<&str>,
    runs: &[RunRecord],
    at: OffsetDateTime,
) -> Result<TextSummary> {
    let mut lines = Vec::new();
    let Some(project) = project else {
        lines.push(NO_PROJECT.to_string());
        return Ok(TextSummary { lines });
    };

    let stamp = at
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .context("format timestamp")?;
    lines.push(format!("Project: {project}  ({} runs, as of {stamp})", runs.len()));

    if runs.is_empty() {
        lines.push(NO_RUNS.to_string());
        return Ok(TextSummary { lines });
    }

    let name_w = runs.iter().map(|r| r.id.len()).max().unwrap_or(0).max(4);
    let model_w = runs.iter().map(|r| r.model.len()).max().unwrap_or(0).max(5);
    let data_w = runs.iter().map(|r| r.dataset.len()).max().unwrap_or(0).max(7);
    lines.push(format!(
        "{:<name_w$}  {:<11}  {:<model_w$}  {:<data_w$}  {:<8}  {:>4}  CREATED",
        "NAME", "STATUS", "MODEL", "DATASET", "GPUS", "PROG"
    ));
    for r in runs {
        lines.push(format!(
            "{:<name_w$}  {:<11}  {:<model_w$}  {:<data_w$}  {:<8}  {:>3}%  {}",
            r.id,
            r.status.label(),
            r.model,
            r.dataset,
            r.gpu_list(),
            r.progress,
            r.created_date.as_deref().unwrap_or("-"),
        ));
    }

    let running = runs.iter().filter(|r| r.pid.is_some()).count();
    if running > 0 {
        lines.push(format!("{running} run(s) hold a process"));
    }
    Ok(TextSummary { lines })
}
