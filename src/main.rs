mod builder;
mod cli;
mod client;
mod error;
mod list_view;
mod model;
mod orchestrator;
mod settings;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;
mod wizard;

use anyhow::Result;
use clap::Parser;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool, tui: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    // The alternate screen swallows stderr, so TUI sessions log to a file.
    if tui {
        let file = settings::log_path().and_then(|path| {
            std::fs::create_dir_all(path.parent()?).ok()?;
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        match file {
            Some(file) => {
                let _ = builder.with_ansi(false).with_writer(Mutex::new(file)).try_init();
            }
            None => {
                let _ = builder.with_writer(std::io::sink).try_init();
            }
        }
        return;
    }
    let _ = builder.with_writer(std::io::stderr).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_tui = args.wants_tui();
    init_tracing(args.verbose, is_tui);

    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit with code 0 on success, especially for non-TUI modes
            if !is_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "exiting");
            Err(e)
        }
    }
}
