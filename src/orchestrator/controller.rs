//! Request controller.
//!
//! Every command becomes its own task so a slow call never holds up another run's controls.
//! Poll ticks are emitted only while polling is enabled and stop for good on quit.

use crate::client::{
    load_selection_data, RunLifecycle, SelectionCatalog, SelectionData, TemplateStore,
};
use crate::error::ClientError;
use crate::list_view::{ListEffect, ListOutcome};
use crate::model::RunRecord;
use crate::wizard::SubmitRequest;
use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::{Duration, MissedTickBehavior};

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    List(ListEffect),
    LoadSelection { ticket: u64, project: String },
    Submit(SubmitRequest),
    SetPolling(bool),
    Quit,
}

/// Results and timer ticks delivered back to the UI.
#[derive(Debug)]
pub(crate) enum AppEvent {
    List(ListOutcome),
    SelectionLoaded {
        ticket: u64,
        result: Result<SelectionData, ClientError>,
    },
    Submitted(Result<RunRecord, ClientError>),
    PollTick,
}

/// Backends the controller dispatches to.
#[derive(Clone)]
pub(crate) struct Services {
    pub lifecycle: Arc<dyn RunLifecycle>,
    pub catalog: Arc<dyn SelectionCatalog>,
    pub templates: Arc<dyn TemplateStore>,
}

impl Services {
    pub fn from_client<C>(client: C) -> Self
    where
        C: RunLifecycle + SelectionCatalog + TemplateStore + 'static,
    {
        let client = Arc::new(client);
        Self {
            lifecycle: client.clone(),
            catalog: client.clone(),
            templates: client,
        }
    }
}

fn dispatch(services: &Services, cmd: UiCommand, event_tx: &UnboundedSender<AppEvent>) {
    let services = services.clone();
    let event_tx = event_tx.clone();
    match cmd {
        UiCommand::List(effect) => {
            tokio::spawn(async move {
                let outcome = effect.execute(services.lifecycle.as_ref()).await;
                let _ = event_tx.send(AppEvent::List(outcome));
            });
        }
        UiCommand::LoadSelection { ticket, project } => {
            tokio::spawn(async move {
                let result = load_selection_data(
                    services.catalog.as_ref(),
                    services.templates.as_ref(),
                    &project,
                )
                .await;
                let _ = event_tx.send(AppEvent::SelectionLoaded { ticket, result });
            });
        }
        UiCommand::Submit(req) => {
            tokio::spawn(async move {
                let result = req.send(services.lifecycle.as_ref()).await;
                let _ = event_tx.send(AppEvent::Submitted(result));
            });
        }
        UiCommand::SetPolling(_) | UiCommand::Quit => {}
    }
}

/// Execute UI commands until `Quit` (or the UI hangs up), emitting results as events.
pub(crate) async fn run_controller(
    services: Services,
    poll_interval: Duration,
    event_tx: UnboundedSender<AppEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let mut polling = true;
    let mut poll = tokio::time::interval(poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Quit) | None => {
                        tracing::debug!("controller stopping");
                        break;
                    }
                    Some(UiCommand::SetPolling(on)) => {
                        if on && !polling {
                            poll.reset();
                        }
                        polling = on;
                        tracing::debug!(polling, "poll state changed");
                    }
                    Some(cmd) => dispatch(&services, cmd, &event_tx),
                }
            }
            _ = poll.tick(), if polling => {
                if event_tx.send(AppEvent::PollTick).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::FakeBackend;
    use crate::model::RunStatus;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn spawn_controller(
        backend: FakeBackend,
        interval: Duration,
    ) -> (
        UnboundedSender<UiCommand>,
        UnboundedReceiver<AppEvent>,
        tokio::task::JoinHandle<Result<()>>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let services = Services::from_client(backend);
        let handle = tokio::spawn(run_controller(services, interval, event_tx, cmd_rx));
        (cmd_tx, event_rx, handle)
    }

    async fn next_non_tick(rx: &mut UnboundedReceiver<AppEvent>) -> AppEvent {
        loop {
            let ev = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("event in time")
                .expect("channel open");
            if !matches!(ev, AppEvent::PollTick) {
                return ev;
            }
        }
    }

    #[tokio::test]
    async fn executes_list_effects() {
        let backend = FakeBackend::default();
        backend.add_run("exp1", RunStatus::Running);
        let (cmd_tx, mut rx, handle) = spawn_controller(backend, Duration::from_secs(3600));

        cmd_tx
            .send(UiCommand::List(ListEffect::Refresh {
                seq: 1,
                project: "p".into(),
            }))
            .unwrap();
        match next_non_tick(&mut rx).await {
            AppEvent::List(ListOutcome::Refreshed { seq, result }) => {
                assert_eq!(seq, 1);
                assert_eq!(result.unwrap()[0].id, "exp1");
            }
            other => panic!("unexpected event {other:?}"),
        }

        cmd_tx.send(UiCommand::Quit).unwrap();
        timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn loads_selection_data() {
        let (cmd_tx, mut rx, _handle) =
            spawn_controller(FakeBackend::with_catalog(), Duration::from_secs(3600));
        cmd_tx
            .send(UiCommand::LoadSelection {
                ticket: 3,
                project: "p".into(),
            })
            .unwrap();
        match next_non_tick(&mut rx).await {
            AppEvent::SelectionLoaded { ticket, result } => {
                assert_eq!(ticket, 3);
                assert_eq!(result.unwrap().datasets.len(), 2);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn polls_until_disabled() {
        let (cmd_tx, mut rx, handle) =
            spawn_controller(FakeBackend::default(), Duration::from_millis(20));

        for _ in 0..2 {
            let ev = timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
            assert!(matches!(ev, Some(AppEvent::PollTick)));
        }

        cmd_tx.send(UiCommand::SetPolling(false)).unwrap();
        // Drain ticks that raced the command.
        tokio::time::sleep(Duration::from_millis(50)).await;
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        drop(cmd_tx);
        timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(rx.recv().await.is_none());
    }
}
