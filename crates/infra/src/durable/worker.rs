use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error};

use sweep_events::{EventBus, EventEnvelope, Subscription};

use super::executor::{DispatchOutcome, DurableStepExecutor};

/// Handle to control and join the event worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Drains an event bus subscription into a `DurableStepExecutor`.
///
/// - Runs on its own thread; each dispatch is driven on the given runtime
/// - Events are handled one at a time, in delivery order
/// - Delivery is at-least-once; replays are absorbed by the step ledger
#[derive(Debug)]
pub struct EventWorker;

impl EventWorker {
    pub fn spawn<B>(
        name: &'static str,
        bus: &B,
        executor: DurableStepExecutor,
        runtime: Handle,
    ) -> std::io::Result<WorkerHandle>
    where
        B: EventBus<EventEnvelope> + ?Sized,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let sub = bus.subscribe();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(name, sub, shutdown_rx, executor, runtime))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop(
    name: &'static str,
    sub: Subscription<EventEnvelope>,
    shutdown_rx: mpsc::Receiver<()>,
    executor: DurableStepExecutor,
    runtime: Handle,
) {
    let tick = Duration::from_millis(250);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match sub.recv_timeout(tick) {
            Ok(event) => match runtime.block_on(executor.dispatch(&event)) {
                Ok(DispatchOutcome::Unhandled) => {
                    debug!(worker = name, event = event.name(), "no function for event");
                }
                Ok(outcome) => {
                    debug!(worker = name, event_id = %event.event_id(), outcome = ?outcome, "event handled");
                }
                Err(err) => {
                    // The run stays `running`; nothing redelivers it on its own.
                    error!(
                        worker = name,
                        run_id = %DurableStepExecutor::run_id_for(&event),
                        event_id = %event.event_id(),
                        event = event.name(),
                        error = %err,
                        "event dispatch failed; resend the event to resume the run"
                    );
                }
            },
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use serde_json::{Value as JsonValue, json};

    use sweep_events::InMemoryEventBus;

    use crate::durable::executor::DurableFunction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use sweep_core::RunId;

    use crate::durable::ledger::{
        InMemoryStepLedger, LedgerError, RunRecord, RunStatus, StepLedger, StepRecord,
    };
    use crate::durable::step::{StepContext, StepError};

    struct Echo;

    #[async_trait]
    impl DurableFunction for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn event_name(&self) -> &'static str {
            "test/echo"
        }

        async fn run(&self, ctx: &StepContext, event: &EventEnvelope) -> Result<JsonValue, StepError> {
            let payload = event.payload().clone();
            let echoed: JsonValue = ctx
                .run("echo", move || {
                    let payload = payload.clone();
                    async move { Ok(payload) }
                })
                .await?;
            Ok(echoed)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn published_events_reach_the_executor() {
        let bus = InMemoryEventBus::<EventEnvelope>::new();
        let executor = DurableStepExecutor::new(Arc::new(InMemoryStepLedger::new())).with(Arc::new(Echo));
        let worker = EventWorker::spawn("test-worker", &bus, executor.clone(), Handle::current()).unwrap();

        let event = EventEnvelope::new("test/echo", json!({ "hello": "world" }));
        let run_id = DurableStepExecutor::run_id_for(&event);
        bus.publish(event).unwrap();

        let mut finished = None;
        for _ in 0..100 {
            if let Some(view) = executor.run_view(run_id).await.unwrap() {
                if view.run.status == RunStatus::Completed {
                    finished = Some(view);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let view = finished.expect("run should complete");
        assert_eq!(view.run.output, Some(json!({ "hello": "world" })));

        tokio::task::spawn_blocking(move || worker.shutdown()).await.unwrap();
    }

    /// Fails the first `fail_writes` step writes with a storage error.
    struct FlakyLedger {
        inner: InMemoryStepLedger,
        fail_writes: AtomicUsize,
    }

    #[async_trait]
    impl StepLedger for FlakyLedger {
        async fn start_run(
            &self,
            run_id: RunId,
            function: &str,
            event_name: &str,
        ) -> Result<RunRecord, LedgerError> {
            self.inner.start_run(run_id, function, event_name).await
        }

        async fn finish_run(
            &self,
            run_id: RunId,
            status: RunStatus,
            output: Option<JsonValue>,
            error: Option<String>,
        ) -> Result<(), LedgerError> {
            self.inner.finish_run(run_id, status, output, error).await
        }

        async fn get_run(&self, run_id: RunId) -> Result<Option<RunRecord>, LedgerError> {
            self.inner.get_run(run_id).await
        }

        async fn load_step(&self, run_id: RunId, name: &str) -> Result<Option<StepRecord>, LedgerError> {
            self.inner.load_step(run_id, name).await
        }

        async fn record_attempt_failure(
            &self,
            run_id: RunId,
            name: &str,
            attempt: u32,
            error: &str,
            exhausted: bool,
        ) -> Result<(), LedgerError> {
            self.inner
                .record_attempt_failure(run_id, name, attempt, error, exhausted)
                .await
        }

        async fn record_step_success(
            &self,
            run_id: RunId,
            name: &str,
            attempts: u32,
            output: JsonValue,
        ) -> Result<(), LedgerError> {
            if self
                .fail_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LedgerError::Storage("connection reset".to_string()));
            }
            self.inner.record_step_success(run_id, name, attempts, output).await
        }

        async fn list_steps(&self, run_id: RunId) -> Result<Vec<StepRecord>, LedgerError> {
            self.inner.list_steps(run_id).await
        }
    }

    async fn wait_for_status(executor: &DurableStepExecutor, run_id: RunId, status: RunStatus) -> bool {
        for _ in 0..100 {
            if let Some(view) = executor.run_view(run_id).await.unwrap() {
                if view.run.status == status {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn ledger_failure_leaves_the_run_for_a_resend() {
        let bus = InMemoryEventBus::<EventEnvelope>::new();
        let ledger = Arc::new(FlakyLedger {
            inner: InMemoryStepLedger::new(),
            fail_writes: AtomicUsize::new(1),
        });
        let executor = DurableStepExecutor::new(ledger).with(Arc::new(Echo));
        let worker = EventWorker::spawn("test-worker", &bus, executor.clone(), Handle::current()).unwrap();

        let first = EventEnvelope::new("test/echo", json!({ "n": 1 }));
        let first_run = DurableStepExecutor::run_id_for(&first);
        bus.publish(first.clone()).unwrap();
        assert!(wait_for_status(&executor, first_run, RunStatus::Running).await);

        // The worker keeps draining after the failed dispatch.
        let second = EventEnvelope::new("test/echo", json!({ "n": 2 }));
        let second_run = DurableStepExecutor::run_id_for(&second);
        bus.publish(second).unwrap();
        assert!(wait_for_status(&executor, second_run, RunStatus::Completed).await);
        assert_eq!(
            executor.run_view(first_run).await.unwrap().unwrap().run.status,
            RunStatus::Running
        );

        bus.publish(first).unwrap();
        assert!(wait_for_status(&executor, first_run, RunStatus::Completed).await);

        tokio::task::spawn_blocking(move || worker.shutdown()).await.unwrap();
    }
}
