//! Process orchestration: starts the workers, fans OS signals and worker
//! exits into the shutdown signal, and waits for everything to stop.
//!
//! Each worker runs on its own OS thread with its own tokio runtime and its
//! own storage handle. Workers share exactly two things: the work queue and
//! the shutdown signal. Any worker exiting, successfully or not, stops the
//! whole group; nothing is restarted.
//!
//! The workers are threads of one process, not separate processes. A panic
//! is contained to its thread and reported as a worker failure, but anything
//! that aborts the process (`process::abort`, a fatal OS signal, a panic with
//! `panic = "abort"`) takes every worker down with it.

use std::future::Future;
use std::net::SocketAddr;
use std::thread;

use anyhow::{Context, anyhow};
use serde::Serialize;
use tokio::sync::{oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use chargeflow_infra::{
    ChargeConsumer, Config, ConsumerConfig, Database, ShutdownSignal, WorkQueueConsumer,
    WorkQueueProducer, work_queue,
};

use crate::app::AppServices;
use crate::web::WebWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

struct WorkerExit {
    name: &'static str,
    result: anyhow::Result<()>,
}

pub struct Orchestrator {
    config: Config,
    signal: ShutdownSignal,
    state: watch::Sender<OrchestratorState>,
    web_addr: watch::Sender<Option<SocketAddr>>,
}

impl Orchestrator {
    pub fn new(config: Config) -> Self {
        let (state, _) = watch::channel(OrchestratorState::Starting);
        let (web_addr, _) = watch::channel(None);
        Self {
            config,
            signal: ShutdownSignal::new(),
            state,
            web_addr,
        }
    }

    /// The shutdown signal handed to every worker.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    pub fn state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.subscribe()
    }

    /// Address the API bound to, once it is listening.
    pub fn web_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.web_addr.subscribe()
    }

    fn transition(&self, next: OrchestratorState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = ?prev, to = ?next, "orchestrator state");
        }
    }

    /// Run the whole process group to completion.
    ///
    /// Returns an error if startup failed or any worker exited with an error.
    pub async fn run(self) -> anyhow::Result<()> {
        self.transition(OrchestratorState::Starting);

        let result = self.supervise().await;

        self.transition(OrchestratorState::Stopped);
        result
    }

    async fn supervise(&self) -> anyhow::Result<()> {
        // Bootstrap the schema once, before any worker depends on it.
        let db = Database::open(&self.config.database_path)
            .await
            .context("failed to open storage")?;
        db.close().await;

        let (producer, consumer_queue) = work_queue();
        let mut workers: JoinSet<WorkerExit> = JoinSet::new();
        let mut failures: Vec<String> = Vec::new();

        let launched = self
            .launch_web(&mut workers, producer)
            .and_then(|()| self.launch_consumer(&mut workers, consumer_queue));
        if let Err(e) = launched {
            error!(error = %e, "worker failed to start");
            failures.push(format!("startup: {e:#}"));
            self.signal.trigger("startup failure");
        }

        let os_signals = match install_signal_handlers(self.signal.clone()) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "failed to install signal handlers");
                failures.push(format!("signal handlers: {e}"));
                self.signal.trigger("startup failure");
                None
            }
        };

        if !self.signal.is_set() {
            self.transition(OrchestratorState::Running);
        }

        let mut shutting_down = false;
        loop {
            if self.signal.is_set() && !shutting_down {
                shutting_down = true;
                self.transition(OrchestratorState::ShuttingDown);
            }

            tokio::select! {
                _ = self.signal.cancelled(), if !shutting_down => continue,
                joined = workers.join_next() => {
                    let Some(joined) = joined else { break };

                    let exit = joined.unwrap_or_else(|e| WorkerExit {
                        name: "unknown",
                        result: Err(anyhow!("worker supervisor task failed: {e}")),
                    });

                    match &exit.result {
                        Ok(()) => info!(worker = exit.name, "worker exited"),
                        Err(e) => {
                            error!(worker = exit.name, error = %format!("{e:#}"), "worker failed");
                            failures.push(format!("{}: {e:#}", exit.name));
                        }
                    }

                    // Any exit is fatal to the group.
                    self.signal.trigger(format!("worker {} exited", exit.name));
                }
            }
        }

        if let Some(handle) = os_signals {
            handle.abort();
        }

        if failures.is_empty() {
            info!("all workers stopped");
            Ok(())
        } else {
            Err(anyhow!("worker failure: {}", failures.join("; ")))
        }
    }

    fn launch_web(
        &self,
        workers: &mut JoinSet<WorkerExit>,
        producer: WorkQueueProducer,
    ) -> anyhow::Result<()> {
        let config = self.config.clone();
        let bound = self.web_addr.clone();

        launch(workers, "web", true, self.signal.clone(), move |signal| async move {
            let db = Database::open(&config.database_path)
                .await
                .context("web: failed to open storage")?;
            let services = AppServices::new(db.clone(), producer);

            let result = WebWorker::new(config, services)
                .report_bound_addr(bound)
                .run(signal)
                .await;

            db.close().await;
            result
        })
    }

    fn launch_consumer(
        &self,
        workers: &mut JoinSet<WorkerExit>,
        queue: WorkQueueConsumer,
    ) -> anyhow::Result<()> {
        let config = self.config.clone();

        launch(workers, "consumer", false, self.signal.clone(), move |signal| async move {
            let db = Database::open(&config.database_path)
                .await
                .context("consumer: failed to open storage")?;

            let consumer = ChargeConsumer::new(
                db.clone(),
                queue,
                ConsumerConfig::default().with_dequeue_timeout(config.queue_timeout),
            );
            let result = consumer.run(signal).await;
            db.close().await;

            let stats = result?;
            info!(
                batches = stats.batches_applied,
                charges = stats.charges_written,
                discarded = stats.discarded_on_shutdown,
                "consumer finished"
            );
            Ok(())
        })
    }
}

/// Start `work` on a dedicated OS thread with its own runtime; its exit is
/// reported through `workers`.
fn launch<F, Fut>(
    workers: &mut JoinSet<WorkerExit>,
    name: &'static str,
    multi_thread: bool,
    signal: ShutdownSignal,
    work: F,
) -> anyhow::Result<()>
where
    F: FnOnce(ShutdownSignal) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let (done_tx, done_rx) = oneshot::channel::<anyhow::Result<()>>();

    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut builder = if multi_thread {
                tokio::runtime::Builder::new_multi_thread()
            } else {
                tokio::runtime::Builder::new_current_thread()
            };

            let result = builder
                .enable_all()
                .thread_name(format!("{name}-rt"))
                .build()
                .with_context(|| format!("{name}: failed to build runtime"))
                .and_then(|rt| rt.block_on(work(signal)));

            let _ = done_tx.send(result);
        })
        .with_context(|| format!("failed to spawn {name} worker thread"))?;

    info!(worker = name, "worker launched");

    workers.spawn(async move {
        let result = match done_rx.await {
            Ok(result) => result,
            Err(_) => Err(anyhow!("{name} worker thread died")),
        };

        if tokio::task::spawn_blocking(move || join.join()).await.is_err() {
            warn!(worker = name, "could not join worker thread");
        }

        WorkerExit { name, result }
    });

    Ok(())
}

#[cfg(unix)]
fn install_signal_handlers(shutdown: ShutdownSignal) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hup = signal(SignalKind::hangup())?;
    let mut term = signal(SignalKind::terminate())?;
    let mut int = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = hup.recv() => "SIGHUP",
                _ = term.recv() => "SIGTERM",
                _ = int.recv() => "SIGINT",
            };

            if shutdown.trigger(format!("received {name}")) {
                info!(signal = name, "sending exit signal to all workers");
            } else {
                warn!(signal = name, "already shutting down, forcing exit");
                std::process::exit(1);
            }
        }
    }))
}

#[cfg(not(unix))]
fn install_signal_handlers(shutdown: ShutdownSignal) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if !shutdown.trigger("received ctrl-c") {
                warn!("already shutting down, forcing exit");
                std::process::exit(1);
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Duration;

    use chargeflow_core::JobId;
    use serde_json::json;

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config::default()
            .with_bind_host("127.0.0.1")
            .with_web_port(0)
            .with_database_path(dir.path().join("database.sqlite"))
            .with_queue_timeout(Duration::from_millis(100))
    }

    // Signal handlers are process-wide, so runs that install them go one at a time.
    static SERIAL: Mutex<()> = Mutex::new(());

    fn serial() -> MutexGuard<'static, ()> {
        SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<OrchestratorState>,
        want: OrchestratorState,
    ) {
        tokio::time::timeout(Duration::from_secs(10), rx.wait_for(|s| *s == want))
            .await
            .expect("timed out waiting for state")
            .expect("state channel closed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_until_signalled_then_stops() {
        let _serial = serial();
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(&dir));
        let signal = orchestrator.signal();
        let mut state = orchestrator.state();
        let mut addr = orchestrator.web_addr();

        let run = tokio::spawn(orchestrator.run());

        wait_for_state(&mut state, OrchestratorState::Running).await;
        tokio::time::timeout(Duration::from_secs(10), addr.wait_for(|a| a.is_some()))
            .await
            .unwrap()
            .unwrap();

        signal.trigger("test");

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(*state.borrow(), OrchestratorState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn one_worker_failing_stops_the_other() {
        let _serial = serial();
        let dir = tempfile::tempdir().unwrap();

        // Occupy a port so the web worker cannot bind it.
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let orchestrator = Orchestrator::new(test_config(&dir).with_web_port(port));
        let signal = orchestrator.signal();
        let state = orchestrator.state();

        let result = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
            .await
            .expect("orchestrator did not stop after a worker failure");

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("web"), "{err:#}");
        assert!(signal.is_set());
        assert_eq!(*state.borrow(), OrchestratorState::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn failed_batch_stops_the_web_worker() {
        let _serial = serial();
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&dir);

        let db = Database::open(&config.database_path).await.unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_poison BEFORE INSERT ON charge \
             WHEN NEW.claim_id = 'POISON' \
             BEGIN SELECT RAISE(ABORT, 'poisoned charge'); END",
        )
        .execute(db.pool())
        .await
        .unwrap();
        db.close().await;

        let orchestrator = Orchestrator::new(config.clone());
        let signal = orchestrator.signal();
        let state = orchestrator.state();
        let mut addr = orchestrator.web_addr();
        let run = tokio::spawn(orchestrator.run());

        let addr = tokio::time::timeout(Duration::from_secs(10), addr.wait_for(|a| a.is_some()))
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        let res = reqwest::Client::new()
            .post(format!("http://{addr}/charges/batch"))
            .json(&json!([{
                "claim_id": "POISON",
                "patient_id": "PAT001",
                "charge_amount": 100.0,
                "cpt_code": "99213",
            }]))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), reqwest::StatusCode::OK);

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("web worker kept running after the consumer failed")
            .unwrap();
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("consumer"), "{err:#}");
        assert!(signal.is_set());
        assert_eq!(*state.borrow(), OrchestratorState::Stopped);

        // The listener is gone and the job was never completed.
        assert!(std::net::TcpStream::connect(addr).is_err());
        let db = Database::open(&config.database_path).await.unwrap();
        assert!(!db.get_job(JobId::new(1)).await.unwrap().is_done);
        assert_eq!(db.charge_count().await.unwrap(), 0);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn hangup_shuts_down_gracefully() {
        let _serial = serial();
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::new(test_config(&dir));
        let signal = orchestrator.signal();
        let mut state = orchestrator.state();
        let mut seen = orchestrator.state();
        let run = tokio::spawn(orchestrator.run());

        wait_for_state(&mut state, OrchestratorState::Running).await;

        // Record every state published after Running.
        seen.borrow_and_update();
        let history = tokio::spawn(async move {
            let mut history = Vec::new();
            while seen.changed().await.is_ok() {
                let current = *seen.borrow_and_update();
                history.push(current);
                if current == OrchestratorState::Stopped {
                    break;
                }
            }
            history
        });

        let status = std::process::Command::new("sh")
            .arg("-c")
            .arg(format!("kill -HUP {}", std::process::id()))
            .status()
            .unwrap();
        assert!(status.success());

        let result = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("orchestrator ignored SIGHUP")
            .unwrap();
        assert!(result.is_ok(), "{result:?}");
        assert_eq!(signal.reason().as_deref(), Some("received SIGHUP"));
        assert_eq!(*state.borrow(), OrchestratorState::Stopped);

        let history = history.await.unwrap();
        assert_eq!(history.last(), Some(&OrchestratorState::Stopped));
        assert!(!history.contains(&OrchestratorState::Running));
    }

    #[tokio::test]
    async fn unusable_storage_aborts_startup() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the database file should be.
        let path = dir.path().join("not-a-file");
        std::fs::create_dir(&path).unwrap();

        let orchestrator = Orchestrator::new(test_config(&dir).with_database_path(path));
        let state = orchestrator.state();

        assert!(orchestrator.run().await.is_err());
        assert_eq!(*state.borrow(), OrchestratorState::Stopped);
    }

    #[test]
    fn state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&OrchestratorState::ShuttingDown).unwrap(),
            "\"shutting_down\""
        );
    }
}
