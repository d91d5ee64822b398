//! Process lifecycle coordination with the orchestration sidecar
//!
//! The orchestrator runs a sidecar next to this process and exposes a
//! local HTTP gateway for lifecycle signaling: the server reports
//! readiness, requests its own shutdown, and watches for externally
//! observed state changes (such as allocation). The [`Sidecar`] trait is
//! the collaborator boundary; [`HttpSidecar`] implements it against the
//! local REST gateway.
//!
//! [`LifecycleController`] wraps the sidecar with the process's own state
//! machine: `Created -> Ready -> (Allocated) -> ShuttingDown -> Terminated`.
//! Readiness is re-entrant, shutdown is signaled to the sidecar at most
//! once, and shutdown only requests termination; the process exits when
//! the environment delivers a termination signal, observed via
//! [`LifecycleController::done`].

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use log::{error, warn};
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

/// A failed sidecar signal.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("sidecar transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sidecar returned status {code}")]
    Status { code: u16 },
}

/// The process's relationship to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Initial state, before the first readiness signal.
    Created = 0,
    /// Readiness was signaled; the orchestrator may route traffic here.
    Ready = 1,
    /// The orchestrator marked this instance as serving players.
    /// Informational only; gates no protocol behavior.
    Allocated = 2,
    /// Shutdown was requested; the process awaits external termination.
    ShuttingDown = 3,
    /// The environment told the process to exit.
    Terminated = 4,
}

impl Phase {
    fn from_u8(value: u8) -> Phase {
        match value {
            1 => Phase::Ready,
            2 => Phase::Allocated,
            3 => Phase::ShuttingDown,
            4 => Phase::Terminated,
            _ => Phase::Created,
        }
    }
}

/// One state change reported by the sidecar's watch stream.
#[derive(Debug, Clone, Default)]
pub struct GameServerReport {
    pub state: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

/// Collaborator boundary to the orchestration sidecar.
#[async_trait]
pub trait Sidecar: Send + Sync {
    async fn ready(&self) -> Result<(), LifecycleError>;
    async fn shutdown(&self) -> Result<(), LifecycleError>;
    async fn watch(&self) -> Result<BoxStream<'static, GameServerReport>, LifecycleError>;
}

#[derive(Deserialize)]
struct WatchFrame {
    result: WatchedGameServer,
}

#[derive(Deserialize, Default)]
struct WatchedGameServer {
    #[serde(default)]
    object_meta: ObjectMeta,
    #[serde(default)]
    status: GameServerStatus,
}

#[derive(Deserialize, Default)]
struct ObjectMeta {
    #[serde(default)]
    labels: HashMap<String, String>,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Deserialize, Default)]
struct GameServerStatus {
    #[serde(default)]
    state: String,
}

impl WatchedGameServer {
    fn into_report(self) -> GameServerReport {
        GameServerReport {
            state: self.status.state,
            labels: self.object_meta.labels,
            annotations: self.object_meta.annotations,
        }
    }
}

/// HTTP implementation of [`Sidecar`] against the sidecar's local REST
/// gateway: `POST /ready`, `POST /shutdown`, and a streaming
/// `GET /watch/gameserver` of newline-delimited JSON frames.
pub struct HttpSidecar {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSidecar {
    /// No client-wide timeout here: the watch response body is long-lived.
    pub fn new(port: u16) -> Result<Self, LifecycleError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: format!("http://localhost:{}", port),
        })
    }

    async fn post(&self, path: &str) -> Result<(), LifecycleError> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LifecycleError::Status {
                code: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Sidecar for HttpSidecar {
    async fn ready(&self) -> Result<(), LifecycleError> {
        self.post("ready").await
    }

    async fn shutdown(&self) -> Result<(), LifecycleError> {
        self.post("shutdown").await
    }

    async fn watch(&self) -> Result<BoxStream<'static, GameServerReport>, LifecycleError> {
        let response = self
            .http
            .get(format!("{}/watch/gameserver", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LifecycleError::Status {
                code: response.status().as_u16(),
            });
        }

        // The body is an endless sequence of newline-delimited JSON frames;
        // reassemble lines across chunk boundaries and decode each one.
        let body = response.bytes_stream();
        let state = (body, Vec::new(), VecDeque::new());
        let reports = futures_util::stream::unfold(state, |(mut body, mut buf, mut pending)| {
            async move {
                loop {
                    if let Some(report) = pending.pop_front() {
                        return Some((report, (body, buf, pending)));
                    }
                    match body.next().await {
                        Some(Ok(chunk)) => {
                            buf.extend_from_slice(&chunk);
                            while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                                let line: Vec<u8> = buf.drain(..=pos).collect();
                                match serde_json::from_slice::<WatchFrame>(&line) {
                                    Ok(frame) => pending.push_back(frame.result.into_report()),
                                    Err(e) => warn!("Could not decode watch frame: {}", e),
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Watch stream failed: {}", e);
                            return None;
                        }
                        None => return None,
                    }
                }
            }
        });
        Ok(reports.boxed())
    }
}

/// Tracks the lifecycle phase and mediates all sidecar signaling.
pub struct LifecycleController {
    sidecar: Arc<dyn Sidecar>,
    phase: AtomicU8,
    shutdown_sent: AtomicBool,
    term_rx: watch::Receiver<bool>,
}

impl LifecycleController {
    /// Creates the controller and installs the termination-signal listener.
    /// Must be called from within a tokio runtime.
    pub fn new(sidecar: Arc<dyn Sidecar>) -> Self {
        let (term_tx, term_rx) = watch::channel(false);
        tokio::spawn(wait_for_termination(term_tx));
        Self {
            sidecar,
            phase: AtomicU8::new(Phase::Created as u8),
            shutdown_sent: AtomicBool::new(false),
            term_rx,
        }
    }

    /// Current lifecycle phase, for observability.
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::Release);
    }

    /// Signals readiness to the orchestrator.
    ///
    /// Safe to call again after success: the sidecar is re-signaled but the
    /// phase never regresses from Allocated or later.
    pub async fn ready(&self) -> Result<(), LifecycleError> {
        self.sidecar.ready().await?;
        let _ = self.phase.compare_exchange(
            Phase::Created as u8,
            Phase::Ready as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        Ok(())
    }

    /// Requests termination from the orchestrator.
    ///
    /// The sidecar is signaled at most once; repeated calls succeed without
    /// re-signaling. This only asks for shutdown. Process exit still waits
    /// for the external termination signal.
    pub async fn shutdown(&self) -> Result<(), LifecycleError> {
        if self.shutdown_sent.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.set_phase(Phase::ShuttingDown);
        self.sidecar.shutdown().await
    }

    /// Spawns a task that consumes the sidecar watch stream, invoking the
    /// callback for every reported state change. Runs independently of the
    /// transport loop; the callback must not assume any synchronization
    /// with command dispatch.
    pub fn spawn_watch<F>(self: Arc<Self>, callback: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&GameServerReport) + Send + Sync + 'static,
    {
        tokio::spawn(async move {
            let mut stream = match self.sidecar.watch().await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Could not watch gameserver: {}", e);
                    return;
                }
            };
            while let Some(report) = stream.next().await {
                if report.state == "Allocated" {
                    // Upgrade only; never regress out of ShuttingDown.
                    let _ = self.phase.compare_exchange(
                        Phase::Ready as u8,
                        Phase::Allocated as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                }
                callback(&report);
            }
        })
    }

    /// Resolves when the environment tells the process to terminate
    /// (SIGTERM or ctrl-c). Consumed by `main` to know when to exit.
    pub async fn done(&self) {
        let mut rx = self.term_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.set_phase(Phase::Terminated);
    }
}

async fn wait_for_termination(term_tx: watch::Sender<bool>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    let _ = term_tx.send(true);
}
