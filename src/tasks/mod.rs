//! Build task supervision
//!
//! [`TaskController`] is a cheap, clonable handle to a single actor task
//! that owns the one optional build slot. Commands are processed one at a
//! time, so "is a build running?" and "start a build" cannot race. Each
//! build gets its own [`CancelToken`]; stopping only sets the token, so the
//! builder always reaches its terminal flush.

use crate::classify::Classifier;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::events::{CompletionStatus, ControlEvent, EventBus};
use crate::extract::Extractor;
use crate::grouping::{GroupReport, GroupingEngine, NamingDelegate, UndoEngine, UndoReport};
use crate::index::{BuildOutcome, BuildStatus, CancelToken, IndexBuilder};
use crate::vector::Embedder;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use uuid::Uuid;

/// Reply to a start request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "taskId", rename_all = "snake_case")]
pub enum StartReply {
    Started(String),
    AlreadyRunning(String),
}

/// Reply to a stop request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "taskId", rename_all = "snake_case")]
pub enum StopReply {
    Stopping(String),
    NotRunning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TaskStatus {
    Idle,
    #[serde(rename_all = "camelCase")]
    Running {
        task_id: String,
        started_at: DateTime<Utc>,
    },
}

enum Command {
    Start {
        root: PathBuf,
        reply: oneshot::Sender<StartReply>,
    },
    Stop {
        reply: oneshot::Sender<StopReply>,
    },
    Status {
        reply: oneshot::Sender<TaskStatus>,
    },
    Finished {
        task_id: String,
        event: ControlEvent,
    },
}

struct ActiveTask {
    task_id: String,
    started_at: DateTime<Utc>,
    cancel: CancelToken,
}

/// Handle to the build supervisor
#[derive(Clone)]
pub struct TaskController {
    tx: mpsc::Sender<Command>,
    events: EventBus,
    config: Arc<AppConfig>,
    embedder: Arc<dyn Embedder>,
}

impl TaskController {
    /// Start the supervisor on the current tokio runtime
    pub fn spawn(
        config: AppConfig,
        extractor: Arc<dyn Extractor>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(32);
        let events = EventBus::default();
        let builder = IndexBuilder::new(
            config.folder_store(),
            config.file_store(),
            extractor,
            Arc::clone(&embedder),
        )
        .with_chunk_size(config.chunk_size)
        .with_flush_interval(config.flush_interval);

        tokio::spawn(supervise(rx, tx.downgrade(), builder, events.clone()));

        Self {
            tx,
            events,
            config: Arc::new(config),
            embedder,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Start a build over `root`, unless one is already running
    pub async fn start(&self, root: impl Into<PathBuf>) -> Result<StartReply> {
        let root = root.into();
        self.request(|reply| Command::Start { root, reply }).await
    }

    /// Request cancellation of the running build; returns immediately
    pub async fn stop(&self) -> Result<StopReply> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn status(&self) -> Result<TaskStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::TaskController("supervisor stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::TaskController("supervisor dropped the request".to_string()))
    }

    /// Classifier over the persisted file index
    pub fn classifier(&self) -> Classifier {
        Classifier::new(
            self.config.file_store(),
            self.config.undo_log(),
            Arc::clone(&self.embedder),
        )
        .with_chunk_size(self.config.chunk_size)
    }

    /// Run grouping, emitting `group_progress` and one `group_result`
    pub async fn group(&self, k: usize, namer: Option<&dyn NamingDelegate>) -> Result<GroupReport> {
        let engine = GroupingEngine::new(
            self.config.folder_store(),
            self.config.undo_log(),
            self.config.group_base_dir(),
        )
        .with_seed(self.config.cluster_seed)
        .with_max_iterations(self.config.max_iterations);

        let bus = self.events.clone();
        let progress = move |done, total| bus.emit(ControlEvent::GroupProgress { done, total });

        match engine.group(k, namer, &progress).await {
            Ok(report) => {
                self.events.emit(ControlEvent::group_success(&report));
                Ok(report)
            }
            Err(e) => {
                self.events.emit(ControlEvent::group_error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Run undo, emitting `undo_progress` and one `undo_result`
    pub async fn undo(&self) -> Result<UndoReport> {
        let engine = UndoEngine::new(self.config.undo_log());
        let bus = self.events.clone();
        let progress = move |done, total| bus.emit(ControlEvent::UndoProgress { done, total });

        match engine.undo(&progress).await {
            Ok(report) => {
                self.events.emit(ControlEvent::UndoResult(report.clone()));
                Ok(report)
            }
            Err(e) => {
                self.events
                    .emit(ControlEvent::UndoResult(UndoReport::failed(e.to_string())));
                Err(e)
            }
        }
    }
}

/// Actor loop owning the build slot
async fn supervise(
    mut rx: mpsc::Receiver<Command>,
    tx: mpsc::WeakSender<Command>,
    builder: IndexBuilder,
    events: EventBus,
) {
    let mut active: Option<ActiveTask> = None;

    while let Some(command) = rx.recv().await {
        match command {
            Command::Start { root, reply } => {
                if let Some(ref task) = active {
                    tracing::info!("[TaskController] Build {} already running", task.task_id);
                    let _ = reply.send(StartReply::AlreadyRunning(task.task_id.clone()));
                    continue;
                }

                let task = ActiveTask {
                    task_id: Uuid::new_v4().to_string(),
                    started_at: Utc::now(),
                    cancel: CancelToken::new(),
                };
                tracing::info!("[TaskController] Starting build {} for {}", task.task_id, root.display());
                events.emit(ControlEvent::BuildStarted {
                    task_id: task.task_id.clone(),
                });
                launch(
                    builder.clone(),
                    root,
                    task.task_id.clone(),
                    task.cancel.clone(),
                    events.clone(),
                    tx.clone(),
                );
                let _ = reply.send(StartReply::Started(task.task_id.clone()));
                active = Some(task);
            }
            Command::Stop { reply } => {
                let answer = match active {
                    Some(ref task) => {
                        tracing::info!("[TaskController] Stop requested for {}", task.task_id);
                        task.cancel.cancel();
                        StopReply::Stopping(task.task_id.clone())
                    }
                    None => StopReply::NotRunning,
                };
                let _ = reply.send(answer);
            }
            Command::Status { reply } => {
                let status = match active {
                    Some(ref task) => TaskStatus::Running {
                        task_id: task.task_id.clone(),
                        started_at: task.started_at,
                    },
                    None => TaskStatus::Idle,
                };
                let _ = reply.send(status);
            }
            Command::Finished { task_id, event } => {
                if active.as_ref().is_some_and(|t| t.task_id == task_id) {
                    active = None;
                }
                tracing::info!("[TaskController] Build {} finished", task_id);
                events.emit(event);
            }
        }
    }
}

/// Run one build and report its single terminal event back to the actor
fn launch(
    builder: IndexBuilder,
    root: PathBuf,
    task_id: String,
    cancel: CancelToken,
    events: EventBus,
    tx: mpsc::WeakSender<Command>,
) {
    let bus = events.clone();
    let build = tokio::spawn(async move {
        let progress = move |done, total| bus.emit(ControlEvent::Progress { done, total });
        builder.run(&root, &cancel, &progress).await
    });

    tokio::spawn(async move {
        let event = match build.await {
            Ok(outcome) => terminal_event(&task_id, outcome),
            Err(e) => {
                tracing::error!("[TaskController] Build {} crashed: {}", task_id, e);
                ControlEvent::BuildComplete {
                    task_id: task_id.clone(),
                    status: CompletionStatus::Error,
                    message: Some(format!("build task failed: {}", e)),
                }
            }
        };
        match tx.upgrade() {
            Some(tx) => {
                let _ = tx.send(Command::Finished { task_id, event }).await;
            }
            // Every handle is gone; nobody can query the slot any more
            None => events.emit(event),
        }
    });
}

fn terminal_event(task_id: &str, outcome: BuildOutcome) -> ControlEvent {
    let task_id = task_id.to_string();
    match outcome.status {
        BuildStatus::Done => ControlEvent::BuildComplete {
            task_id,
            status: CompletionStatus::Success,
            message: None,
        },
        BuildStatus::Cancelled => ControlEvent::BuildStopped { task_id },
        BuildStatus::Failed => ControlEvent::BuildComplete {
            task_id,
            status: CompletionStatus::Error,
            message: outcome.message,
        },
    }
}
