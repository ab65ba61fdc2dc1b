use crate::error::{AppError, Result};
use crate::services::store::SessionStore;
use crate::ws::registry::SessionRegistry;
use codejam_protocol::{ChatMessageData, ServerMessage};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

/// Upper bound on a single store call before it is reported as failed
pub const STORE_TIMEOUT: Duration = Duration::from_secs(10);

/// A session queue with nothing to do for this long is torn down
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

enum PersistJob {
    Chat {
        message: ChatMessageData,
        acting: Option<Uuid>,
    },
    Snapshot {
        code: String,
        acting: Uuid,
    },
}

struct Queue {
    tx: mpsc::UnboundedSender<PersistJob>,
    worker: JoinHandle<()>,
}

#[derive(Default)]
struct Queues {
    by_session: HashMap<Uuid, Queue>,
    closed: bool,
}

struct Inner {
    store: Arc<dyn SessionStore>,
    registry: Arc<SessionRegistry>,
    store_timeout: Duration,
    queues: Mutex<Queues>,
}

/// Write-behind queue for chat appends and WebSocket-initiated snapshot saves.
///
/// Each session gets its own worker, so jobs for one session run one at a
/// time in submission order (the persisted transcript matches relay order)
/// while a slow or stuck store call only holds up its own session. Callers
/// never wait on the store; failures are logged and reported to the acting
/// connection only.
#[derive(Clone)]
pub struct Persister {
    inner: Arc<Inner>,
}

impl Persister {
    pub fn new(store: Arc<dyn SessionStore>, registry: Arc<SessionRegistry>) -> Self {
        Self::with_store_timeout(store, registry, STORE_TIMEOUT)
    }

    pub fn with_store_timeout(
        store: Arc<dyn SessionStore>,
        registry: Arc<SessionRegistry>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                registry,
                store_timeout,
                queues: Mutex::new(Queues::default()),
            }),
        }
    }

    pub async fn chat(&self, message: ChatMessageData, acting: Option<Uuid>) {
        self.submit(message.session_id, PersistJob::Chat { message, acting })
            .await;
    }

    pub async fn snapshot(&self, session_id: Uuid, code: String, acting: Uuid) {
        self.submit(session_id, PersistJob::Snapshot { code, acting })
            .await;
    }

    /// Stop taking jobs and wait until every queued one has run
    pub async fn close(&self) {
        let queues = {
            let mut queues = self.inner.queues.lock().await;
            queues.closed = true;
            std::mem::take(&mut queues.by_session)
        };

        tracing::info!("Flushing {} persistence queues", queues.len());
        let workers: Vec<_> = queues
            .into_iter()
            .map(|(_, queue)| {
                drop(queue.tx);
                queue.worker
            })
            .collect();

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Persistence worker failed: {}", e);
            }
        }
    }

    async fn submit(&self, session_id: Uuid, job: PersistJob) {
        let mut queues = self.inner.queues.lock().await;
        if queues.closed {
            tracing::error!(
                "Persistence is closed, dropping write for session {}",
                session_id
            );
            return;
        }

        let job = match queues.by_session.get(&session_id) {
            Some(queue) => match queue.tx.send(job) {
                Ok(()) => return,
                // Worker is gone; start a fresh one below
                Err(mpsc::error::SendError(job)) => job,
            },
            None => job,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if tx.send(job).is_err() {
            return;
        }
        let worker = tokio::spawn(run(session_id, rx, self.inner.clone()));
        queues.by_session.insert(session_id, Queue { tx, worker });
    }
}

async fn run(
    session_id: Uuid,
    mut rx: mpsc::UnboundedReceiver<PersistJob>,
    inner: Arc<Inner>,
) {
    tracing::debug!("Persistence worker started for session {}", session_id);

    loop {
        let job = match timeout(IDLE_TIMEOUT, rx.recv()).await {
            Ok(Some(job)) => job,
            Ok(None) => break,
            Err(_) => {
                // Submitters hold the lock while sending, so an empty queue
                // seen under it stays empty once the entry is gone
                let mut queues = inner.queues.lock().await;
                if rx.is_empty() {
                    queues.by_session.remove(&session_id);
                    break;
                }
                continue;
            }
        };

        inner.process(session_id, job).await;
    }

    tracing::debug!("Persistence worker stopped for session {}", session_id);
}

impl Inner {
    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Internal(anyhow::anyhow!(
                "store call timed out after {:?}",
                self.store_timeout
            ))),
        }
    }

    async fn process(&self, session_id: Uuid, job: PersistJob) {
        match job {
            PersistJob::Chat { message, acting } => {
                let stored = self
                    .bounded(self.store.append_chat_message(session_id, &message))
                    .await;
                if let Err(e) = stored {
                    tracing::error!(
                        session_id = %session_id,
                        message_id = %message.id,
                        "Failed to persist chat message: {}",
                        e
                    );
                    if let Some(connection_id) = acting {
                        self.registry
                            .send_to(
                                connection_id,
                                &ServerMessage::PersistenceFailed {
                                    session_id,
                                    reason: "Chat message was delivered but not saved"
                                        .to_string(),
                                },
                            )
                            .await;
                    }
                }
            }
            PersistJob::Snapshot { code, acting } => {
                let saved = self
                    .bounded(self.store.save_code_snapshot(session_id, &code))
                    .await;
                let reply = match saved {
                    Ok(saved_at) => {
                        tracing::debug!("Saved snapshot for session {}", session_id);
                        ServerMessage::SnapshotSaved {
                            session_id,
                            saved_at,
                        }
                    }
                    Err(e) => {
                        tracing::error!(session_id = %session_id, "Failed to save snapshot: {}", e);
                        ServerMessage::PersistenceFailed {
                            session_id,
                            reason: "Snapshot could not be saved".to_string(),
                        }
                    }
                };
                self.registry.send_to(acting, &reply).await;
            }
        }
    }
}
