//! Single-flight coordinator.
//!
//! One task owns the pending set and processes, strictly one at a time,
//! resolve requests from the front door, outcomes from fetch workers and
//! invalidation commands. Because nothing else touches the pending set there
//! is no lock around it, and a key can never have two workers.
//!
//! Waiters block on a oneshot created per request. The loop answers every
//! registered waiter exactly once: with the worker's outcome, or with
//! [`FetchError::Shutdown`] when the loop is stopped first.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::config::{ConfigHandle, ProxyConfig};
use super::keys::CacheKey;
use super::store::CacheStore;
use super::worker::{FetchError, FetchOutcome, FetchRequest, FetchResult, FetchWorker};

const COMMAND_BUFFER: usize = 1024;

/// Receives a callback after every flush of the store.
pub trait FlushListener: Send + Sync {
    /// Runs on the coordinator task; must not block. Returns how many
    /// listeners were notified.
    fn cache_flushed(&self, config: &ProxyConfig) -> usize;
}

/// Result of an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidateReport {
    pub cleared: usize,
    pub notified: usize,
}

enum Command {
    Resolve {
        key: CacheKey,
        request: FetchRequest,
        waiter: oneshot::Sender<FetchResult>,
    },
    Invalidate {
        done: oneshot::Sender<InvalidateReport>,
    },
    PendingLen {
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        done: oneshot::Sender<usize>,
    },
}

/// Cloneable handle to the coordinator loop.
#[derive(Clone)]
pub struct Coordinator {
    commands: mpsc::Sender<Command>,
}

impl Coordinator {
    /// Spawn the loop on the current runtime.
    pub fn spawn(
        store: Arc<CacheStore>,
        worker: FetchWorker,
        listener: Arc<dyn FlushListener>,
        config: ConfigHandle,
    ) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let state = CoordinatorLoop {
            store,
            worker,
            listener,
            config,
            pending: HashMap::new(),
            outcome_tx,
        };
        tokio::spawn(state.run(command_rx, outcome_rx));

        Self { commands }
    }

    /// Wait for the response of `key`, joining an in-flight fetch or
    /// starting one.
    pub async fn resolve(&self, key: CacheKey, request: FetchRequest) -> FetchResult {
        let (waiter, notified) = oneshot::channel();
        self.commands
            .send(Command::Resolve {
                key,
                request,
                waiter,
            })
            .await
            .map_err(|_| FetchError::Unavailable)?;

        notified.await.map_err(|_| FetchError::Unavailable)?
    }

    /// Flush the store and notify listeners. In-flight fetches are left alone.
    pub async fn invalidate(&self) -> Result<InvalidateReport, FetchError> {
        let (done, report) = oneshot::channel();
        self.commands
            .send(Command::Invalidate { done })
            .await
            .map_err(|_| FetchError::Unavailable)?;

        report.await.map_err(|_| FetchError::Unavailable)
    }

    /// Number of keys with an outstanding worker.
    pub async fn pending_len(&self) -> Result<usize, FetchError> {
        let (reply, len) = oneshot::channel();
        self.commands
            .send(Command::PendingLen { reply })
            .await
            .map_err(|_| FetchError::Unavailable)?;

        len.await.map_err(|_| FetchError::Unavailable)
    }

    /// Stop the loop, failing every registered waiter with
    /// [`FetchError::Shutdown`]. Returns how many waiters were released.
    pub async fn shutdown(&self) -> usize {
        let (done, released) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).await.is_err() {
            return 0;
        }
        released.await.unwrap_or(0)
    }
}

struct CoordinatorLoop {
    store: Arc<CacheStore>,
    worker: FetchWorker,
    listener: Arc<dyn FlushListener>,
    config: ConfigHandle,
    pending: HashMap<CacheKey, Vec<oneshot::Sender<FetchResult>>>,
    outcome_tx: mpsc::UnboundedSender<FetchOutcome>,
}

impl CoordinatorLoop {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut outcomes: mpsc::UnboundedReceiver<FetchOutcome>,
    ) {
        loop {
            tokio::select! {
                Some(outcome) = outcomes.recv() => self.complete(outcome),
                command = commands.recv() => match command {
                    Some(Command::Resolve { key, request, waiter }) => {
                        self.resolve(key, request, waiter)
                    }
                    Some(Command::Invalidate { done }) => self.invalidate(done),
                    Some(Command::PendingLen { reply }) => {
                        let _ = reply.send(self.pending.len());
                    }
                    Some(Command::Shutdown { done }) => {
                        let _ = done.send(self.release_all());
                        break;
                    }
                    None => {
                        self.release_all();
                        break;
                    }
                },
            }
        }
    }

    fn resolve(
        &mut self,
        key: CacheKey,
        request: FetchRequest,
        waiter: oneshot::Sender<FetchResult>,
    ) {
        if let Some(waiters) = self.pending.get_mut(&key) {
            waiters.push(waiter);
            debug!(
                cache_id = %key,
                num_waiting_clients = waiters.len(),
                "joined in-flight fetch"
            );
            return;
        }

        // A worker may have published between the caller's miss and now.
        if let Some(cached) = self.store.get(&key) {
            let _ = waiter.send(Ok(cached));
            return;
        }

        let config = self.config.current();
        info!(
            cache_id = %key,
            url = %config.upstream_url(request.target()),
            "starting fetch worker"
        );
        self.pending.insert(key.clone(), vec![waiter]);
        gauge!("contentproxy_pending_keys").set(self.pending.len() as f64);

        self.worker
            .launch(key, request, config, self.outcome_tx.clone());
    }

    fn complete(&mut self, outcome: FetchOutcome) {
        let FetchOutcome { key, result } = outcome;
        let Some(waiters) = self.pending.remove(&key) else {
            warn!(cache_id = %key, "fetch outcome for a key that is not pending");
            return;
        };
        gauge!("contentproxy_pending_keys").set(self.pending.len() as f64);

        let status = if result.is_ok() { "success" } else { "failure" };
        info!(
            cache_id = %key,
            num_waiting_clients = waiters.len(),
            outcome = status,
            "request complete"
        );
        for waiter in waiters {
            // The caller may have gone away; nothing to do then.
            let _ = waiter.send(result.clone());
        }
    }

    fn invalidate(&mut self, done: oneshot::Sender<InvalidateReport>) {
        let cleared = self.store.clear();
        info!(cleared, pending = self.pending.len(), "flushed the cache");

        let notified = self.listener.cache_flushed(&self.config.current());
        let _ = done.send(InvalidateReport { cleared, notified });
    }

    fn release_all(&mut self) -> usize {
        let mut released = 0;
        for (_, waiters) in self.pending.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(FetchError::Shutdown));
                released += 1;
            }
        }
        gauge!("contentproxy_pending_keys").set(0.0);
        info!(released_waiters = released, "coordinator stopped");
        released
    }
}
