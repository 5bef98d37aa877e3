//! Fan-out orchestrator.
//!
//! One agent-loop task per configured model, all writing into a single
//! bounded queue the SSE emitter drains in FIFO order. A heartbeat task
//! keeps the stream alive while any model task is still running; a waiter
//! task closes the queue (by dropping every sender) once the last model
//! task finishes, and frees the session for the next generation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use gw_domain::config::OrchestratorConfig;
use gw_domain::error::{Error, Result};
use gw_domain::model::Event;
use gw_domain::tool::ToolRegistry;
use gw_providers::agent_loop::{self, CancelToken};
use gw_providers::ProviderRegistry;
use gw_sessions::Session;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A handle to one in-flight generation. Cancellation goes through
/// [`Orchestrator::cancel`] keyed on `session_id`; this struct is mostly a
/// named return value for `begin`.
pub struct GenerationHandle {
    pub session_id: Uuid,
}

pub struct Orchestrator {
    llm: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    deadline: Duration,
    heartbeat_interval: Duration,
    queue_capacity_multiplier: usize,
    max_tool_calls_per_generation: u32,
    consecutive_same_tool_cap: usize,
    document_block_budget: usize,
    active: Arc<Mutex<HashMap<Uuid, CancelToken>>>,
}

impl Orchestrator {
    pub fn new(llm: Arc<ProviderRegistry>, tools: Arc<ToolRegistry>, config: &OrchestratorConfig) -> Self {
        Self {
            llm,
            tools,
            deadline: Duration::from_secs(config.deadline_seconds),
            heartbeat_interval: Duration::from_secs(config.heartbeat_seconds),
            queue_capacity_multiplier: config.queue_capacity_multiplier,
            max_tool_calls_per_generation: config.max_tool_calls_per_generation,
            consecutive_same_tool_cap: config.consecutive_same_tool_cap as usize,
            document_block_budget: config.document_block_budget,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start one adapter stream per configured model against `session`,
    /// returning a handle plus the merged output stream. Fails
    /// `BusySession` if a generation is already active for this session.
    pub fn begin(&self, session: Arc<Session>) -> Result<(GenerationHandle, mpsc::Receiver<Event>)> {
        if !session.try_begin_generation() {
            return Err(Error::BusySession);
        }

        let model_ids = session.model_ids();
        let queue_capacity = (model_ids.len().max(1)) * self.queue_capacity_multiplier;
        let (tx, rx) = mpsc::channel(queue_capacity);
        let cancel = CancelToken::new();
        let session_id = session.id;

        self.active.lock().insert(session_id, cancel.clone());

        let deadline_instant = Instant::now() + self.deadline;
        let mut join_handles = Vec::with_capacity(model_ids.len());

        for model_id in &model_ids {
            let Some(adapter) = self.llm.get(model_id) else {
                tracing::warn!(model_id = %model_id, "no adapter registered for configured model");
                continue;
            };
            let history = session.history_for(model_id);
            let tools = self.tools.clone();
            let cancel = cancel.clone();
            let tx = tx.clone();
            let session = session.clone();
            let model_id = model_id.clone();
            let max_tool_calls = self.max_tool_calls_per_generation;
            let consecutive_same_tool_cap = self.consecutive_same_tool_cap;
            let document_block_budget = self.document_block_budget;

            join_handles.push(tokio::spawn(async move {
                let outcome = agent_loop::run(
                    adapter,
                    None,
                    history,
                    tools,
                    deadline_instant,
                    cancel,
                    tx,
                    max_tool_calls,
                    consecutive_same_tool_cap,
                    document_block_budget,
                )
                .await;
                session.commit_assistant_turn(&model_id, outcome.assistant_turn);
            }));
        }

        let (done_tx, done_rx) = oneshot::channel::<()>();

        // Heartbeat task: stops as soon as `done_rx` fires, dropping its
        // own sender so the queue can close once every model task's
        // sender is also gone.
        {
            let tx = tx.clone();
            let heartbeat_interval = self.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(heartbeat_interval);
                ticker.tick().await; // interval's first tick fires immediately
                tokio::pin!(done_rx);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if tx.send(Event::Heartbeat { timestamp: now_ms() }).await.is_err() {
                                break;
                            }
                        }
                        _ = &mut done_rx => break,
                    }
                }
            });
        }

        // Waiter task: once every model task is done, frees the session
        // and the active-generation entry, then signals the heartbeat task.
        {
            let active = self.active.clone();
            tokio::spawn(async move {
                for handle in join_handles {
                    let _ = handle.await;
                }
                session.end_generation();
                active.lock().remove(&session_id);
                let _ = done_tx.send(());
            });
        }

        drop(tx);

        Ok((GenerationHandle { session_id }, rx))
    }

    /// Idempotent: cancelling a session with no active generation is a
    /// no-op that returns `false`.
    pub fn cancel(&self, session_id: Uuid) -> bool {
        match self.active.lock().get(&session_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, session_id: Uuid) -> bool {
        self.active.lock().contains_key(&session_id)
    }

    /// Signal every currently active generation to stop. Used on graceful
    /// shutdown; like [`Orchestrator::cancel`], this is fire-and-forget —
    /// it returns as soon as every token is flipped, not once every task
    /// has actually wound down.
    pub fn cancel_all(&self) {
        for token in self.active.lock().values() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_domain::config::SessionConfig;
    use gw_sessions::SessionStore;

    fn orchestrator() -> Orchestrator {
        let llm = Arc::new(ProviderRegistry::from_config(&gw_domain::config::LlmConfig::default()).unwrap());
        let tools = Arc::new(ToolRegistry::new());
        Orchestrator::new(llm, tools, &OrchestratorConfig::default())
    }

    #[test]
    fn cancel_unknown_session_returns_false() {
        let orch = orchestrator();
        assert!(!orch.cancel(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn begin_fails_busy_session_when_already_active() {
        let orch = orchestrator();
        let store = SessionStore::new(&SessionConfig::default(), vec![]);
        let session = store.create().unwrap();

        let (_handle, _rx) = orch.begin(session.clone()).unwrap();
        assert!(matches!(orch.begin(session.clone()), Err(Error::BusySession)));
    }

    #[tokio::test]
    async fn cancel_all_signals_every_active_session() {
        let orch = orchestrator();
        let store = SessionStore::new(&SessionConfig::default(), vec![]);
        let session_a = store.create().unwrap();
        let session_b = store.create().unwrap();

        let (_handle_a, _rx_a) = orch.begin(session_a.clone()).unwrap();
        let (_handle_b, _rx_b) = orch.begin(session_b.clone()).unwrap();

        let token_a = orch.active.lock().get(&session_a.id).unwrap().clone();
        let token_b = orch.active.lock().get(&session_b.id).unwrap().clone();
        assert!(!token_a.is_cancelled());
        assert!(!token_b.is_cancelled());

        orch.cancel_all();

        assert!(token_a.is_cancelled());
        assert!(token_b.is_cancelled());
    }

    #[tokio::test]
    async fn begin_with_no_models_closes_stream_immediately() {
        let orch = orchestrator();
        let store = SessionStore::new(&SessionConfig::default(), vec![]);
        let session = store.create().unwrap();

        let (_handle, mut rx) = orch.begin(session).unwrap();
        assert!(rx.recv().await.is_none());
    }
}
