//! In-memory session store.
//!
//! Deliberately has no disk persistence — all state is lost on restart
//! (an explicit design choice, not an omission). Sessions are evicted by
//! a 50-session capacity cap with LRU eviction among idle sessions, and by
//! a 15-minute idle TTL enforced by a background reaper.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use gw_domain::config::SessionConfig;
use gw_domain::error::{Error, Result};
use gw_domain::model::Turn;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

/// One comparison session: an opaque id plus one independent turn history
/// per configured model.
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    last_access_at: Mutex<DateTime<Utc>>,
    histories: Mutex<HashMap<String, Vec<Turn>>>,
    /// Immediate try-acquire, no queueing: a second concurrent `begin` on
    /// the same session must fail `BusySession` right away, never wait.
    busy: AtomicBool,
    max_turns: usize,
    max_context_tokens: usize,
}

impl Session {
    fn new(model_ids: &[String], max_turns: usize, max_context_tokens: usize) -> Self {
        let now = Utc::now();
        let histories = model_ids.iter().map(|id| (id.clone(), Vec::new())).collect();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            last_access_at: Mutex::new(now),
            histories: Mutex::new(histories),
            busy: AtomicBool::new(false),
            max_turns,
            max_context_tokens,
        }
    }

    pub fn touch(&self) {
        *self.last_access_at.lock() = Utc::now();
    }

    pub fn last_access_at(&self) -> DateTime<Utc> {
        *self.last_access_at.lock()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Try to mark this session as having an active generation. Returns
    /// `false` immediately on contention — callers must surface
    /// `BusySession`, never block waiting for the lock to free up.
    pub fn try_begin_generation(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Idempotent: calling this when no generation is active is a no-op.
    pub fn end_generation(&self) {
        self.busy.store(false, Ordering::Release);
    }

    /// Append one user turn to every model's history, then apply the
    /// truncation policy to each.
    pub fn append_user_turn(&self, text: &str) {
        let mut histories = self.histories.lock();
        for turns in histories.values_mut() {
            turns.push(Turn::user(text));
            truncate(turns, self.max_turns, self.max_context_tokens);
        }
        self.touch();
    }

    /// Snapshot of one model's history, for handing to that model's adapter.
    pub fn history_for(&self, model_id: &str) -> Vec<Turn> {
        self.histories.lock().get(model_id).cloned().unwrap_or_default()
    }

    /// Commit the assistant turn produced by a finished generation for one
    /// model. Called even for errored/cancelled models with whatever
    /// partial content was produced, so follow-up turns stay coherent.
    pub fn commit_assistant_turn(&self, model_id: &str, turn: Turn) {
        let mut histories = self.histories.lock();
        if let Some(turns) = histories.get_mut(model_id) {
            turns.push(turn);
            truncate(turns, self.max_turns, self.max_context_tokens);
        }
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.histories.lock().keys().cloned().collect()
    }
}

/// Truncate to the most recent `max_turns` full turns OR `max_context_tokens`
/// estimated tokens, whichever binds first. Only ever drops the oldest
/// complete turns; a turn is never split.
fn truncate(turns: &mut Vec<Turn>, max_turns: usize, max_context_tokens: usize) {
    while turns.len() > max_turns {
        turns.remove(0);
    }
    let mut total: usize = turns.iter().map(Turn::estimated_tokens).sum();
    while total > max_context_tokens && turns.len() > 1 {
        let removed = turns.remove(0);
        total = total.saturating_sub(removed.estimated_tokens());
    }
}

/// Registry of all live sessions. The registry lock guards only the
/// `HashMap` itself; mutating a session's history or busy flag uses that
/// session's own interior locks so registry operations never block on
/// session work and vice versa.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
    model_ids: Vec<String>,
    capacity: usize,
    ttl: chrono::Duration,
    max_turns: usize,
    max_context_tokens: usize,
}

impl SessionStore {
    pub fn new(config: &SessionConfig, model_ids: Vec<String>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            model_ids,
            capacity: config.capacity,
            ttl: chrono::Duration::minutes(config.ttl_minutes),
            max_turns: config.max_turns,
            max_context_tokens: config.max_context_tokens,
        }
    }

    /// Create a new session, evicting the least-recently-accessed idle
    /// session if at capacity. Fails `Overloaded` if at capacity and every
    /// session is busy.
    pub fn create(&self) -> Result<Arc<Session>> {
        let mut sessions = self.sessions.write();

        if sessions.len() >= self.capacity {
            let victim = sessions
                .values()
                .filter(|s| !s.is_busy())
                .min_by_key(|s| s.last_access_at())
                .map(|s| s.id);

            match victim {
                Some(id) => {
                    sessions.remove(&id);
                }
                None => return Err(Error::Overloaded),
            }
        }

        let session = Arc::new(Session::new(&self.model_ids, self.max_turns, self.max_context_tokens));
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Remove every idle session whose TTL has elapsed. Sessions with an
    /// active generation are skipped; they are reaped after completion if
    /// still idle past TTL.
    pub fn reap_expired(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.is_busy() || now.signed_duration_since(s.last_access_at()) < self.ttl);
        let reaped = before - sessions.len();
        if reaped > 0 {
            tracing::info!(reaped, remaining = sessions.len(), "reaped idle sessions");
        }
    }

    /// Spawn the background reaper task. Runs until the returned handle is
    /// aborted or dropped.
    pub fn spawn_reaper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.reap_expired();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig {
            capacity: 2,
            ttl_minutes: 15,
            reaper_interval_seconds: 30,
            max_turns: 5,
            max_context_tokens: 8000,
        }
    }

    fn models() -> Vec<String> {
        vec!["model-a".into(), "model-b".into()]
    }

    #[test]
    fn new_session_has_one_history_per_model() {
        let store = SessionStore::new(&config(), models());
        let session = store.create().unwrap();
        let mut ids = session.model_ids();
        ids.sort();
        assert_eq!(ids, vec!["model-a".to_string(), "model-b".to_string()]);
    }

    #[test]
    fn try_begin_generation_is_exclusive() {
        let store = SessionStore::new(&config(), models());
        let session = store.create().unwrap();
        assert!(session.try_begin_generation());
        assert!(!session.try_begin_generation());
        session.end_generation();
        assert!(session.try_begin_generation());
    }

    #[test]
    fn capacity_cap_evicts_idle_then_fails_when_all_busy() {
        let store = SessionStore::new(&config(), models());
        let s1 = store.create().unwrap();
        let _s2 = store.create().unwrap();

        // s1 is idle; a third create should evict it.
        let s3 = store.create().unwrap();
        assert_eq!(store.len(), 2);
        assert!(store.get(s1.id).is_none());
        assert!(store.get(s3.id).is_some());

        // Now mark both remaining sessions busy; a new create must fail.
        for s in [&_s2, &s3] {
            s.try_begin_generation();
        }
        assert!(matches!(store.create(), Err(Error::Overloaded)));
    }

    #[test]
    fn append_user_turn_adds_to_every_model_history() {
        let store = SessionStore::new(&config(), models());
        let session = store.create().unwrap();
        session.append_user_turn("hello");
        assert_eq!(session.history_for("model-a").len(), 1);
        assert_eq!(session.history_for("model-b").len(), 1);
    }

    #[test]
    fn truncate_keeps_at_most_max_turns() {
        let mut turns: Vec<Turn> = (0..10).map(|i| Turn::user(format!("msg {i}"))).collect();
        truncate(&mut turns, 5, 8000);
        assert_eq!(turns.len(), 5);
        assert_eq!(turns[0].text(), "msg 5");
    }

    #[test]
    fn truncate_never_drops_below_one_turn_on_token_budget() {
        let huge = "x".repeat(100_000);
        let mut turns = vec![Turn::user(huge)];
        truncate(&mut turns, 5, 10);
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn reap_expired_skips_busy_sessions() {
        let mut cfg = config();
        cfg.ttl_minutes = -1; // already expired
        let store = SessionStore::new(&cfg, models());
        let busy = store.create().unwrap();
        busy.try_begin_generation();
        let idle = store.create().unwrap();

        store.reap_expired();
        assert!(store.get(busy.id).is_some());
        assert!(store.get(idle.id).is_none());
    }
}
