//! The vendor-agnostic agent loop.
//!
//! Every [`ModelAdapter`] only has to turn vendor bytes into [`RawChunk`]s;
//! everything downstream — tool dispatch, the consecutive-same-tool and
//! total-tool-call guardrails, the document-block budget, TTFT bookkeeping,
//! and `Event` emission — lives here exactly once, run identically for
//! every vendor (spec: "adapter-internal agent loop, identical across
//! vendors even though wire protocols differ").

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use gw_domain::model::{Block, Event, Role, Turn};
use gw_domain::stream::RawChunk;
use gw_domain::tool::ToolRegistry;
use tokio::sync::mpsc;

use crate::traits::{ChatRequest, ModelAdapter};
use gw_domain::error::Error;

/// Backoff before the single pre-TTFT retry of a transient failure
/// (spec: "retriable with one retry at exponential backoff <= 2s").
const RETRY_BACKOFF_MS: u64 = 1000;

/// Cooperative cancellation flag shared between the orchestrator and one
/// running agent-loop task. Idempotent: cancelling twice is a no-op.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result of one model's full generation: the single assistant turn to
/// commit to that model's history, plus totals for the `done` event.
pub struct AgentLoopOutcome {
    pub assistant_turn: Turn,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub errored: bool,
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Drop the oldest `document` blocks from a scratch copy of history until
/// at most `budget` remain. The canonical history passed in is untouched;
/// this only affects what gets submitted to the vendor this round.
fn apply_document_budget(history: &[Turn], budget: usize) -> Vec<Turn> {
    let total: usize = history.iter().map(Turn::document_count).sum();
    if total <= budget {
        return history.to_vec();
    }

    let mut to_drop = total - budget;
    let mut out = Vec::with_capacity(history.len());
    for turn in history {
        if to_drop == 0 {
            out.push(turn.clone());
            continue;
        }
        let mut blocks = Vec::with_capacity(turn.blocks.len());
        for block in &turn.blocks {
            if to_drop > 0 && matches!(block, Block::Document { .. }) {
                to_drop -= 1;
                continue;
            }
            blocks.push(block.clone());
        }
        out.push(Turn {
            role: turn.role,
            blocks,
        });
    }
    out
}

/// Run one model's agent loop to completion, emitting `Event`s tagged with
/// `model_id` onto `events` as they happen, and returning the assistant
/// turn to append to that model's history.
pub async fn run(
    adapter: Arc<dyn ModelAdapter>,
    system: Option<String>,
    history: Vec<Turn>,
    tools: Arc<ToolRegistry>,
    deadline: Instant,
    cancel: CancelToken,
    events: mpsc::Sender<Event>,
    max_tool_calls: u32,
    consecutive_same_tool_cap: usize,
    document_block_budget: usize,
) -> AgentLoopOutcome {
    let model_id = adapter.model_id().to_string();
    let generation_start = Instant::now();

    let _ = events
        .send(Event::Start {
            model_id: model_id.clone(),
            timestamp: now_ms(),
        })
        .await;

    let mut assistant_blocks: Vec<Block> = Vec::new();
    let mut scratch_tail: Vec<Turn> = Vec::new();
    let mut ttft_emitted = false;
    let mut total_tool_calls: u32 = 0;
    let mut recent_tool_names: Vec<String> = Vec::new();
    let mut tools_allowed = !tools.is_empty();
    let mut tokens_in_total: u32 = 0;
    let mut tokens_out_total: u32 = 0;
    let mut errored = false;
    let mut retry_used = false;

    'rounds: loop {
        if cancel.is_cancelled() {
            let _ = events
                .send(Event::Error {
                    model_id: model_id.clone(),
                    error: "cancelled".into(),
                    retry_after_ms: None,
                })
                .await;
            errored = true;
            break;
        }
        if Instant::now() >= deadline {
            let _ = events
                .send(Event::Error {
                    model_id: model_id.clone(),
                    error: Error::Deadline { model_id: model_id.clone() }.to_string(),
                    retry_after_ms: None,
                })
                .await;
            errored = true;
            break;
        }

        let mut submitted = apply_document_budget(&history, document_block_budget);
        if !assistant_blocks.is_empty() {
            submitted.push(Turn {
                role: Role::Assistant,
                blocks: assistant_blocks.clone(),
            });
        }
        submitted.extend(scratch_tail.clone());

        let req = ChatRequest {
            system: system.clone(),
            history: submitted,
            tools: if tools_allowed { tools.definitions() } else { Vec::new() },
        };

        let mut stream = match adapter.stream(req).await {
            Ok(s) => s,
            Err(e) => {
                let retriable = matches!(e, Error::Http(_));
                if retriable && !ttft_emitted && !retry_used {
                    retry_used = true;
                    tokio::time::sleep(std::time::Duration::from_millis(RETRY_BACKOFF_MS)).await;
                    continue 'rounds;
                }
                let _ = events
                    .send(Event::Error {
                        model_id: model_id.clone(),
                        error: e.to_string(),
                        retry_after_ms: retriable.then_some(RETRY_BACKOFF_MS),
                    })
                    .await;
                errored = true;
                break;
            }
        };

        // Tool calls assembled during this round, in arrival order.
        let mut pending: HashMap<String, (String, String)> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut saw_tool_use = false;
        let mut round_done = false;

        while let Some(chunk) = stream.next().await {
            if cancel.is_cancelled() {
                let _ = events
                    .send(Event::Error {
                        model_id: model_id.clone(),
                        error: "cancelled".into(),
                        retry_after_ms: None,
                    })
                    .await;
                errored = true;
                break 'rounds;
            }

            match chunk {
                RawChunk::Text(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    if !ttft_emitted {
                        ttft_emitted = true;
                        let _ = events
                            .send(Event::Ttft {
                                model_id: model_id.clone(),
                                ttft_ms: generation_start.elapsed().as_millis() as u64,
                            })
                            .await;
                    }
                    let _ = events
                        .send(Event::Token {
                            model_id: model_id.clone(),
                            content: text.clone(),
                        })
                        .await;
                    assistant_blocks.push(Block::Text { text });
                }
                RawChunk::ToolUseStart { id, name } => {
                    saw_tool_use = true;
                    pending.insert(id.clone(), (name, String::new()));
                    order.push(id);
                }
                RawChunk::ToolUseDelta { id, delta_json } => {
                    if let Some(entry) = pending.get_mut(&id) {
                        entry.1.push_str(&delta_json);
                    }
                }
                RawChunk::ToolUseEnd { id } => {
                    let Some((name, args_json)) = pending.get(&id).cloned() else {
                        continue;
                    };
                    let args: serde_json::Value =
                        serde_json::from_str(&args_json).unwrap_or(serde_json::Value::Object(Default::default()));
                    assistant_blocks.push(Block::ToolUse {
                        id: id.clone(),
                        name: name.clone(),
                        args: args.clone(),
                    });

                    total_tool_calls += 1;
                    recent_tool_names.push(name.clone());

                    let _ = events
                        .send(Event::ToolStart {
                            model_id: model_id.clone(),
                            tool_name: name.clone(),
                            timestamp: now_ms(),
                        })
                        .await;
                    let tool_start = Instant::now();

                    let outcome = match tools.get(&name) {
                        Some(tool) => tool.invoke(args).await,
                        None => gw_domain::tool::ToolOutcome {
                            blocks: vec![Block::Document {
                                title: "unknown tool".into(),
                                text: Error::Tool {
                                    tool_name: name.clone(),
                                    message: "no such tool registered".into(),
                                }
                                .to_string(),
                                metadata: serde_json::Value::Null,
                            }],
                            is_error: true,
                        },
                    };

                    let _ = events
                        .send(Event::ToolEnd {
                            model_id: model_id.clone(),
                            tool_name: name,
                            duration_ms: tool_start.elapsed().as_millis() as u64,
                        })
                        .await;

                    assistant_blocks.push(Block::tool_result(id, outcome.blocks, outcome.is_error));
                }
                RawChunk::Done { usage } => {
                    tokens_in_total = usage.tokens_in;
                    tokens_out_total = usage.tokens_out;
                    round_done = true;
                }
                RawChunk::Error { message, retriable } => {
                    if retriable && !ttft_emitted && !retry_used {
                        retry_used = true;
                        tokio::time::sleep(std::time::Duration::from_millis(RETRY_BACKOFF_MS)).await;
                        continue 'rounds;
                    }
                    let _ = events
                        .send(Event::Error {
                            model_id: model_id.clone(),
                            error: message,
                            retry_after_ms: retriable.then_some(RETRY_BACKOFF_MS),
                        })
                        .await;
                    errored = true;
                    break 'rounds;
                }
            }
        }

        if !round_done {
            // The stream ended without a terminal chunk — treat as natural end.
            break;
        }
        if !saw_tool_use {
            break;
        }

        let forced = total_tool_calls >= max_tool_calls
            || (recent_tool_names.len() >= consecutive_same_tool_cap
                && recent_tool_names[recent_tool_names.len() - consecutive_same_tool_cap..]
                    .windows(2)
                    .all(|w| w[0] == w[1]));

        if forced {
            tools_allowed = false;
            scratch_tail.push(Turn::user(
                "You've reached the tool-call limit for this turn. Answer using what you've already found; do not call any more tools.",
            ));
        }
    }

    // `done`/`error` are mutually exclusive terminal events for a model;
    // an `error` was already sent on every path that sets `errored`.
    if !errored {
        let _ = events
            .send(Event::Done {
                model_id: model_id.clone(),
                total_ms: generation_start.elapsed().as_millis() as u64,
                tokens_in: tokens_in_total,
                tokens_out: tokens_out_total,
            })
            .await;
    }

    AgentLoopOutcome {
        assistant_turn: Turn::assistant(assistant_blocks),
        tokens_in: tokens_in_total,
        tokens_out: tokens_out_total,
        errored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gw_domain::model::Block;

    #[test]
    fn document_budget_keeps_total_under_limit() {
        let mut blocks = Vec::new();
        for i in 0..150 {
            blocks.push(Block::Document {
                title: format!("doc{i}"),
                text: String::new(),
                metadata: serde_json::Value::Null,
            });
        }
        let history = vec![Turn::assistant(blocks)];
        let trimmed = apply_document_budget(&history, 100);
        let total: usize = trimmed.iter().map(Turn::document_count).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn document_budget_noop_when_under_limit() {
        let history = vec![Turn::user("hi")];
        let trimmed = apply_document_budget(&history, 100);
        assert_eq!(trimmed.len(), 1);
    }

    #[test]
    fn cancel_token_is_idempotent() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(token.is_cancelled());
    }
}

#[cfg(test)]
mod run_tests {
    use super::*;
    use gw_domain::error::{Error, Result as DomainResult};
    use gw_domain::model::Block;
    use gw_domain::stream::BoxStream;
    use gw_domain::tool::{Tool, ToolDefinition, ToolOutcome};
    use std::sync::Mutex;
    use std::time::Duration;

    /// A `ModelAdapter` that plays back one scripted response per call to
    /// `stream`, and records the history it was submitted each time.
    struct ScriptedAdapter {
        model_id: String,
        responses: Mutex<std::collections::VecDeque<DomainResult<Vec<RawChunk>>>>,
        submitted_history: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait::async_trait]
    impl ModelAdapter for ScriptedAdapter {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        async fn stream(&self, req: ChatRequest) -> DomainResult<BoxStream<'static, RawChunk>> {
            self.submitted_history.lock().unwrap().push(req.history);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("test script exhausted");
            next.map(|chunks| Box::pin(futures_util::stream::iter(chunks)) as BoxStream<'static, RawChunk>)
        }
    }

    struct NoopTool;

    #[async_trait::async_trait]
    impl Tool for NoopTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "search".into(),
                description: "test tool".into(),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _args: serde_json::Value) -> ToolOutcome {
            ToolOutcome {
                blocks: vec![Block::Document {
                    title: "result".into(),
                    text: "found it".into(),
                    metadata: serde_json::Value::Null,
                }],
                is_error: false,
            }
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(NoopTool));
        Arc::new(reg)
    }

    #[tokio::test]
    async fn forced_answer_coaching_turn_follows_the_assistant_turn_it_refers_to() {
        let adapter = Arc::new(ScriptedAdapter {
            model_id: "test-model".into(),
            responses: Mutex::new(
                vec![
                    // Round 1: one tool call, hits max_tool_calls == 1.
                    Ok(vec![
                        RawChunk::ToolUseStart { id: "t1".into(), name: "search".into() },
                        RawChunk::ToolUseDelta { id: "t1".into(), delta_json: "{}".into() },
                        RawChunk::ToolUseEnd { id: "t1".into() },
                        RawChunk::Done { usage: Default::default() },
                    ]),
                    // Round 2: forced answer, no more tool use.
                    Ok(vec![RawChunk::Text("final answer".into()), RawChunk::Done { usage: Default::default() }]),
                ]
                .into(),
            ),
            submitted_history: Mutex::new(Vec::new()),
        });

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = run(
            adapter.clone(),
            None,
            vec![Turn::user("question")],
            registry(),
            Instant::now() + Duration::from_secs(5),
            CancelToken::new(),
            tx,
            1,
            3,
            100,
        )
        .await;
        assert!(!outcome.errored);
        while rx.recv().await.is_some() {}

        let calls = adapter.submitted_history.lock().unwrap();
        assert_eq!(calls.len(), 2);
        let round_two_history = &calls[1];

        // The last two turns submitted on the forced round must be the
        // assistant's tool round followed by the coaching turn, never the
        // reverse — the coaching text refers back to the tool result.
        let last = &round_two_history[round_two_history.len() - 1];
        let second_to_last = &round_two_history[round_two_history.len() - 2];
        assert_eq!(second_to_last.role, Role::Assistant);
        assert!(second_to_last.blocks.iter().any(|b| matches!(b, Block::ToolResult { .. })));
        assert_eq!(last.role, Role::User);

        // And no two consecutive user-role turns anywhere in the submission.
        for pair in round_two_history.windows(2) {
            assert!(!(pair[0].role == Role::User && pair[1].role == Role::User));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_pre_ttft_error_is_retried_once_then_succeeds() {
        let adapter = Arc::new(ScriptedAdapter {
            model_id: "test-model".into(),
            responses: Mutex::new(
                vec![
                    Err(Error::Http("connection reset".into())),
                    Ok(vec![RawChunk::Text("hi".into()), RawChunk::Done { usage: Default::default() }]),
                ]
                .into(),
            ),
            submitted_history: Mutex::new(Vec::new()),
        });

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = run(
            adapter.clone(),
            None,
            vec![Turn::user("hi")],
            Arc::new(ToolRegistry::new()),
            Instant::now() + Duration::from_secs(5),
            CancelToken::new(),
            tx,
            10,
            3,
            100,
        )
        .await;

        assert!(!outcome.errored);
        assert_eq!(adapter.submitted_history.lock().unwrap().len(), 2);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert!(!events.iter().any(|e| matches!(e, Event::Error { .. })));
        assert!(events.iter().any(|e| matches!(e, Event::Done { .. })));
    }

    #[tokio::test]
    async fn non_retriable_stream_error_sets_no_retry_after() {
        let adapter = Arc::new(ScriptedAdapter {
            model_id: "test-model".into(),
            responses: Mutex::new(vec![Err(Error::Model {
                model_id: "test-model".into(),
                message: "bad request".into(),
            })]
            .into()),
            submitted_history: Mutex::new(Vec::new()),
        });

        let (tx, mut rx) = mpsc::channel(64);
        let outcome = run(
            adapter,
            None,
            vec![Turn::user("hi")],
            Arc::new(ToolRegistry::new()),
            Instant::now() + Duration::from_secs(5),
            CancelToken::new(),
            tx,
            10,
            3,
            100,
        )
        .await;

        assert!(outcome.errored);
        let mut found_error = false;
        while let Some(e) = rx.recv().await {
            if let Event::Error { retry_after_ms, .. } = e {
                assert_eq!(retry_after_ms, None);
                found_error = true;
            }
        }
        assert!(found_error);
    }
}
