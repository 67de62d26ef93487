// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::Utc;
use serde_json::{json, Value};

use vantage_core::{AgentEvent, BusEvent};

use crate::output::{write_stderr, write_stdout};

/// Event envelope naming convention (CLI `--json-standard`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonStandard {
    /// camelCase fields, Unix-millisecond timestamps.
    Opencode,
    /// snake_case fields, ISO-8601 timestamps (Claude-compatible NDJSON).
    Claude,
}

/// Subscribes to a session's bus and writes one JSON object per event —
/// data/status events to stdout, errors to stderr. The sole consumer of
/// [`vantage_core::EventBus`] outside the agent's own per-call channel.
pub struct JsonEmitter {
    session_id: String,
    standard: JsonStandard,
    compact: bool,
}

impl JsonEmitter {
    pub fn new(session_id: impl Into<String>, standard: JsonStandard, compact: bool) -> Self {
        Self {
            session_id: session_id.into(),
            standard,
            compact,
        }
    }

    /// Write one bus event as a JSON line. Returns without writing for
    /// events that carry no externally meaningful payload (e.g. the
    /// internal `QuestionAnswer` echo).
    pub fn emit(&self, bus_event: &BusEvent) {
        let Some((type_name, fields, is_error)) = describe(&bus_event.event) else {
            return;
        };

        let envelope = self.envelope(bus_event.seq, type_name, fields);
        let line = if self.compact {
            envelope.to_string()
        } else {
            serde_json::to_string_pretty(&envelope).unwrap_or_else(|_| envelope.to_string())
        };

        if is_error {
            write_stderr(&line);
        } else {
            write_stdout(&format!("{line}\n"));
        }
    }

    fn envelope(&self, seq: u64, type_name: &str, mut fields: Value) -> Value {
        let obj = fields.as_object_mut().expect("describe() returns an object");
        match self.standard {
            JsonStandard::Opencode => {
                obj.insert("type".into(), json!(type_name));
                obj.insert("sessionID".into(), json!(self.session_id));
                obj.insert("seq".into(), json!(seq));
                obj.insert("timestamp".into(), json!(Utc::now().timestamp_millis()));
            }
            JsonStandard::Claude => {
                obj.insert("type".into(), json!(type_name));
                obj.insert("session_id".into(), json!(self.session_id));
                obj.insert("seq".into(), json!(seq));
                obj.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
            }
        }
        fields
    }
}

/// Map one `AgentEvent` to `(type, payload fields, is_error)`. `None` means
/// the event is internal bookkeeping and should not reach the wire.
fn describe(event: &AgentEvent) -> Option<(&'static str, Value, bool)> {
    match event {
        AgentEvent::SessionCreated { session_id } => {
            Some(("session.created", json!({ "id": session_id }), false))
        }
        AgentEvent::StepStart { turn } => Some(("step.start", json!({ "turn": turn }), false)),
        AgentEvent::StepFinish { turn, finish_reason } => Some((
            "step.finish",
            json!({ "turn": turn, "reason": format!("{finish_reason:?}") }),
            false,
        )),
        AgentEvent::TextDelta(delta) => Some(("text.delta", json!({ "text": delta }), false)),
        AgentEvent::TextComplete(text) => Some(("text.final", json!({ "text": text }), false)),
        AgentEvent::ThinkingDelta(delta) => {
            Some(("thinking.delta", json!({ "text": delta }), false))
        }
        AgentEvent::ThinkingComplete(text) => {
            Some(("thinking.final", json!({ "text": text }), false))
        }
        AgentEvent::ToolCallStarted(tc) => Some((
            "tool.call",
            json!({ "callId": tc.id, "name": tc.name, "input": tc.args }),
            false,
        )),
        AgentEvent::ToolCallFinished { call_id, tool_name, output, is_error } => Some((
            "tool.result",
            json!({
                "callId": call_id,
                "name": tool_name,
                "ok": !is_error,
                "value": output,
            }),
            false,
        )),
        AgentEvent::ContextCompacted { tokens_before, tokens_after, strategy, turn } => Some((
            "context.compacted",
            json!({
                "turn": turn,
                "tokensBefore": tokens_before,
                "tokensAfter": tokens_after,
                "strategy": strategy.to_string(),
            }),
            false,
        )),
        AgentEvent::TokenUsage { .. } => None,
        AgentEvent::UsageUpdate { input, output, cache_read, cache_write } => Some((
            "usage.update",
            json!({
                "input": input,
                "output": output,
                "cacheRead": cache_read,
                "cacheWrite": cache_write,
            }),
            false,
        )),
        AgentEvent::TurnComplete => Some(("turn.complete", json!({}), false)),
        AgentEvent::Aborted { partial_text } => {
            Some(("aborted", json!({ "partialText": partial_text }), false))
        }
        AgentEvent::Error(msg) => Some(("error", json!({ "errorType": "AgentError", "message": msg }), true)),
        AgentEvent::TodoUpdate(todos) => Some((
            "todo.update",
            json!({ "todos": todos.iter().map(|t| json!({ "id": t.id, "content": t.content, "status": t.status })).collect::<Vec<_>>() }),
            false,
        )),
        AgentEvent::ModeChanged(mode) => {
            Some(("mode.changed", json!({ "mode": mode.to_string() }), false))
        }
        AgentEvent::Question { id, questions } => {
            Some(("question", json!({ "id": id, "questions": questions }), false))
        }
        AgentEvent::QuestionAnswer { .. } => None,
        AgentEvent::SessionIdle => Some(("session.idle", json!({}), false)),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opencode_envelope_uses_camel_case_and_ms_timestamp() {
        let emitter = JsonEmitter::new("sess-1", JsonStandard::Opencode, true);
        let bus_event = BusEvent {
            seq: 3,
            event: AgentEvent::StepStart { turn: 1 },
        };
        let (_, fields, _) = describe(&bus_event.event).unwrap();
        let env = emitter.envelope(bus_event.seq, "step.start", fields);
        assert_eq!(env["sessionID"], json!("sess-1"));
        assert_eq!(env["seq"], json!(3));
        assert!(env["timestamp"].is_i64());
    }

    #[test]
    fn claude_envelope_uses_snake_case_and_iso8601_timestamp() {
        let emitter = JsonEmitter::new("sess-1", JsonStandard::Claude, true);
        let bus_event = BusEvent {
            seq: 1,
            event: AgentEvent::SessionIdle,
        };
        let (_, fields, _) = describe(&bus_event.event).unwrap();
        let env = emitter.envelope(bus_event.seq, "session.idle", fields);
        assert_eq!(env["session_id"], json!("sess-1"));
        assert!(env["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn question_answer_and_token_usage_are_filtered_out() {
        assert!(describe(&AgentEvent::QuestionAnswer {
            id: "q1".into(),
            answer: "yes".into()
        })
        .is_none());
        assert!(describe(&AgentEvent::TokenUsage {
            input: 1,
            output: 1,
            cache_read: 0,
            cache_write: 0,
            cache_read_total: 0,
            cache_write_total: 0,
            max_tokens: 100,
        })
        .is_none());
    }

    #[test]
    fn tool_error_event_is_routed_to_stderr() {
        let (_, _, is_error) = describe(&AgentEvent::Error("boom".into())).unwrap();
        assert!(is_error);
    }
}
