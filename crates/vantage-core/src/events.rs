// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use vantage_config::AgentMode;
use vantage_model::FinishReason;
use vantage_tools::{events::TodoItem, ToolCall};

/// Events emitted by the agent during a single turn.
/// Consumers (CI runner, TUI) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A text chunk streamed from the model
    TextDelta(String),
    /// A complete text response from the model (after streaming finishes)
    TextComplete(String),
    /// A thinking/reasoning chunk from the model (extended thinking API).
    /// Consumers should accumulate deltas and finalise them into a Thinking
    /// segment when the model signals the end of the reasoning block.
    ThinkingDelta(String),
    /// A complete thinking/reasoning block (accumulated from ThinkingDelta events).
    ThinkingComplete(String),
    /// The model has requested a tool call
    ToolCallStarted(ToolCall),
    /// A tool call finished
    ToolCallFinished {
        call_id: String,
        tool_name: String,
        output: String,
        is_error: bool,
    },
    /// Context was compacted; statistics for the UI
    ContextCompacted {
        tokens_before: usize,
        tokens_after: usize,
        strategy: CompactionStrategyUsed,
        turn: u32,
    },
    /// Current token usage update
    TokenUsage {
        input: u32,
        output: u32,
        /// Tokens served from the provider's prompt cache this turn.
        cache_read: u32,
        /// Tokens written into the provider's prompt cache this turn.
        cache_write: u32,
        /// Tokens served from the provider's prompt cache across the whole session.
        cache_read_total: u32,
        /// Tokens written into the provider's prompt cache across the whole session.
        cache_write_total: u32,
        /// Context window size for the active model.
        max_tokens: usize,
    },
    /// The agent has finished processing the current user turn
    TurnComplete,
    /// The turn was cancelled before the model/tool loop completed; whatever
    /// text had streamed so far (possibly empty) is committed to the
    /// session and carried here for display.
    Aborted { partial_text: String },
    /// A recoverable error occurred
    Error(String),
    /// The todo list was updated
    TodoUpdate(Vec<TodoItem>),
    /// The agent mode was changed
    ModeChanged(AgentMode),
    /// The agent is asking the user a question (id links to QuestionAnswer)
    Question { id: String, questions: Vec<String> },
    /// Answer to a previous Question event
    QuestionAnswer { id: String, answer: String },
    /// Published exactly once, the first time a session actually submits a
    /// turn. Always the first event a fresh subscriber sees for a session.
    SessionCreated { session_id: String },
    /// A model round has started (one `stream_one_turn` call).
    StepStart { turn: u32 },
    /// A model round finished, carrying its normalized finish reason.
    StepFinish { turn: u32, finish_reason: FinishReason },
    /// The session has gone idle: every tool call issued so far is in a
    /// terminal state and no further model round is in flight. Published
    /// once per `submit`/`submit_with_cancel` call, after `TurnComplete` or
    /// `Aborted`.
    SessionIdle,
    /// Session-wide token usage, published alongside the per-turn
    /// `TokenUsage` event so a subscriber that only wants running totals
    /// does not have to accumulate them itself.
    UsageUpdate {
        input: u32,
        output: u32,
        cache_read: u32,
        cache_write: u32,
    },
}

/// Which compaction path actually ran, reported alongside `ContextCompacted`
/// so consumers can distinguish an LLM-summarized checkpoint from a
/// deterministic emergency drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionStrategyUsed {
    Structured,
    Narrative,
    Emergency,
}

impl std::fmt::Display for CompactionStrategyUsed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompactionStrategyUsed::Structured => write!(f, "structured"),
            CompactionStrategyUsed::Narrative => write!(f, "narrative"),
            CompactionStrategyUsed::Emergency => write!(f, "emergency"),
        }
    }
}
