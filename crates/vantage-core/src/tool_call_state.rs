// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT

/// Lifecycle of one tool call, tracked from the moment the model requests it
/// until it reaches a terminal state.
///
/// `SessionIdle` must only be published once every call issued during the
/// session is terminal — a call left `Pending` or `Running` at that point
/// means a tool result was dropped somewhere in the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallState {
    /// Requested by the model, not yet dispatched to the registry.
    Pending,
    /// Dispatched; awaiting the tool's future.
    Running,
    /// Finished without error.
    Completed,
    /// Finished with an error result (including `ToolTimeout`).
    Error,
    /// The turn was cancelled before this call reached a result.
    Aborted,
}

impl ToolCallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolCallState::Completed | ToolCallState::Error | ToolCallState::Aborted
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
