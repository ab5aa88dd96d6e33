// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operator conversation state machine.
//!
//! Multi-step admin flows (register a connection, add a substitution rule,
//! set a watermark) collect their inputs one message at a time. Each
//! operator's progress is one [`WizardState`] value in a keyed map; every
//! state carries exactly the data collected so far.
//!
//! # State Transitions
//!
//! ```text
//!            begin_connection()
//! Idle ─────────────────────────→ AwaitingSource
//!  ↑                                   │ text (valid reference)
//!  │                                   ↓
//!  │                          AwaitingDestination { source }
//!  │                                   │ text (valid reference)
//!  │                                   ↓
//!  │                  AwaitingRestriction { source, destination }
//!  │                                   │ restricted yes/no
//!  ├───────── Completed(CreateConnection) ◀┘
//!  │
//!  │         begin_rule(conn)
//! Idle ─────────────────────────→ AwaitingOriginalWord { connection_id }
//!  ↑                                   │ text
//!  │                                   ↓
//!  │                AwaitingReplacementWord { connection_id, original }
//!  ├───────── Completed(AddRule) ◀─────┘ text
//!  │
//!  │         begin_watermark(conn)
//! Idle ─────────────────────────→ AwaitingWatermark { connection_id }
//!  └───────── Completed(SetWatermark) ◀┘ text
//! ```
//!
//! `cancel()` returns any state to `Idle`. An invalid reference keeps the
//! state and re-asks. Input that does not fit the current state is reported
//! as [`WizardStep::NotExpected`] and changes nothing.

use crate::admin::{validate_reference, MirrorAdmin};
use crate::error::Result;
use crate::platform::Platform;
use crate::store::Connection;
use dashmap::DashMap;
use tracing::debug;

/// Where one operator is in a flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WizardState {
    #[default]
    Idle,
    AwaitingSource,
    AwaitingDestination {
        source: String,
    },
    AwaitingRestriction {
        source: String,
        destination: String,
    },
    AwaitingOriginalWord {
        connection_id: i64,
    },
    AwaitingReplacementWord {
        connection_id: i64,
        original: String,
    },
    AwaitingWatermark {
        connection_id: i64,
    },
}

/// The question the front end should ask next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    SourceReference,
    DestinationReference,
    /// Yes/no: does the source block passive observation?
    Restriction,
    OriginalWord,
    ReplacementWord { original: String },
    WatermarkText,
}

/// A fully collected operator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardCommand {
    CreateConnection {
        source: String,
        destination: String,
        restricted: bool,
    },
    AddRule {
        connection_id: i64,
        original: String,
        replacement: String,
    },
    SetWatermark {
        connection_id: i64,
        text: String,
    },
}

/// Result of a [`WizardCommand`] applied through [`MirrorAdmin`].
#[derive(Debug, Clone)]
pub enum Applied {
    ConnectionCreated(Connection),
    RuleAdded { connection_id: i64, rule_id: i64 },
    WatermarkSet { connection_id: i64 },
}

impl WizardCommand {
    pub async fn apply<P: Platform>(self, admin: &MirrorAdmin<P>) -> Result<Applied> {
        match self {
            WizardCommand::CreateConnection {
                source,
                destination,
                restricted,
            } => admin
                .create_connection(&source, &destination, restricted)
                .await
                .map(Applied::ConnectionCreated),
            WizardCommand::AddRule {
                connection_id,
                original,
                replacement,
            } => {
                let rule_id = admin.add_rule(connection_id, &original, &replacement).await?;
                Ok(Applied::RuleAdded { connection_id, rule_id })
            }
            WizardCommand::SetWatermark { connection_id, text } => {
                admin.set_watermark(connection_id, &text).await?;
                Ok(Applied::WatermarkSet { connection_id })
            }
        }
    }
}

/// What the front end should do after an input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardStep {
    /// Ask this next.
    Ask(Prompt),
    /// Input rejected; ask the same question again.
    Rejected { reason: String, prompt: Prompt },
    /// Flow finished; the operator is back to `Idle`.
    Completed(WizardCommand),
    Cancelled,
    /// Nothing in progress accepts this input.
    NotExpected,
}

/// Operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WizardInput {
    Text(String),
    Restricted(bool),
}

impl WizardState {
    /// Pure transition: consume the state and an input.
    pub fn next(self, input: WizardInput) -> (WizardState, WizardStep) {
        use WizardInput::{Restricted, Text};
        use WizardState::*;

        match (self, input) {
            (AwaitingSource, Text(text)) => match validate_reference(&text) {
                Ok(source) => (
                    AwaitingDestination { source },
                    WizardStep::Ask(Prompt::DestinationReference),
                ),
                Err(e) => (
                    AwaitingSource,
                    WizardStep::Rejected {
                        reason: e.to_string(),
                        prompt: Prompt::SourceReference,
                    },
                ),
            },

            (AwaitingDestination { source }, Text(text)) => match validate_reference(&text) {
                Ok(destination) => (
                    AwaitingRestriction { source, destination },
                    WizardStep::Ask(Prompt::Restriction),
                ),
                Err(e) => (
                    AwaitingDestination { source },
                    WizardStep::Rejected {
                        reason: e.to_string(),
                        prompt: Prompt::DestinationReference,
                    },
                ),
            },

            (AwaitingRestriction { source, destination }, Restricted(restricted)) => (
                Idle,
                WizardStep::Completed(WizardCommand::CreateConnection {
                    source,
                    destination,
                    restricted,
                }),
            ),

            (AwaitingOriginalWord { connection_id }, Text(text)) => {
                // Rules are literal: surrounding spaces are part of the token.
                if text.trim().is_empty() {
                    return (
                        AwaitingOriginalWord { connection_id },
                        WizardStep::Rejected {
                            reason: "the word to replace must not be empty".into(),
                            prompt: Prompt::OriginalWord,
                        },
                    );
                }
                (
                    AwaitingReplacementWord {
                        connection_id,
                        original: text.clone(),
                    },
                    WizardStep::Ask(Prompt::ReplacementWord { original: text }),
                )
            }

            // An empty replacement deletes the word, which is allowed.
            (AwaitingReplacementWord { connection_id, original }, Text(text)) => (
                Idle,
                WizardStep::Completed(WizardCommand::AddRule {
                    connection_id,
                    original,
                    replacement: text,
                }),
            ),

            (AwaitingWatermark { connection_id }, Text(text)) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    return (
                        AwaitingWatermark { connection_id },
                        WizardStep::Rejected {
                            reason: "watermark text must not be empty".into(),
                            prompt: Prompt::WatermarkText,
                        },
                    );
                }
                (
                    Idle,
                    WizardStep::Completed(WizardCommand::SetWatermark { connection_id, text }),
                )
            }

            (state, _) => (state, WizardStep::NotExpected),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, WizardState::Idle)
    }
}

/// Per-operator wizard sessions.
#[derive(Debug, Default)]
pub struct Wizard {
    sessions: DashMap<i64, WizardState>,
}

impl Wizard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of `user_id` (`Idle` when unknown).
    pub fn state(&self, user_id: i64) -> WizardState {
        self.sessions
            .get(&user_id)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Operators with a flow in progress.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn begin_connection(&self, user_id: i64) -> WizardStep {
        self.begin(user_id, WizardState::AwaitingSource, Prompt::SourceReference)
    }

    pub fn begin_rule(&self, user_id: i64, connection_id: i64) -> WizardStep {
        self.begin(
            user_id,
            WizardState::AwaitingOriginalWord { connection_id },
            Prompt::OriginalWord,
        )
    }

    pub fn begin_watermark(&self, user_id: i64, connection_id: i64) -> WizardStep {
        self.begin(
            user_id,
            WizardState::AwaitingWatermark { connection_id },
            Prompt::WatermarkText,
        )
    }

    /// Starting a flow discards whatever was in progress.
    fn begin(&self, user_id: i64, state: WizardState, prompt: Prompt) -> WizardStep {
        debug!(user_id, state = ?state, "Wizard flow started");
        self.sessions.insert(user_id, state);
        WizardStep::Ask(prompt)
    }

    pub fn handle_text(&self, user_id: i64, text: &str) -> WizardStep {
        self.handle(user_id, WizardInput::Text(text.to_string()))
    }

    pub fn handle_restriction(&self, user_id: i64, restricted: bool) -> WizardStep {
        self.handle(user_id, WizardInput::Restricted(restricted))
    }

    pub fn handle(&self, user_id: i64, input: WizardInput) -> WizardStep {
        let Some(current) = self.sessions.remove(&user_id).map(|(_, state)| state) else {
            return WizardStep::NotExpected;
        };

        let (next, step) = current.next(input);
        if !next.is_idle() {
            self.sessions.insert(user_id, next);
        }
        debug!(user_id, step = ?step, "Wizard input handled");
        step
    }

    /// Drop any flow in progress.
    pub fn cancel(&self, user_id: i64) -> WizardStep {
        match self.sessions.remove(&user_id) {
            Some(_) => WizardStep::Cancelled,
            None => WizardStep::NotExpected,
        }
    }
}
