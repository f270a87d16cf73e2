//! Event log line record and the domain event taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line in a session's append-only event log.
///
/// `seq` is strictly increasing per session; enforced by the event log
/// writer, not by this type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic per-session sequence number.
    pub seq: u64,
    /// When the event was appended.
    pub ts: DateTime<Utc>,
    /// The normalized event kind and its payload.
    #[serde(flatten)]
    pub kind: EventKind,
    /// The original wire line this event was derived from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl Event {
    /// Builds an event with no raw line attached.
    pub fn new(seq: u64, kind: EventKind) -> Self {
        Self {
            seq,
            ts: Utc::now(),
            kind,
            raw: None,
        }
    }

    /// Attaches the original wire line this event was derived from.
    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}

/// The normalized, provider-agnostic event taxonomy.
///
/// Tagged by `kind` in JSON so log lines stay self-describing across
/// provider adapters.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A message supplied by the caller.
    #[serde(rename = "message.user")]
    MessageUser {
        /// Message text.
        content: String,
    },

    /// An incremental chunk of assistant output. Storage merges consecutive
    /// deltas into one assistant message; the live bus forwards each
    /// unchanged.
    #[serde(rename = "message.assistant.delta")]
    MessageAssistantDelta {
        /// The incremental text.
        content: String,
    },

    /// A complete assistant message, replacing any accumulated deltas.
    #[serde(rename = "message.assistant.snapshot")]
    MessageAssistantSnapshot {
        /// The full message text.
        content: String,
    },

    /// A debounced whole-region terminal screen change, from a PTY session's
    /// emulator.
    #[serde(rename = "terminal.output")]
    Output {
        /// The changed region and its new contents.
        diff: crate::model::terminal::Diff,
    },

    /// A tool invocation began, or changed permission status.
    #[serde(rename = "tool.call.start")]
    ToolCallStart {
        /// Vendor-assigned tool call id.
        tool_call_id: String,
        /// Tool name.
        name: String,
        /// Tool input, shape is vendor-defined.
        input: Value,
        /// Permission status, when the tool-permission protocol applies.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<ToolCallStatus>,
    },

    /// A tool invocation's result.
    #[serde(rename = "tool.call.result")]
    ToolCallResult {
        /// Vendor-assigned tool call id this result answers.
        tool_call_id: String,
        /// Result payload, shape is vendor-defined.
        result: Value,
        /// Whether the tool reported an error.
        is_error: bool,
    },

    /// A numeric or structured usage/cost metric.
    Metric {
        /// Arbitrary metric payload (token counts, cost, durations, ...).
        data: Value,
    },

    /// Provider-specific side information with no normalized shape.
    Metadata {
        /// Arbitrary metadata payload.
        data: Value,
    },

    /// A recomputation of the session's derived status, for the record.
    #[serde(rename = "status.derived")]
    StatusDerived {
        /// The status at the time this event was appended.
        status: crate::model::DerivedStatus,
    },

    /// A new run began.
    #[serde(rename = "run.started")]
    RunStarted {
        /// The run that started.
        run_id: String,
    },

    /// The active run yielded, awaiting an out-of-band response.
    #[serde(rename = "run.waiting")]
    RunWaiting {
        /// Run this wait belongs to.
        run_id: String,
        /// Resume token id that authorizes completing the wait.
        resume_token_id: String,
    },

    /// A waiting run was interrupted (token invalid, deadline passed, or
    /// process restarted while waiting).
    #[serde(rename = "run.interrupted")]
    RunInterrupted {
        /// Run this interruption applies to.
        run_id: String,
        /// Why the run was interrupted.
        reason: String,
    },

    /// A waiting run resumed after its out-of-band response arrived.
    #[serde(rename = "run.resumed")]
    RunResumed {
        /// Run this resumption applies to.
        run_id: String,
    },

    /// A run reached a terminal state. Exactly one per `run_id`.
    #[serde(rename = "run.completed")]
    RunCompleted {
        /// Run that completed.
        run_id: String,
        /// How the run ended.
        outcome: RunOutcome,
    },

    /// A provider or protocol error, appended to the transcript rather than
    /// raised as a session-level error state.
    Error {
        /// Human-readable error message.
        message: String,
    },
}

/// Coalesces consecutive `message.assistant.delta` events into a single
/// `message.assistant.snapshot`, matching the read-side storage merge
/// behavior: the underlying log keeps every delta, but a caller listing
/// messages sees one assistant message per run of deltas. The merged
/// record carries the last delta's `seq` and timestamp, so cursor
/// pagination against the merged view still advances monotonically.
pub fn merge_assistant_deltas(events: Vec<Event>) -> Vec<Event> {
    let mut merged: Vec<Event> = Vec::with_capacity(events.len());
    for event in events {
        let EventKind::MessageAssistantDelta { content } = &event.kind else {
            merged.push(event);
            continue;
        };
        match merged.last_mut() {
            Some(Event { kind: EventKind::MessageAssistantSnapshot { content: acc }, seq, ts, .. }) => {
                acc.push_str(content);
                *seq = event.seq;
                *ts = event.ts;
            }
            _ => merged.push(Event {
                seq: event.seq,
                ts: event.ts,
                kind: EventKind::MessageAssistantSnapshot { content: content.clone() },
                raw: None,
            }),
        }
    }
    merged
}

/// Permission status attached to a `tool.call.start` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Permission is being requested from the handler.
    PermissionRequest,
    /// Permission was granted.
    PermissionGranted,
    /// Permission was denied.
    PermissionDenied,
}

/// How a run reached its terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// The provider finished normally.
    Completed,
    /// The provider subprocess failed.
    Failed,
    /// The caller cancelled the run.
    Cancelled,
    /// The run was interrupted (restart, expired wait) and did not resume.
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_round_trips_through_json() {
        let event = Event::new(
            1,
            EventKind::MessageAssistantDelta {
                content: "ok".into(),
            },
        )
        .with_raw(r#"{"type":"content_block_delta"}"#);

        let encoded = serde_json::to_string(&event).unwrap();
        let decoded: Event = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.seq, 1);
        assert!(matches!(decoded.kind, EventKind::MessageAssistantDelta { content } if content == "ok"));
        assert_eq!(decoded.raw.as_deref(), Some(r#"{"type":"content_block_delta"}"#));
    }

    #[test]
    fn kind_tag_uses_dotted_names() {
        let event = Event::new(
            2,
            EventKind::RunWaiting {
                run_id: "r1".into(),
                resume_token_id: "rt_1".into(),
            },
        );
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["kind"], "run.waiting");
    }

    #[test]
    fn terminal_event_carries_outcome() {
        let event = Event::new(
            3,
            EventKind::RunCompleted {
                run_id: "r1".into(),
                outcome: RunOutcome::Cancelled,
            },
        );
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["outcome"], "cancelled");
    }

    #[test]
    fn consecutive_deltas_merge_into_one_snapshot() {
        let events = vec![
            Event::new(1, EventKind::Metric { data: serde_json::json!({"in": 10}) }),
            Event::new(2, EventKind::MessageAssistantDelta { content: "Hi ".into() }),
            Event::new(3, EventKind::MessageAssistantDelta { content: "there".into() }),
            Event::new(4, EventKind::Metric { data: serde_json::json!({"out": 5}) }),
        ];
        let merged = merge_assistant_deltas(events);
        assert_eq!(merged.len(), 3);
        let EventKind::MessageAssistantSnapshot { content } = &merged[1].kind else {
            panic!("expected a merged snapshot")
        };
        assert_eq!(content, "Hi there");
        assert_eq!(merged[1].seq, 3);
    }

    #[test]
    fn non_adjacent_deltas_stay_separate_messages() {
        let events = vec![
            Event::new(1, EventKind::MessageAssistantDelta { content: "first".into() }),
            Event::new(2, EventKind::ToolCallStart {
                tool_call_id: "t1".into(),
                name: "bash".into(),
                input: serde_json::json!({}),
                status: None,
            }),
            Event::new(3, EventKind::MessageAssistantDelta { content: "second".into() }),
        ];
        let merged = merge_assistant_deltas(events);
        assert_eq!(merged.len(), 3);
        assert!(matches!(&merged[0].kind, EventKind::MessageAssistantSnapshot { content } if content == "first"));
        assert!(matches!(&merged[2].kind, EventKind::MessageAssistantSnapshot { content } if content == "second"));
    }
}
