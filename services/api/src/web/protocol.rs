//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the editor page and the API
//! server. One connection hosts at most one editing session at a time.

use quill_core::{SessionPhase, SessionSnapshot, SessionSummary};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens an editing session on a document. Must be the first message sent.
    Open { document_id: Uuid },

    /// The editor's full content after a keystroke, with its word count.
    Change { content: String, word_count: u32 },

    /// A new title for the open document.
    Rename { title: String },

    /// Ends the session (the user navigated back). Buffered content is flushed
    /// and the session's words and XP are recorded.
    Close,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Save indicator state shown next to the editor.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SaveState {
    Loading,
    Saved,
    Unsaved,
    Saving,
    Closing,
    Closed,
}

impl From<SessionPhase> for SaveState {
    fn from(phase: SessionPhase) -> Self {
        match phase {
            SessionPhase::Loading => SaveState::Loading,
            SessionPhase::Idle => SaveState::Saved,
            SessionPhase::Dirty => SaveState::Unsaved,
            SessionPhase::Saving => SaveState::Saving,
            SessionPhase::Flushing => SaveState::Closing,
            SessionPhase::Closed => SaveState::Closed,
        }
    }
}

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The document was loaded; the editor can be filled in.
    SessionOpened {
        document_id: Uuid,
        title: String,
        content: String,
        word_count: u32,
    },

    /// Live counters for the stats bar, sent after every change.
    Progress {
        session_words: u32,
        word_count: u32,
        pending_xp: u32,
        has_unsaved_changes: bool,
    },

    /// The save indicator changed.
    SaveStatus { state: SaveState },

    /// A rename was persisted.
    TitleSaved { title: String },

    /// The session ended and its results were recorded.
    SessionClosed {
        words_written: u32,
        minutes_written: u32,
        xp_earned: u32,
        level: Option<u32>,
        leveled_up: bool,
    },

    /// Reports an error to the client, which should display it.
    Error { message: String },
}

impl From<SessionSnapshot> for ServerMessage {
    fn from(snapshot: SessionSnapshot) -> Self {
        ServerMessage::Progress {
            session_words: snapshot.session_words,
            word_count: snapshot.word_count,
            pending_xp: snapshot.pending_xp,
            has_unsaved_changes: snapshot.has_unsaved_changes,
        }
    }
}

impl From<SessionSummary> for ServerMessage {
    fn from(summary: SessionSummary) -> Self {
        ServerMessage::SessionClosed {
            words_written: summary.words_written,
            minutes_written: summary.minutes_written,
            xp_earned: summary.xp_earned,
            level: summary.level.map(|update| update.level),
            leveled_up: summary.level.is_some_and(|update| update.leveled_up),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::LevelUpdate;
    use serde_json::{json, Value};

    #[test]
    fn parses_tagged_client_messages() {
        let id = Uuid::new_v4();
        let open: ClientMessage =
            serde_json::from_value(json!({ "type": "open", "document_id": id })).unwrap();
        assert!(matches!(open, ClientMessage::Open { document_id } if document_id == id));

        let change: ClientMessage = serde_json::from_str(
            r#"{"type":"change","content":"one two three","word_count":3}"#,
        )
        .unwrap();
        assert!(matches!(change, ClientMessage::Change { word_count: 3, .. }));

        let close: ClientMessage = serde_json::from_str(r#"{"type":"close"}"#).unwrap();
        assert!(matches!(close, ClientMessage::Close));
    }

    #[test]
    fn rejects_negative_word_counts() {
        let parsed = serde_json::from_str::<ClientMessage>(
            r#"{"type":"change","content":"","word_count":-4}"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn session_closed_flattens_level_update() {
        let summary = SessionSummary {
            words_written: 120,
            minutes_written: 3,
            xp_earned: 12,
            level: Some(LevelUpdate {
                xp: 2,
                level: 2,
                leveled_up: true,
            }),
        };
        let value: Value = serde_json::to_value(ServerMessage::from(summary)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "session_closed",
                "words_written": 120,
                "minutes_written": 3,
                "xp_earned": 12,
                "level": 2,
                "leveled_up": true,
            })
        );
    }

    #[test]
    fn save_status_uses_indicator_names() {
        let value = serde_json::to_value(ServerMessage::SaveStatus {
            state: SessionPhase::Dirty.into(),
        })
        .unwrap();
        assert_eq!(value, json!({ "type": "save_status", "state": "unsaved" }));
    }
}
