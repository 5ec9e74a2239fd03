//! Conversation history persistence.
//!
//! A transcript is the agent's history as a pretty-printed JSON array of
//! [`Message`]s. Restore one with [`Agent::with_history`](super::Agent::with_history).

use crate::Message;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum TranscriptError {
    #[error("failed to access transcript {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse transcript {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Serialize)]
struct TranscriptRef<'a> {
    version: u32,
    messages: &'a [Message],
}

#[derive(Deserialize)]
struct TranscriptOwned {
    #[serde(default)]
    version: u32,
    messages: Vec<Message>,
}

const TRANSCRIPT_VERSION: u32 = 1;

/// Write `messages` to `path`, creating parent directories as needed.
pub fn save(path: &Path, messages: &[Message]) -> Result<(), TranscriptError> {
    let io_err = |source| TranscriptError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let data = serde_json::to_string_pretty(&TranscriptRef {
        version: TRANSCRIPT_VERSION,
        messages,
    })
    .map_err(|source| TranscriptError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, data).map_err(io_err)?;
    debug!("Saved {} message(s) to {}", messages.len(), path.display());
    Ok(())
}

/// Read a transcript written by [`save`].
pub fn load(path: &Path) -> Result<Vec<Message>, TranscriptError> {
    let data = std::fs::read_to_string(path).map_err(|source| TranscriptError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let transcript: TranscriptOwned =
        serde_json::from_str(&data).map_err(|source| TranscriptError::Serde {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(
        "Loaded {} message(s) from {} (format v{})",
        transcript.messages.len(),
        path.display(),
        transcript.version
    );
    Ok(transcript.messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCall;
    use serde_json::json;

    fn conversation() -> Vec<Message> {
        vec![
            Message::user("list files"),
            Message::assistant("", vec![ToolCall::new("c1", "ls", json!({"dir": "."}))]),
            Message::tool_error("c1", "permission denied"),
            Message::assistant_text("I could not list the directory."),
        ]
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/session.json");
        save(&path, &conversation()).unwrap();
        assert_eq!(load(&path).unwrap(), conversation());
    }

    #[test]
    fn file_is_readable_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        save(&path, &conversation()).unwrap();
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["messages"][2]["role"], "tool");
        assert_eq!(raw["messages"][2]["tool_call_id"], "c1");
        assert_eq!(raw["messages"][2]["is_error"], true);
        assert!(raw["messages"][0].get("is_error").is_none());
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, TranscriptError::Io { .. }));
    }

    #[test]
    fn garbage_is_serde_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load(&path).unwrap_err(), TranscriptError::Serde { .. }));
    }
}
