// src/api/conversations.rs
//! Session store: chat sessions against the backend conversation API.

use reqwest::{Method, RequestBuilder};
use serde::{Deserialize, Serialize};

use super::ApiClient;
use crate::chat::model::{BackendMessage, Session, SessionId, SessionSummary};
use crate::error::Result;
use crate::{log_info, log_warn};

#[derive(Debug, Clone, Deserialize)]
pub struct SessionDetail {
    #[serde(default)]
    pub source_ids: Vec<i64>,
    #[serde(default)]
    pub doc: Option<SessionDoc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionDoc {
    #[serde(default)]
    pub messages: Vec<BackendMessage>,
}

impl SessionDetail {
    pub fn messages(self) -> Vec<BackendMessage> {
        self.doc.map(|doc| doc.messages).unwrap_or_default()
    }
}

/// Body entry of the chat request. The backend ignores the name.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub source_id: i64,
    pub source_name: String,
}

/// Returned by the chat request: the saved conversation id and the id of
/// the event stream carrying the reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatHandle {
    pub conversation_id: i64,
    pub chat_id: String,
}

/// What happened when a session was deleted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeleteOutcome {
    /// Removed on the backend.
    Deleted,
    /// Never existed remotely; only the local entry goes.
    LocalOnly,
}

impl ApiClient {
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        let summaries: Vec<SessionSummary> = self.get("/api/conversations").await?;
        log_info!("Loaded {} sessions", summaries.len());
        Ok(summaries.into_iter().map(Session::from).collect())
    }

    pub async fn get_session(&self, id: SessionId) -> Result<SessionDetail> {
        self.get(&format!("/api/conversations/{}", id)).await
    }

    pub async fn delete_session(&self, id: SessionId) -> Result<()> {
        self.delete(&format!("/api/conversations/{}", id)).await
    }

    /// Delete a session, probing it first. Placeholders and sessions the
    /// backend reports as 404 are only removed locally; any other probe
    /// failure still attempts the delete.
    pub async fn delete_session_checked(&self, id: SessionId) -> Result<DeleteOutcome> {
        if id.is_unsaved() {
            return Ok(DeleteOutcome::LocalOnly);
        }
        match self.get_session(id).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => return Ok(DeleteOutcome::LocalOnly),
            Err(e) => log_warn!("Probe of session {} failed ({}), deleting anyway", id, e),
        }
        self.delete_session(id).await?;
        Ok(DeleteOutcome::Deleted)
    }

    pub(crate) fn send_message_request(
        &self,
        session_id: SessionId,
        text: &str,
        use_sop: bool,
        source_ids: &[i64],
    ) -> RequestBuilder {
        let sources: Vec<SourceRef> = source_ids
            .iter()
            .map(|&source_id| SourceRef { source_id, source_name: "string".to_string() })
            .collect();

        self.request(Method::POST, &format!("/api/conversations/{}/chat", session_id))
            .query(&[("user_request", text), ("use_sop", if use_sop { "true" } else { "false" })])
            .json(&sources)
    }

    /// Submit a user request. The reply arrives on the stream named by the
    /// returned handle.
    pub async fn send_message(
        &self,
        session_id: SessionId,
        text: &str,
        use_sop: bool,
        source_ids: &[i64],
    ) -> Result<ChatHandle> {
        let handle: ChatHandle = self
            .send_json(self.send_message_request(session_id, text, use_sop, source_ids))
            .await?;
        log_info!(
            "Chat accepted: conversation {} stream {}",
            handle.conversation_id,
            handle.chat_id
        );
        Ok(handle)
    }

    pub fn stream_path(chat_id: &str, endpoint: &str) -> String {
        format!("/api/conversations/{}/{}", chat_id, endpoint)
    }
}
