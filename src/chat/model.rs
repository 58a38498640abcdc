// src/chat/model.rs
//! Session and transcript types shared by the session store and reducer.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Backend conversation id. `-1` marks a local placeholder that has not
/// been saved yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub i64);

impl SessionId {
    pub const UNSAVED: SessionId = SessionId(-1);

    pub fn is_unsaved(&self) -> bool {
        *self == Self::UNSAVED
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub topic: Option<String>,
    pub timestamp: String,
    pub data_source_ids: Vec<i64>,
}

impl Session {
    pub fn placeholder() -> Self {
        Self {
            id: SessionId::UNSAVED,
            topic: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            data_source_ids: Vec::new(),
        }
    }

    /// No topic yet means nothing was ever sent in it.
    pub fn is_empty(&self) -> bool {
        self.topic.as_deref().map_or(true, |t| t.trim().is_empty())
    }

    pub fn title(&self) -> String {
        match self.topic.as_deref().filter(|t| !t.trim().is_empty()) {
            Some(topic) => topic.lines().next().unwrap_or(topic).to_string(),
            None => "New chat".to_string(),
        }
    }
}

/// Wire shape of `GET /api/conversations` entries.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSummary {
    pub id: i64,
    #[serde(default)]
    pub source_ids: Vec<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub topic: String,
}

impl From<SessionSummary> for Session {
    fn from(summary: SessionSummary) -> Self {
        Session {
            id: SessionId(summary.id),
            topic: Some(summary.topic).filter(|t| !t.is_empty()),
            timestamp: summary.created_at.unwrap_or_else(|| chrono::Utc::now().to_rfc3339()),
            data_source_ids: summary.source_ids,
        }
    }
}

/// Which backend agent produced a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AgentKind {
    Sql,
    Chat,
    Plotly,
    PythonData,
    /// Unknown roles pass through untouched.
    Other(String),
}

impl AgentKind {
    pub fn from_role(role: &str) -> Self {
        match role {
            "sql-agent" => AgentKind::Sql,
            "chat-agent" => AgentKind::Chat,
            "plotly-agent" => AgentKind::Plotly,
            "python-data-agent" => AgentKind::PythonData,
            other => AgentKind::Other(other.to_string()),
        }
    }

    pub fn as_role(&self) -> &str {
        match self {
            AgentKind::Sql => "sql-agent",
            AgentKind::Chat => "chat-agent",
            AgentKind::Plotly => "plotly-agent",
            AgentKind::PythonData => "python-data-agent",
            AgentKind::Other(role) => role,
        }
    }
}

impl From<String> for AgentKind {
    fn from(role: String) -> Self {
        AgentKind::from_role(&role)
    }
}

impl From<AgentKind> for String {
    fn from(kind: AgentKind) -> Self {
        kind.as_role().to_string()
    }
}

/// `thought_process` is a list for most agents and plain text for others.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ThoughtProcess {
    Lines(Vec<String>),
    Text(String),
}

impl Default for ThoughtProcess {
    fn default() -> Self {
        ThoughtProcess::Lines(Vec::new())
    }
}

impl ThoughtProcess {
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => ThoughtProcess::default(),
            Value::String(s) => ThoughtProcess::Text(s.clone()),
            Value::Array(items) => ThoughtProcess::Lines(items.iter().map(value_as_text).collect()),
            other => ThoughtProcess::Text(other.to_string()),
        }
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        match self {
            ThoughtProcess::Lines(lines) => lines.get(index).map(String::as_str),
            ThoughtProcess::Text(text) if index == 0 => Some(text.as_str()),
            ThoughtProcess::Text(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ThoughtProcess::Lines(lines) => lines.is_empty(),
            ThoughtProcess::Text(text) => text.is_empty(),
        }
    }
}

impl<'de> Deserialize<'de> for ThoughtProcess {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(ThoughtProcess::from_value(&value))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    #[serde(rename = "role")]
    pub kind: AgentKind,
    #[serde(default)]
    pub markdowns: Vec<String>,
    #[serde(default)]
    pub jsons: Vec<Value>,
    #[serde(default)]
    pub thought_process: ThoughtProcess,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub error_message: String,
}

impl AgentResult {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            markdowns: Vec::new(),
            jsons: Vec::new(),
            thought_process: ThoughtProcess::default(),
            is_error: false,
            error_message: String::new(),
        }
    }

    /// SQL agents report the executed query as their first thought.
    pub fn executed_query(&self) -> Option<&str> {
        match self.kind {
            AgentKind::Sql => self.thought_process.line(0),
            _ => None,
        }
    }

    /// Plot markup: the second thought line, or the whole text when the
    /// stream delivered it as a single string.
    pub fn plot_markup(&self) -> Option<&str> {
        if self.kind != AgentKind::Plotly {
            return None;
        }
        match &self.thought_process {
            ThoughtProcess::Lines(lines) => lines.get(1).map(String::as_str),
            ThoughtProcess::Text(text) => Some(text.as_str()),
        }
    }

    /// True when the result carries something worth drawing.
    pub fn has_payload(&self) -> bool {
        !self.markdowns.is_empty() || !self.jsons.is_empty() || !self.thought_process.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub markdowns: Vec<String>,
    pub image_url: Option<String>,
    pub message_id: String,
    pub timestamp: String,
}

impl UserMessage {
    pub fn text(text: &str) -> Self {
        Self {
            markdowns: vec![text.to_string()],
            image_url: None,
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub agents: Vec<AgentResult>,
    pub message_id: String,
    pub timestamp: String,
}

impl AssistantMessage {
    pub fn empty() -> Self {
        Self {
            agents: Vec::new(),
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// One turn of the displayed transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
}

impl Message {
    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(assistant) => Some(assistant),
            Message::User(_) => None,
        }
    }
}

/// A stored message exactly as `GET /api/conversations/{id}` returns it:
/// flat, one entry per user message or agent result.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BackendMessage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub markdowns: Vec<String>,
    #[serde(default, deserialize_with = "jsons_from_value")]
    pub jsons: Vec<Value>,
    #[serde(default)]
    pub thought_process: ThoughtProcess,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_error: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub error_message: String,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl BackendMessage {
    pub fn is_user(&self) -> bool {
        self.role == "user"
    }

    pub fn is_agent(&self) -> bool {
        self.role.contains("agent")
    }

    pub fn into_user(self) -> UserMessage {
        UserMessage {
            markdowns: self.markdowns,
            image_url: self.image_url,
            message_id: self.message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            timestamp: self.timestamp.unwrap_or_default(),
        }
    }

    pub fn into_agent(self) -> AgentResult {
        AgentResult {
            kind: AgentKind::from_role(&self.role),
            markdowns: self.markdowns,
            jsons: self.jsons,
            thought_process: self.thought_process,
            is_error: self.is_error,
            error_message: self.error_message,
        }
    }
}

/// Render any JSON value as display text: strings verbatim, the rest as JSON.
pub fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Records carried by a `data` payload. Arrays become their elements,
/// a lone object becomes one record, anything else is dropped.
pub fn records_from_value(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Object(_) => vec![value.clone()],
        _ => Vec::new(),
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn jsons_from_value<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Value>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(records_from_value(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_agent_kind_round_trips_unknown_roles() {
        assert_eq!(AgentKind::from_role("sql-agent"), AgentKind::Sql);
        let other = AgentKind::from_role("goal-agent");
        assert_eq!(other, AgentKind::Other("goal-agent".to_string()));
        assert_eq!(String::from(other), "goal-agent");
    }

    #[test]
    fn test_thought_process_shapes() {
        assert_eq!(ThoughtProcess::from_value(&json!(null)), ThoughtProcess::Lines(vec![]));
        assert_eq!(
            ThoughtProcess::from_value(&json!(["SELECT 1", "<div/>"])),
            ThoughtProcess::Lines(vec!["SELECT 1".into(), "<div/>".into()])
        );
        assert_eq!(ThoughtProcess::from_value(&json!("plot")), ThoughtProcess::Text("plot".into()));
    }

    #[test]
    fn test_role_dependent_accessors() {
        let mut sql = AgentResult::new(AgentKind::Sql);
        sql.thought_process = ThoughtProcess::Lines(vec!["SELECT * FROM t".into()]);
        assert_eq!(sql.executed_query(), Some("SELECT * FROM t"));
        assert_eq!(sql.plot_markup(), None);

        let mut plot = AgentResult::new(AgentKind::Plotly);
        plot.thought_process = ThoughtProcess::Lines(vec!["code".into(), "<script/>".into()]);
        assert_eq!(plot.plot_markup(), Some("<script/>"));
    }

    #[test]
    fn test_backend_message_tolerates_nulls() {
        let raw = json!({
            "role": "sql-agent",
            "markdowns": null,
            "jsons": {"a": 1},
            "thought_process": ["SELECT a"],
            "is_error": null,
            "error_message": null
        });
        let message: BackendMessage = serde_json::from_value(raw).unwrap();
        assert!(message.markdowns.is_empty());
        assert_eq!(message.jsons, vec![json!({"a": 1})]);
        assert!(!message.is_error);
        assert!(message.is_agent());
    }

    #[test]
    fn test_session_from_summary() {
        let summary: SessionSummary = serde_json::from_value(json!({
            "id": 7, "doc_id": "x", "source_ids": [1, 2],
            "created_at": "2024-05-01T10:00:00", "topic": null
        }))
        .unwrap();
        let session = Session::from(summary);
        assert_eq!(session.id, SessionId(7));
        assert!(session.is_empty());
        assert_eq!(session.data_source_ids, vec![1, 2]);
        assert_eq!(session.title(), "New chat");
    }
}
