// src/chat/reducer.rs
//! Session list and transcript state, changed only through [`ChatAction`].

use serde_json::Value;
use std::collections::HashSet;

use super::model::{
    records_from_value, value_as_text, AgentKind, AgentResult, AssistantMessage, BackendMessage,
    Message, Session, SessionId, ThoughtProcess, UserMessage,
};
use super::reform::reform_messages;
use super::stream::{ContentType, StreamEvent};
use super::ChatError;
use crate::api::conversations::ChatHandle;
use crate::{log_debug, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Sending,
    Streaming,
    Done,
    Errored,
}

impl TurnPhase {
    pub fn in_flight(&self) -> bool {
        matches!(self, TurnPhase::Sending | TurnPhase::Streaming)
    }
}

#[derive(Debug, Clone)]
pub enum ChatAction {
    SessionsLoaded(Vec<Session>),
    /// A session was picked and its stored messages fetched.
    SessionSelected { id: SessionId, messages: Vec<BackendMessage>, source_ids: Vec<i64> },
    /// "New chat": reuses an empty session when one exists.
    SessionCreated,
    SessionDeleted(SessionId),
    SourcesChanged(Vec<i64>),
    MessageSubmitted { text: String, use_sop: bool },
    /// Reply to the request issued as turn number `turn`.
    SendAccepted { turn: u64, handle: ChatHandle },
    SendFailed { turn: u64, error: String },
    StreamEventReceived { chat_id: String, event: StreamEvent },
    StreamDone { chat_id: String },
    StreamFailed { chat_id: String, error: String },
    StreamTimedOut { chat_id: String },
}

/// Everything the caller needs to issue a chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    /// Echoed back with the reply so a late handle cannot land on a newer turn.
    pub turn: u64,
    pub session_id: SessionId,
    pub text: String,
    pub use_sop: bool,
    pub source_ids: Vec<i64>,
}

/// What the caller should do after a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Unchanged,
    Changed,
    /// Fetch this session's messages and dispatch `SessionSelected`.
    LoadSession(SessionId),
    Send(SendRequest),
    OpenStream(String),
    /// The streaming turn ended; its stream can be dropped.
    TurnFinished,
}

#[derive(Debug, Clone)]
struct InFlight {
    turn: u64,
    chat_id: Option<String>,
    accumulator: AssistantMessage,
    appended: bool,
}

#[derive(Debug, Clone)]
pub struct ChatStore {
    sessions: Vec<Session>,
    active: Option<SessionId>,
    transcript: Vec<Message>,
    phase: TurnPhase,
    in_flight: Option<InFlight>,
    turns: u64,
    failed_turns: HashSet<String>,
    pub progress: Option<String>,
    pub is_loading: bool,
    pub is_thinking: bool,
    pub show_welcome: bool,
    pub banner: Option<String>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            transcript: Vec::new(),
            phase: TurnPhase::Idle,
            in_flight: None,
            turns: 0,
            failed_turns: HashSet::new(),
            progress: None,
            is_loading: false,
            is_thinking: false,
            show_welcome: true,
            banner: None,
        }
    }

    pub fn sessions(&self) -> &[Session] {
        &self.sessions
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.active
    }

    pub fn active_session(&self) -> Option<&Session> {
        let id = self.active?;
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub fn streaming_chat_id(&self) -> Option<&str> {
        self.in_flight.as_ref()?.chat_id.as_deref()
    }

    /// Whether the assistant turn with this id ended in a failure.
    pub fn turn_failed(&self, message_id: &str) -> bool {
        self.failed_turns.contains(message_id)
    }

    pub fn dispatch(&mut self, action: ChatAction) -> Result<Outcome, ChatError> {
        match action {
            ChatAction::SessionsLoaded(sessions) => Ok(self.sessions_loaded(sessions)),
            ChatAction::SessionSelected { id, messages, source_ids } => {
                self.session_selected(id, messages, source_ids)
            }
            ChatAction::SessionCreated => Ok(self.session_created()),
            ChatAction::SessionDeleted(id) => Ok(self.session_deleted(id)),
            ChatAction::SourcesChanged(ids) => Ok(self.sources_changed(ids)),
            ChatAction::MessageSubmitted { text, use_sop } => self.message_submitted(&text, use_sop),
            ChatAction::SendAccepted { turn, handle } => Ok(self.send_accepted(turn, handle)),
            ChatAction::SendFailed { turn, error } => Ok(self.send_failed(turn, error)),
            ChatAction::StreamEventReceived { chat_id, event } => Ok(self.stream_event(&chat_id, event)),
            ChatAction::StreamDone { chat_id } => Ok(self.stream_done(&chat_id)),
            ChatAction::StreamFailed { chat_id, error } => Ok(self.stream_failed(&chat_id, error)),
            ChatAction::StreamTimedOut { chat_id } => {
                Ok(self.stream_failed(&chat_id, "no reply from the server in time".to_string()))
            }
        }
    }

    fn sessions_loaded(&mut self, sessions: Vec<Session>) -> Outcome {
        // an unsaved placeholder exists only locally
        let placeholder = self.sessions.iter().find(|s| s.id.is_unsaved()).cloned();
        self.sessions = placeholder.into_iter().chain(sessions).collect();

        if let Some(active) = self.active {
            if !self.sessions.iter().any(|s| s.id == active) {
                self.clear_active();
            }
        }
        Outcome::Changed
    }

    fn session_selected(
        &mut self,
        id: SessionId,
        messages: Vec<BackendMessage>,
        source_ids: Vec<i64>,
    ) -> Result<Outcome, ChatError> {
        let session = self
            .sessions
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(ChatError::UnknownSession(id))?;
        if !id.is_unsaved() {
            session.data_source_ids = source_ids;
        }

        self.reset_turn();
        self.active = Some(id);
        self.transcript = reform_messages(messages);
        self.failed_turns.clear();
        self.show_welcome = false;
        log_debug!("Selected session {} ({} turns)", id, self.transcript.len());
        Ok(Outcome::Changed)
    }

    fn session_created(&mut self) -> Outcome {
        let reuse = self.sessions.iter().find(|s| s.is_empty()).map(|s| s.id);
        let id = match reuse {
            Some(id) => id,
            None => {
                self.sessions.insert(0, Session::placeholder());
                SessionId::UNSAVED
            }
        };

        self.reset_turn();
        self.active = Some(id);
        self.transcript.clear();
        self.failed_turns.clear();
        self.show_welcome = false;
        Outcome::Changed
    }

    fn session_deleted(&mut self, id: SessionId) -> Outcome {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return Outcome::Unchanged;
        };
        self.sessions.remove(index);
        log_info!("Removed session {}", id);

        if self.active != Some(id) {
            return Outcome::Changed;
        }

        let neighbour = if index > 0 {
            self.sessions.get(index - 1)
        } else {
            self.sessions.first()
        };
        match neighbour.map(|s| s.id) {
            None => {
                self.clear_active();
                Outcome::Changed
            }
            Some(next) if next.is_unsaved() => {
                self.reset_turn();
                self.active = Some(next);
                self.transcript.clear();
                self.failed_turns.clear();
                Outcome::Changed
            }
            Some(next) => {
                self.reset_turn();
                self.active = Some(next);
                self.transcript.clear();
                Outcome::LoadSession(next)
            }
        }
    }

    fn sources_changed(&mut self, ids: Vec<i64>) -> Outcome {
        let Some(id) = self.active else {
            return Outcome::Unchanged;
        };
        match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) if session.data_source_ids != ids => {
                session.data_source_ids = ids;
                Outcome::Changed
            }
            _ => Outcome::Unchanged,
        }
    }

    fn message_submitted(&mut self, text: &str, use_sop: bool) -> Result<Outcome, ChatError> {
        if self.phase.in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.active_session().is_none() {
            self.session_created();
        }
        let session = self.active_session().ok_or(ChatError::UnknownSession(SessionId::UNSAVED))?;
        self.turns += 1;
        let request = SendRequest {
            turn: self.turns,
            session_id: session.id,
            text: text.to_string(),
            use_sop,
            source_ids: session.data_source_ids.clone(),
        };

        self.transcript.push(Message::User(UserMessage::text(text)));
        self.in_flight = Some(InFlight {
            turn: self.turns,
            chat_id: None,
            accumulator: AssistantMessage::empty(),
            appended: false,
        });
        self.phase = TurnPhase::Sending;
        self.is_loading = true;
        self.is_thinking = true;
        self.progress = None;
        self.banner = None;
        self.show_welcome = false;
        Ok(Outcome::Send(request))
    }

    fn is_sending(&self, turn: u64) -> bool {
        self.phase == TurnPhase::Sending && self.in_flight.as_ref().is_some_and(|f| f.turn == turn)
    }

    fn send_accepted(&mut self, turn: u64, handle: ChatHandle) -> Outcome {
        if !self.is_sending(turn) {
            log_warn!("Ignoring late chat handle {}", handle.chat_id);
            return Outcome::Unchanged;
        }
        let saved = SessionId(handle.conversation_id);
        if let Some(active) = self.active {
            let topic = self.transcript.iter().rev().find_map(|m| match m {
                Message::User(user) => user.markdowns.first().cloned(),
                Message::Assistant(_) => None,
            });
            if let Some(session) = self.sessions.iter_mut().find(|s| s.id == active) {
                session.id = saved;
                if session.is_empty() {
                    session.topic = topic;
                }
            }
            self.active = Some(saved);
        }

        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.chat_id = Some(handle.chat_id.clone());
        }
        self.phase = TurnPhase::Streaming;
        Outcome::OpenStream(handle.chat_id)
    }

    fn send_failed(&mut self, turn: u64, error: String) -> Outcome {
        if !self.is_sending(turn) {
            log_debug!("Ignoring failure of stale turn {}: {}", turn, error);
            return Outcome::Unchanged;
        }
        log_warn!("Chat request failed: {}", error);
        self.in_flight = None;
        self.phase = TurnPhase::Errored;
        self.is_loading = false;
        self.is_thinking = false;
        self.progress = None;
        self.banner = Some(error);
        Outcome::Changed
    }

    fn is_current(&self, chat_id: &str) -> bool {
        self.phase == TurnPhase::Streaming && self.streaming_chat_id() == Some(chat_id)
    }

    fn stream_event(&mut self, chat_id: &str, event: StreamEvent) -> Outcome {
        if !self.is_current(chat_id) {
            log_debug!("Dropping event for stale stream {}", chat_id);
            return Outcome::Unchanged;
        }
        if event.is_done() {
            return self.stream_done(chat_id);
        }

        if event.content_type.is_result() {
            let result = agent_result(&event);
            if let Some(in_flight) = self.in_flight.as_mut() {
                in_flight.accumulator.agents.push(result);
            }
        } else {
            self.progress = progress_text(&event.content);
        }
        self.publish_accumulator();
        Outcome::Changed
    }

    fn stream_done(&mut self, chat_id: &str) -> Outcome {
        if !self.is_current(chat_id) {
            return Outcome::Unchanged;
        }
        self.in_flight = None;
        self.phase = TurnPhase::Done;
        self.finish_flags();
        Outcome::TurnFinished
    }

    fn stream_failed(&mut self, chat_id: &str, error: String) -> Outcome {
        if !self.is_current(chat_id) {
            return Outcome::Unchanged;
        }
        log_warn!("Stream {} failed: {}", chat_id, error);
        let has_results = self.in_flight.as_ref().is_some_and(|f| !f.accumulator.agents.is_empty());
        if has_results {
            self.publish_accumulator();
        }
        if let Some(in_flight) = self.in_flight.take() {
            if has_results {
                self.failed_turns.insert(in_flight.accumulator.message_id);
            } else if in_flight.appended {
                // only progress arrived; the banner carries the error
                self.transcript.pop();
            }
        }
        self.phase = TurnPhase::Errored;
        self.finish_flags();
        self.banner = Some(error);
        Outcome::TurnFinished
    }

    /// First call appends the in-progress turn, later calls replace it.
    fn publish_accumulator(&mut self) {
        let Some(in_flight) = self.in_flight.as_mut() else {
            return;
        };
        let turn = Message::Assistant(in_flight.accumulator.clone());
        if in_flight.appended {
            if let Some(last) = self.transcript.last_mut() {
                *last = turn;
            }
        } else {
            self.transcript.push(turn);
            in_flight.appended = true;
        }
    }

    fn finish_flags(&mut self) {
        self.is_loading = false;
        self.is_thinking = false;
        self.progress = None;
    }

    fn reset_turn(&mut self) {
        self.in_flight = None;
        self.phase = TurnPhase::Idle;
        self.finish_flags();
        self.banner = None;
    }

    fn clear_active(&mut self) {
        self.reset_turn();
        self.active = None;
        self.transcript.clear();
        self.failed_turns.clear();
        self.show_welcome = true;
    }
}

fn has_content(content: &Value) -> bool {
    match content {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

/// Build the agent result carried by a data/markdown/plot/error event.
pub fn agent_result(event: &StreamEvent) -> AgentResult {
    let role = event.role();
    let is_plot = matches!(role, "plot-agent" | "plotly-agent")
        || (role == "agent" && event.content_type == ContentType::Plot);
    let kind = if is_plot { AgentKind::Plotly } else { AgentKind::from_role(role) };

    let mut result = AgentResult::new(kind);
    if event.content_type == ContentType::Error {
        result.is_error = true;
        result.error_message = value_as_text(&event.content);
    }

    match &result.kind {
        AgentKind::Sql if has_content(&event.content) => {
            result.jsons = records_from_value(&event.content);
            result.thought_process = ThoughtProcess::from_value(&event.thought_process);
            if event.status.as_deref() == Some("failed") {
                result.is_error = true;
                result.markdowns.push(value_as_text(&event.content));
            }
        }
        AgentKind::Chat => result.markdowns.push(value_as_text(&event.content)),
        AgentKind::Plotly => result.thought_process = ThoughtProcess::from_value(&event.content),
        AgentKind::PythonData if has_content(&event.content) => {
            result.jsons = records_from_value(&event.content);
            result.thought_process = ThoughtProcess::from_value(&event.thought_process);
        }
        _ => {}
    }
    result
}

/// Progress line shown while the reply is being produced.
pub fn progress_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items
            .first()
            .and_then(|first| first.get("instruction"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(value: Value) -> StreamEvent {
        serde_json::from_value(value).unwrap()
    }

    fn streaming_store(chat_id: &str) -> ChatStore {
        let mut store = ChatStore::new();
        store.dispatch(ChatAction::SessionCreated).unwrap();
        store
            .dispatch(ChatAction::MessageSubmitted { text: "top customers".into(), use_sop: false })
            .unwrap();
        let turn = store.turns;
        let outcome = store
            .dispatch(ChatAction::SendAccepted {
                turn,
                handle: ChatHandle { conversation_id: 42, chat_id: chat_id.into() },
            })
            .unwrap();
        assert_eq!(outcome, Outcome::OpenStream(chat_id.into()));
        store
    }

    fn receive(store: &mut ChatStore, chat_id: &str, value: Value) -> Outcome {
        store
            .dispatch(ChatAction::StreamEventReceived { chat_id: chat_id.into(), event: event(value) })
            .unwrap()
    }

    fn last_assistant(store: &ChatStore) -> &AssistantMessage {
        store.transcript().last().and_then(Message::as_assistant).unwrap()
    }

    #[test]
    fn test_fold_until_done() {
        let mut store = streaming_store("c1");
        receive(&mut store, "c1", json!({"content_type": "data", "role": "sql-agent", "content": [{"a": 1}]}));
        receive(&mut store, "c1", json!({"content_type": "markdown", "role": "chat-agent", "content": "hello"}));
        let done = receive(&mut store, "c1", json!({"content_type": "signal", "content": "DONE"}));
        assert_eq!(done, Outcome::TurnFinished);
        let after = receive(&mut store, "c1", json!({"content_type": "markdown", "role": "chat-agent", "content": "late"}));
        assert_eq!(after, Outcome::Unchanged);

        assert_eq!(store.transcript().len(), 2);
        let turn = last_assistant(&store);
        assert_eq!(turn.agents.len(), 2);
        assert_eq!(turn.agents[0].jsons, vec![json!({"a": 1})]);
        assert_eq!(turn.agents[1].markdowns, vec!["hello".to_string()]);
        assert_eq!(store.phase(), TurnPhase::Done);
        assert!(!store.is_thinking);
        assert!(store.progress.is_none());
    }

    #[test]
    fn test_session_saved_on_accept() {
        let store = streaming_store("c1");
        let session = store.active_session().unwrap();
        assert_eq!(session.id, SessionId(42));
        assert_eq!(session.topic.as_deref(), Some("top customers"));
    }

    #[test]
    fn test_failed_sql_event() {
        let mut store = streaming_store("c1");
        receive(
            &mut store,
            "c1",
            json!({"content_type": "data", "role": "sql-agent", "status": "failed",
                   "content": "syntax error near FROM", "thought_process": ["SELECT FROM"]}),
        );
        let agent = &last_assistant(&store).agents[0];
        assert!(agent.is_error);
        assert_eq!(agent.markdowns, vec!["syntax error near FROM".to_string()]);
        assert_eq!(agent.executed_query(), Some("SELECT FROM"));
    }

    #[test]
    fn test_error_and_plot_events() {
        let mut store = streaming_store("c1");
        receive(&mut store, "c1", json!({"content_type": "error", "role": "chat-agent", "content": "boom"}));
        receive(&mut store, "c1", json!({"content_type": "plot", "role": "agent", "content": ["code", "<div/>"]}));
        let turn = last_assistant(&store);
        assert!(turn.agents[0].is_error);
        assert_eq!(turn.agents[0].error_message, "boom");
        assert_eq!(turn.agents[1].kind, AgentKind::Plotly);
        assert_eq!(turn.agents[1].plot_markup(), Some("<div/>"));
    }

    #[test]
    fn test_progress_events() {
        let mut store = streaming_store("c1");
        receive(&mut store, "c1", json!({"content_type": "progress", "content": "planning"}));
        assert_eq!(store.progress.as_deref(), Some("planning"));
        receive(&mut store, "c1", json!({"content_type": "plan", "content": [{"instruction": "query orders"}]}));
        assert_eq!(store.progress.as_deref(), Some("query orders"));
        receive(&mut store, "c1", json!({"content_type": "plan", "content": []}));
        assert!(store.progress.is_none());
        // the in-progress turn is published once and then replaced
        assert_eq!(store.transcript().len(), 2);
    }

    #[test]
    fn test_transport_error_keeps_results() {
        let mut store = streaming_store("c1");
        receive(&mut store, "c1", json!({"content_type": "markdown", "role": "chat-agent", "content": "partial"}));
        let failed = store
            .dispatch(ChatAction::StreamFailed { chat_id: "c1".into(), error: "reset".into() })
            .unwrap();
        assert_eq!(failed, Outcome::TurnFinished);
        assert!(!store.is_thinking && !store.is_loading);
        assert_eq!(store.phase(), TurnPhase::Errored);

        let again = store.dispatch(ChatAction::StreamTimedOut { chat_id: "c1".into() }).unwrap();
        assert_eq!(again, Outcome::Unchanged);

        let turn = last_assistant(&store);
        assert_eq!(turn.agents[0].markdowns, vec!["partial".to_string()]);
        assert!(store.turn_failed(&turn.message_id));
        assert_eq!(store.banner.as_deref(), Some("reset"));
    }

    #[test]
    fn test_stale_stream_ignored() {
        let mut store = streaming_store("c1");
        let outcome = receive(&mut store, "old", json!({"content_type": "markdown", "role": "chat-agent", "content": "x"}));
        assert_eq!(outcome, Outcome::Unchanged);
        assert_eq!(store.transcript().len(), 1);
    }

    #[test]
    fn test_turns_are_serialised() {
        let mut store = streaming_store("c1");
        let second = store.dispatch(ChatAction::MessageSubmitted { text: "again".into(), use_sop: false });
        assert_eq!(second, Err(ChatError::TurnInFlight));
        let empty = ChatStore::new().dispatch(ChatAction::MessageSubmitted { text: "  ".into(), use_sop: false });
        assert_eq!(empty, Err(ChatError::EmptyMessage));
    }

    #[test]
    fn test_send_failed() {
        let mut store = ChatStore::new();
        let outcome = store
            .dispatch(ChatAction::MessageSubmitted { text: "hi".into(), use_sop: true })
            .unwrap();
        let Outcome::Send(request) = outcome else { panic!("expected send") };
        assert_eq!(request.session_id, SessionId::UNSAVED);
        assert!(request.use_sop);

        store.dispatch(ChatAction::SendFailed { turn: request.turn, error: "502".into() }).unwrap();
        assert_eq!(store.phase(), TurnPhase::Errored);
        assert!(!store.is_loading);
        assert_eq!(store.banner.as_deref(), Some("502"));
    }

    fn saved(id: i64, topic: Option<&str>) -> Session {
        Session {
            id: SessionId(id),
            topic: topic.map(str::to_string),
            timestamp: String::new(),
            data_source_ids: vec![],
        }
    }

    #[test]
    fn test_new_session_reuses_empty() {
        let mut store = ChatStore::new();
        store
            .dispatch(ChatAction::SessionsLoaded(vec![saved(1, Some("a")), saved(2, None)]))
            .unwrap();
        store.dispatch(ChatAction::SessionCreated).unwrap();
        assert_eq!(store.active_id(), Some(SessionId(2)));
        assert_eq!(store.sessions().len(), 2);

        let mut fresh = ChatStore::new();
        fresh.dispatch(ChatAction::SessionCreated).unwrap();
        fresh.dispatch(ChatAction::SessionCreated).unwrap();
        assert_eq!(fresh.sessions().len(), 1);
    }

    #[test]
    fn test_delete_selects_neighbour() {
        let mut store = ChatStore::new();
        store
            .dispatch(ChatAction::SessionsLoaded(vec![saved(1, Some("a")), saved(2, Some("b")), saved(3, Some("c"))]))
            .unwrap();
        store
            .dispatch(ChatAction::SessionSelected { id: SessionId(2), messages: vec![], source_ids: vec![5] })
            .unwrap();
        assert_eq!(store.active_session().unwrap().data_source_ids, vec![5]);

        let outcome = store.dispatch(ChatAction::SessionDeleted(SessionId(2))).unwrap();
        assert_eq!(outcome, Outcome::LoadSession(SessionId(1)));

        store
            .dispatch(ChatAction::SessionSelected { id: SessionId(1), messages: vec![], source_ids: vec![] })
            .unwrap();
        let outcome = store.dispatch(ChatAction::SessionDeleted(SessionId(1))).unwrap();
        assert_eq!(outcome, Outcome::LoadSession(SessionId(3)));

        store
            .dispatch(ChatAction::SessionSelected { id: SessionId(3), messages: vec![], source_ids: vec![] })
            .unwrap();
        store.dispatch(ChatAction::SessionDeleted(SessionId(3))).unwrap();
        assert!(store.active_id().is_none());
        assert!(store.show_welcome);
    }

    #[test]
    fn test_sources_changed_targets_active() {
        let mut store = ChatStore::new();
        assert_eq!(store.dispatch(ChatAction::SourcesChanged(vec![1])).unwrap(), Outcome::Unchanged);
        store.dispatch(ChatAction::SessionCreated).unwrap();
        store.dispatch(ChatAction::SourcesChanged(vec![1, 4])).unwrap();
        let Outcome::Send(request) = store
            .dispatch(ChatAction::MessageSubmitted { text: "q".into(), use_sop: false })
            .unwrap()
        else {
            panic!("expected send")
        };
        assert_eq!(request.source_ids, vec![1, 4]);
    }

    #[test]
    fn test_late_handle_ignored_after_switching_sessions() {
        let mut store = ChatStore::new();
        store
            .dispatch(ChatAction::SessionsLoaded(vec![saved(1, Some("a")), saved(2, Some("b"))]))
            .unwrap();
        store
            .dispatch(ChatAction::SessionSelected { id: SessionId(1), messages: vec![], source_ids: vec![] })
            .unwrap();
        let Outcome::Send(first) = store
            .dispatch(ChatAction::MessageSubmitted { text: "one".into(), use_sop: false })
            .unwrap()
        else {
            panic!("expected send")
        };
        store
            .dispatch(ChatAction::SessionSelected { id: SessionId(2), messages: vec![], source_ids: vec![] })
            .unwrap();
        let Outcome::Send(second) = store
            .dispatch(ChatAction::MessageSubmitted { text: "two".into(), use_sop: false })
            .unwrap()
        else {
            panic!("expected send")
        };
        assert_ne!(first.turn, second.turn);

        let late = store
            .dispatch(ChatAction::SendAccepted {
                turn: first.turn,
                handle: ChatHandle { conversation_id: 1, chat_id: "chat-of-1".into() },
            })
            .unwrap();
        assert_eq!(late, Outcome::Unchanged);
        let late_failure = store
            .dispatch(ChatAction::SendFailed { turn: first.turn, error: "gone".into() })
            .unwrap();
        assert_eq!(late_failure, Outcome::Unchanged);
        assert_eq!(store.active_id(), Some(SessionId(2)));
        assert_eq!(store.phase(), TurnPhase::Sending);

        let current = store
            .dispatch(ChatAction::SendAccepted {
                turn: second.turn,
                handle: ChatHandle { conversation_id: 2, chat_id: "chat-of-2".into() },
            })
            .unwrap();
        assert_eq!(current, Outcome::OpenStream("chat-of-2".into()));
        let ids: Vec<SessionId> = store.sessions().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![SessionId(1), SessionId(2)]);
    }

    #[test]
    fn test_failure_before_any_result_shows_banner_only() {
        let mut store = streaming_store("c1");
        receive(&mut store, "c1", json!({"content_type": "progress", "content": "planning"}));
        store
            .dispatch(ChatAction::StreamFailed { chat_id: "c1".into(), error: "reset".into() })
            .unwrap();
        assert_eq!(store.transcript().len(), 1);
        assert!(matches!(store.transcript()[0], Message::User(_)));
        assert_eq!(store.banner.as_deref(), Some("reset"));
        assert_eq!(store.phase(), TurnPhase::Errored);

        let mut silent = streaming_store("c2");
        silent.dispatch(ChatAction::StreamTimedOut { chat_id: "c2".into() }).unwrap();
        assert_eq!(silent.transcript().len(), 1);
        assert!(silent.banner.is_some());
    }

    #[test]
    fn test_progress_text_shapes() {
        assert_eq!(progress_text(&json!("START")), Some("START".to_string()));
        assert_eq!(progress_text(&json!([{"instruction": ""}])), None);
        assert_eq!(progress_text(&json!({"x": 1})), None);
    }
}
