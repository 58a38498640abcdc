use futures::stream;
use luna_console::api::conversations::ChatHandle;
use luna_console::api::sources::{Annotation, EntitySchema, SourceDetail, SourceTypeInfo};
use luna_console::chat::model::{AgentKind, BackendMessage, Message, Session, SessionId};
use luna_console::chat::stream::{pump, StreamItem, StreamMessage};
use luna_console::chat::{ChatAction, ChatStore, Outcome, TurnPhase};
use luna_console::config::AppConfig;
use luna_console::wizard::{EditSourceWizard, NewSourceWizard, Step, WizardEffect};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn frame(payload: serde_json::Value) -> String {
    format!("data: {}\n\n", payload)
}

/// Run SSE text through the pump, split at awkward places, and collect
/// what it emits.
async fn pumped(body: &str, chat_id: &str) -> Vec<StreamMessage> {
    let bytes = body.as_bytes();
    let chunks: Vec<Result<Vec<u8>, String>> = bytes.chunks(7).map(|c| Ok(c.to_vec())).collect();
    let mut messages = Vec::new();
    pump(chat_id, stream::iter(chunks), Duration::from_secs(5), |m| {
        messages.push(m);
        true
    })
    .await;
    messages
}

fn to_action(message: StreamMessage) -> ChatAction {
    let StreamMessage { chat_id, item } = message;
    match item {
        StreamItem::Event(event) => ChatAction::StreamEventReceived { chat_id, event },
        StreamItem::Done => ChatAction::StreamDone { chat_id },
        StreamItem::Failed(error) => ChatAction::StreamFailed { chat_id, error },
        StreamItem::TimedOut => ChatAction::StreamTimedOut { chat_id },
    }
}

#[tokio::test]
async fn test_chat_turn_from_submit_to_done() {
    let mut store = ChatStore::new();
    store.dispatch(ChatAction::SessionsLoaded(Vec::new())).unwrap();

    let outcome = store
        .dispatch(ChatAction::MessageSubmitted { text: "top regions?".into(), use_sop: true })
        .unwrap();
    let Outcome::Send(request) = outcome else {
        panic!("expected a send request, got {:?}", outcome);
    };
    assert_eq!(request.session_id, SessionId::UNSAVED);
    assert!(request.use_sop);

    let outcome = store
        .dispatch(ChatAction::SendAccepted {
            turn: request.turn,
            handle: ChatHandle { conversation_id: 42, chat_id: "c1".into() },
        })
        .unwrap();
    assert_eq!(outcome, Outcome::OpenStream("c1".into()));
    assert_eq!(store.active_id(), Some(SessionId(42)));

    let body = [
        frame(json!({"chat_id": "c1", "role": "agent", "content_type": "signal", "content": {"message": "Planning"}})),
        frame(json!({
            "chat_id": "c1", "role": "sql-agent", "content_type": "data",
            "content": [{"region": "north", "total": 12}],
            "thought_process": ["SELECT region, total FROM sales"]
        })),
        frame(json!({"chat_id": "c1", "role": "chat-agent", "content_type": "markdown", "content": "North leads."})),
        frame(json!({"chat_id": "c1", "content_type": "signal", "content": "DONE"})),
        frame(json!({"chat_id": "c1", "role": "chat-agent", "content_type": "markdown", "content": "ignored"})),
    ]
    .concat();

    let mut last = Outcome::Unchanged;
    for message in pumped(&body, "c1").await {
        last = store.dispatch(to_action(message)).unwrap();
    }

    assert_eq!(last, Outcome::TurnFinished);
    assert_eq!(store.phase(), TurnPhase::Done);
    assert!(!store.is_thinking);

    let transcript = store.transcript();
    assert_eq!(transcript.len(), 2);
    assert!(matches!(transcript[0], Message::User(_)));
    let reply = transcript[1].as_assistant().unwrap();
    assert_eq!(reply.agents.len(), 2);
    assert_eq!(reply.agents[0].kind, AgentKind::Sql);
    assert_eq!(reply.agents[0].executed_query(), Some("SELECT region, total FROM sales"));
    assert_eq!(reply.agents[1].markdowns, vec!["North leads.".to_string()]);
    assert!(!store.turn_failed(&reply.message_id));
}

#[tokio::test]
async fn test_stream_closing_early_marks_turn_failed() {
    let mut store = ChatStore::new();
    store.dispatch(ChatAction::SessionsLoaded(Vec::new())).unwrap();
    let Outcome::Send(request) = store
        .dispatch(ChatAction::MessageSubmitted { text: "hi".into(), use_sop: false })
        .unwrap()
    else {
        panic!("expected a send request");
    };
    store
        .dispatch(ChatAction::SendAccepted {
            turn: request.turn,
            handle: ChatHandle { conversation_id: 3, chat_id: "c9".into() },
        })
        .unwrap();

    let body = frame(json!({"chat_id": "c9", "role": "chat-agent", "content_type": "markdown", "content": "Partial"}));
    let messages = pumped(&body, "c9").await;
    assert!(matches!(messages.last().map(|m| &m.item), Some(StreamItem::Failed(_))));

    for message in messages {
        store.dispatch(to_action(message)).unwrap();
    }

    assert_eq!(store.phase(), TurnPhase::Errored);
    assert!(store.banner.is_some());
    let reply = store.transcript().last().and_then(Message::as_assistant).unwrap();
    assert_eq!(reply.agents[0].markdowns, vec!["Partial".to_string()]);
    assert!(store.turn_failed(&reply.message_id));

    // the next turn is allowed once the failure is recorded
    assert!(store.dispatch(ChatAction::MessageSubmitted { text: "again".into(), use_sop: false }).is_ok());
}

#[test]
fn test_history_is_regrouped_into_turns() {
    let history: Vec<BackendMessage> = serde_json::from_value(json!([
        {"role": "user", "markdowns": ["how many orders?"]},
        {"role": "sql-agent", "jsons": [{"count": 9}], "thought_process": ["SELECT count(*) FROM orders"]},
        {"role": "chat-agent", "markdowns": ["There are 9 orders."]},
        {"role": "user", "markdowns": ["thanks"]}
    ]))
    .unwrap();

    let mut store = ChatStore::new();
    let session = Session { id: SessionId(5), topic: Some("orders".into()), timestamp: String::new(), data_source_ids: vec![] };
    store.dispatch(ChatAction::SessionsLoaded(vec![session])).unwrap();
    store
        .dispatch(ChatAction::SessionSelected { id: SessionId(5), messages: history, source_ids: vec![1, 2] })
        .unwrap();

    let transcript = store.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript[1].as_assistant().map(|a| a.agents.len()), Some(2));
    assert!(matches!(transcript[2], Message::User(_)));
    assert_eq!(store.active_session().map(|s| s.data_source_ids.clone()), Some(vec![1, 2]));
}

fn postgres() -> SourceTypeInfo {
    serde_json::from_value(json!({
        "name": "postgres",
        "display_info": {"name": "PostgreSQL"},
        "connection_info": {
            "host": {"required": true},
            "port": {"required": true, "default": 5432},
            "database": {"required": true}
        }
    }))
    .unwrap()
}

fn discovered() -> Vec<EntitySchema> {
    serde_json::from_value(json!([
        {
            "table_name": "customers",
            "columns": [{"column_name": "id", "type": "int"}, {"column_name": "email", "type": "text"}],
            "primary_keys": ["id"]
        },
        {"table_name": "audit_log", "columns": [{"column_name": "at", "type": "timestamp"}]}
    ]))
    .unwrap()
}

#[test]
fn test_new_source_wizard_end_to_end() {
    let (mut wizard, effect) = NewSourceWizard::open(true, "en");
    assert_eq!(effect, WizardEffect::LoadSourceTypes);
    wizard.types_loaded(Ok(vec![postgres()]));
    wizard.select_type("postgres");
    wizard.type_details_loaded(Ok(postgres()));
    wizard.next().unwrap();
    assert_eq!(wizard.step(), Step::ConfigureSource);

    wizard.set_field("host", json!("db.internal"));
    wizard.set_field("database", json!("crm"));
    let Ok(WizardEffect::TestConnectivity { source_type, test, .. }) = wizard.test_connection() else {
        panic!("connectivity test should be requested");
    };
    assert_eq!(source_type, "postgres");
    wizard.connectivity_result(test, Ok(()));

    let Ok(Some(WizardEffect::DiscoverSchema { fetch, .. })) = wizard.next() else {
        panic!("schema discovery should be requested");
    };
    wizard.schema_loaded(fetch, Ok(discovered()));
    assert!(wizard.next().is_err(), "at least one table must be selected");

    wizard.schema.toggle_selected("customers");
    let Some(WizardEffect::Annotate { ticket, request }) = wizard.request_annotation("customers") else {
        panic!("annotation should be requested");
    };
    assert_eq!(request.entity.table_name, "customers");
    let annotation: HashMap<String, Annotation> = serde_json::from_value(json!({
        "en": {"table_description": "People who buy", "columns": {"email": "Contact address"}}
    }))
    .unwrap();
    wizard.annotation_result(&ticket, Ok(annotation)).unwrap();

    wizard.next().unwrap();
    assert_eq!(wizard.step(), Step::ReviewConfig);
    wizard.set_source_name("CRM");

    let Ok(Some(WizardEffect::Create { source_type, payload })) = wizard.next() else {
        panic!("review step should submit");
    };
    assert_eq!(source_type, "postgres");
    assert!(!payload.is_private, "admin-created sources are shared");
    assert_eq!(payload.connection_info["port"], json!(5432));
    assert_eq!(payload.entities.len(), 1);
    assert_eq!(payload.entities[0].primary_keys, vec!["id".to_string()]);

    let body = serde_json::to_value(&payload).unwrap();
    assert_eq!(body["entities"][0]["description"][0]["text"], json!("People who buy"));
    assert!(body["entities"][0].get("_selected").is_none());

    assert!(wizard.save_result(Ok(())));
}

#[test]
fn test_edit_source_wizard_keeps_saved_selection() {
    let (mut wizard, effects) = EditSourceWizard::open(11, "en");
    let [WizardEffect::LoadSource(11), WizardEffect::LoadSavedSchema { source_id: 11, fetch }] = effects[..] else {
        panic!("source and saved schema should both be requested, got {:?}", effects);
    };

    let detail: SourceDetail = serde_json::from_value(json!({
        "id": 11,
        "source_name": "CRM",
        "source_type": "postgres",
        "connection": {"host": "db.internal", "port": 5432},
        "is_private": true,
        "description": [{"lang": "en", "text": "Customer data"}]
    }))
    .unwrap();
    wizard.source_loaded(Ok(detail));
    assert!(wizard.save().is_err(), "saving waits for the saved schema");

    let mut saved = discovered();
    saved[0].selected = true;
    wizard.schema_loaded(fetch, Ok(saved));

    let Ok(WizardEffect::Update { source_id, payload }) = wizard.save() else {
        panic!("save should produce an update");
    };
    assert_eq!(source_id, 11);
    assert_eq!(payload.source_name, "CRM");
    assert!(payload.is_private);
    assert_eq!(payload.entities.iter().map(|e| e.table_name.as_str()).collect::<Vec<_>>(), vec!["customers"]);
}

#[test]
fn test_config_file_with_overrides() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("luna.yaml");
    fs::write(&path, "api_base_url: \"https://luna.example\"\nstream_idle_timeout_secs: 45\n").unwrap();

    let mut config = AppConfig::from_file(&path).unwrap();
    let env: HashMap<&str, &str> = HashMap::from([("LUNA_APP_LANG", "ko")]);
    config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.api_base_url, "https://luna.example");
    assert_eq!(config.stream_idle_timeout(), Duration::from_secs(45));
    assert_eq!(config.app_lang, "ko");
    assert!(config.validate().is_ok());
}
