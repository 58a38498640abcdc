// src/chat/reform.rs

use super::model::{AgentResult, AssistantMessage, BackendMessage, Message, UserMessage};

/// Group a stored flat message list into display turns.
///
/// Each user message becomes its own turn; every consecutive run of agent
/// messages becomes one assistant turn. Messages with other roles are
/// skipped.
pub fn reform_messages(messages: Vec<BackendMessage>) -> Vec<Message> {
    let mut turns = Vec::new();
    let mut pending_user: Option<UserMessage> = None;
    let mut pending_agents: Vec<AgentResult> = Vec::new();

    for message in messages {
        if message.is_user() {
            flush(&mut turns, &mut pending_user, &mut pending_agents);
            pending_user = Some(message.into_user());
        } else if message.is_agent() {
            // a user message waiting in front of an agent run keeps its place
            if let Some(user) = pending_user.take() {
                turns.push(Message::User(user));
            }
            pending_agents.push(message.into_agent());
        }
    }
    flush(&mut turns, &mut pending_user, &mut pending_agents);

    turns
}

fn flush(turns: &mut Vec<Message>, user: &mut Option<UserMessage>, agents: &mut Vec<AgentResult>) {
    if let Some(user) = user.take() {
        turns.push(Message::User(user));
    }
    if !agents.is_empty() {
        let mut assistant = AssistantMessage::empty();
        assistant.agents = std::mem::take(agents);
        turns.push(Message::Assistant(assistant));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::model::AgentKind;
    use serde_json::json;

    fn backend(role: &str, text: &str) -> BackendMessage {
        serde_json::from_value(json!({"role": role, "markdowns": [text]})).unwrap()
    }

    fn shape(turns: &[Message]) -> Vec<String> {
        turns
            .iter()
            .map(|turn| match turn {
                Message::User(user) => format!("user:{}", user.markdowns[0]),
                Message::Assistant(assistant) => format!("assistant:{}", assistant.agents.len()),
            })
            .collect()
    }

    #[test]
    fn test_groups_agent_runs() {
        let turns = reform_messages(vec![
            backend("user", "q1"),
            backend("sql-agent", "a"),
            backend("chat-agent", "b"),
            backend("user", "q2"),
            backend("chat-agent", "c"),
        ]);
        assert_eq!(shape(&turns), vec!["user:q1", "assistant:2", "user:q2", "assistant:1"]);

        let last = turns[3].as_assistant().unwrap();
        assert_eq!(last.agents[0].kind, AgentKind::Chat);
        assert_eq!(last.agents[0].markdowns, vec!["c".to_string()]);
    }

    #[test]
    fn test_consecutive_users_and_trailing_user() {
        let turns = reform_messages(vec![
            backend("user", "q1"),
            backend("user", "q2"),
            backend("plotly-agent", "p"),
            backend("user", "q3"),
        ]);
        assert_eq!(shape(&turns), vec!["user:q1", "user:q2", "assistant:1", "user:q3"]);
    }

    #[test]
    fn test_skips_unknown_roles_and_keeps_count() {
        let input = vec![
            backend("system", "ignored"),
            backend("chat-agent", "orphan"),
            backend("user", "q"),
            backend("tool", "ignored"),
            backend("sql-agent", "s"),
        ];
        let turns = reform_messages(input);
        assert_eq!(shape(&turns), vec!["assistant:1", "user:q", "assistant:1"]);

        let agent_count: usize = turns
            .iter()
            .filter_map(Message::as_assistant)
            .map(|a| a.agents.len())
            .sum();
        let user_count = turns.iter().filter(|t| matches!(t, Message::User(_))).count();
        assert_eq!(agent_count + user_count, 3);
    }

    #[test]
    fn test_empty_input() {
        assert!(reform_messages(Vec::new()).is_empty());
    }
}
