//! History view: linearizes a thread's messages into a chat transcript for one viewer.
//!
//! The viewer's own messages become `assistant` rows (tool calls attached); tool results
//! become `tool` rows tied to their originating call by id; everyone else collapses to
//! `user` rows prefixed `[SpeakerName]:` so the LLM can tell speakers apart.

use crate::llm::{ChatMessage, ChatRole, ToolInvocation};
use crate::message::{SenderKind, StoredMessage};

#[derive(Clone, Copy, Debug, Default)]
pub struct HistoryOptions {
    /// Adds per-message target hints to `user` rows so a listening agent knows when a
    /// message was not addressed to it.
    pub include_target_context: bool,
}

/// Builds the transcript for `(messages, viewer_id)`. Input must be ordered by creation
/// time ascending (the message store guarantees this).
pub fn transcript(
    messages: &[StoredMessage],
    viewer_id: &str,
    options: HistoryOptions,
) -> Vec<ChatMessage> {
    let mut rows = Vec::with_capacity(messages.len());
    for message in messages {
        if message.sender_kind == SenderKind::Tool {
            let mut row = ChatMessage {
                role: ChatRole::Tool,
                content: message.content.clone(),
                name: None,
                tool_call_id: message.tool_call_id.clone(),
                tool_calls: Vec::new(),
            };
            if row.tool_call_id.is_none() {
                // A tool result with no back-reference cannot be attached; present it as
                // a plain user row instead of an orphaned tool row.
                row.role = ChatRole::User;
                row.content = format!("[{}]: {}", speaker_name(message), row.content);
            }
            rows.push(row);
            continue;
        }

        if message.sender_id == viewer_id {
            rows.push(ChatMessage {
                role: ChatRole::Assistant,
                content: message.content.clone(),
                name: None,
                tool_call_id: None,
                tool_calls: message
                    .tool_calls
                    .iter()
                    .map(|c| ToolInvocation {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        arguments: serde_json::to_string(&c.args).unwrap_or_default(),
                    })
                    .collect(),
            });
            continue;
        }

        let speaker = speaker_name(message);
        let content = match (&message.target_id, options.include_target_context) {
            (Some(target), true) if target != viewer_id => {
                format!("[{speaker} → {target}]: {}", message.content)
            }
            _ => format!("[{speaker}]: {}", message.content),
        };
        rows.push(ChatMessage {
            role: ChatRole::User,
            content,
            name: None,
            tool_call_id: None,
            tool_calls: Vec::new(),
        });
    }
    rows
}

fn speaker_name(message: &StoredMessage) -> &str {
    message
        .sender_name
        .as_deref()
        .unwrap_or(message.sender_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageToolCall;

    fn msg(kind: SenderKind, sender: &str, content: &str) -> StoredMessage {
        let mut m = StoredMessage::new("th", kind, sender);
        m.content = content.to_string();
        m
    }

    /// **Scenario**: the viewer sees its own messages as assistant, others as prefixed
    /// user rows.
    #[test]
    fn roles_by_viewer() {
        let messages = vec![
            msg(SenderKind::User, "ana", "hi"),
            msg(SenderKind::Agent, "helper", "hello ana"),
            msg(SenderKind::Agent, "writer", "drafting"),
        ];
        let rows = transcript(&messages, "helper", HistoryOptions::default());
        assert_eq!(rows[0].role, ChatRole::User);
        assert_eq!(rows[0].content, "[ana]: hi");
        assert_eq!(rows[1].role, ChatRole::Assistant);
        assert_eq!(rows[1].content, "hello ana");
        assert_eq!(rows[2].role, ChatRole::User);
        assert_eq!(rows[2].content, "[writer]: drafting");
    }

    /// **Scenario**: tool results attach to their originating call by tool_call_id, and
    /// the viewer's tool calls are carried on the assistant row.
    #[test]
    fn tool_results_attach_by_call_id() {
        let mut call = msg(SenderKind::Agent, "helper", "");
        call.tool_calls = vec![MessageToolCall {
            id: "c1".into(),
            name: "wait".into(),
            args: serde_json::json!({"seconds": 1}),
        }];
        let mut result = msg(SenderKind::Tool, "wait", "done");
        result.tool_call_id = Some("c1".into());

        let rows = transcript(&[call, result], "helper", HistoryOptions::default());
        assert_eq!(rows[0].role, ChatRole::Assistant);
        assert_eq!(rows[0].tool_calls[0].id, "c1");
        assert_eq!(rows[1].role, ChatRole::Tool);
        assert_eq!(rows[1].tool_call_id.as_deref(), Some("c1"));
    }

    /// **Scenario**: target hints appear only with include_target_context and only for
    /// messages addressed elsewhere.
    #[test]
    fn target_hints_are_opt_in() {
        let mut to_writer = msg(SenderKind::User, "ana", "please draft");
        to_writer.target_id = Some("writer".into());
        let mut to_viewer = msg(SenderKind::User, "ana", "and you review");
        to_viewer.target_id = Some("helper".into());

        let plain = transcript(
            &[to_writer.clone(), to_viewer.clone()],
            "helper",
            HistoryOptions::default(),
        );
        assert_eq!(plain[0].content, "[ana]: please draft");

        let hinted = transcript(
            &[to_writer, to_viewer],
            "helper",
            HistoryOptions {
                include_target_context: true,
            },
        );
        assert_eq!(hinted[0].content, "[ana → writer]: please draft");
        assert_eq!(hinted[1].content, "[ana]: and you review");
    }
}
