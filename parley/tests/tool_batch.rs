//! End-to-end: parallel tool calls aggregate into one batch before the next LLM call.

mod support;

use parley::llm::{ChatRole, LlmReply, ToolInvocation};
use parley::message::SenderKind;
use support::{agent, instance_with_agents, user_message, RUN_DEADLINE};

fn tool_call(id: &str, name: &str, arguments: &str) -> ToolInvocation {
    ToolInvocation {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

/// **Scenario**: the agent issues three tool calls in one response. Three `TOOL_CALL`
/// events share a batch id, three tool messages come back with matching batch metadata,
/// and exactly one follow-up LLM call sees all three tool results.
#[tokio::test]
async fn parallel_tool_batch_aggregates() {
    let mut helper = agent("helper-1", "Helper");
    helper.allowed_tools = vec!["current_time".to_string(), "list_namespaces".to_string()];
    let fixture = instance_with_agents(vec![helper]).await;

    fixture.llm.push_reply(LlmReply {
        content: String::new(),
        tool_calls: vec![
            tool_call("c1", "current_time", "{}"),
            tool_call("c2", "current_time", "{}"),
            tool_call("c3", "list_namespaces", "{}"),
        ],
        usage: None,
    });
    fixture.llm.push_text("all three checks done");

    let handle = fixture
        .instance
        .run(user_message(
            "batch",
            &["ana", "Helper"],
            "ana",
            "run your checks",
        ))
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap(), "run did not settle");

    let deps = fixture.instance.deps();
    let messages = deps.messages.list_thread(handle.thread_id()).await.unwrap();

    // Three tool results, all members of the same batch, indexes 0..3.
    let tool_messages: Vec<_> = messages
        .iter()
        .filter(|m| m.sender_kind == SenderKind::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 3);
    let batch_ids: std::collections::HashSet<String> = tool_messages
        .iter()
        .filter_map(|m| m.metadata.get("batchId").and_then(|v| v.as_str()))
        .map(String::from)
        .collect();
    assert_eq!(batch_ids.len(), 1, "all results share one batch id");
    let mut indexes: Vec<u64> = tool_messages
        .iter()
        .filter_map(|m| m.metadata.get("batchIndex").and_then(|v| v.as_u64()))
        .collect();
    indexes.sort_unstable();
    assert_eq!(indexes, vec![0, 1, 2]);

    // Exactly two LLM calls; the second saw all three tool results in its history.
    let prompts = fixture.llm.recorded_prompts();
    assert_eq!(prompts.len(), 2);
    let tool_rows: Vec<_> = prompts[1]
        .iter()
        .filter(|m| m.role == ChatRole::Tool)
        .collect();
    assert_eq!(tool_rows.len(), 3);
    let row_ids: std::collections::HashSet<&str> = tool_rows
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(row_ids, ["c1", "c2", "c3"].into_iter().collect());

    // The aggregation state was cleaned up once the batch completed.
    let thread = deps.threads.get(handle.thread_id()).await.unwrap().unwrap();
    assert!(thread.metadata.pending_tool_batches.is_empty());

    // The final reply went back to the user.
    let last = messages.last().unwrap();
    assert_eq!(last.sender_kind, SenderKind::Agent);
    assert_eq!(last.content, "all three checks done");

    fixture.instance.shutdown().await;
}

/// **Scenario**: a single tool call skips batch aggregation and still round-trips back
/// into one follow-up LLM call; an unknown tool is reported as a failed tool message
/// without retries.
#[tokio::test]
async fn single_call_and_unknown_tool() {
    let mut helper = agent("helper-1", "Helper");
    helper.allowed_tools = vec!["current_time".to_string()];
    let fixture = instance_with_agents(vec![helper]).await;

    fixture.llm.push_reply(LlmReply {
        content: String::new(),
        tool_calls: vec![tool_call("only", "no_such_tool", "{}")],
        usage: None,
    });
    fixture.llm.push_text("noted, that tool does not exist");

    let handle = fixture
        .instance
        .run(user_message("single", &["ana", "Helper"], "ana", "try it"))
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap());

    let deps = fixture.instance.deps();
    let messages = deps.messages.list_thread(handle.thread_id()).await.unwrap();
    let tool_message = messages
        .iter()
        .find(|m| m.sender_kind == SenderKind::Tool)
        .expect("tool failure message");
    assert!(tool_message.content.contains("no_such_tool"));
    assert_eq!(
        tool_message.metadata.pointer("/toolCalls/0/status"),
        Some(&serde_json::json!("failed"))
    );
    // The failure was reported to the agent exactly once; no runtime retry.
    assert_eq!(fixture.llm.recorded_prompts().len(), 2);

    fixture.instance.shutdown().await;
}
