//! End-to-end: the agent-to-agent loop guard.

mod support;

use parley::message::SenderKind;
use support::{agent, instance_with_agents, user_message, RUN_DEADLINE};

/// **Scenario**: two agents address each other with no user intervention. After
/// `maxAgentTurns` (default 5) consecutive agent messages the route is forced to the
/// user participant and no further LLM call is made.
#[tokio::test]
async fn loop_guard_caps_agent_ping_pong() {
    let fixture = instance_with_agents(vec![agent("agent-a", "Ping"), agent("agent-b", "Pong")]).await;
    // Far more scripted replies than the guard will allow through.
    for i in 0..12 {
        let target = if i % 2 == 0 { "Pong" } else { "Ping" };
        fixture.llm.push_text(format!("@{target} your turn ({i})"));
    }

    let handle = fixture
        .instance
        .run(user_message(
            "pingpong",
            &["observer", "Ping", "Pong"],
            "observer",
            "@Ping start the game",
        ))
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap(), "run did not settle");

    let deps = fixture.instance.deps();
    let messages = deps.messages.list_thread(handle.thread_id()).await.unwrap();
    let agent_messages = messages
        .iter()
        .filter(|m| m.sender_kind == SenderKind::Agent)
        .count();
    // The guard bounds consecutive agent-authored messages at maxAgentTurns.
    assert_eq!(agent_messages, 5);
    assert_eq!(fixture.llm.recorded_prompts().len(), 5);

    // The counter was reset when the guard tripped.
    let thread = deps.threads.get(handle.thread_id()).await.unwrap().unwrap();
    assert_eq!(thread.metadata.agent_turn_count, 0);

    fixture.instance.shutdown().await;
}

/// **Scenario**: a thread-level `maxAgentTurns` override tightens the cap.
#[tokio::test]
async fn loop_guard_respects_thread_override() {
    let fixture = instance_with_agents(vec![agent("agent-a", "Ping"), agent("agent-b", "Pong")]).await;
    fixture.llm.push_text("ready.");

    let handle = fixture
        .instance
        .run(user_message(
            "tight",
            &["observer", "Ping", "Pong"],
            "observer",
            "warmup",
        ))
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap());
    let deps = fixture.instance.deps();
    deps.threads
        .update_metadata(handle.thread_id(), |m| m.max_agent_turns = Some(2))
        .await
        .unwrap();
    fixture.llm.push_text("@Pong tighter loop, your move");
    fixture.llm.push_text("@Ping right back at you");
    fixture.llm.push_text("@Pong this one never happens");

    let second = fixture
        .instance
        .run(user_message("tight", &[], "observer", "@Ping go"))
        .await
        .unwrap();
    assert!(second.wait_timeout(RUN_DEADLINE).await.unwrap());

    let messages = deps.messages.list_thread(second.thread_id()).await.unwrap();
    let agent_messages = messages
        .iter()
        .filter(|m| m.sender_kind == SenderKind::Agent)
        .count();
    // warmup turn produced one agent reply; the capped exchange adds exactly two.
    assert_eq!(agent_messages, 3);

    fixture.instance.shutdown().await;
}
