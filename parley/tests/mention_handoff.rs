//! End-to-end: `@mention` hand-off between two agents with the original sender queued
//! as the final stop.

mod support;

use parley::llm::LlmReply;
use support::{agent, instance_with_agents, user_message, RUN_DEADLINE};

/// **Scenario**: U addresses `@Researcher`; the researcher hands off to `@Writer`; the
/// writer's unmentioned reply pops the queue and lands back on U, ending the chain.
#[tokio::test]
async fn mention_handoff_walks_the_queue() {
    let fixture = instance_with_agents(vec![
        agent("agent-r", "Researcher"),
        agent("agent-w", "Writer"),
    ])
    .await;
    fixture.llm.push_reply(LlmReply {
        content: "found three sources. @Writer write it up".to_string(),
        tool_calls: Vec::new(),
        usage: None,
    });
    fixture.llm.push_reply(LlmReply {
        content: "here is the draft, ana".to_string(),
        tool_calls: Vec::new(),
        usage: None,
    });

    let handle = fixture
        .instance
        .run(user_message(
            "handoff",
            &["ana", "Researcher", "Writer"],
            "ana",
            "@Researcher find facts about pelicans",
        ))
        .await
        .unwrap();
    assert!(handle.wait_timeout(RUN_DEADLINE).await.unwrap(), "run did not settle");

    let deps = fixture.instance.deps();
    let messages = deps.messages.list_thread(handle.thread_id()).await.unwrap();
    let senders: Vec<&str> = messages.iter().map(|m| m.sender_id.as_str()).collect();
    assert_eq!(senders, vec!["ana", "agent-r", "agent-w"]);

    // Exactly two LLM calls: the writer's reply routed to the user, not back into an
    // agent.
    let prompts = fixture.llm.recorded_prompts();
    assert_eq!(prompts.len(), 2);
    // The writer saw the researcher's hand-off as a prefixed user row.
    assert!(prompts[1]
        .iter()
        .any(|m| m.content.contains("[Researcher]") || m.content.contains("Researcher →")));

    // Mention side effects persisted: ana → Researcher, Researcher → Writer.
    let thread = deps.threads.get(handle.thread_id()).await.unwrap().unwrap();
    let targets = &thread.metadata.participant_targets;
    assert_eq!(targets.get("ana").map(String::as_str), Some("Researcher"));
    assert_eq!(
        targets.get("agent-r").map(String::as_str),
        Some("Writer")
    );

    // One agent-to-agent hop happened; the hop counter ended reset.
    assert_eq!(thread.metadata.agent_turn_count, 0);

    fixture.instance.shutdown().await;
}

/// **Scenario**: after a mention established a target, subsequent non-mentioning
/// messages from that sender keep routing to it.
#[tokio::test]
async fn persisted_target_sticks() {
    let fixture = instance_with_agents(vec![
        agent("agent-r", "Researcher"),
        agent("agent-w", "Writer"),
    ])
    .await;
    fixture.llm.push_text("on it");
    fixture.llm.push_text("still me");

    let first = fixture
        .instance
        .run(user_message(
            "sticky",
            &["ana", "Researcher", "Writer"],
            "ana",
            "@Writer draft the intro",
        ))
        .await
        .unwrap();
    assert!(first.wait_timeout(RUN_DEADLINE).await.unwrap());

    let second = fixture
        .instance
        .run(user_message("sticky", &[], "ana", "make it shorter"))
        .await
        .unwrap();
    assert!(second.wait_timeout(RUN_DEADLINE).await.unwrap());

    let deps = fixture.instance.deps();
    let messages = deps.messages.list_thread(second.thread_id()).await.unwrap();
    // Both replies came from the Writer: the second message reused the persisted target.
    let agent_senders: Vec<&str> = messages
        .iter()
        .filter(|m| m.sender_kind == parley::message::SenderKind::Agent)
        .map(|m| m.sender_id.as_str())
        .collect();
    assert_eq!(agent_senders, vec!["agent-w", "agent-w"]);

    fixture.instance.shutdown().await;
}
