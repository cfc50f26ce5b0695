//! End-to-end tests of the agent loop against a scripted provider.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use agent_core::{
    Agent, AgentEvent, Error, MessageRole, StreamDelta, ToolCallStatus, ToolOutput, ToolUseBlock,
    tool,
};
use common::*;

fn agent_with(provider: ScriptedProvider) -> Agent {
    Agent::builder(test_config())
        .provider(Arc::new(provider))
        .build()
        .unwrap()
}

#[tokio::test]
async fn plain_turn_streams_tokens_then_done() {
    // Scenario: empty session, a multilingual prompt, a text-only answer.
    let provider = ScriptedProvider::new(vec![text_turn(
        &["Python ", "是一種", "程式語言"],
        usage(25, 12),
    )]);
    let agent = agent_with(provider);

    let events = collect_events(
        agent
            .stream_message("什麼是 Python?", "s1", None)
            .await
            .unwrap(),
    )
    .await;

    // token×N then done, nothing else.
    assert_eq!(events.len(), 4);
    assert!(matches!(events[0], AgentEvent::Token { .. }));
    assert_eq!(token_text(&events), "Python 是一種程式語言");
    assert_eq!(events.last().unwrap(), &AgentEvent::Done);

    // History has the user turn and the assistant turn.
    let history = agent.sessions().load("s1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].role, MessageRole::User);
    assert_eq!(history[1].text(), "Python 是一種程式語言");

    // Usage persisted; current context tokens equal the reported usage.
    let persisted = agent.sessions().load_usage("s1").await.unwrap();
    assert_eq!(persisted.current_context_tokens(), 37);
}

#[tokio::test]
async fn single_tool_round_trip() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(
            None,
            vec![ToolUseBlock::new(
                "toolu_1",
                "read_file",
                json!({"path": "README.md"}),
            )],
            usage(30, 8),
        ),
        text_turn(&["README says Hello"], usage(60, 10)),
    ]);
    let agent = agent_with(provider);
    agent
        .tools()
        .register(
            tool("read_file", "Read a file")
                .param("path", "string")
                .build(|_| async { Ok(ToolOutput::text("# Hello")) }),
        )
        .unwrap();

    let events = collect_events(
        agent
            .stream_message("Read README.md", "s1", None)
            .await
            .unwrap(),
    )
    .await;

    // tool_call(started), tool_call(completed), token×N, done.
    match &events[0] {
        AgentEvent::ToolCall {
            name,
            status,
            summary,
            ..
        } => {
            assert_eq!(name, "read_file");
            assert_eq!(*status, ToolCallStatus::Started);
            assert_eq!(summary, "read_file path=README.md");
        }
        other => panic!("expected tool_call started, got {other:?}"),
    }
    assert!(matches!(
        &events[1],
        AgentEvent::ToolCall { status: ToolCallStatus::Completed, .. }
    ));
    assert_eq!(token_text(&events), "README says Hello");
    assert_eq!(events.last().unwrap(), &AgentEvent::Done);

    // Four turns: user, assistant(tool_use), user(tool_result), assistant.
    let history = agent.sessions().load("s1").await.unwrap();
    assert_eq!(history.len(), 4);
    assert_tool_pairing(&history);
}

#[tokio::test]
async fn parallel_tools_fan_out_concurrently() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(
            None,
            vec![
                ToolUseBlock::new("toolu_a", "read_file", json!({"path": "a.py"})),
                ToolUseBlock::new("toolu_b", "read_file", json!({"path": "b.py"})),
            ],
            usage(30, 10),
        ),
        text_turn(&["both read"], usage(70, 5)),
    ]);
    let agent = agent_with(provider);
    agent
        .tools()
        .register(
            tool("read_file", "Read a file")
                .param("path", "string")
                .build(|args| async move {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(ToolOutput::text(format!(
                        "contents of {}",
                        args["path"].as_str().unwrap_or_default()
                    )))
                }),
        )
        .unwrap();

    let started = Instant::now();
    let events = collect_events(
        agent
            .stream_message("read both files", "s1", None)
            .await
            .unwrap(),
    )
    .await;
    // Two 100 ms handlers in parallel, not 200 ms in series.
    assert!(started.elapsed() < Duration::from_millis(190));
    assert_eq!(events.last().unwrap(), &AgentEvent::Done);

    // tool_result order matches tool_use order regardless of completion.
    let history = agent.sessions().load("s1").await.unwrap();
    assert_tool_pairing(&history);
    let results = &history[2];
    let ids: Vec<String> = results
        .content
        .iter()
        .filter_map(|b| match b {
            agent_core::ContentBlock::ToolResult(r) => Some(r.tool_use_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(ids, vec!["toolu_a", "toolu_b"]);
}

#[tokio::test]
async fn failed_tool_becomes_error_result_and_loop_continues() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(
            None,
            vec![ToolUseBlock::new("toolu_1", "flaky", json!({}))],
            usage(20, 5),
        ),
        text_turn(&["the tool failed, sorry"], usage(40, 8)),
    ]);
    let agent = agent_with(provider);
    agent
        .tools()
        .register(
            tool("flaky", "always fails")
                .build(|_| async { Err::<ToolOutput, _>(Error::tool("backend offline")) }),
        )
        .unwrap();

    let events = collect_events(
        agent.stream_message("try it", "s1", None).await.unwrap(),
    )
    .await;

    let failed = events.iter().find(|e| {
        matches!(e, AgentEvent::ToolCall { status: ToolCallStatus::Failed, .. })
    });
    match failed {
        Some(AgentEvent::ToolCall { error, .. }) => {
            assert!(error.as_deref().unwrap_or_default().contains("backend offline"));
        }
        other => panic!("expected failed tool_call, got {other:?}"),
    }
    // The loop went on to a terminal answer.
    assert_eq!(events.last().unwrap(), &AgentEvent::Done);

    let history = agent.sessions().load("s1").await.unwrap();
    assert_tool_pairing(&history);
    match &history[2].content[0] {
        agent_core::ContentBlock::ToolResult(r) => assert!(r.is_error),
        other => panic!("expected tool_result, got {other:?}"),
    }
}

#[tokio::test]
async fn preamble_end_marks_text_to_tool_boundary() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(
            Some("Let me check that file."),
            vec![ToolUseBlock::new("toolu_1", "probe", json!({}))],
            usage(20, 6),
        ),
        text_turn(&["done"], usage(40, 3)),
    ]);
    let agent = agent_with(provider);
    agent
        .tools()
        .register(tool("probe", "probe").build(|_| async { Ok(ToolOutput::text("ok")) }))
        .unwrap();

    let events = collect_events(
        agent.stream_message("check it", "s1", None).await.unwrap(),
    )
    .await;

    let preamble_at = events
        .iter()
        .position(|e| matches!(e, AgentEvent::PreambleEnd))
        .expect("preamble_end missing");
    let first_tool_at = events
        .iter()
        .position(|e| matches!(e, AgentEvent::ToolCall { .. }))
        .unwrap();
    assert!(preamble_at < first_tool_at);
    // Exactly one boundary event.
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, AgentEvent::PreambleEnd))
            .count(),
        1
    );
}

#[tokio::test]
async fn no_preamble_event_without_leading_text() {
    let provider = ScriptedProvider::new(vec![
        tool_turn(
            None,
            vec![ToolUseBlock::new("toolu_1", "probe", json!({}))],
            usage(20, 6),
        ),
        text_turn(&["done"], usage(40, 3)),
    ]);
    let agent = agent_with(provider);
    agent
        .tools()
        .register(tool("probe", "probe").build(|_| async { Ok(ToolOutput::text("ok")) }))
        .unwrap();

    let events = collect_events(
        agent.stream_message("check it", "s1", None).await.unwrap(),
    )
    .await;
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::PreambleEnd)));
}

#[tokio::test]
async fn retry_twice_then_succeed() {
    let provider = ScriptedProvider::new(vec![
        ScriptedCall::Fail(Error::rate_limit("slow down")),
        ScriptedCall::Fail(Error::rate_limit("slow down")),
        text_turn(&["finally"], usage(10, 3)),
    ]);
    let agent = agent_with(provider);

    let started = Instant::now();
    let events = collect_events(
        agent.stream_message("hello", "s1", None).await.unwrap(),
    )
    .await;
    // Backoff: 10 ms then 20 ms.
    assert!(started.elapsed() >= Duration::from_millis(30));

    let retries: Vec<&AgentEvent> = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::Retry { .. }))
        .collect();
    assert_eq!(retries.len(), 2);
    match retries[0] {
        AgentEvent::Retry {
            attempt,
            max_retries,
            error_kind,
        } => {
            assert_eq!(*attempt, 0);
            assert_eq!(*max_retries, 3);
            assert_eq!(error_kind, "rate_limit");
        }
        _ => unreachable!(),
    }

    assert_eq!(token_text(&events), "finally");
    assert_eq!(events.last().unwrap(), &AgentEvent::Done);
}

#[tokio::test]
async fn auth_failure_is_fatal_and_leaves_only_user_turn() {
    let provider = ScriptedProvider::new(vec![ScriptedCall::Fail(Error::auth("bad key"))]);
    let agent = agent_with(provider);

    let events = collect_events(
        agent.stream_message("hello", "s1", None).await.unwrap(),
    )
    .await;

    // Zero retries, exactly one error event, no done.
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Retry { .. })));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::Done)));
    match events.last().unwrap() {
        AgentEvent::Error {
            error_type,
            message,
        } => {
            assert_eq!(error_type, "auth");
            assert!(message.contains("bad key"));
        }
        other => panic!("expected error event, got {other:?}"),
    }

    let history = agent.sessions().load("s1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, MessageRole::User);
}

#[tokio::test]
async fn fatal_mid_stream_error_persists_partial_text() {
    // The stream yields some text then dies with a non-retriable error.
    let provider = ScriptedProvider::new(vec![ScriptedCall::Stream(vec![
        StreamDelta::Text("partial ans".to_string()),
        // Injected transport failure mid-stream.
    ])]);
    let agent = agent_with(provider);

    let events = collect_events(
        agent.stream_message("hello", "s1", None).await.unwrap(),
    )
    .await;

    assert_eq!(token_text(&events), "partial ans");
    assert!(matches!(events.last().unwrap(), AgentEvent::Error { .. }));

    // Partial assistant text was persisted after the user turn.
    let history = agent.sessions().load("s1").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, MessageRole::Assistant);
    assert_eq!(history[1].text(), "partial ans");
}

#[tokio::test]
async fn max_iterations_appends_synthetic_turn() {
    // Every call requests another tool use; the cap has to end it.
    let mut calls = Vec::new();
    for i in 0..10 {
        calls.push(tool_turn(
            None,
            vec![ToolUseBlock::new(
                format!("toolu_{i}"),
                "probe",
                json!({}),
            )],
            usage(10, 2),
        ));
    }
    let provider = ScriptedProvider::new(calls);

    let provider_cfg = agent_core::ProviderConfig::builder()
        .model("claude-sonnet-4-5")
        .api_key("sk-test")
        .build()
        .unwrap();
    let config = agent_core::AgentCoreConfig::builder(provider_cfg)
        .max_iterations(3)
        .build()
        .unwrap();
    let agent = Agent::builder(config)
        .provider(Arc::new(provider))
        .build()
        .unwrap();
    agent
        .tools()
        .register(tool("probe", "probe").build(|_| async { Ok(ToolOutput::text("ok")) }))
        .unwrap();

    let events = collect_events(
        agent.stream_message("loop forever", "s1", None).await.unwrap(),
    )
    .await;
    assert_eq!(events.last().unwrap(), &AgentEvent::Done);

    let history = agent.sessions().load("s1").await.unwrap();
    assert_eq!(history.last().unwrap().text(), "[max iterations reached]");
    assert_tool_pairing(&history);
    // 1 user + 3 iterations × (assistant + tool_results) + synthetic turn.
    assert_eq!(history.len(), 8);
}

#[tokio::test]
async fn skills_enrich_the_system_prompt() {
    let provider = Arc::new(ScriptedProvider::new(vec![text_turn(&["ok"], usage(10, 2))]));
    let agent = Agent::builder(test_config())
        .provider(provider.clone())
        .build()
        .unwrap();
    agent
        .skills()
        .register(agent_core::Skill::new(
            "haiku",
            "answer in haiku form",
            "Every answer must be a 5-7-5 haiku.",
        ))
        .unwrap();
    agent.skills().activate("haiku").unwrap();

    collect_events(agent.stream_message("hi", "s1", None).await.unwrap()).await;

    let captured = provider.captured();
    let system = &captured[0].system;
    assert!(system.starts_with("You are a test assistant"));
    assert!(system.contains("Available skills:\n- haiku: answer in haiku form"));
    assert!(system.contains("Every answer must be a 5-7-5 haiku."));
    // The auto-registered pagination tool rode along in the definitions.
    assert!(captured[0].tool_names.contains(&"read_more".to_string()));
}
