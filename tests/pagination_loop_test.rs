//! Oversized tool results flowing through the live loop: the model sees
//! page 1 and pulls the rest through `read_more`.

mod common;

use std::sync::Arc;

use serde_json::json;

use agent_core::{
    Agent, AgentEvent, ContentBlock, ToolOutput, ToolRegistry, ToolRegistryOptions, ToolUseBlock,
    tool,
};
use common::*;

#[tokio::test]
async fn oversized_result_is_paginated_for_the_model() {
    let registry = Arc::new(ToolRegistry::new(
        ToolRegistryOptions::default().with_max_result_chars(10),
    ));
    registry
        .register(
            tool("dump", "dump 35 characters")
                .build(|_| async { Ok(ToolOutput::Text("ABCDEFGHIJKLMNOPQRSTUVWXYZ123456789".into())) }),
        )
        .unwrap();

    let provider = ScriptedProvider::new(vec![
        tool_turn(
            None,
            vec![ToolUseBlock::new("toolu_1", "dump", json!({}))],
            usage(20, 5),
        ),
        text_turn(&["got page one"], usage(40, 5)),
    ]);
    let agent = Agent::builder(test_config())
        .provider(Arc::new(provider))
        .tools(registry.clone())
        .build()
        .unwrap();

    let events = collect_events(
        agent.stream_message("dump it", "s1", None).await.unwrap(),
    )
    .await;
    assert_eq!(events.last().unwrap(), &AgentEvent::Done);

    // The persisted tool_result is page 1 of 4 with the verbatim footer.
    let history = agent.sessions().load("s1").await.unwrap();
    let page_one = match &history[2].content[0] {
        ContentBlock::ToolResult(r) => r.content.as_text(),
        other => panic!("expected tool_result, got {other:?}"),
    };
    assert!(page_one.starts_with("ABCDEFGHIJ"));
    assert!(page_one.contains("[Page 1/4]"));
    assert!(page_one.contains("call read_more(result_id="));

    // The model can keep reading through read_more: page 4 is the final
    // 5 characters plus the bare footer.
    let id_start = page_one.find("result_id=").unwrap() + "result_id=".len();
    let id_end = page_one[id_start..].find(',').unwrap() + id_start;
    let result_id = &page_one[id_start..id_end];

    let last = registry
        .execute("read_more", json!({"result_id": result_id, "page": 4}))
        .await;
    assert!(!last.is_error);
    assert_eq!(last.content.as_text(), "56789\n\n[Page 4/4]");

    let over = registry
        .execute("read_more", json!({"result_id": result_id, "page": 5}))
        .await;
    assert!(over.is_error);
    assert_eq!(over.content.as_text(), "error: page out of range");
}
