//! Performance benchmarks for the hot paths a busy loop leans on:
//! token estimation, call summarization, and result pagination.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;

use agent_core::{
    ContentBlock, Message, ToolOutput, ToolRegistry, ToolRegistryOptions, ToolResultBlock,
    ToolUseBlock, estimate_tokens, summarize_call, tool,
};

fn build_history(turns: usize) -> Vec<Message> {
    let mut history = Vec::new();
    for i in 0..turns {
        history.push(Message::user(format!("question {i}: {}", "words ".repeat(50))));
        history.push(Message::assistant(vec![
            ContentBlock::text(format!("answer {i}: {}", "words ".repeat(80))),
            ContentBlock::ToolUse(ToolUseBlock::new(
                format!("toolu_{i}"),
                "read_file",
                json!({"path": format!("src/file_{i}.rs")}),
            )),
        ]));
        history.push(Message::user_with_blocks(vec![ContentBlock::ToolResult(
            ToolResultBlock::new(format!("toolu_{i}"), "contents ".repeat(100)),
        )]));
    }
    history
}

fn bench_estimate_tokens(c: &mut Criterion) {
    let history = build_history(50);
    c.bench_function("estimate_tokens_150_messages", |b| {
        b.iter(|| estimate_tokens(black_box(&history)))
    });
}

fn bench_summarize_call(c: &mut Criterion) {
    let input = json!({
        "path": "src/very/long/path/to/a/file.rs",
        "pattern": "fn .*_tokens",
        "max_results": 200,
    });
    c.bench_function("summarize_call", |b| {
        b.iter(|| summarize_call(black_box("grep"), black_box(&input)))
    });
}

fn bench_pagination(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let registry = ToolRegistry::new(ToolRegistryOptions::default().with_max_result_chars(1000));
    registry
        .register(
            tool("dump", "large output")
                .build(|_| async { Ok(ToolOutput::Text("x".repeat(100_000))) }),
        )
        .unwrap();

    c.bench_function("paginate_100k_chars", |b| {
        b.iter(|| {
            runtime.block_on(async {
                black_box(registry.execute("dump", json!({})).await);
            })
        })
    });
}

criterion_group!(
    benches,
    bench_estimate_tokens,
    bench_summarize_call,
    bench_pagination
);
criterion_main!(benches);
