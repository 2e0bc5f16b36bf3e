use criterion::{black_box, criterion_group, criterion_main, Criterion};
use deep_research_engine::cost::CostAccumulator;
use deep_research_engine::llm::{Message, TokenUsage, ToolCall};
use deep_research_engine::truncate::{truncate_messages, CharEstimateCounter, TiktokenCounter};
use serde_json::json;

fn research_transcript(turns: usize) -> Vec<Message> {
    let mut messages = vec![Message::system("You are a research assistant.")];
    for i in 0..turns {
        let call_id = format!("call_{i}");
        messages.push(Message::assistant_with_tools(
            "",
            vec![ToolCall::new(&call_id, "web_search", json!({ "queries": [format!("query {i}")] }))],
        ));
        messages.push(Message::tool_result(&call_id, "Title: result\nURL: https://example.com\n".repeat(40)));
    }
    messages.push(Message::user("Summarize the findings."));
    messages
}

fn bench_truncation(c: &mut Criterion) {
    let transcript = research_transcript(200);

    c.bench_function("truncate_char_estimate", |b| {
        b.iter(|| truncate_messages(black_box(&transcript), 16_000, &CharEstimateCounter))
    });

    if let Ok(counter) = TiktokenCounter::new() {
        c.bench_function("truncate_tiktoken", |b| {
            b.iter(|| truncate_messages(black_box(&transcript), 16_000, &counter))
        });
    }
}

fn bench_cost_totals(c: &mut Criterion) {
    let costs = CostAccumulator::default();
    for i in 0..1_000u64 {
        costs.add_llm_cost("gpt-4o-mini", TokenUsage::new(1_000 + i, 200), "deep-research-researcher");
        costs.add_api_cost("tavily", 1);
    }

    c.bench_function("total_cost_cents_2000_entries", |b| {
        b.iter(|| black_box(&costs).total_cost_cents())
    });
}

criterion_group!(benches, bench_truncation, bench_cost_totals);
criterion_main!(benches);
