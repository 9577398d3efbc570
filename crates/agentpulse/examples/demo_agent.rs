//! Demo of tracing a small research agent.
//!
//! Points at the collector from `AGENTPULSE_ENDPOINT` (default
//! `http://localhost:3000`); with no collector running the run still
//! completes and delivery failures are logged.

use std::time::Duration;

use agentpulse::{Config, SpanKind, TraceOptions, calculate_cost, tool, traced};

async fn search_web(query: &str) -> Result<Vec<String>, String> {
    tool("search_web", async {
        // Simulate a search API call.
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok(vec![
            format!("{query}: overview"),
            format!("{query}: deep dive"),
        ])
    })
    .await
}

async fn summarize(docs: &[String]) -> Result<String, String> {
    let client = agentpulse::get_client().expect("client initialized in main");
    client
        .with_span_async("chat_completion", SpanKind::Llm, |span| async move {
            span.set_model("gpt-4o-mini");
            span.set_input(serde_json::json!({ "documents": docs.len() }));

            // Simulate the LLM round trip and its reported usage.
            tokio::time::sleep(Duration::from_millis(80)).await;
            let (tokens_in, tokens_out) = (1200, 300);
            span.set_tokens(tokens_in, tokens_out);
            span.set_cost(calculate_cost("gpt-4o-mini", tokens_in, tokens_out));

            let summary = format!("summary of {} documents", docs.len());
            span.set_output(&summary);
            Ok(summary)
        })
        .await
}

#[tokio::main]
async fn main() {
    let client = agentpulse::init(Config::from_env()).unwrap();

    let options = TraceOptions::new()
        .name("research-agent")
        .metadata(serde_json::json!({ "env": "demo" }));

    let result: Result<String, String> = traced(options, async {
        let docs = search_web("rust observability").await?;
        summarize(&docs).await
    })
    .await;

    println!("agent result: {result:?}");

    client.shutdown().await;
}
