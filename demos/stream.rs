//! Streaming example with a rate-limited model.
//!
//! Run with: PERPLEXITY_API_KEY=... RUST_LOG=perplexity_sdk=debug cargo run --example stream

use perplexity_sdk::{response::collect_text, ChatCompletionRequest, Client, Message};
use tracing_subscriber::EnvFilter;

const MODEL: &str = "llama-3.1-sonar-small-128k-online";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Create client from environment
    let client = Client::from_env()?;
    let model = client.create_chat_completion(MODEL, Some(20_000), Some(20));

    let request = ChatCompletionRequest::new(
        MODEL,
        vec![
            Message::system("You are a helpful assistant. Be concise."),
            Message::user("Write a haiku about Rust programming."),
        ],
    )
    .max_tokens(256)
    .temperature(0.7)
    .stream(true);

    let prompt: String = request.messages.iter().map(|m| m.content.as_str()).collect();
    println!(
        "Estimated price: ${:.6}\n",
        model.estimate_text_price(&prompt, 256)?
    );

    let chunks = model
        .invoke(&request)
        .await?
        .into_chunks()
        .unwrap_or_default();

    println!("{}", collect_text(&chunks));

    let state = model.rate_limiter().snapshot();
    println!("\n--- Stats ---");
    println!("Chunks: {}", chunks.len());
    if let Some(usage) = chunks.last().and_then(|c| c.usage) {
        println!("Input tokens: {}", usage.prompt_tokens);
        println!("Output tokens: {}", usage.completion_tokens);
    }
    println!(
        "Window usage: {} requests, {} tokens",
        state.consumed_requests, state.consumed_tokens
    );

    Ok(())
}
