//! Live provider smoke tests. Need network access and credentials.
//!
//! Run with: `OPENAI_API_KEY=... GOOGLE_API_KEY=... cargo test --features live_llm --test live_provider -- --nocapture`

#![cfg(feature = "live_llm")]

use targetlabel::{CompiledPrompt, ProviderRegistry, ProvidersConfig};

#[tokio::test]
async fn openai_returns_text_for_a_short_prompt() {
    let registry = ProviderRegistry::from_config(&ProvidersConfig::default());
    let prompt = CompiledPrompt::Text(
        r#"Reply with exactly this JSON and nothing else: {"RankedTopics":[{"Topic":"Kinase","Confidence":1}]}"#
            .to_string(),
    );
    let params = serde_json::json!({"temperature": 0})
        .as_object()
        .cloned()
        .unwrap();

    let text = registry
        .invoke("openai", "gpt-4o-mini", &prompt, &params)
        .await
        .expect("live call should succeed");
    println!("completion: {text}");
    assert!(text.contains("RankedTopics"));
}

#[tokio::test]
async fn gemini_returns_text_for_a_short_prompt() {
    let registry = ProviderRegistry::from_config(&ProvidersConfig::default());
    let prompt = CompiledPrompt::Text(
        r#"What are the three most popular programming languages? Respond in valid JSON like {"languages": [...]}"#
            .to_string(),
    );
    let params = serde_json::json!({"temperature": 0, "max_tokens": 200})
        .as_object()
        .cloned()
        .unwrap();

    let text = registry
        .invoke("gemini", "gemini-1.5-flash", &prompt, &params)
        .await
        .expect("live call should succeed");
    println!("completion: {text}");
    assert!(text.contains("languages"));
}
