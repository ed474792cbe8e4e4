//! Unary generation through a model bundle.

mod common;

use common::{text_response, ScriptedTransport};
use genai_client::transport::TransportError;
use genai_client::types::GenerationConfig;
use genai_client::Error;
use serde_json::json;

fn candidate(index: u32, text: &str) -> serde_json::Value {
    json!({
        "index": index,
        "content": {"role": "model", "parts": [{"text": text}]},
        "finishReason": "STOP"
    })
}

#[tokio::test]
async fn test_candidates_within_requested_count() {
    let transport = ScriptedTransport::new();
    transport.push_json(json!({"candidates": [candidate(0, "a"), candidate(1, "b")]}));
    let model = transport
        .client()
        .generative_model("M")
        .unwrap()
        .with_generation_config(GenerationConfig::new().candidate_count(2))
        .unwrap();

    let response = model.generate_content("two please").await.unwrap();
    assert_eq!(response.candidates().len(), 2);
    assert_eq!(
        transport.last_call().body.unwrap()["generationConfig"]["candidateCount"],
        2
    );
}

#[tokio::test]
async fn test_too_many_candidates_is_protocol_error() {
    let transport = ScriptedTransport::new();
    transport.push_json(json!({
        "candidates": [candidate(0, "a"), candidate(1, "b"), candidate(2, "c")]
    }));
    let model = transport
        .client()
        .generative_model("M")
        .unwrap()
        .with_generation_config(GenerationConfig::new().candidate_count(2))
        .unwrap();

    let err = model.generate_content("two please").await.unwrap_err();
    assert!(
        matches!(err, Error::Transport(TransportError::Protocol(_))),
        "{:?}",
        err
    );
}

#[tokio::test]
async fn test_duplicate_candidate_index_is_protocol_error() {
    let transport = ScriptedTransport::new();
    transport.push_json(json!({"candidates": [candidate(0, "a"), candidate(0, "b")]}));
    let model = transport
        .client()
        .generative_model("M")
        .unwrap()
        .with_generation_config(GenerationConfig::new().candidate_count(2))
        .unwrap();

    let err = model.generate_content("two please").await.unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Protocol(_))));
}

#[tokio::test]
async fn test_default_request_allows_one_candidate() {
    let transport = ScriptedTransport::new();
    transport.push_json(text_response("one"));
    transport.push_json(json!({"candidates": [candidate(0, "a"), candidate(1, "b")]}));
    let model = transport.client().generative_model("M").unwrap();

    assert_eq!(model.generate_content("hi").await.unwrap().text().unwrap(), "one");
    assert!(model.generate_content("hi").await.is_err());
}
