//! Streaming generation through `GenerativeModel`.

mod common;

use common::{finish_chunk, text_chunk, ScriptedTransport};
use futures::StreamExt;
use genai_client::error::RemoteKind;
use genai_client::Error;
use serde_json::json;

#[tokio::test]
async fn test_stream_concatenation_and_replay() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![
        Ok(text_chunk("a")),
        Ok(text_chunk("b")),
        Ok(text_chunk("c")),
        Ok(finish_chunk("STOP")),
    ]);
    let model = transport.client().generative_model("gemini-pro").unwrap();

    let response = model.generate_content_stream("letters?").await.unwrap();
    assert_eq!(transport.last_call().path, "models/gemini-pro:streamGenerateContent");
    assert!(matches!(response.text(), Err(Error::IncompleteIteration)));

    response.resolve().await.unwrap();
    assert_eq!(response.text().unwrap(), "abc");
    assert_eq!(response.buffered_chunks(), 4);

    // A second iterator replays from the buffer.
    let replayed: Vec<_> = response.chunks().collect().await;
    assert_eq!(replayed.len(), 4);
    assert!(replayed.iter().all(|c| c.is_ok()));
}

#[tokio::test]
async fn test_midstream_error_surfaces_after_buffered_chunks() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![
        Ok(text_chunk("partial")),
        Err(Error::Remote {
            status: 503,
            kind: RemoteKind::Unavailable,
            message: "backend went away".into(),
            retryable: true,
            retry_after_ms: None,
        }),
    ]);
    let model = transport.client().generative_model("gemini-pro").unwrap();
    let response = model.generate_content_stream("hi").await.unwrap();

    let mut chunks = response.chunks();
    assert_eq!(chunks.next().await.unwrap().unwrap().text().unwrap(), "partial");
    let err = chunks.next().await.unwrap().unwrap_err();
    assert!(err.is_retryable());
    assert!(chunks.next().await.is_none());

    assert!(response.is_done());
    assert_eq!(response.snapshot().text().unwrap(), "partial");
    assert!(response.resolve().await.is_err());
}

#[tokio::test]
async fn test_usage_metadata_comes_from_last_chunk() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![
        Ok(text_chunk("x")),
        Ok(json!({
            "candidates": [{"index": 0, "content": {"role": "model", "parts": [{"text": "y"}]}, "finishReason": "STOP"}],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        })),
    ]);
    let model = transport.client().generative_model("gemini-pro").unwrap();
    let response = model.generate_content_stream("hi").await.unwrap();
    response.resolve().await.unwrap();

    assert_eq!(response.text().unwrap(), "xy");
    assert_eq!(response.usage_metadata().unwrap().total_token_count, 5);
}
