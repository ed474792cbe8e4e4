//! Chat session behaviour against a scripted transport.

mod common;

use std::sync::Arc;

use common::{finish_chunk, text_chunk, text_response, ScriptedTransport};
use futures::StreamExt;
use genai_client::coerce::CallableFunctionDeclaration;
use genai_client::transport::TransportError;
use genai_client::types::{FunctionResponse, Part, Role};
use genai_client::{ChatSession, Content, Error, GenerativeModel};
use serde_json::json;
use tokio_test::{assert_err, assert_ok};

fn session(transport: &Arc<ScriptedTransport>) -> ChatSession {
    let model = Arc::new(transport.client().generative_model("M").unwrap());
    model.start_chat(Vec::new()).unwrap()
}

#[tokio::test]
async fn test_simple_unary_send() {
    let transport = ScriptedTransport::new();
    transport.push_json(text_response("world!"));
    let mut chat = session(&transport);

    let response = chat.send("Hello").await.unwrap();
    assert_eq!(response.text().unwrap(), "world!");

    let call = transport.last_call();
    assert_eq!(call.path, "models/M:generateContent");
    let body = call.body.unwrap();
    assert_eq!(
        body["contents"],
        json!([{"role": "user", "parts": [{"text": "Hello"}]}])
    );

    assert_eq!(chat.history().unwrap().len(), 2);
    assert_eq!(chat.last().unwrap().unwrap().text().unwrap(), "world!");
}

#[tokio::test]
async fn test_blocked_prompt_leaves_history_untouched() {
    let transport = ScriptedTransport::new();
    transport.push_json(text_response("hi"));
    transport.push_json(json!({"promptFeedback": {"blockReason": "SAFETY"}}));
    let mut chat = session(&transport);

    chat.send("hello").await.unwrap();
    let err = chat.send("bad").await.unwrap_err();
    assert!(matches!(err, Error::BlockedPrompt { .. }), "{:?}", err);
    assert_eq!(chat.history().unwrap().len(), 2);

    // No rewind needed before the next exchange.
    transport.push_json(text_response("fine"));
    chat.send("ok then").await.unwrap();
    assert_eq!(chat.history().unwrap().len(), 4);
}

#[tokio::test]
async fn test_streamed_turn_commits_after_drain() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![
        Ok(text_chunk("a")),
        Ok(text_chunk("b")),
        Ok(text_chunk("c")),
    ]);
    let mut chat = session(&transport);

    let response = chat.send_stream("letters?").await.unwrap();
    assert!(matches!(chat.history(), Err(Error::IncompleteIteration)));

    let texts: Vec<String> = response
        .chunks()
        .map(|c| c.unwrap().text().unwrap())
        .collect()
        .await;
    assert_eq!(texts.concat(), "abc");
    assert_eq!(response.text().unwrap(), "abc");

    let history = chat.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].role, Some(Role::Model));
    assert_eq!(history[1].text(), "abc");
}

#[tokio::test]
async fn test_stream_safety_stop_breaks_session_until_rewind() {
    let transport = ScriptedTransport::new();
    transport.push_json(text_response("earlier"));
    transport.push_stream(vec![
        Ok(text_chunk("a")),
        Ok(text_chunk("b")),
        Ok(text_chunk("c")),
        Ok(finish_chunk("SAFETY")),
    ]);
    let mut chat = session(&transport);
    chat.send("first").await.unwrap();

    let response = chat.send_stream("tell me").await.unwrap();
    let items: Vec<_> = response.chunks().collect().await;
    assert_eq!(items.iter().filter(|i| i.is_ok()).count(), 4);
    assert!(matches!(items.last(), Some(Err(Error::StopCandidate { .. }))));

    let err = chat.send("again").await.unwrap_err();
    assert!(matches!(err, Error::BrokenResponse { .. }), "{:?}", err);
    assert!(matches!(chat.history(), Err(Error::BrokenResponse { .. })));
    assert!(matches!(chat.fork(), Err(Error::BrokenResponse { .. })));

    let (sent, partial) = chat.rewind().unwrap();
    assert_eq!(sent.text(), "tell me");
    assert_eq!(partial.text(), "abc");
    assert_eq!(chat.history().unwrap().len(), 2);

    transport.push_json(text_response("recovered"));
    chat.send("again").await.unwrap();
    assert_eq!(chat.history().unwrap().len(), 4);
}

#[tokio::test]
async fn test_empty_reply_is_not_committed() {
    let transport = ScriptedTransport::new();
    transport.push_json(json!({"candidates": [{"index": 0, "finishReason": "STOP"}]}));
    transport.push_json(text_response("ok"));
    let mut chat = session(&transport);

    let err = chat.send("hello").await.unwrap_err();
    assert!(
        matches!(err, Error::Transport(TransportError::Protocol(_))),
        "{:?}",
        err
    );
    assert!(chat.history().unwrap().is_empty());
    assert!(chat.last().unwrap().is_none());

    chat.send("hello again").await.unwrap();
    let history = chat.history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text(), "hello again");
    assert_eq!(history[1].text(), "ok");
}

#[tokio::test]
async fn test_empty_streamed_reply_breaks_session() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![Ok(finish_chunk("STOP"))]);
    transport.push_json(text_response("ok"));
    let mut chat = session(&transport);

    let response = chat.send_stream("hello").await.unwrap();
    let items: Vec<_> = response.chunks().collect().await;
    assert_eq!(items.len(), 1);

    assert!(matches!(chat.history(), Err(Error::BrokenResponse { .. })));
    let (sent, partial) = chat.rewind().unwrap();
    assert_eq!(sent.text(), "hello");
    assert!(partial.parts.is_empty());
    assert!(chat.history().unwrap().is_empty());

    chat.send("hello").await.unwrap();
    assert_eq!(chat.history().unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancelled_stream_is_discarded() {
    let transport = ScriptedTransport::new();
    transport.push_stream(vec![Ok(text_chunk("a")), Ok(text_chunk("b"))]);
    let mut chat = session(&transport);

    let response = chat.send_stream("go").await.unwrap();
    response.cancel();
    assert!(chat.history().unwrap().is_empty());
}

#[tokio::test]
async fn test_function_call_round_trip() {
    let transport = ScriptedTransport::new();
    transport.push_json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"functionCall": {"name": "datetime", "args": {}}}]},
            "finishReason": "STOP"
        }]
    }));
    transport.push_json(text_response("It is noon."));

    let datetime = CallableFunctionDeclaration::no_args("datetime", "Current time.", || {
        Ok("2024-05-01T12:00:00Z")
    })
    .unwrap();
    let model = Arc::new(
        transport
            .client()
            .generative_model("M")
            .unwrap()
            .with_tools(datetime)
            .unwrap(),
    );
    let mut chat = model.start_chat(Vec::new()).unwrap();

    let response = chat.send("what time is it?").await.unwrap();
    let calls = response.function_calls().unwrap();
    assert_eq!(calls.len(), 1);
    let part = model.tools().unwrap().call(calls[0]).unwrap().unwrap();
    assert_eq!(
        part,
        Part::FunctionResponse(FunctionResponse {
            name: "datetime".into(),
            response: json!({"result": "2024-05-01T12:00:00Z"})
                .as_object()
                .cloned()
                .unwrap(),
        })
    );

    chat.send(part.clone()).await.unwrap();
    let history = chat.history().unwrap();
    assert_eq!(history.len(), 4);
    assert_eq!(history[history.len() - 2].parts, vec![part]);
}

#[tokio::test]
async fn test_automatic_function_calling() {
    let transport = ScriptedTransport::new();
    transport.push_json(json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"functionCall": {"name": "datetime", "args": {}}}]},
            "finishReason": "STOP"
        }]
    }));
    transport.push_json(text_response("It is noon."));

    let datetime =
        CallableFunctionDeclaration::no_args("datetime", "Current time.", || Ok("noon")).unwrap();
    let model = Arc::new(
        GenerativeModel::new(transport.client(), "M")
            .unwrap()
            .with_tools(datetime)
            .unwrap(),
    );
    let mut chat = model
        .start_chat(Vec::new())
        .unwrap()
        .enable_automatic_function_calling();

    let response = chat.send("time?").await.unwrap();
    assert_eq!(response.text().unwrap(), "It is noon.");
    assert_eq!(transport.calls().len(), 2);

    let history = chat.history().unwrap();
    assert_eq!(history.len(), 4);
    assert!(matches!(history[2].parts[0], Part::FunctionResponse(_)));

    assert!(chat.send_stream("stream?").await.is_err());
}

#[tokio::test]
async fn test_fork_and_rewind() {
    let transport = ScriptedTransport::new();
    transport.push_json(text_response("one"));
    transport.push_json(text_response("two"));
    let mut chat = session(&transport);
    chat.send("1").await.unwrap();

    let mut forked = chat.fork().unwrap();
    forked.send("2").await.unwrap();
    assert_eq!(forked.history().unwrap().len(), 4);
    assert_eq!(chat.history().unwrap().len(), 2);

    let (user, model) = forked.rewind().unwrap();
    assert_eq!(user.text(), "2");
    assert_eq!(model.text(), "two");
    assert_eq!(forked.history().unwrap().len(), 2);
    assert_ok!(chat.rewind());
    assert_err!(chat.rewind());
}

#[tokio::test]
async fn test_set_history_validates_roles() {
    let transport = ScriptedTransport::new();
    let mut chat = session(&transport);
    let err = assert_err!(chat.set_history(vec![Content::model("hi"), Content::user("hello")]));
    assert!(matches!(err, Error::AuthorSequence { .. }));
    assert_ok!(chat.set_history(vec![Content::user("a"), Content::model("b")]));
    assert_eq!(chat.history().unwrap().len(), 2);

    let err = chat.send(Content::model("not mine")).await.unwrap_err();
    assert!(matches!(err, Error::AuthorSequence { .. }));
    assert!(transport.calls().is_empty());
}
