//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use genai_client::client::RequestOptions;
use genai_client::transport::{ApiCall, FileUpload, Transport};
use genai_client::{BoxStream, Client, Error, Result};
use serde_json::{json, Value};

/// Replays queued responses in order and records every call it receives.
#[derive(Default)]
pub struct ScriptedTransport {
    unary: Mutex<VecDeque<Result<Value>>>,
    streams: Mutex<VecDeque<Vec<Result<Value>>>>,
    calls: Mutex<Vec<ApiCall>>,
    uploads: Mutex<Vec<FileUpload>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        init_tracing();
        Arc::new(Self::default())
    }

    pub fn push_unary(&self, response: Result<Value>) {
        self.unary.lock().unwrap().push_back(response);
    }

    pub fn push_json(&self, response: Value) {
        self.push_unary(Ok(response));
    }

    pub fn push_stream(&self, frames: Vec<Result<Value>>) {
        self.streams.lock().unwrap().push_back(frames);
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn last_call(&self) -> ApiCall {
        self.calls().pop().expect("no call recorded")
    }

    pub fn uploads(&self) -> Vec<FileUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn client(self: &Arc<Self>) -> Client {
        Client::with_transport(self.clone())
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn unary(&self, call: ApiCall, _options: &RequestOptions) -> Result<Value> {
        self.record(call);
        self.unary
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::invalid_input("no scripted unary response left")))
    }

    async fn stream(
        &self,
        call: ApiCall,
        _options: &RequestOptions,
    ) -> Result<BoxStream<'static, Value>> {
        self.record(call);
        let frames = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::invalid_input("no scripted stream left"))?;
        Ok(Box::pin(futures::stream::iter(frames)))
    }

    async fn upload(&self, upload: FileUpload, _options: &RequestOptions) -> Result<Value> {
        self.uploads.lock().unwrap().push(upload);
        self.unary
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(Error::invalid_input("no scripted upload response left")))
    }
}

/// Route `tracing` output through the test harness; `RUST_LOG` picks the level.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A response with one model candidate holding `text`.
pub fn text_response(text: &str) -> Value {
    json!({
        "candidates": [{
            "index": 0,
            "content": {"role": "model", "parts": [{"text": text}]},
            "finishReason": "STOP"
        }]
    })
}

/// A streamed chunk with one text part and no finish reason.
pub fn text_chunk(text: &str) -> Value {
    json!({
        "candidates": [{
            "index": 0,
            "content": {"role": "model", "parts": [{"text": text}]}
        }]
    })
}

pub fn finish_chunk(reason: &str) -> Value {
    json!({
        "candidates": [{
            "index": 0,
            "content": {"role": "model", "parts": []},
            "finishReason": reason
        }]
    })
}
