//! # genai-client
//!
//! Client SDK core for a remote generative-AI service: text, chat, multimodal, embedding,
//! file, caching, semantic-retrieval, permission and tuned-model resources.
//!
//! ## Overview
//!
//! The crate turns permissive user inputs into the service's wire types, builds requests from
//! a model bundle plus per-call overrides, aggregates streamed partial responses into a
//! coherent whole, and keeps the turn history of a multiturn chat consistent even when a
//! response is blocked, interrupted or abandoned mid-stream.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use genai_client::Client;
//!
//! #[tokio::main]
//! async fn main() -> genai_client::Result<()> {
//!     let client = Client::from_env()?;
//!     let model = Arc::new(client.generative_model("gemini-1.5-flash")?);
//!
//!     let response = model.generate_content("Write a haiku about rust.").await?;
//!     println!("{}", response.text()?);
//!
//!     let mut chat = model.start_chat(Vec::new())?;
//!     let stream = chat.send_stream("Tell me a story").await?;
//!     let mut chunks = stream.chunks();
//!     while let Some(chunk) = chunks.next().await {
//!         print!("{}", chunk?.text()?);
//!     }
//!     println!("\n{} turns", chat.history()?.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`error`] | Error taxonomy shared by every operation |
//! | [`types`] | Wire types (content, generation, safety, tools) |
//! | [`coerce`] | Permissive input coercion into wire types |
//! | [`names`] | Resource-name grammar and slug validation |
//! | [`client`] | Client handle, configuration, default client, per-call options |
//! | [`transport`] | Transport trait and the REST/SSE implementation |
//! | [`model`] | `GenerativeModel` and the request builder |
//! | [`response`] | Unary and streaming response aggregation |
//! | [`chat`] | Multiturn chat sessions |
//! | [`operation`] | Long-running operations |
//! | [`resources`] | Files, caches, corpora, permissions, models, tuned models, embeddings |

pub mod chat;
pub mod client;
pub mod coerce;
pub mod error;
pub mod model;
pub mod names;
pub mod operation;
pub mod resources;
pub mod response;
pub mod transport;
pub mod types;

pub use chat::ChatSession;
pub use client::{configure, default_client, Client, ClientBuilder, ClientOptions, RequestOptions};
pub use error::{Error, ErrorContext};
pub use model::{CallOptions, GenerativeModel};
pub use operation::{Operation, OperationState};
pub use response::{GenerationResponse, StreamingResponse};
pub use types::{Content, Part, Role};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
