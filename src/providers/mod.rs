//! External collaborators the engine calls out to, modeled as capability
//! traits rather than a concrete vendor adapter. This crate ships no HTTP
//! client; a caller supplies an implementation of both traits.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider call timed out")]
    Timeout,
    #[error("provider call failed: {0}")]
    Failed(String),
}

/// One turn of chat history.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// A structured tool invocation a director/writer reply may carry.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub tool_names: Vec<String>,
    pub deadline: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

/// One chunk of a streamed chat reply. A stream is modeled as an owned
/// vector rather than a boxed `Stream` so the trait stays object-safe
/// without pulling in `futures`; callers that want incremental delivery can
/// iterate `ChatStream::chunks` as they arrive from their own transport.
#[derive(Debug, Clone, Default)]
pub struct ChatStream {
    pub chunks: Vec<String>,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatStream {
    pub fn full_text(&self) -> String {
        self.chunks.concat()
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
    fn dimension(&self) -> usize;
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
    async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream, ProviderError>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! Deterministic in-memory provider implementations so the engine's turn
    //! pipeline, undo/redo, and retry logic are testable without a network
    //! provider.
    use super::*;
    use parking_lot::Mutex;

    /// Hash-based embedding: deterministic, not semantically meaningful, but
    /// stable for a given input and a fixed dimension.
    pub struct FakeEmbeddingProvider {
        pub dim: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeEmbeddingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
            let mut seed: u64 = 1469598103934665603;
            for b in text.bytes() {
                seed ^= b as u64;
                seed = seed.wrapping_mul(1099511628211);
            }
            let mut v = Vec::with_capacity(self.dim);
            let mut s = seed;
            for _ in 0..self.dim {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
                let f = ((s >> 40) as i32 % 2000 - 1000) as f32 / 1000.0;
                v.push(f);
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            self.dim
        }
    }

    /// Replies with a scripted queue of responses, popped front-first.
    pub struct ScriptedChatProvider {
        pub replies: Mutex<std::collections::VecDeque<ChatResponse>>,
    }

    impl ScriptedChatProvider {
        pub fn new(replies: Vec<ChatResponse>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    #[async_trait]
    impl ChatProvider for ScriptedChatProvider {
        async fn chat(&self, _req: ChatRequest) -> Result<ChatResponse, ProviderError> {
            self.replies
                .lock()
                .pop_front()
                .ok_or_else(|| ProviderError::Failed("no more scripted replies".into()))
        }

        async fn chat_stream(&self, req: ChatRequest) -> Result<ChatStream, ProviderError> {
            let resp = self.chat(req).await?;
            Ok(ChatStream {
                chunks: vec![resp.text],
                tool_calls: resp.tool_calls,
            })
        }
    }
}
