//! Quill Relay - conversation relay and memory subsystem for AI research assistants
//!
//! This library is the component between a chat-style web front end and an
//! external research/compute service:
//! - Conversation store (threads, messages, source citations)
//! - Two-tier memory (TTL scratch cache + durable memory log)
//! - Context assembly for bounded conversation history
//! - Relay orchestration (blocking and streaming turns)
//! - Stream framing for the upstream event protocol
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Web front end                        │
//! │        (accounts, thread CRUD, rendering)            │
//! └────────────────────┬────────────────────────────────┘
//!                      │ JSON / SSE
//! ┌────────────────────▼────────────────────────────────┐
//! │                  Quill Relay                         │
//! │  Orchestrator │ Store │ Memory │ Context │ Framing  │
//! └────────────────────┬────────────────────────────────┘
//!                      │ JSON / event stream
//! ┌────────────────────▼────────────────────────────────┐
//! │            Research compute service                  │
//! │        (agents, search, synthesis)                   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod relay;
pub mod sweeper;
pub mod upstream;

pub use cache::ScratchCache;
pub use config::Config;
pub use context::{ContextBuilder, ContextConfig, TurnContext};
pub use db::{ConversationRepo, DbConn, DbPool, MemoryRepo};
pub use error::{Error, Result};
pub use relay::{MessageDto, Relay, RelayEvent, Turn};
pub use upstream::{ComputeService, HttpComputeService, StreamDecoder, UpstreamEvent};
