//! fedcoord coordinator daemon.
//!
//! Wires the orchestration engine into a running service:
//! - `tasks`: the actor framework (message envelopes, handles, task trait)
//! - `engine`: the single-writer task owning all coordinator state
//! - `api`: the operation request/response types of the API facade
//! - `server`: the UDP JSON command server exposing the facade

pub mod api;
pub mod engine;
pub mod server;
pub mod tasks;

pub use api::{ApiRequest, ApiResponse};
pub use engine::EngineTask;
pub use server::ApiServer;
pub use tasks::{EngineMessage, Task, TaskHandle, TaskMessage, DEFAULT_CHANNEL_CAPACITY};
