pub mod client;
pub mod error;
pub mod sse;
pub mod stream;
pub mod types;

pub use client::{DEFAULT_BASE_URL, DifyApi, DifyClient};
pub use error::DifyError;
pub use types::{ChatReply, ChatRequest, WorkflowRequest};
