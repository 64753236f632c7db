pub mod backend;
pub mod client;
pub mod types;
pub mod utils;

pub use backend::{ChatBackend, Endpoint, HttpBackend};
pub use client::{effective_max_tokens, CancelToken, ChunkCallback, GenerationClient};
pub use types::*;
pub use utils::RetryPolicy;
