//! stakeindex-node — HTTP implementation of the node interface.
//!
//! Wraps a chain node's REST API behind [`stakeindex_core::NodeSource`]
//! with bounded request timeouts, retry with exponential backoff and
//! jitter, and a polling head stream as the subscription variant.

pub mod client;
pub mod retry;
pub mod stream;

pub use client::{HttpNodeClient, NodeClientConfig};
pub use retry::{RetryConfig, RetryPolicy};
pub use stream::head_stream;
