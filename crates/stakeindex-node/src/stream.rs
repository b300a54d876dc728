//! Polling head stream — the subscription variant of head tracking.
//!
//! Yields each new head exactly once, deduplicated by hash. Errors are
//! logged and polling continues; dropping the stream stops it.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use stakeindex_core::node::{NodeHeader, NodeSource};

/// A long-lived stream of new heads, as an alternative to polling the node
/// directly from the observer.
pub fn head_stream<N: NodeSource>(
    node: Arc<N>,
    poll_interval: Duration,
) -> impl Stream<Item = NodeHeader> {
    futures::stream::unfold((node, None::<String>), move |(node, last_hash)| async move {
        loop {
            match node.get_head().await {
                Ok(header) if last_hash.as_deref() != Some(header.hash.as_str()) => {
                    let hash = header.hash.clone();
                    return Some((header, (node, Some(hash))));
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "head poll failed");
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    })
}
