//! Chunked processing with cooperative yield points
//!
//! Large request or account lists are processed in fixed-size chunks,
//! yielding to the Tokio scheduler between chunks. Items are still handled
//! one at a time and in order, so chunking never changes results: item
//! `k` observes every effect of items `0..k`.

use crate::config::BatchingConfig;
use tracing::trace;

/// Number of chunks `len` items split into
pub fn chunk_count(len: usize, chunk_size: usize) -> usize {
    let chunk_size = chunk_size.max(1);
    (len + chunk_size - 1) / chunk_size
}

/// Apply `f` to every item in order, yielding between chunks
pub async fn process_in_chunks<T, R, F>(items: Vec<T>, config: &BatchingConfig, mut f: F) -> Vec<R>
where
    F: FnMut(T) -> R,
{
    let chunk_size = config.chunk_size.max(1);
    let chunks = chunk_count(items.len(), chunk_size);
    let mut results = Vec::with_capacity(items.len());
    let mut remaining = items.into_iter().peekable();
    let mut chunk_index = 0;

    while remaining.peek().is_some() {
        for item in remaining.by_ref().take(chunk_size) {
            results.push(f(item));
        }
        chunk_index += 1;

        // Yield only between items, never inside one
        if config.yield_between_chunks && remaining.peek().is_some() {
            trace!(chunk = chunk_index, of = chunks, "Yielding between chunks");
            tokio::task::yield_now().await;
        }
    }

    results
}
