//! Bounded-parallelism batch scheduler
//!
//! Independent per-backend tasks run in sequential batches of fixed width.
//! This caps concurrent outbound calls without serializing a whole round.

use futures::future::join_all;
use std::future::Future;
use tracing::debug;

/// Default batch width when the caller did not configure one
pub const DEFAULT_BATCH_WIDTH: usize = 4;

/// Run futures in sequential batches of `width`
///
/// Batch `i` fully settles before batch `i+1` starts. Output order matches
/// input order, not completion order. A failing task never cancels its
/// batch siblings: failures must be encoded in `T`.
pub async fn run_in_batches<F, T>(tasks: Vec<F>, width: usize) -> Vec<T>
where
    F: Future<Output = T>,
{
    let width = width.max(1);
    let total = tasks.len();
    let mut results = Vec::with_capacity(total);
    let mut remaining = tasks;

    let mut batch_index = 0;
    while !remaining.is_empty() {
        let take = width.min(remaining.len());
        let batch: Vec<F> = remaining.drain(..take).collect();
        debug!(batch = batch_index, size = take, total, "Running task batch");
        results.extend(join_all(batch).await);
        batch_index += 1;
    }

    results
}
