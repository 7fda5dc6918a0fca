//! Worker-pool dispatcher for line-delimited streams.
//
//  Each worker owns its engine; the core is unaware of this layer. Bounded
//  channels give natural backpressure: the dispatcher blocks when workers
//  are busy, workers block when the collector falls behind, and the
//  preserve-order reorder buffer stays within a couple of multiples of the
//  worker count.

use std::collections::BTreeMap;
use std::sync::mpsc;
use std::thread;

use log::debug;

use crate::engine::{Options, Projector};
use crate::error::SiftError;
use crate::selection::SelectionNode;
use crate::sink::CollectSink;
use crate::value::JsonValue;
use std::sync::Arc;

/// Per-worker input queue depth; results are bounded at 2x workers.
const WORKER_QUEUE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderingMode {
    /// Deliver results in input order through a bounded reorder buffer.
    #[default]
    Preserve,
    /// Deliver results as workers complete them.
    Relaxed,
}

#[derive(Debug, Clone)]
pub struct ParallelOptions {
    pub workers: usize,
    pub ordering: OrderingMode,
    pub engine: Options,
}

impl Default for ParallelOptions {
    fn default() -> Self {
        ParallelOptions {
            workers: 4,
            ordering: OrderingMode::default(),
            engine: Options::default(),
        }
    }
}

/// Result of one line: its 0-based sequence number and either the line's
/// final projection (None for blank lines) or its error.
pub type LineResult = (u64, Result<Option<JsonValue>, SiftError>);

/// Shard `lines` across a worker pool, one engine per worker, and deliver
/// every line's outcome to `on_result`.
pub fn project_lines<I, F>(
    lines: I,
    selection: Arc<SelectionNode>,
    opts: ParallelOptions,
    mut on_result: F,
) where
    I: IntoIterator<Item = Vec<u8>> + Send,
    I::IntoIter: Send,
    F: FnMut(LineResult),
{
    let workers = opts.workers.max(1);
    debug!("dispatching lines across {} workers", workers);

    thread::scope(|scope| {
        let (res_tx, res_rx) = mpsc::sync_channel::<LineResult>(2 * workers);

        let mut line_txs = Vec::with_capacity(workers);
        for _ in 0..workers {
            let (tx, rx) = mpsc::sync_channel::<(u64, Vec<u8>)>(WORKER_QUEUE);
            let res_tx = res_tx.clone();
            let selection = selection.clone();
            let engine_opts = opts.engine.clone();
            scope.spawn(move || {
                for (seq, line) in rx {
                    let mut projector = Projector::new(
                        selection.clone(),
                        CollectSink::default(),
                        engine_opts.clone(),
                    );
                    let outcome = projector
                        .execute(&line)
                        .map(|_| projector.take_result());
                    if res_tx.send((seq, outcome)).is_err() {
                        break;
                    }
                }
            });
            line_txs.push(tx);
        }
        drop(res_tx);

        scope.spawn(move || {
            for (seq, line) in lines.into_iter().enumerate() {
                let tx = &line_txs[seq % line_txs.len()];
                if tx.send((seq as u64, line)).is_err() {
                    break;
                }
            }
            // Dropping the senders shuts the workers down.
        });

        match opts.ordering {
            OrderingMode::Relaxed => {
                for result in res_rx {
                    on_result(result);
                }
            }
            OrderingMode::Preserve => {
                let mut next = 0u64;
                let mut held: BTreeMap<u64, Result<Option<JsonValue>, SiftError>> =
                    BTreeMap::new();
                for (seq, outcome) in res_rx {
                    held.insert(seq, outcome);
                    while let Some(outcome) = held.remove(&next) {
                        on_result((next, outcome));
                        next += 1;
                    }
                }
                for (seq, outcome) in held {
                    on_result((seq, outcome));
                }
            }
        }
    });
}
