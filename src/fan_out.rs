//! Implementation internals for the N-way map and filter, which run several
//! copies of a stage chain over one shared input and merge their results.
//! Output order across copies is not preserved.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::chain::{run_chain, Stage};
use crate::error::{Error, Result};
use crate::stream::{propagate_panics, Stream, WorkerSet};

/// Run `concurrency` chains over `stages`, all reading from `input`.
///
/// Every copy gets a processing thread, which forwards the chain's output into
/// the merged output stream, and a forwarding thread for the chain's errors.
/// A barrier thread joins all `2 * concurrency` of them before closing the
/// merged output and error streams.
pub(crate) fn fan_out<T, E>(
    concurrency: usize,
    out_buffer: usize,
    input: Stream<T>,
    stages: Vec<Stage<T, E>>,
) -> Result<(Stream<T>, Stream<E>)>
where
    T: Send + 'static,
    E: Send + 'static,
{
    if concurrency == 0 {
        return Err(Error::InvalidConcurrency(concurrency));
    }

    let (output_tx, output_rx) = crossbeam_channel::bounded(out_buffer);
    let (errors_tx, errors_rx) = crossbeam_channel::bounded(concurrency);
    let stages: Arc<[Stage<T, E>]> = stages.into();

    tracing::debug!(concurrency, stages = stages.len(), "spawning fan-out workers");

    let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(2 * concurrency);
    for copy in 0..concurrency {
        let (chain_output, chain_errors) = run_chain(input.clone(), &stages);

        let errors_tx = errors_tx.clone();
        workers.push(thread::spawn(move || {
            for err in chain_errors {
                if errors_tx.send(err).is_err() {
                    tracing::trace!(copy, "merged error stream dropped");
                    break;
                }
            }
        }));

        let output_tx = output_tx.clone();
        workers.push(thread::spawn(move || {
            for value in chain_output {
                if output_tx.send(value).is_err() {
                    // The receiver is closed. No need to continue.
                    tracing::debug!(copy, "merged output receiver dropped");
                    break;
                }
            }
        }));
    }
    drop(input);

    let barrier = Arc::new(WorkerSet::new());
    barrier.spawn(move || {
        propagate_panics(workers);
        // Only now may the merged streams close.
        drop(output_tx);
        drop(errors_tx);
    });

    Ok((Stream::with_producers(output_rx, barrier), Stream::new(errors_rx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::channel;

    #[test]
    fn zero_concurrency_is_rejected() {
        let (_producer, input) = channel::<i32>(0);
        let result = fan_out::<i32, ()>(0, 0, input, Vec::new());
        assert_eq!(result.err(), Some(Error::InvalidConcurrency(0)));
    }

    #[test]
    fn no_stages_merges_input() {
        let (producer, input) = channel(8);
        for i in 0..8 {
            producer.send(i).unwrap();
        }
        producer.close();
        let (output, errors) = fan_out::<i32, ()>(4, 2, input, Vec::new()).unwrap();
        let mut results: Vec<_> = output.collect();
        results.sort();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
        assert_eq!(errors.count(), 0);
    }
}
