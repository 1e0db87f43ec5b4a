//! Sequential and parallel reduction of a stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::error::{Error, ReduceError, WorkerErrors};
use crate::stream::{propagate_panics, Recv, Stream};

/// Fold `input` into a single value with `combine`.
///
/// If `initial` is `None`, the first element of `input` becomes the starting
/// accumulator (and is not combined with itself). Returns `Ok(None)` only when
/// there is no `initial` and `input` is empty.
///
/// Stops at the first combine error and returns the accumulator as of the last
/// successful combine along with it. The rest of `input` is left unread.
pub fn reduce<T, E, F>(mut input: Stream<T>, combine: F, initial: Option<T>) -> Result<Option<T>, ReduceError<T, E>>
where
    F: Fn(&T, T) -> Result<T, E>,
{
    let mut accumulator = match initial.or_else(|| input.next()) {
        Some(value) => value,
        None => return Ok(None),
    };

    for value in input {
        match combine(&accumulator, value) {
            Ok(next) => accumulator = next,
            Err(source) => return Err(ReduceError::Combine { accumulator, source }),
        }
    }
    Ok(Some(accumulator))
}

/// Fold `input` with `concurrency` workers, then combine their partial results.
///
/// Every worker starts from its own copy of `initial`, or from `T::default()`
/// when there is none, and folds whichever elements it happens to receive.
/// A worker without a seed that received nothing contributes no partial
/// result. The partial results are then folded with [reduce], with no seed.
///
/// `combine` must be associative and commutative: the order in which elements
/// reach workers, and partial results reach the final fold, is unspecified.
///
/// The first combine error stops every worker. Workers notice between
/// elements, so one combine already in flight may still finish. All recorded
/// errors are returned together as [ReduceError::Workers].
pub fn reduce_n<T, E, F>(
    concurrency: usize,
    input: Stream<T>,
    combine: F,
    initial: Option<T>,
) -> Result<Option<T>, ReduceError<T, E>>
where
    T: Default + Clone + Send + 'static,
    E: Send + 'static,
    F: Fn(&T, T) -> Result<T, E> + Send + Sync + 'static,
{
    if concurrency == 0 {
        return Err(Error::InvalidConcurrency(concurrency).into());
    }

    let combine = Arc::new(combine);
    let stop = Arc::new(StopSignal::new());
    let (partials_tx, partials_rx) = crossbeam_channel::bounded(concurrency);
    let (errors_tx, errors_rx) = crossbeam_channel::bounded(concurrency);

    let workers: Vec<JoinHandle<()>> = (0..concurrency)
        .map(|worker| {
            let input = input.clone();
            let combine = combine.clone();
            let stop = stop.clone();
            let partials = partials_tx.clone();
            let errors = errors_tx.clone();
            let seed = initial.clone();
            thread::spawn(move || {
                reduce_worker(worker, input, &*combine, &stop, seed, partials, errors)
            })
        })
        .collect();
    drop(input);
    drop(partials_tx);
    drop(errors_tx);

    propagate_panics(workers);

    let errors: Vec<E> = errors_rx.try_iter().collect();
    if !errors.is_empty() {
        return Err(ReduceError::Workers(WorkerErrors(errors)));
    }

    reduce(Stream::new(partials_rx), |acc: &T, value| combine(acc, value), None)
}

fn reduce_worker<T, E, F>(
    worker: usize,
    input: Stream<T>,
    combine: &F,
    stop: &StopSignal,
    seed: Option<T>,
    partials: Sender<T>,
    errors: Sender<E>,
) where
    T: Default,
    F: Fn(&T, T) -> Result<T, E>,
{
    tracing::trace!(worker, "reduce worker started");
    // `None` until this worker has a seed or has combined something.
    let mut accumulator = seed;
    loop {
        if stop.is_raised() {
            tracing::trace!(worker, "reduce worker stopped");
            return;
        }
        let value = match input.recv_until(stop.receiver()) {
            Recv::Item(value) => value,
            Recv::Closed => break,
            Recv::Stopped => {
                tracing::trace!(worker, "reduce worker stopped");
                return;
            }
        };
        let current = accumulator.take().unwrap_or_default();
        match combine(&current, value) {
            Ok(next) => accumulator = Some(next),
            Err(err) => {
                tracing::debug!(worker, "combine failed, stopping reduce workers");
                stop.raise();
                // Sized for one error per worker, so this never blocks.
                if errors.send(err).is_err() {
                    tracing::trace!(worker, "error channel closed, discarding error");
                }
                return;
            }
        }
    }

    if let Some(partial) = accumulator {
        // Sized for one partial result per worker, so this never blocks.
        if partials.send(partial).is_err() {
            tracing::trace!(worker, "partial results channel closed, discarding partial");
        }
    }
    tracing::trace!(worker, "reduce worker finished");
}

/// Broadcast stop request for reduce workers.
///
/// The flag is checked between elements; closing the channel also wakes
/// workers blocked waiting for input.
struct StopSignal {
    raised: AtomicBool,
    trigger: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl StopSignal {
    fn new() -> Self {
        let (trigger, receiver) = crossbeam_channel::bounded(0);
        StopSignal {
            raised: AtomicBool::new(false),
            trigger: Mutex::new(Some(trigger)),
            receiver,
        }
    }

    fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        // Dropping the only sender disconnects every receiver.
        self.trigger.lock().expect("No poisoning in StopSignal").take();
    }

    fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raising_twice_is_harmless() {
        let stop = StopSignal::new();
        assert!(!stop.is_raised());
        stop.raise();
        stop.raise();
        assert!(stop.is_raised());
        assert!(stop.receiver().recv().is_err());
    }

    #[test]
    fn unseeded_reduce_of_empty_stream_is_none() {
        let (producer, input) = crate::stream::channel::<i32>(0);
        producer.close();
        let result = reduce(input, |acc: &i32, x| Ok::<_, ()>(acc + x), None);
        assert_eq!(result.unwrap(), None);
    }
}
