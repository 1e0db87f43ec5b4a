//! Single-worker map and filter: a chain of stages, one thread per function.
//!
//! Stage *i* reads the output stream of stage *i - 1*, so every element passes
//! through the functions in order and leaves the chain in the order it arrived.
//! All stages of a chain report into one shared error stream.
//!
//! Function errors never stop the stream. A map function always hands back a
//! value to forward, and a filter function a verdict, alongside the error it
//! wants reported, if any.

use std::sync::Arc;

use crossbeam_channel::Sender;

use crate::stream::{Stream, WorkerSet};

/// A transform applied to every element. The returned value is forwarded even
/// when an error is returned with it.
pub type MapFn<T, E> = Arc<dyn Fn(T) -> (T, Option<E>) + Send + Sync>;

/// A predicate deciding which elements are forwarded. The verdict is obeyed
/// even when an error is returned with it.
pub type FilterFn<T, E> = Arc<dyn Fn(&T) -> (bool, Option<E>) + Send + Sync>;

/// One function of a chain.
pub(crate) enum Stage<T, E> {
    Map(MapFn<T, E>),
    Filter(FilterFn<T, E>),
}

impl<T, E> Clone for Stage<T, E> {
    fn clone(&self) -> Self {
        match self {
            Stage::Map(f) => Stage::Map(f.clone()),
            Stage::Filter(f) => Stage::Filter(f.clone()),
        }
    }
}

impl<T, E> Stage<T, E> {
    pub(crate) fn maps(fns: &[MapFn<T, E>]) -> Vec<Self> {
        fns.iter().cloned().map(Stage::Map).collect()
    }

    pub(crate) fn filters(fns: &[FilterFn<T, E>]) -> Vec<Self> {
        fns.iter().cloned().map(Stage::Filter).collect()
    }

    fn kind(&self) -> &'static str {
        match self {
            Stage::Map(_) => "map",
            Stage::Filter(_) => "filter",
        }
    }

    /// Returns the element to forward, if any, and the error to report, if any.
    fn apply(&self, value: T) -> (Option<T>, Option<E>) {
        match self {
            Stage::Map(f) => {
                let (mapped, err) = f(value);
                (Some(mapped), err)
            }
            Stage::Filter(f) => {
                let (keep, err) = f(&value);
                (keep.then_some(value), err)
            }
        }
    }
}

/// Apply `fns` to every element of `input`, in order, one thread per function.
///
/// Returns the transformed stream and the error stream. Every element read
/// from `input` comes out the other end: a function error is reported on the
/// error stream and the value returned alongside it is still forwarded. The
/// error stream closes once every stage thread has finished.
///
/// With no functions, `input` is returned unchanged.
///
/// You must drain the error stream, or the stages will block once it fills up.
pub fn map<T, E>(input: Stream<T>, fns: &[MapFn<T, E>]) -> (Stream<T>, Stream<E>)
where
    T: Send + 'static,
    E: Send + 'static,
{
    run_chain(input, &Stage::maps(fns))
}

/// Forward the elements of `input` for which every predicate in `fns` holds,
/// one thread per predicate, preserving order.
///
/// A predicate error is reported on the error stream; the element is still
/// forwarded if the predicate returned `true` with it. You must drain the
/// error stream, or the stages will block once it fills up.
pub fn filter<T, E>(input: Stream<T>, fns: &[FilterFn<T, E>]) -> (Stream<T>, Stream<E>)
where
    T: Send + 'static,
    E: Send + 'static,
{
    run_chain(input, &Stage::filters(fns))
}

/// Build one chain over `stages` with its own error stream.
pub(crate) fn run_chain<T, E>(input: Stream<T>, stages: &[Stage<T, E>]) -> (Stream<T>, Stream<E>)
where
    T: Send + 'static,
    E: Send + 'static,
{
    let (errors_tx, errors_rx) = crossbeam_channel::bounded(stages.len().max(1));
    let output = build_chain(input, &errors_tx, stages);
    // Each stage holds its own sender; the error stream closes with the last one.
    drop(errors_tx);
    (output, Stream::new(errors_rx))
}

fn build_chain<T, E>(input: Stream<T>, errors: &Sender<E>, stages: &[Stage<T, E>]) -> Stream<T>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let (last, rest) = match stages.split_last() {
        None => return input,
        Some(split) => split,
    };
    let input = build_chain(input, errors, rest);

    let (output_tx, output_rx) = crossbeam_channel::bounded(0);
    let errors = errors.clone();
    let stage = last.clone();
    let index = rest.len();

    let producers = Arc::new(WorkerSet::new());
    producers.spawn(move || run_stage(index, stage, input, output_tx, errors));
    Stream::with_producers(output_rx, producers)
}

fn run_stage<T, E>(index: usize, stage: Stage<T, E>, input: Stream<T>, output: Sender<T>, errors: Sender<E>) {
    tracing::trace!(stage = index, kind = stage.kind(), "stage started");
    for value in input {
        let (forward, error) = stage.apply(value);
        if let Some(err) = error {
            if errors.send(err).is_err() {
                tracing::trace!(stage = index, "error stream dropped, discarding error");
            }
        }
        if let Some(value) = forward {
            if output.send(value).is_err() {
                // Nobody is reading our output any more. Dropping our input
                // lets the upstream stages wind down too.
                tracing::debug!(stage = index, kind = stage.kind(), "downstream receiver dropped");
                return;
            }
        }
    }
    tracing::trace!(stage = index, kind = stage.kind(), "stage finished");
}
