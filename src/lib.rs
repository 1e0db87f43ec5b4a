//! This crate provides concurrent map, filter and reduce stages over streams of
//! values passed between threads through channels.
//!
//! Main features:
//!
//!  * Chain any number of map or filter functions; each runs in its own thread.
//!  * Fan a chain out over a user-specified number of workers sharing one input.
//!  * Reduce sequentially, or in parallel with a final merge of partial results.
//!  * Map and filter functions report errors on a separate error stream next
//!    to their result, and the stream keeps flowing. Reductions stop at the
//!    first error instead.
//!  * `panic`s in worker threads are propagated to whoever reads the end of the
//!    output stream. (No silent loss of data.)
//!  * No `unsafe` code.
//!
//! Since `IntoIterator`s implement [Pipeline], you can turn any iterator into a
//! [Stream] and chain stages over it:
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//! use pipefold::{map, reduce, MapFn, Pipeline};
//!
//! fn square(x: u64) -> (u64, Option<String>) {
//!     (x * x, None)
//! }
//!
//! // On overflow, report it and pass the value on saturated.
//! fn increment(x: u64) -> (u64, Option<String>) {
//!     match x.checked_add(1) {
//!         Some(y) => (y, None),
//!         None => (u64::MAX, Some(format!("{} overflows", x))),
//!     }
//! }
//!
//! let fns: Vec<MapFn<u64, String>> = vec![Arc::new(square), Arc::new(increment)];
//! let (output, errors) = map((1..=3).into_stream(), &fns);
//!
//! // The error stream must be drained, or the stages eventually block.
//! let drain = thread::spawn(move || errors.collect::<Vec<_>>());
//!
//! assert_eq!(output.collect::<Vec<_>>(), vec![2, 5, 10]);
//! assert!(drain.join().unwrap().is_empty());
//!
//! let total = reduce((1..=4).into_stream(), |acc: &u64, x| Ok::<_, String>(acc + x), None);
//! assert_eq!(total.unwrap(), Some(10));
//! ```
//!
//! And, with [Pipeline::with_workers], every stage runs on a pool of workers:
//!
//! ```
//! use std::sync::Arc;
//! use pipefold::{FilterFn, Pipeline};
//!
//! fn is_even(x: &u64) -> (bool, Option<String>) {
//!     (x % 2 == 0, None)
//! }
//!
//! let fns: Vec<FilterFn<u64, String>> = vec![Arc::new(is_even)];
//! let (evens, errors) = (0..100u64).with_workers(4).out_buffer(16).filter(&fns).unwrap();
//! drop(errors);
//!
//! // Results arrive in no particular order.
//! let mut evens: Vec<_> = evens.collect();
//! evens.sort();
//! assert_eq!(evens.len(), 50);
//! ```
//!
//! [Pipeline]: trait.Pipeline.html
//! [Stream]: struct.Stream.html

mod chain;
pub mod error;
mod fan_out;
mod reduce;
pub mod stream;


pub use chain::{filter, map, FilterFn, MapFn};
pub use error::{Error, ReduceError, Result, WorkerErrors};
pub use reduce::{reduce, reduce_n};
pub use stream::{channel, Producer, Stream};

use chain::Stage;

/// Things which implement this can be fed into a pipeline.
pub trait Pipeline<T>
where
    T: Send + 'static,
{
    /// Spawns a producer thread that sends every element into a new, unbuffered stream.
    fn into_stream(self) -> Stream<T>;

    /// Returns a PipelineBuilder that will run on this many workers, with no output buffering.
    fn with_workers(self, num_workers: usize) -> PipelineBuilder<T>;
}

/// IntoIterators (and Iterators!) can be used as a Pipeline.
impl<Ii, It, T> Pipeline<T> for Ii
where
    Ii: IntoIterator<Item = T, IntoIter = It>,
    It: Iterator<Item = T> + Send + 'static,
    T: Send + 'static,
{
    fn into_stream(self) -> Stream<T> {
        stream::spawn_source(self.into_iter())
    }

    fn with_workers(self, num_workers: usize) -> PipelineBuilder<T> {
        PipelineBuilder::new(self.into_stream()).num_workers(num_workers)
    }
}

impl<T: Send + 'static> Stream<T> {
    /// Returns a PipelineBuilder reading from this stream on this many workers.
    pub fn with_workers(self, num_workers: usize) -> PipelineBuilder<T> {
        PipelineBuilder::new(self).num_workers(num_workers)
    }
}

/// This is an intermediate data structure which allows you to configure how the
/// N-way stages should run.
pub struct PipelineBuilder<T> {
    input: Stream<T>,

    // Options:
    num_workers: usize,
    out_buffer: usize,
}

impl<T> PipelineBuilder<T>
where
    T: Send + 'static,
{
    pub fn new(input: Stream<T>) -> Self {
        PipelineBuilder {
            input,
            num_workers: 1,
            out_buffer: 0,
        }
    }

    /// Set how many workers should share the input.
    /// A value of 0 is rejected with [Error::InvalidConcurrency] when the stage runs.
    pub fn num_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Set how many merged output values to buffer. The default, 0, results in
    /// synchronous output.
    pub fn out_buffer(mut self, size: usize) -> Self {
        self.out_buffer = size;
        self
    }

    /// Run a copy of the `fns` chain on every worker.
    /// Note that unlike [map], this does not preserve the ordering of the input.
    pub fn map<E>(self, fns: &[MapFn<T, E>]) -> Result<(Stream<T>, Stream<E>)>
    where
        E: Send + 'static,
    {
        let PipelineBuilder { input, num_workers, out_buffer } = self;
        fan_out::fan_out(num_workers, out_buffer, input, Stage::maps(fns))
    }

    /// Run a copy of the `fns` predicate chain on every worker.
    /// Note that unlike [filter], this does not preserve the ordering of the input.
    pub fn filter<E>(self, fns: &[FilterFn<T, E>]) -> Result<(Stream<T>, Stream<E>)>
    where
        E: Send + 'static,
    {
        let PipelineBuilder { input, num_workers, out_buffer } = self;
        fan_out::fan_out(num_workers, out_buffer, input, Stage::filters(fns))
    }

    /// Reduce the input with every worker. See [reduce_n].
    pub fn reduce<E, F>(self, combine: F, initial: Option<T>) -> std::result::Result<Option<T>, ReduceError<T, E>>
    where
        T: Default + Clone,
        E: Send + 'static,
        F: Fn(&T, T) -> std::result::Result<T, E> + Send + Sync + 'static,
    {
        reduce_n(self.num_workers, self.input, combine, initial)
    }
}

/// Run `concurrency` copies of the `fns` chain over the shared `input`, merging
/// their outputs and their errors.
///
/// Every element is processed by exactly one copy. The merged output is
/// unordered. Both returned streams close once every copy has finished.
/// You must drain the error stream, or the workers will block once it fills up.
pub fn map_n<T, E>(concurrency: usize, input: Stream<T>, fns: &[MapFn<T, E>]) -> Result<(Stream<T>, Stream<E>)>
where
    T: Send + 'static,
    E: Send + 'static,
{
    input.with_workers(concurrency).map(fns)
}

/// Run `concurrency` copies of the `fns` predicate chain over the shared
/// `input`, merging the forwarded elements and the errors.
///
/// Same guarantees as [map_n].
pub fn filter_n<T, E>(concurrency: usize, input: Stream<T>, fns: &[FilterFn<T, E>]) -> Result<(Stream<T>, Stream<E>)>
where
    T: Send + 'static,
    E: Send + 'static,
{
    input.with_workers(concurrency).filter(fns)
}
