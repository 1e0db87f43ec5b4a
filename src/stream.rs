//! Channel-backed streams and the worker threads that feed them.
//!
//! A [Stream] is the receiving half of a crossbeam channel. Cloning it gives
//! another consumer of the same elements; each element is delivered to exactly
//! one clone. Streams produced by pipefold also remember the threads writing
//! into them, so that whoever observes end-of-stream can join those threads
//! and re-raise any panic. (No silent loss of data.)

use std::any::Any;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{self, Receiver, SendError, Sender};

/// An ordered, closable stream of elements.
///
/// A `Stream` is also an `Iterator`, which blocks on `next()` until an element
/// arrives or every producer has gone away.
///
/// # Panics #
/// Reaching the end of a stream joins the worker threads that produced it.
/// If one of them panicked, the panic is propagated to the consumer.
pub struct Stream<T> {
    receiver: Receiver<T>,
    producers: Option<Arc<WorkerSet>>,
}

impl<T> Stream<T> {
    /// A stream with no worker threads of its own behind it.
    pub(crate) fn new(receiver: Receiver<T>) -> Self {
        Stream { receiver, producers: None }
    }

    pub(crate) fn with_producers(receiver: Receiver<T>, producers: Arc<WorkerSet>) -> Self {
        Stream { receiver, producers: Some(producers) }
    }

    /// Block until the next element arrives. Returns `None` once the stream is
    /// closed and drained.
    pub fn recv(&self) -> Option<T> {
        match self.receiver.recv() {
            Ok(value) => Some(value),
            Err(_) => {
                self.finish();
                None
            }
        }
    }

    /// Receive an element if one is ready, without blocking.
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Receive the next element unless `stop` is closed first.
    pub(crate) fn recv_until(&self, stop: &Receiver<()>) -> Recv<T> {
        crossbeam_channel::select! {
            recv(self.receiver) -> msg => match msg {
                Ok(value) => Recv::Item(value),
                Err(_) => {
                    self.finish();
                    Recv::Closed
                }
            },
            recv(stop) -> _ => Recv::Stopped,
        }
    }

    /// Number of elements buffered in the stream.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Whether no element is buffered right now. The stream may still be open.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    // The stream has ended, so its producers have released their senders.
    fn finish(&self) {
        if let Some(producers) = &self.producers {
            producers.propagate_panics();
        }
    }
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Stream {
            receiver: self.receiver.clone(),
            producers: self.producers.clone(),
        }
    }
}

impl<T> Iterator for Stream<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.recv()
    }
}

/// Outcome of a cancellation-aware receive.
pub(crate) enum Recv<T> {
    Item(T),
    Closed,
    Stopped,
}

/// The single owning send half of a stream.
///
/// A `Producer` can't be cloned, and [close] consumes it, so a stream is closed
/// exactly once, by its producer. Dropping the producer closes it as well.
///
/// [close]: Producer::close
pub struct Producer<T> {
    sender: Sender<T>,
}

impl<T> Producer<T> {
    /// Send one element, blocking while the stream is full.
    /// Fails, returning the element, once every consumer has been dropped.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        self.sender.send(value)
    }

    /// Signal end-of-stream to every consumer.
    pub fn close(self) {}
}

/// Create a stream fed by the caller. A `capacity` of 0 gives an unbuffered
/// stream where every send waits for a receiver.
pub fn channel<T>(capacity: usize) -> (Producer<T>, Stream<T>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity);
    (Producer { sender }, Stream::new(receiver))
}

/// Spawn a producer thread that feeds `iter` into a new unbuffered stream.
pub(crate) fn spawn_source<I>(iter: I) -> Stream<I::Item>
where
    I: Iterator + Send + 'static,
    I::Item: Send + 'static,
{
    let (sender, receiver) = crossbeam_channel::bounded(0);
    let producers = Arc::new(WorkerSet::new());
    producers.spawn(move || {
        for value in iter {
            if sender.send(value).is_err() {
                tracing::debug!("source stream dropped by every consumer");
                break;
            }
        }
    });
    Stream::with_producers(receiver, producers)
}

/// Threads writing into one stream.
pub(crate) struct WorkerSet {
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerSet {
    pub(crate) fn new() -> Self {
        WorkerSet { threads: Mutex::new(Vec::new()) }
    }

    pub(crate) fn spawn<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let handle = thread::spawn(work);
        self.threads.lock().expect("No poisoning in WorkerSet").push(handle);
    }

    /// Join every thread not joined yet. Panics if any of them panicked.
    fn propagate_panics(&self) {
        let threads = std::mem::take(&mut *self.threads.lock().expect("No poisoning in WorkerSet"));
        propagate_panics(threads)
    }
}

/// Wait for all threads to close. Panics if any of them panicked.
pub(crate) fn propagate_panics(threads: Vec<JoinHandle<()>>) {
    for joiner in threads {
        let panic_err = match joiner.join() {
            Ok(_) => continue,
            Err(err) => err,
        };
        let orig_msg = panic_msg_from(panic_err.as_ref());
        panic!("Worker thread panicked with message: [{}]", orig_msg);
    }
}

/// Try to reconstruct a panic message from the original.
fn panic_msg_from(panic_data: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic_data.downcast_ref::<&'static str>() {
        return msg;
    }
    if let Some(msg) = panic_data.downcast_ref::<String>() {
        return msg.as_str();
    }

    "<Unrecoverable panic message.>"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_producer_ends_stream() {
        let (producer, stream) = channel(2);
        producer.send(1).unwrap();
        producer.send(2).unwrap();
        producer.close();
        assert_eq!(stream.collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn buffered_elements_are_visible_without_blocking() {
        let (producer, stream) = channel(4);
        assert!(stream.is_empty());
        assert_eq!(stream.try_recv(), None);

        producer.send("a").unwrap();
        producer.send("b").unwrap();
        assert_eq!(stream.len(), 2);
        assert!(!stream.is_empty());

        assert_eq!(stream.try_recv(), Some("a"));
        assert_eq!(stream.len(), 1);
        producer.close();
        assert_eq!(stream.try_recv(), Some("b"));
        assert!(stream.is_empty());
        assert_eq!(stream.recv(), None);
    }

    #[test]
    fn clones_share_elements() {
        let (producer, stream) = channel(4);
        let other = stream.clone();
        for i in 0..4 {
            producer.send(i).unwrap();
        }
        drop(producer);
        let mut seen: Vec<_> = stream.take(2).chain(other).collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[test]
    fn send_fails_without_consumers() {
        let (producer, stream) = channel(1);
        drop(stream);
        assert_eq!(producer.send(7).unwrap_err().into_inner(), 7);
    }

    #[test]
    fn stop_interrupts_blocked_receive() {
        let (_producer, stream) = channel::<i32>(0);
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        drop(stop_tx);
        assert!(matches!(stream.recv_until(&stop_rx), Recv::Stopped));
    }

    #[test]
    #[should_panic(expected = "Worker thread panicked with message: [source exploded]")]
    fn source_panic_reaches_consumer() {
        let stream = spawn_source((0..3).map(|x| {
            if x == 2 {
                panic!("source exploded");
            }
            x
        }));
        for _ in stream {}
    }
}
