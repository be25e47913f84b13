//! A single-threaded macrotask queue.
//!
//! The engine never fires an event synchronously from a method call; it
//! queues a task instead. [`EventLoop::run_until`] drives a future the way
//! a host event loop would: poll it until it stalls, run one task, repeat.
//! Everything a future does between two tasks happens "in the same turn",
//! which is what keeps a transaction alive across an `.await`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::{Future, IntoFuture};
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use awaitdb_native::{NativeError, NativeResult};
use tracing::trace;

type Task = Box<dyn FnOnce()>;

/// The queue of pending macrotasks.
#[derive(Default)]
pub struct EventLoop {
    tasks: RefCell<VecDeque<(&'static str, Task)>>,
}

struct NoopWake;

impl Wake for NoopWake {
    fn wake(self: Arc<Self>) {}
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task to run after everything already queued.
    pub fn schedule(&self, label: &'static str, task: impl FnOnce() + 'static) {
        self.tasks.borrow_mut().push_back((label, Box::new(task)));
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Run the oldest queued task. Returns `false` if the queue was empty.
    pub fn run_next(&self) -> bool {
        let next = self.tasks.borrow_mut().pop_front();
        match next {
            Some((label, task)) => {
                trace!(task = label, "running task");
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty.
    pub fn drain(&self) {
        while self.run_next() {}
    }

    /// Drive `future` to completion, running tasks whenever it is pending.
    ///
    /// Fails with `InvalidStateError` if the future is pending and no task
    /// is left that could make progress.
    pub fn run_until<F: IntoFuture>(&self, future: F) -> NativeResult<F::Output> {
        let waker = Waker::from(Arc::new(NoopWake));
        let mut cx = Context::from_waker(&waker);
        let mut future = pin!(future.into_future());
        loop {
            if let Poll::Ready(output) = future.as_mut().poll(&mut cx) {
                return Ok(output);
            }
            if !self.run_next() {
                return Err(NativeError::invalid_state(
                    "event loop stalled: future is pending and no tasks are queued",
                ));
            }
        }
    }
}
