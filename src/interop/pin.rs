//! Thread pinning for the duration of a cross-runtime round trip
//!
//! Some runtimes keep per-thread state between entering and leaving a call
//! (callbacks re-enter on the same thread). The guard marks the thread as
//! inside a round trip and is released on every exit path, panics included.

use core::cell::Cell;
use core::marker::PhantomData;
use std::thread::{self, ThreadId};

thread_local! {
    static PIN_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// RAII marker; not `Send` so it cannot leave the pinned thread
pub struct ThreadPin {
    thread: ThreadId,
    _not_send: PhantomData<*const ()>,
}

impl ThreadPin {
    pub fn enter() -> Self {
        PIN_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self {
            thread: thread::current().id(),
            _not_send: PhantomData,
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

impl Drop for ThreadPin {
    fn drop(&mut self) {
        PIN_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Nested round trips active on this thread
pub fn pin_depth() -> usize {
    PIN_DEPTH.with(Cell::get)
}

pub fn is_pinned() -> bool {
    pin_depth() > 0
}
