// Copyright (c) The surefire-rs Contributors
// SPDX-License-Identifier: Apache-2.0

//! The command reader of a forked process.
//!
//! A background thread decodes commands from the parent, keeps the queue of test classes the
//! fork has been asked to run and wakes up the consumer of that queue. The queue only grows, and
//! once the "no more tests" sentinel has been added it rejects everything else.
//!
//! The reader moves through `New -> Runnable -> Terminated` and never goes back.

use crate::{
    channel::{Command, CommandDecoder, MasterProcessCommand, Shutdown},
    dump::DumpWriter,
};
use std::{
    io::BufRead,
    sync::{
        Arc, Condvar, Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, error};

/// The lifecycle state of a [`CommandReader`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Created but not yet started.
    New,
    /// Reading commands.
    Runnable,
    /// Stopped; no further commands will be processed.
    Terminated,
}

impl ReaderState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Runnable,
            _ => Self::Terminated,
        }
    }
}

type ListenerFn = Arc<dyn Fn(&Command) + Send + Sync>;

struct Listener {
    kind: Option<MasterProcessCommand>,
    callback: ListenerFn,
}

#[derive(Debug, Default)]
struct ClassQueue {
    classes: Vec<String>,
    full: bool,
    // Bumped on every processed command, so that waiters notice progress.
    generation: u64,
}

struct Inner {
    state: AtomicU8,
    test_set_finished: AtomicBool,
    queue: Mutex<ClassQueue>,
    wakeup: Condvar,
    listeners: Mutex<Vec<Listener>>,
    shutdown: Shutdown,
    dump: DumpWriter,
}

impl Inner {
    fn state(&self) -> ReaderState {
        ReaderState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn terminate(&self) {
        self.state.store(2, Ordering::SeqCst);
    }

    fn lock_queue(&self) -> MutexGuard<'_, ClassQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn insert_to_queue(&self, class_name: &str) -> bool {
        if class_name.trim().is_empty() {
            return false;
        }
        let mut queue = self.lock_queue();
        if queue.full {
            return false;
        }
        queue.classes.push(class_name.to_owned());
        true
    }

    fn make_queue_full(&self) -> bool {
        let mut queue = self.lock_queue();
        !std::mem::replace(&mut queue.full, true)
    }

    fn wakeup(&self) {
        self.lock_queue().generation += 1;
        self.wakeup.notify_all();
    }

    /// Callbacks run without the listeners lock held, so they may register listeners.
    fn call_listeners(&self, command: &Command) {
        let callbacks: Vec<ListenerFn> = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|listener| listener.kind.is_none_or(|kind| kind == command.kind()))
            .map(|listener| listener.callback.clone())
            .collect();
        for callback in callbacks {
            callback(command);
        }
    }

    fn exit_by_configuration(&self) {
        self.make_queue_full();
        self.wakeup();
        self.call_listeners(&Command::shutdown(self.shutdown));
    }

    fn process(&self, command: &Command) -> bool {
        match command.kind() {
            MasterProcessCommand::RunClass => {
                if let Some(class_name) = command.data()
                    && !self.insert_to_queue(class_name)
                {
                    debug!(class_name, "ignoring test class received after the sentinel");
                }
                self.wakeup();
                self.call_listeners(command);
            }
            MasterProcessCommand::TestSetFinished => {
                self.test_set_finished.store(true, Ordering::SeqCst);
                self.make_queue_full();
                self.wakeup();
                self.call_listeners(command);
            }
            MasterProcessCommand::Shutdown => {
                self.make_queue_full();
                self.wakeup();
                self.call_listeners(command);
            }
            MasterProcessCommand::ByeAck => {
                self.call_listeners(command);
                self.terminate();
                self.wakeup();
                return false;
            }
            MasterProcessCommand::SkipSinceNextTest | MasterProcessCommand::Noop => {
                self.wakeup();
                self.call_listeners(command);
            }
        }
        true
    }

    fn read_commands<R: BufRead>(&self, mut decoder: CommandDecoder<R>) {
        while self.state() == ReaderState::Runnable {
            match decoder.decode() {
                Ok(Some(command)) => {
                    debug!(%command, "received command");
                    if !self.process(&command) {
                        break;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    self.terminate();
                    if !self.test_set_finished.load(Ordering::SeqCst) {
                        let message = if err.is_end_of_stream() {
                            "command channel closed before the test set finished"
                        } else {
                            "failed to read from the command channel"
                        };
                        error!("{message}: {err}");
                        self.dump.dump_stream_exception(Some(message), &err);
                        self.exit_by_configuration();
                    }
                    break;
                }
            }
        }

        if !self.test_set_finished.load(Ordering::SeqCst) {
            self.make_queue_full();
        }
        self.wakeup();
    }
}

/// Reads commands from the parent on a background thread.
pub struct CommandReader {
    inner: Arc<Inner>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for CommandReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandReader")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl CommandReader {
    /// Creates a reader that applies `shutdown` when the channel fails before the test set
    /// finished.
    pub fn new(shutdown: Shutdown, dump: DumpWriter) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(0),
                test_set_finished: AtomicBool::new(false),
                queue: Mutex::new(ClassQueue::default()),
                wakeup: Condvar::new(),
                listeners: Mutex::new(Vec::new()),
                shutdown,
                dump,
            }),
            thread: Mutex::new(None),
        }
    }

    /// Starts reading commands from `input` on a background thread.
    ///
    /// Does nothing unless the reader is new.
    pub fn start<R: BufRead + Send + 'static>(&self, input: R) {
        if self
            .inner
            .state
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let inner = self.inner.clone();
        let decoder = CommandDecoder::new(input);
        let spawned = thread::Builder::new()
            .name("surefire-forkedjvm-command-thread".to_owned())
            .spawn(move || inner.read_commands(decoder));
        match spawned {
            Ok(handle) => {
                *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
            }
            Err(err) => {
                error!("failed to start the command reader thread: {err}");
                self.inner.terminate();
                self.inner.exit_by_configuration();
            }
        }
    }

    /// The current state.
    pub fn state(&self) -> ReaderState {
        self.inner.state()
    }

    /// Registers a listener for commands of `kind`, or for every command if `kind` is `None`.
    pub fn add_listener(
        &self,
        kind: Option<MasterProcessCommand>,
        callback: impl Fn(&Command) + Send + Sync + 'static,
    ) {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Listener {
                kind,
                callback: Arc::new(callback),
            });
    }

    /// Registers a listener for `SHUTDOWN`, receiving the policy.
    pub fn add_shutdown_listener(&self, callback: impl Fn(Shutdown) + Send + Sync + 'static) {
        self.add_listener(Some(MasterProcessCommand::Shutdown), move |command| {
            callback(command.to_shutdown().unwrap_or_default())
        });
    }

    /// Registers a listener for `SKIP_SINCE_NEXT_TEST`.
    pub fn add_skip_next_tests_listener(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.add_listener(Some(MasterProcessCommand::SkipSinceNextTest), move |_| {
            callback()
        });
    }

    /// Registers a listener for `NOOP`.
    pub fn add_noop_listener(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.add_listener(Some(MasterProcessCommand::Noop), move |_| callback());
    }

    /// Registers a listener for `BYE_ACK`.
    pub fn add_bye_ack_listener(&self, callback: impl Fn() + Send + Sync + 'static) {
        self.add_listener(Some(MasterProcessCommand::ByeAck), move |_| callback());
    }

    /// Adds a class to the queue. Returns false if it's blank or the sentinel was already added.
    pub fn insert_to_queue(&self, class_name: &str) -> bool {
        self.inner.insert_to_queue(class_name)
    }

    /// Adds the sentinel. Returns false if it was already there.
    pub fn make_queue_full(&self) -> bool {
        let inserted = self.inner.make_queue_full();
        self.inner.wakeup();
        inserted
    }

    /// Returns true once the sentinel has been added.
    pub fn is_queue_full(&self) -> bool {
        self.inner.lock_queue().full
    }

    /// Returns an iterator over test class names that blocks until the next class arrives.
    ///
    /// Before blocking, it calls `request_next` once so that the parent can send another class.
    /// Only one iterator may be consumed at a time.
    pub fn iterated(&self, request_next: impl FnMut() + Send + 'static) -> ClassesIterator {
        ClassesIterator {
            inner: self.inner.clone(),
            index: 0,
            requested_for: None,
            request_next: Box::new(request_next),
        }
    }

    /// Stops the reader: marks it terminated, releases waiters and drops all listeners.
    pub fn stop(&self) {
        self.inner.terminate();
        self.inner.make_queue_full();
        self.inner.wakeup();
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Waits for the reader thread to exit. The thread only exits once the channel ends or a
    /// `BYE_ACK` arrives.
    pub fn join(&self) {
        let handle = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            error!("command reader thread panicked");
        }
    }
}

/// A blocking iterator over the test classes sent by the parent.
pub struct ClassesIterator {
    inner: Arc<Inner>,
    index: usize,
    requested_for: Option<usize>,
    request_next: Box<dyn FnMut() + Send>,
}

impl std::fmt::Debug for ClassesIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassesIterator")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl ClassesIterator {
    /// Blocks until a class is available or no more classes can arrive.
    pub fn has_next(&mut self) -> bool {
        loop {
            let queue = self.inner.lock_queue();
            if self.index < queue.classes.len() {
                return true;
            }
            if queue.full || self.inner.state() == ReaderState::Terminated {
                return false;
            }

            if self.requested_for != Some(self.index) {
                self.requested_for = Some(self.index);
                drop(queue);
                (self.request_next)();
                // The answer may have arrived already; check again before waiting.
                continue;
            }

            let generation = queue.generation;
            let _queue = self
                .inner
                .wakeup
                .wait_while(queue, |queue| {
                    queue.generation == generation
                        && !queue.full
                        && self.index >= queue.classes.len()
                })
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}

impl Iterator for ClassesIterator {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if !self.has_next() {
            return None;
        }
        let class_name = self.inner.lock_queue().classes[self.index].clone();
        self.index += 1;
        Some(class_name)
    }
}
