//! In-memory conversation model and the actor that owns it.
//!
//! [`ConversationState`] is only ever mutated by [`actions::apply_action`],
//! and only the runtime task calls that. Stream consumers and user intents
//! both reach it as [`actions::ConversationAction`]s on a single channel, so
//! every mutation is serialized.

pub mod actions;
pub mod runtime;

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::core::message::ConversationThread;

pub use actions::{
    apply_action, ConversationAction, ConversationCommand, ConversationEvent, StoreOp,
    StreamRequest, StreamTarget,
};
pub use runtime::{start, ConversationHandle};

/// Result of routing one increment to its target message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    Applied,
    /// The thread was deleted while the stream was running.
    ThreadMissing,
    /// The message was removed (cleared, retried or failed).
    MessageMissing,
    /// The message was already finalized, typically by a cancel.
    AlreadyFinalized,
}

/// A running send and the token that stops it.
#[derive(Debug, Clone)]
pub struct ActiveStream {
    pub target: StreamTarget,
    pub cancel_token: CancellationToken,
}

/// Owned copy of the state handed to presentation code.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationSnapshot {
    pub threads: Vec<ConversationThread>,
    pub current_thread_id: Option<String>,
    pub input: String,
    pub last_error: Option<String>,
    pub active_stream: Option<StreamTarget>,
}

impl ConversationSnapshot {
    pub fn current_thread(&self) -> Option<&ConversationThread> {
        let id = self.current_thread_id.as_deref()?;
        self.threads.iter().find(|thread| thread.id == id)
    }

    pub fn thread(&self, thread_id: &str) -> Option<&ConversationThread> {
        self.threads.iter().find(|thread| thread.id == thread_id)
    }
}

#[derive(Debug, Default)]
pub struct ConversationState {
    threads: Vec<ConversationThread>,
    current_thread_id: Option<String>,
    pub input: String,
    pub last_error: Option<String>,
    /// The most recent send; what `Cancel` stops.
    active_stream: Option<ActiveStream>,
    /// Every running send, by thread id.
    thread_streams: HashMap<String, ActiveStream>,
    last_stream_id: u64,
}

impl ConversationState {
    /// Build state from stored threads; the first one becomes current.
    pub fn from_threads(threads: Vec<ConversationThread>) -> Self {
        let current_thread_id = threads.first().map(|thread| thread.id.clone());
        Self {
            threads,
            current_thread_id,
            ..Self::default()
        }
    }

    pub fn threads(&self) -> &[ConversationThread] {
        &self.threads
    }

    pub fn current_thread_id(&self) -> Option<&str> {
        self.current_thread_id.as_deref()
    }

    pub fn current_thread(&self) -> Option<&ConversationThread> {
        self.thread(self.current_thread_id.as_deref()?)
    }

    pub fn thread(&self, thread_id: &str) -> Option<&ConversationThread> {
        self.threads.iter().find(|thread| thread.id == thread_id)
    }

    pub fn thread_mut(&mut self, thread_id: &str) -> Option<&mut ConversationThread> {
        self.threads.iter_mut().find(|thread| thread.id == thread_id)
    }

    pub fn active_stream(&self) -> Option<&ActiveStream> {
        self.active_stream.as_ref()
    }

    pub fn is_current_thread_streaming(&self) -> bool {
        self.current_thread()
            .is_some_and(ConversationThread::is_streaming)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            threads: self.threads.clone(),
            current_thread_id: self.current_thread_id.clone(),
            input: self.input.clone(),
            last_error: self.last_error.clone(),
            active_stream: self
                .active_stream
                .as_ref()
                .map(|active| active.target.clone()),
        }
    }

    /// Append an increment to the message it was produced for.
    ///
    /// Targets are resolved by thread id and message id, never through the
    /// current-thread pointer, so switching threads mid-stream is harmless.
    /// An increment whose message no longer exists, or has already been
    /// finalized, is dropped.
    pub fn apply_increment(
        &mut self,
        thread_id: &str,
        message_id: &str,
        content: &str,
    ) -> IncrementOutcome {
        let Some(thread) = self.thread_mut(thread_id) else {
            return IncrementOutcome::ThreadMissing;
        };
        let Some(message) = thread.message_mut(message_id) else {
            return IncrementOutcome::MessageMissing;
        };
        if !message.streaming {
            return IncrementOutcome::AlreadyFinalized;
        }
        message.content.push_str(content);
        IncrementOutcome::Applied
    }

    pub(crate) fn next_stream_id(&mut self) -> u64 {
        self.last_stream_id += 1;
        self.last_stream_id
    }

    pub(crate) fn insert_thread_front(&mut self, thread: ConversationThread) {
        self.current_thread_id = Some(thread.id.clone());
        self.threads.insert(0, thread);
    }

    pub(crate) fn set_current(&mut self, thread_id: Option<String>) {
        self.current_thread_id = thread_id;
    }

    pub(crate) fn remove_thread(&mut self, thread_id: &str) -> Option<ConversationThread> {
        let index = self.threads.iter().position(|thread| thread.id == thread_id)?;
        Some(self.threads.remove(index))
    }

    /// Whether a send started in `thread_id` is still running.
    pub fn has_running_stream(&self, thread_id: &str) -> bool {
        self.thread_streams.contains_key(thread_id)
    }

    /// Register a send and make it the tracked one, returning the send it
    /// displaced.
    pub(crate) fn track_stream(&mut self, active: ActiveStream) -> Option<ActiveStream> {
        self.thread_streams
            .insert(active.target.thread_id.clone(), active.clone());
        self.active_stream.replace(active)
    }

    pub(crate) fn take_active_stream(&mut self) -> Option<ActiveStream> {
        self.active_stream.take()
    }

    /// Forget a send that ended on its own.
    pub(crate) fn release_stream(&mut self, target: &StreamTarget) {
        if self
            .thread_streams
            .get(&target.thread_id)
            .is_some_and(|running| running.target.stream_id == target.stream_id)
        {
            self.thread_streams.remove(&target.thread_id);
        }
        if self
            .active_stream
            .as_ref()
            .is_some_and(|active| active.target.stream_id == target.stream_id)
        {
            self.active_stream = None;
        }
    }

    /// Cancel and forget whatever send is running in `thread_id`, tracked
    /// or not.
    pub(crate) fn cancel_stream_for_thread(&mut self, thread_id: &str) {
        if let Some(running) = self.thread_streams.remove(thread_id) {
            running.cancel_token.cancel();
        }
        if self
            .active_stream
            .as_ref()
            .is_some_and(|active| active.target.thread_id == thread_id)
        {
            if let Some(active) = self.active_stream.take() {
                active.cancel_token.cancel();
            }
        }
    }

    pub(crate) fn cancel_all_streams(&mut self) {
        for (_, running) in self.thread_streams.drain() {
            running.cancel_token.cancel();
        }
        if let Some(active) = self.active_stream.take() {
            active.cancel_token.cancel();
        }
    }
}
