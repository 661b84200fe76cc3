use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{ActiveStream, ConversationState, IncrementOutcome};
use crate::core::chat_stream::ChatError;
use crate::core::message::{title_from_text, ConversationThread, Message};
use crate::core::store::{RepairNotice, StoreError, ThreadStore};

/// Identifies the placeholder a running stream writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub stream_id: u64,
    pub thread_id: String,
    pub message_id: String,
}

#[derive(Debug)]
pub enum ConversationAction {
    CreateThread,
    SelectThread {
        thread_id: String,
    },
    DeleteThread {
        thread_id: String,
    },
    SetInput {
        text: String,
    },
    Send {
        text: String,
    },
    Cancel,
    Clear,
    RetryLast,
    DismissError,
    StreamChunk {
        target: StreamTarget,
        content: String,
    },
    StreamCompleted {
        target: StreamTarget,
    },
    StreamErrored {
        target: StreamTarget,
        error: ChatError,
    },
}

/// What a send needs from the runtime: the prior conversation and a token.
#[derive(Debug)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub messages: Vec<Message>,
    pub cancel_token: CancellationToken,
}

/// Store write produced by a state transition.
///
/// Threads carried here hold metadata only; their message list is empty.
#[derive(Debug, Clone)]
pub enum StoreOp {
    SaveThread(ConversationThread),
    DeleteThread(ConversationThread),
    SaveMessage { message: Message, thread_id: String },
    DeleteMessage { message_id: String },
    DeleteMessages { thread_id: String },
}

impl StoreOp {
    pub fn apply(&self, store: &ThreadStore) -> Result<(), StoreError> {
        match self {
            StoreOp::SaveThread(thread) => store.save_thread(thread),
            StoreOp::DeleteThread(thread) => store.delete_thread(thread),
            StoreOp::SaveMessage { message, thread_id } => store.save_message(message, thread_id),
            StoreOp::DeleteMessage { message_id } => store.delete_message(message_id),
            StoreOp::DeleteMessages { thread_id } => store.delete_messages(thread_id).map(|_| ()),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreOp::SaveThread(_) => "save thread",
            StoreOp::DeleteThread(_) => "delete thread",
            StoreOp::SaveMessage { .. } => "save message",
            StoreOp::DeleteMessage { .. } => "delete message",
            StoreOp::DeleteMessages { .. } => "clear messages",
        }
    }
}

/// Notifications for presentation code.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    /// Thread list, selection or message structure changed; re-read a snapshot.
    ThreadsChanged,
    Increment {
        thread_id: String,
        message_id: String,
        content: String,
    },
    StreamFinished {
        thread_id: String,
        message_id: String,
    },
    StreamCancelled {
        thread_id: String,
        message_id: String,
    },
    SendFailed {
        thread_id: String,
        error: ChatError,
    },
    StoreRepaired(RepairNotice),
    StoreFailed {
        operation: &'static str,
        message: String,
    },
}

#[derive(Debug)]
pub enum ConversationCommand {
    SpawnStream(StreamRequest),
    Persist(StoreOp),
    Notify(ConversationEvent),
}

pub fn apply_action(
    state: &mut ConversationState,
    action: ConversationAction,
) -> Vec<ConversationCommand> {
    match action {
        ConversationAction::CreateThread => create_thread(state),
        ConversationAction::SelectThread { thread_id } => select_thread(state, thread_id),
        ConversationAction::DeleteThread { thread_id } => delete_thread(state, &thread_id),
        ConversationAction::SetInput { text } => {
            state.input = text;
            Vec::new()
        }
        ConversationAction::Send { text } => send(state, &text),
        ConversationAction::Cancel => cancel(state),
        ConversationAction::Clear => clear(state),
        ConversationAction::RetryLast => retry_last(state),
        ConversationAction::DismissError => {
            state.last_error = None;
            Vec::new()
        }
        ConversationAction::StreamChunk { target, content } => {
            append_chunk(state, target, content)
        }
        ConversationAction::StreamCompleted { target } => complete_stream(state, &target),
        ConversationAction::StreamErrored { target, error } => fail_stream(state, &target, error),
    }
}

fn metadata(thread: &ConversationThread) -> ConversationThread {
    ConversationThread {
        id: thread.id.clone(),
        title: thread.title.clone(),
        messages: Vec::new(),
        created_at: thread.created_at,
        updated_at: thread.updated_at,
    }
}

fn create_thread(state: &mut ConversationState) -> Vec<ConversationCommand> {
    let thread = ConversationThread::new();
    let commands = vec![
        ConversationCommand::Persist(StoreOp::SaveThread(metadata(&thread))),
        ConversationCommand::Notify(ConversationEvent::ThreadsChanged),
    ];
    state.insert_thread_front(thread);
    commands
}

fn select_thread(state: &mut ConversationState, thread_id: String) -> Vec<ConversationCommand> {
    if state.thread(&thread_id).is_none() {
        debug!(%thread_id, "Ignoring selection of unknown thread");
        return Vec::new();
    }
    state.set_current(Some(thread_id));
    vec![ConversationCommand::Notify(ConversationEvent::ThreadsChanged)]
}

fn delete_thread(state: &mut ConversationState, thread_id: &str) -> Vec<ConversationCommand> {
    state.cancel_stream_for_thread(thread_id);
    let Some(thread) = state.remove_thread(thread_id) else {
        return Vec::new();
    };

    let mut commands = vec![ConversationCommand::Persist(StoreOp::DeleteThread(
        metadata(&thread),
    ))];
    if state.current_thread_id() == Some(thread_id) {
        match state.threads().first().map(|next| next.id.clone()) {
            Some(next) => state.set_current(Some(next)),
            None => {
                state.set_current(None);
                commands.extend(create_thread(state));
                return commands;
            }
        }
    }
    commands.push(ConversationCommand::Notify(ConversationEvent::ThreadsChanged));
    commands
}

fn send(state: &mut ConversationState, text: &str) -> Vec<ConversationCommand> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if state.is_current_thread_streaming() {
        debug!("Ignoring send while the current thread is streaming");
        return Vec::new();
    }

    let mut commands = Vec::new();
    if state.current_thread().is_none() {
        commands.extend(create_thread(state));
    }
    let Some(thread_id) = state.current_thread_id().map(str::to_string) else {
        return commands;
    };
    let stream_id = state.next_stream_id();
    let Some(thread) = state.thread_mut(&thread_id) else {
        return commands;
    };

    if thread.has_default_title() && !thread.messages.iter().any(Message::is_user) {
        thread.title = title_from_text(text);
    }
    let user = Message::user(text);
    thread.messages.push(user.clone());
    thread.touch();

    let context: Vec<Message> = thread
        .messages
        .iter()
        .filter(|message| !message.streaming && !message.content.is_empty())
        .cloned()
        .collect();

    let placeholder = Message::placeholder();
    let target = StreamTarget {
        stream_id,
        thread_id: thread_id.clone(),
        message_id: placeholder.id.clone(),
    };
    thread.messages.push(placeholder);

    commands.push(ConversationCommand::Persist(StoreOp::SaveMessage {
        message: user,
        thread_id: thread_id.clone(),
    }));
    commands.push(ConversationCommand::Persist(StoreOp::SaveThread(metadata(
        thread,
    ))));

    let cancel_token = CancellationToken::new();
    if let Some(previous) = state.track_stream(ActiveStream {
        target: target.clone(),
        cancel_token: cancel_token.clone(),
    }) {
        debug!(
            stream_id = previous.target.stream_id,
            thread_id = %previous.target.thread_id,
            "Earlier stream keeps running untracked"
        );
    }
    state.input.clear();

    commands.push(ConversationCommand::SpawnStream(StreamRequest {
        target,
        messages: context,
        cancel_token,
    }));
    commands.push(ConversationCommand::Notify(ConversationEvent::ThreadsChanged));
    commands
}

fn append_chunk(
    state: &mut ConversationState,
    target: StreamTarget,
    content: String,
) -> Vec<ConversationCommand> {
    match state.apply_increment(&target.thread_id, &target.message_id, &content) {
        IncrementOutcome::Applied => {
            vec![ConversationCommand::Notify(ConversationEvent::Increment {
                thread_id: target.thread_id,
                message_id: target.message_id,
                content,
            })]
        }
        outcome => {
            debug!(stream_id = target.stream_id, ?outcome, "Dropping increment");
            Vec::new()
        }
    }
}

fn complete_stream(state: &mut ConversationState, target: &StreamTarget) -> Vec<ConversationCommand> {
    state.release_stream(target);
    let Some(thread) = state.thread_mut(&target.thread_id) else {
        return Vec::new();
    };
    let Some(message) = thread.message_mut(&target.message_id) else {
        return Vec::new();
    };
    if !message.streaming {
        return Vec::new();
    }
    message.finalize();
    let saved = message.clone();
    thread.touch();

    vec![
        ConversationCommand::Persist(StoreOp::SaveMessage {
            message: saved,
            thread_id: target.thread_id.clone(),
        }),
        ConversationCommand::Persist(StoreOp::SaveThread(metadata(thread))),
        ConversationCommand::Notify(ConversationEvent::StreamFinished {
            thread_id: target.thread_id.clone(),
            message_id: target.message_id.clone(),
        }),
    ]
}

fn fail_stream(
    state: &mut ConversationState,
    target: &StreamTarget,
    error: ChatError,
) -> Vec<ConversationCommand> {
    state.release_stream(target);
    let Some(thread) = state.thread_mut(&target.thread_id) else {
        debug!(stream_id = target.stream_id, %error, "Ignoring error for deleted thread");
        return Vec::new();
    };
    match thread.message(&target.message_id).map(|m| m.streaming) {
        Some(true) => {
            thread.remove_message(&target.message_id);
        }
        Some(false) => {
            debug!(stream_id = target.stream_id, %error, "Ignoring error after finalize");
            return Vec::new();
        }
        None => {
            debug!(stream_id = target.stream_id, %error, "Ignoring error for removed message");
            return Vec::new();
        }
    }

    state.last_error = Some(error.user_message());
    vec![
        ConversationCommand::Notify(ConversationEvent::SendFailed {
            thread_id: target.thread_id.clone(),
            error,
        }),
        ConversationCommand::Notify(ConversationEvent::ThreadsChanged),
    ]
}

/// Finalize streaming messages in the current thread and the tracked one,
/// stopping every send running in either.
fn cancel(state: &mut ConversationState) -> Vec<ConversationCommand> {
    let mut thread_ids: Vec<String> = Vec::new();
    if let Some(active) = state.take_active_stream() {
        active.cancel_token.cancel();
        thread_ids.push(active.target.thread_id);
    }
    if let Some(current) = state.current_thread_id() {
        if !thread_ids.iter().any(|id| id == current) {
            thread_ids.push(current.to_string());
        }
    }

    let mut commands = Vec::new();
    for thread_id in thread_ids {
        state.cancel_stream_for_thread(&thread_id);
        let Some(thread) = state.thread_mut(&thread_id) else {
            continue;
        };
        let mut persisted = false;
        for message in thread.messages.iter_mut().filter(|m| m.streaming) {
            message.finalize();
            if !message.content.is_empty() {
                commands.push(ConversationCommand::Persist(StoreOp::SaveMessage {
                    message: message.clone(),
                    thread_id: thread_id.clone(),
                }));
                persisted = true;
            }
            commands.push(ConversationCommand::Notify(
                ConversationEvent::StreamCancelled {
                    thread_id: thread_id.clone(),
                    message_id: message.id.clone(),
                },
            ));
        }
        if persisted {
            thread.touch();
            commands.push(ConversationCommand::Persist(StoreOp::SaveThread(metadata(
                thread,
            ))));
        }
    }
    commands
}

fn clear(state: &mut ConversationState) -> Vec<ConversationCommand> {
    let Some(thread_id) = state.current_thread_id().map(str::to_string) else {
        return Vec::new();
    };
    state.cancel_stream_for_thread(&thread_id);
    let Some(thread) = state.thread_mut(&thread_id) else {
        return Vec::new();
    };
    thread.messages.clear();
    thread.reset_title();
    thread.touch();

    vec![
        ConversationCommand::Persist(StoreOp::DeleteMessages {
            thread_id: thread_id.clone(),
        }),
        ConversationCommand::Persist(StoreOp::SaveThread(metadata(thread))),
        ConversationCommand::Notify(ConversationEvent::ThreadsChanged),
    ]
}

/// Drop the last user message and everything after it, then resend its text.
fn retry_last(state: &mut ConversationState) -> Vec<ConversationCommand> {
    if state.is_current_thread_streaming() {
        debug!("Ignoring retry while the current thread is streaming");
        return Vec::new();
    }
    let Some(thread_id) = state.current_thread_id().map(str::to_string) else {
        return Vec::new();
    };
    let Some(thread) = state.thread_mut(&thread_id) else {
        return Vec::new();
    };
    let Some(index) = thread.last_user_index() else {
        return Vec::new();
    };

    let removed: Vec<Message> = thread.messages.drain(index..).collect();
    let text = removed[0].content.clone();
    let mut commands: Vec<ConversationCommand> = removed
        .into_iter()
        .map(|message| {
            ConversationCommand::Persist(StoreOp::DeleteMessage {
                message_id: message.id,
            })
        })
        .collect();

    state.input = text.clone();
    commands.extend(send(state, &text));
    commands
}
