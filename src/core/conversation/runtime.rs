use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::actions::{
    apply_action, ConversationAction, ConversationCommand, ConversationEvent, StoreOp,
    StreamRequest,
};
use super::{ConversationSnapshot, ConversationState};
use crate::core::chat_stream::CompletionBackend;
use crate::core::config::AppSettings;
use crate::core::message::Message;
use crate::core::store::ThreadStore;

enum RuntimeMessage {
    Action(ConversationAction),
    UpdateSettings(AppSettings),
    Snapshot(oneshot::Sender<ConversationSnapshot>),
    Shutdown(oneshot::Sender<()>),
}

/// Cheap, cloneable front door to the conversation task.
///
/// Every method only enqueues work; ordering between calls from one handle
/// is preserved.
#[derive(Clone)]
pub struct ConversationHandle {
    tx: mpsc::UnboundedSender<RuntimeMessage>,
}

impl ConversationHandle {
    fn dispatch(&self, action: ConversationAction) {
        if self.tx.send(RuntimeMessage::Action(action)).is_err() {
            debug!("Conversation task has stopped; dropping action");
        }
    }

    pub fn create_thread(&self) {
        self.dispatch(ConversationAction::CreateThread);
    }

    pub fn select_thread(&self, thread_id: impl Into<String>) {
        self.dispatch(ConversationAction::SelectThread {
            thread_id: thread_id.into(),
        });
    }

    pub fn delete_thread(&self, thread_id: impl Into<String>) {
        self.dispatch(ConversationAction::DeleteThread {
            thread_id: thread_id.into(),
        });
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.dispatch(ConversationAction::SetInput { text: text.into() });
    }

    pub fn send(&self, text: impl Into<String>) {
        self.dispatch(ConversationAction::Send { text: text.into() });
    }

    pub fn cancel(&self) {
        self.dispatch(ConversationAction::Cancel);
    }

    pub fn clear(&self) {
        self.dispatch(ConversationAction::Clear);
    }

    pub fn retry_last(&self) {
        self.dispatch(ConversationAction::RetryLast);
    }

    pub fn dismiss_error(&self) {
        self.dispatch(ConversationAction::DismissError);
    }

    /// Settings apply to sends issued after this call.
    pub fn update_settings(&self, settings: AppSettings) {
        let _ = self.tx.send(RuntimeMessage::UpdateSettings(settings));
    }

    /// Returns `None` once the task has stopped.
    pub async fn snapshot(&self) -> Option<ConversationSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RuntimeMessage::Snapshot(reply)).ok()?;
        rx.await.ok()
    }

    /// Cancel the tracked stream and stop the task.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RuntimeMessage::Shutdown(reply)).is_ok() {
            let _ = rx.await;
        }
    }
}

struct ConversationRuntime {
    state: ConversationState,
    settings: AppSettings,
    store: Arc<ThreadStore>,
    backend: Arc<dyn CompletionBackend>,
    tx: mpsc::UnboundedSender<RuntimeMessage>,
    events: mpsc::UnboundedSender<ConversationEvent>,
}

/// Load stored threads and spawn the task that owns conversation state.
pub async fn start(
    store: Arc<ThreadStore>,
    backend: Arc<dyn CompletionBackend>,
    settings: AppSettings,
) -> (
    ConversationHandle,
    mpsc::UnboundedReceiver<ConversationEvent>,
    JoinHandle<()>,
) {
    let loader = Arc::clone(&store);
    let threads = match tokio::task::spawn_blocking(move || loader.load_all_threads()).await {
        Ok(threads) => threads,
        Err(err) => {
            warn!(error = %err, "Loading threads panicked; starting empty");
            Vec::new()
        }
    };
    info!(threads = threads.len(), "Loaded conversation threads");

    let (tx, rx) = mpsc::unbounded_channel();
    let (events, events_rx) = mpsc::unbounded_channel();
    let runtime = ConversationRuntime {
        state: ConversationState::from_threads(threads),
        settings,
        store,
        backend,
        tx: tx.clone(),
        events,
    };
    runtime.emit_repairs(runtime.store.drain_repairs());

    let task = tokio::spawn(runtime.run(rx));
    (ConversationHandle { tx }, events_rx, task)
}

impl ConversationRuntime {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RuntimeMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                RuntimeMessage::Action(action) => {
                    let commands = apply_action(&mut self.state, action);
                    self.execute(commands).await;
                }
                RuntimeMessage::UpdateSettings(settings) => self.settings = settings,
                RuntimeMessage::Snapshot(reply) => {
                    let _ = reply.send(self.state.snapshot());
                }
                RuntimeMessage::Shutdown(reply) => {
                    self.state.cancel_all_streams();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("Conversation task stopped");
    }

    async fn execute(&mut self, commands: Vec<ConversationCommand>) {
        for command in commands {
            match command {
                ConversationCommand::SpawnStream(request) => self.spawn_stream(request),
                ConversationCommand::Persist(op) => self.persist(op).await,
                ConversationCommand::Notify(event) => self.emit(event),
            }
        }
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    fn emit_repairs(&self, repairs: Vec<crate::core::store::RepairNotice>) {
        for notice in repairs {
            warn!(reason = %notice.reason, "Conversation store was rebuilt");
            self.emit(ConversationEvent::StoreRepaired(notice));
        }
    }

    /// Store writes run on the blocking pool but are awaited one at a time so
    /// they land in the order the state changed.
    async fn persist(&self, op: StoreOp) {
        let store = Arc::clone(&self.store);
        let operation = op.name();
        let joined = tokio::task::spawn_blocking(move || {
            let result = op.apply(&store);
            (result, store.drain_repairs())
        })
        .await;

        match joined {
            Ok((result, repairs)) => {
                self.emit_repairs(repairs);
                if let Err(err) = result {
                    warn!(operation, error = %err, "Store write failed");
                    self.emit(ConversationEvent::StoreFailed {
                        operation,
                        message: err.to_string(),
                    });
                }
            }
            Err(err) => {
                warn!(operation, error = %err, "Store task panicked");
                self.emit(ConversationEvent::StoreFailed {
                    operation,
                    message: err.to_string(),
                });
            }
        }
    }

    fn spawn_stream(&self, request: StreamRequest) {
        let StreamRequest {
            target,
            messages,
            cancel_token,
        } = request;
        let messages = context_window(messages, self.settings.history_limit);
        debug!(
            stream_id = target.stream_id,
            thread_id = %target.thread_id,
            context = messages.len(),
            "Starting completion stream"
        );
        let mut stream = self
            .backend
            .stream(messages, &self.settings, cancel_token.clone());
        let tx = self.tx.clone();

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let action = match item {
                    Ok(content) => ConversationAction::StreamChunk {
                        target: target.clone(),
                        content,
                    },
                    Err(error) => {
                        let _ = tx.send(RuntimeMessage::Action(
                            ConversationAction::StreamErrored { target, error },
                        ));
                        return;
                    }
                };
                if tx.send(RuntimeMessage::Action(action)).is_err() {
                    return;
                }
            }
            if !cancel_token.is_cancelled() {
                let _ = tx.send(RuntimeMessage::Action(ConversationAction::StreamCompleted {
                    target,
                }));
            }
        });
    }
}

/// Keep only the most recent `limit` messages.
pub(crate) fn context_window(messages: Vec<Message>, limit: Option<usize>) -> Vec<Message> {
    match limit {
        Some(limit) if messages.len() > limit => {
            let skip = messages.len() - limit;
            messages.into_iter().skip(skip).collect()
        }
        _ => messages,
    }
}
