//! Line-oriented chat loop on top of the conversation runtime.

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::core::chat_stream::{ChatClient, CompletionBackend};
use crate::core::config::AppSettings;
use crate::core::conversation::{self, ConversationEvent, ConversationHandle, ConversationSnapshot};
use crate::core::message::{ConversationThread, Role};
use crate::core::store::ThreadStore;

const HELP: &str = "\
Commands:
  /new              Start a new thread
  /threads          List threads
  /switch N         Switch to thread N
  /delete N         Delete thread N
  /clear            Remove every message from the current thread
  /retry            Ask again for the last answer
  /cancel           Stop the answer being streamed
  /dismiss          Forget the last error
  /help             Show this list
  /quit             Leave
Anything else is sent as a message.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Send(String),
    New,
    Threads,
    Switch(usize),
    Delete(usize),
    Clear,
    Retry,
    Cancel,
    Dismiss,
    Help,
    Quit,
    Empty,
    Invalid(String),
}

impl ReplCommand {
    /// Thread numbers are 1-based, as printed by `/threads`.
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return ReplCommand::Empty;
        }
        let Some(command) = trimmed.strip_prefix('/') else {
            return ReplCommand::Send(trimmed.to_string());
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let argument = parts.next();
        match (name, argument) {
            ("new", None) => ReplCommand::New,
            ("threads", None) => ReplCommand::Threads,
            ("switch", Some(n)) => parse_index(n)
                .map(ReplCommand::Switch)
                .unwrap_or_else(|| ReplCommand::Invalid("Usage: /switch N".to_string())),
            ("delete", Some(n)) => parse_index(n)
                .map(ReplCommand::Delete)
                .unwrap_or_else(|| ReplCommand::Invalid("Usage: /delete N".to_string())),
            ("switch", None) => ReplCommand::Invalid("Usage: /switch N".to_string()),
            ("delete", None) => ReplCommand::Invalid("Usage: /delete N".to_string()),
            ("clear", None) => ReplCommand::Clear,
            ("retry", None) => ReplCommand::Retry,
            ("cancel", None) => ReplCommand::Cancel,
            ("dismiss", None) => ReplCommand::Dismiss,
            ("help", None) => ReplCommand::Help,
            ("quit" | "exit", None) => ReplCommand::Quit,
            _ => ReplCommand::Invalid(format!("Unknown command: /{command}. Try /help")),
        }
    }
}

fn parse_index(text: &str) -> Option<usize> {
    text.parse::<usize>().ok().filter(|n| *n > 0)
}

pub async fn run_chat(settings: AppSettings, database_path: PathBuf) -> Result<(), Box<dyn Error>> {
    let store = tokio::task::spawn_blocking(move || ThreadStore::open(database_path)).await??;
    let backend: Arc<dyn CompletionBackend> = Arc::new(ChatClient::new()?);

    println!("💬 threadline · {} at {}", settings.model, settings.server_url);
    println!("Type /help for commands.");

    let (handle, mut events, task) =
        conversation::start(Arc::new(store), backend, settings).await;
    let mut view = ChatView::default();
    if let Some(snapshot) = handle.snapshot().await {
        view.show_current(&snapshot);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !view.handle_command(&handle, ReplCommand::parse(&line)).await {
                    break;
                }
            }
            Some(event) = events.recv() => view.render_event(event),
        }
    }

    handle.shutdown().await;
    let _ = task.await;
    Ok(())
}

#[derive(Default)]
struct ChatView {
    current_thread_id: Option<String>,
    open_message_id: Option<String>,
}

impl ChatView {
    /// Returns false when the loop should end.
    async fn handle_command(&mut self, handle: &ConversationHandle, command: ReplCommand) -> bool {
        match command {
            ReplCommand::Empty => {}
            ReplCommand::Send(text) => handle.send(text),
            ReplCommand::New => {
                handle.create_thread();
                println!("Started a new thread.");
            }
            ReplCommand::Threads => {
                if let Some(snapshot) = handle.snapshot().await {
                    print_threads(&snapshot);
                }
            }
            ReplCommand::Switch(n) => {
                if let Some(thread_id) = self.thread_at(handle, n).await {
                    handle.select_thread(thread_id);
                }
            }
            ReplCommand::Delete(n) => {
                if let Some(thread_id) = self.thread_at(handle, n).await {
                    handle.delete_thread(thread_id);
                    println!("Deleted thread {n}.");
                }
            }
            ReplCommand::Clear => handle.clear(),
            ReplCommand::Retry => handle.retry_last(),
            ReplCommand::Cancel => handle.cancel(),
            ReplCommand::Dismiss => handle.dismiss_error(),
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => return false,
            ReplCommand::Invalid(message) => eprintln!("⚠️  {message}"),
        }

        if let Some(snapshot) = handle.snapshot().await {
            if snapshot.current_thread_id != self.current_thread_id {
                self.show_current(&snapshot);
            }
        }
        true
    }

    async fn thread_at(&self, handle: &ConversationHandle, n: usize) -> Option<String> {
        let snapshot = handle.snapshot().await?;
        let thread = snapshot.threads.get(n - 1);
        if thread.is_none() {
            eprintln!("⚠️  No thread {n}. Use /threads to list them.");
        }
        thread.map(|thread| thread.id.clone())
    }

    fn show_current(&mut self, snapshot: &ConversationSnapshot) {
        self.current_thread_id = snapshot.current_thread_id.clone();
        self.open_message_id = None;
        if let Some(thread) = snapshot.current_thread() {
            print_thread(thread);
        }
    }

    fn render_event(&mut self, event: ConversationEvent) {
        match event {
            ConversationEvent::Increment {
                thread_id,
                message_id,
                content,
            } => {
                if self.current_thread_id.as_deref() != Some(thread_id.as_str()) {
                    return;
                }
                if self.open_message_id.as_deref() != Some(message_id.as_str()) {
                    print!("🤖 ");
                    self.open_message_id = Some(message_id);
                }
                print!("{content}");
                let _ = std::io::stdout().flush();
            }
            ConversationEvent::StreamFinished { message_id, .. } => {
                if self.open_message_id.as_deref() == Some(message_id.as_str()) {
                    println!();
                    self.open_message_id = None;
                }
            }
            ConversationEvent::StreamCancelled { message_id, .. } => {
                if self.open_message_id.as_deref() == Some(message_id.as_str()) {
                    println!(" [cancelled]");
                    self.open_message_id = None;
                } else {
                    println!("[cancelled]");
                }
            }
            ConversationEvent::SendFailed { error, .. } => {
                if self.open_message_id.take().is_some() {
                    println!();
                }
                eprintln!("❌ {}", error.user_message());
            }
            ConversationEvent::StoreRepaired(notice) => {
                eprintln!("⚠️  Thread database was rebuilt: {}", notice.reason);
            }
            ConversationEvent::StoreFailed { operation, message } => {
                eprintln!("⚠️  Could not {operation}: {message}");
            }
            ConversationEvent::ThreadsChanged => {}
        }
    }
}

fn print_threads(snapshot: &ConversationSnapshot) {
    if snapshot.threads.is_empty() {
        println!("No threads yet.");
        return;
    }
    for (index, thread) in snapshot.threads.iter().enumerate() {
        let marker = if snapshot.current_thread_id.as_deref() == Some(thread.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker}{:>2}. {} ({} messages)",
            index + 1,
            thread.title,
            thread.messages.len()
        );
    }
}

fn print_thread(thread: &ConversationThread) {
    println!("── {} ──", thread.title);
    for message in &thread.messages {
        let label = match message.role {
            Role::User => "you>",
            Role::Assistant => "🤖",
            Role::System => "system>",
        };
        println!("{label} {}", message.content);
    }
}
