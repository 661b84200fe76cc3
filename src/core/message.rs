use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Title given to threads that have not seen a user message yet.
pub const DEFAULT_THREAD_TITLE: &str = "New Chat";

/// Maximum number of characters kept when deriving a title from user input.
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

/// A single entry in a conversation thread.
///
/// `streaming` stays true while increments are still being appended. Such a
/// message must never reach the store; it is finalized first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub streaming: bool,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            streaming: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Empty assistant message that will receive stream increments.
    pub fn placeholder() -> Self {
        Self {
            streaming: true,
            ..Self::new(Role::Assistant, String::new())
        }
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    pub fn finalize(&mut self) {
        self.streaming = false;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationThread {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: DEFAULT_THREAD_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_THREAD_TITLE
    }

    pub fn reset_title(&mut self) {
        self.title = DEFAULT_THREAD_TITLE.to_string();
    }

    /// A thread is streaming while any of its messages still is.
    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(|message| message.streaming)
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == message_id)
    }

    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .find(|message| message.id == message_id)
    }

    pub fn remove_message(&mut self, message_id: &str) -> Option<Message> {
        let index = self
            .messages
            .iter()
            .position(|message| message.id == message_id)?;
        Some(self.messages.remove(index))
    }

    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(Message::is_user)
    }
}

impl Default for ConversationThread {
    fn default() -> Self {
        Self::new()
    }
}

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Derive a thread title from the first user message.
pub fn title_from_text(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return DEFAULT_THREAD_TITLE.to_string();
    }
    collapsed.chars().take(TITLE_MAX_CHARS).collect()
}
