use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
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

/// How a message stopped accepting content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seal {
    Completed,
    Failed,
    Cancelled,
}

/// Returned when content is appended to a message that is already sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SealedMessage(pub Seal);

impl fmt::Display for SealedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "message is sealed ({:?})", self.0)
    }
}

impl std::error::Error for SealedMessage {}

/// A transcript entry. Content only grows while the message is open and is
/// frozen once sealed.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    content: String,
    seal: Option<Seal>,
}

impl Message {
    /// A finished message, e.g. a user turn.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            seal: Some(Seal::Completed),
        }
    }

    /// An empty, open assistant message for a session to stream into.
    pub fn placeholder() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            seal: None,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn seal(&self) -> Option<Seal> {
        self.seal
    }

    pub fn is_sealed(&self) -> bool {
        self.seal.is_some()
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn push_str(&mut self, text: &str) -> Result<(), SealedMessage> {
        if let Some(seal) = self.seal {
            return Err(SealedMessage(seal));
        }
        self.content.push_str(text);
        Ok(())
    }

    /// First seal wins; later calls are ignored.
    pub fn seal_as(&mut self, seal: Seal) {
        if self.seal.is_none() {
            self.seal = Some(seal);
        }
    }
}

/// A message shared between the transcript (strong) and a session (weak).
#[derive(Debug, Clone)]
pub struct SharedMessage(Arc<RwLock<Message>>);

impl SharedMessage {
    pub fn new(message: Message) -> Self {
        Self(Arc::new(RwLock::new(message)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Message> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Message> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn downgrade(&self) -> WeakMessage {
        WeakMessage(Arc::downgrade(&self.0))
    }

    pub fn snapshot(&self) -> Message {
        self.read().clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct WeakMessage(std::sync::Weak<RwLock<Message>>);

impl WeakMessage {
    pub fn upgrade(&self) -> Option<SharedMessage> {
        self.0.upgrade().map(SharedMessage)
    }
}

/// Ordered conversation owned by a surface.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<SharedMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) -> SharedMessage {
        let shared = SharedMessage::new(message);
        self.messages.push(shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&SharedMessage> {
        self.messages.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedMessage> {
        self.messages.iter()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.iter().map(SharedMessage::snapshot).collect()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
