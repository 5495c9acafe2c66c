//! Optimistic chat conversation.
//!
//! A send appends a local echo immediately and marks the conversation busy.
//! The server answers with the stored user message and the bot reply; that
//! pair replaces the echo. On failure the echo stays and a local notice is
//! appended. Either way the busy flag clears.

use crate::client::FinanceClient;
use crate::error::ApiError;
use crate::Result;
use b4uspend_types::{ChatMessage, ChatTurn};
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

pub const FAILURE_NOTICE: &str = "Sorry, something went wrong. Please try again.";
/// Longest message the server accepts.
pub const MAX_MESSAGE_CHARS: usize = 2000;

/// Token for the one outstanding send. Consumed by exactly one of
/// [`Conversation::reconcile`] or [`Conversation::fail`].
#[derive(Debug)]
pub struct PendingSend {
    turn_id: String,
    content: String,
}

impl PendingSend {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn turn_id(&self) -> &str {
        &self.turn_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
    busy: bool,
    hydrated: bool,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `content` and append its optimistic echo.
    pub fn begin_send(&mut self, content: &str) -> Result<PendingSend> {
        if self.busy {
            return Err(ApiError::Busy);
        }
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::EmptyMessage);
        }
        if content.chars().count() > MAX_MESSAGE_CHARS {
            return Err(ApiError::MessageTooLong(MAX_MESSAGE_CHARS));
        }

        let turn = ChatTurn::optimistic(content);
        let pending = PendingSend {
            turn_id: turn.id.clone(),
            content: content.to_string(),
        };
        self.turns.push(turn);
        self.busy = true;
        Ok(pending)
    }

    /// Replace the echo with the server's records, in order.
    pub fn reconcile(&mut self, pending: PendingSend, messages: Vec<ChatMessage>) {
        self.turns.retain(|turn| turn.id != pending.turn_id);
        self.turns.extend(messages.into_iter().map(ChatTurn::from));
        self.busy = false;
    }

    /// Keep the echo and append a failure notice.
    pub fn fail(&mut self, pending: PendingSend) {
        debug!(target: "b4uspend::chat", "Send of {} failed", pending.turn_id);
        self.turns.push(ChatTurn::failure_notice(FAILURE_NOTICE));
        self.busy = false;
    }

    /// Load server history. Only the first call on an idle conversation applies.
    pub fn hydrate(&mut self, history: Vec<ChatMessage>) -> bool {
        if self.hydrated || self.busy {
            return false;
        }
        self.turns = history.into_iter().map(ChatTurn::from).collect();
        self.hydrated = true;
        true
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// Hold the conversation busy while the server history is deleted.
    pub fn begin_clear(&mut self) -> Result<()> {
        if self.busy {
            return Err(ApiError::Busy);
        }
        self.busy = true;
        Ok(())
    }

    /// End a clear started with [`Conversation::begin_clear`]. The turns are
    /// dropped only when the server history was deleted.
    pub fn finish_clear(&mut self, deleted: bool) {
        if deleted {
            self.clear();
        }
        self.busy = false;
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated
    }
}

/// A conversation bound to the chat endpoints.
#[derive(Clone)]
pub struct ChatSession {
    client: FinanceClient,
    conversation: Arc<Mutex<Conversation>>,
    history_limit: u32,
}

impl ChatSession {
    pub fn new(client: FinanceClient, history_limit: u32) -> Self {
        Self {
            client,
            conversation: Arc::new(Mutex::new(Conversation::new())),
            history_limit,
        }
    }

    /// Fetch history and load it into the conversation.
    pub async fn open(&self) -> Result<()> {
        let history = self.client.chat_history(self.history_limit).await?;
        let count = history.messages.len();
        if lock(&self.conversation).hydrate(history.messages) {
            debug!(target: "b4uspend::chat", "Loaded {} messages", count);
        }
        Ok(())
    }

    /// Start a send. Validation and the optimistic echo happen before this
    /// returns; the future resolves once the conversation is reconciled.
    ///
    /// If every handle to this conversation is dropped before the server
    /// answers, the answer is discarded. Dropping the future itself before it
    /// resolves fails the send locally.
    pub fn send(&self, content: &str) -> BoxFuture<'static, Result<()>> {
        let pending = match lock(&self.conversation).begin_send(content) {
            Ok(pending) => pending,
            Err(e) => return future::ready(Err(e)).boxed(),
        };

        let client = self.client.clone();
        let content = pending.content().to_string();
        let in_flight = InFlightSend {
            conversation: Arc::downgrade(&self.conversation),
            pending: Some(pending),
        };
        async move {
            let result = client.send_chat(&content).await;
            in_flight.finish(result)
        }
        .boxed()
    }

    /// Delete the server history, then empty the local turns. Sends are
    /// rejected until the delete completes.
    pub async fn clear(&self) -> Result<()> {
        lock(&self.conversation).begin_clear()?;
        let mut clearing = Clearing {
            conversation: &self.conversation,
            deleted: false,
        };
        self.client.clear_chat().await?;
        clearing.deleted = true;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<ChatTurn> {
        lock(&self.conversation).turns().to_vec()
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.conversation).is_busy()
    }
}

/// The outstanding send. Fails its echo if dropped before the reply is applied.
struct InFlightSend {
    conversation: Weak<Mutex<Conversation>>,
    pending: Option<PendingSend>,
}

impl InFlightSend {
    fn finish(mut self, result: Result<Vec<ChatMessage>>) -> Result<()> {
        match self.pending.take() {
            Some(pending) => apply(&self.conversation, pending, result),
            None => result.map(|_| ()),
        }
    }
}

impl Drop for InFlightSend {
    fn drop(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        if let Some(conversation) = self.conversation.upgrade() {
            debug!(target: "b4uspend::chat", "Send of {} abandoned before the reply", pending.turn_id());
            lock(&conversation).fail(pending);
        }
    }
}

/// Releases the busy flag when a clear ends, however it ends.
struct Clearing<'a> {
    conversation: &'a Mutex<Conversation>,
    deleted: bool,
}

impl Drop for Clearing<'_> {
    fn drop(&mut self) {
        lock(self.conversation).finish_clear(self.deleted);
    }
}

fn apply(
    conversation: &Weak<Mutex<Conversation>>,
    pending: PendingSend,
    result: Result<Vec<ChatMessage>>,
) -> Result<()> {
    let Some(conversation) = conversation.upgrade() else {
        debug!(target: "b4uspend::chat", "Conversation closed, discarding reply");
        return result.map(|_| ());
    };
    let mut conversation = lock(&conversation);
    match result {
        Ok(messages) => {
            conversation.reconcile(pending, messages);
            Ok(())
        }
        Err(e) => {
            warn!(target: "b4uspend::chat", "Chat send failed: {}", e);
            conversation.fail(pending);
            Err(e)
        }
    }
}

fn lock(conversation: &Mutex<Conversation>) -> MutexGuard<'_, Conversation> {
    conversation.lock().unwrap_or_else(PoisonError::into_inner)
}
