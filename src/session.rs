use crate::context::collect_context;
use crate::db::models::{Folder, GroundingMetadata, Message, Role};
use crate::db::{ConversationStore, Database, StoreError};
use crate::llm::{self, GenerationRequest, GenerationResult, LlmError};
use crate::settings::AppSettings;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Shown in the assistant's slot while a reply is outstanding.
pub const THINKING_PLACEHOLDER: &str = "Thinking…";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Complete,
    Error,
}

/// One message as the chat view shows it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub grounding: Option<GroundingMetadata>,
    pub status: EntryStatus,
    pub created_at: String,
}

impl TranscriptEntry {
    fn new(role: Role, content: String, status: EntryStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            grounding: None,
            status,
            created_at: crate::timestamp(),
        }
    }
}

impl From<Message> for TranscriptEntry {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            role: m.role,
            content: m.content,
            grounding: m.sources,
            status: EntryStatus::Complete,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Message is empty")]
    EmptyInput,
    #[error("Still waiting for the previous answer")]
    Busy,
    #[error("The conversation was reset before the answer arrived")]
    Reset,
}

impl Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// A submitted question whose answer has not been applied yet.
#[derive(Debug)]
pub struct PendingTurn {
    question: String,
    placeholder_id: String,
}

impl PendingTurn {
    pub fn question(&self) -> &str {
        &self.question
    }
}

/// In-memory transcript of one chat, plus the id of the stored conversation
/// once the first turn has been persisted.
///
/// At most one turn is outstanding at a time: while a placeholder is
/// pending, [`ChatSession::begin_turn`] refuses new input.
#[derive(Debug, Default)]
pub struct ChatSession {
    entries: Vec<TranscriptEntry>,
    pending: Option<String>,
    conversation_id: Option<String>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        if self.pending.is_some() {
            SessionState::AwaitingResponse
        } else {
            SessionState::Idle
        }
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Append the user's message and a thinking placeholder.
    pub fn begin_turn(&mut self, input: &str) -> Result<PendingTurn, SessionError> {
        let question = input.trim();
        if question.is_empty() {
            return Err(SessionError::EmptyInput);
        }
        if self.pending.is_some() {
            return Err(SessionError::Busy);
        }

        self.entries.push(TranscriptEntry::new(
            Role::User,
            question.to_string(),
            EntryStatus::Complete,
        ));
        let placeholder = TranscriptEntry::new(
            Role::Assistant,
            THINKING_PLACEHOLDER.to_string(),
            EntryStatus::Pending,
        );
        let placeholder_id = placeholder.id.clone();
        self.entries.push(placeholder);
        self.pending = Some(placeholder_id.clone());

        Ok(PendingTurn {
            question: question.to_string(),
            placeholder_id,
        })
    }

    /// Replace the turn's placeholder with the answer or an error message.
    ///
    /// Returns the finished entry, or `None` when the session was reset
    /// while the turn was outstanding.
    pub fn complete_turn(
        &mut self,
        turn: PendingTurn,
        outcome: &Result<GenerationResult, LlmError>,
    ) -> Option<TranscriptEntry> {
        if self.pending.as_deref() != Some(turn.placeholder_id.as_str()) {
            return None;
        }
        self.pending = None;

        let slot = self
            .entries
            .iter_mut()
            .find(|e| e.id == turn.placeholder_id)?;
        match outcome {
            Ok(result) => {
                slot.content = result.text.clone();
                slot.grounding = result.grounding.clone();
                slot.status = EntryStatus::Complete;
            }
            Err(e) => {
                slot.content = format!("Sorry, an error occurred: {}", e);
                slot.status = EntryStatus::Error;
            }
        }
        slot.created_at = crate::timestamp();
        Some(slot.clone())
    }

    /// Start over with an empty transcript; the next persisted turn opens a
    /// new conversation.
    ///
    /// An outstanding turn is only forgotten here. Its provider call keeps
    /// running, and a new turn may start before it finishes; the late answer
    /// is then discarded by `complete_turn`.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.pending = None;
        self.conversation_id = None;
    }

    /// Replace the transcript with a stored conversation.
    pub fn resume(&mut self, conversation_id: &str, messages: Vec<Message>) {
        self.entries = messages.into_iter().map(TranscriptEntry::from).collect();
        self.pending = None;
        self.conversation_id = Some(conversation_id.to_string());
    }

    /// Reopen the conversation that was current when the app last ran.
    /// A marker pointing at a deleted conversation is cleared.
    pub fn restore(db: &Database) -> Result<Self, StoreError> {
        let mut session = Self::new();
        let Some(id) = db.current_conversation()? else {
            return Ok(session);
        };
        if db.get_conversation(&id)?.is_none() {
            tracing::debug!(conversation = %id, "current conversation no longer exists");
            db.set_current_conversation(None)?;
            return Ok(session);
        }
        let messages = db.get_messages(&id)?;
        tracing::info!(conversation = %id, messages = messages.len(), "restored conversation");
        session.resume(&id, messages);
        Ok(session)
    }
}

fn lock(session: &Mutex<ChatSession>) -> MutexGuard<'_, ChatSession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run one chat turn against `session`.
///
/// The lock is taken only to begin and to complete the turn, never across
/// the provider call, so a second submission during the call sees
/// [`SessionError::Busy`]. Provider failures end up in the transcript, not
/// in the returned error. Successful turns are written to `store` when one
/// is given; store failures are logged and otherwise ignored.
pub async fn send_message(
    session: &Mutex<ChatSession>,
    input: &str,
    folders: &[Folder],
    settings: &AppSettings,
    store: Option<&dyn ConversationStore>,
) -> Result<TranscriptEntry, SessionError> {
    let turn = lock(session).begin_turn(input)?;

    let request = GenerationRequest {
        question: turn.question().to_string(),
        context: collect_context(folders, settings.context_budget),
        use_search: settings.use_search,
        system_prompt: settings.system_prompt.clone(),
    };
    tracing::info!(
        provider = %settings.active_provider,
        context_chars = request.context.chars().count(),
        "sending chat turn"
    );

    let outcome = llm::generate(settings.active_provider, settings.active_config(), &request).await;
    if let Err(e) = &outcome {
        tracing::warn!(provider = %settings.active_provider, error = %e, "chat turn failed");
    }

    let question = turn.question().to_string();
    let reply = lock(session)
        .complete_turn(turn, &outcome)
        .ok_or(SessionError::Reset)?;

    if let (Ok(_), Some(store)) = (&outcome, store) {
        persist_turn(session, store, settings, &question, &reply);
    }

    Ok(reply)
}

fn persist_turn(
    session: &Mutex<ChatSession>,
    store: &dyn ConversationStore,
    settings: &AppSettings,
    question: &str,
    reply: &TranscriptEntry,
) {
    let existing = lock(session).conversation_id.clone();
    let conversation_id = match existing {
        Some(id) => id,
        None => {
            let title = format!("Chat - {}", chrono::Local::now().format("%Y-%m-%d"));
            match store.create_conversation(&title, settings.active_provider.as_str()) {
                Ok(conversation) => {
                    if let Err(e) = store.set_current_conversation(Some(&conversation.id)) {
                        tracing::warn!(error = %e, "failed to remember current conversation");
                    }
                    lock(session)
                        .conversation_id
                        .get_or_insert(conversation.id)
                        .clone()
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create conversation");
                    return;
                }
            }
        }
    };

    if let Err(e) = store.add_message(&conversation_id, Role::User, question, None) {
        tracing::warn!(conversation = %conversation_id, error = %e, "failed to save user message");
    }
    if let Err(e) = store.add_message(
        &conversation_id,
        Role::Assistant,
        &reply.content,
        reply.grounding.as_ref(),
    ) {
        tracing::warn!(conversation = %conversation_id, error = %e, "failed to save assistant message");
    }
}
