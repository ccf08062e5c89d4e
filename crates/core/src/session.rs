use std::sync::Mutex;

use crate::types::CurrentUser;

/// Per-session context shared by every component.
///
/// Replaces process-wide globals: one `Session` is constructed per client
/// session and handed to each manager by reference, so independent sessions
/// can coexist (and be tested) in one process.
pub struct Session {
    user: CurrentUser,
    open: Mutex<OpenConversation>,
}

#[derive(Debug, Default, Clone, Copy)]
struct OpenConversation {
    contact_id: Option<i64>,
    conversation_id: Option<i64>,
}

impl Session {
    pub fn new(user: CurrentUser) -> Self {
        Self {
            user,
            open: Mutex::new(OpenConversation::default()),
        }
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    pub fn user_id(&self) -> i64 {
        self.user.id
    }

    /// Record the conversation the user just opened. `conversation_id` is
    /// `None` for a contact with no message history yet.
    pub fn open_conversation(&self, contact_id: i64, conversation_id: Option<i64>) {
        let mut open = self.open.lock().unwrap();
        open.contact_id = Some(contact_id);
        open.conversation_id = conversation_id;
    }

    pub fn close_conversation(&self) {
        *self.open.lock().unwrap() = OpenConversation::default();
    }

    pub fn current_conversation(&self) -> Option<i64> {
        self.open.lock().unwrap().conversation_id
    }

    pub fn current_contact(&self) -> Option<i64> {
        self.open.lock().unwrap().contact_id
    }

    pub fn is_conversation_open(&self, conversation_id: i64) -> bool {
        self.open.lock().unwrap().conversation_id == Some(conversation_id)
    }

    /// Adopt the server-assigned conversation id after an acknowledgement.
    /// The first message to a new contact creates the conversation
    /// server-side; the open view inherits its id here. No-op once an id
    /// is known or after the view moved on.
    pub fn adopt_conversation(&self, conversation_id: i64) {
        let mut open = self.open.lock().unwrap();
        if open.contact_id.is_some() && open.conversation_id.is_none() {
            open.conversation_id = Some(conversation_id);
        }
    }
}
