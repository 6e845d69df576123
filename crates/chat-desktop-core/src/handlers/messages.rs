//! messages.* handlers

use super::{store_failure, with_store};
use crate::api::Created;
use crate::bridge::Caller;
use crate::envelope::Envelope;
use crate::events::{ChangeKind, ChangedEntity, DatabaseChange, DATABASE_CHANGE};
use crate::state::CoreState;
use crate::store::{Message, NewMessage};
use std::sync::Arc;

/// Handle messages.getHistory
pub async fn handle_get_history(state: &Arc<CoreState>, chat_id: &str) -> Envelope<Vec<Message>> {
    let chat_id = chat_id.to_string();
    match with_store(state, move |store| store.history(&chat_id)).await {
        Ok(messages) => Envelope::success("Message history retrieved", messages),
        Err(e) => store_failure("Failed to load message history", &e),
    }
}

/// Handle messages.append
pub async fn handle_append(state: &Arc<CoreState>, caller: &Caller, message: &NewMessage) -> Envelope<Created> {
    let message = message.clone();
    match with_store(state, move |store| store.append_message(&message)).await {
        Ok(id) => {
            caller.push(
                DATABASE_CHANGE,
                &DatabaseChange::new(ChangedEntity::Message, ChangeKind::Insert),
            );
            Envelope::success("Message appended", Created { id })
        }
        Err(e) => store_failure("Failed to append message", &e),
    }
}
