//! chats.* handlers

use super::{store_failure, with_store};
use crate::api::Created;
use crate::bridge::Caller;
use crate::envelope::{Empty, Envelope, NOT_FOUND};
use crate::events::{ChangeKind, ChangedEntity, DatabaseChange, DATABASE_CHANGE};
use crate::state::CoreState;
use crate::store::Chat;
use std::sync::Arc;

/// Handle chats.list
pub async fn handle_list(state: &Arc<CoreState>) -> Envelope<Vec<Chat>> {
    match with_store(state, |store| store.list_chats()).await {
        Ok(chats) => Envelope::success("Chat list retrieved", chats),
        Err(e) => store_failure("Failed to list chats", &e),
    }
}

/// Handle chats.create
pub async fn handle_create(state: &Arc<CoreState>, caller: &Caller) -> Envelope<Created> {
    match with_store(state, |store| store.create_chat(None)).await {
        Ok(id) => {
            caller.push(
                DATABASE_CHANGE,
                &DatabaseChange::new(ChangedEntity::Chat, ChangeKind::Insert),
            );
            Envelope::success("Chat created", Created { id })
        }
        Err(e) => store_failure("Failed to create chat", &e),
    }
}

/// Handle chats.delete
pub async fn handle_delete(state: &Arc<CoreState>, caller: &Caller, id: &str) -> Envelope<Empty> {
    let owned = id.to_string();
    match with_store(state, move |store| store.delete_chat(&owned)).await {
        Ok(true) => {
            caller.push(
                DATABASE_CHANGE,
                &DatabaseChange::new(ChangedEntity::Chat, ChangeKind::Delete),
            );
            Envelope::success("Chat deleted", Empty {})
        }
        Ok(false) => Envelope::status_only(NOT_FOUND, format!("Chat '{}' not found", id)),
        Err(e) => store_failure("Failed to delete chat", &e),
    }
}
