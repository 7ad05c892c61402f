//! Реестр уведомлений: какие сообщения сейчас представляют карточку заявки
//! в чатах персонала, плюс уведомление автора заявки.
//!
//! Живёт только в памяти процесса. После рестарта записи теряются — уже
//! разосланные карточки становятся неудаляемыми и молча переживут попытку
//! ретракции. Это принятое ограничение, а не дефект.

use std::collections::HashMap;
use tokio::sync::Mutex;

/// Адрес одного отправленного сообщения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i32,
}

/// На пару (заявка, сотрудник) может приходиться несколько сообщений:
/// альбом вложений плюс карточка с кнопками.
pub struct NotificationLedger {
    cards: Mutex<HashMap<(i64, i64), Vec<MessageRef>>>,
    user_notices: Mutex<HashMap<i64, MessageRef>>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self {
            cards: Mutex::new(HashMap::new()),
            user_notices: Mutex::new(HashMap::new()),
        }
    }

    pub async fn remember(&self, ticket_id: i64, staff_id: i64, chat_id: i64, message_id: i32) {
        self.cards
            .lock()
            .await
            .entry((ticket_id, staff_id))
            .or_default()
            .push(MessageRef {
                chat_id,
                message_id,
            });
    }

    /// Снимок списка сообщений для пары (заявка, сотрудник).
    pub async fn list(&self, ticket_id: i64, staff_id: i64) -> Vec<MessageRef> {
        self.cards
            .lock()
            .await
            .get(&(ticket_id, staff_id))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn forget(&self, ticket_id: i64, staff_id: i64) -> Vec<MessageRef> {
        self.cards
            .lock()
            .await
            .remove(&(ticket_id, staff_id))
            .unwrap_or_default()
    }

    /// Чистит записи всех сотрудников по заявке — вызывается при её разрешении.
    pub async fn forget_all(&self, ticket_id: i64) -> Vec<(i64, Vec<MessageRef>)> {
        let mut cards = self.cards.lock().await;
        let keys: Vec<(i64, i64)> = cards
            .keys()
            .filter(|(tid, _)| *tid == ticket_id)
            .copied()
            .collect();
        keys.into_iter()
            .filter_map(|key| cards.remove(&key).map(|msgs| (key.1, msgs)))
            .collect()
    }

    // ---- уведомление автора ----

    pub async fn remember_user(&self, ticket_id: i64, chat_id: i64, message_id: i32) {
        self.user_notices.lock().await.insert(
            ticket_id,
            MessageRef {
                chat_id,
                message_id,
            },
        );
    }

    pub async fn user_notice(&self, ticket_id: i64) -> Option<MessageRef> {
        self.user_notices.lock().await.get(&ticket_id).copied()
    }

    pub async fn forget_user(&self, ticket_id: i64) -> Option<MessageRef> {
        self.user_notices.lock().await.remove(&ticket_id)
    }
}

impl Default for NotificationLedger {
    fn default() -> Self {
        Self::new()
    }
}
