//! «Якорь»: единственное переиспользуемое интерактивное сообщение на чат.
//!
//! Все экраны персонала рисуются правкой одного и того же сообщения, а не
//! новыми сообщениями на каждый шаг. Если править нельзя (якорь удалён,
//! устарел), старый якорь по возможности удаляется и отправляется новый —
//! в чате никогда не остаётся двух живых экранов одновременно.

use crate::gateway::{Gateway, GatewayError};
use std::collections::HashMap;
use teloxide::types::InlineKeyboardMarkup;
use tokio::sync::Mutex;

pub struct AnchorScreens {
    anchors: Mutex<HashMap<i64, i32>>,
}

impl AnchorScreens {
    pub fn new() -> Self {
        Self {
            anchors: Mutex::new(HashMap::new()),
        }
    }

    pub async fn current(&self, chat_id: i64) -> Option<i32> {
        self.anchors.lock().await.get(&chat_id).copied()
    }

    async fn set(&self, chat_id: i64, message_id: i32) {
        self.anchors.lock().await.insert(chat_id, message_id);
    }

    /// Рисует экран в якоре чата и возвращает id актуального якоря.
    ///
    /// «message is not modified» — не ошибка: содержимое уже на месте,
    /// пробуем дообновить только клавиатуру и оставляем старый id.
    /// Фолбэк «удалить и послать заново» — только для реальных отказов правки.
    pub async fn show<G: Gateway>(
        &self,
        gateway: &G,
        chat_id: i64,
        text: &str,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<i32, GatewayError> {
        if let Some(previous) = self.current(chat_id).await {
            match gateway
                .edit_text(chat_id, previous, text, Some(keyboard.clone()))
                .await
            {
                Ok(()) => return Ok(previous),
                Err(GatewayError::NotModified) => {
                    if let Err(error) = gateway.edit_keyboard(chat_id, previous, keyboard).await {
                        if !error.is_benign() {
                            tracing::warn!(
                                chat_id = chat_id,
                                error = %error,
                                "Не удалось обновить клавиатуру якоря"
                            );
                        }
                    }
                    return Ok(previous);
                }
                Err(error) => {
                    tracing::debug!(
                        chat_id = chat_id,
                        anchor_id = previous,
                        error = %error,
                        "Правка якоря не удалась, пересоздаём"
                    );
                    // best-effort: старый якорь мог быть уже удалён
                    let _ = gateway.delete_message(chat_id, previous).await;
                }
            }
        }

        let new_id = gateway.send_text(chat_id, text, Some(keyboard)).await?;
        self.set(chat_id, new_id).await;
        Ok(new_id)
    }
}

impl Default for AnchorScreens {
    fn default() -> Self {
        Self::new()
    }
}
