//! Тестовый шлюз: записывает вызовы и отдаёт заранее заготовленные ошибки.

use crate::gateway::{Gateway, GatewayError};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};
use teloxide::types::InlineKeyboardMarkup;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send {
        chat_id: i64,
        message_id: i32,
        text: String,
    },
    EditText {
        chat_id: i64,
        message_id: i32,
        text: String,
    },
    EditKeyboard {
        chat_id: i64,
        message_id: i32,
    },
    Delete {
        chat_id: i64,
        message_id: i32,
    },
}

pub struct RecordingGateway {
    calls: Mutex<Vec<Call>>,
    next_message_id: AtomicI32,
    send_failures: Mutex<VecDeque<GatewayError>>,
    edit_failures: Mutex<VecDeque<GatewayError>>,
    delete_failures: Mutex<VecDeque<GatewayError>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            next_message_id: AtomicI32::new(1),
            send_failures: Mutex::new(VecDeque::new()),
            edit_failures: Mutex::new(VecDeque::new()),
            delete_failures: Mutex::new(VecDeque::new()),
        }
    }

    pub fn queue_send_failure(&self, error: GatewayError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn queue_edit_failure(&self, error: GatewayError) {
        self.edit_failures.lock().unwrap().push_back(error);
    }

    pub fn queue_delete_failure(&self, error: GatewayError) {
        self.delete_failures.lock().unwrap().push_back(error);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Send { .. }))
            .count()
    }

    pub fn deleted_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Delete { .. }))
            .count()
    }

    pub fn deleted(&self, chat_id: i64, message_id: i32) -> bool {
        self.calls().iter().any(|c| {
            matches!(c, Call::Delete { chat_id: c_id, message_id: m_id }
                if *c_id == chat_id && *m_id == message_id)
        })
    }

    /// Тексты отправленных сообщений в указанный чат.
    pub fn sent_texts(&self, chat_id: i64) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|c| match c {
                Call::Send {
                    chat_id: c_id,
                    text,
                    ..
                } if *c_id == chat_id => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn take_failure(queue: &Mutex<VecDeque<GatewayError>>) -> Option<GatewayError> {
        queue.lock().unwrap().pop_front()
    }
}

impl Default for RecordingGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway for RecordingGateway {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        _keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<i32, GatewayError> {
        if let Some(error) = Self::take_failure(&self.send_failures) {
            return Err(error);
        }
        let message_id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
        self.record(Call::Send {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(message_id)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        _keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), GatewayError> {
        if let Some(error) = Self::take_failure(&self.edit_failures) {
            return Err(error);
        }
        self.record(Call::EditText {
            chat_id,
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        _keyboard: InlineKeyboardMarkup,
    ) -> Result<(), GatewayError> {
        if let Some(error) = Self::take_failure(&self.edit_failures) {
            return Err(error);
        }
        self.record(Call::EditKeyboard {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), GatewayError> {
        if let Some(error) = Self::take_failure(&self.delete_failures) {
            return Err(error);
        }
        self.record(Call::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }
}
