//! Обёртка над Telegram Bot API: типизированная классификация ошибок
//! и ограниченные ретраи с бэкоффом.
//!
//! Ретраим только то, что имеет смысл ретраить: rate limit (с учётом
//! подсказанной паузы) и сетевые сбои. «Шумные» ошибки — not modified,
//! удалённое сообщение, заблокировавший бота пользователь — возвращаются
//! сразу, вызывающий сам решает, глотать их или нет.

use rand::Rng;
use std::time::Duration;
use teloxide::ApiError;
use teloxide::RequestError;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardMarkup, MessageId, ParseMode};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Сообщение не изменилось")]
    NotModified,
    #[error("Сообщение или чат не найдены")]
    NotFound,
    #[error("Доставка запрещена: бот заблокирован или чат недоступен")]
    Forbidden,
    #[error("Превышен лимит запросов, ожидание {0:?}")]
    RateLimited(Duration),
    #[error("Сетевая ошибка")]
    Network,
    #[error("Ошибка Telegram API: {0}")]
    Other(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::RateLimited(_) | GatewayError::Network)
    }

    /// «Тихие» ошибки: сообщение уже удалено/не изменилось/чат закрыт.
    /// Их глотают все best-effort операции (ретракция карточек, якоря).
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            GatewayError::NotModified | GatewayError::NotFound | GatewayError::Forbidden
        )
    }
}

pub fn classify(error: &RequestError) -> GatewayError {
    match error {
        RequestError::Api(api) => match api {
            ApiError::MessageNotModified => GatewayError::NotModified,
            ApiError::MessageToDeleteNotFound
            | ApiError::MessageToEditNotFound
            | ApiError::MessageIdInvalid
            | ApiError::MessageCantBeDeleted
            | ApiError::ChatNotFound => GatewayError::NotFound,
            ApiError::BotBlocked
            | ApiError::UserDeactivated
            | ApiError::CantInitiateConversation
            | ApiError::CantTalkWithBots => GatewayError::Forbidden,
            other => GatewayError::Other(other.to_string()),
        },
        RequestError::RetryAfter(seconds) => GatewayError::RateLimited(seconds.duration()),
        RequestError::Network(_) | RequestError::Io(_) => GatewayError::Network,
        other => GatewayError::Other(other.to_string()),
    }
}

/// Шов для тестирования: координатор принятия и рендерер якоря работают
/// с этим трейтом, а не с конкретным Bot.
pub trait Gateway: Send + Sync {
    fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> impl std::future::Future<Output = Result<i32, GatewayError>> + Send;

    fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;

    fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        keyboard: InlineKeyboardMarkup,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;

    fn delete_message(
        &self,
        chat_id: i64,
        message_id: i32,
    ) -> impl std::future::Future<Output = Result<(), GatewayError>> + Send;
}

const MAX_ATTEMPTS: u32 = 5;

// 0.4s, 0.8s, 1.6s, ... максимум 5s, плюс джиттер
fn backoff_delay(attempt: u32) -> Duration {
    let base = (0.4f64 * 2f64.powi(attempt.saturating_sub(1) as i32)).min(5.0);
    let jitter = rand::rng().random_range(0.0..0.25);
    Duration::from_secs_f64(base + jitter)
}

#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    async fn with_retry<T, F, Fut>(&self, context: &str, mut call: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::IntoFuture<Output = Result<T, RequestError>>,
    {
        let mut attempt = 1u32;
        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => classify(&error),
            };

            if !error.is_retryable() || attempt >= MAX_ATTEMPTS {
                if error.is_retryable() {
                    tracing::error!(context = context, attempts = attempt, "Исчерпаны попытки");
                }
                return Err(error);
            }

            let delay = match error {
                GatewayError::RateLimited(wait) => {
                    tracing::warn!(
                        context = context,
                        wait = ?wait,
                        attempt = attempt,
                        "RetryAfter от Telegram"
                    );
                    wait + Duration::from_millis(200)
                }
                _ => {
                    tracing::warn!(context = context, attempt = attempt, "Сетевая ошибка, ретрай");
                    backoff_delay(attempt)
                }
            };
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Gateway for TelegramGateway {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<i32, GatewayError> {
        let message = self
            .with_retry("send_message", || {
                let mut req = self
                    .bot
                    .send_message(ChatId(chat_id), text)
                    .parse_mode(ParseMode::Html);
                if let Some(kb) = keyboard.clone() {
                    req = req.reply_markup(kb);
                }
                req
            })
            .await?;
        Ok(message.id.0)
    }

    async fn edit_text(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        keyboard: Option<InlineKeyboardMarkup>,
    ) -> Result<(), GatewayError> {
        self.with_retry("edit_message_text", || {
            let mut req = self
                .bot
                .edit_message_text(ChatId(chat_id), MessageId(message_id), text)
                .parse_mode(ParseMode::Html);
            if let Some(kb) = keyboard.clone() {
                req = req.reply_markup(kb);
            }
            req
        })
        .await?;
        Ok(())
    }

    async fn edit_keyboard(
        &self,
        chat_id: i64,
        message_id: i32,
        keyboard: InlineKeyboardMarkup,
    ) -> Result<(), GatewayError> {
        self.with_retry("edit_message_reply_markup", || {
            self.bot
                .edit_message_reply_markup(ChatId(chat_id), MessageId(message_id))
                .reply_markup(keyboard.clone())
        })
        .await?;
        Ok(())
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), GatewayError> {
        self.with_retry("delete_message", || {
            self.bot.delete_message(ChatId(chat_id), MessageId(message_id))
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_noisy_bad_requests() {
        let not_modified = RequestError::Api(ApiError::MessageNotModified);
        assert_eq!(classify(&not_modified), GatewayError::NotModified);

        let gone = RequestError::Api(ApiError::MessageToDeleteNotFound);
        assert_eq!(classify(&gone), GatewayError::NotFound);

        let blocked = RequestError::Api(ApiError::BotBlocked);
        assert_eq!(classify(&blocked), GatewayError::Forbidden);
    }

    #[test]
    fn noisy_errors_are_benign_not_retryable() {
        assert!(GatewayError::NotModified.is_benign());
        assert!(GatewayError::NotFound.is_benign());
        assert!(GatewayError::Forbidden.is_benign());
        assert!(!GatewayError::NotModified.is_retryable());

        assert!(GatewayError::Network.is_retryable());
        assert!(GatewayError::RateLimited(Duration::from_secs(3)).is_retryable());
        assert!(!GatewayError::RateLimited(Duration::from_secs(3)).is_benign());
    }

    #[tokio::test]
    async fn noisy_error_fails_on_first_attempt() {
        let gateway = TelegramGateway::new(Bot::new("123:test"));
        let attempts = std::sync::atomic::AtomicU32::new(0);

        let result: Result<(), GatewayError> = gateway
            .with_retry("test", || {
                attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                std::future::ready(Err::<(), _>(RequestError::Api(
                    ApiError::MessageNotModified,
                )))
            })
            .await;

        assert_eq!(result, Err(GatewayError::NotModified));
        assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(400));
        assert!(first < Duration::from_millis(700));

        let late = backoff_delay(10);
        assert!(late >= Duration::from_secs(5));
        assert!(late < Duration::from_millis(5300));
    }
}
