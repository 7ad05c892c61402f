use crate::anchor::AnchorScreens;
use crate::config::Config;
use crate::db::Db;
use crate::gateway::TelegramGateway;
use crate::ledger::NotificationLedger;
use std::collections::HashMap;
use std::sync::Arc;
use teloxide::types::Message;
use tokio::sync::Mutex;

/// Черновик заявки: категория выбрана, ждём текст описания.
#[derive(Debug, Clone)]
pub struct Draft {
    pub category: String,
    pub is_internal: bool,
}

#[derive(Clone)]
pub struct BotState {
    pub config: Arc<Config>,
    pub db: Arc<Db>,
    pub gateway: Arc<TelegramGateway>,
    pub ledger: Arc<NotificationLedger>,
    pub anchors: Arc<AnchorScreens>,
    pub drafts: Arc<Mutex<HashMap<i64, Draft>>>,
}

pub fn sender_user_id(msg: &Message) -> Option<i64> {
    msg.from.as_ref().map(|user| user.id.0 as i64)
}

pub fn sender_display_name(msg: &Message) -> Option<String> {
    msg.from.as_ref().map(|user| {
        let mut full_name = user.first_name.clone();
        if let Some(last_name) = user.last_name.as_deref()
            && !last_name.trim().is_empty()
        {
            full_name.push(' ');
            full_name.push_str(last_name);
        }
        full_name
    })
}

pub fn is_staff_message(msg: &Message, state: &BotState) -> bool {
    sender_user_id(msg).is_some_and(|user_id| state.config.is_staff(user_id))
}

pub fn is_boss_message(msg: &Message, state: &BotState) -> bool {
    sender_user_id(msg).is_some_and(|user_id| state.config.staff.boss_id == Some(user_id))
}
