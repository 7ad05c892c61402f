use super::format::{panel_text, task_list_text, ticket_view_text, user_ticket_created_text};
use super::state::{BotState, Draft};
use crate::assignment;
use crate::db::{NewTicket, Priority, Ticket};
use crate::gateway::Gateway;
use anyhow::anyhow;
use teloxide::prelude::*;
use teloxide::types::{FileId, InputFile, Message};

pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

pub fn callback_prefix_filter(
    prefix: &'static str,
) -> impl Fn(CallbackQuery) -> Option<CallbackQuery> {
    move |q: CallbackQuery| {
        if q.data
            .as_deref()
            .is_some_and(|payload| payload.starts_with(prefix))
        {
            Some(q)
        } else {
            None
        }
    }
}

pub fn parse_callback_id(data: &str, prefix: &str) -> Result<i64, anyhow::Error> {
    data.strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Некорректный callback payload"))?
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректный id заявки"))
}

/// Разбор `t:rate:<ticket_id>:<score>`.
pub fn parse_callback_rate(data: &str) -> Result<(i64, i64), anyhow::Error> {
    let payload = data
        .strip_prefix("t:rate:")
        .ok_or_else(|| anyhow!("Некорректный callback payload"))?;
    let mut parts = payload.split(':');
    let ticket_id = parts
        .next()
        .ok_or_else(|| anyhow!("Не указан id заявки"))?
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректный id заявки"))?;
    let score = parts
        .next()
        .ok_or_else(|| anyhow!("Не указана оценка"))?
        .parse::<i64>()
        .map_err(|_| anyhow!("Некорректная оценка"))?;
    Ok((ticket_id, score))
}

pub fn callback_message_target(q: &CallbackQuery) -> Option<(ChatId, teloxide::types::MessageId)> {
    q.message.as_ref().map(|msg| (msg.chat().id, msg.id()))
}

/// Гейт персонала для callback-ов. Чужим — alert и выход.
pub async fn require_staff_callback(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
) -> Result<Option<i64>, anyhow::Error> {
    let staff_id = q.from.id.0 as i64;
    if !state.config.is_staff(staff_id) {
        bot.answer_callback_query(q.id.clone())
            .text("Недостаточно прав")
            .show_alert(true)
            .await?;
        return Ok(None);
    }
    Ok(Some(staff_id))
}

// ---------- экраны якоря ----------

pub async fn show_admin_panel(state: &BotState, staff_id: i64) -> HandlerResult {
    let open_on_me = state.db.count_open_tickets(staff_id).await?;
    let unclaimed = state.db.count_unclaimed().await?;
    state
        .anchors
        .show(
            state.gateway.as_ref(),
            staff_id,
            &panel_text(open_on_me, unclaimed),
            crate::bot::keyboards::admin_panel_kb(),
        )
        .await?;
    Ok(())
}

pub async fn show_task_list(state: &BotState, staff_id: i64) -> HandlerResult {
    let tickets = state.db.list_inbox(staff_id).await?;
    state
        .anchors
        .show(
            state.gateway.as_ref(),
            staff_id,
            &task_list_text(&tickets),
            crate::bot::keyboards::task_list_kb(&tickets),
        )
        .await?;
    Ok(())
}

pub async fn show_ticket_view(state: &BotState, staff_id: i64, ticket: &Ticket) -> HandlerResult {
    let attachments = state.db.list_attachments(ticket.id).await?;
    let assignee_name = ticket
        .assignee_tg_id
        .map(|assignee| state.config.admin_name(assignee));
    state
        .anchors
        .show(
            state.gateway.as_ref(),
            staff_id,
            &ticket_view_text(ticket, assignee_name, attachments.len()),
            crate::bot::keyboards::ticket_view_kb(ticket, staff_id),
        )
        .await?;
    Ok(())
}

/// Пересылает вложения заявки в чат смотрящего отдельными сообщениями.
/// Они не входят в якорь и при смене экрана остаются в чате.
pub async fn send_ticket_attachments(
    bot: &Bot,
    state: &BotState,
    chat_id: i64,
    ticket_id: i64,
) -> HandlerResult {
    for attachment in state.db.list_attachments(ticket_id).await? {
        let file = InputFile::file_id(FileId(attachment.file_id.clone()));
        let result = match attachment.file_type.as_str() {
            "photo" => bot.send_photo(ChatId(chat_id), file).await.map(|_| ()),
            "video" => bot.send_video(ChatId(chat_id), file).await.map(|_| ()),
            "voice" => bot.send_voice(ChatId(chat_id), file).await.map(|_| ()),
            _ => bot.send_document(ChatId(chat_id), file).await.map(|_| ()),
        };
        if let Err(error) = result {
            tracing::warn!(
                ticket_id = ticket_id,
                file_type = %attachment.file_type,
                error = %error,
                "Не удалось переслать вложение"
            );
        }
    }
    Ok(())
}

// ---------- создание заявки ----------

/// Достраивает заявку из черновика и сообщения с описанием: INSERT,
/// подтверждение автору, рассылка карточек.
pub async fn submit_ticket(
    bot: &Bot,
    msg: &Message,
    state: &BotState,
    author_id: i64,
    draft: Draft,
) -> HandlerResult {
    let description = msg
        .text()
        .or_else(|| msg.caption())
        .unwrap_or("")
        .trim()
        .to_string();
    if description.is_empty() && msg.photo().is_none() && msg.document().is_none() {
        bot.send_message(msg.chat.id, "Опишите проблему текстом, можно приложить фото.")
            .await?;
        return Ok(());
    }

    let profile = state.db.get_user(author_id).await?;
    let ticket = state
        .db
        .create_ticket(&NewTicket {
            author_tg_id: author_id,
            category: draft.category,
            description,
            priority: Priority::Medium,
            is_internal: draft.is_internal,
            user_visible: !draft.is_internal,
            author_full_name: profile.as_ref().map(|p| p.full_name.clone()),
            author_sip: profile.as_ref().and_then(|p| p.sip_ext.clone()),
        })
        .await?;

    store_message_attachments(state, msg, ticket.id).await?;

    tracing::info!(
        ticket_id = ticket.id,
        author = author_id,
        category = %ticket.category,
        internal = ticket.is_internal,
        "Создана заявка"
    );

    // подтверждение автору запоминаем: при принятии оно превратится
    // в «заявкой занимается такой-то»
    if !ticket.is_internal {
        match state
            .gateway
            .send_text(author_id, &user_ticket_created_text(&ticket), None)
            .await
        {
            Ok(message_id) => {
                state
                    .ledger
                    .remember_user(ticket.id, author_id, message_id)
                    .await;
            }
            Err(error) => {
                tracing::warn!(ticket_id = ticket.id, error = %error, "Подтверждение автору не ушло");
            }
        }
    }

    assignment::dispatch_new_ticket(
        state.gateway.as_ref(),
        &state.db,
        &state.ledger,
        &state.config,
        &ticket,
    )
    .await?;
    Ok(())
}

async fn store_message_attachments(
    state: &BotState,
    msg: &Message,
    ticket_id: i64,
) -> Result<(), anyhow::Error> {
    let media_group = msg.media_group_id().map(|id| id.0.clone());
    if let Some(photos) = msg.photo() {
        // берём самый крупный размер
        if let Some(photo) = photos.last() {
            state
                .db
                .add_attachment(
                    ticket_id,
                    &photo.file.id.0,
                    "photo",
                    msg.caption(),
                    media_group.as_deref(),
                )
                .await?;
        }
    }
    if let Some(document) = msg.document() {
        state
            .db
            .add_attachment(
                ticket_id,
                &document.file.id.0,
                "document",
                msg.caption(),
                media_group.as_deref(),
            )
            .await?;
    }
    if let Some(video) = msg.video() {
        state
            .db
            .add_attachment(
                ticket_id,
                &video.file.id.0,
                "video",
                msg.caption(),
                media_group.as_deref(),
            )
            .await?;
    }
    if let Some(voice) = msg.voice() {
        state
            .db
            .add_attachment(ticket_id, &voice.file.id.0, "voice", None, media_group.as_deref())
            .await?;
    }
    Ok(())
}
