use super::shared::{
    HandlerResult, callback_message_target, callback_prefix_filter, parse_callback_id,
    parse_callback_rate, require_staff_callback, send_ticket_attachments, show_admin_panel,
    show_task_list, show_ticket_view,
};
use super::state::{BotState, Draft};
use crate::assignment::{self, ClaimOutcome};
use super::format::user_ticket_closed_text;
use crate::gateway::Gateway;
use teloxide::dptree;
use teloxide::prelude::*;

pub fn handler()
-> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    Update::filter_callback_query()
        .branch(dptree::filter_map(callback_prefix_filter("u:cat:")).endpoint(callback_user_category))
        .branch(dptree::filter_map(callback_prefix_filter("b:cat:")).endpoint(callback_boss_category))
        .branch(dptree::filter_map(callback_prefix_filter("t:accept:")).endpoint(callback_accept))
        .branch(dptree::filter_map(callback_prefix_filter("t:hide:")).endpoint(callback_hide))
        .branch(dptree::filter_map(callback_prefix_filter("t:done:")).endpoint(callback_done))
        .branch(dptree::filter_map(callback_prefix_filter("t:rate:")).endpoint(callback_rate))
        .branch(dptree::filter_map(callback_prefix_filter("t:view:")).endpoint(callback_view))
        .branch(dptree::filter_map(callback_prefix_filter("a:list")).endpoint(callback_task_list))
        .branch(dptree::filter_map(callback_prefix_filter("a:back")).endpoint(callback_panel))
        .branch(dptree::filter_map(callback_prefix_filter("a:refresh")).endpoint(callback_panel))
}

async fn remember_draft(
    bot: &Bot,
    q: &CallbackQuery,
    state: &BotState,
    category: String,
    is_internal: bool,
) -> HandlerResult {
    let user_id = q.from.id.0 as i64;
    state.drafts.lock().await.insert(
        user_id,
        Draft {
            category: category.clone(),
            is_internal,
        },
    );

    bot.answer_callback_query(q.id.clone()).await?;
    if let Some((chat_id, message_id)) = callback_message_target(q) {
        bot.edit_message_text(
            chat_id,
            message_id,
            format!(
                "Категория: {}.\nОпишите проблему одним сообщением, можно приложить фото или файл.",
                category
            ),
        )
        .await?;
    }
    Ok(())
}

async fn callback_user_category(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let category = q
        .data
        .as_deref()
        .and_then(|data| data.strip_prefix("u:cat:"))
        .unwrap_or("")
        .to_string();
    if category.is_empty() {
        return Ok(());
    }
    remember_draft(&bot, &q, &state, category, false).await
}

async fn callback_boss_category(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let sender = q.from.id.0 as i64;
    if state.config.staff.boss_id != Some(sender) {
        bot.answer_callback_query(q.id.clone())
            .text("Недостаточно прав")
            .show_alert(true)
            .await?;
        return Ok(());
    }
    let category = q
        .data
        .as_deref()
        .and_then(|data| data.strip_prefix("b:cat:"))
        .unwrap_or("")
        .to_string();
    if category.is_empty() {
        return Ok(());
    }
    remember_draft(&bot, &q, &state, category, true).await
}

/// Гонка за заявку. Исход решает условный UPDATE в `try_claim`,
/// здесь только реакция на его результат.
async fn callback_accept(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(staff_id) = require_staff_callback(&bot, &q, &state).await? else {
        return Ok(());
    };
    let ticket_id = parse_callback_id(q.data.as_deref().unwrap_or(""), "t:accept:")?;

    let outcome = assignment::try_claim(
        state.gateway.as_ref(),
        &state.db,
        &state.ledger,
        &state.config,
        ticket_id,
        staff_id,
    )
    .await?;

    match outcome {
        ClaimOutcome::Claimed => {
            bot.answer_callback_query(q.id.clone())
                .text("Заявка закреплена за вами")
                .await?;
            // карточка рассылки уже снята ретракцией, рабочим экраном
            // победителя становится якорь с карточкой заявки
            if let Some(ticket) = state.db.get_ticket(ticket_id).await? {
                show_ticket_view(&state, staff_id, &ticket).await?;
            }
        }
        ClaimOutcome::AlreadyYours => {
            bot.answer_callback_query(q.id.clone())
                .text("Заявка уже на вас")
                .await?;
        }
        ClaimOutcome::Lost { assignee_name } => {
            bot.answer_callback_query(q.id.clone())
                .text(format!("Уже забрано: {}", assignee_name))
                .show_alert(true)
                .await?;
            show_task_list(&state, staff_id).await?;
        }
        ClaimOutcome::NotFound => {
            bot.answer_callback_query(q.id.clone())
                .text("Заявка не найдена")
                .show_alert(true)
                .await?;
        }
    }
    Ok(())
}

async fn callback_hide(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(staff_id) = require_staff_callback(&bot, &q, &state).await? else {
        return Ok(());
    };
    let ticket_id = parse_callback_id(q.data.as_deref().unwrap_or(""), "t:hide:")?;

    assignment::hide_card(state.gateway.as_ref(), &state.ledger, ticket_id, staff_id).await;
    bot.answer_callback_query(q.id.clone()).text("Скрыто").await?;
    // после рестарта реестр пуст, но карточка на экране осталась —
    // сообщение с кнопкой убираем в любом случае
    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        let _ = bot.delete_message(chat_id, message_id).await;
    }
    Ok(())
}

async fn callback_done(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(staff_id) = require_staff_callback(&bot, &q, &state).await? else {
        return Ok(());
    };
    let ticket_id = parse_callback_id(q.data.as_deref().unwrap_or(""), "t:done:")?;

    let Some(ticket) = state.db.get_ticket(ticket_id).await? else {
        bot.answer_callback_query(q.id.clone())
            .text("Заявка не найдена")
            .show_alert(true)
            .await?;
        return Ok(());
    };
    let is_boss = state.config.staff.boss_id == Some(staff_id);
    if ticket.assignee_tg_id != Some(staff_id) && !is_boss {
        bot.answer_callback_query(q.id.clone())
            .text("Закрыть может только исполнитель")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    if !state.db.close_ticket(ticket_id, staff_id).await? {
        bot.answer_callback_query(q.id.clone())
            .text("Заявка уже закрыта")
            .await?;
        return Ok(());
    }
    tracing::info!(ticket_id = ticket_id, staff_id = staff_id, "Заявка закрыта");

    // карточки у остальных больше не актуальны
    assignment::retract_cards(state.gateway.as_ref(), &state.ledger, ticket_id).await;
    state.ledger.forget_user(ticket_id).await;

    if !ticket.is_internal && ticket.user_visible {
        if let Err(error) = state
            .gateway
            .send_text(ticket.author_tg_id, &user_ticket_closed_text(&ticket), None)
            .await
        {
            tracing::warn!(ticket_id = ticket_id, error = %error, "Автору не ушло уведомление о закрытии");
        }
    }

    bot.answer_callback_query(q.id.clone()).text("Закрыто").await?;
    if let Some((chat_id, message_id)) = callback_message_target(&q) {
        bot.edit_message_text(
            chat_id,
            message_id,
            format!("🏁 Заявка №{} закрыта.\nОцените сложность:", ticket_id),
        )
        .reply_markup(crate::bot::keyboards::rating_kb(ticket_id))
        .await?;
    }
    Ok(())
}

async fn callback_rate(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    if require_staff_callback(&bot, &q, &state).await?.is_none() {
        return Ok(());
    }
    let (ticket_id, score) = parse_callback_rate(q.data.as_deref().unwrap_or(""))?;

    if state.db.set_final_complexity(ticket_id, score).await? {
        bot.answer_callback_query(q.id.clone())
            .text("Оценка сохранена")
            .await?;
        if let Some((chat_id, message_id)) = callback_message_target(&q) {
            bot.edit_message_text(
                chat_id,
                message_id,
                format!("🏁 Заявка №{} закрыта. Сложность: {}/10.", ticket_id, score),
            )
            .await?;
        }
    } else {
        bot.answer_callback_query(q.id.clone())
            .text("Оценка уже стоит или заявка не закрыта")
            .show_alert(true)
            .await?;
    }
    Ok(())
}

async fn callback_view(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(staff_id) = require_staff_callback(&bot, &q, &state).await? else {
        return Ok(());
    };
    let ticket_id = parse_callback_id(q.data.as_deref().unwrap_or(""), "t:view:")?;

    let Some(ticket) = state.db.get_ticket(ticket_id).await? else {
        bot.answer_callback_query(q.id.clone())
            .text("Заявка не найдена")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(q.id.clone()).await?;
    send_ticket_attachments(&bot, &state, staff_id, ticket_id).await?;
    show_ticket_view(&state, staff_id, &ticket).await
}

async fn callback_task_list(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(staff_id) = require_staff_callback(&bot, &q, &state).await? else {
        return Ok(());
    };
    bot.answer_callback_query(q.id.clone()).await?;
    show_task_list(&state, staff_id).await
}

async fn callback_panel(bot: Bot, q: CallbackQuery, state: BotState) -> HandlerResult {
    let Some(staff_id) = require_staff_callback(&bot, &q, &state).await? else {
        return Ok(());
    };
    bot.answer_callback_query(q.id.clone()).await?;
    show_admin_panel(&state, staff_id).await
}
