use super::format::user_history_text;
use super::shared::{HandlerResult, show_admin_panel, show_task_list, submit_ticket};
use super::state::{BotState, is_boss_message, is_staff_message, sender_user_id};
use teloxide::prelude::*;
use teloxide::types::ParseMode;

pub async fn handle_menu_buttons(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let is_staff = is_staff_message(&msg, &state);
    let text = msg.text().unwrap_or("");

    match text {
        crate::bot::keyboards::BTN_USER_NEW if !is_staff => {
            state.drafts.lock().await.remove(&user_id);
            bot.send_message(msg.chat.id, "Выберите категорию проблемы:")
                .reply_markup(crate::bot::keyboards::category_kb())
                .await?;
            return Ok(());
        }
        crate::bot::keyboards::BTN_USER_MY if !is_staff => {
            let tickets = state.db.list_user_tickets(user_id, 10).await?;
            bot.send_message(msg.chat.id, user_history_text(&tickets))
                .parse_mode(ParseMode::Html)
                .reply_markup(crate::bot::keyboards::user_menu())
                .await?;
            return Ok(());
        }
        crate::bot::keyboards::BTN_ADMIN_TASKS if is_staff => {
            return show_task_list(&state, user_id).await;
        }
        crate::bot::keyboards::BTN_ADMIN_PANEL if is_staff => {
            return show_admin_panel(&state, user_id).await;
        }
        crate::bot::keyboards::BTN_BOSS_INTERNAL if is_boss_message(&msg, &state) => {
            state.drafts.lock().await.remove(&user_id);
            bot.send_message(msg.chat.id, "Внутренняя задача. Выберите категорию:")
                .reply_markup(crate::bot::keyboards::internal_category_kb())
                .await?;
            return Ok(());
        }
        _ => {}
    }

    // ожидаем описание после выбора категории
    let draft = state.drafts.lock().await.remove(&user_id);
    if let Some(draft) = draft {
        return submit_ticket(&bot, &msg, &state, user_id, draft).await;
    }

    let (reply_text, reply_markup) = if is_staff {
        (
            "Не понял. Используйте кнопки персонала или /admin.",
            crate::bot::keyboards::admin_menu(),
        )
    } else {
        (
            "Не понял. Чтобы сообщить о проблеме, нажмите «📝 Новая заявка».",
            crate::bot::keyboards::user_menu(),
        )
    };
    bot.send_message(msg.chat.id, reply_text)
        .reply_markup(reply_markup)
        .await?;
    Ok(())
}
