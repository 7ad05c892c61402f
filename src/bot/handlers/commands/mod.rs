use super::shared::{HandlerResult, show_admin_panel};
use super::state::{BotState, is_staff_message, sender_display_name, sender_user_id};
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
pub enum BotCommand {
    #[command(description = "Начать работу с ботом")]
    Start,
    #[command(description = "Панель администратора")]
    Admin,
    #[command(description = "Справка")]
    Help,
}

pub fn handler()
-> teloxide::dispatching::UpdateHandler<Box<dyn std::error::Error + Send + Sync + 'static>> {
    teloxide::filter_command::<BotCommand, _>()
        .branch(dptree::case![BotCommand::Start].endpoint(cmd_start))
        .branch(dptree::case![BotCommand::Admin].endpoint(cmd_admin))
        .branch(dptree::case![BotCommand::Help].endpoint(cmd_help))
}

async fn cmd_start(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let Some(user_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    let display_name = sender_display_name(&msg).unwrap_or_default();
    tracing::info!(user_id = user_id, "Получена команда /start");

    if state.config.is_staff(user_id) {
        let menu = if state.config.staff.boss_id == Some(user_id) {
            crate::bot::keyboards::boss_menu()
        } else {
            crate::bot::keyboards::admin_menu()
        };
        bot.send_message(
            msg.chat.id,
            "Добро пожаловать. Кнопки персонала ниже, панель — /admin.",
        )
        .reply_markup(menu)
        .await?;
        return Ok(());
    }

    // профиль нужен для снимка ФИО в карточке заявки
    state
        .db
        .upsert_user(user_id, &display_name, "user", None)
        .await?;
    bot.send_message(
        msg.chat.id,
        "Это бот техподдержки. Нажмите «📝 Новая заявка», чтобы сообщить о проблеме.",
    )
    .reply_markup(crate::bot::keyboards::user_menu())
    .await?;
    Ok(())
}

async fn cmd_admin(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    if !is_staff_message(&msg, &state) {
        bot.send_message(msg.chat.id, "Команда доступна только персоналу.")
            .await?;
        return Ok(());
    }
    let Some(staff_id) = sender_user_id(&msg) else {
        return Ok(());
    };
    show_admin_panel(&state, staff_id).await
}

async fn cmd_help(bot: Bot, msg: Message, state: BotState) -> HandlerResult {
    let is_staff = is_staff_message(&msg, &state);
    let text = if is_staff {
        "Команды:\n\
         /admin — панель администратора\n\
         «📥 Мои задачи» — открытые заявки: ваши и ничейные\n\
         В карточке заявки: принять, закрыть, оценить сложность."
    } else {
        "Команды:\n\
         «📝 Новая заявка» — выбрать категорию и описать проблему\n\
         «🗂 Мои заявки» — статусы ваших обращений"
    };
    let reply_markup = if is_staff {
        crate::bot::keyboards::admin_menu()
    } else {
        crate::bot::keyboards::user_menu()
    };
    bot.send_message(msg.chat.id, text)
        .reply_markup(reply_markup)
        .await?;
    Ok(())
}
