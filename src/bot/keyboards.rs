//! Клавиатуры бота: inline и постоянные reply-кнопки.

use crate::db::{Ticket, TicketStatus};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

pub const BTN_USER_NEW: &str = "📝 Новая заявка";
pub const BTN_USER_MY: &str = "🗂 Мои заявки";

pub const BTN_ADMIN_TASKS: &str = "📥 Мои задачи";
pub const BTN_ADMIN_PANEL: &str = "🛠 Панель";
pub const BTN_BOSS_INTERNAL: &str = "📌 Внутренняя задача";

/// Категории заявок в порядке показа пользователю.
pub const CATEGORIES: &[&str] = &[
    "Интернет",
    "Принтер",
    "Компьютер",
    "1С",
    "ЭЦП",
    "Удаленка",
    "Пропуск",
    "Доступ в дверь",
    "Мобильная связь",
    "Другое",
];

pub fn user_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(BTN_USER_NEW),
        KeyboardButton::new(BTN_USER_MY),
    ]])
    .resize_keyboard()
    .persistent()
}

pub fn admin_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![vec![
        KeyboardButton::new(BTN_ADMIN_TASKS),
        KeyboardButton::new(BTN_ADMIN_PANEL),
    ]])
    .resize_keyboard()
    .persistent()
}

pub fn boss_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new(BTN_ADMIN_TASKS),
            KeyboardButton::new(BTN_ADMIN_PANEL),
        ],
        vec![KeyboardButton::new(BTN_BOSS_INTERNAL)],
    ])
    .resize_keyboard()
    .persistent()
}

fn category_grid(prefix: &str) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    for pair in CATEGORIES.chunks(2) {
        let row: Vec<InlineKeyboardButton> = pair
            .iter()
            .map(|category| {
                InlineKeyboardButton::callback(*category, format!("{}{}", prefix, category))
            })
            .collect();
        keyboard = keyboard.append_row(row);
    }
    keyboard
}

/// Выбор категории пользователем, по две кнопки в ряд.
pub fn category_kb() -> InlineKeyboardMarkup {
    category_grid("u:cat:")
}

/// То же для внутренней задачи босса.
pub fn internal_category_kb() -> InlineKeyboardMarkup {
    category_grid("b:cat:")
}

/// Кнопки под карточкой новой заявки в чате админа.
pub fn ticket_card_kb(ticket_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default()
        .append_row(vec![InlineKeyboardButton::callback(
            "🤝 Принять",
            format!("t:accept:{}", ticket_id),
        )])
        .append_row(vec![InlineKeyboardButton::callback(
            "🙈 Скрыть",
            format!("t:hide:{}", ticket_id),
        )])
}

/// Кнопки под карточкой уже назначенной заявки.
pub fn ticket_claimed_kb(ticket_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default().append_row(vec![
        InlineKeyboardButton::callback("📄 Открыть", format!("t:view:{}", ticket_id)),
        InlineKeyboardButton::callback("✅ Готово", format!("t:done:{}", ticket_id)),
    ])
}

/// Список задач админа: по две заявки в ряд, снизу возврат в панель.
pub fn task_list_kb(tickets: &[Ticket]) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    for pair in tickets.chunks(2) {
        let row: Vec<InlineKeyboardButton> = pair
            .iter()
            .map(|ticket| {
                InlineKeyboardButton::callback(
                    format!("№{} · {}", ticket.id, ticket.category),
                    format!("t:view:{}", ticket.id),
                )
            })
            .collect();
        keyboard = keyboard.append_row(row);
    }
    keyboard.append_row(vec![InlineKeyboardButton::callback("⬅️ Назад", "a:back")])
}

/// Кнопки карточки заявки в якоре админа.
pub fn ticket_view_kb(ticket: &Ticket, viewer_id: i64) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    match ticket.status {
        TicketStatus::New => {
            keyboard = keyboard.append_row(vec![InlineKeyboardButton::callback(
                "🤝 Принять",
                format!("t:accept:{}", ticket.id),
            )]);
        }
        status if status.is_open() && ticket.assignee_tg_id == Some(viewer_id) => {
            keyboard = keyboard.append_row(vec![InlineKeyboardButton::callback(
                "✅ Готово",
                format!("t:done:{}", ticket.id),
            )]);
        }
        _ => {}
    }
    keyboard.append_row(vec![InlineKeyboardButton::callback("⬅️ К списку", "a:list")])
}

/// Оценка сложности закрытой заявки: 1..10 в два ряда.
pub fn rating_kb(ticket_id: i64) -> InlineKeyboardMarkup {
    let mut keyboard = InlineKeyboardMarkup::default();
    for chunk in (1..=10).collect::<Vec<i64>>().chunks(5) {
        let row: Vec<InlineKeyboardButton> = chunk
            .iter()
            .map(|score| {
                InlineKeyboardButton::callback(
                    score.to_string(),
                    format!("t:rate:{}:{}", ticket_id, score),
                )
            })
            .collect();
        keyboard = keyboard.append_row(row);
    }
    keyboard
}

/// Главный экран панели админа.
pub fn admin_panel_kb() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::default()
        .append_row(vec![InlineKeyboardButton::callback("📥 Мои задачи", "a:list")])
        .append_row(vec![InlineKeyboardButton::callback("🔄 Обновить", "a:refresh")])
}
