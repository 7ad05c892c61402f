use crate::db::{Ticket, TicketStatus};
use chrono::{DateTime, Local, Utc};
use teloxide::utils::html::escape;

pub fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.with_timezone(&Local).format("%d.%m.%Y %H:%M").to_string())
        .unwrap_or_else(|| format!("Некорректный timestamp: {}", ts))
}

fn status_emoji(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::New => "🆕",
        TicketStatus::Assigned => "📌",
        TicketStatus::InProgress => "🔧",
        TicketStatus::Waiting => "⏳",
        TicketStatus::Reopened => "♻️",
        TicketStatus::Closed => "✅",
    }
}

pub fn panel_text(open_on_me: i64, unclaimed: i64) -> String {
    format!(
        "🛠 <b>Панель администратора</b>\n\nВ работе у вас: <b>{}</b>\nНичейных новых: <b>{}</b>",
        open_on_me, unclaimed
    )
}

pub fn task_list_text(tickets: &[Ticket]) -> String {
    if tickets.is_empty() {
        return "📥 <b>Мои задачи</b>\n\nОткрытых заявок нет.".to_string();
    }
    let mut lines = vec![format!("📥 <b>Мои задачи</b> ({})\n", tickets.len())];
    for ticket in tickets {
        lines.push(format!(
            "{} №{} · {} · {}",
            status_emoji(ticket.status),
            ticket.id,
            escape(&ticket.category),
            ticket.status.label(),
        ));
    }
    lines.push("\nНажмите на заявку, чтобы открыть карточку.".to_string());
    lines.join("\n")
}

/// Полная карточка заявки для якоря админа.
pub fn ticket_view_text(ticket: &Ticket, assignee_name: Option<&str>, attachments: usize) -> String {
    let mut text = format!(
        "{} <b>Заявка №{}</b>\n🏷️ Категория: <b>{}</b>\nСтатус: <b>{}</b>\n",
        status_emoji(ticket.status),
        ticket.id,
        escape(&ticket.category),
        ticket.status.label(),
    );
    if ticket.is_internal {
        text.push_str("📌 Внутренняя задача\n");
    } else {
        let author = ticket
            .author_full_name
            .as_deref()
            .map(escape)
            .unwrap_or_else(|| "Без ФИО".to_string());
        let ext = ticket
            .author_sip
            .as_deref()
            .map(escape)
            .unwrap_or_else(|| "—".to_string());
        text.push_str(&format!("👤 Автор: <b>{}</b> · доб. {}\n", author, ext));
    }
    if let Some(name) = assignee_name {
        text.push_str(&format!("👨‍🔧 Исполнитель: <b>{}</b>\n", escape(name)));
    }
    text.push_str(&format!("🕐 Создана: {}\n", format_timestamp(ticket.created_at)));
    if let Some(closed_at) = ticket.closed_at {
        text.push_str(&format!("🏁 Закрыта: {}\n", format_timestamp(closed_at)));
    }
    if let Some(score) = ticket.final_complexity {
        text.push_str(&format!("🎯 Сложность: {}/10\n", score));
    }
    if attachments > 0 {
        text.push_str(&format!("📎 Вложений: {}\n", attachments));
    }
    text.push_str(&format!(
        "\n📝 Описание:\n<blockquote>{}</blockquote>",
        escape(ticket.description.trim())
    ));
    text
}

pub fn user_history_text(tickets: &[Ticket]) -> String {
    if tickets.is_empty() {
        return "🗂 У вас пока нет заявок.".to_string();
    }
    let mut lines = vec!["🗂 <b>Ваши заявки</b>\n".to_string()];
    for ticket in tickets {
        lines.push(format!(
            "{} №{} · {} · {} · {}",
            status_emoji(ticket.status),
            ticket.id,
            escape(&ticket.category),
            ticket.status.label(),
            format_timestamp(ticket.created_at),
        ));
    }
    lines.join("\n")
}

pub fn user_ticket_created_text(ticket: &Ticket) -> String {
    format!(
        "📨 Заявка №{} создана.\n🏷️ Категория: <b>{}</b>\nЖдите, её скоро возьмут в работу.",
        ticket.id,
        escape(&ticket.category),
    )
}

pub fn user_ticket_closed_text(ticket: &Ticket) -> String {
    format!(
        "🏁 Ваша заявка №{} ({}) закрыта.\nЕсли проблема осталась, создайте новую заявку.",
        ticket.id,
        escape(&ticket.category),
    )
}
