//! Распределение заявок и координация принятия.
//!
//! Две развилки поведения (см. `RoutingMode`):
//! `notify_all` — карточка уходит всем админам, владельца определяет
//! атомарная гонка «кто успел»; `category` — эксклюзивные категории
//! назначаются сразу, общие балансируются по числу открытых заявок.

use crate::config::{Config, RoutingMode};
use crate::db::{Db, Ticket};
use crate::gateway::{Gateway, GatewayError};
use crate::ledger::NotificationLedger;
use teloxide::utils::html::escape;

/// Класс маршрутизации категории.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Категория закреплена за одним админом — назначение без гонки.
    Exclusive(i64),
    /// Общая или неизвестная категория — карточки всем, ждём принятия.
    Broadcast,
}

/// Чистое решение по категории. Неизвестные категории трактуем как общие.
pub fn route_for(config: &Config, category: &str) -> Route {
    match config.exclusive_owner(category) {
        Some(owner) => Route::Exclusive(owner),
        None => Route::Broadcast,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchResult {
    pub notified: Vec<i64>,
    pub assigned_to: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Успели первыми: заявка закреплена за вызывающим.
    Claimed,
    /// Повторное нажатие победителя — без повторных побочных эффектов.
    AlreadyYours,
    /// Гонка проиграна, имя победителя — для короткого уведомления.
    Lost { assignee_name: String },
    NotFound,
}

// ---------- тексты карточек ----------

fn category_emoji(category: &str) -> &'static str {
    match category {
        "Интернет" => "🌐",
        "Принтер" => "🖨",
        "Компьютер" => "💻",
        "1С" | "1C" => "🧾",
        "ЭЦП" => "🔏",
        "Удаленка" => "🏠",
        "Пропуск" => "🎫",
        "Доступ в дверь" => "🚪",
        "Мобильная связь" => "📱",
        _ => "➕",
    }
}

fn category_label(category: &str) -> String {
    format!("{} <b>{}</b>", category_emoji(category), escape(category))
}

fn author_label(ticket: &Ticket) -> String {
    let fio = ticket
        .author_full_name
        .as_deref()
        .map(escape)
        .unwrap_or_else(|| "Без ФИО".to_string());
    let ext = ticket
        .author_sip
        .as_deref()
        .map(escape)
        .unwrap_or_else(|| "—".to_string());
    format!(
        "<b>{}</b> · доб. <b>{}</b> · tg:<code>{}</code>",
        fio, ext, ticket.author_tg_id
    )
}

pub fn fmt_ticket_card(ticket: &Ticket, attachments: usize) -> String {
    let mut text = format!(
        "🆕 <b>Новая заявка №{}</b>\n👤 Автор: {}\n🏷️ Категория: {}\n📝 Сообщение:\n<blockquote>{}</blockquote>",
        ticket.id,
        author_label(ticket),
        category_label(&ticket.category),
        escape(ticket.description.trim()),
    );
    if attachments > 0 {
        text.push_str(&format!("\n📎 Вложений: {}", attachments));
    }
    text
}

pub fn fmt_ticket_claimed(ticket: &Ticket, assignee_name: &str) -> String {
    format!(
        "✅ <b>Заявка №{}</b>\n🏷️ Категория: {}\n👨‍🔧 Исполнитель: <b>{}</b>\nСтатус: <b>назначена</b>.",
        ticket.id,
        category_label(&ticket.category),
        escape(assignee_name),
    )
}

pub fn fmt_user_accepted(ticket: &Ticket, assignee_name: &str) -> String {
    format!(
        "✅ Ваша заявка №{} принята.\nЕй занимается: <b>{}</b>.\n🏷️ Категория: {}\nМы свяжемся с вами при необходимости.",
        ticket.id,
        escape(assignee_name),
        category_label(&ticket.category),
    )
}

pub fn fmt_user_assigned_immediately(ticket: &Ticket, assignee_name: &str) -> String {
    format!(
        "✅ Ваша заявка №{} назначена специалисту: <b>{}</b>.\n🏷️ Категория: {}",
        ticket.id,
        escape(assignee_name),
        category_label(&ticket.category),
    )
}

// ---------- рассылка новой заявки ----------

/// Решает, кому уйдёт карточка новой заявки, отправляет её и фиксирует
/// отправленные сообщения в реестре. Отказ доставки одному адресату не
/// блокирует остальных; ошибка БД — жёсткий отказ.
pub async fn dispatch_new_ticket<G: Gateway>(
    gateway: &G,
    db: &Db,
    ledger: &NotificationLedger,
    config: &Config,
    ticket: &Ticket,
) -> Result<DispatchResult, anyhow::Error> {
    let attachments = db.list_attachments(ticket.id).await?.len();

    match config.routing.mode {
        RoutingMode::NotifyAll => {
            let notified =
                broadcast_card(gateway, ledger, ticket, &config.admin_ids(), attachments).await;
            Ok(DispatchResult {
                notified,
                assigned_to: None,
            })
        }
        RoutingMode::Category => match route_for(config, &ticket.category) {
            Route::Exclusive(owner) => {
                assign_immediately(gateway, db, ledger, config, ticket, owner).await
            }
            Route::Broadcast => {
                let targets = balanced_targets(db, config).await?;
                let notified =
                    broadcast_card(gateway, ledger, ticket, &targets, attachments).await;
                Ok(DispatchResult {
                    notified,
                    assigned_to: None,
                })
            }
        },
    }
}

async fn broadcast_card<G: Gateway>(
    gateway: &G,
    ledger: &NotificationLedger,
    ticket: &Ticket,
    targets: &[i64],
    attachments: usize,
) -> Vec<i64> {
    let text = fmt_ticket_card(ticket, attachments);
    let mut notified = Vec::new();
    for admin_id in targets {
        let keyboard = crate::bot::keyboards::ticket_card_kb(ticket.id);
        match gateway.send_text(*admin_id, &text, Some(keyboard)).await {
            Ok(message_id) => {
                ledger
                    .remember(ticket.id, *admin_id, *admin_id, message_id)
                    .await;
                notified.push(*admin_id);
            }
            Err(error) => {
                tracing::warn!(
                    ticket_id = ticket.id,
                    admin_id = *admin_id,
                    error = %error,
                    "Не удалось отправить карточку админу"
                );
            }
        }
    }
    notified
}

async fn assign_immediately<G: Gateway>(
    gateway: &G,
    db: &Db,
    ledger: &NotificationLedger,
    config: &Config,
    ticket: &Ticket,
    owner: i64,
) -> Result<DispatchResult, anyhow::Error> {
    if !db.assign_direct(ticket.id, owner).await? {
        tracing::warn!(
            ticket_id = ticket.id,
            owner = owner,
            "Прямое назначение не прошло: заявка уже не NEW"
        );
    }
    let assignee_name = config.admin_name(owner);

    if let Err(error) = gateway
        .send_text(
            owner,
            &fmt_ticket_claimed(ticket, assignee_name),
            Some(crate::bot::keyboards::ticket_claimed_kb(ticket.id)),
        )
        .await
    {
        tracing::warn!(
            ticket_id = ticket.id,
            admin_id = owner,
            error = %error,
            "Не удалось уведомить исполнителя о назначении"
        );
    }

    deliver_user_notice(
        gateway,
        ledger,
        ticket,
        &fmt_user_assigned_immediately(ticket, assignee_name),
    )
    .await;

    Ok(DispatchResult {
        notified: vec![owner],
        assigned_to: Some(owner),
    })
}

/// Балансировка для общих категорий: поровну — обоим, иначе тому, у кого
/// меньше открытых заявок. Отпускник из балансировки исключается.
async fn balanced_targets(db: &Db, config: &Config) -> Result<Vec<i64>, anyhow::Error> {
    let mut loads = Vec::new();
    for admin in &config.staff.admins {
        let load = if admin.on_vacation {
            i64::MAX
        } else {
            db.count_open_tickets(admin.tg_id).await?
        };
        loads.push((admin.tg_id, load));
    }

    let min_load = loads.iter().map(|(_, l)| *l).min().unwrap_or(0);
    Ok(loads
        .into_iter()
        .filter(|(_, load)| *load == min_load)
        .map(|(id, _)| id)
        .collect())
}

// ---------- принятие ----------

/// «Кто успел — того и заявка». Один условный UPDATE решает гонку;
/// все последующие шаги — best-effort и не откатывают состоявшееся принятие.
pub async fn try_claim<G: Gateway>(
    gateway: &G,
    db: &Db,
    ledger: &NotificationLedger,
    config: &Config,
    ticket_id: i64,
    claimant: i64,
) -> Result<ClaimOutcome, anyhow::Error> {
    if db.claim_ticket(ticket_id, claimant).await? {
        tracing::info!(
            ticket_id = ticket_id,
            admin_id = claimant,
            "Заявка закреплена за админом"
        );

        retract_cards(gateway, ledger, ticket_id).await;

        if let Some(ticket) = db.get_ticket(ticket_id).await? {
            deliver_user_notice(
                gateway,
                ledger,
                &ticket,
                &fmt_user_accepted(&ticket, config.admin_name(claimant)),
            )
            .await;
        }
        return Ok(ClaimOutcome::Claimed);
    }

    // не получилось — смотрим, кто успел
    let Some(ticket) = db.get_ticket(ticket_id).await? else {
        return Ok(ClaimOutcome::NotFound);
    };
    match ticket.assignee_tg_id {
        Some(assignee) if assignee == claimant => Ok(ClaimOutcome::AlreadyYours),
        Some(assignee) => Ok(ClaimOutcome::Lost {
            assignee_name: config.admin_name(assignee).to_string(),
        }),
        None => Ok(ClaimOutcome::NotFound),
    }
}

/// Снимает все отслеженные карточки заявки у всего персонала и чистит реестр.
/// Ошибки шлюза глотаются: сообщение могло быть уже удалено вручную.
pub async fn retract_cards<G: Gateway>(gateway: &G, ledger: &NotificationLedger, ticket_id: i64) {
    for (staff_id, messages) in ledger.forget_all(ticket_id).await {
        for message in messages {
            if let Err(error) = gateway
                .delete_message(message.chat_id, message.message_id)
                .await
            {
                if !error.is_benign() {
                    tracing::warn!(
                        ticket_id = ticket_id,
                        staff_id = staff_id,
                        message_id = message.message_id,
                        error = %error,
                        "Не удалось снять карточку"
                    );
                }
            }
        }
    }
}

/// «Скрыть» у конкретного админа: убираем только его карточку(и).
pub async fn hide_card<G: Gateway>(
    gateway: &G,
    ledger: &NotificationLedger,
    ticket_id: i64,
    staff_id: i64,
) {
    for message in ledger.forget(ticket_id, staff_id).await {
        let _ = gateway
            .delete_message(message.chat_id, message.message_id)
            .await;
    }
}

/// Уведомление автора: правим уже отправленное, если оно ещё живо,
/// иначе шлём новое. Внутренние и скрытые заявки автора не беспокоят.
async fn deliver_user_notice<G: Gateway>(
    gateway: &G,
    ledger: &NotificationLedger,
    ticket: &Ticket,
    text: &str,
) {
    if ticket.is_internal || !ticket.user_visible {
        return;
    }

    if let Some(notice) = ledger.user_notice(ticket.id).await {
        match gateway
            .edit_text(notice.chat_id, notice.message_id, text, None)
            .await
        {
            Ok(()) | Err(GatewayError::NotModified) => return,
            Err(_) => {
                let _ = gateway
                    .delete_message(notice.chat_id, notice.message_id)
                    .await;
                ledger.forget_user(ticket.id).await;
            }
        }
    }

    match gateway.send_text(ticket.author_tg_id, text, None).await {
        Ok(message_id) => {
            ledger
                .remember_user(ticket.id, ticket.author_tg_id, message_id)
                .await;
        }
        Err(error) => {
            tracing::warn!(
                ticket_id = ticket.id,
                author = ticket.author_tg_id,
                error = %error,
                "Не удалось уведомить автора заявки"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{NewTicket, Priority, TicketStatus};
    use crate::testutil::RecordingGateway;

    const ARTUR: i64 = 100;
    const ANDREY: i64 = 200;
    const AUTHOR: i64 = 555;

    fn test_config(mode: &str) -> Config {
        toml::from_str(&format!(
            r#"
            bot_token = "123:abc"
            db_path = "/tmp/helpdesk.db"

            [routing]
            mode = "{mode}"

            [staff]
            boss_id = 300

            [[staff.admins]]
            tg_id = 100
            name = "Артур"
            categories = ["Компьютер", "Удаленка", "1С", "1C"]

            [[staff.admins]]
            tg_id = 200
            name = "Андрей"
            categories = ["Пропуск", "Доступ в дверь"]
            "#
        ))
        .unwrap()
    }

    fn new_ticket(category: &str) -> NewTicket {
        NewTicket {
            author_tg_id: AUTHOR,
            category: category.to_string(),
            description: "Сломалось".to_string(),
            priority: Priority::Medium,
            is_internal: false,
            user_visible: true,
            author_full_name: Some("Иванов".to_string()),
            author_sip: Some("505".to_string()),
        }
    }

    #[test]
    fn unknown_category_routes_to_broadcast() {
        let config = test_config("category");
        assert_eq!(route_for(&config, "Компьютер"), Route::Exclusive(ARTUR));
        assert_eq!(route_for(&config, "Пропуск"), Route::Exclusive(ANDREY));
        assert_eq!(route_for(&config, "Интернет"), Route::Broadcast);
        assert_eq!(route_for(&config, "Что-то новое"), Route::Broadcast);
    }

    #[tokio::test]
    async fn notify_all_sends_card_to_whole_roster() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("notify_all");

        // в notify_all даже эксклюзивная категория уходит всем
        let ticket = db.create_ticket(&new_ticket("Компьютер")).await.unwrap();
        let result = dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        assert_eq!(result.notified, vec![ARTUR, ANDREY]);
        assert_eq!(result.assigned_to, None);
        assert_eq!(ledger.list(ticket.id, ARTUR).await.len(), 1);
        assert_eq!(ledger.list(ticket.id, ANDREY).await.len(), 1);

        let after = db.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(after.status, TicketStatus::New);
        assert!(after.assignee_tg_id.is_none());
    }

    #[tokio::test]
    async fn exclusive_category_assigns_without_race() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("category");

        let ticket = db.create_ticket(&new_ticket("Пропуск")).await.unwrap();
        let result = dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        assert_eq!(result.notified, vec![ANDREY]);
        assert_eq!(result.assigned_to, Some(ANDREY));

        let after = db.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(after.status, TicketStatus::Assigned);
        assert_eq!(after.assignee_tg_id, Some(ANDREY));

        // автор получил «назначена специалисту», Артура не беспокоили
        assert_eq!(gateway.sent_texts(AUTHOR).len(), 1);
        assert!(gateway.sent_texts(ARTUR).is_empty());
    }

    #[tokio::test]
    async fn shared_category_balances_by_open_count() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("category");

        // нагружаем Артура одной открытой заявкой
        let busy = db.create_ticket(&new_ticket("Интернет")).await.unwrap();
        db.claim_ticket(busy.id, ARTUR).await.unwrap();

        let ticket = db.create_ticket(&new_ticket("Интернет")).await.unwrap();
        let result = dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        assert_eq!(result.notified, vec![ANDREY]);
        assert_eq!(result.assigned_to, None);
    }

    #[tokio::test]
    async fn delivery_refusal_does_not_block_other_admins() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("notify_all");

        let ticket = db.create_ticket(&new_ticket("Интернет")).await.unwrap();
        gateway.queue_send_failure(GatewayError::Forbidden);

        let result = dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        assert_eq!(result.notified, vec![ANDREY]);
        assert!(ledger.list(ticket.id, ARTUR).await.is_empty());
        assert_eq!(ledger.list(ticket.id, ANDREY).await.len(), 1);
    }

    #[tokio::test]
    async fn claim_race_has_one_winner_and_purges_ledger() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("notify_all");

        let ticket = db.create_ticket(&new_ticket("Интернет")).await.unwrap();
        dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        let artur_card = ledger.list(ticket.id, ARTUR).await[0];
        let andrey_card = ledger.list(ticket.id, ANDREY).await[0];

        let won = try_claim(&gateway, &db, &ledger, &config, ticket.id, ARTUR)
            .await
            .unwrap();
        assert_eq!(won, ClaimOutcome::Claimed);

        // реестр пуст у обоих, включая победителя
        assert!(ledger.list(ticket.id, ARTUR).await.is_empty());
        assert!(ledger.list(ticket.id, ANDREY).await.is_empty());
        // обе карточки сняты
        assert!(gateway.deleted(artur_card.chat_id, artur_card.message_id));
        assert!(gateway.deleted(andrey_card.chat_id, andrey_card.message_id));
        // автор получил подтверждение с именем исполнителя
        let notices = gateway.sent_texts(AUTHOR);
        assert_eq!(notices.len(), 1);
        assert!(notices[0].contains("Артур"));

        // опоздавший получает имя победителя
        let lost = try_claim(&gateway, &db, &ledger, &config, ticket.id, ANDREY)
            .await
            .unwrap();
        assert_eq!(
            lost,
            ClaimOutcome::Lost {
                assignee_name: "Артур".to_string()
            }
        );

        let after = db.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(after.status, TicketStatus::Assigned);
        assert_eq!(after.assignee_tg_id, Some(ARTUR));
    }

    #[tokio::test]
    async fn repeat_claim_by_winner_is_idempotent() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("notify_all");

        let ticket = db.create_ticket(&new_ticket("Интернет")).await.unwrap();
        dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        let first = try_claim(&gateway, &db, &ledger, &config, ticket.id, ARTUR)
            .await
            .unwrap();
        assert_eq!(first, ClaimOutcome::Claimed);

        let calls_after_first = gateway.calls().len();
        let second = try_claim(&gateway, &db, &ledger, &config, ticket.id, ARTUR)
            .await
            .unwrap();
        assert_eq!(second, ClaimOutcome::AlreadyYours);
        // никаких повторных ретракций и уведомлений
        assert_eq!(gateway.calls().len(), calls_after_first);
    }

    #[tokio::test]
    async fn claim_missing_ticket_reports_not_found() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("notify_all");

        let outcome = try_claim(&gateway, &db, &ledger, &config, 9999, ARTUR)
            .await
            .unwrap();
        assert_eq!(outcome, ClaimOutcome::NotFound);
    }

    #[tokio::test]
    async fn hide_removes_only_own_card() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("notify_all");

        let ticket = db.create_ticket(&new_ticket("Интернет")).await.unwrap();
        dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        hide_card(&gateway, &ledger, ticket.id, ARTUR).await;
        assert!(ledger.list(ticket.id, ARTUR).await.is_empty());
        assert_eq!(ledger.list(ticket.id, ANDREY).await.len(), 1);
    }

    #[tokio::test]
    async fn internal_ticket_never_notifies_author() {
        let gateway = RecordingGateway::new();
        let db = Db::open_in_memory().await.unwrap();
        let ledger = NotificationLedger::new();
        let config = test_config("notify_all");

        let mut draft = new_ticket("Интернет");
        draft.is_internal = true;
        draft.user_visible = false;
        let ticket = db.create_ticket(&draft).await.unwrap();
        dispatch_new_ticket(&gateway, &db, &ledger, &config, &ticket)
            .await
            .unwrap();

        try_claim(&gateway, &db, &ledger, &config, ticket.id, ARTUR)
            .await
            .unwrap();
        assert!(gateway.sent_texts(AUTHOR).is_empty());
    }
}
