//! SQLite-слой для заявок, пользователей и вложений.

use sqlx::FromRow;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Статус заявки. WAITING/REOPENED — переходные, считаются «открытыми».
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    New,
    Assigned,
    InProgress,
    Waiting,
    Reopened,
    Closed,
}

impl TicketStatus {
    pub fn is_open(self) -> bool {
        self != TicketStatus::Closed
    }

    pub fn label(self) -> &'static str {
        match self {
            TicketStatus::New => "новая",
            TicketStatus::Assigned => "назначена",
            TicketStatus::InProgress => "в работе",
            TicketStatus::Waiting => "ожидает",
            TicketStatus::Reopened => "переоткрыта",
            TicketStatus::Closed => "закрыта",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, FromRow)]
pub struct Ticket {
    pub id: i64,
    pub author_tg_id: i64,
    pub assignee_tg_id: Option<i64>,
    pub category: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub is_internal: bool,
    pub user_visible: bool,
    pub author_full_name: Option<String>,
    pub author_sip: Option<String>,
    pub created_at: i64,
    pub closed_at: Option<i64>,
    pub final_complexity: Option<i64>,
}

/// Данные новой заявки. Снимок автора (ФИО/добавочный) фиксируется на момент
/// создания, чтобы карточка не менялась при правке профиля.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub author_tg_id: i64,
    pub category: String,
    pub description: String,
    pub priority: Priority,
    pub is_internal: bool,
    pub user_visible: bool,
    pub author_full_name: Option<String>,
    pub author_sip: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub tg_id: i64,
    pub full_name: String,
    pub role: String,
    pub sip_ext: Option<String>,
    pub on_vacation: bool,
}

#[derive(Debug, Clone, FromRow)]
pub struct Attachment {
    pub id: i64,
    pub ticket_id: i64,
    pub file_id: String,
    pub file_type: String,
    pub caption: Option<String>,
    pub media_group_id: Option<String>,
}

const TICKET_COLUMNS: &str = "id, author_tg_id, assignee_tg_id, category, description, status, priority, is_internal, user_visible, author_full_name, author_sip, created_at, closed_at, final_complexity";

pub struct Db {
    pool: SqlitePool,
}

fn current_unix_timestamp() -> Result<i64, anyhow::Error> {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .map_err(|err| anyhow::anyhow!("Системное время меньше UNIX_EPOCH: {}", err))
}

impl Db {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("Не удалось создать директорию для БД: {}", e))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts)
            .await
            .map_err(|e| anyhow::anyhow!("Не удалось подключиться к SQLite: {}", e))?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// БД в памяти для тестов. Один коннект, иначе каждый получит свою пустую базу.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, anyhow::Error> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<(), anyhow::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                tg_id INTEGER PRIMARY KEY,
                full_name TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'user',
                sip_ext TEXT,
                on_vacation INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция users: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_tg_id INTEGER NOT NULL,
                assignee_tg_id INTEGER,
                category TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT 'NEW',
                priority TEXT NOT NULL DEFAULT 'MEDIUM',
                is_internal INTEGER NOT NULL DEFAULT 0,
                user_visible INTEGER NOT NULL DEFAULT 1,
                author_full_name TEXT,
                author_sip TEXT,
                created_at INTEGER NOT NULL,
                closed_at INTEGER,
                final_complexity INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
            CREATE INDEX IF NOT EXISTS idx_tickets_assignee ON tickets(assignee_tg_id);
            CREATE INDEX IF NOT EXISTS idx_tickets_author ON tickets(author_tg_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция tickets: {}", e))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS attachments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ticket_id INTEGER NOT NULL REFERENCES tickets(id),
                file_id TEXT NOT NULL,
                file_type TEXT NOT NULL,
                caption TEXT,
                media_group_id TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_attachments_ticket ON attachments(ticket_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| anyhow::anyhow!("Миграция attachments: {}", e))?;

        Ok(())
    }

    pub async fn create_ticket(&self, new: &NewTicket) -> Result<Ticket, anyhow::Error> {
        let now = current_unix_timestamp()?;
        let result = sqlx::query(
            "INSERT INTO tickets (author_tg_id, category, description, status, priority, is_internal, user_visible, author_full_name, author_sip, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(new.author_tg_id)
        .bind(&new.category)
        .bind(&new.description)
        .bind(TicketStatus::New)
        .bind(new.priority)
        .bind(new.is_internal)
        .bind(new.user_visible)
        .bind(&new.author_full_name)
        .bind(&new.author_sip)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_ticket(result.last_insert_rowid())
            .await?
            .ok_or_else(|| anyhow::anyhow!("только что создали заявку"))
    }

    pub async fn get_ticket(&self, id: i64) -> Result<Option<Ticket>, anyhow::Error> {
        let row = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {} FROM tickets WHERE id = ?",
            TICKET_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Атомарное «кто успел — того и заявка»: один условный UPDATE,
    /// без чтения перед записью. Успех — только если строка реально изменилась.
    pub async fn claim_ticket(&self, id: i64, claimant: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE tickets SET status = ?, assignee_tg_id = ?
             WHERE id = ? AND status = ? AND assignee_tg_id IS NULL",
        )
        .bind(TicketStatus::Assigned)
        .bind(claimant)
        .bind(id)
        .bind(TicketStatus::New)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Прямое назначение для эксклюзивных категорий. Гонки здесь нет:
    /// вызывается один раз создающим потоком, сразу после INSERT.
    pub async fn assign_direct(&self, id: i64, assignee: i64) -> Result<bool, anyhow::Error> {
        let result = sqlx::query(
            "UPDATE tickets SET status = ?, assignee_tg_id = ? WHERE id = ? AND status = ?",
        )
        .bind(TicketStatus::Assigned)
        .bind(assignee)
        .bind(id)
        .bind(TicketStatus::New)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn close_ticket(&self, id: i64, closer: i64) -> Result<bool, anyhow::Error> {
        let now = current_unix_timestamp()?;
        let result = sqlx::query(
            "UPDATE tickets SET status = ?, assignee_tg_id = ?, closed_at = ? WHERE id = ? AND status != ?",
        )
        .bind(TicketStatus::Closed)
        .bind(closer)
        .bind(now)
        .bind(id)
        .bind(TicketStatus::Closed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Оценка сложности: ставится один раз и только по закрытой заявке.
    pub async fn set_final_complexity(&self, id: i64, score: i64) -> Result<bool, anyhow::Error> {
        if !(1..=10).contains(&score) {
            return Err(anyhow::anyhow!(
                "Оценка сложности вне диапазона 1–10: {}",
                score
            ));
        }
        let result = sqlx::query(
            "UPDATE tickets SET final_complexity = ?
             WHERE id = ? AND status = ? AND final_complexity IS NULL",
        )
        .bind(score)
        .bind(id)
        .bind(TicketStatus::Closed)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Открытые заявки на исполнителе — для балансировки в режиме `category`.
    pub async fn count_open_tickets(&self, assignee: i64) -> Result<i64, anyhow::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tickets WHERE assignee_tg_id = ? AND status != ?",
        )
        .bind(assignee)
        .bind(TicketStatus::Closed)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Список для экрана «Мои задачи»: всё открытое на мне + ничейные NEW.
    pub async fn list_inbox(&self, admin: i64) -> Result<Vec<Ticket>, anyhow::Error> {
        let rows = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {} FROM tickets
             WHERE status != ?
               AND (assignee_tg_id = ? OR (assignee_tg_id IS NULL AND status = ?))
             ORDER BY created_at DESC",
            TICKET_COLUMNS
        ))
        .bind(TicketStatus::Closed)
        .bind(admin)
        .bind(TicketStatus::New)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// История заявок пользователя, свежие сверху. Внутренние не показываются.
    pub async fn list_user_tickets(
        &self,
        author: i64,
        limit: i64,
    ) -> Result<Vec<Ticket>, anyhow::Error> {
        let rows = sqlx::query_as::<_, Ticket>(&format!(
            "SELECT {} FROM tickets
             WHERE author_tg_id = ? AND is_internal = 0
             ORDER BY created_at DESC LIMIT ?",
            TICKET_COLUMNS
        ))
        .bind(author)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Ничейные новые заявки — счётчик для панели.
    pub async fn count_unclaimed(&self) -> Result<i64, anyhow::Error> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tickets WHERE status = ? AND assignee_tg_id IS NULL",
        )
        .bind(TicketStatus::New)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn upsert_user(
        &self,
        tg_id: i64,
        full_name: &str,
        role: &str,
        sip_ext: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "INSERT INTO users (tg_id, full_name, role, sip_ext) VALUES (?, ?, ?, ?)
             ON CONFLICT(tg_id) DO UPDATE SET full_name = excluded.full_name, sip_ext = excluded.sip_ext",
        )
        .bind(tg_id)
        .bind(full_name)
        .bind(role)
        .bind(sip_ext)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_user(&self, tg_id: i64) -> Result<Option<UserRecord>, anyhow::Error> {
        let row = sqlx::query_as::<_, UserRecord>(
            "SELECT tg_id, full_name, role, sip_ext, on_vacation FROM users WHERE tg_id = ?",
        )
        .bind(tg_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn add_attachment(
        &self,
        ticket_id: i64,
        file_id: &str,
        file_type: &str,
        caption: Option<&str>,
        media_group_id: Option<&str>,
    ) -> Result<(), anyhow::Error> {
        sqlx::query(
            "INSERT INTO attachments (ticket_id, file_id, file_type, caption, media_group_id) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(ticket_id)
        .bind(file_id)
        .bind(file_type)
        .bind(caption)
        .bind(media_group_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_attachments(&self, ticket_id: i64) -> Result<Vec<Attachment>, anyhow::Error> {
        let rows = sqlx::query_as::<_, Attachment>(
            "SELECT id, ticket_id, file_id, file_type, caption, media_group_id FROM attachments WHERE ticket_id = ? ORDER BY id ASC",
        )
        .bind(ticket_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
