//! Конфигурация бота: токен, путь к БД, штат (админы + босс) и режим маршрутизации.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Режим распределения новых заявок.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Карточка уходит всем админам, владельца определяет гонка «кто успел».
    #[default]
    NotifyAll,
    /// Категорийная маршрутизация: эксклюзивные категории назначаются сразу,
    /// общие — балансируются по числу открытых заявок.
    Category,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StaffMember {
    pub tg_id: i64,
    pub name: String,
    /// Категории, закреплённые эксклюзивно за этим админом (режим `category`).
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub on_vacation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Staff {
    pub admins: Vec<StaffMember>,
    pub boss_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Routing {
    #[serde(default)]
    pub mode: RoutingMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    bot_token: String,
    pub db_path: PathBuf,
    pub staff: Staff,
    #[serde(default)]
    pub routing: Routing,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, anyhow::Error> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Не удалось прочитать конфиг {}: {}", path.display(), e))?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Некорректный конфиг {}: {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), anyhow::Error> {
        if self.bot_token.trim().is_empty() {
            return Err(anyhow::anyhow!("В конфиге не задан bot_token"));
        }
        if self.staff.admins.is_empty() {
            return Err(anyhow::anyhow!("В конфиге не задан ни один админ"));
        }
        Ok(())
    }

    pub fn bot_token(&self) -> Result<String, anyhow::Error> {
        let token = self.bot_token.trim();
        if token.is_empty() {
            return Err(anyhow::anyhow!("Пустой bot_token"));
        }
        Ok(token.to_string())
    }

    /// Только админы, без босса: им рассылаются карточки заявок.
    pub fn admin_ids(&self) -> Vec<i64> {
        self.staff.admins.iter().map(|a| a.tg_id).collect()
    }

    pub fn is_admin(&self, tg_id: i64) -> bool {
        self.staff.admins.iter().any(|a| a.tg_id == tg_id)
    }

    /// Весь персонал: админы + босс.
    pub fn is_staff(&self, tg_id: i64) -> bool {
        self.is_admin(tg_id) || self.staff.boss_id == Some(tg_id)
    }

    pub fn admin_name(&self, tg_id: i64) -> &str {
        self.staff
            .admins
            .iter()
            .find(|a| a.tg_id == tg_id)
            .map(|a| a.name.as_str())
            .unwrap_or("Администратор")
    }

    /// Админ, за которым категория закреплена эксклюзивно.
    pub fn exclusive_owner(&self, category: &str) -> Option<i64> {
        self.staff
            .admins
            .iter()
            .find(|a| a.categories.iter().any(|c| c == category))
            .map(|a| a.tg_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        toml::from_str(
            r#"
            bot_token = "123:abc"
            db_path = "/tmp/helpdesk.db"

            [routing]
            mode = "notify_all"

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
            "#,
        )
        .unwrap()
    }

    #[test]
    fn parses_roster() {
        let config = sample();
        assert_eq!(config.admin_ids(), vec![100, 200]);
        assert!(config.is_staff(300));
        assert!(!config.is_admin(300));
        assert_eq!(config.admin_name(200), "Андрей");
        assert_eq!(config.admin_name(999), "Администратор");
    }

    #[test]
    fn exclusive_categories() {
        let config = sample();
        assert_eq!(config.exclusive_owner("Компьютер"), Some(100));
        assert_eq!(config.exclusive_owner("Пропуск"), Some(200));
        assert_eq!(config.exclusive_owner("Интернет"), None);
    }

    #[test]
    fn routing_mode_defaults_to_notify_all() {
        let config: Config = toml::from_str(
            r#"
            bot_token = "123:abc"
            db_path = "/tmp/helpdesk.db"
            [staff]
            [[staff.admins]]
            tg_id = 100
            name = "Артур"
            "#,
        )
        .unwrap();
        assert_eq!(config.routing.mode, RoutingMode::NotifyAll);
    }
}
