use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use mbk_core::{BusinessTimezone, UnitCatalog};
use mbk_engine::HolidayTable;
use tracing::info;

use crate::IntakeError;

pub const UNITS_FILE: &str = "units.yaml";
pub const HOLIDAYS_FILE: &str = "holidays.yaml";
pub const DEFAULT_MAIL_FROM: &str = "Machine Booking <onboarding@resend.dev>";

#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Unset means bookings live in process memory only.
    pub database_url: Option<String>,
    pub workspace_root: PathBuf,
    pub tz_offset: String,
    /// Base URL used for review links in admin emails.
    pub public_url: Option<String>,
    pub resend_api_key: Option<String>,
    pub mail_from: String,
    pub sheet_webhook_url: Option<String>,
    pub http_timeout_secs: u64,
    pub admin_token: Option<String>,
    pub web_port: u16,
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl IntakeConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: non_empty("DATABASE_URL"),
            workspace_root: std::env::var("MBK_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".")),
            tz_offset: std::env::var("MBK_TZ_OFFSET").unwrap_or_else(|_| "+06:30".to_string()),
            public_url: non_empty("MBK_PUBLIC_URL"),
            resend_api_key: non_empty("RESEND_API_KEY"),
            mail_from: std::env::var("MBK_MAIL_FROM").unwrap_or_else(|_| DEFAULT_MAIL_FROM.to_string()),
            sheet_webhook_url: non_empty("MBK_SHEET_WEBHOOK_URL"),
            http_timeout_secs: std::env::var("MBK_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            admin_token: non_empty("MBK_ADMIN_TOKEN"),
            web_port: std::env::var("MBK_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }

    /// Config rooted at `workspace_root` with nothing external enabled.
    pub fn local(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            database_url: None,
            workspace_root: workspace_root.into(),
            tz_offset: "+06:30".to_string(),
            public_url: None,
            resend_api_key: None,
            mail_from: DEFAULT_MAIL_FROM.to_string(),
            sheet_webhook_url: None,
            http_timeout_secs: 20,
            admin_token: None,
            web_port: 8000,
        }
    }

    pub fn timezone(&self) -> Result<BusinessTimezone, IntakeError> {
        self.tz_offset
            .parse()
            .map_err(|err| IntakeError::Config(format!("MBK_TZ_OFFSET: {err}")))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

pub async fn load_catalog(workspace_root: &Path) -> Result<UnitCatalog> {
    let path = workspace_root.join(UNITS_FILE);
    let yaml = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading unit catalog {}", path.display()))?;
    let catalog: UnitCatalog =
        serde_yaml::from_str(&yaml).with_context(|| format!("parsing unit catalog {}", path.display()))?;
    for unit in &catalog.units {
        if let Some(admin) = &unit.home_admin {
            if catalog.admin(admin).is_none() {
                anyhow::bail!("unit {} names unknown home admin {admin}", unit.id);
            }
        }
    }
    Ok(catalog)
}

/// Reads `holidays.yaml`, or falls back to the built-in Myanmar table when the
/// file does not exist.
pub async fn load_holidays(workspace_root: &Path) -> Result<HolidayTable> {
    let path = workspace_root.join(HOLIDAYS_FILE);
    if !tokio::fs::try_exists(&path)
        .await
        .with_context(|| format!("checking holiday file {}", path.display()))?
    {
        info!(path = %path.display(), "no holiday file; using built-in Myanmar holidays");
        return Ok(HolidayTable::myanmar());
    }
    let yaml = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading holiday file {}", path.display()))?;
    HolidayTable::from_yaml_str(&yaml).with_context(|| format!("parsing holiday file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mbk_core::UnitId;
    use tempfile::tempdir;

    #[tokio::test]
    async fn catalog_loads_units_and_admins() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(UNITS_FILE),
            "units:\n  - id: U1\n    label: One\n    home_admin: A\nadmins:\n  - key: A\n    display_name: Admin A\n    email: a@example.com\n",
        )
        .unwrap();
        let catalog = load_catalog(dir.path()).await.unwrap();
        assert!(catalog.contains(&UnitId::new("U1")));
        assert_eq!(catalog.admin("A").map(|a| a.email.as_str()), Some("a@example.com"));
    }

    #[tokio::test]
    async fn catalog_with_dangling_admin_is_rejected() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(UNITS_FILE),
            "units:\n  - id: U1\n    label: One\n    home_admin: Missing\n",
        )
        .unwrap();
        assert!(load_catalog(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn missing_holiday_file_uses_builtin_table() {
        let dir = tempdir().expect("tempdir");
        let table = load_holidays(dir.path()).await.unwrap();
        assert_eq!(table, HolidayTable::myanmar());
    }

    #[tokio::test]
    async fn holiday_file_replaces_builtin_table() {
        let dir = tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(HOLIDAYS_FILE),
            "holidays:\n  - name: Founders Day\n    date: 2025-06-18\n",
        )
        .unwrap();
        let table = load_holidays(dir.path()).await.unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.name_for(NaiveDate::from_ymd_opt(2025, 6, 18).unwrap()),
            Some("Founders Day")
        );
    }

    #[test]
    fn bad_offset_is_a_config_error() {
        let mut config = IntakeConfig::local(".");
        config.tz_offset = "Asia/Yangon".into();
        assert!(matches!(config.timezone(), Err(IntakeError::Config(_))));
    }

    #[tokio::test]
    async fn workspace_files_parse() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../..");
        let catalog = load_catalog(&root).await.unwrap();
        assert!(catalog.contains(&UnitId::new("SCM-001-YGN")));
        assert!(catalog.contains(&UnitId::new("SCM-002-MDY")));
        let table = load_holidays(&root).await.unwrap();
        assert!(table.len() > HolidayTable::myanmar().len());
    }
}
