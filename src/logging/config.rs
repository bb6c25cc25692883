use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Формат консольного вывода.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Конфигурация логирования.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Уровень логов крейта: trace, debug, info, warn, error
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    /// Каталог для файлового лога с ежедневной ротацией. `None` отключает
    /// файловый лог.
    pub log_dir: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
            log_dir: None,
            file_prefix: "emigate.log".to_string(),
        }
    }
}

impl LoggingConfig {
    const LEVELS: [&'static str; 5] = ["trace", "debug", "info", "warn", "error"];

    pub fn validate(&self) -> Result<(), String> {
        let level = self.level.to_ascii_lowercase();
        if !Self::LEVELS.contains(&level.as_str()) {
            return Err(format!("unknown log level '{}'", self.level));
        }
        if self.log_dir.is_some() && self.file_prefix.trim().is_empty() {
            return Err("file_prefix cannot be empty when log_dir is set".to_string());
        }
        Ok(())
    }

    /// Директива `EnvFilter`: уровень конфига для крейтов emigate, `warn`
    /// для остальных.
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        format!("warn,emigate={level},emigate_error={level}")
    }

    /// Создаёт каталог файлового лога, если он задан.
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        match &self.log_dir {
            Some(dir) => std::fs::create_dir_all(dir),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = LoggingConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.format, LogFormat::Pretty);
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let cfg = LoggingConfig {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(cfg.validate().unwrap_err().contains("loud"));
    }

    #[test]
    fn test_filter_directive() {
        let cfg = LoggingConfig {
            level: "DEBUG".to_string(),
            ..Default::default()
        };
        assert_eq!(
            cfg.build_filter_directive(),
            "warn,emigate=debug,emigate_error=debug"
        );
    }

    #[test]
    fn test_format_deserializes_lowercase() {
        let f: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(f, LogFormat::Json);
    }

    #[test]
    fn test_ensure_log_dir_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("logs");
        let cfg = LoggingConfig {
            log_dir: Some(dir.clone()),
            ..Default::default()
        };
        cfg.ensure_log_dir().unwrap();
        assert!(dir.is_dir());
    }
}
