use std::{path::PathBuf, time::Duration};

use config::{Config, Environment, File, Map};
use emigate_error::{bail, ensure, EmigateResult};
use serde::{Deserialize, Serialize};

use crate::{
    error::SettingsError,
    logging::{LogFormat, LoggingConfig},
};

/// Переменная окружения с путём к файлу конфигурации.
pub const CONFIG_PATH_ENV: &str = "EMIGATE_CONFIG";

/// Вариант брокера, который собирает фабрика.
///
/// Встроен только внутрипроцессный транспорт. Адаптеры облачных бэкендов
/// подключаются через [`crate::BrokerFactory::with_transport`], поэтому
/// значения вроде `PUBSUB` отклоняются при загрузке настроек.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerKind {
    /// Внутрипроцессный транспорт
    #[default]
    #[serde(alias = "MEMORY")]
    Memory,
}

/// Настройки процесса.
///
/// Имена полей совпадают с переменными окружения шлюза
/// (`GATEWAY_REPLIES_TOPIC` → `gateway_replies_topic` и т.д.).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub broker_type: BrokerKind,
    pub gateway_replies_topic: String,
    pub gateway_replies_topic_subscription: String,
    pub gateway_events_topic: String,
    pub gateway_events_topic_subscription: String,
    pub gateway_materialized_view_updates_topic: String,
    pub gateway_materialized_view_updates_topic_subscription: String,
    /// Таймаут ожидания ответа по умолчанию, мс
    pub reply_timeout: u64,
    /// Очередь слушателя шины, после которой пишется предупреждение
    pub channel_capacity: usize,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Загружает настройки: значения по умолчанию, затем файл из
    /// `EMIGATE_CONFIG` (если задан), затем переменные окружения.
    pub fn load() -> Result<Self, SettingsError> {
        let mut builder = Self::defaults(Config::builder())?;
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::with_name(&path));
        }
        let cfg = builder
            .add_source(Environment::default().try_parsing(true))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Загружает настройки из явно переданных переменных окружения.
    pub fn from_env_map(vars: Map<String, String>) -> Result<Self, SettingsError> {
        let cfg = Self::defaults(Config::builder())?
            .add_source(Environment::default().source(Some(vars)).try_parsing(true))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }

    /// Проверяет согласованность настроек.
    ///
    /// # Возвращает
    /// `Ok(())` или [`SettingsError::Invalid`] с именем первого неверного
    /// поля, обёрнутую в `StackError`.
    pub fn validate(&self) -> EmigateResult<()> {
        let topics = [
            ("gateway_replies_topic", &self.gateway_replies_topic),
            ("gateway_events_topic", &self.gateway_events_topic),
            (
                "gateway_materialized_view_updates_topic",
                &self.gateway_materialized_view_updates_topic,
            ),
        ];
        let subscriptions = [
            (
                "gateway_replies_topic_subscription",
                &self.gateway_replies_topic_subscription,
            ),
            (
                "gateway_events_topic_subscription",
                &self.gateway_events_topic_subscription,
            ),
            (
                "gateway_materialized_view_updates_topic_subscription",
                &self.gateway_materialized_view_updates_topic_subscription,
            ),
        ];

        for (field, value) in topics.iter().chain(subscriptions.iter()) {
            ensure!(
                !value.trim().is_empty(),
                SettingsError::invalid(*field, "cannot be empty")
            );
        }
        for (i, (field, value)) in topics.iter().enumerate() {
            ensure!(
                !topics[..i].iter().any(|(_, other)| other == value),
                SettingsError::invalid(*field, format!("topic '{value}' is configured twice"))
            );
        }
        for (i, (field, value)) in subscriptions.iter().enumerate() {
            ensure!(
                !subscriptions[..i].iter().any(|(_, other)| other == value),
                SettingsError::invalid(
                    *field,
                    format!("subscription '{value}' is configured twice")
                )
            );
        }

        ensure!(
            self.reply_timeout > 0,
            SettingsError::invalid("reply_timeout", "must be positive")
        );
        ensure!(
            self.channel_capacity > 0,
            SettingsError::invalid("channel_capacity", "must be positive")
        );
        if let Err(reason) = self.logging().validate() {
            bail!(SettingsError::invalid("log_level", reason));
        }
        Ok(())
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout)
    }

    pub fn logging(&self) -> LoggingConfig {
        LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format,
            log_dir: self.log_dir.clone(),
            ..LoggingConfig::default()
        }
    }

    fn defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, SettingsError> {
        Ok(builder
            .set_default("broker_type", "memory")?
            .set_default("gateway_replies_topic", "emi-gateway-replies")?
            .set_default(
                "gateway_replies_topic_subscription",
                "emi-gateway-replies-subscription",
            )?
            .set_default("gateway_events_topic", "emi-gateway-events")?
            .set_default(
                "gateway_events_topic_subscription",
                "emi-gateway-events-subscription",
            )?
            .set_default(
                "gateway_materialized_view_updates_topic",
                "emi-gateway-materialized-view-updates",
            )?
            .set_default(
                "gateway_materialized_view_updates_topic_subscription",
                "emi-gateway-materialized-view-updates-subscription",
            )?
            .set_default("reply_timeout", 2000)?
            .set_default("channel_capacity", 1024)?
            .set_default("log_level", "info")?
            .set_default("log_format", "pretty")?)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker_type: BrokerKind::Memory,
            gateway_replies_topic: "emi-gateway-replies".to_string(),
            gateway_replies_topic_subscription: "emi-gateway-replies-subscription".to_string(),
            gateway_events_topic: "emi-gateway-events".to_string(),
            gateway_events_topic_subscription: "emi-gateway-events-subscription".to_string(),
            gateway_materialized_view_updates_topic: "emi-gateway-materialized-view-updates"
                .to_string(),
            gateway_materialized_view_updates_topic_subscription:
                "emi-gateway-materialized-view-updates-subscription".to_string(),
            reply_timeout: 2000,
            channel_capacity: 1024,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_dir: None,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
