//! Ошибки процесса: настройки и фабрика. Ошибки ядра брокера живут в
//! крейте `emigate-error`.

use std::any::Any;

use emigate_error::{ErrorExt, StatusCode};
use thiserror::Error;

pub use emigate_error::{BrokerError, EmigateResult, ResultExt, StackError, TransportError};

/// Ошибки загрузки и проверки настроек.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("Invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SettingsError {
    pub fn invalid(
        field: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl ErrorExt for SettingsError {
    fn status_code(&self) -> StatusCode {
        StatusCode::InvalidArgs
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn client_message(&self) -> String {
        "Invalid configuration".to_string()
    }
}
