pub mod broker;
pub mod transport;

// Публичный экспорт всех типов ошибок из вложенных модулей.
pub use broker::*;
pub use transport::*;

use crate::{ErrorExt, StatusCode};

/// Универсальная ошибка с кодом и сообщением.
#[derive(Debug, Clone)]
pub struct GenericError {
    code: StatusCode,
    message: String,
}

impl GenericError {
    pub fn new(
        code: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for GenericError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for GenericError {}

impl ErrorExt for GenericError {
    fn status_code(&self) -> StatusCode {
        self.code
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Конвертация из std::io::Error
impl From<std::io::Error> for crate::StackError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::NotFound => StatusCode::NotFound,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted => StatusCode::ConnectionFailed,
            std::io::ErrorKind::TimedOut => StatusCode::Timeout,
            _ => StatusCode::Io,
        };

        crate::StackError::new(GenericError::new(code, err.to_string()))
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;

    #[test]
    fn test_generic_error() {
        let err = GenericError::new(StatusCode::InvalidArgs, "empty topic");
        assert_eq!(err.status_code(), StatusCode::InvalidArgs);
        assert_eq!(err.to_string(), "empty topic");
    }

    /// Тест проверяет маппинг io::ErrorKind -> StatusCode.
    #[test]
    fn test_io_error_kind_mapping() {
        let cases = [
            (io::ErrorKind::NotFound, StatusCode::NotFound),
            (io::ErrorKind::ConnectionRefused, StatusCode::ConnectionFailed),
            (io::ErrorKind::TimedOut, StatusCode::Timeout),
            (io::ErrorKind::Other, StatusCode::Io),
        ];

        for (kind, expected) in cases {
            let stack: crate::StackError = io::Error::new(kind, "boom").into();
            assert_eq!(stack.status_code(), expected, "kind={kind:?}");
            assert!(stack.to_string().contains("boom"));
        }
    }
}
