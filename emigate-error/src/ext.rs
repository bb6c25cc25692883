use std::{any::Any, error::Error};

use crate::StatusCode;

/// Общее расширение для ошибок брокера (object-safe).
///
/// Каждая ошибка, проходящая через `StackError`, умеет отдать:
/// - статус-код,
/// - безопасное сообщение для вызывающей стороны (резолвер, HTTP-слой),
/// - подробное сообщение для логов,
/// - теги для метрик.
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус-код ошибки.
    ///
    /// По умолчанию [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }

    /// Возвращает ошибку как [`Any`] для downcast к конкретному типу.
    fn as_any(&self) -> &dyn Any;

    /// Сообщение, которое можно отдать клиенту шлюза.
    ///
    /// Для внутренних ошибок детали скрываются.
    fn client_message(&self) -> String {
        match self.status_code() {
            StatusCode::Unknown | StatusCode::Internal | StatusCode::Unexpected => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Подробное сообщение для логов.
    fn log_message(&self) -> String {
        format!("{self:?}")
    }

    /// Имеет ли смысл вызывающей стороне повторить операцию.
    ///
    /// Сам брокер ничего не повторяет.
    fn is_retryable(&self) -> bool {
        self.status_code().is_retryable()
    }

    /// Теги для метрик.
    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", self.type_name()),
            ("status_code", self.status_code().to_string()),
        ]
    }

    /// Короткое имя типа ошибки (без пути модулей).
    fn type_name(&self) -> String {
        std::any::type_name::<Self>()
            .split("::")
            .last()
            .unwrap_or("Unknown")
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{any::Any, error::Error, fmt};

    use super::*;

    #[derive(Debug)]
    struct OpaqueError(pub &'static str);

    impl fmt::Display for OpaqueError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "opaque: {}", self.0)
        }
    }

    impl Error for OpaqueError {}

    impl ErrorExt for OpaqueError {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Debug)]
    struct DeadlineError(pub &'static str);

    impl fmt::Display for DeadlineError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "no reply for {}", self.0)
        }
    }

    impl Error for DeadlineError {}

    impl ErrorExt for DeadlineError {
        fn status_code(&self) -> StatusCode {
            StatusCode::Timeout
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Тест проверяет, что статус по умолчанию `Internal`, а сообщение
    /// клиенту не раскрывает деталей.
    #[test]
    fn test_default_status_hides_details() {
        let e = OpaqueError("secret topic name");
        assert_eq!(e.status_code(), StatusCode::Internal);
        assert_eq!(e.client_message(), "Internal server error");
    }

    /// Тест проверяет, что для не-внутренних кодов клиент видит `Display`.
    #[test]
    fn test_client_message_for_timeout() {
        let e = DeadlineError("c-1");
        assert_eq!(e.client_message(), "no reply for c-1");
        assert!(e.is_retryable());
    }

    /// Тест проверяет downcast через `as_any`.
    #[test]
    fn test_as_any_downcast() {
        let e = DeadlineError("c-2");
        let down = e.as_any().downcast_ref::<DeadlineError>();
        assert_eq!(down.map(|d| d.0), Some("c-2"));
    }

    /// Тест проверяет теги метрик и короткое имя типа.
    #[test]
    fn test_metrics_tags_and_type_name() {
        let e = DeadlineError("c-3");
        let tags = e.metrics_tags();
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "status_code" && v == &StatusCode::Timeout.to_string()));
        assert!(tags
            .iter()
            .any(|(k, v)| *k == "error_type" && v.ends_with("DeadlineError")));
        assert_eq!(e.log_message(), format!("{e:?}"));
    }
}
