use std::any::Any;

use crate::{ErrorExt, StatusCode};

/// Ошибки, которые адаптер транспорта возвращает ядру брокера.
///
/// Ядро различает только эти четыре случая; всё специфичное для бэкенда
/// адаптер сворачивает в `reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Ресурс (топик, подписка) уже существует
    AlreadyExists { resource: String },
    /// Ресурс не найден
    NotFound { resource: String },
    /// Бэкенд недоступен
    Unavailable { reason: String },
    /// Бэкенд отклонил запрос
    Rejected { reason: String },
}

impl TransportError {
    /// Проигранная гонка создания: ресурс уже создан кем-то другим.
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::AlreadyExists { resource } => write!(f, "Resource already exists: {resource}"),
            Self::NotFound { resource } => write!(f, "Resource not found: {resource}"),
            Self::Unavailable { reason } => write!(f, "Transport unavailable: {reason}"),
            Self::Rejected { reason } => write!(f, "Transport rejected request: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl ErrorExt for TransportError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::AlreadyExists { .. } => StatusCode::AlreadyExists,
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::Unavailable { .. } => StatusCode::TransportUnavailable,
            Self::Rejected { .. } => StatusCode::InvalidArgs,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
