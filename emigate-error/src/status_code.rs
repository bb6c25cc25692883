use std::fmt;

use num_enum::TryFromPrimitive;

/// Коды статуса для категоризации ошибок брокера.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных и корреляции
/// - 3xxx: Топики и подписки
/// - 4xxx: Перегрузка
/// - 5xxx: Сериализация
/// - 6xxx: Транспорт / ожидание ответа
/// - 8xxx: Формат входящих сообщений
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,
    NotImplemented = 1005,

    // === 2xxx: Данные и корреляция ===
    NotFound = 2000,
    AlreadyExists = 2001,
    InvalidData = 2002,
    DuplicateCorrelation = 2003,

    // === 3xxx: Топики и подписки ===
    TopicResolutionFailed = 3000,
    SubscriptionSetupFailed = 3001,
    DetachFailed = 3002,

    // === 4xxx: Перегрузка ===
    RateLimited = 4000,

    // === 5xxx: Сериализация ===
    SerializationFailed = 5000,
    DeserializationFailed = 5001,

    // === 6xxx: Транспорт ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ConnectionFailed = 6003,
    TransportUnavailable = 6004,
    PublishFailed = 6005,

    // === 8xxx: Формат сообщений ===
    InvalidUtf8 = 8000,
    MalformedMessage = 8001,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если вызывающей стороне имеет смысл повторить
    /// операцию. Брокер сам повторов не делает.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::TransportUnavailable
                | Self::ConnectionFailed
                | Self::TopicResolutionFailed
                | Self::PublishFailed
                | Self::RateLimited
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызывающей стороны: некорректный запрос или данные.
    pub fn is_client_error(&self) -> bool {
        matches!(self.code(), 2000..=2999) || matches!(self, Self::InvalidArgs)
    }

    /// Внутренняя или инфраструктурная ошибка.
    pub fn is_server_error(&self) -> bool {
        matches!(self.code(), 1000..=1999 | 3000..=3999 | 5000..=6999)
    }

    /// Ошибка формата входящего сообщения (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::DetachFailed)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound | Self::AlreadyExists => LogLevel::Debug,
            Self::InvalidArgs | Self::InvalidData | Self::DuplicateCorrelation => LogLevel::Info,
            Self::Timeout
            | Self::RateLimited
            | Self::ConnectionClosed
            | Self::MalformedMessage
            | Self::InvalidUtf8 => LogLevel::Warn,
            Self::Internal
            | Self::DetachFailed
            | Self::SubscriptionSetupFailed
            | Self::TopicResolutionFailed
            | Self::PublishFailed => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }

    /// HTTP-статус для слоя шлюза.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Success => 200,
            Self::NotFound => 404,
            Self::AlreadyExists | Self::DuplicateCorrelation => 409,
            Self::InvalidArgs | Self::InvalidData => 400,
            Self::RateLimited => 429,
            Self::Timeout => 504,
            Self::NotImplemented | Self::Unsupported => 501,
            Self::TransportUnavailable | Self::ConnectionClosed | Self::ConnectionFailed => 503,
            Self::PublishFailed | Self::TopicResolutionFailed => 502,
            _ => 500,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{:?} ({})", self, self.code())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
