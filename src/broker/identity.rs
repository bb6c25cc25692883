use std::{fmt, sync::Arc};

use uuid::Uuid;

/// Идентификатор отправителя, уникальный на время жизни процесса.
///
/// Ставится атрибутом `senderId` на каждое исходящее сообщение и позволяет
/// отфильтровать собственное эхо.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BrokerIdentity(Arc<str>);

impl BrokerIdentity {
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BrokerIdentity {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BrokerIdentity {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}
