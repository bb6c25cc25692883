use std::{collections::HashMap, fmt, sync::Arc};

use bytes::Bytes;

/// Идентификатор сообщения, назначенный транспортом при публикации.
pub type MessageId = String;

/// Строковые атрибуты сообщения.
pub type Attributes = HashMap<String, String>;

/// Подтверждение доставки конкретного сообщения.
pub trait AckHandle: Send + Sync {
    fn ack(&self);
}

/// Сообщение, доставленное транспортом в обработчик подписки.
#[derive(Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub data: Bytes,
    pub attributes: Attributes,
    acker: Option<Arc<dyn AckHandle>>,
}

impl InboundMessage {
    pub fn new(
        id: impl Into<MessageId>,
        data: impl Into<Bytes>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            attributes,
            acker: None,
        }
    }

    /// Прикрепляет подтверждение, которое вызовет [`InboundMessage::ack`].
    pub fn with_acker(
        mut self,
        acker: Arc<dyn AckHandle>,
    ) -> Self {
        self.acker = Some(acker);
        self
    }

    pub fn attribute(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Подтверждает получение. Сообщение без подтверждения просто
    /// потребляется.
    pub fn ack(self) {
        if let Some(acker) = self.acker {
            acker.ack();
        }
    }
}

impl fmt::Debug for InboundMessage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("InboundMessage")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .field("attributes", &self.attributes)
            .finish()
    }
}
