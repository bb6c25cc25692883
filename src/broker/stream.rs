use std::sync::Arc;

use super::{Envelope, EnvelopeFilter, Listener};

/// Неограниченный поток сообщений одного топика.
///
/// Не имеет таймаута. Завершается при `cancel`/`drop` или при остановке
/// брокера.
pub struct EventStream {
    listener: Option<Listener>,
    filter: EnvelopeFilter,
}

impl EventStream {
    pub(crate) fn new(
        listener: Listener,
        filter: EnvelopeFilter,
    ) -> Self {
        Self {
            listener: Some(listener),
            filter,
        }
    }

    /// Ожидает следующее подходящее сообщение.
    ///
    /// # Возвращает
    /// Сообщение или `None`, если брокер остановлен. После первого `None`
    /// поток считается завершённым.
    pub async fn next(&mut self) -> Option<Arc<Envelope>> {
        let listener = self.listener.as_mut()?;
        match listener.recv_matching(&self.filter).await {
            Some(envelope) => Some(envelope),
            None => {
                self.listener = None;
                None
            }
        }
    }

    /// Отписывается от шины. Аналогично `drop(self)`.
    pub fn cancel(self) {}

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{broker::BroadcastChannel, transport::Attributes};

    fn event(message_type: &str) -> Arc<Envelope> {
        Arc::new(Envelope {
            source_topic: Arc::from("emi-gateway-events"),
            message_id: "1".to_string(),
            message_type: Some(message_type.to_string()),
            payload: json!({"type": message_type}),
            sender_id: None,
            correlation_id: None,
            attributes: Attributes::new(),
        })
    }

    /// Тест проверяет, что поток отдаёт подходящие сообщения по порядку и
    /// завершается при закрытии шины.
    #[tokio::test]
    async fn test_stream_yields_until_close() {
        let bus = BroadcastChannel::new(8);
        let filter = EnvelopeFilter::new()
            .topic("emi-gateway-events")
            .types(Some(vec!["A".to_string()]));
        let mut stream = EventStream::new(bus.listen().unwrap(), filter);

        bus.push(event("A"));
        bus.push(event("B"));
        bus.push(event("A"));
        bus.close();

        assert_eq!(stream.next().await.unwrap().payload, json!({"type": "A"}));
        assert_eq!(stream.next().await.unwrap().payload, json!({"type": "A"}));
        assert!(stream.next().await.is_none());
        assert!(stream.is_closed());
        assert!(stream.next().await.is_none());
    }

    /// Тест проверяет, что cancel снимает слушателя с шины.
    #[tokio::test]
    async fn test_cancel_unregisters_listener() {
        let bus = BroadcastChannel::new(8);
        let stream = EventStream::new(bus.listen().unwrap(), EnvelopeFilter::new());
        assert_eq!(bus.listener_count(), 1);
        stream.cancel();
        assert_eq!(bus.listener_count(), 0);
    }
}
