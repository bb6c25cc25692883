#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use emigate::{
    broker::{ATTR_CORRELATION_ID, ATTR_SENDER_ID, ATTR_TYPE},
    transport::Attributes,
    BrokerConfig, InMemoryTransport, InboundMessage, PubSubBroker, Transport,
};
use serde_json::Value;

pub const REPLIES: &str = "emi-gateway-replies";
pub const EVENTS: &str = "emi-gateway-events";
pub const VIEW_UPDATES: &str = "emi-gateway-materialized-view-updates";

pub async fn connect() -> (Arc<InMemoryTransport>, Arc<PubSubBroker<InMemoryTransport>>) {
    connect_with(BrokerConfig::default()).await
}

pub async fn connect_with(
    config: BrokerConfig
) -> (Arc<InMemoryTransport>, Arc<PubSubBroker<InMemoryTransport>>) {
    let transport = Arc::new(InMemoryTransport::recording());
    let broker = PubSubBroker::connect(config, transport.clone()).await;
    (transport, Arc::new(broker))
}

pub fn attrs(pairs: &[(&str, &str)]) -> Attributes {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Публикует ответ в топик ответов от имени другого участника.
pub fn send_reply(
    transport: &InMemoryTransport,
    correlation_id: &str,
    payload: &Value,
) {
    transport
        .publish_raw(
            REPLIES,
            serde_json::to_vec(payload).unwrap(),
            attrs(&[
                (ATTR_TYPE, "Reply"),
                (ATTR_SENDER_ID, "peer"),
                (ATTR_CORRELATION_ID, correlation_id),
            ]),
        )
        .unwrap();
}

/// Поднимает «удалённого» участника: он слушает `topic` и через `delay`
/// отвечает на каждое сообщение в топик ответов. Correlation id ответа
/// равен id входящего сообщения; тело строит `reply`.
pub async fn spawn_peer<F>(
    transport: Arc<InMemoryTransport>,
    topic: &str,
    delay: Duration,
    reply: F,
) where
    F: Fn(&InboundMessage) -> Value + Send + Sync + 'static,
{
    transport.seed_topic(topic);
    let handle = transport.topic(topic);
    let subscription = transport
        .get_or_create_subscription(&handle, &format!("{topic}-peer"))
        .await
        .unwrap();

    let responder = transport.clone();
    subscription
        .attach(Arc::new(move |message: InboundMessage| {
            let transport = responder.clone();
            let body = reply(&message);
            let correlation_id = message.id.clone();
            message.ack();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                send_reply(&transport, &correlation_id, &body);
            });
        }))
        .await
        .unwrap();
}

/// Ждёт, пока брокер зарегистрирует `n` ожиданий ответа.
pub async fn until_pending(
    broker: &PubSubBroker<InMemoryTransport>,
    n: usize,
) {
    while broker.pending_replies() < n {
        tokio::task::yield_now().await;
    }
}
