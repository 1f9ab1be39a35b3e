//! Domain events
use async_trait::async_trait;
use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    Sale(SaleEvent),
    Inventory(InventoryEvent),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SaleEvent {
    Recorded { transaction_id: i32, total_amount: i64, lines: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    StockTaken { product_id: i32, quantity: i32, remaining: i32 },
}

/// Receives events of committed sales.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, events: Vec<DomainEvent>);
}

/// Publishes events as JSON on a NATS subject.
pub struct NatsEventSink {
    client: async_nats::Client,
    subject: String,
}

impl NatsEventSink {
    pub const DEFAULT_SUBJECT: &'static str = "sales.events";

    pub fn new(client: async_nats::Client) -> Self {
        Self { client, subject: Self::DEFAULT_SUBJECT.to_string() }
    }
}

#[async_trait]
impl EventSink for NatsEventSink {
    async fn publish(&self, events: Vec<DomainEvent>) {
        for event in events {
            let payload = match serde_json::to_vec(&event) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode sale event");
                    continue;
                }
            };
            if let Err(e) = self.client.publish(self.subject.clone(), payload.into()).await {
                tracing::warn!(error = %e, subject = %self.subject, "failed to publish sale event");
            }
        }
    }
}
