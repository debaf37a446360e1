use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::{EventType, SubscriptionId, TenantId, WebhookSubscription};

/// Narrow read interface over the external subscription registry.
///
/// Create/update/delete of subscriptions belongs to the registry; the
/// dispatcher only ever resolves and reads.
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    /// Active subscriptions of a tenant that want the given event kind.
    async fn active_subscriptions_for_event(
        &self,
        tenant_id: &TenantId,
        event_type: EventType,
    ) -> Vec<WebhookSubscription>;

    /// Resolve one subscription by id.
    async fn get(&self, subscription_id: &SubscriptionId) -> Option<WebhookSubscription>;
}

/// In-memory directory for tests and embedded usage.
#[derive(Default)]
pub struct InMemorySubscriptionDirectory {
    subscriptions: RwLock<HashMap<SubscriptionId, WebhookSubscription>>,
}

impl InMemorySubscriptionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, subscription: WebhookSubscription) {
        self.subscriptions
            .write()
            .await
            .insert(subscription.id.clone(), subscription);
    }

    pub async fn remove(&self, subscription_id: &SubscriptionId) {
        self.subscriptions.write().await.remove(subscription_id);
    }
}

#[async_trait]
impl SubscriptionDirectory for InMemorySubscriptionDirectory {
    async fn active_subscriptions_for_event(
        &self,
        tenant_id: &TenantId,
        event_type: EventType,
    ) -> Vec<WebhookSubscription> {
        let guard = self.subscriptions.read().await;
        guard
            .values()
            .filter(|sub| {
                sub.is_active
                    && &sub.tenant_id == tenant_id
                    && sub.is_subscribed_to(event_type)
            })
            .cloned()
            .collect()
    }

    async fn get(&self, subscription_id: &SubscriptionId) -> Option<WebhookSubscription> {
        self.subscriptions.read().await.get(subscription_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_active_subscriptions_by_tenant_and_type() {
        let directory = InMemorySubscriptionDirectory::new();

        directory
            .insert(WebhookSubscription::new(
                "sub_match",
                "acct_1",
                "https://a.example.com/hook",
                vec![EventType::OrderCreated],
            ))
            .await;
        directory
            .insert(
                WebhookSubscription::new(
                    "sub_inactive",
                    "acct_1",
                    "https://b.example.com/hook",
                    vec![EventType::OrderCreated],
                )
                .with_active(false),
            )
            .await;
        directory
            .insert(WebhookSubscription::new(
                "sub_other_tenant",
                "acct_2",
                "https://c.example.com/hook",
                vec![EventType::OrderCreated],
            ))
            .await;
        directory
            .insert(WebhookSubscription::new(
                "sub_other_type",
                "acct_1",
                "https://d.example.com/hook",
                vec![EventType::GalleryPublished],
            ))
            .await;

        let matches = directory
            .active_subscriptions_for_event(
                &TenantId("acct_1".into()),
                EventType::OrderCreated,
            )
            .await;

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, SubscriptionId("sub_match".into()));
    }

    #[tokio::test]
    async fn get_by_id() {
        let directory = InMemorySubscriptionDirectory::new();
        directory
            .insert(WebhookSubscription::new(
                "sub_1",
                "acct_1",
                "https://a.example.com/hook",
                vec![EventType::OrderCreated],
            ))
            .await;

        assert!(directory.get(&SubscriptionId("sub_1".into())).await.is_some());
        assert!(directory.get(&SubscriptionId("missing".into())).await.is_none());
    }
}
