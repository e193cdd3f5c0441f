//! Subscription persistence and delivery queues.
//!
//! A subscription is a regular `Subscription` resource stored through the
//! [`ResourceDao`], plus a row in the subscription table keyed by an internal
//! pid. The row carries the criteria, whether the subscription is active, and
//! the FIFO queue of resources waiting for delivery.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use jpaserver_core::{CoreError, IdType, resource_id_of, resource_type_of};
use jpaserver_search::{ResourceDao, SearchError, parse_criteria};
use serde_json::Value;

use crate::error::{SubscriptionError, SubscriptionResult};

pub const SUBSCRIPTION_TYPE: &str = "Subscription";
pub const WEBSOCKET_CHANNEL: &str = "websocket";
/// Resources held per subscription before the oldest are dropped.
pub const DEFAULT_QUEUE_LIMIT: usize = 1000;

#[async_trait]
pub trait SubscriptionDao: Send + Sync {
    /// Read a subscription resource. Missing or deleted subscriptions are
    /// reported as [`SubscriptionError::UnknownSubscription`].
    async fn read(&self, id: &IdType) -> SubscriptionResult<Value>;

    /// Validate and persist a new subscription, returning its id.
    async fn create(&self, subscription: Value) -> SubscriptionResult<IdType>;

    /// Validate and store a new version of `id`, creating it if absent.
    async fn update(&self, id: &IdType, subscription: Value) -> SubscriptionResult<IdType>;

    async fn delete(&self, id: &IdType) -> SubscriptionResult<()>;

    /// Internal pid of the subscription table row for a subscription resource.
    async fn subscription_table_pid(&self, id: &IdType) -> SubscriptionResult<i64>;

    /// Drain the delivery queue of a subscription, oldest first.
    async fn get_undelivered_resources_and_purge(&self, pid: i64)
    -> SubscriptionResult<Vec<Value>>;

    /// Queue a changed resource for every active subscription whose criteria
    /// match it. Returns the number of subscriptions it was queued for.
    async fn resource_changed(&self, resource: &Value) -> SubscriptionResult<usize>;
}

#[derive(Debug)]
struct SubscriptionRow {
    id: String,
    criteria: String,
    active: bool,
    queue: VecDeque<Value>,
}

/// Subscription DAO backed by the in-memory resource store.
#[derive(Debug)]
pub struct InMemorySubscriptionDao {
    resources: Arc<ResourceDao>,
    rows: DashMap<i64, SubscriptionRow>,
    pids: DashMap<String, i64>,
    next_pid: AtomicI64,
    queue_limit: usize,
}

impl InMemorySubscriptionDao {
    pub fn new(resources: Arc<ResourceDao>) -> Self {
        Self {
            resources,
            rows: DashMap::new(),
            pids: DashMap::new(),
            next_pid: AtomicI64::new(1),
            queue_limit: DEFAULT_QUEUE_LIMIT,
        }
    }

    /// Bound each delivery queue; the oldest entries go first.
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit.max(1);
        self
    }

    pub fn resources(&self) -> &Arc<ResourceDao> {
        &self.resources
    }

    /// Number of subscription table rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Create or refresh the table row of a stored subscription resource.
    fn sync_row(&self, subscription: &Value) -> Option<i64> {
        let id = resource_id_of(subscription)?.to_string();
        let criteria = subscription
            .get("criteria")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let active = subscription.get("status").and_then(Value::as_str) == Some("active");

        let pid = *self
            .pids
            .entry(id.clone())
            .or_insert_with(|| self.next_pid.fetch_add(1, Ordering::Relaxed));
        self.rows
            .entry(pid)
            .and_modify(|row| {
                row.criteria.clone_from(&criteria);
                row.active = active;
            })
            .or_insert_with(|| SubscriptionRow {
                id: id.clone(),
                criteria: criteria.clone(),
                active,
                queue: VecDeque::new(),
            });
        tracing::debug!(subscription_id = %id, pid, active, "Synced subscription row");
        Some(pid)
    }

    fn remove_row(&self, id: &str) {
        if let Some((_, pid)) = self.pids.remove(id) {
            self.rows.remove(&pid);
        }
    }

    /// Drop the row of a subscription deleted outside this DAO.
    pub fn resource_deleted(&self, resource_type: &str, id: &str) {
        if resource_type == SUBSCRIPTION_TYPE {
            self.remove_row(id);
        }
    }
}

/// Id part of a subscription id. Ids of other resource types never name a
/// subscription.
fn subscription_id_part(id: &IdType) -> SubscriptionResult<&str> {
    match id.resource_type() {
        Some(SUBSCRIPTION_TYPE) | None => {}
        Some(_) => return Err(SubscriptionError::UnknownSubscription(id.to_string())),
    }
    id.id_part()
        .filter(|_| id.is_id_part_valid())
        .ok_or_else(|| SubscriptionError::InvalidBindRequest("No ID included".into()))
}

/// Persistence validation for a subscription about to be stored.
fn validate(resources: &ResourceDao, subscription: &Value) -> SubscriptionResult<()> {
    if resource_type_of(subscription)? != SUBSCRIPTION_TYPE {
        return Err(SubscriptionError::validation(
            "Resource is not a Subscription",
        ));
    }

    let criteria = subscription
        .get("criteria")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| SubscriptionError::validation("Subscription.criteria must be populated"))?;
    if !criteria.contains('?') {
        return Err(SubscriptionError::validation(format!(
            "Subscription.criteria must be in the form \"{{Resource Type}}?[params]\": {criteria}"
        )));
    }
    let (resource_type, _) = parse_criteria(criteria).map_err(validation_error)?;
    if !resources.registry().is_known_type(&resource_type) {
        return Err(SubscriptionError::validation(format!(
            "Subscription.criteria contains invalid/unsupported resource type: {resource_type}"
        )));
    }
    resources
        .validate_criteria(criteria)
        .map_err(validation_error)?;

    let channel_type = subscription
        .pointer("/channel/type")
        .and_then(Value::as_str);
    if channel_type != Some(WEBSOCKET_CHANNEL) {
        return Err(SubscriptionError::validation(
            "Subscription.channel.type must be websocket",
        ));
    }

    match subscription.get("status").and_then(Value::as_str) {
        Some("active" | "requested") => Ok(()),
        Some(other) => Err(SubscriptionError::validation(format!(
            "Subscription.status must be active or requested, found {other}"
        ))),
        None => Err(SubscriptionError::validation(
            "Subscription.status must be populated",
        )),
    }
}

fn validation_error(e: SearchError) -> SubscriptionError {
    SubscriptionError::validation(format!("Invalid Subscription.criteria: {e}"))
}

fn not_found_as_unknown(id: &IdType, e: SearchError) -> SubscriptionError {
    match e {
        SearchError::Core(CoreError::ResourceNotFound { .. } | CoreError::ResourceDeleted { .. }) => {
            SubscriptionError::UnknownSubscription(id.to_string())
        }
        other => other.into(),
    }
}

#[async_trait]
impl SubscriptionDao for InMemorySubscriptionDao {
    async fn read(&self, id: &IdType) -> SubscriptionResult<Value> {
        let id_part = subscription_id_part(id)?;
        self.resources
            .read(SUBSCRIPTION_TYPE, id_part)
            .map(|stored| stored.resource)
            .map_err(|e| not_found_as_unknown(id, e))
    }

    async fn create(&self, subscription: Value) -> SubscriptionResult<IdType> {
        validate(&self.resources, &subscription)?;
        let stored = self.resources.create(subscription)?;
        self.sync_row(&stored.resource);
        tracing::info!(subscription_id = %stored.id, "Created subscription");
        Ok(IdType::new(SUBSCRIPTION_TYPE, stored.id))
    }

    async fn update(&self, id: &IdType, subscription: Value) -> SubscriptionResult<IdType> {
        let id_part = subscription_id_part(id)?;
        validate(&self.resources, &subscription)?;
        let stored = self
            .resources
            .update(SUBSCRIPTION_TYPE, id_part, subscription)?;
        self.sync_row(&stored.resource);
        tracing::info!(
            subscription_id = %stored.id,
            version = stored.version,
            "Updated subscription"
        );
        Ok(IdType::new(SUBSCRIPTION_TYPE, stored.id))
    }

    async fn delete(&self, id: &IdType) -> SubscriptionResult<()> {
        let id_part = subscription_id_part(id)?;
        self.resources
            .delete(SUBSCRIPTION_TYPE, id_part)
            .map_err(|e| not_found_as_unknown(id, e))?;
        self.remove_row(id_part);
        tracing::info!(subscription_id = %id_part, "Deleted subscription");
        Ok(())
    }

    async fn subscription_table_pid(&self, id: &IdType) -> SubscriptionResult<i64> {
        let id_part = subscription_id_part(id)?;
        if let Some(pid) = self.pids.get(id_part) {
            return Ok(*pid);
        }
        // Created before this DAO saw it
        let subscription = self.read(id).await?;
        self.sync_row(&subscription)
            .ok_or_else(|| SubscriptionError::UnknownSubscription(id.to_string()))
    }

    async fn get_undelivered_resources_and_purge(
        &self,
        pid: i64,
    ) -> SubscriptionResult<Vec<Value>> {
        Ok(self
            .rows
            .get_mut(&pid)
            .map(|mut row| row.queue.drain(..).collect())
            .unwrap_or_default())
    }

    async fn resource_changed(&self, resource: &Value) -> SubscriptionResult<usize> {
        if resource_type_of(resource)? == SUBSCRIPTION_TYPE {
            self.sync_row(resource);
        }

        let candidates: Vec<(i64, String, String)> = self
            .rows
            .iter()
            .filter(|row| row.active)
            .map(|row| (*row.key(), row.id.clone(), row.criteria.clone()))
            .collect();

        let mut queued = 0;
        for (pid, subscription_id, criteria) in candidates {
            match self.resources.matches(&criteria, resource) {
                Ok(true) => {
                    if let Some(mut row) = self.rows.get_mut(&pid) {
                        if row.queue.len() >= self.queue_limit {
                            row.queue.pop_front();
                            tracing::warn!(
                                subscription_id = %subscription_id,
                                limit = self.queue_limit,
                                "Delivery queue full, dropped oldest resource"
                            );
                        }
                        row.queue.push_back(resource.clone());
                        queued += 1;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        subscription_id = %subscription_id,
                        criteria = %criteria,
                        error = %e,
                        "Failed to evaluate subscription criteria"
                    );
                }
            }
        }
        if queued > 0 {
            tracing::debug!(subscriptions = queued, "Queued changed resource");
        }
        Ok(queued)
    }
}
