//! Subscription session state machine.
//!
//! One session per socket connection. A session starts unbound, moves to
//! bound-static or bound-dynamic on a successful `bind`, and never goes back.
//! Inbound messages are handled one at a time by the connection task while
//! the poller calls [`SubscriptionSession::poll_once`] from another task, so
//! the current state lives behind an [`ArcSwap`] and is replaced wholesale.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use async_trait::async_trait;
use jpaserver_core::{Encoding, IdType};
use serde_json::{Value, json};

use crate::dao::{SUBSCRIPTION_TYPE, SubscriptionDao, WEBSOCKET_CHANNEL};
use crate::error::{SubscriptionError, SubscriptionResult, TransportWriteError};
use crate::protocol::{
    BindTarget, ClientMessage, CloseStatus, add_frame, bound_frame, encoding_for_criteria,
    ping_frame, unexpected_frame,
};

/// Outbound half of a client connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportWriteError>;

    async fn close(&self, status: CloseStatus) -> Result<(), TransportWriteError>;
}

/// The subscription a session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub subscription_id: IdType,
    pub pid: i64,
}

impl Binding {
    pub fn id_part(&self) -> &str {
        self.subscription_id.id_part().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Initial,
    /// Bound to an existing subscription; deliveries are bare pings.
    BoundStatic(Binding),
    /// Bound to a subscription created for this session; deliveries carry
    /// the encoded resources and the subscription is deleted on close.
    BoundDynamic { binding: Binding, encoding: Encoding },
}

impl SessionState {
    pub fn binding(&self) -> Option<&Binding> {
        match self {
            Self::Initial => None,
            Self::BoundStatic(binding) | Self::BoundDynamic { binding, .. } => Some(binding),
        }
    }
}

pub struct SubscriptionSession {
    dao: Arc<dyn SubscriptionDao>,
    transport: Arc<dyn Transport>,
    state: ArcSwap<SessionState>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SubscriptionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSession")
            .field("state", &self.state.load())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl SubscriptionSession {
    pub fn new(dao: Arc<dyn SubscriptionDao>, transport: Arc<dyn Transport>) -> Self {
        Self {
            dao,
            transport,
            state: ArcSwap::from_pointee(SessionState::Initial),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> Arc<SessionState> {
        self.state.load_full()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Handle one inbound text frame.
    pub async fn handle_text_message(&self, payload: &str) -> SubscriptionResult<()> {
        if self.is_closed() {
            tracing::debug!("Ignoring message on closed session");
            return Ok(());
        }
        let state = self.state.load_full();
        match state.as_ref() {
            SessionState::Initial => match ClientMessage::parse(payload) {
                ClientMessage::Bind(target) => self.bind(target).await,
                ClientMessage::Other(_) => {
                    tracing::debug!(payload, "Ignoring message on unbound session");
                    Ok(())
                }
            },
            SessionState::BoundStatic(_) | SessionState::BoundDynamic { .. } => {
                self.send(unexpected_frame(payload)).await;
                Ok(())
            }
        }
    }

    async fn bind(&self, target: BindTarget) -> SubscriptionResult<()> {
        let bound = match target {
            BindTarget::Static(id) => self.bind_static(id).await?,
            BindTarget::Dynamic(criteria) => self.bind_dynamic(criteria).await?,
        };
        if let Some(binding) = bound {
            tracing::info!(
                subscription_id = %binding.subscription_id,
                pid = binding.pid,
                "Session bound"
            );
            self.send(bound_frame(binding.id_part())).await;
        }
        Ok(())
    }

    async fn bind_static(&self, id: IdType) -> SubscriptionResult<Option<Binding>> {
        if !id.has_id_part() || !id.is_id_part_valid() {
            self.close_with(CloseStatus::invalid_bind("No ID included"))
                .await;
            return Ok(None);
        }
        let id = if id.has_resource_type() {
            id
        } else {
            id.with_resource_type(SUBSCRIPTION_TYPE)
        };

        let looked_up = match self.dao.read(&id).await {
            Ok(subscription) => self
                .dao
                .subscription_table_pid(&id)
                .await
                .map(|pid| (subscription, pid)),
            Err(e) => Err(e),
        };
        let (subscription, pid) = match looked_up {
            Ok(found) => found,
            Err(SubscriptionError::UnknownSubscription(_)) => {
                self.close_with(CloseStatus::invalid_bind(format!(
                    "Unknown subscription: {id}"
                )))
                .await;
                return Ok(None);
            }
            Err(e) => {
                tracing::error!(subscription_id = %id, error = %e, "Failed to look up subscription");
                self.close_with(CloseStatus::invalid_bind(e.to_string()))
                    .await;
                return Ok(None);
            }
        };
        let subscription_id = subscription
            .get("id")
            .and_then(Value::as_str)
            .map(|id_part| IdType::new(SUBSCRIPTION_TYPE, id_part))
            .unwrap_or(id);

        let binding = Binding {
            subscription_id,
            pid,
        };
        self.state
            .store(Arc::new(SessionState::BoundStatic(binding.clone())));
        Ok(Some(binding))
    }

    async fn bind_dynamic(&self, criteria: String) -> SubscriptionResult<Option<Binding>> {
        let encoding = encoding_for_criteria(&criteria);
        let subscription = json!({
            "resourceType": SUBSCRIPTION_TYPE,
            "status": "active",
            "criteria": criteria,
            "channel": {"type": WEBSOCKET_CHANNEL},
        });

        let created = match self.dao.create(subscription).await {
            Ok(id) => {
                let pid = self.dao.subscription_table_pid(&id).await;
                pid.map(|pid| (id, pid))
            }
            Err(e) => Err(e),
        };
        match created {
            Ok((subscription_id, pid)) => {
                let binding = Binding {
                    subscription_id,
                    pid,
                };
                self.state.store(Arc::new(SessionState::BoundDynamic {
                    binding: binding.clone(),
                    encoding,
                }));
                Ok(Some(binding))
            }
            Err(SubscriptionError::PersistenceValidation(message)) => {
                tracing::warn!(criteria = %criteria, error = %message, "Failed to bind subscription");
                self.close_with(CloseStatus::invalid_bind(message)).await;
                Ok(None)
            }
            Err(e) => {
                tracing::error!(criteria = %criteria, error = %e, "Failed to create subscription");
                self.close_with(CloseStatus::invalid_bind("No ID included"))
                    .await;
                Ok(None)
            }
        }
    }

    /// Push undelivered resources to the client according to the current
    /// state. Transport failures are logged and not returned.
    pub async fn deliver(&self, resources: Vec<Value>) -> SubscriptionResult<()> {
        let state = self.state.load_full();
        match state.as_ref() {
            SessionState::Initial => Err(SubscriptionError::invalid_state(
                "cannot deliver on a session with no bound subscription",
            )),
            SessionState::BoundStatic(binding) => {
                tracing::debug!(
                    subscription_id = %binding.subscription_id,
                    resources = resources.len(),
                    "Sending ping"
                );
                self.send(ping_frame(binding.id_part())).await;
                Ok(())
            }
            SessionState::BoundDynamic { binding, encoding } => {
                for resource in &resources {
                    let encoded = match encoding.encode(resource) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            tracing::error!(
                                subscription_id = %binding.subscription_id,
                                error = %e,
                                "Failed to encode resource"
                            );
                            continue;
                        }
                    };
                    tracing::debug!(
                        subscription_id = %binding.subscription_id,
                        resource_id = resource.get("id").and_then(serde_json::Value::as_str).unwrap_or_default(),
                        "Sending resource"
                    );
                    if !self.send(add_frame(binding.id_part(), &encoded)).await {
                        break;
                    }
                }
                Ok(())
            }
        }
    }

    /// One poll tick: drain the bound subscription's queue and deliver it.
    /// Returns the number of resources taken from the queue.
    pub async fn poll_once(&self) -> SubscriptionResult<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let state = self.state.load_full();
        let Some(binding) = state.binding() else {
            return Ok(0);
        };

        tracing::trace!(pid = binding.pid, "Polling subscription");
        let resources = self
            .dao
            .get_undelivered_resources_and_purge(binding.pid)
            .await?;
        let count = resources.len();
        if count > 0 {
            self.deliver(resources).await?;
        }
        Ok(count)
    }

    /// Run the close hook of the current state. Only the first call has any
    /// effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let state = self.state.load_full();
        match state.as_ref() {
            SessionState::BoundDynamic { binding, .. } => {
                tracing::info!(subscription_id = %binding.subscription_id, "Deleting subscription");
                if let Err(e) = self.dao.delete(&binding.subscription_id).await {
                    tracing::error!(
                        subscription_id = %binding.subscription_id,
                        error = %e,
                        "Failed to delete subscription"
                    );
                }
            }
            SessionState::BoundStatic(_) | SessionState::Initial => {}
        }
        tracing::debug!("Session closed");
    }

    /// Returns false when the frame could not be written.
    async fn send(&self, text: String) -> bool {
        match self.transport.send_text(text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send WebSocket message");
                false
            }
        }
    }

    async fn close_with(&self, status: CloseStatus) {
        tracing::info!(code = status.code, reason = %status.reason, "Closing session");
        if let Err(e) = self.transport.close(status).await {
            tracing::warn!(error = %e, "Failed to close WebSocket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct NullDao;

    #[async_trait]
    impl SubscriptionDao for NullDao {
        async fn read(&self, id: &IdType) -> SubscriptionResult<Value> {
            Err(SubscriptionError::UnknownSubscription(id.to_string()))
        }
        async fn create(&self, _subscription: Value) -> SubscriptionResult<IdType> {
            Err(SubscriptionError::validation("no"))
        }
        async fn update(&self, _id: &IdType, _subscription: Value) -> SubscriptionResult<IdType> {
            Err(SubscriptionError::validation("no"))
        }
        async fn delete(&self, _id: &IdType) -> SubscriptionResult<()> {
            Ok(())
        }
        async fn subscription_table_pid(&self, id: &IdType) -> SubscriptionResult<i64> {
            Err(SubscriptionError::UnknownSubscription(id.to_string()))
        }
        async fn get_undelivered_resources_and_purge(
            &self,
            _pid: i64,
        ) -> SubscriptionResult<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn resource_changed(&self, _resource: &Value) -> SubscriptionResult<usize> {
            Ok(0)
        }
    }

    /// Finds every subscription but cannot reach the subscription table.
    struct TableDownDao;

    #[async_trait]
    impl SubscriptionDao for TableDownDao {
        async fn read(&self, id: &IdType) -> SubscriptionResult<Value> {
            Ok(json!({"resourceType": "Subscription", "id": id.id_part()}))
        }
        async fn create(&self, _subscription: Value) -> SubscriptionResult<IdType> {
            Err(SubscriptionError::validation("no"))
        }
        async fn update(&self, _id: &IdType, _subscription: Value) -> SubscriptionResult<IdType> {
            Err(SubscriptionError::validation("no"))
        }
        async fn delete(&self, _id: &IdType) -> SubscriptionResult<()> {
            Ok(())
        }
        async fn subscription_table_pid(&self, _id: &IdType) -> SubscriptionResult<i64> {
            Err(SubscriptionError::invalid_state("subscription table unavailable"))
        }
        async fn get_undelivered_resources_and_purge(
            &self,
            _pid: i64,
        ) -> SubscriptionResult<Vec<Value>> {
            Ok(Vec::new())
        }
        async fn resource_changed(&self, _resource: &Value) -> SubscriptionResult<usize> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
        closed: Mutex<Vec<CloseStatus>>,
    }

    #[async_trait]
    impl Transport for Recorder {
        async fn send_text(&self, text: String) -> Result<(), TransportWriteError> {
            self.sent.lock().push(text);
            Ok(())
        }
        async fn close(&self, status: CloseStatus) -> Result<(), TransportWriteError> {
            self.closed.lock().push(status);
            Ok(())
        }
    }

    fn session() -> (SubscriptionSession, Arc<Recorder>) {
        let transport = Arc::new(Recorder::default());
        (
            SubscriptionSession::new(Arc::new(NullDao), transport.clone()),
            transport,
        )
    }

    #[test]
    fn test_deliver_requires_binding() {
        let (session, _) = session();
        let result = tokio_test::block_on(session.deliver(vec![json!({})]));
        assert!(matches!(result, Err(SubscriptionError::InvalidState(_))));
    }

    #[test]
    fn test_unbound_ignores_other_messages() {
        let (session, transport) = session();
        tokio_test::block_on(session.handle_text_message("hello")).unwrap();
        assert!(transport.sent.lock().is_empty());
        assert!(transport.closed.lock().is_empty());
        assert_eq!(*session.state(), SessionState::Initial);
        assert_eq!(tokio_test::block_on(session.poll_once()).unwrap(), 0);
    }

    #[test]
    fn test_bind_without_id_closes() {
        let (session, transport) = session();
        tokio_test::block_on(session.handle_text_message("bind ")).unwrap();
        assert_eq!(
            transport.closed.lock().as_slice(),
            &[CloseStatus::invalid_bind("No ID included")]
        );
        assert_eq!(*session.state(), SessionState::Initial);
    }

    #[test]
    fn test_bind_invalid_id_closes() {
        let (session, transport) = session();
        tokio_test::block_on(session.handle_text_message("bind Subscription/not valid!")).unwrap();
        assert_eq!(
            transport.closed.lock()[0].reason,
            "Invalid bind request - No ID included"
        );
    }

    #[test]
    fn test_validation_failure_closes_with_message() {
        let (session, transport) = session();
        tokio_test::block_on(session.handle_text_message("bind Patient?name=x")).unwrap();
        assert_eq!(
            transport.closed.lock()[0].reason,
            "Invalid bind request - no"
        );
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_static_bind_lookup_failure_closes() {
        let transport = Arc::new(Recorder::default());
        let session = SubscriptionSession::new(Arc::new(TableDownDao), transport.clone());
        tokio_test::block_on(session.handle_text_message("bind Subscription/s1")).unwrap();

        let closed = transport.closed.lock();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].code, 1002);
        assert!(
            closed[0].reason.starts_with("Invalid bind request - ")
                && closed[0].reason.contains("subscription table unavailable"),
            "{}",
            closed[0].reason
        );
        assert!(transport.sent.lock().is_empty());
        assert_eq!(*session.state(), SessionState::Initial);
    }

    #[test]
    fn test_close_is_idempotent() {
        let (session, _) = session();
        tokio_test::block_on(async {
            session.close().await;
            session.close().await;
        });
        assert!(session.is_closed());
    }
}
