//! WebSocket adapter for subscription sessions.
//!
//! Each connection gets a [`SubscriptionSession`] writing through a
//! [`ChannelTransport`]. A writer task drains the channel into the socket
//! sink while the connection task feeds inbound text to the session, and a
//! poller delivers queued resources until the client goes away.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::SubscriptionConfig;
use crate::dao::SubscriptionDao;
use crate::error::TransportWriteError;
use crate::poller::spawn_poller;
use crate::protocol::CloseStatus;
use crate::session::{SubscriptionSession, Transport};

/// Frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(CloseStatus),
}

/// [`Transport`] that hands frames to the connection's writer task.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Outbound>,
}

impl ChannelTransport {
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        Self { sender }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send_text(&self, text: String) -> Result<(), TransportWriteError> {
        self.sender
            .send(Outbound::Text(text))
            .await
            .map_err(|_| TransportWriteError::closed())
    }

    async fn close(&self, status: CloseStatus) -> Result<(), TransportWriteError> {
        self.sender
            .send(Outbound::Close(status))
            .await
            .map_err(|_| TransportWriteError::closed())
    }
}

fn to_message(frame: Outbound) -> Message {
    match frame {
        Outbound::Text(text) => Message::Text(text.into()),
        Outbound::Close(status) => Message::Close(Some(CloseFrame {
            code: status.code,
            reason: status.reason.into(),
        })),
    }
}

/// Serve one upgraded subscription socket until either side closes it.
pub async fn handle_subscription_socket(
    socket: WebSocket,
    dao: Arc<dyn SubscriptionDao>,
    config: SubscriptionConfig,
) {
    tracing::info!("Incoming subscription WebSocket connection");

    let (transport, mut outbound) = ChannelTransport::channel(config.outbound_buffer);
    let session = Arc::new(SubscriptionSession::new(dao, Arc::new(transport)));
    let poller = spawn_poller(&Handle::current(), session.clone(), config.poll_interval());

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let closing = matches!(frame, Outbound::Close(_));
            if let Err(e) = sink.send(to_message(frame)).await {
                tracing::warn!(error = %e, "Failed to write WebSocket frame");
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                tracing::debug!(payload = %text.as_str(), "Subscription socket message");
                if let Err(e) = session.handle_text_message(text.as_str()).await {
                    tracing::error!(error = %e, "Failed to handle subscription message");
                }
            }
            Ok(Message::Close(_)) => {
                tracing::debug!("Client closed subscription socket");
                break;
            }
            Ok(Message::Binary(_) | Message::Ping(_) | Message::Pong(_)) => {}
            Err(e) => {
                tracing::debug!(error = %e, "Subscription socket error");
                break;
            }
        }
        if writer.is_finished() {
            break;
        }
    }

    poller.cancel();
    session.close().await;
    writer.abort();

    tracing::info!("Closing subscription WebSocket connection");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_queues_frames() {
        let (transport, mut rx) = ChannelTransport::channel(4);
        transport.send_text("bound 1".into()).await.unwrap();
        transport
            .close(CloseStatus::invalid_bind("No ID included"))
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(Outbound::Text("bound 1".into())));
        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close(CloseStatus::invalid_bind("No ID included")))
        );
    }

    #[tokio::test]
    async fn test_channel_transport_reports_closed_receiver() {
        let (transport, rx) = ChannelTransport::channel(1);
        drop(rx);
        assert_eq!(
            transport.send_text("ping 1".into()).await,
            Err(TransportWriteError::closed())
        );
    }

    #[test]
    fn test_close_frame() {
        let Message::Close(Some(frame)) =
            to_message(Outbound::Close(CloseStatus::protocol_error("bye")))
        else {
            panic!("expected close frame");
        };
        assert_eq!(frame.code, 1002);
        assert_eq!(frame.reason.as_str(), "bye");
    }
}
