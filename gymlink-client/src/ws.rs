use std::time::Duration;

use async_trait::async_trait;
use futures::{channel::mpsc, channel::oneshot, stream::BoxStream, FutureExt, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::{
    api::{Channel, FeedEvent, FeedMessage, FeedRequest, FeedSource, TransportError},
    ClientConfig,
};

// Pings will be sent every PING_INTERVAL
const PING_INTERVAL: Duration = Duration::from_secs(10);
// If no pong came back for DISCONNECT_INTERVAL, the connection is considered lost
const DISCONNECT_INTERVAL: Duration = Duration::from_secs(20);

/// Websocket feed, one connection per opened channel
///
/// The returned stream ends when the connection is lost; reconnecting is up
/// to the caller.
pub struct WsFeedSource {
    config: ClientConfig,
}

impl WsFeedSource {
    pub fn new(config: ClientConfig) -> WsFeedSource {
        WsFeedSource { config }
    }
}

fn network(e: impl std::fmt::Display) -> TransportError {
    TransportError::Network(e.to_string())
}

#[async_trait]
impl FeedSource for WsFeedSource {
    async fn open(
        &self,
        channel: &Channel,
    ) -> Result<BoxStream<'static, FeedEvent>, TransportError> {
        let url = self.config.feed_url();
        let (mut sock, _) = tokio::time::timeout(
            self.config.request_timeout(),
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
        .map_err(network)?;

        let topic = channel.topic();
        let subscribe = serde_json::to_string(&FeedRequest::Subscribe(topic.clone())).map_err(network)?;
        sock.send(Message::Text(subscribe)).await.map_err(network)?;
        tracing::info!(%url, %topic, "connected to event feed");

        let (events, rx) = mpsc::unbounded();
        let (cancel, cancelled) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let mut ping = tokio::time::interval(PING_INTERVAL);
            let mut last_pong = tokio::time::Instant::now();
            let mut cancelled = cancelled.fuse();
            loop {
                let pong_deadline = tokio::time::sleep_until(last_pong + DISCONNECT_INTERVAL);
                tokio::select! {
                    _ = &mut cancelled => {
                        let _ = sock.close(None).await;
                        tracing::info!(%topic, "disconnected from event feed");
                        return;
                    }
                    _ = pong_deadline => {
                        tracing::warn!(%topic, "event feed stopped answering pings");
                        return;
                    }
                    _ = ping.tick() => {
                        if let Err(err) = sock.send(Message::Text(String::from("ping"))).await {
                            tracing::warn!(%topic, ?err, "failed sending ping");
                            return;
                        }
                    }
                    msg = sock.next() => {
                        let msg: FeedMessage = match msg {
                            None => {
                                tracing::warn!(%topic, "lost event feed connection");
                                return;
                            }
                            Some(Err(err)) => {
                                tracing::warn!(%topic, ?err, "event feed connection failed");
                                return;
                            }
                            Some(Ok(Message::Text(t))) => match serde_json::from_str(&t) {
                                Ok(m) => m,
                                Err(err) => {
                                    tracing::warn!(%topic, ?err, "ignoring unparseable feed message");
                                    continue;
                                }
                            },
                            Some(Ok(Message::Binary(b))) => match serde_json::from_slice(&b) {
                                Ok(m) => m,
                                Err(err) => {
                                    tracing::warn!(%topic, ?err, "ignoring unparseable feed message");
                                    continue;
                                }
                            },
                            Some(Ok(_)) => continue,
                        };
                        match msg {
                            FeedMessage::Pong => last_pong = tokio::time::Instant::now(),
                            FeedMessage::Event { topic: t, event } if t == topic => {
                                if events.unbounded_send(event).is_err() {
                                    let _ = sock.close(None).await;
                                    return;
                                }
                            }
                            FeedMessage::Event { topic: t, .. } => {
                                tracing::debug!(expected = %topic, got = %t, "ignoring event for another topic")
                            }
                        }
                    }
                }
            }
        });

        // The stream owns `cancel`, so dropping it shuts the connection down
        Ok(futures::stream::unfold((rx, cancel), |(mut rx, cancel)| async move {
            rx.next().await.map(|e| (e, (rx, cancel)))
        })
        .boxed())
    }
}
