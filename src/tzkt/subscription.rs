//! Head subscription over the TzKT websocket channel.
//!
//! A dedicated reader task drains the socket into a bounded queue so network
//! reads stay decoupled from fetch and pipeline work; a full queue blocks the
//! reader. The processing loop owns `init_head`, the boundary between levels
//! covered by backfill and levels this subscription fetches itself.

use crate::tzkt::client::TzktClient;
use crate::tzkt::events::{
    EventMessage, Head, MessageKind, SubscribeRequest, MESSAGE_QUEUE_CAPACITY,
};
use crate::tzkt::{HeadInit, HeadSubscriber};
use crate::types::PipelineMessage;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

#[async_trait]
impl HeadSubscriber for TzktClient {
    async fn subscribe_to_head(
        &self,
        out: mpsc::Sender<PipelineMessage>,
        head_init: mpsc::Sender<HeadInit>,
        errs: mpsc::Sender<anyhow::Error>,
        shutdown: CancellationToken,
    ) {
        if let Err(err) = self.run_subscription(out, head_init, &shutdown).await {
            if errs.send(err).await.is_err() {
                tracing::debug!("subscription error receiver dropped");
            }
        }
    }
}

impl TzktClient {
    async fn run_subscription(
        &self,
        out: mpsc::Sender<PipelineMessage>,
        head_init: mpsc::Sender<HeadInit>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        tracing::debug!(url = self.ws_endpoint(), "subscribing to TzKT head channel");

        let (mut ws, _) = connect_async(self.ws_endpoint())
            .await
            .map_err(|err| anyhow!("couldn't connect to tzkt ws: {err}"))?;

        let frame = serde_json::to_string(&SubscribeRequest::head())
            .context("failed to serialize subscribe request")?;
        ws.send(Message::Text(frame))
            .await
            .map_err(|err| anyhow!("couldn't subscribe to tzkt head: {err}"))?;

        let (queue_tx, mut queue_rx) =
            mpsc::channel::<Result<EventMessage>>(MESSAGE_QUEUE_CAPACITY);

        // The reader closes the socket on cancellation; a full queue exerts
        // backpressure on the socket instead of dropping frames.
        let reader_token = shutdown.child_token();
        let reader = tokio::spawn(drain_socket(ws, queue_tx, reader_token.clone()));

        let result = self
            .process_messages(&mut queue_rx, &out, &head_init, shutdown)
            .await;

        // Dropping the receiver unblocks a reader stuck on a full queue.
        reader_token.cancel();
        drop(queue_rx);
        if let Err(err) = reader.await {
            tracing::warn!(error = %err, "subscription reader task panicked");
        }

        result
    }

    async fn process_messages(
        &self,
        queue: &mut mpsc::Receiver<Result<EventMessage>>,
        out: &mpsc::Sender<PipelineMessage>,
        head_init: &mpsc::Sender<HeadInit>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let mut init_head: Option<u64> = None;

        loop {
            let msg = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("head subscription cancelled");
                    return Ok(());
                }
                msg = queue.recv() => msg,
            };

            let msg = match msg {
                // Reader exited without reporting: that only happens on
                // cancellation, which the next select iteration observes.
                None => continue,
                Some(Err(err)) => return Err(err),
                Some(Ok(msg)) => msg,
            };

            tracing::trace!(kind = ?msg.kind, state = msg.state, "processing subscription message");
            match msg.kind {
                MessageKind::State => {
                    // First message on the channel. Levels at or below this
                    // head belong to backfill; the stream covers the rest.
                    if init_head.is_none() {
                        init_head = Some(msg.state);
                        let (announcement, ack) = HeadInit::new(msg.state);
                        head_init
                            .send(announcement)
                            .await
                            .map_err(|_| anyhow!("head init receiver dropped"))?;
                        // Hold the stream until tip reconciliation finishes so
                        // backfill messages precede streamed ones.
                        tokio::select! {
                            _ = shutdown.cancelled() => return Ok(()),
                            _ = ack => {}
                        }
                    }
                }
                MessageKind::Data => {
                    let body = msg
                        .data
                        .ok_or_else(|| anyhow!("missing body for head message"))?;
                    let head: Head = serde_json::from_value(body)
                        .map_err(|err| anyhow!("unexpected body for head message: {err}"))?;

                    if head.level > init_head.unwrap_or(0) {
                        tracing::info!(level = head.level, "fetching delegations for new head");
                        self.delegations_at_level(head.level, out, shutdown)
                            .await
                            .map_err(|err| anyhow!("error fetching delegations: {err:#}"))?;
                    }
                }
                MessageKind::Reorg => {
                    tracing::debug!(level = msg.state, "reorg detected");
                    self.telemetry().record_reorg_message();
                    out.send(PipelineMessage::reorg(msg.state))
                        .await
                        .map_err(|_| anyhow!("pipeline channel closed"))?;
                }
            }
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Pulls frames off the socket and enqueues decoded messages. Decode failures
/// and transport errors terminate the subscription through the queue; an
/// unexpected end of stream is reported so the poller can reconnect.
async fn drain_socket(
    mut ws: WsStream,
    queue: mpsc::Sender<Result<EventMessage>>,
    shutdown: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => {
                if let Err(err) = ws.close(None).await {
                    tracing::debug!(error = %err, "websocket close failed");
                }
                return;
            }
            frame = ws.next() => frame,
        };

        let report = match frame {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<EventMessage>(&text) {
                    Ok(msg) => {
                        tracing::trace!(kind = ?msg.kind, "received subscription frame");
                        Ok(msg)
                    }
                    Err(err) => Err(anyhow!("undecodable subscription frame: {err}")),
                }
            }
            Some(Ok(Message::Close(_))) | None => Err(anyhow!("head subscription stream ended")),
            Some(Ok(_)) => continue,
            Some(Err(err)) => Err(anyhow!("websocket receive failed: {err}")),
        };

        let terminal = report.is_err();
        if queue.send(report).await.is_err() {
            return;
        }
        if terminal {
            return;
        }
    }
}
