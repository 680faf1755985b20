//! Channel transport seams.
//!
//! - **Outbound**: fire-and-forget posting of envelopes to the counterpart
//! - **framed**: length-delimited JSON over any AsyncRead/AsyncWrite pair
//!   (stdio pipes, unix sockets, in-memory duplex)

use futures::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::codec::{JsonCodec, framing};
use super::protocol::{Envelope, PeerId};
use crate::dispatcher::InboundMessage;
use crate::error::WireError;

/// Posts envelopes to the counterpart without waiting for delivery.
pub trait Outbound: Send + Sync + 'static {
    fn post(&self, envelope: Envelope) -> Result<(), WireError>;
}

impl Outbound for mpsc::UnboundedSender<Envelope> {
    fn post(&self, envelope: Envelope) -> Result<(), WireError> {
        self.send(envelope)
            .map_err(|_| WireError::Transport("outbound channel closed".to_string()))
    }
}

/// Outbound half of a framed transport. Frames are written by a background task.
#[derive(Clone)]
pub struct FramedOutbound {
    tx: mpsc::UnboundedSender<Envelope>,
    written: CancellationToken,
}

impl FramedOutbound {
    /// Resolves once the writer task has exited.
    ///
    /// The writer drains every queued frame and exits when the last
    /// `FramedOutbound` clone is dropped, or earlier on a write error.
    pub fn drained(&self) -> WaitForCancellationFutureOwned {
        self.written.clone().cancelled_owned()
    }
}

impl Outbound for FramedOutbound {
    fn post(&self, envelope: Envelope) -> Result<(), WireError> {
        self.tx.post(envelope)
    }
}

/// Split a byte stream pair into an outbound poster and an inbound message stream.
///
/// Every inbound frame is attributed to `peer`. Frames that are not valid JSON
/// are skipped; the stream ends on EOF or a framing error.
pub fn framed<R, W>(
    reader: R,
    writer: W,
    peer: PeerId,
) -> (
    FramedOutbound,
    impl Stream<Item = InboundMessage> + Send + 'static,
)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let written = CancellationToken::new();

    let writer_done = written.clone();
    tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, JsonCodec::<Envelope>::new());
        while let Some(envelope) = rx.recv().await {
            let kind = envelope.kind();
            if let Err(e) = sink.send(envelope).await {
                tracing::error!(kind, error = %e, "Failed to write frame");
                break;
            }
        }
        tracing::debug!("Frame writer exiting");
        writer_done.cancel();
    });

    let frames = FramedRead::new(reader, framing());
    let inbound = futures::stream::unfold(frames, move |mut frames| {
        let peer = peer.clone();
        async move {
            loop {
                match frames.next().await {
                    Some(Ok(bytes)) => match serde_json::from_slice(&bytes) {
                        Ok(data) => return Some((InboundMessage::new(peer, data), frames)),
                        Err(e) => {
                            tracing::warn!(error = %e, frame_bytes = bytes.len(), "Skipping non-JSON frame");
                        }
                    },
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "Inbound framing error");
                        return None;
                    }
                    None => {
                        tracing::debug!("Inbound channel closed");
                        return None;
                    }
                }
            }
        }
    });

    (FramedOutbound { tx, written }, inbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::protocol::{RpcResponse, WireId, WireResponse};
    use tokio_util::bytes::{Bytes, BytesMut};
    use tokio_util::codec::Encoder;

    #[tokio::test]
    async fn mpsc_outbound_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel::<Envelope>();
        drop(rx);
        let env = Envelope::Response(WireResponse {
            wire_id: WireId::from("w"),
            response: RpcResponse::ok(serde_json::json!(null)),
        });
        assert!(matches!(tx.post(env), Err(WireError::Transport(_))));
    }

    #[tokio::test]
    async fn framed_pair_carries_envelopes() {
        let (a, b) = tokio::io::duplex(4096);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);

        let (a_out, _a_in) = framed(a_read, a_write, PeerId::new("b"));
        let (_b_out, b_in) = framed(b_read, b_write, PeerId::new("a"));
        let mut b_in = Box::pin(b_in);

        let env = Envelope::Response(WireResponse {
            wire_id: WireId::from("w1"),
            response: RpcResponse::ok(serde_json::json!("hi")),
        });
        a_out.post(env.clone()).unwrap();

        let msg = b_in.next().await.unwrap();
        assert_eq!(msg.source, PeerId::new("a"));
        assert_eq!(msg.data, serde_json::to_value(&env).unwrap());
    }

    #[tokio::test]
    async fn drained_waits_for_queued_frames() {
        let (a, b) = tokio::io::duplex(64);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);

        let (a_out, _a_in) = framed(a_read, a_write, PeerId::new("b"));
        let (_b_out, b_in) = framed(b_read, b_write, PeerId::new("a"));
        let mut b_in = Box::pin(b_in);

        for n in 0..20 {
            a_out
                .post(Envelope::Response(WireResponse {
                    wire_id: WireId::from(format!("w{n}")),
                    response: RpcResponse::ok(serde_json::json!(n)),
                }))
                .unwrap();
        }
        let drained = a_out.drained();
        drop(a_out);

        // The duplex buffer is smaller than the queue, so the writer can only
        // finish while the other side keeps reading.
        let reader = tokio::spawn(async move {
            let mut seen = 0;
            while seen < 20 {
                b_in.next().await.unwrap();
                seen += 1;
            }
            seen
        });
        drained.await;
        assert_eq!(reader.await.unwrap(), 20);
    }

    #[tokio::test]
    async fn non_json_frames_are_skipped() {
        let (mut raw, b) = tokio::io::duplex(4096);
        let (b_read, b_write) = tokio::io::split(b);
        let (_out, inbound) = framed(b_read, b_write, PeerId::new("raw"));
        let mut inbound = Box::pin(inbound);

        let mut buf = BytesMut::new();
        framing().encode(Bytes::from_static(b"\x00garbage"), &mut buf).unwrap();
        framing()
            .encode(Bytes::from_static(br#"{"type":"rpc.res"}"#), &mut buf)
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut raw, &buf).await.unwrap();

        let msg = inbound.next().await.unwrap();
        assert_eq!(msg.data["type"], "rpc.res");
    }
}
