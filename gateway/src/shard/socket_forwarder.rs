//! Pumps a WebSocket connection against unbounded channels so the processor
//! loop can `select!` on inbound frames, outbound sends, and timers without
//! holding the socket itself.

use futures_util::{
    future::{self, Either},
    SinkExt, StreamExt,
};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub(crate) type ShardStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Drives one `ShardStream`, relaying outbound messages from the processor
/// and inbound messages back to it until either side closes.
pub(crate) struct SocketForwarder {
    rx: UnboundedReceiver<Message>,
    stream: ShardStream,
    tx: UnboundedSender<Message>,
}

impl SocketForwarder {
    /// Wrap an open stream, returning the forwarder plus the channel
    /// endpoints the processor uses to talk to it: a receiver of inbound
    /// frames and a sender of outbound frames.
    pub fn new(
        stream: ShardStream,
    ) -> (Self, UnboundedReceiver<Message>, UnboundedSender<Message>) {
        let (to_processor, from_forwarder) = mpsc::unbounded_channel();
        let (to_forwarder, from_processor) = mpsc::unbounded_channel();

        (
            Self {
                rx: from_processor,
                stream,
                tx: to_processor,
            },
            from_forwarder,
            to_forwarder,
        )
    }

    /// Run until the processor drops its sender or the socket closes,
    /// whichever comes first.
    pub async fn run(mut self) {
        tracing::debug!("starting forwarder loop");

        loop {
            match future::select(self.rx.recv(), self.stream.next()).await {
                Either::Left((Some(message), _)) => {
                    if let Err(source) = self.stream.send(message).await {
                        tracing::warn!(%source, "sending failed, closing socket");
                        return;
                    }
                }
                Either::Left((None, _)) => {
                    tracing::debug!("processor dropped outbound sender, closing socket");
                    let _ = self.stream.close(None).await;
                    return;
                }
                Either::Right((Some(Ok(message)), _)) => {
                    if self.tx.send(message).is_err() {
                        tracing::debug!("processor dropped inbound receiver, stopping");
                        return;
                    }
                }
                Either::Right((Some(Err(source)), _)) => {
                    tracing::warn!(%source, "socket errored, stopping forwarder");
                    return;
                }
                Either::Right((None, _)) => {
                    tracing::debug!("socket ended, stopping forwarder");
                    return;
                }
            }
        }
    }
}
