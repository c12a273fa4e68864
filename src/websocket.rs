use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::mpsc::Receiver as GatewaySinkReceiver;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::gateway::GatewayCommand;
use crate::gateway_structs::RawPayload;

/// Type Alias which shortens the websocket connected to the Discord Gateway.
pub type GatewaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Type Alias which shortens the Split Stream from the Discord Gateway websocket.
pub type ReadSplitStream = SplitStream<GatewaySocket>;

/// Type Alias which shortens the Split Sink from the Discord Gateway websocket.
pub type WriteSplitSink = SplitSink<GatewaySocket, Message>;

/// Opens a websocket to `url` and splits it so reading & writing can happen on different tasks.
pub async fn connect(url: &str) -> crate::error::Result<(WriteSplitSink, ReadSplitStream)> {
    let (websocket_stream, _response) = tokio_tungstenite::connect_async(url).await?;
    Ok(websocket_stream.split())
}

#[derive(Debug)]
/// One frame read from the gateway.
pub enum GatewayFrame {

    /// A JSON payload.
    Payload(RawPayload),

    /// The gateway closed the connection, `code` is `None` when the socket ended without a close frame.
    Closed { code: Option<u16>, reason: String },
}

#[async_trait]
/// Trait which adds deserialization read methods to payloads recieved from the Discord Gateway
pub trait DeserializeRecievePayload {

    /// Reads the next payload and attempts to deserialize it to type T,
    /// fails if the next payload is unable to be deserialized to type T or Gateway was closed
    async fn read_deserialize_next_payload<T: DeserializeOwned + Send + 'static>(&mut self) -> Result<T>;

    /// Reads frames until a payload or a close arrives, pings & pongs are answered by tungstenite.
    async fn read_next_frame(&mut self) -> Result<GatewayFrame>;
}

#[async_trait]
impl DeserializeRecievePayload for ReadSplitStream {

    async fn read_deserialize_next_payload<T: DeserializeOwned + Send + 'static>(&mut self) -> Result<T> {

        // Recieve the next payload from the gateway
        let next_payload = self.next()
            .await
            .context("Gateway was closed when attempting to read next item")?
            .context("Failed in checking to see if Gateway was connected")?;

        // Convert the recieved payload message into text for deserialization
        let string_payload = next_payload
            .into_text()
            .context("Gateway sent a payload which is not text")?;

        serde_json::from_str::<T>(&string_payload)
            .with_context(|| format!("Failed to deserialize payload into type {:?}", std::any::type_name::<T>()))
    }

    async fn read_next_frame(&mut self) -> Result<GatewayFrame> {
        loop {
            let message = match self.next().await {
                Some(message) => message.context("Failed to read from the Discord Gateway")?,
                None => return Ok(GatewayFrame::Closed { code: None, reason: String::new() }),
            };

            match message {
                Message::Text(text) => {
                    let payload = serde_json::from_str(&text).context("Failed to deserialize gateway payload")?;
                    return Ok(GatewayFrame::Payload(payload));
                }
                Message::Binary(bytes) => {
                    let payload = serde_json::from_slice(&bytes).context("Failed to deserialize gateway payload")?;
                    return Ok(GatewayFrame::Payload(payload));
                }
                Message::Close(frame) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.into_owned()),
                        None => (None, String::new()),
                    };
                    return Ok(GatewayFrame::Closed { code, reason });
                }
                _ => continue,
            }
        }
    }
}

/// Process a [`GatewayCommand`] send through the channel into a Message & send the message to Discords gateway.
/// Commands are written in the order they were sent, the task ends once every sender is gone or the socket failed.
pub async fn process_gateway_send_commands(mut sink_channel_reciever: GatewaySinkReceiver<GatewayCommand>, mut sink: WriteSplitSink) {

    // Recieve new inbound gateway commands from the reciever
    while let Some(command) = sink_channel_reciever.recv().await {

        // A close ends the connection, nothing may be written after it
        if let GatewayCommand::Close(code) = command {
            debug!(code, "Closing gateway connection");
            let frame = CloseFrame {
                code: CloseCode::from(code),
                reason: "".into(),
            };
            if let Err(error) = sink.send(Message::Close(Some(frame))).await {
                debug!(%error, "Failed to send close frame");
            }
            return;
        }

        // Serialize the recieved payload into a message so we can send it through the sink
        let message = match command.into_message() {
            Ok(message) => message,
            Err(error) => {
                warn!(%error, "Failed to serialize gateway command");
                continue;
            }
        };

        // Send the message through the sink.
        if let Err(error) = sink.send(message).await {
            warn!(%error, "Failed to send payload to the Discord Gateway");
            return;
        }
    }

    let _ = sink.close().await;
}
