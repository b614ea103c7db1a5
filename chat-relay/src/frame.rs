use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::FrameError;

/// Reads the next text frame, skipping control frames.
///
/// Returns `Ok(None)` once the peer closes the connection. WebSocket keeps
/// message boundaries, so one frame is exactly one logical message.
pub async fn read_frame<S>(stream: &mut S) -> Result<Option<String>, FrameError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
            Ok(Message::Binary(bytes)) => {
                let text = String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::InvalidUtf8)?;
                return Ok(Some(text));
            }
            Ok(Message::Close(_)) => return Ok(None),
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(tungstenite::Error::ConnectionClosed) => return Ok(None),
            Err(err) => return Err(FrameError::Transport(err)),
        }
    }
    Ok(None)
}

/// Sends `text` as a single text frame and flushes it.
pub async fn write_frame<K>(sink: &mut K, text: impl Into<String>) -> Result<(), tungstenite::Error>
where
    K: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::text(text.into())).await
}
