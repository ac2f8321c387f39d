use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::error::{PulseError, Result};

pub type FrameSink = Pin<Box<dyn Sink<String, Error = PulseError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// One established duplex session carrying JSON text frames.
pub struct Duplex {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Duplex>;
}

#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Duplex> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| PulseError::Connection(e.to_string()))?;

        let (sink, stream) = socket.split();

        let sink = sink
            .with(|frame: String| future::ready(Ok::<_, tungstenite::Error>(Message::Text(frame))))
            .sink_map_err(|e| PulseError::Connection(e.to_string()));

        let stream = stream.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(_) => {
                        log::warn!("dropping non-UTF-8 binary frame");
                        None
                    }
                },
                Ok(_) => None,
                Err(e) => Some(Err(PulseError::Connection(e.to_string()))),
            })
        });

        Ok(Duplex {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
