use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

use crate::ingest::batch::BatchEvent;
use crate::ranking::RankingEvent;

/// A progress event that can be sent as a named SSE message.
pub trait NamedEvent: Serialize + Send + 'static {
    fn event_name(&self) -> &'static str;
}

impl NamedEvent for BatchEvent {
    fn event_name(&self) -> &'static str {
        self.name()
    }
}

impl NamedEvent for RankingEvent {
    fn event_name(&self) -> &'static str {
        self.name()
    }
}

/// Streams every event from `rx` until the producer drops its sender.
pub fn event_stream<E: NamedEvent>(
    rx: mpsc::Receiver<E>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).filter_map(|event| {
        match serde_json::to_string(&event) {
            Ok(json) => Some(Ok(Event::default().event(event.event_name()).data(json))),
            Err(e) => {
                tracing::warn!("Dropping unserializable progress event: {e}");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
