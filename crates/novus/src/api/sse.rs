use std::convert::Infallible;
use std::time::Duration;

use axum::response::sse::{Event, KeepAlive, Sse};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};

use crate::session::SessionEvent;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Streams `snapshot` followed by every live event of a session.
pub(super) fn event_stream(
    snapshot: Vec<SessionEvent>,
    events_rx: broadcast::Receiver<SessionEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let live = BroadcastStream::new(events_rx).filter_map(|result| match result {
        Ok(event) => Some(event),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            warn!("event subscriber lagged, {skipped} event(s) dropped");
            None
        }
    });
    let stream = tokio_stream::iter(snapshot)
        .chain(live)
        .map(|event| Ok(to_sse_event(&event)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    )
}

fn to_sse_event(event: &SessionEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|err| {
        error!("failed to encode session event: {err}");
        r#"{"type":"error"}"#.to_owned()
    });
    Event::default().event(event.name()).data(data)
}
