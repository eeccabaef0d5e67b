//! `GET /eth/v1/events` served as server-sent events.

use crate::{error::ApiError, router::AppState};
use axum::{
    extract::{RawQuery, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt};
use relay_core::events::EventTopic;
use std::{convert::Infallible, time::Duration};
use tracing::{debug, info};
use uuid::Uuid;

/// Reconnection delay advertised to clients.
const CLIENT_RETRY: Duration = Duration::from_secs(10);

/// Parses the `topics` query parameter.
///
/// Accepts both `topics=head,block` and repeated `topics=head&topics=block`.
///
/// # Errors
///
/// Returns a 400 error if no topic is given or a topic is unknown.
pub fn parse_topics(query: Option<&str>) -> Result<Vec<EventTopic>, ApiError> {
    let mut topics = Vec::new();
    for (key, value) in url::form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
        if key != "topics" {
            continue;
        }
        let parsed =
            EventTopic::parse_list(&value).map_err(|e| ApiError::bad_request(e.to_string()))?;
        for topic in parsed {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
    }

    if topics.is_empty() {
        return Err(ApiError::bad_request("at least one topic is required"));
    }
    Ok(topics)
}

/// Streams the deduplicated event feed for the requested topics.
///
/// The subscription lives as long as the response body; when the client disconnects or the
/// server shuts down the stream is dropped and the subscriber removed.
///
/// # Errors
///
/// Returns a 400 error for a missing or unknown topic.
pub async fn handle_events(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let topics = parse_topics(query.as_deref())?;
    let stream = state.service.event_stream(&topics);
    info!(subscriber = %stream.handle().id(), topics = ?topics, "event stream opened");

    let mut shutdown = state.shutdown.subscribe();
    let events = stream
        .take_until(async move {
            let _ = shutdown.recv().await;
        })
        .map(|event| {
            debug!(topic = %event.topic, connection = event.connection, "forwarding event");
            Ok(Event::default()
                .id(Uuid::new_v4().to_string())
                .event(event.topic.as_str())
                .data(&*event.data)
                .retry(CLIENT_RETRY))
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
