// ABOUTME: SSE event streaming handler for live delivery of published user events.
// ABOUTME: Subscribes to the broadcast notifier and emits each event under its kind name with the flat record as data.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use userd_core::TopicEvent;

use crate::app_state::SharedState;

/// Convert a broadcast receiver into an SSE-compatible stream.
/// Lagged receivers skip the events they missed rather than closing.
fn event_stream_from_receiver(
    rx: tokio::sync::broadcast::Receiver<TopicEvent>,
) -> impl Stream<Item = Result<SseEvent, axum::Error>> {
    BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(published) => {
                let data = published.event.payload().ok()?;
                Some(Ok(SseEvent::default()
                    .event(published.event.kind.as_str())
                    .data(data)))
            }
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                tracing::warn!("event stream subscriber lagged, skipped {} events", missed);
                None
            }
        }
    })
}

/// GET /events/stream - SSE endpoint for real-time user events.
pub async fn event_stream(State(state): State<SharedState>) -> impl IntoResponse {
    let rx = state.events.subscribe();
    Sse::new(event_stream_from_receiver(rx)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use crate::app_state::{AppState, SharedState};
    use crate::routes::create_router;
    use axum::body::Body;
    use http::Request;
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;
    use userd_core::{NewUser, UserPatch};

    async fn open_stream(state: &SharedState) -> Body {
        let resp = create_router(Arc::clone(state))
            .oneshot(Request::get("/events/stream").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        assert!(
            resp.headers()["content-type"]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
        resp.into_body()
    }

    /// Read the next SSE message carrying both an event name and data,
    /// skipping keep-alive comments.
    async fn next_message(body: &mut Body, buf: &mut String) -> (String, serde_json::Value) {
        loop {
            if let Some(end) = buf.find("\n\n") {
                let message: String = buf.drain(..end + 2).collect();
                let mut event = None;
                let mut data = None;
                for line in message.lines() {
                    if let Some(name) = line.strip_prefix("event:") {
                        event = Some(name.trim_start().to_string());
                    } else if let Some(json) = line.strip_prefix("data:") {
                        data = Some(serde_json::from_str(json.trim_start()).unwrap());
                    }
                }
                if let (Some(event), Some(data)) = (event, data) {
                    return (event, data);
                }
                continue;
            }

            let frame = tokio::time::timeout(Duration::from_secs(2), body.frame())
                .await
                .expect("should receive an SSE frame within timeout")
                .expect("stream should stay open")
                .unwrap();
            if let Ok(bytes) = frame.into_data() {
                buf.push_str(std::str::from_utf8(&bytes).unwrap());
            }
        }
    }

    #[tokio::test]
    async fn sse_frames_use_kind_as_event_name_and_flat_record_as_data() {
        let state = Arc::new(AppState::in_memory().unwrap());
        let mut body = open_stream(&state).await;

        let created = state
            .pipeline
            .create(NewUser {
                name: "A".to_string(),
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap();

        let mut buf = String::new();
        let (event, data) = next_message(&mut body, &mut buf).await;

        assert_eq!(event, "created");
        let mut keys: Vec<&str> = data.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["active", "createdAt", "email", "id", "name"]);
        assert_eq!(data["id"], created.id.to_string());
        assert_eq!(data["name"], "A");
        assert_eq!(data["email"], "a@x.com");
        assert_eq!(data["active"], true);
        assert_eq!(data, serde_json::to_value(&created).unwrap());
    }

    #[tokio::test]
    async fn sse_frames_arrive_in_publish_order() {
        let state = Arc::new(AppState::in_memory().unwrap());
        let mut body = open_stream(&state).await;

        let id = state
            .pipeline
            .create(NewUser {
                name: "A".to_string(),
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap()
            .id;
        state
            .pipeline
            .update(
                id,
                UserPatch {
                    name: None,
                    email: Some("a2@x.com".to_string()),
                },
            )
            .await
            .unwrap();
        state.pipeline.deactivate(id).await.unwrap();
        state.pipeline.delete(id).await.unwrap();

        let mut buf = String::new();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(next_message(&mut body, &mut buf).await);
        }

        let names: Vec<&str> = seen.iter().map(|(event, _)| event.as_str()).collect();
        assert_eq!(names, vec!["created", "updated", "deactivated", "deleted"]);
        assert_eq!(seen[1].1["email"], "a2@x.com");
        assert_eq!(seen[2].1["active"], false);
        assert!(seen.iter().all(|(_, data)| data["id"] == id.to_string()));
    }
}
