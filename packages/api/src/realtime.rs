//! Real-time event streaming via Server-Sent Events.
//!
//! Subscribe with [`QueueManager::subscribe`](actors::QueueManager::subscribe)
//! and feed the receiver to [`next_sse_frame`] from whatever route serves the
//! stream.

use queue_core::JobEvent;
use tokio::sync::broadcast;

/// Comment frame that keeps idle connections open.
pub const SSE_KEEPALIVE: &str = ": keepalive\n\n";

/// Format an event as one SSE frame. The event name is the JSON `event` tag.
pub fn format_sse_event(event: &JobEvent) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(event)?;
    let name = value
        .get("event")
        .and_then(|name| name.as_str())
        .unwrap_or("message")
        .to_string();
    let json = serde_json::to_string(&value)?;
    Ok(format!(
        "id: {}\nevent: {}\ndata: {}\n\n",
        event.timestamp().timestamp_millis(),
        name,
        json
    ))
}

/// Wait for the next frame. `None` once the manager is gone.
///
/// A slow reader that falls behind gets a comment frame saying how many
/// events it missed instead of an error.
pub async fn next_sse_frame(events: &mut broadcast::Receiver<JobEvent>) -> Option<String> {
    loop {
        match events.recv().await {
            Ok(event) => match format_sse_event(&event) {
                Ok(frame) => return Some(frame),
                Err(e) => tracing::warn!("Dropping unserializable event: {}", e),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                return Some(format!(": lagged {missed} events\n\n"));
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use queue_core::JobId;

    use super::*;

    #[test]
    fn frames_carry_the_event_name() {
        let job_id = JobId::new();
        let frame = format_sse_event(&JobEvent::JobCancelled {
            job_id,
            timestamp: Utc::now(),
        })
        .unwrap();

        assert!(frame.contains("event: job_cancelled\n"));
        assert!(frame.contains(&job_id.to_string()));
        assert!(frame.ends_with("\n\n"));
    }

    #[tokio::test]
    async fn lagging_readers_get_a_comment() {
        let (tx, mut rx) = broadcast::channel(1);
        for count in 0..3 {
            tx.send(JobEvent::JobsCleaned {
                count,
                timestamp: Utc::now(),
            })
            .unwrap();
        }

        assert_eq!(next_sse_frame(&mut rx).await.unwrap(), ": lagged 2 events\n\n");
        let frame = next_sse_frame(&mut rx).await.unwrap();
        assert!(frame.contains("\"count\":2"));

        drop(tx);
        assert_eq!(next_sse_frame(&mut rx).await, None);
    }
}
