//! Newline-delimited JSON event source.
//!
//! Each line is one event object of the form `{"payload": "...", "fields": {...}}`, where both keys are optional.

use futures::{stream, Stream};
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _, Lines};
use tracing::{error, warn};

use crate::encoders::opentsdb::RawEvent;

struct LineState<R> {
    lines: Lines<R>,
    line_number: usize,
}

/// Reads events from `reader`, one JSON object per line.
///
/// Blank lines are ignored and malformed lines are logged and skipped. The stream ends at end of input, or at the first
/// read error.
pub fn ndjson_events<R>(reader: R) -> impl Stream<Item = RawEvent>
where
    R: AsyncBufRead + Unpin,
{
    let state = LineState {
        lines: reader.lines(),
        line_number: 0,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let line = match state.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return None,
                Err(e) => {
                    error!(error = %e, "Failed to read events from input. Stopping.");
                    return None;
                }
            };
            state.line_number += 1;

            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<RawEvent>(&line) {
                Ok(event) => return Some((event, state)),
                Err(e) => warn!(line = state.line_number, error = %e, "Skipping malformed event."),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use futures::StreamExt as _;

    use super::*;
    use crate::encoders::opentsdb::Event as _;

    async fn collect(input: &str) -> Vec<RawEvent> {
        ndjson_events(input.as_bytes()).collect().await
    }

    #[tokio::test]
    async fn reads_one_event_per_line() {
        let events = collect(
            r#"{"payload": "42", "fields": {"host": "a1"}}
{"payload": "{\"cpu\": 1}"}
"#,
        )
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].payload(), b"42");
        assert_eq!(events[0].field_value("host"), Some(serde_json::json!("a1")));
        assert_eq!(events[1].payload(), br#"{"cpu": 1}"#);
        assert_eq!(events[1].field_value("host"), None);
    }

    #[tokio::test]
    async fn skips_blank_and_malformed_lines() {
        let events = collect("\n  \nnot json\n{\"payload\": 7}\n{\"payload\": \"ok\"}").await;

        assert_eq!(events, vec![RawEvent::new("ok")]);
    }

    #[tokio::test]
    async fn empty_input_yields_nothing() {
        assert!(collect("").await.is_empty());
    }
}
