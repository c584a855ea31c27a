use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use futures::{stream, Stream};
use http_body_util::Full;
use putter_components::{
    destinations::opentsdb::{OpenTsdbConfiguration, OpenTsdbOutput, Shipper},
    encoders::opentsdb::{OpenTsdbEncoder, OpenTsdbEncoderConfiguration, RawEvent},
};
use putter_io::net::client::http::ResetHttpClient;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};
use tower_http::decompression::RequestDecompressionLayer;

#[derive(Clone)]
struct IntakeState {
    requests: mpsc::UnboundedSender<Value>,
    remaining_failures: Arc<AtomicUsize>,
}

async fn handle_put(State(state): State<IntakeState>, body: Bytes) -> StatusCode {
    let Ok(points) = serde_json::from_slice::<Value>(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    let _ = state.requests.send(points);

    let fail = state
        .remaining_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if fail {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::NO_CONTENT
    }
}

/// Starts a fake OpenTSDB server that decompresses and records every put request.
async fn spawn_intake(failures: usize) -> (SocketAddr, mpsc::UnboundedReceiver<Value>) {
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let state = IntakeState {
        requests: requests_tx,
        remaining_failures: Arc::new(AtomicUsize::new(failures)),
    };

    let app = Router::new()
        .route("/api/put", post(handle_put))
        .route_layer(RequestDecompressionLayer::new())
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (addr, requests_rx)
}

fn output(addr: SocketAddr) -> OpenTsdbOutput<ResetHttpClient<Full<Bytes>>> {
    let encoder_config: OpenTsdbEncoderConfiguration = serde_json::from_value(json!({
        "decode": "json",
        "metric": "sys",
        "values": "cpu,mem",
        "tags": "host",
    }))
    .unwrap();
    let encoder = OpenTsdbEncoder::from_configuration(encoder_config).unwrap();

    let config = OpenTsdbConfiguration {
        url: addr.to_string(),
        tsdb_writing_size: 2,
        tsdb_writer_count: 1,
        tsdb_write_timeout_secs: 30,
        requeue_delay_ms: 10,
        ..Default::default()
    };
    let shipper = Shipper::from_config(config).unwrap();

    OpenTsdbOutput::new(encoder, shipper)
}

async fn next_request(requests: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    timeout(Duration::from_secs(10), requests.recv())
        .await
        .expect("timed out waiting for put request")
        .expect("intake stopped")
}

#[tokio::test]
async fn ships_json_events_to_put_endpoint() {
    let (addr, mut requests) = spawn_intake(0).await;

    let events = vec![RawEvent::new(r#"{"cpu": 0.5, "mem": 1024, "host": "a1"}"#)];
    output(addr).run(stream::iter(events)).await.unwrap();

    let points = next_request(&mut requests).await;
    let points = points.as_array().unwrap();
    assert_eq!(points.len(), 2);

    assert_eq!(points[0]["metric"], "sys.cpu");
    assert_eq!(points[0]["value"], 0.5);
    assert_eq!(points[1]["metric"], "sys.mem");
    assert_eq!(points[1]["value"], 1024);
    for point in points {
        assert_eq!(point["tags"], json!({"host": "a1"}));
        assert!(point["timestamp"].is_i64());
    }
    assert_eq!(points[0]["timestamp"], points[1]["timestamp"]);
}

#[tokio::test]
async fn resends_batch_after_server_error() {
    let (addr, mut requests) = spawn_intake(1).await;
    let output = output(addr);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let running = tokio::spawn(output.run(events_from(events_rx)));
    events_tx
        .send(RawEvent::new(r#"{"cpu": 1, "mem": 2, "host": "a1"}"#))
        .unwrap();

    let rejected = next_request(&mut requests).await;
    let accepted = next_request(&mut requests).await;
    assert_eq!(rejected, accepted);

    drop(events_tx);
    running.await.unwrap().unwrap();
}

// Keeps the event stream open until the sender is dropped, so the destination is still running while it retries.
fn events_from(mut rx: mpsc::UnboundedReceiver<RawEvent>) -> impl Stream<Item = RawEvent> {
    stream::poll_fn(move |cx| rx.poll_recv(cx))
}
