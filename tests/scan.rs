use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use ecowitt_statsd::client::{ClientError, EcowittClient};
use ecowitt_statsd::metrics::{Gauge, GaugeSink};
use ecowitt_statsd::normalize::Normalizer;
use ecowitt_statsd::scan::Scanner;
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const SINGLE_SENSOR: &str = r#"{"common_list":[{"id":"0x02","val":"21.5 C"}],"wh25":[],"ch_aisle":[],"rain":[]}"#;

const FULL_SCAN: &str = r#"{
    "common_list": [
        {"id": "0x02", "val": "18.2", "unit": "C"},
        {"id": "0x07", "val": "71%"},
        {"id": "0x0A", "val": "245"},
        {"id": "0x0B", "val": "4.1 m/s"},
        {"id": "0x15", "val": "312.40 W/m2"},
        {"id": "0x17", "val": "2"},
        {"id": "0x77", "val": "3.1 V"}
    ],
    "rain": [
        {"id": "0x0D", "val": "2.4 mm"},
        {"id": "0x10", "val": "bad mm"}
    ],
    "wh25": [
        {"intemp": "21.9", "unit": "C", "inhumi": "45%", "abs": "1001.6 hPa", "rel": "1013.0 hPa"}
    ],
    "ch_aisle": [
        {"channel": "1", "name": "", "battery": "0", "temp": "19.5", "unit": "C", "humidity": "52%"},
        {"channel": "2", "name": "Shed", "battery": "0", "temp": "--.-", "unit": "C", "humidity": "60%"}
    ]
}"#;

#[derive(Default)]
struct Recording {
    gauges: Mutex<Vec<Gauge>>,
}

impl Recording {
    fn gauges(&self) -> Vec<Gauge> {
        self.gauges.lock().unwrap().clone()
    }
}

impl GaugeSink for Recording {
    fn gauge(&self, name: &str, tags: &[String], value: f64) {
        self.gauges.lock().unwrap().push(Gauge::new(name, tags.to_vec(), value));
    }
}

struct FakeGateway {
    status: StatusCode,
    body: &'static str,
    delay: Duration,
    requests: mpsc::UnboundedSender<()>,
}

async fn live_data(State(gateway): State<Arc<FakeGateway>>) -> (StatusCode, &'static str) {
    let _ = gateway.requests.send(());
    tokio::time::sleep(gateway.delay).await;
    (gateway.status, gateway.body)
}

/// Start a fake gateway returning `body` with `status`, returning the port it is
/// listening on and a channel that receives a message for each request.
fn start_gateway(status: StatusCode, body: &'static str, delay: Duration) -> (u16, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let gateway = Arc::new(FakeGateway {
        status,
        body,
        delay,
        requests: tx,
    });

    let app = Router::new()
        .route("/get_livedata_info", get(live_data))
        .with_state(gateway);

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let port = server.local_addr().port();
    tokio::spawn(server);

    (port, rx)
}

fn scanner(port: u16, sink: Arc<Recording>, interval: Duration) -> Scanner<Arc<Recording>> {
    let client = EcowittClient::new(Client::new(), "127.0.0.1", port).unwrap();
    Scanner::new(client, Normalizer::new(sink), interval)
}

#[tokio::test]
async fn test_scan_once_single_sensor() {
    let (port, _requests) = start_gateway(StatusCode::OK, SINGLE_SENSOR, Duration::ZERO);
    let sink = Arc::new(Recording::default());
    let scanner = scanner(port, sink.clone(), Duration::from_secs(3600));

    assert_eq!(1, scanner.scan_once().await.unwrap());
    assert_eq!(
        vec![Gauge::new("ecowitt.outdoorTemperature", vec!["unit:C".to_owned()], 21.5)],
        sink.gauges()
    );
}

#[tokio::test]
async fn test_scan_once_full() {
    let (port, _requests) = start_gateway(StatusCode::OK, FULL_SCAN, Duration::ZERO);
    let sink = Arc::new(Recording::default());
    let scanner = scanner(port, sink.clone(), Duration::from_secs(3600));

    // 7 common, 4 indoor, 2 for the first channel, 1 rain
    assert_eq!(14, scanner.scan_once().await.unwrap());

    let names: Vec<String> = sink.gauges().into_iter().map(|g| g.name).collect();
    assert_eq!(
        vec![
            "ecowitt.outdoorTemperature",
            "ecowitt.outdoorHumidity",
            "ecowitt.windDirection",
            "ecowitt.windSpeed",
            "ecowitt.solarIrradiance",
            "ecowitt.uvIndex",
            "ecowitt.",
            "ecowitt.indoorTemperature",
            "ecowitt.indoorHumidity",
            "ecowitt.absolutePressure",
            "ecowitt.relativePressure",
            "ecowitt.channelTemperature",
            "ecowitt.channelHumidity",
            "ecowitt.rainEvent",
        ],
        names
    );

    let gauges = sink.gauges();
    assert_eq!(vec!["unit:W/m2".to_owned()], gauges[4].tags);
    assert_eq!(
        vec!["channel:1".to_owned(), "name:".to_owned(), "unit:C".to_owned()],
        gauges[11].tags
    );
}

#[tokio::test]
async fn test_scan_once_unexpected_status() {
    let (port, _requests) = start_gateway(StatusCode::INTERNAL_SERVER_ERROR, "{}", Duration::ZERO);
    let sink = Arc::new(Recording::default());
    let scanner = scanner(port, sink.clone(), Duration::from_secs(3600));

    let res = scanner.scan_once().await;
    assert!(matches!(res, Err(ClientError::Unexpected(s, _)) if s == StatusCode::INTERNAL_SERVER_ERROR));
    assert!(sink.gauges().is_empty());
}

#[tokio::test]
async fn test_scan_once_malformed_body() {
    let (port, _requests) = start_gateway(StatusCode::OK, r#"{"common_list": [{"id": "0x02""#, Duration::ZERO);
    let sink = Arc::new(Recording::default());
    let scanner = scanner(port, sink.clone(), Duration::from_secs(3600));

    let res = scanner.scan_once().await;
    assert!(matches!(res, Err(ClientError::Decode(_))));
    assert!(sink.gauges().is_empty());
}

#[tokio::test]
async fn test_loop_continues_after_failures() {
    let (port, mut requests) = start_gateway(StatusCode::NOT_FOUND, "", Duration::ZERO);
    let sink = Arc::new(Recording::default());
    let handle = scanner(port, sink.clone(), Duration::from_millis(20)).start();

    // Several failed rounds in a row don't stop the loop
    for _ in 0..3 {
        requests.recv().await.unwrap();
    }

    assert!(!handle.is_finished());
    handle.stop();
    handle.wait().await.unwrap();
    assert!(sink.gauges().is_empty());
}

#[tokio::test]
async fn test_stop_waits_for_scan_in_progress() {
    let (port, mut requests) = start_gateway(StatusCode::OK, SINGLE_SENSOR, Duration::from_millis(300));
    let sink = Arc::new(Recording::default());
    let handle = scanner(port, sink.clone(), Duration::from_secs(3600)).start();

    // The first tick fires immediately, wait until the gateway has the request
    requests.recv().await.unwrap();
    handle.stop();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished());
    assert!(sink.gauges().is_empty());

    handle.wait().await.unwrap();
    assert_eq!(1, sink.gauges().len());
    assert!(requests.try_recv().is_err());
}
