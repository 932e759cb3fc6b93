// ecowitt_statsd - StatsD and Prometheus metrics bridge for Ecowitt weather gateways
//
// Copyright 2023 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::client::SENSOR_TYPES;
use cadence::{BufferedUdpMetricSink, Gauged, MetricError, MetricSink, QueuingMetricSink, StatsdClient};
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge as PromGauge;
use prometheus_client::registry::Registry;
use std::collections::HashMap;
use std::io;
use std::net::UdpSocket;
use std::panic::RefUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

pub const METRIC_PREFIX: &str = "ecowitt.";
pub const INDOOR_TEMPERATURE: &str = "ecowitt.indoorTemperature";
pub const INDOOR_HUMIDITY: &str = "ecowitt.indoorHumidity";
pub const ABSOLUTE_PRESSURE: &str = "ecowitt.absolutePressure";
pub const RELATIVE_PRESSURE: &str = "ecowitt.relativePressure";
pub const CHANNEL_TEMPERATURE: &str = "ecowitt.channelTemperature";
pub const CHANNEL_HUMIDITY: &str = "ecowitt.channelHumidity";

pub const TAG_UNIT: &str = "unit";
pub const TAG_CHANNEL: &str = "channel";
pub const TAG_NAME: &str = "name";

/// Format a tag in the `key:value` form used by DogStatsD.
pub fn format_tag(key: &str, value: &str) -> String {
    format!("{}:{}", key, value)
}

/// Every metric name that can be emitted for a known sensor, indoor climate
/// reading, or channel sensor.
pub fn known_metric_names() -> Vec<String> {
    SENSOR_TYPES
        .iter()
        .map(|t| format!("{}{}", METRIC_PREFIX, t))
        .chain(
            [
                INDOOR_TEMPERATURE,
                INDOOR_HUMIDITY,
                ABSOLUTE_PRESSURE,
                RELATIVE_PRESSURE,
                CHANNEL_TEMPERATURE,
                CHANNEL_HUMIDITY,
            ]
            .iter()
            .map(|s| s.to_string()),
        )
        .collect()
}

/// A single point-in-time value to be sent to a metrics backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Gauge {
    pub name: String,
    pub tags: Vec<String>,
    pub value: f64,
}

impl Gauge {
    pub fn new<S: Into<String>>(name: S, tags: Vec<String>, value: f64) -> Self {
        Gauge {
            name: name.into(),
            tags,
            value,
        }
    }
}

/// Destination for gauges produced from gateway readings.
///
/// Implementations are expected to return quickly and to handle (log) their own
/// errors. Nothing is propagated back to the caller.
pub trait GaugeSink: Send + Sync {
    fn gauge(&self, name: &str, tags: &[String], value: f64);
}

impl<S: GaugeSink + ?Sized> GaugeSink for Arc<S> {
    fn gauge(&self, name: &str, tags: &[String], value: f64) {
        (**self).gauge(name, tags, value)
    }
}

impl<S: GaugeSink + ?Sized> GaugeSink for Box<S> {
    fn gauge(&self, name: &str, tags: &[String], value: f64) {
        (**self).gauge(name, tags, value)
    }
}

/// Sink that discards everything, used when metrics are disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl GaugeSink for NoopSink {
    fn gauge(&self, _name: &str, _tags: &[String], _value: f64) {}
}

/// Sink that forwards each gauge to every one of its sinks, in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn GaugeSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn GaugeSink>>) -> Self {
        FanoutSink { sinks }
    }
}

impl GaugeSink for FanoutSink {
    fn gauge(&self, name: &str, tags: &[String], value: f64) {
        for sink in self.sinks.iter() {
            sink.gauge(name, tags, value);
        }
    }
}

/// Maximum number of gauges waiting to be sent before new ones are dropped.
const STATSD_QUEUE_CAPACITY: usize = 1024;

/// Wrap `sink` so metrics are sent from a background thread, calling `on_error` for
/// each metric that the wrapped sink fails to send.
fn queuing_sink<T, F>(sink: T, on_error: F) -> QueuingMetricSink
where
    T: MetricSink + Sync + Send + RefUnwindSafe + 'static,
    F: Fn(io::Error) + Sync + Send + RefUnwindSafe + 'static,
{
    QueuingMetricSink::builder()
        .with_capacity(STATSD_QUEUE_CAPACITY)
        .with_error_handler(on_error)
        .build(sink)
}

fn log_send_error(e: io::Error) {
    tracing::warn!(message = "unable to send gauge", error = %e);
}

/// Sink that sends gauges to a StatsD server using DogStatsD style tags.
///
/// Metrics are buffered and sent from a background thread so calls to `gauge`
/// never block on the network. Errors sending them are logged from that thread.
pub struct StatsdSink {
    client: StatsdClient,
    default_tags: Vec<String>,
}

impl StatsdSink {
    /// Create a new sink sending to `server` (`host` or `host:port`). Each of the
    /// `default_tags` is added to every gauge sent.
    pub fn new(server: &str, default_tags: Vec<String>) -> Result<Self, MetricError> {
        let address = if server.contains(':') {
            server.to_owned()
        } else {
            format!("{}:{}", server, cadence::DEFAULT_PORT)
        };

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let udp = BufferedUdpMetricSink::from(address.as_str(), socket)?;
        let queuing = queuing_sink(udp, log_send_error);

        Ok(Self::from_client(StatsdClient::from_sink("", queuing), default_tags))
    }

    pub fn from_client(client: StatsdClient, default_tags: Vec<String>) -> Self {
        StatsdSink { client, default_tags }
    }
}

impl GaugeSink for StatsdSink {
    fn gauge(&self, name: &str, tags: &[String], value: f64) {
        let mut builder = self.client.gauge_with_tags(name, value);
        for tag in self.default_tags.iter().chain(tags.iter()) {
            builder = match tag.split_once(':') {
                Some((k, v)) => builder.with_tag(k, v),
                None => builder.with_tag_value(tag),
            };
        }

        if let Err(e) = builder.try_send() {
            tracing::warn!(message = "unable to queue gauge", name = %name, error = %e);
        }
    }
}

type GaugeFamily = Family<Vec<(String, String)>, PromGauge<f64, AtomicU64>>;

/// Sink that records gauges in a Prometheus registry to be scraped via `http::router`.
///
/// A gauge family is registered for each known metric name up front. Gauges for any
/// other name (such as the bare `ecowitt.` name used for unmapped sensor IDs) are
/// dropped since they cannot be registered after the registry is shared.
#[derive(Debug)]
pub struct PrometheusSink {
    families: HashMap<String, GaugeFamily>,
    default_labels: Vec<(String, String)>,
}

impl PrometheusSink {
    /// Create a new sink and register each metric with the provided `Registry`.
    ///
    /// Metric names are converted to Prometheus style, `ecowitt.outdoorTemperature`
    /// is registered as `outdoor_temperature` (plus any prefix set on the registry).
    pub fn new(reg: &mut Registry, default_tags: &[String]) -> Self {
        let mut families = HashMap::new();
        for name in known_metric_names() {
            let family = GaugeFamily::default();
            let short = name.trim_start_matches(METRIC_PREFIX);
            reg.register(
                prometheus_name(short),
                format!("Ecowitt gateway reading {}", short),
                family.clone(),
            );
            families.insert(name, family);
        }

        PrometheusSink {
            families,
            default_labels: default_tags.iter().map(|t| tag_to_label(t)).collect(),
        }
    }
}

impl GaugeSink for PrometheusSink {
    fn gauge(&self, name: &str, tags: &[String], value: f64) {
        match self.families.get(name) {
            Some(family) => {
                let labels: Vec<(String, String)> = self
                    .default_labels
                    .iter()
                    .cloned()
                    .chain(tags.iter().map(|t| tag_to_label(t)))
                    .collect();
                family.get_or_create(&labels).set(value);
            }
            None => {
                tracing::debug!(message = "no prometheus gauge registered", name = %name);
            }
        }
    }
}

/// Convert a camel case name like `outdoorTemperature` to `outdoor_temperature`.
fn prometheus_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }

    out
}

fn tag_to_label(tag: &str) -> (String, String) {
    let (key, value) = tag.split_once(':').unwrap_or((tag, ""));
    let key = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    (key, value.to_owned())
}
