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

use crate::client::{ChannelSensorValue, IndoorClimate, Reading, ScanResponse, SensorValue};
use crate::metrics::{
    format_tag, Gauge, GaugeSink, ABSOLUTE_PRESSURE, CHANNEL_HUMIDITY, CHANNEL_TEMPERATURE, INDOOR_HUMIDITY,
    INDOOR_TEMPERATURE, METRIC_PREFIX, RELATIVE_PRESSURE, TAG_CHANNEL, TAG_NAME, TAG_UNIT,
};
use std::error;
use std::fmt;
use std::num::ParseFloatError;

/// A single field of a reading could not be parsed as a number.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldParseError {
    raw: String,
    source: ParseFloatError,
}

impl FieldParseError {
    fn new(raw: &str, source: ParseFloatError) -> Self {
        FieldParseError {
            raw: raw.to_owned(),
            source,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unable to parse '{}' as a number: {}", self.raw, self.source)
    }
}

impl error::Error for FieldParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Parse a value that may have a percent sign or a unit after a space, e.g.
/// `"26.1 C"`, `"55%"`, or `"1013.2 hPa"`.
///
/// The unit is only returned when the value splits into exactly two parts.
pub fn parse_value(raw: &str) -> Result<(f64, Option<String>), FieldParseError> {
    let stripped = raw.replace('%', "");
    let parts: Vec<&str> = stripped.split_whitespace().collect();
    let unit = if parts.len() == 2 {
        Some(parts[1].to_owned())
    } else {
        None
    };

    let number = parts.first().copied().unwrap_or("");
    let value = parse_number(number)?;
    Ok((value, unit))
}

fn parse_number(raw: &str) -> Result<f64, FieldParseError> {
    raw.parse::<f64>().map_err(|e| FieldParseError::new(raw, e))
}

fn parse_percent(raw: &str) -> Result<f64, FieldParseError> {
    parse_number(&raw.replace('%', ""))
}

/// `unit:<unit>` as the only tag, or no tags if the unit is empty.
fn unit_tags(unit: &str) -> Vec<String> {
    let mut tags = Vec::with_capacity(1);
    push_unit(&mut tags, unit);
    tags
}

fn push_unit(tags: &mut Vec<String>, unit: &str) {
    if !unit.is_empty() {
        tags.push(format_tag(TAG_UNIT, unit));
    }
}

/// Convert a single reading into the gauges that should be emitted for it.
///
/// Fields that cannot be parsed are logged and result in fewer (or no) gauges. How
/// many depends on the type of reading:
///
/// * Common and rain sensors produce a single gauge or nothing.
/// * Indoor climate readings produce up to four gauges, each field independent of
///   the others.
/// * Channel sensors produce a temperature and humidity gauge, or nothing if either
///   one can't be parsed.
pub fn normalize(reading: Reading<'_>) -> Vec<Gauge> {
    let mut out = Vec::new();
    match reading {
        Reading::Common(s) | Reading::Rain(s) => sensor_gauges(s, &mut out),
        Reading::Indoor(c) => indoor_gauges(c, &mut out),
        Reading::Channel(c) => channel_gauges(c, &mut out),
    }

    out
}

fn sensor_gauges(sensor: &SensorValue, out: &mut Vec<Gauge>) {
    let sensor_type = sensor.sensor_type();
    if sensor_type.is_empty() {
        // Still emitted (as just the prefix) so unmapped IDs show up in the backend
        tracing::debug!(message = "unmapped sensor id", id = %sensor.id, value = %sensor.value);
    }

    let (value, unit) = match parse_value(&sensor.value) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(message = "unable to parse sensor value", id = %sensor.id, error = %e);
            return;
        }
    };

    let unit = unit.or_else(|| sensor.unit.clone()).unwrap_or_default();
    out.push(Gauge::new(
        format!("{}{}", METRIC_PREFIX, sensor_type),
        unit_tags(&unit),
        value,
    ));
}

fn indoor_gauges(climate: &IndoorClimate, out: &mut Vec<Gauge>) {
    match parse_number(&climate.temperature) {
        Ok(v) => out.push(Gauge::new(INDOOR_TEMPERATURE, unit_tags(&climate.unit), v)),
        Err(e) => tracing::warn!(message = "unable to parse indoor temperature", error = %e),
    }

    match parse_percent(&climate.humidity) {
        Ok(v) => out.push(Gauge::new(INDOOR_HUMIDITY, Vec::new(), v)),
        Err(e) => tracing::warn!(message = "unable to parse indoor humidity", error = %e),
    }

    for (name, raw) in [
        (ABSOLUTE_PRESSURE, &climate.absolute_pressure),
        (RELATIVE_PRESSURE, &climate.relative_pressure),
    ] {
        match parse_value(raw) {
            Ok((v, unit)) => out.push(Gauge::new(name, unit_tags(&unit.unwrap_or_default()), v)),
            Err(e) => tracing::warn!(message = "unable to parse pressure", name = %name, error = %e),
        }
    }
}

fn channel_gauges(sensor: &ChannelSensorValue, out: &mut Vec<Gauge>) {
    let parsed = parse_number(&sensor.temperature).and_then(|t| parse_percent(&sensor.humidity).map(|h| (t, h)));
    let (temperature, humidity) = match parsed {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(
                message = "unable to parse channel sensor",
                channel = %sensor.channel,
                name = %sensor.name,
                error = %e,
            );
            return;
        }
    };

    let tags = vec![
        format_tag(TAG_CHANNEL, &sensor.channel),
        format_tag(TAG_NAME, &sensor.name),
    ];

    let mut temperature_tags = tags.clone();
    push_unit(&mut temperature_tags, &sensor.unit);

    out.push(Gauge::new(CHANNEL_TEMPERATURE, temperature_tags, temperature));
    out.push(Gauge::new(CHANNEL_HUMIDITY, tags, humidity));
}

/// Sends gauges for each reading of a scan to a `GaugeSink`.
#[derive(Debug)]
pub struct Normalizer<S> {
    sink: S,
}

impl<S: GaugeSink> Normalizer<S> {
    pub fn new(sink: S) -> Self {
        Normalizer { sink }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Emit all gauges for a single reading, returning how many were emitted.
    pub fn emit(&self, reading: Reading<'_>) -> usize {
        let gauges = normalize(reading);
        for g in gauges.iter() {
            self.sink.gauge(&g.name, &g.tags, g.value);
        }

        gauges.len()
    }

    /// Emit gauges for every reading in the response, returning how many were emitted.
    pub fn emit_all(&self, res: &ScanResponse) -> usize {
        res.readings().map(|r| self.emit(r)).sum()
    }
}
