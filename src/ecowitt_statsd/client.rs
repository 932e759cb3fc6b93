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

use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::error;
use std::fmt;
use std::net::Ipv6Addr;

#[derive(Debug)]
pub enum ClientError {
    Internal(reqwest::Error),
    InvalidAddress(String),
    Unexpected(StatusCode, Url),
    Decode(serde_json::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Internal(e) => write!(f, "{}", e),
            Self::InvalidAddress(a) => write!(f, "invalid gateway address {}", a),
            Self::Unexpected(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Decode(e) => write!(f, "malformed gateway response: {}", e),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            Self::Decode(e) => Some(e),
            _ => None,
        }
    }
}

/// Client for the local HTTP API of an Ecowitt gateway (GW1000, GW1100, GW2000, etc.)
#[derive(Debug)]
pub struct EcowittClient {
    client: Client,
    live_data_url: Url,
}

impl EcowittClient {
    const USER_AGENT: &'static str = "ecowitt_statsd (https://github.com/56quarters/ecowitt_statsd)";
    const JSON_RESPONSE: &'static str = "application/json";
    const LIVE_DATA_PATH: &'static str = "get_livedata_info";

    /// Create a client for the gateway at `host`. A `port` of `0` or `80` uses the
    /// host exactly as given, any other port is appended to it. IPv6 literals may be
    /// given with or without brackets.
    pub fn new(client: Client, host: &str, port: u16) -> Result<Self, ClientError> {
        let host = if host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]", host)
        } else {
            host.to_owned()
        };

        let address = if port == 0 || port == 80 {
            host
        } else {
            format!("{}:{}", host, port)
        };

        let mut live_data_url = Url::parse(&format!("http://{}/", address))
            .map_err(|_| ClientError::InvalidAddress(address.clone()))?;
        if live_data_url.cannot_be_a_base() || live_data_url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(ClientError::InvalidAddress(address));
        }

        live_data_url.set_path(Self::LIVE_DATA_PATH);
        // The gateway firmware expects the trailing '?' even without parameters
        live_data_url.set_query(Some(""));

        Ok(EcowittClient { client, live_data_url })
    }

    pub fn url(&self) -> &Url {
        &self.live_data_url
    }

    /// Fetch and decode the current readings of every sensor known to the gateway.
    pub async fn live_data(&self) -> Result<ScanResponse, ClientError> {
        tracing::debug!(message = "making live data request", url = %self.live_data_url);

        let res = self
            .client
            .get(self.live_data_url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .send()
            .await
            .map_err(ClientError::Internal)?;

        let status = res.status();
        if status != StatusCode::OK {
            return Err(ClientError::Unexpected(status, self.live_data_url.clone()));
        }

        let body = res.bytes().await.map_err(ClientError::Internal)?;
        decode(&body)
    }
}

/// Decode the body of a live data response.
///
/// Decoding is purely structural: missing sensor families and missing string fields
/// become empty. Field contents are interpreted later by `metrics::normalize`.
pub fn decode(body: &[u8]) -> Result<ScanResponse, ClientError> {
    serde_json::from_slice(body).map_err(ClientError::Decode)
}

/// Map the numeric-ish ID of a common sensor to the name used for its metric.
///
/// Unknown IDs return an empty string.
pub fn sensor_type_from_id(id: &str) -> &'static str {
    match id {
        "3" => "feelsLike",
        "0x02" => "outdoorTemperature",
        "0x03" => "dewPoint",
        "0x07" => "outdoorHumidity",
        "0x0A" => "windDirection",
        "0x0B" => "windSpeed",
        "0x0C" => "windGust",
        "0x0D" => "rainEvent",
        "0x0E" => "rainRate",
        "0x10" => "rainDay",
        "0x11" => "rainWeek",
        "0x12" => "rainMonth",
        "0x13" => "rainYear",
        "0x15" => "solarIrradiance",
        "0x17" => "uvIndex",
        "0x19" => "maxWindGust",
        _ => "",
    }
}

/// Every name `sensor_type_from_id` can return for a known ID.
pub const SENSOR_TYPES: &[&str] = &[
    "feelsLike",
    "outdoorTemperature",
    "dewPoint",
    "outdoorHumidity",
    "windDirection",
    "windSpeed",
    "windGust",
    "rainEvent",
    "rainRate",
    "rainDay",
    "rainWeek",
    "rainMonth",
    "rainYear",
    "solarIrradiance",
    "uvIndex",
    "maxWindGust",
];

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ScanResponse {
    #[serde(rename = "common_list", default)]
    pub common_list: Vec<SensorValue>,
    #[serde(rename = "wh25", default)]
    pub indoor: Vec<IndoorClimate>,
    #[serde(rename = "ch_aisle", default)]
    pub channels: Vec<ChannelSensorValue>,
    #[serde(rename = "rain", default)]
    pub rain: Vec<SensorValue>,
}

impl ScanResponse {
    /// All readings in the order they are normalized: common sensors, indoor
    /// climate, channel sensors, then rain sensors.
    pub fn readings(&self) -> impl Iterator<Item = Reading<'_>> {
        self.common_list
            .iter()
            .map(Reading::Common)
            .chain(self.indoor.iter().map(Reading::Indoor))
            .chain(self.channels.iter().map(Reading::Channel))
            .chain(self.rain.iter().map(Reading::Rain))
    }
}

/// One reading from any of the sensor families in a `ScanResponse`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading<'a> {
    Common(&'a SensorValue),
    Indoor(&'a IndoorClimate),
    Channel(&'a ChannelSensorValue),
    Rain(&'a SensorValue),
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct SensorValue {
    #[serde(rename = "id")]
    pub id: String,
    #[serde(rename = "val")]
    pub value: String,
    #[serde(rename = "battery", skip_serializing_if = "Option::is_none")]
    pub battery: Option<String>,
    #[serde(rename = "unit", skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl SensorValue {
    pub fn sensor_type(&self) -> &'static str {
        sensor_type_from_id(&self.id)
    }
}

/// Indoor temperature, humidity, and pressure from the gateway itself (or a WH25/WH32B)
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct IndoorClimate {
    #[serde(rename = "intemp")]
    pub temperature: String,
    #[serde(rename = "unit")]
    pub unit: String,
    #[serde(rename = "inhumi")]
    pub humidity: String,
    #[serde(rename = "abs")]
    pub absolute_pressure: String,
    #[serde(rename = "rel")]
    pub relative_pressure: String,
}

/// Temperature and humidity from a multi-channel sensor (WH31 and similar)
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct ChannelSensorValue {
    #[serde(rename = "channel")]
    pub channel: String,
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "battery")]
    pub battery: String,
    #[serde(rename = "temp")]
    pub temperature: String,
    #[serde(rename = "unit")]
    pub unit: String,
    #[serde(rename = "humidity")]
    pub humidity: String,
}
