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

//! StatsD and Prometheus metrics bridge for Ecowitt weather station gateways
//!
//! ## Features
//!
//! `ecowitt_statsd` polls the local HTTP API of an [Ecowitt] gateway (GW1000, GW1100, GW2000, etc.)
//! every few seconds and sends the current value of each sensor to a StatsD server as a gauge, using
//! DogStatsD style tags. Optionally, the same values can be exposed as Prometheus metrics. The following
//! gauges are emitted when the corresponding sensors are connected to the gateway.
//!
//! * `ecowitt.outdoorTemperature{unit}`, `ecowitt.feelsLike{unit}`, `ecowitt.dewPoint{unit}` - Outdoor temperatures.
//! * `ecowitt.outdoorHumidity` - Outdoor relative humidity (0-100).
//! * `ecowitt.windDirection{unit}`, `ecowitt.windSpeed{unit}`, `ecowitt.windGust{unit}`, `ecowitt.maxWindGust{unit}` - Wind.
//! * `ecowitt.rainEvent{unit}`, `ecowitt.rainRate{unit}`, `ecowitt.rainDay{unit}`, `ecowitt.rainWeek{unit}`,
//!   `ecowitt.rainMonth{unit}`, `ecowitt.rainYear{unit}` - Rainfall.
//! * `ecowitt.solarIrradiance{unit}`, `ecowitt.uvIndex` - Sunlight.
//! * `ecowitt.indoorTemperature{unit}`, `ecowitt.indoorHumidity` - Indoor climate from the gateway itself.
//! * `ecowitt.absolutePressure{unit}`, `ecowitt.relativePressure{unit}` - Barometric pressure.
//! * `ecowitt.channelTemperature{channel, name, unit}`, `ecowitt.channelHumidity{channel, name}` - Multi-channel
//!   temperature and humidity sensors.
//!
//! Sensors with an ID that isn't recognized are still sent, with the name `ecowitt.` and no suffix.
//!
//! [Ecowitt]: https://www.ecowitt.com/
//!
//! ## Build
//!
//! `ecowitt_statsd` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:56quarters/ecowitt_statsd.git && cd ecowitt_statsd
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Configuration
//!
//! `ecowitt_statsd` reads a JSON configuration file, `/var/lib/ecowitt-statsd/config.json` by default.
//!
//! ```json
//! {
//!   "statsServer": "127.0.0.1:8125",
//!   "host": "192.168.1.20",
//!   "port": 80,
//!   "defaultTags": ["site:home"]
//! }
//! ```
//!
//! `host` and `port` are the address of the gateway. `statsServer` is the StatsD server to send gauges
//! to, leave it empty to disable StatsD. `defaultTags` are added to every gauge sent.
//!
//! ### Run
//!
//! ```text
//! ./ecowitt_statsd --config-file config.json --refresh-secs 10
//! ```
//!
//! ### Prometheus
//!
//! When started with `--bind 0.0.0.0:9783`, gauges are also exposed as Prometheus metrics at `/metrics`
//! with names converted to Prometheus style, e.g. `ecowitt.outdoorTemperature` is exposed as
//! `ecowitt_outdoor_temperature{unit="C"}`.
//!

pub mod client;
pub mod config;
pub mod http;
pub mod metrics;
pub mod normalize;
pub mod scan;
