use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::geo::GeoResolver;
use crate::model::{Coordinate, Pollutant, RelayEnvelope, Station, WaqiEnvelope, WaqiFeed};
use crate::net::{SourceError, Transport};

pub const SYNTHETIC_AQI_MIN: u32 = 50;
pub const SYNTHETIC_AQI_MAX: u32 = 200;

const SYNTHETIC_POLLUTANTS: [(Pollutant, u32, u32); 6] = [
    (Pollutant::Pm25, 15, 80),
    (Pollutant::Pm10, 25, 120),
    (Pollutant::O3, 30, 150),
    (Pollutant::No2, 20, 100),
    (Pollutant::So2, 5, 60),
    (Pollutant::Co, 1, 20),
];

#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Place(String),
    Point(Coordinate),
}

impl Target {
    pub fn label(&self) -> String {
        match self {
            Target::Place(name) => name.trim().to_string(),
            Target::Point(coord) => coord.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AqiEndpoints {
    pub waqi_base: String,
    pub token: String,
    pub relay: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Strategy {
    PlaceName,
    Coordinates,
    Relayed,
}

impl Strategy {
    fn label(self) -> &'static str {
        match self {
            Strategy::PlaceName => "place-name",
            Strategy::Coordinates => "coordinates",
            Strategy::Relayed => "relay",
        }
    }
}

#[derive(Clone, Debug)]
enum UpstreamPayload {
    Waqi(WaqiEnvelope),
    Relayed(RelayEnvelope),
}

impl UpstreamPayload {
    fn normalize(self, label: &str, fallback: Option<Coordinate>) -> Result<Station, SourceError> {
        match self {
            UpstreamPayload::Waqi(envelope) => normalize_waqi(envelope, label, fallback),
            UpstreamPayload::Relayed(relay) => {
                let contents = relay.contents.ok_or(SourceError::Empty)?;
                let envelope: WaqiEnvelope = serde_json::from_str(&contents)?;
                normalize_waqi(envelope, label, fallback)
            }
        }
    }
}

#[derive(Clone)]
pub struct AqiClient {
    transport: Arc<dyn Transport>,
    geo: GeoResolver,
    endpoints: AqiEndpoints,
}

impl AqiClient {
    pub fn new(transport: Arc<dyn Transport>, geo: GeoResolver, endpoints: AqiEndpoints) -> Self {
        Self {
            transport,
            geo,
            endpoints,
        }
    }

    // Always returns a station; `synthetic` is set when every strategy failed.
    pub fn fetch(&self, target: &Target) -> Station {
        let label = target.label();

        if let Target::Place(name) = target {
            if !name.trim().is_empty() {
                let url = self.place_url(name.trim());
                match self.attempt(Strategy::PlaceName, &url, &label, None) {
                    Ok(station) => return station,
                    Err(err) => debug!(
                        "{} strategy failed for {label:?}: {err}",
                        Strategy::PlaceName.label()
                    ),
                }
            }
        }

        let coordinate = match target {
            Target::Place(name) => self.geo.resolve(name),
            Target::Point(coord) => *coord,
        };
        let url = self.geo_url(coordinate);

        for strategy in [Strategy::Coordinates, Strategy::Relayed] {
            let request = match strategy {
                Strategy::Relayed => self.relay_url(&url),
                _ => url.clone(),
            };
            match self.attempt(strategy, &request, &label, Some(coordinate)) {
                Ok(station) => return station,
                Err(err) => debug!("{} strategy failed for {label:?}: {err}", strategy.label()),
            }
        }

        warn!("all AQI sources failed for {label:?}, synthesizing demo reading");
        synthesize(&label, coordinate)
    }

    fn attempt(
        &self,
        strategy: Strategy,
        url: &str,
        label: &str,
        fallback: Option<Coordinate>,
    ) -> Result<Station, SourceError> {
        let body = self.transport.get_json(url)?;
        let payload = match strategy {
            Strategy::Relayed => classify_relayed(body)?,
            _ => UpstreamPayload::Waqi(serde_json::from_value(body)?),
        };
        let station = payload.normalize(label, fallback)?;
        info!(
            "{label}: AQI {} via {} ({})",
            station.aqi,
            strategy.label(),
            station.id
        );
        Ok(station)
    }

    fn place_url(&self, name: &str) -> String {
        format!(
            "{}/feed/{}/?token={}",
            self.endpoints.waqi_base.trim_end_matches('/'),
            urlencoding::encode(name),
            urlencoding::encode(&self.endpoints.token)
        )
    }

    fn geo_url(&self, coord: Coordinate) -> String {
        format!(
            "{}/feed/geo:{:.4};{:.4}/?token={}",
            self.endpoints.waqi_base.trim_end_matches('/'),
            coord.lat,
            coord.lng,
            urlencoding::encode(&self.endpoints.token)
        )
    }

    fn relay_url(&self, url: &str) -> String {
        format!("{}{}", self.endpoints.relay, urlencoding::encode(url))
    }
}

// A relay either wraps the body (`{"contents": "..."}`) or passes it through.
fn classify_relayed(body: Value) -> Result<UpstreamPayload, SourceError> {
    if body.get("contents").is_some() {
        Ok(UpstreamPayload::Relayed(serde_json::from_value(body)?))
    } else {
        Ok(UpstreamPayload::Waqi(serde_json::from_value(body)?))
    }
}

fn normalize_waqi(
    envelope: WaqiEnvelope,
    label: &str,
    fallback: Option<Coordinate>,
) -> Result<Station, SourceError> {
    if !envelope.status.eq_ignore_ascii_case("ok") {
        let reason = envelope
            .data
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| format!("status {:?}", envelope.status));
        return Err(SourceError::Upstream(reason));
    }
    let feed: WaqiFeed = serde_json::from_value(envelope.data)?;

    let mut pollutants = BTreeMap::new();
    for pollutant in Pollutant::ALL {
        if let Some(value) = feed.iaqi.get(pollutant.code()).and_then(|v| v.v) {
            if value.is_finite() {
                pollutants.insert(pollutant, value);
            }
        }
    }

    let aqi = feed
        .aqi
        .filter(|v| *v >= 0)
        .map(|v| v as u32)
        .or_else(|| {
            pollutants
                .values()
                .copied()
                .filter(|v| *v >= 0.0)
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.max(v))))
                .map(|v| v.round() as u32)
        })
        .ok_or_else(|| SourceError::Payload("no AQI or sub-index in feed".to_string()))?;

    let city = feed.city.unwrap_or_default();
    let coordinate = geo_pair(&city.geo)
        .or(fallback)
        .ok_or_else(|| SourceError::Payload("station has no position".to_string()))?;

    let observed_at = feed
        .time
        .as_ref()
        .and_then(|t| {
            t.iso
                .as_deref()
                .and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| t.v.and_then(|secs| Utc.timestamp_opt(secs, 0).single()))
        })
        .unwrap_or_else(Utc::now);

    let name = city
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| format!("{label} AQI Station"));

    let key = match feed.idx {
        Some(idx) => idx.to_string(),
        None => slug(&name),
    };

    Ok(Station {
        id: format!("waqi:{key}@{}", observed_at.timestamp()),
        name,
        lat: coordinate.lat,
        lng: coordinate.lng,
        aqi,
        pollutants,
        observed_at,
        synthetic: false,
    })
}

fn geo_pair(geo: &[Value]) -> Option<Coordinate> {
    let number = |v: &Value| {
        v.as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
    };
    let coordinate = Coordinate::new(number(geo.first()?)?, number(geo.get(1)?)?);
    coordinate.is_valid().then_some(coordinate)
}

pub fn synthesize(label: &str, coordinate: Coordinate) -> Station {
    let mut rng = rand::thread_rng();
    let observed_at = Utc::now();
    let pollutants = SYNTHETIC_POLLUTANTS
        .iter()
        .map(|(p, lo, hi)| (*p, rng.gen_range(*lo..=*hi) as f64))
        .collect();
    let label = if label.trim().is_empty() {
        "Unknown"
    } else {
        label.trim()
    };
    Station {
        id: format!("demo:{}@{}", slug(label), observed_at.timestamp()),
        name: format!("{label} AQI Station"),
        lat: coordinate.lat,
        lng: coordinate.lng,
        aqi: rng.gen_range(SYNTHETIC_AQI_MIN..=SYNTHETIC_AQI_MAX),
        pollutants,
        observed_at,
        synthetic: true,
    }
}

fn slug(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "place".to_string()
    } else {
        trimmed.to_string()
    }
}
