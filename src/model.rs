use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.lat, self.lng)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AqiStatus {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiStatus {
    pub fn from_aqi(aqi: u32) -> Self {
        match aqi {
            0..=50 => AqiStatus::Good,
            51..=100 => AqiStatus::Moderate,
            101..=150 => AqiStatus::UnhealthySensitive,
            151..=200 => AqiStatus::Unhealthy,
            201..=300 => AqiStatus::VeryUnhealthy,
            _ => AqiStatus::Hazardous,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AqiStatus::Good => "Good",
            AqiStatus::Moderate => "Moderate",
            AqiStatus::UnhealthySensitive => "Unhealthy for Sensitive",
            AqiStatus::Unhealthy => "Unhealthy",
            AqiStatus::VeryUnhealthy => "Very Unhealthy",
            AqiStatus::Hazardous => "Hazardous",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            AqiStatus::Good => "#10b981",
            AqiStatus::Moderate => "#f59e0b",
            AqiStatus::UnhealthySensitive => "#f97316",
            AqiStatus::Unhealthy => "#ef4444",
            AqiStatus::VeryUnhealthy => "#7c2d12",
            AqiStatus::Hazardous => "#4c0519",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Pollutant {
    Pm25,
    Pm10,
    O3,
    No2,
    So2,
    Co,
}

impl Pollutant {
    pub const ALL: [Pollutant; 6] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::O3,
        Pollutant::No2,
        Pollutant::So2,
        Pollutant::Co,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm25",
            Pollutant::Pm10 => "pm10",
            Pollutant::O3 => "o3",
            Pollutant::No2 => "no2",
            Pollutant::So2 => "so2",
            Pollutant::Co => "co",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::O3 => "O3",
            Pollutant::No2 => "NO2",
            Pollutant::So2 => "SO2",
            Pollutant::Co => "CO",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    pub aqi: u32,
    pub pollutants: BTreeMap<Pollutant, f64>,
    pub observed_at: DateTime<Utc>,
    pub synthetic: bool,
}

impl Station {
    // Always derived from `aqi`; upstream status fields are never trusted.
    pub fn status(&self) -> AqiStatus {
        AqiStatus::from_aqi(self.aqi)
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }

    pub fn layer_value(&self, layer: Layer) -> Option<u32> {
        match layer {
            Layer::Aqi => Some(self.aqi),
            Layer::Pm25 => self
                .pollutants
                .get(&Pollutant::Pm25)
                .filter(|v| **v >= 0.0)
                .map(|v| v.round() as u32),
        }
    }

    pub fn marker_color(&self, layer: Layer) -> &'static str {
        self.layer_value(layer)
            .map(|v| AqiStatus::from_aqi(v).color())
            .unwrap_or(NO_READING_COLOR)
    }
}

pub const NO_READING_COLOR: &str = "#6b7280";

// Which reading drives marker colour. PM2.5 uses the WAQI sub-index on the same bands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Layer {
    #[default]
    Aqi,
    Pm25,
}

impl Layer {
    pub fn label(self) -> &'static str {
        match self {
            Layer::Aqi => "AQI",
            Layer::Pm25 => "PM2.5",
        }
    }

    pub fn next(self) -> Self {
        match self {
            Layer::Aqi => Layer::Pm25,
            Layer::Pm25 => Layer::Aqi,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub email: String,
    pub name: String,
}

impl Session {
    pub fn display_name(&self) -> Option<&str> {
        [self.name.as_str(), self.email.as_str(), self.id.as_str()]
            .into_iter()
            .map(str::trim)
            .find(|v| !v.is_empty())
    }
}

// Nominatim returns an array of places with string coordinates.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NominatimPlace {
    #[serde(default, deserialize_with = "de_opt_f64_from_any")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64_from_any")]
    pub lon: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OpenMeteoSearch {
    #[serde(default)]
    pub results: Vec<OpenMeteoPlace>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OpenMeteoPlace {
    #[serde(default, deserialize_with = "de_opt_f64_from_any")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64_from_any")]
    pub longitude: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WaqiEnvelope {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WaqiFeed {
    #[serde(default, deserialize_with = "de_opt_i64_from_any")]
    pub aqi: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_i64_from_any")]
    pub idx: Option<i64>,
    #[serde(default)]
    pub city: Option<WaqiCity>,
    #[serde(default)]
    pub iaqi: BTreeMap<String, WaqiValue>,
    #[serde(default)]
    pub time: Option<WaqiTime>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WaqiCity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub geo: Vec<Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WaqiValue {
    #[serde(default, deserialize_with = "de_opt_f64_from_any")]
    pub v: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WaqiTime {
    #[serde(default)]
    pub iso: Option<String>,
    #[serde(default, deserialize_with = "de_opt_i64_from_any")]
    pub v: Option<i64>,
}

// allorigins-style `get?url=` wrapper: the upstream body arrives as a JSON string.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RelayEnvelope {
    #[serde(default)]
    pub contents: Option<String>,
}

fn de_opt_i64_from_any<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                Ok(Some(value))
            } else if let Some(value) = number.as_f64() {
                Ok(Some(value as i64))
            } else {
                Ok(None)
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else if let Ok(value) = trimmed.parse::<i64>() {
                Ok(Some(value))
            } else if let Ok(value) = trimmed.parse::<f64>() {
                Ok(Some(value as i64))
            } else {
                // WAQI reports "-" for stations without a current index.
                Ok(None)
            }
        }
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected number or null, got {other}"
        ))),
    }
}

fn de_opt_f64_from_any<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(number) => number
            .as_f64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("expected float-compatible number")),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else if let Ok(value) = trimmed.parse::<f64>() {
                Ok(Some(value))
            } else {
                Ok(None)
            }
        }
        Value::Null => Ok(None),
        other => Err(serde::de::Error::custom(format!(
            "expected number or null, got {other}"
        ))),
    }
}
