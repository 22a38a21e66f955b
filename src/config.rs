use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{Coordinate, Session};
use crate::poll::DEFAULT_PERIOD;

pub const DEFAULT_WAQI_BASE: &str = "https://api.waqi.info";
pub const DEFAULT_WAQI_TOKEN: &str = "demo";
pub const DEFAULT_RELAY_URL: &str = "https://api.allorigins.win/get?url=";
pub const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_GEOCODER_FALLBACK_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
pub const DEFAULT_USER_AGENT: &str = concat!("aqi-tui/", env!("CARGO_PKG_VERSION"));
pub const MIN_REFRESH_SECS: u64 = 5;
pub const DEFAULT_TIMEOUT_SECS: u64 = 8;
pub const DEFAULT_MAP_ZOOM: u8 = 10;
pub const DEFAULT_CONFIG_FILE: &str = "aqi-tui.toml";
pub const DEFAULT_LOG_FILE: &str = "aqi-tui.log";
pub const DEFAULT_PLACES: &[&str] = &[
    "Delhi",
    "Mumbai",
    "Bangalore",
    "Chennai",
    "Kolkata",
    "Hyderabad",
    "Pune",
    "Ahmedabad",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub waqi_base: String,
    pub waqi_token: String,
    pub relay_url: String,
    pub geocoder_url: String,
    pub geocoder_fallback_url: String,
    pub user_agent: String,
    pub refresh: Duration,
    pub timeout_secs: u64,
    pub insecure: bool,
    pub allow_http: bool,
    pub allow_insecure: bool,
    pub config_path: PathBuf,
    pub places: Vec<String>,
    pub home_lat: Option<f64>,
    pub home_lon: Option<f64>,
    pub map_zoom: u8,
    pub log_enabled: bool,
    pub log_level: String,
    pub log_file: String,
    pub session_id: String,
    pub session_email: String,
    pub session_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            waqi_base: DEFAULT_WAQI_BASE.to_string(),
            waqi_token: DEFAULT_WAQI_TOKEN.to_string(),
            relay_url: DEFAULT_RELAY_URL.to_string(),
            geocoder_url: DEFAULT_GEOCODER_URL.to_string(),
            geocoder_fallback_url: DEFAULT_GEOCODER_FALLBACK_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            refresh: DEFAULT_PERIOD,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            insecure: false,
            allow_http: false,
            allow_insecure: false,
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            places: DEFAULT_PLACES.iter().map(|p| p.to_string()).collect(),
            home_lat: None,
            home_lon: None,
            map_zoom: DEFAULT_MAP_ZOOM,
            log_enabled: false,
            log_level: "info".to_string(),
            log_file: DEFAULT_LOG_FILE.to_string(),
            session_id: String::new(),
            session_email: String::new(),
            session_name: String::new(),
        }
    }
}

impl Config {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn home(&self) -> Option<Coordinate> {
        let coord = Coordinate::new(self.home_lat?, self.home_lon?);
        coord.is_valid().then_some(coord)
    }

    pub fn session(&self) -> Session {
        Session {
            id: self.session_id.clone(),
            email: self.session_email.clone(),
            name: self.session_name.clone(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    waqi_base: Option<String>,
    waqi_token: Option<String>,
    relay_url: Option<String>,
    geocoder_url: Option<String>,
    geocoder_fallback_url: Option<String>,
    user_agent: Option<String>,
    refresh_secs: Option<u64>,
    timeout_secs: Option<u64>,
    insecure: Option<bool>,
    allow_http: Option<bool>,
    allow_insecure: Option<bool>,
    places: Option<Vec<String>>,
    home_lat: Option<f64>,
    home_lon: Option<f64>,
    map_zoom: Option<u8>,
    log_enabled: Option<bool>,
    log_level: Option<String>,
    log_file: Option<String>,
    session_id: Option<String>,
    session_email: Option<String>,
    session_name: Option<String>,
}

pub fn parse_args() -> Result<Config> {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut explicit_config: Option<PathBuf> = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter
                    .next()
                    .ok_or_else(|| anyhow!("--config needs a value"))?;
                explicit_config = Some(PathBuf::from(value));
            }
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                return Err(anyhow!("Unknown argument: {other}"));
            }
        }
    }

    let env_config = env::var("AQI_CONFIG").ok().map(PathBuf::from);
    let required = explicit_config.is_some() || env_config.is_some();
    let config_path = explicit_config
        .or(env_config)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut config = Config {
        config_path: config_path.clone(),
        ..Config::default()
    };

    if config_path.exists() {
        if let Some(file_config) = load_file_config(&config_path)? {
            apply_file_config(&mut config, file_config);
        }
    } else if required {
        return Err(anyhow!("Config file not found: {}", config_path.display()));
    }

    apply_env(&mut config, |key| env::var(key).ok());
    validate_security(&config)?;
    Ok(config)
}

fn load_file_config(path: &Path) -> Result<Option<FileConfig>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let cfg: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.display()))?;
    Ok(Some(cfg))
}

fn apply_file_config(target: &mut Config, file: FileConfig) {
    if let Some(base) = file.waqi_base {
        target.waqi_base = base;
    }
    if let Some(token) = file.waqi_token {
        target.waqi_token = token;
    }
    if let Some(relay) = file.relay_url {
        target.relay_url = relay;
    }
    if let Some(url) = file.geocoder_url {
        target.geocoder_url = url;
    }
    if let Some(url) = file.geocoder_fallback_url {
        target.geocoder_fallback_url = url;
    }
    if let Some(agent) = file.user_agent {
        target.user_agent = agent;
    }
    if let Some(refresh) = file.refresh_secs {
        target.refresh = Duration::from_secs(refresh.max(MIN_REFRESH_SECS));
    }
    if let Some(timeout) = file.timeout_secs {
        target.timeout_secs = timeout.clamp(1, 60);
    }
    if let Some(insecure) = file.insecure {
        target.insecure = insecure;
    }
    if let Some(allow_http) = file.allow_http {
        target.allow_http = allow_http;
    }
    if let Some(allow_insecure) = file.allow_insecure {
        target.allow_insecure = allow_insecure;
    }
    if let Some(places) = file.places {
        target.places = clean_places(places);
    }
    if let Some(lat) = file.home_lat {
        target.home_lat = Some(lat);
    }
    if let Some(lon) = file.home_lon {
        target.home_lon = Some(lon);
    }
    if let Some(zoom) = file.map_zoom {
        target.map_zoom = zoom.clamp(1, 18);
    }
    if let Some(log_enabled) = file.log_enabled {
        target.log_enabled = log_enabled;
    }
    if let Some(log_level) = file.log_level {
        target.log_level = log_level;
    }
    if let Some(log_file) = file.log_file {
        target.log_file = log_file;
    }
    if let Some(id) = file.session_id {
        target.session_id = id;
    }
    if let Some(email) = file.session_email {
        target.session_email = email;
    }
    if let Some(name) = file.session_name {
        target.session_name = name;
    }
}

fn apply_env<F>(config: &mut Config, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    let flag = |value: String| matches!(value.as_str(), "1" | "true" | "yes" | "on");

    if let Some(value) = var("AQI_WAQI_BASE") {
        config.waqi_base = value;
    }
    if let Some(value) = var("AQI_WAQI_TOKEN") {
        config.waqi_token = value;
    }
    if let Some(value) = var("AQI_RELAY_URL") {
        config.relay_url = value;
    }
    if let Some(value) = var("AQI_GEOCODER_URL") {
        config.geocoder_url = value;
    }
    if let Some(value) = var("AQI_GEOCODER_FALLBACK_URL") {
        config.geocoder_fallback_url = value;
    }
    if let Some(value) = var("AQI_REFRESH") {
        if let Ok(secs) = value.parse::<u64>() {
            config.refresh = Duration::from_secs(secs.max(MIN_REFRESH_SECS));
        }
    }
    if let Some(value) = var("AQI_TIMEOUT") {
        if let Ok(secs) = value.parse::<u64>() {
            config.timeout_secs = secs.clamp(1, 60);
        }
    }
    if let Some(value) = var("AQI_INSECURE") {
        config.insecure = flag(value);
    }
    if let Some(value) = var("AQI_ALLOW_HTTP") {
        config.allow_http = flag(value);
    }
    if let Some(value) = var("AQI_ALLOW_INSECURE") {
        config.allow_insecure = flag(value);
    }
    if let Some(value) = var("AQI_PLACES") {
        let places = clean_places(value.split(',').map(str::to_string).collect());
        if !places.is_empty() {
            config.places = places;
        }
    }
    if let Some(value) = var("AQI_HOME_LAT") {
        if let Ok(val) = value.parse::<f64>() {
            config.home_lat = Some(val);
        }
    }
    if let Some(value) = var("AQI_HOME_LON") {
        if let Ok(val) = value.parse::<f64>() {
            config.home_lon = Some(val);
        }
    }
    if let Some(value) = var("AQI_LOG_ENABLED") {
        config.log_enabled = flag(value);
    }
    if let Some(value) = var("AQI_LOG_LEVEL") {
        config.log_level = value;
    }
    if let Some(value) = var("AQI_LOG_FILE") {
        config.log_file = value;
    }
    if let Some(value) = var("AQI_SESSION_ID") {
        config.session_id = value;
    }
    if let Some(value) = var("AQI_SESSION_EMAIL") {
        config.session_email = value;
    }
    if let Some(value) = var("AQI_SESSION_NAME") {
        config.session_name = value;
    }
}

fn clean_places(places: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(places.len());
    for place in places {
        let trimmed = place.trim();
        if trimmed.is_empty() || out.iter().any(|p| p.eq_ignore_ascii_case(trimmed)) {
            continue;
        }
        out.push(trimmed.to_string());
    }
    out
}

fn print_help() {
    println!("aqi-tui");
    println!("Usage: aqi-tui [--config PATH]");
    println!("Environment: AQI_CONFIG overrides config path (default {DEFAULT_CONFIG_FILE})");
    println!("Environment: AQI_WAQI_BASE/AQI_WAQI_TOKEN configure the WAQI feed");
    println!("Environment: AQI_RELAY_URL sets the CORS relay prefix");
    println!("Environment: AQI_GEOCODER_URL/AQI_GEOCODER_FALLBACK_URL configure geocoders");
    println!("Environment: AQI_REFRESH sets the poll period in seconds (min {MIN_REFRESH_SECS})");
    println!("Environment: AQI_TIMEOUT sets the per-request timeout in seconds");
    println!("Environment: AQI_PLACES sets comma-separated tracked places");
    println!("Environment: AQI_HOME_LAT/AQI_HOME_LON set the location used by 'g'");
    println!("Environment: AQI_INSECURE=1 enables invalid TLS certs");
    println!("Environment: AQI_ALLOW_HTTP=1 allows http:// URLs");
    println!("Environment: AQI_ALLOW_INSECURE=1 allows insecure");
    println!("Environment: AQI_LOG_ENABLED/LEVEL/FILE configure logging");
    println!("Environment: AQI_SESSION_ID/EMAIL/NAME set the signed-in user");
    println!("Keys: q quit | / search | r refresh | g my location | t tracked places");
    println!("      a track searched place | up/down select | enter focus");
}

fn validate_security(config: &Config) -> Result<()> {
    let upstreams = [
        &config.waqi_base,
        &config.relay_url,
        &config.geocoder_url,
        &config.geocoder_fallback_url,
    ];
    for url in upstreams {
        let trimmed = url.trim();
        if trimmed.to_ascii_lowercase().starts_with("http://") && !config.allow_http {
            return Err(anyhow!(
                "Refusing insecure http URL {trimmed} (set allow_http=true or AQI_ALLOW_HTTP=1 to override)"
            ));
        }
    }
    if config.insecure && !config.allow_insecure {
        return Err(anyhow!(
            "Refusing insecure=true without explicit allow_insecure=true or AQI_ALLOW_INSECURE=1"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str) -> PathBuf {
        let mut dir = std::env::temp_dir();
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        dir.push(format!("aqi-tui-config-test-{suffix}"));
        let _ = fs::create_dir_all(&dir);
        dir.push(name);
        dir
    }

    fn base_config() -> Config {
        Config::default()
    }

    #[test]
    fn defaults_pass_security() {
        let cfg = base_config();
        assert!(validate_security(&cfg).is_ok());
        assert_eq!(cfg.refresh, Duration::from_secs(30));
        assert_eq!(cfg.places.len(), 8);
        assert!(cfg.home().is_none());
    }

    #[test]
    fn http_url_rejected_unless_allowed() {
        let mut cfg = base_config();
        cfg.waqi_base = "http://waqi.local".to_string();
        let err = validate_security(&cfg).unwrap_err();
        assert!(err.to_string().contains("Refusing insecure http URL"));
        cfg.allow_http = true;
        assert!(validate_security(&cfg).is_ok());
    }

    #[test]
    fn insecure_requires_explicit_allow() {
        let mut cfg = base_config();
        cfg.insecure = true;
        assert!(validate_security(&cfg).is_err());
        cfg.allow_insecure = true;
        assert!(validate_security(&cfg).is_ok());
    }

    #[test]
    fn load_file_config_parses_values() {
        let path = temp_file("config.toml");
        let content = r#"
# upstreams
waqi_token = "secret"
refresh_secs = 60
timeout_secs = 4
places = ["Delhi", "Tokyo"]
home_lat = 51.5
home_lon = -0.12
log_enabled = true
log_level = "debug"
session_name = "Asha"
"#;
        fs::write(&path, content).unwrap();
        let cfg = load_file_config(&path).unwrap().unwrap();
        assert_eq!(cfg.waqi_token.as_deref(), Some("secret"));
        assert_eq!(cfg.refresh_secs, Some(60));
        assert_eq!(cfg.timeout_secs, Some(4));
        assert_eq!(
            cfg.places,
            Some(vec!["Delhi".to_string(), "Tokyo".to_string()])
        );
        assert_eq!(cfg.home_lat, Some(51.5));
        assert_eq!(cfg.log_enabled, Some(true));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.session_name.as_deref(), Some("Asha"));
        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(path.parent().unwrap());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = temp_file("broken.toml");
        fs::write(&path, "refresh_secs = \"soon\"").unwrap();
        let err = load_file_config(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
        let _ = fs::remove_file(&path);
        let _ = fs::remove_dir(path.parent().unwrap());
    }

    #[test]
    fn apply_file_config_overrides_and_clamps() {
        let mut cfg = base_config();
        let file = FileConfig {
            refresh_secs: Some(1),
            timeout_secs: Some(600),
            map_zoom: Some(0),
            places: Some(vec![
                " Pune ".to_string(),
                "pune".to_string(),
                "".to_string(),
                "Agra".to_string(),
            ]),
            home_lat: Some(12.97),
            home_lon: Some(77.59),
            session_email: Some("asha@example.com".to_string()),
            ..Default::default()
        };
        apply_file_config(&mut cfg, file);
        assert_eq!(cfg.refresh, Duration::from_secs(MIN_REFRESH_SECS));
        assert_eq!(cfg.timeout_secs, 60);
        assert_eq!(cfg.map_zoom, 1);
        assert_eq!(cfg.places, vec!["Pune".to_string(), "Agra".to_string()]);
        assert_eq!(cfg.home(), Some(Coordinate::new(12.97, 77.59)));
        assert_eq!(cfg.session().display_name(), Some("asha@example.com"));
    }

    #[test]
    fn env_overrides_apply_after_file() {
        let vars: HashMap<&str, &str> = [
            ("AQI_TIMEOUT", "0"),
            ("AQI_REFRESH", "45"),
            ("AQI_PLACES", "London, ,Beijing"),
            ("AQI_ALLOW_HTTP", "yes"),
            ("AQI_HOME_LAT", "not-a-number"),
            ("AQI_SESSION_ID", "u-1"),
        ]
        .into_iter()
        .collect();
        let mut cfg = base_config();
        apply_env(&mut cfg, |key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(cfg.timeout_secs, 1);
        assert_eq!(cfg.refresh, Duration::from_secs(45));
        assert_eq!(cfg.places, vec!["London".to_string(), "Beijing".to_string()]);
        assert!(cfg.allow_http);
        assert_eq!(cfg.home_lat, None);
        assert_eq!(cfg.session().id, "u-1");
    }
}
