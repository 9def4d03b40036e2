pub mod cli;

use crate::utils::error::{GreenScoreError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_redis_url,
    validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

pub use cli::{PrewarmArgs, ServerArgs};

const DAY: u64 = 24 * 3600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub redis: RedisConfig,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub overpass: OverpassConfig,
    pub greenspace: GreenspaceConfig,
    pub prewarm: PrewarmConfig,
    pub upstream: UpstreamConfig,
    pub keys: ApiKeys,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["https://ecoscore-kappa.vercel.app".to_string()],
            log_format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// false: keep reports in process memory (no expiry listener)
    pub enabled: bool,
    pub url: String,
    pub expire_listener: bool,
    pub listener_retry_s: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://localhost:6379/0".to_string(),
            expire_listener: true,
            listener_retry_s: 30,
        }
    }
}

/// Report cache plus the per-source TTLs of the in-process caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub zip_ttl_seconds: u64,
    pub zip_prefix: String,
    pub http_max_age_seconds: u64,
    pub geocode_ttl_seconds: u64,
    pub airnow_ttl_seconds: u64,
    pub demographics_ttl_seconds: u64,
    pub landcover_ttl_seconds: u64,
    pub traffic_ttl_seconds: u64,
    pub toxics_ttl_seconds: u64,
    pub greenspace_ttl_seconds: u64,
    pub sea_level_ttl_seconds: u64,
    pub transit_ttl_seconds: u64,
    pub water_ttl_seconds: u64,
    pub flood_ttl_seconds: u64,
    pub pm25_ttl_seconds: u64,
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            zip_ttl_seconds: 30 * DAY,
            zip_prefix: "greenscore:".to_string(),
            http_max_age_seconds: 600,
            geocode_ttl_seconds: DAY,
            airnow_ttl_seconds: 3600,
            demographics_ttl_seconds: 30 * DAY,
            landcover_ttl_seconds: DAY,
            traffic_ttl_seconds: 30 * DAY,
            toxics_ttl_seconds: DAY,
            greenspace_ttl_seconds: 30 * DAY,
            sea_level_ttl_seconds: DAY,
            transit_ttl_seconds: 7 * DAY,
            water_ttl_seconds: 7 * DAY,
            flood_ttl_seconds: 3600,
            pm25_ttl_seconds: 3600,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub per_minute: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { per_minute: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverpassConfig {
    pub mirrors: Vec<String>,
    pub min_interval_s: f64,
    pub max_retries: u32,
    pub backoff_start_s: f64,
    pub backoff_max_s: f64,
    pub hedge_mirrors: usize,
    /// Server-side `[timeout:N]` for queries.
    pub query_timeout_s: u64,
    /// Client-side deadline for one hedged attempt.
    pub attempt_timeout_s: u64,
}

impl Default for OverpassConfig {
    fn default() -> Self {
        Self {
            mirrors: vec![
                "https://overpass.kumi.systems/api/interpreter".to_string(),
                "https://overpass-api.nextzen.org/api/interpreter".to_string(),
                "https://z.overpass-api.de/api/interpreter".to_string(),
            ],
            min_interval_s: 1.2,
            max_retries: 4,
            backoff_start_s: 1.5,
            backoff_max_s: 12.0,
            hedge_mirrors: 2,
            query_timeout_s: 120,
            attempt_timeout_s: 60,
        }
    }
}

impl OverpassConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_interval_s.max(0.0))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GreenspaceConfig {
    pub radius_m: u32,
    pub alpha_m: f64,
    pub density_k: f64,
    pub blend_distance: f64,
    pub exclude_private: bool,
}

impl Default for GreenspaceConfig {
    fn default() -> Self {
        Self {
            radius_m: 5000,
            alpha_m: 600.0,
            density_k: 0.8,
            blend_distance: 0.7,
            exclude_private: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrewarmConfig {
    pub on_startup: bool,
    pub concurrency: usize,
    pub spacing_s: f64,
    pub include_po_boxes: bool,
}

impl Default for PrewarmConfig {
    fn default() -> Self {
        Self {
            on_startup: false,
            concurrency: 3,
            spacing_s: 2.5,
            include_po_boxes: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub nominatim_url: String,
    pub airnow_url: String,
    pub airnow_distance_miles: u32,
    pub census_url: String,
    pub rtfi_url: String,
    pub epa_frs_url: String,
    pub toxics_radius_miles: f64,
    pub noaa_slr_url: String,
    pub stac_url: String,
    pub tiler_url: String,
    pub naip_datetime: String,
    pub landcover_radius_deg: f64,
    pub openaq_url: String,
    pub openaq_radius_m: u32,
    pub zippopotam_url: String,
    pub user_agent: String,
    pub timeout_s: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            nominatim_url: "https://nominatim.openstreetmap.org/search".to_string(),
            airnow_url: "https://www.airnowapi.org/aq/observation/zipCode/current/".to_string(),
            airnow_distance_miles: 25,
            census_url: "https://api.census.gov/data/2022/acs/acs5/profile".to_string(),
            rtfi_url: "https://api.waterdata.usgs.gov/rtfi-api/referencepoints/flooding"
                .to_string(),
            epa_frs_url: "https://ofmpub.epa.gov/frs_public2/frs_rest_services.get_facilities"
                .to_string(),
            toxics_radius_miles: 5.0,
            noaa_slr_url: "https://coast.noaa.gov/arcgis/rest/services/dc_slr".to_string(),
            stac_url: "https://planetarycomputer.microsoft.com/api/stac/v1".to_string(),
            tiler_url: "https://planetarycomputer.microsoft.com/api/data/v1".to_string(),
            naip_datetime: "2015-01-01/2025-12-31".to_string(),
            landcover_radius_deg: 0.01,
            openaq_url: "https://api.openaq.org/v3".to_string(),
            openaq_radius_m: 10_000,
            zippopotam_url: "https://api.zippopotam.us/us/tx/houston".to_string(),
            user_agent: "green-score-app".to_string(),
            timeout_s: 30,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub airnow: Option<String>,
    pub census: Option<String>,
    pub openaq: Option<String>,
}

// 不把金鑰寫進日誌
impl fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |k: &Option<String>| if k.is_some() { "********" } else { "<unset>" };
        f.debug_struct("ApiKeys")
            .field("airnow", &mask(&self.airnow))
            .field("census", &mask(&self.census))
            .field("openaq", &mask(&self.openaq))
            .finish()
    }
}

impl AppConfig {
    /// 依序套用：預設值 → TOML 檔案（可選）→ 環境變數
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(GreenScoreError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| GreenScoreError::ConfigError {
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${AIRNOW_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| GreenScoreError::ConfigError {
            message: e.to_string(),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// Overlay the process environment, using the variable names the service
    /// has always been deployed with.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("PORT") {
            self.server.port = parse_env("PORT", &v)?;
        }
        if let Some(v) = get("CORS_ORIGINS") {
            self.server.cors_origins = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.server.log_format = v;
        }

        if let Some(v) = get("REDIS_URL") {
            self.redis.url = v;
        }
        if let Some(v) = get("REDIS_ENABLED") {
            self.redis.enabled = v == "1";
        }
        if let Some(v) = get("ENABLE_REDIS_EXPIRE_LISTENER") {
            self.redis.expire_listener = v == "1";
        }

        if let Some(v) = get("ZIP_CACHE_TTL_SECONDS") {
            self.cache.zip_ttl_seconds = parse_env("ZIP_CACHE_TTL_SECONDS", &v)?;
        }
        if let Some(v) = get("ZIP_CACHE_PREFIX") {
            self.cache.zip_prefix = v;
        }
        if let Some(v) = get("TRAFFIC_TTL_SECONDS") {
            self.cache.traffic_ttl_seconds = parse_env("TRAFFIC_TTL_SECONDS", &v)?;
        }
        if let Some(v) = get("GREENSPACE_TTL_SECONDS") {
            self.cache.greenspace_ttl_seconds = parse_env("GREENSPACE_TTL_SECONDS", &v)?;
        }

        if let Some(v) = get("RATE_LIMIT_PER_MIN") {
            self.rate_limit.per_minute = parse_env("RATE_LIMIT_PER_MIN", &v)?;
        }

        // 指定單一 mirror 時不再對沖
        if let Some(v) = get("OVERPASS_URL") {
            self.overpass.mirrors = vec![v];
        }
        if let Some(v) = get("OVERPASS_MIN_INTERVAL_S") {
            self.overpass.min_interval_s = parse_env("OVERPASS_MIN_INTERVAL_S", &v)?;
        }
        if let Some(v) = get("OVERPASS_MAX_RETRIES") {
            self.overpass.max_retries = parse_env("OVERPASS_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("OVERPASS_BACKOFF_START_S") {
            self.overpass.backoff_start_s = parse_env("OVERPASS_BACKOFF_START_S", &v)?;
        }
        if let Some(v) = get("OVERPASS_HEDGE_MIRRORS") {
            self.overpass.hedge_mirrors = parse_env("OVERPASS_HEDGE_MIRRORS", &v)?;
        }
        if let Some(v) = get("OVERPASS_TIMEOUT_S") {
            self.overpass.query_timeout_s = parse_env("OVERPASS_TIMEOUT_S", &v)?;
        }

        if let Some(v) = get("GREENSPACE_EXCLUDE_PRIVATE") {
            self.greenspace.exclude_private = !matches!(v.as_str(), "0" | "false" | "False");
        }
        if let Some(v) = get("GREENSPACE_ALPHA_M") {
            self.greenspace.alpha_m = parse_env("GREENSPACE_ALPHA_M", &v)?;
        }
        if let Some(v) = get("GREENSPACE_DENSITY_K") {
            self.greenspace.density_k = parse_env("GREENSPACE_DENSITY_K", &v)?;
        }
        if let Some(v) = get("GREENSPACE_BLEND_DISTANCE") {
            self.greenspace.blend_distance = parse_env("GREENSPACE_BLEND_DISTANCE", &v)?;
        }

        if let Some(v) = get("PREWARM_HOUSTON") {
            self.prewarm.on_startup = v == "1";
        }
        if let Some(v) = get("PREWARM_CONCURRENCY") {
            self.prewarm.concurrency = parse_env("PREWARM_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("PREWARM_SPACING_S") {
            self.prewarm.spacing_s = parse_env("PREWARM_SPACING_S", &v)?;
        }

        if let Some(v) = get("AIRNOW_API_KEY") {
            self.keys.airnow = Some(v);
        }
        if let Some(v) = get("CENSUS_API_KEY") {
            self.keys.census = Some(v);
        }
        if let Some(v) = get("OPENAQ_API_KEY") {
            self.keys.openaq = Some(v);
        }

        Ok(())
    }

    pub fn validate_config(&self) -> Result<()> {
        validate_non_empty_string("server.host", &self.server.host)?;
        if self.redis.enabled {
            validate_redis_url("redis.url", &self.redis.url)?;
        }
        validate_non_empty_string("cache.zip_prefix", &self.cache.zip_prefix)?;
        validate_positive_number("rate_limit.per_minute", self.rate_limit.per_minute, 1)?;
        validate_positive_number("prewarm.concurrency", self.prewarm.concurrency, 1)?;
        validate_positive_number("overpass.hedge_mirrors", self.overpass.hedge_mirrors, 1)?;
        validate_range(
            "greenspace.blend_distance",
            self.greenspace.blend_distance,
            0.0,
            1.0,
        )?;

        if self.overpass.mirrors.is_empty() {
            return Err(GreenScoreError::MissingConfigError {
                field: "overpass.mirrors".to_string(),
            });
        }
        for mirror in &self.overpass.mirrors {
            validate_url("overpass.mirrors", mirror)?;
        }

        let upstream = &self.upstream;
        for (field, url) in [
            ("upstream.nominatim_url", &upstream.nominatim_url),
            ("upstream.airnow_url", &upstream.airnow_url),
            ("upstream.census_url", &upstream.census_url),
            ("upstream.rtfi_url", &upstream.rtfi_url),
            ("upstream.epa_frs_url", &upstream.epa_frs_url),
            ("upstream.noaa_slr_url", &upstream.noaa_slr_url),
            ("upstream.stac_url", &upstream.stac_url),
            ("upstream.tiler_url", &upstream.tiler_url),
            ("upstream.openaq_url", &upstream.openaq_url),
            ("upstream.zippopotam_url", &upstream.zippopotam_url),
        ] {
            validate_url(field, url)?;
        }

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Validate for AppConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

fn parse_env<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| GreenScoreError::InvalidConfigValueError {
            field: name.to_string(),
            value: value.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_match_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.cache.zip_prefix, "greenscore:");
        assert_eq!(config.cache.zip_ttl_seconds, 2_592_000);
        assert_eq!(config.rate_limit.per_minute, 30);
        assert_eq!(config.overpass.hedge_mirrors, 2);
        assert!(config.redis.expire_listener);
        assert!(!config.prewarm.on_startup);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml_config() {
        let toml_content = r#"
[server]
port = 9000

[overpass]
mirrors = ["https://overpass.example.com/api/interpreter"]
min_interval_s = 2.5

[greenspace]
exclude_private = false
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.overpass.mirrors.len(), 1);
        assert_eq!(config.overpass.min_interval_s, 2.5);
        assert!(!config.greenspace.exclude_private);
        assert_eq!(config.cache.airnow_ttl_seconds, 3600);
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("GREEN_SCORE_TEST_REDIS", "redis://cache:6379/2");

        let toml_content = r#"
[redis]
url = "${GREEN_SCORE_TEST_REDIS}"
"#;

        let config = AppConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(config.redis.url, "redis://cache:6379/2");

        std::env::remove_var("GREEN_SCORE_TEST_REDIS");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("PORT", "8080"),
                ("RATE_LIMIT_PER_MIN", "5"),
                ("OVERPASS_URL", "https://mirror.example.com/api/interpreter"),
                ("ENABLE_REDIS_EXPIRE_LISTENER", "0"),
                ("PREWARM_HOUSTON", "1"),
                ("GREENSPACE_EXCLUDE_PRIVATE", "false"),
                ("AIRNOW_API_KEY", "secret"),
                ("CENSUS_API_KEY", ""),
            ]))
            .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.per_minute, 5);
        assert_eq!(
            config.overpass.mirrors,
            vec!["https://mirror.example.com/api/interpreter".to_string()]
        );
        assert!(!config.redis.expire_listener);
        assert!(config.prewarm.on_startup);
        assert!(!config.greenspace.exclude_private);
        assert_eq!(config.keys.airnow.as_deref(), Some("secret"));
        assert!(config.keys.census.is_none());
    }

    #[test]
    fn test_bad_env_value_is_reported() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(env(&[("PORT", "eighty")]))
            .unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.redis.url = "http://localhost:6379".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.greenspace.blend_distance = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.overpass.mirrors.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_keys_are_masked_in_debug() {
        let mut config = AppConfig::default();
        config.keys.airnow = Some("super-secret".to_string());
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("********"));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[cache]\nzip_prefix = \"gs:\"\n")
            .unwrap();

        let config = AppConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(config.cache.zip_prefix, "gs:");
    }
}
