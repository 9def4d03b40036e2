use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// 五位數美國郵遞區號
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ZipCode(String);

impl ZipCode {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.len() == 5 && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 772xx 為休士頓郵政信箱專用區號
    pub fn is_po_box(&self) -> bool {
        self.0.starts_with("772")
    }
}

impl fmt::Display for ZipCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// WGS84 centroid, serialised as `[lat, lon]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lon)
    }

    /// moka 快取鍵，固定六位小數
    pub fn cache_key(&self) -> String {
        format!("{:.6},{:.6}", self.lat, self.lon)
    }
}

impl Serialize for Coordinates {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        (self.lat, self.lon).serialize(serializer)
    }
}

/// Anything carrying a 0..100 component score.
pub trait Scored {
    fn score(&self) -> Option<f64>;
}

/// A metric either computed or replaced by its error message.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MetricOutcome<T> {
    Ok(T),
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<String>,
    },
}

impl<T> MetricOutcome<T> {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            source: None,
        }
    }

    pub fn failed_from(error: impl Into<String>, source: &str) -> Self {
        Self::Failed {
            error: error.into(),
            source: Some(source.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Failed { error, .. } => Some(error),
        }
    }
}

impl<T: Scored> MetricOutcome<T> {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Ok(value) => value.score(),
            Self::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AirObservation {
    pub parameter: Option<String>,
    pub aqi: Option<f64>,
    pub category: Option<String>,
    pub reporting_area: Option<String>,
    pub state_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub date_observed: Option<String>,
    pub hour_observed: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AirQuality {
    pub score: u8,
    pub max_aqi: f64,
    pub primary_pollutant: Option<String>,
    pub observations: Vec<AirObservation>,
    pub source: String,
}

/// NDVI 分類後的覆蓋率（百分比）
#[derive(Debug, Clone, Serialize)]
pub struct LandCover {
    pub canopy: f64,
    pub pavement: f64,
    pub source: String,
    pub acquired: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LandCoverMetric {
    pub score: u8,
    pub percentage: f64,
    pub source: String,
    pub acquired: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Traffic {
    pub score: u8,
    pub weighted_road_length: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToxicSites {
    pub score: u8,
    pub num_sites: usize,
    pub nearest_distance_miles: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GreenSpace {
    pub score: u8,
    pub nearest_distance_m: Option<f64>,
    pub num_parks: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Demographics {
    pub total_population: Option<i64>,
    pub percent_male: Option<f64>,
    pub percent_female: Option<f64>,
    pub median_age: Option<f64>,
    pub percent_white: Option<f64>,
    pub percent_black: Option<f64>,
    pub percent_hispanic: Option<f64>,
    pub median_income: Option<f64>,
    pub poverty_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SeaLevelRise {
    pub score: u8,
    /// "1".."6" 英尺情境 → 是否淹沒（查詢失敗為 null）
    pub inundated_feet: BTreeMap<String, Option<bool>>,
    pub source: String,
    pub method: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitAccess {
    pub score: u8,
    pub stops_count: usize,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaterAvailability {
    pub score: u8,
    pub water_features: usize,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FloodRisk {
    pub score: u8,
    pub nearest_flood_distance_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StationCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pm25Station {
    pub station: String,
    pub station_id: i64,
    pub sensor_id: i64,
    pub value: f64,
    pub unit: String,
    pub timestamp: Option<String>,
    pub distance_km: f64,
    pub station_coordinates: StationCoordinates,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pm25 {
    pub score: u8,
    pub pm25: f64,
    pub unit: String,
    pub stations_used: Vec<Pm25Station>,
    pub num_stations: usize,
}

macro_rules! impl_scored {
    ($($ty:ty),* $(,)?) => {
        $(impl Scored for $ty {
            fn score(&self) -> Option<f64> {
                Some(f64::from(self.score))
            }
        })*
    };
}

impl_scored!(
    AirQuality,
    LandCoverMetric,
    Traffic,
    ToxicSites,
    GreenSpace,
    SeaLevelRise,
    TransitAccess,
    WaterAvailability,
    FloodRisk,
    Pm25,
);

impl Scored for Demographics {
    fn score(&self) -> Option<f64> {
        None
    }
}

/// Component metrics in response order.
#[derive(Debug, Clone, Serialize)]
pub struct Scores {
    pub air_quality: MetricOutcome<AirQuality>,
    pub tree_canopy: MetricOutcome<LandCoverMetric>,
    pub pavement: MetricOutcome<LandCoverMetric>,
    pub traffic: MetricOutcome<Traffic>,
    pub toxic_sites: MetricOutcome<ToxicSites>,
    pub green_space: MetricOutcome<GreenSpace>,
    pub demographics: MetricOutcome<Demographics>,
    pub sea_level_rise: MetricOutcome<SeaLevelRise>,
    pub transit_access: MetricOutcome<TransitAccess>,
    pub water_availability: MetricOutcome<WaterAvailability>,
    pub riverine_flood_risk: MetricOutcome<FloodRisk>,
}

impl Scores {
    /// (metric name, score) pairs for every metric that can carry a score.
    pub fn named_scores(&self) -> Vec<(&'static str, Option<f64>)> {
        vec![
            ("air_quality", self.air_quality.score()),
            ("tree_canopy", self.tree_canopy.score()),
            ("pavement", self.pavement.score()),
            ("traffic", self.traffic.score()),
            ("toxic_sites", self.toxic_sites.score()),
            ("green_space", self.green_space.score()),
            ("demographics", self.demographics.score()),
            ("sea_level_rise", self.sea_level_rise.score()),
            ("transit_access", self.transit_access.score()),
            ("water_availability", self.water_availability.score()),
            ("riverine_flood_risk", self.riverine_flood_risk.score()),
        ]
    }

    pub fn failed_metrics(&self) -> Vec<&'static str> {
        [
            ("air_quality", self.air_quality.is_ok()),
            ("tree_canopy", self.tree_canopy.is_ok()),
            ("pavement", self.pavement.is_ok()),
            ("traffic", self.traffic.is_ok()),
            ("toxic_sites", self.toxic_sites.is_ok()),
            ("green_space", self.green_space.is_ok()),
            ("demographics", self.demographics.is_ok()),
            ("sea_level_rise", self.sea_level_rise.is_ok()),
            ("transit_access", self.transit_access.is_ok()),
            ("water_availability", self.water_availability.is_ok()),
            ("riverine_flood_risk", self.riverine_flood_risk.is_ok()),
        ]
        .into_iter()
        .filter_map(|(name, ok)| (!ok).then_some(name))
        .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GreenScoreReport {
    pub zip: ZipCode,
    pub coordinates: Coordinates,
    pub scores: Scores,
    pub overall_score: Option<u8>,
}

/// Single-metric response: `{zip, coordinates, ...metric}`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricReport<T> {
    pub zip: ZipCode,
    pub coordinates: Coordinates,
    #[serde(flatten)]
    pub metric: T,
}

/// Body returned for a ZIP that cannot be resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn invalid_zip() -> Self {
        Self {
            error: "Invalid ZIP code".to_string(),
        }
    }
}
