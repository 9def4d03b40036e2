use crate::adapters::airnow::{self, AirNowClient};
use crate::adapters::census::CensusClient;
use crate::adapters::flood::FloodClient;
use crate::adapters::geocode::Geocoder;
use crate::adapters::greenspace::GreenspaceClient;
use crate::adapters::http::build_client;
use crate::adapters::landcover::LandCoverClient;
use crate::adapters::openaq::OpenAqClient;
use crate::adapters::overpass::OverpassClient;
use crate::adapters::sea_level::SeaLevelClient;
use crate::adapters::toxics::ToxicsClient;
use crate::adapters::traffic::TrafficClient;
use crate::adapters::transit::TransitClient;
use crate::adapters::water::WaterClient;
use crate::config::AppConfig;
use crate::core::scoring::{normalize_canopy, normalize_pavement, weighted_geometric_mean};
use crate::domain::{
    Coordinates, FloodRisk, GreenScoreReport, LandCover, LandCoverMetric, MetricOutcome,
    MetricReport, Pm25, Scores, SeaLevelRise, TransitAccess, WaterAvailability, ZipCode,
};
use crate::utils::error::{GreenScoreError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

/// Result of resolving a raw `zip` parameter.
#[derive(Debug, Clone)]
pub enum Located<T> {
    Found(T),
    /// 格式不符或查無座標
    InvalidZip,
}

impl<T> Located<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::InvalidZip => None,
        }
    }
}

/// Failed metric, with a stock message when the error has none.
fn outcome<T>(result: Result<T>, fallback: &str) -> MetricOutcome<T> {
    match result {
        Ok(value) => MetricOutcome::Ok(value),
        Err(e) => MetricOutcome::failed(error_message(&e, fallback)),
    }
}

fn error_message(error: &GreenScoreError, fallback: &str) -> String {
    let message = error.to_string();
    if message.trim().is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

fn land_cover_metrics(
    result: Result<LandCover>,
) -> (MetricOutcome<LandCoverMetric>, MetricOutcome<LandCoverMetric>) {
    match result {
        Ok(cover) => (
            MetricOutcome::Ok(LandCoverMetric {
                score: normalize_canopy(cover.canopy),
                percentage: cover.canopy,
                source: cover.source.clone(),
                acquired: cover.acquired.clone(),
            }),
            MetricOutcome::Ok(LandCoverMetric {
                score: normalize_pavement(cover.pavement),
                percentage: cover.pavement,
                source: cover.source,
                acquired: cover.acquired,
            }),
        ),
        Err(e) => {
            let message = error_message(&e, "Unable to retrieve land cover data");
            (
                MetricOutcome::failed(message.clone()),
                MetricOutcome::failed(message),
            )
        }
    }
}

/// Aggregates every upstream adapter into the green score report.
pub struct GreenScoreEngine {
    geocoder: Geocoder,
    airnow: AirNowClient,
    census: CensusClient,
    landcover: LandCoverClient,
    traffic: TrafficClient,
    toxics: ToxicsClient,
    greenspace: GreenspaceClient,
    sea_level: SeaLevelClient,
    transit: TransitClient,
    water: WaterClient,
    flood: FloodClient,
    openaq: OpenAqClient,
}

impl GreenScoreEngine {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let client = build_client(&config.upstream)?;
        let upstream = &config.upstream;
        let cache = &config.cache;
        let max = cache.max_entries;
        let overpass = Arc::new(OverpassClient::new(client.clone(), config.overpass.clone()));

        Ok(Self {
            geocoder: Geocoder::new(
                client.clone(),
                upstream.nominatim_url.clone(),
                cache.geocode_ttl_seconds,
                max,
            ),
            airnow: AirNowClient::new(
                client.clone(),
                upstream.airnow_url.clone(),
                config.keys.airnow.clone(),
                upstream.airnow_distance_miles,
                cache.airnow_ttl_seconds,
                max,
            ),
            census: CensusClient::new(
                client.clone(),
                upstream.census_url.clone(),
                config.keys.census.clone(),
                cache.demographics_ttl_seconds,
                max,
            ),
            landcover: LandCoverClient::new(
                client.clone(),
                upstream.stac_url.clone(),
                upstream.tiler_url.clone(),
                upstream.naip_datetime.clone(),
                upstream.landcover_radius_deg,
                cache.landcover_ttl_seconds,
                max,
            ),
            traffic: TrafficClient::new(overpass.clone(), cache.traffic_ttl_seconds, max),
            toxics: ToxicsClient::new(
                client.clone(),
                upstream.epa_frs_url.clone(),
                upstream.toxics_radius_miles,
                cache.toxics_ttl_seconds,
                max,
            ),
            greenspace: GreenspaceClient::new(
                overpass.clone(),
                config.greenspace.clone(),
                cache.greenspace_ttl_seconds,
                max,
            ),
            sea_level: SeaLevelClient::new(
                client.clone(),
                upstream.noaa_slr_url.clone(),
                cache.sea_level_ttl_seconds,
                max,
            ),
            transit: TransitClient::new(overpass.clone(), cache.transit_ttl_seconds, max),
            water: WaterClient::new(overpass, cache.water_ttl_seconds, max),
            flood: FloodClient::new(
                client.clone(),
                upstream.rtfi_url.clone(),
                cache.flood_ttl_seconds,
            ),
            openaq: OpenAqClient::new(
                client,
                upstream.openaq_url.clone(),
                config.keys.openaq.clone(),
                upstream.openaq_radius_m,
                cache.pm25_ttl_seconds,
                max,
            ),
        })
    }

    /// Validate and geocode. Transport failures are errors; malformed or
    /// unknown ZIPs are `None`.
    pub async fn locate(&self, raw_zip: &str) -> Result<Option<(ZipCode, Coordinates)>> {
        let Some(zip) = ZipCode::parse(raw_zip) else {
            tracing::debug!("Rejected malformed ZIP {:?}", raw_zip);
            return Ok(None);
        };
        let coords = self.geocoder.coordinates(&zip).await?;
        Ok(coords.map(|c| (zip, c)))
    }

    pub async fn green_score(&self, raw_zip: &str) -> Result<Located<GreenScoreReport>> {
        let Some((zip, coords)) = self.locate(raw_zip).await? else {
            return Ok(Located::InvalidZip);
        };

        tracing::info!("🚀 Computing green score for {} at {:?}", zip, coords);
        let started = Instant::now();

        let (air, land, traffic, toxics, green, demographics, sea, transit, water, flood) = tokio::join!(
            self.airnow.air_quality(&zip),
            self.landcover.land_cover(coords),
            self.traffic.traffic(coords),
            self.toxics.toxic_sites(coords),
            self.greenspace.green_space(coords),
            self.census.demographics(&zip),
            self.sea_level.sea_level_rise(coords),
            self.transit.transit_access(coords),
            self.water.water(coords),
            self.flood.flood_risk(coords),
        );

        let air_quality = match air {
            Ok(air) => MetricOutcome::Ok(air),
            Err(e) => MetricOutcome::failed_from(error_message(&e, "Unknown error"), airnow::SOURCE),
        };
        let (tree_canopy, pavement) = land_cover_metrics(land);
        let riverine_flood_risk = match flood.error.clone() {
            None => MetricOutcome::Ok(flood),
            Some(error) => MetricOutcome::failed(error),
        };

        let scores = Scores {
            air_quality,
            tree_canopy,
            pavement,
            traffic: outcome(traffic, "Unable to compute traffic score"),
            toxic_sites: outcome(toxics, "Unable to retrieve toxic sites"),
            green_space: outcome(green, "Unable to retrieve green space"),
            demographics: outcome(demographics, "Unable to retrieve demographics"),
            sea_level_rise: outcome(sea, "Unable to compute sea level rise exposure"),
            transit_access: outcome(transit, "Unable to compute transit access"),
            water_availability: outcome(water, "Unable to compute water availability"),
            riverine_flood_risk,
        };

        let failed = scores.failed_metrics();
        if !failed.is_empty() {
            tracing::warn!("⚠️ {} metrics unavailable for {}: {:?}", failed.len(), zip, failed);
        }

        let overall_score = weighted_geometric_mean(&scores.named_scores());
        tracing::info!(
            "✅ Green score for {}: {:?} ({:.1}s)",
            zip,
            overall_score,
            started.elapsed().as_secs_f64()
        );

        Ok(Located::Found(GreenScoreReport {
            zip,
            coordinates: coords,
            scores,
            overall_score,
        }))
    }

    async fn single_metric<T, F, Fut>(
        &self,
        raw_zip: &str,
        metric: F,
    ) -> Result<Located<MetricReport<T>>>
    where
        F: FnOnce(Coordinates) -> Fut,
        Fut: Future<Output = T>,
    {
        let Some((zip, coordinates)) = self.locate(raw_zip).await? else {
            return Ok(Located::InvalidZip);
        };
        let metric = metric(coordinates).await;
        Ok(Located::Found(MetricReport {
            zip,
            coordinates,
            metric,
        }))
    }

    pub async fn sea_level(
        &self,
        raw_zip: &str,
    ) -> Result<Located<MetricReport<MetricOutcome<SeaLevelRise>>>> {
        self.single_metric(raw_zip, |coords| async move {
            outcome(
                self.sea_level.sea_level_rise(coords).await,
                "Unable to compute sea level rise exposure",
            )
        })
        .await
    }

    pub async fn transit_access(
        &self,
        raw_zip: &str,
    ) -> Result<Located<MetricReport<MetricOutcome<TransitAccess>>>> {
        self.single_metric(raw_zip, |coords| async move {
            outcome(
                self.transit.transit_access(coords).await,
                "Unable to compute transit access",
            )
        })
        .await
    }

    pub async fn water(
        &self,
        raw_zip: &str,
    ) -> Result<Located<MetricReport<MetricOutcome<WaterAvailability>>>> {
        self.single_metric(raw_zip, |coords| async move {
            outcome(
                self.water.water(coords).await,
                "Unable to compute water availability",
            )
        })
        .await
    }

    /// Upstream failures still return a score of 100 with `error` set.
    pub async fn flood_risk(&self, raw_zip: &str) -> Result<Located<MetricReport<FloodRisk>>> {
        self.single_metric(raw_zip, |coords| self.flood.flood_risk(coords))
            .await
    }

    pub async fn pm25(&self, raw_zip: &str) -> Result<Located<MetricReport<MetricOutcome<Pm25>>>> {
        self.single_metric(raw_zip, |coords| async move {
            outcome(self.openaq.pm25(coords).await, "Unable to compute PM2.5")
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn land_cover_error_fails_both_metrics() {
        let (canopy, pavement) =
            land_cover_metrics(Err(GreenScoreError::no_data("No NAIP imagery found.")));
        assert_eq!(canopy.error(), Some("No NAIP imagery found."));
        assert_eq!(pavement.error(), Some("No NAIP imagery found."));
    }

    #[test]
    fn land_cover_is_split_into_two_metrics() {
        let (canopy, pavement) = land_cover_metrics(Ok(LandCover {
            canopy: 20.0,
            pavement: 30.0,
            source: "naip".to_string(),
            acquired: "2022-05-15T00:00:00+00:00".to_string(),
        }));
        assert_eq!(canopy.score(), Some(50.0));
        assert_eq!(pavement.score(), Some(50.0));
    }

    #[test]
    fn empty_error_messages_use_the_stock_text() {
        let result: Result<u8> = Err(GreenScoreError::no_data(""));
        assert_eq!(
            outcome(result, "Unable to compute traffic score").error(),
            Some("Unable to compute traffic score")
        );
    }
}
