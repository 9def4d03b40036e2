//! Normalisation curves that map raw environmental measurements onto the
//! 0..100 component scale, plus the weighted geometric mean used for the
//! overall score. Everything here is pure.

use std::f64::consts::PI;

const EARTH_RADIUS_KM: f64 = 6371.0;
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// Relative weights of each component in the overall score.
pub const METRIC_WEIGHTS: [(&str, f64); 10] = [
    ("air_quality", 1.2),
    ("tree_canopy", 0.8),
    ("pavement", 0.8),
    ("traffic", 1.0),
    ("toxic_sites", 1.1),
    ("green_space", 0.9),
    ("sea_level_rise", 0.9),
    ("transit_access", 0.6),
    ("water_availability", 0.6),
    ("riverine_flood_risk", 0.9),
];

pub fn metric_weight(name: &str) -> f64 {
    METRIC_WEIGHTS
        .iter()
        .find(|(metric, _)| *metric == name)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

fn to_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

fn haversine(radius: f64, lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    2.0 * radius * a.sqrt().atan2((1.0 - a).sqrt())
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine(EARTH_RADIUS_KM, lat1, lon1, lat2, lon2)
}

pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine_km(lat1, lon1, lat2, lon2) * 1000.0
}

pub fn haversine_miles(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    haversine(EARTH_RADIUS_MILES, lat1, lon1, lat2, lon2)
}

fn circle_area_km2(radius_m: f64) -> f64 {
    PI * (radius_m / 1000.0).powi(2)
}

/// AQI → score, piecewise linear over the EPA category breakpoints.
pub fn aqi_to_score(aqi: f64) -> u8 {
    let x = aqi;
    let score = if x <= 0.0 {
        100.0
    } else if x <= 50.0 {
        100.0 - (x / 50.0) * 15.0
    } else if x <= 100.0 {
        85.0 - ((x - 50.0) / 50.0) * 15.0
    } else if x <= 150.0 {
        70.0 - ((x - 100.0) / 50.0) * 20.0
    } else if x <= 200.0 {
        50.0 - ((x - 150.0) / 50.0) * 20.0
    } else if x <= 300.0 {
        30.0 - ((x - 200.0) / 100.0) * 20.0
    } else if x <= 500.0 {
        10.0 - ((x - 300.0) / 200.0) * 10.0
    } else {
        0.0
    };
    to_score(score)
}

/// Hill curve: 20% canopy scores 50.
pub fn normalize_canopy(percentage: f64) -> u8 {
    let p = percentage.clamp(0.0, 100.0);
    if p == 0.0 {
        return 0;
    }
    let k: f64 = 20.0;
    let n = 1.2;
    to_score(100.0 * p.powf(n) / (p.powf(n) + k.powf(n)))
}

/// Falling logistic: 30% impervious surface scores 50.
pub fn normalize_pavement(percentage: f64) -> u8 {
    let p = percentage.clamp(0.0, 100.0);
    to_score(100.0 / (1.0 + (0.12 * (p - 30.0)).exp()))
}

/// Weighted road density (km of road per km²) through a falling logistic
/// centred at 15 km/km².
pub fn normalize_traffic(weighted_length_m: f64, radius_m: f64) -> u8 {
    let wl = weighted_length_m.max(0.0);
    let r = radius_m.max(1.0);
    let density = (wl / 1000.0) / circle_area_km2(r);
    to_score(100.0 / (1.0 + (0.12 * (density - 15.0)).exp()))
}

/// Blend of nearest-site distance (65%) and site count (35%).
pub fn normalize_toxic_sites(num_sites: usize, nearest_distance_miles: Option<f64>) -> u8 {
    let n = num_sites as f64;
    let d = nearest_distance_miles.unwrap_or(0.0).max(0.0);
    let dist_score = 100.0 / (1.0 + (-1.2 * (d - 2.5)).exp());
    let count_score = 100.0 * (-0.55 * n).exp();
    to_score(0.65 * dist_score + 0.35 * count_score)
}

/// Rising logistic over the distance to the nearest active flood point.
pub fn flood_distance_score(distance_km: f64) -> u8 {
    if distance_km <= 0.0 {
        return 0;
    }
    let x = 1.0 / (1.0 + (-0.08 * (distance_km - 50.0)).exp());
    to_score(100.0 * x)
}

/// `inundated` lists the sea level rise scenarios (feet) that reach the buffer.
pub fn sea_level_score(inundated: &[u32]) -> u8 {
    let Some(min_ft) = inundated.iter().min() else {
        return 100;
    };
    let breadth = inundated.len() as f64;
    let base = 100.0 * (f64::from(*min_ft) / 6.0).powf(1.2);
    let penalty = ((breadth - 1.0).max(0.0) * 6.0).min(30.0);
    to_score((base - penalty).max(0.0))
}

/// Saturating feature density: `100·(1 − e^(−α·count/area))`.
pub fn density_exp_score(count: usize, radius_m: f64, alpha: f64) -> u8 {
    if count == 0 || radius_m <= 0.0 {
        return 0;
    }
    let density = count as f64 / circle_area_km2(radius_m);
    to_score(100.0 * (1.0 - (-alpha * density).exp()))
}

/// Exponential decay with distance; `alpha_m` is the e-folding length.
pub fn smooth_distance_score(distance_m: Option<f64>, alpha_m: f64) -> u8 {
    match distance_m {
        None => 0,
        Some(d) => to_score(100.0 * (-d.max(0.0) / alpha_m.max(1.0)).exp()),
    }
}

/// Diminishing returns on parks per km².
pub fn park_density_score(count: usize, radius_m: f64, k: f64) -> u8 {
    if radius_m <= 0.0 {
        return 0;
    }
    let density = count as f64 / circle_area_km2(radius_m);
    to_score(100.0 * (1.0 - 1.0 / (1.0 + k * density)))
}

pub fn blend_scores(distance_score: u8, density_score: u8, distance_weight: f64) -> u8 {
    let w = distance_weight.clamp(0.0, 1.0);
    to_score(w * f64::from(distance_score) + (1.0 - w) * f64::from(density_score))
}

/// Square-root falloff: 0 µg/m³ → 100, `scale` or more → 0.
pub fn normalize_pm25(pm25: f64, scale: f64) -> u8 {
    let ratio = pm25.clamp(0.0, scale) / scale;
    to_score(100.0 - ratio.sqrt() * 100.0)
}

/// Weighted geometric mean over the available component scores.
///
/// Metrics without a score or without a weight are skipped and the
/// remaining weights renormalised. Scores are clamped into `1..=100` so a
/// single zero cannot collapse the product.
pub fn weighted_geometric_mean(scores: &[(&str, Option<f64>)]) -> Option<u8> {
    let weighted: Vec<(f64, f64)> = scores
        .iter()
        .filter_map(|(name, score)| {
            let w = metric_weight(name);
            let s = (*score)?;
            (w > 0.0).then(|| (s.clamp(0.0, 100.0).max(1.0), w))
        })
        .collect();

    let total_w: f64 = weighted.iter().map(|(_, w)| w).sum();
    if weighted.is_empty() || total_w <= 0.0 {
        return None;
    }

    let acc: f64 = weighted
        .iter()
        .map(|(s, w)| (w / total_w) * (s / 100.0).ln())
        .sum();
    Some(to_score(100.0 * acc.exp()))
}
