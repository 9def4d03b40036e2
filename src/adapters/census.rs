//! ACS 5-year profile indicators for a ZIP Code Tabulation Area.

use crate::adapters::http::{ensure_success, read_json};
use crate::domain::{Demographics, ZipCode};
use crate::utils::error::{GreenScoreError, Result};
use crate::utils::ttl_cache::TtlCache;
use reqwest::Client;
use serde_json::Value;

/// 順序與 `Demographics` 欄位對應
pub const ACS_VARIABLES: [&str; 9] = [
    "DP05_0001E",  // total population
    "DP05_0002PE", // percent male
    "DP05_0003PE", // percent female
    "DP05_0018E",  // median age
    "DP05_0037PE", // percent White
    "DP05_0038PE", // percent Black
    "DP05_0073PE", // percent Hispanic
    "DP03_0062E",  // median household income
    "DP03_0128PE", // poverty rate
];

pub struct CensusClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    cache: TtlCache<Demographics>,
}

impl CensusClient {
    pub fn new(
        client: Client,
        url: String,
        api_key: Option<String>,
        ttl_seconds: u64,
        max_entries: u64,
    ) -> Self {
        Self {
            client,
            url,
            api_key,
            cache: TtlCache::new(ttl_seconds, max_entries),
        }
    }

    pub async fn demographics(&self, zip: &ZipCode) -> Result<Demographics> {
        self.cache
            .get_or_try_insert(zip.to_string(), || self.fetch(zip))
            .await
    }

    async fn fetch(&self, zip: &ZipCode) -> Result<Demographics> {
        let mut params = vec![
            ("get", ACS_VARIABLES.join(",")),
            ("for", format!("zip code tabulation area:{}", zip)),
        ];
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }

        let response = self.client.get(&self.url).query(&params).send().await?;
        let response = ensure_success("Census API", response).await?;
        let table: Vec<Vec<Value>> = read_json(response).await?;

        // 第一列為標頭
        let row = table
            .get(1)
            .ok_or_else(|| GreenScoreError::no_data("No demographic data found for this ZIP"))?;
        parse_row(row)
    }
}

fn cell(row: &[Value], index: usize) -> Result<Option<f64>> {
    match row.get(index) {
        None => Err(GreenScoreError::no_data(format!(
            "Missing or invalid data returned from Census API: column {} missing",
            index
        ))),
        Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| {
            GreenScoreError::no_data(format!(
                "Missing or invalid data returned from Census API: {:?} is not a number",
                s
            ))
        }),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(GreenScoreError::no_data(format!(
            "Missing or invalid data returned from Census API: unexpected {}",
            other
        ))),
    }
}

fn parse_row(row: &[Value]) -> Result<Demographics> {
    Ok(Demographics {
        total_population: cell(row, 0)?.map(|v| v as i64),
        percent_male: cell(row, 1)?,
        percent_female: cell(row, 2)?,
        median_age: cell(row, 3)?,
        percent_white: cell(row, 4)?,
        percent_black: cell(row, 5)?,
        percent_hispanic: cell(row, 6)?,
        median_income: cell(row, 7)?,
        poverty_rate: cell(row, 8)?,
    })
}
