//! Index manifest: the JSON list of published bulletins

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::fetch::Fetch;
use crate::types::IndexEntry;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Value>),
    One(Value),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    fecha: Option<Value>,
    url_descarga: Option<String>,
    nombre: Option<String>,
}

/// Normalize a manifest date to ISO `YYYY-MM-DD`
pub fn parse_bulletin_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    // Timestamps like "2024-01-10T00:00:00" keep only their date part
    let raw = raw.split(['T', ' ']).next().unwrap_or(raw);

    ["%Y-%m-%d", "%d-%m-%Y", "%d/%m/%Y", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

fn entry_from_value(value: Value) -> Option<IndexEntry> {
    let raw: RawEntry = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "skipping index entry that is not an object");
            return None;
        }
    };

    let Some(url) = raw.url_descarga.filter(|u| !u.trim().is_empty()) else {
        warn!("skipping index entry without url_descarga");
        return None;
    };

    let fecha = match raw.fecha {
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
        None => {
            warn!(url = %url, "skipping index entry without fecha");
            return None;
        }
    };

    let Some(date) = parse_bulletin_date(&fecha) else {
        warn!(url = %url, fecha = %fecha, "skipping index entry with unrecognized date");
        return None;
    };

    let name = raw.nombre.unwrap_or_else(|| url.clone());
    Some(IndexEntry {
        date,
        url: url.trim().to_string(),
        name,
    })
}

/// Parse the manifest. A single object is treated as a one-entry list;
/// malformed entries are dropped with a warning.
pub fn parse_index(json: &str) -> Result<Vec<IndexEntry>> {
    let parsed: OneOrMany =
        serde_json::from_str(json).context("Could not read the index JSON")?;

    let values = match parsed {
        OneOrMany::Many(values) => values,
        OneOrMany::One(value) => vec![value],
    };

    Ok(values.into_iter().filter_map(entry_from_value).collect())
}

pub fn load_index(fetcher: &dyn Fetch, url: &str) -> Result<Vec<IndexEntry>> {
    let bytes = fetcher
        .fetch_bytes(url)
        .context("Failed to download the bulletin index")?;
    parse_index(&String::from_utf8_lossy(&bytes))
}
