//! Filtering and aggregation shared by every dashboard front-end

use clap::Args;
use std::collections::{BTreeMap, BTreeSet};

use crate::index::parse_bulletin_date;
use crate::types::PriceRecord;

/// Row selection. Product matches by case-insensitive substring unless
/// `exact_product` is set; market and origin match case-insensitively.
#[derive(Debug, Clone, Default, Args)]
pub struct Filter {
    /// Product name or fragment (case-insensitive), e.g. "tomate"
    #[arg(short, long)]
    pub product: Option<String>,
    /// Require the whole product name to match instead of a fragment
    #[arg(long)]
    pub exact_product: bool,
    /// Market (sheet name), e.g. "Hortalizas_Lo_Valledor"
    #[arg(short, long)]
    pub market: Option<String>,
    /// Origin region or province
    #[arg(short, long)]
    pub origin: Option<String>,
    /// Single bulletin date (YYYY-MM-DD)
    #[arg(short, long, value_parser = date_arg)]
    pub date: Option<String>,
    /// First bulletin date to include (YYYY-MM-DD)
    #[arg(long, value_parser = date_arg)]
    pub from: Option<String>,
    /// Last bulletin date to include (YYYY-MM-DD)
    #[arg(long, value_parser = date_arg)]
    pub to: Option<String>,
}

/// Accept any date format the bulletin index uses and store it as ISO
fn date_arg(raw: &str) -> Result<String, String> {
    parse_bulletin_date(raw).ok_or_else(|| format!("'{}' is not a date (use YYYY-MM-DD)", raw))
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

impl Filter {
    #[cfg(test)]
    pub fn product(name: &str) -> Self {
        Self {
            product: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn matches(&self, record: &PriceRecord) -> bool {
        if let Some(ref wanted) = self.product {
            let ok = if self.exact_product {
                eq_ignore_case(&record.product, wanted)
            } else {
                record
                    .product
                    .to_lowercase()
                    .contains(&wanted.trim().to_lowercase())
            };
            if !ok {
                return false;
            }
        }

        if let Some(ref wanted) = self.market {
            if !eq_ignore_case(&record.market, wanted) {
                return false;
            }
        }

        if let Some(ref wanted) = self.origin {
            match record.origin {
                Some(ref origin) if eq_ignore_case(origin, wanted) => {}
                _ => return false,
            }
        }

        self.covers_date(&record.bulletin_date)
    }

    /// Whether a bulletin date passes the date part of the filter
    pub fn covers_date(&self, date: &str) -> bool {
        // ISO dates order correctly as strings
        !(self.date.as_deref().is_some_and(|d| d != date)
            || self.from.as_deref().is_some_and(|from| date < from)
            || self.to.as_deref().is_some_and(|to| date > to))
    }

    pub fn apply<'a>(&self, records: &'a [PriceRecord]) -> Vec<&'a PriceRecord> {
        records.iter().filter(|r| self.matches(r)).collect()
    }

    /// Human-readable summary, empty when nothing is filtered
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(ref p) = self.product {
            if self.exact_product {
                parts.push(format!("product = \"{}\"", p));
            } else {
                parts.push(format!("product contains \"{}\"", p));
            }
        }
        if let Some(ref m) = self.market {
            parts.push(format!("market = {}", m));
        }
        if let Some(ref o) = self.origin {
            parts.push(format!("origin = {}", o));
        }
        if let Some(ref d) = self.date {
            parts.push(format!("date = {}", d));
        }
        if let Some(ref d) = self.from {
            parts.push(format!("from {}", d));
        }
        if let Some(ref d) = self.to {
            parts.push(format!("to {}", d));
        }
        parts.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKey {
    Product,
    Market,
    Origin,
    Date,
    Unit,
}

impl GroupKey {
    pub fn label(&self) -> &'static str {
        match self {
            GroupKey::Product => "Product",
            GroupKey::Market => "Market",
            GroupKey::Origin => "Origin",
            GroupKey::Date => "Date",
            GroupKey::Unit => "Unit",
        }
    }

    fn key_of(&self, record: &PriceRecord) -> String {
        let value = match self {
            GroupKey::Product => Some(&record.product),
            GroupKey::Market => Some(&record.market),
            GroupKey::Origin => record.origin.as_ref(),
            GroupKey::Date => Some(&record.bulletin_date),
            GroupKey::Unit => record.unit.as_ref(),
        };
        value.cloned().unwrap_or_else(|| "-".to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupStat {
    pub key: String,
    pub rows: usize,
    /// Rows that carried an average price
    pub priced: usize,
    pub mean_price: Option<f64>,
    pub volume: f64,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
}

#[derive(Default)]
struct Accumulator {
    rows: usize,
    priced: usize,
    price_sum: f64,
    volume: f64,
    price_min: Option<f64>,
    price_max: Option<f64>,
}

impl Accumulator {
    fn add(&mut self, record: &PriceRecord) {
        self.rows += 1;
        if let Some(p) = record.price_avg {
            self.priced += 1;
            self.price_sum += p;
        }
        self.volume += record.volume.unwrap_or(0.0);
        if let Some(min) = record.price_min {
            self.price_min = Some(self.price_min.map_or(min, |m| m.min(min)));
        }
        if let Some(max) = record.price_max {
            self.price_max = Some(self.price_max.map_or(max, |m| m.max(max)));
        }
    }

    fn finish(self, key: String) -> GroupStat {
        GroupStat {
            key,
            rows: self.rows,
            priced: self.priced,
            mean_price: (self.priced > 0).then(|| self.price_sum / self.priced as f64),
            volume: self.volume,
            price_min: self.price_min,
            price_max: self.price_max,
        }
    }
}

/// Group-by average of `price_avg`, sorted by key. Rows without a price count
/// toward `rows` and `volume` but not toward the mean.
pub fn group_average<'a, I>(records: I, key: GroupKey) -> Vec<GroupStat>
where
    I: IntoIterator<Item = &'a PriceRecord>,
{
    let mut groups: BTreeMap<String, Accumulator> = BTreeMap::new();
    for record in records {
        groups.entry(key.key_of(record)).or_default().add(record);
    }
    groups
        .into_iter()
        .map(|(key, acc)| acc.finish(key))
        .collect()
}

/// Average price per bulletin date, oldest first
pub fn trend<'a, I>(records: I) -> Vec<GroupStat>
where
    I: IntoIterator<Item = &'a PriceRecord>,
{
    group_average(records, GroupKey::Date)
}

pub fn mean_price<'a, I>(records: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a PriceRecord>,
{
    let mut acc = Accumulator::default();
    for record in records {
        acc.add(record);
    }
    acc.finish(String::new()).mean_price
}

/// Distinct units in a selection. More than one means averages mix units.
pub fn units<'a, I>(records: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a PriceRecord>,
{
    records
        .into_iter()
        .filter_map(|r| r.unit.as_ref())
        .map(|u| u.trim().to_lowercase())
        .collect()
}

/// Sort groups by mean price, highest first; unpriced groups last
pub fn sort_by_price_desc(stats: &mut [GroupStat]) {
    stats.sort_by(|a, b| match (a.mean_price, b.mean_price) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.key.cmp(&b.key),
    });
}
