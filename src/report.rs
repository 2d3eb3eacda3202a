//! Terminal dashboards: over the local store, or straight from the remote
//! bulletins without touching the store

use anyhow::{bail, Result};
use std::path::Path;
use tracing::warn;

use crate::config::Settings;
use crate::dashboard::{
    group_average, mean_price, sort_by_price_desc, trend, units, Filter, GroupKey, GroupStat,
};
use crate::fetch::{CachedFetcher, HttpFetcher};
use crate::ingest::{BulletinSource, HttpSource};
use crate::normalize::normalize_bulletin;
use crate::store::Store;
use crate::types::PriceRecord;

/// Chilean-peso style price: `$1,234`
pub fn format_price(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.abs().to_string();
    let mut grouped = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if rounded < 0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}

fn format_opt_price(value: Option<f64>) -> String {
    value.map(format_price).unwrap_or_else(|| "-".to_string())
}

fn format_volume(value: f64) -> String {
    format_price(value).trim_start_matches('$').to_string()
}

/// Plain-text table; first column left-aligned, the rest right-aligned
pub fn format_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, cell)| {
                let pad = widths[i].saturating_sub(cell.chars().count());
                if i == 0 {
                    format!("{}{}", cell, " ".repeat(pad))
                } else {
                    format!("{}{}", " ".repeat(pad), cell)
                }
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut out = line(headers.to_vec());
    out.push('\n');
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&line(rule.iter().map(String::as_str).collect()));
    out.push('\n');
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
        out.push('\n');
    }
    out
}

fn stats_table(key: GroupKey, stats: &[GroupStat]) -> String {
    let rows: Vec<Vec<String>> = stats
        .iter()
        .map(|s| {
            vec![
                s.key.clone(),
                format_opt_price(s.mean_price),
                format_opt_price(s.price_min),
                format_opt_price(s.price_max),
                format_volume(s.volume),
                s.rows.to_string(),
                s.priced.to_string(),
            ]
        })
        .collect();
    format_table(
        &[key.label(), "Avg price", "Min", "Max", "Volume", "Rows", "Priced"],
        &rows,
    )
}

/// Headline metric, per-market comparison, per-product ranking and date trend
pub fn render_report(records: &[PriceRecord], filter: &Filter) -> String {
    let mut out = String::new();

    let description = filter.describe();
    if description.is_empty() {
        out.push_str("Price report (all rows)\n");
    } else {
        out.push_str(&format!("Price report ({})\n", description));
    }

    if records.is_empty() {
        out.push_str("\nNo rows match the filter.\n");
        return out;
    }

    let first = records.iter().map(|r| r.bulletin_date.as_str()).min().unwrap_or("");
    let last = records.iter().map(|r| r.bulletin_date.as_str()).max().unwrap_or("");
    out.push_str(&format!("{} rows, bulletins {} to {}\n", records.len(), first, last));

    out.push_str(&format!("\nAverage price: {}\n", format_opt_price(mean_price(records))));

    let units = units(records);
    let mixed_units = units.len() > 1;
    if mixed_units {
        out.push_str(&format!(
            "Warning: the selection mixes units ({}); averages compare unlike quantities\n",
            units.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    let mut by_market = group_average(records, GroupKey::Market);
    sort_by_price_desc(&mut by_market);
    out.push_str("\nBy market\n");
    out.push_str(&stats_table(GroupKey::Market, &by_market));

    let mut by_product = group_average(records, GroupKey::Product);
    sort_by_price_desc(&mut by_product);
    out.push_str("\nBy product\n");
    out.push_str(&stats_table(GroupKey::Product, &by_product));

    if mixed_units {
        out.push_str("\nBy unit\n");
        out.push_str(&stats_table(GroupKey::Unit, &group_average(records, GroupKey::Unit)));
    }

    out.push_str("\nTrend\n");
    out.push_str(&stats_table(GroupKey::Date, &trend(records)));

    out
}

pub fn run_report(settings: &Settings, database: Option<&str>, filter: &Filter) -> Result<()> {
    let db_path = database.unwrap_or(settings.database.as_str());
    if !Path::new(db_path).exists() {
        bail!("Database {} not found. Run 'odepa-boletines ingest' first.", db_path);
    }

    let store = Store::open(db_path)?;
    let records = store.query(filter)?;
    print!("{}", render_report(&records, filter));
    if records.is_empty() {
        print!("{}", known_values(&store)?);
    }
    Ok(())
}

/// What the store holds, to help fix a filter that matched nothing
pub fn known_values(store: &Store) -> Result<String> {
    let dates = store.bulletin_dates()?;
    let mut out = format!("\nThe database holds {} rows", store.count()?);
    match (dates.first(), dates.last()) {
        (Some(first), Some(last)) => out.push_str(&format!(
            " from {} bulletins ({} to {})\n",
            dates.len(),
            first,
            last
        )),
        _ => out.push('\n'),
    }

    for (label, values) in [
        ("Markets", store.markets()?),
        ("Origins", store.origins()?),
        ("Products", store.products()?),
    ] {
        if !values.is_empty() {
            out.push_str(&format!("{}: {}\n", label, values.join(", ")));
        }
    }
    Ok(out)
}

/// Download and normalize every bulletin in the index, keeping the rows that
/// pass `filter`. Entries whose date is outside the filter are not fetched.
pub fn collect_remote(
    source: &dyn BulletinSource,
    settings: &Settings,
    filter: &Filter,
) -> Result<Vec<PriceRecord>> {
    let entries = source.fetch_index()?;
    let mut records = Vec::new();

    for entry in &entries {
        if !filter.covers_date(&entry.date) {
            continue;
        }

        let bytes = match source.fetch_file(&entry.url) {
            Ok(b) => b,
            Err(e) => {
                warn!(date = %entry.date, error = %e, "could not download bulletin");
                continue;
            }
        };

        match normalize_bulletin(
            &bytes,
            &settings.sheet_keyword,
            settings.header_skip_rows,
            &entry.date,
        ) {
            Ok(rows) => records.extend(filter.apply(&rows).into_iter().cloned()),
            Err(e) => warn!(date = %entry.date, error = %e, "could not parse bulletin"),
        }
    }

    Ok(records)
}

pub fn run_remote(settings: &Settings, filter: &Filter) -> Result<()> {
    let fetcher = CachedFetcher::new(
        HttpFetcher::new(settings.request_timeout())?,
        &settings.cache_dir,
        settings.cache_ttl(),
    );
    let source = HttpSource::new(fetcher, settings);

    println!("Loading bulletins (cached for {}s)...", settings.cache_ttl_secs);
    let records = collect_remote(&source, settings, filter)?;
    print!("{}", render_report(&records, filter));
    Ok(())
}
