use anyhow::{Context, Result};
use tracing::warn;

use crate::config::Settings;
use crate::fetch::{direct_download_url, Fetch, FetchError, HttpFetcher};
use crate::index::load_index;
use crate::normalize::normalize_bulletin;
use crate::store::{AppendOutcome, Store};
use crate::types::IndexEntry;
use crate::utils::osc8_file_link;

/// Where bulletins come from: the index manifest and the files it lists
pub trait BulletinSource {
    fn fetch_index(&self) -> Result<Vec<IndexEntry>>;
    fn fetch_file(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

pub struct HttpSource<F: Fetch> {
    fetcher: F,
    index_url: String,
    drive_base: String,
}

impl<F: Fetch> HttpSource<F> {
    pub fn new(fetcher: F, settings: &Settings) -> Self {
        Self {
            fetcher,
            index_url: settings.index_url.clone(),
            drive_base: settings.drive_download_base.clone(),
        }
    }
}

impl<F: Fetch> BulletinSource for HttpSource<F> {
    fn fetch_index(&self) -> Result<Vec<IndexEntry>> {
        load_index(&self.fetcher, &self.index_url)
    }

    fn fetch_file(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.fetcher
            .fetch_bytes(&direct_download_url(url, &self.drive_base))
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub entries: usize,
    pub ingested: usize,
    pub duplicates: usize,
    pub empty: usize,
    pub failed: usize,
    pub rows: usize,
}

/// Fetch the index, then for each entry: skip known dates, download, normalize
/// and append. A bad entry is logged and skipped; store errors abort the run.
pub fn ingest(
    source: &dyn BulletinSource,
    store: &mut Store,
    settings: &Settings,
) -> Result<IngestSummary> {
    println!("Downloading bulletin index...");
    let entries = source.fetch_index()?;
    println!("{} bulletins listed in the index", entries.len());

    let mut summary = IngestSummary {
        entries: entries.len(),
        ..IngestSummary::default()
    };

    for entry in &entries {
        println!("\nProcessing bulletin {} ({})...", entry.date, entry.name);

        if store.has_bulletin(&entry.date)? {
            println!("  Already stored, skipping");
            summary.duplicates += 1;
            continue;
        }

        let bytes = match source.fetch_file(&entry.url) {
            Ok(b) => b,
            Err(e) => {
                warn!(date = %entry.date, error = %e, "could not download bulletin");
                summary.failed += 1;
                continue;
            }
        };

        let records = match normalize_bulletin(
            &bytes,
            &settings.sheet_keyword,
            settings.header_skip_rows,
            &entry.date,
        ) {
            Ok(r) => r,
            Err(e) => {
                warn!(date = %entry.date, error = %e, "could not parse bulletin");
                summary.failed += 1;
                continue;
            }
        };

        match store.append_bulletin(&entry.date, &records)? {
            AppendOutcome::Inserted(n) => {
                println!("  {} rows added", n);
                summary.ingested += 1;
                summary.rows += n;
            }
            AppendOutcome::AlreadyPresent => {
                println!("  Already stored, skipping");
                summary.duplicates += 1;
            }
            AppendOutcome::Empty => {
                println!("  No rows found");
                summary.empty += 1;
            }
        }
    }

    Ok(summary)
}

pub fn run_ingest(settings: &Settings, database: Option<&str>) -> Result<()> {
    let db_path = database.unwrap_or(settings.database.as_str());
    let mut store = Store::open(db_path)?;

    let fetcher = HttpFetcher::new(settings.request_timeout())?;
    let source = HttpSource::new(fetcher, settings);

    let summary = ingest(&source, &mut store, settings).context("Ingestion failed")?;

    println!(
        "\nDone! {} rows from {} of {} bulletins added to {} ({} already stored, {} empty, {} failed)",
        summary.rows,
        summary.ingested,
        summary.entries,
        osc8_file_link(db_path, db_path),
        summary.duplicates,
        summary.empty,
        summary.failed
    );
    if let Some(latest) = store.latest_date()? {
        println!(
            "The database now holds {} rows, latest bulletin {}",
            store.count()?,
            latest
        );
    }
    Ok(())
}
