//! Report over the newest database published in a public Drive folder

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use scraper::{Html, Selector};
use std::io::Write;
use tempfile::NamedTempFile;

use crate::config::Settings;
use crate::dashboard::Filter;
use crate::fetch::{direct_download_url, drive_file_id, Fetch, HttpFetcher};
use crate::report::render_report;
use crate::store::Store;
use crate::types::PriceRecord;

const DATABASE_EXTENSIONS: [&str; 3] = [".db", ".sqlite", ".sqlite3"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderFile {
    pub name: String,
    pub url: String,
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("invalid selector {}: {:?}", css, e))
}

/// Files listed on a Drive `embeddedfolderview` page. Entries without a
/// Drive file link are skipped.
pub fn parse_folder_listing(html: &str) -> Result<Vec<FolderFile>> {
    let document = Html::parse_document(html);
    let entry_sel = selector("div.flip-entry")?;
    let link_sel = selector("a[href]")?;
    let title_sel = selector(".flip-entry-title")?;

    let mut files = Vec::new();
    for entry in document.select(&entry_sel) {
        let Some(url) = entry
            .select(&link_sel)
            .next()
            .and_then(|a| a.value().attr("href"))
        else {
            continue;
        };
        if drive_file_id(url).is_none() {
            continue;
        }

        let name = match entry.select(&title_sel).next() {
            Some(title) => title.text().collect::<String>().trim().to_string(),
            None => continue,
        };

        files.push(FolderFile {
            name,
            url: url.to_string(),
        });
    }
    Ok(files)
}

/// First `YYYY-MM-DD` date embedded in a file name
pub fn name_date(name: &str) -> Option<NaiveDate> {
    name.as_bytes().windows(10).find_map(|w| {
        let shaped = w.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
        if !shaped {
            return None;
        }
        let text = std::str::from_utf8(w).ok()?;
        NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
    })
}

fn is_database(name: &str) -> bool {
    let lower = name.to_lowercase();
    DATABASE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// The database file with the newest date in its name. Undated files rank
/// below every dated one.
pub fn newest_database(files: &[FolderFile]) -> Option<&FolderFile> {
    files
        .iter()
        .filter(|f| is_database(&f.name))
        .max_by_key(|f| name_date(&f.name))
}

/// Open downloaded SQLite bytes and return the rows matching `filter`
pub fn read_database(bytes: &[u8], filter: &Filter) -> Result<Vec<PriceRecord>> {
    let mut file = NamedTempFile::new().context("Failed to create temporary database file")?;
    file.write_all(bytes)?;
    file.flush()?;

    let store = Store::open_existing(file.path())?;
    store
        .query(filter)
        .with_context(|| format!("Table '{}' is not in the bulletin layout", store.table()))
}

/// Locate, download and read the newest database in the configured folder
pub fn latest_records(
    fetcher: &HttpFetcher,
    settings: &Settings,
    filter: &Filter,
) -> Result<(String, Vec<PriceRecord>)> {
    let html = fetcher.fetch_text(&settings.drive_folder_url)?;
    let files = parse_folder_listing(&html)?;
    if files.is_empty() {
        bail!("No files visible in {}", settings.drive_folder_url);
    }

    let Some(newest) = newest_database(&files) else {
        bail!(
            "No database files in the folder (found: {})",
            files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
        );
    };

    let bytes = fetcher.fetch_bytes(&direct_download_url(&newest.url, &settings.drive_download_base))?;
    let records = read_database(&bytes, filter)?;
    Ok((newest.name.clone(), records))
}

pub fn run_latest_db(settings: &Settings, filter: &Filter) -> Result<()> {
    let fetcher = HttpFetcher::new(settings.request_timeout())?;
    println!("Looking for the newest database in the Drive folder...");
    let (name, records) = latest_records(&fetcher, settings, filter)?;
    println!("Newest database: {} ({} matching rows)\n", name, records.len());
    print!("{}", render_report(&records, filter));
    Ok(())
}
