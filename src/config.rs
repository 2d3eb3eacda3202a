//! Run settings: built-in defaults, optionally overridden by a CONL file

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::{
    CACHE_DIR, CACHE_TTL_SECS, CONFIG_FILE, DB_PATH, DRIVE_DOWNLOAD_BASE, DRIVE_FOLDER_URL,
    HEADER_SKIP_ROWS, INDEX_URL, OUTPUT_DIR, REQUEST_TIMEOUT_SECS, SHEET_KEYWORD,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub index_url: String,
    pub database: String,
    pub sheet_keyword: String,
    pub header_skip_rows: usize,
    pub drive_download_base: String,
    pub drive_folder_url: String,
    pub cache_dir: String,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub output_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_url: INDEX_URL.to_string(),
            database: DB_PATH.to_string(),
            sheet_keyword: SHEET_KEYWORD.to_string(),
            header_skip_rows: HEADER_SKIP_ROWS,
            drive_download_base: DRIVE_DOWNLOAD_BASE.to_string(),
            drive_folder_url: DRIVE_FOLDER_URL.to_string(),
            cache_dir: CACHE_DIR.to_string(),
            cache_ttl_secs: CACHE_TTL_SECS,
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            output_dir: OUTPUT_DIR.to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from `boletines.conl` when no path is given.
    ///
    /// The default file is optional; an explicitly requested one is not.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p, true),
            None => (Path::new(CONFIG_FILE), false),
        };

        if !path.exists() {
            if required {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_conl(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_conl(content: &str) -> Result<Self> {
        Ok(serde_conl::from_str(content)?)
    }

    pub fn to_conl(&self) -> Result<String> {
        Ok(serde_conl::to_string(self)?)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_conl("database = otro.db\nheader_skip_rows = 4\n").unwrap();
        assert_eq!(settings.database, "otro.db");
        assert_eq!(settings.header_skip_rows, 4);
        assert_eq!(settings.sheet_keyword, SHEET_KEYWORD);
        assert_eq!(settings.index_url, INDEX_URL);
    }

    #[test]
    fn test_to_conl_round_trips() {
        let settings = Settings::default();
        let text = settings.to_conl().unwrap();
        assert!(text.contains("header_skip_rows"));
        assert_eq!(Settings::from_conl(&text).unwrap(), settings);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(Settings::from_conl("sheet_name = Frutas\n").is_err());
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("nope.conl");
        assert!(Settings::load(Some(&explicit)).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("boletines.conl");
        fs::write(&path, "sheet_keyword = frutas\ncache_ttl_secs = 60\n").unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.sheet_keyword, "frutas");
        assert_eq!(settings.cache_ttl(), Duration::from_secs(60));
    }
}
