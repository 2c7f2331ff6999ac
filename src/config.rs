use std::path::PathBuf;
use std::time::Duration;
use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::debug;

use crate::errors::{AppError, AppResult};

pub const DEFAULT_PLACES_ENDPOINT: &str =
    "https://maps.googleapis.com/maps/api/place/nearbysearch/json";
/// The Nearby Search API never serves more than three pages per query.
pub const MAX_PAGES_CAP: u32 = 3;

const DEFAULT_JOURNAL_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_JOURNAL_MAX_FILES: usize = 5;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub google_places_api_key: Option<SecretString>,
    pub places_endpoint: String,
    pub places_keyword: String,
    pub places_type: String,
    pub places_max_pages: u32,
    pub page_token_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub regions_file: PathBuf,
    pub region_name_field: String,
    pub output_file: PathBuf,
    pub temp_file: PathBuf,
    pub journal_enabled: bool,
    pub journal_batch_size: usize,
    pub journal_max_bytes: u64,
    pub journal_max_files: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub places_endpoint: String,
    pub places_keyword: String,
    pub places_type: String,
    pub places_max_pages: u32,
    pub page_token_delay_ms: u64,
    pub request_timeout_ms: u64,
    pub regions_file: String,
    pub region_name_field: String,
    pub output_file: String,
    pub temp_file: String,
    pub journal_enabled: bool,
    pub has_google_places_key: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            google_places_api_key: None,
            places_endpoint: DEFAULT_PLACES_ENDPOINT.to_string(),
            places_keyword: "pub".to_string(),
            places_type: "point_of_interest".to_string(),
            places_max_pages: MAX_PAGES_CAP,
            page_token_delay_ms: 2_000,
            request_timeout_ms: 10_000,
            regions_file: PathBuf::from("london_boroughs.geojson"),
            region_name_field: "NAME".to_string(),
            output_file: PathBuf::from("london_pubs_basic.csv"),
            temp_file: PathBuf::from("london_pubs_basic_temp.csv"),
            journal_enabled: true,
            journal_batch_size: 25,
            journal_max_bytes: DEFAULT_JOURNAL_MAX_BYTES,
            journal_max_files: DEFAULT_JOURNAL_MAX_FILES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let defaults = Self::default();
        Self {
            google_places_api_key: env::var("GOOGLE_PLACES_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(SecretString::from),
            places_endpoint: parse_string("PLACES_NEARBY_ENDPOINT", defaults.places_endpoint),
            places_keyword: parse_string("PLACES_KEYWORD", defaults.places_keyword),
            places_type: parse_string("PLACES_TYPE", defaults.places_type),
            places_max_pages: parse_u32("PLACES_MAX_PAGES", defaults.places_max_pages)
                .clamp(1, MAX_PAGES_CAP),
            page_token_delay_ms: parse_u64(
                "PLACES_PAGE_TOKEN_DELAY_MS",
                defaults.page_token_delay_ms,
            ),
            request_timeout_ms: parse_u64("PLACES_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)
                .max(1),
            regions_file: parse_path("REGIONS_FILE", defaults.regions_file),
            region_name_field: parse_string("REGION_NAME_FIELD", defaults.region_name_field),
            output_file: parse_path("OUTPUT_FILE", defaults.output_file),
            temp_file: parse_path("TEMP_FILE", defaults.temp_file),
            journal_enabled: parse_bool("JOURNAL_ENABLED", defaults.journal_enabled),
            journal_batch_size: parse_usize("JOURNAL_BATCH_SIZE", defaults.journal_batch_size)
                .max(1),
            journal_max_bytes: parse_u64("JOURNAL_MAX_BYTES", defaults.journal_max_bytes),
            journal_max_files: parse_usize("JOURNAL_MAX_FILES", defaults.journal_max_files).max(1),
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            places_endpoint: self.places_endpoint.clone(),
            places_keyword: self.places_keyword.clone(),
            places_type: self.places_type.clone(),
            places_max_pages: self.places_max_pages,
            page_token_delay_ms: self.page_token_delay_ms,
            request_timeout_ms: self.request_timeout_ms,
            regions_file: self.regions_file.display().to_string(),
            region_name_field: self.region_name_field.clone(),
            output_file: self.output_file.display().to_string(),
            temp_file: self.temp_file.display().to_string(),
            journal_enabled: self.journal_enabled,
            has_google_places_key: self.google_places_api_key.is_some(),
        }
    }

    pub fn require_api_key(&self) -> AppResult<SecretString> {
        self.google_places_api_key
            .clone()
            .ok_or_else(|| AppError::Config("GOOGLE_PLACES_API_KEY is not set".into()))
    }

    pub fn page_token_delay(&self) -> Duration {
        Duration::from_millis(self.page_token_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }

    /// Directory that holds the canonical output; the run journal lives beside it.
    pub fn output_dir(&self) -> PathBuf {
        match self.output_file.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn parse_string(key: &str, default: String) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(default)
}

fn parse_path(key: &str, default: PathBuf) -> PathBuf {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or(default)
}
