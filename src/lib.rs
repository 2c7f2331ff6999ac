pub mod config;
pub mod density;
pub mod errors;
pub mod grid;
pub mod journal;
pub mod manifest;
pub mod normalize;
pub mod pipeline;
pub mod places;
pub mod projection;
pub mod regions;

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use crate::config::AppConfig;
pub use crate::errors::{AppError, AppResult};
pub use crate::manifest::{FinalizeSummary, RunManifest, StorePaths};
pub use crate::pipeline::{HarvestProgress, IngestionPipeline, ProgressObserver, RunSummary};

use crate::journal::{JournalEvent, RunJournal};
use crate::places::PlacesService;
use crate::projection::BritishNationalGrid;
use crate::regions::load_regions;

#[derive(Debug, Clone, Serialize)]
pub struct HarvestReport {
    pub run: RunSummary,
    pub output: FinalizeSummary,
}

/// Harvests every region in `config.regions_file`, resuming from whatever the
/// output files already hold, and consolidates the results into
/// `config.output_file`.
pub async fn harvest(
    config: &AppConfig,
    observer: Option<ProgressObserver>,
) -> AppResult<HarvestReport> {
    info!(config = ?config.public_profile(), "starting harvest");
    let places = PlacesService::new(config)?;
    let regions = load_regions(&config.regions_file, &config.region_name_field)?;
    let journal = RunJournal::new(config.output_dir(), config)?;
    let mut manifest = RunManifest::open(StorePaths::new(&config.output_file, &config.temp_file))?;

    let mut pipeline = IngestionPipeline::new(places, Arc::new(BritishNationalGrid), journal.clone());
    if let Some(observer) = observer {
        pipeline = pipeline.with_observer(observer);
    }
    let run = pipeline.run(&regions, &mut manifest).await;
    if let Err(err) = journal.flush() {
        warn!(?err, "failed to flush run journal");
    }
    let run = run?;

    let output = manifest.finalize()?;
    info!(
        rows = output.canonical_rows,
        merged = output.merged_rows,
        dropped = output.duplicates_dropped,
        path = %config.output_file.display(),
        "output finalized"
    );
    if let Err(err) = journal
        .record(JournalEvent::from(&output))
        .and_then(|_| journal.flush())
    {
        warn!(?err, "failed to record finalize event");
    }

    Ok(HarvestReport { run, output })
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,london_pubs=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    });
}
