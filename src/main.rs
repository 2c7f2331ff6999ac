//! CLI entrypoint for the London pub harvester.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use london_pubs::{harvest, init_tracing, AppConfig, HarvestProgress, ProgressObserver};
use parking_lot::Mutex;
use tracing::info;

#[tokio::main]
async fn main() {
    let args = Arguments::parse();
    init_tracing();
    if let Err(error) = run(args).await {
        eprintln!("london-pubs: {error:#}");
        process::exit(1);
    }
}

async fn run(arguments: Arguments) -> anyhow::Result<()> {
    let config = arguments.apply(AppConfig::from_env());
    let report = harvest(&config, Some(progress_logger()))
        .await
        .context("harvest did not complete; rerun to resume")?;
    println!(
        "Harvested {} new pubs across {} regions ({} skipped); {} rows written to {}",
        report.run.records_accepted,
        report.run.regions_processed,
        report.run.regions_skipped,
        report.output.canonical_rows,
        config.output_file.display()
    );
    Ok(())
}

fn progress_logger() -> ProgressObserver {
    let bars = Arc::new(RegionBars::new(ProgressDrawTarget::stderr));
    Arc::new(move |progress: HarvestProgress| bars.update(&progress))
}

/// One progress bar per region, replaced when the harvest moves on.
struct RegionBars {
    target: fn() -> ProgressDrawTarget,
    current: Mutex<Option<(String, ProgressBar)>>,
}

impl RegionBars {
    fn new(target: fn() -> ProgressDrawTarget) -> Self {
        Self {
            target,
            current: Mutex::new(None),
        }
    }

    fn update(&self, progress: &HarvestProgress) {
        let mut current = self.current.lock();
        let fresh = !matches!(&*current, Some((region, _)) if *region == progress.region);
        if fresh {
            let bar = ProgressBar::with_draw_target(
                Some(progress.points_total as u64),
                (self.target)(),
            );
            bar.set_style(region_style());
            bar.set_prefix(format!(
                "[{}/{}] {}",
                progress.region_index + 1,
                progress.region_total,
                progress.region
            ));
            *current = Some((progress.region.clone(), bar));
        }
        if let Some((_, bar)) = current.as_ref() {
            bar.set_position(progress.points_done as u64);
            bar.set_message(format!("{} new", progress.accepted));
            if progress.points_done >= progress.points_total {
                bar.finish();
                info!(region = %progress.region, accepted = progress.accepted, "region done");
            }
        }
    }

    #[cfg(test)]
    fn current(&self) -> Option<(String, u64, Option<u64>, bool)> {
        self.current.lock().as_ref().map(|(region, bar)| {
            (region.clone(), bar.position(), bar.length(), bar.is_finished())
        })
    }
}

fn region_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix} [{bar:40.cyan/blue}] {pos}/{len} points, {msg} ({eta})")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

#[derive(Debug, Parser)]
#[command(name = "london-pubs", about = "Harvest London pubs from Places Nearby Search")]
struct Arguments {
    /// Borough boundaries as GeoJSON in British National Grid (EPSG:27700)
    #[arg(short, long, value_name = "path")]
    regions: Option<PathBuf>,
    /// Property holding each borough's name
    #[arg(long, value_name = "field")]
    name_field: Option<String>,
    /// Canonical CSV output
    #[arg(short, long, value_name = "path")]
    output: Option<PathBuf>,
    /// Incremental CSV written while harvesting
    #[arg(short, long, value_name = "path")]
    temp: Option<PathBuf>,
    /// Pages to request per sample point (1-3)
    #[arg(long, value_name = "n", value_parser = clap::value_parser!(u32).range(1..=3))]
    max_pages: Option<u32>,
    /// Skip writing the run journal
    #[arg(long)]
    no_journal: bool,
}

impl Arguments {
    fn apply(self, mut config: AppConfig) -> AppConfig {
        if let Some(path) = self.regions {
            config.regions_file = path;
        }
        if let Some(field) = self.name_field {
            config.region_name_field = field;
        }
        if let Some(path) = self.output {
            config.output_file = path;
        }
        if let Some(path) = self.temp {
            config.temp_file = path;
        }
        if let Some(pages) = self.max_pages {
            config.places_max_pages = pages;
        }
        if self.no_journal {
            config.journal_enabled = false;
        }
        config
    }
}
