use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::density::classify;
use crate::errors::AppResult;
use crate::grid::generate_grid;
use crate::journal::{JournalEvent, RunJournal};
use crate::manifest::RunManifest;
use crate::normalize::normalize;
use crate::places::PlacesService;
use crate::projection::Reproject;
use crate::regions::Region;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub regions_total: usize,
    pub regions_skipped: usize,
    pub regions_processed: usize,
    pub points_searched: usize,
    pub points_interrupted: usize,
    pub records_accepted: usize,
    pub duplicates_skipped: usize,
    pub records_rejected: usize,
}

#[derive(Debug, Clone)]
pub struct HarvestProgress {
    pub region: String,
    pub region_index: usize,
    pub region_total: usize,
    pub points_done: usize,
    pub points_total: usize,
    pub accepted: usize,
}

pub type ProgressObserver = Arc<dyn Fn(HarvestProgress) + Send + Sync>;

/// Walks every region's sample grid and checkpoints new places into the
/// manifest. Finalizing the manifest is left to the caller.
pub struct IngestionPipeline {
    places: PlacesService,
    projection: Arc<dyn Reproject>,
    journal: RunJournal,
    observer: Option<ProgressObserver>,
}

impl IngestionPipeline {
    pub fn new(places: PlacesService, projection: Arc<dyn Reproject>, journal: RunJournal) -> Self {
        Self {
            places,
            projection,
            journal,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run(&self, regions: &[Region], manifest: &mut RunManifest) -> AppResult<RunSummary> {
        let mut summary = RunSummary {
            regions_total: regions.len(),
            ..RunSummary::default()
        };
        self.note(JournalEvent::RunStarted {
            regions: regions.len(),
            completed_regions: manifest.completed_regions(),
            seen_ids: manifest.seen_identifiers(),
            leftover_rows: manifest.leftover_rows(),
        });

        for (index, region) in regions.iter().enumerate() {
            if manifest.is_region_complete(&region.name) {
                info!(region = %region.name, "skipping completed region");
                summary.regions_skipped += 1;
                self.note(JournalEvent::RegionSkipped {
                    region: region.name.clone(),
                });
                continue;
            }
            self.harvest_region(index, regions.len(), region, manifest, &mut summary)
                .await?;
            summary.regions_processed += 1;
        }

        info!(
            processed = summary.regions_processed,
            skipped = summary.regions_skipped,
            accepted = summary.records_accepted,
            interrupted = summary.points_interrupted,
            "all regions visited"
        );
        Ok(summary)
    }

    async fn harvest_region(
        &self,
        index: usize,
        region_total: usize,
        region: &Region,
        manifest: &mut RunManifest,
        summary: &mut RunSummary,
    ) -> AppResult<()> {
        let tier = classify(region.expected_count);
        let settings = tier.settings();
        let points = generate_grid(&region.geometry, settings.spacing, self.projection.as_ref())?;
        info!(
            region = %region.name,
            tier = tier.as_str(),
            expected = region.expected_count,
            points = points.len(),
            "harvesting region"
        );
        self.note(JournalEvent::RegionStarted {
            region: region.name.clone(),
            tier,
            spacing: settings.spacing,
            radius: settings.radius,
            points: points.len(),
        });

        let mut accepted = 0;
        let mut interrupted = 0;
        for (done, point) in points.iter().enumerate() {
            let outcome = self.places.search_nearby(*point, settings.radius).await;
            summary.points_searched += 1;
            if let Some(reason) = outcome.failure_reason() {
                interrupted += 1;
                summary.points_interrupted += 1;
                self.note(JournalEvent::PointInterrupted {
                    region: region.name.clone(),
                    lat: point.lat,
                    lng: point.lng,
                    salvaged: outcome.places().len(),
                    reason: reason.to_string(),
                });
            }

            // Whatever the search returned, even after a failure, is
            // checkpointed before the next point is visited.
            for raw in outcome.into_places() {
                let Some(record) = normalize(&raw, &region.name) else {
                    summary.records_rejected += 1;
                    continue;
                };
                if manifest.record_accepted(&record)? {
                    accepted += 1;
                    summary.records_accepted += 1;
                } else {
                    summary.duplicates_skipped += 1;
                }
            }
            debug!(
                region = %region.name,
                point = done + 1,
                of = points.len(),
                accepted,
                "sample point searched"
            );

            if let Some(observer) = &self.observer {
                observer(HarvestProgress {
                    region: region.name.clone(),
                    region_index: index,
                    region_total,
                    points_done: done + 1,
                    points_total: points.len(),
                    accepted,
                });
            }
        }

        info!(region = %region.name, accepted, interrupted, "region harvested");
        self.note(JournalEvent::RegionCompleted {
            region: region.name.clone(),
            points: points.len(),
            accepted,
            interrupted_points: interrupted,
        });
        Ok(())
    }

    fn note(&self, event: JournalEvent) {
        if let Err(err) = self.journal.record(event) {
            warn!(?err, "failed to record journal event");
        }
    }
}
