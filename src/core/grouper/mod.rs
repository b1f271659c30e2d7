//! # Grouper Module
//!
//! Clusters classified images into sets.
//!
//! ## How It Works
//! 1. Normalize the header cards of every image that has cards but no set
//! 2. Skip frame kinds that are never combined automatically
//! 3. Derive the set key (including the session date) and find a matching set
//! 4. Create the set if none matches, then assign the image
//!
//! Each batch of images is one transaction. Assigned images leave the
//! unclassified list, so re-running is a no-op.

mod key;

pub use key::SetKey;

use crate::core::normalizer::Normalizer;
use crate::core::pipeline::CancellationToken;
use crate::core::store::{in_transaction, CatalogStore, UnclassifiedImage};
use crate::core::vfs;
use crate::error::StoreError;
use crate::events::{null_sender, Event, EventSender, GroupEvent, GroupProgress};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Configuration for set grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Camera temperature window in degrees, inclusive
    pub temperature_tolerance: f64,
    /// Images per transaction
    pub batch_size: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            temperature_tolerance: 1.0,
            batch_size: 256,
        }
    }
}

/// Result of one grouping pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupingOutcome {
    /// Images assigned to a set
    pub images_processed: usize,
    /// Sets created
    pub sets_created: usize,
    /// Images whose frame kind is not grouped automatically
    pub skipped: usize,
    /// Batches rolled back
    pub failed_batches: usize,
    /// Messages of the rolled back batches
    pub errors: Vec<String>,
}

/// Finds or creates the set of each unclassified image
pub struct SetGrouper {
    config: GroupingConfig,
    normalizer: Normalizer,
}

impl SetGrouper {
    /// Create a grouper over the built-in profiles
    pub fn new(config: GroupingConfig) -> Self {
        Self::with_normalizer(config, Normalizer::new())
    }

    /// Create a grouper with a custom normalizer
    pub fn with_normalizer(config: GroupingConfig, normalizer: Normalizer) -> Self {
        Self { config, normalizer }
    }

    /// Group every unclassified image.
    ///
    /// Returns the number of images assigned and the number of sets created.
    pub fn combine(&self, store: &dyn CatalogStore) -> Result<(usize, usize), StoreError> {
        let outcome =
            self.combine_with_events(store, &null_sender(), &CancellationToken::new())?;
        Ok((outcome.images_processed, outcome.sets_created))
    }

    /// Group every unclassified image, reporting progress.
    ///
    /// Only the initial query can fail the whole pass; a batch that cannot be
    /// committed is rolled back and recorded in the outcome.
    pub fn combine_with_events(
        &self,
        store: &dyn CatalogStore,
        events: &EventSender,
        cancel: &CancellationToken,
    ) -> Result<GroupingOutcome, StoreError> {
        let images = store.unclassified_images()?;
        let total = images.len();
        let batch_size = self.config.batch_size.max(1);
        let mut outcome = GroupingOutcome::default();

        info!("Grouping {} unclassified images", total);
        events.send(Event::Group(GroupEvent::Started {
            total_images: total,
        }));

        for (index, batch) in images.chunks(batch_size).enumerate() {
            if cancel.is_cancelled() {
                info!("Grouping cancelled after {} batches", index);
                break;
            }

            let keyed: Vec<(i64, SetKey)> = batch
                .iter()
                .filter_map(|image| self.key_for(image))
                .collect();
            outcome.skipped += batch.len() - keyed.len();

            let tolerance = self.config.temperature_tolerance;
            let result = in_transaction(store, |tx| {
                let mut created = 0;
                for (image_id, key) in &keyed {
                    let set = match tx.find_matching_set(key, tolerance)? {
                        Some(set) => set,
                        None => {
                            created += 1;
                            tx.create_set(key)?
                        }
                    };
                    tx.assign_set(*image_id, set.id)?;
                }
                Ok(created)
            });

            match result {
                Ok(created) => {
                    outcome.images_processed += keyed.len();
                    outcome.sets_created += created;
                }
                Err(e) => {
                    warn!("Grouping batch {} rolled back: {}", index, e);
                    outcome.failed_batches += 1;
                    outcome.errors.push(e.to_string());
                }
            }

            events.send(Event::Group(GroupEvent::Progress(GroupProgress {
                processed: (index * batch_size + batch.len()).min(total),
                total,
                sets_created: outcome.sets_created,
            })));
        }

        info!(
            "Grouped {} images into {} new sets ({} skipped)",
            outcome.images_processed, outcome.sets_created, outcome.skipped
        );
        events.send(Event::Group(GroupEvent::Completed {
            images_processed: outcome.images_processed,
            sets_created: outcome.sets_created,
        }));

        Ok(outcome)
    }

    fn key_for(&self, image: &UnclassifiedImage) -> Option<(i64, SetKey)> {
        let origin = vfs::join(&image.path, &image.file_name);
        let meta = self.normalizer.normalize(&image.cards, &origin);

        if !meta.frame_kind.is_combinable() {
            debug!("Not grouping {} ({})", origin, meta.frame_kind);
            return None;
        }

        Some((
            image.image_id,
            SetKey::from_meta(image.root_id, &image.path, &meta),
        ))
    }
}

impl Default for SetGrouper {
    fn default() -> Self {
        Self::new(GroupingConfig::default())
    }
}
