use crate::source::{ResolutionLevel, SourceError};
use crate::staging::{StagingChain, TilePlacement, UploadQueue};
use crate::texture_cache::{TextureCache, TileAssignment};
use crate::tile_access::TileAccess;
use crate::worker_pool::{JobOutcome, WorkerPool};
use crate::BlockKey;

use float_ord::FloatOrd;
use std::sync::Arc;
use thiserror::Error;
use volstream_core::frame_budget::{Deadline, FrameBudget};
use volstream_core::SmallKeyHashSet;

/// A block that is required for rendering but not yet in the cache.
#[derive(Clone)]
pub struct FillTask {
    pub key: BlockKey,
    /// The resolution level that `key.coords` refers to.
    pub level: Arc<dyn ResolutionLevel>,
    /// Lower values are filled first.
    pub priority: f32,
}

#[derive(Debug, Error)]
pub enum FillError {
    #[error("failed to read block {key:?}")]
    Source {
        key: BlockKey,
        #[source]
        source: SourceError,
    },
    #[error("worker panicked while filling block {key:?}")]
    WorkerPanicked { key: BlockKey },
}

#[derive(Debug, Default)]
pub struct FillReport {
    /// Blocks that were uploaded and are now resident.
    pub completed: usize,
    /// Tasks left for a later frame because time ran out, a staging buffer was not available, or a failure aborted
    /// the batch.
    pub deferred: usize,
    /// Tasks that could not get a tile because every tile is in use by this frame.
    pub truncated: usize,
    /// The first failure. No batch is started after it.
    pub failure: Option<FillError>,
}

impl FillReport {
    /// Whether every task became resident.
    pub fn is_complete(&self) -> bool {
        self.deferred == 0 && self.truncated == 0 && self.failure.is_none()
    }
}

/// Loads `tasks` into `cache`, most urgent first, until the tasks run out or `deadline` passes.
///
/// Work is split into batches of at most one staging buffer. Tiles are assigned on the calling thread, filled in
/// parallel on `pool`, uploaded through `queue` and only then committed, so a lookup never sees a tile with partial
/// contents. Tiles whose fill did not complete are released before this returns.
///
/// Tasks for blocks that already own a tile are ignored, as are duplicates.
#[allow(clippy::too_many_arguments)]
pub fn process_fill_tasks<Q: UploadQueue>(
    cache: &mut TextureCache,
    chain: &mut StagingChain<Q::Fence>,
    queue: &mut Q,
    pool: &WorkerPool,
    tile_access: &TileAccess,
    budget: &mut FrameBudget,
    mut tasks: Vec<FillTask>,
    deadline: &Deadline,
) -> FillReport {
    let mut seen = SmallKeyHashSet::default();
    tasks.retain(|t| !cache.contains(&t.key) && seen.insert(t.key));
    tasks.sort_by_key(|t| FloatOrd(t.priority));

    let mut report = FillReport::default();
    let spec = *cache.spec();
    budget.reset_timer();

    let mut next = 0;
    while next < tasks.len() {
        if deadline.is_expired() {
            break;
        }
        let buffer = match chain.claim(queue, deadline) {
            Some(b) => b,
            None => break,
        };

        let batch_size = chain
            .tiles_per_buffer()
            .min(budget.items_within(deadline.remaining()))
            .min(tasks.len() - next);
        let batch_tasks = &tasks[next..next + batch_size];
        next += batch_size;

        let keys: Vec<BlockKey> = batch_tasks.iter().map(|t| t.key).collect();
        let mut out_of_tiles = false;
        let batch: Vec<(&FillTask, TileAssignment)> = batch_tasks
            .iter()
            .zip(cache.assign_tiles(&keys))
            .filter_map(|(task, assignment)| {
                if assignment.is_none() {
                    out_of_tiles = true;
                }
                Some((task, assignment?))
            })
            .collect();
        report.truncated += batch_size - batch.len();

        let jobs: Vec<(usize, &mut [u8])> = chain.regions_mut(buffer, batch.len()).enumerate().collect();
        let run = pool.run(jobs, deadline, |(i, region)| {
            let (task, _) = batch[i];
            tile_access.fill_tile(&spec, task.level.as_ref(), task.key.coords, region)
        });

        let mut placements = Vec::with_capacity(batch.len());
        let mut completed_slots = Vec::with_capacity(batch.len());
        for (i, ((task, assignment), outcome)) in batch.iter().zip(run.outcomes).enumerate() {
            match outcome {
                JobOutcome::Done { cpu_time, .. } => {
                    budget.complete_item(cpu_time);
                    placements.push(TilePlacement {
                        region: i,
                        grid_coords: assignment.grid_coords,
                    });
                    completed_slots.push(assignment.slot);
                    continue;
                }
                JobOutcome::Expired | JobOutcome::Skipped => report.deferred += 1,
                JobOutcome::Failed(source) => {
                    report.deferred += 1;
                    if report.failure.is_none() {
                        report.failure = Some(FillError::Source {
                            key: task.key,
                            source,
                        });
                    }
                }
                JobOutcome::Panicked => {
                    report.deferred += 1;
                    if report.failure.is_none() {
                        report.failure = Some(FillError::WorkerPanicked { key: task.key });
                    }
                }
            }
            cache.release(assignment.slot);
        }

        if !placements.is_empty() {
            chain.submit(queue, buffer, &placements);
            for slot in completed_slots.iter() {
                cache.commit(*slot);
            }
            report.completed += completed_slots.len();
        }

        if report.failure.is_some() {
            break;
        }
        if out_of_tiles {
            report.truncated += tasks.len() - next;
            next = tasks.len();
        }
    }
    report.deferred += tasks.len() - next;
    budget.update_estimate();

    log::debug!(
        "Filled {} blocks, deferred {}, truncated {} in {:?}",
        report.completed,
        report.deferred,
        report.truncated,
        deadline.elapsed()
    );
    report
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
