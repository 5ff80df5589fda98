use crate::admission::{admit, AdmissionReport};
use crate::config::RendererConfig;
use crate::dither::{DitherPattern, DitherProgress, RenderPass};
use crate::gpu::{CachedBinding, FrameBindings, GpuContext, NumVolumes, SimpleBinding};
use crate::program::ProgramCache;
use crate::repaint::{Repaint, RepaintType};
use crate::simple_stacks::SimpleStackManager;
use crate::volume_blocks::VolumeBlocks;
use crate::RenderError;

use volstream_cache::source::{MultiResolutionStack, SimpleStack, Stack};
use volstream_cache::{
    is_supported_type, process_fill_tasks, CacheSpec, StagingChain, TextureCache, TileAccess, WorkerPool,
};
use volstream_core::frame_budget::{Deadline, FrameBudget};
use volstream_core::glam::{Mat4, UVec2};

/// What the last [`VolumeRenderer::draw`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    /// The severity the draw acted on.
    pub repaint: RepaintType,
    pub admission: AdmissionReport,
    pub blocks_filled: usize,
    pub blocks_deferred: usize,
    pub blocks_truncated: usize,
    pub fill_failed: bool,
    pub dither_steps: u32,
}

/// State carried from one draw to the next.
#[derive(Default)]
struct RenderState {
    progress: DitherProgress,
    requested: Repaint,
    volume_blocks: Vec<VolumeBlocks>,
    num_volumes: NumVolumes,
    min_world_voxel_size: f32,
    last_frame: FrameStats,
}

struct Classified<'a> {
    cached: Vec<(usize, &'a dyn MultiResolutionStack)>,
    simple: Vec<(usize, &'a dyn SimpleStack)>,
}

/// Renders multi-resolution volumes by streaming the blocks needed for the current view into a texture cache, within a
/// time budget per draw.
///
/// Each [`VolumeRenderer::draw`] acts on a [`RepaintType`] and returns the severity still outstanding, which the caller
/// passes back into the next draw until it becomes [`RepaintType::None`].
pub struct VolumeRenderer<G: GpuContext> {
    config: RendererConfig,
    dither: Option<DitherPattern>,
    num_dither_steps: u32,
    cache: TextureCache,
    chain: StagingChain<G::Fence>,
    pool: WorkerPool,
    tile_access: TileAccess,
    budget: FrameBudget,
    programs: ProgramCache<G::Program>,
    simple_stacks: SimpleStackManager<G::SimpleTexture>,
    state: RenderState,
}

impl<G: GpuContext> VolumeRenderer<G> {
    pub fn new(config: RendererConfig) -> Result<Self, RenderError> {
        config.validate()?;
        let dither = config.dither.pattern()?;
        let num_dither_steps = dither.as_ref().map_or(1, |d| d.num_steps());

        let spec = config.cache.cache_spec();
        let grid = config.cache.grid_size();
        let cache = TextureCache::new(grid, spec);
        let chain = StagingChain::new(
            config.cache.staging.num_buffers,
            config.cache.staging.tiles_per_buffer,
            spec.tile_bytes(),
        );
        let pool = WorkerPool::new(config.cache.worker_threads)?;
        let budget = FrameBudget::new(
            pool.num_threads() as u32,
            config.cache.initial_fill_time_estimate_us,
        );
        log::info!(
            "Texture cache of {}x{}x{} tiles ({} blocks of {}^3 {:?}), {} dither steps, {} fill workers",
            grid.x,
            grid.y,
            grid.z,
            cache.capacity(),
            config.cache.block_size,
            config.cache.format,
            num_dither_steps,
            pool.num_threads()
        );

        Ok(Self {
            config,
            dither,
            num_dither_steps,
            cache,
            chain,
            pool,
            tile_access: TileAccess::new(),
            budget,
            programs: ProgramCache::default(),
            simple_stacks: SimpleStackManager::default(),
            state: RenderState {
                min_world_voxel_size: f32::INFINITY,
                ..Default::default()
            },
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn cache(&self) -> &TextureCache {
        &self.cache
    }

    /// Direct access to the cache, e.g. to evict blocks whose source data changed. Request a
    /// [`RepaintType::Load`] afterwards.
    pub fn cache_mut(&mut self) -> &mut TextureCache {
        &mut self.cache
    }

    pub fn num_dither_steps(&self) -> u32 {
        self.num_dither_steps
    }

    pub fn dither_progress(&self) -> DitherProgress {
        self.state.progress
    }

    /// Per-volume block selection of the multi-resolution volumes, in draw order.
    pub fn volume_blocks(&self) -> &[VolumeBlocks] {
        &self.state.volume_blocks
    }

    pub fn min_world_voxel_size(&self) -> f32 {
        self.state.min_world_voxel_size
    }

    pub fn last_frame(&self) -> &FrameStats {
        &self.state.last_frame
    }

    /// Queues a repaint for the next draw. Requests accumulate to the most severe one.
    pub fn request_repaint(&mut self, severity: RepaintType) {
        self.state.requested.request(severity);
    }

    pub fn pending_repaint(&self) -> RepaintType {
        self.state.requested.pending()
    }

    /// Waits for all tile uploads in flight.
    pub fn drain_uploads(&mut self, ctx: &mut G) {
        self.chain.drain(ctx);
    }

    /// Draws `stacks` into `target`, spending roughly `max_millis` milliseconds.
    ///
    /// `converters[i]` is handed to the program along with `stacks[i]`. On a [`RepaintType::Full`] or
    /// [`RepaintType::Load`] the required blocks are recomputed and loaded first; the remaining time goes to dither
    /// steps, of which at least one is drawn. Returns the repaint still needed: [`RepaintType::Load`] if blocks are
    /// missing or were evicted since the lookup tables were built, [`RepaintType::Dither`] if refinement is incomplete,
    /// otherwise [`RepaintType::None`].
    ///
    /// A draw that fails leaves queued repaints in place.
    #[allow(clippy::too_many_arguments)]
    pub fn draw<C>(
        &mut self,
        ctx: &mut G,
        requested: RepaintType,
        target: &mut G::Target,
        stacks: &[Stack],
        converters: &[C],
        pv: &Mat4,
        max_millis: u64,
    ) -> Result<RepaintType, RenderError> {
        let deadline = Deadline::after_millis(max_millis);
        let repaint = requested.max(self.state.requested.pending());

        if converters.len() < stacks.len() {
            return Err(RenderError::MissingConverter {
                index: converters.len(),
            });
        }
        let classified = if repaint.updates_blocks() {
            Some(classify(stacks, self.cache.spec())?)
        } else {
            None
        };
        if let Some(classified) = classified.as_ref() {
            for &(_, stack) in classified.simple.iter() {
                self.simple_stacks.upload(ctx, stack)?;
            }
        }
        self.state.requested.take();

        let mut stats = FrameStats {
            repaint,
            ..Default::default()
        };
        let mut outstanding = Repaint::default();

        match repaint {
            RepaintType::Full => self.state.progress.reset(self.num_dither_steps),
            RepaintType::Load => self.state.progress.extend(self.num_dither_steps),
            _ => {}
        }

        if let Some(classified) = classified {
            let complete = self.update_blocks(
                ctx,
                &classified.cached,
                repaint == RepaintType::Full,
                pv,
                &deadline,
                &mut stats,
            );
            if !complete {
                outstanding.request(RepaintType::Load);
            }
            self.bind_volumes(ctx, &classified, converters, pv);
        } else if self
            .state
            .volume_blocks
            .iter()
            .any(|v| v.lookup_table().is_stale(&self.cache))
        {
            log::debug!("Lookup tables reference evicted blocks");
            outstanding.request(RepaintType::Load);
        }

        self.draw_steps(ctx, target, &deadline, &mut outstanding, &mut stats);

        log::debug!(
            "Drew {:?} in {:?}: {} blocks filled, {} dither steps, {:?} outstanding",
            repaint,
            deadline.elapsed(),
            stats.blocks_filled,
            stats.dither_steps,
            outstanding.pending()
        );
        self.state.last_frame = stats;

        Ok(outstanding.pending())
    }

    /// Selects, admits and loads the blocks of every cached volume, then rebuilds their lookup tables. Returns whether
    /// every required block is resident.
    fn update_blocks(
        &mut self,
        ctx: &mut G,
        stacks: &[(usize, &dyn MultiResolutionStack)],
        reset: bool,
        pv: &Mat4,
        deadline: &Deadline,
        stats: &mut FrameStats,
    ) -> bool {
        let spec = *self.cache.spec();
        let max_voxel_pixels = self.config.max_voxel_pixels;
        let viewport_width = self.config.render_width;

        let blocks = &mut self.state.volume_blocks;
        blocks.truncate(stacks.len());
        while blocks.len() < stacks.len() {
            blocks.push(VolumeBlocks::new(spec, max_voxel_pixels));
        }
        for (volume, &(_, stack)) in blocks.iter_mut().zip(stacks) {
            if reset || !volume.is_bound() || volume.volume_id() != stack.volume_id() {
                volume.init(stack, viewport_width, pv);
            } else {
                volume.update(stack, viewport_width, pv);
            }
        }

        let mut admitted: Vec<&mut VolumeBlocks> = blocks.iter_mut().collect();
        stats.admission = admit(&mut admitted, self.cache.capacity());

        self.cache.begin_frame();
        for volume in blocks.iter() {
            volume.touch_required(&mut self.cache);
        }
        let tasks = blocks
            .iter()
            .flat_map(|volume| volume.fill_tasks(&self.cache))
            .collect();
        let report = process_fill_tasks(
            &mut self.cache,
            &mut self.chain,
            ctx,
            &self.pool,
            &self.tile_access,
            &mut self.budget,
            tasks,
            deadline,
        );
        if let Some(error) = report.failure.as_ref() {
            log::error!("Block fill aborted: {} ({:?})", error, error);
        }
        stats.blocks_filled = report.completed;
        stats.blocks_deferred = report.deferred;
        stats.blocks_truncated = report.truncated;
        stats.fill_failed = report.failure.is_some();

        let mut complete = report.is_complete();
        for (lut_index, volume) in blocks.iter_mut().enumerate() {
            complete &= volume.make_lut(&mut self.cache);
            ctx.upload_lookup_table(lut_index, volume.lookup_table());
        }

        complete
    }

    fn bind_volumes<C>(
        &mut self,
        ctx: &mut G,
        classified: &Classified<'_>,
        converters: &[C],
        pv: &Mat4,
    ) {
        self.simple_stacks.free_unused(ctx);

        let cached: Vec<CachedBinding<'_, C>> = classified
            .cached
            .iter()
            .zip(self.state.volume_blocks.iter())
            .enumerate()
            .map(|(lut_index, (&(stack_index, _), volume))| CachedBinding {
                volume: volume.volume_id(),
                lut_index,
                base_level: volume.base_level(),
                converter: &converters[stack_index],
            })
            .collect();
        let simple: Vec<SimpleBinding<'_, G::SimpleTexture, C>> = classified
            .simple
            .iter()
            .filter_map(|&(stack_index, stack)| {
                let volume = self.simple_stacks.get(stack.volume_id())?;
                Some(SimpleBinding {
                    volume: stack.volume_id(),
                    texture: &volume.texture,
                    source_to_world: volume.source_to_world,
                    converter: &converters[stack_index],
                })
            })
            .collect();

        let min_world_voxel_size = self
            .state
            .volume_blocks
            .iter()
            .map(|v| v.base_level_voxel_size_in_world())
            .chain(
                simple
                    .iter()
                    .filter_map(|b| self.simple_stacks.get(b.volume))
                    .map(|v| v.voxel_size_in_world),
            )
            .fold(f32::INFINITY, f32::min);
        self.state.min_world_voxel_size = min_world_voxel_size;

        let bindings = FrameBindings {
            cached,
            simple,
            min_world_voxel_size,
            pv: *pv,
        };
        let num_volumes = bindings.num_volumes();
        self.state.num_volumes = num_volumes;
        if let Some(program) = self
            .programs
            .get_or_create(num_volumes, |n| ctx.create_program(n))
        {
            ctx.bind_volumes(program, &bindings);
        }
    }

    fn draw_steps(
        &mut self,
        ctx: &mut G,
        target: &mut G::Target,
        deadline: &Deadline,
        outstanding: &mut Repaint,
        stats: &mut FrameStats,
    ) {
        let program = match self.programs.get(self.state.num_volumes) {
            Some(p) => p,
            None => return,
        };
        let render_size = UVec2::new(self.config.render_width, self.config.render_height);
        let progress = &mut self.state.progress;

        match self.dither.as_ref() {
            Some(pattern) => {
                if !progress.is_complete() {
                    loop {
                        ctx.draw_pass(program, target, &pattern.pass(progress.step(), render_size));
                        ctx.finish();
                        progress.advance();
                        stats.dither_steps += 1;
                        if progress.is_complete() || deadline.is_expired() {
                            break;
                        }
                    }
                }
                let steps_completed = progress.steps_completed(self.num_dither_steps);
                ctx.composite(target, &pattern.weights(steps_completed));
                if !progress.is_complete() {
                    outstanding.request(RepaintType::Dither);
                }
            }
            None => {
                ctx.draw_pass(program, target, &RenderPass::full(render_size));
                ctx.finish();
                while !progress.is_complete() {
                    progress.advance();
                }
                stats.dither_steps += 1;
            }
        }
    }
}

/// Splits `stacks` by kind, rejecting multi-resolution stacks the cache cannot hold.
fn classify<'a>(stacks: &'a [Stack], spec: &CacheSpec) -> Result<Classified<'a>, RenderError> {
    let mut classified = Classified {
        cached: Vec::new(),
        simple: Vec::new(),
    };
    for (index, stack) in stacks.iter().enumerate() {
        match stack {
            Stack::MultiResolution(s) => {
                let found = s.sample_type();
                if !is_supported_type(spec, found) {
                    return Err(RenderError::UnsupportedSampleType {
                        index,
                        found,
                        expected: spec.format,
                    });
                }
                classified.cached.push((index, s.as_ref()));
            }
            Stack::Simple(s) => classified.simple.push((index, s.as_ref())),
        }
    }
    Ok(classified)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::DitherConfig;
    use crate::headless::{HeadlessContext, HeadlessTarget};
    use crate::lookup_table::LutEntry;

    use std::sync::Arc;
    use volstream_cache::source::{ProceduralStack, ResolutionLevel, SourceError};
    use volstream_cache::{BlockKey, CacheConfig, SampleType, StagingConfig, VolumeId};
    use volstream_core::extent::Extent3i;
    use volstream_core::glam::{IVec3, UVec3, Vec3};

    const GENEROUS_MILLIS: u64 = 10_000;

    fn config(dither_width: u32) -> RendererConfig {
        RendererConfig {
            render_width: 64,
            render_height: 64,
            dither: DitherConfig {
                width: dither_width,
                step: 1,
                num_samples: 4,
            },
            max_voxel_pixels: 1.0,
            cache: CacheConfig {
                block_size: 8,
                format: SampleType::U16,
                max_cache_size_mb: 1,
                staging: StagingConfig {
                    num_buffers: 2,
                    tiles_per_buffer: 16,
                },
                worker_threads: Some(2),
                ..Default::default()
            },
        }
    }

    fn procedural(id: u64, size: u32, num_levels: usize, origin: Vec3) -> Stack {
        Stack::MultiResolution(Arc::new(ProceduralStack::new(
            VolumeId(id),
            UVec3::splat(size),
            num_levels,
            1.0,
            origin,
            SampleType::U16,
            Arc::new(|p: IVec3| (p.x + p.y + p.z) as f32),
        )))
    }

    fn camera(distance: f32) -> Mat4 {
        let proj = Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 1000.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, distance), Vec3::ZERO, Vec3::Y);
        proj * view
    }

    struct Harness {
        renderer: VolumeRenderer<HeadlessContext>,
        ctx: HeadlessContext,
        target: HeadlessTarget,
        stacks: Vec<Stack>,
        converters: Vec<&'static str>,
        pv: Mat4,
    }

    impl Harness {
        fn new(config: RendererConfig, stacks: Vec<Stack>) -> Self {
            Self::with_upload_latency(config, stacks, 0)
        }

        fn with_upload_latency(config: RendererConfig, stacks: Vec<Stack>, latency: u64) -> Self {
            let ctx = HeadlessContext::with_upload_latency(config.cache.cache_spec(), latency);
            let target = HeadlessTarget::new(config.render_size());
            let converters = vec!["gray"; stacks.len()];
            Self {
                renderer: VolumeRenderer::new(config).unwrap(),
                ctx,
                target,
                stacks,
                converters,
                pv: camera(40.0),
            }
        }

        fn draw(&mut self, repaint: RepaintType, max_millis: u64) -> RepaintType {
            let outstanding = self
                .renderer
                .draw(
                    &mut self.ctx,
                    repaint,
                    &mut self.target,
                    &self.stacks,
                    &self.converters,
                    &self.pv,
                    max_millis,
                )
                .unwrap();
            self.check_invariants();
            outstanding
        }

        fn check_invariants(&self) {
            let progress = self.renderer.dither_progress();
            assert!(progress.step() <= progress.target());
            let cache = self.renderer.cache();
            assert!(cache.num_resident() + cache.num_pending() <= cache.capacity());
            assert_eq!(cache.num_pending(), 0);
        }
    }

    #[test]
    fn full_repaint_with_enough_time_settles() {
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0))]);
        assert_eq!(h.draw(RepaintType::Full, GENEROUS_MILLIS), RepaintType::None);

        let progress = h.renderer.dither_progress();
        assert_eq!((progress.step(), progress.target()), (4, 4));
        assert_eq!(h.target.composites, vec![4]);
        assert_eq!(h.ctx.passes.len(), 4);

        let bound = h.ctx.bound.as_ref().unwrap();
        assert_eq!(bound.cached, vec![VolumeId(1)]);
        assert_eq!(h.ctx.programs_created.len(), 1);
        assert!(h.ctx.lookup_table(0).is_some());
        assert!(h.renderer.cache().num_resident() > 0);
        assert_eq!(h.ctx.num_tile_uploads, h.renderer.cache().num_resident());
    }

    #[test]
    fn zero_budget_defers_work_without_stranding_slots() {
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0))]);
        assert_eq!(h.draw(RepaintType::Full, 0), RepaintType::Load);
        assert_eq!(h.renderer.last_frame().blocks_filled, 0);
        assert!(h.renderer.last_frame().blocks_deferred > 0);
        // At least one dither step is always drawn.
        assert_eq!(h.renderer.dither_progress().step(), 1);

        // The caller feeds the outstanding repaint back until the renderer settles.
        let mut repaint = RepaintType::Load;
        for _ in 0..10 {
            repaint = h.draw(repaint, GENEROUS_MILLIS);
            if repaint == RepaintType::None {
                break;
            }
        }
        assert_eq!(repaint, RepaintType::None);
    }

    #[test]
    fn zero_budget_dither_steps_are_monotonic_until_full_reset() {
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0))]);
        h.draw(RepaintType::Full, GENEROUS_MILLIS);
        h.draw(RepaintType::Full, 0);
        assert_eq!(h.renderer.dither_progress().step(), 1);

        let mut last = 1;
        for _ in 0..3 {
            h.draw(RepaintType::Dither, 0);
            let step = h.renderer.dither_progress().step();
            assert!(step >= last);
            last = step;
        }
        assert_eq!(last, 4);
        assert_eq!(h.draw(RepaintType::Dither, 0), RepaintType::None);

        h.draw(RepaintType::Full, 0);
        assert_eq!(h.renderer.dither_progress().step(), 1);
    }

    #[test]
    fn load_extends_the_dither_target() {
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0))]);
        h.draw(RepaintType::Full, GENEROUS_MILLIS);
        h.draw(RepaintType::Load, 0);
        let progress = h.renderer.dither_progress();
        assert_eq!((progress.step(), progress.target()), (5, 8));
        // Composites never use more than one cycle of steps.
        assert_eq!(h.target.composites.last(), Some(&4));
    }

    #[test]
    fn disabled_dithering_draws_full_passes_only() {
        let mut h = Harness::new(config(1), vec![procedural(1, 32, 3, Vec3::splat(-16.0))]);
        assert_eq!(h.renderer.num_dither_steps(), 1);

        let first = h.draw(RepaintType::Full, 0);
        assert_ne!(first, RepaintType::Dither);
        for repaint in [RepaintType::Load, RepaintType::Load, RepaintType::Full] {
            let outstanding = h.draw(repaint, GENEROUS_MILLIS);
            assert_ne!(outstanding, RepaintType::Dither);
        }
        assert_eq!(h.target.full_passes, 4);
        assert!(h.target.composites.is_empty());
        assert!(h.ctx.passes.iter().all(|p| p.stride == 1));
    }

    #[test]
    fn queued_requests_are_not_downgraded() {
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0))]);
        h.renderer.request_repaint(RepaintType::Full);
        h.renderer.request_repaint(RepaintType::Scene);
        assert_eq!(h.renderer.pending_repaint(), RepaintType::Full);

        h.draw(RepaintType::Scene, GENEROUS_MILLIS);
        assert_eq!(h.renderer.last_frame().repaint, RepaintType::Full);
        assert_eq!(h.renderer.pending_repaint(), RepaintType::None);
    }

    #[test]
    fn evicted_block_becomes_unmapped_until_reloaded() {
        // A single level, so there is no coarser block to fall back to.
        let mut h = Harness::new(config(2), vec![procedural(1, 16, 1, Vec3::splat(-8.0))]);
        assert_eq!(h.draw(RepaintType::Full, GENEROUS_MILLIS), RepaintType::None);

        let block = h.renderer.volume_blocks()[0].required_blocks()[0];
        let key = BlockKey::new(VolumeId(1), block.level, block.coords);
        let tile = h.renderer.cache().get(&key).unwrap();
        assert_eq!(h.ctx.lookup_table(0).unwrap().get(block.coords).tile(), tile.grid_coords);

        assert!(h.renderer.cache_mut().evict(&key));
        assert_eq!(h.draw(RepaintType::Load, 0), RepaintType::Load);
        assert_eq!(h.ctx.lookup_table(0).unwrap().get(block.coords), LutEntry::UNMAPPED);

        assert_eq!(h.draw(RepaintType::Load, GENEROUS_MILLIS), RepaintType::None);
        assert!(h.ctx.lookup_table(0).unwrap().get(block.coords).is_mapped());
    }

    #[test]
    fn two_volumes_over_capacity_are_coarsened_to_fit() {
        let mut config = config(2);
        // 16^3 u16 blocks in 1 MB: 80 tiles.
        config.cache.block_size = 16;
        config.max_voxel_pixels = 0.01;
        let mut h = Harness::new(
            config,
            vec![
                procedural(1, 64, 3, Vec3::new(-70.0, -32.0, -32.0)),
                procedural(2, 64, 3, Vec3::new(6.0, -32.0, -32.0)),
            ],
        );
        h.pv = camera(300.0);
        assert_eq!(h.renderer.cache().capacity(), 80);

        h.draw(RepaintType::Full, GENEROUS_MILLIS);
        let blocks = h.renderer.volume_blocks();
        let total: usize = blocks.iter().map(|b| b.num_required()).sum();
        assert!(total <= 80);
        assert!(blocks.iter().any(|b| b.base_level() > 0));
        assert!(h.renderer.last_frame().admission.coarsened > 0);
        assert_eq!(h.renderer.last_frame().admission.truncated, 0);
    }

    #[test]
    fn slow_uploads_apply_backpressure() {
        let mut config = config(2);
        config.cache.staging = StagingConfig {
            num_buffers: 1,
            tiles_per_buffer: 4,
        };
        let mut h = Harness::with_upload_latency(config, vec![procedural(1, 32, 3, Vec3::splat(-16.0))], 3);
        assert_eq!(h.draw(RepaintType::Full, GENEROUS_MILLIS), RepaintType::None);
        assert!(h.ctx.num_waits > 0);
    }

    /// A level whose reads always fail.
    struct BrokenLevel;

    impl ResolutionLevel for BrokenLevel {
        fn dimensions(&self) -> UVec3 {
            UVec3::splat(16)
        }

        fn source_to_world(&self) -> Mat4 {
            Mat4::from_translation(Vec3::splat(-8.0))
        }

        fn sample_type(&self) -> SampleType {
            SampleType::U16
        }

        fn read_region(&self, _region: Extent3i, _dst: &mut [u8]) -> Result<(), SourceError> {
            Err(SourceError::Read {
                key: None,
                message: "device unplugged".into(),
            })
        }
    }

    struct BrokenStack {
        levels: Vec<Arc<dyn ResolutionLevel>>,
    }

    impl MultiResolutionStack for BrokenStack {
        fn volume_id(&self) -> VolumeId {
            VolumeId(9)
        }

        fn levels(&self) -> &[Arc<dyn ResolutionLevel>] {
            &self.levels
        }
    }

    #[test]
    fn fill_failure_requests_load() {
        let broken = Stack::MultiResolution(Arc::new(BrokenStack {
            levels: vec![Arc::new(BrokenLevel)],
        }));
        let mut h = Harness::new(config(1), vec![broken]);
        assert_eq!(h.draw(RepaintType::Full, GENEROUS_MILLIS), RepaintType::Load);
        assert!(h.renderer.last_frame().fill_failed);
        assert_eq!(h.renderer.cache().num_resident(), 0);
    }

    #[test]
    fn mismatched_sample_type_fails_before_drawing() {
        let u8_stack = Stack::MultiResolution(Arc::new(ProceduralStack::new(
            VolumeId(4),
            UVec3::splat(16),
            1,
            1.0,
            Vec3::ZERO,
            SampleType::U8,
            Arc::new(|_: IVec3| 0.0f32),
        )));
        let mut h = Harness::new(config(2), vec![procedural(1, 16, 1, Vec3::ZERO), u8_stack]);
        h.renderer.request_repaint(RepaintType::Full);
        let result = h.renderer.draw(
            &mut h.ctx,
            RepaintType::None,
            &mut h.target,
            &h.stacks,
            &h.converters,
            &h.pv,
            GENEROUS_MILLIS,
        );
        assert!(matches!(
            result,
            Err(RenderError::UnsupportedSampleType {
                index: 1,
                found: SampleType::U8,
                expected: SampleType::U16
            })
        ));
        assert!(h.ctx.passes.is_empty());
        // The failed request stays queued.
        assert_eq!(h.renderer.pending_repaint(), RepaintType::Full);
    }

    #[test]
    fn missing_converter_is_an_error() {
        let mut h = Harness::new(config(2), vec![procedural(1, 16, 1, Vec3::ZERO)]);
        let result = h.renderer.draw::<&str>(
            &mut h.ctx,
            RepaintType::Full,
            &mut h.target,
            &h.stacks,
            &[],
            &h.pv,
            GENEROUS_MILLIS,
        );
        assert!(matches!(result, Err(RenderError::MissingConverter { index: 0 })));
    }

    #[test]
    fn simple_volumes_bind_without_the_cache() {
        let simple = Stack::Simple(Arc::new(ProceduralStack::new(
            VolumeId(5),
            UVec3::splat(8),
            1,
            0.25,
            Vec3::ZERO,
            SampleType::U8,
            Arc::new(|_: IVec3| 1.0f32),
        )));
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0)), simple]);
        assert_eq!(h.draw(RepaintType::Full, GENEROUS_MILLIS), RepaintType::None);

        let bound = h.ctx.bound.as_ref().unwrap();
        assert_eq!(bound.simple, vec![VolumeId(5)]);
        assert_eq!(bound.min_world_voxel_size, 0.25);
        assert_eq!(h.ctx.num_simple_uploads, 1);

        // Uploaded once, freed when no longer drawn.
        h.draw(RepaintType::Full, GENEROUS_MILLIS);
        assert_eq!(h.ctx.num_simple_uploads, 1);
        h.stacks.pop();
        h.converters.pop();
        h.draw(RepaintType::Full, GENEROUS_MILLIS);
        assert_eq!(h.ctx.num_simple_frees, 1);
        assert_eq!(h.ctx.programs_created.len(), 2);
    }

    /// A level without data, placed by an arbitrary transform.
    struct BlankLevel {
        dimensions: UVec3,
        source_to_world: Mat4,
    }

    impl ResolutionLevel for BlankLevel {
        fn dimensions(&self) -> UVec3 {
            self.dimensions
        }

        fn source_to_world(&self) -> Mat4 {
            self.source_to_world
        }

        fn sample_type(&self) -> SampleType {
            SampleType::U16
        }

        fn read_region(&self, _region: Extent3i, dst: &mut [u8]) -> Result<(), SourceError> {
            dst.fill(0);
            Ok(())
        }
    }

    struct LevelStack {
        id: VolumeId,
        levels: Vec<Arc<dyn ResolutionLevel>>,
    }

    impl MultiResolutionStack for LevelStack {
        fn volume_id(&self) -> VolumeId {
            self.id
        }

        fn levels(&self) -> &[Arc<dyn ResolutionLevel>] {
            &self.levels
        }
    }

    #[test]
    fn half_voxel_offset_levels_settle() {
        let origin = Mat4::from_translation(Vec3::splat(-16.0));
        let stack = Stack::MultiResolution(Arc::new(LevelStack {
            id: VolumeId(6),
            levels: vec![
                Arc::new(BlankLevel {
                    dimensions: UVec3::splat(32),
                    source_to_world: origin,
                }),
                Arc::new(BlankLevel {
                    dimensions: UVec3::splat(16),
                    source_to_world: origin
                        * Mat4::from_translation(Vec3::splat(0.5))
                        * Mat4::from_scale(Vec3::splat(2.0)),
                }),
            ],
        }));
        let mut config = config(2);
        config.max_voxel_pixels = 6.0;
        let mut h = Harness::new(config, vec![stack]);

        for distance in [100.0, 120.0] {
            h.pv = camera(distance);
            let mut repaint = RepaintType::Full;
            for _ in 0..5 {
                repaint = h.draw(repaint, GENEROUS_MILLIS);
                if repaint == RepaintType::None {
                    break;
                }
            }
            assert_eq!(repaint, RepaintType::None);
        }
    }

    #[test]
    fn scene_and_dither_draws_leave_blocks_alone() {
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0))]);
        assert_eq!(h.draw(RepaintType::Full, GENEROUS_MILLIS), RepaintType::None);
        let progress = h.renderer.dither_progress();
        assert_eq!(h.draw(RepaintType::Scene, GENEROUS_MILLIS), RepaintType::None);
        assert_eq!(h.renderer.dither_progress(), progress);

        let uploads = h.ctx.num_tile_uploads;
        let lut = h.ctx.lookup_table(0).unwrap().clone();
        let volume = &h.renderer.volume_blocks()[0];
        let (base_level, num_required) = (volume.base_level(), volume.num_required());
        let key = volume.block_key(&volume.required_blocks()[0]);
        assert!(h.renderer.cache_mut().evict(&key));

        for repaint in [RepaintType::Scene, RepaintType::Dither] {
            // The eviction is only repaired by the next load.
            assert_eq!(h.draw(repaint, GENEROUS_MILLIS), RepaintType::Load);
            assert_eq!(h.renderer.last_frame().blocks_filled, 0);
            assert_eq!(h.ctx.num_tile_uploads, uploads);
            let uploaded = h.ctx.lookup_table(0).unwrap();
            assert_eq!(uploaded.entries(), lut.entries());
            assert_eq!(uploaded.cache_generation(), lut.cache_generation());
            let volume = &h.renderer.volume_blocks()[0];
            assert_eq!((volume.base_level(), volume.num_required()), (base_level, num_required));
        }

        assert_eq!(h.draw(RepaintType::Load, GENEROUS_MILLIS), RepaintType::None);
        assert_eq!(h.ctx.num_tile_uploads, uploads + 1);
    }

    struct BrokenSimpleStack {
        level: BrokenLevel,
    }

    impl SimpleStack for BrokenSimpleStack {
        fn volume_id(&self) -> VolumeId {
            VolumeId(8)
        }

        fn level(&self) -> &dyn ResolutionLevel {
            &self.level
        }
    }

    #[test]
    fn failed_simple_upload_keeps_the_request_queued() {
        let broken = Stack::Simple(Arc::new(BrokenSimpleStack { level: BrokenLevel }));
        let mut h = Harness::new(config(2), vec![procedural(1, 32, 3, Vec3::splat(-16.0)), broken]);
        h.renderer.request_repaint(RepaintType::Full);
        let result = h.renderer.draw(
            &mut h.ctx,
            RepaintType::None,
            &mut h.target,
            &h.stacks,
            &h.converters,
            &h.pv,
            GENEROUS_MILLIS,
        );
        assert!(matches!(result, Err(RenderError::SimpleVolume(_))));
        assert_eq!(h.renderer.pending_repaint(), RepaintType::Full);
        assert_eq!(h.renderer.dither_progress(), DitherProgress::default());
        assert_eq!(h.ctx.num_tile_uploads, 0);
        assert!(h.ctx.passes.is_empty());
    }
}
