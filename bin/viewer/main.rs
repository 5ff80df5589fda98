//! Streams a procedural volume through the headless renderer while orbiting the camera, logging what every frame did.
//!
//! Usage: `viewer [config.ron]`

use volstream::volstream_cache::source::{ProceduralStack, Stack};
use volstream::volstream_cache::{SampleType, VolumeId};
use volstream::volstream_core::glam::{IVec3, Mat4, UVec3, Vec3};
use volstream::{HeadlessContext, HeadlessTarget, RenderError, RendererConfig, RepaintType, VolumeRenderer};

use std::sync::Arc;
use std::time::Duration;

const FRAME_MILLIS: u64 = 16;
const NUM_VIEWS: u32 = 8;

fn main() {
    env_logger::init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), RenderError> {
    let config = match std::env::args().nth(1) {
        Some(path) => RendererConfig::read_file(path)?,
        None => RendererConfig::default(),
    };
    log::info!("{:#?}", config);

    let mut ctx = HeadlessContext::new(config.cache.cache_spec());
    let mut target = HeadlessTarget::new(config.render_size());
    let mut renderer = VolumeRenderer::new(config)?;

    let stacks = [setup(config.cache.format)];
    let converters = ["sphere"];

    for view in 0..NUM_VIEWS {
        let pv = orbit_camera(view as f32 / NUM_VIEWS as f32 * std::f32::consts::TAU);
        let mut repaint = RepaintType::Full;
        let mut frames = 0;
        while repaint != RepaintType::None {
            repaint = renderer.draw(
                &mut ctx,
                repaint,
                &mut target,
                &stacks,
                &converters,
                &pv,
                FRAME_MILLIS,
            )?;
            frames += 1;
            log::debug!("{:?}", renderer.last_frame());
        }
        log::info!(
            "View {} settled after {} frames: {} blocks resident, base level {}",
            view,
            frames,
            renderer.cache().num_resident(),
            renderer.volume_blocks()[0].base_level()
        );
    }
    renderer.drain_uploads(&mut ctx);

    Ok(())
}

fn setup(format: SampleType) -> Stack {
    let radius = 100.0;
    let sphere = move |p: IVec3| {
        let d = p.as_vec3().distance(Vec3::splat(128.0));
        (radius - d).max(0.0) * 10.0
    };

    Stack::MultiResolution(Arc::new(ProceduralStack::with_read_delay(
        VolumeId(1),
        UVec3::splat(256),
        4,
        1.0,
        Vec3::splat(-128.0),
        format,
        Arc::new(sphere),
        Duration::from_micros(200),
    )))
}

fn orbit_camera(angle: f32) -> Mat4 {
    let eye = Vec3::new(angle.cos(), 0.4, angle.sin()) * 300.0;
    let proj = Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_3, 1.0, 1.0, 2000.0);
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);

    proj * view
}
