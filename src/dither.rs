//! Progressive rendering with sub-pixel jitter.
//!
//! A full-resolution frame is split into `width * width` low-resolution passes. Pass `i` renders every `width`-th pixel
//! starting at one cell of the `width x width` sub-pixel grid. After any number of passes, the frame is reconstructed
//! by weighting the nearest completed samples of each pixel, so the image sharpens as passes accumulate.

use crate::ConfigError;

use float_ord::FloatOrd;
use smallvec::SmallVec;
use volstream_core::glam::{IVec2, UVec2};

/// One draw of the volume shader.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RenderPass {
    /// Index of the low-resolution buffer this pass renders into.
    pub index: u32,
    /// Sub-pixel cell sampled by this pass, in full-resolution pixels.
    pub offset: UVec2,
    /// Size of the rendered viewport.
    pub viewport: UVec2,
    /// Distance between neighbouring samples of this pass, in full-resolution pixels.
    pub stride: u32,
}

impl RenderPass {
    /// A single pass at full resolution, used when dithering is disabled.
    pub fn full(render_size: UVec2) -> Self {
        Self {
            index: 0,
            offset: UVec2::ZERO,
            viewport: render_size,
            stride: 1,
        }
    }
}

/// One contribution to a reconstructed pixel.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DitherSample {
    /// The pass that produced the sample.
    pub pass: u32,
    /// Offset, in low-resolution pixels, from the pixel's own block to the block holding the sample.
    pub block_offset: IVec2,
    pub weight: f32,
}

/// Reconstruction weights for every cell of the sub-pixel grid, in row-major cell order.
#[derive(Clone, Debug, PartialEq)]
pub struct DitherWeights {
    pub width: u32,
    pub steps_completed: u32,
    pub cells: Vec<SmallVec<[DitherSample; 8]>>,
}

impl DitherWeights {
    pub fn cell(&self, cell: UVec2) -> &[DitherSample] {
        &self.cells[(cell.y * self.width + cell.x) as usize]
    }
}

/// The order in which the sub-pixel cells are visited, and how they are recombined.
#[derive(Clone, Debug)]
pub struct DitherPattern {
    width: u32,
    step: u32,
    num_samples: usize,
}

impl DitherPattern {
    /// `step` must be coprime to `width^2`, so that stepping visits every cell exactly once.
    pub fn new(width: u32, step: u32, num_samples: usize) -> Result<Self, ConfigError> {
        if width < 2 {
            return Err(ConfigError::Invalid(format!(
                "dither width {} is too small, use 1 or less to disable dithering",
                width
            )));
        }
        if num_samples == 0 {
            return Err(ConfigError::Invalid("dither needs at least one sample".into()));
        }
        let num_steps = width * width;
        if gcd(step % num_steps, num_steps) != 1 {
            return Err(ConfigError::Invalid(format!(
                "dither step {} is not coprime to {}",
                step, num_steps
            )));
        }
        Ok(Self {
            width,
            step,
            num_samples,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn num_steps(&self) -> u32 {
        self.width * self.width
    }

    /// The sub-pixel cell sampled by pass `i`.
    pub fn cell(&self, i: u32) -> UVec2 {
        let n = self.num_steps();
        let position = ((i % n) as u64 * self.step as u64 % n as u64) as u32;
        UVec2::new(position % self.width, position / self.width)
    }

    pub fn viewport(&self, render_size: UVec2) -> UVec2 {
        (render_size + UVec2::splat(self.width - 1)) / self.width
    }

    pub fn pass(&self, i: u32, render_size: UVec2) -> RenderPass {
        let index = i % self.num_steps();
        RenderPass {
            index,
            offset: self.cell(index),
            viewport: self.viewport(render_size),
            stride: self.width,
        }
    }

    /// Weights that reconstruct every cell from the first `steps_completed` passes.
    pub fn weights(&self, steps_completed: u32) -> DitherWeights {
        let steps = steps_completed.min(self.num_steps());
        let w = self.width as i32;
        // Samples are spaced roughly this far apart once `steps` passes are done.
        let spacing = (self.num_steps() as f32 / steps.max(1) as f32).sqrt();
        let two_sigma_sq = 2.0 * spacing * spacing;

        let cells = (0..self.num_steps())
            .map(|c| {
                let target = IVec2::new((c % self.width) as i32, (c / self.width) as i32);
                let mut candidates: Vec<(i32, DitherSample)> = Vec::with_capacity(steps as usize * 9);
                for pass in 0..steps {
                    let cell = self.cell(pass).as_ivec2();
                    for dy in -1..=1 {
                        for dx in -1..=1 {
                            let block_offset = IVec2::new(dx, dy);
                            let d = cell + block_offset * w - target;
                            candidates.push((
                                d.length_squared(),
                                DitherSample {
                                    pass,
                                    block_offset,
                                    weight: 0.0,
                                },
                            ));
                        }
                    }
                }
                candidates.sort_by_key(|(dist_sq, s)| (*dist_sq, s.pass, s.block_offset.y, s.block_offset.x));

                let mut samples: SmallVec<[DitherSample; 8]> = SmallVec::new();
                match candidates.first() {
                    None => {}
                    Some(&(0, exact)) => samples.push(DitherSample {
                        weight: 1.0,
                        ..exact
                    }),
                    Some(_) => {
                        for &(dist_sq, sample) in candidates.iter().take(self.num_samples) {
                            samples.push(DitherSample {
                                weight: (-(dist_sq as f32) / two_sigma_sq).exp(),
                                ..sample
                            });
                        }
                        let total: f32 = samples.iter().map(|s| s.weight).sum();
                        for s in samples.iter_mut() {
                            s.weight /= total;
                        }
                        samples.sort_by_key(|s| (std::cmp::Reverse(FloatOrd(s.weight)), s.pass));
                    }
                }
                samples
            })
            .collect();

        DitherWeights {
            width: self.width,
            steps_completed: steps,
            cells,
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// How many dither steps are done and how many are wanted.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DitherProgress {
    step: u32,
    target: u32,
}

impl DitherProgress {
    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// Starts over with one full cycle.
    pub fn reset(&mut self, num_steps: u32) {
        self.step = 0;
        self.target = num_steps;
    }

    /// Appends a full cycle on top of the progress so far.
    pub fn extend(&mut self, num_steps: u32) {
        self.target = self.step + num_steps;
    }

    pub fn advance(&mut self) {
        if self.step < self.target {
            self.step += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.step >= self.target
    }

    pub fn steps_completed(&self, num_steps: u32) -> u32 {
        self.step.min(num_steps)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
