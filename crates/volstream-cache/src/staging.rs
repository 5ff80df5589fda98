use volstream_core::frame_budget::Deadline;
use volstream_core::glam::UVec3;

/// Where one tile of a staging buffer lands in the atlas.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TilePlacement {
    /// Index of the tile region within the staging buffer.
    pub region: usize,
    /// Position of the destination tile in the atlas grid.
    pub grid_coords: UVec3,
}

/// The device side of tile uploads.
///
/// An upload copies regions of a staging buffer into atlas tiles. The copy is asynchronous; the returned fence
/// signals once the staging memory may be overwritten.
pub trait UploadQueue {
    type Fence;

    /// Records copies of the `placements` regions of `data` into the atlas. Every region is exactly one tile.
    fn upload_tiles(&mut self, data: &[u8], placements: &[TilePlacement]) -> Self::Fence;

    fn is_signaled(&self, fence: &Self::Fence) -> bool;

    /// Blocks until `fence` signals.
    fn wait(&mut self, fence: &Self::Fence);
}

enum BufferState<F> {
    Free,
    InFlight(F),
}

struct StagingBuffer<F> {
    data: Vec<u8>,
    state: BufferState<F>,
    /// Order of submission, used to find the oldest buffer in flight.
    submitted: u64,
}

/// A ring of staging buffers, each holding up to `tiles_per_buffer` tiles.
///
/// Workers write tile data into the regions of a claimed buffer; the buffer is then handed to the [`UploadQueue`] and
/// stays in flight until its fence signals.
pub struct StagingChain<F> {
    buffers: Vec<StagingBuffer<F>>,
    tile_bytes: usize,
    tiles_per_buffer: usize,
    submissions: u64,
}

impl<F> StagingChain<F> {
    pub fn new(num_buffers: usize, tiles_per_buffer: usize, tile_bytes: usize) -> Self {
        let num_buffers = num_buffers.max(1);
        let tiles_per_buffer = tiles_per_buffer.max(1);
        Self {
            buffers: (0..num_buffers)
                .map(|_| StagingBuffer {
                    data: vec![0; tiles_per_buffer * tile_bytes],
                    state: BufferState::Free,
                    submitted: 0,
                })
                .collect(),
            tile_bytes,
            tiles_per_buffer,
            submissions: 0,
        }
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn tiles_per_buffer(&self) -> usize {
        self.tiles_per_buffer
    }

    pub fn tile_bytes(&self) -> usize {
        self.tile_bytes
    }

    pub fn num_in_flight(&self) -> usize {
        self.buffers
            .iter()
            .filter(|b| matches!(b.state, BufferState::InFlight(_)))
            .count()
    }

    /// Returns a free buffer, recycling those whose fences have signaled.
    ///
    /// If every buffer is in flight, waits on the oldest fence unless `deadline` has already passed, in which case
    /// `None` is returned and the caller should retry next frame.
    pub fn claim<Q>(&mut self, queue: &mut Q, deadline: &Deadline) -> Option<usize>
    where
        Q: UploadQueue<Fence = F>,
    {
        for buffer in self.buffers.iter_mut() {
            if let BufferState::InFlight(fence) = &buffer.state {
                if queue.is_signaled(fence) {
                    buffer.state = BufferState::Free;
                }
            }
        }
        if let Some(i) = self
            .buffers
            .iter()
            .position(|b| matches!(b.state, BufferState::Free))
        {
            return Some(i);
        }

        if deadline.is_expired() {
            return None;
        }

        let (oldest, _) = self
            .buffers
            .iter()
            .enumerate()
            .min_by_key(|(_, b)| b.submitted)?;
        log::trace!("All staging buffers in flight, waiting on buffer {}", oldest);
        if let BufferState::InFlight(fence) = &self.buffers[oldest].state {
            queue.wait(fence);
        }
        self.buffers[oldest].state = BufferState::Free;
        Some(oldest)
    }

    /// The first `num_tiles` tile regions of a claimed buffer.
    pub fn regions_mut(&mut self, buffer: usize, num_tiles: usize) -> std::slice::ChunksExactMut<'_, u8> {
        let num_tiles = num_tiles.min(self.tiles_per_buffer);
        self.buffers[buffer].data[..num_tiles * self.tile_bytes].chunks_exact_mut(self.tile_bytes)
    }

    /// Uploads the given regions of a claimed buffer. The buffer stays in flight until its fence signals.
    pub fn submit<Q>(&mut self, queue: &mut Q, buffer: usize, placements: &[TilePlacement])
    where
        Q: UploadQueue<Fence = F>,
    {
        debug_assert!(placements.len() <= self.tiles_per_buffer);
        self.submissions += 1;
        let staging = &mut self.buffers[buffer];
        let fence = queue.upload_tiles(&staging.data, placements);
        staging.state = BufferState::InFlight(fence);
        staging.submitted = self.submissions;
    }

    /// Waits for every buffer in flight.
    pub fn drain<Q>(&mut self, queue: &mut Q)
    where
        Q: UploadQueue<Fence = F>,
    {
        for buffer in self.buffers.iter_mut() {
            if let BufferState::InFlight(fence) = &buffer.state {
                queue.wait(fence);
            }
            buffer.state = BufferState::Free;
        }
    }
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

    use std::time::Duration;

    /// Fences signal only when waited on.
    #[derive(Default)]
    struct ManualQueue {
        signaled: Vec<bool>,
        uploads: Vec<(Vec<u8>, Vec<TilePlacement>)>,
        waits: usize,
    }

    impl UploadQueue for ManualQueue {
        type Fence = usize;

        fn upload_tiles(&mut self, data: &[u8], placements: &[TilePlacement]) -> usize {
            self.uploads.push((data.to_vec(), placements.to_vec()));
            self.signaled.push(false);
            self.signaled.len() - 1
        }

        fn is_signaled(&self, fence: &usize) -> bool {
            self.signaled[*fence]
        }

        fn wait(&mut self, fence: &usize) {
            self.waits += 1;
            self.signaled[*fence] = true;
        }
    }

    fn placement(region: usize) -> TilePlacement {
        TilePlacement {
            region,
            grid_coords: UVec3::ZERO,
        }
    }

    #[test]
    fn claims_free_buffers_without_waiting() {
        let mut queue = ManualQueue::default();
        let mut chain = StagingChain::new(2, 4, 8);
        let deadline = Deadline::after(Duration::from_secs(1));

        let a = chain.claim(&mut queue, &deadline).unwrap();
        for region in chain.regions_mut(a, 2) {
            region.fill(7);
        }
        chain.submit(&mut queue, a, &[placement(0), placement(1)]);
        let b = chain.claim(&mut queue, &deadline).unwrap();
        assert_ne!(a, b);
        assert_eq!(queue.waits, 0);
        assert_eq!(queue.uploads[0].0[..16], [7; 16]);
        assert_eq!(chain.num_in_flight(), 1);
    }

    #[test]
    fn waits_on_oldest_when_all_in_flight() {
        let mut queue = ManualQueue::default();
        let mut chain = StagingChain::new(2, 1, 4);
        let deadline = Deadline::after(Duration::from_secs(1));

        let a = chain.claim(&mut queue, &deadline).unwrap();
        chain.submit(&mut queue, a, &[placement(0)]);
        let b = chain.claim(&mut queue, &deadline).unwrap();
        chain.submit(&mut queue, b, &[placement(0)]);

        assert_eq!(chain.claim(&mut queue, &deadline), Some(a));
        assert_eq!(queue.waits, 1);
    }

    #[test]
    fn expired_deadline_does_not_wait() {
        let mut queue = ManualQueue::default();
        let mut chain = StagingChain::new(1, 1, 4);
        let a = chain
            .claim(&mut queue, &Deadline::after(Duration::from_secs(1)))
            .unwrap();
        chain.submit(&mut queue, a, &[placement(0)]);

        assert_eq!(chain.claim(&mut queue, &Deadline::expired_now()), None);
        assert_eq!(queue.waits, 0);

        queue.signaled[0] = true;
        assert_eq!(chain.claim(&mut queue, &Deadline::expired_now()), Some(a));
    }

    #[test]
    fn regions_are_capped_by_buffer_size() {
        let mut chain = StagingChain::<usize>::new(1, 3, 5);
        assert_eq!(chain.regions_mut(0, 10).count(), 3);
        assert!(chain.regions_mut(0, 2).all(|r| r.len() == 5));
    }
}
