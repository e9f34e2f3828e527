// Splat sorter: keeps the draw order texture in camera depth order
//
// The order buffer maps draw slot -> splat index. A dedicated worker thread
// recomputes it whenever the camera moves; the main thread polls completed
// passes and uploads the newest one to the order texture in a single write.
//
// Worker protocol (crossbeam channels):
//   main -> worker: Sort { seq, pose } | Recycle(buffer) | Shutdown
//   worker -> main: Completed { seq, order }
// The worker drains its queue before each pass and only sorts the newest
// pose, so completions arrive in dispatch order and stale poses are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use glam::Vec3;
use tracing::{debug, trace, warn};

// Parallel processing with rayon (native only)
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::backend::{Backend, GpuContext, TextureDescriptor};
use crate::error::{GsplatError, Result};
use crate::radix_sort::{float_to_sortable, RadixSorter};
use crate::temporal_coherence::CameraPose;

/// Draw order relative to the camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortOrder {
    /// Farthest first, for back-to-front alpha blending
    #[default]
    BackToFront,
    /// Nearest first
    FrontToBack,
}

/// Lifecycle of a [`Sorter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SorterState {
    Uninitialized,
    /// The resident order reflects the latest requested pose
    Ready,
    /// At least one requested pose has not been uploaded yet
    Sorting,
    Disposed,
}

/// Draw slot -> splat index mapping.
///
/// Always a permutation of `[0, len)`; slots at or past `count` hold padding
/// indices, which never precede a real splat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBuffer {
    order: Vec<u32>,
    count: u32,
}

impl OrderBuffer {
    /// Identity order over `capacity` slots, `count` of which are real splats
    pub fn identity(capacity: usize, count: u32) -> Self {
        Self {
            order: (0..capacity as u32).collect(),
            count: count.min(capacity as u32),
        }
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.order
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.order)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    fn into_vec(self) -> Vec<u32> {
        self.order
    }
}

/// Check that `order` is a permutation of `[0, order.len())`
pub fn is_permutation(order: &[u32]) -> bool {
    let mut seen = vec![false; order.len()];
    for &index in order {
        match seen.get_mut(index as usize) {
            Some(slot) if !*slot => *slot = true,
            _ => return false,
        }
    }
    true
}

/// Scratch space reused between sort passes
#[derive(Debug, Default)]
pub struct SortScratch {
    keys: Vec<u32>,
    values: Vec<u32>,
    radix: RadixSorter,
}

impl SortScratch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            keys: Vec::with_capacity(capacity),
            values: Vec::with_capacity(capacity),
            radix: RadixSorter::with_capacity(capacity),
        }
    }
}

#[inline]
fn depth_key(center: Vec3, pose: &CameraPose, order: SortOrder) -> u32 {
    let depth = pose.depth(center);
    // +0.0 folds -0.0 into +0.0 so equal depths stay ties
    let depth = if depth.is_finite() { depth + 0.0 } else { 0.0 };
    let key = float_to_sortable(depth);
    match order {
        SortOrder::BackToFront => !key,
        SortOrder::FrontToBack => key,
    }
}

fn compute_keys(centers: &[Vec3], pose: &CameraPose, order: SortOrder, keys: &mut [u32]) {
    #[cfg(feature = "rayon")]
    keys.par_iter_mut()
        .zip(centers.par_iter())
        .for_each(|(key, &center)| *key = depth_key(center, pose, order));

    #[cfg(not(feature = "rayon"))]
    for (key, &center) in keys.iter_mut().zip(centers) {
        *key = depth_key(center, pose, order);
    }
}

/// One full sort pass.
///
/// Writes the sorted splat indices of `centers` into the front of `out` and
/// identity padding indices into the rest. Ties keep the original index order.
pub fn sort_splats(
    centers: &[Vec3],
    pose: &CameraPose,
    order: SortOrder,
    out: &mut [u32],
    scratch: &mut SortScratch,
) {
    let count = centers.len().min(out.len());

    scratch.keys.resize(count, 0);
    scratch.values.clear();
    scratch.values.extend(0..count as u32);

    compute_keys(&centers[..count], pose, order, &mut scratch.keys);
    scratch.radix.sort(&mut scratch.keys, &mut scratch.values);

    out[..count].copy_from_slice(&scratch.values);
    for (slot, value) in out.iter_mut().enumerate().skip(count) {
        *value = slot as u32;
    }
}

enum Request {
    Sort { seq: u64, pose: CameraPose },
    Recycle(Vec<u32>),
    Shutdown,
}

struct Completed {
    seq: u64,
    order: Vec<u32>,
}

struct WorkerHandle {
    requests: Sender<Request>,
    results: Receiver<Completed>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    fn spawn(
        centers: Arc<[Vec3]>,
        capacity: usize,
        order: SortOrder,
        disposed: Arc<AtomicBool>,
    ) -> Result<Self> {
        let (request_tx, request_rx) = crossbeam_channel::unbounded();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();

        let thread = thread::Builder::new()
            .name("gsplat-sort".into())
            .spawn(move || run_worker(centers, capacity, order, request_rx, result_tx, disposed))
            .map_err(|err| {
                warn!(%err, "Failed to spawn sort worker");
                GsplatError::WorkerUnavailable
            })?;

        Ok(Self {
            requests: request_tx,
            results: result_rx,
            thread: Some(thread),
        })
    }

    fn recycle(&self, buffer: Vec<u32>) {
        // A gone worker has no use for the buffer
        let _ = self.requests.send(Request::Recycle(buffer));
    }

    fn shutdown(&mut self, join: bool) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(thread) = self.thread.take() {
            if join && thread.join().is_err() {
                warn!("Sort worker panicked");
            }
        }
    }
}

fn run_worker(
    centers: Arc<[Vec3]>,
    capacity: usize,
    order: SortOrder,
    requests: Receiver<Request>,
    results: Sender<Completed>,
    disposed: Arc<AtomicBool>,
) {
    let mut spare: Vec<Vec<u32>> = Vec::new();
    let mut scratch = SortScratch::with_capacity(centers.len());

    debug!(count = centers.len(), capacity, "Sort worker started");

    while let Ok(first) = requests.recv() {
        let mut latest = None;
        let mut superseded = 0u32;
        let mut shutdown = false;

        for request in std::iter::once(first).chain(requests.try_iter()) {
            match request {
                Request::Sort { seq, pose } => {
                    if latest.replace((seq, pose)).is_some() {
                        superseded += 1;
                    }
                }
                Request::Recycle(buffer) => spare.push(buffer),
                Request::Shutdown => shutdown = true,
            }
        }

        if shutdown || disposed.load(Ordering::Acquire) {
            break;
        }
        let Some((seq, pose)) = latest else {
            continue;
        };
        if superseded > 0 {
            trace!(seq, superseded, "Skipped superseded camera poses");
        }

        let mut buffer = spare
            .pop()
            .filter(|buffer| buffer.len() == capacity)
            .unwrap_or_else(|| vec![0; capacity]);

        let started = Instant::now();
        sort_splats(&centers, &pose, order, &mut buffer, &mut scratch);
        trace!(seq, elapsed_us = started.elapsed().as_micros() as u64, "Sort pass done");

        // Completion after disposal must not reach the destroyed texture
        if disposed.load(Ordering::Acquire) {
            break;
        }
        if results.send(Completed { seq, order: buffer }).is_err() {
            break;
        }
    }

    debug!("Sort worker stopped");
}

/// Owns the order buffer, its texture and the background sort worker
pub struct Sorter<B: Backend> {
    order: SortOrder,
    state: SorterState,
    texture: Option<(B::Texture, TextureDescriptor)>,
    resident: Option<OrderBuffer>,
    count: u32,
    worker: Option<WorkerHandle>,
    dispatched: u64,
    applied: u64,
    disposed: Arc<AtomicBool>,
}

impl<B: Backend> Sorter<B> {
    pub fn new(order: SortOrder) -> Self {
        Self {
            order,
            state: SorterState::Uninitialized,
            texture: None,
            resident: None,
            count: 0,
            worker: None,
            dispatched: 0,
            applied: 0,
            disposed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take ownership of `texture`, upload the identity order and start the
    /// worker. Re-initializing stops the previous worker and frees the
    /// previous texture first.
    pub fn init<C: GpuContext<B> + ?Sized>(
        &mut self,
        ctx: &mut C,
        texture: B::Texture,
        desc: TextureDescriptor,
        centers: Arc<[Vec3]>,
    ) -> Result<()> {
        if self.state == SorterState::Disposed {
            ctx.destroy_texture(&texture);
            return Err(GsplatError::DisposedResource { what: "sorter" });
        }

        self.stop_worker(true);
        if let Some((old, _)) = self.texture.take() {
            if old != texture {
                ctx.destroy_texture(&old);
            }
        }

        let capacity = desc.size.capacity();
        let mut count = centers.len();
        if count > capacity {
            warn!(count, capacity, "Order texture smaller than splat count, clamping");
            count = capacity;
        }
        self.count = count as u32;

        let identity = OrderBuffer::identity(capacity, self.count);
        if let Err(err) = ctx.upload_texture(&texture, &desc, identity.as_bytes()) {
            warn!(%err, "Initial order upload failed");
        }
        self.texture = Some((texture, desc));
        self.resident = Some(identity);
        self.applied = self.dispatched;
        self.state = SorterState::Ready;

        if count == 0 {
            debug!("Sorter initialized without splats, sorting disabled");
            return Ok(());
        }

        let centers: Arc<[Vec3]> = if count < centers.len() {
            centers[..count].into()
        } else {
            centers
        };
        self.worker = Some(WorkerHandle::spawn(
            centers,
            capacity,
            self.order,
            self.disposed.clone(),
        )?);

        debug!(count, capacity, order = ?self.order, "Sorter initialized");
        Ok(())
    }

    /// Request a sort for `pose`. Returns whether a pass was dispatched.
    ///
    /// Never blocks. A newer request supersedes older ones that have not
    /// started yet.
    pub fn set_camera(&mut self, pose: CameraPose) -> bool {
        match self.state {
            SorterState::Disposed => {
                debug!("{}", GsplatError::DisposedResource { what: "sorter" });
                return false;
            }
            SorterState::Uninitialized => {
                debug!("Camera update before sorter init ignored");
                return false;
            }
            _ => {}
        }

        let Some(worker) = &self.worker else {
            return false;
        };

        let seq = self.dispatched + 1;
        if worker.requests.send(Request::Sort { seq, pose }).is_err() {
            warn!("{}", GsplatError::WorkerUnavailable);
            self.worker = None;
            return false;
        }

        self.dispatched = seq;
        self.state = SorterState::Sorting;
        true
    }

    /// Upload the newest completed pass, if any. Returns its sequence number.
    pub fn poll<C: GpuContext<B> + ?Sized>(&mut self, ctx: &mut C) -> Option<u64> {
        if self.is_disposed() {
            return None;
        }
        let worker = self.worker.as_ref()?;

        let mut newest: Option<Completed> = None;
        let mut lost_worker = false;
        loop {
            match worker.results.try_recv() {
                Ok(completed) => match newest.take() {
                    Some(current) if current.seq >= completed.seq => {
                        worker.recycle(completed.order);
                        newest = Some(current);
                    }
                    Some(older) => {
                        worker.recycle(older.order);
                        newest = Some(completed);
                    }
                    None => newest = Some(completed),
                },
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    lost_worker = true;
                    break;
                }
            }
        }

        let applied = newest.and_then(|completed| self.apply(ctx, completed));

        if lost_worker {
            warn!("{}", GsplatError::WorkerUnavailable);
            self.worker = None;
            self.state = SorterState::Ready;
        }
        applied
    }

    /// Block until every dispatched pass is uploaded or `timeout` expires.
    /// Meant for tools and tests; the render loop uses [`Sorter::poll`].
    pub fn flush<C: GpuContext<B> + ?Sized>(&mut self, ctx: &mut C, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.applied < self.dispatched {
            if self.is_disposed() {
                return false;
            }
            let Some(worker) = &self.worker else {
                return false;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            match worker.results.recv_timeout(remaining) {
                Ok(completed) => {
                    self.apply(ctx, completed);
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => {
                    self.worker = None;
                    self.state = SorterState::Ready;
                    return false;
                }
            }
        }
        true
    }

    fn apply<C: GpuContext<B> + ?Sized>(&mut self, ctx: &mut C, completed: Completed) -> Option<u64> {
        let Completed { seq, order } = completed;

        if seq <= self.applied {
            if let Some(worker) = &self.worker {
                worker.recycle(order);
            }
            return None;
        }

        let Some((texture, desc)) = &self.texture else {
            return None;
        };
        let buffer = OrderBuffer {
            order,
            count: self.count,
        };
        if let Err(err) = ctx.upload_texture(texture, desc, buffer.as_bytes()) {
            warn!(seq, %err, "Order upload failed");
        }

        if let Some(previous) = self.resident.replace(buffer) {
            if let Some(worker) = &self.worker {
                worker.recycle(previous.into_vec());
            }
        }
        self.applied = seq;
        if self.applied == self.dispatched {
            self.state = SorterState::Ready;
        }
        trace!(seq, "Uploaded splat order");
        Some(seq)
    }

    /// Stop the worker, free the order texture and refuse further work
    pub fn dispose<C: GpuContext<B> + ?Sized>(&mut self, ctx: &mut C) {
        if self.is_disposed() {
            return;
        }
        self.disposed.store(true, Ordering::Release);
        self.stop_worker(true);
        if let Some((texture, _)) = self.texture.take() {
            ctx.destroy_texture(&texture);
        }
        self.resident = None;
        self.state = SorterState::Disposed;
        debug!("Sorter disposed");
    }

    fn stop_worker(&mut self, join: bool) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown(join);
        }
    }

    pub fn state(&self) -> SorterState {
        self.state
    }

    pub fn sort_order(&self) -> SortOrder {
        self.order
    }

    /// Takes effect on the next `init`
    pub fn set_sort_order(&mut self, order: SortOrder) {
        self.order = order;
    }

    pub fn is_disposed(&self) -> bool {
        self.state == SorterState::Disposed
    }

    /// Number of real splats being sorted
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Sequence number of the latest dispatched pass
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Sequence number of the latest uploaded pass
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Completed passes waiting for the next [`Sorter::poll`]
    pub fn pending_results(&self) -> usize {
        self.worker.as_ref().map_or(0, |worker| worker.results.len())
    }

    pub fn order_texture(&self) -> Option<&B::Texture> {
        self.texture.as_ref().map(|(texture, _)| texture)
    }

    /// CPU copy of the order currently resident in the texture
    pub fn resident_order(&self) -> Option<&OrderBuffer> {
        self.resident.as_ref()
    }
}

impl<B: Backend> Drop for Sorter<B> {
    fn drop(&mut self) {
        // No GPU access here; the worker notices the flag after its pass
        self.disposed.store(true, Ordering::Release);
        self.stop_worker(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_centers() -> Vec<Vec3> {
        (0..4).map(|z| Vec3::new(0.0, 0.0, z as f32)).collect()
    }

    fn sorted(centers: &[Vec3], pose: CameraPose, order: SortOrder, capacity: usize) -> Vec<u32> {
        let mut out = vec![0; capacity];
        sort_splats(centers, &pose, order, &mut out, &mut SortScratch::default());
        out
    }

    #[test]
    fn camera_in_front_sorts_farthest_first() {
        let pose = CameraPose::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        let centers = line_centers();
        let order = sorted(&centers, pose, SortOrder::BackToFront, 4);
        assert_eq!(order, vec![0, 1, 2, 3]);
        let depths: Vec<f32> = order.iter().map(|&i| pose.depth(centers[i as usize])).collect();
        assert_eq!(depths, vec![10.0, 9.0, 8.0, 7.0]);
    }

    #[test]
    fn camera_behind_facing_splats_flips_order() {
        let pose = CameraPose::new(Vec3::new(0.0, 0.0, -10.0), Vec3::Z);
        assert_eq!(
            sorted(&line_centers(), pose, SortOrder::BackToFront, 4),
            vec![3, 2, 1, 0]
        );
    }

    #[test]
    fn front_to_back_reverses() {
        let pose = CameraPose::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        assert_eq!(
            sorted(&line_centers(), pose, SortOrder::FrontToBack, 4),
            vec![3, 2, 1, 0]
        );
    }

    #[test]
    fn ties_keep_index_order() {
        // all on the plane z = 0, camera looking down -z: equal depths
        let centers: Vec<Vec3> = (0..6).map(|i| Vec3::new(i as f32, -(i as f32), 0.0)).collect();
        let pose = CameraPose::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert_eq!(sorted(&centers, pose, SortOrder::BackToFront, 6), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn padding_fills_the_tail() {
        let pose = CameraPose::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        let order = sorted(&line_centers(), pose, SortOrder::FrontToBack, 9);
        assert_eq!(order, vec![3, 2, 1, 0, 4, 5, 6, 7, 8]);
        assert!(is_permutation(&order));
    }

    #[test]
    fn non_finite_depth_sorts_as_zero() {
        let centers = vec![
            Vec3::new(0.0, 0.0, 2.0),
            Vec3::new(0.0, 0.0, f32::NAN),
            Vec3::new(0.0, 0.0, -2.0),
        ];
        let pose = CameraPose::new(Vec3::ZERO, Vec3::Z);
        assert_eq!(sorted(&centers, pose, SortOrder::BackToFront, 3), vec![0, 1, 2]);
    }

    #[test]
    fn permutation_check() {
        assert!(is_permutation(&[2, 0, 1]));
        assert!(!is_permutation(&[0, 0, 1]));
        assert!(!is_permutation(&[0, 3, 1]));
        assert!(is_permutation(&[]));
    }

    #[test]
    fn identity_buffer_byte_view() {
        let buffer = OrderBuffer::identity(3, 2);
        assert_eq!(buffer.count(), 2);
        assert_eq!(buffer.as_bytes().len(), 12);
        assert_eq!(u32::from_ne_bytes(buffer.as_bytes()[8..12].try_into().unwrap()), 2);
    }
}
