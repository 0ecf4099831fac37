//! Chunked loader and two-slot cache of decoded buffers.
//!
//! A load probes the resource with HEAD, fetches it in ascending `chunk_size`
//! ranges (one request in flight at a time), concatenates the chunks and decodes
//! the result. Decoded buffers live in a `current` slot (the audible track) and a
//! `next` slot (look-ahead). The decoded footprint of both slots is bounded by
//! `max_pool_size`; `next` and its chunk cache are evicted before `current`.
//!
//! ## Slots
//! The target slot is chosen by the caller, never inferred from which slots
//! are empty: [`BufferPool::load_track_chunked`] always replaces `current`,
//! [`BufferPool::preload_track_chunked`] always fills `next`.
//!
//! ## Cancellation
//! Each slot has its own load lane with a [`CancelToken`]. [`BufferPool::start_load`]
//! runs on the caller's thread and cancels the lane's previous load before
//! handing out a [`LoadTicket`], so loads supersede each other in call order no
//! matter which worker thread runs first. A preload never cancels a load of
//! `current`. The token is checked before every chunk and once more under the
//! slots lock when the buffer is assigned; a request already on the wire is not
//! interrupted, so cancellation takes effect within one chunk fetch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use waveplayer_types::TrackDescriptor;

use crate::config::PoolConfig;
use crate::decode::{hint_from_url, AudioDecoder, DecodedBuffer};
use crate::error::{PlayerError, Result};
use crate::fetch::{plan_chunks, RangeFetcher};

/// Receives load progress and failures.
pub trait LoadObserver: Send + Sync {
    /// Called after each chunk with `loaded / total * 100`.
    fn on_progress(&self, _percent: f64) {}
    /// Called once when a load fails.
    fn on_error(&self, _error: &PlayerError) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl LoadObserver for NoopObserver {}

/// Cooperative cancellation flag shared by one load.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cloneable handle that cancels whatever loads are active on a pool.
#[derive(Clone)]
pub struct AbortHandle {
    slots: Arc<Mutex<PoolSlots>>,
}

impl AbortHandle {
    pub fn abort(&self) {
        lock(&self.slots).cancel_all();
    }
}

/// Which slot a load lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolSlot {
    /// The audible track.
    Current,
    /// The look-ahead track.
    Next,
}

/// A started load, issued by [`BufferPool::start_load`].
#[derive(Clone, Debug)]
pub struct LoadTicket {
    slot: PoolSlot,
    load_id: u64,
    token: CancelToken,
}

impl LoadTicket {
    pub fn slot(&self) -> PoolSlot {
        self.slot
    }

    /// True once a newer load of the same slot, `abort` or `cleanup` superseded it.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Cancel token and raw chunks of the load in progress for one slot.
#[derive(Default)]
struct Lane {
    token: CancelToken,
    owner: Option<u64>,
    chunks: Vec<Vec<u8>>,
}

impl Lane {
    fn restart(&mut self, load_id: u64) -> CancelToken {
        self.token.cancel();
        self.token = CancelToken::default();
        self.clear_chunks();
        self.owner = Some(load_id);
        self.token.clone()
    }

    fn clear_chunks(&mut self) {
        self.chunks.clear();
        self.chunks.shrink_to_fit();
        self.owner = None;
    }
}

#[derive(Default)]
struct PoolSlots {
    current: Option<Arc<DecodedBuffer>>,
    next: Option<Arc<DecodedBuffer>>,
    total_buffer_size: u64,
    current_lane: Lane,
    next_lane: Lane,
    next_load_id: u64,
}

impl PoolSlots {
    fn recompute(&mut self) {
        self.total_buffer_size = self.current.as_ref().map(|b| b.byte_size()).unwrap_or(0)
            + self.next.as_ref().map(|b| b.byte_size()).unwrap_or(0);
    }

    fn lane(&mut self, slot: PoolSlot) -> &mut Lane {
        match slot {
            PoolSlot::Current => &mut self.current_lane,
            PoolSlot::Next => &mut self.next_lane,
        }
    }

    fn cancel_all(&mut self) {
        self.current_lane.token.cancel();
        self.next_lane.token.cancel();
    }
}

/// Bounded current/next cache of decoded buffers plus the chunked loader.
pub struct BufferPool {
    chunk_size: u64,
    max_pool_size: u64,
    fetcher: Arc<dyn RangeFetcher>,
    slots: Arc<Mutex<PoolSlots>>,
}

impl BufferPool {
    pub fn new(config: &PoolConfig, fetcher: Arc<dyn RangeFetcher>) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            max_pool_size: config.max_pool_size,
            fetcher,
            slots: Arc::new(Mutex::new(PoolSlots::default())),
        }
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn max_pool_size(&self) -> u64 {
        self.max_pool_size
    }

    /// Decoded bytes currently held by the current and next slots.
    pub fn total_buffer_size(&self) -> u64 {
        lock(&self.slots).total_buffer_size
    }

    pub fn current_buffer(&self) -> Option<Arc<DecodedBuffer>> {
        lock(&self.slots).current.clone()
    }

    pub fn next_buffer(&self) -> Option<Arc<DecodedBuffer>> {
        lock(&self.slots).next.clone()
    }

    /// Handle that can cancel loads from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            slots: self.slots.clone(),
        }
    }

    /// Load `track` into the current slot, replacing the previous current buffer.
    pub fn load_track_chunked(
        &self,
        track: &TrackDescriptor,
        decoder: &dyn AudioDecoder,
        target_rate: u32,
        observer: &dyn LoadObserver,
    ) -> Result<Arc<DecodedBuffer>> {
        let ticket = self.start_load(PoolSlot::Current);
        self.run_load(ticket, track, decoder, target_rate, observer)
    }

    /// Load `track` into the look-ahead slot without touching the current one.
    pub fn preload_track_chunked(
        &self,
        track: &TrackDescriptor,
        decoder: &dyn AudioDecoder,
        target_rate: u32,
        observer: &dyn LoadObserver,
    ) -> Result<Arc<DecodedBuffer>> {
        let ticket = self.start_load(PoolSlot::Next);
        self.run_load(ticket, track, decoder, target_rate, observer)
    }

    /// Cancel the slot's in-flight load and reserve the slot for a new one.
    ///
    /// Call this on the thread that orders loads; hand the ticket to
    /// [`Self::run_load`], possibly on another thread.
    pub fn start_load(&self, slot: PoolSlot) -> LoadTicket {
        let mut slots = lock(&self.slots);
        let load_id = slots.next_load_id;
        slots.next_load_id += 1;
        let token = slots.lane(slot).restart(load_id);
        LoadTicket {
            slot,
            load_id,
            token,
        }
    }

    /// Fetch, decode and assign the load described by `ticket`.
    pub fn run_load(
        &self,
        ticket: LoadTicket,
        track: &TrackDescriptor,
        decoder: &dyn AudioDecoder,
        target_rate: u32,
        observer: &dyn LoadObserver,
    ) -> Result<Arc<DecodedBuffer>> {
        let slot = ticket.slot;
        let result = self.fetch_and_decode(&ticket, track, decoder, target_rate, observer);
        {
            let mut slots = lock(&self.slots);
            let lane = slots.lane(slot);
            if lane.owner == Some(ticket.load_id) {
                lane.clear_chunks();
            }
        }

        match result.and_then(|decoded| self.commit(&ticket, Arc::new(decoded))) {
            Ok(buffer) => {
                tracing::info!(
                    track_id = %track.id,
                    slot = ?slot,
                    seconds = buffer.duration(),
                    bytes = buffer.byte_size(),
                    "track loaded"
                );
                Ok(buffer)
            }
            Err(err) => {
                tracing::warn!(track_id = %track.id, slot = ?slot, "track load failed: {err}");
                observer.on_error(&err);
                Err(err)
            }
        }
    }

    /// Assign a finished load unless it was superseded.
    fn commit(&self, ticket: &LoadTicket, buffer: Arc<DecodedBuffer>) -> Result<Arc<DecodedBuffer>> {
        let mut slots = lock(&self.slots);
        // Under the slots lock: a newer start_load either already cancelled us or waits.
        if ticket.is_cancelled() {
            return Err(PlayerError::LoadAborted);
        }
        self.assign_locked(&mut slots, ticket.slot, Some(buffer.clone()));
        Ok(buffer)
    }

    fn fetch_and_decode(
        &self,
        ticket: &LoadTicket,
        track: &TrackDescriptor,
        decoder: &dyn AudioDecoder,
        target_rate: u32,
        observer: &dyn LoadObserver,
    ) -> Result<DecodedBuffer> {
        let url = track.source_url.as_str();
        if ticket.is_cancelled() {
            return Err(PlayerError::LoadAborted);
        }

        let info = self.fetcher.head(url)?;
        if info.accepts_ranges == Some(false) {
            return Err(PlayerError::RangeNotSupported);
        }
        let total = info
            .content_length
            .ok_or(PlayerError::ContentLengthUnavailable)?;
        if total == 0 {
            return Err(PlayerError::DecodeFailed("resource is empty".to_string()));
        }

        let ranges = plan_chunks(total, self.chunk_size);
        tracing::info!(
            track_id = %track.id,
            url,
            total_bytes = total,
            chunks = ranges.len(),
            "chunked load started"
        );

        let mut loaded = 0u64;
        for range in &ranges {
            if ticket.is_cancelled() {
                return Err(PlayerError::LoadAborted);
            }
            let chunk = self.fetcher.get_range(url, *range)?;
            if chunk.len() as u64 != range.len() {
                return Err(PlayerError::Network(format!(
                    "short range response: expected {} bytes, got {}",
                    range.len(),
                    chunk.len()
                )));
            }
            loaded += chunk.len() as u64;
            {
                let mut slots = lock(&self.slots);
                let lane = slots.lane(ticket.slot);
                if lane.owner != Some(ticket.load_id) {
                    tracing::warn!(track_id = %track.id, "chunk cache evicted mid-load");
                    return Err(PlayerError::LoadAborted);
                }
                lane.chunks.push(chunk);
            }
            tracing::debug!(range = %range.header_value(), loaded, total, "chunk fetched");
            observer.on_progress(loaded as f64 / total as f64 * 100.0);
        }

        if ticket.is_cancelled() {
            return Err(PlayerError::LoadAborted);
        }
        let bytes = {
            let mut slots = lock(&self.slots);
            let lane = slots.lane(ticket.slot);
            if lane.owner != Some(ticket.load_id) {
                return Err(PlayerError::LoadAborted);
            }
            let chunks = std::mem::take(&mut lane.chunks);
            lane.owner = None;
            chunks.concat()
        };

        let hint = hint_from_url(url);
        decoder.decode(bytes, hint.as_deref(), target_rate)
    }

    /// Assign a decoded buffer directly to the look-ahead slot.
    pub fn set_next_buffer(&self, buffer: Option<Arc<DecodedBuffer>>) {
        let mut slots = lock(&self.slots);
        self.assign_locked(&mut slots, PoolSlot::Next, buffer);
    }

    /// Move the look-ahead buffer into the current slot.
    ///
    /// Returns the promoted buffer, or `None` when there was nothing to promote
    /// (the current slot is left untouched in that case). An in-flight load of
    /// `current` is cancelled, since the promoted buffer supersedes it.
    pub fn promote_next_buffer(&self) -> Option<Arc<DecodedBuffer>> {
        let mut slots = lock(&self.slots);
        let next = slots.next.take()?;
        slots.current_lane.token.cancel();
        slots.current_lane.clear_chunks();
        slots.current = Some(next.clone());
        self.enforce_limit(&mut slots);
        Some(next)
    }

    fn assign_locked(&self, slots: &mut PoolSlots, slot: PoolSlot, buffer: Option<Arc<DecodedBuffer>>) {
        match slot {
            PoolSlot::Current => {
                // Release the previous audible buffer before accounting the new one.
                slots.current = None;
                slots.recompute();
                slots.current = buffer;
            }
            PoolSlot::Next => {
                if slots.next.take().is_some() {
                    tracing::debug!("replacing look-ahead buffer");
                }
                slots.recompute();
                slots.next = buffer;
            }
        }
        self.enforce_limit(slots);
    }

    /// Recompute the footprint and evict until it fits: look-ahead chunks and next first.
    fn enforce_limit(&self, slots: &mut PoolSlots) {
        slots.recompute();
        if slots.total_buffer_size <= self.max_pool_size {
            return;
        }
        slots.next_lane.clear_chunks();
        if slots.next.take().is_some() {
            tracing::info!(
                max_pool_size = self.max_pool_size,
                "pool over capacity; evicted look-ahead buffer"
            );
        }
        slots.recompute();
        if slots.total_buffer_size > self.max_pool_size && slots.current.take().is_some() {
            tracing::warn!(
                max_pool_size = self.max_pool_size,
                "current buffer alone exceeds pool size; evicted"
            );
            slots.recompute();
        }
    }

    /// Signal every active load to stop before its next chunk.
    pub fn abort(&self) {
        lock(&self.slots).cancel_all();
    }

    /// Drop every cached buffer and chunk, zero the size counter, abort the active loads.
    pub fn cleanup(&self) {
        let mut slots = lock(&self.slots);
        slots.current = None;
        slots.next = None;
        slots.current_lane.clear_chunks();
        slots.next_lane.clear_chunks();
        slots.total_buffer_size = 0;
        slots.cancel_all();
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
