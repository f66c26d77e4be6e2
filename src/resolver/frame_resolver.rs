use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::cache::frame_cache::{CacheStats, FrameCache};
use crate::config::ResolverOpts;
use crate::decode::bitmap::FrameDecoder;
use crate::foundation::clock::{Clock, SystemClock};
use crate::foundation::core::{FrameIndex, SceneId};
use crate::foundation::error::{DecodeError, FrameError, ScrubResult, StoreError};
use crate::resolver::state::{Phase, ResolverEvent, ResolverSnapshot, ResolverStatus};
use crate::store::key::StoreKey;
use crate::store::keyed::KeyedStore;

/// Message posted by a worker as a fetch makes progress.
///
/// Tagged with the index and ticket it was issued for; whether it still matters is decided when
/// it is applied, never when it is issued.
enum Completion<B> {
    /// The store read left the pool queue and is now running.
    Started {
        index: FrameIndex,
        ticket: u64,
        at: Instant,
    },
    /// The job saw it was no longer wanted before touching the store or decoder.
    Skipped { index: FrameIndex, ticket: u64 },
    Read {
        index: FrameIndex,
        ticket: u64,
        result: Result<Vec<u8>, StoreError>,
    },
    Decoded {
        index: FrameIndex,
        ticket: u64,
        result: Result<B, DecodeError>,
    },
}

impl<B> Completion<B> {
    fn origin(&self) -> (FrameIndex, u64) {
        match self {
            Self::Started { index, ticket, .. }
            | Self::Skipped { index, ticket }
            | Self::Read { index, ticket, .. }
            | Self::Decoded { index, ticket, .. } => (*index, *ticket),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FetchPhase {
    Reading,
    Decoding,
}

#[derive(Clone, Copy, Debug)]
struct PendingFetch {
    ticket: u64,
    phase: FetchPhase,
    started_at: Option<Instant>,
}

const NO_TICKET: u64 = u64::MAX;

/// Ticket of the fetch the resolver is currently waiting on, shared with queued jobs.
///
/// Jobs that find a different ticket here skip their work; the answer may be stale by the time the
/// job acts on it, which only costs a redundant read.
#[derive(Clone, Debug)]
struct ActiveTicket(Arc<AtomicU64>);

impl ActiveTicket {
    fn new() -> Self {
        Self(Arc::new(AtomicU64::new(NO_TICKET)))
    }

    fn set(&self, ticket: u64) {
        self.0.store(ticket, Ordering::Release);
    }

    fn clear(&self) {
        self.set(NO_TICKET);
    }

    fn is(&self, ticket: u64) -> bool {
        self.0.load(Ordering::Acquire) == ticket
    }
}

/// Resolves "show frame K" requests into decoded bitmaps for one scene.
///
/// Requests never block: a cache hit resolves immediately, a miss starts a store read on the
/// worker pool. Workers report back through a mailbox that is drained by [`pump`](Self::pump)
/// (or the waiting variants). The latest request always wins: a completion only changes state
/// when the index it was issued for is still the one being fetched, and queued jobs for frames
/// that are no longer wanted are skipped before they read or decode.
///
/// All transitions take `&mut self`; to drive one resolver from several threads wrap it in a
/// `Mutex`.
pub struct FrameResolver<D: FrameDecoder> {
    scene: SceneId,
    store: Arc<dyn KeyedStore>,
    decoder: Arc<D>,
    cache: FrameCache<D::Bitmap>,
    opts: ResolverOpts,

    pool: rayon::ThreadPool,
    tx: mpsc::Sender<Completion<D::Bitmap>>,
    rx: mpsc::Receiver<Completion<D::Bitmap>>,

    phase: Phase<D::Bitmap>,
    in_flight: HashMap<FrameIndex, PendingFetch>,
    next_ticket: u64,
    active: ActiveTicket,
    store_reads: Arc<AtomicU64>,
    last_displayable: Option<(FrameIndex, Arc<D::Bitmap>)>,
    subscribers: Vec<mpsc::Sender<ResolverEvent<D::Bitmap>>>,
}

impl<D: FrameDecoder> std::fmt::Debug for FrameResolver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameResolver")
            .field("scene", &self.scene)
            .field("status", &self.phase.status())
            .field("in_flight", &self.in_flight.len())
            .field("cache", &self.cache)
            .finish()
    }
}

impl<D: FrameDecoder> FrameResolver<D> {
    /// Create a resolver for `scene` on the system clock.
    pub fn new(
        scene: SceneId,
        store: Arc<dyn KeyedStore>,
        decoder: D,
        opts: ResolverOpts,
    ) -> ScrubResult<Self> {
        Self::with_clock(scene, store, decoder, opts, Arc::new(SystemClock))
    }

    /// Create a resolver whose cache ages entries with `clock`.
    ///
    /// The store read timeout always uses real time.
    pub fn with_clock(
        scene: SceneId,
        store: Arc<dyn KeyedStore>,
        decoder: D,
        opts: ResolverOpts,
        clock: Arc<dyn Clock>,
    ) -> ScrubResult<Self> {
        opts.validate()?;
        let cache = FrameCache::new(opts.cache, clock)?;

        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("wavyte-scrub-fetch-{i}"));
        if let Some(n) = opts.threads {
            builder = builder.num_threads(n);
        }
        let pool = builder.build().context("build resolver worker pool")?;

        let (tx, rx) = mpsc::channel();
        Ok(Self {
            scene,
            store,
            decoder: Arc::new(decoder),
            cache,
            opts,
            pool,
            tx,
            rx,
            phase: Phase::Idle,
            in_flight: HashMap::new(),
            next_ticket: 0,
            active: ActiveTicket::new(),
            store_reads: Arc::new(AtomicU64::new(0)),
            last_displayable: None,
            subscribers: Vec::new(),
        })
    }

    /// Ask for frame `index` to become the resolved frame.
    ///
    /// Never blocks and never fails. Calling this after [`dispose`](Self::dispose) is a contract
    /// violation: it panics in debug builds and is ignored otherwise.
    #[tracing::instrument(level = "trace", skip(self), fields(scene = %self.scene))]
    pub fn request(&mut self, index: FrameIndex) {
        match self.phase {
            Phase::Disposed => {
                tracing::error!(frame = index.0, "request after dispose ignored");
                if cfg!(debug_assertions) {
                    panic!("FrameResolver::request called after dispose");
                }
                return;
            }
            Phase::Fetching(k) if k == index => return,
            _ => {}
        }

        if let Some(bitmap) = self.cache.get(index) {
            self.resolve(index, bitmap);
            return;
        }

        self.transition(Phase::Fetching(index));
        match self.in_flight.get(&index) {
            Some(pending) => {
                tracing::trace!(frame = index.0, "joining fetch already in flight");
                self.active.set(pending.ticket);
            }
            None => self.spawn_read(index),
        }
    }

    /// Apply every completion already waiting in the mailbox. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(msg) = self.rx.try_recv() {
            self.apply(msg);
            applied += 1;
        }
        if self.expire_stalled_read() {
            applied += 1;
        }
        applied
    }

    /// Like [`pump`](Self::pump), but waits up to `wait` for at least one completion.
    pub fn pump_timeout(&mut self, wait: Duration) -> usize {
        let deadline = Instant::now() + wait;
        loop {
            let applied = self.pump();
            if applied > 0 {
                return applied;
            }
            let now = Instant::now();
            if now >= deadline {
                return 0;
            }
            let mut wait = deadline - now;
            if let Some(read_deadline) = self.read_deadline() {
                wait = wait.min(read_deadline.saturating_duration_since(now));
            }
            match self.rx.recv_timeout(wait) {
                Ok(msg) => {
                    self.apply(msg);
                    return 1 + self.pump();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return 0,
            }
        }
    }

    /// Pump until the latest request leaves `Fetching` or `timeout` elapses.
    ///
    /// Returns `true` when the state converged.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.pump();
        while self.phase.fetching().is_some() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout(deadline - now);
        }
        true
    }

    /// Pump until no tracked fetch remains, superseded ones included.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.pump();
        while !self.in_flight.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout(deadline - now);
        }
        true
    }

    /// Copy of the current state.
    pub fn current_state(&self) -> ResolverSnapshot<D::Bitmap> {
        self.phase.snapshot()
    }

    /// Bitmap-free view of the current state.
    pub fn status(&self) -> ResolverStatus {
        self.phase.status()
    }

    /// Last successfully resolved frame of any index.
    ///
    /// Unlike [`ResolverSnapshot::resolved`] this survives a newer request entering `Fetching` or
    /// `Failed`, for display layers that keep the previous frame on screen.
    pub fn last_displayable(&self) -> Option<(FrameIndex, Arc<D::Bitmap>)> {
        self.last_displayable
            .as_ref()
            .map(|(k, b)| (*k, Arc::clone(b)))
    }

    /// Receive an event for every subsequent state transition.
    pub fn subscribe(&mut self) -> mpsc::Receiver<ResolverEvent<D::Bitmap>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Clear the cache, drop subscribers and make the resolver inert.
    ///
    /// Fetches still running on the pool finish and their results are dropped.
    #[tracing::instrument(level = "debug", skip(self), fields(scene = %self.scene))]
    pub fn dispose(&mut self) {
        self.cache.clear();
        self.in_flight.clear();
        self.active.clear();
        self.last_displayable = None;
        self.subscribers.clear();
        self.phase = Phase::Disposed;
    }

    /// Scene this resolver serves.
    pub fn scene(&self) -> &SceneId {
        &self.scene
    }

    /// Return `true` when `index` currently has a cache entry.
    pub fn is_cached(&self, index: FrameIndex) -> bool {
        self.cache.contains(index)
    }

    /// Frame cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of fetches (reading or decoding) the resolver is still tracking.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of store reads that actually ran since construction.
    ///
    /// Queued reads skipped because a newer request superseded them are not counted.
    pub fn store_reads(&self) -> u64 {
        self.store_reads.load(Ordering::SeqCst)
    }

    fn spawn_read(&mut self, index: FrameIndex) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.in_flight.insert(
            index,
            PendingFetch {
                ticket,
                phase: FetchPhase::Reading,
                started_at: None,
            },
        );
        self.active.set(ticket);

        let key = StoreKey::new(&self.scene, index);
        let store = Arc::clone(&self.store);
        let active = self.active.clone();
        let reads = Arc::clone(&self.store_reads);
        let tx = self.tx.clone();
        // A dropped resolver has no one left to tell, so send errors are ignored.
        self.pool.spawn(move || {
            if !active.is(ticket) {
                let _ = tx.send(Completion::Skipped { index, ticket });
                return;
            }
            reads.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(Completion::Started {
                index,
                ticket,
                at: Instant::now(),
            });
            let result = store.read(&key);
            let _ = tx.send(Completion::Read {
                index,
                ticket,
                result,
            });
        });
    }

    fn spawn_decode(&mut self, index: FrameIndex, ticket: u64, bytes: Vec<u8>) {
        if let Some(p) = self.in_flight.get_mut(&index) {
            p.phase = FetchPhase::Decoding;
        }

        let decoder = Arc::clone(&self.decoder);
        let active = self.active.clone();
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            if !active.is(ticket) {
                let _ = tx.send(Completion::Skipped { index, ticket });
                return;
            }
            let result = decoder.decode(&bytes);
            let _ = tx.send(Completion::Decoded {
                index,
                ticket,
                result,
            });
        });
    }

    fn apply(&mut self, msg: Completion<D::Bitmap>) {
        let (index, ticket) = msg.origin();
        if self.in_flight.get(&index).map(|p| p.ticket) != Some(ticket) {
            tracing::trace!(frame = index.0, "dropping completion of abandoned fetch");
            return;
        }
        let active = self.phase.fetching() == Some(index);

        match msg {
            Completion::Started { at, .. } => {
                if let Some(p) = self.in_flight.get_mut(&index) {
                    p.started_at = Some(at);
                }
            }
            Completion::Skipped { .. } => {
                self.in_flight.remove(&index);
                if active {
                    // Re-requested after the job gave up; fetch it again.
                    tracing::trace!(frame = index.0, "restarting skipped fetch");
                    self.spawn_read(index);
                } else {
                    tracing::debug!(frame = index.0, "skipped superseded fetch");
                }
            }
            Completion::Read { result, .. } => {
                if !active {
                    self.in_flight.remove(&index);
                    tracing::debug!(frame = index.0, "discarding superseded store read");
                    return;
                }
                match result {
                    Ok(bytes) => self.spawn_decode(index, ticket, bytes),
                    Err(e) => {
                        self.in_flight.remove(&index);
                        self.fail(index, e.into());
                    }
                }
            }
            Completion::Decoded { result, .. } => {
                self.in_flight.remove(&index);
                if !active {
                    tracing::debug!(frame = index.0, "discarding superseded decode");
                    return;
                }
                match result {
                    Ok(bitmap) => {
                        let bitmap = Arc::new(bitmap);
                        self.cache.put(index, Arc::clone(&bitmap));
                        self.resolve(index, bitmap);
                    }
                    Err(e) => self.fail(index, e.into()),
                }
            }
        }
    }

    fn expire_stalled_read(&mut self) -> bool {
        let Some(deadline) = self.read_deadline() else {
            return false;
        };
        if Instant::now() < deadline {
            return false;
        }
        let Some(index) = self.phase.fetching() else {
            return false;
        };
        // Forget the read so a late result is dropped and a re-request reads again.
        self.in_flight.remove(&index);
        let limit = self.opts.fetch_timeout.unwrap_or_default();
        self.fail(
            index,
            FrameError::Io(format!(
                "store read timed out after {} ms",
                limit.as_millis()
            )),
        );
        true
    }

    fn read_deadline(&self) -> Option<Instant> {
        let limit = self.opts.fetch_timeout?;
        let index = self.phase.fetching()?;
        let pending = self.in_flight.get(&index)?;
        if pending.phase != FetchPhase::Reading {
            return None;
        }
        // A read still waiting for a worker has not started its clock.
        pending.started_at.map(|t| t + limit)
    }

    fn resolve(&mut self, index: FrameIndex, bitmap: Arc<D::Bitmap>) {
        self.last_displayable = Some((index, Arc::clone(&bitmap)));
        self.transition(Phase::Resolved(index, bitmap));
    }

    fn fail(&mut self, index: FrameIndex, err: FrameError) {
        tracing::warn!(scene = %self.scene, frame = index.0, error = %err, "frame failed to resolve");
        self.transition(Phase::Failed(index, err));
    }

    fn transition(&mut self, next: Phase<D::Bitmap>) {
        if next.fetching().is_none() {
            self.active.clear();
        }
        self.phase = next;
        if let Some(event) = self.phase.event() {
            self.subscribers
                .retain(|s| s.send(event.clone()).is_ok());
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/resolver/frame_resolver.rs"]
mod tests;
