use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use super::*;
use crate::config::FrameCacheOpts;
use crate::foundation::clock::ManualClock;
use crate::foundation::error::FrameErrorKind;
use crate::store::keyed::MemoryStore;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, PartialEq, Eq)]
struct TestBitmap(Vec<u8>);

struct TestDecoder;

impl FrameDecoder for TestDecoder {
    type Bitmap = TestBitmap;

    fn decode(&self, bytes: &[u8]) -> Result<TestBitmap, DecodeError> {
        if bytes == b"corrupt" {
            return Err(DecodeError::new("corrupt frame"));
        }
        Ok(TestBitmap(bytes.to_vec()))
    }
}

/// Store whose reads block until the test opens the gate for that key.
#[derive(Default)]
struct GatedStore {
    inner: MemoryStore,
    open: Mutex<HashSet<StoreKey>>,
    cv: Condvar,
    passthrough: AtomicBool,
}

impl GatedStore {
    fn release(&self, scene: &SceneId, index: u64) {
        self.open
            .lock()
            .unwrap()
            .insert(StoreKey::new(scene, FrameIndex(index)));
        self.cv.notify_all();
    }
}

impl KeyedStore for GatedStore {
    fn read(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError> {
        if !self.passthrough.load(Ordering::SeqCst) {
            let guard = self.open.lock().unwrap();
            let _guard = self
                .cv
                .wait_timeout_while(guard, Duration::from_secs(10), |open| !open.contains(key))
                .unwrap();
        }
        self.inner.read(key)
    }

    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<(), StoreError> {
        self.inner.write(key, bytes)
    }
}

/// Store whose reads always take `delay`.
struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl KeyedStore for SlowStore {
    fn read(&self, key: &StoreKey) -> Result<Vec<u8>, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.read(key)
    }

    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<(), StoreError> {
        self.inner.write(key, bytes)
    }
}

/// Block until `n` store reads have started on the pool.
fn wait_for_reads(r: &FrameResolver<TestDecoder>, n: u64) {
    let deadline = Instant::now() + WAIT;
    while r.store_reads() < n {
        assert!(Instant::now() < deadline, "store reads never started");
        std::thread::sleep(Duration::from_millis(1));
    }
}

struct Fixture {
    scene: SceneId,
    store: Arc<GatedStore>,
    clock: ManualClock,
    resolver: FrameResolver<TestDecoder>,
}

fn fixture_with(gated: bool, opts: ResolverOpts, frames: &[u64]) -> Fixture {
    let scene = SceneId::new("scene-a").unwrap();
    let store = Arc::new(GatedStore::default());
    store.passthrough.store(!gated, Ordering::SeqCst);
    for &i in frames {
        store
            .write(
                &StoreKey::new(&scene, FrameIndex(i)),
                format!("frame-{i}").as_bytes(),
            )
            .unwrap();
    }
    let clock = ManualClock::new();
    let dyn_store: Arc<dyn KeyedStore> = store.clone();
    let resolver = FrameResolver::with_clock(
        scene.clone(),
        dyn_store,
        TestDecoder,
        opts,
        Arc::new(clock.clone()),
    )
    .unwrap();
    Fixture {
        scene,
        store,
        clock,
        resolver,
    }
}

fn opts() -> ResolverOpts {
    ResolverOpts {
        threads: Some(4),
        ..ResolverOpts::default()
    }
}

fn fixture(gated: bool, frames: &[u64]) -> Fixture {
    fixture_with(gated, opts(), frames)
}

fn resolved_payload(r: &FrameResolver<TestDecoder>) -> Option<Vec<u8>> {
    r.current_state().resolved.map(|b| b.0.clone())
}

#[test]
fn starts_idle() {
    let f = fixture(false, &[]);
    let s = f.resolver.current_state();
    assert_eq!(s.status, ResolverStatus::Idle);
    assert_eq!(s.requested_index, None);
    assert!(s.resolved.is_none());
    assert!(s.last_error.is_none());
}

#[test]
fn miss_fetches_decodes_and_caches() {
    let mut f = fixture(false, &[5]);
    f.resolver.request(FrameIndex(5));
    assert_eq!(f.resolver.status(), ResolverStatus::Fetching(FrameIndex(5)));

    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(5)));
    assert_eq!(resolved_payload(&f.resolver), Some(b"frame-5".to_vec()));
    assert!(f.resolver.is_cached(FrameIndex(5)));
}

#[test]
fn cache_hit_skips_store_read() {
    let mut f = fixture(false, &[5, 6]);
    f.resolver.request(FrameIndex(5));
    assert!(f.resolver.settle(WAIT));
    f.resolver.request(FrameIndex(6));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.store.inner.reads(), 2);

    f.resolver.request(FrameIndex(5));
    // Synchronous: resolved without pumping.
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(5)));
    assert_eq!(f.resolver.store_reads(), 2);
    assert_eq!(f.store.inner.reads(), 2);
    assert_eq!(f.resolver.cache_stats().hits, 1);
}

#[test]
fn latest_request_wins_when_old_fetch_completes_last() {
    let mut f = fixture(true, &[5, 7]);
    f.resolver.request(FrameIndex(5));
    wait_for_reads(&f.resolver, 1);
    f.resolver.request(FrameIndex(7));
    assert_eq!(f.resolver.in_flight(), 2);

    f.store.release(&f.scene, 7);
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(7)));

    f.store.release(&f.scene, 5);
    assert!(f.resolver.wait_idle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(7)));
    assert_eq!(resolved_payload(&f.resolver), Some(b"frame-7".to_vec()));
    assert!(!f.resolver.is_cached(FrameIndex(5)));
}

#[test]
fn superseded_fetch_completing_first_is_discarded() {
    let mut f = fixture(true, &[5, 7]);
    let events = f.resolver.subscribe();
    f.resolver.request(FrameIndex(5));
    wait_for_reads(&f.resolver, 1);
    f.resolver.request(FrameIndex(7));

    f.store.release(&f.scene, 5);
    let deadline = Instant::now() + WAIT;
    while f.resolver.in_flight() > 1 && Instant::now() < deadline {
        f.resolver.pump_timeout(Duration::from_millis(50));
    }
    assert_eq!(f.resolver.in_flight(), 1);
    assert_eq!(f.resolver.status(), ResolverStatus::Fetching(FrameIndex(7)));
    assert!(!f.resolver.is_cached(FrameIndex(5)));

    f.store.release(&f.scene, 7);
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(7)));

    let seen: Vec<FrameIndex> = events.try_iter().map(|e| e.index()).collect();
    assert_eq!(seen, vec![FrameIndex(5), FrameIndex(7), FrameIndex(7)]);
}

#[test]
fn same_index_while_fetching_is_a_noop() {
    let mut f = fixture(true, &[3]);
    let events = f.resolver.subscribe();
    f.resolver.request(FrameIndex(3));
    f.resolver.request(FrameIndex(3));
    f.resolver.request(FrameIndex(3));
    assert_eq!(f.resolver.in_flight(), 1);
    assert_eq!(events.try_iter().count(), 1);

    f.store.release(&f.scene, 3);
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.store.inner.reads(), 1);
}

#[test]
fn rerequest_joins_abandoned_fetch_for_same_index() {
    let mut f = fixture(true, &[5, 7]);
    f.resolver.request(FrameIndex(5));
    wait_for_reads(&f.resolver, 1);
    f.resolver.request(FrameIndex(7));
    f.resolver.request(FrameIndex(5));
    assert_eq!(f.resolver.in_flight(), 2);

    f.store.release(&f.scene, 5);
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(5)));

    f.store.release(&f.scene, 7);
    assert!(f.resolver.wait_idle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(5)));
    // Frame 5 was read once; frame 7 at most once, or not at all when skipped.
    assert!(f.store.inner.reads() <= 2);
}

#[test]
fn not_found_then_explicit_retry_reads_again() {
    let mut f = fixture(false, &[]);
    f.resolver.request(FrameIndex(9));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(
        f.resolver.status(),
        ResolverStatus::Failed(FrameIndex(9), FrameError::NotFound)
    );
    assert_eq!(
        f.resolver.current_state().last_error.map(|e| e.kind()),
        Some(FrameErrorKind::NotFound)
    );

    // Nothing retries on its own.
    std::thread::sleep(Duration::from_millis(20));
    f.resolver.pump();
    assert_eq!(f.resolver.store_reads(), 1);

    f.store
        .write(&StoreKey::new(&f.scene, FrameIndex(9)), b"late")
        .unwrap();
    f.resolver.request(FrameIndex(9));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(9)));
    assert_eq!(f.resolver.store_reads(), 2);
}

#[test]
fn decode_failure_is_reported_and_not_cached() {
    let mut f = fixture(false, &[]);
    f.store
        .write(&StoreKey::new(&f.scene, FrameIndex(2)), b"corrupt")
        .unwrap();
    f.resolver.request(FrameIndex(2));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(
        f.resolver.status(),
        ResolverStatus::Failed(FrameIndex(2), FrameError::Decode("corrupt frame".into()))
    );
    assert!(!f.resolver.is_cached(FrameIndex(2)));
    assert_eq!(f.resolver.cache_stats().insertions, 0);
}

#[test]
fn io_failure_leaves_resolver_serviceable() {
    let mut f = fixture(false, &[1]);
    f.store.inner.set_unavailable(true);
    f.resolver.request(FrameIndex(1));
    assert!(f.resolver.settle(WAIT));
    let status = f.resolver.status();
    assert!(
        matches!(&status, ResolverStatus::Failed(FrameIndex(1), FrameError::Io(_))),
        "{status:?}"
    );

    f.store.inner.set_unavailable(false);
    f.resolver.request(FrameIndex(1));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(1)));
}

#[test]
fn stalled_read_times_out_as_io_and_late_result_is_dropped() {
    let mut f = fixture_with(
        true,
        ResolverOpts {
            fetch_timeout: Some(Duration::from_millis(50)),
            ..opts()
        },
        &[3],
    );
    f.resolver.request(FrameIndex(3));
    assert!(f.resolver.settle(WAIT));
    match f.resolver.status() {
        ResolverStatus::Failed(FrameIndex(3), FrameError::Io(msg)) => {
            assert!(msg.contains("timed out"), "{msg}")
        }
        other => panic!("expected io timeout, got {other:?}"),
    }
    assert_eq!(f.resolver.in_flight(), 0);

    f.store.release(&f.scene, 3);
    std::thread::sleep(Duration::from_millis(100));
    f.resolver.pump();
    assert!(matches!(
        f.resolver.status(),
        ResolverStatus::Failed(FrameIndex(3), _)
    ));
    assert!(!f.resolver.is_cached(FrameIndex(3)));

    f.resolver.request(FrameIndex(3));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(3)));
    assert_eq!(f.resolver.store_reads(), 2);
}

#[test]
fn read_queued_behind_busy_worker_does_not_time_out() {
    let mut f = fixture_with(
        true,
        ResolverOpts {
            threads: Some(1),
            fetch_timeout: Some(Duration::from_millis(50)),
            ..ResolverOpts::default()
        },
        &[0, 1],
    );
    f.store.release(&f.scene, 1);
    f.resolver.request(FrameIndex(0));
    wait_for_reads(&f.resolver, 1);
    // Frame 0 holds the only worker; frame 1 waits in the pool queue.
    f.resolver.request(FrameIndex(1));

    std::thread::sleep(Duration::from_millis(150));
    f.resolver.pump();
    assert_eq!(f.resolver.status(), ResolverStatus::Fetching(FrameIndex(1)));

    f.store.release(&f.scene, 0);
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(1)));
    assert_eq!(resolved_payload(&f.resolver), Some(b"frame-1".to_vec()));
}

#[test]
fn burst_skips_reads_of_superseded_frames() {
    let scene = SceneId::new("scene-a").unwrap();
    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(40),
    });
    for i in 0..10 {
        store
            .inner
            .write(
                &StoreKey::new(&scene, FrameIndex(i)),
                format!("frame-{i}").as_bytes(),
            )
            .unwrap();
    }
    let dyn_store: Arc<dyn KeyedStore> = store.clone();
    let mut resolver = FrameResolver::new(
        scene,
        dyn_store,
        TestDecoder,
        ResolverOpts {
            threads: Some(1),
            fetch_timeout: Some(Duration::from_millis(150)),
            ..ResolverOpts::default()
        },
    )
    .unwrap();

    for i in 0..10 {
        resolver.request(FrameIndex(i));
    }
    assert!(resolver.settle(WAIT));
    assert_eq!(resolver.status(), ResolverStatus::Resolved(FrameIndex(9)));
    assert!(resolver.wait_idle(WAIT));

    // At most the first frame got a worker before being superseded.
    assert!(store.inner.reads() <= 2, "reads = {}", store.inner.reads());
    assert_eq!(resolver.store_reads(), store.inner.reads());
    assert!(!resolver.is_cached(FrameIndex(5)));
}

#[test]
fn rerequest_after_skip_fetches_again() {
    let mut f = fixture_with(
        true,
        ResolverOpts {
            threads: Some(1),
            ..ResolverOpts::default()
        },
        &[0, 1, 2],
    );
    f.resolver.request(FrameIndex(0));
    wait_for_reads(&f.resolver, 1);
    f.resolver.request(FrameIndex(1));
    f.resolver.request(FrameIndex(2));

    // Frame 1's job runs after frame 0 and finds itself superseded by 2.
    f.store.release(&f.scene, 0);
    wait_for_reads(&f.resolver, 2);
    assert_eq!(f.store.inner.reads(), 1);

    // The skip has not been applied yet, so this joins the skipped fetch.
    f.resolver.request(FrameIndex(1));
    f.store.release(&f.scene, 1);
    f.store.release(&f.scene, 2);
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.status(), ResolverStatus::Resolved(FrameIndex(1)));
    assert_eq!(resolved_payload(&f.resolver), Some(b"frame-1".to_vec()));
    assert!(f.resolver.wait_idle(WAIT));
    assert_eq!(f.resolver.store_reads(), 3);
    assert!(!f.resolver.is_cached(FrameIndex(2)));
}

#[test]
fn subscribers_see_every_transition() {
    let mut f = fixture(false, &[4]);
    let events = f.resolver.subscribe();
    f.resolver.request(FrameIndex(4));
    assert!(f.resolver.settle(WAIT));
    f.resolver.request(FrameIndex(8));
    assert!(f.resolver.settle(WAIT));
    f.resolver.request(FrameIndex(4));

    let got: Vec<ResolverEvent<TestBitmap>> = events.try_iter().collect();
    assert_eq!(got.len(), 5);
    assert!(matches!(got[0], ResolverEvent::Fetching(FrameIndex(4))));
    assert!(matches!(&got[1], ResolverEvent::Resolved(FrameIndex(4), b) if b.0 == b"frame-4"));
    assert!(matches!(got[2], ResolverEvent::Fetching(FrameIndex(8))));
    assert!(matches!(
        got[3],
        ResolverEvent::Failed(FrameIndex(8), FrameError::NotFound)
    ));
    assert!(matches!(got[4], ResolverEvent::Resolved(FrameIndex(4), _)));
}

#[test]
fn dropped_subscriber_is_pruned() {
    let mut f = fixture(false, &[1]);
    drop(f.resolver.subscribe());
    let live = f.resolver.subscribe();
    f.resolver.request(FrameIndex(1));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(live.try_iter().count(), 2);
    assert_eq!(f.resolver.subscribers.len(), 1);
}

#[test]
fn fetching_clears_resolved_but_last_displayable_survives() {
    let mut f = fixture(true, &[1, 2]);
    f.store.release(&f.scene, 1);
    f.resolver.request(FrameIndex(1));
    assert!(f.resolver.settle(WAIT));

    f.resolver.request(FrameIndex(2));
    let s = f.resolver.current_state();
    assert_eq!(s.requested_index, Some(FrameIndex(2)));
    assert!(s.resolved.is_none());
    let (k, bitmap) = f.resolver.last_displayable().unwrap();
    assert_eq!(k, FrameIndex(1));
    assert_eq!(bitmap.0, b"frame-1");

    f.store.release(&f.scene, 2);
    assert!(f.resolver.settle(WAIT));
}

#[test]
fn expired_cache_entry_triggers_refetch() {
    let mut f = fixture(false, &[1]);
    f.resolver.request(FrameIndex(1));
    assert!(f.resolver.settle(WAIT));

    f.clock.advance(FrameCacheOpts::default().ttl);
    f.resolver.request(FrameIndex(1));
    assert_eq!(f.resolver.status(), ResolverStatus::Fetching(FrameIndex(1)));
    assert!(f.resolver.settle(WAIT));
    assert_eq!(f.resolver.store_reads(), 2);
    assert_eq!(f.resolver.cache_stats().expirations, 1);
}

#[test]
fn capacity_eviction_forces_refetch() {
    let mut f = fixture_with(
        false,
        ResolverOpts {
            cache: FrameCacheOpts {
                capacity: 1,
                ..FrameCacheOpts::default()
            },
            ..opts()
        },
        &[1, 2],
    );
    for i in [1, 2, 1] {
        f.resolver.request(FrameIndex(i));
        assert!(f.resolver.settle(WAIT));
    }
    assert_eq!(f.resolver.store_reads(), 3);
    assert_eq!(f.resolver.cache_stats().evictions, 2);
}

#[test]
fn dispose_clears_cache_and_drops_late_results() {
    let mut f = fixture(true, &[1, 2]);
    f.store.release(&f.scene, 1);
    f.resolver.request(FrameIndex(1));
    assert!(f.resolver.settle(WAIT));
    f.resolver.request(FrameIndex(2));

    f.resolver.dispose();
    assert_eq!(f.resolver.status(), ResolverStatus::Disposed);
    assert!(!f.resolver.is_cached(FrameIndex(1)));
    assert_eq!(f.resolver.cache_stats().cleared, 1);
    assert!(f.resolver.last_displayable().is_none());

    f.store.release(&f.scene, 2);
    std::thread::sleep(Duration::from_millis(50));
    f.resolver.pump();
    assert_eq!(f.resolver.status(), ResolverStatus::Disposed);
    assert!(!f.resolver.is_cached(FrameIndex(2)));
}

#[cfg(debug_assertions)]
#[test]
#[should_panic(expected = "request called after dispose")]
fn request_after_dispose_panics_in_debug() {
    let mut f = fixture(false, &[1]);
    f.resolver.dispose();
    f.resolver.request(FrameIndex(1));
}

#[test]
fn zero_threads_is_rejected() {
    let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new());
    let err = FrameResolver::new(
        SceneId::new("s").unwrap(),
        store,
        TestDecoder,
        ResolverOpts {
            threads: Some(0),
            ..ResolverOpts::default()
        },
    )
    .unwrap_err();
    assert!(err.to_string().contains("threads"));
}
