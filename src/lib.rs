//! Frame resolution cache for timeline scrubbing and playback.
//!
//! Given a stream of "show me frame N" requests, [`FrameResolver`] produces a decoded,
//! displayable bitmap for the most recently requested frame:
//!
//! 1. **Lookup**: the per-scene [`FrameCache`] (LRU, bounded, entries expire after a TTL)
//! 2. **Fetch** on a miss: raw bytes from a [`KeyedStore`] on the worker pool
//! 3. **Decode**: bytes to bitmap via a [`FrameDecoder`], then back into the cache
//!
//! Requests arriving faster than they can be serviced are not queued. The latest request wins:
//! a fetch whose frame is no longer the requested one is allowed to finish, and its result is
//! dropped when it arrives.
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - **Deterministic release**: a cached bitmap is dropped at the exact point it is evicted,
//!   expired, replaced or cleared.
//! - **Premultiplied RGBA8**: [`ImageDecoder`] produces premultiplied pixels.
#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod foundation;

/// Decoded frame cache.
pub mod cache;
/// Resolver and cache options.
pub mod config;
/// Frame decoding.
pub mod decode;
/// Resolver state machine.
pub mod resolver;
/// Keyed frame stores.
pub mod store;

pub use cache::frame_cache::{CacheStats, FrameCache};
pub use config::{
    DEFAULT_CAPACITY, DEFAULT_TTL, FrameCacheOpts, ResolverConfig, ResolverOpts,
};
pub use decode::bitmap::{FrameBitmap, FrameDecoder, ImageDecoder, decode_image};
pub use foundation::clock::{Clock, ManualClock, SystemClock};
pub use foundation::core::{FrameIndex, FrameRange, SceneId};
pub use foundation::error::{
    DecodeError, FrameError, FrameErrorKind, ScrubError, ScrubResult, StoreError,
};
pub use resolver::frame_resolver::FrameResolver;
pub use resolver::state::{ResolverEvent, ResolverSnapshot, ResolverStatus};
pub use store::fs::FsStore;
pub use store::key::StoreKey;
pub use store::keyed::{KeyedStore, MemoryStore};
