//! Decoded frame cache.

/// LRU + TTL bounded cache of decoded bitmaps keyed by frame index.
pub mod frame_cache;
