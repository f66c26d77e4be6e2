//! Keyed frame stores.
//!
//! A store maps `(scene, frame)` to raw encoded bytes. The resolver only reads from it; writes
//! exist for tooling and tests.

/// Directory-backed store.
pub mod fs;
/// `(SceneId, FrameIndex)` <-> string key codec.
pub mod key;
/// Store trait and the in-memory store.
pub mod keyed;
