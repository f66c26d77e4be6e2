use crate::foundation::core::{FrameIndex, SceneId};

const SEPARATOR: &str = "_frame_";

/// Encoded store key for one frame of one scene: `"{scene}_frame_{index}"`.
///
/// The mapping is injective: the index is the all-digit suffix after the *last* separator, so a
/// scene id that itself contains `_frame_` still round-trips.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreKey(String);

impl StoreKey {
    /// Encode the key for `(scene, index)`.
    pub fn new(scene: &SceneId, index: FrameIndex) -> Self {
        Self(format!("{}{SEPARATOR}{}", scene.as_str(), index.0))
    }

    /// Borrow the encoded key.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decode a key produced by [`StoreKey::new`].
    pub fn parse(s: &str) -> Option<(SceneId, FrameIndex)> {
        let (scene, idx) = s.rsplit_once(SEPARATOR)?;
        if idx.is_empty() || !idx.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        // Leading zeros would give a second spelling of the same index.
        if idx.len() > 1 && idx.starts_with('0') {
            return None;
        }
        let index = idx.parse::<u64>().ok()?;
        let scene = SceneId::new(scene).ok()?;
        Some((scene, FrameIndex(index)))
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/store/key.rs"]
mod tests;
