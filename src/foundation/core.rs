use crate::foundation::error::{ScrubError, ScrubResult};

/// Absolute 0-based frame index within a scene.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

impl std::fmt::Display for FrameIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque identifier of the scene that owns a set of frames.
///
/// Scene ids end up in store file names, so path separators are rejected.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String")]
pub struct SceneId(String);

impl SceneId {
    /// Create a validated scene id: non-empty, without `/` or `\`.
    pub fn new(id: impl Into<String>) -> ScrubResult<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ScrubError::validation("scene id must be non-empty"));
        }
        if id.contains(['/', '\\']) {
            return Err(ScrubError::validation(format!(
                "scene id '{id}' must not contain path separators"
            )));
        }
        Ok(Self(id))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SceneId {
    type Error = ScrubError;

    fn try_from(id: String) -> ScrubResult<Self> {
        Self::new(id)
    }
}

impl std::fmt::Display for SceneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Half-open frame range `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FrameRange {
    /// Inclusive range start.
    pub start: FrameIndex,
    /// Exclusive range end.
    pub end: FrameIndex,
}

impl FrameRange {
    /// Create a validated range with `start <= end`.
    pub fn new(start: FrameIndex, end: FrameIndex) -> ScrubResult<Self> {
        if start.0 > end.0 {
            return Err(ScrubError::validation("FrameRange start must be <= end"));
        }
        Ok(Self { start, end })
    }

    /// Parse `"a..b"` (half-open) or a single index `"a"` (one frame).
    pub fn parse(s: &str) -> ScrubResult<Self> {
        let parse_idx = |v: &str| {
            v.trim()
                .parse::<u64>()
                .map(FrameIndex)
                .map_err(|e| ScrubError::validation(format!("invalid frame index '{v}': {e}")))
        };
        match s.split_once("..") {
            Some((a, b)) => Self::new(parse_idx(a)?, parse_idx(b)?),
            None => {
                let a = parse_idx(s)?;
                Self::new(a, FrameIndex(a.0.saturating_add(1)))
            }
        }
    }

    /// Number of frames contained in the range.
    pub fn len_frames(self) -> u64 {
        self.end.0.saturating_sub(self.start.0)
    }

    /// Return `true` when the range has no frames.
    pub fn is_empty(self) -> bool {
        self.start.0 == self.end.0
    }

    /// Return `true` when `f` is inside `[start, end)`.
    pub fn contains(self, f: FrameIndex) -> bool {
        self.start.0 <= f.0 && f.0 < self.end.0
    }

    /// Iterate the frame indices in increasing order.
    pub fn iter(self) -> impl Iterator<Item = FrameIndex> {
        (self.start.0..self.end.0).map(FrameIndex)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
