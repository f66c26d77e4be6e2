//! Raw bytes to displayable bitmap.

/// Bitmap type, decoder trait and the `image`-backed decoder.
pub mod bitmap;
