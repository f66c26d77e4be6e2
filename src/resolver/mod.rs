//! Latest-request-wins frame resolution.

/// The resolver state machine.
pub mod frame_resolver;
/// Public state, snapshot and event types.
pub mod state;
