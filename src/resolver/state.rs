use std::sync::Arc;

use crate::foundation::core::FrameIndex;
use crate::foundation::error::FrameError;

/// Bitmap-free view of the resolver state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolverStatus {
    /// No request has been made yet.
    Idle,
    /// The requested frame missed the cache; store read and decode are pending.
    Fetching(FrameIndex),
    /// The requested frame is available.
    Resolved(FrameIndex),
    /// The requested frame could not be produced. New requests are still accepted.
    Failed(FrameIndex, FrameError),
    /// `dispose` was called; the resolver is inert.
    Disposed,
}

impl ResolverStatus {
    /// Frame the status refers to, if any.
    pub fn index(&self) -> Option<FrameIndex> {
        match self {
            Self::Fetching(k) | Self::Resolved(k) | Self::Failed(k, _) => Some(*k),
            Self::Idle | Self::Disposed => None,
        }
    }
}

/// Point-in-time copy of the resolver state handed to display collaborators.
#[derive(Debug)]
pub struct ResolverSnapshot<B> {
    /// Most recent request.
    pub requested_index: Option<FrameIndex>,
    /// Bitmap for `requested_index` once resolved. `None` while fetching or failed.
    pub resolved: Option<Arc<B>>,
    /// Failure for `requested_index`, if it failed.
    pub last_error: Option<FrameError>,
    /// State machine position.
    pub status: ResolverStatus,
}

impl<B> Clone for ResolverSnapshot<B> {
    fn clone(&self) -> Self {
        Self {
            requested_index: self.requested_index,
            resolved: self.resolved.clone(),
            last_error: self.last_error.clone(),
            status: self.status.clone(),
        }
    }
}

/// Notification sent to subscribers on every state transition.
#[derive(Debug)]
pub enum ResolverEvent<B> {
    /// A cache miss started (or joined) a fetch for the frame.
    Fetching(FrameIndex),
    /// The frame resolved, from the cache or from the store.
    Resolved(FrameIndex, Arc<B>),
    /// The frame failed to resolve.
    Failed(FrameIndex, FrameError),
}

impl<B> Clone for ResolverEvent<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Fetching(k) => Self::Fetching(*k),
            Self::Resolved(k, b) => Self::Resolved(*k, Arc::clone(b)),
            Self::Failed(k, e) => Self::Failed(*k, e.clone()),
        }
    }
}

impl<B> ResolverEvent<B> {
    /// Frame the event refers to.
    pub fn index(&self) -> FrameIndex {
        match self {
            Self::Fetching(k) | Self::Resolved(k, _) | Self::Failed(k, _) => *k,
        }
    }
}

/// Internal state: the tagged union the transition function works on.
#[derive(Debug)]
pub(crate) enum Phase<B> {
    Idle,
    Fetching(FrameIndex),
    Resolved(FrameIndex, Arc<B>),
    Failed(FrameIndex, FrameError),
    Disposed,
}

impl<B> Phase<B> {
    pub(crate) fn fetching(&self) -> Option<FrameIndex> {
        match self {
            Self::Fetching(k) => Some(*k),
            _ => None,
        }
    }

    pub(crate) fn status(&self) -> ResolverStatus {
        match self {
            Self::Idle => ResolverStatus::Idle,
            Self::Fetching(k) => ResolverStatus::Fetching(*k),
            Self::Resolved(k, _) => ResolverStatus::Resolved(*k),
            Self::Failed(k, e) => ResolverStatus::Failed(*k, e.clone()),
            Self::Disposed => ResolverStatus::Disposed,
        }
    }

    pub(crate) fn snapshot(&self) -> ResolverSnapshot<B> {
        let (resolved, last_error) = match self {
            Self::Resolved(_, b) => (Some(Arc::clone(b)), None),
            Self::Failed(_, e) => (None, Some(e.clone())),
            _ => (None, None),
        };
        let status = self.status();
        ResolverSnapshot {
            requested_index: status.index(),
            resolved,
            last_error,
            status,
        }
    }

    pub(crate) fn event(&self) -> Option<ResolverEvent<B>> {
        match self {
            Self::Fetching(k) => Some(ResolverEvent::Fetching(*k)),
            Self::Resolved(k, b) => Some(ResolverEvent::Resolved(*k, Arc::clone(b))),
            Self::Failed(k, e) => Some(ResolverEvent::Failed(*k, e.clone())),
            Self::Idle | Self::Disposed => None,
        }
    }
}
