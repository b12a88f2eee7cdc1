//! Session continuity across panel opens.
//!
//! The chat panel can be closed and reopened many times while the canvas
//! stays on the same node; the conversation should survive that. Moving
//! the panel to a different node must discard the thread before the
//! widget focuses or polls it. The controller holds the "last seen node"
//! marker across closes and drives the widget's lifecycle handles in a
//! fixed order: reset, then focus, then one update fetch.

use tracing::debug;

/// Imperative lifecycle handles exposed by the chat widget.
pub trait ChatSurface {
    /// Bind the widget to a thread; `None` discards the active thread.
    fn set_thread(&mut self, thread_id: Option<&str>);
    fn focus_composer(&mut self);
    /// Request a single fetch of pending updates. Not a poll loop.
    fn fetch_updates(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PanelPhase {
    #[default]
    Closed,
    /// Open on the same node as the previous open; thread preserved.
    OpenSameContext,
    /// Transient phase while a context change is being handled. The open
    /// handler enters and leaves it within one call, so `phase()` never
    /// returns this value; it is observable only through the
    /// [`ChatSurface`] calls made during the transition (the thread reset
    /// preceding focus and fetch).
    OpenContextChanged,
}

/// What one `handle_open` pass performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTransition {
    /// Context changed: thread reset, composer focused, updates fetched.
    ResetAndResume,
    /// Same context: composer focused and updates fetched only.
    Resume,
    /// Prerequisites unmet: no widget calls, marker updated only.
    Skipped,
}

/// Decides whether the widget's conversation thread survives a panel open.
#[derive(Debug, Clone, Default)]
pub struct SessionContinuity {
    last_node_id: Option<String>,
    phase: PanelPhase,
}

impl SessionContinuity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> PanelPhase {
        self.phase
    }

    /// Node identity remembered from the previous open/close.
    #[must_use]
    pub fn last_node_id(&self) -> Option<&str> {
        self.last_node_id.as_deref()
    }

    /// Handle the panel becoming visible (or its target node changing
    /// while visible).
    ///
    /// `ready` reports whether the panel's prerequisites are met (network
    /// primitive present, workflow identity known). When unmet, no widget
    /// call is made but the marker still moves, so the first ready open
    /// evaluates context correctly.
    ///
    /// On a context change the widget calls run strictly in order: thread
    /// reset, composer focus, update fetch. The widget never focuses or
    /// polls a thread mid-transition.
    pub fn handle_open<S: ChatSurface>(
        &mut self,
        node_id: Option<&str>,
        ready: bool,
        surface: &mut S,
    ) -> OpenTransition {
        let changed = node_id != self.last_node_id.as_deref();
        self.last_node_id = node_id.map(str::to_string);

        if !ready {
            debug!(node_id, "panel open skipped: prerequisites unmet");
            return OpenTransition::Skipped;
        }

        if changed {
            self.phase = PanelPhase::OpenContextChanged;
            debug!(node_id, "node context changed; resetting thread");
            surface.set_thread(None);
        }
        surface.focus_composer();
        surface.fetch_updates();
        self.phase = PanelPhase::OpenSameContext;

        if changed {
            OpenTransition::ResetAndResume
        } else {
            OpenTransition::Resume
        }
    }

    /// Handle the panel closing. Records the current node as "last seen"
    /// and performs no widget calls; in-flight requests are left alone.
    pub fn handle_close(&mut self, node_id: Option<&str>) {
        self.last_node_id = node_id.map(str::to_string);
        self.phase = PanelPhase::Closed;
    }
}
