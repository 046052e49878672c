//! The snapshot-versus-stream reconciliation state machine
//!
//! The snapshot and the event stream arrive over independent channels that
//! can interleave arbitrarily. The one protocol guarantee this machine leans
//! on: the peer emits an event for *every* state change, so as long as the
//! event stream is attached before the snapshot is requested, any change
//! that lands between the peer's dump enumeration and our first read shows
//! up as a buffered event and gets replayed onto the freshly built tree.
//!
//! Phases:
//!
//! ```text
//! Buffering ──(snapshot parsed, buffer drained)──► Live
//!     └── raw lines accumulate     Reconciling ──┘
//! ```
//!
//! The machine itself is synchronous and single-threaded; the async mirror
//! drives it and owns the locking, which keeps every property here testable
//! with plain `Vec<String>` scripts.

use tracing::warn;

use crate::error::SnapshotParseError;
use crate::event::parse_event;
use crate::snapshot::parse_snapshot;
use crate::tree::Wm;

/// Reconciliation phase. `Live` is terminal until shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Event stream attached, raw lines buffering, no tree yet
    Buffering,
    /// Snapshot received, buffered lines replaying onto the new tree
    Reconciling,
    /// Buffer drained; each new line applies immediately
    Live,
}

/// Applies a snapshot plus an ordered stream of raw event lines to one tree,
/// each line exactly once.
#[derive(Debug, Default)]
pub struct Reconciler {
    phase: Phase,
    buffer: Vec<String>,
    state: Wm,
}

impl Default for Phase {
    fn default() -> Self {
        Phase::Buffering
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The mirrored tree. Empty until [`Reconciler::reconcile`] succeeds.
    pub fn state(&self) -> &Wm {
        &self.state
    }

    /// Record one raw line during `Buffering`, preserving arrival order.
    pub fn buffer_line(&mut self, line: impl Into<String>) {
        debug_assert_eq!(self.phase, Phase::Buffering);
        self.buffer.push(line.into());
    }

    /// Build the tree from a snapshot dump, then replay every buffered line
    /// in arrival order and go `Live`.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotParseError`] if the dump is malformed; the mirror
    /// never becomes live in that case.
    pub fn reconcile(&mut self, snapshot: &str) -> Result<(), SnapshotParseError> {
        self.phase = Phase::Reconciling;
        self.state = parse_snapshot(snapshot)?;
        for line in std::mem::take(&mut self.buffer) {
            apply_line(&mut self.state, &line);
        }
        self.phase = Phase::Live;
        Ok(())
    }

    /// Parse and apply one line immediately (`Live` operation).
    ///
    /// A malformed line is reported and dropped; it never halts processing.
    pub fn apply_line(&mut self, line: &str) {
        apply_line(&mut self.state, line);
    }
}

fn apply_line(state: &mut Wm, line: &str) {
    let line = line.trim_end();
    if line.is_empty() {
        return;
    }
    match parse_event(line) {
        Ok(event) => state.apply(&event),
        Err(error) => warn!(%error, "dropping malformed event line"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Id;

    const SNAPSHOT: &str = "M:mon0:mon0:1920x1080+0+0:f \
                            D:I:I:T:f W:win1:1904x1064+8+8:t:f \
                            D:II:II:M:-";

    fn id(s: &str) -> Id {
        Id::from(s)
    }

    #[test]
    fn starts_buffering_with_empty_tree() {
        let rec = Reconciler::new();
        assert_eq!(rec.phase(), Phase::Buffering);
        assert_eq!(rec.state().monitors().count(), 0);
    }

    #[test]
    fn reconcile_replays_buffer_then_goes_live() {
        let mut rec = Reconciler::new();
        rec.buffer_line("node_add mon0 II win2");
        rec.buffer_line("desktop_focus mon0 II");
        rec.reconcile(SNAPSHOT).unwrap();

        assert_eq!(rec.phase(), Phase::Live);
        assert_eq!(rec.state().find_desktop(&id("II")).unwrap().root, Some(id("win2")));
        assert_eq!(
            rec.state().focused_desktop().map(|d| d.id.clone()),
            Some(id("II"))
        );
    }

    #[test]
    fn buffered_and_live_application_agree() {
        // The same scripted sequence through the buffered startup path and
        // through an immediately-live oracle must yield identical trees.
        let script = [
            "node_add mon0 II win2",
            "node_add mon0 II win3",
            "desktop_focus mon0 II",
            "node_focus mon0 II win3",
            "node_state mon0 II win3 floating on",
            "node_geometry mon0 II win3 640x480+100+100",
            "node_swap mon0 I win1 mon0 II win2",
            "node_remove mon0 II win3",
            "desktop_layout mon0 I monocle",
        ];

        let mut buffered = Reconciler::new();
        for line in script {
            buffered.buffer_line(line);
        }
        buffered.reconcile(SNAPSHOT).unwrap();

        let mut live = Reconciler::new();
        live.reconcile(SNAPSHOT).unwrap();
        for line in script {
            live.apply_line(line);
        }

        assert_eq!(buffered.state(), live.state());
    }

    #[test]
    fn buffered_add_then_remove_nets_out() {
        // The snapshot does not mention win2; a buffered add/remove pair
        // must leave no trace of it.
        let mut rec = Reconciler::new();
        rec.buffer_line("node_add mon0 II win2");
        rec.buffer_line("node_remove mon0 II win2");
        rec.reconcile(SNAPSHOT).unwrap();

        assert!(rec.state().find_node(&id("win2")).is_none());
        assert_eq!(rec.state().find_desktop(&id("II")).unwrap().root, None);
    }

    #[test]
    fn buffered_remove_racing_the_snapshot_is_tolerated() {
        // win1 closed after the dump was taken but before we attached: the
        // snapshot still lists it, the buffered remove clears it.
        let mut rec = Reconciler::new();
        rec.buffer_line("node_remove mon0 I win1");
        rec.reconcile(SNAPSHOT).unwrap();

        assert!(rec.state().find_node(&id("win1")).is_none());
        assert!(rec.state().focused_node().is_none());
    }

    #[test]
    fn malformed_buffered_line_does_not_block_later_lines() {
        let mut rec = Reconciler::new();
        rec.buffer_line("node_add mon0");
        rec.buffer_line("desktop_focus mon0 II");
        rec.reconcile(SNAPSHOT).unwrap();

        assert_eq!(rec.phase(), Phase::Live);
        assert_eq!(
            rec.state().focused_desktop().map(|d| d.id.clone()),
            Some(id("II"))
        );
    }

    #[test]
    fn malformed_live_line_does_not_block_later_lines() {
        let mut rec = Reconciler::new();
        rec.reconcile(SNAPSHOT).unwrap();

        rec.apply_line("node_focus mon0");
        rec.apply_line("desktop_focus mon0 II");

        assert_eq!(rec.phase(), Phase::Live);
        assert_eq!(
            rec.state().focused_desktop().map(|d| d.id.clone()),
            Some(id("II"))
        );
    }

    #[test]
    fn unknown_event_kind_is_ignored_silently() {
        let mut rec = Reconciler::new();
        rec.reconcile(SNAPSHOT).unwrap();
        let before = rec.state().clone();

        rec.apply_line("pointer_action mon0 move begin");

        assert_eq!(rec.state(), &before);
    }

    #[test]
    fn malformed_snapshot_fails_reconciliation() {
        let mut rec = Reconciler::new();
        rec.buffer_line("desktop_focus mon0 II");
        let err = rec.reconcile("M:mon0:mon0:oops:f").unwrap_err();
        assert!(err.reason.contains("geometry"), "{}", err.reason);
        assert_ne!(rec.phase(), Phase::Live);
    }
}
