//! Client-side mirror of a bspwm-style window manager's state tree.
//!
//! The window manager is the single source of truth; it exposes a Unix
//! socket answering one-shot queries and, on a second connection, streaming
//! change events forever. This crate keeps an always-consistent local copy
//! of the Monitors > Desktops > Nodes hierarchy by fetching one full
//! snapshot and folding the event stream into it, with the snapshot/stream
//! race closed by buffering (subscribe first, reconcile after).
//!
//! Typical use:
//!
//! ```no_run
//! use bspmirror::{socket_path, Mirror};
//!
//! # async fn demo() -> Result<(), bspmirror::MirrorError> {
//! let mut mirror = Mirror::start(socket_path()?).await?;
//! let view = mirror.view();
//! tokio::spawn(async move { mirror.run().await });
//!
//! for monitor in view.monitors() {
//!     println!("{}", monitor.name().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The layers are usable on their own: [`transport`] for raw socket
//! plumbing, [`snapshot`] and [`event`] for the wire grammars, [`tree`]
//! for the pure state model, [`reconciler`] for the phase machine, and
//! [`mirror`] for the async facade tying them together.

pub mod error;
pub mod event;
pub mod geometry;
pub mod mirror;
pub mod reconciler;
pub mod snapshot;
pub mod transport;
pub mod tree;

pub use error::{EventParseError, MirrorError, SnapshotParseError, TransportError};
pub use event::{parse_event, Event};
pub use geometry::Rect;
pub use mirror::{DesktopRef, EntityRef, Mirror, MirrorView, MonitorRef, NodeRef};
pub use reconciler::{Phase, Reconciler};
pub use snapshot::parse_snapshot;
pub use transport::{socket_path, CommandChannel, EventStream};
pub use tree::{
    Desktop, DesktopLayout, Entity, FocusLevel, Id, Monitor, Node, NodeFlag, NodeKind, NodeState,
    StackLayer, Wm,
};
