//! The mirror lifecycle and its read-only facade
//!
//! [`Mirror::start`] owns the startup race: it attaches the event stream
//! *first*, spawns a reader task that feeds raw lines into an ordered
//! channel, then requests the snapshot over the command channel. Everything
//! the peer emitted while the snapshot was in flight is waiting in the
//! channel and is replayed onto the freshly built tree before `start`
//! returns, so the returned mirror is already fully reconciled and live.
//! [`Mirror::run`] then applies each newly arriving line, one critical
//! section per event.
//!
//! Reads go through [`MirrorView`], a cheap cloneable handle safe to use
//! from any task concurrently with the single writer. A view observes the
//! pre- or post-state of each applied event, never a partial mutation.
//! After a transport failure the last-known tree stays readable but
//! [`MirrorView::is_live`] turns false so consumers can decide whether to
//! trust it.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{MirrorError, SnapshotParseError, TransportError};
use crate::geometry::Rect;
use crate::reconciler::{Phase, Reconciler};
use crate::transport::{CommandChannel, EventStream};
use crate::tree::{Desktop, DesktopLayout, Id, Monitor, Node, NodeKind, NodeState, StackLayer, Wm};

/// Query whose response is the full-state dump
const SNAPSHOT_QUERY: &[&str] = &["wm", "-d"];

type RawLine = Result<String, TransportError>;

struct Shared {
    rec: RwLock<Reconciler>,
    live: AtomicBool,
    closing: AtomicBool,
    shutdown: Notify,
}

/// A live mirror of the window manager's state tree.
///
/// Owns both channels and the single-writer reconciliation loop. Obtain
/// concurrent read access through [`Mirror::view`].
pub struct Mirror {
    shared: Arc<Shared>,
    command: CommandChannel,
    events: mpsc::UnboundedReceiver<RawLine>,
    reader: JoinHandle<()>,
}

impl Mirror {
    /// Connect to the window manager and drive the mirror to `Live`.
    ///
    /// Returns only once the snapshot is parsed and every event buffered
    /// during the fetch has been replayed.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`] on either channel, or a
    /// [`SnapshotParseError`](crate::error::SnapshotParseError) for a
    /// malformed dump, aborts startup; the mirror never becomes queryable.
    pub async fn start(socket_path: impl AsRef<Path>) -> Result<Self, MirrorError> {
        let path = socket_path.as_ref();

        // Subscribe before requesting the snapshot: every change that lands
        // between the peer's dump enumeration and our first read is then
        // guaranteed to arrive as a buffered event.
        let mut stream = EventStream::subscribe(path).await?;
        let (tx, events) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            loop {
                match stream.next_line().await {
                    Ok(line) => {
                        if tx.send(Ok(line)).is_err() {
                            // Receiver gone, mirror is shutting down
                            return;
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(Err(error));
                        return;
                    }
                }
            }
        });

        match Self::bootstrap(path, events).await {
            Ok(mirror_parts) => {
                let (command, events, shared) = mirror_parts;
                info!("mirror reconciled and live");
                Ok(Self { shared, command, events, reader })
            }
            Err(error) => {
                reader.abort();
                Err(error)
            }
        }
    }

    async fn bootstrap(
        path: &Path,
        mut events: mpsc::UnboundedReceiver<RawLine>,
    ) -> Result<(CommandChannel, mpsc::UnboundedReceiver<RawLine>, Arc<Shared>), MirrorError> {
        let mut command = CommandChannel::connect(path).await?;
        let blob = command.request(SNAPSHOT_QUERY).await?;
        let snapshot = std::str::from_utf8(&blob).map_err(|error| SnapshotParseError {
            token: format!("0x{:02x}", blob[error.valid_up_to()]),
            offset: error.valid_up_to(),
            reason: "snapshot is not valid utf-8".to_string(),
        })?;

        let shared = Arc::new(Shared {
            rec: RwLock::new(Reconciler::new()),
            live: AtomicBool::new(false),
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
        });

        {
            let mut rec = shared.rec.write().unwrap();
            loop {
                match events.try_recv() {
                    Ok(Ok(line)) => rec.buffer_line(line),
                    Ok(Err(error)) => return Err(error.into()),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        return Err(TransportError::ConnectionClosed.into());
                    }
                }
            }
            debug!("reconciling snapshot against buffered events");
            rec.reconcile(snapshot)?;
        }
        shared.live.store(true, Ordering::Release);

        Ok((command, events, shared))
    }

    /// A cheap cloneable read handle, usable from any task.
    pub fn view(&self) -> MirrorView {
        MirrorView { shared: self.shared.clone() }
    }

    /// Forward an arbitrary command to the window manager, verbatim, and
    /// return its raw response.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] on channel failure.
    pub async fn request(&mut self, args: &[&str]) -> Result<Vec<u8>, TransportError> {
        self.command.request(args).await
    }

    /// Apply live events until shutdown or failure.
    ///
    /// Returns `Ok(())` after an owner-initiated [`MirrorView::close`].
    /// On a transport failure the tree is marked stale (still readable,
    /// no longer updated) and the error is returned.
    pub async fn run(&mut self) -> Result<(), MirrorError> {
        loop {
            tokio::select! {
                _ = self.shared.shutdown.notified() => {
                    self.shared.live.store(false, Ordering::Release);
                    self.reader.abort();
                    debug!("mirror closed by owner");
                    return Ok(());
                }
                item = self.events.recv() => match item {
                    Some(Ok(line)) => {
                        self.shared.rec.write().unwrap().apply_line(&line);
                    }
                    Some(Err(error)) => {
                        self.shared.live.store(false, Ordering::Release);
                        if self.shared.closing.load(Ordering::Acquire) {
                            return Ok(());
                        }
                        return Err(error.into());
                    }
                    None => {
                        self.shared.live.store(false, Ordering::Release);
                        if self.shared.closing.load(Ordering::Acquire) {
                            return Ok(());
                        }
                        return Err(TransportError::ConnectionClosed.into());
                    }
                }
            }
        }
    }

    /// Shut the mirror down; pending [`Mirror::run`] returns `Ok(())`.
    pub fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
        self.shared.shutdown.notify_one();
    }
}

impl Drop for Mirror {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Read-only, concurrently usable facade over the mirrored tree.
#[derive(Clone)]
pub struct MirrorView {
    shared: Arc<Shared>,
}

impl MirrorView {
    fn with<R>(&self, f: impl FnOnce(&Wm) -> R) -> R {
        let rec = self.shared.rec.read().unwrap();
        f(rec.state())
    }

    /// False before reconciliation finishes and after the mirror went
    /// stale or was closed.
    pub fn is_live(&self) -> bool {
        self.shared.live.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> Phase {
        self.shared.rec.read().unwrap().phase()
    }

    /// Request shutdown of the owning [`Mirror`].
    pub fn close(&self) {
        self.shared.closing.store(true, Ordering::Release);
        self.shared.shutdown.notify_one();
    }

    /// A deep copy of the whole tree at this instant.
    pub fn snapshot(&self) -> Wm {
        self.with(Clone::clone)
    }

    /// Monitors in display order.
    pub fn monitors(&self) -> Vec<MonitorRef> {
        self.with(|wm| {
            wm.monitors()
                .map(|m| MonitorRef { view: self.clone(), id: m.id.clone() })
                .collect()
        })
    }

    pub fn monitor(&self, id: &Id) -> Option<MonitorRef> {
        self.with(|wm| wm.find_monitor(id).map(|_| MonitorRef { view: self.clone(), id: id.clone() }))
    }

    pub fn desktop(&self, id: &Id) -> Option<DesktopRef> {
        self.with(|wm| wm.find_desktop(id).map(|_| DesktopRef { view: self.clone(), id: id.clone() }))
    }

    pub fn node(&self, id: &Id) -> Option<NodeRef> {
        self.with(|wm| wm.find_node(id).map(|_| NodeRef { view: self.clone(), id: id.clone() }))
    }

    /// Resolve an identifier to whichever entity owns it.
    pub fn resolve(&self, id: &Id) -> Option<EntityRef> {
        self.with(|wm| match wm.resolve(id) {
            Some(crate::tree::Entity::Monitor(m)) => Some(EntityRef::Monitor(MonitorRef {
                view: self.clone(),
                id: m.id.clone(),
            })),
            Some(crate::tree::Entity::Desktop(d)) => Some(EntityRef::Desktop(DesktopRef {
                view: self.clone(),
                id: d.id.clone(),
            })),
            Some(crate::tree::Entity::Node(n)) => Some(EntityRef::Node(NodeRef {
                view: self.clone(),
                id: n.id.clone(),
            })),
            None => None,
        })
    }

    pub fn focused_monitor(&self) -> Option<MonitorRef> {
        self.with(|wm| {
            wm.focused_monitor()
                .map(|m| MonitorRef { view: self.clone(), id: m.id.clone() })
        })
    }

    pub fn focused_desktop(&self) -> Option<DesktopRef> {
        self.with(|wm| {
            wm.focused_desktop()
                .map(|d| DesktopRef { view: self.clone(), id: d.id.clone() })
        })
    }

    pub fn focused_node(&self) -> Option<NodeRef> {
        self.with(|wm| {
            wm.focused_node()
                .map(|n| NodeRef { view: self.clone(), id: n.id.clone() })
        })
    }
}

/// A resolved entity handle, by level.
pub enum EntityRef {
    Monitor(MonitorRef),
    Desktop(DesktopRef),
    Node(NodeRef),
}

/// Identity-stable handle to a monitor.
///
/// Carries only the identifier; every getter reads the current attribute
/// value, so a handle obtained before an update reflects the update
/// afterwards. Getters return `None` once the entity has been removed.
#[derive(Clone)]
pub struct MonitorRef {
    view: MirrorView,
    id: Id,
}

impl MonitorRef {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn exists(&self) -> bool {
        self.view.with(|wm| wm.find_monitor(&self.id).is_some())
    }

    pub fn name(&self) -> Option<String> {
        self.view.with(|wm| wm.find_monitor(&self.id).map(|m| m.name.clone()))
    }

    pub fn geometry(&self) -> Option<Rect> {
        self.view.with(|wm| wm.find_monitor(&self.id).map(|m| m.geometry))
    }

    pub fn is_focused(&self) -> Option<bool> {
        self.view.with(|wm| wm.find_monitor(&self.id).map(|m| m.focused))
    }

    /// Desktops in display order.
    pub fn desktops(&self) -> Vec<DesktopRef> {
        self.view.with(|wm| {
            wm.desktops_of(&self.id)
                .map(|d| DesktopRef { view: self.view.clone(), id: d.id.clone() })
                .collect()
        })
    }

    /// A detached copy of the current monitor record.
    pub fn get(&self) -> Option<Monitor> {
        self.view.with(|wm| wm.find_monitor(&self.id).cloned())
    }
}

/// Identity-stable handle to a desktop. See [`MonitorRef`].
#[derive(Clone)]
pub struct DesktopRef {
    view: MirrorView,
    id: Id,
}

impl DesktopRef {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn exists(&self) -> bool {
        self.view.with(|wm| wm.find_desktop(&self.id).is_some())
    }

    pub fn name(&self) -> Option<String> {
        self.view.with(|wm| wm.find_desktop(&self.id).map(|d| d.name.clone()))
    }

    pub fn layout(&self) -> Option<DesktopLayout> {
        self.view.with(|wm| wm.find_desktop(&self.id).map(|d| d.layout))
    }

    pub fn is_focused(&self) -> Option<bool> {
        self.view.with(|wm| wm.find_desktop(&self.id).map(|d| d.focused))
    }

    pub fn monitor(&self) -> Option<MonitorRef> {
        self.view.with(|wm| {
            wm.find_desktop(&self.id)
                .map(|d| MonitorRef { view: self.view.clone(), id: d.monitor.clone() })
        })
    }

    pub fn root(&self) -> Option<NodeRef> {
        self.view.with(|wm| {
            wm.find_desktop(&self.id)
                .and_then(|d| d.root.clone())
                .map(|id| NodeRef { view: self.view.clone(), id })
        })
    }

    /// The node tree in pre-order.
    pub fn tree(&self) -> Vec<NodeRef> {
        self.view.with(|wm| {
            wm.desktop_tree(&self.id)
                .iter()
                .map(|n| NodeRef { view: self.view.clone(), id: n.id.clone() })
                .collect()
        })
    }

    pub fn get(&self) -> Option<Desktop> {
        self.view.with(|wm| wm.find_desktop(&self.id).cloned())
    }
}

/// Identity-stable handle to a node. See [`MonitorRef`].
#[derive(Clone)]
pub struct NodeRef {
    view: MirrorView,
    id: Id,
}

impl NodeRef {
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn exists(&self) -> bool {
        self.view.with(|wm| wm.find_node(&self.id).is_some())
    }

    pub fn is_leaf(&self) -> Option<bool> {
        self.view
            .with(|wm| wm.find_node(&self.id).map(|n| matches!(n.kind, NodeKind::Leaf)))
    }

    pub fn state(&self) -> Option<NodeState> {
        self.view.with(|wm| wm.find_node(&self.id).map(|n| n.state))
    }

    pub fn layer(&self) -> Option<StackLayer> {
        self.view.with(|wm| wm.find_node(&self.id).map(|n| n.layer))
    }

    pub fn geometry(&self) -> Option<Rect> {
        self.view.with(|wm| wm.find_node(&self.id).map(|n| n.geometry))
    }

    pub fn is_hidden(&self) -> Option<bool> {
        self.view.with(|wm| wm.find_node(&self.id).map(|n| n.hidden))
    }

    pub fn is_focused(&self) -> Option<bool> {
        self.view.with(|wm| wm.find_node(&self.id).map(|n| n.focused))
    }

    /// Both children of a split, in order; empty for a leaf.
    pub fn children(&self) -> Vec<NodeRef> {
        self.view.with(|wm| match wm.find_node(&self.id).map(|n| &n.kind) {
            Some(NodeKind::Split { first, second }) => vec![
                NodeRef { view: self.view.clone(), id: first.clone() },
                NodeRef { view: self.view.clone(), id: second.clone() },
            ],
            _ => Vec::new(),
        })
    }

    pub fn parent(&self) -> Option<NodeRef> {
        self.view.with(|wm| {
            wm.find_node(&self.id)
                .and_then(|n| n.parent.clone())
                .map(|id| NodeRef { view: self.view.clone(), id })
        })
    }

    pub fn desktop(&self) -> Option<DesktopRef> {
        self.view.with(|wm| {
            wm.find_node(&self.id)
                .map(|n| DesktopRef { view: self.view.clone(), id: n.desktop.clone() })
        })
    }

    pub fn get(&self) -> Option<Node> {
        self.view.with(|wm| wm.find_node(&self.id).cloned())
    }
}
