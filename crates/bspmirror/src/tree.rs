//! The mirrored window manager state tree
//!
//! [`Wm`] owns the Monitors → Desktops → Nodes hierarchy. Storage is
//! identifier-addressed: entities live in id-keyed maps, every structural
//! link (parent, child, owning monitor, focus) is a plain [`Id`], and sibling
//! ordering is kept in explicit vectors. The maps double as the lookup index,
//! so `find_*` and every mutation primitive resolve their targets in
//! amortized constant time, and removing an entity can never leave a live
//! dangling reference behind - at worst a stale id that no longer resolves,
//! and the primitives clear those in the same step.
//!
//! ## Mutation contract
//!
//! The primitives are written for an at-least-once, racy delivery channel:
//!
//! - inserting an entity that already exists refreshes its attributes in
//!   place instead of duplicating it;
//! - removing (or updating) an entity that is absent is a logged no-op,
//!   since a remove may race with the startup snapshot;
//! - each primitive leaves the tree shape, sibling order and focus
//!   references valid when it returns.
//!
//! Updates always mutate the existing entity keyed by its id, so a held id
//! keeps resolving to the same logical entity and observes fresh attribute
//! values after each event.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::Event;
use crate::geometry::Rect;

/// An opaque entity identifier, stable for the entity's lifetime.
///
/// The window manager assigns these; the mirror never interprets them beyond
/// equality. Ids starting with `@` are reserved for containers synthesized
/// by the mirror itself (see [`Wm::insert_node`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(String);

impl Id {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Id for a split container created locally when a `node_add` event
    /// carries no container of its own.
    fn synthetic_split(seq: u64) -> Self {
        Id(format!("@split/{seq}"))
    }
}

impl From<&str> for Id {
    fn from(s: &str) -> Self {
        Id(s.to_string())
    }
}

impl From<String> for Id {
    fn from(s: String) -> Self {
        Id(s)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Layout mode of a desktop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesktopLayout {
    Tiled,
    Monocle,
}

/// State of a leaf node (window)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    Tiled,
    PseudoTiled,
    Floating,
    Fullscreen,
}

/// Stacking layer of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackLayer {
    Below,
    Normal,
    Above,
}

/// Boolean node flags toggled by `node_flag` events.
///
/// Only `hidden` is modeled as tree state; the remaining flags are accepted
/// from the wire so newer peers do not trip the malformed-line path, but they
/// carry no mirrored attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeFlag {
    Hidden,
    Sticky,
    Locked,
    Marked,
    Urgent,
}

/// Which focus reference a focus event targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FocusLevel {
    Monitor,
    Desktop,
    Node,
}

/// Leaf window or internal split container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A window
    Leaf,
    /// An internal container with exactly two children, in order
    Split { first: Id, second: Id },
}

/// A node in a desktop's binary layout tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: Id,
    pub kind: NodeKind,
    pub state: NodeState,
    pub layer: StackLayer,
    pub geometry: Rect,
    pub hidden: bool,
    pub focused: bool,
    /// Containing split, `None` for a desktop root
    pub parent: Option<Id>,
    /// Owning desktop
    pub desktop: Id,
}

/// A named, ordered workspace on a monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Desktop {
    pub id: Id,
    pub name: String,
    pub layout: DesktopLayout,
    pub focused: bool,
    /// Owning monitor
    pub monitor: Id,
    /// Root of the node tree, absent for an empty desktop
    pub root: Option<Id>,
}

/// A physical or logical display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Id,
    pub name: String,
    pub geometry: Rect,
    pub focused: bool,
    /// Desktops in display order
    pub desktops: Vec<Id>,
}

/// A resolved entity reference, returned by [`Wm::resolve`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Entity<'a> {
    Monitor(&'a Monitor),
    Desktop(&'a Desktop),
    Node(&'a Node),
}

/// The whole mirrored tree.
///
/// The three focus references name entities elsewhere in the maps; they are
/// never ownership links and are cleared in the same primitive that removes
/// their referent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Wm {
    pub(crate) monitor_order: Vec<Id>,
    pub(crate) monitors: HashMap<Id, Monitor>,
    pub(crate) desktops: HashMap<Id, Desktop>,
    pub(crate) nodes: HashMap<Id, Node>,
    pub(crate) focused_monitor: Option<Id>,
    pub(crate) focused_desktop: Option<Id>,
    pub(crate) focused_node: Option<Id>,
    /// Counter for locally synthesized split container ids
    #[serde(skip)]
    pub(crate) split_seq: u64,
}

impl Wm {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Monitors in display order
    pub fn monitors(&self) -> impl Iterator<Item = &Monitor> {
        self.monitor_order
            .iter()
            .filter_map(move |id| self.monitors.get(id))
    }

    pub fn find_monitor(&self, id: &Id) -> Option<&Monitor> {
        self.monitors.get(id)
    }

    pub fn find_desktop(&self, id: &Id) -> Option<&Desktop> {
        self.desktops.get(id)
    }

    pub fn find_node(&self, id: &Id) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Resolve an identifier to whichever entity owns it
    pub fn resolve(&self, id: &Id) -> Option<Entity<'_>> {
        if let Some(m) = self.monitors.get(id) {
            return Some(Entity::Monitor(m));
        }
        if let Some(d) = self.desktops.get(id) {
            return Some(Entity::Desktop(d));
        }
        self.nodes.get(id).map(Entity::Node)
    }

    /// Desktops of a monitor in display order
    pub fn desktops_of(&self, monitor: &Id) -> impl Iterator<Item = &Desktop> {
        self.monitors
            .get(monitor)
            .into_iter()
            .flat_map(|m| m.desktops.iter())
            .filter_map(move |id| self.desktops.get(id))
    }

    /// A desktop's node tree in pre-order
    pub fn desktop_tree(&self, desktop: &Id) -> Vec<&Node> {
        let mut out = Vec::new();
        if let Some(root) = self.desktops.get(desktop).and_then(|d| d.root.as_ref()) {
            self.collect_preorder(root, &mut out);
        }
        out
    }

    fn collect_preorder<'a>(&'a self, id: &Id, out: &mut Vec<&'a Node>) {
        if let Some(node) = self.nodes.get(id) {
            out.push(node);
            if let NodeKind::Split { first, second } = &node.kind {
                self.collect_preorder(first, out);
                self.collect_preorder(second, out);
            }
        }
    }

    pub fn focused_monitor(&self) -> Option<&Monitor> {
        self.focused_monitor.as_ref().and_then(|id| self.monitors.get(id))
    }

    pub fn focused_desktop(&self) -> Option<&Desktop> {
        self.focused_desktop.as_ref().and_then(|id| self.desktops.get(id))
    }

    pub fn focused_node(&self) -> Option<&Node> {
        self.focused_node.as_ref().and_then(|id| self.nodes.get(id))
    }

    // ------------------------------------------------------------------
    // Event dispatch
    // ------------------------------------------------------------------

    /// Apply one parsed event to the tree.
    ///
    /// This is the single entry point the reconciler uses; it dispatches to
    /// the mutation primitive matching the event kind.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::MonitorAdd { monitor, name, geometry } => {
                self.insert_monitor(monitor, name, *geometry);
            }
            Event::MonitorRemove { monitor } => self.remove_monitor(monitor),
            Event::MonitorRename { monitor, new_name, .. } => {
                self.rename_monitor(monitor, new_name);
            }
            Event::MonitorGeometry { monitor, geometry } => {
                self.set_monitor_geometry(monitor, *geometry);
            }
            Event::MonitorFocus { monitor } => self.set_focus(FocusLevel::Monitor, monitor),
            Event::DesktopAdd { monitor, desktop, name } => {
                self.insert_desktop(monitor, desktop, name);
            }
            Event::DesktopRemove { desktop, .. } => self.remove_desktop(desktop),
            Event::DesktopRename { desktop, new_name, .. } => {
                self.rename_desktop(desktop, new_name);
            }
            Event::DesktopTransfer { desktop, target, .. } => {
                self.reparent_desktop(desktop, target);
            }
            // Focus events name every level above their target; focus at
            // those levels follows along.
            Event::DesktopFocus { monitor, desktop } => {
                self.set_focus(FocusLevel::Monitor, monitor);
                self.set_focus(FocusLevel::Desktop, desktop);
            }
            Event::DesktopLayout { desktop, layout, .. } => {
                self.set_desktop_layout(desktop, *layout);
            }
            Event::NodeAdd { desktop, node, .. } => self.insert_node(desktop, node),
            Event::NodeRemove { node, .. } => self.remove_node(node),
            Event::NodeSwap { node, other_node, .. } => self.swap_nodes(node, other_node),
            Event::NodeTransfer { node, target_desktop, .. } => {
                self.reparent_node(node, target_desktop);
            }
            Event::NodeFocus { monitor, desktop, node } => {
                self.set_focus(FocusLevel::Monitor, monitor);
                self.set_focus(FocusLevel::Desktop, desktop);
                self.set_focus(FocusLevel::Node, node);
            }
            Event::NodeGeometry { node, geometry, .. } => {
                self.set_node_geometry(node, *geometry);
            }
            Event::NodeState { node, state, enabled, .. } => {
                self.set_node_state(node, *state, *enabled);
            }
            Event::NodeFlag { node, flag, enabled, .. } => {
                self.set_node_flag(node, *flag, *enabled);
            }
            Event::NodeLayer { node, layer, .. } => self.set_node_layer(node, *layer),
            Event::Unknown { raw } => {
                // Forward-compatibility path: record and move on
                debug!(line = %raw, "ignoring unknown event kind");
            }
        }
    }

    // ------------------------------------------------------------------
    // Monitor primitives
    // ------------------------------------------------------------------

    pub fn insert_monitor(&mut self, id: &Id, name: &str, geometry: Rect) {
        if let Some(existing) = self.monitors.get_mut(id) {
            // Duplicate delivery: refresh attributes, keep position and desktops
            debug!(monitor = %id, "duplicate monitor add, updating attributes");
            existing.name = name.to_string();
            existing.geometry = geometry;
            return;
        }
        self.monitor_order.push(id.clone());
        self.monitors.insert(
            id.clone(),
            Monitor {
                id: id.clone(),
                name: name.to_string(),
                geometry,
                focused: false,
                desktops: Vec::new(),
            },
        );
    }

    pub fn remove_monitor(&mut self, id: &Id) {
        let Some(monitor) = self.monitors.remove(id) else {
            warn!(monitor = %id, "remove for absent monitor, ignoring");
            return;
        };
        self.monitor_order.retain(|m| m != id);
        for desktop in &monitor.desktops {
            if let Some(desktop) = self.desktops.remove(desktop) {
                if let Some(root) = &desktop.root {
                    self.drop_subtree(root);
                }
            }
        }
        self.prune_focus();
    }

    pub fn rename_monitor(&mut self, id: &Id, name: &str) {
        match self.monitors.get_mut(id) {
            Some(monitor) => monitor.name = name.to_string(),
            None => warn!(monitor = %id, "rename for absent monitor, ignoring"),
        }
    }

    pub fn set_monitor_geometry(&mut self, id: &Id, geometry: Rect) {
        match self.monitors.get_mut(id) {
            Some(monitor) => monitor.geometry = geometry,
            None => warn!(monitor = %id, "geometry update for absent monitor, ignoring"),
        }
    }

    // ------------------------------------------------------------------
    // Desktop primitives
    // ------------------------------------------------------------------

    pub fn insert_desktop(&mut self, monitor: &Id, id: &Id, name: &str) {
        if let Some(existing) = self.desktops.get_mut(id) {
            debug!(desktop = %id, "duplicate desktop add, updating attributes");
            existing.name = name.to_string();
            return;
        }
        let Some(owner) = self.monitors.get_mut(monitor) else {
            warn!(desktop = %id, monitor = %monitor, "desktop add under absent monitor, ignoring");
            return;
        };
        owner.desktops.push(id.clone());
        self.desktops.insert(
            id.clone(),
            Desktop {
                id: id.clone(),
                name: name.to_string(),
                layout: DesktopLayout::Tiled,
                focused: false,
                monitor: monitor.clone(),
                root: None,
            },
        );
    }

    pub fn remove_desktop(&mut self, id: &Id) {
        let Some(desktop) = self.desktops.remove(id) else {
            warn!(desktop = %id, "remove for absent desktop, ignoring");
            return;
        };
        if let Some(monitor) = self.monitors.get_mut(&desktop.monitor) {
            monitor.desktops.retain(|d| d != id);
        }
        if let Some(root) = &desktop.root {
            self.drop_subtree(root);
        }
        self.prune_focus();
    }

    pub fn rename_desktop(&mut self, id: &Id, name: &str) {
        match self.desktops.get_mut(id) {
            Some(desktop) => desktop.name = name.to_string(),
            None => warn!(desktop = %id, "rename for absent desktop, ignoring"),
        }
    }

    pub fn set_desktop_layout(&mut self, id: &Id, layout: DesktopLayout) {
        match self.desktops.get_mut(id) {
            Some(desktop) => desktop.layout = layout,
            None => warn!(desktop = %id, "layout update for absent desktop, ignoring"),
        }
    }

    /// Move a desktop to the end of another monitor's display order
    pub fn reparent_desktop(&mut self, id: &Id, target: &Id) {
        if !self.monitors.contains_key(target) {
            warn!(desktop = %id, monitor = %target, "transfer to absent monitor, ignoring");
            return;
        }
        let Some(desktop) = self.desktops.get_mut(id) else {
            warn!(desktop = %id, "transfer for absent desktop, ignoring");
            return;
        };
        let source = std::mem::replace(&mut desktop.monitor, target.clone());
        if let Some(monitor) = self.monitors.get_mut(&source) {
            monitor.desktops.retain(|d| d != id);
        }
        if let Some(monitor) = self.monitors.get_mut(target) {
            monitor.desktops.push(id.clone());
        }
    }

    // ------------------------------------------------------------------
    // Node primitives
    // ------------------------------------------------------------------

    /// Insert a new leaf into a desktop's tree.
    ///
    /// An empty desktop adopts the leaf as its root. Otherwise a synthetic
    /// split container takes the root's place, with the old root as first
    /// child and the new leaf as second - the same shape the window manager
    /// itself produces when it tiles a new window.
    pub fn insert_node(&mut self, desktop: &Id, id: &Id) {
        if self.nodes.contains_key(id) {
            debug!(node = %id, "duplicate node add, ignoring");
            return;
        }
        let Some(owner) = self.desktops.get(desktop) else {
            warn!(node = %id, desktop = %desktop, "node add under absent desktop, ignoring");
            return;
        };
        let leaf = Node {
            id: id.clone(),
            kind: NodeKind::Leaf,
            state: NodeState::Tiled,
            layer: StackLayer::Normal,
            geometry: Rect::default(),
            hidden: false,
            focused: false,
            parent: None,
            desktop: desktop.clone(),
        };
        match owner.root.clone() {
            None => {
                self.nodes.insert(id.clone(), leaf);
                if let Some(owner) = self.desktops.get_mut(desktop) {
                    owner.root = Some(id.clone());
                }
            }
            Some(old_root) => {
                self.split_seq += 1;
                let split_id = Id::synthetic_split(self.split_seq);
                let geometry = self
                    .nodes
                    .get(&old_root)
                    .map(|n| n.geometry)
                    .unwrap_or_default();
                self.nodes.insert(
                    split_id.clone(),
                    Node {
                        id: split_id.clone(),
                        kind: NodeKind::Split {
                            first: old_root.clone(),
                            second: id.clone(),
                        },
                        state: NodeState::Tiled,
                        layer: StackLayer::Normal,
                        geometry,
                        hidden: false,
                        focused: false,
                        parent: None,
                        desktop: desktop.clone(),
                    },
                );
                self.nodes.insert(
                    id.clone(),
                    Node {
                        parent: Some(split_id.clone()),
                        ..leaf
                    },
                );
                if let Some(node) = self.nodes.get_mut(&old_root) {
                    node.parent = Some(split_id.clone());
                }
                if let Some(owner) = self.desktops.get_mut(desktop) {
                    owner.root = Some(split_id);
                }
            }
        }
    }

    /// Remove a node and its subtree, collapsing the parent split
    pub fn remove_node(&mut self, id: &Id) {
        if !self.nodes.contains_key(id) {
            warn!(node = %id, "remove for absent node, ignoring");
            return;
        }
        self.detach_node(id);
        self.drop_subtree(id);
        self.prune_focus();
    }

    /// Move a subtree to another desktop, attaching under the same placement
    /// rule as [`Wm::insert_node`]
    pub fn reparent_node(&mut self, id: &Id, target: &Id) {
        if !self.nodes.contains_key(id) {
            warn!(node = %id, "transfer for absent node, ignoring");
            return;
        }
        if !self.desktops.contains_key(target) {
            warn!(node = %id, desktop = %target, "transfer to absent desktop, ignoring");
            return;
        }
        self.detach_node(id);
        self.attach_subtree(id, target);
        self.set_subtree_desktop(id, target);
    }

    /// Exchange the tree positions of two subtrees
    pub fn swap_nodes(&mut self, a: &Id, b: &Id) {
        if a == b {
            return;
        }
        if !self.nodes.contains_key(a) || !self.nodes.contains_key(b) {
            warn!(node = %a, other = %b, "swap involving absent node, ignoring");
            return;
        }
        if self.is_ancestor(a, b) || self.is_ancestor(b, a) {
            warn!(node = %a, other = %b, "swap between nested nodes, ignoring");
            return;
        }

        let slot_a = self.attachment(a);
        let slot_b = self.attachment(b);
        let desk_a = self.nodes[a].desktop.clone();
        let desk_b = self.nodes[b].desktop.clone();

        self.fill_slot(&slot_a, b);
        self.fill_slot(&slot_b, a);
        self.set_subtree_desktop(a, &desk_b);
        self.set_subtree_desktop(b, &desk_a);
    }

    pub fn set_node_geometry(&mut self, id: &Id, geometry: Rect) {
        match self.nodes.get_mut(id) {
            Some(node) => node.geometry = geometry,
            None => warn!(node = %id, "geometry update for absent node, ignoring"),
        }
    }

    /// `node_state X on` enters state X; `node_state X off` falls back to
    /// tiled when X is still the current state.
    pub fn set_node_state(&mut self, id: &Id, state: NodeState, enabled: bool) {
        match self.nodes.get_mut(id) {
            Some(node) => {
                if enabled {
                    node.state = state;
                } else if node.state == state {
                    node.state = NodeState::Tiled;
                }
            }
            None => warn!(node = %id, "state update for absent node, ignoring"),
        }
    }

    pub fn set_node_flag(&mut self, id: &Id, flag: NodeFlag, enabled: bool) {
        match self.nodes.get_mut(id) {
            Some(node) => match flag {
                NodeFlag::Hidden => node.hidden = enabled,
                other => debug!(node = %id, flag = ?other, "unmodeled node flag, ignoring"),
            },
            None => warn!(node = %id, "flag update for absent node, ignoring"),
        }
    }

    pub fn set_node_layer(&mut self, id: &Id, layer: StackLayer) {
        match self.nodes.get_mut(id) {
            Some(node) => node.layer = layer,
            None => warn!(node = %id, "layer update for absent node, ignoring"),
        }
    }

    // ------------------------------------------------------------------
    // Focus
    // ------------------------------------------------------------------

    /// Move one focus reference to a new entity, clearing the previous
    /// holder's flag in the same step.
    pub fn set_focus(&mut self, level: FocusLevel, id: &Id) {
        match level {
            FocusLevel::Monitor => {
                if !self.monitors.contains_key(id) {
                    warn!(monitor = %id, "focus for absent monitor, ignoring");
                    return;
                }
                if let Some(prev) = self.focused_monitor.take() {
                    if let Some(m) = self.monitors.get_mut(&prev) {
                        m.focused = false;
                    }
                }
                if let Some(m) = self.monitors.get_mut(id) {
                    m.focused = true;
                }
                self.focused_monitor = Some(id.clone());
            }
            FocusLevel::Desktop => {
                if !self.desktops.contains_key(id) {
                    warn!(desktop = %id, "focus for absent desktop, ignoring");
                    return;
                }
                if let Some(prev) = self.focused_desktop.take() {
                    if let Some(d) = self.desktops.get_mut(&prev) {
                        d.focused = false;
                    }
                }
                if let Some(d) = self.desktops.get_mut(id) {
                    d.focused = true;
                }
                self.focused_desktop = Some(id.clone());
            }
            FocusLevel::Node => {
                if !self.nodes.contains_key(id) {
                    warn!(node = %id, "focus for absent node, ignoring");
                    return;
                }
                if let Some(prev) = self.focused_node.take() {
                    if let Some(n) = self.nodes.get_mut(&prev) {
                        n.focused = false;
                    }
                }
                if let Some(n) = self.nodes.get_mut(id) {
                    n.focused = true;
                }
                self.focused_node = Some(id.clone());
            }
        }
    }

    /// Clear any focus reference whose target no longer resolves
    fn prune_focus(&mut self) {
        if self
            .focused_monitor
            .as_ref()
            .map_or(false, |id| !self.monitors.contains_key(id))
        {
            self.focused_monitor = None;
        }
        if self
            .focused_desktop
            .as_ref()
            .map_or(false, |id| !self.desktops.contains_key(id))
        {
            self.focused_desktop = None;
        }
        if self
            .focused_node
            .as_ref()
            .map_or(false, |id| !self.nodes.contains_key(id))
        {
            self.focused_node = None;
        }
    }

    // ------------------------------------------------------------------
    // Structural helpers
    // ------------------------------------------------------------------

    /// Detach a subtree from its desktop, collapsing the containing split by
    /// promoting the sibling into its place. The detached nodes stay in the
    /// map; the subtree root's parent link is cleared.
    fn detach_node(&mut self, id: &Id) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let desktop = node.desktop.clone();
        match node.parent.clone() {
            None => {
                if let Some(d) = self.desktops.get_mut(&desktop) {
                    if d.root.as_ref() == Some(id) {
                        d.root = None;
                    }
                }
            }
            Some(parent_id) => {
                let sibling = match self.nodes.get(&parent_id).map(|p| &p.kind) {
                    Some(NodeKind::Split { first, second }) => {
                        if first == id { second.clone() } else { first.clone() }
                    }
                    _ => {
                        warn!(node = %id, parent = %parent_id, "parent link into non-split, dropping link");
                        if let Some(n) = self.nodes.get_mut(id) {
                            n.parent = None;
                        }
                        return;
                    }
                };
                let grandparent = self.nodes.get(&parent_id).and_then(|p| p.parent.clone());
                match &grandparent {
                    None => {
                        if let Some(d) = self.desktops.get_mut(&desktop) {
                            d.root = Some(sibling.clone());
                        }
                    }
                    Some(gp) => {
                        if let Some(gp_node) = self.nodes.get_mut(gp) {
                            if let NodeKind::Split { first, second } = &mut gp_node.kind {
                                if *first == parent_id {
                                    *first = sibling.clone();
                                } else if *second == parent_id {
                                    *second = sibling.clone();
                                }
                            }
                        }
                    }
                }
                if let Some(sib) = self.nodes.get_mut(&sibling) {
                    sib.parent = grandparent;
                }
                self.nodes.remove(&parent_id);
                if let Some(n) = self.nodes.get_mut(id) {
                    n.parent = None;
                }
            }
        }
    }

    /// Attach an already-detached subtree to a desktop (root, or split with
    /// the existing root)
    fn attach_subtree(&mut self, id: &Id, desktop: &Id) {
        let existing_root = self.desktops.get(desktop).and_then(|d| d.root.clone());
        match existing_root {
            None => {
                if let Some(d) = self.desktops.get_mut(desktop) {
                    d.root = Some(id.clone());
                }
                if let Some(n) = self.nodes.get_mut(id) {
                    n.parent = None;
                }
            }
            Some(old_root) => {
                self.split_seq += 1;
                let split_id = Id::synthetic_split(self.split_seq);
                let geometry = self
                    .nodes
                    .get(&old_root)
                    .map(|n| n.geometry)
                    .unwrap_or_default();
                self.nodes.insert(
                    split_id.clone(),
                    Node {
                        id: split_id.clone(),
                        kind: NodeKind::Split {
                            first: old_root.clone(),
                            second: id.clone(),
                        },
                        state: NodeState::Tiled,
                        layer: StackLayer::Normal,
                        geometry,
                        hidden: false,
                        focused: false,
                        parent: None,
                        desktop: desktop.clone(),
                    },
                );
                if let Some(n) = self.nodes.get_mut(&old_root) {
                    n.parent = Some(split_id.clone());
                }
                if let Some(n) = self.nodes.get_mut(id) {
                    n.parent = Some(split_id.clone());
                }
                if let Some(d) = self.desktops.get_mut(desktop) {
                    d.root = Some(split_id);
                }
            }
        }
    }

    /// Remove a subtree's nodes from the map
    fn drop_subtree(&mut self, id: &Id) {
        if let Some(node) = self.nodes.remove(id) {
            if let NodeKind::Split { first, second } = node.kind {
                self.drop_subtree(&first);
                self.drop_subtree(&second);
            }
        }
    }

    /// Rewrite the owning-desktop link across a whole subtree
    fn set_subtree_desktop(&mut self, id: &Id, desktop: &Id) {
        let children = match self.nodes.get_mut(id) {
            Some(node) => {
                node.desktop = desktop.clone();
                match &node.kind {
                    NodeKind::Split { first, second } => Some((first.clone(), second.clone())),
                    NodeKind::Leaf => None,
                }
            }
            None => None,
        };
        if let Some((first, second)) = children {
            self.set_subtree_desktop(&first, desktop);
            self.set_subtree_desktop(&second, desktop);
        }
    }

    fn is_ancestor(&self, ancestor: &Id, of: &Id) -> bool {
        let mut cursor = self.nodes.get(of).and_then(|n| n.parent.clone());
        while let Some(id) = cursor {
            if &id == ancestor {
                return true;
            }
            cursor = self.nodes.get(&id).and_then(|n| n.parent.clone());
        }
        false
    }

    /// Where a subtree hangs: a desktop's root slot, or a child slot of a
    /// split
    fn attachment(&self, id: &Id) -> Slot {
        match self.nodes.get(id).and_then(|n| n.parent.clone()) {
            None => Slot::Root(self.nodes[id].desktop.clone()),
            Some(parent) => {
                let first = matches!(
                    self.nodes.get(&parent).map(|p| &p.kind),
                    Some(NodeKind::Split { first, .. }) if first == id
                );
                Slot::Child { parent, first }
            }
        }
    }

    fn fill_slot(&mut self, slot: &Slot, id: &Id) {
        match slot {
            Slot::Root(desktop) => {
                if let Some(d) = self.desktops.get_mut(desktop) {
                    d.root = Some(id.clone());
                }
                if let Some(n) = self.nodes.get_mut(id) {
                    n.parent = None;
                }
            }
            Slot::Child { parent, first: at_first } => {
                if let Some(p) = self.nodes.get_mut(parent) {
                    if let NodeKind::Split { first, second } = &mut p.kind {
                        if *at_first {
                            *first = id.clone();
                        } else {
                            *second = id.clone();
                        }
                    }
                }
                if let Some(n) = self.nodes.get_mut(id) {
                    n.parent = Some(parent.clone());
                }
            }
        }
    }
}

enum Slot {
    Root(Id),
    Child { parent: Id, first: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Id {
        Id::from(s)
    }

    /// One monitor, two desktops ("I" focused with leaf win1, "II" empty)
    fn small_wm() -> Wm {
        let mut wm = Wm::new();
        wm.insert_monitor(&id("mon0"), "mon0", Rect::new(0, 0, 1920, 1080));
        wm.insert_desktop(&id("mon0"), &id("I"), "I");
        wm.insert_desktop(&id("mon0"), &id("II"), "II");
        wm.insert_node(&id("I"), &id("win1"));
        wm.set_focus(FocusLevel::Monitor, &id("mon0"));
        wm.set_focus(FocusLevel::Desktop, &id("I"));
        wm.set_focus(FocusLevel::Node, &id("win1"));
        wm
    }

    #[test]
    fn duplicate_monitor_add_updates_in_place() {
        let mut wm = small_wm();
        wm.insert_monitor(&id("mon0"), "renamed", Rect::new(0, 0, 800, 600));

        assert_eq!(wm.monitor_order, vec![id("mon0")]);
        let monitor = wm.find_monitor(&id("mon0")).unwrap();
        assert_eq!(monitor.name, "renamed");
        assert_eq!(monitor.geometry, Rect::new(0, 0, 800, 600));
        // Desktops survive the attribute refresh
        assert_eq!(monitor.desktops, vec![id("I"), id("II")]);
    }

    #[test]
    fn duplicate_desktop_add_keeps_sibling_order() {
        let mut wm = small_wm();
        wm.insert_desktop(&id("mon0"), &id("I"), "one");

        let monitor = wm.find_monitor(&id("mon0")).unwrap();
        assert_eq!(monitor.desktops, vec![id("I"), id("II")]);
        assert_eq!(wm.find_desktop(&id("I")).unwrap().name, "one");
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut wm = small_wm();
        let before = wm.clone();

        wm.remove_monitor(&id("ghost"));
        wm.remove_desktop(&id("ghost"));
        wm.remove_node(&id("ghost"));

        assert_eq!(wm, before);
    }

    #[test]
    fn second_node_creates_split_root() {
        let mut wm = small_wm();
        wm.insert_node(&id("I"), &id("win2"));

        let desktop = wm.find_desktop(&id("I")).unwrap();
        let root_id = desktop.root.clone().unwrap();
        let root = wm.find_node(&root_id).unwrap();
        match &root.kind {
            NodeKind::Split { first, second } => {
                assert_eq!(first, &id("win1"));
                assert_eq!(second, &id("win2"));
            }
            NodeKind::Leaf => panic!("root should be a split"),
        }
        assert_eq!(wm.find_node(&id("win1")).unwrap().parent, Some(root_id.clone()));
        assert_eq!(wm.find_node(&id("win2")).unwrap().parent, Some(root_id));
    }

    #[test]
    fn removing_leaf_collapses_split() {
        let mut wm = small_wm();
        wm.insert_node(&id("I"), &id("win2"));
        wm.remove_node(&id("win2"));

        let desktop = wm.find_desktop(&id("I")).unwrap();
        assert_eq!(desktop.root, Some(id("win1")));
        let win1 = wm.find_node(&id("win1")).unwrap();
        assert_eq!(win1.parent, None);
        // The synthetic split is gone
        assert_eq!(wm.nodes.len(), 1);
    }

    #[test]
    fn removing_root_leaf_empties_desktop() {
        let mut wm = small_wm();
        wm.remove_node(&id("win1"));

        assert_eq!(wm.find_desktop(&id("I")).unwrap().root, None);
        assert!(wm.find_node(&id("win1")).is_none());
    }

    #[test]
    fn removing_focused_node_clears_focus_reference() {
        let mut wm = small_wm();
        assert_eq!(wm.focused_node().map(|n| n.id.clone()), Some(id("win1")));

        wm.remove_node(&id("win1"));

        assert!(wm.focused_node().is_none());
        assert!(wm.focused_node.is_none());
    }

    #[test]
    fn removing_monitor_cascades_and_clears_all_focus() {
        let mut wm = small_wm();
        wm.remove_monitor(&id("mon0"));

        assert!(wm.monitors.is_empty());
        assert!(wm.desktops.is_empty());
        assert!(wm.nodes.is_empty());
        assert!(wm.focused_monitor.is_none());
        assert!(wm.focused_desktop.is_none());
        assert!(wm.focused_node.is_none());
    }

    #[test]
    fn desktop_focus_moves_flag_and_reference() {
        let mut wm = small_wm();
        wm.set_focus(FocusLevel::Desktop, &id("II"));

        assert!(!wm.find_desktop(&id("I")).unwrap().focused);
        assert!(wm.find_desktop(&id("II")).unwrap().focused);
        assert_eq!(wm.focused_desktop().map(|d| d.id.clone()), Some(id("II")));
    }

    #[test]
    fn desktop_focus_event_pulls_monitor_focus_along() {
        let mut wm = small_wm();
        wm.insert_monitor(&id("mon1"), "mon1", Rect::new(1920, 0, 1280, 1024));
        wm.insert_desktop(&id("mon1"), &id("III"), "III");
        wm.apply(&Event::MonitorFocus { monitor: id("mon1") });
        assert_eq!(wm.focused_monitor().map(|m| m.id.clone()), Some(id("mon1")));

        // Focusing a desktop on the other monitor refocuses that monitor too
        wm.apply(&Event::DesktopFocus { monitor: id("mon0"), desktop: id("II") });

        assert_eq!(wm.focused_monitor().map(|m| m.id.clone()), Some(id("mon0")));
        assert!(wm.find_monitor(&id("mon0")).unwrap().focused);
        assert!(!wm.find_monitor(&id("mon1")).unwrap().focused);
        assert_eq!(wm.focused_desktop().map(|d| d.id.clone()), Some(id("II")));
        // The node level is not named by the event and stays put
        assert_eq!(wm.focused_node().map(|n| n.id.clone()), Some(id("win1")));
    }

    #[test]
    fn node_focus_event_sets_all_three_levels() {
        let mut wm = small_wm();
        wm.insert_monitor(&id("mon1"), "mon1", Rect::new(1920, 0, 1280, 1024));
        wm.insert_desktop(&id("mon1"), &id("III"), "III");
        wm.insert_node(&id("III"), &id("win9"));

        wm.apply(&Event::NodeFocus {
            monitor: id("mon1"),
            desktop: id("III"),
            node: id("win9"),
        });

        assert_eq!(wm.focused_monitor().map(|m| m.id.clone()), Some(id("mon1")));
        assert_eq!(wm.focused_desktop().map(|d| d.id.clone()), Some(id("III")));
        assert_eq!(wm.focused_node().map(|n| n.id.clone()), Some(id("win9")));
        assert!(!wm.find_desktop(&id("I")).unwrap().focused);
        assert!(!wm.find_node(&id("win1")).unwrap().focused);
    }

    #[test]
    fn focus_for_absent_entity_is_ignored() {
        let mut wm = small_wm();
        wm.set_focus(FocusLevel::Desktop, &id("ghost"));

        // The previous focus is untouched
        assert_eq!(wm.focused_desktop().map(|d| d.id.clone()), Some(id("I")));
    }

    #[test]
    fn desktop_transfer_appends_to_target_order() {
        let mut wm = small_wm();
        wm.insert_monitor(&id("mon1"), "mon1", Rect::new(1920, 0, 1280, 1024));
        wm.reparent_desktop(&id("I"), &id("mon1"));

        assert_eq!(wm.find_monitor(&id("mon0")).unwrap().desktops, vec![id("II")]);
        assert_eq!(wm.find_monitor(&id("mon1")).unwrap().desktops, vec![id("I")]);
        assert_eq!(wm.find_desktop(&id("I")).unwrap().monitor, id("mon1"));
    }

    #[test]
    fn node_transfer_moves_subtree_between_desktops() {
        let mut wm = small_wm();
        wm.reparent_node(&id("win1"), &id("II"));

        assert_eq!(wm.find_desktop(&id("I")).unwrap().root, None);
        assert_eq!(wm.find_desktop(&id("II")).unwrap().root, Some(id("win1")));
        assert_eq!(wm.find_node(&id("win1")).unwrap().desktop, id("II"));
    }

    #[test]
    fn node_transfer_into_occupied_desktop_splits() {
        let mut wm = small_wm();
        wm.insert_node(&id("II"), &id("win2"));
        wm.reparent_node(&id("win1"), &id("II"));

        let tree: Vec<_> = wm
            .desktop_tree(&id("II"))
            .iter()
            .map(|n| n.id.as_str().to_string())
            .collect();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree[1], "win2");
        assert_eq!(tree[2], "win1");
        assert_eq!(wm.desktop_tree(&id("I")).len(), 0);
    }

    #[test]
    fn swap_exchanges_roots_across_desktops() {
        let mut wm = small_wm();
        wm.insert_node(&id("II"), &id("win2"));
        wm.swap_nodes(&id("win1"), &id("win2"));

        assert_eq!(wm.find_desktop(&id("I")).unwrap().root, Some(id("win2")));
        assert_eq!(wm.find_desktop(&id("II")).unwrap().root, Some(id("win1")));
        assert_eq!(wm.find_node(&id("win1")).unwrap().desktop, id("II"));
        assert_eq!(wm.find_node(&id("win2")).unwrap().desktop, id("I"));
    }

    #[test]
    fn swap_within_one_split_flips_children() {
        let mut wm = small_wm();
        wm.insert_node(&id("I"), &id("win2"));
        wm.swap_nodes(&id("win1"), &id("win2"));

        let root_id = wm.find_desktop(&id("I")).unwrap().root.clone().unwrap();
        match &wm.find_node(&root_id).unwrap().kind {
            NodeKind::Split { first, second } => {
                assert_eq!(first, &id("win2"));
                assert_eq!(second, &id("win1"));
            }
            NodeKind::Leaf => panic!("root should be a split"),
        }
    }

    #[test]
    fn swap_with_nested_node_is_rejected() {
        let mut wm = small_wm();
        wm.insert_node(&id("I"), &id("win2"));
        let root_id = wm.find_desktop(&id("I")).unwrap().root.clone().unwrap();
        let before = wm.clone();

        wm.swap_nodes(&root_id, &id("win1"));

        assert_eq!(wm, before);
    }

    #[test]
    fn state_off_reverts_to_tiled_only_when_matching() {
        let mut wm = small_wm();
        wm.set_node_state(&id("win1"), NodeState::Fullscreen, true);
        assert_eq!(wm.find_node(&id("win1")).unwrap().state, NodeState::Fullscreen);

        // Turning off a state the node is not in changes nothing
        wm.set_node_state(&id("win1"), NodeState::Floating, false);
        assert_eq!(wm.find_node(&id("win1")).unwrap().state, NodeState::Fullscreen);

        wm.set_node_state(&id("win1"), NodeState::Fullscreen, false);
        assert_eq!(wm.find_node(&id("win1")).unwrap().state, NodeState::Tiled);
    }

    #[test]
    fn hidden_flag_toggles() {
        let mut wm = small_wm();
        wm.set_node_flag(&id("win1"), NodeFlag::Hidden, true);
        assert!(wm.find_node(&id("win1")).unwrap().hidden);
        wm.set_node_flag(&id("win1"), NodeFlag::Hidden, false);
        assert!(!wm.find_node(&id("win1")).unwrap().hidden);
        // Unmodeled flags are accepted without effect
        let before = wm.clone();
        wm.set_node_flag(&id("win1"), NodeFlag::Sticky, true);
        assert_eq!(wm, before);
    }

    #[test]
    fn in_place_update_preserves_identity() {
        let mut wm = small_wm();
        let held = id("win1");

        wm.set_node_geometry(&held, Rect::new(10, 20, 300, 400));

        // The identifier held before the update resolves to the same entity
        // and reflects the new attribute values
        let node = wm.find_node(&held).unwrap();
        assert_eq!(node.geometry, Rect::new(10, 20, 300, 400));
        assert_eq!(node.id, held);
    }

    #[test]
    fn preorder_traversal_matches_structure() {
        let mut wm = small_wm();
        wm.insert_node(&id("I"), &id("win2"));
        wm.insert_node(&id("I"), &id("win3"));

        let order: Vec<_> = wm
            .desktop_tree(&id("I"))
            .iter()
            .map(|n| n.id.as_str().to_string())
            .collect();
        // Root split, then the earlier split subtree, then the newest leaf
        assert_eq!(order.len(), 5);
        assert_eq!(order[2], "win1");
        assert_eq!(order[3], "win2");
        assert_eq!(order[4], "win3");
    }

    #[test]
    fn resolve_finds_every_level() {
        let wm = small_wm();
        assert!(matches!(wm.resolve(&id("mon0")), Some(Entity::Monitor(_))));
        assert!(matches!(wm.resolve(&id("II")), Some(Entity::Desktop(_))));
        assert!(matches!(wm.resolve(&id("win1")), Some(Entity::Node(_))));
        assert!(wm.resolve(&id("ghost")).is_none());
    }

    #[test]
    fn tree_serializes_to_json_and_back() {
        let mut wm = small_wm();
        wm.insert_node(&id("I"), &id("win2"));

        let json = serde_json::to_value(&wm).unwrap();
        // Ids are bare strings on the wire; enum words stay snake_case
        assert_eq!(json["focused_desktop"], serde_json::json!("I"));
        assert_eq!(json["monitor_order"], serde_json::json!(["mon0"]));
        assert_eq!(json["desktops"]["II"]["layout"], serde_json::json!("tiled"));
        assert_eq!(json["nodes"]["win1"]["state"], serde_json::json!("tiled"));
        assert_eq!(json["nodes"]["win1"]["layer"], serde_json::json!("normal"));

        // The split counter is runtime bookkeeping and is not serialized
        assert!(json.get("split_seq").is_none());

        let decoded: Wm = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.monitor_order, wm.monitor_order);
        assert_eq!(decoded.monitors, wm.monitors);
        assert_eq!(decoded.desktops, wm.desktops);
        assert_eq!(decoded.nodes, wm.nodes);
        assert_eq!(decoded.focused_monitor, wm.focused_monitor);
        assert_eq!(decoded.focused_desktop, wm.focused_desktop);
        assert_eq!(decoded.focused_node, wm.focused_node);
    }
}
