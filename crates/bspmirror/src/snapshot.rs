//! Full-state dump codec
//!
//! The startup query returns the whole Monitor → Desktop → Node hierarchy as
//! a single line of whitespace-separated tokens with colon-delimited fields,
//! in pre-order:
//!
//! ```text
//! M:<id>:<name>:<WxH+X+Y>:<flags>     monitor        flags: f or -
//! D:<id>:<name>:<T|M>:<flags>         desktop        layout T=tiled M=monocle
//! S:<id>:<WxH+X+Y>                    split, exactly two subtrees follow
//! W:<id>:<WxH+X+Y>:<t|p|f|x>:<flags>  leaf (window)  flags: subset of fh, or -
//! ```
//!
//! A desktop owns zero or one node subtree; `f` flags mark the focused
//! monitor, desktop and node and feed the root-level focus references.
//!
//! Malformed input fails with [`SnapshotParseError`] carrying the offending
//! token and its byte offset in the dump; snapshot failure is fatal to mirror
//! startup, so the parser never guesses.

use crate::error::SnapshotParseError;
use crate::geometry::Rect;
use crate::tree::{
    Desktop, DesktopLayout, Id, Monitor, Node, NodeKind, NodeState, StackLayer, Wm,
};

/// Parse a full-state dump into a detached tree.
///
/// # Errors
///
/// Returns [`SnapshotParseError`] on an unknown or short token, a split
/// missing one of its two children, a node outside any desktop, a desktop
/// outside any monitor, or a desktop with more than one root.
pub fn parse_snapshot(input: &str) -> Result<Wm, SnapshotParseError> {
    Parser::new(input).run()
}

struct Token<'a> {
    text: &'a str,
    offset: usize,
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    end: usize,
    wm: Wm,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        let tokens = input
            .split_whitespace()
            .map(|text| {
                // offset_from is safe here: split_whitespace yields subslices
                let offset = text.as_ptr() as usize - input.as_ptr() as usize;
                Token { text, offset }
            })
            .collect();
        Self {
            tokens,
            pos: 0,
            end: input.len(),
            wm: Wm::new(),
        }
    }

    fn run(mut self) -> Result<Wm, SnapshotParseError> {
        let mut current_monitor: Option<Id> = None;
        let mut current_desktop: Option<Id> = None;

        while let Some(token) = self.peek() {
            match token.text.as_bytes().first() {
                Some(b'M') => {
                    let id = self.monitor()?;
                    current_monitor = Some(id);
                    current_desktop = None;
                }
                Some(b'D') => {
                    let Some(monitor) = current_monitor.clone() else {
                        return Err(self.fail("desktop token outside any monitor"));
                    };
                    let id = self.desktop(&monitor)?;
                    current_desktop = Some(id);
                }
                Some(b'S') | Some(b'W') => {
                    let Some(desktop) = current_desktop.clone() else {
                        return Err(self.fail("node token outside any desktop"));
                    };
                    if self.wm.desktops[&desktop].root.is_some() {
                        return Err(self.fail("desktop has more than one root"));
                    }
                    let root = self.node(&desktop, None)?;
                    if let Some(d) = self.wm.desktops.get_mut(&desktop) {
                        d.root = Some(root);
                    }
                }
                _ => return Err(self.fail("unknown token")),
            }
        }

        Ok(self.wm)
    }

    fn monitor(&mut self) -> Result<Id, SnapshotParseError> {
        let [_, id, name, geometry, flags] = self.fields::<5>("M:<id>:<name>:<geom>:<flags>")?;
        let geometry = self.geom(&geometry)?;
        let focused = self.flags(&flags, "f")?.contains(&'f');
        let id = Id::from(id.as_str());
        self.wm.monitor_order.push(id.clone());
        self.wm.monitors.insert(
            id.clone(),
            Monitor {
                id: id.clone(),
                name,
                geometry,
                focused,
                desktops: Vec::new(),
            },
        );
        if focused {
            self.wm.focused_monitor = Some(id.clone());
        }
        self.advance();
        Ok(id)
    }

    fn desktop(&mut self, monitor: &Id) -> Result<Id, SnapshotParseError> {
        let [_, id, name, layout, flags] = self.fields::<5>("D:<id>:<name>:<T|M>:<flags>")?;
        let layout = match layout.as_str() {
            "T" => DesktopLayout::Tiled,
            "M" => DesktopLayout::Monocle,
            _ => return Err(self.fail("desktop layout must be T or M")),
        };
        let focused = self.flags(&flags, "f")?.contains(&'f');
        let id = Id::from(id.as_str());
        if let Some(m) = self.wm.monitors.get_mut(monitor) {
            m.desktops.push(id.clone());
        }
        self.wm.desktops.insert(
            id.clone(),
            Desktop {
                id: id.clone(),
                name,
                layout,
                focused,
                monitor: monitor.clone(),
                root: None,
            },
        );
        if focused {
            self.wm.focused_desktop = Some(id.clone());
        }
        self.advance();
        Ok(id)
    }

    /// Parse one node subtree in pre-order, returning its root id
    fn node(&mut self, desktop: &Id, parent: Option<Id>) -> Result<Id, SnapshotParseError> {
        let Some(token) = self.peek() else {
            return Err(self.fail("split is missing a child"));
        };
        match token.text.as_bytes().first() {
            Some(b'W') => {
                let [_, id, geometry, state, flags] =
                    self.fields::<5>("W:<id>:<geom>:<state>:<flags>")?;
                let geometry = self.geom(&geometry)?;
                let state = match state.as_str() {
                    "t" => NodeState::Tiled,
                    "p" => NodeState::PseudoTiled,
                    "f" => NodeState::Floating,
                    "x" => NodeState::Fullscreen,
                    _ => return Err(self.fail("node state must be one of t, p, f, x")),
                };
                let flags = self.flags(&flags, "fh")?;
                let focused = flags.contains(&'f');
                let id = Id::from(id.as_str());
                self.wm.nodes.insert(
                    id.clone(),
                    Node {
                        id: id.clone(),
                        kind: NodeKind::Leaf,
                        state,
                        layer: StackLayer::Normal,
                        geometry,
                        hidden: flags.contains(&'h'),
                        focused,
                        parent,
                        desktop: desktop.clone(),
                    },
                );
                if focused {
                    self.wm.focused_node = Some(id.clone());
                }
                self.advance();
                Ok(id)
            }
            Some(b'S') => {
                let [_, id, geometry] = self.fields::<3>("S:<id>:<geom>")?;
                let geometry = self.geom(&geometry)?;
                let id = Id::from(id.as_str());
                self.advance();
                let first = self.node(desktop, Some(id.clone()))?;
                let second = self.node(desktop, Some(id.clone()))?;
                self.wm.nodes.insert(
                    id.clone(),
                    Node {
                        id: id.clone(),
                        kind: NodeKind::Split { first, second },
                        state: NodeState::Tiled,
                        layer: StackLayer::Normal,
                        geometry,
                        hidden: false,
                        focused: false,
                        parent,
                        desktop: desktop.clone(),
                    },
                );
                Ok(id)
            }
            _ => Err(self.fail("split child must be a node token")),
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    /// Split the current token into exactly `N` colon-delimited fields
    fn fields<const N: usize>(&self, shape: &str) -> Result<[String; N], SnapshotParseError> {
        let Some(token) = self.peek() else {
            return Err(self.fail(format!("expected {shape}")));
        };
        let parts: Vec<String> = token.text.split(':').map(str::to_string).collect();
        <[String; N]>::try_from(parts).map_err(|_| self.fail(format!("expected {shape}")))
    }

    fn geom(&self, field: &str) -> Result<Rect, SnapshotParseError> {
        field
            .parse()
            .map_err(|_| self.fail(format!("bad geometry {field:?}")))
    }

    /// Validate a flags field: `-` for none, otherwise a subset of `allowed`
    fn flags(&self, field: &str, allowed: &str) -> Result<Vec<char>, SnapshotParseError> {
        if field == "-" {
            return Ok(Vec::new());
        }
        let chars: Vec<char> = field.chars().collect();
        if chars.is_empty() || chars.iter().any(|c| !allowed.contains(*c)) {
            return Err(self.fail(format!("flags must be - or a subset of {allowed:?}")));
        }
        Ok(chars)
    }

    /// Error at the current token, or at end-of-input when tokens ran out
    fn fail(&self, reason: impl Into<String>) -> SnapshotParseError {
        let (token, offset) = match self.peek() {
            Some(t) => (t.text.to_string(), t.offset),
            None => (String::new(), self.end),
        };
        SnapshotParseError {
            token,
            offset,
            reason: reason.into(),
        }
    }
}
