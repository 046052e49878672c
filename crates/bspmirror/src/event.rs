//! Notification line codec
//!
//! The window manager reports every state change as one newline-terminated,
//! space-separated record whose first field names the kind, e.g.
//!
//! ```text
//! desktop_focus mon0 II
//! node_geometry mon0 I win1 952x1064+8+8
//! ```
//!
//! [`parse_event`] turns one such line into a closed [`Event`] variant. Two
//! failure modes are kept deliberately apart:
//!
//! - an *unrecognized kind* parses to [`Event::Unknown`] carrying the raw
//!   line, so protocol extensions from a newer peer degrade gracefully;
//! - a *known kind with a malformed payload* (wrong field count, bad
//!   geometry, bad enum word) is an [`EventParseError`], which the caller
//!   reports and drops without halting the stream.

use crate::error::EventParseError;
use crate::geometry::Rect;
use crate::tree::{DesktopLayout, Id, NodeFlag, NodeState, StackLayer};

/// One incremental change notification, tagged by kind.
///
/// Fields carry the identifiers and values exactly as delivered; resolution
/// against the live tree happens in the state-tree primitives.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    MonitorAdd { monitor: Id, name: String, geometry: Rect },
    MonitorRemove { monitor: Id },
    MonitorRename { monitor: Id, old_name: String, new_name: String },
    MonitorGeometry { monitor: Id, geometry: Rect },
    MonitorFocus { monitor: Id },

    DesktopAdd { monitor: Id, desktop: Id, name: String },
    DesktopRemove { monitor: Id, desktop: Id },
    DesktopRename { monitor: Id, desktop: Id, old_name: String, new_name: String },
    DesktopTransfer { source: Id, desktop: Id, target: Id },
    DesktopFocus { monitor: Id, desktop: Id },
    DesktopLayout { monitor: Id, desktop: Id, layout: DesktopLayout },

    NodeAdd { monitor: Id, desktop: Id, node: Id },
    NodeRemove { monitor: Id, desktop: Id, node: Id },
    NodeSwap {
        monitor: Id,
        desktop: Id,
        node: Id,
        other_monitor: Id,
        other_desktop: Id,
        other_node: Id,
    },
    NodeTransfer {
        source_monitor: Id,
        source_desktop: Id,
        node: Id,
        target_monitor: Id,
        target_desktop: Id,
    },
    NodeFocus { monitor: Id, desktop: Id, node: Id },
    NodeGeometry { monitor: Id, desktop: Id, node: Id, geometry: Rect },
    NodeState { monitor: Id, desktop: Id, node: Id, state: NodeState, enabled: bool },
    NodeFlag { monitor: Id, desktop: Id, node: Id, flag: NodeFlag, enabled: bool },
    NodeLayer { monitor: Id, desktop: Id, node: Id, layer: StackLayer },

    /// An event kind this build does not know about
    Unknown { raw: String },
}

/// Parse one notification line.
///
/// Trailing newline/whitespace is tolerated. An empty line is malformed.
///
/// # Errors
///
/// Returns [`EventParseError`] when a known kind has the wrong number of
/// fields or a field fails to parse.
pub fn parse_event(line: &str) -> Result<Event, EventParseError> {
    let trimmed = line.trim_end();
    let fields: Vec<&str> = trimmed.split(' ').filter(|f| !f.is_empty()).collect();
    let Some((&kind, args)) = fields.split_first() else {
        return Err(err(line, "empty event line"));
    };

    let event = match kind {
        "monitor_add" => {
            let [monitor, name, geometry] = expect::<3>(line, kind, args)?;
            Event::MonitorAdd {
                monitor: monitor.into(),
                name: name.to_string(),
                geometry: geom(line, geometry)?,
            }
        }
        "monitor_remove" => {
            let [monitor] = expect::<1>(line, kind, args)?;
            Event::MonitorRemove { monitor: monitor.into() }
        }
        "monitor_rename" => {
            let [monitor, old_name, new_name] = expect::<3>(line, kind, args)?;
            Event::MonitorRename {
                monitor: monitor.into(),
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
            }
        }
        "monitor_geometry" => {
            let [monitor, geometry] = expect::<2>(line, kind, args)?;
            Event::MonitorGeometry {
                monitor: monitor.into(),
                geometry: geom(line, geometry)?,
            }
        }
        "monitor_focus" => {
            let [monitor] = expect::<1>(line, kind, args)?;
            Event::MonitorFocus { monitor: monitor.into() }
        }
        "desktop_add" => {
            let [monitor, desktop, name] = expect::<3>(line, kind, args)?;
            Event::DesktopAdd {
                monitor: monitor.into(),
                desktop: desktop.into(),
                name: name.to_string(),
            }
        }
        "desktop_remove" => {
            let [monitor, desktop] = expect::<2>(line, kind, args)?;
            Event::DesktopRemove { monitor: monitor.into(), desktop: desktop.into() }
        }
        "desktop_rename" => {
            let [monitor, desktop, old_name, new_name] = expect::<4>(line, kind, args)?;
            Event::DesktopRename {
                monitor: monitor.into(),
                desktop: desktop.into(),
                old_name: old_name.to_string(),
                new_name: new_name.to_string(),
            }
        }
        "desktop_transfer" => {
            let [source, desktop, target] = expect::<3>(line, kind, args)?;
            Event::DesktopTransfer {
                source: source.into(),
                desktop: desktop.into(),
                target: target.into(),
            }
        }
        "desktop_focus" => {
            let [monitor, desktop] = expect::<2>(line, kind, args)?;
            Event::DesktopFocus { monitor: monitor.into(), desktop: desktop.into() }
        }
        "desktop_layout" => {
            let [monitor, desktop, layout] = expect::<3>(line, kind, args)?;
            Event::DesktopLayout {
                monitor: monitor.into(),
                desktop: desktop.into(),
                layout: desktop_layout(line, layout)?,
            }
        }
        "node_add" => {
            let [monitor, desktop, node] = expect::<3>(line, kind, args)?;
            Event::NodeAdd {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
            }
        }
        "node_remove" => {
            let [monitor, desktop, node] = expect::<3>(line, kind, args)?;
            Event::NodeRemove {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
            }
        }
        "node_swap" => {
            let [monitor, desktop, node, other_monitor, other_desktop, other_node] =
                expect::<6>(line, kind, args)?;
            Event::NodeSwap {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
                other_monitor: other_monitor.into(),
                other_desktop: other_desktop.into(),
                other_node: other_node.into(),
            }
        }
        "node_transfer" => {
            let [source_monitor, source_desktop, node, target_monitor, target_desktop] =
                expect::<5>(line, kind, args)?;
            Event::NodeTransfer {
                source_monitor: source_monitor.into(),
                source_desktop: source_desktop.into(),
                node: node.into(),
                target_monitor: target_monitor.into(),
                target_desktop: target_desktop.into(),
            }
        }
        "node_focus" => {
            let [monitor, desktop, node] = expect::<3>(line, kind, args)?;
            Event::NodeFocus {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
            }
        }
        "node_geometry" => {
            let [monitor, desktop, node, geometry] = expect::<4>(line, kind, args)?;
            Event::NodeGeometry {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
                geometry: geom(line, geometry)?,
            }
        }
        "node_state" => {
            let [monitor, desktop, node, state, switch] = expect::<5>(line, kind, args)?;
            Event::NodeState {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
                state: node_state(line, state)?,
                enabled: on_off(line, switch)?,
            }
        }
        "node_flag" => {
            let [monitor, desktop, node, flag, switch] = expect::<5>(line, kind, args)?;
            Event::NodeFlag {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
                flag: node_flag(line, flag)?,
                enabled: on_off(line, switch)?,
            }
        }
        "node_layer" => {
            let [monitor, desktop, node, layer] = expect::<4>(line, kind, args)?;
            Event::NodeLayer {
                monitor: monitor.into(),
                desktop: desktop.into(),
                node: node.into(),
                layer: stack_layer(line, layer)?,
            }
        }
        _ => Event::Unknown { raw: trimmed.to_string() },
    };

    Ok(event)
}

fn err(line: &str, reason: impl Into<String>) -> EventParseError {
    EventParseError {
        line: line.trim_end().to_string(),
        reason: reason.into(),
    }
}

/// Check the exact argument count for a known kind
fn expect<'a, const N: usize>(
    line: &str,
    kind: &str,
    args: &[&'a str],
) -> Result<[&'a str; N], EventParseError> {
    <[&'a str; N]>::try_from(args)
        .map_err(|_| err(line, format!("{kind} expects {N} fields, got {}", args.len())))
}

fn geom(line: &str, field: &str) -> Result<Rect, EventParseError> {
    field.parse().map_err(|_| err(line, format!("bad geometry {field:?}")))
}

fn on_off(line: &str, field: &str) -> Result<bool, EventParseError> {
    match field {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(err(line, format!("expected on/off, got {other:?}"))),
    }
}

fn desktop_layout(line: &str, field: &str) -> Result<DesktopLayout, EventParseError> {
    match field {
        "tiled" => Ok(DesktopLayout::Tiled),
        "monocle" => Ok(DesktopLayout::Monocle),
        other => Err(err(line, format!("unknown desktop layout {other:?}"))),
    }
}

fn node_state(line: &str, field: &str) -> Result<NodeState, EventParseError> {
    match field {
        "tiled" => Ok(NodeState::Tiled),
        "pseudo_tiled" => Ok(NodeState::PseudoTiled),
        "floating" => Ok(NodeState::Floating),
        "fullscreen" => Ok(NodeState::Fullscreen),
        other => Err(err(line, format!("unknown node state {other:?}"))),
    }
}

fn node_flag(line: &str, field: &str) -> Result<NodeFlag, EventParseError> {
    match field {
        "hidden" => Ok(NodeFlag::Hidden),
        "sticky" => Ok(NodeFlag::Sticky),
        "locked" => Ok(NodeFlag::Locked),
        "marked" => Ok(NodeFlag::Marked),
        "urgent" => Ok(NodeFlag::Urgent),
        other => Err(err(line, format!("unknown node flag {other:?}"))),
    }
}

fn stack_layer(line: &str, field: &str) -> Result<StackLayer, EventParseError> {
    match field {
        "below" => Ok(StackLayer::Below),
        "normal" => Ok(StackLayer::Normal),
        "above" => Ok(StackLayer::Above),
        other => Err(err(line, format!("unknown stack layer {other:?}"))),
    }
}
