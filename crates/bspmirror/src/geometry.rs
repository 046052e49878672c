//! Screen geometry primitives
//!
//! The window manager describes every rectangle on the wire in the X11
//! `WxH+X+Y` notation (e.g. `1920x1080+0+0`). Both the snapshot codec and
//! the event codec parse geometry fields through [`Rect`]'s `FromStr`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A rectangle in screen coordinates.
///
/// Offsets may be negative (a monitor left of the primary one), sizes may not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }
}

impl fmt::Display for Rect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// A geometry field that is not of the form `WxH+X+Y`
#[derive(Debug, Clone, Error)]
#[error("invalid geometry {input:?}, expected WxH+X+Y")]
pub struct ParseRectError {
    pub input: String,
}

impl FromStr for Rect {
    type Err = ParseRectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ParseRectError { input: s.to_string() };

        let (width, rest) = s.split_once('x').ok_or_else(bad)?;
        let mut parts = rest.split('+');
        let height = parts.next().ok_or_else(bad)?;
        let x = parts.next().ok_or_else(bad)?;
        let y = parts.next().ok_or_else(bad)?;
        if parts.next().is_some() {
            return Err(bad());
        }

        Ok(Self {
            width: width.parse().map_err(|_| bad())?,
            height: height.parse().map_err(|_| bad())?,
            x: x.parse().map_err(|_| bad())?,
            y: y.parse().map_err(|_| bad())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_geometry() {
        let rect: Rect = "1920x1080+0+0".parse().unwrap();
        assert_eq!(rect, Rect::new(0, 0, 1920, 1080));
    }

    #[test]
    fn parses_negative_offsets() {
        // A monitor positioned left of and above the origin
        let rect: Rect = "1280x1024+-1280+-24".parse().unwrap();
        assert_eq!(rect, Rect::new(-1280, -24, 1280, 1024));
    }

    #[test]
    fn display_round_trips() {
        for input in ["800x600+100+200", "1280x1024+-1280+0"] {
            let rect: Rect = input.parse().unwrap();
            assert_eq!(rect.to_string(), input);
        }
    }

    #[test]
    fn rejects_malformed_geometry() {
        for input in ["", "1920", "1920x1080", "1920x1080+0", "axb+c+d", "1x2+3+4+5"] {
            assert!(input.parse::<Rect>().is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn rejects_negative_size() {
        assert!("-10x20+0+0".parse::<Rect>().is_err());
    }
}
