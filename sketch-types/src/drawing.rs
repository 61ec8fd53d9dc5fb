use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::{ParticipantId, PathId, PhaseKind, SessionId, StrokeId};

pub const MIN_STROKE_WIDTH: f32 = 1.0;
pub const MAX_STROKE_WIDTH: f32 = 64.0;
/// Upper bound on points in one ephemeral sample batch.
pub const MAX_SAMPLES_PER_EVENT: usize = 64;
/// Upper bound on points in one durable stroke.
pub const MAX_POINTS_PER_STROKE: usize = 4096;
/// How far outside the canvas a point may land and still be accepted.
pub const CANVAS_MARGIN: f32 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Drawing surface that submitted coordinates are checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Finite and inside the canvas widened by `CANVAS_MARGIN` on every side.
    pub fn accepts(&self, point: Point) -> bool {
        point.is_finite()
            && (-CANVAS_MARGIN..=self.width as f32 + CANVAS_MARGIN).contains(&point.x)
            && (-CANVAS_MARGIN..=self.height as f32 + CANVAS_MARGIN).contains(&point.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rrggbb` or `rrggbb`.
    pub fn parse_hex(value: &str) -> Option<Self> {
        let hex = value.trim().trim_start_matches('#');
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |range| u8::from_str_radix(&hex[range], 16).ok();
        Some(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Tool {
    Brush,
    Eraser,
    /// Deprecated in the current protocol; still rendered from history.
    Fill,
}

impl Tool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Brush => "brush",
            Tool::Eraser => "eraser",
            Tool::Fill => "fill",
        }
    }
}

/// Geometry of one completed gesture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "tool", rename_all = "lowercase")]
#[ts(export)]
pub enum StrokeShape {
    Brush {
        points: Vec<Point>,
        color: Rgb,
        width: f32,
    },
    Eraser {
        points: Vec<Point>,
        width: f32,
    },
    Fill {
        at: Point,
        color: Rgb,
    },
}

impl StrokeShape {
    pub fn tool(&self) -> Tool {
        match self {
            StrokeShape::Brush { .. } => Tool::Brush,
            StrokeShape::Eraser { .. } => Tool::Eraser,
            StrokeShape::Fill { .. } => Tool::Fill,
        }
    }

    pub fn validate(&self, canvas: CanvasSize) -> Result<(), String> {
        match self {
            StrokeShape::Brush { points, width, .. } | StrokeShape::Eraser { points, width } => {
                validate_width(*width)?;
                validate_points(points, MAX_POINTS_PER_STROKE, canvas)
            }
            StrokeShape::Fill { at, .. } => {
                if canvas.accepts(*at) {
                    Ok(())
                } else {
                    Err("Fill point is off the canvas".to_string())
                }
            }
        }
    }
}

/// A completed, durable gesture. `id` is the store-assigned sequence number
/// and defines replay order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Stroke {
    pub id: StrokeId,
    pub session_id: SessionId,
    pub author_id: ParticipantId,
    /// Ephemeral gesture this stroke finalises, if it was previewed live.
    pub path_id: Option<PathId>,
    pub shape: StrokeShape,
    pub created_at: DateTime<Utc>,
}

/// Stroke as submitted by the drawer, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct NewStroke {
    pub session_id: SessionId,
    pub author_id: ParticipantId,
    pub path_id: Option<PathId>,
    pub shape: StrokeShape,
}

/// Closed set of unpersisted, best-effort events exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type")]
#[ts(export)]
pub enum BroadcastEvent {
    DrawSample {
        path_id: PathId,
        drawer_id: ParticipantId,
        tool: Tool,
        color: Rgb,
        width: f32,
        points: Vec<Point>,
    },
    DrawEnd {
        path_id: PathId,
        drawer_id: ParticipantId,
    },
    Clear {
        drawer_id: ParticipantId,
    },
    Undo {
        drawer_id: ParticipantId,
    },
    PhaseChanged {
        session_id: SessionId,
        phase: PhaseKind,
        turn_index: u32,
        phase_started_at: DateTime<Utc>,
    },
}

impl BroadcastEvent {
    /// Participant that emitted a drawing event; `None` for phase notices.
    pub fn drawer_id(&self) -> Option<ParticipantId> {
        match self {
            BroadcastEvent::DrawSample { drawer_id, .. }
            | BroadcastEvent::DrawEnd { drawer_id, .. }
            | BroadcastEvent::Clear { drawer_id }
            | BroadcastEvent::Undo { drawer_id } => Some(*drawer_id),
            BroadcastEvent::PhaseChanged { .. } => None,
        }
    }

    /// Checks a received payload before it is acted upon.
    pub fn validate(&self, canvas: CanvasSize) -> Result<(), String> {
        match self {
            BroadcastEvent::DrawSample {
                tool, width, points, ..
            } => {
                if *tool == Tool::Fill {
                    return Err("Fill cannot be previewed".to_string());
                }
                validate_width(*width)?;
                if points.is_empty() {
                    return Err("Sample batch is empty".to_string());
                }
                validate_points(points, MAX_SAMPLES_PER_EVENT, canvas)
            }
            _ => Ok(()),
        }
    }
}

fn validate_width(width: f32) -> Result<(), String> {
    if !width.is_finite() || !(MIN_STROKE_WIDTH..=MAX_STROKE_WIDTH).contains(&width) {
        return Err(format!("Stroke width {} out of range", width));
    }
    Ok(())
}

fn validate_points(points: &[Point], max: usize, canvas: CanvasSize) -> Result<(), String> {
    if points.len() > max {
        return Err(format!("Too many points: {} > {}", points.len(), max));
    }
    if let Some(p) = points.iter().find(|p| !canvas.accepts(**p)) {
        return Err(format!("Point ({}, {}) is off the canvas", p.x, p.y));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    const CANVAS: CanvasSize = CanvasSize::new(800, 600);

    fn sample(points: Vec<Point>, width: f32) -> BroadcastEvent {
        BroadcastEvent::DrawSample {
            path_id: Uuid::new_v4(),
            drawer_id: Uuid::new_v4(),
            tool: Tool::Brush,
            color: Rgb::BLACK,
            width,
            points,
        }
    }

    #[test]
    fn test_hex_colors() {
        assert_eq!(Rgb::parse_hex("#ff8000"), Some(Rgb::new(255, 128, 0)));
        assert_eq!(Rgb::parse_hex("00ff00"), Some(Rgb::new(0, 255, 0)));
        assert_eq!(Rgb::parse_hex("#fff"), None);
        assert_eq!(Rgb::parse_hex("#gg0000"), None);
        assert_eq!(Rgb::new(1, 2, 255).to_hex(), "#0102ff");
    }

    #[test]
    fn test_sample_validation() {
        assert!(sample(vec![Point::new(1.0, 2.0)], 4.0).validate(CANVAS).is_ok());
        assert!(sample(vec![], 4.0).validate(CANVAS).is_err());
        assert!(sample(vec![Point::new(f32::NAN, 0.0)], 4.0).validate(CANVAS).is_err());
        assert!(sample(vec![Point::new(0.0, 0.0)], 0.0).validate(CANVAS).is_err());
        assert!(sample(vec![Point::new(0.0, 0.0)], 500.0).validate(CANVAS).is_err());
        assert!(sample(vec![Point::new(1e9, 0.0)], 4.0).validate(CANVAS).is_err());

        let too_many = vec![Point::new(0.0, 0.0); MAX_SAMPLES_PER_EVENT + 1];
        assert!(sample(too_many, 4.0).validate(CANVAS).is_err());
    }

    #[test]
    fn test_stroke_points_must_stay_near_the_canvas() {
        let brush = |end: Point| StrokeShape::Brush {
            points: vec![Point::new(0.0, 0.0), end],
            color: Rgb::BLACK,
            width: 2.0,
        };
        assert!(brush(Point::new(800.0, 600.0)).validate(CANVAS).is_ok());
        assert!(brush(Point::new(-CANVAS_MARGIN, 600.0 + CANVAS_MARGIN)).validate(CANVAS).is_ok());
        assert!(brush(Point::new(1e9, 0.0)).validate(CANVAS).is_err());
        assert!(brush(Point::new(0.0, -CANVAS_MARGIN - 1.0)).validate(CANVAS).is_err());

        let far_fill = StrokeShape::Fill {
            at: Point::new(400.0, 5_000.0),
            color: Rgb::WHITE,
        };
        assert!(far_fill.validate(CANVAS).is_err());
    }

    #[test]
    fn test_stroke_shape_wire_format_is_tagged_by_tool() {
        let shape = StrokeShape::Fill {
            at: Point::new(3.0, 4.0),
            color: Rgb::WHITE,
        };
        let json = serde_json::to_value(&shape).unwrap();
        assert_eq!(json["tool"], "fill");
        assert_eq!(shape.tool(), Tool::Fill);
    }
}
