use chrono::{DateTime, Duration, Utc};
use sketch_types::{
    BroadcastEvent, CanvasSize, ChangeNotice, ChangeOp, FeedRecord, MAX_SAMPLES_PER_EVENT,
    ParticipantId, PathId, Phase, PhaseKind, Point, Rgb, Session, SessionId, Stroke, Tool,
};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;
use uuid::Uuid;

use crate::{ERASER_WIDTH_FACTOR, Raster, SketchError, SketchResult};

pub const DEFAULT_INK_SAMPLES_PER_SECOND: u32 = 40;
/// Previews with no new samples for this long are dropped.
pub const PREVIEW_IDLE_TIMEOUT_MS: i64 = 3_000;

/// Only the current drawer may write strokes, clear, undo or stream ink,
/// and only while drawing.
pub fn authorize_drawer(session: &Session, actor: ParticipantId) -> SketchResult<()> {
    if session.current_drawer() != Some(actor) {
        return Err(SketchError::InvalidActor);
    }
    if session.phase_kind() != PhaseKind::Playing {
        return Err(SketchError::WrongPhase {
            phase: session.phase_kind(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaStatus {
    /// No history fetched yet.
    Detached,
    /// History replayed and inserts are being applied.
    Live,
    /// History changed underneath us; discard and re-fetch.
    NeedsRefetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaAction {
    None,
    /// Caller should fetch the full stroke history and `attach` it.
    Refetch,
}

#[derive(Debug, Clone)]
struct InkPreview {
    tool: Tool,
    color: Rgb,
    width: f32,
    points: Vec<Point>,
    last_seen: DateTime<Utc>,
}

/// A viewer's copy of the shared canvas.
///
/// Durable strokes are replayed in store order onto a raster; ephemeral
/// ink is kept on the side as short-lived previews and only composited on
/// `render`. Session phase flows in one direction: `sync_session` reacts
/// to it, nothing here writes back.
#[derive(Debug, Clone)]
pub struct CanvasReplica {
    session_id: SessionId,
    viewer_id: ParticipantId,
    drawer_id: Option<ParticipantId>,
    phase: PhaseKind,
    status: ReplicaStatus,
    strokes: Vec<Stroke>,
    raster: Raster,
    previews: BTreeMap<PathId, InkPreview>,
    finished_paths: HashSet<PathId>,
}

impl CanvasReplica {
    pub fn new(session_id: SessionId, viewer_id: ParticipantId, width: u32, height: u32) -> Self {
        Self {
            session_id,
            viewer_id,
            drawer_id: None,
            phase: PhaseKind::Waiting,
            status: ReplicaStatus::Detached,
            strokes: Vec::new(),
            raster: Raster::new(width, height),
            previews: BTreeMap::new(),
            finished_paths: HashSet::new(),
        }
    }

    pub fn status(&self) -> ReplicaStatus {
        self.status
    }

    pub fn strokes(&self) -> &[Stroke] {
        &self.strokes
    }

    pub fn preview_count(&self) -> usize {
        self.previews.len()
    }

    /// Bitmap of the durable history only.
    pub fn durable_raster(&self) -> &Raster {
        &self.raster
    }

    /// Follows the upstream session. Leaving `Playing` empties the canvas,
    /// matching the store deleting that round's strokes.
    pub fn sync_session(&mut self, session: &Session) {
        if session.id != self.session_id {
            return;
        }
        let next = session.phase_kind();
        if self.phase == PhaseKind::Playing && next != PhaseKind::Playing {
            self.reset_round();
        }
        self.phase = next;
        self.drawer_id = match &session.phase {
            Phase::Playing { drawer_id, .. } => Some(*drawer_id),
            _ => None,
        };
    }

    /// Replaces local state with the full ordered history.
    pub fn attach(&mut self, mut history: Vec<Stroke>) {
        history.retain(|s| s.session_id == self.session_id);
        history.sort_by_key(|s| s.id);
        history.dedup_by_key(|s| s.id);

        for stroke in &history {
            self.settle_preview(stroke.path_id);
        }
        self.strokes = history;
        self.status = ReplicaStatus::Live;
        self.redraw();
    }

    /// Applies a change-feed notification for the stroke table.
    pub fn apply_change(&mut self, notice: &ChangeNotice) -> ReplicaAction {
        match (&notice.op, &notice.record) {
            (ChangeOp::Insert, FeedRecord::Stroke(stroke)) => {
                self.apply_insert(stroke.clone());
                ReplicaAction::None
            }
            (_, FeedRecord::StrokesRemoved { session_id, .. }) if *session_id == self.session_id => {
                self.invalidate()
            }
            (ChangeOp::Delete, FeedRecord::Stroke(stroke)) if stroke.session_id == self.session_id => {
                self.invalidate()
            }
            (_, FeedRecord::Session(session)) => {
                self.sync_session(session);
                ReplicaAction::None
            }
            _ => ReplicaAction::None,
        }
    }

    fn apply_insert(&mut self, stroke: Stroke) {
        if stroke.session_id != self.session_id || self.status != ReplicaStatus::Live {
            return;
        }
        if self.strokes.iter().any(|s| s.id == stroke.id) {
            return;
        }
        self.settle_preview(stroke.path_id);

        let in_order = self.strokes.last().is_none_or(|last| last.id < stroke.id);
        if in_order {
            self.raster.draw_shape(&stroke.shape);
            self.strokes.push(stroke);
        } else {
            let at = self.strokes.partition_point(|s| s.id < stroke.id);
            self.strokes.insert(at, stroke);
            self.redraw();
        }
    }

    /// Deletes are never applied point-wise: drop everything and ask for
    /// the full history again.
    fn invalidate(&mut self) -> ReplicaAction {
        self.strokes.clear();
        self.raster.clear();
        self.status = ReplicaStatus::NeedsRefetch;
        ReplicaAction::Refetch
    }

    /// Applies a best-effort event from the ephemeral channel.
    pub fn apply_ephemeral(&mut self, event: &BroadcastEvent, now: DateTime<Utc>) -> ReplicaAction {
        let canvas = CanvasSize::new(self.raster.width(), self.raster.height());
        if let Err(reason) = event.validate(canvas) {
            debug!("Dropping invalid ephemeral event: {}", reason);
            return ReplicaAction::None;
        }

        if let BroadcastEvent::PhaseChanged {
            session_id, phase, ..
        } = event
        {
            if *session_id == self.session_id && *phase != PhaseKind::Playing {
                if self.phase == PhaseKind::Playing {
                    self.reset_round();
                }
                self.phase = *phase;
                self.drawer_id = None;
            }
            return ReplicaAction::None;
        }

        let sender = event.drawer_id();
        if sender == Some(self.viewer_id) || sender != self.drawer_id || self.drawer_id.is_none() {
            return ReplicaAction::None;
        }

        match event {
            BroadcastEvent::DrawSample {
                path_id,
                tool,
                color,
                width,
                points,
                ..
            } => {
                if self.finished_paths.contains(path_id) {
                    return ReplicaAction::None;
                }
                let preview = self.previews.entry(*path_id).or_insert_with(|| InkPreview {
                    tool: *tool,
                    color: *color,
                    width: *width,
                    points: Vec::new(),
                    last_seen: now,
                });
                preview.points.extend_from_slice(points);
                preview.last_seen = now;
                ReplicaAction::None
            }
            BroadcastEvent::DrawEnd { path_id, .. } => {
                self.settle_preview(Some(*path_id));
                ReplicaAction::None
            }
            BroadcastEvent::Clear { .. } | BroadcastEvent::Undo { .. } => {
                self.previews.clear();
                self.invalidate()
            }
            BroadcastEvent::PhaseChanged { .. } => ReplicaAction::None,
        }
    }

    /// Drops previews whose gesture went quiet.
    pub fn expire_previews(&mut self, now: DateTime<Utc>) {
        let idle = Duration::milliseconds(PREVIEW_IDLE_TIMEOUT_MS);
        self.previews.retain(|_, preview| now - preview.last_seen < idle);
    }

    /// Durable history with live previews composited on top.
    pub fn render(&self) -> Raster {
        let mut raster = self.raster.clone();
        for preview in self.previews.values() {
            let (color, width) = match preview.tool {
                Tool::Eraser => (raster.background(), preview.width * ERASER_WIDTH_FACTOR),
                _ => (preview.color, preview.width),
            };
            raster.draw_polyline(&preview.points, color, width);
        }
        raster
    }

    fn settle_preview(&mut self, path_id: Option<PathId>) {
        if let Some(path_id) = path_id {
            self.previews.remove(&path_id);
            self.finished_paths.insert(path_id);
        }
    }

    fn reset_round(&mut self) {
        self.strokes.clear();
        self.previews.clear();
        self.finished_paths.clear();
        self.raster.clear();
    }

    fn redraw(&mut self) {
        self.raster.clear();
        for stroke in &self.strokes {
            self.raster.draw_shape(&stroke.shape);
        }
    }
}

/// Drawer-side batching of live ink so no more than `samples_per_second`
/// sample events leave per second.
#[derive(Debug, Clone)]
pub struct InkThrottle {
    drawer_id: ParticipantId,
    min_interval: Duration,
    last_flush: Option<DateTime<Utc>>,
    gesture: Option<Gesture>,
}

#[derive(Debug, Clone)]
struct Gesture {
    path_id: PathId,
    tool: Tool,
    color: Rgb,
    width: f32,
    buffer: Vec<Point>,
}

impl InkThrottle {
    pub fn new(drawer_id: ParticipantId, samples_per_second: u32) -> Self {
        let per_second = i64::from(samples_per_second.max(1));
        Self {
            drawer_id,
            min_interval: Duration::milliseconds(1000 / per_second),
            last_flush: None,
            gesture: None,
        }
    }

    /// Starts a new gesture and returns its ephemeral path id.
    pub fn begin(&mut self, tool: Tool, color: Rgb, width: f32) -> PathId {
        let path_id = Uuid::new_v4();
        self.gesture = Some(Gesture {
            path_id,
            tool,
            color,
            width,
            buffer: Vec::new(),
        });
        path_id
    }

    /// Buffers a point; returns a sample event once the interval allows.
    pub fn push(&mut self, point: Point, now: DateTime<Utc>) -> Option<BroadcastEvent> {
        let gesture = self.gesture.as_mut()?;
        if gesture.buffer.len() >= MAX_SAMPLES_PER_EVENT {
            gesture.buffer.pop();
        }
        gesture.buffer.push(point);

        let due = self
            .last_flush
            .is_none_or(|last| now - last >= self.min_interval);
        if due { self.flush(now) } else { None }
    }

    /// Ends the gesture: any buffered points, then the end-of-gesture notice.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Vec<BroadcastEvent> {
        let mut events = Vec::new();
        if let Some(sample) = self.flush(now) {
            events.push(sample);
        }
        if let Some(gesture) = self.gesture.take() {
            events.push(BroadcastEvent::DrawEnd {
                path_id: gesture.path_id,
                drawer_id: self.drawer_id,
            });
        }
        events
    }

    fn flush(&mut self, now: DateTime<Utc>) -> Option<BroadcastEvent> {
        let gesture = self.gesture.as_mut()?;
        if gesture.buffer.is_empty() {
            return None;
        }
        self.last_flush = Some(now);
        Some(BroadcastEvent::DrawSample {
            path_id: gesture.path_id,
            drawer_id: self.drawer_id,
            tool: gesture.tool,
            color: gesture.color,
            width: gesture.width,
            points: std::mem::take(&mut gesture.buffer),
        })
    }
}
