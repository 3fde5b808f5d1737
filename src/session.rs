// Per-run tracking state: the active tracker (if any) and frame timing.
// `process` is called once per frame by the main loop and paints the overlay.

use crate::draw::{draw_rect, draw_text_5x7};
use crate::tracker::{Tracker, TrackerConfig};
use crate::types::{FrameBuffer, Rect};
use log::{info, warn};
use std::time::Instant;

const BOX_COLOR: u32 = 0x0000_FF00;  // tracked box + "Tracking"
const LOST_COLOR: u32 = 0x00FF_0000; // "Lost Track"
const HUD_COLOR: u32 = 0x0000_B400;  // tracker name + FPS

/// What happened to the target on one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// No tracker is running.
    Idle,
    Tracking(Rect),
    Lost,
}

pub struct TrackingSession {
    config: TrackerConfig,
    tracker: Option<Box<dyn Tracker>>,
    prev_frame_at: Option<Instant>,
}

impl TrackingSession {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config, tracker: None, prev_frame_at: None }
    }

    /// Seed a fresh tracker on `frame`. When the tracker refuses the ROI,
    /// nothing is tracked afterwards (any previous tracker is gone as well).
    pub fn start(&mut self, frame: &FrameBuffer, roi: Rect) -> bool {
        self.tracker = None;
        let mut tracker = match self.config.build() {
            Ok(t) => t,
            Err(e) => {
                warn!("could not create the {} tracker: {e}", self.tracker_name());
                return false;
            }
        };
        if tracker.init(frame, roi) {
            info!("{} tracker started on {roi}", tracker.name());
            self.tracker = Some(tracker);
            true
        } else {
            warn!("tracker initialization failed for ROI {roi}");
            false
        }
    }

    pub fn clear(&mut self) {
        if self.tracker.take().is_some() {
            info!("tracker cleared");
        }
    }

    pub fn is_active(&self) -> bool {
        self.tracker.is_some()
    }

    pub fn tracker_name(&self) -> &'static str {
        self.config.kind.label()
    }

    /// Instantaneous frame rate since the previous call; 0 on the first one.
    pub fn tick(&mut self, now: Instant) -> f32 {
        let fps = match self.prev_frame_at {
            Some(prev) => {
                let dt = now.saturating_duration_since(prev).as_secs_f32();
                if dt > 0.0 { 1.0 / dt } else { 0.0 }
            }
            None => 0.0,
        };
        self.prev_frame_at = Some(now);
        fps
    }

    /// Run the tracker (if any) on `frame`.
    pub fn update(&mut self, frame: &FrameBuffer) -> FrameStatus {
        match self.tracker.as_mut() {
            None => FrameStatus::Idle,
            Some(t) => t.update(frame).map_or(FrameStatus::Lost, FrameStatus::Tracking),
        }
    }

    /// Track, time and annotate one frame in place.
    pub fn process(&mut self, frame: &mut FrameBuffer, now: Instant) -> (FrameStatus, f32) {
        let status = self.update(frame);
        let fps = self.tick(now);
        annotate(frame, status, self.tracker_name(), fps);
        (status, fps)
    }
}

/// Paint the tracking result and the HUD line.
pub fn annotate(frame: &mut FrameBuffer, status: FrameStatus, label: &str, fps: f32) {
    match status {
        FrameStatus::Tracking(r) => {
            draw_rect(frame, r, BOX_COLOR, 2);
            draw_text_5x7(frame, r.x, r.y - 20, "Tracking", BOX_COLOR, 2);
        }
        FrameStatus::Lost => {
            draw_text_5x7(frame, 100, 80, "Lost Track", LOST_COLOR, 2);
        }
        FrameStatus::Idle => {}
    }
    let hud = format!("{label} - FPS: {fps:.2}");
    draw_text_5x7(frame, 10, 25, &hud, HUD_COLOR, 2);
}
