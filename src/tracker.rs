//! Single-object trackers.
//!
//! The tracking loop only knows the [`Tracker`] trait. With the `opencv`
//! feature (on by default) the KCF, CSRT and MOSSE trackers come from OpenCV
//! (see `cv.rs`). The template trackers here slide the ROI's luma patch over a
//! search window around the last known box and score each position; they need
//! no native library.

use crate::error::Error;
use crate::types::{FrameBuffer, Rect};
use clap::ValueEnum;
use log::debug;

/// Tracker interface: seed with a box on one frame, then follow it.
pub trait Tracker {
    /// Short label for the HUD.
    fn name(&self) -> &'static str;
    /// Returns false if the box cannot be tracked on this frame.
    fn init(&mut self, frame: &FrameBuffer, roi: Rect) -> bool;
    /// New box estimate, or `None` when the object is lost on this frame.
    fn update(&mut self, frame: &FrameBuffer) -> Option<Rect>;
}

/// How a candidate patch is compared to the template.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchMetric {
    /// Mean squared difference. Fast, sensitive to lighting.
    Ssd,
    /// Zero-mean normalized cross-correlation. Tolerates brightness/contrast shifts.
    Ncc,
}

impl MatchMetric {
    pub fn label(self) -> &'static str {
        match self {
            MatchMetric::Ssd => "SSD",
            MatchMetric::Ncc => "NCC",
        }
    }
}

/// Which tracker to build.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TrackerKind {
    /// OpenCV kernelized correlation filter. Fast, moderate robustness.
    #[cfg(feature = "opencv")]
    Kcf,
    /// OpenCV discriminative correlation filter with channel and spatial reliability.
    /// Copes with scale, rotation and occlusion; slower.
    #[cfg(feature = "opencv")]
    Csrt,
    /// OpenCV MOSSE. Very fast; struggles with scale and rotation.
    #[cfg(feature = "opencv")]
    Mosse,
    /// Template matching, mean squared difference.
    Ssd,
    /// Template matching, normalized cross-correlation.
    Ncc,
}

impl TrackerKind {
    #[cfg(feature = "opencv")]
    pub const DEFAULT: TrackerKind = TrackerKind::Kcf;
    #[cfg(not(feature = "opencv"))]
    pub const DEFAULT: TrackerKind = TrackerKind::Ncc;

    pub fn label(self) -> &'static str {
        match self {
            #[cfg(feature = "opencv")]
            TrackerKind::Kcf => "KCF",
            #[cfg(feature = "opencv")]
            TrackerKind::Csrt => "CSRT",
            #[cfg(feature = "opencv")]
            TrackerKind::Mosse => "MOSSE",
            TrackerKind::Ssd => MatchMetric::Ssd.label(),
            TrackerKind::Ncc => MatchMetric::Ncc.label(),
        }
    }
}

/// Templates smaller than this on either side are refused.
pub const MIN_TEMPLATE_SIDE: i32 = 4;
/// Worst accepted mean squared difference (about 30 grey levels per pixel).
const SSD_ACCEPT: f32 = 900.0;
/// Lowest accepted correlation.
const NCC_ACCEPT: f32 = 0.6;
/// Patches with less variance than this have no structure to correlate.
const MIN_VARIANCE: f32 = 1.0;

/// Everything needed to build a fresh tracker.
#[derive(Clone, Copy, Debug)]
pub struct TrackerConfig {
    pub kind: TrackerKind,
    /// Template trackers only.
    pub search_radius: i32,
    /// Template trackers only.
    pub learning_rate: f32,
}

impl TrackerConfig {
    pub fn build(&self) -> Result<Box<dyn Tracker>, Error> {
        let metric = match self.kind {
            #[cfg(feature = "opencv")]
            TrackerKind::Kcf | TrackerKind::Csrt | TrackerKind::Mosse => {
                return Ok(Box::new(crate::cv::CvTracker::create(self.kind)?));
            }
            TrackerKind::Ssd => MatchMetric::Ssd,
            TrackerKind::Ncc => MatchMetric::Ncc,
        };
        Ok(Box::new(
            TemplateTracker::new(metric, self.search_radius).with_learning_rate(self.learning_rate),
        ))
    }
}

/// Luma patch in row-major order.
#[derive(Clone, Debug)]
struct Patch {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl Patch {
    fn extract(frame: &FrameBuffer, r: Rect) -> Self {
        let (w, h) = (r.width as usize, r.height as usize);
        let mut data = Vec::with_capacity(w * h);
        for y in 0..h {
            for x in 0..w {
                data.push(frame.luma(r.x as usize + x, r.y as usize + y));
            }
        }
        Self { width: w, height: h, data }
    }

    fn mean(&self) -> f32 {
        self.data.iter().sum::<f32>() / self.data.len() as f32
    }

    fn variance(&self) -> f32 {
        let m = self.mean();
        self.data.iter().map(|v| (v - m) * (v - m)).sum::<f32>() / self.data.len() as f32
    }
}

/// Exhaustive template matching inside a square search window.
pub struct TemplateTracker {
    metric: MatchMetric,
    search_radius: i32,
    learning_rate: f32,
    template: Option<Patch>,
    bbox: Rect,
}

impl TemplateTracker {
    pub fn new(metric: MatchMetric, search_radius: i32) -> Self {
        Self {
            metric,
            search_radius: search_radius.max(0),
            learning_rate: 0.0,
            template: None,
            bbox: Rect::default(),
        }
    }

    /// Blend factor toward the newest matched patch (0 = frozen template).
    pub fn with_learning_rate(mut self, rate: f32) -> Self {
        self.learning_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Mean squared difference between the template and `window` at offset (x,y).
    fn ssd(window: &Patch, t: &Patch, x: usize, y: usize) -> f32 {
        let mut sum = 0.0f32;
        for ty in 0..t.height {
            let row = &t.data[ty * t.width..(ty + 1) * t.width];
            let start = (y + ty) * window.width + x;
            for (tv, fv) in row.iter().zip(&window.data[start..start + t.width]) {
                let d = fv - tv;
                sum += d * d;
            }
        }
        sum / t.data.len() as f32
    }

    /// Zero-mean normalized cross-correlation against `window` at offset (x,y).
    /// `t_zm` is the template minus its mean and `t_norm` its L2 norm.
    fn ncc(window: &Patch, t_zm: &Patch, t_norm: f32, x: usize, y: usize) -> f32 {
        let n = t_zm.data.len() as f32;
        let (mut cross, mut sum, mut sum_sq) = (0.0f32, 0.0f32, 0.0f32);
        for ty in 0..t_zm.height {
            let row = &t_zm.data[ty * t_zm.width..(ty + 1) * t_zm.width];
            let start = (y + ty) * window.width + x;
            for (tv, &f) in row.iter().zip(&window.data[start..start + t_zm.width]) {
                cross += tv * f;
                sum += f;
                sum_sq += f * f;
            }
        }
        let f_var = sum_sq - sum * sum / n;
        if f_var < MIN_VARIANCE * n {
            return 0.0;
        }
        cross / (t_norm * f_var.sqrt())
    }
}

impl Tracker for TemplateTracker {
    fn name(&self) -> &'static str {
        self.metric.label()
    }

    fn init(&mut self, frame: &FrameBuffer, roi: Rect) -> bool {
        self.template = None;
        let clipped = roi.clip_to(frame.width, frame.height);
        if clipped.width < MIN_TEMPLATE_SIDE || clipped.height < MIN_TEMPLATE_SIDE {
            debug!("ROI {roi} too small after clipping to {clipped}");
            return false;
        }
        let patch = Patch::extract(frame, clipped);
        if self.metric == MatchMetric::Ncc && patch.variance() < MIN_VARIANCE {
            debug!("ROI {clipped} has no contrast to correlate");
            return false;
        }
        self.template = Some(patch);
        self.bbox = clipped;
        true
    }

    fn update(&mut self, frame: &FrameBuffer) -> Option<Rect> {
        let template = self.template.as_ref()?;
        let (tw, th) = (template.width, template.height);
        if frame.width < tw || frame.height < th {
            return None;
        }

        let max_x = (frame.width - tw) as i32;
        let max_y = (frame.height - th) as i32;
        let r = self.search_radius;
        let x_lo = self.bbox.x.saturating_sub(r).clamp(0, max_x);
        let x_hi = self.bbox.x.saturating_add(r).clamp(0, max_x);
        let y_lo = self.bbox.y.saturating_sub(r).clamp(0, max_y);
        let y_hi = self.bbox.y.saturating_add(r).clamp(0, max_y);

        // Luma of every pixel any candidate can touch, converted once.
        let window = Patch::extract(
            frame,
            Rect::new(x_lo, y_lo, x_hi - x_lo + tw as i32, y_hi - y_lo + th as i32),
        );
        let (ox, oy) = (x_lo as usize, y_lo as usize);

        // Scores are oriented so that bigger is better.
        let mut best: Option<(f32, i32, i32)> = None;
        let mut consider = |score: f32, x: i32, y: i32| {
            if best.is_none_or(|(s, _, _)| score > s) {
                best = Some((score, x, y));
            }
        };

        match self.metric {
            MatchMetric::Ssd => {
                for y in y_lo..=y_hi {
                    for x in x_lo..=x_hi {
                        let (wx, wy) = (x as usize - ox, y as usize - oy);
                        consider(-Self::ssd(&window, template, wx, wy), x, y);
                    }
                }
            }
            MatchMetric::Ncc => {
                let mean = template.mean();
                let zm = Patch {
                    width: tw,
                    height: th,
                    data: template.data.iter().map(|v| v - mean).collect(),
                };
                let norm = zm.data.iter().map(|v| v * v).sum::<f32>().sqrt();
                for y in y_lo..=y_hi {
                    for x in x_lo..=x_hi {
                        let (wx, wy) = (x as usize - ox, y as usize - oy);
                        consider(Self::ncc(&window, &zm, norm, wx, wy), x, y);
                    }
                }
            }
        }

        let (score, bx, by) = best?;
        let accepted = match self.metric {
            MatchMetric::Ssd => -score <= SSD_ACCEPT,
            MatchMetric::Ncc => score >= NCC_ACCEPT,
        };
        if !accepted {
            return None;
        }

        self.bbox = Rect::new(bx, by, tw as i32, th as i32);
        if self.learning_rate > 0.0 {
            let fresh = Patch::extract(frame, self.bbox);
            let a = self.learning_rate;
            if let Some(t) = self.template.as_mut() {
                for (tv, fv) in t.data.iter_mut().zip(&fresh.data) {
                    *tv = (1.0 - a) * *tv + a * fv;
                }
            }
        }
        Some(self.bbox)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: usize = 64;
    const H: usize = 64;

    /// Black frame with a white 10x10 square whose top-left is (x,y).
    fn square_at(x: usize, y: usize) -> FrameBuffer {
        let mut fb = FrameBuffer::filled(W, H, 0);
        for yy in y..y + 10 {
            for xx in x..x + 10 {
                fb.pixels[yy * W + xx] = 0x00FF_FFFF;
            }
        }
        fb
    }

    // ROI with a 4px black margin around the square so the patch has contrast.
    const ROI: Rect = Rect::new(16, 16, 18, 18);

    #[test]
    fn follows_a_moving_square() {
        for metric in [MatchMetric::Ssd, MatchMetric::Ncc] {
            let mut t = TemplateTracker::new(metric, 8);
            assert!(t.init(&square_at(20, 20), ROI), "{metric:?}");
            assert_eq!(t.update(&square_at(25, 23)), Some(Rect::new(21, 19, 18, 18)));
            assert_eq!(t.update(&square_at(22, 27)), Some(Rect::new(18, 23, 18, 18)));
        }
    }

    #[test]
    fn rejects_tiny_and_off_frame_rois() {
        let frame = square_at(20, 20);
        let mut t = TemplateTracker::new(MatchMetric::Ssd, 8);
        assert!(!t.init(&frame, Rect::new(30, 30, 0, 0)));
        assert!(!t.init(&frame, Rect::new(30, 30, 3, 40)));
        assert!(!t.init(&frame, Rect::new(100, 100, 20, 20)));
        assert_eq!(t.update(&frame), None);
    }

    #[test]
    fn roi_hanging_off_the_edge_is_clipped() {
        let frame = square_at(50, 50);
        let mut t = TemplateTracker::new(MatchMetric::Ssd, 4);
        assert!(t.init(&frame, Rect::new(46, 46, 40, 40)));
        assert_eq!(t.update(&frame), Some(Rect::new(46, 46, 18, 18)));
    }

    #[test]
    fn ncc_refuses_flat_patches() {
        let flat = FrameBuffer::filled(W, H, 0x0080_8080);
        let mut t = TemplateTracker::new(MatchMetric::Ncc, 8);
        assert!(!t.init(&flat, ROI));

        let mut t = TemplateTracker::new(MatchMetric::Ssd, 8);
        assert!(t.init(&flat, ROI));
    }

    #[test]
    fn reports_lost_when_the_target_vanishes() {
        let mut t = TemplateTracker::new(MatchMetric::Ncc, 8);
        assert!(t.init(&square_at(20, 20), ROI));
        assert_eq!(t.update(&FrameBuffer::filled(W, H, 0)), None);
        // The box did not move, so the square reappearing is picked up again.
        assert_eq!(t.update(&square_at(20, 20)), Some(ROI));

        let mut t = TemplateTracker::new(MatchMetric::Ssd, 8);
        assert!(t.init(&square_at(20, 20), ROI));
        assert_eq!(t.update(&FrameBuffer::filled(W, H, 0x00FF_FFFF)), None);
    }

    #[test]
    fn frame_smaller_than_template_is_lost() {
        let mut t = TemplateTracker::new(MatchMetric::Ssd, 8);
        assert!(t.init(&square_at(20, 20), ROI));
        assert_eq!(t.update(&FrameBuffer::filled(10, 10, 0)), None);
    }

    #[test]
    fn huge_search_radius_saturates_instead_of_overflowing() {
        for metric in [MatchMetric::Ssd, MatchMetric::Ncc] {
            let mut t = TemplateTracker::new(metric, i32::MAX);
            assert!(t.init(&square_at(20, 20), ROI));
            assert_eq!(t.update(&square_at(40, 5)), Some(Rect::new(36, 1, 18, 18)), "{metric:?}");
        }
    }

    #[test]
    fn search_window_at_the_frame_corner() {
        // Box pinned to the bottom-right corner: the window is clamped on both axes.
        let mut t = TemplateTracker::new(MatchMetric::Ncc, 8);
        let roi = Rect::new(46, 46, 18, 18);
        assert!(t.init(&square_at(50, 50), roi));
        assert_eq!(t.update(&square_at(48, 47)), Some(Rect::new(44, 43, 18, 18)));
    }

    #[test]
    fn config_builds_named_tracker() {
        let cfg = TrackerConfig { kind: TrackerKind::Ncc, search_radius: 4, learning_rate: 0.5 };
        assert_eq!(cfg.build().map(|t| t.name()).ok(), Some("NCC"));
        assert_eq!(TrackerKind::Ssd.label(), "SSD");
    }

    #[cfg(feature = "opencv")]
    #[test]
    fn library_trackers_are_the_default() {
        assert_eq!(TrackerKind::DEFAULT, TrackerKind::Kcf);
        assert_eq!(TrackerKind::Csrt.label(), "CSRT");
        assert_eq!(TrackerKind::Mosse.label(), "MOSSE");
    }
}
