// OpenCV glue: frame conversion and the KCF / CSRT / MOSSE trackers.
// Frames travel as 8-bit BGR mats, which is what the trackers and
// VideoCapture both use.

use crate::error::Error;
use crate::tracker::{MIN_TEMPLATE_SIDE, Tracker, TrackerKind};
use crate::types::{FrameBuffer, Rect};
use log::debug;
use opencv::core::{self, Mat, Ptr, Rect2d, Vec3b};
use opencv::prelude::*;
use opencv::tracking::{
    TrackerCSRT, TrackerCSRT_Params, TrackerKCF, TrackerKCF_Params, legacy_TrackerMOSSE,
};

impl From<opencv::Error> for Error {
    fn from(e: opencv::Error) -> Self {
        Error::OpenCv(e.to_string())
    }
}

/// Copy a frame into a fresh BGR mat.
pub fn to_mat(frame: &FrameBuffer) -> Result<Mat, Error> {
    let mut bytes = Vec::with_capacity(frame.pixels.len() * 3);
    for &px in &frame.pixels {
        bytes.extend_from_slice(&[px as u8, (px >> 8) as u8, (px >> 16) as u8]);
    }
    let mat = Mat::new_rows_cols_with_bytes::<Vec3b>(
        frame.height as i32,
        frame.width as i32,
        &bytes,
    )?;
    Ok(mat.try_clone()?)
}

/// Copy an 8-bit BGR mat (as decoded by VideoCapture) into a frame.
pub fn from_mat(mat: &Mat) -> Result<FrameBuffer, Error> {
    if mat.typ() != core::CV_8UC3 {
        return Err(Error::OpenCv(format!("expected an 8-bit BGR frame, got type {}", mat.typ())));
    }
    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };
    let pixels = mat
        .data_bytes()?
        .chunks_exact(3)
        .map(|p| ((p[2] as u32) << 16) | ((p[1] as u32) << 8) | p[0] as u32)
        .collect();
    Ok(FrameBuffer { width: mat.cols() as usize, height: mat.rows() as usize, pixels })
}

fn to_cv_rect(r: Rect) -> core::Rect {
    core::Rect::new(r.x, r.y, r.width, r.height)
}

enum Backend {
    Kcf(Ptr<TrackerKCF>),
    Csrt(Ptr<TrackerCSRT>),
    // MOSSE only exists in the legacy API, which speaks Rect2d.
    Mosse(Ptr<legacy_TrackerMOSSE>),
}

/// One of OpenCV's single-object trackers behind the `Tracker` trait.
pub struct CvTracker {
    kind: TrackerKind,
    backend: Backend,
}

impl CvTracker {
    /// Template kinds are not OpenCV trackers and are refused.
    pub fn create(kind: TrackerKind) -> Result<Self, Error> {
        let backend = match kind {
            TrackerKind::Kcf => Backend::Kcf(TrackerKCF::create(TrackerKCF_Params::default()?)?),
            TrackerKind::Csrt => {
                Backend::Csrt(TrackerCSRT::create(&TrackerCSRT_Params::default()?)?)
            }
            TrackerKind::Mosse => Backend::Mosse(legacy_TrackerMOSSE::create()?),
            TrackerKind::Ssd | TrackerKind::Ncc => {
                return Err(Error::OpenCv(format!("{} is not an OpenCV tracker", kind.label())));
            }
        };
        Ok(Self { kind, backend })
    }

    fn try_init(&mut self, frame: &FrameBuffer, roi: Rect) -> Result<bool, Error> {
        let mat = to_mat(frame)?;
        match &mut self.backend {
            Backend::Kcf(t) => t.init(&mat, to_cv_rect(roi))?,
            Backend::Csrt(t) => t.init(&mat, to_cv_rect(roi))?,
            Backend::Mosse(t) => {
                let bbox = Rect2d::new(
                    roi.x as f64,
                    roi.y as f64,
                    roi.width as f64,
                    roi.height as f64,
                );
                return Ok(t.init(&mat, bbox)?);
            }
        }
        Ok(true)
    }

    fn try_update(&mut self, frame: &FrameBuffer) -> Result<Option<Rect>, Error> {
        let mat = to_mat(frame)?;
        let found = match &mut self.backend {
            Backend::Kcf(t) => {
                let mut r = core::Rect::default();
                t.update(&mat, &mut r)?.then(|| Rect::new(r.x, r.y, r.width, r.height))
            }
            Backend::Csrt(t) => {
                let mut r = core::Rect::default();
                t.update(&mat, &mut r)?.then(|| Rect::new(r.x, r.y, r.width, r.height))
            }
            Backend::Mosse(t) => {
                let mut r = Rect2d::default();
                t.update(&mat, &mut r)?.then(|| {
                    Rect::new(
                        r.x.round() as i32,
                        r.y.round() as i32,
                        r.width.round() as i32,
                        r.height.round() as i32,
                    )
                })
            }
        };
        Ok(found)
    }
}

impl Tracker for CvTracker {
    fn name(&self) -> &'static str {
        self.kind.label()
    }

    fn init(&mut self, frame: &FrameBuffer, roi: Rect) -> bool {
        let clipped = roi.clip_to(frame.width, frame.height);
        if clipped.width < MIN_TEMPLATE_SIDE || clipped.height < MIN_TEMPLATE_SIDE {
            debug!("ROI {roi} too small after clipping to {clipped}");
            return false;
        }
        match self.try_init(frame, clipped) {
            Ok(ok) => ok,
            Err(e) => {
                debug!("{} init failed: {e}", self.kind.label());
                false
            }
        }
    }

    fn update(&mut self, frame: &FrameBuffer) -> Option<Rect> {
        self.try_update(frame).unwrap_or_else(|e| {
            debug!("{} update failed: {e}", self.kind.label());
            None
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 160x120 grey frame with a 30x30 noise block at (x,y). The same seed gives
    /// the same texture, so the block only moves.
    fn textured_block_at(x: usize, y: usize) -> FrameBuffer {
        let (w, h) = (160, 120);
        let mut fb = FrameBuffer { width: w, height: h, pixels: vec![0x0060_6060; w * h] };
        let mut seed: u32 = 0x1234_5678;
        for yy in y..y + 30 {
            for xx in x..x + 30 {
                seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                let v = seed >> 24;
                fb.pixels[yy * w + xx] = (v << 16) | ((255 - v) << 8) | (v / 2);
            }
        }
        fb
    }

    fn center(r: Rect) -> (i32, i32) {
        (r.x + r.width / 2, r.y + r.height / 2)
    }

    #[test]
    fn frames_survive_the_mat_round_trip() {
        let frame = textured_block_at(10, 20);
        let mat = to_mat(&frame).unwrap();
        assert_eq!((mat.rows(), mat.cols(), mat.typ()), (120, 160, core::CV_8UC3));
        // BGR order inside the mat.
        let px = *mat.at_2d::<Vec3b>(0, 0).unwrap();
        assert_eq!((px[0], px[1], px[2]), (0x60, 0x60, 0x60));
        assert_eq!(from_mat(&mat).unwrap(), frame);
    }

    #[test]
    fn from_mat_rejects_other_pixel_types() {
        let grey = Mat::zeros(4, 4, core::CV_8UC1).unwrap().to_mat().unwrap();
        assert!(matches!(from_mat(&grey), Err(Error::OpenCv(_))));
    }

    #[test]
    fn each_library_tracker_follows_a_small_shift() {
        for kind in [TrackerKind::Kcf, TrackerKind::Csrt, TrackerKind::Mosse] {
            let mut t = CvTracker::create(kind).unwrap();
            assert_eq!(t.name(), kind.label());
            assert!(t.init(&textured_block_at(60, 40), Rect::new(60, 40, 30, 30)), "{kind:?}");

            let found = t.update(&textured_block_at(63, 42));
            let (cx, cy) = center(found.unwrap_or_else(|| panic!("{kind:?} lost the block")));
            assert!((cx - 78).abs() <= 3 && (cy - 57).abs() <= 3, "{kind:?} at {cx},{cy}");
        }
    }

    #[test]
    fn degenerate_roi_is_refused_before_reaching_opencv() {
        let frame = textured_block_at(60, 40);
        let mut t = CvTracker::create(TrackerKind::Kcf).unwrap();
        assert!(!t.init(&frame, Rect::new(10, 10, 0, 0)));
        assert!(!t.init(&frame, Rect::new(500, 500, 30, 30)));
    }

    #[test]
    fn template_kinds_are_not_library_trackers() {
        assert!(matches!(CvTracker::create(TrackerKind::Ncc), Err(Error::OpenCv(_))));
    }
}
