//! Interactive ROI selection.
//!
//! A session shows one still image and lets the user drag a rectangle on it.
//! Enter/Space accepts the last completed drag, `C` gives up. The pointer
//! logic is a pure [`step`] function so it can be driven by synthetic events;
//! [`run_session`] wires it to anything implementing [`SelectionSurface`].

use crate::draw::{Drawer, draw_rect};
use crate::error::Error;
use crate::types::{FrameBuffer, Point, Rect};
use log::{debug, info};

/// Color of the selection outline (green).
const ROI_COLOR: u32 = 0x0000_FF00;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectorEvent {
    PointerDown(Point),
    PointerMove(Point),
    PointerUp(Point),
    Confirm,
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionState {
    /// Waiting for a drag. `candidate` is the last completed drag, if any.
    Idle { candidate: Option<Rect> },
    Dragging { anchor: Point, current: Point },
    Confirmed(Option<Rect>),
    Cancelled,
}

impl Default for SelectionState {
    fn default() -> Self {
        SelectionState::Idle { candidate: None }
    }
}

impl SelectionState {
    /// The session result once a terminal state is reached.
    pub fn outcome(&self) -> Option<Option<Rect>> {
        match *self {
            SelectionState::Confirmed(r) => Some(r),
            SelectionState::Cancelled => Some(None),
            _ => None,
        }
    }
}

/// What the caller has to do after a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Nothing,
    /// Show the original image again, with this outline on top if any.
    Redraw(Option<Rect>),
    Finish(Option<Rect>),
}

/// One transition of the selection state machine.
pub fn step(state: SelectionState, event: SelectorEvent) -> (SelectionState, Effect) {
    use SelectionState::*;
    use SelectorEvent::*;

    match (state, event) {
        (Confirmed(_) | Cancelled, _) => (state, Effect::Nothing),

        (_, Cancel) => (Cancelled, Effect::Finish(None)),
        (Idle { candidate }, Confirm) => (Confirmed(candidate), Effect::Finish(candidate)),
        // The previous candidate went away on this drag's pointer-down.
        (Dragging { .. }, Confirm) => (Confirmed(None), Effect::Finish(None)),

        (_, PointerDown(p)) => (Dragging { anchor: p, current: p }, Effect::Redraw(None)),
        (Dragging { anchor, .. }, PointerMove(p)) => (
            Dragging { anchor, current: p },
            Effect::Redraw(Some(Rect::from_corners(anchor, p))),
        ),
        (Dragging { anchor, .. }, PointerUp(p)) => {
            let rect = Rect::from_corners(anchor, p);
            (Idle { candidate: Some(rect) }, Effect::Redraw(Some(rect)))
        }
        (Idle { .. }, PointerMove(_) | PointerUp(_)) => (state, Effect::Nothing),
    }
}

/// A place to show the selection canvas and read user input from.
pub trait SelectionSurface {
    fn show(&mut self, canvas: &FrameBuffer) -> Result<(), Error>;
    /// Input that arrived since the last poll, oldest first. Blocks for at most
    /// one poll interval.
    fn poll(&mut self) -> Result<Vec<SelectorEvent>, Error>;
}

/// Drive one selection session on `image` until confirm or cancel.
/// `image` is never modified; outlines go onto a private canvas.
pub fn run_session<S: SelectionSurface>(
    surface: &mut S,
    image: &FrameBuffer,
) -> Result<Option<Rect>, Error> {
    let mut canvas = image.clone();
    let mut state = SelectionState::default();
    surface.show(&canvas)?;

    loop {
        for event in surface.poll()? {
            let (next, effect) = step(state, event);
            state = next;
            match effect {
                Effect::Nothing => {}
                Effect::Redraw(outline) => {
                    canvas.pixels.copy_from_slice(&image.pixels);
                    if let Some(r) = outline {
                        draw_rect(&mut canvas, r, ROI_COLOR, 1);
                    }
                    surface.show(&canvas)?;
                }
                Effect::Finish(result) => {
                    debug!("selection finished: {:?}", state.outcome());
                    return Ok(result);
                }
            }
        }
    }
}

/// Turns polled mouse state into down/move/up events.
#[derive(Debug, Default)]
pub struct PointerSampler {
    was_down: bool,
    last_pos: Option<Point>,
}

impl PointerSampler {
    pub fn sample(&mut self, down: bool, pos: Option<Point>) -> Option<SelectorEvent> {
        let moved = pos.is_some() && pos != self.last_pos;
        if pos.is_some() {
            self.last_pos = pos;
        }
        let at = self.last_pos.unwrap_or_default();
        let event = match (self.was_down, down) {
            (false, true) => Some(SelectorEvent::PointerDown(at)),
            (true, false) => Some(SelectorEvent::PointerUp(at)),
            _ if moved => Some(SelectorEvent::PointerMove(at)),
            _ => None,
        };
        self.was_down = down;
        event
    }
}

/// A minifb window used as the selection surface. Dropping it closes the window.
pub struct SelectorWindow {
    drawer: Drawer,
    pointer: PointerSampler,
}

impl SelectorWindow {
    pub fn open(title: &str, width: usize, height: usize) -> Result<Self, Error> {
        Ok(Self {
            drawer: Drawer::new(title, width, height)?,
            pointer: PointerSampler::default(),
        })
    }
}

impl SelectionSurface for SelectorWindow {
    fn show(&mut self, canvas: &FrameBuffer) -> Result<(), Error> {
        self.drawer.present(canvas)
    }

    fn poll(&mut self) -> Result<Vec<SelectorEvent>, Error> {
        self.drawer.pump();
        if !self.drawer.is_open() {
            return Ok(vec![SelectorEvent::Cancel]);
        }

        let mut events = Vec::new();
        let pos = self
            .drawer
            .mouse_pos()
            .map(|(x, y)| Point::new(x as i32, y as i32));
        events.extend(self.pointer.sample(self.drawer.left_mouse_down(), pos));
        if self.drawer.confirm_pressed_once() {
            events.push(SelectorEvent::Confirm);
        }
        if self.drawer.c_pressed_once() {
            events.push(SelectorEvent::Cancel);
        }
        Ok(events)
    }
}

/// Show `image` in its own window and let the user pick a rectangle.
/// The window is closed again before this returns.
pub fn select_roi(title: &str, image: &FrameBuffer) -> Result<Option<Rect>, Error> {
    info!("{title}: drag a box, Enter/Space to accept, C to cancel");
    let mut window = SelectorWindow::open(title, image.width, image.height)?;
    let result = run_session(&mut window, image);
    drop(window);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use super::SelectorEvent::*;

    fn p(x: i32, y: i32) -> Point {
        Point::new(x, y)
    }

    /// Feed events through `step` and return the final state.
    fn play(events: &[SelectorEvent]) -> SelectionState {
        events
            .iter()
            .fold(SelectionState::default(), |s, &e| step(s, e).0)
    }

    #[test]
    fn drag_then_confirm_yields_normalized_rect() {
        let forward = play(&[PointerDown(p(10, 10)), PointerMove(p(30, 20)), PointerUp(p(50, 40)), Confirm]);
        assert_eq!(forward.outcome(), Some(Some(Rect::new(10, 10, 40, 30))));

        let backward = play(&[PointerDown(p(50, 40)), PointerUp(p(10, 10)), Confirm]);
        assert_eq!(backward.outcome(), Some(Some(Rect::new(10, 10, 40, 30))));
    }

    #[test]
    fn click_without_motion_is_a_zero_size_rect() {
        let s = play(&[PointerDown(p(30, 30)), PointerUp(p(30, 30)), Confirm]);
        assert_eq!(s.outcome(), Some(Some(Rect::new(30, 30, 0, 0))));
    }

    #[test]
    fn confirm_without_a_drag_is_empty() {
        assert_eq!(play(&[Confirm]).outcome(), Some(None));
        assert_eq!(play(&[PointerMove(p(3, 4)), Confirm]).outcome(), Some(None));
    }

    #[test]
    fn cancel_always_wins() {
        assert_eq!(play(&[Cancel]), SelectionState::Cancelled);
        assert_eq!(
            play(&[PointerDown(p(1, 1)), PointerUp(p(9, 9)), Cancel]).outcome(),
            Some(None)
        );
        assert_eq!(
            play(&[PointerDown(p(1, 1)), PointerMove(p(5, 5)), Cancel]).outcome(),
            Some(None)
        );
    }

    #[test]
    fn new_drag_discards_previous_candidate() {
        let unfinished = play(&[
            PointerDown(p(10, 10)),
            PointerUp(p(50, 40)),
            PointerDown(p(0, 0)),
            PointerMove(p(5, 5)),
            Confirm,
        ]);
        assert_eq!(unfinished.outcome(), Some(None));

        let replaced = play(&[
            PointerDown(p(10, 10)),
            PointerUp(p(50, 40)),
            PointerDown(p(1, 2)),
            PointerUp(p(4, 8)),
            Confirm,
        ]);
        assert_eq!(replaced.outcome(), Some(Some(Rect::new(1, 2, 3, 6))));
    }

    #[test]
    fn motion_outside_a_drag_is_ignored() {
        let idle = SelectionState::Idle { candidate: Some(Rect::new(1, 1, 2, 2)) };
        assert_eq!(step(idle, PointerMove(p(7, 7))), (idle, Effect::Nothing));
        assert_eq!(step(idle, PointerUp(p(7, 7))), (idle, Effect::Nothing));
    }

    #[test]
    fn transitions_request_the_right_redraws() {
        let (s, e) = step(SelectionState::default(), PointerDown(p(5, 5)));
        assert_eq!(e, Effect::Redraw(None));
        let (s, e) = step(s, PointerMove(p(2, 9)));
        assert_eq!(e, Effect::Redraw(Some(Rect::new(2, 5, 3, 4))));
        assert_eq!(s, SelectionState::Dragging { anchor: p(5, 5), current: p(2, 9) });
        let (_, e) = step(s, PointerUp(p(8, 9)));
        assert_eq!(e, Effect::Redraw(Some(Rect::new(5, 5, 3, 4))));
    }

    #[test]
    fn terminal_states_absorb_everything() {
        for terminal in [SelectionState::Cancelled, SelectionState::Confirmed(None)] {
            for e in [PointerDown(p(1, 1)), Confirm, Cancel] {
                assert_eq!(step(terminal, e), (terminal, Effect::Nothing));
            }
        }
    }

    #[test]
    fn sampler_emits_edges_and_motion() {
        let mut s = PointerSampler::default();
        assert_eq!(s.sample(false, Some(p(1, 1))), Some(PointerMove(p(1, 1))));
        assert_eq!(s.sample(false, Some(p(1, 1))), None);
        assert_eq!(s.sample(true, Some(p(1, 1))), Some(PointerDown(p(1, 1))));
        assert_eq!(s.sample(true, Some(p(4, 6))), Some(PointerMove(p(4, 6))));
        assert_eq!(s.sample(true, None), None);
        assert_eq!(s.sample(false, None), Some(PointerUp(p(4, 6))));
    }

    /// Replays canned poll batches and records every shown canvas.
    struct Scripted {
        batches: VecDeque<Vec<SelectorEvent>>,
        shown: Vec<FrameBuffer>,
    }

    impl Scripted {
        fn new(batches: Vec<Vec<SelectorEvent>>) -> Self {
            Self { batches: batches.into(), shown: Vec::new() }
        }
    }

    impl SelectionSurface for Scripted {
        fn show(&mut self, canvas: &FrameBuffer) -> Result<(), Error> {
            self.shown.push(canvas.clone());
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<SelectorEvent>, Error> {
            // An exhausted script behaves like a closed window.
            Ok(self.batches.pop_front().unwrap_or_else(|| vec![Cancel]))
        }
    }

    fn lit(fb: &FrameBuffer) -> usize {
        fb.pixels.iter().filter(|&&px| px == ROI_COLOR).count()
    }

    #[test]
    fn session_draws_on_a_copy_and_returns_the_confirmed_rect() {
        let image = FrameBuffer::filled(64, 48, 0x0010_2030);
        let mut surface = Scripted::new(vec![
            vec![],
            vec![PointerDown(p(10, 10))],
            vec![PointerMove(p(20, 20)), PointerMove(p(50, 40))],
            vec![PointerUp(p(50, 40))],
            vec![Confirm],
        ]);

        let roi = run_session(&mut surface, &image).unwrap();
        assert_eq!(roi, Some(Rect::new(10, 10, 40, 30)));
        assert!(image.pixels.iter().all(|&px| px == 0x0010_2030));

        // initial, pointer-down, two previews, final
        assert_eq!(surface.shown.len(), 5);
        assert_eq!(surface.shown[0], image);
        assert_eq!(surface.shown[1], image);
        assert_eq!(lit(&surface.shown[2]), 2 * 11 + 2 * 9);
        // The first preview does not linger under the second.
        assert_eq!(surface.shown[3], surface.shown[4]);
        assert_eq!(lit(&surface.shown[4]), 2 * 41 + 2 * 29);
    }

    #[test]
    fn restarting_a_drag_wipes_the_old_outline() {
        let image = FrameBuffer::filled(32, 32, 0);
        let mut surface = Scripted::new(vec![
            vec![PointerDown(p(1, 1)), PointerUp(p(20, 20))],
            vec![PointerDown(p(5, 5))],
            vec![Confirm],
        ]);

        assert_eq!(run_session(&mut surface, &image).unwrap(), None);
        assert!(lit(&surface.shown[2]) > 0);
        assert_eq!(surface.shown[3], image);
    }

    #[test]
    fn cancel_ends_the_session_empty() {
        let image = FrameBuffer::filled(16, 16, 0);
        let mut surface = Scripted::new(vec![
            vec![PointerDown(p(1, 1)), PointerUp(p(9, 9))],
            vec![Cancel],
        ]);
        assert_eq!(run_session(&mut surface, &image).unwrap(), None);

        let mut closed = Scripted::new(vec![]);
        assert_eq!(run_session(&mut closed, &image).unwrap(), None);
    }
}
