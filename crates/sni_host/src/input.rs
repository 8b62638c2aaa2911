//! Pointer and touch state per seat, and hit-testing against hotspots.

use std::collections::HashMap;

use crate::{bus::Orientation, config::Button};

/// An axis-aligned rectangle in buffer pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Rect { x, y, w, h }
    }

    /// Half-open containment: the left and top edges are inside, the right and bottom ones are not.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (x0, y0) = (f64::from(self.x), f64::from(self.y));
        x0 <= x && x < x0 + f64::from(self.w) && y0 <= y && y < y0 + f64::from(self.h)
    }

    /// Divide every coordinate by `scale`, turning buffer pixels into logical ones.
    pub fn unscaled(&self, scale: i32) -> Rect {
        let scale = scale.max(1);
        Rect { x: self.x / scale, y: self.y / scale, w: self.w / scale, h: self.h / scale }
    }
}

/// A clickable area, valid for the frame it was computed for only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hotspot<T> {
    pub rect: Rect,
    pub target: T,
}

pub fn hit<T>(hotspots: &[Hotspot<T>], x: f64, y: f64) -> Option<&Hotspot<T>> {
    hotspots.iter().find(|spot| spot.rect.contains(x, y))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeatId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

/// A surface input can land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceRef {
    Bar(OutputId),
    Popup(SurfaceId),
}

/// Pointer events, with positions in surface-local logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Enter { surface: SurfaceRef, x: f64, y: f64 },
    Leave { surface: SurfaceRef },
    Motion { x: f64, y: f64, time: u32 },
    Button { button: Button, pressed: bool, time: u32 },
    Axis { orientation: Orientation, value: f64, time: u32 },
}

/// Touch events, with positions in surface-local logical pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TouchEvent {
    Down { surface: SurfaceRef, id: i32, x: f64, y: f64, time: u32 },
    Motion { id: i32, x: f64, y: f64 },
    Up { id: i32, time: u32 },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub id: i32,
    pub surface: SurfaceRef,
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeatState {
    pub focus: Option<SurfaceRef>,
    pub x: f64,
    pub y: f64,
    pub touch: Option<TouchPoint>,
}

/// The scroll direction an axis event stands for.
pub fn scroll_button(orientation: Orientation, value: f64) -> Option<Button> {
    match orientation {
        _ if value == 0.0 => None,
        Orientation::Vertical if value < 0.0 => Some(Button::ScrollUp),
        Orientation::Vertical => Some(Button::ScrollDown),
        Orientation::Horizontal if value < 0.0 => Some(Button::ScrollLeft),
        Orientation::Horizontal => Some(Button::ScrollRight),
    }
}

/// Where each seat's pointer and touch point currently are.
#[derive(Debug, Default)]
pub struct InputRouter {
    seats: HashMap<SeatId, SeatState>,
}

impl InputRouter {
    pub fn seat(&self, seat: SeatId) -> Option<&SeatState> {
        self.seats.get(&seat)
    }

    pub fn seat_mut(&mut self, seat: SeatId) -> &mut SeatState {
        self.seats.entry(seat).or_default()
    }

    /// Update the seat for a pointer event before it is acted on.
    pub fn track_pointer(&mut self, seat: SeatId, event: &PointerEvent) -> SeatState {
        let state = self.seat_mut(seat);
        match *event {
            PointerEvent::Enter { surface, x, y } => {
                state.focus = Some(surface);
                state.x = x;
                state.y = y;
            }
            PointerEvent::Leave { surface } => {
                if state.focus == Some(surface) {
                    state.focus = None;
                }
            }
            PointerEvent::Motion { x, y, .. } => {
                state.x = x;
                state.y = y;
            }
            PointerEvent::Button { .. } | PointerEvent::Axis { .. } => {}
        }
        state.clone()
    }

    /// Update the seat for a touch event. Returns the touch point the event refers to.
    pub fn track_touch(&mut self, seat: SeatId, event: &TouchEvent) -> Option<TouchPoint> {
        let state = self.seat_mut(seat);
        match *event {
            TouchEvent::Down { surface, id, x, y, .. } => {
                let point = TouchPoint { id, surface, x, y };
                state.touch = Some(point);
                Some(point)
            }
            TouchEvent::Motion { id, x, y } => match &mut state.touch {
                Some(point) if point.id == id => {
                    point.x = x;
                    point.y = y;
                    Some(*point)
                }
                _ => None,
            },
            TouchEvent::Up { id, .. } => match state.touch {
                Some(point) if point.id == id => state.touch.take(),
                _ => None,
            },
            TouchEvent::Cancel => state.touch.take(),
        }
    }

    /// Forget any focus on a surface that no longer exists.
    pub fn surface_gone(&mut self, surface: SurfaceRef) {
        for state in self.seats.values_mut() {
            if state.focus == Some(surface) {
                state.focus = None;
            }
            if state.touch.map_or(false, |point| point.surface == surface) {
                state.touch = None;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_hit_test_is_half_open() {
        let rect = Rect::new(10, 10, 5, 5);
        assert!(rect.contains(10.0, 10.0));
        assert!(rect.contains(14.0, 14.0));
        assert!(rect.contains(14.99, 10.0));
        assert!(!rect.contains(15.0, 10.0));
        assert!(!rect.contains(10.0, 15.0));
        assert!(!rect.contains(9.99, 12.0));
    }

    #[test]
    fn test_hit_finds_first_containing_hotspot() {
        let spots = vec![Hotspot { rect: Rect::new(0, 0, 10, 10), target: 1 }, Hotspot {
            rect: Rect::new(10, 0, 10, 10),
            target: 2,
        }];
        assert_eq!(hit(&spots, 10.0, 5.0).map(|spot| spot.target), Some(2));
        assert_eq!(hit(&spots, 9.5, 5.0).map(|spot| spot.target), Some(1));
        assert_eq!(hit(&spots, 20.0, 5.0), None);
    }

    #[test]
    fn test_pointer_focus_tracking() {
        let mut router = InputRouter::default();
        let seat = SeatId(0);
        let bar = SurfaceRef::Bar(OutputId(1));
        let popup = SurfaceRef::Popup(SurfaceId(7));

        router.track_pointer(seat, &PointerEvent::Enter { surface: bar, x: 1.0, y: 2.0 });
        router.track_pointer(seat, &PointerEvent::Enter { surface: popup, x: 3.0, y: 4.0 });
        // the leave for the old surface may arrive after the enter for the new one
        let state = router.track_pointer(seat, &PointerEvent::Leave { surface: bar });
        assert_eq!(state.focus, Some(popup));
        assert_eq!((state.x, state.y), (3.0, 4.0));

        router.surface_gone(popup);
        assert_eq!(router.seat(seat).and_then(|state| state.focus), None);
    }

    #[test]
    fn test_touch_tracking_follows_one_point() {
        let mut router = InputRouter::default();
        let seat = SeatId(0);
        let bar = SurfaceRef::Bar(OutputId(1));
        router.track_touch(seat, &TouchEvent::Down { surface: bar, id: 3, x: 1.0, y: 1.0, time: 0 });
        assert_eq!(router.track_touch(seat, &TouchEvent::Motion { id: 4, x: 9.0, y: 9.0 }), None);
        let moved = router.track_touch(seat, &TouchEvent::Motion { id: 3, x: 2.0, y: 5.0 });
        assert_eq!(moved.map(|point| (point.x, point.y)), Some((2.0, 5.0)));
        assert!(router.track_touch(seat, &TouchEvent::Up { id: 3, time: 1 }).is_some());
        assert_eq!(router.seat(seat).and_then(|state| state.touch), None);
    }

    #[test]
    fn test_scroll_button() {
        assert_eq!(scroll_button(Orientation::Vertical, -10.0), Some(Button::ScrollUp));
        assert_eq!(scroll_button(Orientation::Vertical, 10.0), Some(Button::ScrollDown));
        assert_eq!(scroll_button(Orientation::Horizontal, -1.0), Some(Button::ScrollLeft));
        assert_eq!(scroll_button(Orientation::Horizontal, 0.0), None);
    }
}
