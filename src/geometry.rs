use bitflags::bitflags;
use smithay::utils::{Logical, Point, Rectangle, Size};

pub type Geometry = Rectangle<i32, Logical>;

pub fn rect(x: i32, y: i32, w: i32, h: i32) -> Geometry {
    Rectangle::new(Point::from((x, y)), Size::from((w, h)))
}

/// Server-side decoration extents around the client's own geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Margins {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl Margins {
    pub fn top(top: i32) -> Self {
        Self {
            top,
            ..Self::default()
        }
    }
}

pub fn shrink_by_margins(geometry: Geometry, margins: Margins) -> Geometry {
    rect(
        geometry.loc.x + margins.left,
        geometry.loc.y + margins.top,
        geometry.size.w - margins.left - margins.right,
        geometry.size.h - margins.top - margins.bottom,
    )
}

pub fn expand_with_margins(geometry: Geometry, margins: Margins) -> Geometry {
    rect(
        geometry.loc.x - margins.left,
        geometry.loc.y - margins.top,
        geometry.size.w + margins.left + margins.right,
        geometry.size.h + margins.top + margins.bottom,
    )
}

/// The corner that stays put when a window changes size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Gravity {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Gravity {
    fn anchors_right(self) -> bool {
        matches!(self, Gravity::TopRight | Gravity::BottomRight)
    }

    fn anchors_bottom(self) -> bool {
        matches!(self, Gravity::BottomLeft | Gravity::BottomRight)
    }
}

/// Place a box of `actual`'s size inside `desired` so that the gravity corner
/// of both coincides.
pub fn align_with_gravity(desired: Geometry, actual: Geometry, gravity: Gravity) -> Geometry {
    let mut x = desired.loc.x;
    let mut y = desired.loc.y;
    if gravity.anchors_right() {
        x = desired.loc.x + desired.size.w - actual.size.w;
    }
    if gravity.anchors_bottom() {
        y = desired.loc.y + desired.size.h - actual.size.h;
    }
    rect(x, y, actual.size.w, actual.size.h)
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TiledEdges: u32 {
        const TOP = 1;
        const BOTTOM = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const ALL = Self::TOP.bits() | Self::BOTTOM.bits() | Self::LEFT.bits() | Self::RIGHT.bits();
    }
}

impl TiledEdges {
    pub fn is_maximized(self) -> bool {
        self == TiledEdges::ALL
    }
}
