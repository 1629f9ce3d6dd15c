//! Size and rectangle types for texture geometry.
//!
//! Every GPU operation in snap is described in terms of these two types:
//! a texture has a [`Size`], a crop or copy region is a [`Rect`].
//!
//! # Coordinate System
//!
//! Coordinates are texel coordinates in the storage order of the texture:
//! - Origin (0, 0) is the first texel of the first stored row
//! - X increases along a row
//! - Y increases with the row index
//!
//! Whether row 0 is the visual top or bottom of an image is a property of
//! the producer (GL surfaces store the bottom row first). Operations that
//! care, like the crop-scale readback, take an explicit flip flag.
//!
//! # Usage
//!
//! ```rust
//! use snap_core::{Rect, Size};
//!
//! let rect = Rect::new(10, 20, 100, 50);
//! assert!(rect.contains(15, 25));
//! assert_eq!(rect.size(), Size::new(100, 50));
//!
//! let other = Rect::new(50, 40, 100, 50);
//! let overlap = rect.intersect(&other).unwrap();
//! assert_eq!(overlap, Rect::new(50, 40, 60, 30));
//! ```

/// Width and height of a texture, framebuffer or plane in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Size {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

impl Size {
    /// Creates a new size.
    #[inline]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns `true` if either dimension is zero.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of texels covered.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if both dimensions are even.
    ///
    /// Planar 4:2:0 output requires this of every destination size.
    #[inline]
    pub const fn is_even(&self) -> bool {
        self.width % 2 == 0 && self.height % 2 == 0
    }

    /// Returns `true` if this size fits in `other` on both axes.
    #[inline]
    pub const fn fits_within(&self, other: &Size) -> bool {
        self.width <= other.width && self.height <= other.height
    }

    /// Largest of the two dimensions.
    #[inline]
    pub const fn max_dim(&self) -> u32 {
        if self.width > self.height {
            self.width
        } else {
            self.height
        }
    }

    /// Halves both dimensions, rounding up.
    ///
    /// # Example
    ///
    /// ```rust
    /// use snap_core::Size;
    ///
    /// assert_eq!(Size::new(5, 4).half_ceil(), Size::new(3, 2));
    /// ```
    #[inline]
    pub const fn half_ceil(&self) -> Size {
        Size::new(self.width.div_ceil(2), self.height.div_ceil(2))
    }
}

impl From<(u32, u32)> for Size {
    fn from((width, height): (u32, u32)) -> Self {
        Self::new(width, height)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A rectangle defined by origin (x, y) and dimensions (width, height).
///
/// Left/top edges are inclusive, right/bottom edges exclusive. A
/// rectangle with zero width or height is empty and overlaps nothing.
///
/// # Example
///
/// ```rust
/// use snap_core::Rect;
///
/// let rect = Rect::new(10, 20, 100, 50);
/// assert_eq!(rect.right(), 110);
/// assert_eq!(rect.bottom(), 70);
/// assert_eq!(rect.area(), 5000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    /// X coordinate of the left edge (inclusive)
    pub x: u32,
    /// Y coordinate of the top edge (inclusive)
    pub y: u32,
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
}

impl Rect {
    /// Creates a new rectangle with the given origin and dimensions.
    #[inline]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Creates a rectangle at the origin covering `size`.
    #[inline]
    pub const fn from_size(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    /// Creates a rectangle from two corner points, normalizing the order.
    ///
    /// ```rust
    /// use snap_core::Rect;
    ///
    /// let rect = Rect::from_corners(110, 70, 10, 20);
    /// assert_eq!(rect, Rect::new(10, 20, 100, 50));
    /// ```
    #[inline]
    pub fn from_corners(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        let (min_x, max_x) = if x1 <= x2 { (x1, x2) } else { (x2, x1) };
        let (min_y, max_y) = if y1 <= y2 { (y1, y2) } else { (y2, y1) };
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    /// Dimensions of the rectangle.
    #[inline]
    pub const fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// X coordinate of the right edge (exclusive), saturating at `u32::MAX`.
    #[inline]
    pub const fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    /// Y coordinate of the bottom edge (exclusive), saturating at `u32::MAX`.
    #[inline]
    pub const fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Returns `true` if an edge lies past `u32::MAX`.
    #[inline]
    pub const fn overflows(&self) -> bool {
        self.x.checked_add(self.width).is_none() || self.y.checked_add(self.height).is_none()
    }

    /// Area in texels.
    #[inline]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Returns `true` if the rectangle has zero area.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns `true` if origin and size are all even.
    #[inline]
    pub const fn is_even(&self) -> bool {
        self.x % 2 == 0 && self.y % 2 == 0 && self.size().is_even()
    }

    /// Returns `true` if the point (px, py) is inside this rectangle.
    ///
    /// ```rust
    /// use snap_core::Rect;
    ///
    /// let rect = Rect::new(10, 10, 100, 100);
    /// assert!(rect.contains(10, 10));
    /// assert!(rect.contains(109, 109));
    /// assert!(!rect.contains(110, 110));
    /// ```
    #[inline]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Returns `true` if this rectangle fully contains another.
    #[inline]
    pub const fn contains_rect(&self, other: &Rect) -> bool {
        !other.overflows()
            && other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }

    /// Returns `true` if the rectangle lies inside a texture of `size`.
    ///
    /// A rectangle whose edges overflow is never inside.
    #[inline]
    pub const fn is_within(&self, size: Size) -> bool {
        !self.overflows() && self.right() <= size.width && self.bottom() <= size.height
    }

    /// Returns `true` if the two rectangles share at least one texel.
    #[inline]
    pub const fn overlaps(&self, other: &Rect) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        self.x < other.right()
            && self.right() > other.x
            && self.y < other.bottom()
            && self.bottom() > other.y
    }

    /// Returns the intersection, or `None` if the rectangles don't overlap.
    ///
    /// ```rust
    /// use snap_core::Rect;
    ///
    /// let a = Rect::new(0, 0, 100, 100);
    /// let b = Rect::new(50, 50, 100, 100);
    /// assert_eq!(a.intersect(&b), Some(Rect::new(50, 50, 50, 50)));
    /// ```
    #[inline]
    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());

        if x < right && y < bottom {
            Some(Rect::new(x, y, right - x, bottom - y))
        } else {
            None
        }
    }

    /// Returns the bounding box of both rectangles.
    ///
    /// Empty rectangles do not contribute.
    #[inline]
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Returns the parts of `self` not covered by `other`.
    ///
    /// The result is at most four disjoint rectangles: a full-width band
    /// above the overlap, one below, and the left and right remainders of
    /// the overlapping rows.
    ///
    /// ```rust
    /// use snap_core::Rect;
    ///
    /// let pieces = Rect::new(0, 0, 10, 10).subtract(&Rect::new(0, 0, 10, 5));
    /// assert_eq!(pieces, vec![Rect::new(0, 5, 10, 5)]);
    /// ```
    pub fn subtract(&self, other: &Rect) -> Vec<Rect> {
        let Some(hole) = self.intersect(other) else {
            return if self.is_empty() { Vec::new() } else { vec![*self] };
        };

        let mut pieces = Vec::with_capacity(4);
        if hole.y > self.y {
            pieces.push(Rect::new(self.x, self.y, self.width, hole.y - self.y));
        }
        if hole.bottom() < self.bottom() {
            pieces.push(Rect::new(
                self.x,
                hole.bottom(),
                self.width,
                self.bottom() - hole.bottom(),
            ));
        }
        if hole.x > self.x {
            pieces.push(Rect::new(self.x, hole.y, hole.x - self.x, hole.height));
        }
        if hole.right() < self.right() {
            pieces.push(Rect::new(
                hole.right(),
                hole.y,
                self.right() - hole.right(),
                hole.height,
            ));
        }
        pieces
    }

    /// Returns this rectangle with every component halved.
    ///
    /// Used to map a luma rectangle onto its 4:2:0 chroma planes.
    #[inline]
    pub const fn half(&self) -> Rect {
        Rect::new(self.x / 2, self.y / 2, self.width / 2, self.height / 2)
    }

    /// Clamps this rectangle to a texture of `size`.
    #[inline]
    pub fn clamp_to(&self, size: Size) -> Option<Rect> {
        self.intersect(&Rect::from_size(size))
    }
}

impl std::fmt::Display for Rect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Rect({}, {}, {}x{})",
            self.x, self.y, self.width, self.height
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_helpers() {
        let s = Size::new(512, 256);
        assert_eq!(s.area(), 131072);
        assert_eq!(s.max_dim(), 512);
        assert!(s.is_even());
        assert!(!Size::new(101, 100).is_even());
        assert!(Size::new(0, 4).is_empty());
        assert!(Size::new(4, 4).fits_within(&Size::new(4, 8)));
        assert!(!Size::new(5, 4).fits_within(&Size::new(4, 8)));
    }

    #[test]
    fn test_half_ceil() {
        assert_eq!(Size::new(125, 1).half_ceil(), Size::new(63, 1));
    }

    #[test]
    fn test_rect_even() {
        assert!(Rect::new(2, 4, 10, 6).is_even());
        assert!(!Rect::new(1, 4, 10, 6).is_even());
        assert!(!Rect::new(2, 4, 10, 7).is_even());
    }

    #[test]
    fn test_intersect_disjoint() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert_eq!(a.intersect(&b), None);
        assert!(!a.overlaps(&b));
    }

    #[test]
    fn test_subtract_center_hole() {
        let outer = Rect::new(0, 0, 10, 10);
        let pieces = outer.subtract(&Rect::new(3, 3, 4, 4));
        assert_eq!(pieces.len(), 4);
        let area: u64 = pieces.iter().map(Rect::area).sum();
        assert_eq!(area, 100 - 16);
        for (i, a) in pieces.iter().enumerate() {
            for b in &pieces[i + 1..] {
                assert!(!a.overlaps(b));
            }
        }
    }

    #[test]
    fn test_subtract_covering() {
        let r = Rect::new(5, 5, 2, 2);
        assert!(r.subtract(&Rect::new(0, 0, 10, 10)).is_empty());
    }

    #[test]
    fn test_subtract_no_overlap() {
        let r = Rect::new(5, 5, 2, 2);
        assert_eq!(r.subtract(&Rect::new(20, 20, 1, 1)), vec![r]);
    }

    #[test]
    fn test_within_and_half() {
        let r = Rect::new(2, 2, 4, 6);
        assert!(r.is_within(Size::new(6, 8)));
        assert!(!r.is_within(Size::new(5, 8)));
        assert_eq!(r.half(), Rect::new(1, 1, 2, 3));
    }

    #[test]
    fn test_edges_near_u32_max() {
        let r = Rect::new(u32::MAX, 0, 2, 2);
        assert!(r.overflows());
        assert_eq!(r.right(), u32::MAX);
        assert!(!r.is_within(Size::new(8, 8)));
        assert!(!r.is_within(Size::new(u32::MAX, u32::MAX)));
        assert!(!Rect::new(0, 0, u32::MAX, u32::MAX).contains_rect(&r));

        let edge = Rect::new(u32::MAX - 1, 0, 1, 1);
        assert!(!edge.overflows());
        assert!(edge.is_within(Size::new(u32::MAX, 1)));
        assert_eq!(Rect::new(u32::MAX - 1, 0, 4, 1).intersect(&edge), Some(edge));
    }
}
