//! Damage regions: sets of disjoint rectangles.
//!
//! A compositor tracks which parts of a surface changed since the previous
//! frame as a [`Region`]. The helper uses the difference of two regions to
//! copy only the texels a partially redrawn frame is missing.
//!
//! # Example
//!
//! ```rust
//! use snap_core::{Rect, Region};
//!
//! let old = Region::from_rect(Rect::new(0, 0, 100, 100));
//! let new = Region::from_rect(Rect::new(0, 0, 100, 50));
//!
//! let missing = old.difference(&new);
//! assert_eq!(missing.rects(), &[Rect::new(0, 50, 100, 50)]);
//! ```

use crate::rect::Rect;

/// A set of texels stored as disjoint, non-empty rectangles.
///
/// Rectangles are kept sorted by (y, x) so iteration order is stable
/// regardless of the order in which they were added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// Creates an empty region.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a region covering a single rectangle.
    pub fn from_rect(rect: Rect) -> Self {
        let mut region = Self::new();
        region.add_rect(rect);
        region
    }

    /// Creates a region covering the union of `rects`.
    pub fn from_rects<I: IntoIterator<Item = Rect>>(rects: I) -> Self {
        let mut region = Self::new();
        for rect in rects {
            region.add_rect(rect);
        }
        region
    }

    /// Adds `rect` to the region.
    ///
    /// Only the parts not already covered are stored, so the set stays
    /// disjoint.
    pub fn add_rect(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut fresh = vec![rect];
        for existing in &self.rects {
            fresh = fresh
                .into_iter()
                .flat_map(|piece| piece.subtract(existing))
                .collect();
            if fresh.is_empty() {
                return;
            }
        }
        self.rects.extend(fresh);
        self.normalize();
    }

    /// Removes `rect` from the region.
    pub fn subtract_rect(&mut self, rect: &Rect) {
        if rect.is_empty() {
            return;
        }
        self.rects = self
            .rects
            .iter()
            .flat_map(|existing| existing.subtract(rect))
            .collect();
        self.normalize();
    }

    /// Adds every rectangle of `other`.
    pub fn union(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add_rect(*rect);
        }
    }

    /// Returns the texels in `self` that are not in `other`.
    pub fn difference(&self, other: &Region) -> Region {
        let mut result = self.clone();
        for rect in &other.rects {
            result.subtract_rect(rect);
            if result.is_empty() {
                break;
            }
        }
        result
    }

    /// Returns `true` if every texel of `other` is also in `self`.
    pub fn contains_region(&self, other: &Region) -> bool {
        other.difference(self).is_empty()
    }

    /// Returns `true` if the texel (x, y) is covered.
    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.rects.iter().any(|r| r.contains(x, y))
    }

    /// Returns `true` if the region covers nothing.
    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Number of covered texels.
    pub fn area(&self) -> u64 {
        self.rects.iter().map(Rect::area).sum()
    }

    /// Bounding box of the region, or `None` if it is empty.
    pub fn bounds(&self) -> Option<Rect> {
        self.rects.iter().copied().reduce(|a, b| a.union(&b))
    }

    /// The disjoint rectangles making up the region.
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Iterates the disjoint rectangles.
    pub fn iter(&self) -> std::slice::Iter<'_, Rect> {
        self.rects.iter()
    }

    fn normalize(&mut self) {
        self.rects.retain(|r| !r.is_empty());
        self.rects.sort_by_key(|r| (r.y, r.x));
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

impl FromIterator<Rect> for Region {
    fn from_iter<I: IntoIterator<Item = Rect>>(iter: I) -> Self {
        Region::from_rects(iter)
    }
}

impl<'a> IntoIterator for &'a Region {
    type Item = &'a Rect;
    type IntoIter = std::slice::Iter<'a, Rect>;

    fn into_iter(self) -> Self::IntoIter {
        self.rects.iter()
    }
}
