//! Dirty-region accumulation between begin_atomic / end_atomic

use crate::tile::PixelRect;

/// Bounding rectangle of every pixel changed since the last `begin`
///
/// Brackets do not nest: a second `begin` (or an `end` with no `begin`)
/// means the caller's stroke bookkeeping is broken, and the accumulated
/// region could no longer be trusted, so both panic.
#[derive(Debug, Clone, Default)]
pub struct AtomicRegion {
    active: bool,
    rect: Option<PixelRect>,
}

impl AtomicRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a bracket with an empty region
    ///
    /// # Panics
    /// If a bracket is already open.
    pub fn begin(&mut self) {
        assert!(
            !self.active,
            "begin_atomic called while an atomic region is already open"
        );
        self.active = true;
        self.rect = None;
    }

    /// Grow the region to include `rect`; empty rects are ignored
    #[inline]
    pub fn extend(&mut self, rect: PixelRect) {
        if rect.is_empty() {
            return;
        }
        self.rect = Some(match self.rect {
            Some(current) => current.union(&rect),
            None => rect,
        });
    }

    /// Close the bracket and take the accumulated region
    ///
    /// # Panics
    /// If no bracket is open.
    pub fn end(&mut self) -> Option<PixelRect> {
        assert!(
            self.active,
            "end_atomic called without a matching begin_atomic"
        );
        self.active = false;
        self.rect.take()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Region accumulated so far, without closing the bracket
    #[inline]
    pub fn peek(&self) -> Option<PixelRect> {
        self.rect
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bracket() {
        let mut region = AtomicRegion::new();
        region.begin();
        assert!(region.is_active());
        assert_eq!(region.end(), None);
        assert!(!region.is_active());
    }

    #[test]
    fn test_extend_unions() {
        let mut region = AtomicRegion::new();
        region.begin();
        region.extend(PixelRect::new(10, 10, 5, 5));
        region.extend(PixelRect::default());
        region.extend(PixelRect::new(-3, 12, 2, 10));
        assert_eq!(region.peek(), Some(PixelRect::from_edges(-3, 10, 15, 22)));
        assert_eq!(region.end(), Some(PixelRect::from_edges(-3, 10, 15, 22)));
    }

    #[test]
    fn test_begin_discards_stale_region() {
        let mut region = AtomicRegion::new();
        region.extend(PixelRect::new(0, 0, 100, 100));
        region.begin();
        region.extend(PixelRect::new(1, 1, 1, 1));
        assert_eq!(region.end(), Some(PixelRect::new(1, 1, 1, 1)));
    }

    #[test]
    #[should_panic(expected = "already open")]
    fn test_nested_begin_panics() {
        let mut region = AtomicRegion::new();
        region.begin();
        region.begin();
    }

    #[test]
    #[should_panic(expected = "without a matching begin_atomic")]
    fn test_end_without_begin_panics() {
        let mut region = AtomicRegion::new();
        region.end();
    }
}
