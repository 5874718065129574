//! Exception handling scopes
//!
//! Locations are half-open `[begin, end)` ranges. They are instruction
//! indices until the body is composed and statement indices afterwards.

use std::cmp::Ordering;
use std::ops::Range;

use serde::Serialize;

use crate::metadata::TacType;

/// Handler kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum ScopeKind {
    /// Typed catch handler
    Catch(TacType),
    /// Filtered handler; the filter block runs from `filter_begin` to the handler
    Filter { filter_begin: usize },
    Finally,
    Fault,
}

/// A protected region with its handler
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct EhScope {
    pub kind: ScopeKind,
    pub try_begin: usize,
    pub try_end: usize,
    pub handler_begin: usize,
    pub handler_end: usize,
}

impl EhScope {
    /// Build a scope
    pub fn new(kind: ScopeKind, try_range: Range<usize>, handler_range: Range<usize>) -> Self {
        EhScope {
            kind,
            try_begin: try_range.start,
            try_end: try_range.end,
            handler_begin: handler_range.start,
            handler_end: handler_range.end,
        }
    }

    pub fn try_range(&self) -> Range<usize> {
        self.try_begin..self.try_end
    }

    pub fn handler_range(&self) -> Range<usize> {
        self.handler_begin..self.handler_end
    }

    /// Filter block range, for filter scopes
    pub fn filter_range(&self) -> Option<Range<usize>> {
        match self.kind {
            ScopeKind::Filter { filter_begin } => Some(filter_begin..self.handler_begin),
            _ => None,
        }
    }

    pub fn is_finally(&self) -> bool {
        self.kind == ScopeKind::Finally
    }

    pub fn is_fault(&self) -> bool {
        self.kind == ScopeKind::Fault
    }

    /// Whether `index` lies in the protected region
    pub fn in_try(&self, index: usize) -> bool {
        self.try_range().contains(&index)
    }

    /// Whether `index` lies in the handler (or its filter block)
    pub fn in_handler(&self, index: usize) -> bool {
        self.handler_range().contains(&index)
            || self.filter_range().map_or(false, |r| r.contains(&index))
    }

    /// Start of the first handler-side region (filter block or handler)
    pub fn handler_side_begin(&self) -> usize {
        match self.kind {
            ScopeKind::Filter { filter_begin } => filter_begin.min(self.handler_begin),
            _ => self.handler_begin,
        }
    }

    /// One past the last index covered by the scope
    pub fn end(&self) -> usize {
        self.try_end.max(self.handler_end)
    }

    /// Whether this scope lies inside `other`'s try region or inside its
    /// handler (filter block included).
    ///
    /// Scopes sharing the exact same try region are siblings, not nested.
    pub fn is_nested_in(&self, other: &EhScope) -> bool {
        let within = |r: Range<usize>| self.try_begin >= r.start && self.try_end <= r.end;
        if self.try_range() == other.try_range() {
            return false;
        }
        within(other.try_range())
            || within(other.handler_range())
            || other.filter_range().map_or(false, within)
    }

    /// Order in which finally inlining processes scopes: an enclosing scope
    /// comes before the scopes nested in it, otherwise by position.
    pub fn transform_order(&self, other: &EhScope) -> Ordering {
        if other.is_nested_in(self) {
            Ordering::Less
        } else if self.is_nested_in(other) {
            Ordering::Greater
        } else {
            (self.try_begin, self.handler_begin).cmp(&(other.try_begin, other.handler_begin))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finally(t: Range<usize>, h: Range<usize>) -> EhScope {
        EhScope::new(ScopeKind::Finally, t, h)
    }

    #[test]
    fn test_nested_in_try() {
        let outer = finally(0..10, 10..12);
        let inner = finally(2..5, 5..7);
        assert!(inner.is_nested_in(&outer));
        assert!(!outer.is_nested_in(&inner));
        assert_eq!(outer.transform_order(&inner), Ordering::Less);
        assert_eq!(inner.transform_order(&outer), Ordering::Greater);
    }

    #[test]
    fn test_nested_in_handler() {
        let outer = finally(0..4, 4..12);
        let inner = finally(5..7, 7..9);
        assert!(inner.is_nested_in(&outer));
    }

    #[test]
    fn test_nested_in_filter() {
        let outer = EhScope::new(ScopeKind::Filter { filter_begin: 4 }, 0..4, 10..12);
        let inner = finally(5..7, 7..9);
        assert!(inner.is_nested_in(&outer));
        assert!(outer.in_handler(5));
        assert!(!outer.in_handler(12));
    }

    #[test]
    fn test_siblings_order_by_position() {
        let a = finally(0..2, 2..3);
        let b = finally(5..7, 7..9);
        assert!(!a.is_nested_in(&b) && !b.is_nested_in(&a));
        assert_eq!(a.transform_order(&b), Ordering::Less);

        let catch = EhScope::new(ScopeKind::Catch(TacType::Object), 0..2, 3..4);
        assert!(!catch.is_nested_in(&a));
    }
}
