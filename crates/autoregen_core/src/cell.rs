//! # Cell Records
//!
//! The captured state of one cell: material id plus one opaque auxiliary
//! byte (orientation/variant on hosts that still carry one).

/// Captured state of a single cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CellRecord {
    /// Material type ID. `0` is the empty material.
    pub type_id: u16,
    /// Opaque auxiliary state. `0` means nothing to restore.
    pub aux: u8,
}

impl CellRecord {
    /// Empty cell (void/air).
    pub const EMPTY: Self = Self { type_id: 0, aux: 0 };

    /// Encoded size of one record in the snapshot format (address + record).
    pub const ENCODED_LEN: usize = 15;

    /// Creates a record with the given material and no auxiliary state.
    #[inline]
    #[must_use]
    pub const fn new(type_id: u16) -> Self {
        Self { type_id, aux: 0 }
    }

    /// Creates a record with material and auxiliary byte.
    #[inline]
    #[must_use]
    pub const fn with_aux(type_id: u16, aux: u8) -> Self {
        Self { type_id, aux }
    }

    /// Returns true if this is the empty material.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.type_id == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_ignores_aux() {
        assert!(CellRecord::EMPTY.is_empty());
        assert!(CellRecord::with_aux(0, 3).is_empty());
        assert!(!CellRecord::new(1).is_empty());
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(CellRecord::new(5), CellRecord::with_aux(5, 0));
        assert_ne!(CellRecord::with_aux(5, 1), CellRecord::new(5));
    }
}
