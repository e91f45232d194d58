//! Entity lifecycle states.

use serde::Serialize;
use std::fmt;

/// The lifecycle state of a tracked entity.
///
/// `Detached` is the implicit state of any entity the context does not
/// track; no entry carries it, but operations report it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntityState {
    /// Not tracked by any context.
    Detached,
    /// Tracked and identical to the store row it came from.
    Unchanged,
    /// Scheduled for insertion; has no original snapshot.
    Added,
    /// Tracked with at least one property diverging from the original
    /// snapshot.
    Modified,
    /// Scheduled for deletion.
    Deleted,
}

impl EntityState {
    /// Whether an entry in this state exists in the context.
    #[must_use]
    pub const fn is_tracked(&self) -> bool {
        !matches!(self, EntityState::Detached)
    }

    /// Whether current values may be read or written in this state.
    #[must_use]
    pub const fn allows_current_values(&self) -> bool {
        matches!(
            self,
            EntityState::Unchanged | EntityState::Modified | EntityState::Added
        )
    }

    /// Whether original values may be read or written in this state.
    ///
    /// Added entities have no original snapshot.
    #[must_use]
    pub const fn allows_original_values(&self) -> bool {
        matches!(
            self,
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted
        )
    }

    /// Whether a store snapshot may be fetched in this state.
    #[must_use]
    pub const fn allows_store_values(&self) -> bool {
        matches!(
            self,
            EntityState::Unchanged | EntityState::Modified | EntityState::Deleted
        )
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityState::Detached => "Detached",
            EntityState::Unchanged => "Unchanged",
            EntityState::Added => "Added",
            EntityState::Modified => "Modified",
            EntityState::Deleted => "Deleted",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_legality_matrix() {
        assert!(EntityState::Added.allows_current_values());
        assert!(!EntityState::Added.allows_original_values());
        assert!(!EntityState::Added.allows_store_values());

        assert!(!EntityState::Deleted.allows_current_values());
        assert!(EntityState::Deleted.allows_original_values());
        assert!(EntityState::Deleted.allows_store_values());

        assert!(!EntityState::Detached.allows_current_values());
        assert!(!EntityState::Detached.allows_original_values());

        assert!(EntityState::Modified.allows_current_values());
        assert!(EntityState::Modified.allows_original_values());
    }

    #[test]
    fn test_display() {
        assert_eq!(EntityState::Unchanged.to_string(), "Unchanged");
    }
}
