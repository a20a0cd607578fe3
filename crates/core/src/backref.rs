//! Liveness-checked back-references from child objects to their logical owner.
//!
//! Resource graphs in this workspace are deep but not tree-shaped: an image
//! view refers to its image, a command buffer to its pool, and almost
//! everything to the device. Children must never keep their owner alive
//! (destruction order is the caller's contract), but dereferencing a dead
//! owner has to fail loudly instead of touching freed state.
//!
//! # Overview
//!
//! Owners that participate in the back-reference graph are constructed as
//! `Arc<T>`. The `Arc`'s heap cell is the owner's stable identity: the handle
//! the caller holds can move freely (into containers, across calls) without
//! invalidating any [`BackRef`], and dropping the last handle atomically
//! flips every outstanding back-reference to expired.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use lumen_core::BackRef;
//!
//! struct Device { id: u32 }
//!
//! let device = Arc::new(Device { id: 7 });
//! let backref = BackRef::new(&device);
//!
//! // Moving the handle does not disturb the reference.
//! let moved = vec![device];
//! assert_eq!(backref.upgrade().unwrap().id, 7);
//!
//! drop(moved);
//! assert!(backref.upgrade().is_err());
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use thiserror::Error;

/// Error returned when dereferencing a [`BackRef`] whose owner has been
/// destroyed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("back-reference target has been destroyed")]
pub struct Expired;

/// A weak, liveness-checked handle to a logical owner.
///
/// Unlike a raw pointer, a `BackRef` survives the owner being moved (the
/// caller's `Arc` handle is only an address-stable indirection) and detects
/// the owner being destroyed. It never extends the owner's lifetime.
pub struct BackRef<T> {
    target: Weak<T>,
}

impl<T> BackRef<T> {
    /// Creates a back-reference to `owner`.
    pub fn new(owner: &Arc<T>) -> Self {
        Self {
            target: Arc::downgrade(owner),
        }
    }

    /// Dereferences the back-reference.
    ///
    /// # Errors
    ///
    /// Returns [`Expired`] if the owner has been destroyed.
    pub fn upgrade(&self) -> Result<Arc<T>, Expired> {
        self.target.upgrade().ok_or(Expired)
    }

    /// Returns true while the owner is alive.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.target.strong_count() > 0
    }
}

impl<T> Clone for BackRef<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

impl<T> fmt::Debug for BackRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackRef")
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Owner {
        value: u32,
    }

    #[test]
    fn upgrade_while_owner_alive() {
        let owner = Arc::new(Owner { value: 42 });
        let backref = BackRef::new(&owner);

        assert!(backref.is_valid());
        assert_eq!(backref.upgrade().unwrap().value, 42);
    }

    #[test]
    fn upgrade_after_destruction_fails() {
        let owner = Arc::new(Owner { value: 1 });
        let backref = BackRef::new(&owner);

        drop(owner);

        assert!(!backref.is_valid());
        assert_eq!(backref.upgrade().unwrap_err(), Expired);
    }

    #[test]
    fn clones_share_liveness() {
        let owner = Arc::new(Owner { value: 3 });
        let a = BackRef::new(&owner);
        let b = a.clone();

        drop(owner);

        assert!(!a.is_valid());
        assert!(!b.is_valid());
    }

    #[test]
    fn backref_does_not_keep_owner_alive() {
        let owner = Arc::new(Owner { value: 9 });
        let backref = BackRef::new(&owner);

        assert_eq!(Arc::strong_count(&owner), 1);
        drop(owner);
        assert!(backref.upgrade().is_err());
    }
}
