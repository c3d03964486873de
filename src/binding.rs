//! Opaque descriptor handles.
//!
//! User code and the reactor never hold descriptor references directly;
//! they hold a [`Binding`] and go through the registry. A binding pairs a
//! slot index with a serial number so that a handle kept across the
//! descriptor's destruction can never alias a newer occupant of the same
//! slot.

use std::fmt;

/// Opaque, copyable handle identifying one descriptor across the callback
/// boundary.
///
/// Bindings are cheap to copy and hash; a stale binding simply fails to
/// resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub(crate) index: u32,
    pub(crate) serial: u32,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}.{}", self.index, self.serial)
    }
}
