// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metadata extensions: pluggable per-item key/value contributors.
//!
//! An extension owns a unique namespace inside [`Item::metadata`]. Its
//! [`apply`](MetadataExtension::apply) hook runs just before push and writes
//! the extension's fields; [`consume`](MetadataExtension::consume) runs just
//! after pop, before the target executes, and typically records the fields in
//! some extension-local context for the duration of the execution.
//!
//! Registration order is preserved and is the invocation order.

use crate::item::Item;

/// A named producer-consumer of extra per-item fields.
pub trait MetadataExtension: Send + Sync {
    /// Unique namespace under which this extension stores its fields.
    /// Registering two extensions with the same namespace fails.
    fn namespace(&self) -> &str;

    /// Write extension fields into the item. Runs just before push.
    fn apply(&self, item: &mut Item);

    /// Read extension fields from the item. Runs just after pop.
    fn consume(&self, item: &Item);
}
