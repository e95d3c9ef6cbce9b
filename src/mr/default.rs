//! Process-wide default resource
//!
//! Code that does not take a resource explicitly allocates through
//! [`get_default_resource`]. The slot starts out holding the built-in
//! direct device resource ([`initial_resource`]) and can be swapped at any
//! time with [`set_default_resource`].
//!
//! The registry holds an `Arc`, so a resource stays alive for as long as
//! anyone who fetched it still uses it, even after it has been replaced.
//! Memory must still be returned to the resource it came from: swapping the
//! default does not migrate outstanding allocations.

use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::mr::{same_resource, DirectResource, SharedResource};

static INITIAL_RESOURCE: Lazy<SharedResource> = Lazy::new(|| {
    tracing::debug!("Creating built-in default resource");
    Arc::new(DirectResource::platform_device())
});

static DEFAULT_RESOURCE: Lazy<RwLock<SharedResource>> =
    Lazy::new(|| RwLock::new(initial_resource()));

/// The built-in resource the default slot starts with
pub fn initial_resource() -> SharedResource {
    Arc::clone(&INITIAL_RESOURCE)
}

/// Whether `resource` is the built-in resource
pub fn is_initial_resource(resource: &SharedResource) -> bool {
    same_resource(&**resource, &**INITIAL_RESOURCE)
}

/// Current default resource
pub fn get_default_resource() -> SharedResource {
    // The slot only ever holds a complete handle, so a poisoned lock still
    // guards a valid value
    let slot = DEFAULT_RESOURCE
        .read()
        .unwrap_or_else(PoisonError::into_inner);
    Arc::clone(&slot)
}

/// Replace the default resource, returning the previous one
///
/// `None` restores the built-in resource. Once this returns, every
/// subsequent [`get_default_resource`] on any thread sees the new handle.
pub fn set_default_resource(resource: Option<SharedResource>) -> SharedResource {
    let resource = resource.unwrap_or_else(initial_resource);
    let mut slot = DEFAULT_RESOURCE
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    let previous = std::mem::replace(&mut *slot, resource);
    tracing::debug!(
        "Default resource replaced (previous was built-in: {})",
        is_initial_resource(&previous)
    );
    previous
}
