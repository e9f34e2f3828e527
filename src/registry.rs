// Shared splat resource registry
//
// Every renderer referencing the same source asset shares one SplatResource.
// Ownership is explicit: `acquire` bumps a reference count, `release` drops
// it and hands the resource back once the last owner is gone so the caller
// can free its GPU objects.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::splat_resource::SplatResource;

struct Entry<B: Backend> {
    resource: Arc<SplatResource<B>>,
    refs: usize,
}

/// Reference-counted cache of splat resources keyed by asset identity
pub struct ResourceRegistry<K, B: Backend> {
    entries: Mutex<HashMap<K, Entry<B>>>,
}

impl<K, B: Backend> Default for ResourceRegistry<K, B> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, B> ResourceRegistry<K, B>
where
    K: Eq + Hash + Clone + fmt::Debug,
    B: Backend,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached resource for `key`, building it on first use.
    /// Each call must be paired with one `release`.
    pub fn acquire<F>(&self, key: &K, build: F) -> Arc<SplatResource<B>>
    where
        F: FnOnce() -> SplatResource<B>,
    {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(key) {
            entry.refs += 1;
            debug!(?key, refs = entry.refs, "Reusing cached splat resource");
            return entry.resource.clone();
        }

        let resource = Arc::new(build());
        entries.insert(
            key.clone(),
            Entry {
                resource: resource.clone(),
                refs: 1,
            },
        );
        debug!(?key, count = resource.num_splats(), "Registered splat resource");
        resource
    }

    /// Drop one reference. Returns the resource when this was the last one;
    /// the caller is responsible for destroying its GPU objects.
    pub fn release(&self, key: &K) -> Option<Arc<SplatResource<B>>> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            warn!(?key, "Release of unknown splat resource");
            return None;
        };

        entry.refs -= 1;
        if entry.refs > 0 {
            return None;
        }

        debug!(?key, "Last reference released, evicting splat resource");
        entries.remove(key).map(|entry| entry.resource)
    }

    pub fn ref_count(&self, key: &K) -> usize {
        self.entries.lock().get(key).map_or(0, |entry| entry.refs)
    }

    pub fn get(&self, key: &K) -> Option<Arc<SplatResource<B>>> {
        self.entries.lock().get(key).map(|entry| entry.resource.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
