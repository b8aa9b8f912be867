//! Consumer-side view of static data.
//!
//! Replaying a recording in order and keeping the last static batch per
//! (entity path, archetype, component) gives what a viewer shows for static
//! data. The value type is not part of the key, so a re-log with another
//! type replaces the old value. A zero-length static batch removes the
//! component.

use std::collections::BTreeMap;
use std::path::Path;

use crate::codec::{read_file, WireMessage};
use crate::component::{ComponentBatch, ComponentDescriptor};
use crate::entity_path::EntityPath;
use crate::error::Result;

/// Entity path, archetype, component name.
type SlotKey = (EntityPath, Option<String>, String);

fn slot_key(path: &EntityPath, descriptor: &ComponentDescriptor) -> SlotKey {
    (
        path.clone(),
        descriptor.archetype.clone(),
        descriptor.component.clone(),
    )
}

#[derive(Debug, Default, Clone)]
pub struct StaticView {
    entries: BTreeMap<SlotKey, ComponentBatch>,
}

impl StaticView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one message. Temporal messages are ignored.
    pub fn apply(&mut self, msg: &WireMessage) {
        if !msg.is_static() {
            return;
        }
        for batch in msg.batches() {
            let key = slot_key(msg.entity_path(), batch.descriptor());
            if batch.is_empty() {
                self.entries.remove(&key);
            } else {
                self.entries.insert(key, batch.clone());
            }
        }
    }

    pub fn from_messages<'a>(messages: impl IntoIterator<Item = &'a WireMessage>) -> Self {
        let mut view = Self::new();
        for msg in messages {
            view.apply(msg);
        }
        view
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let messages = read_file(path)?;
        Ok(Self::from_messages(&messages))
    }

    /// The value type of `descriptor` is ignored.
    pub fn get(&self, path: &EntityPath, descriptor: &ComponentDescriptor) -> Option<&ComponentBatch> {
        self.entries.get(&slot_key(path, descriptor))
    }

    /// Look a component up by name, ignoring the archetype.
    pub fn component(&self, path: &EntityPath, component: &str) -> Option<&ComponentBatch> {
        self.iter()
            .find(|(p, batch)| *p == path && batch.descriptor().component == component)
            .map(|(_, batch)| batch)
    }

    /// Entries ordered by path, archetype, then component.
    pub fn iter(&self) -> impl Iterator<Item = (&EntityPath, &ComponentBatch)> {
        self.entries.iter().map(|((path, _, _), batch)| (path, batch))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
