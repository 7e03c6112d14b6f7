use std::collections::HashMap;

use tracing::debug;

use crate::window::EntityId;

pub type HandleId = u32;

#[derive(Debug)]
struct ViewHandle {
    id: HandleId,
    bound_entity: Option<EntityId>,
    idle: bool,
    last_used: u64,
}

/// Recycles row view handles keyed by entity identity. A released handle
/// keeps its binding until another entity claims it, so an entry scrolling
/// back into view reacquires the same handle.
pub(crate) struct RowViewPool {
    handles: Vec<ViewHandle>,
    by_entity: HashMap<EntityId, HandleId>,
    max_size: usize,
    next_id: HandleId,
    clock: u64,
    evictions: u64,
}

impl RowViewPool {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            handles: Vec::new(),
            by_entity: HashMap::new(),
            max_size: max_size.max(1),
            next_id: 1,
            clock: 0,
            evictions: 0,
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn index_of(&self, id: HandleId) -> Option<usize> {
        self.handles.iter().position(|handle| handle.id == id)
    }

    /// At most one live handle is ever bound to a given entity; rebinding to
    /// the same entity always returns that handle.
    pub(crate) fn acquire(&mut self, entity_id: &EntityId) -> HandleId {
        let stamp = self.tick();

        if let Some(&id) = self.by_entity.get(entity_id) {
            if let Some(index) = self.index_of(id) {
                let handle = &mut self.handles[index];
                handle.idle = false;
                handle.last_used = stamp;
                return id;
            }
        }

        if let Some(index) = self
            .handles
            .iter()
            .position(|handle| handle.idle && handle.bound_entity.is_none())
        {
            let id = self.handles[index].id;
            self.bind(index, entity_id, stamp);
            return id;
        }

        if self.handles.len() < self.max_size {
            let id = self.next_id;
            self.next_id += 1;
            self.handles.push(ViewHandle {
                id,
                bound_entity: Some(entity_id.clone()),
                idle: false,
                last_used: stamp,
            });
            self.by_entity.insert(entity_id.clone(), id);
            return id;
        }

        if let Some(index) = self.lru_idle_index() {
            let id = self.handles[index].id;
            debug!(handle = id, entity_id = %entity_id, "pool rebinding LRU idle handle");
            self.evictions += 1;
            self.bind(index, entity_id, stamp);
            return id;
        }

        // Every handle is visible; acquire never fails. The overflow handle
        // is destroyed at the next release.
        let id = self.next_id;
        self.next_id += 1;
        self.handles.push(ViewHandle {
            id,
            bound_entity: Some(entity_id.clone()),
            idle: false,
            last_used: stamp,
        });
        self.by_entity.insert(entity_id.clone(), id);
        id
    }

    fn bind(&mut self, index: usize, entity_id: &EntityId, stamp: u64) {
        if let Some(old) = self.handles[index].bound_entity.take() {
            self.by_entity.remove(&old);
        }
        let id = self.handles[index].id;
        self.handles[index].bound_entity = Some(entity_id.clone());
        self.handles[index].idle = false;
        self.handles[index].last_used = stamp;
        self.by_entity.insert(entity_id.clone(), id);
    }

    fn lru_idle_index(&self) -> Option<usize> {
        self.handles
            .iter()
            .enumerate()
            .filter(|(_, handle)| handle.idle)
            .min_by_key(|(_, handle)| handle.last_used)
            .map(|(index, _)| index)
    }

    /// Marks the handle idle without unbinding it. Oldest idle handles are
    /// destroyed only while the pool is over capacity.
    pub(crate) fn release(&mut self, id: HandleId) {
        let stamp = self.tick();
        if let Some(index) = self.index_of(id) {
            self.handles[index].idle = true;
            self.handles[index].last_used = stamp;
        }

        while self.handles.len() > self.max_size {
            let Some(index) = self.lru_idle_index() else {
                break;
            };
            let handle = self.handles.remove(index);
            if let Some(entity) = handle.bound_entity {
                self.by_entity.remove(&entity);
            }
            self.evictions += 1;
            debug!(handle = handle.id, "pool destroyed overflow handle");
        }
    }

    pub(crate) fn bound_handle(&self, entity_id: &str) -> Option<HandleId> {
        self.by_entity.get(entity_id).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn evictions(&self) -> u64 {
        self.evictions
    }
}
