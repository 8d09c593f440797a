//! Per-entity pending state inside an indexing plan.
//!
//! `add` and `delete` together mean "replace", i.e. an UPDATE.

use crate::types::EntityHandle;
use crate::work::item::{DirtyPaths, WorkKind};
use std::collections::BTreeSet;

#[derive(Clone, Default)]
pub(crate) struct PendingEntityWork {
    entity: Option<EntityHandle>,
    routing_key: Option<String>,
    add: bool,
    delete: bool,
    should_resolve_to_reindex: bool,
    consider_all_dirty: bool,
    dirty_paths: BTreeSet<String>,
    updated_because_of_contained: bool,
}

impl PendingEntityWork {
    pub fn add(&mut self, entity: EntityHandle) {
        self.entity = Some(entity);
        self.should_resolve_to_reindex = true;
        self.add = true;
        // A pending delete stays: the document may already be indexed.
        self.mark_all_dirty();
    }

    /// `paths == None` is a full update.
    pub fn update(&mut self, entity: EntityHandle, paths: Option<BTreeSet<String>>) {
        self.entity = Some(entity);
        self.should_resolve_to_reindex = true;
        if !self.add {
            let from_delete = self.delete;
            self.add = true;
            self.delete = true;
            if from_delete {
                self.mark_all_dirty();
                return;
            }
        }
        match paths {
            None => self.mark_all_dirty(),
            Some(paths) if !self.consider_all_dirty => self.dirty_paths.extend(paths),
            Some(_) => {}
        }
    }

    pub fn delete(&mut self, entity: Option<EntityHandle>) {
        if entity.is_some() {
            self.entity = entity;
        }
        if self.add && !self.delete {
            // Created and removed in the same unit of work.
            self.add = false;
            self.delete = false;
        } else {
            self.add = false;
            self.delete = true;
        }
        self.should_resolve_to_reindex = true;
        self.mark_all_dirty();
    }

    pub fn purge(&mut self, routing_key: Option<String>) {
        self.add = false;
        self.delete = true;
        self.should_resolve_to_reindex = false;
        self.consider_all_dirty = false;
        self.dirty_paths.clear();
        self.updated_because_of_contained = false;
        self.routing_key = routing_key;
    }

    pub fn update_because_of_contained(&mut self, entity: EntityHandle) {
        if self.delete && !self.add {
            return;
        }
        self.entity = Some(entity);
        if !self.add {
            self.add = true;
            self.delete = true;
        }
        self.updated_because_of_contained = true;
    }

    fn mark_all_dirty(&mut self) {
        self.consider_all_dirty = true;
        self.dirty_paths.clear();
    }

    /// Clears the flag and reports whether reindex resolution is due.
    pub fn take_resolution_request(&mut self) -> bool {
        std::mem::take(&mut self.should_resolve_to_reindex)
    }

    pub fn resolves_to(&self) -> Option<WorkKind> {
        match (self.add, self.delete) {
            (false, false) => None,
            (true, false) => Some(WorkKind::Add),
            (false, true) => Some(WorkKind::Delete),
            (true, true) => Some(WorkKind::Update),
        }
    }

    pub fn entity(&self) -> Option<&EntityHandle> {
        self.entity.as_ref()
    }

    pub fn routing_key(&self) -> Option<&str> {
        self.routing_key.as_deref()
    }

    pub fn updated_because_of_contained(&self) -> bool {
        self.updated_because_of_contained
    }

    pub fn dirty_paths(&self) -> DirtyPaths {
        if self.consider_all_dirty || self.dirty_paths.is_empty() {
            DirtyPaths::All
        } else {
            DirtyPaths::Paths(self.dirty_paths.clone())
        }
    }
}
