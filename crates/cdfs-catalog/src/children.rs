//! The assembled listing of one container under one criteria.
//!
//! A [`ChildrenSet`] is built once through [`ChildrenSetBuilder`] and then
//! shared read-only behind an `Arc`: the cache holds one reference, every
//! in-flight traversal holds its own. It is freed when the last of them
//! drops, so an eviction never pulls a listing out from under a reader.

use crate::node::CatalogNode;

#[derive(Debug, Default)]
pub struct ChildrenSet {
    objects: Vec<CatalogNode>,
    nb_containers: usize,
    nb_items: usize,
    total_matches: u32,
}

impl ChildrenSet {
    /// Containers first, then items, each in the order the server sent them.
    pub fn objects(&self) -> &[CatalogNode] {
        &self.objects
    }

    pub fn containers(&self) -> impl Iterator<Item = &CatalogNode> {
        self.objects[..self.nb_containers].iter()
    }

    pub fn items(&self) -> impl Iterator<Item = &CatalogNode> {
        self.objects[self.nb_containers..].iter()
    }

    pub fn nb_containers(&self) -> usize {
        self.nb_containers
    }

    pub fn nb_items(&self) -> usize {
        self.nb_items
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// TotalMatches as reported by the server (0 = unknown).
    pub fn total_matches(&self) -> u32 {
        self.total_matches
    }

    pub fn find_container(&self, basename: &str) -> Option<&CatalogNode> {
        self.containers().find(|node| node.basename == basename)
    }
}

/// Accumulates pages of a (possibly multi-page) fetch.
#[derive(Debug, Default)]
pub struct ChildrenSetBuilder {
    containers: Vec<CatalogNode>,
    items: Vec<CatalogNode>,
    total_matches: u32,
}

impl ChildrenSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: CatalogNode) {
        if node.is_container {
            self.containers.push(node);
        } else {
            self.items.push(node);
        }
    }

    pub fn set_total_matches(&mut self, total: u32) {
        self.total_matches = total;
    }

    pub fn len(&self) -> usize {
        self.containers.len() + self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn build(self) -> ChildrenSet {
        let nb_containers = self.containers.len();
        let nb_items = self.items.len();
        let mut objects = self.containers;
        objects.extend(self.items);
        ChildrenSet {
            objects,
            nb_containers,
            nb_items,
            total_matches: self.total_matches,
        }
    }
}
