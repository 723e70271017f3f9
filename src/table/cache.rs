//! Ordered item storage used for both complete and partial caches

use crate::item::WrappedItem;
use std::collections::HashMap;

/// Items keyed by index, remembering insertion order
#[derive(Debug, Clone, Default)]
pub struct ItemCache {
    order: Vec<String>,
    items: HashMap<String, WrappedItem>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, index: &str) -> bool {
        self.items.contains_key(index)
    }

    pub fn get(&self, index: &str) -> Option<&WrappedItem> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: &str) -> Option<&mut WrappedItem> {
        self.items.get_mut(index)
    }

    /// Item at an insertion position
    pub fn at(&self, position: usize) -> Option<&WrappedItem> {
        self.order
            .get(position)
            .and_then(|index| self.items.get(index))
    }

    pub fn index_at(&self, position: usize) -> Option<&str> {
        self.order.get(position).map(String::as_str)
    }

    /// Insert a new item at the end, or replace an existing one in place
    pub fn insert(&mut self, item: WrappedItem) {
        if !self.items.contains_key(&item.index) {
            self.order.push(item.index.clone());
        }
        self.items.insert(item.index.clone(), item);
    }

    /// Drop every listed index, returning the removed items
    pub fn remove_all(&mut self, indexes: &[String]) -> Vec<WrappedItem> {
        if indexes.is_empty() {
            return Vec::new();
        }
        let removed: Vec<WrappedItem> = indexes
            .iter()
            .filter_map(|index| self.items.remove(index))
            .collect();
        let items = &self.items;
        self.order.retain(|index| items.contains_key(index));
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &WrappedItem> {
        self.order.iter().filter_map(move |index| self.items.get(index))
    }

    pub fn indexes(&self) -> &[String] {
        &self.order
    }

    pub fn into_items(self) -> Vec<WrappedItem> {
        let ItemCache { order, mut items } = self;
        order
            .into_iter()
            .filter_map(|index| items.remove(&index))
            .collect()
    }
}
