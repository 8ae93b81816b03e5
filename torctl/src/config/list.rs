//! Change-tracking sequence wrapper.
//!
//! A façade around `Vec<T>` whose every mutating method runs an
//! `on_modify` hook before delegating to the real `Vec` operation. Reads
//! are plain pass-through. This is the reusable piece; `TorConfig` (see
//! `super::torconfig`) is what gives the hook something useful to do
//! (marking the owning option as staged) — the back reference exists
//! only for that one call, never for lifecycle management.

use std::sync::Arc;

/// Called once before each mutating operation.
pub type OnModify = Arc<dyn Fn() + Send + Sync>;

/// A `Vec<T>` that calls `on_modify` before every mutation.
pub struct ChangeTrackingList<T> {
    items: Vec<T>,
    on_modify: OnModify,
}

impl<T> ChangeTrackingList<T> {
    pub fn new(items: Vec<T>, on_modify: OnModify) -> Self {
        Self { items, on_modify }
    }

    fn notify(&self) {
        (self.on_modify)();
    }

    // -- reads, transparent --

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    // -- mutators, all notify first --

    pub fn set(&mut self, index: usize, value: T) {
        self.notify();
        self.items[index] = value;
    }

    pub fn push(&mut self, value: T) {
        self.notify();
        self.items.push(value);
    }

    pub fn extend<I: IntoIterator<Item = T>>(&mut self, values: I) {
        self.notify();
        self.items.extend(values);
    }

    pub fn insert(&mut self, index: usize, value: T) {
        self.notify();
        self.items.insert(index, value);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.notify();
        self.items.pop()
    }

    pub fn remove(&mut self, index: usize) -> T {
        self.notify();
        self.items.remove(index)
    }

    /// Replace `range` with `replacement` in a single splice.
    pub fn splice_replace<R>(&mut self, range: R, replacement: Vec<T>)
    where
        R: std::ops::RangeBounds<usize>,
    {
        self.notify();
        self.items.splice(range, replacement);
    }

    pub fn sort_by<F>(&mut self, compare: F)
    where
        F: FnMut(&T, &T) -> std::cmp::Ordering,
    {
        self.notify();
        self.items.sort_by(compare);
    }

    pub fn reverse(&mut self) {
        self.notify();
        self.items.reverse();
    }

    pub fn clear(&mut self) {
        self.notify();
        self.items.clear();
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Clone> Clone for ChangeTrackingList<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
            on_modify: self.on_modify.clone(),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ChangeTrackingList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ChangeTrackingList").field(&self.items).finish()
    }
}

impl<'a, T> IntoIterator for &'a ChangeTrackingList<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_hook() -> (OnModify, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = count.clone();
        let hook: OnModify = Arc::new(move || {
            counted.fetch_add(1, Ordering::SeqCst);
        });
        (hook, count)
    }

    #[test]
    fn reads_do_not_notify() {
        let (hook, count) = counting_hook();
        let list = ChangeTrackingList::new(vec![1, 2, 3], hook);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(1), Some(&2));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_mutator_notifies_before_delegating() {
        let (hook, count) = counting_hook();
        let mut list = ChangeTrackingList::new(vec![1, 2, 3], hook);

        list.push(4);
        assert_eq!(list.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        list.insert(0, 0);
        assert_eq!(list.as_slice(), &[0, 1, 2, 3, 4]);
        assert_eq!(count.load(Ordering::SeqCst), 2);

        list.remove(0);
        list.pop();
        list.set(0, 9);
        list.reverse();
        list.clear();
        assert_eq!(count.load(Ordering::SeqCst), 6);
        assert!(list.is_empty());
    }
}
