//! Keyed per-instance transforms with a packed upload buffer.
//!
//! Live instances occupy the dense slots `0..count`. Deleting swaps the last
//! instance into the hole, so the table never has gaps; only slots whose
//! contents changed are repacked by [`Instances::rebuild`].
//!
//! # Invariants
//! - Every live key maps to exactly one slot below `count()`, and every such
//!   slot maps back to its key.
//! - After `rebuild()`, `data()[slot * INSTANCE_FLOATS..]` holds the model
//!   matrix (16 floats, column-major) followed by the normal matrix (9).

use crate::transform::normal_matrix;
use glam::{Mat3, Mat4};
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Floats per packed instance.
pub const INSTANCE_FLOATS: usize = 25;
/// Bytes per packed instance.
pub const INSTANCE_STRIDE: u64 = INSTANCE_FLOATS as u64 * 4;
/// Byte offset of the normal matrix inside a packed instance.
pub const NORMAL_OFFSET: u64 = 16 * 4;

#[derive(Debug, Clone)]
pub struct Instances<K> {
    slots: HashMap<K, usize>,
    keys: Vec<K>,
    models: Vec<Mat4>,
    normals: Vec<Mat3>,
    data: Vec<f32>,
    dirty: BTreeSet<usize>,
    resized: bool,
}

impl<K> Default for Instances<K> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            keys: Vec::new(),
            models: Vec::new(),
            normals: Vec::new(),
            data: Vec::new(),
            dirty: BTreeSet::new(),
            resized: false,
        }
    }
}

impl<K: Hash + Eq + Clone> Instances<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Insert or update. A new key takes the next dense slot.
    pub fn set(&mut self, key: K, model: Mat4) {
        let slot = match self.slots.get(&key) {
            Some(&slot) => {
                self.models[slot] = model;
                slot
            }
            None => {
                let slot = self.keys.len();
                self.slots.insert(key.clone(), slot);
                self.keys.push(key);
                self.models.push(model);
                self.normals.push(Mat3::IDENTITY);
                self.resized = true;
                slot
            }
        };
        self.dirty.insert(slot);
    }

    /// Remove `key`, moving the last instance into its slot. Returns whether
    /// the key was live.
    pub fn delete(&mut self, key: &K) -> bool {
        let Some(slot) = self.slots.remove(key) else {
            return false;
        };
        let last = self.keys.len() - 1;
        self.keys.swap_remove(slot);
        self.models.swap_remove(slot);
        self.normals.swap_remove(slot);
        if slot != last {
            self.slots.insert(self.keys[slot].clone(), slot);
            self.dirty.insert(slot);
        }
        self.dirty.remove(&last);
        self.resized = true;
        true
    }

    pub fn get(&self, key: &K) -> Option<Mat4> {
        self.slots.get(key).map(|&slot| self.models[slot])
    }

    pub fn slot(&self, key: &K) -> Option<usize> {
        self.slots.get(key).copied()
    }

    pub fn key_at(&self, slot: usize) -> Option<&K> {
        self.keys.get(slot)
    }

    pub fn model_at(&self, slot: usize) -> Option<Mat4> {
        self.models.get(slot).copied()
    }

    /// Normal matrix of a slot as of the last rebuild.
    pub fn normal_at(&self, slot: usize) -> Option<Mat3> {
        self.normals.get(slot).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.keys.iter()
    }

    /// Whether `data()` is stale.
    pub fn is_dirty(&self) -> bool {
        self.resized || !self.dirty.is_empty()
    }

    /// Repack changed slots into the upload buffer. Returns how many slots
    /// were repacked.
    pub fn rebuild(&mut self) -> usize {
        self.data.resize(self.keys.len() * INSTANCE_FLOATS, 0.0);
        let dirty = std::mem::take(&mut self.dirty);
        for &slot in &dirty {
            let model = self.models[slot];
            let normal = normal_matrix(model);
            self.normals[slot] = normal;
            let packed = &mut self.data[slot * INSTANCE_FLOATS..(slot + 1) * INSTANCE_FLOATS];
            packed[..16].copy_from_slice(&model.to_cols_array());
            packed[16..].copy_from_slice(&normal.to_cols_array());
        }
        self.resized = false;
        dirty.len()
    }

    /// Packed instance data; current after [`rebuild`](Self::rebuild).
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn clear(&mut self) {
        *self = Self::default();
        self.resized = true;
    }
}
