//! Render-layer bookkeeping for object selections.
//!
//! A [`Selection`] is an ordered set of scene objects that share a render
//! layer. Outline-style effects render only that layer, so adding an object
//! enables the layer on it and removing it disables the layer again.

use std::collections::BTreeSet;

use crate::backend::ObjectId;
use crate::error::{Error, Result};

/// Something that stores per-object render layer masks.
pub trait LayerTarget {
    fn enable_layer(&mut self, object: ObjectId, layer: u8);
    fn disable_layer(&mut self, object: ObjectId, layer: u8);
}

/// Layer used by selections unless told otherwise.
pub const DEFAULT_LAYER: u8 = 10;

/// Render layers are bits of a 32-bit mask.
pub const MAX_LAYERS: u8 = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    objects: BTreeSet<ObjectId>,
    layer: u8,
    enabled: bool,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            objects: BTreeSet::new(),
            layer: DEFAULT_LAYER,
            enabled: true,
        }
    }
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(layer: u8) -> Result<Self> {
        check_layer(layer)?;
        Ok(Self {
            layer,
            ..Self::default()
        })
    }

    pub fn layer(&self) -> u8 {
        self.layer
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn contains(&self, object: ObjectId) -> bool {
        self.objects.contains(&object)
    }

    pub fn iter(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.iter().copied()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Move every selected object to a new layer.
    pub fn set_layer(&mut self, target: &mut dyn LayerTarget, layer: u8) -> Result<()> {
        check_layer(layer)?;
        if layer == self.layer {
            return Ok(());
        }
        for &object in &self.objects {
            target.disable_layer(object, self.layer);
            if self.enabled {
                target.enable_layer(object, layer);
            }
        }
        self.layer = layer;
        Ok(())
    }

    /// Replace the selection with `objects`.
    pub fn set(&mut self, target: &mut dyn LayerTarget, objects: impl IntoIterator<Item = ObjectId>) {
        self.clear(target);
        for object in objects {
            self.add(target, object);
        }
    }

    /// Returns whether the object was newly added.
    pub fn add(&mut self, target: &mut dyn LayerTarget, object: ObjectId) -> bool {
        let added = self.objects.insert(object);
        if added && self.enabled {
            target.enable_layer(object, self.layer);
        }
        added
    }

    /// Returns whether the object was selected.
    pub fn delete(&mut self, target: &mut dyn LayerTarget, object: ObjectId) -> bool {
        let removed = self.objects.remove(&object);
        if removed {
            target.disable_layer(object, self.layer);
        }
        removed
    }

    /// Add the object if absent, remove it otherwise. Returns whether it is
    /// now selected.
    pub fn toggle(&mut self, target: &mut dyn LayerTarget, object: ObjectId) -> bool {
        if self.contains(object) {
            self.delete(target, object);
            false
        } else {
            self.add(target, object);
            true
        }
    }

    pub fn clear(&mut self, target: &mut dyn LayerTarget) {
        for object in std::mem::take(&mut self.objects) {
            target.disable_layer(object, self.layer);
        }
    }

    /// Enable or disable the selection layer on all selected objects while
    /// keeping the selection itself.
    pub fn set_enabled(&mut self, target: &mut dyn LayerTarget, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        for &object in &self.objects {
            if enabled {
                target.enable_layer(object, self.layer);
            } else {
                target.disable_layer(object, self.layer);
            }
        }
        self.enabled = enabled;
    }
}

fn check_layer(layer: u8) -> Result<()> {
    if layer >= MAX_LAYERS {
        return Err(Error::config(format!(
            "render layer {} out of range (max {})",
            layer,
            MAX_LAYERS - 1
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::headless::HeadlessBackend;

    #[test]
    fn test_add_and_delete_toggle_layer_bit() {
        let mut backend = HeadlessBackend::default();
        let mut selection = Selection::new();
        let obj = ObjectId(1);

        assert!(selection.add(&mut backend, obj));
        assert!(!selection.add(&mut backend, obj));
        assert_ne!(backend.layer_mask(obj) & (1 << DEFAULT_LAYER), 0);

        assert!(selection.delete(&mut backend, obj));
        assert_eq!(backend.layer_mask(obj) & (1 << DEFAULT_LAYER), 0);
        assert!(selection.is_empty());
    }

    #[test]
    fn test_set_layer_moves_objects() {
        let mut backend = HeadlessBackend::default();
        let mut selection = Selection::new();
        selection.set(&mut backend, [ObjectId(1), ObjectId(2)]);
        selection.set_layer(&mut backend, 3).unwrap();

        for obj in [ObjectId(1), ObjectId(2)] {
            let mask = backend.layer_mask(obj);
            assert_eq!(mask & (1 << DEFAULT_LAYER), 0);
            assert_ne!(mask & (1 << 3), 0);
        }
        assert!(selection.set_layer(&mut backend, 32).is_err());
        assert_eq!(selection.layer(), 3);
    }

    #[test]
    fn test_toggle_and_disable() {
        let mut backend = HeadlessBackend::default();
        let mut selection = Selection::with_layer(4).unwrap();
        let obj = ObjectId(9);

        assert!(selection.toggle(&mut backend, obj));
        selection.set_enabled(&mut backend, false);
        assert!(selection.contains(obj));
        assert_eq!(backend.layer_mask(obj) & (1 << 4), 0);

        selection.set_enabled(&mut backend, true);
        assert_ne!(backend.layer_mask(obj) & (1 << 4), 0);

        assert!(!selection.toggle(&mut backend, obj));
        assert_eq!(backend.layer_mask(obj) & (1 << 4), 0);
    }

    #[test]
    fn test_clear_releases_everything() {
        let mut backend = HeadlessBackend::default();
        let mut selection = Selection::new();
        selection.set(&mut backend, (0..4).map(ObjectId));
        assert_eq!(selection.len(), 4);
        selection.clear(&mut backend);
        assert!(selection.is_empty());
        assert_eq!(backend.layer_mask(ObjectId(2)), 1);
    }
}
