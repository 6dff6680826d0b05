//! Shader uniforms and ordered name maps.
//!
//! A [`Uniform`] is a shared handle: the same object is installed in an
//! effect's own uniform map and in the merged program, so per-frame updates
//! made by the effect are seen by the compiled shader without recompiling.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::backend::TextureHandle;

/// Runtime value of a uniform.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
    Texture(Option<TextureHandle>),
}

impl Default for UniformValue {
    fn default() -> Self {
        UniformValue::Float(0.0)
    }
}

impl UniformValue {
    /// GLSL type name used in declarations.
    pub fn glsl_type(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "float",
            UniformValue::Int(_) => "int",
            UniformValue::Bool(_) => "bool",
            UniformValue::Vec2(_) => "vec2",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Vec4(_) => "vec4",
            UniformValue::Mat3(_) => "mat3",
            UniformValue::Mat4(_) => "mat4",
            UniformValue::Texture(_) => "sampler2D",
        }
    }

    /// Convert to bytes for upload. Samplers have no buffer representation.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytemuck::cast_slice(&[*v]).to_vec(),
            UniformValue::Int(v) => bytemuck::cast_slice(&[*v]).to_vec(),
            UniformValue::Bool(v) => bytemuck::cast_slice(&[u32::from(*v)]).to_vec(),
            UniformValue::Vec2(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Vec3(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Vec4(v) => bytemuck::cast_slice(&v.to_array()).to_vec(),
            UniformValue::Mat3(m) => bytemuck::cast_slice(&m.to_cols_array()).to_vec(),
            UniformValue::Mat4(m) => bytemuck::cast_slice(&m.to_cols_array()).to_vec(),
            UniformValue::Texture(_) => Vec::new(),
        }
    }

    /// Get as float, returning 0.0 for non-scalar types.
    pub fn as_float(&self) -> f32 {
        match self {
            UniformValue::Float(v) => *v,
            UniformValue::Int(v) => *v as f32,
            UniformValue::Bool(v) => f32::from(u8::from(*v)),
            _ => 0.0,
        }
    }

    pub fn as_texture(&self) -> Option<TextureHandle> {
        match self {
            UniformValue::Texture(t) => *t,
            _ => None,
        }
    }
}

impl From<f32> for UniformValue {
    fn from(value: f32) -> Self {
        UniformValue::Float(value)
    }
}

impl From<Vec2> for UniformValue {
    fn from(value: Vec2) -> Self {
        UniformValue::Vec2(value)
    }
}

impl From<Vec3> for UniformValue {
    fn from(value: Vec3) -> Self {
        UniformValue::Vec3(value)
    }
}

impl From<Vec4> for UniformValue {
    fn from(value: Vec4) -> Self {
        UniformValue::Vec4(value)
    }
}

/// Shared, interior-mutable uniform handle.
///
/// Cloning a `Uniform` clones the handle, not the value.
#[derive(Clone, Debug, Default)]
pub struct Uniform(Rc<RefCell<UniformValue>>);

impl Uniform {
    pub fn new(value: impl Into<UniformValue>) -> Self {
        Self(Rc::new(RefCell::new(value.into())))
    }

    pub fn float(value: f32) -> Self {
        Self::new(UniformValue::Float(value))
    }

    pub fn texture(texture: Option<TextureHandle>) -> Self {
        Self::new(UniformValue::Texture(texture))
    }

    /// Snapshot of the current value.
    pub fn get(&self) -> UniformValue {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: impl Into<UniformValue>) {
        *self.0.borrow_mut() = value.into();
    }

    pub fn as_float(&self) -> f32 {
        self.0.borrow().as_float()
    }

    pub fn as_texture(&self) -> Option<TextureHandle> {
        self.0.borrow().as_texture()
    }

    /// Whether two handles refer to the same uniform storage.
    pub fn ptr_eq(a: &Uniform, b: &Uniform) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl<'de> Deserialize<'de> for Uniform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        UniformValue::deserialize(deserializer).map(Uniform::new)
    }
}

/// Insertion-ordered map keyed by shader identifiers.
///
/// Re-inserting an existing key replaces the value in place.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedMap<V> {
    entries: Vec<(String, V)>,
}

/// Ordered uniform map (name → shared uniform).
pub type UniformMap = NamedMap<Uniform>;

/// Ordered macro map (name → replacement text).
pub type DefineMap = NamedMap<String>;

impl<V> Default for NamedMap<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<V> NamedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns the previous value for `key`.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            return Some(std::mem::replace(&mut slot.1, value));
        }
        self.entries.push((key, value));
        None
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Append every entry of `other`, replacing existing keys.
    pub fn extend_from(&mut self, other: &NamedMap<V>)
    where
        V: Clone,
    {
        for (k, v) in &other.entries {
            self.insert(k.clone(), v.clone());
        }
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for NamedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = NamedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for NamedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for MapVisitor<V> {
            type Value = NamedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of names to values")
            }

            // Entries arrive in document order, which is the order we keep.
            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = NamedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor(PhantomData))
    }
}
