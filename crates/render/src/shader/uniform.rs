//! Typed uniform writes into a program's uniform block.
//!
//! Each reflected uniform gets a [`UniformSlot`] when the shader is built:
//! its byte offset plus a setter function chosen for its [`UniformKind`].
//! Setting a uniform is then a table lookup and one typed write, with no
//! per-call dispatch on reflection data.

use super::reflect::{ProgramReflection, UniformKind};
use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use std::collections::HashMap;

/// A value that can be written into a uniform block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat3(Mat3),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            Self::Float(_) => UniformKind::Float,
            Self::Int(_) => UniformKind::Int,
            Self::UInt(_) => UniformKind::UInt,
            Self::Vec2(_) => UniformKind::Vec2,
            Self::Vec3(_) => UniformKind::Vec3,
            Self::Vec4(_) => UniformKind::Vec4,
            Self::Mat3(_) => UniformKind::Mat3,
            Self::Mat4(_) => UniformKind::Mat4,
        }
    }
}

macro_rules! uniform_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for UniformValue {
            fn from(v: $ty) -> Self {
                Self::$variant(v)
            }
        })*
    };
}

uniform_from!(
    f32 => Float,
    i32 => Int,
    u32 => UInt,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat3 => Mat3,
    Mat4 => Mat4,
);

impl From<lumen_common::Color> for UniformValue {
    fn from(c: lumen_common::Color) -> Self {
        Self::Vec4(c.into())
    }
}

/// Writes a value at the start of `dst`; false when the value has the
/// wrong type for the slot.
type Setter = fn(&mut [u8], UniformValue) -> bool;

/// A resolved uniform: where it lives and how to write it.
#[derive(Clone, Copy)]
pub struct UniformSlot {
    pub offset: usize,
    pub kind: UniformKind,
    set: Setter,
}

impl std::fmt::Debug for UniformSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniformSlot")
            .field("offset", &self.offset)
            .field("kind", &self.kind)
            .finish()
    }
}

impl UniformSlot {
    pub fn new(offset: usize, kind: UniformKind) -> Self {
        let set: Setter = match kind {
            UniformKind::Float => set_float,
            UniformKind::Int => set_int,
            UniformKind::UInt => set_uint,
            UniformKind::Vec2 => set_vec2,
            UniformKind::Vec3 => set_vec3,
            UniformKind::Vec4 => set_vec4,
            UniformKind::Mat3 => set_mat3,
            UniformKind::Mat4 => set_mat4,
        };
        Self { offset, kind, set }
    }

    /// Write `value` into `block`. Returns false on a type mismatch or if
    /// the slot does not fit the block.
    pub fn write(&self, block: &mut [u8], value: UniformValue) -> bool {
        let end = self.offset + self.kind.size();
        match block.get_mut(self.offset..end) {
            Some(dst) => (self.set)(dst, value),
            None => false,
        }
    }
}

fn put(dst: &mut [u8], floats: &[f32]) {
    dst[..floats.len() * 4].copy_from_slice(bytemuck::cast_slice(floats));
}

fn set_float(dst: &mut [u8], value: UniformValue) -> bool {
    match value {
        UniformValue::Float(v) => put(dst, &[v]),
        _ => return false,
    }
    true
}

fn set_int(dst: &mut [u8], value: UniformValue) -> bool {
    match value {
        UniformValue::Int(v) => dst.copy_from_slice(&v.to_ne_bytes()),
        _ => return false,
    }
    true
}

fn set_uint(dst: &mut [u8], value: UniformValue) -> bool {
    match value {
        UniformValue::UInt(v) => dst.copy_from_slice(&v.to_ne_bytes()),
        _ => return false,
    }
    true
}

fn set_vec2(dst: &mut [u8], value: UniformValue) -> bool {
    match value {
        UniformValue::Vec2(v) => put(dst, &v.to_array()),
        _ => return false,
    }
    true
}

fn set_vec3(dst: &mut [u8], value: UniformValue) -> bool {
    match value {
        UniformValue::Vec3(v) => put(dst, &v.to_array()),
        _ => return false,
    }
    true
}

fn set_vec4(dst: &mut [u8], value: UniformValue) -> bool {
    match value {
        UniformValue::Vec4(v) => put(dst, &v.to_array()),
        _ => return false,
    }
    true
}

fn set_mat3(dst: &mut [u8], value: UniformValue) -> bool {
    let UniformValue::Mat3(m) = value else {
        return false;
    };
    // Columns are padded to vec4 in uniform memory.
    for (i, col) in [m.x_axis, m.y_axis, m.z_axis].into_iter().enumerate() {
        put(&mut dst[i * 16..], &col.to_array());
    }
    true
}

fn set_mat4(dst: &mut [u8], value: UniformValue) -> bool {
    match value {
        UniformValue::Mat4(m) => put(dst, &m.to_cols_array()),
        _ => return false,
    }
    true
}

/// Outcome of a tolerant uniform write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformWrite {
    Written,
    /// The program does not use this uniform.
    Missing,
    TypeMismatch,
}

/// Name → slot table for one program.
#[derive(Debug, Clone, Default)]
pub struct UniformTable {
    slots: HashMap<String, UniformSlot>,
    block_size: usize,
}

impl UniformTable {
    pub fn from_reflection(reflection: &ProgramReflection) -> Self {
        let slots = reflection
            .uniforms
            .iter()
            .map(|u| (u.name.clone(), UniformSlot::new(u.offset as usize, u.kind)))
            .collect();
        Self {
            slots,
            block_size: reflection.uniform_block_size as usize,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn get(&self, name: &str) -> Option<&UniformSlot> {
        self.slots.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn write(&self, block: &mut [u8], name: &str, value: UniformValue) -> UniformWrite {
        match self.slots.get(name) {
            None => UniformWrite::Missing,
            Some(slot) if slot.write(block, value) => UniformWrite::Written,
            Some(_) => UniformWrite::TypeMismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflect::UniformInfo;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn mat3_columns_are_padded() {
        let slot = UniformSlot::new(0, UniformKind::Mat3);
        let mut block = vec![0u8; 48];
        let m = Mat3::from_cols(Vec3::new(1.0, 2.0, 3.0), Vec3::new(4.0, 5.0, 6.0), Vec3::new(7.0, 8.0, 9.0));
        assert!(slot.write(&mut block, m.into()));
        assert_eq!(
            floats(&block),
            [1.0, 2.0, 3.0, 0.0, 4.0, 5.0, 6.0, 0.0, 7.0, 8.0, 9.0, 0.0]
        );
    }

    #[test]
    fn mismatched_kind_is_not_written() {
        let slot = UniformSlot::new(4, UniformKind::Float);
        let mut block = vec![0u8; 8];
        assert!(!slot.write(&mut block, Vec3::ONE.into()));
        assert!(block.iter().all(|b| *b == 0));
        assert!(slot.write(&mut block, 2.5f32.into()));
        assert_eq!(floats(&block), [0.0, 2.5]);
    }

    #[test]
    fn table_is_tolerant_of_unknown_names() {
        let reflection = ProgramReflection {
            uniform_block_size: 16,
            uniforms: vec![UniformInfo {
                name: "tint".into(),
                offset: 0,
                kind: UniformKind::Vec3,
            }],
            ..Default::default()
        };
        let table = UniformTable::from_reflection(&reflection);
        let mut block = vec![0u8; table.block_size()];
        assert_eq!(table.write(&mut block, "fog", 1.0f32.into()), UniformWrite::Missing);
        assert_eq!(table.write(&mut block, "tint", 1.0f32.into()), UniformWrite::TypeMismatch);
        assert_eq!(table.write(&mut block, "tint", Vec3::X.into()), UniformWrite::Written);
        assert_eq!(floats(&block)[..3], [1.0, 0.0, 0.0]);
    }

    #[test]
    fn slot_outside_block_is_rejected() {
        let slot = UniformSlot::new(60, UniformKind::Vec4);
        let mut block = vec![0u8; 64];
        assert!(!slot.write(&mut block, Vec4::ONE.into()));
    }
}
