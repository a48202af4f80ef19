//! Draw calls grouped into pass buckets by their material's pass.
//!
//! Draw calls are created detached and only drawn once added. Adding and
//! removing are idempotent, and a removed call keeps its resources until
//! destroyed.
//!
//! # Invariants
//! - A draw call is in at most one bucket: the one named by its material.
//! - Buckets iterate in creation order of their draw calls.

use crate::camera::Camera;
use crate::context::RenderContext;
use crate::draw_call::{DrawCall, InstancedDrawCall};
use crate::error::RenderError;
use crate::material::{Material, Pass};
use crate::mesh::GpuMesh;
use crate::shader::Shader;
use glam::Vec3;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Stable handle of a draw call owned by a [`Scene`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawCallId(u64);

impl DrawCallId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
enum SceneCall {
    Single(DrawCall),
    Instanced(InstancedDrawCall),
}

impl SceneCall {
    fn material(&self) -> &Material {
        match self {
            Self::Single(call) => call.material(),
            Self::Instanced(call) => call.material(),
        }
    }

    fn origin(&self) -> Vec3 {
        match self {
            Self::Single(call) => call.origin(),
            Self::Instanced(call) => call.origin(),
        }
    }
}

/// Outcome of drawing one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub drawn: u32,
    pub failed: u32,
}

#[derive(Debug, Default)]
pub struct Scene {
    calls: BTreeMap<DrawCallId, SceneCall>,
    buckets: BTreeMap<Pass, BTreeSet<DrawCallId>>,
    next_id: u64,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, call: SceneCall) -> DrawCallId {
        self.next_id += 1;
        let id = DrawCallId(self.next_id);
        self.calls.insert(id, call);
        id
    }

    /// Create a detached draw call.
    pub fn create_draw_call(&mut self, mesh: GpuMesh, material: Rc<Material>) -> DrawCallId {
        self.insert(SceneCall::Single(DrawCall::new(mesh, material)))
    }

    /// Create a detached instanced draw call with no instances.
    pub fn create_instanced_draw_call(&mut self, mesh: GpuMesh, material: Rc<Material>) -> DrawCallId {
        self.insert(SceneCall::Instanced(InstancedDrawCall::new(mesh, material)))
    }

    /// Attach to the bucket of the call's material pass.
    pub fn add(&mut self, id: DrawCallId) -> Result<(), RenderError> {
        let call = self.calls.get(&id).ok_or(RenderError::UnknownDrawCall(id))?;
        let pass = call.material().pass().clone();
        self.buckets.entry(pass).or_default().insert(id);
        Ok(())
    }

    /// Detach from its bucket. Returns whether it was attached.
    pub fn remove(&mut self, id: DrawCallId) -> bool {
        let Some(call) = self.calls.get(&id) else {
            return false;
        };
        let pass = call.material().pass();
        let Some(bucket) = self.buckets.get_mut(pass) else {
            return false;
        };
        let removed = bucket.remove(&id);
        if bucket.is_empty() {
            self.buckets.remove(pass);
        }
        removed
    }

    pub fn contains(&self, id: DrawCallId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn is_attached(&self, id: DrawCallId) -> bool {
        self.calls
            .get(&id)
            .and_then(|call| self.buckets.get(call.material().pass()))
            .is_some_and(|bucket| bucket.contains(&id))
    }

    /// Detach and free what the call owns.
    pub fn destroy_draw_call(&mut self, ctx: &mut RenderContext, id: DrawCallId) -> Result<(), RenderError> {
        self.remove(id);
        match self.calls.remove(&id) {
            Some(SceneCall::Instanced(mut call)) => {
                call.destroy(ctx);
                Ok(())
            }
            Some(SceneCall::Single(mut call)) => {
                call.destroy(ctx);
                Ok(())
            }
            None => Err(RenderError::UnknownDrawCall(id)),
        }
    }

    pub fn draw_call(&self, id: DrawCallId) -> Option<&DrawCall> {
        match self.calls.get(&id) {
            Some(SceneCall::Single(call)) => Some(call),
            _ => None,
        }
    }

    pub fn draw_call_mut(&mut self, id: DrawCallId) -> Option<&mut DrawCall> {
        match self.calls.get_mut(&id) {
            Some(SceneCall::Single(call)) => Some(call),
            _ => None,
        }
    }

    pub fn instanced(&self, id: DrawCallId) -> Option<&InstancedDrawCall> {
        match self.calls.get(&id) {
            Some(SceneCall::Instanced(call)) => Some(call),
            _ => None,
        }
    }

    pub fn instanced_mut(&mut self, id: DrawCallId) -> Option<&mut InstancedDrawCall> {
        match self.calls.get_mut(&id) {
            Some(SceneCall::Instanced(call)) => Some(call),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Number of attached draw calls in `pass`.
    pub fn pass_len(&self, pass: &Pass) -> usize {
        self.buckets.get(pass).map_or(0, BTreeSet::len)
    }

    pub fn iter_pass(&self, pass: &Pass) -> impl Iterator<Item = DrawCallId> + '_ {
        self.buckets.get(pass).into_iter().flatten().copied()
    }

    /// Passes that currently hold at least one draw call.
    pub fn passes(&self) -> impl Iterator<Item = &Pass> {
        self.buckets.keys()
    }

    /// Ids of `pass`, farthest from the camera first.
    pub fn sort_back_to_front(&self, pass: &Pass, camera: &Camera) -> Vec<DrawCallId> {
        let eye = camera.position();
        let mut ids: Vec<(f32, DrawCallId)> = self
            .iter_pass(pass)
            .filter_map(|id| self.calls.get(&id).map(|call| (call.origin().distance_squared(eye), id)))
            .collect();
        ids.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        ids.into_iter().map(|(_, id)| id).collect()
    }

    /// Draw every call attached to `pass` with `shader`.
    pub fn draw_pass(
        &mut self,
        ctx: &mut RenderContext,
        pass: &Pass,
        shader: &mut Shader,
        camera: &Camera,
        hardware_instancing: bool,
    ) -> PassStats {
        let Scene { calls, buckets, .. } = self;
        let Some(bucket) = buckets.get(pass) else {
            return PassStats::default();
        };
        draw_ids(calls, bucket.iter().copied(), ctx, shader, camera, hardware_instancing)
    }

    /// Draw the given calls in order. Unknown ids are ignored.
    pub fn draw_ordered(
        &mut self,
        ctx: &mut RenderContext,
        ids: &[DrawCallId],
        shader: &mut Shader,
        camera: &Camera,
        hardware_instancing: bool,
    ) -> PassStats {
        draw_ids(&mut self.calls, ids.iter().copied(), ctx, shader, camera, hardware_instancing)
    }

    /// Free every draw call's own resources and empty the scene.
    pub fn destroy(&mut self, ctx: &mut RenderContext) {
        for (_, call) in std::mem::take(&mut self.calls) {
            match call {
                SceneCall::Single(mut call) => call.destroy(ctx),
                SceneCall::Instanced(mut call) => call.destroy(ctx),
            }
        }
        self.buckets.clear();
    }
}

fn draw_ids(
    calls: &mut BTreeMap<DrawCallId, SceneCall>,
    ids: impl Iterator<Item = DrawCallId>,
    ctx: &mut RenderContext,
    shader: &mut Shader,
    camera: &Camera,
    hardware_instancing: bool,
) -> PassStats {
    let mut stats = PassStats::default();
    for id in ids {
        let Some(call) = calls.get_mut(&id) else {
            continue;
        };
        let result = match call {
            SceneCall::Single(call) => call.draw(ctx, shader, camera),
            SceneCall::Instanced(call) => call.draw(ctx, shader, camera, hardware_instancing),
        };
        match result {
            Ok(()) => stats.drawn += 1,
            Err(e) => {
                tracing::warn!(draw_call = id.raw(), shader = shader.label(), "draw call failed: {e}");
                stats.failed += 1;
            }
        }
    }
    stats
}
