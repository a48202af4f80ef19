//! Program introspection.
//!
//! Programs are WGSL modules holding a `vs_main` vertex entry point and an
//! `fs_main` fragment entry point. Binding conventions:
//!
//! - the uniform block is the `var<uniform>` at `@group(0) @binding(0)`;
//!   its struct members are the program's uniforms;
//! - sampler unit `u` is the texture at `@group(1) @binding(2u)` and its
//!   sampler at `@group(1) @binding(2u + 1)`;
//! - vertex inputs are addressed by name. Consecutive inputs `m_0 .. m_3`
//!   (`vec4`) or `m_0 .. m_2` (`vec3`) fold into one matrix attribute `m`
//!   spanning consecutive locations.

use super::ShaderSource;
use crate::gpu::GpuError;
use naga::{AddressSpace, Binding, ImageClass, ResourceBinding, ScalarKind, ShaderStage, TypeInner};

pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";
pub const UNIFORM_GROUP: u32 = 0;
pub const UNIFORM_BINDING: u32 = 0;
pub const TEXTURE_GROUP: u32 = 1;

/// Type of a uniform block member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformKind {
    Float,
    Int,
    UInt,
    Vec2,
    Vec3,
    Vec4,
    Mat3,
    Mat4,
}

impl UniformKind {
    /// Bytes occupied inside the block (WGSL uniform layout).
    pub fn size(self) -> usize {
        match self {
            Self::Float | Self::Int | Self::UInt => 4,
            Self::Vec2 => 8,
            Self::Vec3 => 12,
            Self::Vec4 => 16,
            // Three columns padded to 16 bytes each.
            Self::Mat3 => 48,
            Self::Mat4 => 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformInfo {
    pub name: String,
    pub offset: u32,
    pub kind: UniformKind,
}

/// Type of a vertex input as seen by the binder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    Float,
    Vec2,
    Vec3,
    Vec4,
    /// Three consecutive `vec3` slots.
    Mat3,
    /// Four consecutive `vec4` slots.
    Mat4,
}

impl AttributeKind {
    fn from_components(components: u32) -> Option<Self> {
        match components {
            1 => Some(Self::Float),
            2 => Some(Self::Vec2),
            3 => Some(Self::Vec3),
            4 => Some(Self::Vec4),
            _ => None,
        }
    }

    /// Scalar elements per vertex (or per instance).
    pub fn components(self) -> u32 {
        match self {
            Self::Float => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }

    /// Consecutive locations the attribute occupies.
    pub fn slots(self) -> u32 {
        match self {
            Self::Mat3 => 3,
            Self::Mat4 => 4,
            _ => 1,
        }
    }

    /// Components of each slot.
    pub fn slot_components(self) -> u32 {
        match self {
            Self::Mat3 => 3,
            Self::Mat4 => 4,
            other => other.components(),
        }
    }

    pub fn is_matrix(self) -> bool {
        matches!(self, Self::Mat3 | Self::Mat4)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeInfo {
    pub name: String,
    /// First location.
    pub location: u32,
    pub kind: AttributeKind,
}

impl AttributeInfo {
    pub fn components(&self) -> u32 {
        self.kind.components()
    }
}

/// How a texture unit is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Float,
    Depth,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextureSlot {
    pub name: String,
    pub unit: u32,
    pub kind: SampleKind,
    /// Whether the companion sampler binding is declared.
    pub has_sampler: bool,
}

/// Reflected interface of a program.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgramReflection {
    /// Size in bytes of the uniform block; 0 if the program has none.
    pub uniform_block_size: u32,
    pub uniforms: Vec<UniformInfo>,
    /// Sorted by location.
    pub attributes: Vec<AttributeInfo>,
    /// Sorted by unit.
    pub textures: Vec<TextureSlot>,
}

impl ProgramReflection {
    pub fn uniform(&self, name: &str) -> Option<&UniformInfo> {
        self.uniforms.iter().find(|u| u.name == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeInfo> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Name of the attribute covering `location`, if any.
    pub fn attribute_at(&self, location: u32) -> Option<&AttributeInfo> {
        self.attributes
            .iter()
            .find(|a| (a.location..a.location + a.kind.slots()).contains(&location))
    }
}

/// Parse and validate a program, checking both stage entry points exist.
pub fn compile(source: &ShaderSource) -> Result<(naga::Module, naga::valid::ModuleInfo), GpuError> {
    let module = naga::front::wgsl::parse_str(&source.code).map_err(|e| GpuError::Compile {
        label: source.label.clone(),
        message: e.emit_to_string(&source.code),
    })?;

    for (entry, stage) in [(VERTEX_ENTRY, ShaderStage::Vertex), (FRAGMENT_ENTRY, ShaderStage::Fragment)] {
        if !module.entry_points.iter().any(|ep| ep.name == entry && ep.stage == stage) {
            return Err(GpuError::Compile {
                label: source.label.clone(),
                message: format!("missing {stage:?} entry point `{entry}`"),
            });
        }
    }

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| GpuError::Compile {
        label: source.label.clone(),
        message: e.into_inner().to_string(),
    })?;

    Ok((module, info))
}

/// Build the reflection tables of a compiled module.
pub fn reflect(module: &naga::Module) -> ProgramReflection {
    let mut reflection = ProgramReflection::default();

    for (_, var) in module.global_variables.iter() {
        let Some(ResourceBinding { group, binding }) = var.binding else {
            continue;
        };
        let inner = &module.types[var.ty].inner;

        if var.space == AddressSpace::Uniform && group == UNIFORM_GROUP && binding == UNIFORM_BINDING {
            if let TypeInner::Struct { members, span } = inner {
                reflection.uniform_block_size = *span;
                for member in members {
                    let (Some(name), Some(kind)) =
                        (&member.name, uniform_kind(&module.types[member.ty].inner))
                    else {
                        tracing::debug!(member = ?member.name, "skipping unsupported uniform member");
                        continue;
                    };
                    reflection.uniforms.push(UniformInfo {
                        name: name.clone(),
                        offset: member.offset,
                        kind,
                    });
                }
            }
            continue;
        }

        if group != TEXTURE_GROUP {
            continue;
        }
        let unit = binding / 2;
        match inner {
            TypeInner::Image { class, .. } if binding % 2 == 0 => {
                let kind = match class {
                    ImageClass::Depth { .. } => SampleKind::Depth,
                    _ => SampleKind::Float,
                };
                let slot = texture_slot(&mut reflection.textures, unit);
                slot.name = var.name.clone().unwrap_or_default();
                slot.kind = kind;
            }
            TypeInner::Sampler { .. } if binding % 2 == 1 => {
                texture_slot(&mut reflection.textures, unit).has_sampler = true;
            }
            _ => {}
        }
    }
    reflection.textures.sort_by_key(|t| t.unit);

    if let Some(entry) = module
        .entry_points
        .iter()
        .find(|ep| ep.stage == ShaderStage::Vertex && ep.name == VERTEX_ENTRY)
    {
        let mut inputs = Vec::new();
        for arg in &entry.function.arguments {
            match (&arg.binding, &module.types[arg.ty].inner) {
                (Some(binding), inner) => push_input(&mut inputs, arg.name.as_deref(), binding, inner),
                (None, TypeInner::Struct { members, .. }) => {
                    for member in members {
                        if let Some(binding) = &member.binding {
                            let inner = &module.types[member.ty].inner;
                            push_input(&mut inputs, member.name.as_deref(), binding, inner);
                        }
                    }
                }
                _ => {}
            }
        }
        inputs.sort_by_key(|a| a.location);
        reflection.attributes = fold_matrices(inputs);
    }

    reflection
}

fn texture_slot(slots: &mut Vec<TextureSlot>, unit: u32) -> &mut TextureSlot {
    if let Some(pos) = slots.iter().position(|s| s.unit == unit) {
        return &mut slots[pos];
    }
    slots.push(TextureSlot {
        name: String::new(),
        unit,
        kind: SampleKind::Float,
        has_sampler: false,
    });
    let last = slots.len() - 1;
    &mut slots[last]
}

fn uniform_kind(inner: &TypeInner) -> Option<UniformKind> {
    match inner {
        TypeInner::Scalar(scalar) => match scalar.kind {
            ScalarKind::Float => Some(UniformKind::Float),
            ScalarKind::Sint => Some(UniformKind::Int),
            ScalarKind::Uint => Some(UniformKind::UInt),
            _ => None,
        },
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float => {
            match *size as u32 {
                2 => Some(UniformKind::Vec2),
                3 => Some(UniformKind::Vec3),
                4 => Some(UniformKind::Vec4),
                _ => None,
            }
        }
        TypeInner::Matrix { columns, rows, .. } => match (*columns as u32, *rows as u32) {
            (3, 3) => Some(UniformKind::Mat3),
            (4, 4) => Some(UniformKind::Mat4),
            _ => None,
        },
        _ => None,
    }
}

fn push_input(inputs: &mut Vec<AttributeInfo>, name: Option<&str>, binding: &Binding, inner: &TypeInner) {
    let Binding::Location { location, .. } = binding else {
        return;
    };
    let components = match inner {
        TypeInner::Scalar(_) => 1,
        TypeInner::Vector { size, .. } => *size as u32,
        _ => return,
    };
    let Some(kind) = AttributeKind::from_components(components) else {
        return;
    };
    inputs.push(AttributeInfo {
        name: name.unwrap_or_default().to_owned(),
        location: *location,
        kind,
    });
}

/// Fold `m_0 .. m_N` runs into single matrix attributes.
fn fold_matrices(inputs: Vec<AttributeInfo>) -> Vec<AttributeInfo> {
    let mut out = Vec::with_capacity(inputs.len());
    let mut i = 0;
    while i < inputs.len() {
        let first = &inputs[i];
        let folded = first.name.strip_suffix("_0").and_then(|base| {
            let (kind, columns) = match first.kind {
                AttributeKind::Vec4 => (AttributeKind::Mat4, 4),
                AttributeKind::Vec3 => (AttributeKind::Mat3, 3),
                _ => return None,
            };
            let run = (1..columns).all(|c| {
                inputs.get(i + c).is_some_and(|next| {
                    next.kind == first.kind
                        && next.location == first.location + c as u32
                        && next.name == format!("{base}_{c}")
                })
            });
            run.then(|| {
                (
                    AttributeInfo {
                        name: base.to_owned(),
                        location: first.location,
                        kind,
                    },
                    columns,
                )
            })
        });
        match folded {
            Some((attribute, columns)) => {
                out.push(attribute);
                i += columns;
            }
            None => {
                out.push(first.clone());
                i += 1;
            }
        }
    }
    out
}
