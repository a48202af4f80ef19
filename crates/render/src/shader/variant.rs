//! Per-tier program sources.
//!
//! One [`ShaderVariant`] is picked when the pipeline starts; nothing
//! branches on capabilities after that.
//!
//! | tier | variant            | programs                                  |
//! |------|--------------------|-------------------------------------------|
//! | 0    | [`ForwardVariant`]  | forward, forward instanced, translucent   |
//! | 1    | [`ExtendedVariant`] | deferred set, 16 occlusion samples        |
//! | 2    | [`NativeVariant`]   | deferred set, 32 occlusion samples        |

use super::library::{
    COMPOSE_COPY, COMPOSE_MASK, FINAL_BLEND, FORWARD, FORWARD_INSTANCED, FULLSCREEN, GEOMETRY,
    GEOMETRY_INSTANCED, OCCLUSION, SURFACE,
};
use super::{ShaderOptions, ShaderSource};
use std::fmt;

/// The built-in programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramKind {
    Forward,
    ForwardInstanced,
    Translucent,
    Geometry,
    GeometryInstanced,
    GeometryTranslucent,
    Occlusion,
    ComposeCopy,
    ComposeMask,
    FinalBlend,
}

impl ProgramKind {
    pub const ALL: [Self; 10] = [
        Self::Forward,
        Self::ForwardInstanced,
        Self::Translucent,
        Self::Geometry,
        Self::GeometryInstanced,
        Self::GeometryTranslucent,
        Self::Occlusion,
        Self::ComposeCopy,
        Self::ComposeMask,
        Self::FinalBlend,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::ForwardInstanced => "forward_instanced",
            Self::Translucent => "translucent",
            Self::Geometry => "geometry",
            Self::GeometryInstanced => "geometry_instanced",
            Self::GeometryTranslucent => "geometry_translucent",
            Self::Occlusion => "occlusion",
            Self::ComposeCopy => "compose_copy",
            Self::ComposeMask => "compose_mask",
            Self::FinalBlend => "final_blend",
        }
    }

    pub fn options(self) -> ShaderOptions {
        match self {
            Self::Translucent | Self::GeometryTranslucent => ShaderOptions::BLEND,
            Self::Occlusion | Self::ComposeCopy | Self::ComposeMask | Self::FinalBlend => {
                ShaderOptions::POST_PROCESS
            }
            _ => ShaderOptions::OPAQUE,
        }
    }

    /// Part of the deferred pipeline (geometry, occlusion or compose).
    pub fn is_deferred(self) -> bool {
        !matches!(self, Self::Forward | Self::ForwardInstanced | Self::Translucent)
    }
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Program sources for one capability tier.
pub trait ShaderVariant: fmt::Debug {
    fn tier(&self) -> u8;

    /// Source of `kind`, or `None` when this tier never uses it.
    fn source(&self, kind: ProgramKind) -> Option<ShaderSource>;

    /// Upper bound on occlusion kernel samples; zero without occlusion.
    fn max_ao_samples(&self) -> u32 {
        0
    }

    /// Every program this tier builds.
    fn programs(&self) -> Vec<ProgramKind> {
        ProgramKind::ALL
            .into_iter()
            .filter(|&kind| self.source(kind).is_some())
            .collect()
    }
}

/// The variant for `tier`, saturating at the highest.
pub fn for_tier(tier: u8) -> Box<dyn ShaderVariant> {
    match tier {
        0 => Box::new(ForwardVariant),
        1 => Box::new(ExtendedVariant),
        _ => Box::new(NativeVariant),
    }
}

fn surface(kind: ProgramKind, body: &str) -> ShaderSource {
    ShaderSource::new(kind.label(), format!("{body}{SURFACE}"))
}

fn fullscreen(kind: ProgramKind, body: &str) -> ShaderSource {
    ShaderSource::new(kind.label(), format!("{FULLSCREEN}{body}"))
}

fn deferred(kind: ProgramKind, ao_samples: u32) -> Option<ShaderSource> {
    let source = match kind {
        ProgramKind::Geometry | ProgramKind::GeometryTranslucent => surface(kind, GEOMETRY),
        ProgramKind::GeometryInstanced => surface(kind, GEOMETRY_INSTANCED),
        ProgramKind::Occlusion => ShaderSource::new(
            kind.label(),
            format!("const AO_MAX_SAMPLES: i32 = {ao_samples};\n{FULLSCREEN}{OCCLUSION}"),
        ),
        ProgramKind::ComposeCopy => fullscreen(kind, COMPOSE_COPY),
        ProgramKind::ComposeMask => fullscreen(kind, COMPOSE_MASK),
        ProgramKind::FinalBlend => fullscreen(kind, FINAL_BLEND),
        ProgramKind::Forward | ProgramKind::ForwardInstanced | ProgramKind::Translucent => return None,
    };
    Some(source)
}

/// Tier 0: forward lighting only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardVariant;

impl ShaderVariant for ForwardVariant {
    fn tier(&self) -> u8 {
        0
    }

    fn source(&self, kind: ProgramKind) -> Option<ShaderSource> {
        match kind {
            ProgramKind::Forward | ProgramKind::Translucent => Some(surface(kind, FORWARD)),
            ProgramKind::ForwardInstanced => Some(surface(kind, FORWARD_INSTANCED)),
            _ => None,
        }
    }
}

/// Tier 1: deferred with multiple render targets provided as an extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtendedVariant;

impl ExtendedVariant {
    pub const AO_SAMPLES: u32 = 16;
}

impl ShaderVariant for ExtendedVariant {
    fn tier(&self) -> u8 {
        1
    }

    fn source(&self, kind: ProgramKind) -> Option<ShaderSource> {
        deferred(kind, Self::AO_SAMPLES)
    }

    fn max_ao_samples(&self) -> u32 {
        Self::AO_SAMPLES
    }
}

/// Tier 2: deferred with native multiple render targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeVariant;

impl NativeVariant {
    pub const AO_SAMPLES: u32 = 32;
}

impl ShaderVariant for NativeVariant {
    fn tier(&self) -> u8 {
        2
    }

    fn source(&self, kind: ProgramKind) -> Option<ShaderSource> {
        deferred(kind, Self::AO_SAMPLES)
    }

    fn max_ao_samples(&self) -> u32 {
        Self::AO_SAMPLES
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::reflect::{compile, reflect};

    #[test]
    fn forward_tier_has_no_deferred_programs() {
        let programs = ForwardVariant.programs();
        assert_eq!(
            programs,
            [ProgramKind::Forward, ProgramKind::ForwardInstanced, ProgramKind::Translucent]
        );
        assert!(programs.iter().all(|kind| !kind.is_deferred()));
        assert_eq!(ForwardVariant.max_ao_samples(), 0);
    }

    #[test]
    fn deferred_tiers_build_the_deferred_set() {
        for variant in [for_tier(1), for_tier(2)] {
            let programs = variant.programs();
            assert_eq!(programs.len(), 7);
            assert!(programs.iter().all(|kind| kind.is_deferred()));
        }
        assert_eq!(for_tier(9).tier(), 2);
    }

    #[test]
    fn every_program_compiles() {
        for variant in [for_tier(0), for_tier(1), for_tier(2)] {
            for kind in variant.programs() {
                let source = variant.source(kind).unwrap();
                if let Err(e) = compile(&source) {
                    panic!("{kind} (tier {}) failed: {e}", variant.tier());
                }
            }
        }
    }

    #[test]
    fn instanced_programs_expose_matrix_attributes() {
        for source in [
            ForwardVariant.source(ProgramKind::ForwardInstanced).unwrap(),
            NativeVariant.source(ProgramKind::GeometryInstanced).unwrap(),
        ] {
            let (module, _) = compile(&source).unwrap();
            let reflection = reflect(&module);
            let model = reflection.attribute("model").unwrap();
            assert_eq!((model.location, model.kind), (4, crate::shader::AttributeKind::Mat4));
            let normal = reflection.attribute("instance_normal").unwrap();
            assert_eq!((normal.location, normal.kind), (8, crate::shader::AttributeKind::Mat3));
        }
    }

    #[test]
    fn occlusion_reflects_tables_without_samplers() {
        let (module, _) = compile(&ExtendedVariant.source(ProgramKind::Occlusion).unwrap()).unwrap();
        let reflection = reflect(&module);
        let units: Vec<_> = reflection.textures.iter().map(|t| (t.unit, t.has_sampler)).collect();
        assert_eq!(units, [(0, true), (1, true), (2, false), (3, false)]);
        assert!(reflection.uniform("ao_samples").is_some());
    }

    #[test]
    fn translucent_programs_blend() {
        assert!(ProgramKind::Translucent.options().blend);
        assert!(ProgramKind::GeometryTranslucent.options().blend);
        assert!(ProgramKind::FinalBlend.options().post_process);
        assert_eq!(ProgramKind::Forward.options(), ShaderOptions::OPAQUE);
    }
}
