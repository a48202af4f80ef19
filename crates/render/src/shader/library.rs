//! WGSL sources of the built-in programs.
//!
//! Surface programs share [`SURFACE`] (diffuse on unit 0, decal on unit 1,
//! ambient plus directional lighting) and full-screen programs share
//! [`FULLSCREEN`]. [`super::variant`] joins the pieces per tier.

/// Texture sampling and lighting helpers for surface programs. Expects a
/// uniform block `u` with `ambient_color`, `directional_color` and
/// `directional_aim`.
pub const SURFACE: &str = r#"
@group(1) @binding(0) var diffuse_tex: texture_2d<f32>;
@group(1) @binding(1) var diffuse_sampler: sampler;
@group(1) @binding(2) var decal_tex: texture_2d<f32>;
@group(1) @binding(3) var decal_sampler: sampler;

fn surface_color(uv: vec2<f32>, tint: vec4<f32>) -> vec4<f32> {
    let base = textureSample(diffuse_tex, diffuse_sampler, uv) * tint;
    let decal = textureSample(decal_tex, decal_sampler, uv);
    return vec4<f32>(mix(base.rgb, decal.rgb, decal.a), base.a);
}

fn lambert(normal: vec3<f32>) -> vec3<f32> {
    let n = normalize(normal);
    let diffuse = max(dot(n, -u.directional_aim), 0.0);
    return u.ambient_color + u.directional_color * diffuse;
}
"#;

/// Forward lit surface with decal. Also drawn with blending for the
/// translucent pass.
pub const FORWARD: &str = r#"
struct Uniforms {
    model_view_projection: mat4x4<f32>,
    normal_matrix: mat3x3<f32>,
    ambient_color: vec3<f32>,
    directional_color: vec3<f32>,
    directional_aim: vec3<f32>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec4<f32>,
    @location(3) coordinate: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) color: vec4<f32>,
    @location(2) uv: vec2<f32>,
};

@vertex
fn vs_main(vertex: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.clip_position = u.model_view_projection * vec4<f32>(vertex.position, 1.0);
    out.world_normal = u.normal_matrix * vertex.normal;
    out.color = vertex.color;
    out.uv = vertex.coordinate;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let surface = surface_color(in.uv, in.color);
    return vec4<f32>(surface.rgb * lambert(in.world_normal), surface.a);
}
"#;

/// Forward lit surface taking its model and normal matrices per instance.
pub const FORWARD_INSTANCED: &str = r#"
struct Uniforms {
    view_projection: mat4x4<f32>,
    ambient_color: vec3<f32>,
    directional_color: vec3<f32>,
    directional_aim: vec3<f32>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec4<f32>,
    @location(3) coordinate: vec2<f32>,
};

struct InstanceInput {
    @location(4) model_0: vec4<f32>,
    @location(5) model_1: vec4<f32>,
    @location(6) model_2: vec4<f32>,
    @location(7) model_3: vec4<f32>,
    @location(8) instance_normal_0: vec3<f32>,
    @location(9) instance_normal_1: vec3<f32>,
    @location(10) instance_normal_2: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) color: vec4<f32>,
    @location(2) uv: vec2<f32>,
};

@vertex
fn vs_main(vertex: VertexInput, instance: InstanceInput) -> VertexOutput {
    let model = mat4x4<f32>(instance.model_0, instance.model_1, instance.model_2, instance.model_3);
    let normal_matrix = mat3x3<f32>(instance.instance_normal_0, instance.instance_normal_1, instance.instance_normal_2);

    var out: VertexOutput;
    out.clip_position = u.view_projection * model * vec4<f32>(vertex.position, 1.0);
    out.world_normal = normal_matrix * vertex.normal;
    out.color = vertex.color;
    out.uv = vertex.coordinate;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let surface = surface_color(in.uv, in.color);
    return vec4<f32>(surface.rgb * lambert(in.world_normal), surface.a);
}
"#;

/// G-buffer fill: lit diffuse, view-space normal and view-space position.
/// Position `w` is 1 wherever geometry was written.
pub const GEOMETRY: &str = r#"
struct Uniforms {
    model_view_projection: mat4x4<f32>,
    model_view: mat4x4<f32>,
    normal_matrix: mat3x3<f32>,
    model_view_normal: mat3x3<f32>,
    ambient_color: vec3<f32>,
    directional_color: vec3<f32>,
    directional_aim: vec3<f32>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec4<f32>,
    @location(3) coordinate: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) view_normal: vec3<f32>,
    @location(2) view_position: vec3<f32>,
    @location(3) color: vec4<f32>,
    @location(4) uv: vec2<f32>,
};

struct GeometryOutput {
    @location(0) diffuse: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) position: vec4<f32>,
};

@vertex
fn vs_main(vertex: VertexInput) -> VertexOutput {
    let position = vec4<f32>(vertex.position, 1.0);
    var out: VertexOutput;
    out.clip_position = u.model_view_projection * position;
    out.world_normal = u.normal_matrix * vertex.normal;
    out.view_normal = u.model_view_normal * vertex.normal;
    out.view_position = (u.model_view * position).xyz;
    out.color = vertex.color;
    out.uv = vertex.coordinate;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> GeometryOutput {
    let surface = surface_color(in.uv, in.color);
    var out: GeometryOutput;
    out.diffuse = vec4<f32>(surface.rgb * lambert(in.world_normal), surface.a);
    out.normal = vec4<f32>(normalize(in.view_normal), 1.0);
    out.position = vec4<f32>(in.view_position, 1.0);
    return out;
}
"#;

/// G-buffer fill with per-instance model and normal matrices.
pub const GEOMETRY_INSTANCED: &str = r#"
struct Uniforms {
    view: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    view_normal: mat3x3<f32>,
    ambient_color: vec3<f32>,
    directional_color: vec3<f32>,
    directional_aim: vec3<f32>,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) normal: vec3<f32>,
    @location(2) color: vec4<f32>,
    @location(3) coordinate: vec2<f32>,
};

struct InstanceInput {
    @location(4) model_0: vec4<f32>,
    @location(5) model_1: vec4<f32>,
    @location(6) model_2: vec4<f32>,
    @location(7) model_3: vec4<f32>,
    @location(8) instance_normal_0: vec3<f32>,
    @location(9) instance_normal_1: vec3<f32>,
    @location(10) instance_normal_2: vec3<f32>,
};

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) world_normal: vec3<f32>,
    @location(1) view_normal: vec3<f32>,
    @location(2) view_position: vec3<f32>,
    @location(3) color: vec4<f32>,
    @location(4) uv: vec2<f32>,
};

struct GeometryOutput {
    @location(0) diffuse: vec4<f32>,
    @location(1) normal: vec4<f32>,
    @location(2) position: vec4<f32>,
};

@vertex
fn vs_main(vertex: VertexInput, instance: InstanceInput) -> VertexOutput {
    let model = mat4x4<f32>(instance.model_0, instance.model_1, instance.model_2, instance.model_3);
    let normal_matrix = mat3x3<f32>(instance.instance_normal_0, instance.instance_normal_1, instance.instance_normal_2);
    let world = model * vec4<f32>(vertex.position, 1.0);
    let world_normal = normal_matrix * vertex.normal;

    var out: VertexOutput;
    out.clip_position = u.view_projection * world;
    out.world_normal = world_normal;
    out.view_normal = u.view_normal * world_normal;
    out.view_position = (u.view * world).xyz;
    out.color = vertex.color;
    out.uv = vertex.coordinate;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> GeometryOutput {
    let surface = surface_color(in.uv, in.color);
    var out: GeometryOutput;
    out.diffuse = vec4<f32>(surface.rgb * lambert(in.world_normal), surface.a);
    out.normal = vec4<f32>(normalize(in.view_normal), 1.0);
    out.position = vec4<f32>(in.view_position, 1.0);
    return out;
}
"#;

/// Vertex stage of full-screen programs, fed by the context's quad.
pub const FULLSCREEN: &str = r#"
struct FullscreenOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>) -> FullscreenOutput {
    var out: FullscreenOutput;
    out.clip_position = vec4<f32>(position, 0.0, 1.0);
    out.uv = vec2<f32>(position.x * 0.5 + 0.5, 0.5 - position.y * 0.5);
    return out;
}
"#;

/// Screen-space ambient occlusion over the G-buffer normal (unit 0) and
/// position (unit 1). Unit 2 is the kernel table, unit 3 the rotation
/// table. Needs an `AO_MAX_SAMPLES` constant.
pub const OCCLUSION: &str = r#"
struct Uniforms {
    ao_samples: i32,
    ao_bias: f32,
    ao_epsilon: f32,
    ao_density: f32,
    ao_falloff: f32,
    dither_side: i32,
};

@group(0) @binding(0)
var<uniform> u: Uniforms;

@group(1) @binding(0) var normal_tex: texture_2d<f32>;
@group(1) @binding(1) var normal_sampler: sampler;
@group(1) @binding(2) var position_tex: texture_2d<f32>;
@group(1) @binding(3) var position_sampler: sampler;
@group(1) @binding(4) var kernel_table: texture_2d<f32>;
@group(1) @binding(6) var rotation_table: texture_2d<f32>;

@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let center = textureSampleLevel(position_tex, position_sampler, in.uv, 0.0);
    if center.w == 0.0 {
        return vec4<f32>(1.0);
    }
    let normal = normalize(textureSampleLevel(normal_tex, normal_sampler, in.uv, 0.0).xyz);

    let pixel = vec2<i32>(in.clip_position.xy);
    let dither = max(u.dither_side, 1);
    let index = (pixel.x % dither) + (pixel.y % dither) * dither;
    let r = textureLoad(rotation_table, vec2<i32>(index, 0), 0);
    let rotation = mat2x2<f32>(r.xy, r.zw);

    let depth = max(-center.z, 0.0001);
    let count = clamp(u.ao_samples, 1, AO_MAX_SAMPLES);
    var sum = 0.0;
    for (var i = 0; i < count; i++) {
        let offset = rotation * textureLoad(kernel_table, vec2<i32>(i, 0), 0).xy;
        let uv = in.uv + offset * vec2<f32>(0.5, -0.5) / depth;
        let occluder = textureSampleLevel(position_tex, position_sampler, uv, 0.0).xyz;
        let v = occluder - center.xyz;
        sum += max(dot(v, normal) + u.ao_bias, 0.0) / (dot(v, v) + u.ao_epsilon);
    }
    let ao = pow(clamp(1.0 - u.ao_density * sum / f32(count), 0.0, 1.0), u.ao_falloff);
    return vec4<f32>(ao, ao, ao, 1.0);
}
"#;

/// Copies unit 0 into the target.
pub const COMPOSE_COPY: &str = r#"
@group(1) @binding(0) var source_tex: texture_2d<f32>;
@group(1) @binding(1) var source_sampler: sampler;

@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    return textureSample(source_tex, source_sampler, in.uv);
}
"#;

/// Writes full brightness; drawn stencil-masked over empty pixels.
pub const COMPOSE_MASK: &str = r#"
@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    return vec4<f32>(1.0);
}
"#;

/// Multiplies the diffuse attachment (unit 0) by the composed occlusion
/// (unit 1).
pub const FINAL_BLEND: &str = r#"
@group(1) @binding(0) var diffuse_tex: texture_2d<f32>;
@group(1) @binding(1) var diffuse_sampler: sampler;
@group(1) @binding(2) var occlusion_tex: texture_2d<f32>;
@group(1) @binding(3) var occlusion_sampler: sampler;

@fragment
fn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> {
    let diffuse = textureSample(diffuse_tex, diffuse_sampler, in.uv);
    let ao = textureSample(occlusion_tex, occlusion_sampler, in.uv).r;
    return vec4<f32>(diffuse.rgb * ao, 1.0);
}
"#;
