//! WGSL sources for the three compute kernels and the billboard pass.
//!
//! Struct layouts here match [`ParticleCounter`](crate::counter::ParticleCounter),
//! [`IndirectArgs`](crate::counter::IndirectArgs),
//! [`TickParams`](crate::stages::TickParams),
//! [`EmitterGpu`](crate::emitter::EmitterGpu),
//! [`GpuParticle`](crate::particle::GpuParticle) and
//! [`RenderParticle`](crate::particle::RenderParticle).
//!
//! The alive generation bit stored in the counter selects the lists:
//! `alive_list_{bit}` is read this tick, the other one is written.

/// Structs and helpers shared by the compute modules.
const COMMON_WGSL: &str = r#"
struct TickParams {
    delta_time: f32,
    requested_spawn: u32,
    seed: u32,
    frame: u32,
    random_pack: vec4<f32>,
};

struct Counter {
    dead_count: atomic<u32>,
    alive_count: atomic<u32>,
    alive_count_after_sim: atomic<u32>,
    emit_count: atomic<u32>,
    alive_flip_bit: atomic<u32>,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
};
"#;

/// Kickoff: one invocation sizes the indirect dispatches and flips the
/// alive generation.
pub fn kickoff_wgsl(workgroup_size: u32) -> String {
    format!(
        r#"{common}
struct DispatchArgs {{
    emit_x: u32,
    emit_y: u32,
    emit_z: u32,
    simulate_x: u32,
    simulate_y: u32,
    simulate_z: u32,
    alive_flip_bit: u32,
    _pad: u32,
}};

const WORKGROUP_SIZE: u32 = {workgroup_size}u;

@group(0) @binding(0)
var<uniform> params: TickParams;

@group(0) @binding(1)
var<storage, read_write> counter: Counter;

@group(0) @binding(2)
var<storage, read_write> dispatch_args: DispatchArgs;

fn group_count(n: u32) -> u32 {{
    return (n + WORKGROUP_SIZE - 1u) / WORKGROUP_SIZE;
}}

@compute @workgroup_size(1)
fn kickoff() {{
    let dead = atomicLoad(&counter.dead_count);
    let survivors = atomicLoad(&counter.alive_count_after_sim);
    let emit_request = min(params.requested_spawn, dead);

    atomicStore(&counter.alive_count, survivors);
    atomicStore(&counter.alive_count_after_sim, 0u);
    atomicStore(&counter.emit_count, emit_request);

    let flip = atomicLoad(&counter.alive_flip_bit) ^ 1u;
    atomicStore(&counter.alive_flip_bit, flip);

    dispatch_args.emit_x = group_count(emit_request);
    dispatch_args.emit_y = 1u;
    dispatch_args.emit_z = 1u;
    dispatch_args.simulate_x = group_count(survivors);
    dispatch_args.simulate_y = 1u;
    dispatch_args.simulate_z = 1u;
    dispatch_args.alive_flip_bit = flip;
}}
"#,
        common = COMMON_WGSL,
        workgroup_size = workgroup_size,
    )
}

/// Emit and Simulate, sharing one set of bindings.
pub fn particle_wgsl(workgroup_size: u32) -> String {
    format!(
        r#"{common}
struct Emitter {{
    position: vec3<f32>,
    spawn_rate: f32,
    rotation: vec4<f32>,
    velocity_min: vec3<f32>,
    life_min: f32,
    velocity_max: vec3<f32>,
    life_max: f32,
    acceleration: vec3<f32>,
    size_min: f32,
    color_min: vec4<f32>,
    color_max: vec4<f32>,
    spawn_radius: f32,
    size_max: f32,
    spawn_gap: f32,
    _pad: f32,
}};

struct Particle {{
    position: vec3<f32>,
    life: f32,
    velocity: vec3<f32>,
    size: f32,
    acceleration: vec3<f32>,
    initial_life: f32,
    color: vec4<f32>,
}};

struct RenderParticle {{
    position: vec3<f32>,
    size: f32,
    color: vec4<f32>,
}};

@group(0) @binding(0)
var<uniform> params: TickParams;

@group(0) @binding(1)
var<uniform> emitter: Emitter;

@group(0) @binding(2)
var<storage, read_write> counter: Counter;

@group(0) @binding(3)
var<storage, read_write> particles: array<Particle>;

@group(0) @binding(4)
var<storage, read_write> dead_list: array<u32>;

@group(0) @binding(5)
var<storage, read_write> alive_list_0: array<u32>;

@group(0) @binding(6)
var<storage, read_write> alive_list_1: array<u32>;

@group(0) @binding(7)
var<storage, read_write> render_0: array<RenderParticle>;

@group(0) @binding(8)
var<storage, read_write> render_1: array<RenderParticle>;

fn hash(n: u32) -> u32 {{
    var x = n;
    x = x ^ (x >> 17u);
    x = x * 0xed5ad4bbu;
    x = x ^ (x >> 11u);
    x = x * 0xac4c1b51u;
    x = x ^ (x >> 15u);
    x = x * 0x31848babu;
    x = x ^ (x >> 14u);
    return x;
}}

fn rand01(seed: u32) -> f32 {{
    return f32(hash(seed)) / 4294967295.0;
}}

fn rand_at(base: u32, k: u32) -> f32 {{
    return fract(rand01(base + k) + params.random_pack[k & 3u]);
}}

fn rotate(q: vec4<f32>, v: vec3<f32>) -> vec3<f32> {{
    let t = 2.0 * cross(q.xyz, v);
    return v + q.w * t + cross(q.xyz, t);
}}

fn spawn_particle(invocation: u32) -> Particle {{
    let base = hash(params.seed ^ hash(invocation + params.frame * 0x9e3779b9u));

    let dir = vec3<f32>(
        rand_at(base, 0u) * 2.0 - 1.0,
        rand_at(base, 1u) * 2.0 - 1.0,
        rand_at(base, 2u) * 2.0 - 1.0,
    );
    let radius = emitter.spawn_radius * rand_at(base, 3u);
    var offset = vec3<f32>(0.0, 0.0, 0.0);
    if length(dir) > 1.0e-4 {{
        offset = normalize(dir) * radius;
    }}

    let t = vec3<f32>(rand_at(base, 4u), rand_at(base, 5u), rand_at(base, 6u));
    let local_velocity = mix(emitter.velocity_min, emitter.velocity_max, t);
    let life = mix(emitter.life_min, emitter.life_max, rand_at(base, 7u));

    var p: Particle;
    p.position = emitter.position + rotate(emitter.rotation, offset);
    p.life = life;
    p.velocity = rotate(emitter.rotation, local_velocity);
    p.size = mix(emitter.size_min, emitter.size_max, rand_at(base, 8u));
    p.acceleration = emitter.acceleration;
    p.initial_life = life;
    p.color = mix(emitter.color_min, emitter.color_max, rand_at(base, 9u));
    return p;
}}

fn to_render(p: Particle) -> RenderParticle {{
    var fade = 0.0;
    if p.initial_life > 0.0 {{
        fade = clamp(p.life / p.initial_life, 0.0, 1.0);
    }}
    var r: RenderParticle;
    r.position = p.position;
    r.size = p.size;
    r.color = vec4<f32>(p.color.rgb, p.color.a * fade);
    return r;
}}

fn read_current(flip: u32, i: u32) -> u32 {{
    if flip == 0u {{
        return alive_list_0[i];
    }}
    return alive_list_1[i];
}}

// Appends to the list not being read this tick, with render state at the
// same compacted position.
fn append_alive(flip: u32, slot: u32, p: Particle) {{
    let k = atomicAdd(&counter.alive_count_after_sim, 1u);
    let r = to_render(p);
    if flip == 0u {{
        alive_list_1[k] = slot;
        render_1[k] = r;
    }} else {{
        alive_list_0[k] = slot;
        render_0[k] = r;
    }}
}}

@compute @workgroup_size({workgroup_size})
fn emit(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let i = global_id.x;
    if i >= atomicLoad(&counter.emit_count) {{
        return;
    }}

    // emit_count <= dead_count, so the pop never underflows.
    let previous = atomicSub(&counter.dead_count, 1u);
    let slot = dead_list[previous - 1u];

    let p = spawn_particle(i);
    particles[slot] = p;
    append_alive(atomicLoad(&counter.alive_flip_bit), slot, p);
}}

@compute @workgroup_size({workgroup_size})
fn simulate(@builtin(global_invocation_id) global_id: vec3<u32>) {{
    let i = global_id.x;
    if i >= atomicLoad(&counter.alive_count) {{
        return;
    }}

    let flip = atomicLoad(&counter.alive_flip_bit);
    let slot = read_current(flip, i);
    let dt = params.delta_time;

    var p = particles[slot];
    p.life = p.life - dt;
    p.velocity = p.velocity + p.acceleration * dt;
    p.position = p.position + p.velocity * dt;
    particles[slot] = p;

    if p.life > 0.0 {{
        append_alive(flip, slot, p);
    }} else {{
        let d = atomicAdd(&counter.dead_count, 1u);
        dead_list[d] = slot;
    }}
}}
"#,
        common = COMMON_WGSL,
        workgroup_size = workgroup_size,
    )
}

/// Camera-facing quads, one instance per alive particle.
///
/// Group 0 holds the camera and the shared sprite, group 1 the emitter's
/// render-visible buffer. Draw with 4 vertices as a triangle strip.
pub const BILLBOARD_WGSL: &str = r#"
struct Camera {
    view_proj: mat4x4<f32>,
    right: vec4<f32>,
    up: vec4<f32>,
};

struct RenderParticle {
    position: vec3<f32>,
    size: f32,
    color: vec4<f32>,
};

@group(0) @binding(0)
var<uniform> camera: Camera;

@group(0) @binding(1)
var sprite: texture_2d<f32>;

@group(0) @binding(2)
var sprite_sampler: sampler;

@group(1) @binding(0)
var<storage, read> instances: array<RenderParticle>;

struct VertexOutput {
    @builtin(position) clip_position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
};

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> VertexOutput {
    // Strip order: (0,0) (1,0) (0,1) (1,1)
    let corner = vec2<f32>(f32(vertex_index & 1u), f32((vertex_index >> 1u) & 1u));
    let offset = corner * 2.0 - 1.0;

    let particle = instances[instance_index];
    let world = particle.position
        + (camera.right.xyz * offset.x + camera.up.xyz * offset.y) * particle.size;

    var out: VertexOutput;
    out.clip_position = camera.view_proj * vec4<f32>(world, 1.0);
    out.uv = vec2<f32>(corner.x, 1.0 - corner.y);
    out.color = particle.color;
    return out;
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = textureSample(sprite, sprite_sampler, in.uv);
    let color = texel * in.color;
    if color.a <= 0.001 {
        discard;
    }
    return color;
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workgroup_size_is_baked_in() {
        let src = particle_wgsl(64);
        assert!(src.contains("@workgroup_size(64)"));
        assert!(kickoff_wgsl(64).contains("const WORKGROUP_SIZE: u32 = 64u;"));
    }

    #[test]
    fn kernels_declare_their_entry_points() {
        let src = particle_wgsl(256);
        assert!(src.contains("fn emit("));
        assert!(src.contains("fn simulate("));
        assert!(kickoff_wgsl(256).contains("fn kickoff("));
    }
}
