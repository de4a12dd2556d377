//! WGSL validation and host/device layout agreement.
//!
//! Every generated shader must parse and validate with naga, and every
//! struct shared with the host must have the same byte size on both sides.

use std::mem::size_of;

use cinder::counter::{IndirectArgs, ParticleCounter};
use cinder::emitter::EmitterGpu;
use cinder::gpu::CameraUniform;
use cinder::particle::{GpuParticle, RenderParticle};
use cinder::shaders::{kickoff_wgsl, particle_wgsl, BILLBOARD_WGSL};
use cinder::stages::{Stage, TickParams};

fn validate_wgsl(code: &str) -> Result<naga::Module, String> {
    let module = naga::front::wgsl::parse_str(code)
        .map_err(|e| format!("WGSL parse error: {}", e.emit_to_string(code)))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| format!("WGSL validation error: {:?}", e))?;

    Ok(module)
}

fn struct_span(module: &naga::Module, name: &str) -> u32 {
    module
        .types
        .iter()
        .find_map(|(_, ty)| match (&ty.name, &ty.inner) {
            (Some(n), naga::TypeInner::Struct { span, .. }) if n == name => Some(*span),
            _ => None,
        })
        .unwrap_or_else(|| panic!("struct {} not found", name))
}

fn entry_points(module: &naga::Module) -> Vec<&str> {
    module.entry_points.iter().map(|e| e.name.as_str()).collect()
}

#[test]
fn test_kickoff_shader_validates() {
    for wg in [1, 64, 256] {
        let src = kickoff_wgsl(wg);
        let module = validate_wgsl(&src).expect("kickoff WGSL should be valid");
        assert_eq!(entry_points(&module), vec![Stage::Kickoff.entry_point()]);
    }
}

#[test]
fn test_particle_shader_validates() {
    for wg in [1, 64, 256] {
        let src = particle_wgsl(wg);
        let module = validate_wgsl(&src).expect("particle WGSL should be valid");
        let names = entry_points(&module);
        assert!(names.contains(&Stage::Emit.entry_point()));
        assert!(names.contains(&Stage::Simulate.entry_point()));
    }
}

#[test]
fn test_billboard_shader_validates() {
    let module = validate_wgsl(BILLBOARD_WGSL).expect("billboard WGSL should be valid");
    let names = entry_points(&module);
    assert!(names.contains(&"vs_main"));
    assert!(names.contains(&"fs_main"));
}

#[test]
fn test_compute_layouts_match_host() {
    let kickoff = validate_wgsl(&kickoff_wgsl(256)).unwrap();
    assert_eq!(struct_span(&kickoff, "Counter") as usize, size_of::<ParticleCounter>());
    assert_eq!(struct_span(&kickoff, "DispatchArgs") as usize, size_of::<IndirectArgs>());
    assert_eq!(struct_span(&kickoff, "TickParams") as usize, size_of::<TickParams>());

    let particle = validate_wgsl(&particle_wgsl(256)).unwrap();
    assert_eq!(struct_span(&particle, "Particle") as usize, size_of::<GpuParticle>());
    assert_eq!(struct_span(&particle, "RenderParticle") as usize, size_of::<RenderParticle>());
    assert_eq!(struct_span(&particle, "Emitter") as usize, size_of::<EmitterGpu>());
    assert_eq!(struct_span(&particle, "Counter") as usize, size_of::<ParticleCounter>());
}

#[test]
fn test_billboard_layouts_match_host() {
    let module = validate_wgsl(BILLBOARD_WGSL).unwrap();
    assert_eq!(struct_span(&module, "Camera") as usize, size_of::<CameraUniform>());
    assert_eq!(struct_span(&module, "RenderParticle") as usize, size_of::<RenderParticle>());
}
