// SPDX-License-Identifier: CEPL-1.0
use std::{env, fs, path::PathBuf};

// Vertex layout must match `ember_math::Vertex`:
//   location 0: vec3 position, location 1: vec3 normal, location 2: vec2 uv
// Uniform block must match `ember_math::UniformBlock` (three column-major mat4).
const MESH_VERT: &str = r#"
#version 450
layout(location = 0) in vec3 inPos;
layout(location = 1) in vec3 inNormal;
layout(location = 2) in vec2 inUv;

layout(set = 0, binding = 0) uniform Transforms {
    mat4 model;
    mat4 view;
    mat4 proj;
} u;

layout(location = 0) out vec2 vUv;
layout(location = 1) out vec3 vNormal;

void main() {
    vUv = inUv;
    vNormal = mat3(u.model) * inNormal;
    gl_Position = u.proj * u.view * u.model * vec4(inPos, 1.0);
}
"#;

const MESH_FRAG: &str = r#"
#version 450
layout(set = 0, binding = 1) uniform sampler2D albedo;

layout(location = 0) in vec2 vUv;
layout(location = 1) in vec3 vNormal;
layout(location = 0) out vec4 outColor;

void main() {
    vec3 n = normalize(vNormal);
    float light = 0.35 + 0.65 * max(dot(n, normalize(vec3(0.4, 0.6, 1.0))), 0.0);
    vec4 base = texture(albedo, vUv);
    outColor = vec4(base.rgb * light, base.a);
}
"#;

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR is set by cargo"));

    let comp = shaderc::Compiler::new().expect("shaderc compiler");
    let mut opts = shaderc::CompileOptions::new().expect("shaderc options");
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (MESH_VERT, shaderc::ShaderKind::Vertex, "mesh.vert"),
        (MESH_FRAG, shaderc::ShaderKind::Fragment, "mesh.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8())
            .unwrap_or_else(|e| panic!("writing {name}.spv: {e}"));
    }

    println!("cargo:rerun-if-changed=build.rs");
}
