use std::{env, fs, path::PathBuf};

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());

    // Vertex layout must match `Vertex` in src/mesh.rs:
    //   - binding 0, location 0: R32G32B32_SFLOAT (position)
    //   - binding 0, location 1: R32G32B32_SFLOAT (color)
    // Set 0 binding 0 must match `GlobalUbo` in src/uniforms.rs.
    // Push block must match `PushConstants` in src/render_system.rs.
    let vs_src = r#"
#version 450
layout(location = 0) in vec3 position;
layout(location = 1) in vec3 color;

layout(set = 0, binding = 0) uniform GlobalUbo {
    mat4 viewProjection;
} ubo;

layout(push_constant) uniform Push {
    mat4 transform;
    vec4 color;
} push;

layout(location = 0) out vec3 fragColor;

void main() {
    gl_Position = ubo.viewProjection * push.transform * vec4(position, 1.0);
    fragColor = color * push.color.rgb;
}
"#;

    let fs_src = r#"
#version 450
layout(location = 0) in vec3 fragColor;

layout(push_constant) uniform Push {
    mat4 transform;
    vec4 color;
} push;

layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(fragColor, push.color.a);
}
"#;

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    for (src, kind, name) in [
        (vs_src, shaderc::ShaderKind::Vertex, "simple.vert"),
        (fs_src, shaderc::ShaderKind::Fragment, "simple.frag"),
    ] {
        let spv = comp
            .compile_into_spirv(src, kind, name, "main", Some(&opts))
            .unwrap_or_else(|e| panic!("{name}: {e}"));
        fs::write(out.join(format!("{name}.spv")), spv.as_binary_u8()).unwrap();
    }

    println!("cargo:rerun-if-changed=build.rs");
}
