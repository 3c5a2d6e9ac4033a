// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;
mod scene;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use ember_core::init_tracing;
use ember_platform::Window;
use ember_render::{RenderError, Renderer, RendererConfig, WindowSurface};
use ember_render_vk::{
    ContextOptions, FrameInfo, FrameUniforms, GlobalUbo, Mesh, SimpleRenderSystem, VkContext,
};
use ember_scene::{IdAllocator, SceneObject};
use glam::Vec3;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,

    /// Exit after this many presented frames
    #[arg(long)]
    frames: Option<u64>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,
}

fn main() -> ExitCode {
    init_tracing();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let cfg = config::load(&args.config);
    let width = args.width.unwrap_or(cfg.window.width);
    let height = args.height.unwrap_or(cfg.window.height);

    let mut window = Window::new(&cfg.window.title, width, height)?;
    let ctx = Arc::new(
        VkContext::new(
            &window,
            &ContextOptions {
                app_name: cfg.window.title.clone(),
                validation: cfg.render.validation,
            },
        )
        .context("vulkan init")?,
    );

    let renderer = Renderer::new(
        ctx.clone(),
        &mut window,
        RendererConfig {
            clear_color: Some(cfg.render.clear_color),
            present_mode: cfg.render.present_mode.into(),
        },
    );
    let mut renderer = match renderer {
        Err(RenderError::WindowClosed) => {
            info!("window closed during startup");
            return Ok(());
        }
        other => other.context("renderer init")?,
    };
    let uniforms = FrameUniforms::new(&ctx)?;
    let system = SimpleRenderSystem::new(
        &ctx,
        renderer.chain().targets().render_pass(),
        uniforms.layout(),
    )?;

    let cube = Arc::new(Mesh::new(&ctx, &scene::CUBE_VERTICES, &scene::CUBE_INDICES)?);
    let mut ids = IdAllocator::new();
    let mut cube_obj = SceneObject::new(&mut ids);
    cube_obj.model = Some(cube);
    cube_obj.color = Vec3::ONE;
    let mut objects = vec![cube_obj];
    info!("scene ready: {} object(s)", objects.len());

    let result = main_loop(
        &mut window,
        &mut renderer,
        &ctx,
        &uniforms,
        &system,
        &mut objects,
        args.frames,
    );
    info!(
        "shutting down, {} chain recreation(s)",
        renderer.recreation_count()
    );
    // renderer waits for the device to go idle before meshes, uniforms and
    // pipelines go
    drop(renderer);
    result
}

fn main_loop(
    window: &mut Window,
    renderer: &mut Renderer<VkContext>,
    ctx: &VkContext,
    uniforms: &FrameUniforms,
    system: &SimpleRenderSystem,
    objects: &mut [SceneObject<Mesh>],
    frame_limit: Option<u64>,
) -> Result<()> {
    let start = Instant::now();
    let mut last_fps = start;
    let mut frames_this_second = 0u32;
    let mut presented = 0u64;

    while !window.should_close() {
        window.poll_events();
        if window.should_close() {
            break;
        }

        let t = start.elapsed().as_secs_f32();
        for obj in objects.iter_mut() {
            scene::spin(&mut obj.transform, t);
        }

        if let Some(cmd) = renderer.begin_frame(window)? {
            let frame_index = renderer.frame_index();
            let view_proj = scene::view_projection(renderer.aspect_ratio(), 2.5);
            uniforms.write(frame_index, &GlobalUbo::new(view_proj))?;
            let frame = FrameInfo {
                frame_index,
                cmd,
                global_set: uniforms.set(frame_index),
            };

            renderer.begin_render_pass(cmd);
            system.render_objects(ctx, &frame, objects);
            renderer.end_render_pass(cmd);
            renderer.end_frame(window)?;

            frames_this_second += 1;
            presented += 1;
        }

        let now = Instant::now();
        if now.duration_since(last_fps).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", frames_this_second);
            frames_this_second = 0;
            last_fps = now;
        }

        if frame_limit.is_some_and(|n| presented >= n) {
            info!("presented {presented} frames, exiting");
            window.request_close();
        }
    }
    Ok(())
}
