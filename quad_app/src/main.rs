//! Quad demo application
//!
//! Draws a spinning textured quad. The texture is loaded from the PNG given
//! as the first argument, or generated as a checkerboard. Settings come from
//! `quad_demo.toml` when present.

use glfw::{Action, Key, WindowEvent};
use std::process::ExitCode;
use vk_engine::foundation::math::rotation_z;
use vk_engine::prelude::*;

const CONFIG_PATH: &str = "quad_demo.toml";
const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 3, 0];

/// RGBA checkerboard of `cells` x `cells` squares, each `cell_size` pixels wide
fn checkerboard(cells: u32, cell_size: u32) -> (Vec<u8>, u32) {
    let size = cells * cell_size;
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell_size) + (y / cell_size)) % 2 == 0;
            let value = if light { 230 } else { 40 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    (pixels, size)
}

fn load_pixels(path: Option<String>) -> (Vec<u8>, u32, u32) {
    if let Some(path) = path {
        match image::open(&path) {
            Ok(img) => {
                let rgba = img.to_rgba8();
                let (width, height) = rgba.dimensions();
                log::info!("Loaded texture {} ({}x{})", path, width, height);
                return (rgba.into_raw(), width, height);
            }
            Err(e) => log::warn!("Failed to load {}: {}, using checkerboard", path, e),
        }
    }

    let (pixels, size) = checkerboard(8, 16);
    (pixels, size, size)
}

fn load_config() -> RendererConfig {
    match RendererConfig::load_from_file(CONFIG_PATH) {
        Ok(config) => {
            log::info!("Loaded configuration from {}", CONFIG_PATH);
            config
        }
        Err(e) => {
            log::debug!("Using default configuration ({})", e);
            RendererConfig::new("Quad Demo")
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config();
    let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
    let mut renderer = VulkanRenderer::init(&mut window, &config)?;

    let quad = renderer.load_mesh(&Vertex::quad(), &QUAD_INDICES)?;
    let (pixels, width, height) = load_pixels(std::env::args().nth(1));
    match renderer.load_texture(&pixels, width, height) {
        Ok(texture) => renderer.set_mesh_texture(quad, texture)?,
        Err(e) => log::warn!("Texture upload failed: {}, drawing vertex colours only", e),
    }

    let (fb_width, fb_height) = window.framebuffer_size();
    let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 3.0), 45.0, 1.0, 0.1, 100.0);
    camera.set_aspect(fb_width, fb_height);
    renderer.set_view_projection(camera.view_matrix(), camera.projection_matrix());

    let start = window.time();
    while !window.should_close() {
        window.poll_events();
        let events: Vec<_> = window.flush_events().collect();
        for (_, event) in events {
            if let WindowEvent::Key(Key::Escape, _, Action::Press, _) = event {
                window.set_should_close(true);
            }
        }

        // One full turn every eight seconds
        let angle = ((window.time() - start) as f32) * std::f32::consts::FRAC_PI_4;
        renderer.set_transform(quad, rotation_z(angle))?;
        renderer.draw_frame()?;
    }

    log::info!(
        "Window closed ({} frames in flight, {} swapchain images)",
        renderer.frames_in_flight(),
        renderer.image_count()
    );
    renderer.shutdown();
    Ok(())
}

fn main() -> ExitCode {
    vk_engine::foundation::logging::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("quad demo failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
