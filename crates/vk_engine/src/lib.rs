//! # Vulkan Frame Engine
//!
//! An explicit, low-level frame-rendering engine built directly on Vulkan.
//!
//! ## Features
//!
//! - **Device selection**: queue-family discovery and required-extension checks
//! - **Swapchain negotiation**: format, present mode, extent and image count policies
//! - **Staged uploads**: device-local vertex/index buffers and sampled textures
//! - **Frames in flight**: fence/semaphore protocol pipelining CPU against GPU
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vk_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     vk_engine::foundation::logging::init();
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.window.title, config.window.width, config.window.height)?;
//!     let mut renderer = VulkanRenderer::init(&mut window, &config)?;
//!
//!     let quad = renderer.load_mesh(&Vertex::quad(), &[0, 1, 2, 2, 3, 0])?;
//!     renderer.set_transform(quad, Mat4::identity())?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.draw_frame()?;
//!     }
//!     renderer.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::{
        config::{Config, RendererConfig, ShaderConfig, WindowConfig},
        foundation::math::{Mat4, Vec3},
        render::{
            camera::{Camera, ViewProjection},
            mesh::Vertex,
            vulkan::{
                FrameError, InitError, MeshHandle, ModelHandle, ResourceUploadError,
                SurfaceProvider, TextureHandle, VulkanRenderer, Window,
            },
        },
    };
}
