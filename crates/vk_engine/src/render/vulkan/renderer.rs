//! Public renderer facade
//!
//! [`VulkanRenderer`] owns every GPU object and exposes the load / transform /
//! draw / shutdown surface. Field order is destruction order: resources
//! first, then the pipeline objects, the swapchain, the device, the surface
//! and finally the instance.

use ash::extensions::khr::Swapchain as SwapchainLoader;
use ash::{vk, Device};

use crate::config::RendererConfig;
use crate::foundation::math::{to_cols_array, Mat4};
use crate::render::camera::ViewProjection;
use crate::render::mesh::{Mesh, Vertex};
use crate::render::texture::{Texture, TEXTURE_FORMAT};
use crate::render::vulkan::framebuffer::{choose_depth_format, optimal_tiling_features};
use crate::render::vulkan::{
    device, CommandPool, CommandRecorder, DepthBuffer, DescriptorPool, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorSetWriter, DeviceAllocator, DrawCommand, FrameDevice,
    FrameError, FrameOrchestrator, FrameSync, Framebuffer, GraphicsPipeline, InitError,
    LogicalDevice, OneShotTransfer, RenderPass, ResourceRegistry, ResourceUploadError, Sampler, ShaderModule,
    SurfaceHandle, SurfaceProbe, SurfaceProvider, Swapchain, UniformBuffer, VulkanError,
    VulkanInstance, VulkanResult,
};

slotmap::new_key_type! {
    /// Handle to a mesh loaded with [`VulkanRenderer::load_mesh`]
    pub struct MeshHandle;
    /// Handle to a texture loaded with [`VulkanRenderer::load_texture`]
    pub struct TextureHandle;
    /// Handle to a model loaded with [`VulkanRenderer::load_model`]
    pub struct ModelHandle;
}

/// Per-image and per-slot state the frame loop drives
struct FrameTarget {
    device: Device,
    swapchain_loader: SwapchainLoader,
    swapchain: vk::SwapchainKHR,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    render_pass: vk::RenderPass,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    clear_color: [f32; 4],
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
    uniform_sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<UniformBuffer<ViewProjection>>,
    sync: Vec<FrameSync>,
}

impl FrameTarget {
    fn image_slot<T>(items: &[T], image_index: u32) -> VulkanResult<&T> {
        items
            .get(image_index as usize)
            .ok_or_else(|| VulkanError::InvalidOperation {
                reason: format!("image index {image_index} out of range"),
            })
    }

    fn sync_slot(&self, slot: usize) -> VulkanResult<&FrameSync> {
        self.sync.get(slot).ok_or_else(|| VulkanError::InvalidOperation {
            reason: format!("frame slot {slot} out of range"),
        })
    }
}

impl FrameDevice for FrameTarget {
    fn wait_for_slot(&mut self, slot: usize) -> VulkanResult<()> {
        self.sync_slot(slot)?.in_flight.wait(u64::MAX)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> VulkanResult<()> {
        self.sync_slot(slot)?.in_flight.reset()
    }

    fn acquire_image(&mut self, slot: usize) -> VulkanResult<u32> {
        let semaphore = self.sync_slot(slot)?.image_available.handle();
        let (image_index, suboptimal) = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
        .map_err(VulkanError::Api)?;

        if suboptimal {
            log::trace!("Acquired image {} from a suboptimal swapchain", image_index);
        }
        Ok(image_index)
    }

    fn record(&mut self, image_index: u32, draws: &[DrawCommand]) -> VulkanResult<()> {
        let command_buffer = *Self::image_slot(&self.command_buffers, image_index)?;
        let framebuffer = *Self::image_slot(&self.framebuffers, image_index)?;
        let uniform_set = *Self::image_slot(&self.uniform_sets, image_index)?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };

        let mut recorder = CommandRecorder::new(command_buffer, self.device.clone());
        recorder.begin()?;
        {
            let mut pass =
                recorder.begin_render_pass(self.render_pass, framebuffer, render_area, &clear_values)?;
            pass.bind_pipeline(self.pipeline);
            pass.bind_descriptor_sets(self.pipeline_layout, 0, &[uniform_set]);

            for draw in draws {
                let model = to_cols_array(&draw.model);
                pass.bind_descriptor_sets(self.pipeline_layout, 1, &[draw.texture_set]);
                pass.bind_vertex_buffer(draw.vertex_buffer);
                pass.bind_index_buffer(draw.index_buffer);
                pass.push_constants(
                    self.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&model),
                );
                pass.draw_indexed(draw.index_count);
            }
        }
        recorder.end()?;
        Ok(())
    }

    fn update_uniforms(&mut self, image_index: u32, view_projection: &ViewProjection) -> VulkanResult<()> {
        Self::image_slot(&self.uniforms, image_index)?.write(view_projection)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let sync = self.sync_slot(slot)?;
        let command_buffers = [*Self::image_slot(&self.command_buffers, image_index)?];
        let wait_semaphores = [sync.image_available.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished.handle()];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.queue_submit(
                self.graphics_queue,
                &[submit_info.build()],
                sync.in_flight.handle(),
            )
        }
        .map_err(VulkanError::Api)
    }

    fn present(&mut self, slot: usize, image_index: u32) -> VulkanResult<()> {
        let wait_semaphores = [self.sync_slot(slot)?.render_finished.handle()];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let suboptimal = unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present_info)
        }
        .map_err(VulkanError::Api)?;

        if suboptimal {
            log::trace!("Presented image {} to a suboptimal swapchain", image_index);
        }
        Ok(())
    }
}

/// Allocate a texture's descriptor set and point it at the shared sampler
fn bind_texture(
    pool: &DescriptorPool,
    layout: vk::DescriptorSetLayout,
    sampler: vk::Sampler,
    device: &Device,
    max_textures: u32,
    texture: &Texture,
) -> Result<vk::DescriptorSet, ResourceUploadError> {
    let set = match pool.allocate(&[layout]) {
        Ok(sets) => sets[0],
        Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY)) => {
            return Err(ResourceUploadError::CapacityExceeded {
                kind: "textures",
                limit: max_textures,
            });
        }
        Err(other) => return Err(ResourceUploadError::ImageCreation(other)),
    };

    DescriptorSetWriter::new()
        .write_image(set, 0, texture.view(), sampler)
        .update(device);
    Ok(set)
}

/// The frame-rendering engine
///
/// Created once per window. Meshes and textures are loaded up front, moved
/// with [`set_transform`](Self::set_transform) each frame and drawn with
/// [`draw_frame`](Self::draw_frame).
pub struct VulkanRenderer {
    orchestrator: FrameOrchestrator,
    view_projection: ViewProjection,
    resources: ResourceRegistry,
    max_textures: u32,
    texture_format_supported: bool,
    allocator: DeviceAllocator,
    transfer: OneShotTransfer,
    frame: FrameTarget,
    sampler: Sampler,
    texture_pool: DescriptorPool,
    texture_layout: DescriptorSetLayout,
    // Owners of handles copied into `frame`; only dropped
    _uniform_pool: DescriptorPool,
    _pipeline: GraphicsPipeline,
    _uniform_layout: DescriptorSetLayout,
    _framebuffers: Vec<Framebuffer>,
    _depth: DepthBuffer,
    _render_pass: RenderPass,
    _command_pool: CommandPool,
    swapchain: Swapchain,
    device: LogicalDevice,
    _surface: SurfaceHandle,
    instance: VulkanInstance,
}

impl VulkanRenderer {
    /// Bring up the whole engine for the window behind `provider`
    ///
    /// Order: instance, surface, device selection, logical device,
    /// swapchain, pass and pipeline, per-image resources, per-slot sync.
    /// Anything already created is released if a later step fails.
    pub fn init(provider: &mut impl SurfaceProvider, config: &RendererConfig) -> Result<Self, InitError> {
        config.validate().map_err(|e| InitError::Config(e.to_string()))?;
        log::info!("Initializing renderer for '{}'", config.application_name);

        let instance = VulkanInstance::new(&*provider, &config.application_name, config.validation_enabled())?;
        let surface = SurfaceHandle::new(&instance, provider)?;

        let extensions = device::required_device_extensions(&config.device_extensions);
        let choice = device::select_device(&SurfaceProbe::new(&instance, &surface), &extensions)?;

        let texture_format_supported = optimal_tiling_features(&instance.instance, choice.device, TEXTURE_FORMAT)
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE);
        if !texture_format_supported {
            log::warn!("{:?} cannot be sampled on {}; textures unavailable", TEXTURE_FORMAT, choice.name);
        }
        let depth_format = choose_depth_format(&instance.instance, choice.device).ok_or_else(|| {
            InitError::PipelineCreation(VulkanError::InvalidOperation {
                reason: "no supported depth attachment format".to_string(),
            })
        })?;

        let device = LogicalDevice::new(&instance, &choice, &extensions)?;
        let vk_device = device.device.clone();
        let allocator = DeviceAllocator::new(&instance.instance, choice.device, vk_device.clone());

        let swapchain = Swapchain::new(
            vk_device.clone(),
            device.swapchain_loader.clone(),
            &surface,
            &choice,
            provider.framebuffer_extent(),
        )?;
        let image_count = swapchain.image_count();
        let extent = swapchain.extent();

        let frames_in_flight = config.frames_in_flight.min(image_count);
        if frames_in_flight < config.frames_in_flight {
            log::warn!(
                "frames_in_flight {} exceeds the {} swapchain images, using {}",
                config.frames_in_flight,
                image_count,
                frames_in_flight
            );
        }

        let render_pass = RenderPass::new_forward_pass(vk_device.clone(), swapchain.format().format, depth_format)
            .map_err(InitError::PipelineCreation)?;
        let depth = DepthBuffer::new(allocator.clone(), depth_format, extent).map_err(InitError::PipelineCreation)?;
        let framebuffers = swapchain
            .image_views()
            .iter()
            .map(|&view| {
                Framebuffer::new(vk_device.clone(), render_pass.handle(), &[view, depth.image_view()], extent)
            })
            .collect::<VulkanResult<Vec<_>>>()
            .map_err(InitError::PipelineCreation)?;

        let uniform_layout = DescriptorSetLayoutBuilder::new()
            .add_uniform_buffer(0, vk::ShaderStageFlags::VERTEX)
            .build(&vk_device)
            .map_err(InitError::PipelineCreation)?;
        let texture_layout = DescriptorSetLayoutBuilder::new()
            .add_combined_image_sampler(0, vk::ShaderStageFlags::FRAGMENT)
            .build(&vk_device)
            .map_err(InitError::PipelineCreation)?;

        let pipeline = {
            let vertex = ShaderModule::from_file(vk_device.clone(), &config.shaders.vertex_shader_path)?;
            let fragment = ShaderModule::from_file(vk_device.clone(), &config.shaders.fragment_shader_path)?;
            GraphicsPipeline::new(
                vk_device.clone(),
                render_pass.handle(),
                &vertex,
                &fragment,
                &[uniform_layout.handle(), texture_layout.handle()],
                extent,
            )
            .map_err(InitError::PipelineCreation)?
        };

        let command_pool = CommandPool::new(vk_device.clone(), device.queue_families.graphics)?;
        let command_buffers = command_pool.allocate_command_buffers(image_count as u32)?;

        let uniforms = (0..image_count)
            .map(|_| UniformBuffer::new(allocator.clone(), &ViewProjection::default()))
            .collect::<VulkanResult<Vec<_>>>()?;
        let uniform_pool = DescriptorPool::new(vk_device.clone(), vk::DescriptorType::UNIFORM_BUFFER, image_count as u32)?;
        let uniform_sets = uniform_pool.allocate(&vec![uniform_layout.handle(); image_count])?;
        uniform_sets
            .iter()
            .zip(&uniforms)
            .fold(DescriptorSetWriter::new(), |writer, (&set, uniform)| {
                writer.write_buffer(set, 0, uniform.handle(), uniform.size())
            })
            .update(&vk_device);

        let texture_pool = DescriptorPool::new(
            vk_device.clone(),
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            config.max_textures + 1,
        )?;
        let sampler = Sampler::new_linear_repeat(vk_device.clone())?;

        let sync = FrameSync::create_slots(&vk_device, frames_in_flight)?;
        let transfer = OneShotTransfer::new(vk_device.clone(), device.graphics_queue, command_pool.handle());

        let frame = FrameTarget {
            device: vk_device,
            swapchain_loader: swapchain.loader().clone(),
            swapchain: swapchain.handle(),
            graphics_queue: device.graphics_queue,
            present_queue: device.present_queue,
            render_pass: render_pass.handle(),
            pipeline: pipeline.handle(),
            pipeline_layout: pipeline.layout(),
            extent,
            clear_color: config.clear_color,
            framebuffers: framebuffers.iter().map(Framebuffer::handle).collect(),
            command_buffers,
            uniform_sets,
            uniforms,
            sync,
        };

        let mut renderer = Self {
            orchestrator: FrameOrchestrator::new(frames_in_flight, image_count),
            view_projection: ViewProjection::default(),
            resources: ResourceRegistry::new(config.max_objects, config.max_textures),
            max_textures: config.max_textures,
            texture_format_supported,
            allocator,
            transfer,
            frame,
            sampler,
            texture_pool,
            texture_layout,
            _uniform_pool: uniform_pool,
            _pipeline: pipeline,
            _uniform_layout: uniform_layout,
            _framebuffers: framebuffers,
            _depth: depth,
            _render_pass: render_pass,
            _command_pool: command_pool,
            swapchain,
            device,
            _surface: surface,
            instance,
        };

        // Meshes without a texture sample plain white
        renderer.upload_texture(None).map_err(|e| {
            InitError::Vulkan(VulkanError::InvalidOperation {
                reason: format!("default texture: {e}"),
            })
        })?;

        log::info!(
            "Renderer ready: {} swapchain images, {} frames in flight, validation {}",
            image_count,
            frames_in_flight,
            if renderer.instance.validation_enabled() { "on" } else { "off" }
        );
        Ok(renderer)
    }

    /// Upload `pixels`, or the default texture when `None`
    fn upload_texture(&mut self, pixels: Option<(&[u8], u32, u32)>) -> Result<TextureHandle, ResourceUploadError> {
        if !self.texture_format_supported {
            return Err(ResourceUploadError::UnsupportedFormat(TEXTURE_FORMAT));
        }

        let Self {
            resources,
            allocator,
            transfer,
            texture_pool,
            texture_layout,
            sampler,
            max_textures,
            ..
        } = self;
        let bind = |texture: &Texture| {
            bind_texture(texture_pool, texture_layout.handle(), sampler.handle(), allocator.device(), *max_textures, texture)
        };

        match pixels {
            Some((pixels, width, height)) => resources.load_texture(&*allocator, &*transfer, pixels, width, height, bind),
            None => resources.load_default_texture(&*allocator, &*transfer, bind),
        }
    }

    fn wait_idle(&self) -> Result<(), ResourceUploadError> {
        self.device.wait_idle().map_err(ResourceUploadError::Transfer)
    }

    /// Upload a mesh; it is drawn every frame until destroyed
    pub fn load_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<MeshHandle, ResourceUploadError> {
        self.resources
            .load_mesh(&self.allocator, &self.transfer, vertices, indices)
    }

    /// Upload tightly packed RGBA8 sRGB pixels
    pub fn load_texture(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<TextureHandle, ResourceUploadError> {
        self.upload_texture(Some((pixels, width, height)))
    }

    /// Upload several meshes as one model sharing a transform
    ///
    /// Either every part is uploaded or none is kept.
    pub fn load_model(&mut self, parts: &[(Vec<Vertex>, Vec<u32>)]) -> Result<ModelHandle, ResourceUploadError> {
        self.resources.load_model(&self.allocator, &self.transfer, parts)
    }

    /// Replace a mesh's model transform
    pub fn set_transform(&mut self, mesh: MeshHandle, transform: Mat4) -> Result<(), ResourceUploadError> {
        self.resources.set_transform(mesh, transform)
    }

    /// Sample `texture` when drawing `mesh`
    pub fn set_mesh_texture(&mut self, mesh: MeshHandle, texture: TextureHandle) -> Result<(), ResourceUploadError> {
        self.resources.set_mesh_texture(mesh, texture)
    }

    /// Replace the transform shared by every mesh of a model
    pub fn set_model_transform(&mut self, model: ModelHandle, transform: Mat4) -> Result<(), ResourceUploadError> {
        self.resources.set_model_transform(model, transform)
    }

    /// Set the camera matrices written to the uniform buffer each frame
    pub fn set_view_projection(&mut self, view: Mat4, projection: Mat4) {
        self.view_projection = ViewProjection::new(&view, &projection);
    }

    /// Wait for the device to go idle, then free a mesh
    pub fn destroy_mesh(&mut self, mesh: MeshHandle) -> Result<(), ResourceUploadError> {
        if !self.resources.contains_mesh(mesh) {
            return Err(ResourceUploadError::UnknownHandle);
        }
        self.wait_idle()?;
        self.resources.destroy_mesh(&self.allocator, mesh)
    }

    /// Wait for the device to go idle, then free a model and all its meshes
    pub fn destroy_model(&mut self, model: ModelHandle) -> Result<(), ResourceUploadError> {
        if !self.resources.contains_model(model) {
            return Err(ResourceUploadError::UnknownHandle);
        }
        self.wait_idle()?;
        self.resources.destroy_model(&self.allocator, model)
    }

    /// Record, submit and present one frame containing every loaded mesh
    pub fn draw_frame(&mut self) -> Result<(), FrameError> {
        let draws = self.resources.draw_commands();

        match self.orchestrator.draw_frame(&mut self.frame, &draws, &self.view_projection) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.is_device_lost() {
                    log::error!("Device lost: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Wait for the GPU and release everything; dropping does the same
    pub fn shutdown(self) {
        log::info!("Shutting down renderer");
    }

    /// Slot the next frame will use
    pub fn current_frame(&self) -> usize {
        self.orchestrator.current_frame()
    }

    /// Number of frames in flight after clamping to the image count
    pub fn frames_in_flight(&self) -> usize {
        self.orchestrator.frames_in_flight()
    }

    /// Number of swapchain images
    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    /// Negotiated swapchain extent
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    /// Vertex count of a loaded mesh
    pub fn mesh_vertex_count(&self, mesh: MeshHandle) -> Option<u32> {
        self.resources.mesh(mesh).map(Mesh::vertex_count)
    }

    /// Index count of a loaded mesh
    pub fn mesh_index_count(&self, mesh: MeshHandle) -> Option<u32> {
        self.resources.mesh(mesh).map(Mesh::index_count)
    }

    /// Meshes of a loaded model
    pub fn model_meshes(&self, model: ModelHandle) -> Option<&[MeshHandle]> {
        self.resources.model_meshes(model)
    }

    /// Number of loaded meshes, including model members
    pub fn mesh_count(&self) -> usize {
        self.resources.mesh_count()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::warn!("device_wait_idle failed during shutdown: {}", e);
        }

        self.resources.release_all(&self.allocator);

        log::info!(
            "Renderer released after {} frames",
            self.orchestrator.frames_drawn()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails to compile if the public surface drifts
    #[test]
    fn test_renderer_api_signatures() {
        let _load_mesh: fn(&mut VulkanRenderer, &[Vertex], &[u32]) -> Result<MeshHandle, ResourceUploadError> =
            VulkanRenderer::load_mesh;
        let _load_texture: fn(&mut VulkanRenderer, &[u8], u32, u32) -> Result<TextureHandle, ResourceUploadError> =
            VulkanRenderer::load_texture;
        let _set_transform: fn(&mut VulkanRenderer, MeshHandle, Mat4) -> Result<(), ResourceUploadError> =
            VulkanRenderer::set_transform;
        let _draw_frame: fn(&mut VulkanRenderer) -> Result<(), FrameError> = VulkanRenderer::draw_frame;
        let _shutdown: fn(VulkanRenderer) = VulkanRenderer::shutdown;
    }

    #[test]
    fn test_handles_are_distinct_per_map() {
        let mut meshes: slotmap::SlotMap<MeshHandle, u32> = slotmap::SlotMap::with_key();
        let first = meshes.insert(1);
        meshes.remove(first);
        let second = meshes.insert(2);

        // Stale handles never alias a reused slot
        assert_ne!(first, second);
        assert!(meshes.get(first).is_none());
    }
}
