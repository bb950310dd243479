//! Error taxonomy for the Vulkan backend
//!
//! Initialization failures abort startup, upload failures abort a single
//! resource load, and frame failures abort the frame loop.

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

impl VulkanError {
    /// Whether the device was lost, the one state nothing can recover from
    pub fn is_device_lost(&self) -> bool {
        matches!(self, Self::Api(vk::Result::ERROR_DEVICE_LOST))
    }
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        Self::Api(result)
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Initialization failures; fatal, never retried
#[derive(Error, Debug)]
pub enum InitError {
    /// The Vulkan loader could not be found or loaded
    #[error("Failed to load Vulkan: {0}")]
    Loader(String),

    /// The instance lacks an extension the surface provider requires
    #[error("Missing instance extension: {0}")]
    MissingInstanceExtension(String),

    /// A requested validation layer is not installed
    #[error("Missing validation layer: {0}")]
    MissingValidationLayer(String),

    /// No enumerated physical device satisfied the requirements
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// The window system could not provide a surface
    #[error("Surface creation failed: {0}")]
    Surface(String),

    /// Logical device creation failed
    #[error("Logical device creation failed: {0}")]
    DeviceCreation(#[source] VulkanError),

    /// Swapchain creation failed
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(#[source] VulkanError),

    /// Render pass, layout or pipeline creation failed
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(#[source] VulkanError),

    /// Shader bytecode could not be loaded
    #[error("Shader {path}: {reason}")]
    Shader {
        /// Path of the offending blob
        path: String,
        /// What went wrong
        reason: String,
    },

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other Vulkan failure during initialization
    #[error(transparent)]
    Vulkan(#[from] VulkanError),
}

/// Failure to load a single mesh or texture; the caller decides whether to go on
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceUploadError {
    /// Vertex, index or pixel data was empty
    #[error("Resource data is empty")]
    EmptyData,

    /// Pixel buffer length does not match `width * height * 4`
    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    PixelSizeMismatch {
        /// Bytes required by the declared dimensions
        expected: usize,
        /// Bytes supplied
        actual: usize,
    },

    /// An index points past the end of the vertex data
    #[error("Index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        /// Offending index value
        index: u32,
        /// Vertices supplied
        vertex_count: usize,
    },

    /// The device cannot sample or attach this format
    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(vk::Format),

    /// Buffer creation, allocation or binding failed
    #[error("Buffer creation failed: {0}")]
    BufferCreation(#[source] VulkanError),

    /// Image creation, allocation or binding failed
    #[error("Image creation failed: {0}")]
    ImageCreation(#[source] VulkanError),

    /// The one-shot transfer submission failed
    #[error("Transfer failed: {0}")]
    Transfer(#[source] VulkanError),

    /// The configured capacity is exhausted
    #[error("Capacity exceeded: at most {limit} {kind}")]
    CapacityExceeded {
        /// Resource kind
        kind: &'static str,
        /// Configured limit
        limit: u32,
    },

    /// A handle refers to a resource that no longer exists
    #[error("Unknown or stale resource handle")]
    UnknownHandle,
}

/// Failure while producing a frame; fatal for the frame loop
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Waiting on or resetting an in-flight fence failed
    #[error("Fence wait failed: {0}")]
    FenceWait(#[source] VulkanError),

    /// Swapchain image acquisition failed
    #[error("Image acquisition failed: {0}")]
    Acquire(#[source] VulkanError),

    /// Command buffer recording failed
    #[error("Command recording failed: {0}")]
    Recording(#[source] VulkanError),

    /// Uniform buffer write failed
    #[error("Uniform update failed: {0}")]
    UniformUpdate(#[source] VulkanError),

    /// Queue submission failed
    #[error("Frame submission failed: {0}")]
    Submission(#[source] VulkanError),

    /// Presentation failed
    #[error("Presentation failed: {0}")]
    Presentation(#[source] VulkanError),
}

impl FrameError {
    /// The underlying Vulkan error
    pub fn source_error(&self) -> &VulkanError {
        match self {
            Self::FenceWait(e)
            | Self::Acquire(e)
            | Self::Recording(e)
            | Self::UniformUpdate(e)
            | Self::Submission(e)
            | Self::Presentation(e) => e,
        }
    }

    /// Whether the device was lost while producing this frame
    pub fn is_device_lost(&self) -> bool {
        self.source_error().is_device_lost()
    }
}
