use ash::vk;

/// GFX 层的错误
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// headless 分配器达到了容量上限
    #[error("headless image allocator exhausted: {capacity} images alive")]
    HeadlessCapacityExceeded { capacity: usize },
}
