//! Lumen 的 Vulkan 封装层
//!
//! 只包含 render graph 实际会触碰的那一小部分 Vulkan 能力：
//!
//! - [`commands`]: barrier 构建器，以及命令录制的抽象 [`commands::command_encoder::GfxCommandEncoder`]
//! - [`resources`]: 池化图像的描述与分配器抽象 [`resources::image_allocator::GfxImageAllocator`]
//!
//! 设备、队列、swapchain 的创建都不在这里，由上层注入 `ash::Device` 和 `vk_mem::Allocator`。

pub mod basic;
pub mod commands;
pub mod error;
pub mod resources;

pub use error::GfxError;
