use ash::vk;
use itertools::Itertools;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use crate::commands::command_encoder::GfxCommandEncoder;

/// 命令缓冲封装
///
/// 只借用外部已经分配、并且已经 begin 的 `vk::CommandBuffer`，
/// 不负责它的分配、begin/end 和提交。
///
/// # 使用示例
/// ```ignore
/// let cmd = GfxCommandBuffer::new(device.clone(), vk_cmd, Some(debug_utils.clone()));
/// render_graph.execute(&cmd)?;
/// ```
#[derive(Clone)]
pub struct GfxCommandBuffer {
    vk_handle: vk::CommandBuffer,
    device: ash::Device,
    /// 没有启用 `VK_EXT_debug_utils` 时为 None，label 会被忽略
    debug_utils: Option<ash::ext::debug_utils::Device>,
}
// new & init
impl GfxCommandBuffer {
    pub fn new(
        device: ash::Device,
        vk_handle: vk::CommandBuffer,
        debug_utils: Option<ash::ext::debug_utils::Device>,
    ) -> Self {
        Self {
            vk_handle,
            device,
            debug_utils,
        }
    }
}
impl GfxCommandEncoder for GfxCommandBuffer {
    #[inline]
    fn pipeline_barrier2(&self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
        let image_barriers = image_barriers.iter().map(|b| *b.inner()).collect_vec();
        let buffer_barriers = buffer_barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info = vk::DependencyInfo::default()
            .image_memory_barriers(&image_barriers)
            .buffer_memory_barriers(&buffer_barriers);
        unsafe {
            self.device.cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(label_name) else {
            log::warn!("debug label contains NUL byte: {label_name:?}");
            return;
        };
        unsafe {
            debug_utils.cmd_begin_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    fn end_label(&self) {
        if let Some(debug_utils) = &self.debug_utils {
            unsafe {
                debug_utils.cmd_end_debug_utils_label(self.vk_handle);
            }
        }
    }

    #[inline]
    fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }
}
