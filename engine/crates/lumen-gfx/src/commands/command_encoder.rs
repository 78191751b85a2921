use std::cell::Cell;

use ash::vk;

use crate::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};

/// 命令录制目标
///
/// render graph 只通过这个 trait 向外部持有的命令流写入同步命令和 debug label，
/// 从不打开、关闭或提交命令流。Pass 的录制回调同样拿到的是这个 trait。
pub trait GfxCommandEncoder {
    /// 把一批 barrier 作为一次 `vkCmdPipelineBarrier2` 录制
    ///
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    fn pipeline_barrier2(&self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]);

    /// 开始一个 debug label，默认什么都不做
    fn begin_label(&self, _label_name: &str, _label_color: glam::Vec4) {}

    /// 结束当前 debug label，默认什么都不做
    fn end_label(&self) {}

    /// 底层的 `vk::CommandBuffer`，headless 实现返回 null
    fn vk_handle(&self) -> vk::CommandBuffer {
        vk::CommandBuffer::null()
    }
}

/// 只打日志的命令录制目标
///
/// 用于离线检查 render graph 的 barrier 结果，不需要 GPU。
#[derive(Default)]
pub struct GfxLogEncoder {
    batch_count: Cell<usize>,
    image_barrier_count: Cell<usize>,
    buffer_barrier_count: Cell<usize>,
    label_depth: Cell<usize>,
}
// new & init
impl GfxLogEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}
// getters
impl GfxLogEncoder {
    /// 已录制的 `pipeline_barrier2` 次数
    #[inline]
    pub fn batch_count(&self) -> usize {
        self.batch_count.get()
    }

    #[inline]
    pub fn image_barrier_count(&self) -> usize {
        self.image_barrier_count.get()
    }

    #[inline]
    pub fn buffer_barrier_count(&self) -> usize {
        self.buffer_barrier_count.get()
    }
}
impl GfxCommandEncoder for GfxLogEncoder {
    fn pipeline_barrier2(&self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
        let indent = "  ".repeat(self.label_depth.get());
        log::info!(
            "{indent}vkCmdPipelineBarrier2: {} image, {} buffer",
            image_barriers.len(),
            buffer_barriers.len()
        );
        for barrier in image_barriers {
            let inner = barrier.inner();
            log::info!(
                "{indent}  image {:?}: {:?} -> {:?}, stage {:?} -> {:?}, access {:?} -> {:?}, layers {}",
                inner.image,
                inner.old_layout,
                inner.new_layout,
                inner.src_stage_mask,
                inner.dst_stage_mask,
                inner.src_access_mask,
                inner.dst_access_mask,
                inner.subresource_range.layer_count,
            );
        }
        for barrier in buffer_barriers {
            let inner = barrier.inner();
            log::info!(
                "{indent}  buffer {:?} [{}, +{}]: stage {:?} -> {:?}, access {:?} -> {:?}",
                inner.buffer,
                inner.offset,
                inner.size,
                inner.src_stage_mask,
                inner.dst_stage_mask,
                inner.src_access_mask,
                inner.dst_access_mask,
            );
        }

        self.batch_count.set(self.batch_count.get() + 1);
        self.image_barrier_count.set(self.image_barrier_count.get() + image_barriers.len());
        self.buffer_barrier_count.set(self.buffer_barrier_count.get() + buffer_barriers.len());
    }

    fn begin_label(&self, label_name: &str, _label_color: glam::Vec4) {
        log::info!("{}>> {}", "  ".repeat(self.label_depth.get()), label_name);
        self.label_depth.set(self.label_depth.get() + 1);
    }

    fn end_label(&self) {
        self.label_depth.set(self.label_depth.get().saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_encoder_counts_batches() {
        let encoder = GfxLogEncoder::new();
        let image_barriers = [GfxImageBarrier::new(), GfxImageBarrier::new()];
        let buffer_barriers = [GfxBufferBarrier::new()];

        encoder.begin_label("pass", crate::basic::color::LabelColor::COLOR_PASS);
        encoder.pipeline_barrier2(&image_barriers, &buffer_barriers);
        encoder.pipeline_barrier2(&image_barriers[..1], &[]);
        encoder.end_label();

        assert_eq!(encoder.batch_count(), 2);
        assert_eq!(encoder.image_barrier_count(), 3);
        assert_eq!(encoder.buffer_barrier_count(), 1);
        assert!(encoder.vk_handle() == vk::CommandBuffer::null());
    }
}
