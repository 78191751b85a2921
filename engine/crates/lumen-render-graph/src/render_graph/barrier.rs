//! Barrier 调度
//!
//! 跟踪每个资源最近一次已知的 GPU 状态，对每个访问请求判断是否需要 barrier，
//! 并把一个 Pass 之前需要的所有 barrier 合并成一次 `vkCmdPipelineBarrier2`。

use ash::vk;
use lumen_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};
use lumen_gfx::commands::command_encoder::GfxCommandEncoder;

use crate::render_graph::resource_state::{RgBufferState, RgImageState};

/// 一个待提交的图像 barrier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgImageBarrierDesc {
    /// 资源在当前帧中的索引
    pub resource: usize,
    pub image: vk::Image,
    pub aspect: vk::ImageAspectFlags,
    pub layer_count: u32,
    pub src_state: RgImageState,
    pub dst_state: RgImageState,
}

impl RgImageBarrierDesc {
    /// 从 `src` 到 `dst` 是否需要 barrier
    ///
    /// layout 改变，或者任意一端带有写入时需要。只读到只读且 layout 相同时不需要。
    #[inline]
    pub fn needs_barrier(src: &RgImageState, dst: &RgImageState) -> bool {
        src.layout != dst.layout || src.is_write() || dst.is_write()
    }

    pub fn to_gfx_barrier(&self) -> GfxImageBarrier {
        GfxImageBarrier::new()
            .image(self.image)
            .layout_transfer(self.src_state.layout, self.dst_state.layout)
            .src_mask(self.src_state.stage, self.src_state.access)
            .dst_mask(self.dst_state.stage, self.dst_state.access)
            .image_aspect_flag(self.aspect)
            .layer_count(self.layer_count)
    }
}

/// 一个显式的缓冲区 barrier
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgBufferBarrierDesc {
    pub buffer: vk::Buffer,
    pub offset: vk::DeviceSize,
    /// `WHOLE_SIZE` 表示整个缓冲区
    pub size: vk::DeviceSize,
    pub src_state: RgBufferState,
    pub dst_state: RgBufferState,
}

impl RgBufferBarrierDesc {
    pub fn new(buffer: vk::Buffer, src_state: RgBufferState, dst_state: RgBufferState) -> Self {
        Self {
            buffer,
            offset: 0,
            size: vk::WHOLE_SIZE,
            src_state,
            dst_state,
        }
    }

    pub fn to_gfx_barrier(&self) -> GfxBufferBarrier {
        GfxBufferBarrier::new()
            .buffer(self.buffer, self.offset, self.size)
            .src_mask(self.src_state.stage, self.src_state.access)
            .dst_mask(self.dst_state.stage, self.dst_state.access)
    }
}

/// 逐资源的状态跟踪与 barrier 合批
///
/// 只在驱动一帧的线程上使用。
#[derive(Default)]
pub struct RgBarrierScheduler {
    states: Vec<RgImageState>,
    pending_images: Vec<RgImageBarrierDesc>,
    pending_buffers: Vec<RgBufferBarrierDesc>,
}

impl RgBarrierScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 所有资源回到 UNDEFINED / TOP_OF_PIPE / NONE，清空未提交的 barrier
    pub fn reset(&mut self, resource_count: usize) {
        self.states.clear();
        self.states.resize(resource_count, RgImageState::UNDEFINED);
        self.pending_images.clear();
        self.pending_buffers.clear();
    }

    /// 告诉调度器资源当前真实的 GPU 状态，必须在该资源的第一次请求之前调用
    pub fn seed_initial_state(&mut self, resource: usize, state: RgImageState) {
        if let Some(tracked) = self.states.get_mut(resource) {
            *tracked = state;
        }
    }

    /// 请求把资源转换到 `target`，返回是否排入了 barrier
    ///
    /// 不需要 barrier 时，跟踪状态的 stage 和 access 会并入这次请求；
    /// 需要时以跟踪状态为 src、请求为 dst 排入 barrier，然后跟踪状态被请求覆盖。
    pub fn transition_image(
        &mut self,
        resource: usize,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        layer_count: u32,
        target: RgImageState,
    ) -> bool {
        let Some(tracked) = self.states.get_mut(resource) else {
            return false;
        };

        if !RgImageBarrierDesc::needs_barrier(tracked, &target) {
            tracked.stage |= target.stage;
            tracked.access |= target.access;
            return false;
        }

        self.pending_images.push(RgImageBarrierDesc {
            resource,
            image,
            aspect,
            layer_count,
            src_state: *tracked,
            dst_state: target,
        });
        *tracked = target;
        true
    }

    /// 排入一个缓冲区 barrier，和图像 barrier 一起在下一次 flush 时提交
    pub fn add_buffer_barrier(&mut self, barrier: RgBufferBarrierDesc) {
        self.pending_buffers.push(barrier);
    }

    /// 把所有排队的 barrier 作为一次 `pipeline_barrier2` 提交，返回提交的数量
    ///
    /// 队列为空时不录制任何命令
    pub fn flush(&mut self, cmd: &dyn GfxCommandEncoder) -> usize {
        if !self.has_pending_barriers() {
            return 0;
        }

        let image_barriers = self.pending_images.iter().map(RgImageBarrierDesc::to_gfx_barrier).collect::<Vec<_>>();
        let buffer_barriers = self.pending_buffers.iter().map(RgBufferBarrierDesc::to_gfx_barrier).collect::<Vec<_>>();
        cmd.pipeline_barrier2(&image_barriers, &buffer_barriers);

        let count = image_barriers.len() + buffer_barriers.len();
        self.pending_images.clear();
        self.pending_buffers.clear();
        count
    }

    /// 取走排队的 barrier 而不提交，用于打印执行计划
    pub fn take_pending(&mut self) -> (Vec<RgImageBarrierDesc>, Vec<RgBufferBarrierDesc>) {
        (std::mem::take(&mut self.pending_images), std::mem::take(&mut self.pending_buffers))
    }

    #[inline]
    pub fn has_pending_barriers(&self) -> bool {
        !self.pending_images.is_empty() || !self.pending_buffers.is_empty()
    }

    /// 资源当前的跟踪状态
    #[inline]
    pub fn state(&self, resource: usize) -> Option<RgImageState> {
        self.states.get(resource).copied()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use ash::vk::Handle;

    use super::*;

    /// 记录每次 `pipeline_barrier2` 的 (image barrier 数, buffer barrier 数)
    #[derive(Default)]
    struct CountingEncoder {
        batches: RefCell<Vec<(usize, usize)>>,
    }

    impl GfxCommandEncoder for CountingEncoder {
        fn pipeline_barrier2(&self, image_barriers: &[GfxImageBarrier], buffer_barriers: &[GfxBufferBarrier]) {
            self.batches.borrow_mut().push((image_barriers.len(), buffer_barriers.len()));
        }
    }

    fn image() -> vk::Image {
        vk::Image::from_raw(0x10)
    }

    #[test]
    fn test_read_after_read_merges() {
        let mut scheduler = RgBarrierScheduler::new();
        scheduler.reset(1);
        scheduler.seed_initial_state(0, RgImageState::from_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));

        let color = vk::ImageAspectFlags::COLOR;
        assert!(!scheduler.transition_image(0, image(), color, 1, RgImageState::SHADER_READ_FRAGMENT));
        assert!(!scheduler.transition_image(0, image(), color, 1, RgImageState::SHADER_READ_COMPUTE));
        assert!(!scheduler.has_pending_barriers());

        let state = scheduler.state(0).unwrap();
        assert_eq!(
            state.stage,
            vk::PipelineStageFlags2::TOP_OF_PIPE
                | vk::PipelineStageFlags2::FRAGMENT_SHADER
                | vk::PipelineStageFlags2::COMPUTE_SHADER
        );
        assert_eq!(state.access, vk::AccessFlags2::SHADER_SAMPLED_READ);

        let encoder = CountingEncoder::default();
        assert_eq!(scheduler.flush(&encoder), 0);
        assert!(encoder.batches.borrow().is_empty());
    }

    #[test]
    fn test_write_then_read_same_layout_needs_barrier() {
        let mut scheduler = RgBarrierScheduler::new();
        scheduler.reset(1);
        scheduler.seed_initial_state(0, RgImageState::from_layout(vk::ImageLayout::GENERAL));

        let color = vk::ImageAspectFlags::COLOR;
        // layout 一致，但目标是写入
        assert!(scheduler.transition_image(0, image(), color, 1, RgImageState::STORAGE_WRITE_COMPUTE));
        let read = RgImageState::new(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ,
            vk::ImageLayout::GENERAL,
        );
        assert!(scheduler.transition_image(0, image(), color, 1, read));

        let (images, buffers) = scheduler.take_pending();
        assert!(buffers.is_empty());
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].src_state, RgImageState::STORAGE_WRITE_COMPUTE);
        assert_eq!(images[1].dst_state, read);
        assert_eq!(scheduler.state(0), Some(read));
    }

    #[test]
    fn test_write_after_reads_overwrites_tracked_state() {
        let mut scheduler = RgBarrierScheduler::new();
        scheduler.reset(1);
        scheduler.seed_initial_state(0, RgImageState::from_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL));

        let color = vk::ImageAspectFlags::COLOR;
        scheduler.transition_image(0, image(), color, 1, RgImageState::SHADER_READ_FRAGMENT);
        scheduler.transition_image(0, image(), color, 1, RgImageState::SHADER_READ_COMPUTE);
        assert!(scheduler.transition_image(0, image(), color, 1, RgImageState::COLOR_ATTACHMENT_WRITE));

        let (images, _) = scheduler.take_pending();
        // src 带有之前合并的所有读 stage
        assert!(images[0].src_state.stage.contains(vk::PipelineStageFlags2::FRAGMENT_SHADER));
        assert!(images[0].src_state.stage.contains(vk::PipelineStageFlags2::COMPUTE_SHADER));
        assert_eq!(scheduler.state(0), Some(RgImageState::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn test_flush_batches_into_one_call() {
        let mut scheduler = RgBarrierScheduler::new();
        scheduler.reset(2);

        scheduler.transition_image(0, image(), vk::ImageAspectFlags::COLOR, 1, RgImageState::COLOR_ATTACHMENT_WRITE);
        scheduler.transition_image(
            1,
            vk::Image::from_raw(0x20),
            vk::ImageAspectFlags::DEPTH,
            4,
            RgImageState::DEPTH_ATTACHMENT_WRITE,
        );
        scheduler.add_buffer_barrier(RgBufferBarrierDesc::new(
            vk::Buffer::from_raw(0x30),
            RgBufferState::STORAGE_WRITE_COMPUTE,
            RgBufferState::INDIRECT_BUFFER,
        ));

        let encoder = CountingEncoder::default();
        assert_eq!(scheduler.flush(&encoder), 3);
        assert_eq!(*encoder.batches.borrow(), vec![(2, 1)]);
        assert!(!scheduler.has_pending_barriers());

        assert_eq!(scheduler.flush(&encoder), 0);
        assert_eq!(encoder.batches.borrow().len(), 1);
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut scheduler = RgBarrierScheduler::new();
        scheduler.reset(1);
        scheduler.seed_initial_state(5, RgImageState::PRESENT);
        assert!(!scheduler.transition_image(5, image(), vk::ImageAspectFlags::COLOR, 1, RgImageState::PRESENT));
        assert!(!scheduler.has_pending_barriers());
        assert_eq!(scheduler.state(5), None);
        assert_eq!(scheduler.state(0), Some(RgImageState::UNDEFINED));
    }

    #[test]
    fn test_gfx_barrier_covers_layers() {
        let desc = RgImageBarrierDesc {
            resource: 0,
            image: image(),
            aspect: vk::ImageAspectFlags::DEPTH,
            layer_count: 4,
            src_state: RgImageState::UNDEFINED,
            dst_state: RgImageState::DEPTH_ATTACHMENT_WRITE,
        };
        let barrier = desc.to_gfx_barrier();
        let range = barrier.inner().subresource_range;
        assert_eq!(range.layer_count, 4);
        assert_eq!(range.level_count, vk::REMAINING_MIP_LEVELS);
        assert_eq!(range.aspect_mask, vk::ImageAspectFlags::DEPTH);
        assert_eq!(barrier.inner().old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.inner().new_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
    }
}
