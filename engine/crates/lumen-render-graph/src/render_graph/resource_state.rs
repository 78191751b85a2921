//! 资源状态定义
//!
//! 一个状态就是 barrier 两端中的一端：pipeline stage、access mask，图像额外带上 layout。

use ash::vk;

/// 会产生写入的 access 位
///
/// 只要 barrier 任意一端带有其中的位，就必须插入 barrier
pub const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
    vk::AccessFlags2::SHADER_WRITE.as_raw()
        | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
        | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
        | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
        | vk::AccessFlags2::HOST_WRITE.as_raw()
        | vk::AccessFlags2::MEMORY_WRITE.as_raw(),
);

#[inline]
pub fn access_is_write(access: vk::AccessFlags2) -> bool {
    access.intersects(WRITE_ACCESS)
}

const EARLY_LATE_FRAGMENT_TESTS: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
);

/// 图像资源状态
///
/// 描述图像在某个 Pass 中的使用方式，同时也是 barrier 调度器跟踪的状态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgImageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    pub layout: vk::ImageLayout,
}

impl Default for RgImageState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl RgImageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 只知道 layout 时使用，stage 为 TOP_OF_PIPE，没有 access
    ///
    /// 每帧开始时用来描述外部资源的初始状态
    #[inline]
    pub const fn from_layout(layout: vk::ImageLayout) -> Self {
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, layout)
    }

    /// 未定义状态，丢弃之前的内容
    pub const UNDEFINED: Self = Self::from_layout(vk::ImageLayout::UNDEFINED);

    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 颜色附件读写，例如 blend
    pub const COLOR_ATTACHMENT_READ_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    /// 深度附件写入（shadow map、depth prepass）
    pub const DEPTH_ATTACHMENT_WRITE: Self = Self::new(
        EARLY_LATE_FRAGMENT_TESTS,
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
    );

    /// 深度测试但不写入
    pub const DEPTH_READ_ONLY: Self = Self::new(
        EARLY_LATE_FRAGMENT_TESTS,
        vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ,
        vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
    );

    /// 片段着色器采样
    pub const SHADER_READ_FRAGMENT: Self = Self::new(
        vk::PipelineStageFlags2::FRAGMENT_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    /// 计算着色器采样
    pub const SHADER_READ_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_SAMPLED_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    );

    pub const STORAGE_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::SHADER_STORAGE_WRITE,
        vk::ImageLayout::GENERAL,
    );

    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
        vk::ImageLayout::GENERAL,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    /// 交给 present engine
    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    /// 按名字查找预定义状态，名字不区分大小写
    pub fn from_preset_name(name: &str) -> Option<Self> {
        let state = match name.to_ascii_uppercase().as_str() {
            "UNDEFINED" => Self::UNDEFINED,
            "COLOR_ATTACHMENT_WRITE" => Self::COLOR_ATTACHMENT_WRITE,
            "COLOR_ATTACHMENT_READ_WRITE" => Self::COLOR_ATTACHMENT_READ_WRITE,
            "DEPTH_ATTACHMENT_WRITE" => Self::DEPTH_ATTACHMENT_WRITE,
            "DEPTH_READ_ONLY" => Self::DEPTH_READ_ONLY,
            "SHADER_READ_FRAGMENT" => Self::SHADER_READ_FRAGMENT,
            "SHADER_READ_COMPUTE" => Self::SHADER_READ_COMPUTE,
            "STORAGE_WRITE_COMPUTE" => Self::STORAGE_WRITE_COMPUTE,
            "STORAGE_READ_WRITE_COMPUTE" => Self::STORAGE_READ_WRITE_COMPUTE,
            "TRANSFER_SRC" => Self::TRANSFER_SRC,
            "TRANSFER_DST" => Self::TRANSFER_DST,
            "PRESENT" => Self::PRESENT,
            _ => return None,
        };
        Some(state)
    }

    #[inline]
    pub fn is_write(&self) -> bool {
        access_is_write(self.access)
    }
}

/// 缓冲区资源状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RgBufferState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
}

impl Default for RgBufferState {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

// new & 常量定义
impl RgBufferState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    pub const UNDEFINED: Self = Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE);

    pub const VERTEX_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::VERTEX_INPUT, vk::AccessFlags2::VERTEX_ATTRIBUTE_READ);

    pub const INDIRECT_BUFFER: Self =
        Self::new(vk::PipelineStageFlags2::DRAW_INDIRECT, vk::AccessFlags2::INDIRECT_COMMAND_READ);

    pub const UNIFORM_FRAGMENT: Self =
        Self::new(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::UNIFORM_READ);

    pub const STORAGE_WRITE_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_WRITE);

    pub const TRANSFER_DST: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);

    #[inline]
    pub fn is_write(&self) -> bool {
        access_is_write(self.access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_detection() {
        assert!(RgImageState::COLOR_ATTACHMENT_WRITE.is_write());
        assert!(RgImageState::DEPTH_ATTACHMENT_WRITE.is_write());
        assert!(RgImageState::STORAGE_READ_WRITE_COMPUTE.is_write());
        assert!(RgImageState::TRANSFER_DST.is_write());
        assert!(!RgImageState::SHADER_READ_FRAGMENT.is_write());
        assert!(!RgImageState::DEPTH_READ_ONLY.is_write());
        assert!(!RgImageState::PRESENT.is_write());
        assert!(!RgImageState::UNDEFINED.is_write());

        assert!(access_is_write(vk::AccessFlags2::HOST_WRITE));
        assert!(access_is_write(vk::AccessFlags2::SHADER_WRITE));
        assert!(!access_is_write(vk::AccessFlags2::MEMORY_READ));
        assert!(RgBufferState::STORAGE_WRITE_COMPUTE.is_write());
        assert!(!RgBufferState::VERTEX_BUFFER.is_write());
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(RgImageState::from_preset_name("present"), Some(RgImageState::PRESENT));
        assert_eq!(
            RgImageState::from_preset_name("DEPTH_ATTACHMENT_WRITE"),
            Some(RgImageState::DEPTH_ATTACHMENT_WRITE)
        );
        assert_eq!(RgImageState::from_preset_name("not-a-state"), None);
    }

    #[test]
    fn test_from_layout() {
        let state = RgImageState::from_layout(vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(state.stage, vk::PipelineStageFlags2::TOP_OF_PIPE);
        assert_eq!(state.access, vk::AccessFlags2::NONE);
        assert_eq!(state.layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(RgImageState::default(), RgImageState::UNDEFINED);
    }
}
