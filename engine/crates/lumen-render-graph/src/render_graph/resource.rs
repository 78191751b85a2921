//! 资源句柄、资源节点和当前帧的资源表

use ash::vk;
use lumen_gfx::resources::image_desc::GfxImageDesc;

use crate::render_graph::error::RgError;
use crate::render_graph::image_pool::{RgImageKey, RgImageLease, RgLeaseResolver};

/// 当前帧内的资源句柄
///
/// 只在一次 `begin_frame` 到下一次 `begin_frame` 之间有效，
/// 带有签发时的 epoch，跨帧使用会得到 [`RgError::StaleResourceHandle`]。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RgResourceHandle {
    index: u32,
    epoch: u32,
}

impl RgResourceHandle {
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

/// 池化图像的形状
///
/// 形状完全相同的两个请求可以拿到同一张物理图像
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RgImageDesc {
    pub format: vk::Format,
    pub width: u32,
    pub height: u32,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub array_layers: u32,
}

impl RgImageDesc {
    /// aspect 从 format 推断
    #[inline]
    pub fn new_2d(width: u32, height: u32, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            format,
            width,
            height,
            usage,
            aspect: GfxImageDesc::infer_aspect(format),
            array_layers: 1,
        }
    }

    #[inline]
    pub fn with_array_layers(mut self, array_layers: u32) -> Self {
        self.array_layers = array_layers;
        self
    }

    #[inline]
    pub fn with_aspect(mut self, aspect: vk::ImageAspectFlags) -> Self {
        self.aspect = aspect;
        self
    }

    /// 图像池使用的完整物理形状：单 mip、单采样、optimal tiling
    pub fn pool_key(&self) -> RgImageKey {
        GfxImageDesc::new_2d(self.width, self.height, self.format, self.usage)
            .with_aspect(self.aspect)
            .with_array_layers(self.array_layers)
    }
}

/// 资源的来源
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RgResourceSource {
    /// 外部持有的图像，例如 swapchain image
    Persistent,
    /// 编译时从图像池借出
    Pooled { desc: RgImageDesc },
}

/// 当前帧中的一个图像资源
#[derive(Clone, Debug)]
pub struct RgResourceNode {
    pub name: String,
    /// 池化资源在编译前为 None
    pub physical: Option<(vk::Image, vk::ImageView)>,
    /// 每帧开始时资源所处的 layout
    pub initial_layout: vk::ImageLayout,
    pub aspect: vk::ImageAspectFlags,
    pub layer_count: u32,
    pub source: RgResourceSource,

    /// 在执行顺序中第一次和最后一次被使用的位置，没有 Pass 使用时为 None
    pub first_use: Option<usize>,
    pub last_use: Option<usize>,

    pub(crate) lease: Option<RgImageLease>,
}

// new & init
impl RgResourceNode {
    pub fn persistent(
        name: impl Into<String>,
        image: vk::Image,
        view: vk::ImageView,
        current_layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
        layer_count: u32,
    ) -> Self {
        Self {
            name: name.into(),
            physical: Some((image, view)),
            initial_layout: current_layout,
            aspect,
            layer_count,
            source: RgResourceSource::Persistent,
            first_use: None,
            last_use: None,
            lease: None,
        }
    }

    pub fn pooled(name: impl Into<String>, desc: RgImageDesc) -> Self {
        Self {
            name: name.into(),
            physical: None,
            initial_layout: vk::ImageLayout::UNDEFINED,
            aspect: desc.aspect,
            layer_count: desc.array_layers,
            source: RgResourceSource::Pooled { desc },
            first_use: None,
            last_use: None,
            lease: None,
        }
    }
}

// getters
impl RgResourceNode {
    #[inline]
    pub fn is_pooled(&self) -> bool {
        matches!(self.source, RgResourceSource::Pooled { .. })
    }

    /// (first_use, last_use)
    #[inline]
    pub fn lifetime(&self) -> Option<(usize, usize)> {
        self.first_use.zip(self.last_use)
    }

    /// 池化资源每次都通过 lease 向池查询，lease 失效后返回 None
    pub(crate) fn resolve_physical(&self, images: &dyn RgLeaseResolver) -> Option<(vk::Image, vk::ImageView)> {
        match &self.lease {
            Some(lease) => images.resolve_lease(lease),
            None if self.is_pooled() => None,
            None => self.physical,
        }
    }

    /// 在执行顺序的位置 `position` 上被使用
    pub(crate) fn touch(&mut self, position: usize) {
        self.first_use = Some(self.first_use.map_or(position, |first| first.min(position)));
        self.last_use = Some(self.last_use.map_or(position, |last| last.max(position)));
    }
}

/// 当前帧的资源表
///
/// 每次 `clear` 都会推进 epoch，之前签发的句柄随之失效
#[derive(Default)]
pub struct RgResourceRegistry {
    nodes: Vec<RgResourceNode>,
    epoch: u32,
}

impl RgResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node: RgResourceNode) -> RgResourceHandle {
        let index = self.nodes.len() as u32;
        self.nodes.push(node);
        RgResourceHandle {
            index,
            epoch: self.epoch,
        }
    }

    /// 检查句柄属于当前帧并且存在
    pub fn validate(&self, handle: RgResourceHandle) -> Result<usize, RgError> {
        if handle.epoch != self.epoch {
            return Err(RgError::StaleResourceHandle {
                index: handle.index,
                epoch: handle.epoch,
                current: self.epoch,
            });
        }
        if handle.index() >= self.nodes.len() {
            return Err(RgError::InvalidResource { index: handle.index });
        }
        Ok(handle.index())
    }

    pub fn get(&self, handle: RgResourceHandle) -> Result<&RgResourceNode, RgError> {
        let index = self.validate(handle)?;
        Ok(&self.nodes[index])
    }

    #[inline]
    pub fn node(&self, index: usize) -> Option<&RgResourceNode> {
        self.nodes.get(index)
    }

    #[inline]
    pub fn node_mut(&mut self, index: usize) -> Option<&mut RgResourceNode> {
        self.nodes.get_mut(index)
    }

    #[inline]
    pub fn iter(&self) -> std::slice::Iter<'_, RgResourceNode> {
        self.nodes.iter()
    }

    #[inline]
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, RgResourceNode> {
        self.nodes.iter_mut()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }

    /// 丢弃所有资源并推进 epoch
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.epoch = self.epoch.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_detected() {
        let mut registry = RgResourceRegistry::new();
        let old = registry.register(RgResourceNode::pooled(
            "depth",
            RgImageDesc::new_2d(1920, 1080, vk::Format::D32_SFLOAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
        ));
        assert!(registry.get(old).is_ok());

        registry.clear();
        let new = registry.register(RgResourceNode::pooled(
            "depth",
            RgImageDesc::new_2d(1920, 1080, vk::Format::D32_SFLOAT, vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT),
        ));
        assert_eq!(old.index(), new.index());
        assert!(matches!(registry.get(old), Err(RgError::StaleResourceHandle { .. })));
        assert!(registry.get(new).is_ok());
    }

    #[test]
    fn test_lifetime_touch() {
        let mut node = RgResourceNode::persistent(
            "swapchain",
            vk::Image::null(),
            vk::ImageView::null(),
            vk::ImageLayout::UNDEFINED,
            vk::ImageAspectFlags::COLOR,
            1,
        );
        assert_eq!(node.lifetime(), None);
        node.touch(2);
        node.touch(0);
        node.touch(1);
        assert_eq!(node.lifetime(), Some((0, 2)));
    }

    #[test]
    fn test_pool_key_from_desc() {
        let desc = RgImageDesc::new_2d(2048, 2048, vk::Format::D32_SFLOAT, vk::ImageUsageFlags::SAMPLED)
            .with_array_layers(4);
        let key = desc.pool_key();
        assert_eq!(key.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(key.array_layers, 4);
        assert_eq!(key.mip_levels, 1);
        assert_eq!(key.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(key.tiling, vk::ImageTiling::OPTIMAL);
    }
}
