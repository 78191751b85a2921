use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use ash::vk;
use ash::vk::Handle;
use vk_mem::Alloc;

use crate::error::GfxError;
use crate::resources::image_desc::GfxImageDesc;

/// 分配器创建出的一张图像：image + 默认 view + 后端自己的内存句柄
pub struct GfxAllocatedImage<M> {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub memory: M,
}

/// 图像分配器
///
/// 图像池通过它创建和销毁物理图像，池本身不关心内存来自哪里。
pub trait GfxImageAllocator: Send + Sync {
    /// 后端的内存句柄，和图像一起存放在池里
    type Memory: Send;

    /// 创建 image 以及覆盖全部 mip 和 layer 的 view
    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> Result<GfxAllocatedImage<Self::Memory>, GfxError>;

    /// 销毁 view、image 并归还内存
    ///
    /// 调用者需要保证 GPU 已经不再使用这张图像
    fn destroy_image(&self, image: GfxAllocatedImage<Self::Memory>);
}

/// 基于 VMA 的图像分配器
///
/// 内存使用 `AutoPreferDevice`
pub struct GfxVmaImageAllocator {
    device: ash::Device,
    allocator: Arc<vk_mem::Allocator>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
}
// new & init
impl GfxVmaImageAllocator {
    pub fn new(
        device: ash::Device,
        allocator: Arc<vk_mem::Allocator>,
        debug_utils: Option<ash::ext::debug_utils::Device>,
    ) -> Self {
        Self {
            device,
            allocator,
            debug_utils,
        }
    }
}
// tools
impl GfxVmaImageAllocator {
    fn set_debug_name(&self, handle: impl vk::Handle, name: &str) {
        let Some(debug_utils) = &self.debug_utils else {
            return;
        };
        let Ok(name) = std::ffi::CString::new(name) else {
            return;
        };
        let name_info = vk::DebugUtilsObjectNameInfoEXT::default().object_handle(handle).object_name(name.as_c_str());
        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
            log::warn!("failed to set debug name {:?}: {e:?}", name);
        }
    }
}
impl GfxImageAllocator for GfxVmaImageAllocator {
    type Memory = vk_mem::Allocation;

    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> Result<GfxAllocatedImage<Self::Memory>, GfxError> {
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };
        let (image, mut allocation) = unsafe { self.allocator.create_image(&desc.image_create_info(), &alloc_ci)? };

        let view = match unsafe { self.device.create_image_view(&desc.view_create_info(image), None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe { self.allocator.destroy_image(image, &mut allocation) };
                return Err(e.into());
            }
        };

        self.set_debug_name(image, name);
        self.set_debug_name(view, &format!("{name}-view"));
        log::debug!("create pooled image {}: {}x{} {:?}", name, desc.width, desc.height, desc.format);

        Ok(GfxAllocatedImage {
            image,
            view,
            memory: allocation,
        })
    }

    fn destroy_image(&self, image: GfxAllocatedImage<Self::Memory>) {
        let GfxAllocatedImage {
            image,
            view,
            memory: mut allocation,
        } = image;
        unsafe {
            self.device.destroy_image_view(view, None);
            self.allocator.destroy_image(image, &mut allocation);
        }
    }
}

/// 不接触 GPU 的图像分配器
///
/// 返回递增的伪句柄，用于离线检查 render graph 和单元测试。
/// 设置了 capacity 时，存活图像达到上限后返回 [`GfxError::HeadlessCapacityExceeded`]。
#[derive(Default)]
pub struct GfxHeadlessImageAllocator {
    next_handle: AtomicU64,
    live_count: AtomicUsize,
    created_count: AtomicUsize,
    capacity: Option<usize>,
}
// new & init
impl GfxHeadlessImageAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Default::default()
        }
    }
}
// getters
impl GfxHeadlessImageAllocator {
    /// 当前存活的图像数量
    #[inline]
    pub fn live_count(&self) -> usize {
        self.live_count.load(Ordering::Acquire)
    }

    /// 累计创建过的图像数量
    #[inline]
    pub fn created_count(&self) -> usize {
        self.created_count.load(Ordering::Acquire)
    }
}
impl GfxImageAllocator for GfxHeadlessImageAllocator {
    type Memory = ();

    fn create_image(&self, desc: &GfxImageDesc, name: &str) -> Result<GfxAllocatedImage<()>, GfxError> {
        if let Some(capacity) = self.capacity {
            if self.live_count() >= capacity {
                return Err(GfxError::HeadlessCapacityExceeded { capacity });
            }
        }

        // 0 是 null handle，image 和 view 各占一个奇偶位
        let id = self.next_handle.fetch_add(1, Ordering::AcqRel) + 1;
        self.live_count.fetch_add(1, Ordering::AcqRel);
        self.created_count.fetch_add(1, Ordering::AcqRel);
        log::debug!("create headless image {}: {}x{} {:?}", name, desc.width, desc.height, desc.format);

        Ok(GfxAllocatedImage {
            image: vk::Image::from_raw(id * 2),
            view: vk::ImageView::from_raw(id * 2 + 1),
            memory: (),
        })
    }

    fn destroy_image(&self, image: GfxAllocatedImage<()>) {
        log::debug!("destroy headless image {:?}", image.image);
        self.live_count.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_unique_handles() {
        let allocator = GfxHeadlessImageAllocator::new();
        let desc = GfxImageDesc::default();

        let a = allocator.create_image(&desc, "a").unwrap();
        let b = allocator.create_image(&desc, "b").unwrap();
        assert_ne!(a.image, b.image);
        assert_ne!(a.view, b.view);
        assert!(!a.image.is_null());
        assert_eq!(allocator.live_count(), 2);

        allocator.destroy_image(a);
        assert_eq!(allocator.live_count(), 1);
        assert_eq!(allocator.created_count(), 2);
    }

    #[test]
    fn test_headless_capacity() {
        let allocator = GfxHeadlessImageAllocator::with_capacity(1);
        let desc = GfxImageDesc::default();

        let first = allocator.create_image(&desc, "first").unwrap();
        let err = allocator.create_image(&desc, "second").err().unwrap();
        assert!(matches!(err, GfxError::HeadlessCapacityExceeded { capacity: 1 }));

        allocator.destroy_image(first);
        assert!(allocator.create_image(&desc, "third").is_ok());
    }
}
