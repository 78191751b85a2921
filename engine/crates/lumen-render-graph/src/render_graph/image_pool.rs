//! 池化图像
//!
//! 按完整的物理形状缓存图像，跨帧复用。池独占这些图像的生命周期，
//! render graph 只通过 [`RgImageLease`] 在一次 compile → execute 中借用。

use std::collections::HashMap;

use ash::vk;
use lumen_gfx::resources::image_allocator::{GfxAllocatedImage, GfxImageAllocator};
use lumen_gfx::resources::image_desc::GfxImageDesc;
use parking_lot::Mutex;
use slotmap::SlotMap;

use crate::render_graph::error::RgError;

/// 池的 key：两张图像只要描述完全相同就可以互相替换
pub type RgImageKey = GfxImageDesc;

slotmap::new_key_type! {
    /// 池内条目的 key
    struct RgPooledImageKey;
}

/// 从池中借出的一张图像
///
/// 除了 slot 之外还带有借出序号，归还之后即使条目被重新借出，旧的 lease 也不会再解析成功。
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RgImageLease {
    slot: RgPooledImageKey,
    serial: u64,
}

struct RgPooledImage<M> {
    key: RgImageKey,
    image: GfxAllocatedImage<M>,
    last_used_frame: u64,
    in_use: bool,
    /// 最近一次借出的序号
    serial: u64,
}

impl<M> RgPooledImage<M> {
    #[inline]
    fn is_leased_by(&self, lease: &RgImageLease) -> bool {
        self.in_use && self.serial == lease.serial
    }
}

struct RgImagePoolInner<M> {
    entries: SlotMap<RgPooledImageKey, RgPooledImage<M>>,
    buckets: HashMap<RgImageKey, Vec<RgPooledImageKey>>,
    next_serial: u64,
}

/// 图像池
///
/// 所有操作都在同一把锁内完成，可以通过 `Arc` 在线程之间共享，
/// 例如在另一个线程里为之后的帧预热图像。
pub struct RgImagePool<A: GfxImageAllocator> {
    allocator: A,
    inner: Mutex<RgImagePoolInner<A::Memory>>,
}

// new & init
impl<A: GfxImageAllocator> RgImagePool<A> {
    pub fn new(allocator: A) -> Self {
        Self {
            allocator,
            inner: Mutex::new(RgImagePoolInner {
                entries: SlotMap::with_key(),
                buckets: HashMap::new(),
                next_serial: 0,
            }),
        }
    }
}

// getters
impl<A: GfxImageAllocator> RgImagePool<A> {
    #[inline]
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// 池中图像总数，包括借出的
    pub fn entry_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn in_use_count(&self) -> usize {
        self.inner.lock().entries.values().filter(|entry| entry.in_use).count()
    }

    /// 池中有多少种不同的形状
    pub fn bucket_count(&self) -> usize {
        self.inner.lock().buckets.len()
    }

    /// lease 是否仍然有效
    pub fn contains(&self, lease: &RgImageLease) -> bool {
        let inner = self.inner.lock();
        inner.entries.get(lease.slot).is_some_and(|entry| entry.is_leased_by(lease))
    }

    /// 查询 lease 对应的 image 和 view，lease 已经归还时返回 None
    pub fn resolve(&self, lease: &RgImageLease) -> Option<(vk::Image, vk::ImageView)> {
        let inner = self.inner.lock();
        let entry = inner.entries.get(lease.slot)?;
        entry.is_leased_by(lease).then_some((entry.image.image, entry.image.view))
    }
}

/// 执行期按 lease 查询图像，屏蔽分配器类型
pub(crate) trait RgLeaseResolver {
    fn resolve_lease(&self, lease: &RgImageLease) -> Option<(vk::Image, vk::ImageView)>;
}

impl<A: GfxImageAllocator> RgLeaseResolver for RgImagePool<A> {
    #[inline]
    fn resolve_lease(&self, lease: &RgImageLease) -> Option<(vk::Image, vk::ImageView)> {
        self.resolve(lease)
    }
}

// acquire & release
impl<A: GfxImageAllocator> RgImagePool<A> {
    /// 借出一张形状为 `key` 的图像
    ///
    /// 优先复用没有被借出的条目，否则通过分配器创建一张新的。
    /// `name` 只用于新图像的 debug name。
    pub fn acquire(&self, key: &RgImageKey, frame: u64, name: &str) -> Result<RgImageLease, RgError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        inner.next_serial += 1;
        let serial = inner.next_serial;

        let reusable = inner
            .buckets
            .get(key)
            .and_then(|slots| slots.iter().copied().find(|slot| inner.entries.get(*slot).is_some_and(|e| !e.in_use)));

        let slot = match reusable {
            Some(slot) => slot,
            None => {
                let image = self.allocator.create_image(key, name).map_err(|source| RgError::PoolAllocation {
                    name: name.to_string(),
                    source,
                })?;
                let slot = inner.entries.insert(RgPooledImage {
                    key: *key,
                    image,
                    last_used_frame: frame,
                    in_use: false,
                    serial: 0,
                });
                inner.buckets.entry(*key).or_default().push(slot);
                log::debug!(
                    "image pool: new {}x{} {:?} for \"{}\", {} entries",
                    key.width,
                    key.height,
                    key.format,
                    name,
                    inner.entries.len()
                );
                slot
            }
        };

        let entry = &mut inner.entries[slot];
        entry.in_use = true;
        entry.last_used_frame = frame;
        entry.serial = serial;

        Ok(RgImageLease { slot, serial })
    }

    /// 归还图像，不会销毁
    ///
    /// 已经归还过、或者条目已被回收的 lease 会被忽略
    pub fn release(&self, lease: RgImageLease) {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(lease.slot) {
            Some(entry) if entry.is_leased_by(&lease) => entry.in_use = false,
            _ => log::warn!("image pool: ignore release of stale lease {:?}", lease),
        }
    }
}

// destroy
impl<A: GfxImageAllocator> RgImagePool<A> {
    /// 销毁空闲超过 `idle_frame_threshold` 帧的图像，返回销毁的数量
    ///
    /// 只有 `current_frame - last_used_frame > idle_frame_threshold` 且没有借出的条目才会被销毁
    pub fn evict_idle(&self, current_frame: u64, idle_frame_threshold: u64) -> usize {
        let _span = tracy_client::span!("RgImagePool::evict_idle");

        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = inner
            .entries
            .iter()
            .filter(|(_, entry)| {
                !entry.in_use && current_frame.saturating_sub(entry.last_used_frame) > idle_frame_threshold
            })
            .map(|(slot, _)| slot)
            .collect::<Vec<_>>();

        for slot in &expired {
            let Some(entry) = inner.entries.remove(*slot) else {
                continue;
            };
            if let Some(slots) = inner.buckets.get_mut(&entry.key) {
                slots.retain(|s| s != slot);
                if slots.is_empty() {
                    inner.buckets.remove(&entry.key);
                }
            }
            self.allocator.destroy_image(entry.image);
        }

        if !expired.is_empty() {
            log::debug!("image pool: evicted {} idle images, {} remain", expired.len(), inner.entries.len());
        }
        expired.len()
    }

    /// 销毁池中所有图像，包括仍然借出的
    ///
    /// 调用者需要保证 GPU 上已经没有引用这些图像的工作
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let count = inner.entries.len();
        for (_, entry) in inner.entries.drain() {
            self.allocator.destroy_image(entry.image);
        }
        inner.buckets.clear();

        if count > 0 {
            log::debug!("image pool: shutdown destroyed {} images", count);
        }
    }
}

impl<A: GfxImageAllocator> Drop for RgImagePool<A> {
    fn drop(&mut self) {
        if self.inner.get_mut().entries.is_empty() {
            return;
        }
        log::warn!("image pool dropped without shutdown");
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lumen_gfx::resources::image_allocator::GfxHeadlessImageAllocator;

    use super::*;

    fn depth_key() -> RgImageKey {
        GfxImageDesc::new_2d(
            1920,
            1080,
            vk::Format::D32_SFLOAT,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
    }

    fn color_key() -> RgImageKey {
        GfxImageDesc::new_2d(
            1920,
            1080,
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
        )
    }

    #[test]
    fn test_reuse_after_release() {
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::new());

        let first = pool.acquire(&depth_key(), 0, "depth").unwrap();
        let first_image = pool.resolve(&first).unwrap();
        pool.release(first);

        let second = pool.acquire(&depth_key(), 1, "depth").unwrap();
        assert_eq!(pool.resolve(&second).unwrap(), first_image);
        assert_eq!(pool.entry_count(), 1);
        assert_eq!(pool.allocator().created_count(), 1);
    }

    #[test]
    fn test_in_use_entry_not_shared() {
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::new());

        let a = pool.acquire(&depth_key(), 0, "a").unwrap();
        let b = pool.acquire(&depth_key(), 0, "b").unwrap();
        assert_ne!(pool.resolve(&a), pool.resolve(&b));
        assert_eq!(pool.in_use_count(), 2);

        let c = pool.acquire(&color_key(), 0, "c").unwrap();
        assert_ne!(pool.resolve(&c), pool.resolve(&a));
        assert_eq!(pool.bucket_count(), 2);
    }

    #[test]
    fn test_stale_lease() {
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::new());

        let old = pool.acquire(&depth_key(), 0, "depth").unwrap();
        pool.release(old);
        assert!(pool.resolve(&old).is_none());
        assert!(!pool.contains(&old));

        // 同一个条目被重新借出，旧 lease 依然无效
        let new = pool.acquire(&depth_key(), 1, "depth").unwrap();
        assert!(pool.resolve(&old).is_none());
        assert!(pool.contains(&new));

        // 旧 lease 的 release 不会影响新的借出
        pool.release(old);
        assert!(pool.contains(&new));
        assert_eq!(pool.in_use_count(), 1);
    }

    #[test]
    fn test_evict_threshold() {
        let threshold = 3;
        let frame = 10;
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::new());

        let lease = pool.acquire(&depth_key(), frame, "depth").unwrap();
        pool.release(lease);

        assert_eq!(pool.evict_idle(frame + threshold - 1, threshold), 0);
        assert_eq!(pool.evict_idle(frame + threshold, threshold), 0);
        assert_eq!(pool.entry_count(), 1);

        assert_eq!(pool.evict_idle(frame + threshold + 1, threshold), 1);
        assert_eq!(pool.entry_count(), 0);
        assert_eq!(pool.bucket_count(), 0);
        assert_eq!(pool.allocator().live_count(), 0);
    }

    #[test]
    fn test_evict_skips_in_use() {
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::new());

        let held = pool.acquire(&depth_key(), 0, "held").unwrap();
        let idle = pool.acquire(&depth_key(), 0, "idle").unwrap();
        pool.release(idle);

        assert_eq!(pool.evict_idle(100, 3), 1);
        assert!(pool.contains(&held));
        assert_eq!(pool.bucket_count(), 1);
    }

    #[test]
    fn test_acquire_release_evict_scenario() {
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::new());

        // 第 0 帧借出并归还，之后一直不用
        let lease = pool.acquire(&depth_key(), 0, "depth").unwrap();
        pool.release(lease);

        for frame in 1..=3 {
            assert_eq!(pool.evict_idle(frame, 3), 0);
        }
        assert_eq!(pool.evict_idle(4, 3), 1);

        // 回收之后再借会重新创建
        let lease = pool.acquire(&depth_key(), 5, "depth").unwrap();
        assert!(pool.contains(&lease));
        assert_eq!(pool.allocator().created_count(), 2);
    }

    #[test]
    fn test_allocation_failure_is_typed() {
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::with_capacity(1));

        let _first = pool.acquire(&depth_key(), 0, "first").unwrap();
        let err = pool.acquire(&depth_key(), 0, "second").unwrap_err();
        match err {
            RgError::PoolAllocation { name, .. } => assert_eq!(name, "second"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(pool.entry_count(), 1);
    }

    #[test]
    fn test_shutdown_destroys_everything() {
        let pool = RgImagePool::new(GfxHeadlessImageAllocator::new());

        let held = pool.acquire(&depth_key(), 0, "held").unwrap();
        let idle = pool.acquire(&color_key(), 0, "idle").unwrap();
        pool.release(idle);

        pool.shutdown();
        assert_eq!(pool.entry_count(), 0);
        assert_eq!(pool.allocator().live_count(), 0);
        assert!(pool.resolve(&held).is_none());
    }

    #[test]
    fn test_concurrent_acquire() {
        let pool = Arc::new(RgImagePool::new(GfxHeadlessImageAllocator::new()));

        let leases = std::thread::scope(|s| {
            let handles = (0..4)
                .map(|i| {
                    let pool = pool.clone();
                    s.spawn(move || pool.acquire(&depth_key(), 0, &format!("worker-{i}")).unwrap())
                })
                .collect::<Vec<_>>();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        let mut images = leases.iter().map(|lease| pool.resolve(lease).unwrap()).collect::<Vec<_>>();
        images.sort_by_key(|(image, _)| ash::vk::Handle::as_raw(*image));
        images.dedup();
        assert_eq!(images.len(), 4);
        assert_eq!(pool.in_use_count(), 4);
    }
}
