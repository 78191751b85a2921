//! Pass 定义和构建器
//!
//! 提供 `RgPass` trait，以及 setup 阶段用来声明资源访问的 `RgPassBuilder`。

use ash::vk;
use lumen_gfx::commands::command_encoder::GfxCommandEncoder;

use crate::render_graph::barrier::RgBufferBarrierDesc;
use crate::render_graph::image_pool::RgLeaseResolver;
use crate::render_graph::resource::{RgImageDesc, RgResourceHandle, RgResourceNode, RgResourceRegistry};
use crate::render_graph::resource_state::RgImageState;

/// 当前帧内的 Pass 句柄
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RgPassHandle {
    index: usize,
    epoch: u32,
}

impl RgPassHandle {
    #[inline]
    pub(crate) fn new(index: usize, epoch: u32) -> Self {
        Self { index, epoch }
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

/// 一条显式依赖：所在的 Pass 必须在 `pass` 之后执行
///
/// `resource` 只用于调试输出，不参与排序
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RgDependency {
    pub resource: RgResourceHandle,
    pub pass: RgPassHandle,
}

/// Pass 执行时的上下文
pub struct RgPassContext<'c> {
    /// 命令录制目标，已经 begin
    pub cmd: &'c dyn GfxCommandEncoder,
    pub(crate) resources: &'c RgResourceRegistry,
    pub(crate) images: &'c dyn RgLeaseResolver,
}

impl RgPassContext<'_> {
    /// 资源对应的 image 和 view，句柄无效或者没有物理图像时返回 None
    ///
    /// 池化资源在这里重新检查 lease，池中的图像已经被销毁时同样返回 None
    #[inline]
    pub fn image(&self, handle: RgResourceHandle) -> Option<(vk::Image, vk::ImageView)> {
        self.resources.get(handle).ok()?.resolve_physical(self.images)
    }

    #[inline]
    pub fn resource(&self, handle: RgResourceHandle) -> Option<&RgResourceNode> {
        self.resources.get(handle).ok()
    }
}

/// Pass 构建器
///
/// 在 `RgPass::setup()` 中使用，声明 Pass 的资源访问和依赖。
/// 声明顺序会被保留，执行时先处理所有读取，再处理所有写入。
pub struct RgPassBuilder<'b> {
    pub(crate) handle: RgPassHandle,
    pub(crate) reads: Vec<(RgResourceHandle, RgImageState)>,
    pub(crate) writes: Vec<(RgResourceHandle, RgImageState)>,
    pub(crate) dependencies: Vec<RgDependency>,
    pub(crate) buffer_barriers: Vec<RgBufferBarrierDesc>,

    pub(crate) resources: &'b mut RgResourceRegistry,
}

impl<'b> RgPassBuilder<'b> {
    pub(crate) fn new(handle: RgPassHandle, resources: &'b mut RgResourceRegistry) -> Self {
        Self {
            handle,
            reads: Vec::new(),
            writes: Vec::new(),
            dependencies: Vec::new(),
            buffer_barriers: Vec::new(),
            resources,
        }
    }

    /// 正在 setup 的 Pass 自身的句柄
    #[inline]
    pub fn pass_handle(&self) -> RgPassHandle {
        self.handle
    }

    #[inline]
    pub fn read(&mut self, handle: RgResourceHandle, state: RgImageState) -> RgResourceHandle {
        self.reads.push((handle, state));
        handle
    }

    /// 同一个 Pass 中写入排在读取之后，决定资源离开这个 Pass 时的状态
    #[inline]
    pub fn write(&mut self, handle: RgResourceHandle, state: RgImageState) -> RgResourceHandle {
        self.writes.push((handle, state));
        handle
    }

    /// 声明 Pass 必须在 `pass` 之后执行
    #[inline]
    pub fn depends_on(&mut self, resource: RgResourceHandle, pass: RgPassHandle) {
        self.dependencies.push(RgDependency { resource, pass });
    }

    /// 在这个 Pass 之前提交一个缓冲区 barrier
    ///
    /// 缓冲区不做状态跟踪，src / dst 由调用者给出。和同一个 Pass 的图像 barrier 合并为一次提交。
    #[inline]
    pub fn buffer_barrier(&mut self, barrier: RgBufferBarrierDesc) {
        self.buffer_barriers.push(barrier);
    }

    /// 在 setup 中直接创建池化图像，编译时从图像池借出
    pub fn create_pooled_image(&mut self, name: impl Into<String>, desc: RgImageDesc) -> RgResourceHandle {
        self.resources.register(RgResourceNode::pooled(name, desc))
    }
}

/// Pass 节点数据
pub struct RgPassNode<'a> {
    pub name: String,
    pub reads: Vec<(RgResourceHandle, RgImageState)>,
    pub writes: Vec<(RgResourceHandle, RgImageState)>,
    pub dependencies: Vec<RgDependency>,
    pub buffer_barriers: Vec<RgBufferBarrierDesc>,

    pub(crate) pass: Box<dyn RgPass + 'a>,
}

impl RgPassNode<'_> {
    /// 先读后写
    #[inline]
    pub fn accesses(&self) -> impl Iterator<Item = &(RgResourceHandle, RgImageState)> {
        self.reads.iter().chain(self.writes.iter())
    }
}

/// RgPass trait
///
/// 定义渲染图中的一个 Pass。
///
/// # 示例
///
/// ```ignore
/// struct PresentPass {
///     swapchain: RgResourceHandle,
///     forward: RgPassHandle,
/// }
///
/// impl RgPass for PresentPass {
///     fn name(&self) -> &str {
///         "present"
///     }
///
///     fn setup(&mut self, builder: &mut RgPassBuilder) {
///         builder.write(self.swapchain, RgImageState::PRESENT);
///         builder.depends_on(self.swapchain, self.forward);
///     }
///
///     fn execute(&mut self, _ctx: &RgPassContext<'_>) {}
/// }
/// ```
///
/// Pass 不需要是 Send + Sync，render graph 只在一个线程中使用。
pub trait RgPass {
    /// 用于 debug label 和日志
    fn name(&self) -> &str;

    /// 注册时调用一次，声明 Pass 的资源访问和依赖
    fn setup(&mut self, builder: &mut RgPassBuilder);

    /// 录制 Pass 的命令
    ///
    /// 调用前 render graph 已经提交了这个 Pass 需要的 barrier
    fn execute(&mut self, ctx: &RgPassContext<'_>);
}
