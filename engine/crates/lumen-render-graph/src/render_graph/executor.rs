//! RenderGraph 的注册、编译和执行
//!
//! 一帧的流程：`begin_frame` → 注册资源和 Pass → `compile` → `execute`。

use std::sync::Arc;

use ash::vk;
use itertools::Itertools;
use lumen_gfx::basic::color::LabelColor;
use lumen_gfx::commands::command_encoder::GfxCommandEncoder;
use lumen_gfx::resources::image_allocator::GfxImageAllocator;

use crate::render_graph::barrier::{RgBarrierScheduler, RgImageBarrierDesc};
use crate::render_graph::config::{RgConfig, RgCyclePolicy, RgDependencyMode};
use crate::render_graph::error::RgError;
use crate::render_graph::graph::{RgDependencyAnalyzer, RgDependencyGraph};
use crate::render_graph::image_pool::{RgImageLease, RgImagePool, RgLeaseResolver};
use crate::render_graph::pass::{RgDependency, RgPass, RgPassBuilder, RgPassContext, RgPassHandle, RgPassNode};
use crate::render_graph::resource::{
    RgImageDesc, RgResourceHandle, RgResourceNode, RgResourceRegistry, RgResourceSource,
};
use crate::render_graph::resource_state::RgImageState;

/// 逐帧的 render graph
///
/// # 使用流程
///
/// 1. 每帧开始调用 `begin_frame(frame_id)`，上一帧的资源、Pass 和借出的图像全部归还
/// 2. 注册资源：`import_image` / `create_pooled_image`
/// 3. 添加 Pass：`add_pass`，会立刻调用 Pass 的 `setup`
/// 4. `compile`：排序、计算资源生命周期、从图像池借出图像
/// 5. `execute`：逐个 Pass 提交 barrier 并录制命令
///
/// # 生命周期
///
/// `'a` 是 Pass 可以借用的外部资源的生命周期。
pub struct RenderGraph<'a, A: GfxImageAllocator> {
    pool: Arc<RgImagePool<A>>,
    config: RgConfig,

    resources: RgResourceRegistry,
    passes: Vec<RgPassNode<'a>>,

    /// 拓扑排序后的 Pass 索引
    execution_order: Vec<usize>,
    /// 本帧借出的图像，下一次 `begin_frame` 时归还
    leases: Vec<RgImageLease>,
    scheduler: RgBarrierScheduler,

    frame_id: u64,
    last_frame_id: Option<u64>,
    compiled: bool,
}

// new & init
impl<'a, A: GfxImageAllocator> RenderGraph<'a, A> {
    pub fn new(pool: Arc<RgImagePool<A>>, config: RgConfig) -> Self {
        Self {
            pool,
            config,
            resources: RgResourceRegistry::new(),
            passes: Vec::new(),
            execution_order: Vec::new(),
            leases: Vec::new(),
            scheduler: RgBarrierScheduler::new(),
            frame_id: 0,
            last_frame_id: None,
            compiled: false,
        }
    }

    /// 开始新的一帧
    ///
    /// 归还上一帧借出的图像，清空资源和 Pass，之前签发的句柄全部失效。
    /// 配置了 `evict_on_begin_frame` 时顺便回收空闲的池化图像。
    pub fn begin_frame(&mut self, frame_id: u64) {
        if let Some(last) = self.last_frame_id {
            if frame_id < last {
                log::warn!("render graph: frame id went backwards ({} -> {})", last, frame_id);
            }
        }

        self.release_leases();
        self.resources.clear();
        self.passes.clear();
        self.execution_order.clear();
        self.compiled = false;
        self.frame_id = frame_id;
        self.last_frame_id = Some(frame_id);

        if self.config.evict_on_begin_frame {
            self.pool.evict_idle(frame_id, self.config.idle_frame_threshold);
        }
    }

    /// 归还借出的图像并清空当前帧
    ///
    /// 图像池本身由它的持有者负责 shutdown
    pub fn shutdown(&mut self) {
        self.release_leases();
        self.resources.clear();
        self.passes.clear();
        self.execution_order.clear();
        self.compiled = false;
    }

    fn release_leases(&mut self) {
        for lease in self.leases.drain(..) {
            self.pool.release(lease);
        }
        for node in self.resources.iter_mut() {
            node.lease = None;
            if node.is_pooled() {
                node.physical = None;
            }
        }
    }
}

// 注册
impl<'a, A: GfxImageAllocator> RenderGraph<'a, A> {
    /// 注册外部持有的图像，例如 swapchain image
    ///
    /// `current_layout` 是这一帧开始时图像真实的 layout
    pub fn import_image(
        &mut self,
        name: impl Into<String>,
        image: vk::Image,
        view: vk::ImageView,
        current_layout: vk::ImageLayout,
        aspect: vk::ImageAspectFlags,
        layer_count: u32,
    ) -> RgResourceHandle {
        self.resources.register(RgResourceNode::persistent(name, image, view, current_layout, aspect, layer_count))
    }

    /// 注册池化图像，编译时才分配
    pub fn create_pooled_image(&mut self, name: impl Into<String>, desc: RgImageDesc) -> RgResourceHandle {
        self.resources.register(RgResourceNode::pooled(name, desc))
    }

    /// 添加 Pass，立刻调用它的 `setup`
    pub fn add_pass<P: RgPass + 'a>(&mut self, mut pass: P) -> RgPassHandle {
        let handle = RgPassHandle::new(self.passes.len(), self.resources.epoch());

        let mut builder = RgPassBuilder::new(handle, &mut self.resources);
        pass.setup(&mut builder);
        let RgPassBuilder {
            reads,
            writes,
            dependencies,
            buffer_barriers,
            ..
        } = builder;

        self.passes.push(RgPassNode {
            name: pass.name().to_string(),
            reads,
            writes,
            dependencies,
            buffer_barriers,
            pass: Box::new(pass),
        });
        self.compiled = false;
        handle
    }

    /// 在 setup 之外为 Pass 追加一次读取
    pub fn declare_read(
        &mut self,
        pass: RgPassHandle,
        resource: RgResourceHandle,
        state: RgImageState,
    ) -> Result<(), RgError> {
        let index = self.validate_pass(pass)?;
        self.passes[index].reads.push((resource, state));
        self.compiled = false;
        Ok(())
    }

    /// 在 setup 之外为 Pass 追加一次写入
    pub fn declare_write(
        &mut self,
        pass: RgPassHandle,
        resource: RgResourceHandle,
        state: RgImageState,
    ) -> Result<(), RgError> {
        let index = self.validate_pass(pass)?;
        self.passes[index].writes.push((resource, state));
        self.compiled = false;
        Ok(())
    }

    /// 声明 `pass` 必须在 `dependency` 之后执行，`resource` 只用于调试
    pub fn declare_dependency(
        &mut self,
        pass: RgPassHandle,
        resource: RgResourceHandle,
        dependency: RgPassHandle,
    ) -> Result<(), RgError> {
        let index = self.validate_pass(pass)?;
        self.passes[index].dependencies.push(RgDependency {
            resource,
            pass: dependency,
        });
        self.compiled = false;
        Ok(())
    }

    fn validate_pass(&self, pass: RgPassHandle) -> Result<usize, RgError> {
        if pass.epoch() != self.resources.epoch() || pass.index() >= self.passes.len() {
            return Err(RgError::InvalidPass { index: pass.index() });
        }
        Ok(pass.index())
    }
}

// compile
impl<A: GfxImageAllocator> RenderGraph<'_, A> {
    /// 编译当前帧
    ///
    /// 1. 检查所有句柄，按显式依赖（`Inferred` 模式下再加上推断的依赖）做拓扑排序
    /// 2. 有环时按 `cycle_policy` 处理
    /// 3. 计算每个资源的 first_use / last_use
    /// 4. 为所有池化资源借出图像
    pub fn compile(&mut self) -> Result<(), RgError> {
        let _span = tracy_client::span!("RenderGraph::compile");

        // 同一帧重复编译时先归还之前借出的
        self.release_leases();
        self.compiled = false;

        let graph = self.build_dependency_graph()?;
        self.execution_order = match graph.topological_sort() {
            Ok(order) => order,
            Err(remaining) => {
                let passes = remaining.iter().map(|&i| self.passes[i].name.clone()).collect_vec();
                log::error!("render graph: dependency cycle among passes {:?}", passes);
                match self.config.cycle_policy {
                    RgCyclePolicy::FallbackToDeclarationOrder => {
                        log::error!("render graph: falling back to declaration order, synchronization not guaranteed");
                        (0..self.passes.len()).collect()
                    }
                    RgCyclePolicy::SkipFrame => {
                        self.execution_order.clear();
                        return Err(RgError::DependencyCycle { passes });
                    }
                }
            }
        };

        self.compute_lifetimes();
        self.acquire_pooled_images()?;

        let pooled_count = self.resources.iter().filter(|node| node.is_pooled()).count();
        log::info!(
            "render graph compiled: {} passes, {} resources ({} pooled), order: [{}]",
            self.passes.len(),
            self.resources.len(),
            pooled_count,
            self.execution_order.iter().map(|&i| self.passes[i].name.as_str()).join(" -> ")
        );

        self.compiled = true;
        Ok(())
    }

    fn build_dependency_graph(&self) -> Result<RgDependencyGraph, RgError> {
        let mut graph = RgDependencyGraph::new(self.passes.len());

        for (consumer, node) in self.passes.iter().enumerate() {
            for (handle, _) in node.accesses() {
                self.resources.validate(*handle)?;
            }
            for dependency in &node.dependencies {
                self.resources.validate(dependency.resource)?;
                let producer = self.validate_pass(dependency.pass)?;
                graph.add_edge(producer, consumer)?;
            }
        }

        if self.config.dependency_mode == RgDependencyMode::Inferred {
            let reads = self.passes.iter().map(|p| p.reads.iter().map(|(h, _)| h.index()).collect_vec()).collect_vec();
            let writes = self.passes.iter().map(|p| p.writes.iter().map(|(h, _)| h.index()).collect_vec()).collect_vec();
            for (producer, consumer) in RgDependencyAnalyzer::infer(&reads, &writes) {
                graph.add_edge(producer, consumer)?;
            }
        }

        Ok(graph)
    }

    fn compute_lifetimes(&mut self) {
        for node in self.resources.iter_mut() {
            node.first_use = None;
            node.last_use = None;
        }
        for (position, &pass_index) in self.execution_order.iter().enumerate() {
            for (handle, _) in self.passes[pass_index].accesses() {
                if let Some(node) = self.resources.node_mut(handle.index()) {
                    node.touch(position);
                }
            }
        }
    }

    fn acquire_pooled_images(&mut self) -> Result<(), RgError> {
        for node in self.resources.iter_mut() {
            let RgResourceSource::Pooled { desc } = &node.source else {
                continue;
            };
            let lease = self.pool.acquire(&desc.pool_key(), self.frame_id, &node.name)?;
            self.leases.push(lease);
            node.lease = Some(lease);
            node.physical = self.pool.resolve(&lease);
        }
        Ok(())
    }
}

// execute
impl<A: GfxImageAllocator> RenderGraph<'_, A> {
    /// 按执行顺序录制所有 Pass
    ///
    /// 每个 Pass 之前：先请求所有读取的转换，再请求所有写入的转换，然后一次性提交 barrier。
    /// 每个资源在帧开始时的状态为 (initial_layout, TOP_OF_PIPE, NONE)。
    pub fn execute(&mut self, cmd: &dyn GfxCommandEncoder) -> Result<(), RgError> {
        if !self.compiled {
            log::error!("render graph: execute called before compile, frame skipped");
            return Err(RgError::NotCompiled);
        }
        let _span = tracy_client::span!("RenderGraph::execute");

        Self::seed_scheduler(&mut self.scheduler, &self.resources);

        for &pass_index in &self.execution_order {
            let node = &mut self.passes[pass_index];
            Self::request_transitions(&mut self.scheduler, &self.resources, &*self.pool, node);
            self.scheduler.flush(cmd);

            cmd.begin_label(&node.name, LabelColor::COLOR_PASS);
            let ctx = RgPassContext {
                cmd,
                resources: &self.resources,
                images: &*self.pool,
            };
            node.pass.execute(&ctx);
            cmd.end_label();
        }

        Ok(())
    }

    fn seed_scheduler(scheduler: &mut RgBarrierScheduler, resources: &RgResourceRegistry) {
        scheduler.reset(resources.len());
        for (index, node) in resources.iter().enumerate() {
            scheduler.seed_initial_state(index, RgImageState::from_layout(node.initial_layout));
        }
    }

    fn request_transitions(
        scheduler: &mut RgBarrierScheduler,
        resources: &RgResourceRegistry,
        images: &dyn RgLeaseResolver,
        node: &RgPassNode<'_>,
    ) {
        for (handle, state) in node.accesses() {
            let Some(resource) = resources.node(handle.index()) else {
                continue;
            };
            let Some((image, _)) = resource.resolve_physical(images) else {
                log::warn!("render graph: resource \"{}\" has no image in pass \"{}\"", resource.name, node.name);
                continue;
            };
            scheduler.transition_image(handle.index(), image, resource.aspect, resource.layer_count, *state);
        }
        for barrier in &node.buffer_barriers {
            scheduler.add_buffer_barrier(barrier.clone());
        }
    }
}

// getters
impl<A: GfxImageAllocator> RenderGraph<'_, A> {
    #[inline]
    pub fn resource(&self, handle: RgResourceHandle) -> Result<&RgResourceNode, RgError> {
        self.resources.get(handle)
    }

    /// 拓扑排序后的 Pass 索引，只在编译后有意义
    #[inline]
    pub fn execution_order(&self) -> &[usize] {
        &self.execution_order
    }

    /// 按执行顺序排列的 Pass 名称
    pub fn ordered_pass_names(&self) -> Vec<&str> {
        self.execution_order.iter().map(|&i| self.passes[i].name.as_str()).collect()
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    #[inline]
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn pass_name(&self, pass: RgPassHandle) -> Result<&str, RgError> {
        let index = self.validate_pass(pass)?;
        Ok(&self.passes[index].name)
    }

    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    #[inline]
    pub fn config(&self) -> &RgConfig {
        &self.config
    }

    #[inline]
    pub fn pool(&self) -> &Arc<RgImagePool<A>> {
        &self.pool
    }
}

// 调试方法
impl<A: GfxImageAllocator> RenderGraph<'_, A> {
    /// 按执行顺序模拟一遍 barrier 调度，返回每个 Pass 之前会提交的图像 barrier
    ///
    /// 不录制任何命令，结果和 `execute` 实际提交的一致
    pub fn plan_barriers(&self) -> Result<Vec<(usize, Vec<RgImageBarrierDesc>)>, RgError> {
        if !self.compiled {
            return Err(RgError::NotCompiled);
        }

        let mut scheduler = RgBarrierScheduler::new();
        Self::seed_scheduler(&mut scheduler, &self.resources);

        Ok(self
            .execution_order
            .iter()
            .map(|&pass_index| {
                Self::request_transitions(&mut scheduler, &self.resources, &*self.pool, &self.passes[pass_index]);
                let (image_barriers, _) = scheduler.take_pending();
                (pass_index, image_barriers)
            })
            .collect())
    }

    /// 打印执行计划（用于调试）
    ///
    /// 包括执行顺序、每个 Pass 的读写、每个 Pass 之前的 barrier 以及资源的生命周期
    pub fn print_execution_plan(&self) {
        let plan = match self.plan_barriers() {
            Ok(plan) => plan,
            Err(e) => {
                log::warn!("render graph: cannot print execution plan: {e}");
                return;
            }
        };
        let resource_name =
            |handle: &RgResourceHandle| self.resources.node(handle.index()).map_or("<unknown>", |r| r.name.as_str());

        log::info!("╔══════════════════════════════════════════════════════════════════╗");
        log::info!("║ RenderGraph Execution Plan (frame {})", self.frame_id);
        log::info!("╠══════════════════════════════════════════════════════════════════╣");
        log::info!("║ Passes: {}  |  Order: [{}]", self.passes.len(), self.ordered_pass_names().join(" → "));
        log::info!("╚══════════════════════════════════════════════════════════════════╝");

        for (order, (pass_index, barriers)) in plan.iter().enumerate() {
            let pass = &self.passes[*pass_index];

            log::info!("┌─────────────────────────────────────────────────────────────────┐");
            log::info!("│ [{}/{}] Pass: \"{}\"", order + 1, plan.len(), pass.name);
            log::info!("├─────────────────────────────────────────────────────────────────┤");
            for (kind, (handle, state)) in
                pass.reads.iter().map(|r| ("read ", r)).chain(pass.writes.iter().map(|w| ("write", w)))
            {
                log::info!(
                    "│   {} \"{}\" @ {:?} (stage: {:?}, access: {:?})",
                    kind,
                    resource_name(handle),
                    state.layout,
                    state.stage,
                    state.access
                );
            }
            for dependency in &pass.dependencies {
                let producer = self.passes.get(dependency.pass.index()).map_or("<unknown>", |p| p.name.as_str());
                log::info!("│   after \"{}\" (via \"{}\")", producer, resource_name(&dependency.resource));
            }

            if barriers.is_empty() {
                log::info!("│ No barriers required");
            } else {
                log::info!("├─ Barriers: {}", barriers.len());
                for barrier in barriers {
                    let name = self.resources.node(barrier.resource).map_or("<unknown>", |r| r.name.as_str());
                    log::info!(
                        "│   \"{}\": {:?} → {:?}, layers {}",
                        name,
                        barrier.src_state.layout,
                        barrier.dst_state.layout,
                        barrier.layer_count
                    );
                    log::info!("│       stage:  {:?} → {:?}", barrier.src_state.stage, barrier.dst_state.stage);
                    log::info!("│       access: {:?} → {:?}", barrier.src_state.access, barrier.dst_state.access);
                }
            }
            log::info!("└─────────────────────────────────────────────────────────────────┘");
        }

        for node in self.resources.iter() {
            match node.lifetime() {
                Some((first, last)) => log::info!(
                    "resource \"{}\"{}: passes [{}, {}]",
                    node.name,
                    if node.is_pooled() { " (pooled)" } else { "" },
                    first,
                    last
                ),
                None => log::info!("resource \"{}\": unused", node.name),
            }
        }
    }
}

impl<A: GfxImageAllocator> Drop for RenderGraph<'_, A> {
    fn drop(&mut self) {
        self.release_leases();
    }
}
