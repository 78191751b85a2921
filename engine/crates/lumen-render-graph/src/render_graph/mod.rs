//! 逐帧的 render graph
//!
//! 各个 Pass 独立声明自己读写的图像，graph 负责得到执行顺序、
//! 在 Pass 之间插入最少的 barrier，并通过图像池在帧之间复用临时图像。
//!
//! # 核心概念
//!
//! - **RgResourceHandle**: 当前帧内的资源句柄，下一次 `begin_frame` 后失效
//! - **RgImageState**: 资源状态，包含 stage、access、layout
//! - **RgPass**: Pass trait，setup 时声明依赖，execute 时录制命令
//! - **RgImagePool**: 按形状复用的图像池，可跨线程共享
//! - **RgBarrierScheduler**: 跟踪每个资源的状态，把一个 Pass 需要的 barrier 合并成一次提交
//! - **RenderGraph**: 注册、编译、执行
//!
//! # 使用示例
//!
//! ```ignore
//! use lumen_render_graph::render_graph::*;
//!
//! struct ShadowPass {
//!     csm: RgResourceHandle,
//! }
//!
//! impl RgPass for ShadowPass {
//!     fn name(&self) -> &str {
//!         "shadow"
//!     }
//!
//!     fn setup(&mut self, builder: &mut RgPassBuilder) {
//!         builder.write(self.csm, RgImageState::DEPTH_ATTACHMENT_WRITE);
//!     }
//!
//!     fn execute(&mut self, ctx: &RgPassContext<'_>) {
//!         let (image, view) = ctx.image(self.csm).unwrap();
//!         // begin rendering, draw...
//!     }
//! }
//!
//! let pool = Arc::new(RgImagePool::new(allocator));
//! let mut graph = RenderGraph::new(pool.clone(), RgConfig::default());
//!
//! graph.begin_frame(frame_id);
//! let csm = graph.create_pooled_image("csm", RgImageDesc::new_2d(2048, 2048, vk::Format::D32_SFLOAT, usage).with_array_layers(4));
//! graph.add_pass(ShadowPass { csm });
//! graph.compile()?;
//! graph.execute(&cmd)?;
//! ```
//!
//! # 模块结构
//!
//! - `resource_state`: 资源状态（stage/access/layout）封装
//! - `image_pool`: 池化图像
//! - `barrier`: barrier 调度
//! - `resource`: 资源句柄与资源节点
//! - `pass`: Pass trait、builder 和执行上下文
//! - `graph`: 依赖图和拓扑排序
//! - `executor`: 编译与执行
//! - `config` / `error`

mod barrier;
mod config;
mod error;
mod executor;
mod graph;
mod image_pool;
mod pass;
mod resource;
mod resource_state;

pub use barrier::{RgBarrierScheduler, RgBufferBarrierDesc, RgImageBarrierDesc};
pub use config::{RgConfig, RgCyclePolicy, RgDependencyMode};
pub use error::RgError;
pub use executor::RenderGraph;
pub use graph::{RgDependencyAnalyzer, RgDependencyGraph};
pub use image_pool::{RgImageKey, RgImageLease, RgImagePool};
pub use pass::{RgDependency, RgPass, RgPassBuilder, RgPassContext, RgPassHandle, RgPassNode};
pub use resource::{RgImageDesc, RgResourceHandle, RgResourceNode, RgResourceSource};
pub use resource_state::{RgBufferState, RgImageState};
