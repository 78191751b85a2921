//! 离线检查 render graph
//!
//! 读取一份 TOML 帧描述，用不接触 GPU 的分配器和记录 barrier 的 encoder
//! 连续跑若干帧，打印执行顺序、每个 Pass 前的 barrier 和图像池的复用情况。

mod data_pass;
mod frame_desc;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_crate_tools::init_log::init_log_with_level;
use lumen_gfx::commands::command_encoder::GfxLogEncoder;
use lumen_gfx::resources::image_allocator::{GfxHeadlessImageAllocator, GfxImageAllocator};
use lumen_render_graph::render_graph::{RenderGraph, RgDependencyMode, RgError, RgImagePool};

use crate::frame_desc::FrameDesc;

#[derive(clap::ValueEnum, Copy, Clone, Debug)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for log::LevelFilter {
    fn from(level: CliLogLevel) -> Self {
        match level {
            CliLogLevel::Error => log::LevelFilter::Error,
            CliLogLevel::Warn => log::LevelFilter::Warn,
            CliLogLevel::Info => log::LevelFilter::Info,
            CliLogLevel::Debug => log::LevelFilter::Debug,
            CliLogLevel::Trace => log::LevelFilter::Trace,
        }
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug)]
enum CliDependencyMode {
    Explicit,
    Inferred,
}

impl From<CliDependencyMode> for RgDependencyMode {
    fn from(mode: CliDependencyMode) -> Self {
        match mode {
            CliDependencyMode::Explicit => RgDependencyMode::Explicit,
            CliDependencyMode::Inferred => RgDependencyMode::Inferred,
        }
    }
}

/// render graph 离线检查工具
#[derive(Parser, Debug)]
#[command(name = "lumen-rg-plan", about = "Compile a render graph frame description without a GPU", version)]
struct Args {
    /// 帧描述文件（TOML）
    frame: PathBuf,

    /// 连续执行的帧数
    #[arg(long, default_value = "1")]
    frames: u64,

    /// 每帧编译后打印执行计划
    #[arg(long)]
    print_plan: bool,

    /// 覆盖帧描述中的 dependency_mode
    #[arg(long, value_enum)]
    dependency_mode: Option<CliDependencyMode>,

    /// 同时存活的图像上限，用于模拟分配失败
    #[arg(long)]
    pool_capacity: Option<usize>,

    #[arg(long, default_value = "info", value_enum)]
    log_level: CliLogLevel,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_log_with_level(args.log_level.into());
    let _tracy = tracy_client::Client::start();

    let frame = FrameDesc::from_file(&args.frame)?;
    let mut config = frame.config.clone();
    if let Some(mode) = args.dependency_mode {
        config.dependency_mode = mode.into();
    }

    let allocator = match args.pool_capacity {
        Some(capacity) => GfxHeadlessImageAllocator::with_capacity(capacity),
        None => GfxHeadlessImageAllocator::new(),
    };
    let pool = Arc::new(RgImagePool::new(allocator));

    // persistent 资源也从同一个分配器创建，保证句柄不会和池化图像重复
    let mut external_images = Vec::new();
    for resource in frame.persistent_resources() {
        let image = pool
            .allocator()
            .create_image(&resource.image_desc(), &resource.name)
            .with_context(|| format!("Failed to create persistent image \"{}\"", resource.name))?;
        external_images.push((resource.name.clone(), image));
    }
    let imported = external_images
        .iter()
        .map(|(name, image)| (name.clone(), (image.image, image.view)))
        .collect::<HashMap<_, _>>();

    let encoder = GfxLogEncoder::new();
    let mut graph = RenderGraph::new(pool.clone(), config);
    log::info!("frame description {:?}: {:?}", args.frame, graph.config());
    let result = run_frames(&args, &frame, &mut graph, &imported, &encoder);

    graph.shutdown();
    drop(graph);
    for (_, image) in external_images {
        pool.allocator().destroy_image(image);
    }
    log::info!(
        "barrier batches: {}, image barriers: {}, buffer barriers: {}, pooled images: {}, images created: {}",
        encoder.batch_count(),
        encoder.image_barrier_count(),
        encoder.buffer_barrier_count(),
        pool.entry_count(),
        pool.allocator().created_count()
    );
    pool.shutdown();

    result
}

fn run_frames(
    args: &Args,
    frame: &FrameDesc,
    graph: &mut RenderGraph<'_, GfxHeadlessImageAllocator>,
    imported: &HashMap<String, (ash::vk::Image, ash::vk::ImageView)>,
    encoder: &GfxLogEncoder,
) -> Result<()> {
    for frame_id in 0..args.frames {
        let _span = tracy_client::span!("lumen-rg-plan frame");

        graph.begin_frame(frame_id);
        frame.record(graph, imported).with_context(|| format!("Failed to record frame {}", frame_id))?;

        match graph.compile() {
            Ok(()) => {}
            Err(RgError::DependencyCycle { passes }) => {
                log::error!("frame {}: skipped, dependency cycle between {:?}", graph.frame_id(), passes);
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to compile frame {}", frame_id)),
        }

        if args.print_plan {
            graph.print_execution_plan();
        }
        graph.execute(encoder).with_context(|| format!("Failed to execute frame {}", frame_id))?;
        log::debug!(
            "frame {}: {} pooled images, {} in use",
            graph.frame_id(),
            graph.pool().entry_count(),
            graph.pool().in_use_count()
        );
    }
    Ok(())
}
