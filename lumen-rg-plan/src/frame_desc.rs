//! TOML 帧描述
//!
//! 一帧由配置、资源和 Pass 组成，Pass 通过名字引用资源和其他 Pass：
//!
//! ```toml
//! [config]
//! dependency_mode = "explicit"
//!
//! [[resources]]
//! name = "depth"
//! kind = "pooled"
//! format = "D32_SFLOAT"
//! width = 1920
//! height = 1080
//! usage = ["depth_stencil_attachment", "sampled"]
//!
//! [[passes]]
//! name = "depth_prepass"
//! writes = [{ resource = "depth", state = "DEPTH_ATTACHMENT_WRITE" }]
//! ```

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use ash::vk;
use lumen_gfx::resources::image_allocator::GfxImageAllocator;
use lumen_gfx::resources::image_desc::GfxImageDesc;
use lumen_render_graph::render_graph::{RenderGraph, RgConfig, RgImageDesc, RgImageState, RgPassHandle};
use serde::Deserialize;

use crate::data_pass::DataPass;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub enum FrameFormat {
    #[serde(rename = "R8G8B8A8_UNORM")]
    R8G8B8A8Unorm,
    #[serde(rename = "R8G8B8A8_SRGB")]
    R8G8B8A8Srgb,
    #[serde(rename = "B8G8R8A8_UNORM")]
    B8G8R8A8Unorm,
    #[serde(rename = "B8G8R8A8_SRGB")]
    B8G8R8A8Srgb,
    #[serde(rename = "R16G16B16A16_SFLOAT")]
    R16G16B16A16Sfloat,
    #[serde(rename = "R32G32B32A32_SFLOAT")]
    R32G32B32A32Sfloat,
    #[serde(rename = "R32_SFLOAT")]
    R32Sfloat,
    #[serde(rename = "R32_UINT")]
    R32Uint,
    #[serde(rename = "D32_SFLOAT")]
    D32Sfloat,
    #[serde(rename = "D24_UNORM_S8_UINT")]
    D24UnormS8Uint,
    #[serde(rename = "D32_SFLOAT_S8_UINT")]
    D32SfloatS8Uint,
}

impl From<FrameFormat> for vk::Format {
    fn from(format: FrameFormat) -> Self {
        match format {
            FrameFormat::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
            FrameFormat::R8G8B8A8Srgb => vk::Format::R8G8B8A8_SRGB,
            FrameFormat::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
            FrameFormat::B8G8R8A8Srgb => vk::Format::B8G8R8A8_SRGB,
            FrameFormat::R16G16B16A16Sfloat => vk::Format::R16G16B16A16_SFLOAT,
            FrameFormat::R32G32B32A32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
            FrameFormat::R32Sfloat => vk::Format::R32_SFLOAT,
            FrameFormat::R32Uint => vk::Format::R32_UINT,
            FrameFormat::D32Sfloat => vk::Format::D32_SFLOAT,
            FrameFormat::D24UnormS8Uint => vk::Format::D24_UNORM_S8_UINT,
            FrameFormat::D32SfloatS8Uint => vk::Format::D32_SFLOAT_S8_UINT,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameUsage {
    Sampled,
    Storage,
    ColorAttachment,
    DepthStencilAttachment,
    InputAttachment,
    TransferSrc,
    TransferDst,
}

impl From<FrameUsage> for vk::ImageUsageFlags {
    fn from(usage: FrameUsage) -> Self {
        match usage {
            FrameUsage::Sampled => vk::ImageUsageFlags::SAMPLED,
            FrameUsage::Storage => vk::ImageUsageFlags::STORAGE,
            FrameUsage::ColorAttachment => vk::ImageUsageFlags::COLOR_ATTACHMENT,
            FrameUsage::DepthStencilAttachment => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            FrameUsage::InputAttachment => vk::ImageUsageFlags::INPUT_ATTACHMENT,
            FrameUsage::TransferSrc => vk::ImageUsageFlags::TRANSFER_SRC,
            FrameUsage::TransferDst => vk::ImageUsageFlags::TRANSFER_DST,
        }
    }
}

/// 外部图像在每帧开始时的 layout
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLayout {
    #[default]
    Undefined,
    General,
    ColorAttachment,
    DepthAttachment,
    DepthReadOnly,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

impl From<FrameLayout> for vk::ImageLayout {
    fn from(layout: FrameLayout) -> Self {
        match layout {
            FrameLayout::Undefined => vk::ImageLayout::UNDEFINED,
            FrameLayout::General => vk::ImageLayout::GENERAL,
            FrameLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            FrameLayout::DepthAttachment => vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
            FrameLayout::DepthReadOnly => vk::ImageLayout::DEPTH_READ_ONLY_OPTIMAL,
            FrameLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            FrameLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            FrameLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            FrameLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// 由工具在启动时创建，每帧通过 import 注册
    Persistent,
    #[default]
    Pooled,
}

fn default_layers() -> u32 {
    1
}

#[derive(Clone, Debug, Deserialize)]
pub struct ResourceDesc {
    pub name: String,
    #[serde(default)]
    pub kind: ResourceKind,
    pub format: FrameFormat,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_layers")]
    pub layers: u32,
    #[serde(default)]
    pub usage: Vec<FrameUsage>,
    /// 只对 persistent 资源有意义
    #[serde(default)]
    pub initial_layout: FrameLayout,
}

impl ResourceDesc {
    pub fn usage_flags(&self) -> vk::ImageUsageFlags {
        self.usage.iter().fold(vk::ImageUsageFlags::empty(), |flags, &usage| flags | usage.into())
    }

    pub fn image_desc(&self) -> GfxImageDesc {
        GfxImageDesc::new_2d(self.width, self.height, self.format.into(), self.usage_flags())
            .with_array_layers(self.layers)
    }

    pub fn pooled_desc(&self) -> RgImageDesc {
        RgImageDesc::new_2d(self.width, self.height, self.format.into(), self.usage_flags())
            .with_array_layers(self.layers)
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccessDesc {
    pub resource: String,
    /// `RgImageState` 的预定义状态名，例如 `SHADER_READ_FRAGMENT`
    pub state: String,
}

/// 所在 Pass 必须在 `pass` 之后执行，`resource` 用于调试输出
#[derive(Clone, Debug, Deserialize)]
pub struct AfterDesc {
    pub pass: String,
    pub resource: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct PassDesc {
    pub name: String,
    #[serde(default)]
    pub reads: Vec<AccessDesc>,
    #[serde(default)]
    pub writes: Vec<AccessDesc>,
    #[serde(default)]
    pub after: Vec<AfterDesc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FrameDesc {
    #[serde(default)]
    pub config: RgConfig,
    #[serde(default)]
    pub resources: Vec<ResourceDesc>,
    #[serde(default)]
    pub passes: Vec<PassDesc>,
}

// new & init
impl FrameDesc {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read frame description: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Invalid frame description: {:?}", path))
    }

    /// 解析并检查所有名字引用
    pub fn parse(content: &str) -> Result<Self> {
        let frame: Self = toml::from_str(content).context("Failed to parse frame description")?;
        frame.validate()?;
        Ok(frame)
    }

    fn validate(&self) -> Result<()> {
        let mut resource_names = HashSet::new();
        for resource in &self.resources {
            if !resource_names.insert(resource.name.as_str()) {
                bail!("duplicate resource \"{}\"", resource.name);
            }
            if resource.width == 0 || resource.height == 0 || resource.layers == 0 {
                bail!("resource \"{}\" has an empty extent", resource.name);
            }
        }

        let mut pass_names = HashSet::new();
        for pass in &self.passes {
            if !pass_names.insert(pass.name.as_str()) {
                bail!("duplicate pass \"{}\"", pass.name);
            }
        }

        for pass in &self.passes {
            for access in pass.reads.iter().chain(&pass.writes) {
                if !resource_names.contains(access.resource.as_str()) {
                    bail!("pass \"{}\" uses unknown resource \"{}\"", pass.name, access.resource);
                }
                if RgImageState::from_preset_name(&access.state).is_none() {
                    bail!("pass \"{}\" uses unknown state \"{}\"", pass.name, access.state);
                }
            }
            for after in &pass.after {
                if !pass_names.contains(after.pass.as_str()) {
                    bail!("pass \"{}\" depends on unknown pass \"{}\"", pass.name, after.pass);
                }
                if !resource_names.contains(after.resource.as_str()) {
                    bail!("pass \"{}\" depends on unknown resource \"{}\"", pass.name, after.resource);
                }
            }
        }
        Ok(())
    }
}

// tools
impl FrameDesc {
    pub fn persistent_resources(&self) -> impl Iterator<Item = &ResourceDesc> {
        self.resources.iter().filter(|r| r.kind == ResourceKind::Persistent)
    }

    /// 把这一帧注册到 render graph 中，返回按声明顺序排列的 Pass 句柄
    ///
    /// `imported` 提供 persistent 资源的 image 和 view
    pub fn record<A: GfxImageAllocator>(
        &self,
        graph: &mut RenderGraph<'_, A>,
        imported: &HashMap<String, (vk::Image, vk::ImageView)>,
    ) -> Result<Vec<RgPassHandle>> {
        let mut resources = HashMap::with_capacity(self.resources.len());
        for resource in &self.resources {
            let handle = match resource.kind {
                ResourceKind::Persistent => {
                    let &(image, view) = imported
                        .get(&resource.name)
                        .with_context(|| format!("persistent resource \"{}\" was not imported", resource.name))?;
                    let format = resource.format.into();
                    graph.import_image(
                        resource.name.clone(),
                        image,
                        view,
                        resource.initial_layout.into(),
                        GfxImageDesc::infer_aspect(format),
                        resource.layers,
                    )
                }
                ResourceKind::Pooled => graph.create_pooled_image(resource.name.clone(), resource.pooled_desc()),
            };
            resources.insert(resource.name.as_str(), handle);
        }

        let resolve = |accesses: &[AccessDesc]| -> Result<Vec<_>> {
            accesses
                .iter()
                .map(|access| {
                    let handle = *resources
                        .get(access.resource.as_str())
                        .with_context(|| format!("unknown resource \"{}\"", access.resource))?;
                    let state = RgImageState::from_preset_name(&access.state)
                        .with_context(|| format!("unknown state \"{}\"", access.state))?;
                    Ok((handle, state))
                })
                .collect()
        };

        let mut passes = Vec::with_capacity(self.passes.len());
        for pass in &self.passes {
            let data_pass = DataPass::new(pass.name.clone(), resolve(&pass.reads)?, resolve(&pass.writes)?);
            passes.push(graph.add_pass(data_pass));
        }

        // 依赖可以指向后声明的 Pass，所以放在所有 Pass 注册之后
        let pass_index = self.passes.iter().enumerate().map(|(i, p)| (p.name.as_str(), i)).collect::<HashMap<_, _>>();
        for (pass, desc) in passes.iter().zip(&self.passes) {
            for after in &desc.after {
                let dependency = pass_index
                    .get(after.pass.as_str())
                    .map(|&i| passes[i])
                    .with_context(|| format!("unknown pass \"{}\"", after.pass))?;
                let resource = *resources
                    .get(after.resource.as_str())
                    .with_context(|| format!("unknown resource \"{}\"", after.resource))?;
                graph.declare_dependency(*pass, resource, dependency)?;
            }
        }

        Ok(passes)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lumen_gfx::resources::image_allocator::GfxHeadlessImageAllocator;
    use lumen_render_graph::render_graph::{RgCyclePolicy, RgDependencyMode, RgImagePool};

    use super::*;

    const FORWARD: &str = include_str!("../frames/forward.toml");

    fn import_all(
        frame: &FrameDesc,
        allocator: &GfxHeadlessImageAllocator,
    ) -> HashMap<String, (vk::Image, vk::ImageView)> {
        frame
            .persistent_resources()
            .map(|r| {
                let image = allocator.create_image(&r.image_desc(), &r.name).unwrap();
                (r.name.clone(), (image.image, image.view))
            })
            .collect()
    }

    #[test]
    fn test_parse_forward_frame() {
        let frame = FrameDesc::parse(FORWARD).unwrap();
        assert_eq!(frame.resources.len(), 4);
        assert_eq!(frame.passes.len(), 5);
        assert_eq!(frame.persistent_resources().count(), 1);

        let shadow = frame.resources.iter().find(|r| r.name == "shadow_csm").unwrap();
        assert_eq!(shadow.layers, 4);
        assert_eq!(shadow.pooled_desc().aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            shadow.usage_flags(),
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
        );
    }

    #[test]
    fn test_defaults_without_config() {
        let frame = FrameDesc::parse(
            r#"
            [[resources]]
            name = "color"
            format = "R8G8B8A8_UNORM"
            width = 64
            height = 64
            "#,
        )
        .unwrap();
        assert_eq!(frame.config, RgConfig::default());
        assert_eq!(frame.resources[0].kind, ResourceKind::Pooled);
        assert_eq!(frame.resources[0].layers, 1);
        assert_eq!(frame.resources[0].initial_layout, FrameLayout::Undefined);
    }

    #[test]
    fn test_config_section() {
        let frame = FrameDesc::parse(
            r#"
            [config]
            idle_frame_threshold = 8
            dependency_mode = "inferred"
            cycle_policy = "skip_frame"
            "#,
        )
        .unwrap();
        assert_eq!(frame.config.idle_frame_threshold, 8);
        assert_eq!(frame.config.dependency_mode, RgDependencyMode::Inferred);
        assert_eq!(frame.config.cycle_policy, RgCyclePolicy::SkipFrame);
    }

    #[test]
    fn test_unknown_state_rejected() {
        let err = FrameDesc::parse(
            r#"
            [[resources]]
            name = "color"
            format = "R8G8B8A8_UNORM"
            width = 64
            height = 64

            [[passes]]
            name = "draw"
            writes = [{ resource = "color", state = "COLOR_ATTACHMENT_EXPLODE" }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("COLOR_ATTACHMENT_EXPLODE"));
    }

    #[test]
    fn test_unknown_references_rejected() {
        let unknown_resource = r#"
            [[passes]]
            name = "draw"
            reads = [{ resource = "missing", state = "SHADER_READ_FRAGMENT" }]
        "#;
        assert!(FrameDesc::parse(unknown_resource).unwrap_err().to_string().contains("missing"));

        let unknown_pass = r#"
            [[resources]]
            name = "color"
            format = "R8G8B8A8_UNORM"
            width = 64
            height = 64

            [[passes]]
            name = "draw"
            after = [{ pass = "ghost", resource = "color" }]
        "#;
        assert!(FrameDesc::parse(unknown_pass).unwrap_err().to_string().contains("ghost"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let duplicate = r#"
            [[passes]]
            name = "draw"
            [[passes]]
            name = "draw"
        "#;
        assert!(FrameDesc::parse(duplicate).unwrap_err().to_string().contains("duplicate pass"));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let bad_format = r#"
            [[resources]]
            name = "color"
            format = "R8G8B8A8_WHATEVER"
            width = 64
            height = 64
        "#;
        assert!(FrameDesc::parse(bad_format).is_err());
    }

    #[test]
    fn test_record_forward_frame() {
        let frame = FrameDesc::parse(FORWARD).unwrap();
        let pool = Arc::new(RgImagePool::new(GfxHeadlessImageAllocator::new()));
        let imported = import_all(&frame, pool.allocator());

        let mut graph = RenderGraph::new(pool.clone(), frame.config.clone());
        graph.begin_frame(0);
        let passes = frame.record(&mut graph, &imported).unwrap();
        assert_eq!(passes.len(), 5);
        assert_eq!(graph.frame_id(), 0);
        assert_eq!(graph.config(), &frame.config);
        assert!(Arc::ptr_eq(graph.pool(), &pool));
        assert_eq!(graph.resource_count(), 4);

        graph.compile().unwrap();
        assert_eq!(graph.ordered_pass_names(), vec!["shadow", "depth_prepass", "forward", "tonemap", "present"]);
        // depth、shadow_csm、hdr_color
        assert_eq!(pool.entry_count(), 3);
        assert_eq!(pool.in_use_count(), 3);

        graph.shutdown();
        assert_eq!(pool.in_use_count(), 0);
    }

    #[test]
    fn test_record_requires_imported_images() {
        let frame = FrameDesc::parse(FORWARD).unwrap();
        let pool = Arc::new(RgImagePool::new(GfxHeadlessImageAllocator::new()));
        let mut graph = RenderGraph::new(pool, frame.config.clone());
        graph.begin_frame(0);

        let err = frame.record(&mut graph, &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("swapchain"));
    }
}
