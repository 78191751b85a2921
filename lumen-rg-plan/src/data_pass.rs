use lumen_render_graph::render_graph::{RgImageState, RgPass, RgPassBuilder, RgPassContext, RgResourceHandle};

/// 由帧描述生成的 Pass
///
/// 只声明资源访问，执行时不录制任何绘制命令，只打印拿到的物理图像
pub struct DataPass {
    name: String,
    reads: Vec<(RgResourceHandle, RgImageState)>,
    writes: Vec<(RgResourceHandle, RgImageState)>,
}

impl DataPass {
    pub fn new(
        name: String,
        reads: Vec<(RgResourceHandle, RgImageState)>,
        writes: Vec<(RgResourceHandle, RgImageState)>,
    ) -> Self {
        Self { name, reads, writes }
    }
}

impl RgPass for DataPass {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(&mut self, builder: &mut RgPassBuilder) {
        for &(handle, state) in &self.reads {
            builder.read(handle, state);
        }
        for &(handle, state) in &self.writes {
            builder.write(handle, state);
        }
    }

    fn execute(&mut self, ctx: &RgPassContext<'_>) {
        log::debug!("pass \"{}\": recording into {:?}", self.name, ctx.cmd.vk_handle());
        for (handle, state) in self.reads.iter().chain(&self.writes) {
            let Some(resource) = ctx.resource(*handle) else {
                log::warn!("pass \"{}\": resource {:?} is not part of this frame", self.name, handle);
                continue;
            };
            match ctx.image(*handle) {
                Some((image, view)) => log::debug!(
                    "pass \"{}\": \"{}\" image {:?} view {:?} @ {:?}",
                    self.name,
                    resource.name,
                    image,
                    view,
                    state.layout
                ),
                None => log::warn!("pass \"{}\": \"{}\" has no physical image", self.name, resource.name),
            }
        }
    }
}
