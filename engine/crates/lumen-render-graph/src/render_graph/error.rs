use lumen_gfx::GfxError;

/// render graph 的错误
#[derive(Debug, thiserror::Error)]
pub enum RgError {
    /// 在 `compile` 成功之前调用了 `execute`
    #[error("render graph executed before compile, frame skipped")]
    NotCompiled,

    /// 显式依赖（或推断出的依赖）构成了环
    #[error("dependency cycle among passes: {passes:?}")]
    DependencyCycle { passes: Vec<String> },

    /// 图像池无法为池化资源分配图像
    #[error("failed to allocate pooled image for resource \"{name}\"")]
    PoolAllocation {
        name: String,
        #[source]
        source: GfxError,
    },

    #[error("resource handle {index} does not exist in the current frame")]
    InvalidResource { index: u32 },

    /// 句柄来自之前的帧
    #[error("resource handle {index} was issued in frame epoch {epoch}, current epoch is {current}")]
    StaleResourceHandle { index: u32, epoch: u32, current: u32 },

    #[error("pass {index} does not exist in the current frame")]
    InvalidPass { index: usize },
}
