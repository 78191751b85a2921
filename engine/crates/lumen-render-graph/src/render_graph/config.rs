use serde::Deserialize;

/// Pass 之间的依赖从哪里来
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RgDependencyMode {
    /// 只使用 Pass 显式声明的依赖
    #[default]
    Explicit,
    /// 在显式依赖之上，按声明顺序推断 RAW / WAW / WAR 依赖
    Inferred,
}

/// 检测到依赖环时的处理方式
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RgCyclePolicy {
    /// 记录错误后按声明顺序执行
    ///
    /// 这一帧仍然会渲染，但环内的 Pass 之间不保证同步正确
    #[default]
    #[serde(rename = "fallback")]
    FallbackToDeclarationOrder,
    /// 返回 [`RgError::DependencyCycle`](super::RgError::DependencyCycle)，这一帧不录制
    SkipFrame,
}

/// render graph 的配置
///
/// 可以从 TOML 读取，缺省字段使用默认值：
///
/// ```toml
/// idle_frame_threshold = 3
/// evict_on_begin_frame = true
/// dependency_mode = "explicit"
/// cycle_policy = "fallback"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RgConfig {
    /// 池化图像空闲超过多少帧后被销毁
    pub idle_frame_threshold: u64,
    /// `begin_frame` 时是否自动回收空闲图像
    pub evict_on_begin_frame: bool,
    pub dependency_mode: RgDependencyMode,
    pub cycle_policy: RgCyclePolicy,
}

impl Default for RgConfig {
    fn default() -> Self {
        Self {
            idle_frame_threshold: 3,
            evict_on_begin_frame: true,
            dependency_mode: RgDependencyMode::Explicit,
            cycle_policy: RgCyclePolicy::FallbackToDeclarationOrder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_toml() {
        let config: RgConfig = toml::from_str("").unwrap();
        assert_eq!(config, RgConfig::default());
        assert_eq!(config.idle_frame_threshold, 3);
        assert!(config.evict_on_begin_frame);
    }

    #[test]
    fn test_config_from_toml() {
        let config: RgConfig = toml::from_str(
            r#"
            idle_frame_threshold = 8
            dependency_mode = "inferred"
            cycle_policy = "skip_frame"
            "#,
        )
        .unwrap();
        assert_eq!(config.idle_frame_threshold, 8);
        assert!(config.evict_on_begin_frame);
        assert_eq!(config.dependency_mode, RgDependencyMode::Inferred);
        assert_eq!(config.cycle_policy, RgCyclePolicy::SkipFrame);

        let fallback: RgConfig = toml::from_str(r#"cycle_policy = "fallback""#).unwrap();
        assert_eq!(fallback.cycle_policy, RgCyclePolicy::FallbackToDeclarationOrder);
    }
}
