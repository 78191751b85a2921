/// debug label 使用的颜色
pub struct LabelColor;
impl LabelColor {
    const BLUE: glam::Vec4 = glam::vec4(0.0, 0.0, 1.0, 1.0);

    /// render graph 中每个 pass 的 label
    pub const COLOR_PASS: glam::Vec4 = Self::BLUE;
}
