//! 标签颜色解析
//!
//! 支持 `#RGB`、`#RRGGBB`、`#RRGGBBAA`、少量颜色名，以及 `@alpha` 后缀
//! （0.0-1.0，覆盖颜色自带的透明度）。无法识别的输入退回不透明白色，从不报错。

use serde::{Deserialize, Serialize};

/// RGBA 颜色，各分量 0-255
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn with_alpha(self, a: u8) -> Self {
        Self { a, ..self }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// 解析颜色描述，见模块文档
    pub fn parse(spec: &str) -> Self {
        let (base, alpha) = match spec.split_once('@') {
            Some((base, alpha)) => (base, parse_alpha(alpha)),
            None => (spec, None),
        };

        let color = parse_hex(base)
            .or_else(|| named(base))
            .unwrap_or(Color::WHITE);

        match alpha {
            Some(a) => color.with_alpha(a),
            None => color,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// `0.5` -> 128，超出 [0, 1] 的值被截断，无法解析时忽略后缀
fn parse_alpha(text: &str) -> Option<u8> {
    let value: f64 = text.trim().parse().ok()?;
    if value.is_nan() {
        return None;
    }
    Some((value.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn parse_hex(base: &str) -> Option<Color> {
    let hex = base.strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();

    match hex.len() {
        3 => {
            let nibble = |i: usize| {
                let c = hex.get(i..i + 1)?;
                u8::from_str_radix(&c.repeat(2), 16).ok()
            };
            Some(Color::rgba(nibble(0)?, nibble(1)?, nibble(2)?, 255))
        }
        6 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, 255)),
        8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

fn named(base: &str) -> Option<Color> {
    let color = match base.trim().to_ascii_lowercase().as_str() {
        "white" => Color::WHITE,
        "black" => Color::BLACK,
        "yellow" => Color::rgba(255, 255, 0, 255),
        "red" => Color::rgba(255, 0, 0, 255),
        "green" => Color::rgba(0, 128, 0, 255),
        "blue" => Color::rgba(0, 0, 255, 255),
        _ => return None,
    };
    Some(color)
}
