//! 片段标签（"Part X"）的公共部分：配置、位置、字体查找和渲染接口

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// 标签位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LabelPosition {
    #[serde(rename = "tl")]
    TopLeft,
    #[serde(rename = "tr")]
    TopRight,
    #[default]
    #[serde(rename = "tc")]
    TopCenter,
    #[serde(rename = "bl")]
    BottomLeft,
    #[serde(rename = "br")]
    BottomRight,
    #[serde(rename = "center")]
    Center,
}

/// 标签与画面边缘的距离（像素）
pub const MARGIN: u32 = 20;

impl LabelPosition {
    pub fn tag(self) -> &'static str {
        match self {
            Self::TopLeft => "tl",
            Self::TopRight => "tr",
            Self::TopCenter => "tc",
            Self::BottomLeft => "bl",
            Self::BottomRight => "br",
            Self::Center => "center",
        }
    }

    /// drawtext 的 x/y 表达式
    pub fn drawtext_exprs(self) -> (String, String) {
        self.exprs("w", "h", "text_w", "text_h")
    }

    /// overlay 的 x/y 表达式
    pub fn overlay_exprs(self) -> (String, String) {
        self.exprs("main_w", "main_h", "overlay_w", "overlay_h")
    }

    fn exprs(self, w: &str, h: &str, item_w: &str, item_h: &str) -> (String, String) {
        let m = MARGIN;
        let left = m.to_string();
        let right = format!("{w}-{item_w}-{m}");
        let h_center = format!("({w}-{item_w})/2");
        let top = m.to_string();
        let bottom = format!("{h}-{item_h}-{m}");
        let v_center = format!("({h}-{item_h})/2");

        match self {
            Self::TopLeft => (left, top),
            Self::TopRight => (right, top),
            Self::TopCenter => (h_center, top),
            Self::BottomLeft => (left, bottom),
            Self::BottomRight => (right, bottom),
            Self::Center => (h_center, v_center),
        }
    }
}

impl FromStr for LabelPosition {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tl" => Ok(Self::TopLeft),
            "tr" => Ok(Self::TopRight),
            "tc" => Ok(Self::TopCenter),
            "bl" => Ok(Self::BottomLeft),
            "br" => Ok(Self::BottomRight),
            "center" => Ok(Self::Center),
            other => Err(format!("未知的标签位置: {other}（可选 tl, tr, tc, bl, br, center）")),
        }
    }
}

/// 标签配置，整个运行期间共用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelSpec {
    /// 文字模板，支持 {i}（1..N）、{n}（同 {i}）、{total}（N）
    pub template: String,
    /// 字号（像素）
    pub font_size: u32,
    /// 文字颜色
    pub text_color: String,
    /// 是否显示背景框
    pub box_visible: bool,
    /// 背景框颜色
    pub box_color: String,
    /// 背景框边距（drawtext 的 boxborderw）
    pub box_border_width: u32,
    /// 是否使用圆角背景（栅格化 + overlay）
    pub rounded: bool,
    /// 圆角半径（像素，仅圆角模式）
    pub radius: u32,
    /// 文字与背景边缘的内边距（像素，仅圆角模式）
    pub padding: u32,
    /// 位置
    pub position: LabelPosition,
    /// 指定字体文件，不设置时自动查找系统字体
    pub font_file: Option<PathBuf>,
}

impl Default for LabelSpec {
    fn default() -> Self {
        Self {
            template: "Part {i}".to_string(),
            font_size: 54,
            text_color: "black".to_string(),
            box_visible: true,
            box_color: "white".to_string(),
            box_border_width: 14,
            rounded: false,
            radius: 24,
            padding: 18,
            position: LabelPosition::TopCenter,
            font_file: None,
        }
    }
}

impl LabelSpec {
    /// 将片段序号代入模板
    pub fn caption(&self, index: usize, total: usize) -> String {
        self.template
            .replace("{i}", &index.to_string())
            .replace("{n}", &index.to_string())
            .replace("{total}", &total.to_string())
    }

    /// 实际使用的字体文件：显式指定且存在的优先，否则查找系统字体
    pub fn resolve_font(&self) -> Option<PathBuf> {
        self.font_file
            .as_ref()
            .filter(|p| p.is_file())
            .cloned()
            .or_else(find_default_font)
    }
}

/// 常见系统字体位置，第一个存在的胜出
const FONT_CANDIDATES: &[&str] = &[
    "C:/Windows/Fonts/arial.ttf",
    "C:/Windows/Fonts/ARIAL.TTF",
    "C:/Windows/Fonts/segoeui.ttf",
    "C:/Windows/Fonts/SegoeUI.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
];

pub fn find_default_font() -> Option<PathBuf> {
    FONT_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

/// 把一个片段渲染成带标签的新文件。
///
/// 实现不得修改输入文件，返回新文件路径；由调用方完成替换。
/// 临时产物在任何退出路径上都必须清理。
pub trait LabelRenderer: Send + Sync {
    fn render(&self, segment: &Path, caption: &str, spec: &LabelSpec) -> Result<PathBuf>;
}

/// 标签输出文件：`<stem>_labeled.<ext>`，与原片段同目录
pub fn labeled_path(segment: &Path) -> PathBuf {
    let stem = segment
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match segment.extension() {
        Some(ext) => format!("{}_labeled.{}", stem, ext.to_string_lossy()),
        None => format!("{}_labeled", stem),
    };
    segment.with_file_name(name)
}
