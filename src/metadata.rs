use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SplitError};
use crate::segment_planner::CutPlan;

/// 待切分的源视频（由下载环节产出，此处只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAsset {
    /// 视频文件路径
    pub path: PathBuf,
    /// 显示标题
    pub title: String,
}

impl VideoAsset {
    pub fn new(path: impl Into<PathBuf>, title: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
        }
    }

    /// 以文件名（不含扩展名）作为标题
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        Self { path, title }
    }

    /// 输出文件名前缀
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string())
    }
}

/// 切分产生的单个片段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// 片段序号（从 1 开始）
    pub index: usize,
    /// 片段文件路径
    pub path: PathBuf,
    /// 片段在源视频中的开始时间（秒）
    pub start: f64,
    /// 片段在源视频中的结束时间（秒）
    pub end: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// 在下载目录中按标题查找视频文件：优先 `<title>.mp4`，否则取第一个 `<title>.*`
pub fn resolve_video_file(dir: &Path, title: &str) -> Result<VideoAsset> {
    let preferred = dir.join(format!("{}.mp4", title));
    if preferred.is_file() {
        return Ok(VideoAsset::new(preferred, title));
    }

    let prefix = format!("{}.", title);
    let mut matches: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|_| SplitError::FileResolutionFailure(dir.display().to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .map(|name| name.to_string_lossy().starts_with(&prefix))
                    .unwrap_or(false)
        })
        .collect();
    matches.sort();

    matches
        .into_iter()
        .next()
        .map(|path| VideoAsset::new(path, title))
        .ok_or_else(|| SplitError::FileResolutionFailure(format!("{}/{}.*", dir.display(), title)))
}

/// 单个片段的清单条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEntry {
    /// 片段序号（从 1 开始）
    pub index: usize,
    /// 片段文件名
    pub file: String,
    /// 开始时间（秒）
    pub start_time: f64,
    /// 结束时间（秒）
    pub end_time: f64,
    /// 持续时间（秒）
    pub duration: f64,
    /// 叠加的标签文字
    pub label: Option<String>,
}

/// 一次切分的清单，写入 segments.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentManifest {
    /// 源视频路径
    pub input_video: String,
    /// 源视频标题
    pub title: String,
    /// 源视频总时长（秒）
    pub total_duration: f64,
    /// 目标片段时长（秒）
    pub segment_seconds: f64,
    /// 切分点
    pub cut_points: CutPlan,
    /// 片段数量
    pub segment_count: usize,
    /// 是否叠加了标签
    pub labeled: bool,
    /// 片段列表
    pub segments: Vec<SegmentEntry>,
    /// 生成时间
    pub created_at: String,
}

impl SegmentManifest {
    pub const FILE_NAME: &'static str = "segments.json";

    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
