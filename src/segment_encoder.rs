//! 调用 ffmpeg 把源视频切成 `<stem>_NNNN.<ext>` 片段

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Result, SplitError};
use crate::ffmpeg_tools::CommandRunner;
use crate::metadata::{Segment, VideoAsset};
use crate::segment_planner::CutPlan;

/// 默认输出容器扩展名
pub const DEFAULT_EXTENSION: &str = "mp4";

/// 调用 ffmpeg 生成片段文件
pub struct SegmentEncoder {
    ffmpeg: PathBuf,
    runner: Arc<dyn CommandRunner>,
    extension: String,
}

impl SegmentEncoder {
    pub fn new(ffmpeg: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            runner,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// 第 `file_index` 个片段的文件名（从 0 开始，四位补零）
    pub fn segment_file_name(&self, stem: &str, file_index: usize) -> String {
        format!("{}_{:04}.{}", stem, file_index, self.extension)
    }

    /// 空计划走流复制生成单个文件，否则按切分点重新编码切片。
    /// 结果按文件名排序，并截断到 `limit` 个。
    pub fn encode(
        &self,
        video: &VideoAsset,
        plan: &CutPlan,
        duration: f64,
        out_dir: &Path,
        limit: Option<usize>,
    ) -> Result<Vec<Segment>> {
        std::fs::create_dir_all(out_dir)?;
        let stem = video.stem();
        self.remove_stale(out_dir, &stem)?;

        let paths = if plan.is_empty() {
            vec![self.copy_single(video, out_dir, &stem)?]
        } else {
            self.split(video, plan, out_dir, &stem)?
        };

        let bounds = plan.segment_bounds(duration);
        if paths.len() != bounds.len() {
            warn!(
                "⚠️  [切分] 片段数量 {} 与切分计划 {} 不一致",
                paths.len(),
                bounds.len()
            );
        }

        let take = limit.unwrap_or(usize::MAX);
        Ok(paths
            .into_iter()
            .take(take)
            .enumerate()
            .map(|(i, path)| {
                let (start, end) = bounds.get(i).copied().unwrap_or((duration, duration));
                Segment {
                    index: i + 1,
                    path,
                    start,
                    end,
                }
            })
            .collect())
    }

    fn copy_single(&self, video: &VideoAsset, out_dir: &Path, stem: &str) -> Result<PathBuf> {
        let output = out_dir.join(self.segment_file_name(stem, 0));
        info!("⏳ [切分] 视频不超过一个片段长度，直接复制为单个片段");

        self.runner
            .run(&self.ffmpeg, &copy_args(&video.path, &output))?
            .check("ffmpeg")?;

        if !output.is_file() {
            return Err(SplitError::FileResolutionFailure(output.display().to_string()));
        }
        Ok(output)
    }

    fn split(&self, video: &VideoAsset, plan: &CutPlan, out_dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
        // 模板中 % 是格式符，文件名本身的 % 需要写成 %%
        let pattern = out_dir.join(format!("{}_%04d.{}", stem.replace('%', "%%"), self.extension));
        info!("⏳ [切分] 按 {} 个切分点重新编码", plan.cuts().len());
        debug!("segment_times = {}", plan.segment_times_arg());

        self.runner
            .run(&self.ffmpeg, &segment_args(&video.path, plan, &pattern))?
            .check("ffmpeg")?;

        let parts = self.list_segments(out_dir, stem)?;
        if parts.is_empty() {
            return Err(SplitError::FileResolutionFailure(pattern.display().to_string()));
        }
        Ok(parts)
    }

    /// 列出 `<stem>_NNNN.<ext>` 文件，按文件名排序（四位补零即数字顺序）
    pub fn list_segments(&self, out_dir: &Path, stem: &str) -> Result<Vec<PathBuf>> {
        let mut parts: Vec<PathBuf> = std::fs::read_dir(out_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|name| self.is_segment_name(&name.to_string_lossy(), stem))
                    .unwrap_or(false)
            })
            .collect();
        parts.sort();
        Ok(parts)
    }

    fn is_segment_name(&self, name: &str, stem: &str) -> bool {
        let Some(rest) = name.strip_prefix(stem).and_then(|r| r.strip_prefix('_')) else {
            return false;
        };
        let Some(index) = rest
            .strip_suffix(self.extension.as_str())
            .and_then(|r| r.strip_suffix('.'))
        else {
            return false;
        };
        index.len() >= 4 && index.bytes().all(|b| b.is_ascii_digit())
    }

    /// 清理上一次运行留下的同名片段，避免混入本次结果
    fn remove_stale(&self, out_dir: &Path, stem: &str) -> Result<()> {
        for stale in self.list_segments(out_dir, stem)? {
            debug!("删除旧片段: {}", stale.display());
            std::fs::remove_file(&stale)?;
        }
        Ok(())
    }
}

fn copy_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c".to_string(),
        "copy".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

fn segment_args(input: &Path, plan: &CutPlan, pattern: &Path) -> Vec<String> {
    let mut args: Vec<String> = vec!["-y".to_string(), "-i".to_string(), input.to_string_lossy().into_owned()];
    args.extend(
        [
            "-c:v", "libx264",
            "-preset", "veryfast",
            "-crf", "23",
            "-c:a", "aac",
            "-b:a", "128k",
            "-f", "segment",
        ]
        .iter()
        .map(|s| s.to_string()),
    );
    args.push("-segment_times".to_string());
    args.push(plan.segment_times_arg());
    args.push("-reset_timestamps".to_string());
    args.push("1".to_string());
    args.push(pattern.to_string_lossy().into_owned());
    args
}
