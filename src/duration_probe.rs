//! 视频时长探测：优先 ffprobe，找不到时解析 `ffmpeg -i` 的诊断输出

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Result, SplitError};
use crate::ffmpeg_tools::{CommandRunner, MediaTools};

/// 获取视频总时长（秒）
pub trait DurationProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Result<f64>;
}

/// 通过 ffprobe 只读取容器层的 duration 字段
pub struct FfprobeProbe {
    ffprobe: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl FfprobeProbe {
    pub fn new(ffprobe: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            runner,
        }
    }

    fn args(path: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1:nokey=1".to_string(),
            path.to_string_lossy().into_owned(),
        ]
    }
}

impl DurationProbe for FfprobeProbe {
    fn probe(&self, path: &Path) -> Result<f64> {
        let output = self.runner.run(&self.ffprobe, &Self::args(path))?;
        if !output.success() {
            warn!("⚠️  [时长探测] ffprobe 退出状态 {}: {}", output.status_text(), output.stderr.trim());
            return Err(SplitError::ProbeFailure {
                path: path.to_path_buf(),
            });
        }

        output
            .stdout
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| SplitError::ProbeFailure {
                path: path.to_path_buf(),
            })
    }
}

/// ffprobe 不可用时的回退：`ffmpeg -i` 只检查不转码，从 stderr 里解析时长
pub struct FfmpegBannerProbe {
    ffmpeg: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl FfmpegBannerProbe {
    pub fn new(ffmpeg: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            runner,
        }
    }
}

impl DurationProbe for FfmpegBannerProbe {
    fn probe(&self, path: &Path) -> Result<f64> {
        let args = vec!["-i".to_string(), path.to_string_lossy().into_owned()];
        // 没有输出文件时 ffmpeg 总是以非零状态退出，这里不看退出码
        let output = self.runner.run(&self.ffmpeg, &args)?;
        debug!("ffmpeg -i 退出状态 {}", output.status_text());

        parse_duration_banner(&output.stderr).ok_or_else(|| SplitError::ProbeFailure {
            path: path.to_path_buf(),
        })
    }
}

/// 从 ffmpeg 的诊断输出中解析 `Duration: HH:MM:SS.cc`
pub fn parse_duration_banner(text: &str) -> Option<f64> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = PATTERN
        .get_or_init(|| Regex::new(r"Duration: (\d{2}):(\d{2}):(\d{2})\.(\d{2})").ok())
        .as_ref()?;

    let caps = pattern.captures(text)?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());

    let hours = field(1)?;
    let minutes = field(2)?;
    let seconds = field(3)?;
    let centis = field(4)?;

    Some(f64::from(hours) * 3600.0 + f64::from(minutes) * 60.0 + f64::from(seconds) + f64::from(centis) / 100.0)
}

/// 根据可用工具选择探测策略：有 ffprobe 用 ffprobe，否则用 ffmpeg 回退
pub fn probe_for(tools: &MediaTools, runner: Arc<dyn CommandRunner>) -> Box<dyn DurationProbe> {
    match &tools.ffprobe {
        Some(ffprobe) => Box::new(FfprobeProbe::new(ffprobe.clone(), runner)),
        None => Box::new(FfmpegBannerProbe::new(tools.ffmpeg.clone(), runner)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg_tools::testing::ScriptedRunner;

    const BANNER: &str = "ffmpeg version 6.1 Copyright (c) 2000-2023\n\
Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':\n\
  Duration: 00:12:30.45, start: 0.000000, bitrate: 1205 kb/s\n\
  Stream #0:0: Video: h264\n\
At least one output file must be specified\n";

    #[test]
    fn test_parse_duration_banner() {
        let seconds = parse_duration_banner(BANNER).unwrap();
        assert!((seconds - 750.45).abs() < 1e-9);
    }

    #[test]
    fn test_parse_duration_banner_with_hours() {
        let seconds = parse_duration_banner("  Duration: 01:02:03.04, start").unwrap();
        assert!((seconds - 3723.04).abs() < 1e-9);
    }

    #[test]
    fn test_parse_duration_banner_missing() {
        assert_eq!(parse_duration_banner("Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_duration_banner(""), None);
    }

    #[test]
    fn test_ffprobe_parses_bare_number() {
        let runner = Arc::new(ScriptedRunner::new().respond(0, "125.042000\n", ""));
        let probe = FfprobeProbe::new("ffprobe", runner.clone());
        let duration = probe.probe(Path::new("in.mp4")).unwrap();
        assert!((duration - 125.042).abs() < 1e-9);

        let calls = runner.recorded();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1.contains(&"format=duration".to_string()));
        assert_eq!(calls[0].1.last().unwrap(), "in.mp4");
    }

    #[test]
    fn test_ffprobe_failure_is_probe_failure() {
        let runner = Arc::new(ScriptedRunner::new().respond(1, "", "No such file"));
        let probe = FfprobeProbe::new("ffprobe", runner);
        assert!(matches!(
            probe.probe(Path::new("missing.mp4")),
            Err(SplitError::ProbeFailure { .. })
        ));
    }

    #[test]
    fn test_ffprobe_garbage_is_probe_failure() {
        let runner = Arc::new(ScriptedRunner::new().respond(0, "N/A\n", ""));
        let probe = FfprobeProbe::new("ffprobe", runner);
        assert!(matches!(
            probe.probe(Path::new("in.mp4")),
            Err(SplitError::ProbeFailure { .. })
        ));
    }

    #[test]
    fn test_banner_probe_ignores_nonzero_exit() {
        let runner = Arc::new(ScriptedRunner::new().respond(1, "", BANNER));
        let probe = FfmpegBannerProbe::new("ffmpeg", runner.clone());
        let duration = probe.probe(Path::new("clip.mp4")).unwrap();
        assert!((duration - 750.45).abs() < 1e-9);
        assert_eq!(runner.recorded()[0].1, vec!["-i".to_string(), "clip.mp4".to_string()]);
    }

    #[test]
    fn test_probe_for_selects_fallback_without_ffprobe() {
        let runner = Arc::new(ScriptedRunner::new().respond(1, "", BANNER));
        let tools = MediaTools {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: None,
        };
        let probe = probe_for(&tools, runner.clone());
        probe.probe(Path::new("clip.mp4")).unwrap();
        assert_eq!(runner.recorded()[0].0, PathBuf::from("ffmpeg"));
    }
}
