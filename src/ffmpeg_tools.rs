use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{Result, SplitError};

/// 外部程序执行结果
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// 退出码（被信号终止时为 None）
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// 退出状态的可读形式，用于错误信息
    pub fn status_text(&self) -> String {
        match self.code {
            Some(code) => code.to_string(),
            None => "signal".to_string(),
        }
    }

    /// 非零退出时转换为 EncodeFailure
    pub fn check(self, tool: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SplitError::EncodeFailure {
                tool: tool.to_string(),
                status: self.status_text(),
                stderr: self.stderr,
            })
        }
    }
}

/// 执行外部程序的接口。
///
/// 调用方阻塞直到子进程退出。测试中用脚本化实现替代真实的 ffmpeg/ffprobe。
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput>;
}

/// 使用 `std::process::Command` 的默认实现
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &Path, args: &[String]) -> Result<CommandOutput> {
        debug!("执行命令: {} {:?}", program.display(), args);
        let start = Instant::now();

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| SplitError::Spawn {
                program: program.display().to_string(),
                source,
            })?;

        debug!(
            "命令结束: {} 状态={:?} 耗时 {:.2}秒",
            program.display(),
            output.status.code(),
            start.elapsed().as_secs_f64()
        );

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// ffmpeg / ffprobe 的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaTools {
    pub ffmpeg: PathBuf,
    /// 找不到 ffprobe 时为 None，时长探测改用 ffmpeg 回退方案
    pub ffprobe: Option<PathBuf>,
}

impl MediaTools {
    /// 按优先级定位工具：显式路径 > PATH 查找 > 裸命令名（仅 ffmpeg）
    pub fn locate(ffmpeg: Option<&Path>, ffprobe: Option<&Path>) -> Self {
        let ffmpeg = ffmpeg
            .map(Path::to_path_buf)
            .or_else(|| which::which("ffmpeg").ok())
            .unwrap_or_else(|| {
                warn!("⚠️  [工具] 未在 PATH 中找到 ffmpeg，将直接使用命令名 ffmpeg");
                PathBuf::from("ffmpeg")
            });

        let ffprobe = ffprobe
            .map(Path::to_path_buf)
            .or_else(|| which::which("ffprobe").ok())
            .or_else(|| sibling_ffprobe(&ffmpeg));

        if ffprobe.is_none() {
            warn!("⚠️  [工具] 未找到 ffprobe，将通过 ffmpeg -i 获取时长");
        }

        Self { ffmpeg, ffprobe }
    }
}

/// 在 ffmpeg 所在目录下查找 ffprobe
fn sibling_ffprobe(ffmpeg: &Path) -> Option<PathBuf> {
    let dir = ffmpeg.parent().filter(|d| !d.as_os_str().is_empty())?;
    ["ffprobe", "ffprobe.exe"]
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}
