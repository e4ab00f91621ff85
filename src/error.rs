//! 切分流水线的错误类型

use std::path::PathBuf;

use thiserror::Error;

/// 流水线各阶段可能返回的错误
#[derive(Error, Debug)]
pub enum SplitError {
    /// ffprobe 与 ffmpeg 回退方案都没能给出时长
    #[error("无法获取视频时长: {path}")]
    ProbeFailure { path: PathBuf },

    /// 编码器以非零状态退出，携带其 stderr 输出
    #[error("{tool} 执行失败 (状态 {status}):\n{stderr}")]
    EncodeFailure {
        tool: String,
        status: String,
        stderr: String,
    },

    /// 请求了圆角标签，但栅格化能力不可用
    #[error("圆角标签不可用: {0}。请关闭 --label-rounded 选项")]
    MissingRasterEngine(String),

    /// 预期的文件不存在
    #[error("找不到文件: {0}")]
    FileResolutionFailure(String),

    /// 外部程序无法启动
    #[error("无法启动 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("清单序列化失败: {0}")]
    Manifest(#[from] serde_json::Error),

    #[cfg(feature = "raster")]
    #[error("标签图片生成失败: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, SplitError>;
