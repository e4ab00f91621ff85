use std::fmt;
use std::path::Path;

use tracing::info;

/// 流水线状态，线性推进不回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Acquired,
    Probed,
    Planned,
    Encoded,
    Labeled,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Acquired => "获取",
            Self::Probed => "时长探测",
            Self::Planned => "切分规划",
            Self::Encoded => "切分",
            Self::Labeled => "标签",
            Self::Done => "完成",
        };
        f.write_str(name)
    }
}

/// 接收流水线进度的协作方（命令行、界面或测试）
pub trait Reporter: Send + Sync {
    /// 进入新状态
    fn state(&self, state: PipelineState, detail: &str);

    /// 第 `index`/`total` 个片段已加上标签
    fn segment_labeled(&self, index: usize, total: usize, path: &Path);
}

/// 默认实现：输出到 tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn state(&self, state: PipelineState, detail: &str) {
        info!("✅ [{}] {}", state, detail);
    }

    fn segment_labeled(&self, index: usize, total: usize, path: &Path) {
        info!("🏷️  [标签] {}/{}: {}", index, total, path.display());
    }
}
