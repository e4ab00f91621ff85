//! 按固定片段长度计算切分点

use serde::{Deserialize, Serialize};

/// 切分点列表（秒），严格递增且都小于视频时长
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CutPlan {
    cuts: Vec<f64>,
}

impl CutPlan {
    pub fn cuts(&self) -> &[f64] {
        &self.cuts
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    /// 最终产生的片段数量
    pub fn segment_count(&self) -> usize {
        self.cuts.len() + 1
    }

    /// 传给 `-segment_times` 的参数，保留三位小数，逗号分隔
    pub fn segment_times_arg(&self) -> String {
        self.cuts
            .iter()
            .map(|t| format!("{:.3}", t))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// 每个片段的 [开始, 结束) 区间
    pub fn segment_bounds(&self, duration: f64) -> Vec<(f64, f64)> {
        let mut bounds = Vec::with_capacity(self.segment_count());
        let mut start = 0.0;
        for &cut in &self.cuts {
            bounds.push((start, cut));
            start = cut;
        }
        bounds.push((start, duration));
        bounds
    }
}

/// 计算切分点。
///
/// 只放 `n_full - 1` 个切分点，余下的时长全部并入最后一段，
/// 保证最后一段不短于 `segment_seconds`。时长不超过一段时返回空计划。
pub fn plan(duration: f64, segment_seconds: f64) -> CutPlan {
    if !(segment_seconds > 0.0) || !duration.is_finite() || duration <= segment_seconds {
        return CutPlan::default();
    }

    let n_full = (duration / segment_seconds).floor() as usize;
    let cut_count = n_full.saturating_sub(1);

    CutPlan {
        cuts: (1..=cut_count).map(|i| segment_seconds * i as f64).collect(),
    }
}
