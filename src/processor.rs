use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::duration_probe::{self, DurationProbe};
use crate::error::{Result, SplitError};
use crate::ffmpeg_tools::{CommandRunner, MediaTools, SystemRunner};
use crate::filter_labeler::FilterLabeler;
use crate::labeler::{LabelRenderer, LabelSpec};
use crate::metadata::{Segment, SegmentEntry, SegmentManifest, VideoAsset};
use crate::raster_labeler::RasterLabeler;
use crate::reporter::{PipelineState, Reporter, TracingReporter};
use crate::segment_encoder::{SegmentEncoder, DEFAULT_EXTENSION};
use crate::segment_planner::{self, CutPlan};

/// 切分处理配置
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// 目标片段时长（秒）
    pub segment_seconds: f64,
    /// 最多保留的片段数量
    pub limit: Option<usize>,
    /// 输出容器扩展名
    pub extension: String,
    /// 标签配置，None 表示不加标签
    pub label: Option<LabelSpec>,
    /// 同时处理标签的片段数，1 为逐个顺序处理
    pub jobs: usize,
    /// ffmpeg 路径（可选）
    pub ffmpeg_path: Option<PathBuf>,
    /// ffprobe 路径（可选）
    pub ffprobe_path: Option<PathBuf>,
    /// 是否写出 segments.json
    pub write_manifest: bool,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            segment_seconds: 60.0,
            limit: None,
            extension: DEFAULT_EXTENSION.to_string(),
            label: None,
            jobs: 1,
            ffmpeg_path: None,
            ffprobe_path: None,
            write_manifest: true,
        }
    }
}

/// 处理结果
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// 片段输出目录
    pub output_dir: PathBuf,
    /// 源视频时长（秒）
    pub duration: f64,
    /// 切分计划
    pub cut_plan: CutPlan,
    /// 片段列表（按序号排列）
    pub segments: Vec<Segment>,
    /// 每个片段的标签文字（未加标签时为空）
    pub captions: Vec<String>,
    /// segments.json 路径
    pub manifest: Option<PathBuf>,
}

/// 切分流水线：时长探测 → 切分规划 → 切分 → （可选）标签
pub struct Pipeline {
    config: ProcessConfig,
    probe: Arc<dyn DurationProbe>,
    encoder: Arc<SegmentEncoder>,
    labeler: Option<Arc<dyn LabelRenderer>>,
    reporter: Arc<dyn Reporter>,
}

impl Pipeline {
    /// 按配置组装各组件，标签策略由 `rounded` 决定
    pub fn new(
        config: ProcessConfig,
        tools: &MediaTools,
        runner: Arc<dyn CommandRunner>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        let probe: Arc<dyn DurationProbe> = Arc::from(duration_probe::probe_for(tools, runner.clone()));
        let encoder = Arc::new(
            SegmentEncoder::new(tools.ffmpeg.clone(), runner.clone()).with_extension(config.extension.clone()),
        );
        let labeler: Option<Arc<dyn LabelRenderer>> = config.label.as_ref().map(|spec| {
            if spec.rounded {
                Arc::new(RasterLabeler::new(tools.ffmpeg.clone(), runner.clone())) as Arc<dyn LabelRenderer>
            } else {
                Arc::new(FilterLabeler::new(tools.ffmpeg.clone(), runner.clone())) as Arc<dyn LabelRenderer>
            }
        });

        Self::with_parts(config, probe, encoder, labeler, reporter)
    }

    pub fn with_parts(
        config: ProcessConfig,
        probe: Arc<dyn DurationProbe>,
        encoder: Arc<SegmentEncoder>,
        labeler: Option<Arc<dyn LabelRenderer>>,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            config,
            probe,
            encoder,
            labeler,
            reporter,
        }
    }

    pub async fn run(&self, video: &VideoAsset, output_dir: &Path) -> Result<ProcessOutput> {
        let total_start = Instant::now();
        info!("🎬 [视频切分] 开始处理视频: {}", video.path.display());
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if !video.path.is_file() {
            error!("❌ [视频切分] 输入文件不存在: {}", video.path.display());
            return Err(SplitError::FileResolutionFailure(video.path.display().to_string()));
        }
        self.reporter
            .state(PipelineState::Acquired, &format!("{} ({})", video.title, video.path.display()));

        // 1. 时长探测
        let probe_start = Instant::now();
        let probe = self.probe.clone();
        let source = video.path.clone();
        let duration = blocking(move || probe.probe(&source)).await.map_err(|e| {
            error!("❌ [视频切分] 获取视频时长失败: {}", e);
            e
        })?;
        info!(
            "  • 视频时长: {:.2}秒（耗时 {:.2}秒）",
            duration,
            probe_start.elapsed().as_secs_f64()
        );
        self.reporter.state(PipelineState::Probed, &format!("{:.2}秒", duration));

        // 2. 切分规划
        let cut_plan = segment_planner::plan(duration, self.config.segment_seconds);
        if cut_plan.is_empty() {
            info!("  • 视频不超过 {} 秒的片段长度，只生成一个片段", self.config.segment_seconds);
        } else {
            info!("  • 切分点: {}", cut_plan.segment_times_arg());
        }
        self.reporter.state(
            PipelineState::Planned,
            &format!("{} 个片段", cut_plan.segment_count()),
        );

        // 3. 切分
        let encode_start = Instant::now();
        let encoder = self.encoder.clone();
        let (asset, plan, dir, limit) = (
            video.clone(),
            cut_plan.clone(),
            output_dir.to_path_buf(),
            self.config.limit,
        );
        let segments = blocking(move || encoder.encode(&asset, &plan, duration, &dir, limit))
            .await
            .map_err(|e| {
                error!("❌ [视频切分] 切分失败: {}", e);
                e
            })?;
        info!(
            "  • 生成片段: {} 个（耗时 {:.2}秒）",
            segments.len(),
            encode_start.elapsed().as_secs_f64()
        );
        self.reporter.state(
            PipelineState::Encoded,
            &format!("{} 个片段 -> {}", segments.len(), output_dir.display()),
        );

        // 4. 标签
        let mut captions = Vec::new();
        if let (Some(labeler), Some(spec)) = (&self.labeler, &self.config.label) {
            if !segments.is_empty() {
                let label_start = Instant::now();
                captions = self.label_segments(labeler.clone(), spec, &segments).await.map_err(|e| {
                    error!("❌ [视频切分] 添加标签失败: {}", e);
                    e
                })?;
                info!(
                    "  • 标签完成: {} 个片段（耗时 {:.2}秒）",
                    captions.len(),
                    label_start.elapsed().as_secs_f64()
                );
                self.reporter
                    .state(PipelineState::Labeled, &format!("{} 个片段", captions.len()));
            }
        }

        let manifest = if self.config.write_manifest {
            let manifest = self.manifest(video, duration, &cut_plan, &segments, &captions);
            Some(manifest.write_to(output_dir)?)
        } else {
            None
        };

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        info!(
            "🎉 [视频切分] 处理完成！总耗时: {:.2}秒",
            total_start.elapsed().as_secs_f64()
        );
        self.reporter.state(
            PipelineState::Done,
            &format!("{} 个片段位于 {}", segments.len(), output_dir.display()),
        );

        Ok(ProcessOutput {
            output_dir: output_dir.to_path_buf(),
            duration,
            cut_plan,
            segments,
            captions,
            manifest,
        })
    }

    /// 按序号给每个片段加标签并原位替换，任何一个失败都会中止后续处理
    async fn label_segments(
        &self,
        labeler: Arc<dyn LabelRenderer>,
        spec: &LabelSpec,
        segments: &[Segment],
    ) -> Result<Vec<String>> {
        let total = segments.len();
        let spec = Arc::new(spec.clone());
        let captions: Vec<String> = segments.iter().map(|s| spec.caption(s.index, total)).collect();

        if self.config.jobs <= 1 {
            for (segment, caption) in segments.iter().zip(&captions) {
                let (labeler, spec, path, caption) =
                    (labeler.clone(), spec.clone(), segment.path.clone(), caption.clone());
                blocking(move || label_one(labeler.as_ref(), &path, &caption, &spec)).await?;
                self.reporter.segment_labeled(segment.index, total, &segment.path);
            }
            return Ok(captions);
        }

        let semaphore = Arc::new(Semaphore::new(self.config.jobs));
        let failed = Arc::new(AtomicBool::new(false));
        let mut tasks = JoinSet::new();

        for (segment, caption) in segments.iter().zip(&captions) {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| SplitError::Io(std::io::Error::other(e)))?;
            let (labeler, spec, failed) = (labeler.clone(), spec.clone(), failed.clone());
            let (index, path, caption) = (segment.index, segment.path.clone(), caption.clone());

            tasks.spawn_blocking(move || {
                let _permit = permit;
                if failed.load(Ordering::SeqCst) {
                    return Ok(None);
                }
                match label_one(labeler.as_ref(), &path, &caption, &spec) {
                    Ok(()) => Ok(Some((index, path))),
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        Err(e)
                    }
                }
            });
        }

        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some((index, path)))) => self.reporter.segment_labeled(index, total, &path),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(join) => {
                    first_error.get_or_insert(SplitError::Io(std::io::Error::other(join)));
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(captions),
        }
    }

    fn manifest(
        &self,
        video: &VideoAsset,
        duration: f64,
        cut_plan: &CutPlan,
        segments: &[Segment],
        captions: &[String],
    ) -> SegmentManifest {
        SegmentManifest {
            input_video: video.path.to_string_lossy().into_owned(),
            title: video.title.clone(),
            total_duration: duration,
            segment_seconds: self.config.segment_seconds,
            cut_points: cut_plan.clone(),
            segment_count: segments.len(),
            labeled: !captions.is_empty(),
            segments: segments
                .iter()
                .enumerate()
                .map(|(i, s)| SegmentEntry {
                    index: s.index,
                    file: s
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    start_time: s.start,
                    end_time: s.end,
                    duration: s.duration(),
                    label: captions.get(i).cloned(),
                })
                .collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// 渲染一个片段并用结果替换原文件
fn label_one(labeler: &dyn LabelRenderer, segment: &Path, caption: &str, spec: &LabelSpec) -> Result<()> {
    let rendered = labeler.render(segment, caption, spec)?;
    replace_segment(&rendered, segment)
}

/// 用渲染结果替换原片段。直接重命名失败时（例如目标文件仍被占用）先删除原文件再重命名
pub fn replace_segment(rendered: &Path, original: &Path) -> Result<()> {
    if std::fs::rename(rendered, original).is_ok() {
        return Ok(());
    }
    if original.exists() {
        std::fs::remove_file(original)?;
    }
    std::fs::rename(rendered, original)?;
    Ok(())
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SplitError::Io(std::io::Error::other(e)))?
}

/// 使用系统 ffmpeg/ffprobe 处理视频文件
pub async fn process_video(
    video: &VideoAsset,
    output_dir: impl AsRef<Path>,
    config: ProcessConfig,
) -> Result<ProcessOutput> {
    let tools = MediaTools::locate(config.ffmpeg_path.as_deref(), config.ffprobe_path.as_deref());
    Pipeline::new(config, &tools, Arc::new(SystemRunner), Arc::new(TracingReporter))
        .run(video, output_dir.as_ref())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg_tools::testing::ScriptedRunner;
    use crate::reporter::testing::RecordingReporter;
    use std::sync::atomic::AtomicUsize;

    /// 模拟 ffprobe（返回 duration）和 ffmpeg（写出输出文件）
    fn fake_media(duration: &str, segments: usize) -> Arc<ScriptedRunner> {
        Arc::new(
            ScriptedRunner::new()
                .respond(0, duration, "")
                .on_call(move |args| {
                    if args.iter().any(|a| a == "format=duration") {
                        return;
                    }
                    let last = args.last().unwrap();
                    if last.contains("%04d") {
                        for i in 0..segments {
                            std::fs::write(last.replace("%04d", &format!("{:04}", i)), b"encoded").unwrap();
                        }
                    } else if args.iter().any(|a| a == "-vf" || a == "-filter_complex") {
                        std::fs::write(last, b"labeled").unwrap();
                    } else {
                        std::fs::write(last, b"encoded").unwrap();
                    }
                }),
        )
    }

    fn tools() -> MediaTools {
        MediaTools {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: Some(PathBuf::from("ffprobe")),
        }
    }

    fn source(dir: &Path) -> VideoAsset {
        let path = dir.join("talk.mp4");
        std::fs::write(&path, b"source").unwrap();
        VideoAsset::new(path, "Talk")
    }

    struct FailingLabeler {
        calls: AtomicUsize,
        fail_on: usize,
    }

    impl LabelRenderer for FailingLabeler {
        fn render(&self, segment: &Path, _caption: &str, _spec: &LabelSpec) -> Result<PathBuf> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call == self.fail_on {
                return Err(SplitError::EncodeFailure {
                    tool: "ffmpeg drawtext".to_string(),
                    status: "1".to_string(),
                    stderr: "boom".to_string(),
                });
            }
            let out = crate::labeler::labeled_path(segment);
            std::fs::write(&out, b"labeled")?;
            Ok(out)
        }
    }

    #[tokio::test]
    async fn test_split_without_labels() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("segments");
        let runner = fake_media("125.0\n", 2);
        let reporter = Arc::new(RecordingReporter::default());

        let pipeline = Pipeline::new(ProcessConfig::default(), &tools(), runner.clone(), reporter.clone());
        let result = pipeline.run(&video, &out).await.unwrap();

        assert_eq!(result.cut_plan.cuts(), &[60.0]);
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].duration(), 65.0);
        assert!(result.captions.is_empty());
        assert_eq!(
            *reporter.states.lock().unwrap(),
            vec![
                PipelineState::Acquired,
                PipelineState::Probed,
                PipelineState::Planned,
                PipelineState::Encoded,
                PipelineState::Done,
            ]
        );

        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(result.manifest.unwrap()).unwrap()).unwrap();
        assert_eq!(manifest["segment_count"], 2);
        assert_eq!(manifest["segments"][1]["file"], "talk_0001.mp4");
        assert_eq!(manifest["labeled"], false);
    }

    #[tokio::test]
    async fn test_boundary_duration_uses_copy_mode() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("segments");
        let runner = fake_media("60.000000\n", 0);

        let pipeline = Pipeline::new(
            ProcessConfig::default(),
            &tools(),
            runner.clone(),
            Arc::new(RecordingReporter::default()),
        );
        let result = pipeline.run(&video, &out).await.unwrap();

        assert_eq!(result.segments.len(), 1);
        let calls = runner.recorded();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1.windows(2).any(|w| w[0] == "-c" && w[1] == "copy"));
        assert!(!calls[1].1.contains(&"-segment_times".to_string()));
    }

    #[tokio::test]
    async fn test_labels_replace_segments_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("segments");
        let runner = fake_media("180.0\n", 3);
        let reporter = Arc::new(RecordingReporter::default());
        let config = ProcessConfig {
            label: Some(LabelSpec {
                template: "Part {i}/{total}".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };

        let result = Pipeline::new(config, &tools(), runner.clone(), reporter.clone())
            .run(&video, &out)
            .await
            .unwrap();

        assert_eq!(result.captions, vec!["Part 1/3", "Part 2/3", "Part 3/3"]);
        for segment in &result.segments {
            assert_eq!(std::fs::read(&segment.path).unwrap(), b"labeled");
        }
        let leftovers: Vec<_> = std::fs::read_dir(&out)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.contains("_labeled"))
            .collect();
        assert!(leftovers.is_empty());

        let labeled = reporter.labeled.lock().unwrap();
        assert_eq!(labeled.iter().map(|(i, _, _)| *i).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(reporter.states.lock().unwrap().contains(&PipelineState::Labeled));

        // 标签渲染时的 drawtext 文字
        let drawtexts: Vec<String> = runner
            .recorded()
            .into_iter()
            .filter_map(|(_, args)| {
                let pos = args.iter().position(|a| a == "-vf")?;
                Some(args[pos + 1].clone())
            })
            .collect();
        assert_eq!(drawtexts.len(), 3);
        assert!(drawtexts[2].contains("text='Part 3/3'"));
    }

    #[tokio::test]
    async fn test_limit_applies_before_labeling() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("segments");
        let runner = fake_media("600.0\n", 10);
        let config = ProcessConfig {
            limit: Some(3),
            label: Some(LabelSpec::default()),
            ..Default::default()
        };

        let result = Pipeline::new(config, &tools(), runner, Arc::new(RecordingReporter::default()))
            .run(&video, &out)
            .await
            .unwrap();

        assert_eq!(result.segments.len(), 3);
        assert_eq!(result.captions, vec!["Part 1", "Part 2", "Part 3"]);
    }

    #[tokio::test]
    async fn test_renderer_failure_aborts_remaining_segments() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("segments");
        let runner = fake_media("300.0\n", 5);
        let reporter = Arc::new(RecordingReporter::default());
        let labeler = Arc::new(FailingLabeler {
            calls: AtomicUsize::new(0),
            fail_on: 2,
        });
        let config = ProcessConfig {
            label: Some(LabelSpec::default()),
            ..Default::default()
        };
        let tools = tools();
        let pipeline = Pipeline::with_parts(
            config.clone(),
            Arc::from(duration_probe::probe_for(&tools, runner.clone())),
            Arc::new(SegmentEncoder::new("ffmpeg", runner.clone())),
            Some(labeler.clone() as Arc<dyn LabelRenderer>),
            reporter.clone(),
        );

        let err = pipeline.run(&video, &out).await.unwrap_err();
        assert!(matches!(err, SplitError::EncodeFailure { .. }));
        assert_eq!(labeler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(reporter.labeled.lock().unwrap().len(), 1);
        assert!(!reporter.states.lock().unwrap().contains(&PipelineState::Done));
        // 失败片段保持原样
        assert_eq!(std::fs::read(out.join("talk_0001.mp4")).unwrap(), b"encoded");
    }

    #[tokio::test]
    async fn test_parallel_labeling() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("segments");
        let runner = fake_media("300.0\n", 5);
        let reporter = Arc::new(RecordingReporter::default());
        let config = ProcessConfig {
            label: Some(LabelSpec::default()),
            jobs: 3,
            ..Default::default()
        };

        let result = Pipeline::new(config, &tools(), runner, reporter.clone())
            .run(&video, &out)
            .await
            .unwrap();

        assert_eq!(result.segments.len(), 5);
        let mut indices: Vec<usize> = reporter.labeled.lock().unwrap().iter().map(|(i, _, _)| *i).collect();
        indices.sort();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
        for segment in &result.segments {
            assert_eq!(std::fs::read(&segment.path).unwrap(), b"labeled");
        }
    }

    #[tokio::test]
    async fn test_parallel_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let out = dir.path().join("segments");
        let runner = fake_media("300.0\n", 5);
        let config = ProcessConfig {
            label: Some(LabelSpec::default()),
            jobs: 2,
            ..Default::default()
        };
        let tools = tools();
        let pipeline = Pipeline::with_parts(
            config,
            Arc::from(duration_probe::probe_for(&tools, runner.clone())),
            Arc::new(SegmentEncoder::new("ffmpeg", runner.clone())),
            Some(Arc::new(FailingLabeler {
                calls: AtomicUsize::new(0),
                fail_on: 1,
            }) as Arc<dyn LabelRenderer>),
            Arc::new(RecordingReporter::default()),
        );

        assert!(matches!(
            pipeline.run(&video, &out).await,
            Err(SplitError::EncodeFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_probe_failure_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let video = source(dir.path());
        let runner = Arc::new(ScriptedRunner::new().respond(1, "", "moov atom not found"));

        let pipeline = Pipeline::new(
            ProcessConfig::default(),
            &tools(),
            runner.clone(),
            Arc::new(RecordingReporter::default()),
        );
        let err = pipeline.run(&video, &dir.path().join("segments")).await.unwrap_err();

        assert!(matches!(err, SplitError::ProbeFailure { .. }));
        assert_eq!(runner.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_input_is_resolution_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let pipeline = Pipeline::new(
            ProcessConfig::default(),
            &tools(),
            runner.clone(),
            Arc::new(RecordingReporter::default()),
        );
        let video = VideoAsset::from_path(dir.path().join("missing.mp4"));

        assert!(matches!(
            pipeline.run(&video, dir.path()).await,
            Err(SplitError::FileResolutionFailure(_))
        ));
        assert!(runner.recorded().is_empty());
    }

    #[test]
    fn test_replace_segment_overwrites_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("talk_0000.mp4");
        let rendered = dir.path().join("talk_0000_labeled.mp4");
        std::fs::write(&original, b"old").unwrap();
        std::fs::write(&rendered, b"new").unwrap();

        replace_segment(&rendered, &original).unwrap();
        assert_eq!(std::fs::read(&original).unwrap(), b"new");
        assert!(!rendered.exists());
    }
}
