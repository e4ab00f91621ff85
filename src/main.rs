use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use video_split::{
    process_video, resolve_video_file, ConfigLayer, ConfigLoader, LabelLayer, LabelPosition, VideoAsset,
};

/// 视频切分工具 - 把长视频切成固定长度的片段，并可选地为每段加上 "Part X" 标签
#[derive(Parser, Debug)]
#[command(name = "video-split")]
#[command(about = "视频切分工具：按固定时长切分视频，可选添加片段标签", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 切分本地视频文件
    Process(ProcessArgs),
    /// 生成默认配置文件
    InitConfig {
        /// 配置文件路径
        #[arg(default_value = "video-split.ini")]
        path: PathBuf,

        /// 覆盖已存在的文件
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug)]
struct ProcessArgs {
    /// 输入视频文件路径
    #[arg(short, long, required_unless_present = "from_dir", conflicts_with = "from_dir")]
    input: Option<PathBuf>,

    /// 在该目录中按标题查找视频（优先 <title>.mp4）
    #[arg(long, requires = "title")]
    from_dir: Option<PathBuf>,

    /// 视频标题（配合 --from-dir 使用，也用于清单）
    #[arg(long)]
    title: Option<String>,

    /// 输出目录
    #[arg(short, long, default_value = "./output")]
    output: PathBuf,

    /// 片段目录（默认 <output>/segments）
    #[arg(long)]
    segments_dir: Option<PathBuf>,

    /// 配置文件路径（可选，支持 .ini 格式）
    /// 优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    #[arg(long)]
    config: Option<PathBuf>,

    /// 片段长度（秒），可通过环境变量 VIDEO_SPLIT_SEGMENT_SECONDS 设置
    #[arg(short = 's', long)]
    segment_seconds: Option<f64>,

    /// 最多保留的片段数量
    #[arg(long)]
    limit: Option<usize>,

    /// 输出容器扩展名（默认 mp4）
    #[arg(long)]
    extension: Option<String>,

    /// 同时添加标签的片段数
    #[arg(short, long)]
    jobs: Option<usize>,

    /// ffmpeg 路径
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// ffprobe 路径
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// 日志级别（trace, debug, info, warn, error）
    #[arg(long)]
    log_level: Option<String>,

    /// 为每个片段添加标签
    #[arg(long)]
    label: bool,

    /// 标签模板，支持 {i}、{n}、{total}
    #[arg(long)]
    label_template: Option<String>,

    /// 标签字号
    #[arg(long)]
    label_fontsize: Option<u32>,

    /// 标签文字颜色（名称、#RRGGBB 或 color@alpha）
    #[arg(long)]
    label_color: Option<String>,

    /// 标签位置：tl, tr, tc, bl, br, center
    #[arg(long)]
    label_position: Option<LabelPosition>,

    /// 背景框颜色
    #[arg(long)]
    label_boxcolor: Option<String>,

    /// 背景框边距（像素）
    #[arg(long)]
    label_boxborderw: Option<u32>,

    /// 绘制背景框（覆盖配置文件中的 box = false）
    #[arg(long, overrides_with = "no_label_box")]
    label_box: bool,

    /// 不绘制背景框
    #[arg(long, overrides_with = "label_box")]
    no_label_box: bool,

    /// 使用圆角背景（栅格化图片 + overlay）
    #[arg(long)]
    label_rounded: bool,

    /// 圆角半径（像素）
    #[arg(long)]
    label_radius: Option<u32>,

    /// 圆角背景内边距（像素）
    #[arg(long)]
    label_padding: Option<u32>,

    /// 字体文件
    #[arg(long)]
    label_font: Option<PathBuf>,
}

impl ProcessArgs {
    /// 命令行这一层配置，未给出的开关保持 None 以便下层生效
    fn layer(&self) -> ConfigLayer {
        let flag = |on: bool, value: bool| on.then_some(value);
        ConfigLayer {
            segment_seconds: self.segment_seconds,
            limit: self.limit,
            extension: self.extension.clone(),
            jobs: self.jobs,
            ffmpeg_path: self.ffmpeg.clone(),
            ffprobe_path: self.ffprobe.clone(),
            label: LabelLayer {
                enabled: flag(self.label, true),
                template: self.label_template.clone(),
                font_size: self.label_fontsize,
                color: self.label_color.clone(),
                box_visible: flag(self.label_box, true).or(flag(self.no_label_box, false)),
                box_color: self.label_boxcolor.clone(),
                box_border_width: self.label_boxborderw,
                rounded: flag(self.label_rounded, true),
                radius: self.label_radius,
                padding: self.label_padding,
                position: self.label_position,
                font_file: self.label_font.clone(),
            },
            log_level: self.log_level.clone(),
        }
    }

    fn video(&self) -> Result<VideoAsset> {
        match (&self.input, &self.from_dir) {
            (Some(input), _) => Ok(match &self.title {
                Some(title) => VideoAsset::new(input, title.as_str()),
                None => VideoAsset::from_path(input),
            }),
            (None, Some(dir)) => {
                let title = self.title.as_deref().ok_or_else(|| anyhow!("--from-dir 需要 --title"))?;
                resolve_video_file(dir, title).context("查找视频文件失败")
            }
            (None, None) => Err(anyhow!("需要 --input 或 --from-dir")),
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Commands::Process(process) => {
            // 从配置文件、环境变量和命令行参数加载配置
            let config = ConfigLoader::load(process.config.as_deref(), process.layer())
                .context("加载配置失败")?;
            init_tracing(&config.log_level);

            let video = process.video()?;
            let segments_dir = process
                .segments_dir
                .clone()
                .unwrap_or_else(|| process.output.join("segments"));

            println!(
                "使用配置: segment_seconds={}s, limit={}, jobs={}, label={}",
                config.process.segment_seconds,
                config
                    .process
                    .limit
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| "无".to_string()),
                config.process.jobs,
                match &config.process.label {
                    Some(spec) if spec.rounded => "圆角",
                    Some(_) => "drawtext",
                    None => "关闭",
                }
            );

            let output = process_video(&video, &segments_dir, config.process)
                .await
                .context("处理视频失败")?;

            println!("生成 {} 个片段:", output.segments.len());
            for segment in &output.segments {
                println!(
                    "  {:>4}  {:>9.2}s - {:>9.2}s  {}",
                    segment.index,
                    segment.start,
                    segment.end,
                    segment.path.display()
                );
            }
        }
        Commands::InitConfig { path, force } => {
            if path.exists() && !force {
                return Err(anyhow!("配置文件已存在: {}（使用 --force 覆盖）", path.display()));
            }
            ConfigLoader::create_default_config(&path)?;
            println!("已生成配置文件: {}", path.display());
        }
    }

    Ok(())
}
