use anyhow::{anyhow, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::labeler::{LabelPosition, LabelSpec};
use crate::processor::ProcessConfig;

/// 完整运行配置（处理配置 + 日志级别）
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 视频切分配置
    pub process: ProcessConfig,
    /// 日志级别（trace, debug, info, warn, error）
    pub log_level: String,
}

/// 一层配置来源。所有字段可选，未设置的由下一层补上
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    pub segment_seconds: Option<f64>,
    pub limit: Option<usize>,
    pub extension: Option<String>,
    pub jobs: Option<usize>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub label: LabelLayer,
    pub log_level: Option<String>,
}

/// `[label]` 节
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelLayer {
    pub enabled: Option<bool>,
    pub template: Option<String>,
    pub font_size: Option<u32>,
    pub color: Option<String>,
    pub box_visible: Option<bool>,
    pub box_color: Option<String>,
    pub box_border_width: Option<u32>,
    pub rounded: Option<bool>,
    pub radius: Option<u32>,
    pub padding: Option<u32>,
    pub position: Option<LabelPosition>,
    pub font_file: Option<PathBuf>,
}

impl ConfigLayer {
    /// 用 `lower` 填补当前层未设置的字段
    pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            segment_seconds: self.segment_seconds.or(lower.segment_seconds),
            limit: self.limit.or(lower.limit),
            extension: self.extension.or(lower.extension),
            jobs: self.jobs.or(lower.jobs),
            ffmpeg_path: self.ffmpeg_path.or(lower.ffmpeg_path),
            ffprobe_path: self.ffprobe_path.or(lower.ffprobe_path),
            label: self.label.or(lower.label),
            log_level: self.log_level.or(lower.log_level),
        }
    }

    /// 套用默认值并校验
    pub fn resolve(self) -> Result<AppConfig> {
        let defaults = ProcessConfig::default();
        let segment_seconds = self.segment_seconds.unwrap_or(defaults.segment_seconds);
        if !(segment_seconds.is_finite() && segment_seconds > 0.0) {
            return Err(anyhow!("片段长度必须大于 0: {}", segment_seconds));
        }
        let jobs = self.jobs.unwrap_or(defaults.jobs);
        if jobs == 0 {
            return Err(anyhow!("jobs 必须至少为 1"));
        }
        if self.limit == Some(0) {
            return Err(anyhow!("limit 必须至少为 1"));
        }

        let extension = self
            .extension
            .map(|e| e.trim_start_matches('.').to_string())
            .filter(|e| !e.is_empty())
            .unwrap_or(defaults.extension);

        let label = if self.label.enabled.unwrap_or(false) {
            Some(self.label.into_spec())
        } else {
            None
        };

        Ok(AppConfig {
            process: ProcessConfig {
                segment_seconds,
                limit: self.limit,
                extension,
                label,
                jobs,
                ffmpeg_path: self.ffmpeg_path,
                ffprobe_path: self.ffprobe_path,
                write_manifest: defaults.write_manifest,
            },
            log_level: self.log_level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

impl LabelLayer {
    fn or(self, lower: LabelLayer) -> LabelLayer {
        LabelLayer {
            enabled: self.enabled.or(lower.enabled),
            template: self.template.or(lower.template),
            font_size: self.font_size.or(lower.font_size),
            color: self.color.or(lower.color),
            box_visible: self.box_visible.or(lower.box_visible),
            box_color: self.box_color.or(lower.box_color),
            box_border_width: self.box_border_width.or(lower.box_border_width),
            rounded: self.rounded.or(lower.rounded),
            radius: self.radius.or(lower.radius),
            padding: self.padding.or(lower.padding),
            position: self.position.or(lower.position),
            font_file: self.font_file.or(lower.font_file),
        }
    }

    fn into_spec(self) -> LabelSpec {
        let d = LabelSpec::default();
        LabelSpec {
            template: self.template.unwrap_or(d.template),
            font_size: self.font_size.unwrap_or(d.font_size),
            text_color: self.color.unwrap_or(d.text_color),
            box_visible: self.box_visible.unwrap_or(d.box_visible),
            box_color: self.box_color.unwrap_or(d.box_color),
            box_border_width: self.box_border_width.unwrap_or(d.box_border_width),
            rounded: self.rounded.unwrap_or(d.rounded),
            radius: self.radius.unwrap_or(d.radius),
            padding: self.padding.unwrap_or(d.padding),
            position: self.position.unwrap_or(d.position),
            font_file: self.font_file.or(d.font_file),
        }
    }
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从多个源加载配置，优先级：命令行参数 > 环境变量 > 配置文件 > 默认值
    pub fn load(config_file: Option<&Path>, cli: ConfigLayer) -> Result<AppConfig> {
        Self::load_with_env(config_file, cli, |key| env::var(key).ok())
    }

    /// 同 [`ConfigLoader::load`]，环境变量由 `lookup` 提供
    pub fn load_with_env<F>(config_file: Option<&Path>, cli: ConfigLayer, lookup: F) -> Result<AppConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 1. 配置文件（显式指定时必须存在）
        let file_layer = match config_file {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::find_default_location() {
                Some(path) => Self::load_from_file(&path)?,
                None => ConfigLayer::default(),
            },
        };

        // 2. 环境变量
        let env_layer = Self::load_from_env(lookup)?;

        // 3. 合并
        cli.or(env_layer).or(file_layer).resolve()
    }

    /// 读取 `VIDEO_SPLIT_*` 环境变量
    fn load_from_env<F>(lookup: F) -> Result<ConfigLayer>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let source = "环境变量";

        Ok(ConfigLayer {
            segment_seconds: parse_opt(source, "VIDEO_SPLIT_SEGMENT_SECONDS", get("VIDEO_SPLIT_SEGMENT_SECONDS"))?,
            limit: parse_opt(source, "VIDEO_SPLIT_LIMIT", get("VIDEO_SPLIT_LIMIT"))?,
            extension: get("VIDEO_SPLIT_EXTENSION"),
            jobs: parse_opt(source, "VIDEO_SPLIT_JOBS", get("VIDEO_SPLIT_JOBS"))?,
            ffmpeg_path: get("VIDEO_SPLIT_FFMPEG").map(PathBuf::from),
            ffprobe_path: get("VIDEO_SPLIT_FFPROBE").map(PathBuf::from),
            label: LabelLayer {
                enabled: parse_bool_opt(source, "VIDEO_SPLIT_LABEL", get("VIDEO_SPLIT_LABEL"))?,
                template: get("VIDEO_SPLIT_LABEL_TEMPLATE"),
                font_size: parse_opt(source, "VIDEO_SPLIT_LABEL_FONTSIZE", get("VIDEO_SPLIT_LABEL_FONTSIZE"))?,
                color: get("VIDEO_SPLIT_LABEL_COLOR"),
                box_visible: parse_bool_opt(source, "VIDEO_SPLIT_LABEL_BOX", get("VIDEO_SPLIT_LABEL_BOX"))?,
                box_color: get("VIDEO_SPLIT_LABEL_BOXCOLOR"),
                box_border_width: parse_opt(source, "VIDEO_SPLIT_LABEL_BOXBORDERW", get("VIDEO_SPLIT_LABEL_BOXBORDERW"))?,
                rounded: parse_bool_opt(source, "VIDEO_SPLIT_LABEL_ROUNDED", get("VIDEO_SPLIT_LABEL_ROUNDED"))?,
                radius: parse_opt(source, "VIDEO_SPLIT_LABEL_RADIUS", get("VIDEO_SPLIT_LABEL_RADIUS"))?,
                padding: parse_opt(source, "VIDEO_SPLIT_LABEL_PADDING", get("VIDEO_SPLIT_LABEL_PADDING"))?,
                position: parse_opt(source, "VIDEO_SPLIT_LABEL_POSITION", get("VIDEO_SPLIT_LABEL_POSITION"))?,
                font_file: get("VIDEO_SPLIT_LABEL_FONT").map(PathBuf::from),
            },
            log_level: get("VIDEO_SPLIT_LOG_LEVEL").or_else(|| get("LOG_LEVEL")),
        })
    }

    /// 从INI配置文件加载配置
    fn load_from_file(config_path: &Path) -> Result<ConfigLayer> {
        if !config_path.exists() {
            return Err(anyhow!("配置文件不存在: {}", config_path.display()));
        }

        let mut ini = configparser::ini::Ini::new();
        // 颜色值可以是 #RRGGBB，只把 ; 当作注释
        ini.set_comment_symbols(&[';']);
        ini.load(config_path)
            .map_err(|e| anyhow!("读取配置文件失败: {}: {}", config_path.display(), e))?;

        let get = |section: &str, key: &str| ini.get(section, key).filter(|v| !v.trim().is_empty());
        let source = config_path.display().to_string();
        let source = source.as_str();

        let layer = ConfigLayer {
            segment_seconds: parse_opt(source, "segment_seconds", get("video_split", "segment_seconds"))?,
            limit: parse_opt(source, "limit", get("video_split", "limit"))?,
            extension: get("video_split", "extension"),
            jobs: parse_opt(source, "jobs", get("video_split", "jobs"))?,
            ffmpeg_path: get("video_split", "ffmpeg_path").map(PathBuf::from),
            ffprobe_path: get("video_split", "ffprobe_path").map(PathBuf::from),
            label: LabelLayer {
                enabled: parse_bool_opt(source, "enabled", get("label", "enabled"))?,
                template: get("label", "template"),
                font_size: parse_opt(source, "font_size", get("label", "font_size"))?,
                color: get("label", "color"),
                box_visible: parse_bool_opt(source, "box", get("label", "box"))?,
                box_color: get("label", "box_color"),
                box_border_width: parse_opt(source, "box_border_width", get("label", "box_border_width"))?,
                rounded: parse_bool_opt(source, "rounded", get("label", "rounded"))?,
                radius: parse_opt(source, "radius", get("label", "radius"))?,
                padding: parse_opt(source, "padding", get("label", "padding"))?,
                position: parse_opt(source, "position", get("label", "position"))?,
                font_file: get("label", "font_file").map(PathBuf::from),
            },
            log_level: get("logging", "level"),
        };
        Ok(layer)
    }

    /// 按顺序查找默认位置的配置文件
    fn find_default_location() -> Option<PathBuf> {
        let mut candidates = vec![
            // 1. 当前目录
            PathBuf::from("video-split.ini"),
            PathBuf::from(".video-split.ini"),
        ];
        // 2. 用户主目录
        if let Some(home) = env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".video-split.ini"));
        }
        // 3. /etc (Linux/macOS)
        candidates.push(PathBuf::from("/etc/video-split.ini"));

        candidates.into_iter().find(|p| p.is_file())
    }

    /// 创建默认配置文件
    pub fn create_default_config(config_path: &Path) -> Result<()> {
        let process = ProcessConfig::default();
        let label = LabelSpec::default();
        let mut ini = configparser::ini::Ini::new();

        let mut set = |section: &str, key: &str, value: String| {
            ini.set(section, key, Some(value));
        };
        set("video_split", "segment_seconds", process.segment_seconds.to_string());
        set("video_split", "limit", String::new());
        set("video_split", "extension", process.extension.clone());
        set("video_split", "jobs", process.jobs.to_string());
        set("video_split", "ffmpeg_path", String::new());
        set("video_split", "ffprobe_path", String::new());
        set("label", "enabled", "false".to_string());
        set("label", "template", label.template.clone());
        set("label", "font_size", label.font_size.to_string());
        set("label", "color", label.text_color.clone());
        set("label", "box", label.box_visible.to_string());
        set("label", "box_color", label.box_color.clone());
        set("label", "box_border_width", label.box_border_width.to_string());
        set("label", "rounded", label.rounded.to_string());
        set("label", "radius", label.radius.to_string());
        set("label", "padding", label.padding.to_string());
        set("label", "position", label.position.tag().to_string());
        set("label", "font_file", String::new());
        set("logging", "level", "info".to_string());

        ini.write(config_path)
            .with_context(|| format!("写入配置文件失败: {}", config_path.display()))?;

        Ok(())
    }
}

fn parse_opt<T>(source: &str, key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.trim()
            .parse::<T>()
            .map_err(|e| anyhow!("{} 中 {} 的值无效 ({}): {}", source, key, v, e))
    })
    .transpose()
}

fn parse_bool_opt(source: &str, key: &str, raw: Option<String>) -> Result<Option<bool>> {
    raw.map(|v| match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("{} 中 {} 的值无效: {}", source, key, v)),
    })
    .transpose()
}
