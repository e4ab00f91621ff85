use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::ffmpeg_tools::CommandRunner;
use crate::labeler::{labeled_path, LabelRenderer, LabelSpec};

/// 通过 ffmpeg drawtext 直接绘制文字（矩形背景框）
pub struct FilterLabeler {
    ffmpeg: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl FilterLabeler {
    pub fn new(ffmpeg: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            runner,
        }
    }

    /// 构造 drawtext 滤镜。字体为 None 时交给 fontconfig 按名字查找 Arial
    pub fn build_filter(caption: &str, spec: &LabelSpec, font: Option<&Path>) -> String {
        let mut kvs: Vec<String> = Vec::new();

        match font {
            Some(path) => {
                let posix = path.to_string_lossy().replace('\\', "/");
                kvs.push(format!("fontfile='{}'", escape_drawtext(&posix)));
            }
            None => kvs.push("font=Arial".to_string()),
        }
        kvs.push(format!("text='{}'", escape_drawtext(caption)));
        kvs.push(format!("fontcolor={}", spec.text_color));
        kvs.push(format!("fontsize={}", spec.font_size));
        kvs.push(format!("box={}", if spec.box_visible { 1 } else { 0 }));
        if spec.box_visible {
            kvs.push(format!("boxcolor={}", spec.box_color));
            kvs.push(format!("boxborderw={}", spec.box_border_width));
        }

        let (x, y) = spec.position.drawtext_exprs();
        kvs.push(format!("x={x}"));
        kvs.push(format!("y={y}"));

        format!("drawtext={}", kvs.join(":"))
    }
}

impl LabelRenderer for FilterLabeler {
    fn render(&self, segment: &Path, caption: &str, spec: &LabelSpec) -> Result<PathBuf> {
        let output = labeled_path(segment);
        let font = spec.resolve_font();
        let filter = Self::build_filter(caption, spec, font.as_deref());
        debug!("drawtext 滤镜: {}", filter);

        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            segment.to_string_lossy().into_owned(),
            "-vf".to_string(),
            filter,
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "veryfast".to_string(),
            "-crf".to_string(),
            "20".to_string(),
            "-c:a".to_string(),
            "copy".to_string(),
            output.to_string_lossy().into_owned(),
        ];

        let result = self
            .runner
            .run(&self.ffmpeg, &args)
            .and_then(|out| out.check("ffmpeg drawtext"));
        if let Err(e) = result {
            let _ = std::fs::remove_file(&output);
            return Err(e);
        }
        Ok(output)
    }
}

/// 转义 drawtext 选项值中的 `\`、`:` 和 `'`
pub fn escape_drawtext(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SplitError;
    use crate::ffmpeg_tools::testing::ScriptedRunner;
    use crate::labeler::LabelPosition;

    #[test]
    fn test_escape_drawtext() {
        assert_eq!(escape_drawtext("Part 1"), "Part 1");
        assert_eq!(escape_drawtext("a:b"), "a\\:b");
        assert_eq!(escape_drawtext("it's"), "it\\'s");
        assert_eq!(escape_drawtext("c:\\x"), "c\\:\\\\x");
    }

    #[test]
    fn test_filter_with_box() {
        let spec = LabelSpec::default();
        let filter = FilterLabeler::build_filter("Part 2", &spec, None);
        assert_eq!(
            filter,
            "drawtext=font=Arial:text='Part 2':fontcolor=black:fontsize=54:box=1:\
             boxcolor=white:boxborderw=14:x=(w-text_w)/2:y=20"
        );
    }

    #[test]
    fn test_filter_without_box() {
        let spec = LabelSpec {
            box_visible: false,
            position: LabelPosition::BottomLeft,
            ..Default::default()
        };
        let filter = FilterLabeler::build_filter("x", &spec, None);
        assert!(filter.contains("box=0"));
        assert!(!filter.contains("boxcolor"));
        assert!(filter.ends_with("x=20:y=h-text_h-20"));
    }

    #[test]
    fn test_windows_font_path_escaped() {
        let spec = LabelSpec::default();
        let filter = FilterLabeler::build_filter("x", &spec, Some(Path::new("C:\\Windows\\Fonts\\arial.ttf")));
        assert!(filter.starts_with("drawtext=fontfile='C\\:/Windows/Fonts/arial.ttf':"));
    }

    #[test]
    fn test_placement_is_deterministic() {
        let spec = LabelSpec {
            position: LabelPosition::TopRight,
            ..Default::default()
        };
        let a = FilterLabeler::build_filter("Part 7: 'finale'", &spec, None);
        let b = FilterLabeler::build_filter("Part 7: 'finale'", &spec, None);
        assert_eq!(a, b);
        assert!(a.contains("text='Part 7\\: \\'finale\\''"));
        assert!(a.contains("x=w-text_w-20:y=20"));
    }

    #[test]
    fn test_render_invokes_ffmpeg_without_touching_input() {
        let dir = tempfile::tempdir().unwrap();
        let segment = dir.path().join("talk_0000.mp4");
        std::fs::write(&segment, b"original").unwrap();

        let runner = Arc::new(ScriptedRunner::new());
        let labeler = FilterLabeler::new("ffmpeg", runner.clone());
        let output = labeler.render(&segment, "Part 1", &LabelSpec::default()).unwrap();

        assert_eq!(output, dir.path().join("talk_0000_labeled.mp4"));
        assert_eq!(std::fs::read(&segment).unwrap(), b"original");

        let args = &runner.recorded()[0].1;
        let vf = args.iter().position(|a| a == "-vf").unwrap();
        assert!(args[vf + 1].starts_with("drawtext="));
        assert!(args.windows(2).any(|w| w[0] == "-c:a" && w[1] == "copy"));
        assert_eq!(args.last().unwrap(), &output.to_string_lossy().into_owned());
    }

    #[test]
    fn test_render_failure_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let segment = dir.path().join("talk_0000.mp4");
        std::fs::write(&segment, b"original").unwrap();
        let partial = dir.path().join("talk_0000_labeled.mp4");

        let runner = Arc::new(
            ScriptedRunner::new()
                .respond(1, "", "Error initializing filter 'drawtext'")
                .on_call(|args| std::fs::write(args.last().unwrap(), b"partial").unwrap()),
        );
        let labeler = FilterLabeler::new("ffmpeg", runner);
        let err = labeler.render(&segment, "Part 1", &LabelSpec::default()).unwrap_err();

        assert!(matches!(err, SplitError::EncodeFailure { .. }));
        assert!(!partial.exists());
        assert!(segment.exists());
    }
}
