//! 圆角标签：先把文字和圆角背景栅格化成透明 PNG，再用 ffmpeg overlay 叠加到视频上

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::ffmpeg_tools::CommandRunner;
use crate::labeler::{LabelPosition, LabelRenderer, LabelSpec};

/// 临时文件，离开作用域时删除
#[derive(Debug)]
pub struct TempArtifact {
    path: PathBuf,
}

impl TempArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("已删除临时文件: {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("⚠️  [标签] 删除临时文件失败: {} - {}", self.path.display(), e),
        }
    }
}

/// 栅格化标签 + overlay 合成
pub struct RasterLabeler {
    ffmpeg: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl RasterLabeler {
    pub fn new(ffmpeg: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            runner,
        }
    }

    /// 同目录下唯一命名的标签图片
    fn overlay_path(output: &Path) -> PathBuf {
        output.with_file_name(format!("label_{}.png", Uuid::new_v4().simple()))
    }

    /// 两路输入（视频 + 标签图片）overlay 合成。
    /// `overlay` 在函数返回时被释放，无论成功与否。
    pub fn composite(
        &self,
        segment: &Path,
        output: &Path,
        overlay: TempArtifact,
        position: LabelPosition,
    ) -> Result<()> {
        let (x, y) = position.overlay_exprs();
        let args = vec![
            "-y".to_string(),
            "-i".to_string(),
            segment.to_string_lossy().into_owned(),
            "-i".to_string(),
            overlay.path().to_string_lossy().into_owned(),
            "-filter_complex".to_string(),
            format!("overlay=x={x}:y={y}"),
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
            .and_then(|out| out.check("ffmpeg overlay"));
        drop(overlay);

        if let Err(e) = result {
            let _ = std::fs::remove_file(output);
            return Err(e);
        }
        Ok(())
    }
}

impl LabelRenderer for RasterLabeler {
    #[cfg(feature = "raster")]
    fn render(&self, segment: &Path, caption: &str, spec: &LabelSpec) -> Result<PathBuf> {
        let font = raster::load_font(spec)?;
        let label_image = raster::rasterize_label(&font, caption, spec);

        let output = crate::labeler::labeled_path(segment);
        let overlay = TempArtifact::new(Self::overlay_path(&output));
        label_image.save_with_format(overlay.path(), image::ImageFormat::Png)?;
        debug!(
            "标签图片: {} ({}x{})",
            overlay.path().display(),
            label_image.width(),
            label_image.height()
        );

        self.composite(segment, &output, overlay, spec.position)?;
        Ok(output)
    }

    #[cfg(not(feature = "raster"))]
    fn render(&self, _segment: &Path, _caption: &str, _spec: &LabelSpec) -> Result<PathBuf> {
        Err(crate::error::SplitError::MissingRasterEngine(
            "编译时未启用 raster 特性".to_string(),
        ))
    }
}

#[cfg(feature = "raster")]
pub mod raster {
    use ab_glyph::{point, Font, FontVec, GlyphId, OutlinedGlyph, PxScale, Rect, ScaleFont};
    use image::{Rgba, RgbaImage};

    use tracing::{debug, warn};

    use crate::color::Color;
    use crate::error::{Result, SplitError};
    use crate::labeler::{find_default_font, LabelSpec};

    /// 内置字体（DejaVu Sans），系统中没有可用字体时使用
    const EMBEDDED_FONT: &[u8] = include_bytes!("../assets/fonts/DejaVuSans.ttf");

    /// 加载标签字体：显式指定的字体 > 系统字体 > 内置字体。
    /// 显式指定的字体无法解析时视为栅格化能力不可用
    pub fn load_font(spec: &LabelSpec) -> Result<FontVec> {
        if let Some(path) = spec.font_file.as_ref().filter(|p| p.is_file()) {
            let data = std::fs::read(path)?;
            return FontVec::try_from_vec(data).map_err(|e| {
                SplitError::MissingRasterEngine(format!(
                    "字体无法解析: {} - {}，请通过 --label-font 指定其他 TrueType 字体",
                    path.display(),
                    e
                ))
            });
        }

        if let Some(path) = find_default_font() {
            match std::fs::read(&path).ok().and_then(|data| FontVec::try_from_vec(data).ok()) {
                Some(font) => return Ok(font),
                None => warn!("⚠️  [标签] 系统字体无法使用: {}，改用内置字体", path.display()),
            }
        }

        debug!("使用内置字体 DejaVu Sans");
        embedded_font()
    }

    pub fn embedded_font() -> Result<FontVec> {
        FontVec::try_from_vec(EMBEDDED_FONT.to_vec())
            .map_err(|e| SplitError::MissingRasterEngine(format!("内置字体无法解析: {}", e)))
    }

    /// 排版后的文字：字形轮廓及其整体墨迹边界
    struct TextLayout {
        glyphs: Vec<OutlinedGlyph>,
        bounds: Rect,
    }

    fn layout_text(font: &FontVec, text: &str, size: f32) -> TextLayout {
        let scale = PxScale::from(size);
        let scaled = font.as_scaled(scale);

        let mut caret = 0.0f32;
        let mut previous: Option<GlyphId> = None;
        let mut glyphs = Vec::new();

        for c in text.chars().filter(|c| !c.is_control()) {
            let id = scaled.glyph_id(c);
            if let Some(prev) = previous {
                caret += scaled.kern(prev, id);
            }
            let glyph = id.with_scale_and_position(scale, point(caret, scaled.ascent()));
            caret += scaled.h_advance(id);
            previous = Some(id);

            if let Some(outlined) = font.outline_glyph(glyph) {
                glyphs.push(outlined);
            }
        }

        let bounds = glyphs
            .iter()
            .map(|g| g.px_bounds())
            .reduce(|a, b| Rect {
                min: point(a.min.x.min(b.min.x), a.min.y.min(b.min.y)),
                max: point(a.max.x.max(b.max.x), a.max.y.max(b.max.y)),
            })
            .unwrap_or(Rect {
                min: point(0.0, 0.0),
                max: point(caret, scaled.height()),
            });

        TextLayout { glyphs, bounds }
    }

    /// 文字墨迹的像素尺寸（至少 1x1）
    pub fn measure_text(font: &FontVec, text: &str, size: f32) -> (u32, u32) {
        let layout = layout_text(font, text, size);
        dims(&layout.bounds)
    }

    fn dims(bounds: &Rect) -> (u32, u32) {
        let w = (bounds.max.x - bounds.min.x).ceil().max(1.0) as u32;
        let h = (bounds.max.y - bounds.min.y).ceil().max(1.0) as u32;
        (w, h)
    }

    /// 生成透明背景的标签图片：圆角矩形背景 + 居中文字
    pub fn rasterize_label(font: &FontVec, caption: &str, spec: &LabelSpec) -> RgbaImage {
        let layout = layout_text(font, caption, spec.font_size as f32);
        let (text_w, text_h) = dims(&layout.bounds);
        let box_w = text_w + spec.padding * 2;
        let box_h = text_h + spec.padding * 2;

        let background = Color::parse(&spec.box_color);
        let foreground = Color::parse(&spec.text_color);

        let mut img = if spec.box_visible {
            rounded_rect(box_w, box_h, spec.radius, background)
        } else {
            RgbaImage::new(box_w, box_h)
        };

        // 文字墨迹左上角对齐到内边距处，即在背景内居中
        let offset_x = spec.padding as f32 - layout.bounds.min.x;
        let offset_y = spec.padding as f32 - layout.bounds.min.y;

        for glyph in &layout.glyphs {
            let gb = glyph.px_bounds();
            glyph.draw(|x, y, coverage| {
                let px = (gb.min.x + x as f32 + offset_x).round();
                let py = (gb.min.y + y as f32 + offset_y).round();
                if px < 0.0 || py < 0.0 {
                    return;
                }
                let (px, py) = (px as u32, py as u32);
                if px < box_w && py < box_h {
                    blend(img.get_pixel_mut(px, py), foreground, coverage);
                }
            });
        }

        img
    }

    /// 圆角矩形，半径不超过短边的一半，边缘抗锯齿
    pub fn rounded_rect(width: u32, height: u32, radius: u32, color: Color) -> RgbaImage {
        let radius = radius.min(width.min(height) / 2) as f32;
        let half_w = width as f32 / 2.0;
        let half_h = height as f32 / 2.0;

        RgbaImage::from_fn(width, height, |x, y| {
            // 像素中心到圆角矩形边界的有符号距离
            let qx = (x as f32 + 0.5 - half_w).abs() - (half_w - radius);
            let qy = (y as f32 + 0.5 - half_h).abs() - (half_h - radius);
            let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
            let distance = outside + qx.max(qy).min(0.0) - radius;

            let coverage = (0.5 - distance).clamp(0.0, 1.0);
            let alpha = (color.a as f32 * coverage).round() as u8;
            Rgba([color.r, color.g, color.b, alpha])
        })
    }

    /// 按覆盖率把颜色叠加到像素上（source-over，非预乘 alpha）
    fn blend(dst: &mut Rgba<u8>, src: Color, coverage: f32) {
        let sa = src.a as f32 / 255.0 * coverage.clamp(0.0, 1.0);
        let da = dst[3] as f32 / 255.0;
        let out_a = sa + da * (1.0 - sa);
        if out_a <= 0.0 {
            *dst = Rgba([0, 0, 0, 0]);
            return;
        }

        let mix = |s: u8, d: u8| -> u8 {
            ((s as f32 * sa + d as f32 * da * (1.0 - sa)) / out_a).round().clamp(0.0, 255.0) as u8
        };
        *dst = Rgba([
            mix(src.r, dst[0]),
            mix(src.g, dst[1]),
            mix(src.b, dst[2]),
            (out_a * 255.0).round() as u8,
        ]);
    }

}
