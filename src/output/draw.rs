// 该文件是 Anjian （安检） 项目的一部分。
// src/output/draw.rs - 检测结果标注
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, warn};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 没有字体时的估算宽度
const LABEL_TEXT_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// 已佩戴的关键装备
pub const COMPLIANT_COLOR: [u8; 3] = [0, 255, 0];
/// 违规
pub const VIOLATION_COLOR: [u8; 3] = [255, 0, 0];
/// 其他检测
pub const INFO_COLOR: [u8; 3] = [255, 255, 0];

const SYSTEM_FONTS: [&str; 6] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/Library/Fonts/Arial.ttf",
  "C:\\Windows\\Fonts\\arial.ttf",
];

/// 一个待绘制的检测框，坐标为像素坐标 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub bbox: [f32; 4],
  pub label: String,
  pub score: f32,
  pub color: [u8; 3],
}

pub struct Draw {
  font_size: f32,
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self::with_font(None)
  }
}

impl Draw {
  /// 优先使用配置的字体，其次尝试常见系统字体；都不可用时只画框不写字
  pub fn with_font(font_path: Option<&Path>) -> Self {
    let font = font_path
      .and_then(load_font)
      .or_else(|| SYSTEM_FONTS.iter().map(Path::new).find_map(load_font));
    if font.is_none() {
      warn!("没有可用的字体, 标注将不包含文字");
    }
    Self {
      font_size: LABEL_FONT_SIZE,
      font,
    }
  }

  /// 不加载任何字体
  pub fn without_text() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      font: None,
    }
  }

  pub fn draw_annotations(&self, image: &mut RgbImage, annotations: &[Annotation]) {
    for annotation in annotations {
      self.draw_bbox_with_label(image, annotation);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, annotation: &Annotation) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }
    let bbox = &annotation.bbox;

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(annotation.color);
    for t in 0..BOX_THICKNESS {
      let width = (x_max - x_min - 2 * t).max(1) as u32;
      let height = (y_max - y_min - 2 * t).max(1) as u32;
      draw_hollow_rect_mut(image, Rect::at(x_min + t, y_min + t).of_size(width, height), color);
    }

    let label = format!("{}: {:.2}", annotation.label, annotation.score);
    let scale = PxScale::from(self.font_size);

    let text_width = match &self.font {
      Some(font) => text_size(scale, font, &label).0 as i32 + 2 * LABEL_TEXT_PADDING,
      None => (label.len() as f32 * LABEL_CHAR_WIDTH) as i32,
    };

    // 标签背景在边框上方
    let label_x = x_min;
    let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;

    if label_width == 0 {
      return;
    }
    let rect = Rect::at(label_x, label_y).of_size(label_width, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        label_x + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

fn load_font(path: &Path) -> Option<FontVec> {
  let data = std::fs::read(path).ok()?;
  match FontVec::try_from_vec(data) {
    Ok(font) => {
      debug!("使用字体: {}", path.display());
      Some(font)
    }
    Err(e) => {
      warn!("无法解析字体 {}: {}", path.display(), e);
      None
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn annotation(bbox: [f32; 4], color: [u8; 3]) -> Annotation {
    Annotation {
      bbox,
      label: "no_helmet".to_string(),
      score: 0.91,
      color,
    }
  }

  #[test]
  fn draws_box_edges_in_color() {
    let draw = Draw::without_text();
    let mut image = RgbImage::new(100, 100);
    draw.draw_annotations(&mut image, &[annotation([20.0, 40.0, 60.0, 80.0], VIOLATION_COLOR)]);

    assert_eq!(image.get_pixel(20, 60), &Rgb(VIOLATION_COLOR));
    assert_eq!(image.get_pixel(40, 79), &Rgb(VIOLATION_COLOR));
    // 框内部不变
    assert_eq!(image.get_pixel(40, 60), &Rgb([0, 0, 0]));
    // 标签背景在框上方
    assert_eq!(image.get_pixel(22, 20), &Rgb(VIOLATION_COLOR));
  }

  #[test]
  fn degenerate_and_outside_boxes_are_ignored() {
    let draw = Draw::without_text();
    let mut image = RgbImage::new(10, 10);
    draw.draw_annotations(
      &mut image,
      &[
        annotation([5.0, 5.0, 5.0, 8.0], INFO_COLOR),
        annotation([50.0, 50.0, 80.0, 80.0], INFO_COLOR),
      ],
    );
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }
}
