// 该文件是 Anjian （安检） 项目的一部分。
// src/model/postprocess.rs - YOLO 输出解码与非极大值抑制
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

use tracing::debug;

use crate::model::{DetectItem, ModelError};

/// 单张图像保留的最大检测数量
pub const MAX_DETECTIONS: usize = 300;

const BOX_CHANNELS: usize = 4;

/// 输出张量布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// `[1, 4 + nc, anchors]`，Ultralytics 默认导出格式
  ChannelsFirst,
  /// `[1, anchors, 4 + nc]`
  AnchorsFirst,
}

/// 模型输入坐标到原图坐标的投影
#[derive(Debug, Clone, Copy)]
pub struct Projection {
  pub scale_x: f32,
  pub scale_y: f32,
  pub width: f32,
  pub height: f32,
  /// 输入经过水平翻转（测试时增强）
  pub flipped: bool,
}

impl Projection {
  pub fn new(input_size: u32, width: u32, height: u32) -> Self {
    Self {
      scale_x: width as f32 / input_size as f32,
      scale_y: height as f32 / input_size as f32,
      width: width as f32,
      height: height as f32,
      flipped: false,
    }
  }

  pub fn flipped(mut self) -> Self {
    self.flipped = true;
    self
  }

  fn project(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
    let x_min = ((cx - w / 2.0) * self.scale_x).clamp(0.0, self.width);
    let y_min = ((cy - h / 2.0) * self.scale_y).clamp(0.0, self.height);
    let x_max = ((cx + w / 2.0) * self.scale_x).clamp(0.0, self.width);
    let y_max = ((cy + h / 2.0) * self.scale_y).clamp(0.0, self.height);
    if self.flipped {
      [self.width - x_max, y_min, self.width - x_min, y_max]
    } else {
      [x_min, y_min, x_max, y_max]
    }
  }
}

/// 根据张量形状判断布局和类别数量
///
/// `num_classes` 为 0 时按默认导出格式推断类别数量。
pub fn resolve_layout(
  shape: &[usize],
  num_classes: usize,
) -> Result<(OutputLayout, usize, usize), ModelError> {
  let dims: Vec<usize> = shape.iter().copied().skip_while(|&d| d == 1).collect();
  let (a, b) = match dims.as_slice() {
    [a, b] => (*a, *b),
    _ => {
      return Err(ModelError::InvalidOutput(format!(
        "期望形状为 [1, C, N], 实际为 {:?}",
        shape
      )));
    }
  };

  if num_classes == 0 {
    if a <= BOX_CHANNELS {
      return Err(ModelError::InvalidOutput(format!(
        "无法推断类别数量, 形状为 {:?}",
        shape
      )));
    }
    return Ok((OutputLayout::ChannelsFirst, a - BOX_CHANNELS, b));
  }

  let channels = BOX_CHANNELS + num_classes;
  if a == channels {
    Ok((OutputLayout::ChannelsFirst, num_classes, b))
  } else if b == channels {
    Ok((OutputLayout::AnchorsFirst, num_classes, a))
  } else {
    Err(ModelError::InvalidOutput(format!(
      "输出形状 {:?} 与类别数量 {} 不匹配",
      shape, num_classes
    )))
  }
}

/// 解码 YOLOv8 风格的无锚框输出
pub fn decode_predictions(
  data: &[f32],
  layout: OutputLayout,
  num_classes: usize,
  anchors: usize,
  confidence: f32,
  projection: &Projection,
) -> Result<Vec<DetectItem>, ModelError> {
  let channels = BOX_CHANNELS + num_classes;
  if data.len() < channels * anchors {
    return Err(ModelError::InvalidOutput(format!(
      "输出长度 {} 小于期望的 {}",
      data.len(),
      channels * anchors
    )));
  }

  let value = |channel: usize, anchor: usize| match layout {
    OutputLayout::ChannelsFirst => data[channel * anchors + anchor],
    OutputLayout::AnchorsFirst => data[anchor * channels + channel],
  };

  let mut items = Vec::new();
  for anchor in 0..anchors {
    // 找到最高类别分数
    let mut score = f32::MIN;
    let mut class_id = 0usize;
    for class in 0..num_classes {
      let s = value(BOX_CHANNELS + class, anchor);
      if s > score {
        score = s;
        class_id = class;
      }
    }

    if score < confidence {
      continue;
    }

    let bbox = projection.project(
      value(0, anchor),
      value(1, anchor),
      value(2, anchor),
      value(3, anchor),
    );
    if bbox[0] >= bbox[2] || bbox[1] >= bbox[3] {
      continue;
    }

    items.push(DetectItem {
      class_id,
      score,
      bbox,
    });
  }

  debug!("解码得到 {} 个候选框", items.len());
  Ok(items)
}

/// 按类别进行非极大值抑制
pub fn nms(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  // 按置信度降序排序
  items.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut result: Vec<DetectItem> = Vec::new();
  for item in items {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == item.class_id && iou(&kept.bbox, &item.bbox) > iou_threshold);
    if !suppressed {
      result.push(item);
      if result.len() >= MAX_DETECTIONS {
        break;
      }
    }
  }

  result
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]) * (a[3] - a[1]);
  let area_b = (b[2] - b[0]) * (b[3] - b[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(class_id: usize, score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id,
      score,
      bbox,
    }
  }

  #[test]
  fn resolves_both_layouts() {
    assert_eq!(
      resolve_layout(&[1, 16, 8400], 12).unwrap(),
      (OutputLayout::ChannelsFirst, 12, 8400)
    );
    assert_eq!(
      resolve_layout(&[1, 8400, 16], 12).unwrap(),
      (OutputLayout::AnchorsFirst, 12, 8400)
    );
    assert_eq!(
      resolve_layout(&[1, 84, 8400], 0).unwrap(),
      (OutputLayout::ChannelsFirst, 80, 8400)
    );
    assert!(resolve_layout(&[1, 20, 8400], 12).is_err());
    assert!(resolve_layout(&[8400], 12).is_err());
  }

  #[test]
  fn decodes_channels_first_and_scales_back() {
    // 两个锚点, 两个类别: [cx, cy, w, h, s0, s1] x anchors
    let data = vec![
      320.0, 100.0, // cx
      320.0, 100.0, // cy
      64.0, 10.0, // w
      64.0, 10.0, // h
      0.9, 0.1, // class 0
      0.2, 0.3, // class 1
    ];
    let projection = Projection::new(640, 1280, 640);
    let items =
      decode_predictions(&data, OutputLayout::ChannelsFirst, 2, 2, 0.5, &projection).unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].class_id, 0);
    assert_eq!(items[0].bbox, [576.0, 288.0, 704.0, 352.0]);
  }

  #[test]
  fn flipped_projection_mirrors_boxes() {
    let projection = Projection::new(100, 100, 100).flipped();
    let data = vec![10.0, 50.0, 20.0, 20.0, 0.8];
    let items =
      decode_predictions(&data, OutputLayout::AnchorsFirst, 1, 1, 0.5, &projection).unwrap();
    assert_eq!(items[0].bbox, [80.0, 40.0, 100.0, 60.0]);
  }

  #[test]
  fn nms_suppresses_same_class_overlap_only() {
    let items = vec![
      item(0, 0.7, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.9, [1.0, 1.0, 11.0, 11.0]),
      item(1, 0.8, [0.0, 0.0, 10.0, 10.0]),
      item(0, 0.6, [50.0, 50.0, 60.0, 60.0]),
    ];
    let kept = nms(items, 0.45);
    assert_eq!(kept.len(), 3);
    assert_eq!(kept[0].score, 0.9);
    assert_eq!(kept[1].class_id, 1);
    assert_eq!(kept[2].score, 0.6);
  }

  #[test]
  fn iou_of_disjoint_and_identical_boxes() {
    let a = [0.0, 0.0, 10.0, 10.0];
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
  }
}
