// 该文件是 Anjian （安检） 项目的一部分。
// src/detector.rs - 单帧 PPE 检测
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

use std::borrow::Cow;

use image::RgbImage;
use image::imageops::{self, FilterType};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{Config, DetectionSettings};
use crate::label::{CriticalSet, LabelMap};
use crate::model::{InferenceParams, LoadedModel, Model, ModelError, warmup};
use crate::output::draw::{COMPLIANT_COLOR, INFO_COLOR, VIOLATION_COLOR};
use crate::output::{Annotation, Draw};

pub mod metrics;
pub mod violation;

pub use self::metrics::{DetectionMetrics, VideoMetrics, VideoMetricsBuilder};
pub use self::violation::{BoundingBox, Derived, Verdict, Violation, ViolationDeriver, ViolationKind};

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("置信度阈值必须位于 [0, 1], 实际为 {0}")]
  InvalidConfidence(f32),
  #[error("输入图像为空")]
  EmptyImage,
  #[error(transparent)]
  Model(#[from] ModelError),
}

/// 一帧的检测结果
#[derive(Debug, Clone)]
pub struct FrameAnalysis {
  /// 标注后的副本，输入图像本身不会被修改
  pub annotated: RgbImage,
  pub violations: Vec<Violation>,
  pub metrics: DetectionMetrics,
}

/// PPE 检测器，持有只读的模型
pub struct PpeDetector {
  model: Box<dyn Model>,
  labels: LabelMap,
  critical: CriticalSet,
  confidence: f32,
  iou: f32,
  augment: bool,
  missing_confidence: f32,
  draw: Draw,
}

impl PpeDetector {
  /// 构造后立即预热模型
  pub fn new(
    model: Box<dyn Model>,
    settings: &DetectionSettings,
    critical: CriticalSet,
    draw: Draw,
  ) -> Self {
    let labels = LabelMap::from_labels(model.labels());
    let detector = Self {
      model,
      labels,
      critical,
      confidence: settings.confidence_threshold,
      iou: settings.iou_threshold,
      augment: settings.augment,
      missing_confidence: settings.missing_confidence,
      draw,
    };
    warmup(detector.model.as_ref(), &detector.params(detector.confidence));
    detector
  }

  pub fn from_config(loaded: LoadedModel, config: &Config) -> Self {
    info!(
      "初始化检测器: 模型 {}{}",
      loaded.origin.display(),
      if loaded.fallback { " (回退模型)" } else { "" }
    );
    Self::new(
      loaded.model,
      &config.detection,
      config.models.critical.clone(),
      Draw::with_font(config.font_path.as_deref()),
    )
  }

  pub fn confidence_threshold(&self) -> f32 {
    self.confidence
  }

  fn params(&self, confidence: f32) -> InferenceParams {
    InferenceParams {
      confidence,
      iou: self.iou,
      augment: self.augment,
    }
  }

  /// 检测一张图像，`confidence_override` 为空时使用配置的阈值
  pub fn detect(
    &self,
    image: &RgbImage,
    confidence_override: Option<f32>,
  ) -> Result<FrameAnalysis, DetectError> {
    let confidence = confidence_override.unwrap_or(self.confidence);
    if !(0.0..=1.0).contains(&confidence) {
      return Err(DetectError::InvalidConfidence(confidence));
    }
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(DetectError::EmptyImage);
    }

    // 大图直接拉伸到模型输入尺寸，不保持宽高比
    let side = self.model.input_size();
    let (input, scale_x, scale_y): (Cow<'_, RgbImage>, f32, f32) = if width.max(height) > side {
      (
        Cow::Owned(imageops::resize(image, side, side, FilterType::Triangle)),
        width as f32 / side as f32,
        height as f32 / side as f32,
      )
    } else {
      (Cow::Borrowed(image), 1.0, 1.0)
    };

    let items = self.model.infer(&input, &self.params(confidence))?;

    let mut deriver = ViolationDeriver::new(&self.critical);
    let mut scores = Vec::with_capacity(items.len());
    let mut annotations = Vec::with_capacity(items.len());
    for item in &items {
      if item.score < confidence {
        continue;
      }
      let bbox = [
        item.bbox[0] * scale_x,
        item.bbox[1] * scale_y,
        item.bbox[2] * scale_x,
        item.bbox[3] * scale_y,
      ];
      let color = match deriver.observe(self.labels.tag(item.class_id), item.score, &bbox) {
        Verdict::Compliant(_) => COMPLIANT_COLOR,
        Verdict::Violation(_) => VIOLATION_COLOR,
        Verdict::Informational => INFO_COLOR,
      };
      scores.push(item.score);
      annotations.push(Annotation {
        bbox,
        label: self.labels.name(item.class_id),
        score: item.score,
        color,
      });
    }

    let Derived {
      violations,
      missing,
    } = deriver.finish(self.missing_confidence);
    let metrics = DetectionMetrics::compute(&scores, &violations, &missing);

    let mut annotated = image.clone();
    self.draw.draw_annotations(&mut annotated, &annotations);

    debug!(
      "检测完成: {} 个目标, {} 条违规, 合规率 {:.2}",
      metrics.total_detections, metrics.violation_count, metrics.compliance_rate
    );

    Ok(FrameAnalysis {
      annotated,
      violations,
      metrics,
    })
  }
}
