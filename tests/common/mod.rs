// 该文件是 Anjian （安检） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的脚本化模型与帧来源
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

#![allow(dead_code)]

use std::collections::VecDeque;

use anjian::config::Config;
use anjian::detector::PpeDetector;
use anjian::frame::Frame;
use anjian::input::{FrameSource, InputError};
use anjian::model::{DetectItem, InferenceParams, Model, ModelError};
use anjian::output::Draw;
use image::{Rgb, RgbImage};

/// 模型词表，最后一个是非防护装备类别
pub const LABELS: [&str; 13] = [
  "helmet",
  "no_helmet",
  "gloves",
  "no_gloves",
  "goggles",
  "no_goggles",
  "mask",
  "no_mask",
  "suit",
  "no_suit",
  "shoes",
  "no_shoes",
  "person",
];

pub const HELMET: usize = 0;
pub const NO_HELMET: usize = 1;
pub const GLOVES: usize = 2;
pub const NO_GOGGLES: usize = 5;
pub const MASK: usize = 6;
pub const NO_MASK: usize = 7;
pub const SHOES: usize = 10;
pub const PERSON: usize = 12;

/// 左上角为纯红色的图像会让模型推理失败
pub const POISON: Rgb<u8> = Rgb([255, 0, 0]);

/// 每次推理都返回同一组检测
pub struct ScriptedModel {
  pub labels: Vec<String>,
  pub input_size: u32,
  pub detections: Vec<DetectItem>,
}

impl ScriptedModel {
  pub fn new(detections: Vec<DetectItem>) -> Self {
    Self {
      labels: LABELS.iter().map(|s| s.to_string()).collect(),
      input_size: 640,
      detections,
    }
  }
}

impl Model for ScriptedModel {
  fn labels(&self) -> &[String] {
    &self.labels
  }

  fn input_size(&self) -> u32 {
    self.input_size
  }

  fn infer(&self, image: &RgbImage, params: &InferenceParams) -> Result<Vec<DetectItem>, ModelError> {
    if image.get_pixel_checked(0, 0) == Some(&POISON) {
      return Err(ModelError::Inference("scripted failure".to_string()));
    }
    Ok(
      self
        .detections
        .iter()
        .filter(|d| d.score >= params.confidence)
        .cloned()
        .collect(),
    )
  }
}

pub fn item(class_id: usize, score: f32, bbox: [f32; 4]) -> DetectItem {
  DetectItem {
    class_id,
    score,
    bbox,
  }
}

pub fn detector(detections: Vec<DetectItem>) -> PpeDetector {
  let config = Config::default();
  PpeDetector::new(
    Box::new(ScriptedModel::new(detections)),
    &config.detection,
    config.models.critical.clone(),
    Draw::without_text(),
  )
}

/// 预先排好的帧序列
pub struct FakeSource {
  pub fps: f64,
  pub total: Option<u64>,
  pub frames: VecDeque<Result<Frame, InputError>>,
}

impl FakeSource {
  /// `poisoned` 中的帧让模型失败，`corrupt` 中的帧解码失败
  pub fn new(fps: f64, count: u64, corrupt: &[u64], poisoned: &[u64]) -> Self {
    let frames = (1..=count)
      .map(|index| {
        if corrupt.contains(&index) {
          return Err(InputError::CorruptFrame {
            index,
            reason: "bad packet".to_string(),
          });
        }
        let mut image = RgbImage::new(64, 48);
        if poisoned.contains(&index) {
          image.put_pixel(0, 0, POISON);
        }
        Ok(Frame::new(image, index, (index - 1) as f64 / fps))
      })
      .collect();
    Self {
      fps,
      total: Some(count),
      frames,
    }
  }
}

impl Iterator for FakeSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.frames.pop_front()
  }
}

impl FrameSource for FakeSource {
  fn fps(&self) -> f64 {
    self.fps
  }

  fn total_frames(&self) -> Option<u64> {
    self.total
  }

  fn dimensions(&self) -> (u32, u32) {
    (64, 48)
  }
}
