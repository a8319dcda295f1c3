// 该文件是 Anjian （安检） 项目的一部分。
// src/model.rs - 模型
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

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;

/// 目标检测模型
///
/// 模型加载后在进程内只读共享；推理本身不应修改模型状态。
pub trait Model: Send {
  /// 模型类别名称，按类别索引排列
  fn labels(&self) -> &[String];

  /// 模型方形输入边长
  fn input_size(&self) -> u32;

  /// 对一张 RGB 图像推理，边界框使用该图像的像素坐标
  fn infer(&self, image: &RgbImage, params: &InferenceParams) -> Result<Vec<DetectItem>, ModelError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceParams {
  pub confidence: f32,
  pub iou: f32,
  pub augment: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: usize,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("模型文件过小 ({size} 字节, 至少需要 {min} 字节): {path}")]
  TooSmall { path: PathBuf, size: u64, min: u64 },
  #[error("模型加载错误 {path}: {reason}")]
  Load { path: PathBuf, reason: String },
  #[error("模型 {path} 缺少关键类别: {missing}")]
  Vocabulary { path: PathBuf, missing: String },
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
  #[error("推理失败: {0}")]
  Inference(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("没有可用的模型: {}", .0.join("; "))]
  Exhausted(Vec<String>),
}

pub mod provider;
pub use self::provider::{LoadedModel, ModelLoader, ModelProvider, ModelSource, warmup};

#[cfg(feature = "model_tract")]
mod yolov8;
#[cfg(feature = "model_tract")]
pub use self::yolov8::{OnnxLoader, Yolov8};

pub mod postprocess;
