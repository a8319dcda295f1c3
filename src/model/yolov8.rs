// 该文件是 Anjian （安检） 项目的一部分。
// src/model/yolov8.rs - 基于 tract 的 YOLOv8 ONNX 推理后端
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
use std::path::Path;

use image::RgbImage;
use image::imageops::{self, FilterType};
use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::config::Config;
use crate::label::{class_names, parse_names_metadata};
use crate::model::postprocess::{self, OutputLayout, Projection};
use crate::model::{DetectItem, InferenceParams, Model, ModelError, ModelLoader};

const NAMES_METADATA_KEY: &str = "names";

type Plan = TypedRunnableModel<TypedModel>;

/// YOLOv8 检测模型
pub struct Yolov8 {
  plan: Plan,
  labels: Vec<String>,
  input_size: u32,
  layout: OutputLayout,
  anchors: usize,
}

impl Yolov8 {
  /// 加载 ONNX 模型，类别名称优先取模型元数据
  pub fn load(path: &Path, input_size: u32, fallback_labels: &[String]) -> Result<Self, ModelError> {
    let load_err = |e: TractError| ModelError::Load {
      path: path.to_path_buf(),
      reason: format!("{:#}", e),
    };

    let onnx = tract_onnx::onnx();
    let proto = onnx.proto_model_for_path(path).map_err(load_err)?;
    let metadata_raw = proto
      .metadata_props
      .iter()
      .find(|prop| prop.key == NAMES_METADATA_KEY)
      .map(|prop| prop.value.clone());

    let side = input_size as usize;
    let model = onnx
      .model_for_proto_model(&proto)
      .map_err(load_err)?
      .with_input_fact(
        0,
        InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
      )
      .map_err(load_err)?
      .into_optimized()
      .map_err(load_err)?;

    let shape: Vec<usize> = model
      .output_fact(0)
      .map_err(load_err)?
      .shape
      .as_concrete()
      .map(|dims| dims.to_vec())
      .ok_or_else(|| ModelError::Load {
        path: path.to_path_buf(),
        reason: "输出形状不是静态的".to_string(),
      })?;

    // 类别索引不可能超过输出张量的任一维度
    let class_limit = shape.iter().copied().max().unwrap_or(0);
    let metadata_names = metadata_raw.and_then(|raw| parse_names_metadata(&raw, class_limit));
    if metadata_names.is_none() {
      debug!("模型缺少可用的 names 元数据: {}", path.display());
    }
    let hint = metadata_names
      .as_ref()
      .map_or(fallback_labels.len(), |names| names.len());
    let (layout, num_classes, anchors) = postprocess::resolve_layout(&shape, hint)
      .or_else(|_| postprocess::resolve_layout(&shape, 0))?;
    let labels = class_names(metadata_names, fallback_labels, num_classes);

    let plan = model.into_runnable().map_err(load_err)?;
    info!(
      "ONNX 模型就绪: {} 输出形状 {:?} 布局 {:?}",
      path.display(),
      shape,
      layout
    );

    Ok(Self {
      plan,
      labels,
      input_size,
      layout,
      anchors,
    })
  }

  fn build_input(&self, image: &RgbImage) -> Tensor {
    let side = self.input_size as usize;
    tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
      image.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
    .into_tensor()
  }

  fn run_pass(
    &self,
    image: &RgbImage,
    confidence: f32,
    projection: &Projection,
  ) -> Result<Vec<DetectItem>, ModelError> {
    let input = self.build_input(image);
    let outputs = self
      .plan
      .run(tvec!(input.into()))
      .map_err(|e| ModelError::Inference(format!("{:#}", e)))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::InvalidOutput("模型没有输出".to_string()))?;
    let data = output
      .as_slice::<f32>()
      .map_err(|e| ModelError::InvalidOutput(format!("{:#}", e)))?;

    postprocess::decode_predictions(
      data,
      self.layout,
      self.labels.len(),
      self.anchors,
      confidence,
      projection,
    )
  }
}

impl Model for Yolov8 {
  fn labels(&self) -> &[String] {
    &self.labels
  }

  fn input_size(&self) -> u32 {
    self.input_size
  }

  fn infer(&self, image: &RgbImage, params: &InferenceParams) -> Result<Vec<DetectItem>, ModelError> {
    let (width, height) = image.dimensions();
    let side = self.input_size;
    let resized: Cow<'_, RgbImage> = if (width, height) == (side, side) {
      Cow::Borrowed(image)
    } else {
      Cow::Owned(imageops::resize(image, side, side, FilterType::Triangle))
    };

    let projection = Projection::new(side, width, height);
    let mut items = self.run_pass(&resized, params.confidence, &projection)?;

    // 水平翻转增强
    if params.augment {
      let flipped = imageops::flip_horizontal(resized.as_ref());
      items.extend(self.run_pass(&flipped, params.confidence, &projection.flipped())?);
    }

    Ok(postprocess::nms(items, params.iou))
  }
}

/// tract ONNX 加载器
#[derive(Debug, Clone)]
pub struct OnnxLoader {
  input_size: u32,
  fallback_labels: Vec<String>,
}

impl OnnxLoader {
  pub fn new(input_size: u32, fallback_labels: Vec<String>) -> Self {
    Self {
      input_size,
      fallback_labels,
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(config.detection.input_size, config.models.classes.clone())
  }
}

impl ModelLoader for OnnxLoader {
  fn load(&self, path: &Path) -> Result<Box<dyn Model>, ModelError> {
    let model = Yolov8::load(path, self.input_size, &self.fallback_labels)?;
    Ok(Box::new(model))
  }
}
