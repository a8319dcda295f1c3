// 该文件是 Anjian （安检） 项目的一部分。
// src/model/provider.rs - 模型查找、校验、回退与预热
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

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use image::RgbImage;
use tracing::{debug, info, warn};

use crate::config::ModelSettings;
use crate::label::{CriticalSet, LabelMap};
use crate::model::{InferenceParams, Model, ModelError};

/// 模型来源策略，按顺序逐个尝试
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
  /// 训练好的 PPE 模型，需要通过大小与词表校验
  Candidate(PathBuf),
  /// 通用预训练模型，不校验词表；加载成功后复制到 `persist_to`
  Fallback {
    path: PathBuf,
    persist_to: Option<PathBuf>,
  },
}

impl ModelSource {
  pub fn path(&self) -> &Path {
    match self {
      ModelSource::Candidate(path) => path,
      ModelSource::Fallback { path, .. } => path,
    }
  }
}

/// 从文件构造模型的后端
pub trait ModelLoader {
  fn load(&self, path: &Path) -> Result<Box<dyn Model>, ModelError>;
}

/// 加载成功的模型及其来源
pub struct LoadedModel {
  pub model: Box<dyn Model>,
  pub origin: PathBuf,
  pub fallback: bool,
}

impl std::fmt::Debug for LoadedModel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("LoadedModel")
      .field("origin", &self.origin)
      .field("fallback", &self.fallback)
      .field("labels", &self.model.labels())
      .finish()
  }
}

pub struct ModelProvider<L> {
  loader: L,
  sources: Vec<ModelSource>,
  min_bytes: u64,
  critical: CriticalSet,
}

impl<L: ModelLoader> ModelProvider<L> {
  pub fn new(loader: L, sources: Vec<ModelSource>, min_bytes: u64, critical: CriticalSet) -> Self {
    Self {
      loader,
      sources,
      min_bytes,
      critical,
    }
  }

  /// 候选路径依次排列，最后是回退模型；回退模型持久化到第一个候选路径
  pub fn from_config(loader: L, settings: &ModelSettings) -> Self {
    let mut sources: Vec<ModelSource> = settings
      .search_paths
      .iter()
      .cloned()
      .map(ModelSource::Candidate)
      .collect();
    sources.push(ModelSource::Fallback {
      path: settings.fallback.clone(),
      persist_to: settings.search_paths.first().cloned(),
    });
    Self::new(
      loader,
      sources,
      settings.min_model_bytes,
      settings.critical.clone(),
    )
  }

  pub fn sources(&self) -> &[ModelSource] {
    &self.sources
  }

  /// 返回第一个可用的模型；全部失败时返回 [`ModelError::Exhausted`]
  pub fn load_model(&self) -> Result<LoadedModel, ModelError> {
    let mut failures = Vec::with_capacity(self.sources.len());
    for source in &self.sources {
      match self.try_source(source) {
        Ok(loaded) => {
          info!(
            "模型加载成功: {} ({} 个类别)",
            loaded.origin.display(),
            loaded.model.labels().len()
          );
          return Ok(loaded);
        }
        Err(e) => {
          warn!("跳过模型 {}: {}", source.path().display(), e);
          failures.push(format!("{}: {}", source.path().display(), e));
        }
      }
    }
    Err(ModelError::Exhausted(failures))
  }

  fn try_source(&self, source: &ModelSource) -> Result<LoadedModel, ModelError> {
    match source {
      ModelSource::Candidate(path) => {
        check_file(path, self.min_bytes)?;
        let model = self.loader.load(path)?;
        let missing = LabelMap::from_labels(model.labels()).missing_from(&self.critical);
        if !missing.is_empty() {
          let missing: Vec<&str> = missing.iter().map(|item| item.name()).collect();
          return Err(ModelError::Vocabulary {
            path: path.clone(),
            missing: missing.join(", "),
          });
        }
        Ok(LoadedModel {
          model,
          origin: path.clone(),
          fallback: false,
        })
      }
      ModelSource::Fallback { path, persist_to } => {
        check_file(path, 0)?;
        warn!("没有可用的 PPE 模型, 使用通用预训练模型: {}", path.display());
        let model = self.loader.load(path)?;
        if let Some(target) = persist_to {
          persist_fallback(path, target);
        }
        Ok(LoadedModel {
          model,
          origin: path.clone(),
          fallback: true,
        })
      }
    }
  }
}

fn check_file(path: &Path, min_bytes: u64) -> Result<(), ModelError> {
  let meta = match fs::metadata(path) {
    Ok(meta) if meta.is_file() => meta,
    _ => return Err(ModelError::NotFound(path.to_path_buf())),
  };
  if meta.len() < min_bytes {
    return Err(ModelError::TooSmall {
      path: path.to_path_buf(),
      size: meta.len(),
      min: min_bytes,
    });
  }
  Ok(())
}

/// 持久化失败不影响本次运行；目标位置已有文件时保持原样
fn persist_fallback(from: &Path, to: &Path) {
  if from == to {
    return;
  }
  if to.exists() {
    warn!("{} 已存在, 不使用回退模型覆盖", to.display());
    return;
  }
  let result = to
    .parent()
    .filter(|parent| !parent.as_os_str().is_empty())
    .map(fs::create_dir_all)
    .unwrap_or(Ok(()))
    .and_then(|_| fs::copy(from, to));
  match result {
    Ok(bytes) => info!("回退模型已保存到 {} ({} 字节)", to.display(), bytes),
    Err(e) => warn!("无法保存回退模型到 {}: {}", to.display(), e),
  }
}

/// 用一张空白图像推理一次，把首次调用的初始化开销提前到启动阶段
pub fn warmup(model: &dyn Model, params: &InferenceParams) {
  let size = model.input_size();
  let blank = RgbImage::new(size, size);
  let now = Instant::now();
  match model.infer(&blank, params) {
    Ok(items) => debug!(
      "模型预热完成，耗时: {:.2?}, 检测数 {}",
      now.elapsed(),
      items.len()
    ),
    Err(e) => warn!("模型预热失败, 首次推理将承担初始化开销: {}", e),
  }
}
