// 该文件是 Anjian （安检） 项目的一部分。
// src/config.rs - 配置加载
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::label::{CriticalSet, PpeItem};

const DEFAULT_CONFIDENCE: f32 = 0.7;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MISSING_CONFIDENCE: f32 = 0.9;
const DEFAULT_MIN_MODEL_BYTES: u64 = 5_000_000;
const DEFAULT_FALLBACK_MODEL: &str = "yolov8s.onnx";
const DEFAULT_OUTPUT_DIR: &str = "outputs";
const DEFAULT_TARGET_FPS: f64 = 3.0;
const DEFAULT_FULL_ANALYSIS_SECS: f64 = 10.0;

const DEFAULT_CLASSES: [&str; 12] = [
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
];

const DEFAULT_CRITICAL: [PpeItem; 4] = [
  PpeItem::Helmet,
  PpeItem::Gloves,
  PpeItem::Mask,
  PpeItem::Shoes,
];

const DEFAULT_SEARCH_PATHS: [&str; 2] = ["models/ppe_yolo_model.onnx", "models/ppe_yolo_v8s.onnx"];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误 {path}: {source}")]
  Parse {
    path: PathBuf,
    source: toml::de::Error,
  },
  #[error("配置无效: {0}")]
  Invalid(String),
}

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
  detection: Option<DetectionFile>,
  models: Option<ModelsFile>,
  paths: Option<PathsFile>,
  video: Option<VideoFile>,
  draw: Option<DrawFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionFile {
  confidence_threshold: Option<f32>,
  iou_threshold: Option<f32>,
  augment: Option<bool>,
  input_size: Option<u32>,
  missing_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsFile {
  classes: Option<Vec<String>>,
  critical: Option<Vec<PpeItem>>,
  search_paths: Option<Vec<PathBuf>>,
  min_model_bytes: Option<u64>,
  fallback: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct PathsFile {
  output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoFile {
  target_fps: Option<f64>,
  full_analysis_below_secs: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct DrawFile {
  font_path: Option<PathBuf>,
}

/// 检测参数
#[derive(Debug, Clone)]
pub struct DetectionSettings {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  /// 是否启用测试时增强
  pub augment: bool,
  /// 模型方形输入边长
  pub input_size: u32,
  /// 完全未检测到的关键装备所使用的置信度
  pub missing_confidence: f32,
}

/// 模型搜索与词表
#[derive(Debug, Clone)]
pub struct ModelSettings {
  pub classes: Vec<String>,
  pub critical: CriticalSet,
  /// 按优先级排列的候选模型路径，第一个为主路径
  pub search_paths: Vec<PathBuf>,
  /// 小于该大小的模型文件视为截断或占位文件
  pub min_model_bytes: u64,
  pub fallback: PathBuf,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
  pub target_fps: f64,
  pub full_analysis_below_secs: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
  pub detection: DetectionSettings,
  pub models: ModelSettings,
  pub output_dir: PathBuf,
  pub video: VideoSettings,
  pub font_path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self::from_file(ConfigFile::default())
  }
}

impl Config {
  /// 读取配置文件（可选），缺省项使用内置默认值
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let file = match path {
      Some(path) => {
        info!("读取配置文件: {}", path.display());
        read_config_file(path)?
      }
      None => ConfigFile::default(),
    };
    let config = Self::from_file(file);
    config.validate()?;
    Ok(config)
  }

  fn from_file(file: ConfigFile) -> Self {
    let detection = file.detection.unwrap_or_default();
    let models = file.models.unwrap_or_default();
    let video = file.video.unwrap_or_default();

    Self {
      detection: DetectionSettings {
        confidence_threshold: detection.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE),
        iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU),
        augment: detection.augment.unwrap_or(true),
        input_size: detection.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        missing_confidence: detection
          .missing_confidence
          .unwrap_or(DEFAULT_MISSING_CONFIDENCE),
      },
      models: ModelSettings {
        classes: models
          .classes
          .unwrap_or_else(|| DEFAULT_CLASSES.iter().map(|s| s.to_string()).collect()),
        critical: models
          .critical
          .map(|items| items.into_iter().collect())
          .unwrap_or_else(|| DEFAULT_CRITICAL.into_iter().collect()),
        search_paths: models
          .search_paths
          .unwrap_or_else(|| DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect()),
        min_model_bytes: models.min_model_bytes.unwrap_or(DEFAULT_MIN_MODEL_BYTES),
        fallback: models
          .fallback
          .unwrap_or_else(|| PathBuf::from(DEFAULT_FALLBACK_MODEL)),
      },
      output_dir: file
        .paths
        .and_then(|paths| paths.output_dir)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
      video: VideoSettings {
        target_fps: video.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
        full_analysis_below_secs: video
          .full_analysis_below_secs
          .unwrap_or(DEFAULT_FULL_ANALYSIS_SECS),
      },
      font_path: file.draw.and_then(|draw| draw.font_path),
    }
  }

  /// 命令行覆盖项在启动时应用一次
  pub fn with_overrides(
    mut self,
    confidence: Option<f32>,
    iou: Option<f32>,
    model: Option<PathBuf>,
  ) -> Result<Self, ConfigError> {
    if let Some(confidence) = confidence {
      self.detection.confidence_threshold = confidence;
    }
    if let Some(iou) = iou {
      self.detection.iou_threshold = iou;
    }
    if let Some(model) = model {
      self.models.search_paths.insert(0, model);
    }
    self.validate()?;
    Ok(self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    check_unit("detection.confidence_threshold", self.detection.confidence_threshold)?;
    check_unit("detection.iou_threshold", self.detection.iou_threshold)?;
    check_unit("detection.missing_confidence", self.detection.missing_confidence)?;
    if self.detection.input_size == 0 {
      return Err(ConfigError::Invalid(
        "detection.input_size 必须大于 0".to_string(),
      ));
    }
    if self.models.search_paths.is_empty() {
      return Err(ConfigError::Invalid(
        "models.search_paths 不能为空".to_string(),
      ));
    }
    if !(self.video.target_fps.is_finite() && self.video.target_fps > 0.0) {
      return Err(ConfigError::Invalid(format!(
        "video.target_fps 必须为正数, 实际为 {}",
        self.video.target_fps
      )));
    }
    Ok(())
  }

  /// 主候选模型路径
  pub fn primary_model_path(&self) -> &Path {
    &self.models.search_paths[0]
  }

  /// 只有文件名的输出路径放到 `paths.output_dir` 下
  pub fn output_path(&self, name: &Path) -> PathBuf {
    let bare = name
      .parent()
      .map(|parent| parent.as_os_str().is_empty())
      .unwrap_or(true);
    if name.is_relative() && bare {
      self.output_dir.join(name)
    } else {
      name.to_path_buf()
    }
  }
}

fn check_unit(name: &str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ConfigError::Invalid(format!(
      "{} 必须位于 [0, 1] 区间, 实际为 {}",
      name, value
    )))
  }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
  let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  toml::from_str(&raw).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use tempfile::NamedTempFile;

  use super::*;

  #[test]
  fn defaults_follow_deployed_values() {
    let config = Config::load(None).unwrap();
    assert_eq!(config.detection.confidence_threshold, 0.7);
    assert_eq!(config.detection.iou_threshold, 0.45);
    assert_eq!(config.detection.input_size, 640);
    assert_eq!(config.models.classes.len(), 12);
    assert_eq!(config.models.critical.len(), 4);
    assert!(!config.models.critical.contains(&PpeItem::Goggles));
    assert_eq!(
      config.primary_model_path(),
      Path::new("models/ppe_yolo_model.onnx")
    );
  }

  #[test]
  fn loads_partial_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
      file,
      r#"
[detection]
confidence_threshold = 0.55
augment = false

[models]
critical = ["helmet", "goggles"]
search_paths = ["/srv/models/ppe.onnx"]

[video]
target_fps = 5.0
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.detection.confidence_threshold, 0.55);
    assert!(!config.detection.augment);
    assert_eq!(config.detection.iou_threshold, 0.45);
    assert_eq!(
      config.models.critical,
      [PpeItem::Helmet, PpeItem::Goggles].into_iter().collect()
    );
    assert_eq!(config.primary_model_path(), Path::new("/srv/models/ppe.onnx"));
    assert_eq!(config.video.target_fps, 5.0);
  }

  #[test]
  fn rejects_unknown_critical_item() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "[models]\ncritical = [\"helmet\", \"cape\"]\n").unwrap();
    assert!(matches!(
      Config::load(Some(file.path())),
      Err(ConfigError::Parse { .. })
    ));
  }

  #[test]
  fn overrides_are_validated() {
    let config = Config::default();
    assert!(matches!(
      config.clone().with_overrides(Some(1.5), None, None),
      Err(ConfigError::Invalid(_))
    ));

    let config = config
      .with_overrides(Some(0.3), None, Some(PathBuf::from("custom.onnx")))
      .unwrap();
    assert_eq!(config.detection.confidence_threshold, 0.3);
    assert_eq!(config.primary_model_path(), Path::new("custom.onnx"));
  }

  #[test]
  fn bare_output_names_go_to_output_dir() {
    let config = Config::default();
    assert_eq!(
      config.output_path(Path::new("site_a.mp4")),
      PathBuf::from("outputs/site_a.mp4")
    );
    assert_eq!(
      config.output_path(Path::new("./site_a.mp4")),
      PathBuf::from("./site_a.mp4")
    );
    assert_eq!(
      config.output_path(Path::new("/tmp/site_a.mp4")),
      PathBuf::from("/tmp/site_a.mp4")
    );
  }
}
