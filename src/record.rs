// 该文件是 Anjian （安检） 项目的一部分。
// src/record.rs - 违规持久化与通知
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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::detector::Violation;

mod jsonl_log;
pub use self::jsonl_log::{ComplianceStats, JsonlLog};

mod notify;
pub use self::notify::{LogNotifier, NotifierWrapper, OutboxNotifier, ViolationReport};

pub const DEFAULT_LOCATION: &str = "Unknown";
pub const DEFAULT_CAMERA_ID: &str = "cli_upload";

#[derive(Error, Debug)]
pub enum RecordError {
  #[error("无法访问 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("记录序列化错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("URI 缺少路径: {0}")]
  MissingPath(String),
}

/// 分析的上下文信息，由调用方提供
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisContext {
  pub location: String,
  pub camera_id: String,
  pub employee_id: Option<String>,
  pub media_path: Option<PathBuf>,
}

impl Default for AnalysisContext {
  fn default() -> Self {
    Self {
      location: DEFAULT_LOCATION.to_string(),
      camera_id: DEFAULT_CAMERA_ID.to_string(),
      employee_id: None,
      media_path: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyStatus {
  Normal,
  Critical,
}

/// 一次分析的持久化记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRecord {
  pub id: Uuid,
  pub timestamp: DateTime<Utc>,
  pub violations_count: usize,
  pub anomaly_status: AnomalyStatus,
  pub context: AnalysisContext,
  pub violations: Vec<Violation>,
}

impl ComplianceRecord {
  /// 记录编号与时间戳在存储侧生成
  pub fn new(context: &AnalysisContext, violations: &[Violation]) -> Self {
    Self {
      id: Uuid::new_v4(),
      timestamp: Utc::now(),
      violations_count: violations.len(),
      anomaly_status: if violations.is_empty() {
        AnomalyStatus::Normal
      } else {
        AnomalyStatus::Critical
      },
      context: context.clone(),
      violations: violations.to_vec(),
    }
  }
}

/// 持久化一次分析的结果
pub trait Persist {
  fn persist(&self, context: &AnalysisContext, violations: &[Violation]) -> Result<(), RecordError>;
}

/// 发送违规告警；投递成功与否由实现自行处理
pub trait Notifier {
  fn notify(&self, violations: &[Violation], time_range: &str);
}

fn url_path(url: &url::Url) -> Result<PathBuf, RecordError> {
  if url.path().is_empty() {
    return Err(RecordError::MissingPath(url.to_string()));
  }
  Ok(PathBuf::from(url.path()))
}
