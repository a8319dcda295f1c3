// 该文件是 Anjian （安检） 项目的一部分。
// src/record/jsonl_log.rs - JSON Lines 违规日志
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

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{info, warn};

use crate::detector::Violation;
use crate::record::{
  AnalysisContext, AnomalyStatus, ComplianceRecord, Persist, RecordError, url_path,
};
use crate::{FromUrl, FromUrlWithScheme};

/// 每次分析追加一行 JSON
#[derive(Debug, Clone)]
pub struct JsonlLog {
  path: PathBuf,
}

/// 仪表盘计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComplianceStats {
  pub total_checks: usize,
  pub compliant: usize,
  pub violations: usize,
  pub critical: usize,
}

impl FromUrlWithScheme for JsonlLog {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonlLog {
  type Error = RecordError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }
    Ok(Self::new(url_path(url)?))
  }
}

impl JsonlLog {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn io_err(&self, source: std::io::Error) -> RecordError {
    RecordError::Io {
      path: self.path.clone(),
      source,
    }
  }

  /// 追加一条记录并返回它
  pub fn append(
    &self,
    context: &AnalysisContext,
    violations: &[Violation],
  ) -> Result<ComplianceRecord, RecordError> {
    let record = ComplianceRecord::new(context, violations);
    let mut line = serde_json::to_string(&record)?;
    line.push('\n');

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
    }
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)
      .map_err(|e| self.io_err(e))?;
    file
      .write_all(line.as_bytes())
      .map_err(|e| self.io_err(e))?;

    info!(
      "记录 {} 已写入 {} ({} 条违规)",
      record.id,
      self.path.display(),
      record.violations_count
    );
    Ok(record)
  }

  /// 读取全部记录；无法解析的行会被跳过
  pub fn records(&self) -> Result<Vec<ComplianceRecord>, RecordError> {
    let file = match fs::File::open(&self.path) {
      Ok(file) => file,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => return Err(self.io_err(e)),
    };

    let mut records = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
      let line = line.map_err(|e| self.io_err(e))?;
      if line.trim().is_empty() {
        continue;
      }
      match serde_json::from_str(&line) {
        Ok(record) => records.push(record),
        Err(e) => warn!("跳过第 {} 行无效记录: {}", number + 1, e),
      }
    }
    Ok(records)
  }

  pub fn stats(&self) -> Result<ComplianceStats, RecordError> {
    let records = self.records()?;
    let mut stats = ComplianceStats {
      total_checks: records.len(),
      ..ComplianceStats::default()
    };
    for record in &records {
      if record.violations_count == 0 {
        stats.compliant += 1;
      } else {
        stats.violations += 1;
      }
      if record.anomaly_status == AnomalyStatus::Critical {
        stats.critical += 1;
      }
    }
    Ok(stats)
  }
}

impl Persist for JsonlLog {
  fn persist(&self, context: &AnalysisContext, violations: &[Violation]) -> Result<(), RecordError> {
    self.append(context, violations).map(|_| ())
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;
  use crate::detector::{BoundingBox, ViolationKind};
  use crate::label::PpeItem;

  fn no_helmet() -> Violation {
    Violation {
      kind: ViolationKind::Detected(PpeItem::Helmet),
      confidence: 0.88,
      bounding_box: Some(BoundingBox::from([10, 20, 30, 40])),
      critical: true,
      frame: None,
    }
  }

  #[test]
  fn from_url_checks_scheme() {
    let url = url::Url::parse("jsonl:///var/log/anjian.jsonl").unwrap();
    let log = JsonlLog::from_url(&url).unwrap();
    assert_eq!(log.path(), Path::new("/var/log/anjian.jsonl"));

    let url = url::Url::parse("outbox:///tmp").unwrap();
    assert!(matches!(
      JsonlLog::from_url(&url),
      Err(RecordError::SchemeMismatch { .. })
    ));
  }

  #[test]
  fn appends_and_counts() {
    let dir = TempDir::new().unwrap();
    let log = JsonlLog::new(dir.path().join("logs/violations.jsonl"));
    let context = AnalysisContext::default();

    let first = log.append(&context, &[no_helmet()]).unwrap();
    log.persist(&context, &[]).unwrap();
    log.persist(&context, &[no_helmet(), no_helmet()]).unwrap();

    let records = log.records().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].id, first.id);
    assert_eq!(records[0].anomaly_status, AnomalyStatus::Critical);
    assert_eq!(records[1].anomaly_status, AnomalyStatus::Normal);
    assert_eq!(records[2].violations_count, 2);
    assert_ne!(records[0].id, records[2].id);

    assert_eq!(
      log.stats().unwrap(),
      ComplianceStats {
        total_checks: 3,
        compliant: 1,
        violations: 2,
        critical: 2,
      }
    );
  }

  #[test]
  fn missing_log_has_empty_stats() {
    let dir = TempDir::new().unwrap();
    let log = JsonlLog::new(dir.path().join("absent.jsonl"));
    assert_eq!(log.stats().unwrap(), ComplianceStats::default());
  }

  #[test]
  fn skips_garbage_lines() {
    let dir = TempDir::new().unwrap();
    let log = JsonlLog::new(dir.path().join("log.jsonl"));
    log.persist(&AnalysisContext::default(), &[]).unwrap();
    let mut file = OpenOptions::new().append(true).open(log.path()).unwrap();
    writeln!(file, "{{not json").unwrap();
    assert_eq!(log.records().unwrap().len(), 1);
  }
}
