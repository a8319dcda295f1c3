// 该文件是 Anjian （安检） 项目的一部分。
// tests/task.rs - 任务编排与上报测试
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

mod common;

use std::fs;
use std::path::Path;

use anjian::config::Config;
use anjian::record::{AnalysisContext, AnomalyStatus, ComplianceStats, JsonlLog, OutboxNotifier};
use anjian::task::{ImageTask, Reporter, Task, VideoTask};
use image::RgbImage;
use tempfile::TempDir;

use common::*;

/// 递归统计目录下的文件
fn count_files(dir: &Path) -> usize {
  let Ok(entries) = fs::read_dir(dir) else {
    return 0;
  };
  entries
    .flatten()
    .map(|entry| {
      let path = entry.path();
      if path.is_dir() { count_files(&path) } else { 1 }
    })
    .sum()
}

fn context() -> AnalysisContext {
  AnalysisContext {
    location: "Warehouse B".to_string(),
    camera_id: "cam-07".to_string(),
    employee_id: Some("E1024".to_string()),
    media_path: None,
  }
}

fn write_png(path: &Path) {
  RgbImage::new(120, 80).save(path).unwrap();
}

#[test]
fn image_task_saves_persists_and_notifies() {
  let dir = TempDir::new().unwrap();
  let input = dir.path().join("upload.png");
  let output = dir.path().join("annotated/upload.png");
  write_png(&input);

  let log = JsonlLog::new(dir.path().join("violations.jsonl"));
  let outbox = OutboxNotifier::new(dir.path().join("outbox"));
  let reporter = Reporter::new(context())
    .with_persist(Some(&log))
    .with_notifier(Some(&outbox));

  let detector = detector(vec![item(NO_HELMET, 0.9, [5.0, 5.0, 40.0, 40.0])]);
  let analysis = ImageTask::new(reporter)
    .with_output(Some(output.clone()))
    .run_task(input.as_path(), &detector)
    .unwrap();

  assert_eq!(analysis.violations.len(), 4);
  assert!(output.is_file());

  let records = log.records().unwrap();
  assert_eq!(records.len(), 1);
  let record = &records[0];
  assert_eq!(record.violations_count, 4);
  assert_eq!(record.anomaly_status, AnomalyStatus::Critical);
  assert_eq!(record.context.location, "Warehouse B");
  assert_eq!(record.context.employee_id.as_deref(), Some("E1024"));
  assert_eq!(record.context.media_path.as_deref(), Some(output.as_path()));
  assert_eq!(record.violations, analysis.violations);

  assert_eq!(count_files(&dir.path().join("outbox")), 2);
}

#[test]
fn compliant_image_is_logged_but_not_notified() {
  let dir = TempDir::new().unwrap();
  let input = dir.path().join("ok.png");
  write_png(&input);

  let log = JsonlLog::new(dir.path().join("violations.jsonl"));
  let outbox = OutboxNotifier::new(dir.path().join("outbox"));
  let reporter = Reporter::new(AnalysisContext::default())
    .with_persist(Some(&log))
    .with_notifier(Some(&outbox));

  let detector = detector(vec![
    item(HELMET, 0.9, [0.0, 0.0, 10.0, 10.0]),
    item(GLOVES, 0.9, [10.0, 10.0, 20.0, 20.0]),
    item(MASK, 0.9, [20.0, 20.0, 30.0, 30.0]),
    item(SHOES, 0.9, [30.0, 30.0, 40.0, 40.0]),
  ]);
  let analysis = ImageTask::new(reporter)
    .run_task(input.as_path(), &detector)
    .unwrap();

  assert!(analysis.violations.is_empty());
  assert_eq!(
    log.stats().unwrap(),
    ComplianceStats {
      total_checks: 1,
      compliant: 1,
      violations: 0,
      critical: 0,
    }
  );
  let record = &log.records().unwrap()[0];
  assert_eq!(record.context.camera_id, "cli_upload");
  assert_eq!(record.context.media_path.as_deref(), Some(input.as_path()));
  assert_eq!(count_files(&dir.path().join("outbox")), 0);
}

#[test]
fn unreadable_image_fails_before_reporting() {
  let dir = TempDir::new().unwrap();
  let input = dir.path().join("broken.png");
  fs::write(&input, b"not an image").unwrap();

  let log = JsonlLog::new(dir.path().join("violations.jsonl"));
  let reporter = Reporter::new(AnalysisContext::default()).with_persist(Some(&log));
  let result = ImageTask::new(reporter).run_task(input.as_path(), &detector(Vec::new()));

  assert!(result.is_err());
  assert!(log.records().unwrap().is_empty());
}

#[test]
fn video_task_persists_one_record_per_video() {
  let dir = TempDir::new().unwrap();
  let log = JsonlLog::new(dir.path().join("violations.jsonl"));
  let reporter = Reporter::new(context())
    .with_persist(Some(&log))
    .with_time_range("15 minutes");

  let config = Config::default();
  let detector = detector(vec![item(NO_HELMET, 0.9, [1.0, 1.0, 20.0, 20.0])]);
  let report = VideoTask::new(&config.video, reporter)
    .with_media_path(Some(dir.path().join("shift.mp4")))
    .run_task(FakeSource::new(30.0, 60, &[], &[]), &detector)
    .unwrap();

  let records = log.records().unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].violations_count, report.violations.len());
  assert_eq!(
    records[0].context.media_path.as_deref(),
    Some(dir.path().join("shift.mp4").as_path())
  );
  assert!(records[0].violations.iter().all(|v| v.frame.is_some()));
}
