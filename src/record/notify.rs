// 该文件是 Anjian （安检） 项目的一部分。
// src/record/notify.rs - 违规通知
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

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::detector::Violation;
use crate::record::{Notifier, RecordError, url_path};
use crate::{FromUrl, FromUrlWithScheme};

const CSV_HEADER: &str = "violation_type,confidence,bounding_box,critical,frame_index,timestamp_seconds";
const MESSAGE_FILE: &str = "message.txt";

/// 发给安全团队的违规报告
#[derive(Debug, Clone, PartialEq)]
pub struct ViolationReport {
  pub subject: String,
  pub body: String,
  pub attachment_name: String,
  pub attachment: String,
}

impl ViolationReport {
  pub fn new(violations: &[Violation], time_range: &str) -> Self {
    let subject = format!("PPE Compliance Violation Report - Last {}", time_range);
    let body = format!(
      "Dear Safety Team,\n\n\
       Here's the PPE compliance violation report for the last {}:\n\n\
       Total violations: {}\n\n\
       Please review the attached detailed report and take appropriate actions.\n\n\
       Regards,\n\
       Intelliguard System\n",
      time_range,
      violations.len()
    );
    Self {
      subject,
      body,
      attachment_name: format!("ppe_violations_{}.csv", time_range.replace(' ', "_")),
      attachment: violations_csv(violations),
    }
  }
}

fn violations_csv(violations: &[Violation]) -> String {
  let mut csv = String::from(CSV_HEADER);
  csv.push('\n');
  for v in violations {
    let bbox = v
      .bounding_box
      .map(|b| format!("[{}, {}, {}, {}]", b.x1, b.y1, b.x2, b.y2))
      .unwrap_or_default();
    let (frame_index, timestamp) = match v.frame {
      Some(stamp) => (
        stamp.frame_index.to_string(),
        stamp.timestamp_seconds.to_string(),
      ),
      None => (String::new(), String::new()),
    };
    // 写入 String 不会失败
    let _ = writeln!(
      csv,
      "{},{},{},{},{},{}",
      csv_field(&v.violation_type()),
      v.confidence,
      csv_field(&bbox),
      v.critical,
      frame_index,
      timestamp
    );
  }
  csv
}

fn csv_field(value: &str) -> String {
  if value.contains([',', '"', '\n']) {
    format!("\"{}\"", value.replace('"', "\"\""))
  } else {
    value.to_string()
  }
}

/// 把告警写入日志
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl FromUrlWithScheme for LogNotifier {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogNotifier {
  type Error = RecordError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RecordError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }
    Ok(LogNotifier)
  }
}

impl Notifier for LogNotifier {
  fn notify(&self, violations: &[Violation], time_range: &str) {
    if violations.is_empty() {
      return;
    }
    warn!(
      "PPE 违规告警 (最近 {}): 共 {} 条",
      time_range,
      violations.len()
    );
    for v in violations {
      warn!("  {} 置信度 {:.2}", v.violation_type(), v.confidence);
    }
  }
}

/// 按日期分目录写出报告，由外部邮件中继投递
#[derive(Debug, Clone)]
pub struct OutboxNotifier {
  directory: PathBuf,
}

impl FromUrlWithScheme for OutboxNotifier {
  const SCHEME: &'static str = "outbox";
}

impl FromUrl for OutboxNotifier {
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

impl OutboxNotifier {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn report_dir(&self) -> PathBuf {
    let now = Utc::now();
    let id = Uuid::new_v4().simple().to_string();
    self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()))
      .join(format!("{}-{}", now.format("%H-%M-%S"), &id[..8]))
  }

  /// 写出一份报告，返回报告目录
  pub fn write_report(&self, report: &ViolationReport) -> Result<PathBuf, RecordError> {
    let dir = self.report_dir();
    let io_err = |path: &Path, source| RecordError::Io {
      path: path.to_path_buf(),
      source,
    };

    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    let message = dir.join(MESSAGE_FILE);
    fs::write(
      &message,
      format!("Subject: {}\n\n{}", report.subject, report.body),
    )
    .map_err(|e| io_err(&message, e))?;
    let attachment = dir.join(&report.attachment_name);
    fs::write(&attachment, &report.attachment).map_err(|e| io_err(&attachment, e))?;
    Ok(dir)
  }
}

impl Notifier for OutboxNotifier {
  fn notify(&self, violations: &[Violation], time_range: &str) {
    if violations.is_empty() {
      return;
    }
    let report = ViolationReport::new(violations, time_range);
    match self.write_report(&report) {
      Ok(dir) => info!("违规报告已写入发件箱: {}", dir.display()),
      Err(e) => error!("违规报告写入失败: {}", e),
    }
  }
}

/// 按 URL 方案选择通知方式
#[derive(Debug, Clone)]
pub enum NotifierWrapper {
  Log(LogNotifier),
  Outbox(OutboxNotifier),
}

impl FromUrl for NotifierWrapper {
  type Error = RecordError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      OutboxNotifier::SCHEME => OutboxNotifier::from_url(url).map(NotifierWrapper::Outbox),
      _ => LogNotifier::from_url(url).map(NotifierWrapper::Log),
    }
  }
}

impl Notifier for NotifierWrapper {
  fn notify(&self, violations: &[Violation], time_range: &str) {
    match self {
      NotifierWrapper::Log(n) => n.notify(violations, time_range),
      NotifierWrapper::Outbox(n) => n.notify(violations, time_range),
    }
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;
  use crate::detector::{BoundingBox, ViolationKind};
  use crate::frame::FrameStamp;
  use crate::label::PpeItem;

  fn sample() -> Vec<Violation> {
    vec![
      Violation {
        kind: ViolationKind::Detected(PpeItem::Gloves),
        confidence: 0.75,
        bounding_box: Some(BoundingBox::from([1, 2, 3, 4])),
        critical: true,
        frame: Some(FrameStamp {
          frame_index: 12,
          timestamp_seconds: 0.5,
        }),
      },
      Violation {
        kind: ViolationKind::Missing(PpeItem::Mask),
        confidence: 0.9,
        bounding_box: None,
        critical: true,
        frame: None,
      },
    ]
  }

  #[test]
  fn report_text() {
    let report = ViolationReport::new(&sample(), "24 hours");
    assert_eq!(report.subject, "PPE Compliance Violation Report - Last 24 hours");
    assert!(report.body.contains("Total violations: 2"));
    assert_eq!(report.attachment_name, "ppe_violations_24_hours.csv");

    let lines: Vec<&str> = report.attachment.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines[1], "no_gloves,0.75,\"[1, 2, 3, 4]\",true,12,0.5");
    assert_eq!(lines[2], "missing_mask,0.9,,true,,");
  }

  #[test]
  fn outbox_writes_dated_report() {
    let dir = TempDir::new().unwrap();
    let outbox = OutboxNotifier::new(dir.path());
    let report = ViolationReport::new(&sample(), "just now");
    let written = outbox.write_report(&report).unwrap();

    assert!(written.starts_with(dir.path()));
    assert_eq!(written.strip_prefix(dir.path()).unwrap().components().count(), 4);
    let message = fs::read_to_string(written.join(MESSAGE_FILE)).unwrap();
    assert!(message.starts_with("Subject: PPE Compliance Violation Report - Last just now"));
    assert!(written.join("ppe_violations_just_now.csv").is_file());
  }

  #[test]
  fn empty_list_sends_nothing() {
    let dir = TempDir::new().unwrap();
    OutboxNotifier::new(dir.path()).notify(&[], "just now");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
  }

  #[test]
  fn wrapper_selects_by_scheme() {
    let url = url::Url::parse("outbox:///srv/outbox").unwrap();
    match NotifierWrapper::from_url(&url).unwrap() {
      NotifierWrapper::Outbox(n) => assert_eq!(n.directory(), Path::new("/srv/outbox")),
      other => panic!("unexpected: {:?}", other),
    }
    let url = url::Url::parse("log:").unwrap();
    assert!(matches!(
      NotifierWrapper::from_url(&url).unwrap(),
      NotifierWrapper::Log(_)
    ));
    let url = url::Url::parse("smtp://mail.example.com").unwrap();
    assert!(NotifierWrapper::from_url(&url).is_err());
  }
}
