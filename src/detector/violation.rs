// 该文件是 Anjian （安检） 项目的一部分。
// src/detector/violation.rs - 违规记录与违规推导
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

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

use crate::frame::FrameStamp;
use crate::label::{ClassTag, CriticalSet, PpeItem};

/// 违规类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ViolationKind {
  /// 模型明确检测到 `no_<item>`
  Detected(PpeItem),
  /// 两种极性都没有检测到，推断为 `missing_<item>`
  Missing(PpeItem),
}

impl ViolationKind {
  pub fn item(self) -> PpeItem {
    match self {
      ViolationKind::Detected(item) | ViolationKind::Missing(item) => item,
    }
  }

  pub fn is_detected(self) -> bool {
    matches!(self, ViolationKind::Detected(_))
  }

  pub fn label(self) -> String {
    match self {
      ViolationKind::Detected(item) => item.negative_label(),
      ViolationKind::Missing(item) => item.missing_label(),
    }
  }

  pub fn parse(label: &str) -> Option<Self> {
    if let Some(rest) = label.strip_prefix("missing_") {
      return rest.parse().ok().map(ViolationKind::Missing);
    }
    match ClassTag::parse(label) {
      ClassTag::Absent(item) => Some(ViolationKind::Detected(item)),
      _ => None,
    }
  }
}

impl fmt::Display for ViolationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.label())
  }
}

impl Serialize for ViolationKind {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.label())
  }
}

impl<'de> Deserialize<'de> for ViolationKind {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    ViolationKind::parse(&raw)
      .ok_or_else(|| serde::de::Error::custom(format!("未知的违规类型: {}", raw)))
  }
}

/// 整数像素坐标的边界框，序列化为 `[x1, y1, x2, y2]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoundingBox {
  pub x1: i32,
  pub y1: i32,
  pub x2: i32,
  pub y2: i32,
}

impl BoundingBox {
  /// 与原始坐标一样向零取整
  pub fn from_xyxy(bbox: &[f32; 4]) -> Self {
    Self {
      x1: bbox[0] as i32,
      y1: bbox[1] as i32,
      x2: bbox[2] as i32,
      y2: bbox[3] as i32,
    }
  }
}

impl From<[i32; 4]> for BoundingBox {
  fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
    Self { x1, y1, x2, y2 }
  }
}

impl From<BoundingBox> for [i32; 4] {
  fn from(b: BoundingBox) -> Self {
    [b.x1, b.y1, b.x2, b.y2]
  }
}

/// 一条违规记录，创建后不再修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
  #[serde(rename = "violation_type")]
  pub kind: ViolationKind,
  pub confidence: f32,
  pub bounding_box: Option<BoundingBox>,
  pub critical: bool,
  #[serde(flatten, skip_serializing_if = "Option::is_none")]
  pub frame: Option<FrameStamp>,
}

impl Violation {
  pub fn violation_type(&self) -> String {
    self.kind.label()
  }

  /// 附加视频帧位置
  pub fn at_frame(mut self, stamp: FrameStamp) -> Self {
    self.frame = Some(stamp);
    self
  }
}

/// 单个检测的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  /// 佩戴了关键装备
  Compliant(PpeItem),
  /// 明确缺少关键装备
  Violation(PpeItem),
  /// 非关键类别，只做标注
  Informational,
}

/// 违规推导结果
#[derive(Debug, Clone, PartialEq)]
pub struct Derived {
  pub violations: Vec<Violation>,
  /// 两种极性都没有出现的关键装备
  pub missing: BTreeSet<PpeItem>,
}

/// 将一帧内的检测整理为违规列表
///
/// 每个关键装备在结果中最多出现一次违规：要么是检测到的 `no_<item>`，
/// 要么是推断的 `missing_<item>`。
pub struct ViolationDeriver<'a> {
  critical: &'a CriticalSet,
  present: BTreeSet<PpeItem>,
  flagged: BTreeSet<PpeItem>,
  violations: Vec<Violation>,
}

impl<'a> ViolationDeriver<'a> {
  pub fn new(critical: &'a CriticalSet) -> Self {
    Self {
      critical,
      present: BTreeSet::new(),
      flagged: BTreeSet::new(),
      violations: Vec::new(),
    }
  }

  pub fn observe(&mut self, tag: ClassTag, confidence: f32, bbox: &[f32; 4]) -> Verdict {
    match tag {
      ClassTag::Present(item) if self.critical.contains(&item) => {
        self.present.insert(item);
        Verdict::Compliant(item)
      }
      ClassTag::Absent(item) if self.critical.contains(&item) => {
        self.flagged.insert(item);
        self.violations.push(Violation {
          kind: ViolationKind::Detected(item),
          confidence,
          bounding_box: Some(BoundingBox::from_xyxy(bbox)),
          critical: true,
          frame: None,
        });
        Verdict::Violation(item)
      }
      _ => Verdict::Informational,
    }
  }

  /// 为从未出现的关键装备补充 `missing_<item>`
  pub fn finish(self, missing_confidence: f32) -> Derived {
    let Self {
      critical,
      present,
      flagged,
      mut violations,
    } = self;

    let missing: BTreeSet<PpeItem> = critical
      .iter()
      .filter(|item| !present.contains(item) && !flagged.contains(item))
      .copied()
      .collect();

    for item in &missing {
      warn!("关键防护装备 {} 完全未被检测到", item);
      violations.push(Violation {
        kind: ViolationKind::Missing(*item),
        confidence: missing_confidence,
        bounding_box: None,
        critical: true,
        frame: None,
      });
    }

    Derived {
      violations,
      missing,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn critical() -> CriticalSet {
    [PpeItem::Helmet, PpeItem::Gloves, PpeItem::Mask, PpeItem::Shoes]
      .into_iter()
      .collect()
  }

  const BOX: [f32; 4] = [10.7, 20.2, 30.9, 40.0];

  #[test]
  fn nothing_observed_marks_every_critical_item_missing() {
    let critical = critical();
    let derived = ViolationDeriver::new(&critical).finish(0.9);
    let labels: Vec<String> = derived.violations.iter().map(Violation::violation_type).collect();
    assert_eq!(
      labels,
      ["missing_helmet", "missing_gloves", "missing_mask", "missing_shoes"]
    );
    assert!(derived.violations.iter().all(|v| v.bounding_box.is_none() && v.confidence == 0.9));
    assert_eq!(derived.missing, critical);
  }

  #[test]
  fn explicit_negative_suppresses_missing_entry() {
    let critical = critical();
    let mut deriver = ViolationDeriver::new(&critical);
    assert_eq!(
      deriver.observe(ClassTag::Absent(PpeItem::Helmet), 0.8, &BOX),
      Verdict::Violation(PpeItem::Helmet)
    );
    assert_eq!(
      deriver.observe(ClassTag::Present(PpeItem::Gloves), 0.9, &BOX),
      Verdict::Compliant(PpeItem::Gloves)
    );
    let derived = deriver.finish(0.9);

    let labels: Vec<String> = derived.violations.iter().map(Violation::violation_type).collect();
    assert_eq!(labels, ["no_helmet", "missing_mask", "missing_shoes"]);
    assert_eq!(
      derived.violations[0].bounding_box,
      Some(BoundingBox {
        x1: 10,
        y1: 20,
        x2: 30,
        y2: 40
      })
    );
  }

  #[test]
  fn non_critical_items_are_informational() {
    let critical = critical();
    let mut deriver = ViolationDeriver::new(&critical);
    assert_eq!(
      deriver.observe(ClassTag::Absent(PpeItem::Goggles), 0.95, &BOX),
      Verdict::Informational
    );
    assert_eq!(
      deriver.observe(ClassTag::Present(PpeItem::Suit), 0.95, &BOX),
      Verdict::Informational
    );
    assert_eq!(deriver.observe(ClassTag::Other, 0.95, &BOX), Verdict::Informational);
    let derived = deriver.finish(0.9);
    assert!(derived.violations.iter().all(|v| !v.kind.is_detected()));
    assert!(!derived.violations.iter().any(|v| v.kind.item() == PpeItem::Goggles));
  }

  #[test]
  fn serializes_with_flat_frame_stamp() {
    let violation = Violation {
      kind: ViolationKind::Detected(PpeItem::Mask),
      confidence: 0.5,
      bounding_box: Some(BoundingBox::from_xyxy(&BOX)),
      critical: true,
      frame: None,
    }
    .at_frame(FrameStamp {
      frame_index: 30,
      timestamp_seconds: 1.0,
    });

    let json = serde_json::to_value(&violation).unwrap();
    assert_eq!(json["violation_type"], "no_mask");
    assert_eq!(json["bounding_box"], serde_json::json!([10, 20, 30, 40]));
    assert_eq!(json["frame_index"], 30);

    let back: Violation = serde_json::from_value(json).unwrap();
    assert_eq!(back, violation);
  }

  #[test]
  fn parses_violation_labels() {
    assert_eq!(
      ViolationKind::parse("missing_shoes"),
      Some(ViolationKind::Missing(PpeItem::Shoes))
    );
    assert_eq!(
      ViolationKind::parse("no_gloves"),
      Some(ViolationKind::Detected(PpeItem::Gloves))
    );
    assert_eq!(ViolationKind::parse("helmet"), None);
  }
}
