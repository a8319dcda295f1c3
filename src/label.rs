// 该文件是 Anjian （安检） 项目的一部分。
// src/label.rs - PPE 类别标签
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
use std::iter::Peekable;
use std::str::{Chars, FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// 防护装备种类（封闭集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PpeItem {
  Helmet,
  Gloves,
  Goggles,
  Mask,
  Suit,
  Shoes,
}

/// 关键防护装备集合
pub type CriticalSet = BTreeSet<PpeItem>;

const NEGATIVE_PREFIX: &str = "no_";
const MISSING_PREFIX: &str = "missing_";

impl PpeItem {
  pub const ALL: [PpeItem; 6] = [
    PpeItem::Helmet,
    PpeItem::Gloves,
    PpeItem::Goggles,
    PpeItem::Mask,
    PpeItem::Suit,
    PpeItem::Shoes,
  ];

  /// 模型标签中使用的名称
  pub fn name(self) -> &'static str {
    match self {
      PpeItem::Helmet => "helmet",
      PpeItem::Gloves => "gloves",
      PpeItem::Goggles => "goggles",
      PpeItem::Mask => "mask",
      PpeItem::Suit => "suit",
      PpeItem::Shoes => "shoes",
    }
  }

  pub fn negative_label(self) -> String {
    format!("{}{}", NEGATIVE_PREFIX, self.name())
  }

  pub fn missing_label(self) -> String {
    format!("{}{}", MISSING_PREFIX, self.name())
  }
}

impl fmt::Display for PpeItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("未知的防护装备: {0}")]
pub struct UnknownPpeItem(pub String);

impl FromStr for PpeItem {
  type Err = UnknownPpeItem;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    PpeItem::ALL
      .into_iter()
      .find(|item| item.name().eq_ignore_ascii_case(s))
      .ok_or_else(|| UnknownPpeItem(s.to_string()))
  }
}

/// 单个模型类别的语义
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassTag {
  /// 检测到佩戴了该装备
  Present(PpeItem),
  /// 检测到未佩戴该装备（`no_<item>`）
  Absent(PpeItem),
  /// 与防护装备无关的类别
  Other,
}

impl ClassTag {
  pub fn parse(label: &str) -> Self {
    let label = label.trim();
    if let Some(rest) = label.strip_prefix(NEGATIVE_PREFIX) {
      return rest.parse().map(ClassTag::Absent).unwrap_or(ClassTag::Other);
    }
    label.parse().map(ClassTag::Present).unwrap_or(ClassTag::Other)
  }
}

/// 模型类别索引到标签的映射，在加载模型时解析一次
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
  names: Vec<String>,
  tags: Vec<ClassTag>,
}

impl LabelMap {
  pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
    let names: Vec<String> = labels.iter().map(|s| s.as_ref().to_string()).collect();
    let tags = names.iter().map(|name| ClassTag::parse(name)).collect();
    Self { names, tags }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 越界的类别索引视为无关类别
  pub fn tag(&self, class_id: usize) -> ClassTag {
    self.tags.get(class_id).copied().unwrap_or(ClassTag::Other)
  }

  pub fn name(&self, class_id: usize) -> String {
    self
      .names
      .get(class_id)
      .cloned()
      .unwrap_or_else(|| format!("class_{}", class_id))
  }

  /// 模型同时能识别“佩戴”与“未佩戴”两种形式的装备
  pub fn covered_items(&self) -> BTreeSet<PpeItem> {
    let mut present = BTreeSet::new();
    let mut absent = BTreeSet::new();
    for tag in &self.tags {
      match tag {
        ClassTag::Present(item) => {
          present.insert(*item);
        }
        ClassTag::Absent(item) => {
          absent.insert(*item);
        }
        ClassTag::Other => {}
      }
    }
    present.intersection(&absent).copied().collect()
  }

  /// 返回词表中缺失任一形式的关键装备
  pub fn missing_from(&self, critical: &CriticalSet) -> Vec<PpeItem> {
    let covered = self.covered_items();
    critical
      .iter()
      .filter(|item| !covered.contains(item))
      .copied()
      .collect()
  }
}

/// 解析 Ultralytics 导出的 `names` 元数据，例如 `{0: 'helmet', 1: 'no_helmet'}`
///
/// 索引不小于 `max_classes` 时视为无效元数据。
pub fn parse_names_metadata(raw: &str, max_classes: usize) -> Option<Vec<String>> {
  let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
  let mut chars = body.chars().peekable();
  let mut entries = Vec::new();
  loop {
    skip_spaces(&mut chars);
    if chars.peek().is_none() {
      break;
    }

    let mut digits = String::new();
    while let Some(c) = chars.next_if(char::is_ascii_digit) {
      digits.push(c);
    }
    let index: usize = digits.parse().ok()?;
    if index >= max_classes {
      return None;
    }
    skip_spaces(&mut chars);
    chars.next_if_eq(&':')?;
    skip_spaces(&mut chars);

    let quote = chars.next_if(|c| *c == '\'' || *c == '"')?;
    let mut name = String::new();
    loop {
      match chars.next()? {
        '\\' => name.push(chars.next()?),
        c if c == quote => break,
        c => name.push(c),
      }
    }
    entries.push((index, name));

    skip_spaces(&mut chars);
    match chars.next() {
      Some(',') | None => {}
      Some(_) => return None,
    }
  }
  if entries.is_empty() {
    return None;
  }

  entries.sort_by_key(|(index, _)| *index);
  let len = entries.last().map(|(index, _)| index + 1)?;
  let mut names: Vec<String> = (0..len).map(|i| format!("class_{}", i)).collect();
  for (index, name) in entries {
    names[index] = name;
  }
  Some(names)
}

fn skip_spaces(chars: &mut Peekable<Chars<'_>>) {
  while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

/// 以模型输出的类别数量为准确定类别名称
///
/// 模型自带名称时按数量补齐或截断；只有配置名称且数量不符时，全部使用 `class_<i>`。
pub fn class_names(
  metadata: Option<Vec<String>>,
  configured: &[String],
  num_classes: usize,
) -> Vec<String> {
  match metadata {
    Some(mut names) => {
      if names.len() != num_classes {
        warn!(
          "类别数量不一致: 模型输出 {} 类, 元数据名称 {} 个",
          num_classes,
          names.len()
        );
      }
      names.truncate(num_classes);
      let start = names.len();
      names.extend((start..num_classes).map(|i| format!("class_{}", i)));
      names
    }
    None if configured.len() == num_classes => configured.to_vec(),
    None => {
      warn!(
        "模型输出 {} 类, 与配置的 {} 个类别名称不符, 使用通用名称",
        num_classes,
        configured.len()
      );
      (0..num_classes).map(|i| format!("class_{}", i)).collect()
    }
  }
}
