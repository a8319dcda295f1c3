// 该文件是 Anjian （安检） 项目的一部分。
// src/detector/metrics.rs - 单帧与视频的合规指标
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

use serde::Serialize;

use super::violation::Violation;
use crate::label::PpeItem;

/// 单张图像的指标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionMetrics {
  pub total_detections: usize,
  pub violation_count: usize,
  pub critical_violation_count: usize,
  /// 保留下来的检测的平均置信度
  pub average_confidence: f32,
  /// `1 - 检测到的违规数 / max(1, 检测数)`，推断的缺失项不计入
  pub compliance_rate: f32,
  pub missing_ppe: Vec<PpeItem>,
}

impl DetectionMetrics {
  pub fn compute(scores: &[f32], violations: &[Violation], missing: &BTreeSet<PpeItem>) -> Self {
    let total_detections = scores.len();
    let detected = violations.iter().filter(|v| v.kind.is_detected()).count();

    Self {
      total_detections,
      violation_count: violations.len(),
      critical_violation_count: violations.iter().filter(|v| v.critical).count(),
      average_confidence: mean(scores.iter().copied()),
      compliance_rate: compliance(detected, total_detections),
      missing_ppe: missing.iter().copied().collect(),
    }
  }
}

/// 整段视频的汇总指标
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoMetrics {
  /// 读取到的帧数（包括损坏帧）
  pub total_frames: u64,
  /// 成功分析的帧数
  pub processed_frames: u64,
  pub total_detections: usize,
  pub total_violations: usize,
  pub critical_violations: usize,
  /// 所有违规的平均置信度
  pub average_confidence: f32,
  /// 至少有一条违规的帧数
  pub violation_frames: u64,
  pub compliance_rate: f32,
  /// 分析帧数与视频播放时长之比
  pub processing_fps: f64,
  pub sample_stride: u64,
}

/// 逐帧累加视频指标
#[derive(Debug, Clone, Default)]
pub struct VideoMetricsBuilder {
  total_frames: u64,
  processed_frames: u64,
  total_detections: usize,
  detected_violations: usize,
  total_violations: usize,
  critical_violations: usize,
  confidence_sum: f64,
  violation_frames: u64,
}

impl VideoMetricsBuilder {
  pub fn frame_read(&mut self) {
    self.total_frames += 1;
  }

  pub fn frame_analyzed(&mut self, metrics: &DetectionMetrics, violations: &[Violation]) {
    self.processed_frames += 1;
    self.total_detections += metrics.total_detections;
    self.total_violations += violations.len();
    self.detected_violations += violations.iter().filter(|v| v.kind.is_detected()).count();
    self.critical_violations += violations.iter().filter(|v| v.critical).count();
    self.confidence_sum += violations.iter().map(|v| v.confidence as f64).sum::<f64>();
    if !violations.is_empty() {
      self.violation_frames += 1;
    }
  }

  pub fn total_frames(&self) -> u64 {
    self.total_frames
  }

  pub fn build(&self, fps: f64, sample_stride: u64) -> VideoMetrics {
    let average_confidence = if self.total_violations > 0 {
      (self.confidence_sum / self.total_violations as f64) as f32
    } else {
      0.0
    };
    let processing_fps = if self.total_frames > 0 && fps > 0.0 {
      self.processed_frames as f64 / (self.total_frames as f64 / fps)
    } else {
      0.0
    };

    VideoMetrics {
      total_frames: self.total_frames,
      processed_frames: self.processed_frames,
      total_detections: self.total_detections,
      total_violations: self.total_violations,
      critical_violations: self.critical_violations,
      average_confidence,
      violation_frames: self.violation_frames,
      compliance_rate: compliance(self.detected_violations, self.total_detections),
      processing_fps,
      sample_stride,
    }
  }
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
  let (sum, n) = values.fold((0.0f64, 0usize), |(s, n), v| (s + v as f64, n + 1));
  if n == 0 { 0.0 } else { (sum / n as f64) as f32 }
}

fn compliance(violations: usize, detections: usize) -> f32 {
  if detections == 0 {
    return 1.0;
  }
  (1.0 - violations as f32 / detections as f32).clamp(0.0, 1.0)
}
