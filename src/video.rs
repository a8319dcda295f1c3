// 该文件是 Anjian （安检） 项目的一部分。
// src/video.rs - 视频流采样与逐帧分析
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
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::VideoSettings;
use crate::detector::{PpeDetector, VideoMetrics, VideoMetricsBuilder, Violation};
use crate::input::{FrameSource, InputError, open_video};
use crate::output::LazySink;

#[derive(Error, Debug)]
pub enum VideoError {
  #[error("视频文件不存在: {0}")]
  NotFound(PathBuf),
  #[error(transparent)]
  Input(#[from] InputError),
}

/// 采样策略
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingPlan {
  /// 每隔多少帧分析一帧
  pub skip: u64,
  /// 输出视频的帧率
  pub output_fps: f64,
  pub duration_secs: Option<f64>,
}

impl SamplingPlan {
  /// 稳定状态下每秒分析 `target_fps` 帧；短视频逐帧分析
  pub fn for_stream(fps: f64, total_frames: Option<u64>, settings: &VideoSettings) -> Self {
    if !(fps.is_finite() && fps > 0.0) {
      return Self {
        skip: 1,
        output_fps: settings.target_fps,
        duration_secs: None,
      };
    }

    let duration_secs = total_frames.map(|n| n as f64 / fps);
    let skip = match duration_secs {
      Some(secs) if secs < settings.full_analysis_below_secs => 1,
      _ => ((fps / settings.target_fps).round() as u64).max(1),
    };

    Self {
      skip,
      output_fps: fps / skip as f64,
      duration_secs,
    }
  }

  /// 帧序号从 1 开始
  pub fn is_sampled(&self, index: u64) -> bool {
    index % self.skip == 0
  }
}

/// 一段视频的分析报告
#[derive(Debug, Clone, Serialize)]
pub struct VideoReport {
  /// 按时间顺序排列
  pub violations: Vec<Violation>,
  pub metrics: VideoMetrics,
}

pub struct VideoProcessor<'a> {
  detector: &'a PpeDetector,
  settings: VideoSettings,
}

impl<'a> VideoProcessor<'a> {
  pub fn new(detector: &'a PpeDetector, settings: &VideoSettings) -> Self {
    Self {
      detector,
      settings: settings.clone(),
    }
  }

  /// 分析本地视频文件，`output` 不为空时写出标注后的采样帧
  pub fn process_video(&self, path: &Path, output: Option<&Path>) -> Result<VideoReport, VideoError> {
    if !path.is_file() {
      return Err(VideoError::NotFound(path.to_path_buf()));
    }
    let source = open_video(path)?;
    Ok(self.process_stream(source, output))
  }

  pub fn plan_for<S: FrameSource + ?Sized>(&self, source: &S) -> SamplingPlan {
    SamplingPlan::for_stream(source.fps(), source.total_frames(), &self.settings)
  }

  pub fn process_stream<S: FrameSource>(&self, source: S, output: Option<&Path>) -> VideoReport {
    let plan = self.plan_for(&source);
    let sink = output.map(|path| LazySink::video_file(path.to_path_buf(), plan.output_fps));
    self.process_frames(source, &plan, sink)
  }

  /// 主循环：严格按帧顺序读取，单帧失败只记录日志
  pub fn process_frames<S: FrameSource>(
    &self,
    mut source: S,
    plan: &SamplingPlan,
    mut sink: Option<LazySink>,
  ) -> VideoReport {
    let fps = source.fps();
    let started = Instant::now();
    info!(
      "开始分析视频: {:.2} fps, 帧数 {:?}, 采样间隔 {}",
      fps,
      source.total_frames(),
      plan.skip
    );

    let mut builder = VideoMetricsBuilder::default();
    let mut violations = Vec::new();

    for next in source.by_ref() {
      let frame = match next {
        Ok(frame) => frame,
        Err(e) if e.is_recoverable() => {
          builder.frame_read();
          warn!("跳过损坏的帧: {}", e);
          continue;
        }
        Err(e) => {
          error!("读取视频帧失败, 提前结束: {}", e);
          break;
        }
      };

      builder.frame_read();
      if !plan.is_sampled(frame.index) {
        continue;
      }

      let analysis = match self.detector.detect(&frame.image, None) {
        Ok(analysis) => analysis,
        Err(e) => {
          error!("第 {} 帧分析失败: {}", frame.index, e);
          continue;
        }
      };

      let stamp = frame.stamp();
      let frame_violations: Vec<Violation> = analysis
        .violations
        .into_iter()
        .map(|v| v.at_frame(stamp))
        .collect();
      builder.frame_analyzed(&analysis.metrics, &frame_violations);
      debug!(
        "第 {} 帧 ({:.2}s): {} 条违规",
        frame.index,
        frame.timestamp_secs,
        frame_violations.len()
      );
      violations.extend(frame_violations);

      let failed = match sink.as_mut() {
        Some(out) => out.write_frame(&analysis.annotated).err(),
        None => None,
      };
      if let Some(e) = failed {
        error!("写入输出视频失败, 后续帧不再写出: {}", e);
        sink = None;
      }
    }

    if let Some(mut out) = sink
      && let Err(e) = out.finish()
    {
      error!("关闭输出视频失败: {}", e);
    }

    let metrics = builder.build(fps, plan.skip);
    info!(
      "已处理 {}/{} 帧, {} 条违规, 耗时 {:.2?}",
      metrics.processed_frames,
      metrics.total_frames,
      violations.len(),
      started.elapsed()
    );

    VideoReport {
      violations,
      metrics,
    }
  }
}
