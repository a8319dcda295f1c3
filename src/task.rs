// 该文件是 Anjian （安检） 项目的一部分。
// src/task.rs - 分析任务编排
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

use anyhow::Context;
use tracing::{info, warn};

use crate::config::VideoSettings;
use crate::detector::{FrameAnalysis, PpeDetector, Violation};
use crate::input::{FrameSource, load_image};
use crate::output::save_image;
use crate::record::{AnalysisContext, Notifier, Persist};
use crate::video::{VideoProcessor, VideoReport};

/// 默认的通知时间范围描述
pub const DEFAULT_TIME_RANGE: &str = "just now";

pub trait Task<I>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, detector: &PpeDetector) -> Result<Self::Output, Self::Error>;
}

/// 分析完成后的持久化与通知
pub struct Reporter<'a> {
  context: AnalysisContext,
  persist: Option<&'a dyn Persist>,
  notifier: Option<&'a dyn Notifier>,
  time_range: String,
}

impl<'a> Reporter<'a> {
  pub fn new(context: AnalysisContext) -> Self {
    Self {
      context,
      persist: None,
      notifier: None,
      time_range: DEFAULT_TIME_RANGE.to_string(),
    }
  }

  pub fn with_persist(mut self, persist: Option<&'a dyn Persist>) -> Self {
    self.persist = persist;
    self
  }

  pub fn with_notifier(mut self, notifier: Option<&'a dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  pub fn with_time_range(mut self, time_range: impl Into<String>) -> Self {
    self.time_range = time_range.into();
    self
  }

  fn report(&self, media_path: Option<&Path>, violations: &[Violation]) -> anyhow::Result<()> {
    if let Some(persist) = self.persist {
      let mut context = self.context.clone();
      if context.media_path.is_none() {
        context.media_path = media_path.map(Path::to_path_buf);
      }
      persist
        .persist(&context, violations)
        .context("保存违规记录失败")?;
    }

    // 通知不阻塞分析流程
    if let Some(notifier) = self.notifier
      && !violations.is_empty()
    {
      notifier.notify(violations, &self.time_range);
    }
    Ok(())
  }
}

/// 单张图像：检测，保存标注图，上报
pub struct ImageTask<'a> {
  output: Option<PathBuf>,
  confidence: Option<f32>,
  reporter: Reporter<'a>,
}

impl<'a> ImageTask<'a> {
  pub fn new(reporter: Reporter<'a>) -> Self {
    Self {
      output: None,
      confidence: None,
      reporter,
    }
  }

  pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
    self.output = output;
    self
  }

  pub fn with_confidence(mut self, confidence: Option<f32>) -> Self {
    self.confidence = confidence;
    self
  }
}

impl<'a> Task<&Path> for ImageTask<'a> {
  type Output = FrameAnalysis;
  type Error = anyhow::Error;

  fn run_task(self, input: &Path, detector: &PpeDetector) -> Result<Self::Output, Self::Error> {
    info!("开始图像任务: {}", input.display());
    let image = load_image(input).with_context(|| format!("无法读取图像 {}", input.display()))?;

    let now = std::time::Instant::now();
    let analysis = detector
      .detect(&image, self.confidence)
      .with_context(|| format!("图像分析失败 {}", input.display()))?;
    info!(
      "推理完成，耗时: {:.2?}, {} 个目标, {} 条违规",
      now.elapsed(),
      analysis.metrics.total_detections,
      analysis.violations.len()
    );

    if let Some(output) = &self.output {
      save_image(&analysis.annotated, output)
        .with_context(|| format!("无法保存标注图像 {}", output.display()))?;
      info!("标注图像已保存: {}", output.display());
    }

    let media = self.output.as_deref().unwrap_or(input);
    self.reporter.report(Some(media), &analysis.violations)?;
    Ok(analysis)
  }
}

/// 视频：采样分析，写出标注视频，上报
pub struct VideoTask<'a> {
  settings: VideoSettings,
  output: Option<PathBuf>,
  media_path: Option<PathBuf>,
  reporter: Reporter<'a>,
}

impl<'a> VideoTask<'a> {
  pub fn new(settings: &VideoSettings, reporter: Reporter<'a>) -> Self {
    Self {
      settings: settings.clone(),
      output: None,
      media_path: None,
      reporter,
    }
  }

  pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
    self.output = output;
    self
  }

  /// 记录中使用的媒体路径
  pub fn with_media_path(mut self, media_path: Option<PathBuf>) -> Self {
    self.media_path = media_path;
    self
  }
}

impl<'a, S: FrameSource> Task<S> for VideoTask<'a> {
  type Output = VideoReport;
  type Error = anyhow::Error;

  fn run_task(self, input: S, detector: &PpeDetector) -> Result<Self::Output, Self::Error> {
    info!("开始视频任务...");
    let processor = VideoProcessor::new(detector, &self.settings);
    let report = processor.process_stream(input, self.output.as_deref());

    if report.metrics.processed_frames == 0 {
      warn!("没有成功分析任何帧");
    }

    let media = self.output.as_deref().or(self.media_path.as_deref());
    self.reporter.report(media, &report.violations)?;
    info!("任务完成，退出");
    Ok(report)
  }
}
