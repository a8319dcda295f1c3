// 该文件是 Anjian （安检） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use anjian::FromUrl;
use anjian::config::Config;
use anjian::detector::PpeDetector;
use anjian::input::open_video;
use anjian::model::LoadedModel;
use anjian::record::{AnalysisContext, JsonlLog, Notifier, NotifierWrapper, Persist};
use anjian::task::{ImageTask, Reporter, Task, VideoTask};

use args::{Args, Command, ReportArgs};

fn main() -> Result<()> {
  let args = Args::parse();
  tracing_subscriber::fmt()
    .with_max_level(args.log_level())
    .init();

  let config = Config::load(args.config.as_deref())
    .context("配置加载失败")?
    .with_overrides(args.confidence, args.iou, args.model.clone())
    .context("命令行参数无效")?;

  match args.command {
    Command::Stats { record } => {
      let log = JsonlLog::from_url(&record)?;
      let stats = log.stats()?;
      println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Command::Image {
      input,
      output,
      report,
    } => {
      let detector = build_detector(&config)?;
      let output = output.map(|path| config.output_path(&path));
      let targets = ReportTargets::from_args(&report)?;
      let task = ImageTask::new(targets.reporter(&report))
        .with_output(output)
        .with_confidence(args.confidence);
      let analysis = task.run_task(input.as_path(), &detector)?;
      println!("{}", serde_json::to_string_pretty(&analysis.violations)?);
      println!("{}", serde_json::to_string_pretty(&analysis.metrics)?);
    }
    Command::Video {
      input,
      output,
      report,
    } => {
      let detector = build_detector(&config)?;
      let output = output.map(|path| config.output_path(&path));
      let source =
        open_video(&input).with_context(|| format!("无法打开视频 {}", input.display()))?;
      let targets = ReportTargets::from_args(&report)?;
      let task = VideoTask::new(&config.video, targets.reporter(&report))
        .with_output(output)
        .with_media_path(Some(input.clone()));
      let report = task.run_task(source, &detector)?;
      println!("{}", serde_json::to_string_pretty(&report)?);
    }
  }

  Ok(())
}

/// 命令行选择的持久化与通知目标
struct ReportTargets {
  log: Option<JsonlLog>,
  notifier: Option<NotifierWrapper>,
}

impl ReportTargets {
  fn from_args(args: &ReportArgs) -> Result<Self> {
    let log = args
      .record
      .as_ref()
      .map(JsonlLog::from_url)
      .transpose()
      .context("--record 参数无效")?;
    let notifier = args
      .notify
      .as_ref()
      .map(NotifierWrapper::from_url)
      .transpose()
      .context("--notify 参数无效")?;
    Ok(Self { log, notifier })
  }

  fn reporter(&self, args: &ReportArgs) -> Reporter<'_> {
    let context = AnalysisContext {
      location: args.location.clone(),
      camera_id: args.camera_id.clone(),
      employee_id: args.employee_id.clone(),
      media_path: None,
    };
    Reporter::new(context)
      .with_persist(self.log.as_ref().map(|log| log as &dyn Persist))
      .with_notifier(self.notifier.as_ref().map(|n| n as &dyn Notifier))
  }
}

fn build_detector(config: &Config) -> Result<PpeDetector> {
  let loaded = load_model(config)?;
  info!("模型来源: {}", loaded.origin.display());
  Ok(PpeDetector::from_config(loaded, config))
}

#[cfg(feature = "model_tract")]
fn load_model(config: &Config) -> Result<LoadedModel> {
  use anjian::model::{ModelProvider, OnnxLoader};

  ModelProvider::from_config(OnnxLoader::from_config(config), &config.models)
    .load_model()
    .with_context(|| {
      format!(
        "无法加载检测模型, 主路径 {}",
        config.primary_model_path().display()
      )
    })
}

#[cfg(not(feature = "model_tract"))]
fn load_model(_config: &Config) -> Result<LoadedModel> {
  anyhow::bail!("未启用模型后端, 请使用 model_tract 特性编译")
}
