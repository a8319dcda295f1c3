// 该文件是 Anjian （安检） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, Subcommand};
use tracing::Level;
use url::Url;

use anjian::record::{DEFAULT_CAMERA_ID, DEFAULT_LOCATION};

/// Anjian PPE 合规检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// TOML 配置文件
  #[arg(long, global = true, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 置信度阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, global = true, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IoU 阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, global = true, value_name = "THRESHOLD")]
  pub iou: Option<f32>,

  /// 优先尝试的模型文件
  #[arg(long, global = true, value_name = "MODEL")]
  pub model: Option<PathBuf>,

  /// 输出调试日志
  #[arg(short, long, global = true)]
  pub verbose: bool,

  /// 只输出警告与错误
  #[arg(short, long, global = true, conflicts_with = "verbose")]
  pub quiet: bool,

  #[command(subcommand)]
  pub command: Command,
}

impl Args {
  pub fn log_level(&self) -> Level {
    if self.verbose {
      Level::DEBUG
    } else if self.quiet {
      Level::WARN
    } else {
      Level::INFO
    }
  }
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 分析单张图像
  Image {
    /// 输入图像
    #[arg(long, value_name = "IMAGE")]
    input: PathBuf,
    /// 标注图像输出路径
    #[arg(long, value_name = "OUTPUT")]
    output: Option<PathBuf>,
    #[command(flatten)]
    report: ReportArgs,
  },
  /// 分析视频文件
  Video {
    /// 输入视频
    #[arg(long, value_name = "VIDEO")]
    input: PathBuf,
    /// 标注视频输出路径；没有扩展名时输出 PNG 帧目录
    #[arg(long, value_name = "OUTPUT")]
    output: Option<PathBuf>,
    #[command(flatten)]
    report: ReportArgs,
  },
  /// 汇总违规日志
  Stats {
    /// 日志位置，例如 jsonl:///var/lib/anjian/violations.jsonl
    #[arg(long, value_name = "URL")]
    record: Url,
  },
}

/// 上报相关参数
#[derive(clap::Args, Debug)]
pub struct ReportArgs {
  /// 拍摄地点
  #[arg(long, default_value = DEFAULT_LOCATION)]
  pub location: String,

  /// 摄像头编号
  #[arg(long, default_value = DEFAULT_CAMERA_ID)]
  pub camera_id: String,

  /// 员工编号
  #[arg(long)]
  pub employee_id: Option<String>,

  /// 违规记录位置，例如 jsonl:///var/lib/anjian/violations.jsonl
  #[arg(long, value_name = "URL")]
  pub record: Option<Url>,

  /// 通知方式，log: 或 outbox:///var/spool/anjian
  #[arg(long, value_name = "URL")]
  pub notify: Option<Url>,
}
