// 该文件是 Anjian （安检） 项目的一部分。
// src/input.rs - 图像解码边界与视频帧来源
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

use thiserror::Error;

use crate::frame::Frame;

mod image_source;
pub use self::image_source::{decode_image, load_image};

#[cfg(feature = "video_ffmpeg")]
mod video_source;
#[cfg(feature = "video_ffmpeg")]
pub use self::video_source::VideoSource;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("无法读取 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像尺寸为空")]
  EmptyImage,
  #[error("第 {index} 帧损坏: {reason}")]
  CorruptFrame { index: u64, reason: String },
  #[error("视频流错误: {0}")]
  Stream(String),
  #[error("不支持的输入: {0}")]
  Unsupported(String),
}

impl InputError {
  /// 单帧损坏可以跳过，其余错误终止读取
  pub fn is_recoverable(&self) -> bool {
    matches!(self, InputError::CorruptFrame { .. })
  }
}

/// 按时间顺序产生帧的视频来源
pub trait FrameSource: Iterator<Item = Result<Frame, InputError>> {
  /// 原始帧率；未知时返回 0
  fn fps(&self) -> f64;

  /// 容器报告或估算的总帧数
  fn total_frames(&self) -> Option<u64>;

  fn dimensions(&self) -> (u32, u32);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn fps(&self) -> f64 {
    (**self).fps()
  }

  fn total_frames(&self) -> Option<u64> {
    (**self).total_frames()
  }

  fn dimensions(&self) -> (u32, u32) {
    (**self).dimensions()
  }
}

/// 打开本地视频文件
pub fn open_video(path: &Path) -> Result<Box<dyn FrameSource>, InputError> {
  if !path.is_file() {
    return Err(InputError::NotFound(path.to_path_buf()));
  }

  #[cfg(feature = "video_ffmpeg")]
  {
    let source = VideoSource::open(path)?;
    Ok(Box::new(source))
  }

  #[cfg(not(feature = "video_ffmpeg"))]
  {
    Err(InputError::Unsupported(format!(
      "编译时未启用 video_ffmpeg, 无法解码 {}",
      path.display()
    )))
  }
}
