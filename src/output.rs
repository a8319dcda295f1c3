// 该文件是 Anjian （安检） 项目的一部分。
// src/output.rs - 标注绘制与帧输出
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

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};

pub mod draw;
pub use self::draw::{Annotation, Draw};

mod image_output;
pub use self::image_output::{FrameDirectory, save_image};

#[cfg(feature = "video_ffmpeg")]
mod video_output;
#[cfg(feature = "video_ffmpeg")]
pub use self::video_output::VideoOutput;

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("无法写入 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("图像编码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("视频编码错误: {0}")]
  Encoding(String),
  #[error("帧尺寸变化: 期望 {expected:?}, 实际 {actual:?}")]
  FrameSize {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("不支持的输出: {0}")]
  Unsupported(String),
}

/// 逐帧写出标注结果
pub trait FrameSink {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError>;

  /// 刷新并关闭输出，重复调用无副作用
  fn finish(&mut self) -> Result<(), OutputError>;
}

type OpenSink = Box<dyn FnOnce(u32, u32) -> Result<Box<dyn FrameSink>, OutputError>>;

/// 在第一帧到来时才打开的输出，离开作用域时总会关闭
pub struct LazySink {
  open: Option<OpenSink>,
  sink: Option<Box<dyn FrameSink>>,
  frames: u64,
}

impl LazySink {
  /// `open` 接收第一帧的宽高
  pub fn new<F>(open: F) -> Self
  where
    F: FnOnce(u32, u32) -> Result<Box<dyn FrameSink>, OutputError> + 'static,
  {
    Self {
      open: Some(Box::new(open)),
      sink: None,
      frames: 0,
    }
  }

  /// 写入视频文件；没有扩展名的路径写成逐帧 PNG 目录
  pub fn video_file(path: PathBuf, fps: f64) -> Self {
    Self::new(move |width, height| open_frame_sink(&path, width, height, fps))
  }

  pub fn is_open(&self) -> bool {
    self.sink.is_some()
  }

  pub fn frames_written(&self) -> u64 {
    self.frames
  }

  pub fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if self.sink.is_none() {
      let open = self
        .open
        .take()
        .ok_or_else(|| OutputError::Unsupported("输出已经关闭".to_string()))?;
      self.sink = Some(open(image.width(), image.height())?);
    }
    if let Some(sink) = self.sink.as_mut() {
      sink.write_frame(image)?;
      self.frames += 1;
    }
    Ok(())
  }

  pub fn finish(&mut self) -> Result<(), OutputError> {
    self.open = None;
    match self.sink.take() {
      Some(mut sink) => {
        sink.finish()?;
        info!("输出完成, 共写入 {} 帧", self.frames);
        Ok(())
      }
      None => Ok(()),
    }
  }
}

impl Drop for LazySink {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      error!("关闭输出时出错: {}", e);
    }
  }
}

fn open_frame_sink(
  path: &Path,
  width: u32,
  height: u32,
  fps: f64,
) -> Result<Box<dyn FrameSink>, OutputError> {
  if path.extension().is_none() {
    return Ok(Box::new(FrameDirectory::create(path)?));
  }

  #[cfg(feature = "video_ffmpeg")]
  {
    Ok(Box::new(VideoOutput::create(path, width, height, fps)?))
  }

  #[cfg(not(feature = "video_ffmpeg"))]
  {
    let _ = (width, height, fps);
    Err(OutputError::Unsupported(format!(
      "编译时未启用 video_ffmpeg, 无法编码 {}",
      path.display()
    )))
  }
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use super::*;

  #[derive(Default)]
  struct Log {
    opened: Option<(u32, u32)>,
    frames: usize,
    finished: usize,
  }

  struct Recorder(Rc<RefCell<Log>>);

  impl FrameSink for Recorder {
    fn write_frame(&mut self, _: &RgbImage) -> Result<(), OutputError> {
      self.0.borrow_mut().frames += 1;
      Ok(())
    }

    fn finish(&mut self) -> Result<(), OutputError> {
      self.0.borrow_mut().finished += 1;
      Ok(())
    }
  }

  fn recording_sink(log: &Rc<RefCell<Log>>) -> LazySink {
    let log = Rc::clone(log);
    LazySink::new(move |w, h| {
      log.borrow_mut().opened = Some((w, h));
      Ok(Box::new(Recorder(log)) as Box<dyn FrameSink>)
    })
  }

  #[test]
  fn opens_on_first_frame_and_closes_on_drop() {
    let log = Rc::new(RefCell::new(Log::default()));
    {
      let mut sink = recording_sink(&log);
      assert!(!sink.is_open());
      sink.write_frame(&RgbImage::new(6, 4)).unwrap();
      sink.write_frame(&RgbImage::new(6, 4)).unwrap();
      assert_eq!(sink.frames_written(), 2);
    }
    let log = log.borrow();
    assert_eq!(log.opened, Some((6, 4)));
    assert_eq!(log.frames, 2);
    assert_eq!(log.finished, 1);
  }

  #[test]
  fn never_opened_when_no_frames() {
    let log = Rc::new(RefCell::new(Log::default()));
    drop(recording_sink(&log));
    assert_eq!(log.borrow().opened, None);
    assert_eq!(log.borrow().finished, 0);
  }

  #[test]
  fn explicit_finish_is_not_repeated_on_drop() {
    let log = Rc::new(RefCell::new(Log::default()));
    let mut sink = recording_sink(&log);
    sink.write_frame(&RgbImage::new(2, 2)).unwrap();
    sink.finish().unwrap();
    drop(sink);
    assert_eq!(log.borrow().finished, 1);
  }
}
