// 该文件是 Anjian （安检） 项目的一部分。
// src/input/video_source.rs - FFmpeg 视频输入源
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

use std::path::Path;

use ffmpeg_next as ffmpeg;
use ffmpeg_next::format::{Pixel, input};
use ffmpeg_next::media::Type;
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use image::RgbImage;
use tracing::{debug, info};

use super::{FrameSource, InputError};
use crate::frame::Frame;

fn stream_err(e: ffmpeg::Error) -> InputError {
  InputError::Stream(e.to_string())
}

enum Decoded {
  Frame(Video),
  Corrupt(String),
  End,
}

/// 视频输入源，解码会话随值一起释放
pub struct VideoSource {
  input_context: ffmpeg::format::context::Input,
  video_stream_index: usize,
  decoder: ffmpeg::decoder::Video,
  scaler: ScalingContext,
  /// 已产生的帧数（包括损坏帧）
  frame_index: u64,
  width: u32,
  height: u32,
  fps: f64,
  time_base: f64,
  total_frames: Option<u64>,
  eof_sent: bool,
  finished: bool,
}

impl VideoSource {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    ffmpeg::init().map_err(stream_err)?;

    let input_context = input(&path).map_err(|e| {
      InputError::Stream(format!("无法打开视频文件 {}: {}", path.display(), e))
    })?;

    let video_stream = input_context
      .streams()
      .best(Type::Video)
      .ok_or_else(|| InputError::Stream(format!("找不到视频流: {}", path.display())))?;

    let video_stream_index = video_stream.index();
    let context_decoder = ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())
      .map_err(stream_err)?;
    let decoder = context_decoder.decoder().video().map_err(stream_err)?;

    let width = decoder.width();
    let height = decoder.height();

    let rate = video_stream.avg_frame_rate();
    let fps = if rate.denominator() != 0 {
      rate.numerator() as f64 / rate.denominator() as f64
    } else {
      0.0
    };

    let time_base = video_stream.time_base();
    let time_base = if time_base.denominator() != 0 {
      time_base.numerator() as f64 / time_base.denominator() as f64
    } else {
      0.0
    };

    // 容器没有帧数时按时长估算
    let total_frames = match video_stream.frames() {
      n if n > 0 => Some(n as u64),
      _ if input_context.duration() > 0 && fps > 0.0 => {
        let secs = input_context.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE);
        Some((secs * fps).round() as u64)
      }
      _ => None,
    };

    let scaler = ScalingContext::get(
      decoder.format(),
      width,
      height,
      Pixel::RGB24,
      width,
      height,
      Flags::BILINEAR,
    )
    .map_err(stream_err)?;

    info!(
      "打开视频 {}: {}x{} @ {:.2} fps, 帧数 {:?}",
      path.display(),
      width,
      height,
      fps,
      total_frames
    );

    Ok(Self {
      input_context,
      video_stream_index,
      decoder,
      scaler,
      frame_index: 0,
      width,
      height,
      fps,
      time_base,
      total_frames,
      eof_sent: false,
      finished: false,
    })
  }

  fn decode_next_frame(&mut self) -> Result<Decoded, InputError> {
    loop {
      // 首先尝试从解码器获取已解码的帧
      let mut decoded = Video::empty();
      if self.decoder.receive_frame(&mut decoded).is_ok() {
        return Ok(Decoded::Frame(decoded));
      }
      if self.eof_sent {
        return Ok(Decoded::End);
      }

      let mut packets = self.input_context.packets();
      loop {
        match packets.next() {
          Some((stream, packet)) => {
            if stream.index() != self.video_stream_index {
              continue;
            }
            if let Err(e) = self.decoder.send_packet(&packet) {
              return Ok(Decoded::Corrupt(e.to_string()));
            }
            break;
          }
          None => {
            self.decoder.send_eof().map_err(stream_err)?;
            self.eof_sent = true;
            break;
          }
        }
      }
    }
  }

  fn to_rgb(&mut self, decoded: &Video) -> Result<RgbImage, String> {
    let mut rgb_frame = Video::empty();
    self.scaler.run(decoded, &mut rgb_frame).map_err(|e| e.to_string())?;

    let data = rgb_frame.data(0);
    let stride = rgb_frame.stride(0);
    let width = self.width as usize;
    let height = self.height as usize;

    // 处理步长对齐的数据
    let mut image_data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
      let row_start = y * stride;
      image_data.extend_from_slice(&data[row_start..row_start + width * 3]);
    }

    RgbImage::from_raw(self.width, self.height, image_data)
      .ok_or_else(|| "无法创建 RGB 图像".to_string())
  }
}

impl Iterator for VideoSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.decode_next_frame() {
      Ok(Decoded::Frame(decoded)) => {
        self.frame_index += 1;
        let index = self.frame_index;
        let image = match self.to_rgb(&decoded) {
          Ok(image) => image,
          Err(reason) => return Some(Err(InputError::CorruptFrame { index, reason })),
        };

        let timestamp_secs = match decoded.timestamp() {
          Some(ts) if self.time_base > 0.0 => ts as f64 * self.time_base,
          _ if self.fps > 0.0 => (index - 1) as f64 / self.fps,
          _ => 0.0,
        };

        Some(Ok(Frame::new(image, index, timestamp_secs)))
      }
      Ok(Decoded::Corrupt(reason)) => {
        self.frame_index += 1;
        debug!("第 {} 帧数据包无法解码: {}", self.frame_index, reason);
        Some(Err(InputError::CorruptFrame {
          index: self.frame_index,
          reason,
        }))
      }
      Ok(Decoded::End) => {
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        Some(Err(e))
      }
    }
  }
}

impl FrameSource for VideoSource {
  fn fps(&self) -> f64 {
    self.fps
  }

  fn total_frames(&self) -> Option<u64> {
    self.total_frames
  }

  fn dimensions(&self) -> (u32, u32) {
    (self.width, self.height)
  }
}
