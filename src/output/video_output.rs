// 该文件是 Anjian （安检） 项目的一部分。
// src/output/video_output.rs - FFmpeg 视频输出
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
use ffmpeg_next::format::{Pixel, output};
use ffmpeg_next::software::scaling::{context::Context as ScalingContext, flag::Flags};
use ffmpeg_next::util::frame::video::Video;
use ffmpeg_next::{Rational, codec};
use image::RgbImage;
use tracing::{error, info};

use super::{FrameSink, OutputError};

fn encoding_err(e: ffmpeg::Error) -> OutputError {
  OutputError::Encoding(e.to_string())
}

/// 视频输出，H.264 不可用时退回 MPEG-4
pub struct VideoOutput {
  output_context: ffmpeg::format::context::Output,
  encoder: ffmpeg::encoder::Video,
  /// RGB -> YUV
  scaler: ScalingContext,
  width: u32,
  height: u32,
  frame_rate: Rational,
  frame_index: i64,
  stream_index: usize,
  time_base: Rational,
  finished: bool,
}

impl VideoOutput {
  pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self, OutputError> {
    ffmpeg::init().map_err(encoding_err)?;

    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|source| OutputError::Io {
        path: parent.to_path_buf(),
        source,
      })?;
    }

    let mut output_context = output(&path).map_err(|e| {
      OutputError::Encoding(format!("无法创建输出文件 {}: {}", path.display(), e))
    })?;

    let codec = ffmpeg::encoder::find(codec::Id::H264)
      .or_else(|| ffmpeg::encoder::find(codec::Id::MPEG4))
      .ok_or_else(|| OutputError::Encoding("找不到视频编码器".to_string()))?;

    let mut stream = output_context.add_stream(codec).map_err(encoding_err)?;
    let stream_index = stream.index();

    // YUV420P 要求偶数尺寸
    let enc_width = (width - width % 2).max(2);
    let enc_height = (height - height % 2).max(2);

    let fps = if fps.is_finite() && fps > 0.0 { fps } else { 1.0 };
    let frame_rate = Rational::new(((fps * 1000.0).round() as i32).max(1), 1000);

    let context_encoder = ffmpeg::codec::context::Context::new_with_codec(codec);
    let mut encoder = context_encoder.encoder().video().map_err(encoding_err)?;
    encoder.set_width(enc_width);
    encoder.set_height(enc_height);
    encoder.set_format(Pixel::YUV420P);
    encoder.set_frame_rate(Some(frame_rate));
    encoder.set_time_base(frame_rate.invert());

    let encoder = encoder.open().map_err(encoding_err)?;
    stream.set_parameters(&encoder);

    output_context.write_header().map_err(encoding_err)?;
    let time_base = output_context
      .stream(stream_index)
      .map(|s| s.time_base())
      .unwrap_or_else(|| frame_rate.invert());

    let scaler = ScalingContext::get(
      Pixel::RGB24,
      width,
      height,
      Pixel::YUV420P,
      enc_width,
      enc_height,
      Flags::BILINEAR,
    )
    .map_err(encoding_err)?;

    info!(
      "创建视频输出 {} ({}x{} @ {:.3} fps, {:?})",
      path.display(),
      enc_width,
      enc_height,
      fps,
      codec.id()
    );

    Ok(Self {
      output_context,
      encoder,
      scaler,
      width,
      height,
      frame_rate,
      frame_index: 0,
      stream_index,
      time_base,
      finished: false,
    })
  }

  /// 编码并写入帧，`None` 表示刷新编码器
  fn encode_frame(&mut self, frame: Option<&Video>) -> Result<(), OutputError> {
    match frame {
      Some(f) => self.encoder.send_frame(f).map_err(encoding_err)?,
      None => self.encoder.send_eof().map_err(encoding_err)?,
    }

    let mut packet = ffmpeg::Packet::empty();
    while self.encoder.receive_packet(&mut packet).is_ok() {
      packet.set_stream(self.stream_index);
      packet.rescale_ts(self.frame_rate.invert(), self.time_base);
      packet
        .write_interleaved(&mut self.output_context)
        .map_err(encoding_err)?;
    }

    Ok(())
  }
}

impl FrameSink for VideoOutput {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    if image.dimensions() != (self.width, self.height) {
      return Err(OutputError::FrameSize {
        expected: (self.width, self.height),
        actual: image.dimensions(),
      });
    }

    let mut rgb_frame = Video::new(Pixel::RGB24, self.width, self.height);
    let data = image.as_raw();
    let stride = rgb_frame.stride(0);
    let row = self.width as usize * 3;

    // 复制数据，处理步长对齐
    let frame_data = rgb_frame.data_mut(0);
    for y in 0..self.height as usize {
      frame_data[y * stride..y * stride + row].copy_from_slice(&data[y * row..(y + 1) * row]);
    }

    let mut yuv_frame = Video::empty();
    self
      .scaler
      .run(&rgb_frame, &mut yuv_frame)
      .map_err(encoding_err)?;

    yuv_frame.set_pts(Some(self.frame_index));
    self.frame_index += 1;

    self.encode_frame(Some(&yuv_frame))
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;
    self.encode_frame(None)?;
    self.output_context.write_trailer().map_err(encoding_err)?;
    info!("视频编码完成, 共 {} 帧", self.frame_index);
    Ok(())
  }
}

impl Drop for VideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.finish() {
      error!("写入视频文件尾失败: {}", e);
    }
  }
}
