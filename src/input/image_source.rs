// 该文件是 Anjian （安检） 项目的一部分。
// src/input/image_source.rs - 图片读取与解码
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

use std::io::Cursor;
use std::path::Path;

use image::{ImageReader, RgbImage};
use tracing::debug;

use super::InputError;

/// 读取并解码图片文件，统一转换为 RGB
pub fn load_image(path: &Path) -> Result<RgbImage, InputError> {
  if !path.is_file() {
    return Err(InputError::NotFound(path.to_path_buf()));
  }

  let image = ImageReader::open(path)
    .map_err(|source| InputError::Io {
      path: path.to_path_buf(),
      source,
    })?
    .with_guessed_format()
    .map_err(|source| InputError::Io {
      path: path.to_path_buf(),
      source,
    })?
    .decode()?
    .to_rgb8();

  debug!(
    "读取图片 {} ({}x{})",
    path.display(),
    image.width(),
    image.height()
  );
  check_dimensions(image)
}

/// 解码内存中的图片数据（例如上传的文件）
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, InputError> {
  let image = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()
    .map_err(|source| InputError::Io {
      path: "<memory>".into(),
      source,
    })?
    .decode()?
    .to_rgb8();
  check_dimensions(image)
}

fn check_dimensions(image: RgbImage) -> Result<RgbImage, InputError> {
  if image.width() == 0 || image.height() == 0 {
    Err(InputError::EmptyImage)
  } else {
    Ok(image)
  }
}
