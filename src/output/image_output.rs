// 该文件是 Anjian （安检） 项目的一部分。
// src/output/image_output.rs - 图片输出
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
use tracing::info;

use super::{FrameSink, OutputError};

fn create_dir(path: &Path) -> Result<(), OutputError> {
  std::fs::create_dir_all(path).map_err(|source| OutputError::Io {
    path: path.to_path_buf(),
    source,
  })
}

/// 保存标注后的图片，必要时创建上级目录
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), OutputError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    create_dir(parent)?;
  }
  image.save(path)?;
  info!("图片已保存: {}", path.display());
  Ok(())
}

/// 把每一帧保存为目录中的 PNG 序列
pub struct FrameDirectory {
  directory: PathBuf,
  size: Option<(u32, u32)>,
  count: u64,
}

impl FrameDirectory {
  pub fn create(directory: &Path) -> Result<Self, OutputError> {
    create_dir(directory)?;
    Ok(Self {
      directory: directory.to_path_buf(),
      size: None,
      count: 0,
    })
  }

  pub fn frame_path(&self, index: u64) -> PathBuf {
    self.directory.join(format!("frame_{:06}.png", index))
  }
}

impl FrameSink for FrameDirectory {
  fn write_frame(&mut self, image: &RgbImage) -> Result<(), OutputError> {
    let actual = image.dimensions();
    match self.size {
      Some(expected) if expected != actual => {
        return Err(OutputError::FrameSize { expected, actual });
      }
      None => self.size = Some(actual),
      _ => {}
    }
    image.save(self.frame_path(self.count))?;
    self.count += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), OutputError> {
    if self.count > 0 {
      info!("已保存 {} 帧到 {}", self.count, self.directory.display());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use tempfile::TempDir;

  use super::*;

  #[test]
  fn save_image_creates_parent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/out/annotated.png");
    save_image(&RgbImage::new(4, 4), &path).unwrap();
    assert!(path.is_file());
  }

  #[test]
  fn frame_directory_rejects_size_change() {
    let dir = TempDir::new().unwrap();
    let mut frames = FrameDirectory::create(&dir.path().join("frames")).unwrap();
    frames.write_frame(&RgbImage::new(4, 4)).unwrap();
    assert!(frames.frame_path(0).is_file());
    assert!(matches!(
      frames.write_frame(&RgbImage::new(8, 4)),
      Err(OutputError::FrameSize { .. })
    ));
  }
}
