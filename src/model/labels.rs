// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/labels.rs - 类别标签
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

use std::{path::Path, sync::Arc};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("读取标签文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("标签列表为空")]
  Empty,
}

/// 有序的类别名称列表，下标即类别编号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels {
  names: Box<[Arc<str>]>,
}

impl Labels {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let labels = Self::parse(&content)?;
    debug!("标签数量: {}", labels.len());
    Ok(labels)
  }

  /// 每行一个标签，去除首尾空白，忽略空行
  pub fn parse(content: &str) -> Result<Self, LabelError> {
    let names = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty())
      .map(Arc::from)
      .collect::<Vec<Arc<str>>>();

    if names.is_empty() {
      return Err(LabelError::Empty);
    }

    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  /// 越界的类别编号落到最后一个标签上
  pub fn get(&self, class_id: usize) -> Arc<str> {
    let index = class_id.min(self.names.len().saturating_sub(1));
    Arc::clone(&self.names[index])
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(|name| name.as_ref())
  }
}

impl<S: AsRef<str>> FromIterator<S> for Labels {
  fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
    Self {
      names: iter
        .into_iter()
        .map(|name| Arc::from(name.as_ref()))
        .collect(),
    }
  }
}
