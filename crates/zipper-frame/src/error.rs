//! # error 模块说明
//!
//! 帧解码失败的全部路径。流水线把任何 [`FrameError`] 都视为所在读循环的终点，
//! 因此这里只负责把原因分清楚，方便日志区分“对端正常关闭”与“数据损坏”。

use std::io;

use thiserror::Error;

use crate::FrameTag;

/// 帧编解码错误。
///
/// - [`FrameError::Eof`] 表示在帧边界处读到流结束，是唯一属于“正常结束”的变体；
/// - 其余变体均意味着流内容不可信，调用方应终止当前读循环而不是重试。
#[derive(Debug, Error)]
pub enum FrameError {
    /// 在读取第一个字节前流已结束。
    #[error("stream ended at a frame boundary")]
    Eof,

    /// 帧头或帧体读取到一半时流结束。
    #[error("stream ended inside a frame")]
    Truncated,

    /// 首字节不是已知的帧标签。
    #[error("unknown frame tag 0x{0:02X}")]
    UnknownTag(u8),

    /// 帧体长度超过读取方允许的上限。
    #[error("frame body of {len} bytes exceeds the {max} byte limit")]
    Oversized { len: usize, max: usize },

    /// 帧体结构不符合该标签的布局。
    #[error("malformed {tag} frame: {reason}")]
    Malformed { tag: FrameTag, reason: &'static str },

    /// 字符串字段不是合法 UTF-8。
    #[error("{tag} frame carries a non utf-8 string field")]
    InvalidUtf8 { tag: FrameTag },

    /// 底层 IO 失败。
    #[error("frame io failed: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// 是否为帧边界上的干净 EOF。
    pub fn is_eof(&self) -> bool {
        matches!(self, FrameError::Eof)
    }
}
