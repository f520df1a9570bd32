//! 流水线调优参数。
//!
//! 配置以 TOML 表达，全部字段均有默认值；缺省字段沿用默认，未知字段直接拒绝，避免拼写错误
//! 被悄悄忽略。

use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use zipper_frame::DEFAULT_MAX_FRAME_SIZE;

use crate::error::ConfigError;

/// 每一跳通道的默认容量。
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;
/// 会话目录每个阶段队列的默认容量。
pub const DEFAULT_DIRECTORY_QUEUE_CAPACITY: usize = 5;
/// 上游结束后回包路径的默认保持时长（毫秒）。
pub const DEFAULT_REPLY_LINGER_MS: u64 = 2_000;

/// zipper 流水线配置。
///
/// # 教案式说明
/// - **意图（Why）**：有界通道是流水线唯一的背压手段，容量直接决定慢消费者多快反压到上游，
///   因此需要可调；
/// - **契约（What）**：
///   - `channel_capacity`：每一跳通道容量，必须大于 0；
///   - `directory_queue_capacity`：每个阶段新会话队列容量，必须大于 0；
///   - `max_frame_size`：单帧帧体上限，必须大于 0；
///   - `reply_linger_ms`：上游通道关闭且在途发送全部结束后，回包路径继续保持的时长；
///     超时后该阶段输出通道关闭。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ZipperConfig {
    pub channel_capacity: usize,
    pub directory_queue_capacity: usize,
    pub max_frame_size: usize,
    pub reply_linger_ms: u64,
}

impl Default for ZipperConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            directory_queue_capacity: DEFAULT_DIRECTORY_QUEUE_CAPACITY,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            reply_linger_ms: DEFAULT_REPLY_LINGER_MS,
        }
    }
}

impl ZipperConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ZipperConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载并校验。
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.channel_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "channel_capacity",
                reason: "must be greater than zero",
            });
        }
        if self.directory_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "directory_queue_capacity",
                reason: "must be greater than zero",
            });
        }
        if self.max_frame_size == 0 {
            return Err(ConfigError::Invalid {
                field: "max_frame_size",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }

    pub fn reply_linger(&self) -> Duration {
        Duration::from_millis(self.reply_linger_ms)
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_directory_queue_capacity(mut self, capacity: usize) -> Self {
        self.directory_queue_capacity = capacity;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_reply_linger(mut self, linger: Duration) -> Self {
        self.reply_linger_ms = linger.as_millis() as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ZipperConfig::default();
        assert_eq!(config.channel_capacity, 100);
        assert_eq!(config.directory_queue_capacity, 5);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.reply_linger(), Duration::from_secs(2));
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config = ZipperConfig::from_toml_str("channel_capacity = 8\nreply_linger_ms = 50\n")
            .expect("parse config");
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.reply_linger_ms, 50);
        assert_eq!(config.directory_queue_capacity, 5);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let err = ZipperConfig::from_toml_str("buffer_size = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = ZipperConfig::from_toml_str("channel_capacity = 0").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "channel_capacity",
                ..
            }
        ));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ZipperConfig::load("/definitely/not/here/zipper.toml").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here/zipper.toml"));
    }
}
