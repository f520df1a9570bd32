use core::fmt;

use crate::FrameError;

/// 帧类型标签，占据线格式的首字节。
///
/// 取值与上游生产者、stream function SDK 约定一致；新增类型时必须同步更新
/// [`TryFrom<u8>`] 的映射，否则解码端会以 [`FrameError::UnknownTag`] 拒绝。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameTag {
    GoAway = 0x30,
    Handshake = 0x31,
    Rejected = 0x39,
    Ping = 0x3C,
    Pong = 0x3D,
    Accepted = 0x3E,
    Data = 0x3F,
}

impl FrameTag {
    /// 标签的字节值。
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// 是否为数据帧标签；流水线只转发数据帧。
    pub const fn is_data(self) -> bool {
        matches!(self, FrameTag::Data)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            FrameTag::GoAway => "goaway",
            FrameTag::Handshake => "handshake",
            FrameTag::Rejected => "rejected",
            FrameTag::Ping => "ping",
            FrameTag::Pong => "pong",
            FrameTag::Accepted => "accepted",
            FrameTag::Data => "data",
        }
    }
}

impl TryFrom<u8> for FrameTag {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x30 => Ok(FrameTag::GoAway),
            0x31 => Ok(FrameTag::Handshake),
            0x39 => Ok(FrameTag::Rejected),
            0x3C => Ok(FrameTag::Ping),
            0x3D => Ok(FrameTag::Pong),
            0x3E => Ok(FrameTag::Accepted),
            0x3F => Ok(FrameTag::Data),
            other => Err(FrameError::UnknownTag(other)),
        }
    }
}

impl fmt::Display for FrameTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(0x{:02X})", self.as_str(), self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tag_maps_back_from_its_byte() {
        let all = [
            FrameTag::GoAway,
            FrameTag::Handshake,
            FrameTag::Rejected,
            FrameTag::Ping,
            FrameTag::Pong,
            FrameTag::Accepted,
            FrameTag::Data,
        ];
        for tag in all {
            assert_eq!(FrameTag::try_from(tag.as_u8()).unwrap(), tag);
        }
        assert!(FrameTag::Data.is_data());
        assert!(!FrameTag::Ping.is_data());
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(matches!(
            FrameTag::try_from(0x00),
            Err(FrameError::UnknownTag(0x00))
        ));
    }

    #[test]
    fn display_includes_hex_value() {
        assert_eq!(FrameTag::Data.to_string(), "data(0x3F)");
    }
}
