use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::{Frame, FrameError, FrameTag};

/// 帧头长度：1 字节标签 + 4 字节大端帧体长度。
pub const HEADER_LEN: usize = 5;

/// 默认帧体上限（16 MiB）。
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// 从流中读取恰好一帧。
///
/// # 教案式说明
/// - **意图（Why）**：源端读循环与回包读取单元都以“一次读一帧”为粒度推进，读取失败即
///   终止，因此这里必须把“帧边界上的干净 EOF”与“帧内截断”区分开；
/// - **契约（What）**：
///   - 读到首字节前流结束 → [`FrameError::Eof`]；
///   - 帧头或帧体读到一半结束 → [`FrameError::Truncated`]；
///   - 帧体长度超过 `max_frame_size` → [`FrameError::Oversized`]，此时不会读取帧体；
/// - **取消语义**：函数本身不感知取消，调用方通过 `tokio::select!` 丢弃该 Future 即可，
///   被丢弃时已读取的部分字节随之作废。
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    if reader.read(&mut header[..1]).await? == 0 {
        return Err(FrameError::Eof);
    }
    reader
        .read_exact(&mut header[1..])
        .await
        .map_err(map_truncation)?;

    let tag = FrameTag::try_from(header[0])?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > max_frame_size {
        return Err(FrameError::Oversized {
            len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(map_truncation)?;
    Frame::decode_body(tag, Bytes::from(body))
}

pub(crate) fn encode_frame(tag: FrameTag, write_body: impl FnOnce(&mut BytesMut)) -> Bytes {
    let mut body = BytesMut::new();
    write_body(&mut body);
    debug_assert!(body.len() <= u32::MAX as usize, "frame body exceeds u32 length");

    let mut out = BytesMut::with_capacity(HEADER_LEN + body.len());
    out.put_u8(tag.as_u8());
    out.put_u32(body.len() as u32);
    out.extend_from_slice(&body);
    out.freeze()
}

/// 线格式中字符串字段的最大字节数（`u16` 长度前缀）。
pub const MAX_STR_LEN: usize = u16::MAX as usize;

/// 在不超过 `max` 字节的最近字符边界处截取前缀。
pub(crate) fn clamp_str(value: &str, max: usize) -> &str {
    let mut end = value.len().min(max);
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

/// 写入 `u16` 长度前缀的字符串，超长部分在字符边界截断。
pub(crate) fn put_str(buf: &mut BytesMut, value: &str) {
    let value = clamp_str(value, MAX_STR_LEN);
    buf.put_u16(value.len() as u16);
    buf.extend_from_slice(value.as_bytes());
}

pub(crate) fn get_str(buf: &mut Bytes, tag: FrameTag) -> Result<String, FrameError> {
    if buf.remaining() < 2 {
        return Err(FrameError::Malformed {
            tag,
            reason: "missing string length",
        });
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(FrameError::Malformed {
            tag,
            reason: "string length exceeds frame body",
        });
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::InvalidUtf8 { tag })
}

pub(crate) fn get_u8(
    buf: &mut Bytes,
    tag: FrameTag,
    reason: &'static str,
) -> Result<u8, FrameError> {
    if buf.has_remaining() {
        Ok(buf.get_u8())
    } else {
        Err(FrameError::Malformed { tag, reason })
    }
}

fn map_truncation(err: io::Error) -> FrameError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FrameError::Truncated
    } else {
        FrameError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DataFrame, TransactionId};

    #[tokio::test(flavor = "multi_thread")]
    async fn reads_consecutive_frames_then_eof() {
        let first = DataFrame::new(TransactionId::from("a"), 0x10, &b"one"[..]);
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&first.encode());
        wire.extend_from_slice(&Frame::Ping.encode());
        let mut reader = &wire[..];

        let frame = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(frame, Frame::Data(first));
        let frame = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(frame, Frame::Ping);
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(err.is_eof());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cut_inside_body_is_truncated() {
        let encoded = DataFrame::new("a".into(), 0x10, &b"payload"[..]).encode();
        let mut reader = &encoded[..encoded.len() - 2];
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cut_inside_header_is_truncated() {
        let mut reader = &[0x3Fu8, 0, 0][..];
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Truncated));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_body_is_rejected_before_reading() {
        let encoded = DataFrame::new("a".into(), 0x10, vec![7u8; 64]).encode();
        let mut reader = &encoded[..];
        let err = read_frame(&mut reader, 16).await.unwrap_err();
        assert!(matches!(err, FrameError::Oversized { max: 16, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unknown_tag_is_rejected() {
        let mut reader = &[0x01u8, 0, 0, 0, 0][..];
        let err = read_frame(&mut reader, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::UnknownTag(0x01)));
    }

    #[test]
    fn long_strings_are_cut_on_char_boundary() {
        let value = "é".repeat(40_000);
        let mut buf = BytesMut::new();
        put_str(&mut buf, &value);
        let mut bytes = buf.freeze();
        let decoded = get_str(&mut bytes, FrameTag::Rejected).unwrap();
        assert!(decoded.len() <= u16::MAX as usize);
        assert!(decoded.chars().all(|c| c == 'é'));
    }
}
