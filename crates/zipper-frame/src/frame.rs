use core::fmt;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    FrameError, FrameTag,
    codec::{MAX_STR_LEN, clamp_str, get_str, get_u8, put_str},
};

/// 事务 ID：仅用于日志与追踪关联，流水线从不依赖它做排序或去重。
///
/// 线格式以 `u16` 记录长度，因此 ID 最长 [`TransactionId::MAX_LEN`] 字节；构造时即在
/// 字符边界截断超长部分，保证编码后再解码得到相同的 ID。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransactionId(Arc<str>);

impl TransactionId {
    pub const MAX_LEN: usize = MAX_STR_LEN;

    pub fn new(value: impl Into<Arc<str>>) -> Self {
        let value = value.into();
        if value.len() <= Self::MAX_LEN {
            return Self(value);
        }
        Self(Arc::from(clamp_str(&value, Self::MAX_LEN)))
    }

    /// 生成进程内唯一的事务 ID。
    ///
    /// 由进程启动时刻的纳秒时间戳与单调计数器拼接而成；只保证单进程内不重复，
    /// 跨进程唯一性交由上游生产者负责。
    pub fn generate() -> Self {
        static SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        Self(format!("{nanos:016x}-{seq:08x}").into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TransactionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// 数据帧：流水线中唯一被转发的帧。
///
/// # 教案式说明
/// - **意图（Why）**：把事务 ID、载荷标签与载荷字节绑定为一个不可变单元，使其可以在
///   通道之间整体移交所有权；
/// - **契约（What）**：构造后不可修改；`carriage` 使用 [`Bytes`]，克隆只增加引用计数；
/// - **线格式（How）**：`transaction_id | carriage_tag: u8 | carriage`。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataFrame {
    transaction_id: TransactionId,
    carriage_tag: u8,
    carriage: Bytes,
}

impl DataFrame {
    pub fn new(transaction_id: TransactionId, carriage_tag: u8, carriage: impl Into<Bytes>) -> Self {
        Self {
            transaction_id,
            carriage_tag,
            carriage: carriage.into(),
        }
    }

    /// 以新生成的事务 ID 构造数据帧，常用于源端与测试。
    pub fn with_generated_id(carriage_tag: u8, carriage: impl Into<Bytes>) -> Self {
        Self::new(TransactionId::generate(), carriage_tag, carriage)
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// 载荷所面向的应用层标签（例如 stream function 订阅的 `0x10`）。
    pub fn carriage_tag(&self) -> u8 {
        self.carriage_tag
    }

    pub fn carriage(&self) -> &Bytes {
        &self.carriage
    }

    pub fn into_parts(self) -> (TransactionId, u8, Bytes) {
        (self.transaction_id, self.carriage_tag, self.carriage)
    }

    /// 编码为完整帧（含帧头）。
    pub fn encode(&self) -> Bytes {
        crate::codec::encode_frame(FrameTag::Data, |body| self.encode_body(body))
    }

    pub(crate) fn encode_body(&self, body: &mut BytesMut) {
        put_str(body, self.transaction_id.as_str());
        body.put_u8(self.carriage_tag);
        body.extend_from_slice(&self.carriage);
    }

    pub(crate) fn decode_body(mut body: Bytes) -> Result<Self, FrameError> {
        let transaction_id = get_str(&mut body, FrameTag::Data)?;
        let carriage_tag = get_u8(&mut body, FrameTag::Data, "missing carriage tag")?;
        let carriage = body.copy_to_bytes(body.remaining());
        Ok(Self {
            transaction_id: TransactionId::new(transaction_id),
            carriage_tag,
            carriage,
        })
    }
}

/// 握手帧中声明的客户端角色。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientType {
    StreamFunction = 0x5D,
    UpstreamZipper = 0x5E,
    Source = 0x5F,
}

impl ClientType {
    fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x5D => Some(ClientType::StreamFunction),
            0x5E => Some(ClientType::UpstreamZipper),
            0x5F => Some(ClientType::Source),
            _ => None,
        }
    }
}

/// 握手帧：携带接入方名称与角色。流水线本身不处理握手，仅保证可以被识别并丢弃。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeFrame {
    name: String,
    client_type: ClientType,
}

impl HandshakeFrame {
    pub fn new(name: impl Into<String>, client_type: ClientType) -> Self {
        Self {
            name: name.into(),
            client_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_type(&self) -> ClientType {
        self.client_type
    }

    fn encode_body(&self, body: &mut BytesMut) {
        put_str(body, &self.name);
        body.put_u8(self.client_type as u8);
    }

    fn decode_body(mut body: Bytes) -> Result<Self, FrameError> {
        let name = get_str(&mut body, FrameTag::Handshake)?;
        let raw = get_u8(&mut body, FrameTag::Handshake, "missing client type")?;
        let client_type = ClientType::from_u8(raw).ok_or(FrameError::Malformed {
            tag: FrameTag::Handshake,
            reason: "unknown client type",
        })?;
        expect_empty(&body, FrameTag::Handshake)?;
        Ok(Self { name, client_type })
    }
}

/// 帧的和类型。
///
/// 每个变体与一个 [`FrameTag`] 一一对应；只有 [`Frame::Data`] 会进入调度流水线，
/// 其余控制帧在读取端被识别后丢弃。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Data(DataFrame),
    Handshake(HandshakeFrame),
    Ping,
    Pong,
    Accepted,
    Rejected(String),
    GoAway(String),
}

impl Frame {
    pub fn tag(&self) -> FrameTag {
        match self {
            Frame::Data(_) => FrameTag::Data,
            Frame::Handshake(_) => FrameTag::Handshake,
            Frame::Ping => FrameTag::Ping,
            Frame::Pong => FrameTag::Pong,
            Frame::Accepted => FrameTag::Accepted,
            Frame::Rejected(_) => FrameTag::Rejected,
            Frame::GoAway(_) => FrameTag::GoAway,
        }
    }

    pub fn is_data(&self) -> bool {
        self.tag().is_data()
    }

    /// 若为数据帧则取出，否则原样归还。
    pub fn into_data(self) -> Result<DataFrame, Frame> {
        match self {
            Frame::Data(data) => Ok(data),
            other => Err(other),
        }
    }

    /// 编码为完整帧（含帧头）。
    pub fn encode(&self) -> Bytes {
        crate::codec::encode_frame(self.tag(), |body| match self {
            Frame::Data(data) => data.encode_body(body),
            Frame::Handshake(handshake) => handshake.encode_body(body),
            Frame::Ping | Frame::Pong | Frame::Accepted => {}
            Frame::Rejected(message) | Frame::GoAway(message) => put_str(body, message),
        })
    }

    /// 从一段恰好包含一帧的字节中解码。
    ///
    /// 与 [`read_frame`](crate::read_frame) 不同，这里没有长度上限：调用方已经持有
    /// 全部字节。帧后多余的字节视为 [`FrameError::Malformed`]。
    pub fn decode(mut src: Bytes) -> Result<Self, FrameError> {
        if src.is_empty() {
            return Err(FrameError::Eof);
        }
        if src.len() < crate::HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        let tag = FrameTag::try_from(src.get_u8())?;
        let len = src.get_u32() as usize;
        if src.len() < len {
            return Err(FrameError::Truncated);
        }
        if src.len() > len {
            return Err(FrameError::Malformed {
                tag,
                reason: "trailing bytes after frame body",
            });
        }
        Self::decode_body(tag, src)
    }

    pub(crate) fn decode_body(tag: FrameTag, mut body: Bytes) -> Result<Self, FrameError> {
        match tag {
            FrameTag::Data => DataFrame::decode_body(body).map(Frame::Data),
            FrameTag::Handshake => HandshakeFrame::decode_body(body).map(Frame::Handshake),
            FrameTag::Ping => expect_empty(&body, tag).map(|_| Frame::Ping),
            FrameTag::Pong => expect_empty(&body, tag).map(|_| Frame::Pong),
            FrameTag::Accepted => expect_empty(&body, tag).map(|_| Frame::Accepted),
            FrameTag::Rejected => {
                let message = get_str(&mut body, tag)?;
                expect_empty(&body, tag)?;
                Ok(Frame::Rejected(message))
            }
            FrameTag::GoAway => {
                let message = get_str(&mut body, tag)?;
                expect_empty(&body, tag)?;
                Ok(Frame::GoAway(message))
            }
        }
    }
}

impl From<DataFrame> for Frame {
    fn from(value: DataFrame) -> Self {
        Frame::Data(value)
    }
}

fn expect_empty(body: &Bytes, tag: FrameTag) -> Result<(), FrameError> {
    if body.is_empty() {
        Ok(())
    } else {
        Err(FrameError::Malformed {
            tag,
            reason: "unexpected bytes in frame body",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_frame_layout_matches_wire_format() {
        let frame = DataFrame::new(TransactionId::from("t1"), 0x10, &b"hi"[..]);
        let encoded = frame.encode();
        assert_eq!(
            encoded.as_ref(),
            &[0x3F, 0, 0, 0, 7, 0, 2, b't', b'1', 0x10, b'h', b'i'][..]
        );
    }

    #[test]
    fn control_frames_decode_back() {
        for frame in [
            Frame::Ping,
            Frame::Pong,
            Frame::Accepted,
            Frame::Rejected("no such stage".into()),
            Frame::GoAway("bye".into()),
            Frame::Handshake(HandshakeFrame::new("sfn-1", ClientType::StreamFunction)),
        ] {
            let decoded = Frame::decode(frame.encode()).expect("decode control frame");
            assert_eq!(decoded, frame);
            assert!(!decoded.is_data());
        }
    }

    #[test]
    fn empty_carriage_is_allowed() {
        let frame = Frame::Data(DataFrame::new("t".into(), 0x11, Bytes::new()));
        let decoded = Frame::decode(frame.encode()).unwrap();
        let data = decoded.into_data().unwrap();
        assert!(data.carriage().is_empty());
        assert_eq!(data.carriage_tag(), 0x11);
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut raw = BytesMut::from(Frame::Ping.encode().as_ref());
        raw.put_u8(0xFF);
        assert!(matches!(
            Frame::decode(raw.freeze()),
            Err(FrameError::Malformed { .. })
        ));
    }

    #[test]
    fn ping_with_body_is_malformed() {
        let raw = Bytes::from_static(&[0x3C, 0, 0, 0, 1, 0]);
        assert!(matches!(
            Frame::decode(raw),
            Err(FrameError::Malformed {
                tag: FrameTag::Ping,
                ..
            })
        ));
    }

    #[test]
    fn data_frame_without_carriage_tag_is_malformed() {
        let raw = Bytes::from_static(&[0x3F, 0, 0, 0, 3, 0, 1, b'x']);
        assert!(matches!(
            Frame::decode(raw),
            Err(FrameError::Malformed {
                reason: "missing carriage tag",
                ..
            })
        ));
    }

    #[test]
    fn handshake_with_unknown_client_type_is_malformed() {
        let raw = Bytes::from_static(&[0x31, 0, 0, 0, 4, 0, 1, b'a', 0x01]);
        assert!(matches!(Frame::decode(raw), Err(FrameError::Malformed { .. })));
    }

    #[test]
    fn generated_transaction_ids_differ() {
        let first = TransactionId::generate();
        let second = TransactionId::generate();
        assert_ne!(first, second);
    }

    #[test]
    fn oversized_transaction_id_is_cut_at_construction_and_survives_the_wire() {
        let long = "é".repeat(TransactionId::MAX_LEN);
        let id = TransactionId::new(long);
        assert!(id.as_str().len() <= TransactionId::MAX_LEN);
        assert!(id.as_str().chars().all(|c| c == 'é'));

        let frame = DataFrame::new(id.clone(), 0x10, &b"x"[..]);
        let decoded = Frame::decode(frame.encode()).unwrap().into_data().unwrap();
        assert_eq!(decoded.transaction_id(), &id);
    }
}
