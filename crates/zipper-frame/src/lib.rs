#![doc = r#"
# zipper-frame

## 设计动机（Why）
- zipper 的调度流水线只关心帧的三个属性：类型标签、事务 ID 与载荷（carriage）。本 crate
  将这三者固化为强类型模型，并提供一套自描述的二进制编码，让流水线与测试可以脱离具体
  传输独立运行。

## 核心契约（What）
- [`Frame`]：帧的和类型，覆盖数据帧与握手、心跳、拒绝等控制帧；
- [`DataFrame`]：唯一会被流水线转发的帧类型；
- [`read_frame`]：从任意 `AsyncRead` 中读取恰好一帧；
- [`FrameError`]：区分干净 EOF、截断、超限、未知标签与非法载荷。

## 线格式（How）
- `tag: u8 | body_len: u32 BE | body`；
- 字符串字段为 `len: u16 BE | utf8`，超出 `u16::MAX` 的字符串会在字符边界截断；
- 数据帧 body：`transaction_id | carriage_tag: u8 | carriage`（剩余全部字节）。
"#]

mod codec;
mod error;
mod frame;
mod tag;

pub use codec::{DEFAULT_MAX_FRAME_SIZE, HEADER_LEN, read_frame};
pub use error::FrameError;
pub use frame::{ClientType, DataFrame, Frame, HandshakeFrame, TransactionId};
pub use tag::FrameTag;
