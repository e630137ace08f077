use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use strum_macros::{Display, EnumIter, EnumString};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{hessian, Error, ErrorKind, Result};

pub const MAGIC_NUMBER: [u8; 2] = [0xda, 0xbb];
pub const HEADER_LEN: usize = 16;
/// frames larger than the default provider payload limit are rejected.
pub const MAX_BODY_LEN: usize = 8 * 1024 * 1024;

const FLAG_REQUEST: u8 = 0x80;
const FLAG_TWO_WAY: u8 = 0x40;
const FLAG_EVENT: u8 = 0x20;
const SERIALIZATION_MASK: u8 = 0x1f;

#[derive(Debug, Clone, Display, PartialEq, EnumIter, EnumString, Primitive)]
pub enum MessageType {
    Response = 0,
    Request = 1,
}

/// the status byte of a response frame.
#[derive(Debug, Copy, Clone, Display, PartialEq, Eq, EnumIter, EnumString, Primitive)]
pub enum MessageStatus {
    Ok = 20,
    ClientTimeout = 30,
    ServerTimeout = 31,
    ChannelInactive = 35,
    BadRequest = 40,
    BadResponse = 50,
    ServiceNotFound = 60,
    ServiceError = 70,
    ServerError = 80,
    ClientError = 90,
    ServerThreadpoolExhausted = 100,
}

impl MessageStatus {
    pub fn from_code(code: u8) -> Option<MessageStatus> {
        MessageStatus::from_u8(code)
    }

    pub fn is_timeout(self) -> bool {
        self == MessageStatus::ClientTimeout || self == MessageStatus::ServerTimeout
    }
}

/// define the dubbo frame interface.
pub trait DubboMessage {
    fn check_magic_number(&self) -> bool;
    fn get_message_type(&self) -> Option<MessageType>;
    fn set_message_type(&mut self, mt: MessageType);
    fn is_two_way(&self) -> bool;
    fn set_two_way(&mut self, b: bool);
    fn is_event(&self) -> bool;
    fn set_event(&mut self, b: bool);
    fn get_serialization_id(&self) -> u8;
    fn set_serialization_id(&mut self, id: u8);
    fn get_status(&self) -> Option<MessageStatus>;
    fn get_status_code(&self) -> u8;
    fn set_status(&mut self, status: MessageStatus);
    fn get_id(&self) -> i64;
    fn set_id(&mut self, id: i64);
    fn get_body_len(&self) -> i32;
}

/// a frame of the dubbo protocol, request or response.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    header: [u8; HEADER_LEN],
    pub body: BytesMut,
}

impl Default for Message {
    fn default() -> Self {
        Message::new([0; HEADER_LEN])
    }
}

impl Message {
    /// Creates a new `Message`, stamping the magic number into the header.
    pub fn new(h: [u8; HEADER_LEN]) -> Message {
        let mut header = h;
        header[..2].copy_from_slice(&MAGIC_NUMBER);
        Message {
            header,
            body: BytesMut::new(),
        }
    }

    /// a two-way hessian request carrying an encoded invocation body.
    pub fn request(id: i64, body: BytesMut) -> Message {
        let mut msg = Message::default();
        msg.set_message_type(MessageType::Request);
        msg.set_two_way(true);
        msg.set_serialization_id(hessian::SERIALIZATION_ID);
        msg.set_id(id);
        msg.body = body;
        msg
    }

    pub fn response(id: i64, status: MessageStatus, body: BytesMut) -> Message {
        let mut msg = Message::default();
        msg.set_message_type(MessageType::Response);
        msg.set_serialization_id(hessian::SERIALIZATION_ID);
        msg.set_status(status);
        msg.set_id(id);
        msg.body = body;
        msg
    }

    pub fn heartbeat_request(id: i64) -> Message {
        let mut msg = Message::request(id, null_body());
        msg.set_event(true);
        msg
    }

    pub fn heartbeat_response(id: i64) -> Message {
        let mut msg = Message::response(id, MessageStatus::Ok, null_body());
        msg.set_event(true);
        msg
    }

    pub fn header(&self) -> &[u8; HEADER_LEN] {
        &self.header
    }

    pub fn is_request(&self) -> bool {
        self.get_message_type() == Some(MessageType::Request)
    }

    /// event frames with a null body are heartbeats.
    pub fn is_heartbeat(&self) -> bool {
        self.is_event() && (self.body.is_empty() || self.body[..] == [hessian::BC_NULL])
    }

    /// the frame bytes, header length taken from the body.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        buf.extend_from_slice(&self.header[..12]);
        let mut len = [0u8; 4];
        BigEndian::write_i32(&mut len, self.body.len() as i32);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(&self.body);
        buf
    }

    pub async fn write_to<W>(&self, w: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        w.write_all(&self.encode()).await?;
        w.flush().await?;
        Ok(())
    }

    /// reads one whole frame; a short read is a protocol failure.
    pub async fn read_from<R>(r: &mut R) -> Result<Message>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut header = [0u8; HEADER_LEN];
        r.read_exact(&mut header).await?;
        let mut msg = Message {
            header,
            body: BytesMut::new(),
        };
        if !msg.check_magic_number() {
            return Err(Error::new(
                ErrorKind::NativeProtocolFailure,
                format!("bad magic number {:#04x}{:02x}", header[0], header[1]),
            ));
        }

        let len = msg.get_body_len();
        if len < 0 || len as usize > MAX_BODY_LEN {
            return Err(Error::new(
                ErrorKind::NativeProtocolFailure,
                format!("frame body length {} out of range", len),
            ));
        }
        let mut body = vec![0u8; len as usize];
        r.read_exact(&mut body).await?;
        msg.body.put_slice(&body);
        Ok(msg)
    }
}

fn null_body() -> BytesMut {
    let mut body = BytesMut::with_capacity(1);
    body.put_u8(hessian::BC_NULL);
    body
}

impl DubboMessage for Message {
    fn check_magic_number(&self) -> bool {
        self.header[..2] == MAGIC_NUMBER
    }

    fn get_message_type(&self) -> Option<MessageType> {
        MessageType::from_u8((self.header[2] & FLAG_REQUEST) >> 7)
    }
    fn set_message_type(&mut self, mt: MessageType) {
        match mt {
            MessageType::Request => self.header[2] |= FLAG_REQUEST,
            MessageType::Response => self.header[2] &= !FLAG_REQUEST,
        }
    }
    fn is_two_way(&self) -> bool {
        self.header[2] & FLAG_TWO_WAY == FLAG_TWO_WAY
    }
    fn set_two_way(&mut self, b: bool) {
        if b {
            self.header[2] |= FLAG_TWO_WAY;
        } else {
            self.header[2] &= !FLAG_TWO_WAY;
        }
    }
    fn is_event(&self) -> bool {
        self.header[2] & FLAG_EVENT == FLAG_EVENT
    }
    fn set_event(&mut self, b: bool) {
        if b {
            self.header[2] |= FLAG_EVENT;
        } else {
            self.header[2] &= !FLAG_EVENT;
        }
    }
    fn get_serialization_id(&self) -> u8 {
        self.header[2] & SERIALIZATION_MASK
    }
    fn set_serialization_id(&mut self, id: u8) {
        self.header[2] = (self.header[2] & !SERIALIZATION_MASK) | (id & SERIALIZATION_MASK);
    }
    fn get_status(&self) -> Option<MessageStatus> {
        MessageStatus::from_u8(self.header[3])
    }
    fn get_status_code(&self) -> u8 {
        self.header[3]
    }
    fn set_status(&mut self, status: MessageStatus) {
        self.header[3] = status as u8;
    }
    fn get_id(&self) -> i64 {
        BigEndian::read_i64(&self.header[4..12])
    }
    fn set_id(&mut self, id: i64) {
        BigEndian::write_i64(&mut self.header[4..12], id);
    }
    fn get_body_len(&self) -> i32 {
        BigEndian::read_i32(&self.header[12..16])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_header() {
        let mut msg = Message::default();
        msg.set_message_type(MessageType::Request);
        msg.set_two_way(true);
        msg.set_event(false);
        msg.set_serialization_id(hessian::SERIALIZATION_ID);
        msg.set_id(1_000_000);

        assert_eq!(true, msg.check_magic_number());
        assert_eq!(MessageType::Request, msg.get_message_type().unwrap());
        assert_eq!(true, msg.is_two_way());
        assert_eq!(false, msg.is_event());
        assert_eq!(2, msg.get_serialization_id());
        assert_eq!(1_000_000, msg.get_id());
        assert_eq!(0xc2, msg.header()[2]);

        msg.set_message_type(MessageType::Response);
        msg.set_status(MessageStatus::ServiceNotFound);
        assert_eq!(MessageType::Response, msg.get_message_type().unwrap());
        assert_eq!(Some(MessageStatus::ServiceNotFound), msg.get_status());
        assert_eq!(60, msg.get_status_code());
    }

    #[test]
    fn encode_header() {
        let mut body = BytesMut::new();
        body.put_slice(b"abc");
        let data = Message::request(7, body).encode();
        assert_eq!(
            vec![0xda, 0xbb, 0xc2, 0, 0, 0, 0, 0, 0, 0, 0, 7, 0, 0, 0, 3, b'a', b'b', b'c'],
            data
        );
    }

    #[test]
    fn heartbeat_frames() {
        let ping = Message::heartbeat_request(9);
        assert_eq!(0xe2, ping.header()[2]);
        assert!(ping.is_heartbeat());
        assert!(ping.is_request());

        let pong = Message::heartbeat_response(9);
        assert_eq!(0x22, pong.header()[2]);
        assert_eq!(Some(MessageStatus::Ok), pong.get_status());
        assert!(pong.is_heartbeat());
        assert!(!pong.is_request());
    }

    #[tokio::test]
    async fn parse() {
        let mut data = Message::response(42, MessageStatus::Ok, BytesMut::from(&b"\x91"[..])).encode();
        // trailing bytes belong to the next frame
        data.extend_from_slice(&[0xda, 0xbb]);
        let mut r = &data[..];
        let msg = Message::read_from(&mut r).await.unwrap();
        assert_eq!(42, msg.get_id());
        assert_eq!(1, msg.get_body_len());
        assert_eq!(&[0x91][..], &msg.body[..]);
        assert_eq!(2, r.len());
    }

    #[tokio::test]
    async fn parse_rejects_bad_frames() {
        let mut bad_magic = Message::heartbeat_response(1).encode();
        bad_magic[0] = 0xca;
        let err = Message::read_from(&mut &bad_magic[..]).await.unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());

        let truncated = Message::heartbeat_response(1).encode();
        let err = Message::read_from(&mut &truncated[..10]).await.unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());

        let mut huge = Message::heartbeat_response(1).encode();
        BigEndian::write_i32(&mut huge[12..16], i32::MAX);
        let err = Message::read_from(&mut &huge[..]).await.unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());
    }
}
