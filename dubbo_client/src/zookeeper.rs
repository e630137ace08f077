//! A read-only ZooKeeper session, just enough of the jute protocol to list
//! the children of a znode.

use std::{fmt, io::Cursor, time::Duration};

use async_trait::async_trait;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_traits::{FromPrimitive, ToPrimitive};
use strum_macros::Display;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::{discovery::not_found, Discovery, Provider};
use dubbo_protocol::{Error, ErrorKind, Result};

/// packets above this size are treated as a broken stream.
const MAX_PACKET_LEN: i32 = 4 * 1024 * 1024;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum OpCode {
    GetChildren = 8,
    CloseSession = -11,
}

#[derive(Debug, Copy, Clone, Display, PartialEq)]
pub enum ZkError {
    Ok = 0,
    SystemError = -1,
    ConnectionLoss = -4,
    MarshallingError = -5,
    Unimplemented = -6,
    OperationTimeout = -7,
    BadArguments = -8,
    NoNode = -101,
    NoAuth = -102,
    SessionExpired = -112,
}

// `derive(Primitive)` cannot expand negative discriminants, so the same
// `FromPrimitive`/`ToPrimitive` impls are spelled out here.
macro_rules! impl_primitive {
    ($name:ident { $($var:ident),* $(,)? }) => {
        impl FromPrimitive for $name {
            fn from_i64(val: i64) -> Option<Self> {
                $(if val == $name::$var as i64 { return Some($name::$var); })*
                None
            }

            fn from_u64(val: u64) -> Option<Self> {
                if val > i64::MAX as u64 {
                    return None;
                }
                Self::from_i64(val as i64)
            }
        }

        impl ToPrimitive for $name {
            fn to_i64(&self) -> Option<i64> {
                Some(*self as i64)
            }

            fn to_u64(&self) -> Option<u64> {
                Some(*self as i64 as u64)
            }
        }
    };
}

impl_primitive!(OpCode { GetChildren, CloseSession });
impl_primitive!(ZkError {
    Ok,
    SystemError,
    ConnectionLoss,
    MarshallingError,
    Unimplemented,
    OperationTimeout,
    BadArguments,
    NoNode,
    NoAuth,
    SessionExpired,
});

fn unavailable<E: fmt::Display>(addr: &str, e: E) -> Error {
    Error::new(
        ErrorKind::RegistryUnavailableError,
        format!("zookeeper {}: {}", addr, e),
    )
}

/// providers from `/dubbo/<interface>/providers`.
#[derive(Debug, Clone)]
pub struct ZookeeperDiscovery {
    addr: String,
    host: String,
    port: u16,
    session_timeout: Duration,
}

impl ZookeeperDiscovery {
    pub fn new(host: &str, port: u16, session_timeout: Duration) -> ZookeeperDiscovery {
        ZookeeperDiscovery {
            addr: format!("{}:{}", host, port),
            host: host.to_owned(),
            port,
            session_timeout,
        }
    }

    pub fn providers_path(interface: &str) -> String {
        format!("/dubbo/{}/providers", interface)
    }

    async fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(|e| unavailable(&self.addr, e))?;

        write_packet(&mut stream, &connect_request(self.session_timeout))
            .await
            .map_err(|e| unavailable(&self.addr, e))?;
        let resp = read_packet(&mut stream)
            .await
            .map_err(|e| unavailable(&self.addr, e))?;
        let negotiated = parse_connect_response(&resp).map_err(|e| unavailable(&self.addr, e))?;
        if negotiated <= 0 {
            return Err(unavailable(&self.addr, "session rejected"));
        }
        debug!(addr = %self.addr, negotiated, "zookeeper session established");

        let xid = 1;
        write_packet(&mut stream, &get_children_request(xid, path))
            .await
            .map_err(|e| unavailable(&self.addr, e))?;
        let children = loop {
            let packet = read_packet(&mut stream)
                .await
                .map_err(|e| unavailable(&self.addr, e))?;
            let mut cur = Cursor::new(&packet[..]);
            let (reply_xid, _zxid, err) = read_reply_header(&mut cur).map_err(|e| unavailable(&self.addr, e))?;
            // watch notifications and pings carry their own xids
            if reply_xid != xid {
                continue;
            }
            match ZkError::from_i32(err) {
                Some(ZkError::Ok) => {}
                Some(ZkError::NoNode) => return Err(not_found(path, "no such znode")),
                Some(e) => return Err(unavailable(&self.addr, format!("{} on {}", e, path))),
                None => return Err(unavailable(&self.addr, format!("error {} on {}", err, path))),
            }
            break read_string_vec(&mut cur).map_err(|e| unavailable(&self.addr, e))?;
        };

        if let Err(e) = write_packet(&mut stream, &close_request(xid + 1)).await {
            warn!(addr = %self.addr, error = %e, "failed to close zookeeper session");
        }
        Ok(children)
    }
}

#[async_trait]
impl Discovery for ZookeeperDiscovery {
    async fn get_services(&self, interface: &str) -> Result<Vec<Provider>> {
        let path = Self::providers_path(interface);
        let children = self.list_children(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::ServiceNotFoundError {
                not_found(interface, &format!("{} does not exist", path))
            } else {
                e
            }
        })?;
        debug!(path = %path, children = children.len(), "zookeeper children listed");
        if children.is_empty() {
            return Err(not_found(interface, "no providers registered"));
        }
        let providers = decode_providers(&children);
        if providers.is_empty() {
            return Err(not_found(interface, "no usable provider url"));
        }
        Ok(providers)
    }
}

/// url-decodes child names and keeps the parsable, enabled providers.
pub fn decode_providers(children: &[String]) -> Vec<Provider> {
    children
        .iter()
        .filter_map(|child| urlencoding::decode(child).ok())
        .filter(|url| url.contains("://"))
        .filter_map(|url| Provider::from_url(&url))
        .collect()
}

async fn write_packet(stream: &mut TcpStream, body: &[u8]) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut buf = Vec::with_capacity(body.len() + 4);
    WriteBytesExt::write_i32::<BigEndian>(&mut buf, body.len() as i32)?;
    buf.extend_from_slice(body);
    stream.write_all(&buf).await?;
    stream.flush().await
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;
    let len = stream.read_i32().await?;
    if !(0..=MAX_PACKET_LEN).contains(&len) {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("packet length {} out of range", len),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

pub(crate) fn connect_request(session_timeout: Duration) -> Vec<u8> {
    let mut buf = Vec::with_capacity(45);
    // writes into a Vec cannot fail
    let _ = buf.write_i32::<BigEndian>(0); // protocol version
    let _ = buf.write_i64::<BigEndian>(0); // last zxid seen
    let _ = buf.write_i32::<BigEndian>(session_timeout.as_millis().min(i32::MAX as u128) as i32);
    let _ = buf.write_i64::<BigEndian>(0); // session id
    let _ = buf.write_i32::<BigEndian>(16);
    buf.extend_from_slice(&[0u8; 16]);
    buf.push(1); // read only
    buf
}

/// the negotiated session timeout.
pub(crate) fn parse_connect_response(packet: &[u8]) -> std::io::Result<i32> {
    let mut cur = Cursor::new(packet);
    let _protocol_version = cur.read_i32::<BigEndian>()?;
    let timeout = cur.read_i32::<BigEndian>()?;
    let _session_id = cur.read_i64::<BigEndian>()?;
    Ok(timeout)
}

pub(crate) fn get_children_request(xid: i32, path: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(13 + path.len());
    let _ = buf.write_i32::<BigEndian>(xid);
    let _ = buf.write_i32::<BigEndian>(OpCode::GetChildren as i32);
    let _ = buf.write_i32::<BigEndian>(path.len() as i32);
    buf.extend_from_slice(path.as_bytes());
    buf.push(0); // no watch
    buf
}

pub(crate) fn close_request(xid: i32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    let _ = buf.write_i32::<BigEndian>(xid);
    let _ = buf.write_i32::<BigEndian>(OpCode::CloseSession as i32);
    buf
}

fn read_reply_header(cur: &mut Cursor<&[u8]>) -> std::io::Result<(i32, i64, i32)> {
    let xid = cur.read_i32::<BigEndian>()?;
    let zxid = cur.read_i64::<BigEndian>()?;
    let err = cur.read_i32::<BigEndian>()?;
    Ok((xid, zxid, err))
}

fn remaining(cur: &Cursor<&[u8]>) -> usize {
    cur.get_ref().len().saturating_sub(cur.position() as usize)
}

fn invalid(what: &str, n: i32, left: usize) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("{} {} exceeds the {} bytes left in the reply", what, n, left),
    )
}

// every child costs at least its 4-byte length
fn read_string_vec(cur: &mut Cursor<&[u8]>) -> std::io::Result<Vec<String>> {
    let count = cur.read_i32::<BigEndian>()?.max(0);
    if count as usize > remaining(cur) / 4 {
        return Err(invalid("child count", count, remaining(cur)));
    }
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = cur.read_i32::<BigEndian>()?.max(0);
        if len as usize > remaining(cur) {
            return Err(invalid("name length", len, remaining(cur)));
        }
        let mut s = vec![0u8; len as usize];
        std::io::Read::read_exact(cur, &mut s)?;
        out.push(
            String::from_utf8(s)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_counts_are_rejected() {
        let err = read_string_vec(&mut Cursor::new(&[0x7f, 0xff, 0xff, 0xff][..])).unwrap_err();
        assert_eq!(std::io::ErrorKind::InvalidData, err.kind());

        // one child claiming a huge name
        let bytes = [0, 0, 0, 1, 0x7f, 0xff, 0xff, 0xff, b'a'];
        let err = read_string_vec(&mut Cursor::new(&bytes[..])).unwrap_err();
        assert_eq!(std::io::ErrorKind::InvalidData, err.kind());

        let bytes = [0, 0, 0, 1, 0, 0, 0, 1, b'a'];
        assert_eq!(vec!["a".to_owned()], read_string_vec(&mut Cursor::new(&bytes[..])).unwrap());
        assert!(read_string_vec(&mut Cursor::new(&[0xff, 0xff, 0xff, 0xff][..])).unwrap().is_empty());
    }

    #[test]
    fn connect_request_layout() {
        let req = connect_request(Duration::from_millis(30_000));
        assert_eq!(45, req.len());
        assert_eq!(&[0, 0, 0x75, 0x30][..], &req[12..16]);
        assert_eq!(&[0, 0, 0, 16][..], &req[24..28]);
        assert_eq!(1, req[44]);
    }

    #[test]
    fn get_children_layout() {
        let req = get_children_request(1, "/dubbo/a/providers");
        assert_eq!(&[0, 0, 0, 1, 0, 0, 0, 8, 0, 0, 0, 18][..], &req[..12]);
        assert_eq!(b"/dubbo/a/providers", &req[12..30]);
        assert_eq!(0, req[30]);
        assert_eq!(&[0xff, 0xff, 0xff, 0xf5][..], &close_request(2)[4..]);
    }

    #[test]
    fn reads_children() {
        let mut packet = Vec::new();
        packet.write_i32::<BigEndian>(1).unwrap();
        packet.write_i64::<BigEndian>(77).unwrap();
        packet.write_i32::<BigEndian>(0).unwrap();
        packet.write_i32::<BigEndian>(2).unwrap();
        for s in &["a", "bc"] {
            packet.write_i32::<BigEndian>(s.len() as i32).unwrap();
            packet.extend_from_slice(s.as_bytes());
        }
        let mut cur = Cursor::new(&packet[..]);
        assert_eq!((1, 77, 0), read_reply_header(&mut cur).unwrap());
        assert_eq!(vec!["a".to_owned(), "bc".to_owned()], read_string_vec(&mut cur).unwrap());
    }

    #[test]
    fn decodes_provider_children() {
        let children = vec![
            "dubbo%3A%2F%2F10.0.0.1%3A20880%2Fcom.x.Svc%3Fweight%3D7".to_owned(),
            "dubbo%3A%2F%2F10.0.0.2%3A20880%2Fcom.x.Svc%3Fenabled%3Dfalse".to_owned(),
            "not-a-url".to_owned(),
        ];
        let providers = decode_providers(&children);
        assert_eq!(1, providers.len());
        assert_eq!("10.0.0.1", providers[0].endpoint.host);
        assert_eq!(7.0, providers[0].weight);
    }

    #[test]
    fn error_codes() {
        assert_eq!(Some(ZkError::NoNode), ZkError::from_i32(-101));
        assert_eq!(Some(OpCode::CloseSession), OpCode::from_i32(-11));
    }
}
