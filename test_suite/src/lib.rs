//! In-process stand-ins for providers and registries.

use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::Duration,
};

use byteorder::{BigEndian, ByteOrder};
use bytes::BytesMut;
use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Server,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use dubbo::{DubboMessage, Invocation, Message, MessageStatus, Response, WireValue, MAGIC_NUMBER};

/// how a mock provider answers one invocation.
#[derive(Debug, Clone)]
pub enum Reply {
    /// a response frame with this status and body.
    Frame(MessageStatus, BytesMut),
    /// a frame whose id is not the request's.
    WrongId(BytesMut),
    /// raw bytes instead of a frame.
    Garbage(Vec<u8>),
    /// a heartbeat request first, then the frame.
    PingThen(MessageStatus, BytesMut),
    /// nothing at all.
    Silence,
}

pub type Recorder<T> = Arc<Mutex<Vec<T>>>;

async fn listen() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// an address nothing listens on.
pub async fn refused_addr() -> SocketAddr {
    let (listener, addr) = listen().await;
    drop(listener);
    addr
}

/// A provider port as dubbo serves it: binary frames and the telnet console
/// share it, told apart by the first two bytes.
pub struct MockProvider {
    pub addr: SocketAddr,
    pub invocations: Recorder<Invocation>,
    pub commands: Recorder<String>,
}

impl MockProvider {
    /// the `service_uri` of this provider.
    pub fn uri(&self) -> String {
        format!("dubbo://{}", self.addr)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

/// Spawns a provider answering invocations with `handler` and console
/// commands with `console`, if given.
pub async fn spawn_provider<F>(handler: F, console: Option<&str>) -> MockProvider
where
    F: Fn(&Invocation) -> Reply + Send + Sync + 'static,
{
    let (listener, addr) = listen().await;
    let invocations: Recorder<Invocation> = Arc::new(Mutex::new(Vec::new()));
    let commands: Recorder<String> = Arc::new(Mutex::new(Vec::new()));
    let provider = MockProvider {
        addr,
        invocations: invocations.clone(),
        commands: commands.clone(),
    };
    let handler = Arc::new(handler);
    let console = console.map(str::to_owned);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            let invocations = invocations.clone();
            let commands = commands.clone();
            let console = console.clone();
            tokio::spawn(async move {
                let mut magic = [0u8; 2];
                match stream.peek(&mut magic).await {
                    Ok(2) if magic == MAGIC_NUMBER => {
                        let _ = serve_native(stream, handler, invocations).await;
                    }
                    Ok(0) | Err(_) => {}
                    Ok(_) => {
                        if let Some(reply) = console {
                            let _ = serve_console(stream, &reply, commands).await;
                        }
                    }
                }
            });
        }
    });
    provider
}

async fn serve_native<F>(mut stream: TcpStream, handler: Arc<F>, seen: Recorder<Invocation>) -> dubbo::Result<()>
where
    F: Fn(&Invocation) -> Reply + Send + Sync + 'static,
{
    loop {
        let msg = Message::read_from(&mut stream).await?;
        if msg.is_event() {
            if msg.is_two_way() {
                Message::heartbeat_response(msg.get_id())
                    .write_to(&mut stream)
                    .await?;
            }
            continue;
        }
        let inv = Invocation::decode(&msg.body)?;
        let reply = handler(&inv);
        seen.lock().unwrap().push(inv);
        match reply {
            Reply::Frame(status, body) => {
                Message::response(msg.get_id(), status, body)
                    .write_to(&mut stream)
                    .await?
            }
            Reply::WrongId(body) => {
                Message::response(msg.get_id() + 1000, MessageStatus::Ok, body)
                    .write_to(&mut stream)
                    .await?
            }
            Reply::Garbage(bytes) => stream.write_all(&bytes).await?,
            Reply::PingThen(status, body) => {
                Message::heartbeat_request(9999).write_to(&mut stream).await?;
                let pong = Message::read_from(&mut stream).await?;
                assert!(pong.is_heartbeat());
                assert_eq!(9999, pong.get_id());
                Message::response(msg.get_id(), status, body)
                    .write_to(&mut stream)
                    .await?
            }
            Reply::Silence => tokio::time::sleep(Duration::from_secs(3600)).await,
        }
    }
}

async fn serve_console(mut stream: TcpStream, reply: &str, seen: Recorder<String>) -> std::io::Result<()> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    while stream.read(&mut byte).await? == 1 {
        line.push(byte[0]);
        if line.ends_with(b"\r\n") {
            break;
        }
    }
    seen.lock().unwrap().push(String::from_utf8_lossy(&line).into_owned());
    let out = format!("{}\r\nelapsed: 2 ms.\r\ndubbo>", reply);
    stream.write_all(out.as_bytes()).await
}

/// a successful response frame carrying `value`.
pub fn ok_frame(value: &WireValue) -> Reply {
    Reply::Frame(MessageStatus::Ok, Response::encode_value(value))
}

/// a response frame carrying a thrown `class` with `message`.
pub fn exception_frame(class: &str, message: &str) -> Reply {
    let exception = WireValue::Struct {
        type_name: class.to_owned(),
        fields: vec![("detailMessage".to_owned(), WireValue::string(message))],
    };
    Reply::Frame(MessageStatus::Ok, Response::encode_exception(&exception))
}

/// the registry form of a provider url, as zookeeper child names carry it.
pub fn url_encode(url: &str) -> String {
    urlencoding::encode(url).into_owned()
}

fn packet(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; 4];
    BigEndian::write_i32(&mut out, body.len() as i32);
    out.extend_from_slice(body);
    out
}

async fn read_packet(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = stream.read_i32().await?;
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// A zookeeper server holding at most one znode's children: `None` answers
/// every listing with NONODE. Requested paths are recorded.
pub async fn spawn_zookeeper(children: Option<Vec<String>>) -> (SocketAddr, Recorder<String>) {
    let (listener, addr) = listen().await;
    let seen: Recorder<String> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            if read_packet(&mut stream).await.is_err() {
                continue;
            }
            // protocol version, timeout, session id, password
            let mut connect = vec![0u8; 4 + 4 + 8 + 4 + 16];
            BigEndian::write_i32(&mut connect[4..8], 30_000);
            BigEndian::write_i64(&mut connect[8..16], 0x1234);
            BigEndian::write_i32(&mut connect[16..20], 16);
            let _ = stream.write_all(&packet(&connect)).await;

            let req = match read_packet(&mut stream).await {
                Ok(req) => req,
                Err(_) => continue,
            };
            let xid = BigEndian::read_i32(&req[0..4]);
            let path_len = BigEndian::read_i32(&req[8..12]) as usize;
            seen.lock()
                .unwrap()
                .push(String::from_utf8_lossy(&req[12..12 + path_len]).into_owned());

            // a watch notification the client must skip
            let mut event = vec![0u8; 16];
            BigEndian::write_i32(&mut event[0..4], -1);
            let _ = stream.write_all(&packet(&event)).await;

            let mut reply = vec![0u8; 16];
            BigEndian::write_i32(&mut reply[0..4], xid);
            BigEndian::write_i64(&mut reply[4..12], 42);
            match &children {
                None => BigEndian::write_i32(&mut reply[12..16], -101),
                Some(children) => {
                    let mut count = [0u8; 4];
                    BigEndian::write_i32(&mut count, children.len() as i32);
                    reply.extend_from_slice(&count);
                    for c in children {
                        let mut len = [0u8; 4];
                        BigEndian::write_i32(&mut len, c.len() as i32);
                        reply.extend_from_slice(&len);
                        reply.extend_from_slice(c.as_bytes());
                    }
                }
            }
            let _ = stream.write_all(&packet(&reply)).await;
            // close session request
            let _ = read_packet(&mut stream).await;
        }
    });
    (addr, recorder)
}

/// An http server answering every request with `status` and `body`. Each
/// request is recorded as its method and uri, a blank line, then its body.
pub async fn spawn_http(status: u16, body: &str) -> (SocketAddr, Recorder<String>) {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Recorder<String> = Arc::new(Mutex::new(Vec::new()));
    let recorder = seen.clone();
    let body = body.to_owned();

    let make_svc = make_service_fn(move |_| {
        let seen = seen.clone();
        let body = body.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: hyper::Request<Body>| {
                let seen = seen.clone();
                let body = body.clone();
                async move {
                    let head = format!("{} {}", req.method(), req.uri());
                    let content = hyper::body::to_bytes(req.into_body()).await?;
                    seen.lock()
                        .unwrap()
                        .push(format!("{}\r\n\r\n{}", head, String::from_utf8_lossy(&content)));
                    let resp = hyper::Response::builder()
                        .status(status)
                        .header(CONTENT_TYPE, "application/json")
                        .body(Body::from(body))
                        .unwrap();
                    Ok::<_, hyper::Error>(resp)
                }
            }))
        }
    });
    let server = Server::from_tcp(listener).unwrap().serve(make_svc);
    tokio::spawn(server);
    (addr, recorder)
}
