#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::{json, Value};

    use dubbo::*;
    use test_suite::*;

    fn request(provider: &MockProvider, types: Option<&str>, values: Option<Value>) -> InvokeRequest {
        InvokeRequest {
            service_uri: Some(provider.uri()),
            interface_name: "com.example.UserService".to_owned(),
            method_name: "find".to_owned(),
            parameter_types: types.map(str::to_owned),
            parameter_values: values,
            ..Default::default()
        }
    }

    fn opt(fail_mode: FailMode, timeout_ms: u64) -> Opt {
        Opt {
            fail_mode,
            timeout: Duration::from_millis(timeout_ms),
            ..Default::default()
        }
    }

    fn user() -> WireValue {
        WireValue::Struct {
            type_name: "com.example.User".to_owned(),
            fields: vec![
                ("id".to_owned(), WireValue::Int64(3)),
                ("name".to_owned(), "bob".into()),
            ],
        }
    }

    #[tokio::test]
    async fn test_typed_invocation() {
        let provider = spawn_provider(|_| ok_frame(&user()), None).await;
        let xc = XClient::new(opt(FailMode::Failfast, 5_000));

        let v = xc
            .invoke(&request(&provider, Some("java.lang.String,int"), Some(json!(["bob", "3"]))))
            .await
            .unwrap();
        assert_eq!(json!({"class": "com.example.User", "id": 3, "name": "bob"}), v);

        let invocations = provider.invocations();
        assert_eq!(1, invocations.len());
        let inv = &invocations[0];
        assert_eq!("2.0.2", inv.dubbo_version);
        assert_eq!("com.example.UserService", inv.path);
        assert_eq!("find", inv.method);
        assert_eq!("Ljava/lang/String;I", inv.parameter_descriptor);
        assert_eq!(vec![WireValue::from("bob"), WireValue::Int64(3)], inv.arguments);
        assert_eq!(Some("com.example.UserService"), inv.attachments.field("interface").and_then(|v| v.as_str()));
        let budget: u64 = inv
            .attachments
            .field("timeout")
            .and_then(|v| v.as_str())
            .unwrap()
            .parse()
            .unwrap();
        assert!(budget > 0 && budget <= 5_000);
    }

    #[tokio::test]
    async fn test_traditional_invocation() {
        let provider = spawn_provider(|inv| ok_frame(&inv.arguments[0]), None).await;
        let xc = XClient::new(opt(FailMode::Failfast, 5_000));

        let v = xc
            .invoke(&request(&provider, None, Some(json!({"class": "com.example.Query", "q": "x"}))))
            .await
            .unwrap();
        assert_eq!(json!({"class": "com.example.Query", "q": "x"}), v);
        assert_eq!("Lcom/example/Query;", provider.invocations()[0].parameter_descriptor);
    }

    #[tokio::test]
    async fn test_group_and_version_attachments() {
        let provider = spawn_provider(|_| ok_frame(&WireValue::Null), None).await;
        let mut o = opt(FailMode::Failfast, 5_000);
        o.group = Some("blue".to_owned());
        o.service_version = "1.0.0".to_owned();
        let xc = XClient::new(o);

        assert_eq!(Value::Null, xc.invoke(&request(&provider, Some(""), None)).await.unwrap());
        let inv = &provider.invocations()[0];
        assert_eq!("1.0.0", inv.version);
        assert_eq!("", inv.parameter_descriptor);
        assert!(inv.arguments.is_empty());
        assert_eq!(Some("blue"), inv.attachments.field("group").and_then(|v| v.as_str()));
    }

    #[tokio::test]
    async fn test_remote_exception_is_terminal() {
        let provider = spawn_provider(
            |_| exception_frame("java.lang.IllegalArgumentException", "no user 3"),
            Some("{\"id\":3}"),
        )
        .await;
        let xc = XClient::new(opt(FailMode::Failover, 5_000));

        let err = xc
            .invoke(&request(&provider, Some("int"), Some(json!([3]))))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::RemoteServiceException, err.kind());
        assert_eq!("java.lang.IllegalArgumentException: no user 3", err.message());
        assert!(provider.commands().is_empty());
    }

    #[tokio::test]
    async fn test_bad_frame_falls_back_to_telnet() {
        let provider = spawn_provider(
            |_| Reply::Garbage(b"\xca\xfe not a frame at all".to_vec()),
            Some("{\"id\":3,\"name\":\"bob\"}"),
        )
        .await;
        let xc = XClient::new(opt(FailMode::Failover, 5_000));

        let v = xc
            .invoke(&request(&provider, Some("int"), Some(json!([3]))))
            .await
            .unwrap();
        assert_eq!(json!({"id": 3, "name": "bob"}), v);
        assert_eq!(1, provider.invocations().len());
        assert_eq!(
            vec!["invoke com.example.UserService.find(3)\r\n".to_owned()],
            provider.commands()
        );
    }

    #[tokio::test]
    async fn test_failfast_skips_telnet() {
        let provider = spawn_provider(|_| Reply::Garbage(vec![0; 32]), Some("\"fallback\"")).await;
        let xc = XClient::new(opt(FailMode::Failfast, 5_000));

        let err = xc.invoke(&request(&provider, None, None)).await.unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());
        assert!(provider.commands().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_id_falls_back() {
        let provider = spawn_provider(
            |_| Reply::WrongId(Response::encode_value(&"stale".into())),
            Some("fresh"),
        )
        .await;
        let xc = XClient::new(opt(FailMode::Failover, 5_000));

        assert_eq!(json!("fresh"), xc.invoke(&request(&provider, None, None)).await.unwrap());
    }

    #[tokio::test]
    async fn test_console_error_is_a_fallback_failure() {
        let provider = spawn_provider(
            |_| Reply::Garbage(vec![0; 32]),
            Some("No such method find in service com.example.UserService"),
        )
        .await;
        let xc = XClient::new(opt(FailMode::Failover, 5_000));

        let err = xc.invoke(&request(&provider, None, None)).await.unwrap_err();
        assert_eq!(ErrorKind::FallbackFailure, err.kind());
        assert!(err.message().contains("No such method"));
    }

    #[tokio::test]
    async fn test_unreachable_provider() {
        let addr = refused_addr().await;
        let xc = XClient::new(opt(FailMode::Failover, 5_000));
        let req = InvokeRequest {
            service_uri: Some(addr.to_string()),
            interface_name: "com.example.UserService".to_owned(),
            method_name: "find".to_owned(),
            ..Default::default()
        };
        let err = xc.invoke(&req).await.unwrap_err();
        assert_eq!(ErrorKind::FallbackFailure, err.kind());

        let xc = XClient::new(opt(FailMode::Failfast, 5_000));
        let err = xc.invoke(&req).await.unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());
    }

    #[tokio::test]
    async fn test_non_ok_status() {
        let provider = spawn_provider(
            |inv| match inv.method.as_str() {
                "slow" => Reply::Frame(MessageStatus::ServerTimeout, Response::encode_error("waited 1000 ms")),
                _ => Reply::Frame(MessageStatus::ServiceNotFound, Response::encode_error("no such service")),
            },
            None,
        )
        .await;
        let xc = XClient::new(opt(FailMode::Failfast, 5_000));

        let err = xc.invoke(&request(&provider, None, None)).await.unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());
        assert!(err.message().contains("no such service"));

        let mut req = request(&provider, None, None);
        req.method_name = "slow".to_owned();
        let err = xc.invoke(&req).await.unwrap_err();
        assert_eq!(ErrorKind::TimeoutError, err.kind());
    }

    #[tokio::test]
    async fn test_deadline_covers_the_whole_invocation() {
        let provider = spawn_provider(|_| Reply::Silence, Some("\"late\"")).await;
        let xc = XClient::new(opt(FailMode::Failover, 300));

        let start = Instant::now();
        let err = xc.invoke(&request(&provider, None, None)).await.unwrap_err();
        assert_eq!(ErrorKind::TimeoutError, err.kind());
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(provider.commands().is_empty());
    }

    #[tokio::test]
    async fn test_provider_heartbeat_is_answered() {
        let provider = spawn_provider(
            |_| Reply::PingThen(MessageStatus::Ok, Response::encode_value(&"pong".into())),
            None,
        )
        .await;
        let xc = XClient::new(opt(FailMode::Failfast, 5_000));

        assert_eq!(json!("pong"), xc.invoke(&request(&provider, None, None)).await.unwrap());
    }

    #[tokio::test]
    async fn test_silent_connection_fails_after_two_intervals() {
        let provider = spawn_provider(|_| Reply::Silence, Some("\"revived\"")).await;
        let mut o = opt(FailMode::Failfast, 10_000);
        o.heartbeat_interval = Duration::from_millis(50);

        let start = Instant::now();
        let err = XClient::new(o.clone())
            .invoke(&request(&provider, None, None))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NativeProtocolFailure, err.kind());
        assert!(start.elapsed() < Duration::from_secs(5));

        o.fail_mode = FailMode::Failover;
        let v = XClient::new(o).invoke(&request(&provider, None, None)).await.unwrap();
        assert_eq!(json!("revived"), v);
    }

    #[tokio::test]
    async fn test_concurrent_invocations_are_correlated() {
        let provider = spawn_provider(|inv| ok_frame(&inv.arguments[0]), None).await;
        let xc = std::sync::Arc::new(XClient::new(opt(FailMode::Failfast, 5_000)));

        let mut handles = Vec::new();
        for i in 0..16 {
            let xc = xc.clone();
            let req = request(&provider, Some("long"), Some(json!([i])));
            handles.push(tokio::spawn(async move { xc.invoke(&req).await }));
        }
        for (i, h) in handles.into_iter().enumerate() {
            assert_eq!(json!(i), h.await.unwrap().unwrap());
        }
        assert_eq!(16, provider.invocations().len());
    }

    #[tokio::test]
    async fn test_marshalling_errors_send_nothing() {
        let provider = spawn_provider(|_| ok_frame(&WireValue::Null), None).await;
        let xc = XClient::new(opt(FailMode::Failover, 5_000));

        let err = xc
            .invoke(&request(&provider, Some("int"), Some(json!(["three"]))))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::TypeMismatchError, err.kind());
        let err = xc
            .invoke(&request(&provider, Some("int,int"), Some(json!([1]))))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::ParameterCountMismatch, err.kind());
        assert!(provider.invocations().is_empty());
        assert!(provider.commands().is_empty());
    }

    #[tokio::test]
    async fn test_raw_frames() {
        let provider = spawn_provider(|_| ok_frame(&WireValue::Bool(true)), None).await;
        let mut stream = tokio::net::TcpStream::connect(provider.addr).await.unwrap();

        let mut req = Request::new(
            Endpoint::new("127.0.0.1", provider.addr.port()),
            ServiceDescriptor::new("com.example.UserService", "exists"),
        );
        req.argument_types = signature::parse("long").unwrap();
        req.arguments = vec![WireValue::Int64(7)];
        req.to_message(77).write_to(&mut stream).await.unwrap();

        let frame = Message::read_from(&mut stream).await.unwrap();
        assert_eq!(77, frame.get_id());
        assert!(!frame.is_request());
        let resp = Response::decode(&frame).unwrap();
        assert_eq!(ResponseStatus::Ok, resp.status);
        assert_eq!(Some(WireValue::Bool(true)), resp.value);
        assert_eq!(vec![WireValue::Int64(7)], provider.invocations()[0].arguments);
    }
}
