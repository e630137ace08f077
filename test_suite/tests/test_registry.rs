#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::{json, Value};

    use dubbo::*;
    use test_suite::*;

    const INTERFACE: &str = "com.example.UserService";

    fn request(registry: String) -> InvokeRequest {
        InvokeRequest {
            registry_address: Some(registry),
            interface_name: INTERFACE.to_owned(),
            method_name: "whoami".to_owned(),
            ..Default::default()
        }
    }

    fn opt() -> Opt {
        Opt {
            fail_mode: FailMode::Failfast,
            timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn named_provider(name: &'static str) -> MockProvider {
        spawn_provider(move |_| ok_frame(&WireValue::string(name)), None).await
    }

    #[tokio::test]
    async fn test_zookeeper_providers() {
        let provider = named_provider("zk-provider").await;
        let children = vec![
            url_encode(&format!("tri://127.0.0.1:1/{}?weight=100", INTERFACE)),
            url_encode(&format!("dubbo://{}/{}?anyhost=true&weight=100", provider.addr, INTERFACE)),
        ];
        let (zk, paths) = spawn_zookeeper(Some(children)).await;

        let v = XClient::new(opt())
            .invoke(&request(format!("zookeeper://{}", zk)))
            .await
            .unwrap();
        assert_eq!(json!("zk-provider"), v);
        assert_eq!(
            vec![format!("/dubbo/{}/providers", INTERFACE)],
            paths.lock().unwrap().clone()
        );
    }

    #[tokio::test]
    async fn test_zookeeper_missing_service() {
        let (zk, _) = spawn_zookeeper(None).await;
        let err = XClient::new(opt())
            .invoke(&request(format!("zookeeper://{}", zk)))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::ServiceNotFoundError, err.kind());
    }

    #[tokio::test]
    async fn test_zookeeper_without_dubbo_providers() {
        let (zk, _) = spawn_zookeeper(Some(vec![
            url_encode(&format!("tri://127.0.0.1:50051/{}", INTERFACE)),
            url_encode(&format!("dubbo://127.0.0.1:20880/{}?enabled=false", INTERFACE)),
        ]))
        .await;
        let err = XClient::new(opt())
            .invoke(&request(format!("zookeeper://{}", zk)))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::ServiceNotFoundError, err.kind());

        let (zk, _) = spawn_zookeeper(Some(Vec::new())).await;
        let err = XClient::new(opt())
            .invoke(&request(format!("zookeeper://{}", zk)))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::ServiceNotFoundError, err.kind());
    }

    #[tokio::test]
    async fn test_registry_unavailable() {
        let addr = refused_addr().await;
        for scheme in &["zookeeper", "nacos"] {
            let err = XClient::new(opt())
                .invoke(&request(format!("{}://{}", scheme, addr)))
                .await
                .unwrap_err();
            assert_eq!(ErrorKind::RegistryUnavailableError, err.kind(), "{}", scheme);
        }
    }

    fn instances(provider: &MockProvider, extra: Value) -> String {
        let mut body = json!({
            "name": format!("DEFAULT_GROUP@@providers:{}::", INTERFACE),
            "hosts": [
                {"ip": "127.0.0.1", "port": 1, "healthy": false},
                {"ip": "127.0.0.1", "port": provider.addr.port(), "weight": 1.0,
                 "healthy": true, "enabled": true, "metadata": {"protocol": "dubbo"}}
            ]
        });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            for (k, v) in extra {
                body.insert(k.clone(), v.clone());
            }
        }
        body.to_string()
    }

    #[tokio::test]
    async fn test_nacos_providers() {
        let provider = named_provider("nacos-provider").await;
        let (nacos, requests) = spawn_http(200, &instances(&provider, json!({}))).await;

        let v = XClient::new(opt())
            .invoke(&request(format!("nacos://{}", nacos)))
            .await
            .unwrap();
        assert_eq!(json!("nacos-provider"), v);

        let requests = requests.lock().unwrap().clone();
        assert_eq!(1, requests.len());
        assert!(requests[0].starts_with("GET /nacos/v1/ns/instance/list?"));
        assert!(requests[0].contains("serviceName=providers%3Acom.example.UserService%3A%3A"));
    }

    #[tokio::test]
    async fn test_nacos_login() {
        let provider = named_provider("secured").await;
        let body = instances(&provider, json!({"accessToken": "tok-1", "tokenTtl": 18000}));
        let (nacos, requests) = spawn_http(200, &body).await;
        let o = Opt {
            registry_username: Some("nacos".to_owned()),
            registry_password: Some("p&ss".to_owned()),
            ..opt()
        };

        let v = XClient::new(o)
            .invoke(&request(format!("nacos://{}", nacos)))
            .await
            .unwrap();
        assert_eq!(json!("secured"), v);

        let requests = requests.lock().unwrap().clone();
        assert_eq!(2, requests.len());
        assert!(requests[0].starts_with("POST /nacos/v1/auth/login"));
        assert!(requests[0].ends_with("username=nacos&password=p%26ss"));
        assert!(requests[1].contains("accessToken=tok-1"));
    }

    #[tokio::test]
    async fn test_nacos_errors() {
        let (nacos, _) = spawn_http(404, "service not found").await;
        let err = XClient::new(opt())
            .invoke(&request(format!("nacos://{}", nacos)))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::ServiceNotFoundError, err.kind());

        let (nacos, _) = spawn_http(200, r#"{"name": "x", "hosts": []}"#).await;
        let err = XClient::new(opt())
            .invoke(&request(format!("nacos://{}", nacos)))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::ServiceNotFoundError, err.kind());

        let (nacos, _) = spawn_http(500, "server is DOWN now").await;
        let err = XClient::new(opt())
            .invoke(&request(format!("nacos://{}", nacos)))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::RegistryUnavailableError, err.kind());
    }

    #[tokio::test]
    async fn test_static_discovery_round_robin() {
        let a = named_provider("a").await;
        let b = named_provider("b").await;
        let discovery = StaticDiscovery::from_urls(&[
            format!("dubbo://{}/{}", a.addr, INTERFACE),
            format!("dubbo://{}/{}", b.addr, INTERFACE),
        ]);
        let o = Opt {
            select_mode: SelectMode::RoundRobin,
            ..opt()
        };
        let xc = XClient::new(o).with_discovery(Arc::new(discovery));

        let mut seen = Vec::new();
        for _ in 0..4 {
            let v = xc
                .invoke(&request("zookeeper://127.0.0.1:2181".to_owned()))
                .await
                .unwrap();
            seen.push(v);
        }
        assert_ne!(seen[0], seen[1]);
        assert_eq!(seen[0], seen[2]);
        assert_eq!(seen[1], seen[3]);
        assert_eq!(2, a.invocations().len());
        assert_eq!(2, b.invocations().len());
    }

    #[tokio::test]
    async fn test_first_provider_by_default() {
        let a = named_provider("a").await;
        let b = named_provider("b").await;
        let discovery = StaticDiscovery::from_urls(&[
            format!("dubbo://{}/{}", a.addr, INTERFACE),
            format!("dubbo://{}/{}", b.addr, INTERFACE),
        ]);
        let xc = XClient::new(opt()).with_discovery(Arc::new(discovery));

        for _ in 0..3 {
            let v = xc
                .invoke(&request("nacos://127.0.0.1".to_owned()))
                .await
                .unwrap();
            assert_eq!(json!("a"), v);
        }
        assert!(b.invocations().is_empty());
    }
}
