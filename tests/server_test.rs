//! Integration tests for the reference API and the HTTP transport

#[cfg(feature = "server")]
mod server_tests {
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::time::Duration;
    use web3_funnel::collector::{EventRecord, EventType, PageInfo, TransactionInfo, WalletType};
    use web3_funnel::server::{run, ServerConfig};
    use web3_funnel::transport::{
        register_website, HttpTransport, RegisterRequest, Registration, Transport, TransportConfig,
        TransportError,
    };
    use web3_funnel::{Tracker, TrackerConfig};

    struct TestServer {
        addr: SocketAddr,
        shutdown_tx: tokio::sync::oneshot::Sender<()>,
    }

    impl TestServer {
        async fn start() -> Self {
            web3_funnel::logging::init_test();
            // Create server config with random port
            let (addr, shutdown_tx) = run(ServerConfig::new(0))
                .await
                .expect("Failed to start server");
            Self { addr, shutdown_tx }
        }

        fn base_url(&self) -> String {
            format!("http://{}/api/v1", self.addr)
        }

        async fn register(&self, domain: &str) -> Registration {
            register_website(
                &self.base_url(),
                &RegisterRequest {
                    name: "Test dApp".to_string(),
                    domain: domain.to_string(),
                    description: None,
                },
            )
            .await
            .expect("Failed to register website")
        }

        fn transport(&self, api_key: &str) -> HttpTransport {
            HttpTransport::new(TransportConfig::new(self.base_url(), api_key)).unwrap()
        }

        async fn get(&self, path_and_query: &str, api_key: &str) -> (reqwest::StatusCode, Value) {
            let response = reqwest::Client::new()
                .get(format!("{}{}", self.base_url(), path_and_query))
                .header("X-API-Key", api_key)
                .send()
                .await
                .expect("Failed to send request");
            let status = response.status();
            (status, response.json().await.expect("Failed to parse JSON"))
        }

        async fn send(
            &self,
            method: reqwest::Method,
            path: &str,
            api_key: &str,
            body: Option<Value>,
        ) -> (reqwest::StatusCode, Value) {
            let mut request = reqwest::Client::new()
                .request(method, format!("{}{}", self.base_url(), path))
                .header("X-API-Key", api_key);
            if let Some(body) = body {
                request = request.json(&body);
            }
            let response = request.send().await.expect("Failed to send request");
            let status = response.status();
            (status, response.json().await.expect("Failed to parse JSON"))
        }

        fn shutdown(self) {
            let _ = self.shutdown_tx.send(());
        }
    }

    fn record(event_type: EventType, user: &str) -> EventRecord {
        EventRecord::new(event_type, user, format!("session-{user}"))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let server = TestServer::start().await;

        let response = reqwest::Client::new()
            .get(format!("http://{}/health", server.addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let body: Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        // The transport checks the health route under the API prefix.
        assert!(server.transport("unused").test_connection().await.unwrap());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_register_and_track_single_event() {
        let server = TestServer::start().await;
        let site = server.register("singles.io").await;
        assert_eq!(site.api_key.len(), 64);
        assert_eq!(site.status, "active");

        let mut event = record(EventType::WalletConnect, "alice")
            .with_wallet(
                Some("0x52908400098527886E0F7030069857D2E4169EE7".to_string()),
                Some(WalletType::Coinbase),
            );
        event.timestamp = "2024-03-05T09:15:00Z".parse().unwrap();

        let response = server
            .transport(&site.api_key)
            .submit_one(&event)
            .await
            .expect("Failed to track event");
        assert!(response.success);
        let receipt = response.data.unwrap();
        assert!(!receipt.event_id.is_empty());
        assert_eq!(receipt.timestamp, event.timestamp);

        let (status, body) = server.get("/events/events", &site.api_key).await;
        assert_eq!(status, 200);
        let events = body["data"]["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["eventId"], receipt.event_id.as_str());
        assert_eq!(events[0]["eventType"], "wallet_connect");
        assert_eq!(
            events[0]["walletAddress"],
            "0x52908400098527886e0f7030069857d2e4169ee7"
        );

        let (_, details) = server.get("/websites/details", &site.api_key).await;
        assert_eq!(details["data"]["websiteId"], site.website_id.as_str());
        assert_eq!(details["data"]["stats"]["totalEvents"], 1);
        assert!(details["data"].get("apiKey").is_none());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_batch_ingest_and_stats() {
        let server = TestServer::start().await;
        let site = server.register("batches.io").await;
        let transport = server.transport(&site.api_key);

        let batch = vec![
            record(EventType::PageView, "alice"),
            record(EventType::ButtonClick, "alice"),
            record(EventType::PageView, "bob"),
            record(EventType::WalletConnect, "bob").with_wallet(None, Some(WalletType::Metamask)),
            record(EventType::TransactionComplete, "bob").with_transaction(TransactionInfo {
                hash: Some(format!("0x{}", "1f".repeat(32))),
                ..TransactionInfo::default()
            }),
        ];
        let response = transport.submit_batch(&batch).await.expect("Failed to track batch");
        let receipt = response.data.unwrap();
        assert_eq!(receipt.count, 5);
        assert_eq!(receipt.event_ids.len(), 5);

        let (_, body) = server
            .get("/events/events?eventType=page_view&limit=1&sortOrder=asc", &site.api_key)
            .await;
        assert_eq!(body["data"]["events"].as_array().unwrap().len(), 1);
        assert_eq!(body["data"]["events"][0]["userId"], "alice");
        assert_eq!(
            body["data"]["pagination"],
            json!({"page": 1, "limit": 1, "total": 2, "pages": 2})
        );

        let (status, stats) = server.get("/events/stats?groupBy=month", &site.api_key).await;
        assert_eq!(status, 200);
        let data = &stats["data"];
        assert_eq!(data["totalEvents"], 5);
        assert_eq!(data["uniqueUsers"], 2);
        assert_eq!(data["uniqueSessions"], 2);
        assert_eq!(data["eventTypeStats"][0], json!({"_id": "page_view", "count": 2}));
        assert_eq!(data["walletStats"], json!([{"_id": "metamask", "count": 1}]));
        assert_eq!(data["timeStats"].as_array().unwrap().len(), 1);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_batch_limits_and_atomicity() {
        let server = TestServer::start().await;
        let site = server.register("limits.io").await;
        let transport = server.transport(&site.api_key);

        let empty = transport.submit_batch(&[]).await.unwrap_err();
        assert_eq!(empty.status(), Some(400));

        let oversized: Vec<_> = (0..101)
            .map(|n| record(EventType::PageView, &format!("user-{n}")))
            .collect();
        let too_many = transport.submit_batch(&oversized).await.unwrap_err();
        assert_eq!(too_many.status(), Some(400));
        assert!(too_many.to_string().contains("Maximum 100"));

        // One invalid record rejects the whole batch.
        let mixed = vec![
            record(EventType::PageView, "alice"),
            record(EventType::WalletConnect, "alice")
                .with_wallet(Some("not-a-wallet".to_string()), None),
        ];
        let invalid = transport.submit_batch(&mixed).await.unwrap_err();
        assert_eq!(invalid.status(), Some(400));

        let (_, body) = server.get("/events/events", &site.api_key).await;
        assert_eq!(body["data"]["pagination"]["total"], 0);

        let exactly_max: Vec<_> = oversized.into_iter().take(100).collect();
        let accepted = transport.submit_batch(&exactly_max).await.unwrap();
        assert_eq!(accepted.data.unwrap().count, 100);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_validation_error_body() {
        let server = TestServer::start().await;
        let site = server.register("validation.io").await;

        let response = reqwest::Client::new()
            .post(format!("{}/events/track", server.base_url()))
            .header("X-API-Key", &site.api_key)
            .json(&json!({"eventType": "page_load", "userId": "u", "sessionId": "s"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        let body: Value = response.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Validation failed");
        assert_eq!(body["errors"][0]["field"], "eventType");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_authentication() {
        let server = TestServer::start().await;
        let site = server.register("auth.io").await;

        let missing = reqwest::Client::new()
            .post(format!("{}/events/track", server.base_url()))
            .json(&record(EventType::PageView, "alice"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 401);
        let body: Value = missing.json().await.unwrap();
        assert_eq!(body["message"], "API key is required");

        let wrong = server
            .transport("0000")
            .submit_one(&record(EventType::PageView, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(wrong, TransportError::Server { status: 401, .. }));

        // The key may also be passed as a query parameter.
        let response = reqwest::Client::new()
            .get(format!(
                "{}/websites/details?apiKey={}",
                server.base_url(),
                site.api_key
            ))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_duplicate_domain_conflict() {
        let server = TestServer::start().await;
        server.register("taken.io").await;

        let err = register_website(
            &server.base_url(),
            &RegisterRequest {
                name: "Copycat".to_string(),
                domain: "taken.io".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), Some(409));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let server = TestServer::start().await;

        // Send OPTIONS request to check CORS
        let response = reqwest::Client::new()
            .request(
                reqwest::Method::OPTIONS,
                format!("{}/events/track/batch", server.base_url()),
            )
            .header("Origin", "https://some-dapp.example")
            .header("Access-Control-Request-Method", "POST")
            .header("Access-Control-Request-Headers", "content-type,x-api-key")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success(),
            "CORS preflight failed: {}",
            response.status()
        );
        assert_eq!(
            response.headers()["access-control-allow-origin"],
            "*"
        );

        server.shutdown();
    }

    fn page_view(user: &str, url: &str, title: &str) -> EventRecord {
        let mut event = record(EventType::PageView, user);
        event.page = Some(PageInfo {
            url: url.to_string(),
            title: title.to_string(),
            path: String::new(),
        });
        event
    }

    #[tokio::test]
    async fn test_partial_page_context_is_accepted() {
        let server = TestServer::start().await;
        let site = server.register("partial.io").await;

        let (status, body) = server
            .send(
                reqwest::Method::POST,
                "/events/track",
                &site.api_key,
                Some(json!({
                    "eventType": "page_view",
                    "userId": "u",
                    "sessionId": "s",
                    "page": {"url": "https://partial.io/x"}
                })),
            )
            .await;
        assert_eq!(status, 201, "{body}");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_update_website() {
        let server = TestServer::start().await;
        let site = server.register("update.io").await;

        let (status, body) = server
            .send(
                reqwest::Method::PUT,
                "/websites/update",
                &site.api_key,
                Some(json!({
                    "name": "Renamed dApp",
                    "owner": {"email": "ops@update.io"},
                    "settings": {"trackingEnabled": false}
                })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["message"], "Website updated successfully");
        assert_eq!(body["data"]["name"], "Renamed dApp");
        assert_eq!(body["data"]["domain"], "update.io");
        assert_eq!(body["data"]["owner"]["email"], "ops@update.io");
        assert_eq!(body["data"]["settings"]["trackingEnabled"], false);
        assert_eq!(body["data"]["settings"]["trackEvents"]["clicks"], true);
        assert!(body["data"].get("apiKey").is_none());

        let (status, body) = server
            .send(
                reqwest::Method::PUT,
                "/websites/update",
                &site.api_key,
                Some(json!({"owner": {"email": "nope"}})),
            )
            .await;
        assert_eq!(status, 400);
        assert_eq!(body["errors"][0]["field"], "owner.email");

        // Deactivating a site locks its key out.
        let (status, _) = server
            .send(
                reqwest::Method::PUT,
                "/websites/update",
                &site.api_key,
                Some(json!({"status": "inactive"})),
            )
            .await;
        assert_eq!(status, 200);
        let (status, body) = server.get("/websites/details", &site.api_key).await;
        assert_eq!(status, 401);
        assert_eq!(body["message"], "Invalid API key or website is inactive");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_regenerate_key_and_delete() {
        let server = TestServer::start().await;
        let site = server.register("rotate.io").await;

        let (status, body) = server
            .send(
                reqwest::Method::POST,
                "/websites/regenerate-api-key",
                &site.api_key,
                None,
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(body["data"]["websiteId"], site.website_id.as_str());
        let new_key = body["data"]["newApiKey"].as_str().unwrap().to_string();
        assert_eq!(new_key.len(), 64);
        assert_ne!(new_key, site.api_key);

        let (old, _) = server.get("/websites/details", &site.api_key).await;
        assert_eq!(old, 401);
        let (new, _) = server.get("/websites/details", &new_key).await;
        assert_eq!(new, 200);

        let (status, body) = server
            .send(reqwest::Method::DELETE, "/websites/delete", &new_key, None)
            .await;
        assert_eq!(status, 200);
        assert_eq!(body, json!({"success": true, "message": "Website deleted successfully"}));

        let rejected = server
            .transport(&new_key)
            .submit_one(&record(EventType::PageView, "alice"))
            .await
            .unwrap_err();
        assert!(matches!(rejected, TransportError::Server { status: 401, .. }));

        // The domain stays taken after a soft delete.
        let err = register_website(
            &server.base_url(),
            &RegisterRequest {
                name: "Again".to_string(),
                domain: "rotate.io".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), Some(409));

        server.shutdown();
    }

    #[tokio::test]
    async fn test_website_and_event_analytics() {
        let server = TestServer::start().await;
        let site = server.register("analytics.io").await;

        let batch = vec![
            page_view("alice", "https://analytics.io/", "Home"),
            page_view("bob", "https://analytics.io/", "Home"),
            page_view("bob", "https://analytics.io/mint", "Mint"),
            record(EventType::WalletConnect, "alice").with_wallet(None, Some(WalletType::Phantom)),
            record(EventType::WalletConnect, "bob").with_wallet(None, Some(WalletType::Metamask)),
            record(EventType::TransactionComplete, "alice"),
        ];
        server
            .transport(&site.api_key)
            .submit_batch(&batch)
            .await
            .expect("Failed to track batch");

        let (status, body) = server.get("/websites/analytics", &site.api_key).await;
        assert_eq!(status, 200);
        let data = &body["data"];
        assert_eq!(
            data["overview"],
            json!({
                "totalEvents": 6,
                "uniqueUsers": 2,
                "uniqueSessions": 2,
                "walletConnections": 2,
                "transactions": 1,
                "conversionRate": 50.0,
                "recentEvents": 6
            })
        );
        assert_eq!(
            data["eventTypeBreakdown"][0],
            json!({"_id": "page_view", "count": 3})
        );
        assert_eq!(
            data["topPages"][0],
            json!({"_id": "https://analytics.io/", "count": 2, "title": "Home"})
        );

        let (status, body) = server.get("/events/analytics", &site.api_key).await;
        assert_eq!(status, 200);
        assert_eq!(body["success"], true);
        assert_eq!(body["totalEvents"], 6);
        let recent = body["recentEvents"].as_array().unwrap();
        assert_eq!(recent.len(), 6);
        assert_eq!(recent[0]["eventType"], "transaction_complete");
        assert_eq!(
            body["eventTypeCounts"][0],
            json!({"_id": "page_view", "count": 3})
        );

        server.shutdown();
    }

    #[tokio::test]
    async fn test_tracker_delivers_to_server() {
        let server = TestServer::start().await;
        let site = server.register("tracker.io").await;

        let config = TrackerConfig::new(site.website_id.clone(), site.api_key.clone());
        let tracker = Tracker::connect(config, &server.base_url()).unwrap();
        tracker.init().unwrap();

        // The initial page view plus nine more fill a batch.
        for n in 0..9 {
            tracker.track_custom_event(&format!("step-{n}"), Default::default());
        }

        let mut delivered = 0;
        for _ in 0..50 {
            let (_, body) = server.get("/events/events", &site.api_key).await;
            delivered = body["data"]["pagination"]["total"].as_u64().unwrap();
            if delivered == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(delivered, 10);

        tracker.track_wallet_connect("0x52908400098527886E0F7030069857D2E4169EE7", None);
        tracker.track_button_click(None, Default::default());
        let session_id = tracker.session_id().to_string();
        let stats = tracker.close().await;
        assert_eq!(stats.events_delivered, 12);
        assert_eq!(stats.events_dropped, 0);

        let (_, body) = server
            .get(&format!("/events/events?sessionId={session_id}&limit=100"), &site.api_key)
            .await;
        assert_eq!(body["data"]["pagination"]["total"], 12);

        let (_, stats) = server.get("/events/stats", &site.api_key).await;
        assert_eq!(stats["data"]["walletStats"], json!([{"_id": "other", "count": 1}]));

        server.shutdown();
    }
}
