#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::time::Duration;

    use serial_test::serial;
    use tempfile::TempDir;

    use crate::config::Config;
    use crate::credential::{secret_from_env_file, CredentialProvider, MintingHelper, StaticCredential};
    use crate::flag::{FlagEnvelope, UpdateRequest};
    use crate::probes::{is_safe_input, is_safe_input_with, Probes};
    use crate::report::{Outcome, Report};
    use crate::store::{FlagStore, MemoryStore};
    use crate::{AdminCredentialResolver, Client, ContractError};

    fn client_for(url: &str) -> Client {
        Client::builder()
            .with_base_url(url)
            .with_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build test client")
    }

    fn config_without_credentials(dir: &TempDir) -> Config {
        Config {
            env_file: dir.path().join("missing.env"),
            ..Config::default()
        }
    }

    fn sh(script: &str) -> MintingHelper {
        let command = vec!["sh".to_string(), "-c".to_string(), script.to_string()];
        MintingHelper::new(&command).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_vars(Vec::<(String, String)>::new()).unwrap();

        assert_eq!(config.base_url, "http://localhost:3000");
        assert_eq!(config.api_prefix, "/api");
        assert_eq!(config.flag_key, "ENABLE_CHECKOUT_TIMER");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.stress_workers, 8);
        assert_eq!(config.stress_requests, 40);
        assert_eq!(config.token_helper, vec!["node", "tools/gen_admin_jwt.js"]);
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn test_config_overrides_from_vars() {
        let config = Config::from_vars(vec![
            ("BASE_URL", "http://staging:8080"),
            ("API_PREFIX", "/v2/api"),
            ("ADMIN_TOKEN", " abc.def.ghi "),
            ("JWT_SECRET", ""),
            ("ADMIN_TOKEN_HELPER", "deno run mint.ts"),
            ("FLAG_KEY", "ENABLE_VIEWING_COUNT"),
            ("REQUEST_TIMEOUT_SECS", "3"),
        ])
        .unwrap();

        assert_eq!(config.base_url, "http://staging:8080");
        assert_eq!(config.api_prefix, "/v2/api");
        assert_eq!(config.admin_token.as_deref(), Some("abc.def.ghi"));
        assert!(config.jwt_secret.is_none());
        assert_eq!(config.token_helper, vec!["deno", "run", "mint.ts"]);
        assert_eq!(config.flag_key, "ENABLE_VIEWING_COUNT");
        assert_eq!(config.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_config_rejects_bad_timeout() {
        let err = Config::from_vars(vec![("REQUEST_TIMEOUT_SECS", "soon")]).unwrap_err();
        assert!(matches!(err, ContractError::Config(_)));

        let err = Config::from_vars(vec![("REQUEST_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ContractError::Config(_)));
    }

    #[test]
    fn test_client_rejects_invalid_base_url() {
        let result = Client::builder().with_base_url("not a url").build();
        assert!(matches!(result, Err(ContractError::Config(_))));
    }

    #[test]
    fn test_flag_envelope_shapes() {
        let wrapped: FlagEnvelope =
            serde_json::from_str(r#"{"flag": {"key": "A", "enabled": true}}"#).unwrap();
        let flag = wrapped.into_flag();
        assert_eq!(flag.key.as_deref(), Some("A"));
        assert!(flag.enabled);

        let bare: FlagEnvelope = serde_json::from_str(
            r#"{"key": "B", "enabled": false, "description": null, "updatedAt": "2024-05-01T10:00:00.000Z"}"#,
        )
        .unwrap();
        let flag = bare.into_flag();
        assert!(!flag.enabled);
        assert!(flag.description.is_none());
        assert!(flag.updated_at.is_some());
    }

    #[test]
    fn test_update_request_serialization() {
        let body = serde_json::to_value(UpdateRequest::enabled(true)).unwrap();
        assert_eq!(body, serde_json::json!({ "enabled": true }));

        let body = serde_json::to_value(UpdateRequest::enabled(false).with_description("temporary test flag")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({ "enabled": false, "description": "temporary test flag" })
        );
    }

    #[tokio::test]
    async fn test_client_uses_prefix_and_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/app/v2/feature-flags/ENABLE_CHECKOUT_TIMER")
            .match_header("authorization", "Bearer secret-token")
            .match_body(mockito::Matcher::Json(serde_json::json!({ "enabled": true })))
            .with_status(204)
            .create_async()
            .await;

        let client = Client::builder()
            .with_base_url(&format!("{}/app/", server.url()))
            .with_api_prefix("/v2")
            .build()
            .unwrap();

        let reply = client
            .put_flag("ENABLE_CHECKOUT_TIMER", &UpdateRequest::enabled(true), Some("secret-token"))
            .await
            .unwrap();

        assert_eq!(reply.code(), 204);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_typed_reads() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/feature-flags")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"flags": {"ENABLE_CHECKOUT_TIMER": {"enabled": false, "description": "timer", "updatedAt": null}}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/feature-flags/MISSING")
            .with_status(404)
            .with_body(r#"{"error": "Feature flag not found"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/feature-flags/BROKEN")
            .with_status(200)
            .with_body("<html>oops</html>")
            .create_async()
            .await;

        let client = client_for(&server.url());

        let list = client.flags().await.unwrap();
        assert!(list.contains("ENABLE_CHECKOUT_TIMER"));
        assert_eq!(
            list.get("ENABLE_CHECKOUT_TIMER").unwrap().description.as_deref(),
            Some("timer")
        );

        assert!(client.flag("MISSING").await.unwrap().is_none());

        let err = client.flag("BROKEN").await.unwrap_err();
        assert!(matches!(err, ContractError::DecodeError { .. }), "{}", err);
    }

    #[tokio::test]
    async fn test_client_reports_server_errors() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/feature-flags")
            .with_status(503)
            .with_body("maintenance")
            .create_async()
            .await;

        let client = client_for(&server.url());
        match client.flags().await {
            Err(ContractError::StatusError { status, body, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {:?}", other.map(|l| l.flags.len())),
        }
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();

        assert!(store.get("ENABLE_CHECKOUT_TIMER").await.unwrap().is_none());
        assert!(!store.is_enabled("ENABLE_CHECKOUT_TIMER").await);

        store.set("ENABLE_CHECKOUT_TIMER", true).await.unwrap();
        let flag = store.get("ENABLE_CHECKOUT_TIMER").await.unwrap().unwrap();
        assert!(flag.enabled);
        assert_eq!(flag.key.as_deref(), Some("ENABLE_CHECKOUT_TIMER"));
        assert!(flag.updated_at.is_some());

        store.set("ENABLE_CHECKOUT_TIMER", false).await.unwrap();
        assert!(!store.is_enabled("ENABLE_CHECKOUT_TIMER").await);
        assert_eq!(store.all().await.unwrap().len(), 1);

        let removed = store.remove("ENABLE_CHECKOUT_TIMER").await.unwrap();
        assert!(removed.is_some());
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_seeded_store_toggles() {
        let store = MemoryStore::seeded([("view_count", true), ("countdown", false)]);

        assert!(store.is_enabled("view_count").await);
        assert!(!store.is_enabled("countdown").await);

        store.set("view_count", false).await.unwrap();
        store.set("countdown", true).await.unwrap();

        assert!(!store.is_enabled("view_count").await);
        assert!(store.is_enabled("countdown").await);
    }

    #[test]
    fn test_secret_from_env_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "PORT=3000\n  JWT_SECRET=s3cret  \nDB_HOST=localhost\n").unwrap();
        assert_eq!(secret_from_env_file(&path).as_deref(), Some("s3cret"));

        fs::write(&path, "JWT_SECRET=\n").unwrap();
        assert!(secret_from_env_file(&path).is_none());

        assert!(secret_from_env_file(&dir.path().join("absent.env")).is_none());
    }

    #[tokio::test]
    async fn test_static_credential() {
        assert_eq!(StaticCredential::new("abc").credential().await.as_deref(), Some("abc"));
        assert!(StaticCredential::none().credential().await.is_none());
    }

    #[tokio::test]
    async fn test_explicit_token_wins() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            admin_token: Some("explicit".to_string()),
            jwt_secret: Some("unused".to_string()),
            ..config_without_credentials(&dir)
        };

        let resolver = AdminCredentialResolver::from_config(&config)
            .with_helper(sh("echo minted"))
            .with_export(false);

        assert_eq!(resolver.credential().await.as_deref(), Some("explicit"));
    }

    #[tokio::test]
    async fn test_no_secret_means_unavailable() {
        let dir = TempDir::new().unwrap();
        let resolver = AdminCredentialResolver::from_config(&config_without_credentials(&dir))
            .with_helper(sh("echo minted"))
            .with_export(false);

        assert!(resolver.credential().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_mints_from_env_file_secret() {
        let dir = TempDir::new().unwrap();
        let env_file = dir.path().join(".env");
        fs::write(&env_file, "JWT_SECRET=from-file\n").unwrap();
        let config = Config {
            env_file,
            ..Config::default()
        };

        let resolver = AdminCredentialResolver::from_config(&config)
            .with_helper(sh(r#"printf '%s-minted\n' "$JWT_SECRET""#))
            .with_export(false);

        assert_eq!(resolver.credential().await.as_deref(), Some("from-file-minted"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_failures_are_unavailable() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            jwt_secret: Some("s3cret".to_string()),
            ..config_without_credentials(&dir)
        };

        for script in ["echo partial; exit 3", "true", "   "] {
            let resolver = AdminCredentialResolver::from_config(&config)
                .with_helper(sh(script))
                .with_export(false);
            assert!(resolver.credential().await.is_none(), "script {:?}", script);
        }

        let missing = MintingHelper::new(&["definitely-not-a-real-binary-xyz".to_string()]).unwrap();
        let resolver = AdminCredentialResolver::from_config(&config)
            .with_helper(missing)
            .with_export(false);
        assert!(resolver.credential().await.is_none());
    }

    #[tokio::test]
    async fn test_secret_without_helper_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            jwt_secret: Some("s3cret".to_string()),
            token_helper: Vec::new(),
            ..config_without_credentials(&dir)
        };

        let resolver = AdminCredentialResolver::from_config(&config).with_export(false);
        assert!(resolver.credential().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_helper_timeout_is_unavailable() {
        let helper = sh("sleep 5; echo late").with_timeout(Duration::from_millis(200));
        let err = helper.mint("s3cret").await.unwrap_err();
        assert!(matches!(err, ContractError::CredentialError(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_resolution_is_cached() {
        let dir = TempDir::new().unwrap();
        let counter = dir.path().join("calls");
        let config = Config {
            jwt_secret: Some("s3cret".to_string()),
            ..config_without_credentials(&dir)
        };

        let script = format!("echo call >> '{}'; echo tok", counter.display());
        let resolver = AdminCredentialResolver::from_config(&config)
            .with_helper(sh(&script))
            .with_export(false);

        assert_eq!(resolver.credential().await.as_deref(), Some("tok"));
        assert_eq!(resolver.credential().await.as_deref(), Some("tok"));
        assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_minted_token_is_exported() {
        env::remove_var("ADMIN_TOKEN");
        let dir = TempDir::new().unwrap();
        let config = Config {
            jwt_secret: Some("s3cret".to_string()),
            ..config_without_credentials(&dir)
        };

        let resolver = AdminCredentialResolver::from_config(&config).with_helper(sh("echo exported-token"));
        assert_eq!(resolver.credential().await.as_deref(), Some("exported-token"));
        assert_eq!(env::var("ADMIN_TOKEN").unwrap(), "exported-token");

        // A later resolver built from the environment takes the explicit path.
        let config = Config::from_env().unwrap();
        assert_eq!(config.admin_token.as_deref(), Some("exported-token"));

        env::remove_var("ADMIN_TOKEN");
    }

    #[test]
    fn test_is_safe_input() {
        assert!(!is_safe_input("' OR 1=1 --"));
        assert!(!is_safe_input("<script>alert(1)</script>"));
        assert!(!is_safe_input("<SCRIPT>alert(1)</SCRIPT>"));
        assert!(!is_safe_input("x or 1=1"));
        assert!(is_safe_input("user@gmail.com"));
        assert!(is_safe_input("orange juice"));
    }

    #[test]
    fn test_is_safe_input_with_custom_blacklist() {
        assert!(!is_safe_input_with("DROP TABLE users", &["drop table"]));
        assert!(is_safe_input_with("' OR 1=1 --", &["drop table"]));
        assert!(is_safe_input_with("anything", &[]));
    }

    #[test]
    fn test_report_summary() {
        let mut report = Report::new();
        report.record("a", Outcome::Passed("ok".to_string()));
        report.record("b", Outcome::Skipped("no token".to_string()));
        report.record("c", Err::<Outcome, _>(ContractError::Violation("broken".to_string())));

        assert_eq!(report.passed(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.is_success());
        assert_eq!(report.pass_rate(), 50.0);
        assert_eq!(
            report.outcome("c"),
            Some(&Outcome::Failed("Contract violation: broken".to_string()))
        );

        let text = report.to_string();
        assert!(text.contains("[SKIP] b: no token"));
        assert!(text.ends_with("total: 3, passed: 1, failed: 1, skipped: 1, pass rate: 50.0%"));
    }

    #[test]
    fn test_empty_report_is_success() {
        let report = Report::new();
        assert!(report.is_success());
        assert_eq!(report.pass_rate(), 100.0);
    }

    #[tokio::test]
    async fn test_probes_against_healthy_server() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status": "ok", "timestamp": "2024-05-01T10:00:00Z"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/events")
            .with_status(200)
            .with_body(r#"{"events": [{"id": 1, "title": "Concert"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/events/1")
            .with_status(404)
            .with_body(r#"{"error": "Event not found"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/users/profile")
            .with_status(401)
            .create_async()
            .await;
        server
            .mock("PUT", "/api/users/profile")
            .with_status(401)
            .create_async()
            .await;
        let login = server
            .mock("POST", "/api/users/login")
            .with_status(401)
            .with_body(r#"{"error": "Invalid credentials"}"#)
            .expect(crate::probes::INJECTION_PAYLOADS.len())
            .create_async()
            .await;

        let report = Probes::new(client_for(&server.url())).run().await;

        assert!(report.is_success(), "{}", report);
        assert_eq!(report.passed(), 6);
        login.assert_async().await;
    }

    #[tokio::test]
    async fn test_probe_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/health")
            .with_status(200)
            .with_body(r#"{"status": "DEGRADED"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/events/7")
            .with_status(200)
            .with_body(r#"{"id": 7}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/users/profile")
            .with_status(200)
            .with_body(r#"{"email": "someone@example.com"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/api/users/login")
            .with_status(200)
            .with_body(r#"{"token": "oops"}"#)
            .create_async()
            .await;

        let probes = Probes::new(client_for(&server.url())).with_event_id("7");

        assert!(Outcome::from(probes.check_health().await).is_failed());
        assert!(Outcome::from(probes.check_event_detail().await).is_failed());
        assert!(Outcome::from(probes.check_profile_get().await).is_failed());
        assert!(Outcome::from(probes.check_login_injection().await).is_failed());
    }

    #[tokio::test]
    async fn test_event_detail_reports_field_count() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/events/3")
            .with_status(200)
            .with_body(r#"{"event": {"id": 3, "title": "Concert", "venue": "Hall"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/events/4")
            .with_status(200)
            .with_body(r#"{"event": [3, "Concert"]}"#)
            .create_async()
            .await;

        let found = Probes::new(client_for(&server.url())).with_event_id("3");
        let outcome = Outcome::from(found.check_event_detail().await);
        assert!(outcome.is_passed(), "{:?}", outcome);
        assert_eq!(outcome.detail(), "event 3 found with 3 fields");

        let not_an_object = Probes::new(client_for(&server.url())).with_event_id("4");
        assert!(Outcome::from(not_an_object.check_event_detail().await).is_failed());
    }

    #[tokio::test]
    async fn test_login_server_error_is_a_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/users/login")
            .with_status(500)
            .with_body("syntax error at or near \"OR\"")
            .create_async()
            .await;

        let probes = Probes::new(client_for(&server.url()));
        match probes.check_login_injection().await {
            Err(ContractError::StatusError { status, .. }) => assert_eq!(status, 500),
            other => panic!("expected status error, got {:?}", other),
        }
    }
}
