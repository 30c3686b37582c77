//! Integration tests using wiremock to simulate the API and its token endpoint.

use cloudcall::credentials::{CredentialChain, RemoteProvider, StaticProvider};
use cloudcall::handler::{NamedHandler, BEARER_TOKEN};
use cloudcall::{
    CallContext, CallOptions, Error, ErrorKind, Operation, Pipeline, PipelineBuilder,
    ReqwestTransport, Response, ResultCacheConfig, RetryPolicy,
};
use http::{HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
struct Instance {
    id: String,
    name: String,
}

fn fast_retries(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        jitter: false,
        respect_retry_after: true,
    }
}

/// Routes library logs to the test output; filter with `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn builder(server: &MockServer) -> PipelineBuilder {
    init_tracing();
    Pipeline::builder()
        .base_url(server.uri())
        .unwrap()
        .retry_policy(fast_retries(3))
}

fn static_chain() -> Arc<CredentialChain> {
    Arc::new(CredentialChain::new(vec![Arc::new(StaticProvider::new(
        "client-1", "s3cret",
    ))]))
}

/// Mounts a token endpoint issuing `tok-0`, `tok-1`, ... and returns its call counter.
async fn mount_token_endpoint(server: &MockServer) -> Arc<AtomicUsize> {
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = issued.clone();

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_json(json!({
            "client_id": "client-1",
            "client_secret": "s3cret",
            "grant_type": "client_credentials"
        })))
        .respond_with(move |_req: &wiremock::Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200).set_body_json(json!({
                "access_token": format!("tok-{}", n),
                "expires_in": 3600,
                "token_type": "Bearer"
            }))
        })
        .mount(server)
        .await;

    issued
}

fn signed(server: &MockServer) -> PipelineBuilder {
    builder(server)
        .credentials(static_chain())
        .token_endpoint(format!("{}/oauth/token", server.uri()))
        .unwrap()
}

#[tokio::test]
async fn test_get_with_path_and_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/projects/p-1/instances"))
        .and(query_param("status", "running"))
        .and(query_param("tag", "web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": "i-1", "name": "alpha"}
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/projects/{project}/instances")
        .query("status")
        .query("tag");

    let response: Response<Vec<Instance>> = pipeline
        .execute(
            &list,
            &json!({"project": "p-1", "status": "running", "tag": ["web"], "page": null}),
        )
        .await
        .unwrap();

    assert_eq!(response.data.len(), 1);
    assert_eq!(response.data[0].name, "alpha");
    assert_eq!(response.status.as_u16(), 200);
    assert_eq!(response.attempts, 1);
    assert!(!response.was_retried());
}

#[tokio::test]
async fn test_post_body_excludes_tagged_fields() {
    let mock_server = MockServer::start().await;

    #[derive(Serialize)]
    struct CreateInstance {
        project: String,
        request_id: String,
        name: String,
    }

    Mock::given(method("POST"))
        .and(path("/projects/p-1/instances"))
        .and(header("x-request-id", "req-42"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({"name": "beta"})))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(json!({"id": "i-2", "name": "beta"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let create = Operation::new("CreateInstance", Method::POST, "/projects/{project}/instances")
        .header("request_id", HeaderName::from_static("x-request-id"));

    let response: Response<Instance> = pipeline
        .execute(
            &create,
            &CreateInstance {
                project: "p-1".to_string(),
                request_id: "req-42".to_string(),
                name: "beta".to_string(),
            },
        )
        .await
        .unwrap();

    assert_eq!(response.data.id, "i-2");
    assert_eq!(response.status.as_u16(), 201);
}

#[tokio::test]
async fn test_retry_on_5xx() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    // First two requests fail with 503, third succeeds
    Mock::given(method("GET"))
        .and(path("/instances/i-1"))
        .respond_with(move |_req: &wiremock::Request| {
            let count = attempt_count_clone.fetch_add(1, Ordering::SeqCst);
            if count < 2 {
                ResponseTemplate::new(503).set_body_string("Service unavailable")
            } else {
                ResponseTemplate::new(200).set_body_json(json!({"id": "i-1", "name": "alpha"}))
            }
        })
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let get = Operation::new("GetInstance", Method::GET, "/instances/{id}");

    let response: Response<Instance> = pipeline.execute(&get, &json!({"id": "i-1"})).await.unwrap();

    assert_eq!(response.data.name, "alpha");
    assert_eq!(response.attempts, 3);
    assert!(response.was_retried());
    assert_eq!(attempt_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_bound() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Server error"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    let err = pipeline.execute::<_, Value>(&list, &()).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    assert_eq!(err.api_error().unwrap().message, "status 500: Server error");
}

#[tokio::test]
async fn test_client_error_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instances/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 4040,
            "message": "instance not found",
            "details": "no instance with id missing"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let get = Operation::new("GetInstance", Method::GET, "/instances/{id}");

    let result = pipeline
        .execute::<_, Instance>(&get, &json!({"id": "missing"}))
        .await;

    match result {
        Err(Error::Validation { api }) => {
            assert_eq!(api.status.as_u16(), 404);
            assert_eq!(api.code, 4040);
            assert_eq!(api.message, "instance not found");
            assert_eq!(api.details.as_deref(), Some("no instance with id missing"));
        }
        _ => panic!("Expected Validation, got {:?}", result),
    }
}

#[tokio::test]
async fn test_non_envelope_error_falls_back() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server)
        .retry_policy(RetryPolicy::none())
        .build()
        .unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    let err = pipeline.execute::<_, Value>(&list, &()).await.unwrap_err();
    let api = err.api_error().unwrap();

    assert_eq!(api.code, 502);
    assert_eq!(api.message, "status 502: <html>bad gateway</html>");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_deserialization_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instances/i-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("invalid json"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let get = Operation::new("GetInstance", Method::GET, "/instances/{id}");

    let result = pipeline
        .execute::<_, Instance>(&get, &json!({"id": "i-1"}))
        .await;

    match result {
        Err(Error::Deserialization {
            raw_response,
            message,
            status,
        }) => {
            assert_eq!(status.as_u16(), 200);
            assert_eq!(raw_response, "invalid json");
            assert!(message.contains("expected"));
        }
        _ => panic!("Expected Deserialization, got {:?}", result),
    }
}

#[tokio::test]
async fn test_plain_text_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instances/i-1/console"))
        .respond_with(ResponseTemplate::new(200).set_body_string("wss://console.example.com/abc"))
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let console =
        Operation::new("GetConsoleUrl", Method::GET, "/instances/{id}/console").plain_text();

    let response: Response<String> = pipeline
        .execute(&console, &json!({"id": "i-1"}))
        .await
        .unwrap();

    assert_eq!(response.data, "wss://console.example.com/abc");
}

#[tokio::test]
async fn test_empty_success_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/instances/i-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let delete = Operation::new("DeleteInstance", Method::DELETE, "/instances/{id}");

    let unit: Response<()> = pipeline.execute(&delete, &json!({"id": "i-1"})).await.unwrap();
    assert_eq!(unit.status.as_u16(), 204);

    let mut target = Instance {
        id: "keep".to_string(),
        name: "me".to_string(),
    };
    pipeline
        .execute_into(&delete, &json!({"id": "i-1"}), CallOptions::new(), &mut target)
        .await
        .unwrap();
    assert_eq!(target.id, "keep");
}

#[tokio::test]
async fn test_rate_limited_then_success() {
    let mock_server = MockServer::start().await;
    let attempt_count = Arc::new(AtomicUsize::new(0));
    let attempt_count_clone = attempt_count.clone();

    Mock::given(method("GET"))
        .and(path("/instances"))
        .respond_with(move |_req: &wiremock::Request| {
            if attempt_count_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "0")
                    .set_body_json(json!({"code": 429, "message": "slow down"}))
            } else {
                ResponseTemplate::new(200).set_body_json(json!([]))
            }
        })
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    let response: Response<Vec<Instance>> = pipeline.execute(&list, &()).await.unwrap();

    assert!(response.data.is_empty());
    assert_eq!(response.attempts, 2);
}

#[tokio::test]
async fn test_bearer_token_attached() {
    let mock_server = MockServer::start().await;
    let issued = mount_token_endpoint(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .and(header("authorization", "Bearer tok-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(2)
        .mount(&mock_server)
        .await;

    let pipeline = signed(&mock_server).build().unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    pipeline.execute::<_, Value>(&list, &()).await.unwrap();
    pipeline.execute::<_, Value>(&list, &()).await.unwrap();

    // The cached token is reused.
    assert_eq!(issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unauthorized_refreshes_token_once() {
    let mock_server = MockServer::start().await;
    let issued = mount_token_endpoint(&mock_server).await;
    let api_calls = Arc::new(AtomicUsize::new(0));
    let api_calls_clone = api_calls.clone();

    Mock::given(method("GET"))
        .and(path("/instances"))
        .respond_with(move |req: &wiremock::Request| {
            api_calls_clone.fetch_add(1, Ordering::SeqCst);
            let auth = req
                .headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if auth == "Bearer tok-0" {
                ResponseTemplate::new(401)
                    .set_body_json(json!({"code": 401, "message": "token revoked"}))
            } else {
                ResponseTemplate::new(200).set_body_json(json!([]))
            }
        })
        .mount(&mock_server)
        .await;

    let pipeline = signed(&mock_server).build().unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    let response: Response<Value> = pipeline.execute(&list, &()).await.unwrap();

    assert_eq!(response.attempts, 2);
    assert_eq!(issued.load(Ordering::SeqCst), 2);
    assert_eq!(api_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_unauthorized_is_final() {
    let mock_server = MockServer::start().await;
    let issued = mount_token_endpoint(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"code": 401, "message": "denied"})),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let pipeline = signed(&mock_server)
        .retry_policy(fast_retries(5))
        .build()
        .unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    let err = pipeline.execute::<_, Value>(&list, &()).await.unwrap_err();

    match &err {
        Error::Authentication { api, after_refresh } => {
            assert!(*after_refresh);
            assert_eq!(api.message, "denied");
        }
        other => panic!("Expected Authentication, got {:?}", other),
    }
    assert!(!err.is_retryable());
    assert_eq!(issued.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_one_token_exchange() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "shared", "expires_in": 3600}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .and(header("authorization", "Bearer shared"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(50)
        .mount(&mock_server)
        .await;

    let pipeline = signed(&mock_server).build().unwrap();
    let list = Arc::new(Operation::new("ListInstances", Method::GET, "/instances"));

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let pipeline = pipeline.clone();
            let list = list.clone();
            tokio::spawn(async move { pipeline.execute::<_, Value>(&list, &()).await })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn test_token_endpoint_rejection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"code": 40101, "message": "invalid client"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = signed(&mock_server).build().unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    let err = pipeline.execute::<_, Value>(&list, &()).await.unwrap_err();

    assert!(matches!(err, Error::TokenExchange { .. }));
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_remote_credentials_provider() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/credentials"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"client_id": "client-1", "client_secret": "s3cret"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .and(header("authorization", "Bearer tok-0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&mock_server)
        .await;

    let remote = RemoteProvider::new(
        Url::parse(&format!("{}/credentials", mock_server.uri())).unwrap(),
        Arc::new(ReqwestTransport::new(None).unwrap()),
    );
    let chain = Arc::new(CredentialChain::new(vec![Arc::new(remote)]));
    let pipeline = builder(&mock_server)
        .credentials(chain.clone())
        .token_endpoint(format!("{}/oauth/token", mock_server.uri()))
        .unwrap()
        .build()
        .unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    pipeline.execute::<_, Value>(&list, &()).await.unwrap();

    assert_eq!(chain.resolve().await.unwrap().provider, "remote");
}

#[tokio::test]
async fn test_idempotent_concurrent_calls_share_result() {
    let mock_server = MockServer::start().await;
    let served = Arc::new(AtomicUsize::new(0));
    let served_clone = served.clone();

    Mock::given(method("GET"))
        .and(path("/projects/p-1/instances"))
        .respond_with(move |_req: &wiremock::Request| {
            let n = served_clone.fetch_add(1, Ordering::SeqCst);
            ResponseTemplate::new(200)
                .set_body_json(json!([{"id": format!("i-{}", n), "name": "alpha"}]))
                .set_delay(Duration::from_millis(100))
        })
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server)
        .result_cache(ResultCacheConfig::default())
        .build()
        .unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/projects/{project}/instances")
        .idempotent();
    let params = json!({"project": "p-1"});

    let (first, second) = tokio::join!(
        pipeline.execute::<_, Vec<Instance>>(&list, &params),
        pipeline.execute::<_, Vec<Instance>>(&list, &params),
    );

    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.data, second.data);
    assert_eq!(first.data[0].id, "i-0");
    pipeline.close().await;
}

#[tokio::test]
async fn test_idempotent_errors_are_replayed() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instances/gone"))
        .respond_with(
            ResponseTemplate::new(410).set_body_json(json!({"code": 410, "message": "gone"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server)
        .result_cache(ResultCacheConfig::default())
        .build()
        .unwrap();
    let get = Operation::new("GetInstance", Method::GET, "/instances/{id}").idempotent();

    let first = pipeline
        .execute::<_, Value>(&get, &json!({"id": "gone"}))
        .await
        .unwrap_err();
    let second = pipeline
        .execute::<_, Value>(&get, &json!({"id": "gone"}))
        .await
        .unwrap_err();

    assert_eq!(first.api_error(), second.api_error());
}

#[tokio::test]
async fn test_cancellation_interrupts_send() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server).build().unwrap();
    let slow = Operation::new("Slow", Method::GET, "/slow");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let err = pipeline
        .execute_with::<_, Value>(&slow, &(), CallOptions::new().with_cancellation(cancel))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled));
    assert_eq!(err.kind(), ErrorKind::Cancellation);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_deadline_covers_retries() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server)
        .retry_policy(RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(1),
            multiplier: 1.0,
            jitter: false,
            respect_retry_after: false,
        })
        .build()
        .unwrap();
    let flaky = Operation::new("Flaky", Method::GET, "/flaky");

    let started = Instant::now();
    let err = pipeline
        .execute_with::<_, Value>(
            &flaky,
            &(),
            CallOptions::new().with_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_custom_handler_in_sign_stage() {
    let mock_server = MockServer::start().await;
    mount_token_endpoint(&mock_server).await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .and(header("authorization", "Bearer tok-0"))
        .and(header("x-tenant", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = signed(&mock_server)
        .handlers(|h| {
            h.sign.insert_after(
                BEARER_TOKEN,
                NamedHandler::new("test.Tenant", |cx: &mut CallContext| {
                    if let Some(request) = cx.request.as_mut() {
                        request
                            .headers
                            .insert("x-tenant", HeaderValue::from_static("acme"));
                    }
                }),
            );
        })
        .build()
        .unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");

    assert_eq!(
        pipeline.handlers().sign.names(),
        vec![BEARER_TOKEN, "test.Tenant"]
    );
    pipeline.execute::<_, Value>(&list, &()).await.unwrap();
}

#[tokio::test]
async fn test_call_options_override_headers_and_query() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/instances"))
        .and(header("user-agent", "per-call"))
        .and(query_param("trace", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let pipeline = builder(&mock_server)
        .default_header("User-Agent", "cloudcall-tests")
        .unwrap()
        .build()
        .unwrap();
    let list = Operation::new("ListInstances", Method::GET, "/instances");
    let options = CallOptions::new()
        .with_header("user-agent", "per-call")
        .unwrap()
        .with_query_param("trace", "1");

    pipeline
        .execute_with::<_, Value>(&list, &(), options)
        .await
        .unwrap();
}
