use authclient_lib::http::{Dispatcher, HttpError, ReqwestDispatcher, RequestDescriptor};
use reqwest::Url;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dispatcher(uri: &str, timeout: Duration) -> ReqwestDispatcher {
    ReqwestDispatcher::new(&Url::parse(uri).unwrap(), timeout).unwrap()
}

#[tokio::test]
async fn success_returns_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": 42 })))
        .mount(&server)
        .await;

    let res = dispatcher(&server.uri(), Duration::from_secs(5))
        .dispatch(&RequestDescriptor::get("/data"))
        .await
        .unwrap();

    assert_eq!(res.status, 200);
    assert_eq!(res.json::<serde_json::Value>().unwrap(), json!({ "value": 42 }));
}

#[tokio::test]
async fn forwards_headers_and_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/things"))
        .and(header("authorization", "Bearer abc"))
        .and(body_json(json!({ "name": "x" })))
        .respond_with(ResponseTemplate::new(201).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let mut req = RequestDescriptor::post("/things", json!({ "name": "x" }));
    req.bearer("abc");
    let res = dispatcher(&server.uri(), Duration::from_secs(5))
        .dispatch(&req)
        .await
        .unwrap();

    assert_eq!(res.status, 201);
}

#[tokio::test]
async fn classifies_401_separately_from_other_failures() {
    let server = MockServer::start().await;
    Mock::given(path("/protected"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;
    Mock::given(path("/broken"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    let dispatcher = dispatcher(&server.uri(), Duration::from_secs(5));

    let err = dispatcher
        .dispatch(&RequestDescriptor::get("/protected"))
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Unauthorized { ref body } if body == "expired"));

    let err = dispatcher
        .dispatch(&RequestDescriptor::get("/broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, HttpError::Status { status: 503, .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn slow_responses_surface_as_timed_out_transport_errors() {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let err = dispatcher(&server.uri(), Duration::from_millis(50))
        .dispatch(&RequestDescriptor::get("/slow"))
        .await
        .unwrap_err();

    assert!(matches!(err, HttpError::Transport { timed_out: true, .. }));
    assert_eq!(err.status(), None);
}
