//! Streamed transfer tests: chunked upload with a declared length and
//! chunked download written straight to disk.

mod common;

use std::fs;

use common::{blocking, ntlm_challenge_header, ntlm_message_type, test_config};
use qsense::{Identity, Params, RequestDriver};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_upload_declares_length_and_streams_whole_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qrs/app/upload"))
        .and(query_param("name", "Sales"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    // 2.5 blocks at a 1 KiB block size
    let payload: Vec<u8> = (0..2560u32).map(|i| (i % 251) as u8).collect();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sales.qvf");
    fs::write(&source, &payload).unwrap();

    let config = test_config(&server.uri()).chunk_size(1024);
    let outcome = blocking(move || {
        let driver = RequestDriver::new(config).unwrap();
        driver.upload("/qrs/app/upload", &source, &Params::new().set("name", "Sales"))
    })
    .await
    .unwrap();
    assert!(outcome.ok());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.body, payload);
    assert_eq!(
        request.headers.get("content-length").unwrap(),
        &payload.len().to_string()
    );
    assert!(request.headers.get("transfer-encoding").is_none());
    assert_eq!(
        request.headers.get("content-type").unwrap(),
        "application/vnd.qlik.sense.app"
    );
}

#[tokio::test]
async fn test_download_writes_body_to_file() {
    let body: Vec<u8> = (0..100_000u32).map(|i| (i % 239) as u8).collect();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/qrs/download/app/a1/t1/out.qvf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.qvf");

    let config = test_config(&server.uri()).chunk_size(4096);
    let target_clone = target.clone();
    let outcome = blocking(move || {
        let driver = RequestDriver::new(config).unwrap();
        driver.download("/qrs/download/app/a1/t1/out.qvf", &target_clone, &Params::new())
    })
    .await
    .unwrap();

    assert!(outcome.ok());
    // the body went to disk, not into the outcome
    assert!(outcome.bytes().is_empty());
    assert_eq!(fs::read(&target).unwrap(), body);
}

#[tokio::test]
async fn test_download_answers_ntlm_challenge() {
    let body = b"qvf bytes".to_vec();

    let server = MockServer::start().await;
    // first hit gets the Type 2 challenge, the authenticated retry the body
    Mock::given(method("GET"))
        .and(path("/qrs/download/app/a1/t1/out.qvf"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", ntlm_challenge_header().as_str()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/qrs/download/app/a1/t1/out.qvf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.qvf");

    let config =
        test_config(&server.uri()).user(Identity::with_password("CORP", "jdoe", "secret"));
    let target_clone = target.clone();
    let outcome = blocking(move || {
        let driver = RequestDriver::new(config).unwrap();
        driver.download("/qrs/download/app/a1/t1/out.qvf", &target_clone, &Params::new())
    })
    .await
    .unwrap();
    assert!(outcome.ok());
    assert_eq!(fs::read(&target).unwrap(), body);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    let retry_auth = requests[1].headers.get("authorization").unwrap().to_str().unwrap();
    assert_eq!(ntlm_message_type(retry_auth), 3);
}

#[tokio::test]
async fn test_upload_answers_ntlm_challenge_and_restreams() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qrs/app/upload"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("WWW-Authenticate", ntlm_challenge_header().as_str()),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/qrs/app/upload"))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let payload = b"app archive bytes".to_vec();
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sales.qvf");
    fs::write(&source, &payload).unwrap();

    let config =
        test_config(&server.uri()).user(Identity::with_password("CORP", "jdoe", "secret"));
    let outcome = blocking(move || {
        let driver = RequestDriver::new(config).unwrap();
        driver.upload("/qrs/app/upload", &source, &Params::new().set("name", "Sales"))
    })
    .await
    .unwrap();
    assert!(outcome.ok());

    // the file is reopened for the retry, so both hits carry the full body
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].body, payload);
    let retry_auth = requests[1].headers.get("authorization").unwrap().to_str().unwrap();
    assert_eq!(ntlm_message_type(retry_auth), 3);
}

#[tokio::test]
async fn test_download_reports_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/qrs/download/app/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("gone.qvf");

    let config = test_config(&server.uri());
    let target_clone = target.clone();
    let outcome = blocking(move || {
        let driver = RequestDriver::new(config).unwrap();
        driver.download("/qrs/download/app/gone", &target_clone, &Params::new())
    })
    .await
    .unwrap();
    assert_eq!(outcome.status().as_u16(), 404);
    assert!(!outcome.ok());
}
