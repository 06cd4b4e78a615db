//! S3 store integration tests
//!
//! Runs the S3 backend against a mocked HTTP endpoint; no real AWS
//! credentials or network access involved.

use std::io::Cursor;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use spoolgate::config::S3Config;
use spoolgate::spool::spool;
use spoolgate::store::{ObjectStore, S3Store, StoreError};

fn s3_config(endpoint: &str) -> S3Config {
    S3Config {
        bucket: "uploads".into(),
        region: "us-east-1".into(),
        endpoint: Some(endpoint.to_string()),
        access_key: Some("test-access".into()),
        secret_key: Some("test-secret".into()),
        acl: None,
    }
}

#[tokio::test]
async fn put_streams_spooled_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/uploads/images/a.png"))
        .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"etag-1\""))
        .expect(1)
        .mount(&server)
        .await;

    let store = S3Store::new(&s3_config(&server.uri())).await.unwrap();
    let payload = vec![7u8; 4096];
    let stream = spool(Cursor::new(payload.clone())).await.unwrap();

    let written = store.put("images/a.png", stream).await.unwrap();
    assert_eq!(written, payload.len() as u64);
}

#[tokio::test]
async fn get_streams_object_into_sink() {
    let server = MockServer::start().await;
    let body = b"stored object bytes".to_vec();
    Mock::given(method("GET"))
        .and(path("/uploads/docs/b.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let store = S3Store::new(&s3_config(&server.uri())).await.unwrap();
    let mut sink = Vec::new();
    let read = store.get("docs/b.csv", &mut sink).await.unwrap();

    assert_eq!(read, body.len() as u64);
    assert_eq!(sink, body);
}

#[tokio::test]
async fn delete_issues_delete_object() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/uploads/images/c.png"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = S3Store::new(&s3_config(&server.uri())).await.unwrap();
    store.delete("images/c.png").await.unwrap();
}

#[tokio::test]
async fn rejected_put_surfaces_backend_failure() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(403).set_body_string(
            "<?xml version=\"1.0\"?><Error><Code>AccessDenied</Code></Error>",
        ))
        .mount(&server)
        .await;

    let store = S3Store::new(&s3_config(&server.uri())).await.unwrap();
    let stream = spool(Cursor::new(vec![1u8; 16])).await.unwrap();

    let err = store.put("images/denied.png", stream).await.unwrap_err();
    assert!(matches!(err, StoreError::UploadFailed(_)));
}
