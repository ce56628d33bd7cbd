//! S3 Client Integration Tests
//!
//! Runs the S3 backend against a wiremock server standing in for S3.
//!
//! ## Test Coverage
//!
//! - CreateMultipartUpload / UploadPart / CompleteMultipartUpload / Abort requests
//! - SigV4 headers on every request
//! - S3 error bodies, including an error returned with HTTP 200
//! - A full upload session over HTTP

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use mizuchi_stream::s3::{S3Client, S3ClientConfig, S3ClientError};
    use mizuchi_stream::upload::{
        BackendError, CompletedPart, Destination, MultipartBackend, PartLimits, PartRequest,
        SessionConfig, UploadError, UploadOptions, UploadSession,
    };
    use std::sync::Arc;
    use wiremock::matchers::{
        body_string_contains, header, header_exists, method, path, query_param,
    };
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Helper function to create an S3 client pointing to a mock server
    fn create_test_s3_client(mock_server: &MockServer) -> S3Client {
        let s3_config = S3ClientConfig {
            region: "us-east-1".to_string(),
            endpoint: Some(mock_server.uri()),
            access_key: Some("test-access".to_string()),
            secret_key: Some("test-secret".to_string()),
            ..S3ClientConfig::default()
        };
        S3Client::new(s3_config).unwrap()
    }

    fn destination() -> Destination {
        Destination::new("test-bucket", "test-key.bin")
    }

    const INITIATE_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Bucket>test-bucket</Bucket>
    <Key>test-key.bin</Key>
    <UploadId>real-upload-id-12345</UploadId>
</InitiateMultipartUploadResult>"#;

    const COMPLETE_RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
    <Location>http://localhost/test-bucket/test-key.bin</Location>
    <Bucket>test-bucket</Bucket>
    <Key>test-key.bin</Key>
    <ETag>"final-etag-2"</ETag>
</CompleteMultipartUploadResult>"#;

    // ========================================================================
    // TEST: Create Multipart Upload
    // ========================================================================

    #[tokio::test]
    async fn test_create_multipart_returns_upload_id() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/test-key.bin"))
            .and(query_param("uploads", ""))
            .and(header_exists("authorization"))
            .and(header_exists("x-amz-date"))
            .and(header_exists("x-amz-content-sha256"))
            .and(header("content-type", "application/octet-stream"))
            .and(header("x-amz-meta-source", "test"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INITIATE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        let mut options = UploadOptions {
            content_type: Some("application/octet-stream".into()),
            ..UploadOptions::default()
        };
        options.metadata.insert("source".into(), "test".into());

        let upload_id = client.initiate(&destination(), &options).await.unwrap();
        assert_eq!(upload_id, "real-upload-id-12345");
    }

    #[tokio::test]
    async fn test_create_multipart_access_denied() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(query_param("uploads", ""))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>"#,
            ))
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        let err = client
            .initiate(&destination(), &UploadOptions::default())
            .await
            .unwrap_err();

        match err {
            BackendError::S3(S3ClientError::ServiceError { status, code, .. }) => {
                assert_eq!(status, 403);
                assert_eq!(code, "AccessDenied");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    // ========================================================================
    // TEST: Upload Part
    // ========================================================================

    #[tokio::test]
    async fn test_upload_part_returns_etag() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .and(path("/test-bucket/test-key.bin"))
            .and(query_param("partNumber", "3"))
            .and(query_param("uploadId", "upload-123"))
            .and(header("x-amz-checksum-sha256", "abc="))
            .and(body_string_contains("part data"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part-etag-3\""))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        let part = MultipartBackend::upload_part(
            &client,
            PartRequest {
                destination: destination(),
                upload_id: "upload-123".into(),
                part_number: 3,
                is_last: false,
                body: Bytes::from("part data"),
                checksum: Some("abc=".into()),
            },
        )
        .await
        .unwrap();

        assert_eq!(part.part_number, 3);
        assert_eq!(part.etag, "\"part-etag-3\"");
        assert_eq!(part.checksum.as_deref(), Some("abc="));
    }

    #[tokio::test]
    async fn test_upload_part_without_etag_fails() {
        let mock_server = MockServer::start().await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        let err = MultipartBackend::upload_part(
            &client,
            PartRequest {
                destination: destination(),
                upload_id: "upload-123".into(),
                part_number: 1,
                is_last: true,
                body: Bytes::from("x"),
                checksum: None,
            },
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            BackendError::S3(S3ClientError::ResponseError(_))
        ));
    }

    // ========================================================================
    // TEST: Complete / Abort
    // ========================================================================

    #[tokio::test]
    async fn test_complete_sends_ordered_part_list() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/test-key.bin"))
            .and(query_param("uploadId", "upload-123"))
            .and(body_string_contains("<CompleteMultipartUpload>"))
            .and(body_string_contains("<PartNumber>1</PartNumber>"))
            .and(body_string_contains("<PartNumber>2</PartNumber>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(COMPLETE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        let parts = vec![
            CompletedPart {
                part_number: 1,
                etag: "etag1".into(),
                checksum: None,
            },
            CompletedPart {
                part_number: 2,
                etag: "etag2".into(),
                checksum: None,
            },
        ];

        let result = client
            .complete(&destination(), "upload-123", &parts)
            .await
            .unwrap();
        assert_eq!(result.etag, "\"final-etag-2\"");
        assert_eq!(
            result.location.as_deref(),
            Some("http://localhost/test-bucket/test-key.bin")
        );
    }

    #[tokio::test]
    async fn test_complete_error_with_200_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(query_param("uploadId", "upload-123"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>InternalError</Code><Message>We encountered an internal error.</Message></Error>"#,
            ))
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        let parts = vec![CompletedPart {
            part_number: 1,
            etag: "etag1".into(),
            checksum: None,
        }];

        let err = client
            .complete(&destination(), "upload-123", &parts)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BackendError::S3(S3ClientError::ServiceError { status: 200, .. })
        ));
    }

    #[tokio::test]
    async fn test_abort_multipart_upload() {
        let mock_server = MockServer::start().await;

        Mock::given(method("DELETE"))
            .and(path("/test-bucket/test-key.bin"))
            .and(query_param("uploadId", "upload-123"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        client.abort(&destination(), "upload-123").await.unwrap();
    }

    // ========================================================================
    // TEST: Object key paths
    // ========================================================================

    #[tokio::test]
    async fn test_request_path_matches_encoded_key() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/test-bucket/logs/.../my%20file%2B1.txt"))
            .and(query_param("uploads", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string(INITIATE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        let dest = Destination::new("test-bucket", "logs/.../my file+1.txt");
        let upload_id = client.initiate(&dest, &UploadOptions::default()).await.unwrap();
        assert_eq!(upload_id, "real-upload-id-12345");
    }

    #[tokio::test]
    async fn test_dot_segment_keys_are_rejected_before_sending() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(INITIATE_RESPONSE))
            .expect(0)
            .mount(&mock_server)
            .await;

        let client = create_test_s3_client(&mock_server);
        for key in ["a/../b", "a/./b", "../b", "a/.."] {
            let dest = Destination::new("test-bucket", key);
            let err = client
                .initiate(&dest, &UploadOptions::default())
                .await
                .unwrap_err();
            assert!(
                matches!(err, BackendError::S3(S3ClientError::RequestError(_))),
                "key {:?} gave {:?}",
                key,
                err
            );
        }

        let received = mock_server.received_requests().await.unwrap();
        assert!(received.is_empty());
    }

    // ========================================================================
    // TEST: Full session over HTTP
    // ========================================================================

    #[tokio::test]
    async fn test_session_over_http() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(query_param("uploads", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string(INITIATE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .and(query_param("uploadId", "real-upload-id-12345"))
            .respond_with(ResponseTemplate::new(200).insert_header("ETag", "\"part\""))
            .expect(3)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .and(query_param("uploadId", "real-upload-id-12345"))
            .and(body_string_contains("<PartNumber>3</PartNumber>"))
            .respond_with(ResponseTemplate::new(200).set_body_string(COMPLETE_RESPONSE))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = Arc::new(create_test_s3_client(&mock_server));
        let config = SessionConfig::new(destination())
            .with_limits(PartLimits::new(1024, 1024, 100))
            .with_max_in_flight(2);
        let mut session = UploadSession::new(client, config).unwrap();

        session.write(&vec![42u8; 2500]).await.unwrap();
        let outcome = session.finish().await.unwrap();

        assert_eq!(outcome.parts, 3);
        assert_eq!(outcome.upload_id.as_deref(), Some("real-upload-id-12345"));
        assert_eq!(outcome.etag.as_deref(), Some("\"final-etag-2\""));
    }

    #[tokio::test]
    async fn test_session_part_failure_aborts_over_http() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(query_param("uploads", ""))
            .respond_with(ResponseTemplate::new(200).set_body_string(INITIATE_RESPONSE))
            .mount(&mock_server)
            .await;

        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(500).set_body_string(
                "<Error><Code>InternalError</Code><Message>boom</Message></Error>",
            ))
            .mount(&mock_server)
            .await;

        Mock::given(method("DELETE"))
            .and(query_param("uploadId", "real-upload-id-12345"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = Arc::new(create_test_s3_client(&mock_server));
        let config = SessionConfig::new(destination())
            .with_limits(PartLimits::new(1024, 1024, 100));
        let session = UploadSession::new(client, config).unwrap();

        let data = vec![1u8; 1500];
        let mut reader = &data[..];
        let err = mizuchi_stream::upload::upload_stream(session, &mut reader)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::UploadPart { .. }));
    }
}
