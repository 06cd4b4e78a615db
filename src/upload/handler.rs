//! Per-request upload orchestration.
//!
//! The service owns the configuration handle and the object store; each
//! request takes one configuration snapshot and drives the pipeline:
//! received, parsed, classified, spooling, uploading, then one terminal
//! success or failure.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use http_body_util::{BodyExt, Limited};
use hyper::body::Body;
use hyper::Request;
use multer::{Constraints, Multipart, SizeLimit};
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use super::classify::{self, GroupPolicy, SNIFF_LEN};
use super::limit::{size_limit_exceeded, CappedReader};
use super::{UploadError, UploadResponse, FILE_FIELD};
use crate::config::ConfigHandle;
use crate::spool::spool;
use crate::store::ObjectStore;

/// Everything one request resolves before the storage call.
#[derive(Debug)]
pub struct UploadContext {
    pub id: Uuid,
    pub content_type: String,
    pub group: GroupPolicy,
    pub key: String,
}

/// Upload orchestrator; one instance serves all requests.
pub struct UploadService {
    config: ConfigHandle,
    store: Arc<dyn ObjectStore>,
}

impl UploadService {
    pub fn new(config: ConfigHandle, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    /// Drive one upload end to end, returning the response payload or the
    /// failure to map onto an HTTP status.
    pub async fn upload<B>(&self, req: Request<B>) -> Result<UploadResponse, UploadError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("upload", request_id = %id);
        async {
            let result = self.upload_inner(id, req).await;
            if let Err(err) = &result {
                error!(error = %err, status = err.status().as_u16(), "upload failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn upload_inner<B>(&self, id: Uuid, req: Request<B>) -> Result<UploadResponse, UploadError>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let config = self.config.current();
        let (parts, body) = req.into_parts();

        let boundary = parts
            .headers
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|content_type| multer::parse_boundary(content_type).ok())
            .ok_or_else(|| {
                UploadError::BadRequest("expected a multipart/form-data request".into())
            })?;

        // Layer 1: hard cap on the raw body, ahead of any parsing.
        let max_body_size = config.max_body_size();
        let body = Limited::new(body, usize::try_from(max_body_size).unwrap_or(usize::MAX));

        // Layer 2: parser-level limits. Text fields stay within the
        // in-memory threshold; the file field is bounded here by the global
        // cap and further down by its group's own cap.
        let constraints = Constraints::new().size_limit(
            SizeLimit::new()
                .per_field(config.upload.max_memory_size)
                .for_field(FILE_FIELD, max_body_size),
        );
        let mut multipart =
            Multipart::with_constraints(body.into_data_stream(), boundary, constraints);

        let mut field = loop {
            match multipart.next_field().await.map_err(map_parse_error)? {
                Some(field) if field.name() == Some(FILE_FIELD) => break field,
                Some(_) => continue,
                None => {
                    return Err(UploadError::BadRequest(format!(
                        "multipart field '{FILE_FIELD}' is missing"
                    )))
                }
            }
        };
        let file_name = field.file_name().unwrap_or_default().to_string();

        // Sniff the leading bytes without consuming them from the file's
        // point of view; they are chained back in front of the remainder.
        let mut head = BytesMut::new();
        while head.len() < SNIFF_LEN {
            match field.chunk().await.map_err(map_sniff_error)? {
                Some(chunk) => head.extend_from_slice(&chunk),
                None => break,
            }
        }
        let head = head.freeze();

        let classified = classify::classify(&config.upload, &head, &file_name);
        let group = classified
            .group
            .ok_or_else(|| UploadError::UnsupportedMediaType(classified.content_type.clone()))?;
        let extension = classify::storage_extension(&classified.content_type, &file_name)
            .ok_or_else(|| UploadError::NoExtension(classified.content_type.clone()))?;

        let ctx = UploadContext {
            id,
            content_type: classified.content_type,
            key: format!("{}/{}.{}", group.folder, id, extension),
            group,
        };
        info!(
            content_type = %ctx.content_type,
            group = ctx.group.name.as_deref().unwrap_or("<default>"),
            key = %ctx.key,
            file_name = %file_name,
            "upload classified"
        );

        // Layer 3: the resolved group's own cap, applied to the re-chained
        // file stream on its way into the spool.
        let rest = StreamReader::new(field.map_err(io::Error::other));
        let reader = std::io::Cursor::new(head).chain(rest);
        let capped = CappedReader::new(reader, ctx.group.max_upload_size);

        let spooled = spool(capped).await.map_err(UploadError::Spool)?;
        let handle = spooled.handle();
        let put_result = self.store.put(&ctx.key, spooled).await;

        // A copy error always wins over whatever the storage call reported:
        // a Put that "succeeded" against a broken spool wrote short data.
        if let Some(copy_err) = handle.error() {
            if size_limit_exceeded(copy_err.source_error()) {
                return Err(UploadError::PayloadTooLarge);
            }
            return Err(UploadError::Spool(copy_err.into_io()));
        }
        let bytes_written = put_result?;

        info!(bytes = bytes_written, key = %ctx.key, "upload stored");

        Ok(UploadResponse {
            file: format!("{}.{}", ctx.id, extension),
            relative_path: ctx.key,
            base_url: config.upload.base_url.clone(),
        })
    }
}

fn map_parse_error(err: multer::Error) -> UploadError {
    if is_size_error(&err) {
        UploadError::PayloadTooLarge
    } else {
        UploadError::BadRequest(err.to_string())
    }
}

fn map_sniff_error(err: multer::Error) -> UploadError {
    if is_size_error(&err) {
        UploadError::PayloadTooLarge
    } else {
        UploadError::Sniff(err)
    }
}

/// Size violations from either the parser's own limits or the body-level
/// length cap underneath it.
fn is_size_error(err: &multer::Error) -> bool {
    match err {
        multer::Error::StreamSizeExceeded { .. } | multer::Error::FieldSizeExceeded { .. } => true,
        multer::Error::StreamReadFailed(source) => {
            let mut cause: Option<&(dyn std::error::Error + 'static)> = Some(source.as_ref());
            while let Some(err) = cause {
                if err.is::<http_body_util::LengthLimitError>() {
                    return true;
                }
                cause = err.source();
            }
            false
        }
        _ => false,
    }
}
