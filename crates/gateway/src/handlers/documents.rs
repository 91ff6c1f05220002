//! Document upload handler

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, State},
    http::{header::CONTENT_LENGTH, HeaderMap, StatusCode},
    Json,
};
use doctalk_common::{
    errors::{AppError, Result},
    session::DocumentInfo,
};
use std::time::Instant;
use uuid::Uuid;

use crate::AppState;

const PDF_MAGIC: &[u8] = b"%PDF-";
const FILE_FIELD: &str = "file";

/// Upload a PDF and index it for the session.
///
/// A session indexes one document. Uploading again returns the existing
/// document with 200 instead of rebuilding the index.
pub async fn upload_document(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<DocumentInfo>)> {
    let start = Instant::now();
    let limit = state.config.server.max_upload_bytes;

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if let Some(size) = declared.filter(|size| *size > limit) {
        return Err(AppError::PayloadTooLarge { size, limit });
    }

    let handle = state.sessions.get(session_id).await?;

    // Held until the index is attached so the document is built once
    let _work = handle.begin_work().await;
    let existing = handle.lock().await.document.as_ref().map(|d| d.info.clone());
    if let Some(info) = existing {
        tracing::info!(
            session_id = %session_id,
            file = %info.file_name,
            "Document already indexed for session"
        );
        return Ok((StatusCode::OK, Json(info)));
    }

    let (file_name, bytes) = read_file_field(&mut multipart, declared, limit).await?;
    validate_pdf(&file_name, &bytes)?;

    let path = state.sessions.upload_path(session_id, &file_name);
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(&path, &bytes).await?;

    let indexed = match state.ingestor.ingest_file(&path).await {
        Ok(indexed) => indexed,
        Err(e) => {
            state.sessions.abandon_upload(&handle, &path).await;
            return Err(e.into());
        }
    };

    let info = state
        .sessions
        .attach_document(&handle, indexed.into())
        .await?;

    tracing::info!(
        session_id = %session_id,
        file = %info.file_name,
        bytes = bytes.len(),
        pages = info.page_count,
        chunks = info.chunk_count,
        latency_ms = start.elapsed().as_millis() as u64,
        "Document uploaded and indexed"
    );

    Ok((StatusCode::CREATED, Json(info)))
}

async fn read_file_field(
    multipart: &mut Multipart,
    declared: Option<usize>,
    limit: usize,
) -> Result<(String, Vec<u8>)> {
    let to_app_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge {
                size: declared.unwrap_or(limit.saturating_add(1)),
                limit,
            }
        } else {
            AppError::InvalidFormat {
                message: e.body_text(),
            }
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(to_app_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| "document.pdf".to_string());
        let bytes = field.bytes().await.map_err(to_app_error)?;
        return Ok((file_name, bytes.to_vec()));
    }

    Err(AppError::MissingField {
        field: FILE_FIELD.to_string(),
    })
}

/// Only PDFs are accepted: `.pdf` extension and `%PDF-` header
fn validate_pdf(file_name: &str, bytes: &[u8]) -> Result<()> {
    let is_pdf_name = std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
    if !is_pdf_name {
        return Err(AppError::UnsupportedDocument {
            message: format!("{} is not a .pdf file", file_name),
        });
    }

    if bytes.is_empty() {
        return Err(AppError::Validation {
            message: "Uploaded file is empty".to_string(),
            field: Some(FILE_FIELD.to_string()),
        });
    }

    if !bytes.starts_with(PDF_MAGIC) {
        return Err(AppError::UnsupportedDocument {
            message: format!("{} does not look like a PDF", file_name),
        });
    }

    Ok(())
}
