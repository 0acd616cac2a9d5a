//! Admin document management handlers.
//!
//! Upload stores the raw bytes, inserts a `pending` document and enqueues
//! the ingest job; processing continues asynchronously. Deletion is a
//! tombstone plus an asynchronous purge of the document's passages.

use axum::extract::{Multipart, Path, Query, State};
use axum::Json;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::auth::middleware::AdminUser;
use crate::ingest::IngestJob;
use crate::types::{
    AppError, Document, DocumentListQuery, DocumentType, ProcessingStatus, Result, UploadResponse,
    VisibilityStatus,
};
use crate::AppState;

struct UploadForm {
    file_name: Option<String>,
    bytes: Option<Vec<u8>>,
    title: Option<String>,
    institution: Option<String>,
    document_type: DocumentType,
    category: Option<String>,
    keywords: Vec<String>,
    publication_date: Option<NaiveDate>,
    language: String,
}

impl UploadForm {
    fn empty() -> Self {
        Self {
            file_name: None,
            bytes: None,
            title: None,
            institution: None,
            document_type: DocumentType::Other,
            category: None,
            keywords: Vec::new(),
            publication_date: None,
            language: "tr".to_string(),
        }
    }
}

async fn read_form(multipart: &mut Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::empty();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::InvalidInput(format!("malformed multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                form.file_name = field.file_name().map(str::to_string);
                form.bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| AppError::InvalidInput(format!("unreadable file: {}", e)))?
                        .to_vec(),
                );
            }
            "title" => form.title = Some(read_text(field).await?),
            "institution" => form.institution = Some(read_text(field).await?),
            "document_type" => form.document_type = read_text(field).await?.parse()?,
            "category" => form.category = Some(read_text(field).await?),
            "keywords" => {
                form.keywords = read_text(field)
                    .await?
                    .split(',')
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect();
            }
            "publication_date" => {
                let raw = read_text(field).await?;
                form.publication_date = Some(
                    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                        AppError::InvalidInput(format!(
                            "publication_date must be YYYY-MM-DD, got {}",
                            raw
                        ))
                    })?,
                );
            }
            "language" => form.language = read_text(field).await?,
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String> {
    field
        .text()
        .await
        .map_err(|e| AppError::InvalidInput(format!("malformed field: {}", e)))
}

/// Upload a document and schedule its ingestion.
#[utoipa::path(
    post,
    path = "/api/admin/documents/upload",
    responses(
        (status = 200, description = "Document accepted", body = UploadResponse),
        (status = 400, description = "Invalid upload"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required")
    ),
    tag = "admin",
    security(("bearer" = []))
)]
pub async fn upload(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let form = read_form(&mut multipart).await?;

    let bytes = form
        .bytes
        .ok_or_else(|| AppError::InvalidInput("file part is required".to_string()))?;
    let file_name = form
        .file_name
        .ok_or_else(|| AppError::InvalidInput("file name is required".to_string()))?;
    let title = form
        .title
        .ok_or_else(|| AppError::InvalidInput("title is required".to_string()))?;
    let institution = form
        .institution
        .ok_or_else(|| AppError::InvalidInput("institution is required".to_string()))?;

    if bytes.is_empty() {
        return Err(AppError::InvalidInput("file is empty".to_string()));
    }
    let max = state.settings.upload.max_bytes;
    if bytes.len() as u64 > max {
        return Err(AppError::InvalidInput(format!(
            "file exceeds the {} byte limit",
            max
        )));
    }
    if !file_name.to_lowercase().ends_with(".pdf") {
        return Err(AppError::InvalidInput(
            "only PDF uploads are supported".to_string(),
        ));
    }

    let document_id = Uuid::new_v4();
    let key = format!("documents/{}/{}", document_id, file_name);
    let stored = state
        .blob
        .put(&key, &bytes, "application/pdf")
        .await?;

    let now = Utc::now();
    let document = Document {
        id: document_id,
        title,
        original_filename: file_name,
        blob_url: stored.url,
        size_bytes: stored.size,
        institution,
        document_type: form.document_type,
        category: form.category,
        keywords: form.keywords,
        publication_date: form.publication_date,
        language: form.language,
        uploaded_by: claims.sub.clone(),
        metadata: serde_json::json!({}),
        processing_status: ProcessingStatus::Pending,
        processing_error: None,
        passage_count: 0,
        status: VisibilityStatus::Active,
        created_at: now,
        updated_at: now,
    };
    state.meta.insert_document(&document).await?;

    state.queue.enqueue(IngestJob::Ingest {
        document_id,
        attempt: 1,
    })?;

    tracing::info!(
        document_id = %document_id,
        uploaded_by = %claims.sub,
        size_bytes = stored.size,
        institution = %document.institution,
        "Document uploaded, ingest enqueued"
    );

    Ok(Json(UploadResponse { document_id }))
}

/// List catalog documents with filters.
#[utoipa::path(
    get,
    path = "/api/admin/documents",
    responses(
        (status = 200, description = "Documents listed", body = Vec<Document>),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required")
    ),
    tag = "admin",
    security(("bearer" = []))
)]
pub async fn list_documents(
    State(state): State<AppState>,
    AdminUser(_claims): AdminUser,
    Query(query): Query<DocumentListQuery>,
) -> Result<Json<Vec<Document>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<VisibilityStatus>)
        .transpose()?;
    let processing = query
        .processing
        .as_deref()
        .map(str::parse::<ProcessingStatus>)
        .transpose()
        .map_err(|_| AppError::InvalidInput("unknown processing status filter".to_string()))?;
    let limit = query.limit.unwrap_or(50).min(200);
    let offset = query.offset.unwrap_or(0);

    let documents = state
        .meta
        .list_documents(status, processing, query.institution.as_deref(), limit, offset)
        .await?;
    Ok(Json(documents))
}

/// Tombstone a document and schedule its purge.
#[utoipa::path(
    delete,
    path = "/api/admin/documents/{id}",
    responses(
        (status = 200, description = "Document tombstoned"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin role required"),
        (status = 404, description = "Unknown document")
    ),
    tag = "admin",
    security(("bearer" = []))
)]
pub async fn delete_document(
    State(state): State<AppState>,
    AdminUser(claims): AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let document = state
        .meta
        .get_document(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("document {}", id)))?;

    state.meta.set_visibility(id, VisibilityStatus::Deleted).await?;
    state.queue.enqueue(IngestJob::Purge { document_id: id })?;

    tracing::info!(
        document_id = %id,
        deleted_by = %claims.sub,
        title = %document.title,
        "Document tombstoned, purge enqueued"
    );

    Ok(Json(serde_json::json!({
        "document_id": id,
        "status": "deleted",
    })))
}
