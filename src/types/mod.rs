//! Core types used throughout the mevzuat server.
//!
//! This module contains the common data structures used for:
//! - Catalog entities (documents, users, credit transactions, query logs)
//! - API requests and responses
//! - Retrieval results and citations
//! - Authentication claims
//! - Error handling

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

// ============= Document Entities =============

/// Legal document categories recognised by the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    /// Kanun - a law passed by parliament.
    Law,
    /// Yönetmelik - a regulation issued by a ministry or agency.
    Regulation,
    /// Tebliğ - a communique.
    Communique,
    /// Genelge - a circular.
    Circular,
    /// Karar - a court or board decision.
    Decision,
    /// Anything else.
    #[default]
    Other,
}

impl DocumentType {
    /// Stable string form used in the metadata store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Law => "law",
            Self::Regulation => "regulation",
            Self::Communique => "communique",
            Self::Circular => "circular",
            Self::Decision => "decision",
            Self::Other => "other",
        }
    }
}

impl FromStr for DocumentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "law" | "kanun" => Ok(Self::Law),
            "regulation" | "yonetmelik" => Ok(Self::Regulation),
            "communique" | "teblig" => Ok(Self::Communique),
            "circular" | "genelge" => Ok(Self::Circular),
            "decision" | "karar" => Ok(Self::Decision),
            "other" => Ok(Self::Other),
            _ => Err(AppError::InvalidInput(format!(
                "Unknown document type: {}. Use: law, regulation, communique, circular, decision, other",
                s
            ))),
        }
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ingestion pipeline state of a document.
///
/// Transitions: `pending → processing → completed | failed`. The worker
/// owns all transitions after upload; reprocessing starts again at `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Uploaded, waiting for a worker.
    #[default]
    Pending,
    /// A worker holds the processing slot.
    Processing,
    /// Extracted, chunked, embedded and indexed.
    Completed,
    /// Terminal failure; `processing_error` explains why.
    Failed,
}

impl ProcessingStatus {
    /// Stable string form used in the metadata store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Internal(format!(
                "Unknown processing status: {}",
                s
            ))),
        }
    }
}

/// Catalog visibility of a document, orthogonal to processing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityStatus {
    /// Listed and searchable.
    #[default]
    Active,
    /// Hidden from listings, passages stay indexed.
    Archived,
    /// Tombstoned; passages are purged asynchronously.
    Deleted,
}

impl VisibilityStatus {
    /// Stable string form used in the metadata store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

impl FromStr for VisibilityStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "archived" => Ok(Self::Archived),
            "deleted" => Ok(Self::Deleted),
            _ => Err(AppError::InvalidInput(format!(
                "Unknown visibility status: {}",
                s
            ))),
        }
    }
}

/// A legal document in the catalog.
///
/// The metadata store owns this record; passages derived from it live in the
/// vector index and are referenced by `id` only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Document {
    /// Opaque document identifier.
    pub id: Uuid,
    /// Display title.
    pub title: String,
    /// Original upload filename.
    pub original_filename: String,
    /// Blob store URL of the raw file bytes.
    pub blob_url: String,
    /// File size in bytes (1..=100_000_000).
    pub size_bytes: u64,
    /// Issuing institution (e.g. "SGK", "GİB").
    pub institution: String,
    /// Document category.
    pub document_type: DocumentType,
    /// Free-form category label.
    pub category: Option<String>,
    /// Keywords for catalog filtering.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Official publication date, when known.
    pub publication_date: Option<NaiveDate>,
    /// ISO 639-1 language code (default "tr").
    pub language: String,
    /// Auth subject of the uploading admin.
    pub uploaded_by: String,
    /// Free-form metadata bag.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Ingestion pipeline state.
    pub processing_status: ProcessingStatus,
    /// Reason for the last terminal failure, if any.
    pub processing_error: Option<String>,
    /// Number of passages indexed by the last completed run.
    pub passage_count: u32,
    /// Catalog visibility.
    pub status: VisibilityStatus,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// A retrieved passage with source coordinates, as returned by the planner
/// and by `/api/user/search`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RetrievedPassage {
    /// Parent document id.
    pub document_id: Uuid,
    /// Position of the passage within the document (0-based, contiguous).
    pub chunk_index: u32,
    /// Parent document title (denormalized).
    pub title: String,
    /// Page the passage starts on.
    pub page: u32,
    /// First source line (inclusive).
    pub line_start: u32,
    /// Last source line (inclusive).
    pub line_end: u32,
    /// Passage text.
    pub text: String,
    /// Cosine similarity against the query vector, in [-1, 1].
    pub similarity: f32,
    /// Issuing institution (denormalized for filtering).
    pub institution: String,
}

// ============= User & Credit Entities =============

/// Role carried in the auth provider's token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Full catalog administration, unlimited credits.
    Admin,
    /// Regular end user.
    #[default]
    User,
    /// Paid tier.
    Premium,
}

impl UserRole {
    /// Stable string form used in the metadata store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::User => "user",
            Self::Premium => "premium",
        }
    }
}

impl FromStr for UserRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "admin" => Ok(Self::Admin),
            "user" => Ok(Self::User),
            "premium" => Ok(Self::Premium),
            _ => Err(AppError::Internal(format!("Unknown user role: {}", s))),
        }
    }
}

/// A user account mirrored from the auth provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Opaque subject id from the auth provider.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Role at last token refresh.
    pub role: UserRole,
    /// Denormalized credit balance; must equal the ledger sum.
    pub credit_balance: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Kind of a credit ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    /// Signup grant.
    Initial,
    /// Charge for a query.
    Deduction,
    /// Compensation for a failed charged query.
    Refund,
    /// Promotional grant.
    Bonus,
    /// Paid top-up.
    Purchase,
}

impl TransactionKind {
    /// Stable string form used in the metadata store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Deduction => "deduction",
            Self::Refund => "refund",
            Self::Bonus => "bonus",
            Self::Purchase => "purchase",
        }
    }
}

impl FromStr for TransactionKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "initial" => Ok(Self::Initial),
            "deduction" => Ok(Self::Deduction),
            "refund" => Ok(Self::Refund),
            "bonus" => Ok(Self::Bonus),
            "purchase" => Ok(Self::Purchase),
            _ => Err(AppError::Internal(format!(
                "Unknown transaction kind: {}",
                s
            ))),
        }
    }
}

/// An append-only credit ledger entry.
///
/// For each user, entries ordered by creation satisfy
/// `balance_after[n] = balance_after[n-1] + amount[n]` and
/// `balance_after >= 0` at every point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    /// Entry id.
    pub id: Uuid,
    /// Owning user.
    pub user_id: String,
    /// Entry kind.
    pub kind: TransactionKind,
    /// Signed amount. Zero only for admin audit rows.
    pub amount: i64,
    /// Balance after applying this entry.
    pub balance_after: i64,
    /// Free-text description.
    pub description: String,
    /// Query log this entry charges or compensates, if any.
    pub query_log_id: Option<Uuid>,
    /// For refunds: the deduction being compensated.
    pub refund_of: Option<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

// ============= Query Log & Feedback =============

/// Kind of a logged query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    /// Vector search only.
    Search,
    /// Full retrieve-and-generate.
    #[default]
    Ask,
    /// Catalog browsing.
    Browse,
}

impl QueryKind {
    /// Stable string form used in the metadata store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Ask => "ask",
            Self::Browse => "browse",
        }
    }
}

impl FromStr for QueryKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "search" => Ok(Self::Search),
            "ask" => Ok(Self::Ask),
            "browse" => Ok(Self::Browse),
            _ => Err(AppError::Internal(format!("Unknown query kind: {}", s))),
        }
    }
}

/// A denormalized source reference stored with a query log.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SourceRef {
    /// Source document id.
    pub document_id: Uuid,
    /// Source document title.
    pub title: String,
    /// Page the cited passage starts on.
    pub page: u32,
    /// Similarity score of the cited passage.
    pub similarity: f32,
}

/// Audit record written once per executed query; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct QueryLog {
    /// Log entry id.
    pub id: Uuid,
    /// Querying user.
    pub user_id: String,
    /// Client session id, when supplied.
    pub session_id: Option<String>,
    /// Raw query text.
    pub query: String,
    /// Query kind.
    pub kind: QueryKind,
    /// Institution filter, when supplied.
    pub institution: Option<String>,
    /// Similarity threshold used.
    pub threshold: f32,
    /// Retrieval limit (k) used.
    pub k: u32,
    /// Whether the answer came from the query cache.
    pub cache_used: bool,
    /// Number of passages retrieved after pruning.
    pub results_count: u32,
    /// Wall-clock response time in milliseconds.
    pub response_time_ms: u64,
    /// Reliability score of the answer, in [0, 1].
    pub reliability: f32,
    /// Retrieval-only confidence score, in [0, 1].
    pub confidence: f32,
    /// Credits debited for this query (net of refunds).
    pub credits_charged: i64,
    /// Top sources, denormalized.
    #[serde(default)]
    pub sources: Vec<SourceRef>,
    /// Free-form metadata bag.
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Kind of user feedback on an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    /// Thumbs up.
    Up,
    /// Thumbs down.
    Down,
    /// Star rating (1..=5).
    Rating,
    /// Free-text comment.
    Comment,
    /// Bug report.
    Bug,
}

impl FeedbackKind {
    /// Stable string form used in the metadata store.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Rating => "rating",
            Self::Comment => "comment",
            Self::Bug => "bug",
        }
    }
}

impl FromStr for FeedbackKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "up" => Ok(Self::Up),
            "down" => Ok(Self::Down),
            "rating" => Ok(Self::Rating),
            "comment" => Ok(Self::Comment),
            "bug" => Ok(Self::Bug),
            _ => Err(AppError::InvalidInput(format!(
                "Unknown feedback kind: {}",
                s
            ))),
        }
    }
}

/// User feedback; at most one live row per (user, query log).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Feedback {
    /// Feedback id.
    pub id: Uuid,
    /// Submitting user.
    pub user_id: String,
    /// The answer being rated.
    pub query_log_id: Uuid,
    /// Feedback kind.
    pub kind: FeedbackKind,
    /// Star rating, for `rating` kind.
    pub rating: Option<u8>,
    /// Free-text comment.
    pub comment: Option<String>,
    /// Classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last resubmission timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Singleton maintenance-mode flag.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Default)]
pub struct MaintenanceFlag {
    /// Whether maintenance mode is on.
    pub enabled: bool,
    /// Short banner title.
    pub title: Option<String>,
    /// Message shown to blocked users.
    pub message: Option<String>,
    /// Window start, when scheduled.
    pub starts_at: Option<DateTime<Utc>>,
    /// Window end, when scheduled.
    pub ends_at: Option<DateTime<Utc>>,
    /// User ids that bypass the block.
    #[serde(default)]
    pub allow_user_ids: Vec<String>,
}

impl MaintenanceFlag {
    /// Whether the given user is blocked by this flag right now.
    pub fn blocks(&self, user_id: &str) -> bool {
        self.enabled && !self.allow_user_ids.iter().any(|id| id == user_id)
    }
}

// ============= API Request/Response Types =============

/// Request payload for `/api/user/ask`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AskRequest {
    /// The natural-language question.
    pub query: String,
    /// Restrict retrieval to one institution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    /// Retrieval limit (1..=20, default from config).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Similarity threshold (0..=1, default from config).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Whether the query cache may answer (default true).
    #[serde(default = "default_use_cache")]
    pub use_cache: bool,
    /// Client session id for history grouping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

fn default_use_cache() -> bool {
    true
}

/// A citation returned with an answer.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Citation {
    /// Anchor number as it appears in the answer text (`[#1]`, `[#2]`, ...).
    pub anchor: u32,
    /// Source document id.
    pub document_id: Uuid,
    /// Source document title.
    pub title: String,
    /// Page the passage starts on.
    pub page: u32,
    /// First source line (inclusive).
    pub line_start: u32,
    /// Last source line (inclusive).
    pub line_end: u32,
    /// Similarity of the cited passage.
    pub similarity: f32,
}

/// Response payload for `/api/user/ask`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AskResponse {
    /// The synthesized answer.
    pub answer: String,
    /// Citations backing the answer, in context order.
    pub citations: Vec<Citation>,
    /// Reliability score in [0, 1].
    pub reliability: f32,
    /// Retrieval-only confidence score in [0, 1].
    pub confidence: f32,
    /// Whether the answer came from the query cache.
    pub cached: bool,
    /// Credits debited for this query.
    pub credits_charged: i64,
    /// Audit log entry for this query.
    pub query_log_id: Uuid,
    /// Generation provider used ("none" when no passages survived pruning).
    pub provider: String,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

/// Request payload for `/api/user/search`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// The search query.
    pub query: String,
    /// Restrict retrieval to one institution.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution: Option<String>,
    /// Retrieval limit (1..=20, default from config).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    /// Similarity threshold (0..=1, default from config).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    /// Client session id for history grouping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Response payload for `/api/user/search`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SearchResponse {
    /// Matching passages, best first.
    pub results: Vec<RetrievedPassage>,
    /// Number of results.
    pub total: usize,
    /// Audit log entry for this query.
    pub query_log_id: Uuid,
    /// Wall-clock time in milliseconds.
    pub elapsed_ms: u64,
}

/// Response payload for document upload.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UploadResponse {
    /// Id of the created document; ingestion continues asynchronously.
    pub document_id: Uuid,
}

/// Query parameters for the admin document listing.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct DocumentListQuery {
    /// Filter by visibility status.
    pub status: Option<String>,
    /// Filter by processing status.
    pub processing: Option<String>,
    /// Filter by institution.
    pub institution: Option<String>,
    /// Page size (default 50, max 200).
    pub limit: Option<u32>,
    /// Page offset.
    pub offset: Option<u32>,
}

/// Query parameters for `/api/user/search-history`.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct HistoryQuery {
    /// Page size (default 20, max 100).
    pub limit: Option<u32>,
    /// Page offset.
    pub offset: Option<u32>,
}

/// Request payload for `/api/user/feedback`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedbackRequest {
    /// The answer being rated.
    pub query_log_id: Uuid,
    /// Feedback kind: up, down, rating, comment, bug.
    pub kind: String,
    /// Star rating (1..=5), required for `rating`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<u8>,
    /// Free-text comment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Classification tags.
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Response payload for `/api/user/credits`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreditsResponse {
    /// Current credit balance.
    pub balance: i64,
    /// Whether the caller bypasses deduction.
    pub is_admin: bool,
}

/// Public payload for `/api/maintenance/status`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MaintenanceStatusResponse {
    /// Whether maintenance mode is on.
    pub enabled: bool,
    /// Banner title.
    pub title: Option<String>,
    /// Message shown to blocked users.
    pub message: Option<String>,
}

// ============= Authentication Types =============

/// JWT claims minted by the external auth provider.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// User's email address.
    pub email: String,
    /// User role.
    #[serde(default)]
    pub role: UserRole,
    /// Expiration time (Unix timestamp).
    pub exp: usize,
    /// Issued at time (Unix timestamp).
    pub iat: usize,
}

// ============= Error Types =============

/// Application-wide error taxonomy.
///
/// Adapters translate vendor errors into these kinds; the HTTP layer maps
/// them to status codes. `EmptyDocument` and `ExtractionFailed` belong to
/// the ingestion path and never surface to query responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed request, unsupported file type, over-size upload.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or invalid credentials.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// Authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The user's balance cannot cover the query cost.
    #[error("Insufficient credits")]
    InsufficientCredits,

    /// Requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Per-user admission quota exceeded.
    #[error("Rate limited, retry after {retry_after_s}s")]
    RateLimited {
        /// Seconds until the current minute bucket rolls over.
        retry_after_s: u64,
    },

    /// Vector dimension mismatch, ledger drift, broken chunk sequence.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// An external store stayed down after retries.
    #[error("{adapter} unavailable: {message}")]
    AdapterUnavailable {
        /// Which adapter failed (blob, vector-index, meta-store, cache, embedder, extractor).
        adapter: &'static str,
        /// Vendor-stripped failure description.
        message: String,
        /// Compensating refund, when the failure happened after a reserve.
        refund_txn_id: Option<Uuid>,
    },

    /// Both generation providers exhausted.
    #[error("All generation providers failed")]
    GeneratorFailed {
        /// Compensating refund for the reserved credits.
        refund_txn_id: Option<Uuid>,
    },

    /// Extraction produced only whitespace. Ingestion-only.
    #[error("No extractable text")]
    EmptyDocument,

    /// The text extractor rejected the file. Ingestion-only.
    #[error("Extraction failed: {message}")]
    ExtractionFailed {
        /// Extractor failure description.
        message: String,
        /// Whether another attempt may succeed.
        retryable: bool,
    },

    /// Anything else; logged, surfaced as 500.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable kind string used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "InvalidInput",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::Forbidden(_) => "Forbidden",
            Self::InsufficientCredits => "InsufficientCredits",
            Self::NotFound(_) => "NotFound",
            Self::RateLimited { .. } => "RateLimited",
            Self::InvariantViolation(_) => "InvariantViolation",
            Self::AdapterUnavailable { .. } => "AdapterUnavailable",
            Self::GeneratorFailed { .. } => "GeneratorFailed",
            Self::EmptyDocument => "EmptyDocument",
            Self::ExtractionFailed { .. } => "ExtractionFailed",
            Self::Internal(_) => "Internal",
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::AdapterUnavailable { .. } => true,
            Self::ExtractionFailed { retryable, .. } => *retryable,
            _ => false,
        }
    }

    /// Shorthand for a metadata store failure.
    pub fn meta(e: impl std::fmt::Display) -> Self {
        Self::AdapterUnavailable {
            adapter: "meta-store",
            message: e.to_string(),
            refund_txn_id: None,
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status = match &self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::GeneratorFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::AdapterUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvariantViolation(_)
            | AppError::EmptyDocument
            | AppError::ExtractionFailed { .. }
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut body = serde_json::json!({
            "error": self.kind(),
            "message": self.to_string(),
        });

        match &self {
            AppError::GeneratorFailed {
                refund_txn_id: Some(id),
            }
            | AppError::AdapterUnavailable {
                refund_txn_id: Some(id),
                ..
            } => {
                body["refund_txn_id"] = serde_json::json!(id);
            }
            _ => {}
        }

        let mut response = (status, axum::Json(body)).into_response();

        if let AppError::RateLimited { retry_after_s } = &self {
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after_s.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }

        response
    }
}

/// A specialized Result type for mevzuat operations.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_type_round_trip() {
        for ty in [
            DocumentType::Law,
            DocumentType::Regulation,
            DocumentType::Communique,
            DocumentType::Circular,
            DocumentType::Decision,
            DocumentType::Other,
        ] {
            assert_eq!(ty.as_str().parse::<DocumentType>().unwrap(), ty);
        }
    }

    #[test]
    fn test_document_type_turkish_aliases() {
        assert_eq!("kanun".parse::<DocumentType>().unwrap(), DocumentType::Law);
        assert_eq!(
            "genelge".parse::<DocumentType>().unwrap(),
            DocumentType::Circular
        );
    }

    #[test]
    fn test_maintenance_flag_allowlist() {
        let flag = MaintenanceFlag {
            enabled: true,
            allow_user_ids: vec!["ops-1".to_string()],
            ..Default::default()
        };
        assert!(flag.blocks("user-1"));
        assert!(!flag.blocks("ops-1"));

        let off = MaintenanceFlag::default();
        assert!(!off.blocks("user-1"));
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(AppError::InsufficientCredits.kind(), "InsufficientCredits");
        assert_eq!(
            AppError::GeneratorFailed { refund_txn_id: None }.kind(),
            "GeneratorFailed"
        );
        assert!(AppError::RateLimited { retry_after_s: 10 }.is_retryable());
        assert!(!AppError::EmptyDocument.is_retryable());
    }
}
