//! Metadata store over libsql.
//!
//! Exclusively owns the relational entities: documents, users, credit
//! transactions, query logs, feedback, the maintenance flag and prompt
//! templates. No SQL leaks out of this module; callers get typed operations
//! per entity. Transactions are short-lived and never span an external API
//! call.

use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Builder, Connection, Database, Row};
use uuid::Uuid;

use crate::types::{
    AppError, CreditTransaction, Document, DocumentType, Feedback, FeedbackKind, MaintenanceFlag,
    ProcessingStatus, QueryKind, QueryLog, Result, SourceRef, TransactionKind, UserAccount,
    UserRole, VisibilityStatus,
};

/// Typed access to the relational metadata store.
pub struct MetaStore {
    db: Database,
}

fn meta_err(e: impl std::fmt::Display) -> AppError {
    AppError::meta(e)
}

// ============= Row helpers =============

fn col_text(row: &Row, idx: i32) -> Result<String> {
    match row.get_value(idx).map_err(meta_err)? {
        libsql::Value::Text(s) => Ok(s),
        other => Err(AppError::Internal(format!(
            "column {} is not text: {:?}",
            idx, other
        ))),
    }
}

fn col_opt_text(row: &Row, idx: i32) -> Result<Option<String>> {
    match row.get_value(idx).map_err(meta_err)? {
        libsql::Value::Null => Ok(None),
        libsql::Value::Text(s) => Ok(Some(s)),
        other => Err(AppError::Internal(format!(
            "column {} is not text: {:?}",
            idx, other
        ))),
    }
}

fn col_i64(row: &Row, idx: i32) -> Result<i64> {
    match row.get_value(idx).map_err(meta_err)? {
        libsql::Value::Integer(i) => Ok(i),
        other => Err(AppError::Internal(format!(
            "column {} is not an integer: {:?}",
            idx, other
        ))),
    }
}

fn col_f64(row: &Row, idx: i32) -> Result<f64> {
    match row.get_value(idx).map_err(meta_err)? {
        libsql::Value::Real(f) => Ok(f),
        libsql::Value::Integer(i) => Ok(i as f64),
        other => Err(AppError::Internal(format!(
            "column {} is not a real: {:?}",
            idx, other
        ))),
    }
}

fn col_uuid(row: &Row, idx: i32) -> Result<Uuid> {
    Uuid::parse_str(&col_text(row, idx)?)
        .map_err(|e| AppError::Internal(format!("column {} is not a uuid: {}", idx, e)))
}

fn col_opt_uuid(row: &Row, idx: i32) -> Result<Option<Uuid>> {
    col_opt_text(row, idx)?
        .map(|s| {
            Uuid::parse_str(&s)
                .map_err(|e| AppError::Internal(format!("column {} is not a uuid: {}", idx, e)))
        })
        .transpose()
}

fn col_timestamp(row: &Row, idx: i32) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(col_i64(row, idx)?, 0)
        .ok_or_else(|| AppError::Internal(format!("column {} is not a timestamp", idx)))
}

fn json_or_empty(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({}))
}

impl MetaStore {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| meta_err(format!("Failed to open database: {}", e)))?;
        let store = Self { db };
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database (development and tests).
    pub async fn new_memory() -> Result<Self> {
        Self::new_local(":memory:").await
    }

    fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| meta_err(format!("Failed to get connection: {}", e)))
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        const SCHEMA: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                blob_url TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                institution TEXT NOT NULL,
                document_type TEXT NOT NULL,
                category TEXT,
                keywords TEXT NOT NULL,
                publication_date TEXT,
                language TEXT NOT NULL,
                uploaded_by TEXT NOT NULL,
                metadata TEXT NOT NULL,
                processing_status TEXT NOT NULL,
                processing_error TEXT,
                passage_count INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_documents_processing
                ON documents (processing_status, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_documents_status_institution
                ON documents (status, institution)",
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                role TEXT NOT NULL,
                credit_balance INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS credit_transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount INTEGER NOT NULL,
                balance_after INTEGER NOT NULL,
                description TEXT NOT NULL,
                query_log_id TEXT,
                refund_of TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_credit_transactions_user
                ON credit_transactions (user_id, created_at)",
            "CREATE TABLE IF NOT EXISTS query_logs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT,
                query TEXT NOT NULL,
                kind TEXT NOT NULL,
                institution TEXT,
                threshold REAL NOT NULL,
                k INTEGER NOT NULL,
                cache_used INTEGER NOT NULL,
                results_count INTEGER NOT NULL,
                response_time_ms INTEGER NOT NULL,
                reliability REAL NOT NULL,
                confidence REAL NOT NULL,
                credits_charged INTEGER NOT NULL,
                sources TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_query_logs_user
                ON query_logs (user_id, created_at DESC)",
            "CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                query_log_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                rating INTEGER,
                comment TEXT,
                tags TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE (user_id, query_log_id)
            )",
            "CREATE TABLE IF NOT EXISTS maintenance (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                enabled INTEGER NOT NULL DEFAULT 0,
                title TEXT,
                message TEXT,
                starts_at INTEGER,
                ends_at INTEGER,
                allow_user_ids TEXT NOT NULL DEFAULT '[]'
            )",
            "CREATE TABLE IF NOT EXISTS prompt_templates (
                id TEXT PRIMARY KEY,
                provider TEXT NOT NULL,
                role TEXT NOT NULL,
                version INTEGER NOT NULL,
                content TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE (provider, role, version)
            )",
        ];

        for statement in SCHEMA {
            conn.execute(statement, ())
                .await
                .map_err(|e| meta_err(format!("Failed to initialize schema: {}", e)))?;
        }

        Ok(())
    }

    // ============== Document operations ==============

    /// Insert a freshly uploaded document.
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO documents (
                id, title, original_filename, blob_url, size_bytes, institution,
                document_type, category, keywords, publication_date, language,
                uploaded_by, metadata, processing_status, processing_error,
                passage_count, status, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                doc.id.to_string(),
                doc.title.clone(),
                doc.original_filename.clone(),
                doc.blob_url.clone(),
                doc.size_bytes as i64,
                doc.institution.clone(),
                doc.document_type.as_str(),
                doc.category.clone(),
                serde_json::to_string(&doc.keywords).unwrap_or_else(|_| "[]".to_string()),
                doc.publication_date.map(|d| d.to_string()),
                doc.language.clone(),
                doc.uploaded_by.clone(),
                doc.metadata.to_string(),
                doc.processing_status.as_str(),
                doc.processing_error.clone(),
                doc.passage_count as i64,
                doc.status.as_str(),
                doc.created_at.timestamp(),
                doc.updated_at.timestamp(),
            ],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to insert document: {}", e)))?;
        Ok(())
    }

    fn document_from_row(row: &Row) -> Result<Document> {
        let keywords: Vec<String> =
            serde_json::from_str(&col_text(row, 8)?).unwrap_or_default();
        let publication_date = col_opt_text(row, 9)?
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok());
        Ok(Document {
            id: col_uuid(row, 0)?,
            title: col_text(row, 1)?,
            original_filename: col_text(row, 2)?,
            blob_url: col_text(row, 3)?,
            size_bytes: col_i64(row, 4)? as u64,
            institution: col_text(row, 5)?,
            document_type: col_text(row, 6)?.parse()?,
            category: col_opt_text(row, 7)?,
            keywords,
            publication_date,
            language: col_text(row, 10)?,
            uploaded_by: col_text(row, 11)?,
            metadata: json_or_empty(&col_text(row, 12)?),
            processing_status: col_text(row, 13)?.parse()?,
            processing_error: col_opt_text(row, 14)?,
            passage_count: col_i64(row, 15)? as u32,
            status: col_text(row, 16)?.parse()?,
            created_at: col_timestamp(row, 17)?,
            updated_at: col_timestamp(row, 18)?,
        })
    }

    const DOCUMENT_COLUMNS: &'static str = "id, title, original_filename, blob_url, size_bytes, \
        institution, document_type, category, keywords, publication_date, language, uploaded_by, \
        metadata, processing_status, processing_error, passage_count, status, created_at, updated_at";

    /// Fetch a document by id.
    pub async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM documents WHERE id = ?",
                    Self::DOCUMENT_COLUMNS
                ),
                [id.to_string()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to query document: {}", e)))?;

        match rows.next().await.map_err(meta_err)? {
            Some(row) => Ok(Some(Self::document_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// List documents with optional filters, newest first.
    pub async fn list_documents(
        &self,
        status: Option<VisibilityStatus>,
        processing: Option<ProcessingStatus>,
        institution: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Document>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM documents
                     WHERE (?1 IS NULL OR status = ?1)
                       AND (?2 IS NULL OR processing_status = ?2)
                       AND (?3 IS NULL OR institution = ?3)
                     ORDER BY created_at DESC
                     LIMIT ?4 OFFSET ?5",
                    Self::DOCUMENT_COLUMNS
                ),
                libsql::params![
                    status.map(|s| s.as_str().to_string()),
                    processing.map(|s| s.as_str().to_string()),
                    institution.map(str::to_string),
                    limit as i64,
                    offset as i64,
                ],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to list documents: {}", e)))?;

        let mut documents = Vec::new();
        while let Some(row) = rows.next().await.map_err(meta_err)? {
            documents.push(Self::document_from_row(&row)?);
        }
        Ok(documents)
    }

    /// Compare-and-set the processing status. Returns whether the transition
    /// was applied; a false return means another worker holds the slot or
    /// the document moved on.
    pub async fn cas_processing_status(
        &self,
        id: Uuid,
        from: ProcessingStatus,
        to: ProcessingStatus,
    ) -> Result<bool> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE documents SET processing_status = ?, updated_at = ?
                 WHERE id = ? AND processing_status = ?",
                libsql::params![
                    to.as_str(),
                    Utc::now().timestamp(),
                    id.to_string(),
                    from.as_str(),
                ],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to update processing status: {}", e)))?;
        Ok(affected > 0)
    }

    /// Record a terminal ingestion failure.
    pub async fn mark_processing_failed(&self, id: Uuid, error: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE documents
             SET processing_status = 'failed', processing_error = ?, updated_at = ?
             WHERE id = ?",
            libsql::params![error, Utc::now().timestamp(), id.to_string()],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to mark document failed: {}", e)))?;
        Ok(())
    }

    /// Record a completed ingestion run.
    pub async fn mark_processing_completed(&self, id: Uuid, passage_count: u32) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "UPDATE documents
             SET processing_status = 'completed', processing_error = NULL,
                 passage_count = ?, updated_at = ?
             WHERE id = ?",
            libsql::params![passage_count as i64, Utc::now().timestamp(), id.to_string()],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to mark document completed: {}", e)))?;
        Ok(())
    }

    /// Change a document's catalog visibility.
    pub async fn set_visibility(&self, id: Uuid, status: VisibilityStatus) -> Result<bool> {
        let conn = self.connection()?;
        let affected = conn
            .execute(
                "UPDATE documents SET status = ?, updated_at = ? WHERE id = ?",
                libsql::params![status.as_str(), Utc::now().timestamp(), id.to_string()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to set visibility: {}", e)))?;
        Ok(affected > 0)
    }

    /// Reset documents stuck in `processing` for longer than `older_than_s`
    /// back to `pending`. Returns their ids so the caller can re-enqueue.
    pub async fn reset_stale_processing(&self, older_than_s: i64) -> Result<Vec<Uuid>> {
        let conn = self.connection()?;
        let cutoff = Utc::now().timestamp() - older_than_s;

        let mut rows = conn
            .query(
                "SELECT id FROM documents
                 WHERE processing_status = 'processing' AND updated_at < ?",
                [cutoff],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to query stale documents: {}", e)))?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await.map_err(meta_err)? {
            ids.push(col_uuid(&row, 0)?);
        }

        for id in &ids {
            conn.execute(
                "UPDATE documents SET processing_status = 'pending', updated_at = ?
                 WHERE id = ? AND processing_status = 'processing'",
                libsql::params![Utc::now().timestamp(), id.to_string()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to reset stale document: {}", e)))?;
        }
        Ok(ids)
    }

    // ============== User operations ==============

    fn user_from_row(row: &Row) -> Result<UserAccount> {
        Ok(UserAccount {
            id: col_text(row, 0)?,
            email: col_text(row, 1)?,
            role: col_text(row, 2)?.parse::<UserRole>()?,
            credit_balance: col_i64(row, 3)?,
            created_at: col_timestamp(row, 4)?,
            updated_at: col_timestamp(row, 5)?,
        })
    }

    /// Fetch a user by id.
    pub async fn get_user(&self, id: &str) -> Result<Option<UserAccount>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, email, role, credit_balance, created_at, updated_at
                 FROM users WHERE id = ?",
                [id],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to query user: {}", e)))?;

        match rows.next().await.map_err(meta_err)? {
            Some(row) => Ok(Some(Self::user_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Create the user row on first sight; refresh email/role on later
    /// sights. Returns the account and whether it was just created.
    pub async fn ensure_user(
        &self,
        id: &str,
        email: &str,
        role: UserRole,
    ) -> Result<(UserAccount, bool)> {
        let conn = self.connection()?;
        let now = Utc::now().timestamp();

        let inserted = conn
            .execute(
                "INSERT INTO users (id, email, role, credit_balance, created_at, updated_at)
                 VALUES (?, ?, ?, 0, ?, ?)
                 ON CONFLICT (id) DO NOTHING",
                libsql::params![id, email, role.as_str(), now, now],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to insert user: {}", e)))?;
        let created = inserted > 0;

        if !created {
            conn.execute(
                "UPDATE users SET email = ?, role = ?, updated_at = ?
                 WHERE id = ? AND (email != ? OR role != ?)",
                libsql::params![email, role.as_str(), now, id, email, role.as_str()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to refresh user: {}", e)))?;
        }

        let account = self
            .get_user(id)
            .await?
            .ok_or_else(|| AppError::Internal("user vanished after upsert".to_string()))?;
        Ok((account, created))
    }

    // ============== Credit ledger operations ==============

    fn transaction_from_row(row: &Row) -> Result<CreditTransaction> {
        Ok(CreditTransaction {
            id: col_uuid(row, 0)?,
            user_id: col_text(row, 1)?,
            kind: col_text(row, 2)?.parse::<TransactionKind>()?,
            amount: col_i64(row, 3)?,
            balance_after: col_i64(row, 4)?,
            description: col_text(row, 5)?,
            query_log_id: col_opt_uuid(row, 6)?,
            refund_of: col_opt_uuid(row, 7)?,
            created_at: col_timestamp(row, 8)?,
        })
    }

    /// Atomically append a ledger entry and update the denormalized balance.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InsufficientCredits`] when the entry would drive
    /// the balance negative, and [`AppError::NotFound`] for unknown users.
    /// Callers serialize per user; the surrounding transaction makes the
    /// check-and-append atomic against concurrent writers.
    pub async fn append_transaction(
        &self,
        user_id: &str,
        kind: TransactionKind,
        amount: i64,
        description: &str,
        query_log_id: Option<Uuid>,
        refund_of: Option<Uuid>,
    ) -> Result<CreditTransaction> {
        let conn = self.connection()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| meta_err(format!("Failed to begin transaction: {}", e)))?;

        let mut rows = tx
            .query("SELECT credit_balance FROM users WHERE id = ?", [user_id])
            .await
            .map_err(|e| meta_err(format!("Failed to read balance: {}", e)))?;
        let balance = match rows.next().await.map_err(meta_err)? {
            Some(row) => col_i64(&row, 0)?,
            None => return Err(AppError::NotFound(format!("user {}", user_id))),
        };

        let balance_after = balance + amount;
        if balance_after < 0 {
            return Err(AppError::InsufficientCredits);
        }

        let entry = CreditTransaction {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            kind,
            amount,
            balance_after,
            description: description.to_string(),
            query_log_id,
            refund_of,
            created_at: Utc::now(),
        };

        tx.execute(
            "INSERT INTO credit_transactions (
                id, user_id, kind, amount, balance_after, description,
                query_log_id, refund_of, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                entry.id.to_string(),
                entry.user_id.clone(),
                entry.kind.as_str(),
                entry.amount,
                entry.balance_after,
                entry.description.clone(),
                entry.query_log_id.map(|id| id.to_string()),
                entry.refund_of.map(|id| id.to_string()),
                entry.created_at.timestamp(),
            ],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to append transaction: {}", e)))?;

        tx.execute(
            "UPDATE users SET credit_balance = ?, updated_at = ? WHERE id = ?",
            libsql::params![balance_after, entry.created_at.timestamp(), user_id],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to update balance: {}", e)))?;

        tx.commit()
            .await
            .map_err(|e| meta_err(format!("Failed to commit transaction: {}", e)))?;
        Ok(entry)
    }

    /// Fetch a ledger entry by id.
    pub async fn get_transaction(&self, id: Uuid) -> Result<Option<CreditTransaction>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, user_id, kind, amount, balance_after, description,
                        query_log_id, refund_of, created_at
                 FROM credit_transactions WHERE id = ?",
                [id.to_string()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to query transaction: {}", e)))?;

        match rows.next().await.map_err(meta_err)? {
            Some(row) => Ok(Some(Self::transaction_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Find an existing refund that references the given deduction.
    pub async fn find_refund_for(&self, deduction_id: Uuid) -> Result<Option<Uuid>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT id FROM credit_transactions WHERE refund_of = ? LIMIT 1",
                [deduction_id.to_string()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to query refund: {}", e)))?;
        match rows.next().await.map_err(meta_err)? {
            Some(row) => Ok(Some(col_uuid(&row, 0)?)),
            None => Ok(None),
        }
    }

    /// All ledger entries for a user, oldest first.
    pub async fn list_transactions(&self, user_id: &str) -> Result<Vec<CreditTransaction>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT id, user_id, kind, amount, balance_after, description,
                        query_log_id, refund_of, created_at
                 FROM credit_transactions WHERE user_id = ?
                 ORDER BY created_at ASC, rowid ASC",
                [user_id],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to list transactions: {}", e)))?;

        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(meta_err)? {
            entries.push(Self::transaction_from_row(&row)?);
        }
        Ok(entries)
    }

    /// Sum of all ledger amounts for a user (invariant check).
    pub async fn sum_transactions(&self, user_id: &str) -> Result<i64> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions WHERE user_id = ?",
                [user_id],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to sum transactions: {}", e)))?;
        match rows.next().await.map_err(meta_err)? {
            Some(row) => col_i64(&row, 0),
            None => Ok(0),
        }
    }

    // ============== Query log operations ==============

    /// Append a query log entry.
    pub async fn insert_query_log(&self, log: &QueryLog) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO query_logs (
                id, user_id, session_id, query, kind, institution, threshold, k,
                cache_used, results_count, response_time_ms, reliability,
                confidence, credits_charged, sources, metadata, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            libsql::params![
                log.id.to_string(),
                log.user_id.clone(),
                log.session_id.clone(),
                log.query.clone(),
                log.kind.as_str(),
                log.institution.clone(),
                log.threshold as f64,
                log.k as i64,
                log.cache_used as i64,
                log.results_count as i64,
                log.response_time_ms as i64,
                log.reliability as f64,
                log.confidence as f64,
                log.credits_charged,
                serde_json::to_string(&log.sources).unwrap_or_else(|_| "[]".to_string()),
                log.metadata.to_string(),
                log.created_at.timestamp(),
            ],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to insert query log: {}", e)))?;
        Ok(())
    }

    fn query_log_from_row(row: &Row) -> Result<QueryLog> {
        let sources: Vec<SourceRef> =
            serde_json::from_str(&col_text(row, 14)?).unwrap_or_default();
        Ok(QueryLog {
            id: col_uuid(row, 0)?,
            user_id: col_text(row, 1)?,
            session_id: col_opt_text(row, 2)?,
            query: col_text(row, 3)?,
            kind: col_text(row, 4)?.parse::<QueryKind>()?,
            institution: col_opt_text(row, 5)?,
            threshold: col_f64(row, 6)? as f32,
            k: col_i64(row, 7)? as u32,
            cache_used: col_i64(row, 8)? != 0,
            results_count: col_i64(row, 9)? as u32,
            response_time_ms: col_i64(row, 10)? as u64,
            reliability: col_f64(row, 11)? as f32,
            confidence: col_f64(row, 12)? as f32,
            credits_charged: col_i64(row, 13)?,
            sources,
            metadata: json_or_empty(&col_text(row, 15)?),
            created_at: col_timestamp(row, 16)?,
        })
    }

    const QUERY_LOG_COLUMNS: &'static str = "id, user_id, session_id, query, kind, institution, \
        threshold, k, cache_used, results_count, response_time_ms, reliability, confidence, \
        credits_charged, sources, metadata, created_at";

    /// Fetch a query log entry by id.
    pub async fn get_query_log(&self, id: Uuid) -> Result<Option<QueryLog>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM query_logs WHERE id = ?",
                    Self::QUERY_LOG_COLUMNS
                ),
                [id.to_string()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to query log entry: {}", e)))?;
        match rows.next().await.map_err(meta_err)? {
            Some(row) => Ok(Some(Self::query_log_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// A user's query history, newest first.
    pub async fn list_query_logs(
        &self,
        user_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<QueryLog>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM query_logs WHERE user_id = ?
                     ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?",
                    Self::QUERY_LOG_COLUMNS
                ),
                libsql::params![user_id, limit as i64, offset as i64],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to list query logs: {}", e)))?;

        let mut logs = Vec::new();
        while let Some(row) = rows.next().await.map_err(meta_err)? {
            logs.push(Self::query_log_from_row(&row)?);
        }
        Ok(logs)
    }

    // ============== Feedback operations ==============

    /// Insert or update the caller's feedback for a query log.
    pub async fn upsert_feedback(
        &self,
        user_id: &str,
        query_log_id: Uuid,
        kind: FeedbackKind,
        rating: Option<u8>,
        comment: Option<&str>,
        tags: &[String],
    ) -> Result<Feedback> {
        let conn = self.connection()?;
        let now = Utc::now();
        let id = Uuid::new_v4();

        conn.execute(
            "INSERT INTO feedback (id, user_id, query_log_id, kind, rating, comment, tags,
                                   created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id, query_log_id) DO UPDATE SET
                 kind = excluded.kind, rating = excluded.rating,
                 comment = excluded.comment, tags = excluded.tags,
                 updated_at = excluded.updated_at",
            libsql::params![
                id.to_string(),
                user_id,
                query_log_id.to_string(),
                kind.as_str(),
                rating.map(|r| r as i64),
                comment.map(str::to_string),
                serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string()),
                now.timestamp(),
                now.timestamp(),
            ],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to upsert feedback: {}", e)))?;

        let mut rows = conn
            .query(
                "SELECT id, user_id, query_log_id, kind, rating, comment, tags,
                        created_at, updated_at
                 FROM feedback WHERE user_id = ? AND query_log_id = ?",
                libsql::params![user_id, query_log_id.to_string()],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to read feedback: {}", e)))?;

        let row = rows
            .next()
            .await
            .map_err(meta_err)?
            .ok_or_else(|| AppError::Internal("feedback vanished after upsert".to_string()))?;
        let tags: Vec<String> = serde_json::from_str(&col_text(&row, 6)?).unwrap_or_default();
        Ok(Feedback {
            id: col_uuid(&row, 0)?,
            user_id: col_text(&row, 1)?,
            query_log_id: col_uuid(&row, 2)?,
            kind: col_text(&row, 3)?.parse::<FeedbackKind>()?,
            rating: match row.get_value(4).map_err(meta_err)? {
                libsql::Value::Integer(i) => u8::try_from(i).ok(),
                _ => None,
            },
            comment: col_opt_text(&row, 5)?,
            tags,
            created_at: col_timestamp(&row, 7)?,
            updated_at: col_timestamp(&row, 8)?,
        })
    }

    // ============== Maintenance flag ==============

    /// Read the maintenance flag; absent row means disabled.
    pub async fn maintenance_flag(&self) -> Result<MaintenanceFlag> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT enabled, title, message, starts_at, ends_at, allow_user_ids
                 FROM maintenance WHERE id = 1",
                (),
            )
            .await
            .map_err(|e| meta_err(format!("Failed to read maintenance flag: {}", e)))?;

        match rows.next().await.map_err(meta_err)? {
            Some(row) => {
                let allow: Vec<String> =
                    serde_json::from_str(&col_text(&row, 5)?).unwrap_or_default();
                Ok(MaintenanceFlag {
                    enabled: col_i64(&row, 0)? != 0,
                    title: col_opt_text(&row, 1)?,
                    message: col_opt_text(&row, 2)?,
                    starts_at: match row.get_value(3).map_err(meta_err)? {
                        libsql::Value::Integer(ts) => DateTime::from_timestamp(ts, 0),
                        _ => None,
                    },
                    ends_at: match row.get_value(4).map_err(meta_err)? {
                        libsql::Value::Integer(ts) => DateTime::from_timestamp(ts, 0),
                        _ => None,
                    },
                    allow_user_ids: allow,
                })
            }
            None => Ok(MaintenanceFlag::default()),
        }
    }

    /// Replace the maintenance flag.
    pub async fn set_maintenance_flag(&self, flag: &MaintenanceFlag) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO maintenance (id, enabled, title, message, starts_at, ends_at, allow_user_ids)
             VALUES (1, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
                 enabled = excluded.enabled, title = excluded.title,
                 message = excluded.message, starts_at = excluded.starts_at,
                 ends_at = excluded.ends_at, allow_user_ids = excluded.allow_user_ids",
            libsql::params![
                flag.enabled as i64,
                flag.title.clone(),
                flag.message.clone(),
                flag.starts_at.map(|t| t.timestamp()),
                flag.ends_at.map(|t| t.timestamp()),
                serde_json::to_string(&flag.allow_user_ids).unwrap_or_else(|_| "[]".to_string()),
            ],
        )
        .await
        .map_err(|e| meta_err(format!("Failed to set maintenance flag: {}", e)))?;
        Ok(())
    }

    // ============== Prompt templates ==============

    /// The newest template for (provider, role), when one is configured.
    pub async fn latest_prompt_template(
        &self,
        provider: &str,
        role: &str,
    ) -> Result<Option<String>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT content FROM prompt_templates
                 WHERE provider = ? AND role = ?
                 ORDER BY version DESC LIMIT 1",
                libsql::params![provider, role],
            )
            .await
            .map_err(|e| meta_err(format!("Failed to read prompt template: {}", e)))?;
        match rows.next().await.map_err(meta_err)? {
            Some(row) => Ok(Some(col_text(&row, 0)?)),
            None => Ok(None),
        }
    }
}
