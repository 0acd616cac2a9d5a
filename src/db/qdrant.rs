//! Qdrant-backed vector index.
//!
//! Enabled with the `qdrant` feature. Point ids are UUIDv5 over
//! (document id, chunk index), so reprocessing a document overwrites its
//! previous points instead of duplicating them.

use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::vectors_config::Config as VectorsConfigKind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use uuid::Uuid;

use super::vectorstore::{PassagePayload, PassagePoint, ScoredPassage, SearchFilter, VectorIndex};
use crate::types::{AppError, Result};

fn vector_err(e: impl std::fmt::Display) -> AppError {
    AppError::AdapterUnavailable {
        adapter: "vector-index",
        message: e.to_string(),
        refund_txn_id: None,
    }
}

/// Vector index backed by a Qdrant server.
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorIndex {
    /// Connect to Qdrant at `url`.
    pub fn new(url: &str, api_key: Option<String>, collection: String) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .api_key(api_key)
            .build()
            .map_err(vector_err)?;
        Ok(Self { client, collection })
    }

    /// Deterministic point id for a passage.
    fn point_id(document_id: Uuid, chunk_index: u32) -> String {
        Uuid::new_v5(&document_id, chunk_index.to_string().as_bytes()).to_string()
    }

    fn payload_for(payload: &PassagePayload) -> Result<Payload> {
        let value = serde_json::json!({
            "document_id": payload.document_id.to_string(),
            "chunk_index": payload.chunk_index,
            "page": payload.page,
            "line_start": payload.line_start,
            "line_end": payload.line_end,
            "institution": payload.institution,
            "title": payload.title,
            "text": payload.text,
        });
        Payload::try_from(value).map_err(|e| AppError::Internal(format!("payload encode: {}", e)))
    }

    fn field_str(
        map: &std::collections::HashMap<String, qdrant_client::qdrant::Value>,
        key: &str,
    ) -> Option<String> {
        map.get(key).and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn field_u32(
        map: &std::collections::HashMap<String, qdrant_client::qdrant::Value>,
        key: &str,
    ) -> Option<u32> {
        map.get(key).and_then(|v| match &v.kind {
            Some(Kind::IntegerValue(i)) => u32::try_from(*i).ok(),
            _ => None,
        })
    }

    fn decode_payload(
        map: &std::collections::HashMap<String, qdrant_client::qdrant::Value>,
    ) -> Result<PassagePayload> {
        let document_id = Self::field_str(map, "document_id")
            .and_then(|s| Uuid::parse_str(&s).ok())
            .ok_or_else(|| AppError::Internal("point payload missing document_id".to_string()))?;
        Ok(PassagePayload {
            document_id,
            chunk_index: Self::field_u32(map, "chunk_index").unwrap_or(0),
            page: Self::field_u32(map, "page").unwrap_or(0),
            line_start: Self::field_u32(map, "line_start").unwrap_or(0),
            line_end: Self::field_u32(map, "line_end").unwrap_or(0),
            institution: Self::field_str(map, "institution").unwrap_or_default(),
            title: Self::field_str(map, "title").unwrap_or_default(),
            text: Self::field_str(map, "text").unwrap_or_default(),
        })
    }

    fn document_filter(document_id: Uuid) -> Filter {
        Filter::must([Condition::matches(
            "document_id",
            document_id.to_string(),
        )])
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    fn provider_name(&self) -> &'static str {
        "qdrant"
    }

    async fn ensure_collection(&self, dim: usize) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.collection)
            .await
            .map_err(vector_err)?;

        if !exists {
            self.client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(dim as u64, Distance::Cosine)),
                )
                .await
                .map_err(vector_err)?;
            return Ok(());
        }

        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(vector_err)?;
        let existing = info
            .result
            .and_then(|r| r.config)
            .and_then(|c| c.params)
            .and_then(|p| p.vectors_config)
            .and_then(|v| v.config)
            .and_then(|cfg| match cfg {
                VectorsConfigKind::Params(params) => Some(params.size),
                VectorsConfigKind::ParamsMap(_) => None,
            });

        match existing {
            Some(size) if size == dim as u64 => Ok(()),
            Some(size) => Err(AppError::InvariantViolation(format!(
                "qdrant collection {} has dimension {}, configured {}",
                self.collection, size, dim
            ))),
            None => Err(AppError::InvariantViolation(format!(
                "qdrant collection {} has an unreadable vector schema",
                self.collection
            ))),
        }
    }

    async fn upsert(&self, points: &[PassagePoint]) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }
        let mut structs = Vec::with_capacity(points.len());
        for point in points {
            structs.push(PointStruct::new(
                Self::point_id(point.payload.document_id, point.payload.chunk_index),
                point.vector.clone(),
                Self::payload_for(&point.payload)?,
            ));
        }
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, structs).wait(true))
            .await
            .map_err(vector_err)?;
        Ok(points.len())
    }

    async fn search(
        &self,
        vector: &[f32],
        limit: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<ScoredPassage>> {
        let mut builder =
            SearchPointsBuilder::new(&self.collection, vector.to_vec(), limit as u64)
                .with_payload(true);
        if let Some(inst) = &filter.institution {
            builder = builder.filter(Filter::must([Condition::matches(
                "institution",
                inst.clone(),
            )]));
        }

        let response = self
            .client
            .search_points(builder)
            .await
            .map_err(vector_err)?;

        response
            .result
            .into_iter()
            .map(|hit| {
                Ok(ScoredPassage {
                    score: hit.score,
                    payload: Self::decode_payload(&hit.payload)?,
                })
            })
            .collect()
    }

    async fn delete_by_document(&self, document_id: Uuid) -> Result<u64> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection)
                    .points(Self::document_filter(document_id))
                    .wait(true),
            )
            .await
            .map_err(vector_err)?;
        // Qdrant does not report how many points the filter removed.
        Ok(0)
    }

    async fn count_by_document(&self, document_id: Uuid) -> Result<usize> {
        let response = self
            .client
            .count(
                CountPointsBuilder::new(&self.collection)
                    .filter(Self::document_filter(document_id))
                    .exact(true),
            )
            .await
            .map_err(vector_err)?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }
}
