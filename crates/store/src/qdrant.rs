//! Qdrant-backed chunk store: k-NN search against the cosine collection with
//! conjunctive payload filters.

use std::collections::HashMap;

use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{Condition, Filter, SearchPointsBuilder, Value};

use laureate_config::StoreConfig;

use crate::{ChunkRecord, ChunkStore, ScoredChunk, SearchFilters, StoreError, rank_chunks};

pub struct QdrantStore {
    client: Qdrant,
    collection: String,
}

impl QdrantStore {
    pub fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let mut builder = Qdrant::from_url(&config.url);
        if !config.api_key.is_empty() {
            builder = builder.api_key(config.api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            client,
            collection: config.collection.clone(),
        })
    }

    fn build_filter(filters: &SearchFilters) -> Option<Filter> {
        if filters.is_empty() {
            return None;
        }
        let conditions: Vec<Condition> = filters
            .iter()
            .map(|(field, value)| {
                if field == "year_awarded" {
                    // Validated as an integer when the filter was built.
                    let year = value.parse::<i64>().unwrap_or_default();
                    Condition::matches(field, year)
                } else {
                    Condition::matches(field, value.to_string())
                }
            })
            .collect();
        Some(Filter::must(conditions))
    }
}

#[async_trait]
impl ChunkStore for QdrantStore {
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        score_threshold: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let mut request =
            SearchPointsBuilder::new(&self.collection, vector.to_vec(), top_k as u64)
                .with_payload(true)
                .score_threshold(score_threshold);
        if let Some(filter) = Self::build_filter(filters) {
            request = request.filter(filter);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let mut candidates = Vec::with_capacity(response.result.len());
        for point in response.result {
            match chunk_from_payload(&point.payload) {
                Some(chunk) => candidates.push((chunk, point.score)),
                None => {
                    tracing::warn!(score = point.score, "skipping point with malformed payload");
                }
            }
        }
        tracing::debug!(
            collection = %self.collection,
            requested = top_k,
            returned = candidates.len(),
            "vector search complete"
        );
        Ok(rank_chunks(candidates, top_k))
    }
}

// ── Payload extraction ────────────────────────────────────────────────────────

fn payload_str(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        _ => None,
    }
}

fn payload_u32(payload: &HashMap<String, Value>, key: &str) -> Option<u32> {
    match payload.get(key)?.kind.as_ref()? {
        Kind::IntegerValue(i) => u32::try_from(*i).ok(),
        Kind::StringValue(s) => s.parse().ok(),
        _ => None,
    }
}

fn chunk_from_payload(payload: &HashMap<String, Value>) -> Option<ChunkRecord> {
    Some(ChunkRecord {
        chunk_id: payload_str(payload, "chunk_id")?,
        source_type: payload_str(payload, "source_type")?.parse().ok()?,
        chunk_index: payload_u32(payload, "chunk_index").unwrap_or(0),
        text: payload_str(payload, "text")?,
        laureate: payload_str(payload, "laureate")?,
        year_awarded: payload_u32(payload, "year_awarded")?,
        country: payload_str(payload, "country").unwrap_or_default(),
        gender: payload_str(payload, "gender").unwrap_or_default(),
        category: payload_str(payload, "category").unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SourceType;

    fn string_value(s: &str) -> Value {
        Value {
            kind: Some(Kind::StringValue(s.to_string())),
        }
    }

    fn int_value(i: i64) -> Value {
        Value {
            kind: Some(Kind::IntegerValue(i)),
        }
    }

    fn sample_payload() -> HashMap<String, Value> {
        HashMap::from([
            ("chunk_id".to_string(), string_value("1993_morrison_lecture_4")),
            ("source_type".to_string(), string_value("nobel_lecture")),
            ("chunk_index".to_string(), int_value(4)),
            ("text".to_string(), string_value("Word-work is sublime…")),
            ("laureate".to_string(), string_value("Toni Morrison")),
            ("year_awarded".to_string(), int_value(1993)),
            ("country".to_string(), string_value("United States")),
            ("gender".to_string(), string_value("female")),
            ("category".to_string(), string_value("Literature")),
        ])
    }

    #[test]
    fn payload_maps_onto_chunk_record() {
        let chunk = chunk_from_payload(&sample_payload()).unwrap();
        assert_eq!(chunk.chunk_id, "1993_morrison_lecture_4");
        assert_eq!(chunk.source_type, SourceType::NobelLecture);
        assert_eq!(chunk.chunk_index, 4);
        assert_eq!(chunk.year_awarded, 1993);
    }

    #[test]
    fn missing_required_field_drops_the_point() {
        let mut payload = sample_payload();
        payload.remove("laureate");
        assert!(chunk_from_payload(&payload).is_none());
    }

    #[test]
    fn year_as_string_still_parses() {
        let mut payload = sample_payload();
        payload.insert("year_awarded".to_string(), string_value("1993"));
        assert_eq!(chunk_from_payload(&payload).unwrap().year_awarded, 1993);
    }

    #[test]
    fn empty_filters_build_no_qdrant_filter() {
        assert!(QdrantStore::build_filter(&SearchFilters::new()).is_none());
        let mut filters = SearchFilters::new();
        filters.insert("laureate", "Toni Morrison").unwrap();
        filters.insert("year_awarded", "1993").unwrap();
        let filter = QdrantStore::build_filter(&filters).unwrap();
        assert_eq!(filter.must.len(), 2);
    }
}
