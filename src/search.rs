use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    time::Duration,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    catalog::{ChunkRecord, Snapshot},
    config::FusionWeights,
    doc_id::DocumentId,
    embedding::{Embedder, Embedding},
    error::{EmbeddingError, Result},
    fuzzy::FuzzyMatcher,
    text_util::{DEFAULT_CONTEXT_CHARS, highlight, single_line},
    vector_index::{SearchFilter, VectorIndex},
};

/// Default number of results returned by a search.
pub const DEFAULT_LIMIT: usize = 10;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Semantic,
    Fuzzy,
    #[default]
    Hybrid,
}

impl SearchMode {
    fn uses_semantic(self) -> bool {
        matches!(self, SearchMode::Semantic | SearchMode::Hybrid)
    }

    fn uses_fuzzy(self) -> bool {
        matches!(self, SearchMode::Fuzzy | SearchMode::Hybrid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Semantic,
    Fuzzy,
    Both,
}

impl std::fmt::Display for MatchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MatchType::Semantic => "semantic",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Both => "both",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub mode: SearchMode,
    pub document_id: Option<String>,
    pub page: Option<u32>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            mode: SearchMode::default(),
            document_id: None,
            page: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    fn filter(&self) -> SearchFilter<'_> {
        SearchFilter {
            document_id: self.document_id.as_deref(),
            page: self.page,
        }
    }
}

/// A ranked chunk. Scores are in `0..=1`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk_id: u64,
    pub document_id: String,
    pub filename: String,
    pub chunk_index: usize,
    pub page: Option<u32>,
    pub content: String,
    pub semantic_score: f32,
    pub fuzzy_score: f32,
    pub combined_score: f32,
    pub match_type: MatchType,
}

impl SearchHit {
    fn from_chunk(chunk: ChunkRecord, filename: String) -> Self {
        Self {
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            filename,
            chunk_index: chunk.chunk_index,
            page: chunk.page,
            content: chunk.content,
            semantic_score: 0.0,
            fuzzy_score: 0.0,
            combined_score: 0.0,
            match_type: MatchType::Semantic,
        }
    }

    fn semantic(chunk: ChunkRecord, filename: String, score: f32) -> Self {
        Self {
            semantic_score: score,
            combined_score: score,
            match_type: MatchType::Semantic,
            ..Self::from_chunk(chunk, filename)
        }
    }

    fn fuzzy(chunk: ChunkRecord, filename: String, score: f32) -> Self {
        Self {
            fuzzy_score: score,
            combined_score: score,
            match_type: MatchType::Fuzzy,
            ..Self::from_chunk(chunk, filename)
        }
    }
}

/// Merge semantic and fuzzy candidates into one ranking.
///
/// A chunk present in both lists gets `weights.combine(semantic, fuzzy)`
/// and [`MatchType::Both`]; every other chunk keeps its own score. The
/// result is sorted by combined score, highest first (ties keep semantic
/// candidates ahead of fuzzy ones), and truncated to `limit`.
pub fn fuse(
    semantic: Vec<SearchHit>,
    fuzzy: Vec<SearchHit>,
    weights: FusionWeights,
    limit: usize,
) -> Vec<SearchHit> {
    let mut merged = semantic;
    let mut by_chunk: HashMap<u64, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, hit)| (hit.chunk_id, i))
        .collect();

    for hit in fuzzy {
        match by_chunk.get(&hit.chunk_id) {
            Some(&i) => {
                let existing = &mut merged[i];
                existing.fuzzy_score = hit.fuzzy_score;
                existing.combined_score =
                    weights.combine(existing.semantic_score, hit.fuzzy_score);
                existing.match_type = MatchType::Both;
            }
            None => {
                by_chunk.insert(hit.chunk_id, merged.len());
                merged.push(hit);
            }
        }
    }

    merged.sort_by(|a, b| b.combined_score.total_cmp(&a.combined_score));
    merged.truncate(limit);
    merged
}

/// Runs semantic and fuzzy retrieval against a snapshot and fuses them.
pub struct HybridRetriever {
    embedder: Arc<dyn Embedder>,
    matcher: FuzzyMatcher,
    weights: FusionWeights,
    embed_timeout: Duration,
}

impl HybridRetriever {
    /// `embed_timeout` bounds how long a search waits for the query vector.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        matcher: FuzzyMatcher,
        weights: FusionWeights,
        embed_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            matcher,
            weights,
            embed_timeout,
        }
    }

    pub fn matcher(&self) -> &FuzzyMatcher {
        &self.matcher
    }

    pub fn search(
        &self,
        snapshot: &Snapshot,
        index: &dyn VectorIndex,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>> {
        if request.limit == 0 || request.query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let mut filenames = FilenameCache::new(snapshot);

        let semantic = if request.mode.uses_semantic() {
            let k = match request.mode {
                SearchMode::Hybrid => request.limit.saturating_mul(2),
                _ => request.limit,
            };
            self.semantic_candidates(snapshot, index, request, k, &mut filenames)?
        } else {
            Vec::new()
        };

        let fuzzy = if request.mode.uses_fuzzy() {
            self.fuzzy_candidates(snapshot, request, &mut filenames)?
        } else {
            Vec::new()
        };

        debug!(
            query = %request.query,
            mode = ?request.mode,
            semantic = semantic.len(),
            fuzzy = fuzzy.len(),
            "fusing candidates"
        );

        Ok(fuse(semantic, fuzzy, self.weights, request.limit))
    }

    fn semantic_candidates(
        &self,
        snapshot: &Snapshot,
        index: &dyn VectorIndex,
        request: &SearchRequest,
        k: usize,
        filenames: &mut FilenameCache<'_>,
    ) -> Result<Vec<SearchHit>> {
        let query = self.embed_query(&request.query)?;
        let neighbors =
            index.search(snapshot.transaction(), &query, k, request.filter())?;

        let mut hits = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let Some(chunk) = snapshot.chunk(neighbor.chunk_id)? else {
                warn!(chunk = neighbor.chunk_id, "vector without chunk row");
                continue;
            };
            let filename = filenames.get(&chunk.document_id)?;
            hits.push(SearchHit::semantic(chunk, filename, neighbor.similarity()));
        }
        Ok(hits)
    }

    /// Embed the query on the rayon pool, giving up after the embedding
    /// timeout. A late result is dropped with its channel.
    fn embed_query(&self, query: &str) -> Result<Embedding> {
        let (tx, rx) = mpsc::channel();
        let embedder = Arc::clone(&self.embedder);
        let text = query.to_string();
        rayon::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| embedder.embed(&text)))
                .unwrap_or_else(|_| {
                    Err(EmbeddingError::Failed("embedder panicked".into()))
                });
            let _ = tx.send(result);
        });

        match rx.recv_timeout(self.embed_timeout) {
            Ok(result) => Ok(result?),
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.embed_timeout, "query embedding timed out");
                Err(EmbeddingError::QueryTimeout {
                    timeout: self.embed_timeout,
                }
                .into())
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(EmbeddingError::Failed("embedding worker stopped".into()).into())
            }
        }
    }

    /// Every chunk passing the filters whose fuzzy score clears the
    /// threshold, best first.
    fn fuzzy_candidates(
        &self,
        snapshot: &Snapshot,
        request: &SearchRequest,
        filenames: &mut FilenameCache<'_>,
    ) -> Result<Vec<SearchHit>> {
        let chunks = match &request.document_id {
            Some(document_id) => snapshot.document_chunks(document_id)?,
            None => snapshot.chunks()?,
        };

        let mut scored: Vec<(ChunkRecord, u8)> = chunks
            .into_par_iter()
            .filter(|chunk| request.page.is_none() || chunk.page == request.page)
            .filter_map(|chunk| {
                let score = self.matcher.matches(&request.query, &chunk.content)?;
                Some((chunk, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.id.cmp(&b.0.id)));

        let mut hits = Vec::with_capacity(scored.len());
        for (chunk, score) in scored {
            let filename = filenames.get(&chunk.document_id)?;
            hits.push(SearchHit::fuzzy(chunk, filename, f32::from(score) / 100.0));
        }
        Ok(hits)
    }
}

/// Memoizes document filename lookups for one search.
struct FilenameCache<'a> {
    snapshot: &'a Snapshot,
    names: HashMap<String, String>,
}

impl<'a> FilenameCache<'a> {
    fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            names: HashMap::new(),
        }
    }

    fn get(&mut self, document_id: &str) -> Result<String> {
        if let Some(name) = self.names.get(document_id) {
            return Ok(name.clone());
        }
        let name = self
            .snapshot
            .document(document_id)?
            .map(|d| d.filename)
            .unwrap_or_default();
        self.names.insert(document_id.to_string(), name.clone());
        Ok(name)
    }
}

pub fn format_human(hits: &[SearchHit], query: &str) {
    if hits.is_empty() {
        println!("No results found.");
        return;
    }

    for (rank, hit) in hits.iter().enumerate() {
        let page = hit
            .page
            .map(|p| format!(" p.{p}"))
            .unwrap_or_default();
        println!(
            "{:>3}. [{:.3} {}] {}{} {} chunk {}",
            rank + 1,
            hit.combined_score,
            hit.match_type,
            hit.filename,
            page,
            DocumentId::from_full(&hit.document_id),
            hit.chunk_index
        );
        let snippet = highlight(
            &single_line(&hit.content),
            query,
            DEFAULT_CONTEXT_CHARS,
        );
        println!("     {snippet}");
    }
    println!("\n{} result(s)", hits.len());
}

pub fn format_json(hits: &[SearchHit], query: &str) -> Result<()> {
    let body = serde_json::json!({
        "query": query,
        "result_count": hits.len(),
        "results": hits,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
