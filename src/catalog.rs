use std::{
    collections::BTreeMap,
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use redb::{
    Database,
    ReadTransaction,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    embedding::Embedding,
    error::Result,
    vector_index::{VectorIndex, VectorKey},
};

const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");
const SOURCES: TableDefinition<&str, &str> = TableDefinition::new("sources");
const CHUNKS: TableDefinition<u64, &[u8]> = TableDefinition::new("chunks");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_CHUNK_ID: &str = "next_chunk_id";

/// Setting holding the vector dimension fixed at first initialization.
pub const DIMENSION_SETTING: &str = "dimension";
/// Setting holding the embedding model the index was built with.
pub const MODEL_SETTING: &str = "model_name";
/// Setting holding the ColBERT model chosen with `model set`.
pub const MODEL_ID_SETTING: &str = "colbert_model";

/// A stored document row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub source_path: String,
    pub file_type: String,
    pub total_chunks: usize,
    /// Seconds since the Unix epoch.
    pub indexed_at: u64,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Chunk ids in chunk-index order.
    pub chunk_ids: Vec<u64>,
}

/// A stored chunk row. The vector lives in the [`VectorIndex`] under `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: u64,
    pub document_id: String,
    pub chunk_index: usize,
    pub content: String,
    pub page: Option<u32>,
    pub char_start: usize,
    pub char_end: usize,
}

/// Document attributes supplied by the caller when indexing.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub filename: String,
    pub source_path: String,
    pub file_type: String,
    pub size_bytes: u64,
    pub metadata: BTreeMap<String, String>,
}

/// An embedded chunk waiting to be written.
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub page: Option<u32>,
    pub char_start: usize,
    pub char_end: usize,
    pub embedding: Embedding,
}

/// Result of [`DocumentCatalog::replace_document`].
#[derive(Debug, Clone)]
pub struct ReplaceOutcome {
    pub record: DocumentRecord,
    /// Whether an earlier version of the document was removed.
    pub replaced: bool,
}

/// Document and chunk metadata, stored alongside the vector index in a
/// single redb database so one write transaction covers both.
pub struct DocumentCatalog {
    db: Database,
}

impl DocumentCatalog {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(SOURCES)?;
        txn.open_table(CHUNKS)?;
        txn.open_table(SETTINGS)?;
        txn.open_table(COUNTERS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Create the tables of `index` in this database.
    pub fn attach_index(&self, index: &dyn VectorIndex) -> Result<()> {
        let txn = self.db.begin_write()?;
        index.create(&txn)?;
        txn.commit()?;
        Ok(())
    }

    /// A consistent read view of the committed state.
    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            txn: self.db.begin_read()?,
        })
    }

    // -- Documents --

    /// Write a document with its chunks and vectors, replacing any earlier
    /// version with the same id or source path.
    ///
    /// Everything happens in one write transaction: readers observe either
    /// the old document or the new one, never a mix, and an error leaves the
    /// previous state untouched.
    pub fn replace_document(
        &self,
        index: &dyn VectorIndex,
        document: NewDocument,
        chunks: Vec<NewChunk>,
    ) -> Result<ReplaceOutcome> {
        let txn = self.db.begin_write()?;

        let mut replaced = remove_document(&txn, index, &document.id)?.is_some();
        if let Some(previous) = source_owner(&txn, &document.source_path)?
            && previous != document.id
        {
            replaced |= remove_document(&txn, index, &previous)?.is_some();
        }

        let first_id = allocate_chunk_ids(&txn, chunks.len() as u64)?;
        let chunk_ids: Vec<u64> =
            (first_id..first_id + chunks.len() as u64).collect();

        let record = DocumentRecord {
            id: document.id,
            filename: document.filename,
            source_path: document.source_path,
            file_type: document.file_type,
            total_chunks: chunks.len(),
            indexed_at: unix_now(),
            size_bytes: document.size_bytes,
            metadata: document.metadata,
            chunk_ids,
        };

        {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let bytes = serde_json::to_vec(&record)?;
            documents.insert(record.id.as_str(), bytes.as_slice())?;

            let mut sources = txn.open_table(SOURCES)?;
            sources.insert(record.source_path.as_str(), record.id.as_str())?;
        }

        {
            let mut table = txn.open_table(CHUNKS)?;
            for (chunk_index, (chunk, &id)) in
                chunks.iter().zip(&record.chunk_ids).enumerate()
            {
                let row = ChunkRecord {
                    id,
                    document_id: record.id.clone(),
                    chunk_index,
                    content: chunk.content.clone(),
                    page: chunk.page,
                    char_start: chunk.char_start,
                    char_end: chunk.char_end,
                };
                let bytes = serde_json::to_vec(&row)?;
                table.insert(id, bytes.as_slice())?;
            }
        }

        for (chunk, &chunk_id) in chunks.iter().zip(&record.chunk_ids) {
            let key = VectorKey {
                chunk_id,
                document_id: &record.id,
                page: chunk.page,
            };
            index.insert(&txn, key, &chunk.embedding)?;
        }

        txn.commit()?;
        debug!(
            document = %record.id,
            chunks = record.total_chunks,
            replaced,
            "committed document"
        );

        Ok(ReplaceOutcome { record, replaced })
    }

    /// Remove a document with all of its chunks and vectors.
    ///
    /// Returns `false` when no such document exists.
    pub fn delete_document(
        &self,
        index: &dyn VectorIndex,
        id: &str,
    ) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = remove_document(&txn, index, id)?;
        match removed {
            Some(record) => {
                txn.commit()?;
                debug!(
                    document = %record.id,
                    chunks = record.chunk_ids.len(),
                    "deleted document"
                );
                Ok(true)
            }
            None => {
                txn.abort()?;
                Ok(false)
            }
        }
    }

    // -- Settings --

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.snapshot()?.setting(key)
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }
}

impl std::fmt::Debug for DocumentCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCatalog").finish_non_exhaustive()
    }
}

/// Read-only view over one committed state of the catalog and the vector
/// index stored next to it.
pub struct Snapshot {
    txn: ReadTransaction,
}

impl Snapshot {
    pub fn transaction(&self) -> &ReadTransaction {
        &self.txn
    }

    pub fn document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let table = self.txn.open_table(DOCUMENTS)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All documents, most recently indexed first.
    pub fn documents(&self) -> Result<Vec<DocumentRecord>> {
        let table = self.txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(decode::<DocumentRecord>(v.value())?);
        }
        result.sort_by(|a, b| {
            b.indexed_at
                .cmp(&a.indexed_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(result)
    }

    pub fn chunk(&self, id: u64) -> Result<Option<ChunkRecord>> {
        let table = self.txn.open_table(CHUNKS)?;
        match table.get(id)? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Chunks of one document in chunk-index order.
    pub fn document_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let Some(document) = self.document(document_id)? else {
            return Ok(Vec::new());
        };
        let table = self.txn.open_table(CHUNKS)?;
        let mut result = Vec::with_capacity(document.chunk_ids.len());
        for id in document.chunk_ids {
            if let Some(guard) = table.get(id)? {
                result.push(decode(guard.value())?);
            }
        }
        Ok(result)
    }

    /// Every chunk in the catalog, in insertion order.
    pub fn chunks(&self) -> Result<Vec<ChunkRecord>> {
        let table = self.txn.open_table(CHUNKS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(decode(v.value())?);
        }
        Ok(result)
    }

    pub fn document_count(&self) -> Result<u64> {
        Ok(self.txn.open_table(DOCUMENTS)?.len()?)
    }

    pub fn chunk_count(&self) -> Result<u64> {
        Ok(self.txn.open_table(CHUNKS)?.len()?)
    }

    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let table = self.txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The document currently registered for `source_path`, if any.
fn source_owner(
    txn: &WriteTransaction,
    source_path: &str,
) -> Result<Option<String>> {
    let table = txn.open_table(SOURCES)?;
    Ok(table.get(source_path)?.map(|v| v.value().to_string()))
}

/// Reserve `count` consecutive chunk ids and return the first.
fn allocate_chunk_ids(txn: &WriteTransaction, count: u64) -> Result<u64> {
    let mut table = txn.open_table(COUNTERS)?;
    let first = table.get(NEXT_CHUNK_ID)?.map(|v| v.value()).unwrap_or(1);
    table.insert(NEXT_CHUNK_ID, first + count)?;
    Ok(first)
}

/// Remove a document row, its source mapping, its chunk rows and their
/// vectors inside `txn`.
fn remove_document(
    txn: &WriteTransaction,
    index: &dyn VectorIndex,
    id: &str,
) -> Result<Option<DocumentRecord>> {
    let record: DocumentRecord = {
        let mut documents = txn.open_table(DOCUMENTS)?;
        match documents.remove(id)? {
            Some(guard) => decode(guard.value())?,
            None => return Ok(None),
        }
    };

    {
        let mut sources = txn.open_table(SOURCES)?;
        let owned = sources
            .get(record.source_path.as_str())?
            .is_some_and(|v| v.value() == record.id);
        if owned {
            sources.remove(record.source_path.as_str())?;
        }
    }

    let mut pages = Vec::with_capacity(record.chunk_ids.len());
    {
        let mut chunks = txn.open_table(CHUNKS)?;
        for &chunk_id in &record.chunk_ids {
            let page = match chunks.remove(chunk_id)? {
                Some(guard) => decode::<ChunkRecord>(guard.value())?.page,
                None => None,
            };
            pages.push((chunk_id, page));
        }
    }

    for (chunk_id, page) in pages {
        let key = VectorKey {
            chunk_id,
            document_id: &record.id,
            page,
        };
        index.delete(txn, key)?;
    }

    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedding::Dimension,
        vector_index::{ExactVectorIndex, SearchFilter},
    };

    fn test_db() -> (tempfile::TempDir, DocumentCatalog, ExactVectorIndex) {
        let tmp = tempfile::tempdir().unwrap();
        let catalog = DocumentCatalog::open(&tmp.path().join("index.redb"))
            .unwrap();
        let index = ExactVectorIndex::new(Dimension::new(2).unwrap());
        catalog.attach_index(&index).unwrap();
        (tmp, catalog, index)
    }

    fn document(id: &str, source: &str) -> NewDocument {
        NewDocument {
            id: id.to_string(),
            filename: "notes.txt".to_string(),
            source_path: source.to_string(),
            file_type: "txt".to_string(),
            size_bytes: 42,
            metadata: BTreeMap::new(),
        }
    }

    fn chunk(content: &str, page: Option<u32>, values: [f32; 2]) -> NewChunk {
        NewChunk {
            content: content.to_string(),
            page,
            char_start: 0,
            char_end: content.chars().count(),
            embedding: Embedding::new(
                values.to_vec(),
                Dimension::new(2).unwrap(),
            )
            .unwrap(),
        }
    }

    #[test]
    fn replace_writes_rows_and_vectors() {
        let (_tmp, catalog, index) = test_db();
        let outcome = catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![
                    chunk("first", Some(1), [1.0, 0.0]),
                    chunk("second", Some(2), [0.0, 1.0]),
                ],
            )
            .unwrap();
        assert!(!outcome.replaced);
        assert_eq!(outcome.record.total_chunks, 2);

        let snap = catalog.snapshot().unwrap();
        let chunks = snap.document_chunks("d1").unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[1].chunk_index, 1);
        assert_eq!(chunks[1].page, Some(2));
        assert_eq!(index.len(snap.transaction()).unwrap(), 2);
        assert_eq!(snap.document("d1").unwrap().unwrap().source_path, "/a");
    }

    #[test]
    fn reindex_replaces_previous_chunks() {
        let (_tmp, catalog, index) = test_db();
        catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![
                    chunk("old one", None, [1.0, 0.0]),
                    chunk("old two", None, [1.0, 0.0]),
                    chunk("old three", None, [1.0, 0.0]),
                ],
            )
            .unwrap();
        let outcome = catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![chunk("new", None, [0.0, 1.0])],
            )
            .unwrap();
        assert!(outcome.replaced);

        let snap = catalog.snapshot().unwrap();
        assert_eq!(snap.document_count().unwrap(), 1);
        assert_eq!(snap.chunk_count().unwrap(), 1);
        assert_eq!(index.len(snap.transaction()).unwrap(), 1);
        let chunks = snap.document_chunks("d1").unwrap();
        assert_eq!(chunks[0].content, "new");
        assert_eq!(snap.document("d1").unwrap().unwrap().total_chunks, 1);
    }

    #[test]
    fn new_id_for_same_source_removes_old_document() {
        let (_tmp, catalog, index) = test_db();
        catalog
            .replace_document(
                &index,
                document("old", "/a"),
                vec![chunk("x", None, [1.0, 0.0])],
            )
            .unwrap();
        catalog
            .replace_document(
                &index,
                document("new", "/a"),
                vec![chunk("y", None, [1.0, 0.0])],
            )
            .unwrap();

        let snap = catalog.snapshot().unwrap();
        assert!(snap.document("old").unwrap().is_none());
        assert_eq!(snap.chunks().unwrap().len(), 1);
    }

    #[test]
    fn delete_leaves_no_orphans() {
        let (_tmp, catalog, index) = test_db();
        catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![
                    chunk("p1", Some(1), [1.0, 0.0]),
                    chunk("p2", Some(2), [0.0, 1.0]),
                ],
            )
            .unwrap();

        assert!(catalog.delete_document(&index, "d1").unwrap());
        assert!(!catalog.delete_document(&index, "d1").unwrap());

        let snap = catalog.snapshot().unwrap();
        assert_eq!(snap.document_count().unwrap(), 0);
        assert_eq!(snap.chunk_count().unwrap(), 0);
        assert_eq!(index.len(snap.transaction()).unwrap(), 0);
        assert!(snap.document("d1").unwrap().is_none());

        let query =
            Embedding::new(vec![1.0, 0.0], Dimension::new(2).unwrap()).unwrap();
        let filter = SearchFilter {
            document_id: None,
            page: Some(1),
        };
        let hits = index
            .search(snap.transaction(), &query, 5, filter)
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn failed_write_rolls_back() {
        let (_tmp, catalog, index) = test_db();
        catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![chunk("kept", None, [1.0, 0.0])],
            )
            .unwrap();

        let mut bad = chunk("bad", None, [1.0, 0.0]);
        bad.embedding =
            Embedding::new(vec![1.0; 3], Dimension::new(3).unwrap()).unwrap();
        let result = catalog.replace_document(
            &index,
            document("d1", "/a"),
            vec![chunk("good", None, [0.0, 1.0]), bad],
        );
        assert!(result.is_err());

        let snap = catalog.snapshot().unwrap();
        let chunks = snap.document_chunks("d1").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].content, "kept");
        assert_eq!(index.len(snap.transaction()).unwrap(), 1);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let (_tmp, catalog, index) = test_db();
        let before = catalog.snapshot().unwrap();
        catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![chunk("x", None, [1.0, 0.0])],
            )
            .unwrap();

        assert!(before.document("d1").unwrap().is_none());
        assert!(catalog.snapshot().unwrap().document("d1").unwrap().is_some());
    }

    #[test]
    fn chunk_ids_are_never_reused() {
        let (_tmp, catalog, index) = test_db();
        let first = catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![chunk("x", None, [1.0, 0.0])],
            )
            .unwrap();
        let second = catalog
            .replace_document(
                &index,
                document("d1", "/a"),
                vec![chunk("x", None, [1.0, 0.0])],
            )
            .unwrap();
        assert!(second.record.chunk_ids[0] > first.record.chunk_ids[0]);
    }

    #[test]
    fn settings_crud() {
        let (_tmp, catalog, _index) = test_db();
        assert_eq!(catalog.get_setting(DIMENSION_SETTING).unwrap(), None);
        assert_eq!(catalog.get_setting(MODEL_SETTING).unwrap(), None);

        catalog.set_setting(MODEL_SETTING, "custom/model").unwrap();
        assert_eq!(
            catalog.get_setting(MODEL_SETTING).unwrap().as_deref(),
            Some("custom/model")
        );

        assert!(catalog.remove_setting(MODEL_SETTING).unwrap());
        assert!(!catalog.remove_setting(MODEL_SETTING).unwrap());
    }

    #[test]
    fn reopen_preserves_data() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.redb");
        let index = ExactVectorIndex::new(Dimension::new(2).unwrap());
        {
            let catalog = DocumentCatalog::open(&path).unwrap();
            catalog.attach_index(&index).unwrap();
            catalog
                .replace_document(
                    &index,
                    document("d1", "/a"),
                    vec![chunk("x", None, [1.0, 0.0])],
                )
                .unwrap();
        }

        let catalog = DocumentCatalog::open(&path).unwrap();
        let docs = catalog.snapshot().unwrap().documents().unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].chunk_ids.len(), 1);
    }
}
