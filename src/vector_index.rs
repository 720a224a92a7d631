use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashSet},
};

use redb::{
    MultimapTableDefinition,
    ReadTransaction,
    ReadableMultimapTable,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
    WriteTransaction,
};

use crate::{
    embedding::{Dimension, Embedding},
    error::{EmbeddingError, Error, Result},
};

const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const DOCUMENT_VECTORS: MultimapTableDefinition<&str, u64> =
    MultimapTableDefinition::new("document_vectors");
const PAGE_VECTORS: MultimapTableDefinition<u32, u64> =
    MultimapTableDefinition::new("page_vectors");

/// Convert an L2 distance into a similarity in `(0, 1]`.
pub fn distance_to_similarity(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Identifies a vector entry and the attributes it can be filtered by.
#[derive(Debug, Clone, Copy)]
pub struct VectorKey<'a> {
    pub chunk_id: u64,
    pub document_id: &'a str,
    pub page: Option<u32>,
}

/// Restricts a search to one document and/or one page.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchFilter<'a> {
    pub document_id: Option<&'a str>,
    pub page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub chunk_id: u64,
    pub distance: f32,
}

impl Neighbor {
    pub fn similarity(&self) -> f32 {
        distance_to_similarity(self.distance)
    }
}

/// A k-NN store keyed by chunk id.
///
/// Every operation runs inside a transaction owned by the caller, so vector
/// writes commit or roll back together with the catalog rows they belong to
/// and searches see the same snapshot as the chunk lookups that follow.
pub trait VectorIndex: Send + Sync {
    fn dimension(&self) -> Dimension;

    /// Create the index tables if they do not exist yet.
    fn create(&self, txn: &WriteTransaction) -> Result<()>;

    fn insert(
        &self,
        txn: &WriteTransaction,
        key: VectorKey<'_>,
        vector: &Embedding,
    ) -> Result<()>;

    /// Remove an entry. Returns whether it existed.
    fn delete(&self, txn: &WriteTransaction, key: VectorKey<'_>)
    -> Result<bool>;

    /// The `k` nearest entries passing `filter`, ascending by distance.
    fn search(
        &self,
        txn: &ReadTransaction,
        query: &Embedding,
        k: usize,
        filter: SearchFilter<'_>,
    ) -> Result<Vec<Neighbor>>;

    fn len(&self, txn: &ReadTransaction) -> Result<u64>;
}

/// Exact k-NN over vectors stored in redb.
///
/// Binary format per entry: D * 4 bytes of f32 values, little-endian.
/// Entries are also indexed by document id and page so filtered searches
/// only score the matching candidates.
#[derive(Debug, Clone)]
pub struct ExactVectorIndex {
    dimension: Dimension,
}

impl ExactVectorIndex {
    pub fn new(dimension: Dimension) -> Self {
        Self { dimension }
    }

    fn check(&self, actual: usize) -> Result<()> {
        if actual != self.dimension.get() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension.get(),
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn decode(&self, chunk_id: u64, bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.len() != self.dimension.get() * 4 {
            return Err(Error::Corrupt(format!(
                "vector for chunk {chunk_id} has {} bytes, expected {}",
                bytes.len(),
                self.dimension.get() * 4
            )));
        }
        Ok(bytemuck::pod_collect_to_vec::<u8, u32>(bytes)
            .into_iter()
            .map(|bits| f32::from_bits(u32::from_le(bits)))
            .collect())
    }

    /// Chunk ids matching the filter, or `None` when every entry matches.
    fn candidates(
        &self,
        txn: &ReadTransaction,
        filter: SearchFilter<'_>,
    ) -> Result<Option<Vec<u64>>> {
        let by_document = match filter.document_id {
            Some(document_id) => {
                let table = txn.open_multimap_table(DOCUMENT_VECTORS)?;
                let mut ids = Vec::new();
                for id in table.get(document_id)? {
                    ids.push(id?.value());
                }
                Some(ids)
            }
            None => None,
        };

        let by_page = match filter.page {
            Some(page) => {
                let table = txn.open_multimap_table(PAGE_VECTORS)?;
                let mut ids = HashSet::new();
                for id in table.get(page)? {
                    ids.insert(id?.value());
                }
                Some(ids)
            }
            None => None,
        };

        Ok(match (by_document, by_page) {
            (Some(doc), Some(page)) => {
                Some(doc.into_iter().filter(|id| page.contains(id)).collect())
            }
            (Some(doc), None) => Some(doc),
            (None, Some(page)) => Some(page.into_iter().collect()),
            (None, None) => None,
        })
    }
}

/// Max-heap entry ordered by distance, ties broken by chunk id.
struct Scored(Neighbor);

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .distance
            .total_cmp(&other.0.distance)
            .then(self.0.chunk_id.cmp(&other.0.chunk_id))
    }
}

fn keep_nearest(heap: &mut BinaryHeap<Scored>, k: usize, neighbor: Neighbor) {
    heap.push(Scored(neighbor));
    if heap.len() > k {
        heap.pop();
    }
}

impl VectorIndex for ExactVectorIndex {
    fn dimension(&self) -> Dimension {
        self.dimension
    }

    fn create(&self, txn: &WriteTransaction) -> Result<()> {
        txn.open_table(VECTORS)?;
        txn.open_multimap_table(DOCUMENT_VECTORS)?;
        txn.open_multimap_table(PAGE_VECTORS)?;
        Ok(())
    }

    /// Writes straight into the page reserved by `insert_reserve`.
    fn insert(
        &self,
        txn: &WriteTransaction,
        key: VectorKey<'_>,
        vector: &Embedding,
    ) -> Result<()> {
        self.check(vector.len())?;
        let data = vector.as_slice();

        {
            let mut table = txn.open_table(VECTORS)?;
            let mut guard =
                table.insert_reserve(key.chunk_id, std::mem::size_of_val(data))?;
            for (slot, value) in guard.as_mut().chunks_exact_mut(4).zip(data) {
                slot.copy_from_slice(&value.to_le_bytes());
            }
        }
        txn.open_multimap_table(DOCUMENT_VECTORS)?
            .insert(key.document_id, key.chunk_id)?;
        if let Some(page) = key.page {
            txn.open_multimap_table(PAGE_VECTORS)?
                .insert(page, key.chunk_id)?;
        }
        Ok(())
    }

    fn delete(
        &self,
        txn: &WriteTransaction,
        key: VectorKey<'_>,
    ) -> Result<bool> {
        let removed = {
            let mut table = txn.open_table(VECTORS)?;
            table.remove(key.chunk_id)?.is_some()
        };
        txn.open_multimap_table(DOCUMENT_VECTORS)?
            .remove(key.document_id, key.chunk_id)?;
        if let Some(page) = key.page {
            txn.open_multimap_table(PAGE_VECTORS)?
                .remove(page, key.chunk_id)?;
        }
        Ok(removed)
    }

    fn search(
        &self,
        txn: &ReadTransaction,
        query: &Embedding,
        k: usize,
        filter: SearchFilter<'_>,
    ) -> Result<Vec<Neighbor>> {
        self.check(query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let table = txn.open_table(VECTORS)?;
        let mut heap = BinaryHeap::with_capacity(k + 1);

        match self.candidates(txn, filter)? {
            Some(ids) => {
                for chunk_id in ids {
                    let Some(guard) = table.get(chunk_id)? else {
                        continue;
                    };
                    let stored = self.decode(chunk_id, guard.value())?;
                    let distance = query.l2_distance(&stored);
                    keep_nearest(&mut heap, k, Neighbor { chunk_id, distance });
                }
            }
            None => {
                for entry in table.iter()? {
                    let (key, value) = entry?;
                    let chunk_id = key.value();
                    let stored = self.decode(chunk_id, value.value())?;
                    let distance = query.l2_distance(&stored);
                    keep_nearest(&mut heap, k, Neighbor { chunk_id, distance });
                }
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|scored| scored.0)
            .collect())
    }

    fn len(&self, txn: &ReadTransaction) -> Result<u64> {
        Ok(txn.open_table(VECTORS)?.len()?)
    }
}

#[cfg(test)]
mod tests {
    use redb::{Database, ReadableDatabase};

    use super::*;

    fn test_db() -> (tempfile::TempDir, Database, ExactVectorIndex) {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::create(tmp.path().join("vectors.redb")).unwrap();
        let index = ExactVectorIndex::new(Dimension::new(2).unwrap());
        let txn = db.begin_write().unwrap();
        index.create(&txn).unwrap();
        txn.commit().unwrap();
        (tmp, db, index)
    }

    fn vector(values: [f32; 2]) -> Embedding {
        Embedding::new(values.to_vec(), Dimension::new(2).unwrap()).unwrap()
    }

    fn insert(
        db: &Database,
        index: &ExactVectorIndex,
        entries: &[(u64, &str, Option<u32>, [f32; 2])],
    ) {
        let txn = db.begin_write().unwrap();
        for &(chunk_id, document_id, page, values) in entries {
            let key = VectorKey {
                chunk_id,
                document_id,
                page,
            };
            index.insert(&txn, key, &vector(values)).unwrap();
        }
        txn.commit().unwrap();
    }

    #[test]
    fn search_returns_ascending_distances() {
        let (_tmp, db, index) = test_db();
        insert(
            &db,
            &index,
            &[
                (1, "a", None, [0.0, 1.0]),
                (2, "a", None, [1.0, 0.0]),
                (3, "b", None, [0.6, 0.8]),
            ],
        );

        let txn = db.begin_read().unwrap();
        let hits = index
            .search(&txn, &vector([1.0, 0.0]), 2, SearchFilter::default())
            .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, 2);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[0].similarity(), 1.0);
        assert_eq!(hits[1].chunk_id, 3);
        assert!(hits[0].distance <= hits[1].distance);
    }

    #[test]
    fn empty_index_returns_nothing() {
        let (_tmp, db, index) = test_db();
        let txn = db.begin_read().unwrap();
        let hits = index
            .search(&txn, &vector([1.0, 0.0]), 5, SearchFilter::default())
            .unwrap();
        assert!(hits.is_empty());
        assert_eq!(index.len(&txn).unwrap(), 0);
    }

    #[test]
    fn filters_by_document_and_page() {
        let (_tmp, db, index) = test_db();
        insert(
            &db,
            &index,
            &[
                (1, "a", Some(1), [1.0, 0.0]),
                (2, "a", Some(2), [0.9, 0.1]),
                (3, "b", Some(2), [1.0, 0.0]),
            ],
        );
        let txn = db.begin_read().unwrap();
        let query = vector([1.0, 0.0]);

        let only_b = SearchFilter {
            document_id: Some("b"),
            page: None,
        };
        let hits = index.search(&txn, &query, 10, only_b).unwrap();
        assert_eq!(hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>(), [3]);

        let page_two = SearchFilter {
            document_id: None,
            page: Some(2),
        };
        let hits = index.search(&txn, &query, 10, page_two).unwrap();
        assert_eq!(hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>(), [3, 2]);

        let a_page_two = SearchFilter {
            document_id: Some("a"),
            page: Some(2),
        };
        let hits = index.search(&txn, &query, 10, a_page_two).unwrap();
        assert_eq!(hits.iter().map(|h| h.chunk_id).collect::<Vec<_>>(), [2]);
    }

    #[test]
    fn delete_removes_entry_and_filters() {
        let (_tmp, db, index) = test_db();
        insert(&db, &index, &[(7, "a", Some(3), [1.0, 0.0])]);

        let txn = db.begin_write().unwrap();
        let key = VectorKey {
            chunk_id: 7,
            document_id: "a",
            page: Some(3),
        };
        assert!(index.delete(&txn, key).unwrap());
        assert!(!index.delete(&txn, key).unwrap());
        txn.commit().unwrap();

        let txn = db.begin_read().unwrap();
        assert_eq!(index.len(&txn).unwrap(), 0);
        assert!(txn.open_table(VECTORS).unwrap().get(7).unwrap().is_none());
        let filter = SearchFilter {
            document_id: Some("a"),
            page: Some(3),
        };
        let hits = index.search(&txn, &vector([1.0, 0.0]), 5, filter).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn vectors_are_stored_little_endian() {
        let (_tmp, db, index) = test_db();
        insert(&db, &index, &[(1, "a", None, [0.6, -0.8])]);

        let txn = db.begin_read().unwrap();
        let table = txn.open_table(VECTORS).unwrap();
        let stored = table.get(1).unwrap().unwrap();
        let expected: Vec<u8> = [0.6f32, -0.8]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        assert_eq!(stored.value(), expected.as_slice());
        assert_eq!(index.decode(1, stored.value()).unwrap(), vec![0.6, -0.8]);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let (_tmp, db, index) = test_db();
        let txn = db.begin_write().unwrap();
        let three = Embedding::new(vec![1.0; 3], Dimension::new(3).unwrap())
            .unwrap();
        let key = VectorKey {
            chunk_id: 1,
            document_id: "a",
            page: None,
        };
        let err = index.insert(&txn, key, &three).unwrap_err();
        assert!(matches!(
            err,
            Error::Embedding(EmbeddingError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn aborted_write_leaves_no_entry() {
        let (_tmp, db, index) = test_db();
        {
            let txn = db.begin_write().unwrap();
            let key = VectorKey {
                chunk_id: 1,
                document_id: "a",
                page: None,
            };
            index.insert(&txn, key, &vector([1.0, 0.0])).unwrap();
            // dropped without commit
        }
        let txn = db.begin_read().unwrap();
        assert_eq!(index.len(&txn).unwrap(), 0);
    }
}
