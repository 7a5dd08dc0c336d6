//! redb-backed chunk store.
//!
//! Two tables keyed by `doc_key`: `chunks` holds the JSON record (wire
//! contract minus the vector), `embeddings` holds the vector in a compact
//! binary format. Every write transaction covers both tables, so a chunk is
//! either fully present (record + vector) or absent.
//!
//! Binary format per embedding entry:
//! - 4 bytes: dimension D (u32 LE)
//! - D * 4 bytes: f32 LE values

use std::{collections::HashMap, path::Path};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    error::{Error, Result},
    record::ChunkRecord,
};

const CHUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");
const EMBEDDINGS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("embeddings");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

/// Operations the ingestion pipeline needs from a document store.
pub trait ChunkStore {
    /// All stored `doc_key -> content_hash` pairs for one document.
    fn get_existing_hashes(
        &self,
        doc_id: &str,
    ) -> Result<HashMap<String, String>>;

    /// Idempotent upsert keyed by `doc_key`. Rejects records without a
    /// computed embedding.
    fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<()>;

    /// Remove records and vectors for the given keys. Missing keys are
    /// ignored.
    fn delete_keys(&self, keys: &[String]) -> Result<()>;
}

pub struct RedbChunkStore {
    db: Database,
}

impl RedbChunkStore {
    /// Open or create a chunk store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use quern::store::RedbChunkStore;
    ///
    /// let store = RedbChunkStore::open(&tmp.path().join("chunks.redb")).unwrap();
    /// assert_eq!(store.chunk_count().unwrap(), 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(CHUNKS)?;
        txn.open_table(EMBEDDINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Fetch a single record with its vector attached.
    pub fn get(&self, doc_key: &str) -> Result<Option<ChunkRecord>> {
        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let embeddings = txn.open_table(EMBEDDINGS)?;

        let Some(guard) = chunks.get(doc_key)? else {
            return Ok(None);
        };
        let mut record: ChunkRecord = serde_json::from_slice(guard.value())?;
        if let Some(vec_guard) = embeddings.get(doc_key)? {
            record.embedding = decode_embedding(vec_guard.value());
        }
        Ok(Some(record))
    }

    /// All records with vectors attached, ordered by key.
    pub fn all_records(&self) -> Result<Vec<ChunkRecord>> {
        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let embeddings = txn.open_table(EMBEDDINGS)?;

        let mut result = Vec::new();
        for entry in chunks.iter()? {
            let (key, value) = entry?;
            let mut record: ChunkRecord =
                serde_json::from_slice(value.value())?;
            if let Some(vec_guard) = embeddings.get(key.value())? {
                record.embedding = decode_embedding(vec_guard.value());
            }
            result.push(record);
        }
        Ok(result)
    }

    /// Number of stored chunks.
    pub fn chunk_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut count = 0;
        for entry in table.iter()? {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of distinct documents.
    pub fn document_count(&self) -> Result<usize> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut docs = std::collections::HashSet::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            if let Some((doc_id, _)) = crate::record::parse_doc_key(key.value())
            {
                docs.insert(doc_id.to_string());
            }
        }
        Ok(docs.len())
    }
}

impl ChunkStore for RedbChunkStore {
    fn get_existing_hashes(
        &self,
        doc_id: &str,
    ) -> Result<HashMap<String, String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;

        // '#' separates doc_id from the index; '$' is the next byte up, so
        // this range covers exactly this document's keys.
        let lo = format!("{doc_id}#");
        let hi = format!("{doc_id}$");

        let mut result = HashMap::new();
        for entry in table.range(lo.as_str()..hi.as_str())? {
            let (key, value) = entry?;
            let record: ChunkRecord = serde_json::from_slice(value.value())?;
            result.insert(key.value().to_string(), record.content_hash);
        }
        Ok(result)
    }

    fn upsert_chunks(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            if record.embedding.is_empty() {
                return Err(Error::Config(format!(
                    "refusing to upsert chunk without embedding: {}",
                    record.doc_key
                )));
            }
        }

        let txn = self.db.begin_write()?;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut embeddings = txn.open_table(EMBEDDINGS)?;

            for record in records {
                let json = serde_json::to_vec(record)?;
                chunks.insert(record.doc_key.as_str(), json.as_slice())?;

                let dimension = record.embedding.len() as u32;
                let byte_len =
                    HEADER_SIZE + std::mem::size_of_val(&record.embedding[..]);
                let mut guard = embeddings
                    .insert_reserve(record.doc_key.as_str(), byte_len)?;
                let dest = guard.as_mut();
                dest[0..4].copy_from_slice(&dimension.to_le_bytes());
                dest[HEADER_SIZE..]
                    .copy_from_slice(bytemuck::cast_slice(&record.embedding));
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_keys(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut embeddings = txn.open_table(EMBEDDINGS)?;
            for key in keys {
                chunks.remove(key.as_str())?;
                embeddings.remove(key.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    if bytes.len() < HEADER_SIZE {
        return Vec::new();
    }
    let dimension =
        u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
    if bytes.len() != HEADER_SIZE + dimension * 4 {
        return Vec::new();
    }
    // Copying decode: the value buffer has no alignment guarantee.
    bytemuck::pod_collect_to_vec(&bytes[HEADER_SIZE..])
}

impl std::fmt::Debug for RedbChunkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbChunkStore").finish_non_exhaustive()
    }
}
