//! Shard handles and the shard writer

use crate::error::{Result, SearchError};
use crate::search::document::{LogSchema, SearchDocument, ID};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tantivy::schema::Schema;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, Term};

/// Writer heap used when building shards
const WRITER_HEAP_SIZE: usize = 50_000_000;

/// Shard statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardInfo {
    pub id: String,

    /// Live (non-deleted) documents
    pub num_docs: u64,

    /// Number of segments
    pub num_segments: usize,
}

/// One already-built, searchable index partition
///
/// The engine only reads from shards; writing and lifetime belong to
/// whoever built them.
pub struct Shard {
    id: String,
    index: Index,
    reader: IndexReader,
}

impl Shard {
    /// Wrap an existing index
    pub fn from_index(id: impl Into<String>, index: Index) -> Result<Self> {
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;

        Ok(Self {
            id: id.into(),
            index,
            reader,
        })
    }

    /// Open a shard built in a directory and follow its commits
    pub fn open_in_dir(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.join("meta.json").exists() {
            return Err(SearchError::InvalidConfiguration(format!(
                "no index found at {}",
                path.display()
            )));
        }

        let index = Index::open_in_dir(path)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        Ok(Self {
            id: id.into(),
            index,
            reader,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn schema(&self) -> Schema {
        self.index.schema()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    /// Point-in-time view of the shard
    pub fn searcher(&self) -> Searcher {
        self.reader.searcher()
    }

    /// Pick up the latest commit
    pub fn reload(&self) -> Result<()> {
        self.reader.reload()?;
        Ok(())
    }

    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn info(&self) -> ShardInfo {
        let searcher = self.reader.searcher();
        ShardInfo {
            id: self.id.clone(),
            num_docs: searcher.num_docs(),
            num_segments: searcher.segment_readers().len(),
        }
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard").field("id", &self.id).finish()
    }
}

/// Builds a shard with the access-log schema
///
/// Stands in for the external indexer in tests, benches and the CLI.
pub struct ShardWriter {
    id: String,
    index: Index,
    writer: IndexWriter,
    schema: LogSchema,
}

impl ShardWriter {
    /// Create an in-memory shard
    pub fn in_ram(id: impl Into<String>) -> Result<Self> {
        let schema = LogSchema::new();
        let index = Index::create_in_ram(schema.schema().clone());
        Self::with_index(id.into(), index, schema)
    }

    /// Create a shard in `path`, or reopen the one already there
    pub fn create_in_dir(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let schema = LogSchema::new();
        let index = if path.join("meta.json").exists() {
            let index = Index::open_in_dir(path)?;
            schema.check_compatible(&index.schema())?;
            index
        } else {
            Index::create_in_dir(path, schema.schema().clone())?
        };
        Self::with_index(id.into(), index, schema)
    }

    fn with_index(id: String, index: Index, schema: LogSchema) -> Result<Self> {
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_SIZE)?;
        Ok(Self {
            id,
            index,
            writer,
            schema,
        })
    }

    /// Add one document, replacing any document with the same ID
    pub fn add_document(&mut self, document: &impl SearchDocument) -> Result<()> {
        self.writer
            .delete_term(Term::from_field_text(self.schema.id, &document.document_id()));
        self.writer
            .add_document(document.to_tantivy_doc(&self.schema))?;
        Ok(())
    }

    /// Add a batch of documents
    pub fn add_documents<D: SearchDocument>(&mut self, documents: &[D]) -> Result<usize> {
        for document in documents {
            self.add_document(document)?;
        }
        Ok(documents.len())
    }

    /// Delete a document by ID
    pub fn delete_document(&mut self, document_id: &str) {
        if let Some(field) = self.schema.field(ID) {
            self.writer
                .delete_term(Term::from_field_text(field, document_id));
        }
    }

    /// Commit pending changes
    pub fn commit(&mut self) -> Result<()> {
        self.writer.commit()?;
        Ok(())
    }

    /// Commit and hand out a read-only shard
    pub fn finish(mut self) -> Result<Shard> {
        self.writer.commit()?;
        self.writer.wait_merging_threads()?;
        Shard::from_index(self.id, self.index)
    }
}
