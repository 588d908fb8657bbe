//! Access-log document structures and the shard schema

use crate::error::{Result, SearchError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tantivy::schema::*;
use tantivy::TantivyDocument;

/// How a schema field is indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Tokenized full-text field
    Text,
    /// Untokenized string with a fast column (filters, facets)
    Exact,
    /// Signed integer fast field
    I64,
    /// Unsigned integer fast field
    U64,
    /// Float fast field
    F64,
}

impl FieldKind {
    /// Whether results can be ordered by a field of this kind
    pub fn is_sortable(self) -> bool {
        matches!(self, FieldKind::I64 | FieldKind::U64 | FieldKind::F64)
    }
}

pub const ID: &str = "id";
pub const TIMESTAMP: &str = "timestamp";
pub const MESSAGE: &str = "message";
pub const PATH: &str = "path";
pub const PATH_EXACT: &str = "path_exact";
pub const LOG_PATH: &str = "log_path";
pub const IP: &str = "ip";
pub const METHOD: &str = "method";
pub const STATUS: &str = "status";
pub const BYTES_SENT: &str = "bytes_sent";
pub const REQUEST_TIME: &str = "request_time";
pub const USER_AGENT: &str = "user_agent";
pub const REFERER: &str = "referer";
pub const COUNTRY: &str = "country";
pub const BROWSER: &str = "browser";
pub const OS: &str = "os";
pub const DEVICE: &str = "device";

/// Field layout shared by every shard. Order matters: field ids are
/// assigned in declaration order and must agree across shards.
const FIELD_LAYOUT: &[(&str, FieldKind)] = &[
    (TIMESTAMP, FieldKind::I64),
    (MESSAGE, FieldKind::Text),
    (PATH, FieldKind::Text),
    (PATH_EXACT, FieldKind::Exact),
    (LOG_PATH, FieldKind::Exact),
    (IP, FieldKind::Exact),
    (METHOD, FieldKind::Exact),
    (STATUS, FieldKind::Exact),
    (BYTES_SENT, FieldKind::U64),
    (REQUEST_TIME, FieldKind::F64),
    (USER_AGENT, FieldKind::Exact),
    (REFERER, FieldKind::Exact),
    (COUNTRY, FieldKind::Exact),
    (BROWSER, FieldKind::Exact),
    (OS, FieldKind::Exact),
    (DEVICE, FieldKind::Exact),
];

/// Build the tantivy schema for access-log shards
pub fn build_log_schema() -> Schema {
    LogSchema::new().schema
}

/// Resolved field handles for the access-log schema
#[derive(Clone)]
pub struct LogSchema {
    schema: Schema,
    pub id: Field,
    pub timestamp: Field,
    pub message: Field,
    pub path: Field,
}

impl LogSchema {
    pub fn new() -> Self {
        let mut schema_builder = Schema::builder();

        // ID - stored, indexed as string
        let id = schema_builder.add_text_field(ID, STRING | STORED);
        let (mut timestamp, mut message, mut path) = (id, id, id);

        for (name, kind) in FIELD_LAYOUT {
            let field = match kind {
                FieldKind::Text => schema_builder.add_text_field(name, TEXT | STORED),
                FieldKind::Exact => schema_builder.add_text_field(name, STRING | STORED | FAST),
                FieldKind::I64 => schema_builder.add_i64_field(name, INDEXED | STORED | FAST),
                FieldKind::U64 => schema_builder.add_u64_field(name, INDEXED | STORED | FAST),
                FieldKind::F64 => schema_builder.add_f64_field(name, INDEXED | STORED | FAST),
            };
            match *name {
                TIMESTAMP => timestamp = field,
                MESSAGE => message = field,
                PATH => path = field,
                _ => {}
            }
        }

        Self {
            schema: schema_builder.build(),
            id,
            timestamp,
            message,
            path,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Look up a field by name
    pub fn field(&self, name: &str) -> Option<Field> {
        self.schema.get_field(name).ok()
    }

    /// Indexing kind of a named field (`None` for unknown fields and `id`)
    pub fn kind(&self, name: &str) -> Option<FieldKind> {
        FIELD_LAYOUT
            .iter()
            .find(|(field_name, _)| *field_name == name)
            .map(|(_, kind)| *kind)
    }

    /// Fields searched by free-text queries
    pub fn text_fields(&self) -> Vec<Field> {
        vec![self.message, self.path]
    }

    /// Fields that can be faceted or counted
    pub fn is_facetable(&self, name: &str) -> bool {
        self.kind(name) == Some(FieldKind::Exact)
    }

    /// Fields results can be sorted by
    pub fn is_sortable(&self, name: &str) -> bool {
        self.kind(name).map(FieldKind::is_sortable).unwrap_or(false)
    }

    /// Names of all stored fields
    pub fn stored_field_names(&self) -> Vec<&'static str> {
        std::iter::once(ID)
            .chain(FIELD_LAYOUT.iter().map(|(name, _)| *name))
            .collect()
    }

    /// Stored values of `doc` as JSON, limited to `wanted` (all when empty)
    pub fn to_json_fields(
        &self,
        doc: &TantivyDocument,
        wanted: &[String],
    ) -> BTreeMap<String, serde_json::Value> {
        let mut fields = BTreeMap::new();
        for name in self.stored_field_names() {
            if !wanted.is_empty() && !wanted.iter().any(|w| w == name) {
                continue;
            }
            let Some(value) = self.field(name).and_then(|field| doc.get_first(field)) else {
                continue;
            };
            let json = match self.kind(name) {
                Some(FieldKind::I64) => value.as_i64().map(serde_json::Value::from),
                Some(FieldKind::U64) => value.as_u64().map(serde_json::Value::from),
                Some(FieldKind::F64) => value.as_f64().map(serde_json::Value::from),
                _ => value.as_str().map(serde_json::Value::from),
            };
            if let Some(json) = json {
                fields.insert(name.to_string(), json);
            }
        }
        fields
    }

    /// Verify that a shard schema assigns the same field ids, value types
    /// and index options (indexed, stored, fast)
    pub fn check_compatible(&self, other: &Schema) -> Result<()> {
        for (field, entry) in self.schema.fields() {
            let other_field = other.get_field(entry.name()).map_err(|_| {
                SearchError::SchemaMismatch(format!("field `{}` is missing", entry.name()))
            })?;
            if other_field != field {
                return Err(SearchError::SchemaMismatch(format!(
                    "field `{}` has a different id",
                    entry.name()
                )));
            }
            let other_entry = other.get_field_entry(other_field);
            let other_type = other_entry.field_type().value_type();
            if other_type != entry.field_type().value_type() {
                return Err(SearchError::SchemaMismatch(format!(
                    "field `{}` has type {:?}, expected {:?}",
                    entry.name(),
                    other_type,
                    entry.field_type().value_type()
                )));
            }

            let options = [
                ("indexed", entry.is_indexed(), other_entry.is_indexed()),
                ("stored", entry.is_stored(), other_entry.is_stored()),
                ("fast", entry.is_fast(), other_entry.is_fast()),
            ];
            for (option, expected, found) in options {
                if expected && !found {
                    return Err(SearchError::SchemaMismatch(format!(
                        "field `{}` is not {}",
                        entry.name(),
                        option
                    )));
                }
            }
        }
        Ok(())
    }
}

impl Default for LogSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait for documents that can be indexed into a shard
pub trait SearchDocument {
    /// Convert to Tantivy document
    fn to_tantivy_doc(&self, schema: &LogSchema) -> TantivyDocument;

    /// Get document ID
    fn document_id(&self) -> String;
}

/// One parsed access-log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDocument {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Log file the line came from
    pub log_path: String,
    pub ip: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub bytes_sent: u64,
    /// Seconds
    pub request_time: f64,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub country: Option<String>,
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device: Option<String>,
    /// Raw log line
    pub message: String,
}

impl LogDocument {
    pub fn new(
        log_path: impl Into<String>,
        ip: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        status: u16,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let ip = ip.into();
        let method = method.into();
        let path = path.into();
        let message = format!(
            "{} - - [{}] \"{} {} HTTP/1.1\" {}",
            ip,
            timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
            method,
            path,
            status
        );
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            log_path: log_path.into(),
            ip,
            method,
            path,
            status,
            bytes_sent: 0,
            request_time: 0.0,
            user_agent: None,
            referer: None,
            country: None,
            browser: None,
            os: None,
            device: None,
            message,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_bytes_sent(mut self, bytes: u64) -> Self {
        self.bytes_sent = bytes;
        self
    }

    pub fn with_request_time(mut self, seconds: f64) -> Self {
        self.request_time = seconds;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Set browser, OS and device in one go
    pub fn with_client(
        mut self,
        browser: impl Into<String>,
        os: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        self.browser = Some(browser.into());
        self.os = Some(os.into());
        self.device = Some(device.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl SearchDocument for LogDocument {
    fn to_tantivy_doc(&self, log_schema: &LogSchema) -> TantivyDocument {
        let schema = log_schema.schema();
        let mut doc = TantivyDocument::new();

        let mut add_text = |name: &str, value: &str| {
            if let Ok(field) = schema.get_field(name) {
                doc.add_text(field, value);
            }
        };

        add_text(ID, &self.id);
        add_text(MESSAGE, &self.message);
        add_text(PATH, &self.path);
        add_text(PATH_EXACT, &self.path);
        add_text(LOG_PATH, &self.log_path);
        add_text(IP, &self.ip);
        add_text(METHOD, &self.method);
        // Status codes are matched and faceted as strings
        add_text(STATUS, &self.status.to_string());

        let optional = [
            (USER_AGENT, &self.user_agent),
            (REFERER, &self.referer),
            (COUNTRY, &self.country),
            (BROWSER, &self.browser),
            (OS, &self.os),
            (DEVICE, &self.device),
        ];
        for (name, value) in optional {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                add_text(name, value);
            }
        }

        doc.add_i64(log_schema.timestamp, self.timestamp.timestamp());
        if let Ok(field) = schema.get_field(BYTES_SENT) {
            doc.add_u64(field, self.bytes_sent);
        }
        if let Ok(field) = schema.get_field(REQUEST_TIME) {
            doc.add_f64(field, self.request_time);
        }

        doc
    }

    fn document_id(&self) -> String {
        self.id.clone()
    }
}
