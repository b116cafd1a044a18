//! Config Model — an immutable, validated description of
//! one sync. Built once via [`ConfigBuilder`], read-only thereafter.

use crate::connection::Connection;
use crate::error::{ConfigResult, ConfigurationError};
use std::collections::{HashMap, HashSet};

/// Closed set of semantic types the Source Introspector classifies native
/// catalog types into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticType {
    Integer,
    BigInt,
    SmallInt,
    Boolean,
    String,
    Text,
    Decimal,
    Float,
    DateTime,
    Date,
    Time,
    Blob,
    Binary,
    Json,
    Guid,
}

/// Engine-owned metadata column names on the live and temp tables
/// (default metadata column names).
#[derive(Debug, Clone)]
pub struct MetadataColumns {
    pub id: String,
    pub content_hash: String,
    pub created_at: String,
    pub updated_at: String,
    pub batch_revision: String,
}

impl Default for MetadataColumns {
    fn default() -> Self {
        Self {
            id: "id".to_string(),
            content_hash: "content_hash".to_string(),
            created_at: "created_at".to_string(),
            updated_at: "updated_at".to_string(),
            batch_revision: "batch_revision".to_string(),
        }
    }
}

/// Default placeholder datetime literal.
pub const DEFAULT_PLACEHOLDER_DATETIME: &str = "2222-02-22 00:00:00";

/// Immutable description of one sync. See [`ConfigBuilder::build`] for
/// the full invariant list enforced at construction time.
#[derive(Clone)]
pub struct Config {
    pub source_connection: Connection,
    pub target_connection: Connection,
    pub source_object_name: String,
    pub target_live_table_name: String,
    pub target_temp_table_name: String,
    /// Ordered source-column -> target-column pairs identifying business
    /// identity. Non-empty.
    pub primary_key_column_map: Vec<(String, String)>,
    /// Ordered source-column -> target-column pairs. Superset of the PK
    /// map, the hash-source set, and the non-nullable datetime set.
    pub data_column_mapping: Vec<(String, String)>,
    /// Source column names (subset of `data_column_mapping` keys),
    /// non-empty, declared order is the hash's column order.
    pub columns_for_content_hash: Vec<String>,
    pub non_nullable_datetime_source_columns: HashSet<String>,
    pub metadata_columns: MetadataColumns,
    pub placeholder_datetime: String,
    pub target_id_column_type: SemanticType,
    pub target_hash_column_type: SemanticType,
    pub target_hash_column_length: u32,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Target column names for the business PK, in declared order.
    pub fn pk_target_columns(&self) -> Vec<String> {
        self.primary_key_column_map.iter().map(|(_, t)| t.clone()).collect()
    }

    /// Target column names for non-PK data columns, in declared order.
    pub fn data_target_columns(&self) -> Vec<String> {
        let pk_targets: HashSet<&str> = self.primary_key_column_map.iter().map(|(_, t)| t.as_str()).collect();
        self.data_column_mapping
            .iter()
            .filter(|(_, t)| !pk_targets.contains(t.as_str()))
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Source column name -> target column name lookup over the full data
    /// mapping (PK + remaining data columns).
    pub fn data_map_lookup(&self) -> HashMap<&str, &str> {
        self.data_column_mapping.iter().map(|(s, t)| (s.as_str(), t.as_str())).collect()
    }
}

/// Builder for [`Config`]. Validates every invariant at
/// [`build`](ConfigBuilder::build) time.
#[derive(Default)]
pub struct ConfigBuilder {
    source_connection: Option<Connection>,
    target_connection: Option<Connection>,
    source_object_name: Option<String>,
    target_live_table_name: Option<String>,
    target_temp_table_name: Option<String>,
    primary_key_column_map: Vec<(String, String)>,
    data_column_mapping: Vec<(String, String)>,
    columns_for_content_hash: Vec<String>,
    non_nullable_datetime_source_columns: HashSet<String>,
    metadata_columns: Option<MetadataColumns>,
    placeholder_datetime: Option<String>,
    target_id_column_type: Option<SemanticType>,
    target_hash_column_type: Option<SemanticType>,
    target_hash_column_length: Option<u32>,
}

impl ConfigBuilder {
    pub fn source_connection(mut self, conn: Connection) -> Self {
        self.source_connection = Some(conn);
        self
    }

    pub fn target_connection(mut self, conn: Connection) -> Self {
        self.target_connection = Some(conn);
        self
    }

    pub fn source_object_name(mut self, name: impl Into<String>) -> Self {
        self.source_object_name = Some(name.into());
        self
    }

    pub fn target_live_table_name(mut self, name: impl Into<String>) -> Self {
        self.target_live_table_name = Some(name.into());
        self
    }

    pub fn target_temp_table_name(mut self, name: impl Into<String>) -> Self {
        self.target_temp_table_name = Some(name.into());
        self
    }

    pub fn primary_key_column(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.primary_key_column_map.push((source.into(), target.into()));
        self
    }

    pub fn data_column(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.data_column_mapping.push((source.into(), target.into()));
        self
    }

    pub fn hash_column(mut self, source: impl Into<String>) -> Self {
        self.columns_for_content_hash.push(source.into());
        self
    }

    pub fn non_nullable_datetime_column(mut self, source: impl Into<String>) -> Self {
        self.non_nullable_datetime_source_columns.insert(source.into());
        self
    }

    pub fn metadata_columns(mut self, cols: MetadataColumns) -> Self {
        self.metadata_columns = Some(cols);
        self
    }

    pub fn placeholder_datetime(mut self, literal: impl Into<String>) -> Self {
        self.placeholder_datetime = Some(literal.into());
        self
    }

    pub fn target_id_column_type(mut self, t: SemanticType) -> Self {
        self.target_id_column_type = Some(t);
        self
    }

    pub fn target_hash_column_type(mut self, t: SemanticType) -> Self {
        self.target_hash_column_type = Some(t);
        self
    }

    pub fn target_hash_column_length(mut self, len: u32) -> Self {
        self.target_hash_column_length = Some(len);
        self
    }

    /// Validate every invariant and produce an immutable
    /// [`Config`], or a [`ConfigurationError`] naming the first violation.
    pub fn build(self) -> ConfigResult<Config> {
        let source_connection = self.source_connection.ok_or(ConfigurationError::EmptyIdentifier("source_connection"))?;
        let target_connection = self.target_connection.ok_or(ConfigurationError::EmptyIdentifier("target_connection"))?;

        let source_object_name = non_empty(self.source_object_name, "source_object_name")?;
        let target_live_table_name = non_empty(self.target_live_table_name, "target_live_table_name")?;
        let target_temp_table_name = non_empty(self.target_temp_table_name, "target_temp_table_name")?;

        if self.primary_key_column_map.is_empty() {
            return Err(ConfigurationError::EmptyPrimaryKeyMap);
        }

        let data_map_lookup: HashMap<&str, &str> =
            self.data_column_mapping.iter().map(|(s, t)| (s.as_str(), t.as_str())).collect();

        for (pk_source, pk_target) in &self.primary_key_column_map {
            match data_map_lookup.get(pk_source.as_str()) {
                None => return Err(ConfigurationError::PrimaryKeyNotInDataMap(pk_source.clone())),
                Some(data_target) if *data_target != pk_target.as_str() => {
                    return Err(ConfigurationError::PrimaryKeyTargetMismatch {
                        source: pk_source.clone(),
                        pk_target: pk_target.clone(),
                        data_target: data_target.to_string(),
                    });
                }
                _ => {}
            }
        }

        if self.columns_for_content_hash.is_empty() {
            return Err(ConfigurationError::EmptyContentHashColumns);
        }
        for col in &self.columns_for_content_hash {
            if !data_map_lookup.contains_key(col.as_str()) {
                return Err(ConfigurationError::HashColumnNotInDataMap(col.clone()));
            }
        }
        for col in &self.non_nullable_datetime_source_columns {
            if !data_map_lookup.contains_key(col.as_str()) {
                return Err(ConfigurationError::DatetimeColumnNotInDataMap(col.clone()));
            }
        }

        let metadata_columns = self.metadata_columns.unwrap_or_default();
        let mut seen_targets: HashSet<&str> = HashSet::new();
        for t in self
            .data_column_mapping
            .iter()
            .map(|(_, t)| t.as_str())
            .chain([
                metadata_columns.id.as_str(),
                metadata_columns.content_hash.as_str(),
                metadata_columns.created_at.as_str(),
                metadata_columns.updated_at.as_str(),
                metadata_columns.batch_revision.as_str(),
            ])
        {
            if !seen_targets.insert(t) {
                return Err(ConfigurationError::DuplicateTargetColumn(t.to_string()));
            }
        }

        Ok(Config {
            source_connection,
            target_connection,
            source_object_name,
            target_live_table_name,
            target_temp_table_name,
            primary_key_column_map: self.primary_key_column_map,
            data_column_mapping: self.data_column_mapping,
            columns_for_content_hash: self.columns_for_content_hash,
            non_nullable_datetime_source_columns: self.non_nullable_datetime_source_columns,
            metadata_columns,
            placeholder_datetime: self.placeholder_datetime.unwrap_or_else(|| DEFAULT_PLACEHOLDER_DATETIME.to_string()),
            target_id_column_type: self.target_id_column_type.unwrap_or(SemanticType::BigInt),
            target_hash_column_type: self.target_hash_column_type.unwrap_or(SemanticType::String),
            target_hash_column_length: self.target_hash_column_length.unwrap_or(64),
        })
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> ConfigResult<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigurationError::EmptyIdentifier(field)),
    }
}
