//! Model documents: serde-encoded source declarations and amendments.
//!
//! Supports:
//! - **TOML** (.toml)
//! - **JSON** (.json)
//!
//! A document is loaded in two passes, the same way a model is built
//! incrementally: every source is declared first, then all amendments are
//! applied as one atomic batch. This lets sources join each other in either
//! order and form cycles.
//!
//! # Example
//!
//! ```rust,ignore
//! use skein::model::loader::load_document;
//! use std::path::Path;
//!
//! let doc = load_document(Path::new("model.toml"))?;
//! let store = doc.build()?;
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use super::amend::Amendment;
use super::error::ModelError;
use super::store::ModelStore;
use super::types::{AggregateDef, FieldDef, FieldKind, JoinDef, Query};

/// Errors that can occur when loading a model document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Unsupported file extension: {extension}. Supported: .toml, .json")]
    UnsupportedExtension { extension: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid field '{field}' on '{source_name}': {message}")]
    InvalidField {
        source_name: String,
        field: String,
        message: String,
    },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

/// Result type for model loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

/// Root of a model document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    #[serde(default)]
    pub sources: Vec<SourceDecl>,
    #[serde(default)]
    pub amendments: Vec<AmendmentDecl>,
    /// In-memory rows for the reference execution adapter.
    #[serde(default)]
    pub tables: Vec<TableData>,
}

/// A source declaration. `query` makes it a query-based source, in which
/// case `fields` must be empty; its fields come from the query outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDecl {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDecl>,
    #[serde(default)]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub query: Option<Query>,
}

/// A field declaration. Scalar unless `join` or `aggregate` is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateDef>,
}

/// Append `field` to the already-declared source `owner`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendmentDecl {
    pub owner: String,
    pub field: FieldDecl,
}

/// Rows of one table, keyed by source name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl FieldDecl {
    fn to_def(&self, source_name: &str) -> LoadResult<FieldDef> {
        let kind = match (&self.join, &self.aggregate) {
            (None, None) => FieldKind::Scalar,
            (Some(join), None) => FieldKind::Join(join.clone()),
            (None, Some(agg)) => {
                if agg.path.is_none() && !agg.op.allows_no_argument() {
                    return Err(LoadError::InvalidField {
                        source_name: source_name.to_string(),
                        field: self.name.clone(),
                        message: format!("aggregate '{}' needs a path", agg.op),
                    });
                }
                FieldKind::Aggregate(agg.clone())
            }
            (Some(_), Some(_)) => {
                return Err(LoadError::InvalidField {
                    source_name: source_name.to_string(),
                    field: self.name.clone(),
                    message: "a field cannot be both a join and an aggregate".into(),
                })
            }
        };
        Ok(FieldDef {
            name: self.name.clone(),
            kind,
        })
    }
}

impl ModelDocument {
    pub fn from_toml_str(content: &str) -> LoadResult<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_json_str(content: &str) -> LoadResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Amendments as typed values, in document order.
    pub fn amendments(&self) -> LoadResult<Vec<Amendment>> {
        self.amendments
            .iter()
            .map(|decl| {
                Ok(Amendment::AddField {
                    owner: decl.owner.clone(),
                    field: decl.field.to_def(&decl.owner)?,
                })
            })
            .collect()
    }

    /// Build a fresh store: declare every source, then apply all amendments.
    pub fn build(&self) -> LoadResult<ModelStore> {
        let mut store = ModelStore::new();

        for decl in &self.sources {
            match &decl.query {
                Some(query) => {
                    if !decl.fields.is_empty() {
                        return Err(LoadError::InvalidField {
                            source_name: decl.name.clone(),
                            field: decl.fields[0].name.clone(),
                            message: "query-based sources take their fields from the query; \
                                      add extra fields as amendments"
                                .into(),
                        });
                    }
                    store.define_query_source(
                        decl.name.clone(),
                        query.clone(),
                        decl.primary_key.clone(),
                    )?;
                }
                None => {
                    let fields = decl
                        .fields
                        .iter()
                        .map(|f| f.to_def(&decl.name))
                        .collect::<LoadResult<Vec<_>>>()?;
                    store.define_source(decl.name.clone(), fields, decl.primary_key.clone())?;
                }
            }
        }

        store.apply(self.amendments()?)?;
        Ok(store)
    }
}

/// Load a document from a file path, choosing the format by extension.
pub fn load_document(path: &Path) -> LoadResult<ModelDocument> {
    if !path.exists() {
        return Err(LoadError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let content = std::fs::read_to_string(path)?;

    match extension {
        "toml" => ModelDocument::from_toml_str(&content),
        "json" => ModelDocument::from_json_str(&content),
        _ => Err(LoadError::UnsupportedExtension {
            extension: extension.to_string(),
        }),
    }
}
