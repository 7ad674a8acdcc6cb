//! Compilation sessions.
//!
//! A `Session` owns one model store. Amendments go through the session, which
//! keeps a cache of compiled plans keyed by the store revision and request.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::CompilerSettings;
use crate::executor::{ExecutionAdapter, ExecutionResult, QueryResult};
use crate::model::{Amendment, FieldId, LoadResult, ModelDocument, ModelResult, ModelStore};
use crate::planner::{CompileResult, CompiledPlan, QueryCompiler, QueryRequest};

/// SHA-256 of the JSON encoding of `value`, as lowercase hex.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// Outcome of one request in `Session::run_all`.
#[derive(Debug)]
pub struct QueryOutcome {
    pub request: QueryRequest,
    pub result: ExecutionResult<QueryResult>,
}

impl QueryOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct Session {
    store: ModelStore,
    settings: CompilerSettings,
    plans: HashMap<String, Arc<CompiledPlan>>,
}

impl Session {
    pub fn new(store: ModelStore) -> Self {
        Self::with_settings(store, CompilerSettings::default())
    }

    pub fn with_settings(store: ModelStore, settings: CompilerSettings) -> Self {
        Self {
            store,
            settings,
            plans: HashMap::new(),
        }
    }

    /// Build the document's model and open a session over it.
    pub fn from_document(document: &ModelDocument) -> LoadResult<Self> {
        Ok(Self::new(document.build()?))
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn settings(&self) -> &CompilerSettings {
        &self.settings
    }

    /// Number of plans currently cached.
    pub fn cached_plans(&self) -> usize {
        self.plans.len()
    }

    /// Apply a batch of amendments atomically.
    pub fn amend(&mut self, amendments: Vec<Amendment>) -> ModelResult<Vec<FieldId>> {
        let count = amendments.len();
        let fields = self.store.apply(amendments)?;
        // Cached plans are keyed by the old revision and can never hit again.
        self.plans.clear();
        info!(
            amendments = count,
            revision = self.store.revision(),
            "applied amendments"
        );
        Ok(fields)
    }

    /// Compile a request against the current model, reusing a cached plan
    /// when the model has not changed since it was compiled.
    pub fn compile(&mut self, request: &QueryRequest) -> CompileResult<Arc<CompiledPlan>> {
        if !self.settings.plan_cache {
            return QueryCompiler::new(&self.store)
                .compile_request(request)
                .map(Arc::new);
        }

        let key = match compute_hash(&(self.store.revision(), request)) {
            Ok(key) => Some(key),
            Err(err) => {
                warn!(error = %err, "cannot hash request; compiling without cache");
                None
            }
        };

        if let Some(plan) = key.as_ref().and_then(|k| self.plans.get(k)) {
            debug!(source = %request.source, "plan cache hit");
            return Ok(Arc::clone(plan));
        }

        let plan = Arc::new(QueryCompiler::new(&self.store).compile_request(request)?);
        if let Some(key) = key {
            self.plans.insert(key, Arc::clone(&plan));
        }
        Ok(plan)
    }

    /// Compile and execute one request.
    pub async fn run<A>(
        &mut self,
        adapter: &A,
        request: &QueryRequest,
    ) -> ExecutionResult<QueryResult>
    where
        A: ExecutionAdapter + ?Sized,
    {
        let plan = self.compile(request)?;
        adapter.execute(&plan).await
    }

    /// Run requests in order. A failing request is recorded in its outcome
    /// and does not stop the rest.
    pub async fn run_all<A>(&mut self, adapter: &A, requests: &[QueryRequest]) -> Vec<QueryOutcome>
    where
        A: ExecutionAdapter + ?Sized,
    {
        let mut outcomes = Vec::with_capacity(requests.len());
        for (index, request) in requests.iter().enumerate() {
            let result = self.run(adapter, request).await;
            if let Err(err) = &result {
                warn!(index, source = %request.source, error = %err, "query failed");
            }
            outcomes.push(QueryOutcome {
                request: request.clone(),
                result,
            });
        }
        outcomes
    }
}
