//! Resource DAO: persistence, indexing and search over the index store.

use std::sync::Arc;

use jpaserver_core::{
    CoreError, generate_id, is_valid_id, now_utc, resource_id_of, resource_type_of, stamp_meta,
};
use serde_json::Value;

use crate::builder::{SearchBuilder, SearchPlan};
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::executor::execute;
use crate::index::{IndexStore, StoredResource, extract_index_rows};
use crate::parser::{ParsedParam, SearchRequest};
use crate::registry::SearchParamRegistry;

/// One page of search results.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Matches across all pages
    pub total: usize,
    pub resources: Vec<Value>,
}

#[derive(Debug)]
pub struct ResourceDao {
    store: IndexStore,
    registry: Arc<SearchParamRegistry>,
    config: SearchConfig,
}

impl ResourceDao {
    pub fn new(registry: Arc<SearchParamRegistry>, config: SearchConfig) -> Self {
        Self {
            store: IndexStore::new(),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &SearchParamRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Store a new resource. A valid client supplied id is kept, otherwise
    /// one is assigned.
    pub fn create(&self, resource: Value) -> Result<StoredResource> {
        let resource_type = resource_type_of(&resource)?.to_string();
        let id = match resource_id_of(&resource) {
            Some(id) if is_valid_id(id) => id.to_string(),
            Some(id) => return Err(CoreError::invalid_id(id).into()),
            None => generate_id(),
        };
        self.write(&resource_type, &id, resource)
    }

    /// Store a new version of `resource_type/id`.
    pub fn update(&self, resource_type: &str, id: &str, resource: Value) -> Result<StoredResource> {
        if resource_type_of(&resource)? != resource_type {
            return Err(CoreError::invalid_resource(format!(
                "resourceType does not match {resource_type}"
            ))
            .into());
        }
        if let Some(body_id) = resource_id_of(&resource)
            && body_id != id
        {
            return Err(CoreError::invalid_resource(format!(
                "resource id '{body_id}' does not match '{id}'"
            ))
            .into());
        }
        if !is_valid_id(id) {
            return Err(CoreError::invalid_id(id).into());
        }
        self.write(resource_type, id, resource)
    }

    fn write(&self, resource_type: &str, id: &str, mut resource: Value) -> Result<StoredResource> {
        self.registry.register_resource_type(resource_type);
        let updated = now_utc();
        let stored = self.store.upsert_with(resource_type, id, updated, |version| {
            stamp_meta(&mut resource, id, version, updated)?;
            let rows = extract_index_rows(&self.registry, resource_type, &resource);
            Ok::<_, SearchError>((resource, rows))
        })?;
        tracing::debug!(
            resource_type,
            id,
            version = stored.version,
            "Stored resource"
        );
        Ok(stored)
    }

    pub fn read(&self, resource_type: &str, id: &str) -> Result<StoredResource> {
        let stored = self
            .store
            .read(resource_type, id)
            .ok_or_else(|| CoreError::resource_not_found(resource_type, id))?;
        if stored.deleted {
            return Err(CoreError::resource_deleted(resource_type, id).into());
        }
        Ok(stored)
    }

    /// Delete a resource. Deleting an already deleted resource succeeds.
    pub fn delete(&self, resource_type: &str, id: &str) -> Result<()> {
        self.store
            .delete(resource_type, id, now_utc())
            .ok_or_else(|| CoreError::resource_not_found(resource_type, id))?;
        tracing::debug!(resource_type, id, "Deleted resource");
        Ok(())
    }

    /// Run a search given as a raw query string.
    pub fn search(&self, resource_type: &str, query: &str) -> Result<SearchOutcome> {
        let request = SearchRequest::parse(query)?;
        self.search_request(resource_type, &request)
    }

    pub fn plan(&self, resource_type: &str, request: &SearchRequest) -> Result<SearchPlan> {
        SearchBuilder::new(&self.registry, &self.config).build(resource_type, request)
    }

    pub fn search_request(
        &self,
        resource_type: &str,
        request: &SearchRequest,
    ) -> Result<SearchOutcome> {
        let plan = self.plan(resource_type, request)?;
        let built = plan.to_sql();
        tracing::debug!(sql = %built, params = built.params.len(), "Executing search");

        let result = self.store.read_tables(|tables| execute(tables, &plan.query));
        let resources = result
            .pids
            .iter()
            .filter_map(|pid| self.store.read_pid(*pid))
            .map(|stored| stored.resource)
            .collect();
        Ok(SearchOutcome {
            total: result.total,
            resources,
        })
    }

    /// Check criteria such as `Patient?name=Smith` without running them.
    pub fn validate_criteria(&self, criteria: &str) -> Result<()> {
        let (resource_type, request) = parse_criteria(criteria)?;
        self.plan(&resource_type, &request).map(|_| ())
    }

    /// Whether a stored resource is matched by `criteria`.
    pub fn matches(&self, criteria: &str, resource: &Value) -> Result<bool> {
        let (resource_type, request) = parse_criteria(criteria)?;
        if resource_type_of(resource)? != resource_type {
            return Ok(false);
        }
        let Some(id) = resource_id_of(resource) else {
            return Ok(false);
        };
        let request = request.with_param(ParsedParam::new("_id", vec![id.to_string()]));
        let plan = self.plan(&resource_type, &request)?;
        let result = self.store.read_tables(|tables| execute(tables, &plan.query));
        Ok(result.total > 0)
    }
}

/// Split `Type?params` into the resource type and the parsed request.
pub fn parse_criteria(criteria: &str) -> Result<(String, SearchRequest)> {
    let (resource_type, query) = criteria.split_once('?').unwrap_or((criteria, ""));
    let resource_type = resource_type.trim().trim_start_matches('/');
    if resource_type.is_empty() {
        return Err(SearchError::invalid_value(format!(
            "criteria '{criteria}' has no resource type"
        )));
    }
    Ok((resource_type.to_string(), SearchRequest::parse(query)?))
}
