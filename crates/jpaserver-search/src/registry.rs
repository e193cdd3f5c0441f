//! Search parameter registry.
//!
//! Parameters are indexed by (resource type, code), with common parameters
//! (base `Resource`) kept separately so they apply to every type. Uses
//! DashMap so definitions can be added while searches are running.

use dashmap::{DashMap, DashSet};
use std::sync::Arc;

use crate::parameters::{SearchParamDefinition, SearchParamType};

#[derive(Debug, Default)]
pub struct SearchParamRegistry {
    by_resource: DashMap<(String, String), Arc<SearchParamDefinition>>,
    common: DashMap<String, Arc<SearchParamDefinition>>,
    resource_types: DashSet<String>,
}

impl SearchParamRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in R4 parameter subset.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        for definition in default_definitions() {
            registry.register(definition);
        }
        registry
    }

    /// Register (or replace) a search parameter.
    pub fn register(&self, definition: SearchParamDefinition) {
        let definition = Arc::new(definition);
        if definition.is_common() {
            self.common
                .insert(definition.code.clone(), definition.clone());
            return;
        }
        for base in &definition.base {
            self.resource_types.insert(base.clone());
            self.by_resource
                .insert((base.clone(), definition.code.clone()), definition.clone());
        }
    }

    /// Declare a resource type that has no type-specific parameters.
    pub fn register_resource_type(&self, resource_type: impl Into<String>) {
        self.resource_types.insert(resource_type.into());
    }

    /// Get a search parameter for a specific resource type and code.
    ///
    /// Resource-specific parameters win over common ones.
    pub fn get(&self, resource_type: &str, code: &str) -> Option<Arc<SearchParamDefinition>> {
        let key = (resource_type.to_string(), code.to_string());
        if let Some(param) = self.by_resource.get(&key) {
            return Some(param.clone());
        }
        self.common.get(code).map(|p| p.clone())
    }

    /// All parameters applicable to a resource type, common ones first.
    pub fn get_all_for_type(&self, resource_type: &str) -> Vec<Arc<SearchParamDefinition>> {
        let mut params: Vec<_> = self.common.iter().map(|e| e.value().clone()).collect();
        params.extend(
            self.by_resource
                .iter()
                .filter(|entry| entry.key().0 == resource_type)
                .map(|entry| entry.value().clone()),
        );
        params.sort_by(|a, b| a.code.cmp(&b.code));
        params
    }

    pub fn is_known_type(&self, resource_type: &str) -> bool {
        self.resource_types.contains(resource_type)
    }

    pub fn resource_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.resource_types.iter().map(|t| t.clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.by_resource.len() + self.common.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn def(code: &str, base: &str, param_type: SearchParamType, path: &str) -> SearchParamDefinition {
    SearchParamDefinition::new(code, base, param_type).with_path(path)
}

/// Built-in R4 search parameters for the resource types the server ships with.
pub fn default_definitions() -> Vec<SearchParamDefinition> {
    use SearchParamType as T;

    vec![
        // Resource
        def("_id", "Resource", T::Token, "id"),
        def("_lastUpdated", "Resource", T::Date, "meta.lastUpdated"),
        def("_tag", "Resource", T::Token, "meta.tag"),
        def("_profile", "Resource", T::Uri, "meta.profile"),
        def("_security", "Resource", T::Token, "meta.security"),
        // Patient
        def("name", "Patient", T::String, "name"),
        def("family", "Patient", T::String, "name.family"),
        def("given", "Patient", T::String, "name.given"),
        def("address", "Patient", T::String, "address"),
        def("address-city", "Patient", T::String, "address.city"),
        def("birthdate", "Patient", T::Date, "birthDate"),
        def("death-date", "Patient", T::Date, "deceased"),
        def("gender", "Patient", T::Token, "gender"),
        def("identifier", "Patient", T::Token, "identifier"),
        def("active", "Patient", T::Token, "active"),
        def("telecom", "Patient", T::Token, "telecom"),
        def("general-practitioner", "Patient", T::Reference, "generalPractitioner")
            .with_targets(&["Practitioner", "Organization"]),
        def("organization", "Patient", T::Reference, "managingOrganization")
            .with_targets(&["Organization"]),
        // Practitioner
        def("name", "Practitioner", T::String, "name"),
        def("family", "Practitioner", T::String, "name.family"),
        def("given", "Practitioner", T::String, "name.given"),
        def("identifier", "Practitioner", T::Token, "identifier"),
        def("active", "Practitioner", T::Token, "active"),
        // Organization
        def("name", "Organization", T::String, "name"),
        def("identifier", "Organization", T::Token, "identifier"),
        def("active", "Organization", T::Token, "active"),
        def("address-city", "Organization", T::String, "address.city"),
        def("partof", "Organization", T::Reference, "partOf").with_targets(&["Organization"]),
        // Observation
        def("code", "Observation", T::Token, "code"),
        def("status", "Observation", T::Token, "status"),
        def("category", "Observation", T::Token, "category"),
        def("date", "Observation", T::Date, "effective"),
        def("value-quantity", "Observation", T::Quantity, "value"),
        def("value-string", "Observation", T::String, "value"),
        def("subject", "Observation", T::Reference, "subject")
            .with_targets(&["Patient", "Group", "Device", "Location"]),
        def("patient", "Observation", T::Reference, "subject").with_targets(&["Patient"]),
        def("encounter", "Observation", T::Reference, "encounter").with_targets(&["Encounter"]),
        def("performer", "Observation", T::Reference, "performer")
            .with_targets(&["Practitioner", "Organization", "Patient"]),
        SearchParamDefinition::new("code-value-quantity", "Observation", T::Composite)
            .with_components(&["code", "value-quantity"]),
        // Encounter
        def("status", "Encounter", T::Token, "status"),
        def("class", "Encounter", T::Token, "class"),
        def("date", "Encounter", T::Date, "period"),
        def("subject", "Encounter", T::Reference, "subject").with_targets(&["Patient", "Group"]),
        def("patient", "Encounter", T::Reference, "subject").with_targets(&["Patient"]),
        def("participant", "Encounter", T::Reference, "participant.individual")
            .with_targets(&["Practitioner"]),
        def("length", "Encounter", T::Number, "length.value"),
        // Subscription
        def("status", "Subscription", T::Token, "status"),
        def("criteria", "Subscription", T::String, "criteria"),
        def("type", "Subscription", T::Token, "channel.type"),
        def("payload", "Subscription", T::Token, "channel.payload"),
        def("url", "Subscription", T::Uri, "channel.endpoint"),
    ]
}
