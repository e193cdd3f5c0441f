//! FHIR search for the JPA server.
//!
//! A search request flows through:
//! - [`parser`]: query string to [`SearchRequest`]
//! - [`predicate`]: one predicate per parameter, joins deduplicated by the
//!   query root's [`query::JoinRegistry`]
//! - [`query::QueryRoot`]: accumulates predicates and finalizes the query
//! - [`sql`] renders it, [`executor`] evaluates it against the [`index`] store
//!
//! [`ResourceDao`] ties these together with resource persistence.

pub mod builder;
pub mod config;
pub mod dao;
pub mod error;
pub mod executor;
pub mod index;
pub mod normalize;
pub mod parameters;
pub mod parser;
pub mod predicate;
pub mod query;
pub mod registry;
pub mod sql;

pub use builder::{SearchBuilder, SearchPlan};
pub use config::{QueryLimits, SearchConfig};
pub use dao::{ResourceDao, SearchOutcome, parse_criteria};
pub use error::{Result, SearchError};
pub use executor::{QueryResult, execute};
pub use index::{IndexStore, StoredResource};
pub use parameters::{SearchModifier, SearchParamDefinition, SearchParamType, SearchPrefix};
pub use parser::{ParsedParam, SearchRequest, SortSpec};
pub use predicate::PredicateBuilder;
pub use registry::SearchParamRegistry;
pub use sql::BuiltQuery;
