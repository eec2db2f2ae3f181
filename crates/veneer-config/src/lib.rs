//! Configuration model and hot-reload loader for the veneer data API
//! gateway.
//!
//! Everything the engine does is derived from one declarative JSON file:
//! which database backs the deployment, which wire surfaces are enabled,
//! and the catalog of entities with their permissions and relationships.
//!
//! # Architecture
//!
//! - [`model`]: the typed, immutable configuration snapshot
//! - [`merge`]: `VENEER_ENVIRONMENT` overlay deep-merge
//! - [`env`]: `@env('NAME')` token resolution
//! - [`validate`]: cross-reference validation with collected errors
//! - [`loader`]: atomic snapshot publishing and debounced hot-reload
//!
//! # Example
//!
//! ```rust,no_run
//! use veneer_config::ConfigLoader;
//!
//! # fn main() -> veneer_error::Result<()> {
//! let loader = ConfigLoader::from_file("config.json")?;
//! let snapshot = loader.current();
//! println!("{} entities", snapshot.entities.len());
//! # Ok(())
//! # }
//! ```

pub mod env;
pub mod loader;
pub mod merge;
pub mod model;
pub mod validate;

pub use loader::{ConfigLoader, ReloadCallback, WatchHandle, load};
pub use model::{
    Action, ActionKind, AuthenticationOptions, Cardinality, CorsOptions, DataSource,
    DatabaseKind, Entity, EntitySource, FieldScope, GraphQLEntityConfig, GraphQLEntityOptions,
    GraphQLOperation, GraphQLOptions, HostMode, HostOptions, JwtOptions, Permission, Policy,
    Relationship, RestEntityConfig, RestEntityOptions, RestMethod, RestOptions, RuntimeConfig,
    RuntimeOptions, SourceKind,
};
pub use validate::validate;
