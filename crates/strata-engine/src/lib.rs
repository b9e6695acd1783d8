//! Strata Engine - builds units into resource streams
//!
//! This crate turns a unit directory into the final list of resources:
//! - Loading the unit tree (local and remote bases, generator sources, patches)
//! - Generators for ConfigMaps and Secrets with content-hash name suffixes
//! - Built-in transformers (labels, annotations, names, namespace, images, replicas)
//! - Strategic merge and JSON patches
//! - Cross-resource replacements
//!
//! Units are built bottom-up; independent bases build concurrently and a base
//! shared by several overlays is built once.

pub mod builder;
pub mod context;
pub mod error;
pub mod generators;
pub mod hash;
pub mod loader;
pub mod patch;
pub mod replacement;
pub mod transformers;

pub use builder::{
    BuildOptions, BuildOutput, DEFAULT_REMOTE_TIMEOUT, Engine, EngineBuilder,
    GeneratedResourceRecord,
};
pub use context::{BuildContext, UnitState};
pub use error::{BuildError, Result};
pub use generators::{GeneratorInput, GeneratorKind};
pub use loader::{LoadRestrictor, LoadedUnit, Loader, UnitEntry};
pub use patch::{Patch, PatchDecl};
