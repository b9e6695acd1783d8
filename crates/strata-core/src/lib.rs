//! Strata Core - resource model and unit file types
//!
//! This crate provides the foundational types used throughout Strata:
//! - `Resource` / `ResourceSet`: manifests keyed by identity
//! - `FieldPath`: JSON Pointer and dotted paths into a manifest
//! - `TargetSelector`: the predicate used by patches and replacements
//! - `Kustomization`: the unit file schema
//! - `UnitFile`: in-place edits of a unit file

pub mod edit;
pub mod error;
pub mod fieldpath;
pub mod image;
pub mod kustomization;
pub mod resource;
pub mod selector;

pub use edit::{ImageEdit, UnitFile, parse_replicas_arg};
pub use error::{CoreError, Result};
pub use fieldpath::{FieldPath, Segment};
pub use image::ImageReference;
pub use kustomization::{
    FieldOptions, GeneratorArgs, GeneratorBehavior, GeneratorOptions, ImageOverride,
    Json6902Args, Kustomization, LabelArgs, PatchArgs, PatchOptions, Replacement,
    ReplacementEntry, ReplacementSource, ReplacementTarget, ReplicaOverride, UNIT_FILE_NAMES,
    find_unit_file,
};
pub use resource::{GeneratedMeta, Gvk, PriorName, ResId, Resource, ResourceSet};
pub use selector::{CompiledSelector, Requirement, TargetSelector};
