//! Build orchestration
//!
//! [`Engine::build`] loads a unit tree, builds every unit bottom-up and
//! finalizes the root's resources. Each unit runs the same pipeline:
//!
//! 1. build bases (concurrently, one task per base)
//! 2. assemble base output and local resources
//! 3. generators
//! 4. transformers
//! 5. patches
//! 6. replacements
//!
//! Units are memoized by content digest, so a base shared by several
//! overlays is built once per build.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::Serialize;
use strata_core::{ResId, Resource, ResourceSet};
use strata_repo::RemoteCache;
use tokio::task::JoinSet;

use crate::context::{BuildContext, UnitState};
use crate::error::{BuildError, Result};
use crate::generators::apply_generators;
use crate::hash;
use crate::loader::{LoadRestrictor, LoadedUnit, Loader, UnitEntry};
use crate::patch::apply_patches;
use crate::replacement::apply_replacements;
use crate::transformers::{Rename, apply_transformers, rewrite_references};

/// Default time limit for one remote fetch
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(60);

/// Knobs for a build
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub remote_timeout: Duration,
    /// Remote cache location; the user cache dir when unset
    pub cache_dir: Option<PathBuf>,
    /// Upper bound on concurrently running unit pipelines
    pub max_parallel: usize,
    pub load_restrictor: LoadRestrictor,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            cache_dir: None,
            max_parallel: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            load_restrictor: LoadRestrictor::default(),
        }
    }
}

impl BuildOptions {
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_load_restrictor(mut self, restrictor: LoadRestrictor) -> Self {
        self.load_restrictor = restrictor;
        self
    }
}

/// A generated resource as it appears in the output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedResourceRecord {
    pub kind: String,
    /// Final name, including any hash suffix
    pub name: String,
    /// Name declared by the generator
    pub generator: String,
    pub namespace: Option<String>,
    /// sha256 hex of the canonical data
    pub content_digest: String,
    pub hash_suffix: Option<String>,
    pub immutable: bool,
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    /// Root resources, sorted by kind, namespace and name
    pub resources: Vec<Resource>,
    pub generated: Vec<GeneratedResourceRecord>,
    /// Final state of every unit, in discovery order
    pub unit_states: IndexMap<String, UnitState>,
    /// Unit pipelines that actually ran (memo hits excluded)
    pub units_built: usize,
}

impl BuildOutput {
    /// Multi-document YAML stream
    pub fn to_yaml(&self) -> strata_core::Result<String> {
        let mut documents = Vec::with_capacity(self.resources.len());
        for resource in &self.resources {
            documents.push(resource.to_yaml()?);
        }
        Ok(documents.join("---\n"))
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Builder for an [`Engine`]
#[derive(Debug, Default)]
pub struct EngineBuilder {
    options: BuildOptions,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time limit for each remote fetch
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.with_remote_timeout(timeout);
        self
    }

    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options = self.options.with_cache_dir(dir);
        self
    }

    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.options = self.options.with_max_parallel(max_parallel);
        self
    }

    pub fn load_restrictor(mut self, restrictor: LoadRestrictor) -> Self {
        self.options = self.options.with_load_restrictor(restrictor);
        self
    }

    pub fn build(self) -> Engine {
        Engine::new(self.options)
    }
}

/// The build engine
#[derive(Debug, Clone)]
pub struct Engine {
    options: BuildOptions,
}

impl Engine {
    pub fn new(options: BuildOptions) -> Self {
        Self { options }
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Build the unit in `path`
    pub async fn build(&self, path: &Path) -> Result<BuildOutput> {
        let unit_name = path.display().to_string();
        let cache_dir = self
            .options
            .cache_dir
            .clone()
            .unwrap_or_else(RemoteCache::default_dir);
        let cache = RemoteCache::new(cache_dir, self.options.remote_timeout).map_err(|e| {
            BuildError::load(&unit_name, format!("cannot open the remote cache: {}", e))
        })?;
        let ctx = Arc::new(BuildContext::new(Arc::new(cache), self.options.max_parallel));

        let root = Loader::new(&ctx, self.options.load_restrictor)
            .load(path)
            .await?;
        tracing::info!(unit = %root.name, "building");

        let built = build_unit(Arc::clone(&ctx), Arc::clone(&root)).await?;
        let resources = Arc::try_unwrap(built).unwrap_or_else(|shared| (*shared).clone());
        let (resources, generated) = finalize(&root.name, resources)?;

        tracing::info!(
            unit = %root.name,
            resources = resources.len(),
            units_built = ctx.units_built(),
            "build finished"
        );

        Ok(BuildOutput {
            resources,
            generated,
            unit_states: ctx.states(),
            units_built: ctx.units_built(),
        })
    }
}

// ============================================================================
// Unit pipeline
// ============================================================================

/// Build one unit, or reuse the result for a unit with the same digest
fn build_unit(
    ctx: Arc<BuildContext>,
    unit: Arc<LoadedUnit>,
) -> BoxFuture<'static, Result<Arc<ResourceSet>>> {
    async move {
        let cell = ctx.memo_cell(&unit.digest);
        let built = cell
            .get_or_try_init(|| run_pipeline(Arc::clone(&ctx), Arc::clone(&unit)))
            .await?;
        ctx.set_state(&unit.name, UnitState::Built);
        Ok(Arc::clone(built))
    }
    .boxed()
}

async fn run_pipeline(ctx: Arc<BuildContext>, unit: Arc<LoadedUnit>) -> Result<Arc<ResourceSet>> {
    let name = unit.name.as_str();

    ctx.set_state(name, UnitState::BasesBuilding);
    let bases = build_bases(&ctx, &unit).await?;

    let _permit = ctx
        .permits()
        .acquire_owned()
        .await
        .map_err(|e| BuildError::TaskFailed {
            unit: name.to_string(),
            message: e.to_string(),
        })?;

    ctx.set_state(name, UnitState::LocalResourcesAssembling);
    let (mut resources, base_ids) = assemble(name, &unit, bases)?;

    ctx.set_state(name, UnitState::Generating);
    apply_generators(name, &mut resources, &base_ids, &unit.generators)?;

    ctx.set_state(name, UnitState::Transforming);
    apply_transformers(name, &mut resources, &unit.kustomization)?;

    ctx.set_state(name, UnitState::Patching);
    apply_patches(name, &mut resources, &unit.patches)?;

    ctx.set_state(name, UnitState::Replacing);
    apply_replacements(name, &mut resources, &unit.replacements)?;

    ctx.record_build();
    tracing::debug!(unit = name, resources = resources.len(), "unit built");
    Ok(Arc::new(resources))
}

/// Build every base of `unit`, returning their outputs in declaration order
///
/// When several bases fail, the error of the first declared one wins.
async fn build_bases(ctx: &Arc<BuildContext>, unit: &LoadedUnit) -> Result<Vec<Arc<ResourceSet>>> {
    let mut tasks = JoinSet::new();
    let mut count = 0;
    for (index, base) in unit.bases().enumerate() {
        let ctx = Arc::clone(ctx);
        let base = Arc::clone(base);
        tasks.spawn(async move { (index, build_unit(ctx, base).await) });
        count += 1;
    }

    let mut outputs: Vec<Option<Arc<ResourceSet>>> = vec![None; count];
    let mut first_error: Option<(usize, BuildError)> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, Ok(resources))) => outputs[index] = Some(resources),
            Ok((index, Err(e))) => {
                if first_error.as_ref().is_none_or(|(first, _)| index < *first) {
                    first_error = Some((index, e));
                }
            }
            Err(e) => {
                return Err(BuildError::TaskFailed {
                    unit: unit.name.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    if let Some((_, e)) = first_error {
        return Err(e);
    }

    outputs
        .into_iter()
        .map(|output| {
            output.ok_or_else(|| BuildError::TaskFailed {
                unit: unit.name.clone(),
                message: "a base task finished without output".to_string(),
            })
        })
        .collect()
}

/// Merge base outputs and the unit's own resources in declaration order
///
/// A resource reached through two bases must be identical in both. A local
/// resource may not redeclare anything.
fn assemble(
    name: &str,
    unit: &LoadedUnit,
    bases: Vec<Arc<ResourceSet>>,
) -> Result<(ResourceSet, HashSet<ResId>)> {
    let mut resources = ResourceSet::new();
    let mut base_ids: HashSet<ResId> = HashSet::new();
    let mut bases = bases.into_iter();

    let conflict = |id: &ResId, message: String| BuildError::MergeConflict {
        unit: name.to_string(),
        resource: id.to_string(),
        message,
    };

    for entry in &unit.entries {
        match entry {
            UnitEntry::Base(base) => {
                let Some(output) = bases.next() else {
                    return Err(BuildError::TaskFailed {
                        unit: name.to_string(),
                        message: format!("no output for base {}", base.name),
                    });
                };
                for resource in output.iter() {
                    let id = resource.id();
                    match resources.get_mut(&id) {
                        None => {
                            resources.insert(resource.clone());
                        }
                        Some(existing) if base_ids.contains(&id) && existing.same_body(resource) => {
                            existing.inherit_history(resource);
                        }
                        Some(_) => {
                            return Err(conflict(
                                &id,
                                format!("base {} provides a different definition", base.name),
                            ));
                        }
                    }
                    base_ids.insert(id);
                }
            }
            UnitEntry::Resources { origin, resources: local } => {
                for resource in local {
                    let id = resource.id();
                    if resources.contains(&id) {
                        return Err(conflict(&id, format!("declared again in {}", origin)));
                    }
                    resources.insert(resource.clone());
                }
            }
        }
    }

    Ok((resources, base_ids))
}

// ============================================================================
// Finalization
// ============================================================================

/// Append content hashes to generated names, rewrite references to them and
/// sort the output
fn finalize(
    unit: &str,
    mut resources: ResourceSet,
) -> Result<(Vec<Resource>, Vec<GeneratedResourceRecord>)> {
    let mut renames = Vec::new();
    let mut generated = Vec::new();

    for resource in resources.iter_mut() {
        let Some(meta) = resource.generated().cloned() else {
            continue;
        };

        let suffix = meta.hash_suffix.then(|| hash::name_hash(resource.body()));
        if let Some(suffix) = &suffix {
            let old = resource.name().to_string();
            let new = format!("{}-{}", old, suffix);
            renames.push(Rename {
                gvk: resource.gvk(),
                namespace: resource.namespace().map(str::to_string),
                old,
                new: new.clone(),
            });
            resource.rename(new);
        }

        generated.push(GeneratedResourceRecord {
            kind: resource.kind().to_string(),
            name: resource.name().to_string(),
            generator: meta.generator,
            namespace: resource.namespace().map(str::to_string),
            content_digest: hash::data_digest(resource.body()),
            hash_suffix: suffix,
            immutable: meta.immutable,
        });
    }

    resources.reindex().map_err(|id| BuildError::MergeConflict {
        unit: unit.to_string(),
        resource: id.to_string(),
        message: "two resources share this identity after hash suffixing".to_string(),
    })?;
    rewrite_references(unit, &mut resources, &renames)?;

    generated.sort_by(|a, b| {
        (&a.kind, &a.namespace, &a.name).cmp(&(&b.kind, &b.namespace, &b.name))
    });
    Ok((resources.into_sorted(), generated))
}
