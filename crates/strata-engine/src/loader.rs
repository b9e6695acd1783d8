//! Unit loading
//!
//! The loader turns a unit directory into a tree of [`LoadedUnit`]s. Every
//! file a unit needs is read here (resources, generator sources, patch
//! bodies, replacement files, remote references), so building never touches
//! the filesystem or the network.
//!
//! Base references are resolved depth-first with an explicit stack. A unit
//! that is reached again while it is still being visited closes a cycle and
//! fails the load; a unit reached again after it finished is shared.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use futures::future::try_join_all;
use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use strata_core::{
    GeneratorArgs, GeneratorOptions, Kustomization, Replacement, ReplacementEntry, Resource,
    find_unit_file,
};
use strata_repo::{FetchedRemote, RemoteContent, RemoteRef, is_remote};

use crate::context::{BuildContext, UnitState};
use crate::error::{BuildError, Result};
use crate::generators::{GeneratorInput, GeneratorKind};
use crate::patch::{Patch, PatchDecl, json6902};

/// Which files a unit may read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadRestrictor {
    /// Only files inside the unit's own directory
    #[default]
    RootOnly,
    /// Any file
    None,
}

impl FromStr for LoadRestrictor {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "root-only" | "LoadRestrictionsRootOnly" => Ok(LoadRestrictor::RootOnly),
            "none" | "LoadRestrictionsNone" => Ok(LoadRestrictor::None),
            other => Err(format!(
                "unknown load restrictor '{}' (expected 'root-only' or 'none')",
                other
            )),
        }
    }
}

impl fmt::Display for LoadRestrictor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadRestrictor::RootOnly => write!(f, "root-only"),
            LoadRestrictor::None => write!(f, "none"),
        }
    }
}

/// A unit with everything it declares already read
#[derive(Debug)]
pub struct LoadedUnit {
    pub dir: PathBuf,
    /// Directory path, or the remote reference it was fetched from
    pub name: String,
    /// `sha256:<hex>` over the unit file, every file it read and its bases
    pub digest: String,
    pub kustomization: Kustomization,
    /// Resource files and bases, in declaration order
    pub entries: Vec<UnitEntry>,
    pub generators: Vec<GeneratorInput>,
    pub patches: Vec<PatchDecl>,
    pub replacements: Vec<Replacement>,
}

impl LoadedUnit {
    pub fn bases(&self) -> impl Iterator<Item = &Arc<LoadedUnit>> {
        self.entries.iter().filter_map(|entry| match entry {
            UnitEntry::Base(base) => Some(base),
            UnitEntry::Resources { .. } => None,
        })
    }
}

/// One entry of `resources` (or `bases`)
#[derive(Debug)]
pub enum UnitEntry {
    Resources {
        origin: String,
        resources: Vec<Resource>,
    },
    Base(Arc<LoadedUnit>),
}

// ============================================================================
// Loader
// ============================================================================

pub struct Loader<'a> {
    ctx: &'a BuildContext,
    restrictor: LoadRestrictor,
}

enum Frame {
    Enter { dir: PathBuf, name: String },
    Exit { dir: PathBuf },
}

struct PendingUnit {
    dir: PathBuf,
    name: String,
    hasher: Sha256,
    kustomization: Kustomization,
    entries: Vec<PendingEntry>,
    generators: Vec<GeneratorInput>,
    patches: Vec<PatchDecl>,
    replacements: Vec<Replacement>,
}

enum PendingEntry {
    Resources {
        origin: String,
        resources: Vec<Resource>,
    },
    Base {
        dir: PathBuf,
        name: String,
    },
}

impl<'a> Loader<'a> {
    pub fn new(ctx: &'a BuildContext, restrictor: LoadRestrictor) -> Self {
        Self { ctx, restrictor }
    }

    /// Load the unit at `root` and, transitively, all of its bases
    pub async fn load(&self, root: &Path) -> Result<Arc<LoadedUnit>> {
        let root_name = root.display().to_string();
        let root_dir = tokio::fs::canonicalize(root)
            .await
            .map_err(|e| BuildError::load(&root_name, format!("cannot open unit: {}", e)))?;
        let root_name = root_dir.display().to_string();

        let mut stack = vec![Frame::Enter {
            dir: root_dir.clone(),
            name: root_name.clone(),
        }];
        let mut visiting: HashSet<PathBuf> = HashSet::new();
        let mut path: Vec<String> = Vec::new();
        let mut pending: HashMap<PathBuf, PendingUnit> = HashMap::new();
        let mut done: HashMap<PathBuf, Arc<LoadedUnit>> = HashMap::new();

        self.ctx.set_state(&root_name, UnitState::Unresolved);

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter { dir, name } => {
                    if done.contains_key(&dir) {
                        continue;
                    }
                    if visiting.contains(&dir) {
                        let start = path.iter().position(|n| *n == name).unwrap_or(0);
                        let mut chain: Vec<&str> = path[start..].iter().map(String::as_str).collect();
                        chain.push(&name);
                        return Err(BuildError::ReferenceCycle {
                            unit: path.last().cloned().unwrap_or_else(|| name.clone()),
                            chain: chain.join(" -> "),
                        });
                    }

                    self.ctx.set_state(&name, UnitState::Loading);
                    let unit = self.read_unit(&dir, &name).await?;

                    visiting.insert(dir.clone());
                    path.push(name);
                    stack.push(Frame::Exit { dir: dir.clone() });
                    for entry in unit.entries.iter().rev() {
                        if let PendingEntry::Base { dir, name } = entry {
                            if !done.contains_key(dir) && !visiting.contains(dir) {
                                self.ctx.set_state(name, UnitState::Unresolved);
                            }
                            stack.push(Frame::Enter {
                                dir: dir.clone(),
                                name: name.clone(),
                            });
                        }
                    }
                    pending.insert(dir, unit);
                }
                Frame::Exit { dir } => {
                    visiting.remove(&dir);
                    path.pop();
                    let unit = pending
                        .remove(&dir)
                        .ok_or_else(|| BuildError::load(&root_name, "unit finished twice"))?;
                    let loaded = finish(unit, &done)?;
                    tracing::debug!(unit = %loaded.name, digest = %loaded.digest, "unit loaded");
                    done.insert(dir, Arc::new(loaded));
                }
            }
        }

        done.remove(&root_dir)
            .ok_or_else(|| BuildError::load(&root_name, "root unit was not loaded"))
    }

    async fn read_unit(&self, dir: &Path, name: &str) -> Result<PendingUnit> {
        let unit_file = find_unit_file(dir).map_err(|e| BuildError::load(name, e.to_string()))?;
        let text = tokio::fs::read_to_string(&unit_file)
            .await
            .map_err(|e| BuildError::load(name, format!("{}: {}", unit_file.display(), e)))?;
        let kustomization =
            Kustomization::from_yaml(&text, &unit_file).map_err(|e| BuildError::load(name, e.to_string()))?;

        let mut reader = UnitReader {
            dir,
            name,
            restrictor: self.restrictor,
            hasher: Sha256::new(),
        };
        reader.hasher.update(text.as_bytes());

        let entries = self.read_entries(&mut reader, &kustomization).await?;

        let mut generators = Vec::new();
        for (kind, list) in [
            (GeneratorKind::ConfigMap, &kustomization.config_map_generator),
            (GeneratorKind::Secret, &kustomization.secret_generator),
        ] {
            for args in list {
                generators.push(
                    read_generator(&mut reader, kind, args, kustomization.generator_options.as_ref())
                        .await?,
                );
            }
        }

        let patches = read_patches(&mut reader, &kustomization).await?;
        let replacements = read_replacements(&mut reader, &kustomization).await?;

        Ok(PendingUnit {
            dir: dir.to_path_buf(),
            name: name.to_string(),
            hasher: reader.hasher,
            kustomization,
            entries,
            generators,
            patches,
            replacements,
        })
    }

    async fn read_entries(
        &self,
        reader: &mut UnitReader<'_>,
        kustomization: &Kustomization,
    ) -> Result<Vec<PendingEntry>> {
        let references: Vec<&str> = kustomization.resource_refs().collect();

        let remotes = references
            .iter()
            .filter(|r| is_remote(r))
            .map(|r| self.fetch_remote(reader.name, r));
        let mut fetched = try_join_all(remotes).await?.into_iter();

        let mut entries = Vec::new();
        for reference in references {
            reader.hasher.update(reference.as_bytes());

            if is_remote(reference) {
                let Some(remote) = fetched.next() else {
                    return Err(BuildError::load(reader.name, format!("{} was not fetched", reference)));
                };
                reader.hasher.update(remote.digest.as_bytes());
                entries.push(self.remote_entry(reader.name, reference, remote).await?);
                continue;
            }

            let path = reader.dir.join(reference);
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_dir() => {
                    let dir = tokio::fs::canonicalize(&path)
                        .await
                        .map_err(|e| BuildError::load(reader.name, format!("{}: {}", reference, e)))?;
                    entries.push(PendingEntry::Base {
                        name: dir.display().to_string(),
                        dir,
                    });
                }
                Ok(_) => {
                    let text = reader.read_text(reference).await?;
                    let resources = Resource::from_yaml_documents(&text, reference)
                        .map_err(|e| BuildError::load(reader.name, e.to_string()))?;
                    entries.push(PendingEntry::Resources {
                        origin: reference.to_string(),
                        resources,
                    });
                }
                Err(_) => {
                    return Err(BuildError::load(
                        reader.name,
                        format!("resource '{}' not found", reference),
                    ));
                }
            }
        }
        Ok(entries)
    }

    async fn fetch_remote(&self, unit: &str, reference: &str) -> Result<FetchedRemote> {
        let remote = RemoteRef::parse(reference).map_err(|e| BuildError::remote(unit, reference, e))?;
        tracing::debug!(unit, reference, "fetching remote");
        self.ctx
            .cache()
            .fetch(&remote)
            .await
            .map_err(|e| BuildError::remote(unit, reference, e))
    }

    async fn remote_entry(&self, unit: &str, reference: &str, remote: FetchedRemote) -> Result<PendingEntry> {
        match remote.content {
            RemoteContent::File(path) => {
                let text = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| BuildError::load(unit, format!("{}: {}", reference, e)))?;
                let resources = Resource::from_yaml_documents(&text, reference)
                    .map_err(|e| BuildError::load(unit, e.to_string()))?;
                Ok(PendingEntry::Resources {
                    origin: reference.to_string(),
                    resources,
                })
            }
            RemoteContent::Directory(path) => {
                let dir = tokio::fs::canonicalize(&path)
                    .await
                    .map_err(|e| BuildError::load(unit, format!("{}: {}", reference, e)))?;
                Ok(PendingEntry::Base {
                    dir,
                    name: reference.to_string(),
                })
            }
        }
    }
}

fn finish(unit: PendingUnit, done: &HashMap<PathBuf, Arc<LoadedUnit>>) -> Result<LoadedUnit> {
    let PendingUnit {
        dir,
        name,
        mut hasher,
        kustomization,
        entries,
        generators,
        patches,
        replacements,
    } = unit;

    let entries = entries
        .into_iter()
        .map(|entry| match entry {
            PendingEntry::Resources { origin, resources } => Ok(UnitEntry::Resources { origin, resources }),
            PendingEntry::Base { dir: base_dir, name: base_name } => {
                let base = done
                    .get(&base_dir)
                    .cloned()
                    .ok_or_else(|| BuildError::load(&name, format!("base {} was not loaded", base_name)))?;
                hasher.update(base.digest.as_bytes());
                Ok(UnitEntry::Base(base))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LoadedUnit {
        dir,
        digest: format!("sha256:{}", hex::encode(hasher.finalize())),
        name,
        kustomization,
        entries,
        generators,
        patches,
        replacements,
    })
}

// ============================================================================
// File access
// ============================================================================

/// Reads files on behalf of one unit, enforcing the restrictor and feeding
/// every byte into the unit digest
struct UnitReader<'a> {
    dir: &'a Path,
    name: &'a str,
    restrictor: LoadRestrictor,
    hasher: Sha256,
}

impl UnitReader<'_> {
    async fn read(&mut self, reference: &str) -> Result<Vec<u8>> {
        let path = tokio::fs::canonicalize(self.dir.join(reference))
            .await
            .map_err(|_| BuildError::load(self.name, format!("file '{}' not found", reference)))?;

        if self.restrictor == LoadRestrictor::RootOnly && !path.starts_with(self.dir) {
            return Err(BuildError::load(
                self.name,
                format!(
                    "'{}' is outside the unit root {} (use --load-restrictor none to allow it)",
                    reference,
                    self.dir.display()
                ),
            ));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| BuildError::load(self.name, format!("{}: {}", reference, e)))?;
        self.hasher.update(reference.as_bytes());
        self.hasher.update(&bytes);
        Ok(bytes)
    }

    async fn read_text(&mut self, reference: &str) -> Result<String> {
        let bytes = self.read(reference).await?;
        String::from_utf8(bytes)
            .map_err(|_| BuildError::load(self.name, format!("'{}' is not valid UTF-8", reference)))
    }

    fn error(&self, message: impl Into<String>) -> BuildError {
        BuildError::load(self.name, message)
    }
}

// ============================================================================
// Generators
// ============================================================================

static DATA_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-._a-zA-Z0-9]+$").unwrap_or_else(|_| unreachable!("literal pattern"))
});

async fn read_generator(
    reader: &mut UnitReader<'_>,
    kind: GeneratorKind,
    args: &GeneratorArgs,
    unit_options: Option<&GeneratorOptions>,
) -> Result<GeneratorInput> {
    if args.name.trim().is_empty() {
        return Err(reader.error(format!("{} generator without a name", kind.as_str())));
    }
    let context = |message: String| format!("generator '{}': {}", args.name, message);

    let mut data: IndexMap<String, Vec<u8>> = IndexMap::new();

    for source in &args.files {
        let (key, path) = match source.split_once('=') {
            Some((key, path)) => (key.to_string(), path),
            None => {
                let key = Path::new(source)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                (key, source.as_str())
            }
        };
        check_key(&key).map_err(|e| reader.error(context(e)))?;
        let bytes = reader.read(path).await?;
        data.insert(key, bytes);
    }

    for literal in &args.literals {
        let (key, value) = parse_literal(literal).map_err(|e| reader.error(context(e)))?;
        data.insert(key, value.into_bytes());
    }

    for path in args.env_files() {
        let text = reader.read_text(path).await?;
        let pairs = parse_env_file(&text).map_err(|e| reader.error(context(format!("{}: {}", path, e))))?;
        for (key, value) in pairs {
            data.insert(key, value.into_bytes());
        }
    }

    Ok(GeneratorInput {
        kind,
        name: args.name.clone(),
        namespace: args.namespace.clone(),
        behavior: args.behavior,
        secret_type: args.secret_type.clone(),
        options: GeneratorOptions::merged(unit_options, args.options.as_ref()),
        data,
    })
}

fn check_key(key: &str) -> std::result::Result<(), String> {
    if DATA_KEY.is_match(key) {
        Ok(())
    } else {
        Err(format!("invalid data key '{}'", key))
    }
}

/// `KEY=VALUE`, with one pair of matching quotes stripped from the value
fn parse_literal(literal: &str) -> std::result::Result<(String, String), String> {
    let Some((key, value)) = literal.split_once('=') else {
        return Err(format!("literal '{}' is not KEY=VALUE", literal));
    };
    let key = key.trim();
    check_key(key)?;
    Ok((key.to_string(), unquote(value).to_string()))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Parse an env file: `KEY=VALUE` per line, blank lines and `#` comments
/// skipped
fn parse_env_file(text: &str) -> std::result::Result<Vec<(String, String)>, String> {
    let mut pairs = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("line {}: '{}' has no value", number + 1, line.trim_end()));
        };
        let key = key.trim();
        check_key(key).map_err(|e| format!("line {}: {}", number + 1, e))?;
        pairs.push((key.to_string(), value.trim_end_matches('\r').to_string()));
    }
    Ok(pairs)
}

// ============================================================================
// Patches and replacements
// ============================================================================

fn parse_documents(text: &str) -> std::result::Result<Vec<JsonValue>, String> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = JsonValue::deserialize(document).map_err(|e| e.to_string())?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Body of a patch given either as a file or inline
async fn patch_body(
    reader: &mut UnitReader<'_>,
    path: Option<&str>,
    inline: Option<&str>,
    next_inline: &mut impl FnMut() -> String,
) -> Result<(String, String)> {
    match (path, inline) {
        (Some(path), None) => Ok((reader.read_text(path).await?, path.to_string())),
        (None, Some(inline)) => Ok((inline.to_string(), next_inline())),
        (Some(path), Some(_)) => Err(reader.error(format!("patch '{}' also sets an inline patch", path))),
        (None, None) => Err(reader.error("a patch entry sets neither path nor patch")),
    }
}

async fn read_patches(reader: &mut UnitReader<'_>, kustomization: &Kustomization) -> Result<Vec<PatchDecl>> {
    let mut patches = Vec::new();
    let mut inline_count = 0;
    let mut next_inline = || {
        inline_count += 1;
        format!("inline patch #{}", inline_count)
    };

    for entry in &kustomization.patches_strategic_merge {
        let (text, origin) = if entry.contains('\n') {
            (entry.clone(), next_inline())
        } else {
            (reader.read_text(entry).await?, entry.clone())
        };
        let documents = parse_documents(&text).map_err(|e| reader.error(format!("{}: {}", origin, e)))?;
        for document in documents {
            patches.push(PatchDecl {
                origin: origin.clone(),
                patch: Patch::StrategicMerge(document),
                target: None,
                allow_name_change: false,
            });
        }
    }

    for entry in &kustomization.patches_json6902 {
        let (text, origin) =
            patch_body(reader, entry.path.as_deref(), entry.patch.as_deref(), &mut next_inline).await?;
        let documents = parse_documents(&text).map_err(|e| reader.error(format!("{}: {}", origin, e)))?;
        let operations = match documents.as_slice() {
            [document @ JsonValue::Array(_)] => json6902::parse_operations(document),
            _ => Err("a JSON patch must be a single list of operations".to_string()),
        }
        .map_err(|e| reader.error(format!("{}: {}", origin, e)))?;
        patches.push(PatchDecl {
            origin,
            patch: Patch::JsonPatch(operations),
            target: Some(entry.target.clone()),
            allow_name_change: false,
        });
    }

    for entry in &kustomization.patches {
        let (text, origin) =
            patch_body(reader, entry.path.as_deref(), entry.patch.as_deref(), &mut next_inline).await?;
        let documents = parse_documents(&text).map_err(|e| reader.error(format!("{}: {}", origin, e)))?;
        let allow_name_change = entry.options.as_ref().is_some_and(|o| o.allow_name_change);

        if let [document @ JsonValue::Array(_)] = documents.as_slice() {
            let operations =
                json6902::parse_operations(document).map_err(|e| reader.error(format!("{}: {}", origin, e)))?;
            patches.push(PatchDecl {
                origin,
                patch: Patch::JsonPatch(operations),
                target: entry.target.clone(),
                allow_name_change,
            });
            continue;
        }

        for document in documents {
            if !document.is_object() {
                return Err(reader.error(format!(
                    "{}: a patch must be a mapping (strategic merge) or a list (JSON patch)",
                    origin
                )));
            }
            patches.push(PatchDecl {
                origin: origin.clone(),
                patch: Patch::StrategicMerge(document),
                target: entry.target.clone(),
                allow_name_change,
            });
        }
    }

    Ok(patches)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ReplacementFile {
    Many(Vec<Replacement>),
    One(Replacement),
}

async fn read_replacements(
    reader: &mut UnitReader<'_>,
    kustomization: &Kustomization,
) -> Result<Vec<Replacement>> {
    let mut replacements = Vec::new();
    for entry in &kustomization.replacements {
        match entry {
            ReplacementEntry::Inline(replacement) => replacements.push(replacement.clone()),
            ReplacementEntry::File { path } => {
                let text = reader.read_text(path).await?;
                let file: ReplacementFile = serde_yaml::from_str(&text)
                    .map_err(|e| reader.error(format!("{}: {}", path, e)))?;
                match file {
                    ReplacementFile::Many(list) => replacements.extend(list),
                    ReplacementFile::One(one) => replacements.push(one),
                }
            }
        }
    }
    Ok(replacements)
}
