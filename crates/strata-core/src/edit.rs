//! In-place edits of a unit file
//!
//! Edits work on the raw YAML mapping rather than [`Kustomization`] so that
//! fields are written back in their original order and unknown content
//! survives untouched.
//!
//! [`Kustomization`]: crate::kustomization::Kustomization

use serde_yaml::{Mapping, Value as YamlValue};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{CoreError, Result};
use crate::image::ImageReference;
use crate::kustomization::{Kustomization, find_unit_file};

/// `<name>=<newName>[:tag][@digest]`, or `<name>[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEdit {
    pub name: String,
    pub new_name: Option<String>,
    pub new_tag: Option<String>,
    pub digest: Option<String>,
}

impl FromStr for ImageEdit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: &str| CoreError::InvalidArgument {
            arg: s.to_string(),
            message: message.to_string(),
        };

        let (name, image) = match s.split_once('=') {
            Some((name, image)) => {
                let image = ImageReference::parse(image);
                (name.to_string(), image)
            }
            None => {
                let image = ImageReference::parse(s);
                (image.name.clone(), image)
            }
        };

        if name.is_empty() {
            return Err(invalid("image name is empty"));
        }
        if image.name.is_empty() && image.tag.is_none() && image.digest.is_none() {
            return Err(invalid("nothing to set"));
        }
        if image.tag.as_deref() == Some("") || image.digest.as_deref() == Some("") {
            return Err(invalid("empty tag or digest"));
        }

        let new_name = Some(image.name).filter(|n| !n.is_empty() && *n != name);
        Ok(Self {
            name,
            new_name,
            new_tag: image.tag,
            digest: image.digest,
        })
    }
}

/// Parse `<name>=<count>`
pub fn parse_replicas_arg(arg: &str) -> Result<(String, i64)> {
    let invalid = |message: &str| CoreError::InvalidArgument {
        arg: arg.to_string(),
        message: message.to_string(),
    };

    let (name, count) = arg
        .split_once('=')
        .ok_or_else(|| invalid("expected <name>=<count>"))?;
    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    let count: i64 = count
        .trim()
        .parse()
        .map_err(|_| invalid("count is not an integer"))?;
    if count < 0 {
        return Err(invalid("count must not be negative"));
    }
    Ok((name.to_string(), count))
}

/// A unit file opened for editing
#[derive(Debug)]
pub struct UnitFile {
    path: PathBuf,
    document: YamlValue,
}

impl UnitFile {
    /// Open the unit file in `dir`
    pub fn open(dir: &Path) -> Result<Self> {
        let path = find_unit_file(dir)?;
        let text = std::fs::read_to_string(&path)?;

        // Reject files the build would reject before touching them
        Kustomization::from_yaml(&text, &path)?;

        let document = if text.trim().is_empty() {
            YamlValue::Mapping(Mapping::new())
        } else {
            serde_yaml::from_str(&text)?
        };
        if !document.is_mapping() {
            return Err(CoreError::InvalidUnit {
                path: path.display().to_string(),
                message: "unit file is not a mapping".to_string(),
            });
        }

        Ok(Self { path, document })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add or update an `images` entry
    pub fn set_image(&mut self, edit: &ImageEdit) -> Result<()> {
        let entry = self.list_entry("images", &edit.name)?;

        match &edit.new_name {
            Some(new_name) => set_field(entry, "newName", new_name.as_str().into()),
            None => remove_field(entry, "newName"),
        }
        let digest_key = digest_key(entry);
        match (&edit.new_tag, &edit.digest) {
            (Some(tag), digest) => {
                set_field(entry, "newTag", tag.as_str().into());
                match digest {
                    Some(digest) => set_field(entry, digest_key, digest.as_str().into()),
                    None => remove_field(entry, digest_key),
                }
            }
            (None, Some(digest)) => {
                remove_field(entry, "newTag");
                set_field(entry, digest_key, digest.as_str().into());
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Add or update a `replicas` entry
    pub fn set_replicas(&mut self, name: &str, count: i64) -> Result<()> {
        let entry = self.list_entry("replicas", name)?;
        set_field(entry, "count", YamlValue::Number(count.into()));
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.document)?)
    }

    pub fn save(&self) -> Result<()> {
        std::fs::write(&self.path, self.to_yaml()?)?;
        Ok(())
    }

    /// The mapping in list `field` whose `name` is `name`, appended if absent
    fn list_entry(&mut self, field: &str, name: &str) -> Result<&mut Mapping> {
        let path = self.path.display().to_string();
        let type_error = |what: &str| CoreError::TypeMismatch {
            path: format!("{} ({})", field, path),
            expected: what.to_string(),
        };

        let root = self
            .document
            .as_mapping_mut()
            .ok_or_else(|| type_error("a mapping"))?;
        let list = root
            .entry(field.into())
            .or_insert_with(|| YamlValue::Sequence(Vec::new()));
        if list.is_null() {
            *list = YamlValue::Sequence(Vec::new());
        }
        let items = list
            .as_sequence_mut()
            .ok_or_else(|| type_error("a sequence"))?;

        let position = items
            .iter()
            .position(|item| item.get("name").and_then(YamlValue::as_str) == Some(name));
        let position = match position {
            Some(position) => position,
            None => {
                let mut entry = Mapping::new();
                entry.insert("name".into(), name.into());
                items.push(YamlValue::Mapping(entry));
                items.len() - 1
            }
        };

        items[position]
            .as_mapping_mut()
            .ok_or_else(|| type_error("a sequence of mappings"))
    }
}

fn set_field(entry: &mut Mapping, key: &str, value: YamlValue) {
    entry.insert(key.into(), value);
}

fn remove_field(entry: &mut Mapping, key: &str) {
    entry.shift_remove(key);
}

/// Keep whichever digest spelling the entry already uses
fn digest_key(entry: &Mapping) -> &'static str {
    if entry.contains_key("newDigest") {
        "newDigest"
    } else {
        "digest"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn unit(content: &str) -> (TempDir, UnitFile) {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kustomization.yaml"), content).unwrap();
        let file = UnitFile::open(dir.path()).unwrap();
        (dir, file)
    }

    #[test]
    fn test_parse_image_edit() {
        let edit: ImageEdit = "nginx=registry.local/nginx:1.25@sha256:abc".parse().unwrap();
        assert_eq!(edit.name, "nginx");
        assert_eq!(edit.new_name.as_deref(), Some("registry.local/nginx"));
        assert_eq!(edit.new_tag.as_deref(), Some("1.25"));
        assert_eq!(edit.digest.as_deref(), Some("sha256:abc"));

        let same: ImageEdit = "nginx=nginx:1.26".parse().unwrap();
        assert_eq!(same.new_name, None);
        assert_eq!(same.new_tag.as_deref(), Some("1.26"));

        let bare: ImageEdit = "nginx:1.27".parse().unwrap();
        assert_eq!(bare.name, "nginx");
        assert_eq!(bare.new_tag.as_deref(), Some("1.27"));

        assert!("=nginx:1".parse::<ImageEdit>().is_err());
        assert!("nginx=nginx:".parse::<ImageEdit>().is_err());
    }

    #[test]
    fn test_parse_replicas_arg() {
        assert_eq!(parse_replicas_arg("web=3").unwrap(), ("web".to_string(), 3));
        assert!(parse_replicas_arg("web").is_err());
        assert!(parse_replicas_arg("web=x").is_err());
        assert!(parse_replicas_arg("web=-1").is_err());
    }

    #[test]
    fn test_set_image_preserves_field_order() {
        let (_dir, mut file) = unit(
            "namePrefix: prod-\nimages:\n- name: nginx\n  newTag: \"1.0\"\nresources:\n- deploy.yaml\n",
        );
        file.set_image(&"nginx=nginx:1.25".parse().unwrap()).unwrap();
        file.set_image(&"redis@sha256:feed".parse().unwrap()).unwrap();

        insta::assert_snapshot!(file.to_yaml().unwrap(), @r#"
        namePrefix: prod-
        images:
        - name: nginx
          newTag: '1.25'
        - name: redis
          digest: sha256:feed
        resources:
        - deploy.yaml
        "#);
    }

    #[test]
    fn test_set_image_keeps_new_digest_spelling() {
        let (dir, mut file) = unit("images:\n- name: nginx\n  newDigest: sha256:aaa\n");
        file.set_image(&"nginx@sha256:bbb".parse().unwrap()).unwrap();
        file.save().unwrap();

        let (_, reloaded) = Kustomization::load(dir.path()).unwrap();
        assert_eq!(reloaded.images[0].digest.as_deref(), Some("sha256:bbb"));
        assert!(!file.to_yaml().unwrap().contains("\n  digest:"));
    }

    #[test]
    fn test_set_replicas_appends_list() {
        let (dir, mut file) = unit("resources:\n- deploy.yaml\n");
        file.set_replicas("web-app", 5).unwrap();
        file.set_replicas("web-app", 7).unwrap();
        file.save().unwrap();

        let (_, reloaded) = Kustomization::load(dir.path()).unwrap();
        assert_eq!(reloaded.resources, vec!["deploy.yaml"]);
        assert_eq!(reloaded.replicas.len(), 1);
        assert_eq!(reloaded.replicas[0].count, 7);
    }

    #[test]
    fn test_open_rejects_invalid_unit() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("kustomization.yaml"), "bogus: true\n").unwrap();
        assert!(UnitFile::open(dir.path()).is_err());
    }
}
