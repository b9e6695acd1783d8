//! Container image references

use std::fmt;

/// `[registry/]repository[:tag][@digest]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Everything before the tag and digest, registry included
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(image: &str) -> Self {
        let (rest, digest) = match image.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (image, None),
        };

        // A colon before the last slash belongs to a registry port
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };

        Self {
            name: name.to_string(),
            tag,
            digest,
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let image = ImageReference::parse("nginx");
        assert_eq!(image.name, "nginx");
        assert_eq!(image.tag, None);
        assert_eq!(image.digest, None);
    }

    #[test]
    fn test_parse_registry_port() {
        let image = ImageReference::parse("registry.local:5000/team/app:1.4@sha256:abcd");
        assert_eq!(image.name, "registry.local:5000/team/app");
        assert_eq!(image.tag.as_deref(), Some("1.4"));
        assert_eq!(image.digest.as_deref(), Some("sha256:abcd"));
        assert_eq!(image.to_string(), "registry.local:5000/team/app:1.4@sha256:abcd");

        let untagged = ImageReference::parse("registry.local:5000/app");
        assert_eq!(untagged.name, "registry.local:5000/app");
        assert_eq!(untagged.tag, None);
    }
}
