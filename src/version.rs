//! Semantic versions and versioned container image references
//!
//! Component versions come from two places: annotations on nodes and image
//! tags on workload pod templates. Image tags cannot contain `+`, so build
//! metadata is written with `_` (`v1.4.3_coreos.0`); both spellings parse to
//! the same [`Version`].

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Separator used in place of `+` for build metadata in image tags
const TAG_BUILD_SEPARATOR: char = '_';

/// A parsed semantic version
///
/// Ordering follows semver precedence (major, minor, patch, pre-release) with
/// build metadata as the final tie-breaker, so a rebuilt distribution release
/// (`_coreos.1` over `_coreos.0`) still counts as an upgrade.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Version {
    inner: semver::Version,
}

impl Version {
    /// Parse a version, accepting an optional leading `v` and `_` as the build
    /// metadata separator.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let normalized = trimmed
            .strip_prefix('v')
            .unwrap_or(trimmed)
            .replacen(TAG_BUILD_SEPARATOR, "+", 1);

        semver::Version::parse(&normalized)
            .map(|inner| Self { inner })
            .map_err(|e| Error::invalid_version(value, e.to_string()))
    }

    /// Render as an image tag: `+` becomes `_`, and the `v` prefix is kept only
    /// when requested.
    pub fn image_tag(&self, v_prefix: bool) -> String {
        let tag = self
            .inner
            .to_string()
            .replacen('+', &TAG_BUILD_SEPARATOR.to_string(), 1);
        if v_prefix {
            format!("v{tag}")
        } else {
            tag
        }
    }

    /// The underlying semver value
    pub fn semver(&self) -> &semver::Version {
        &self.inner
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.inner)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.inner.cmp(&other.inner)
    }
}

/// A container image reference split into repository and tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Registry and repository, e.g. `quay.io/coreos/hyperkube`
    pub repository: String,
    /// Tag, e.g. `v1.4.3_coreos.0`
    pub tag: String,
}

impl ImageRef {
    /// Split an image reference at its tag.
    ///
    /// Digest-pinned references and references without a tag carry no version
    /// and are rejected.
    pub fn parse(image: &str) -> Result<Self> {
        if image.contains('@') {
            return Err(Error::invalid_version(
                image,
                "image is pinned by digest and carries no version tag",
            ));
        }
        // A ':' before the last '/' belongs to a registry port, not a tag.
        let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
        match image[name_start..].rfind(':') {
            Some(offset) if name_start + offset + 1 < image.len() => {
                let split = name_start + offset;
                Ok(Self {
                    repository: image[..split].to_string(),
                    tag: image[split + 1..].to_string(),
                })
            }
            _ => Err(Error::invalid_version(image, "image has no tag")),
        }
    }

    /// The version encoded in the tag
    pub fn version(&self) -> Result<Version> {
        Version::parse(&self.tag)
    }

    /// Render this image retagged to `version`, keeping the tag's `v` style
    pub fn with_version(&self, version: &Version) -> String {
        let v_prefix = self.tag.starts_with('v');
        format!("{}:{}", self.repository, version.image_tag(v_prefix))
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn parses_plain_prefixed_and_tag_forms() {
        assert_eq!(v("1.4.3"), v("v1.4.3"));
        assert_eq!(v("v1.4.3_coreos.0"), v("1.4.3+coreos.0"));
        assert_eq!(v(" v1.2.0 "), v("1.2.0"));
    }

    #[test]
    fn rejects_malformed_versions() {
        for bad in ["", "v", "1.2", "latest", "1.2.x", "v1.2.3.4"] {
            let err = Version::parse(bad).unwrap_err();
            assert!(
                matches!(err, Error::InvalidVersion { ref value, .. } if value == bad),
                "expected InvalidVersion for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn orders_by_semver_precedence() {
        assert!(v("1.3.0") > v("1.2.0"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.3.0-alpha.1") < v("1.3.0"));
        assert!(v("1.3.0-alpha.1") < v("1.3.0-beta.0"));
        assert!(v("1.3.0") >= v("1.3.0"));
    }

    #[test]
    fn build_metadata_breaks_ties() {
        assert!(v("v1.4.3_coreos.1") > v("v1.4.3_coreos.0"));
        assert_ne!(v("v1.4.3_coreos.0"), v("v1.4.3"));
    }

    #[test]
    fn display_and_image_tag() {
        let version = v("1.4.3+coreos.0");
        assert_eq!(version.to_string(), "v1.4.3+coreos.0");
        assert_eq!(version.image_tag(true), "v1.4.3_coreos.0");
        assert_eq!(version.image_tag(false), "1.4.3_coreos.0");
    }

    #[test]
    fn image_ref_splits_repository_and_tag() {
        let image = ImageRef::parse("quay.io/coreos/hyperkube:v1.4.3_coreos.0").unwrap();
        assert_eq!(image.repository, "quay.io/coreos/hyperkube");
        assert_eq!(image.tag, "v1.4.3_coreos.0");
        assert_eq!(image.version().unwrap(), v("1.4.3+coreos.0"));
    }

    #[test]
    fn image_ref_ignores_registry_port() {
        let image = ImageRef::parse("registry.local:5000/kube-proxy:1.2.0").unwrap();
        assert_eq!(image.repository, "registry.local:5000/kube-proxy");
        assert_eq!(image.tag, "1.2.0");

        assert!(ImageRef::parse("registry.local:5000/kube-proxy").is_err());
    }

    #[test]
    fn image_ref_rejects_untagged_and_digest_images() {
        assert!(ImageRef::parse("hyperkube").is_err());
        assert!(ImageRef::parse("hyperkube:").is_err());
        assert!(ImageRef::parse("hyperkube@sha256:abcdef").is_err());
    }

    #[test]
    fn retagging_preserves_v_style() {
        let target = v("1.5.0+coreos.0");

        let prefixed = ImageRef::parse("quay.io/coreos/hyperkube:v1.4.3_coreos.0").unwrap();
        assert_eq!(
            prefixed.with_version(&target),
            "quay.io/coreos/hyperkube:v1.5.0_coreos.0"
        );

        let bare = ImageRef::parse("quay.io/coreos/hyperkube:1.4.3").unwrap();
        assert_eq!(
            bare.with_version(&target),
            "quay.io/coreos/hyperkube:1.5.0_coreos.0"
        );
    }
}
