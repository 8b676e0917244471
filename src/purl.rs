//! Canonical package URL (purl) construction.
//!
//! No `packageurl`-equivalent crate is available in the dependency stack
//! this crate draws from, so purls are built by hand: percent-encode
//! qualifier values and join them in a fixed, sorted order so that purl
//! strings for a given component are always byte-identical across runs.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Characters a purl qualifier value must not contain unescaped.
const QUALIFIER_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/')
    .remove(b':');

#[derive(Clone, Debug, Default)]
pub struct PurlBuilder {
    r#type: String,
    namespace: Option<String>,
    name: String,
    version: Option<String>,
    qualifiers: Vec<(String, String)>,
    subpath: Option<String>,
}

impl PurlBuilder {
    pub fn new(r#type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn maybe_version(mut self, version: Option<impl Into<String>>) -> Self {
        self.version = version.map(Into::into);
        self
    }

    /// Add a qualifier. Qualifiers are re-sorted by key at build time so
    /// insertion order never affects the resulting string.
    pub fn qualifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.qualifiers.push((key.into(), value.into()));
        self
    }

    pub fn maybe_qualifier(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.qualifier(key, v),
            None => self,
        }
    }

    pub fn subpath(mut self, subpath: impl Into<String>) -> Self {
        self.subpath = Some(subpath.into());
        self
    }

    pub fn build(mut self) -> String {
        let mut purl = format!("pkg:{}/", percent_path_segment(&self.r#type));
        if let Some(ns) = &self.namespace {
            for segment in ns.split('/').filter(|s| !s.is_empty()) {
                purl.push_str(&percent_path_segment(segment));
                purl.push('/');
            }
        }
        purl.push_str(&percent_path_segment(&self.name));

        if let Some(version) = &self.version {
            purl.push('@');
            purl.push_str(&percent_path_segment(version));
        }

        self.qualifiers.sort_by(|a, b| a.0.cmp(&b.0));
        self.qualifiers.dedup_by(|a, b| a.0 == b.0);
        if !self.qualifiers.is_empty() {
            purl.push('?');
            let rendered: Vec<String> = self
                .qualifiers
                .iter()
                .map(|(k, v)| format!("{k}={}", utf8_percent_encode(v, QUALIFIER_VALUE)))
                .collect();
            purl.push_str(&rendered.join("&"));
        }

        if let Some(subpath) = &self.subpath {
            purl.push('#');
            purl.push_str(subpath.trim_matches('/'));
        }

        purl
    }
}

fn percent_path_segment(segment: &str) -> String {
    utf8_percent_encode(segment, QUALIFIER_VALUE).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_simple_npm_purl() {
        let purl = PurlBuilder::new("npm", "bar").version("2.0.0").build();
        assert_eq!(purl, "pkg:npm/bar@2.0.0");
    }

    #[test]
    fn qualifiers_are_sorted_regardless_of_insertion_order() {
        let a = PurlBuilder::new("golang", "golang.org/x/net")
            .version("v0.0.0")
            .qualifier("type", "module")
            .qualifier("vcs_url", "git+https://example.com@abc")
            .build();
        let b = PurlBuilder::new("golang", "golang.org/x/net")
            .version("v0.0.0")
            .qualifier("vcs_url", "git+https://example.com@abc")
            .qualifier("type", "module")
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn qualifier_values_are_percent_encoded() {
        let purl = PurlBuilder::new("pypi", "bar")
            .version("1.0")
            .qualifier("download_url", "https://h.example/bar.tar.gz?x=1")
            .build();
        assert!(purl.contains("download_url=https%3A//h.example/bar.tar.gz%3Fx%3D1"));
    }

    #[test]
    fn subpath_is_appended_as_fragment() {
        let purl = PurlBuilder::new("generic", "my-repo")
            .subpath("packages/sub")
            .build();
        assert_eq!(purl, "pkg:generic/my-repo#packages/sub");
    }
}
