use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

const FOUND_BY: &str = "cachi2:found_by";
const MISSING_HASH_IN_FILE: &str = "cachi2:missing_hash:in_file";
const NPM_BUNDLED: &str = "cdx:npm:package:bundled";
const NPM_DEVELOPMENT: &str = "cdx:npm:package:development";
const PIP_BINARY: &str = "cachi2:pip:package:binary";
const BUNDLER_BINARY: &str = "cachi2:bundler:package:binary";

/// A single free-form `(name, value)` SBOM component property.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub value: String,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn found_by_hermeto() -> Self {
        Self::new(FOUND_BY, "cachi2")
    }
}

/// An external reference attached to a component (e.g. a distribution URL).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub url: String,
    #[serde(rename = "type")]
    pub ref_type: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentType {
    Library,
    File,
}

impl Default for ComponentType {
    fn default() -> Self {
        Self::Library
    }
}

/// A CycloneDX-1.4-compatible SBOM component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    pub name: String,
    pub purl: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(rename = "type", default)]
    pub component_type: ComponentType,
    #[serde(rename = "externalReferences", skip_serializing_if = "Option::is_none")]
    pub external_references: Option<Vec<ExternalReference>>,
}

impl Component {
    pub fn new(name: impl Into<String>, purl: impl Into<String>) -> Self {
        let mut component = Self {
            name: name.into(),
            purl: purl.into(),
            version: None,
            properties: Vec::new(),
            component_type: ComponentType::Library,
            external_references: None,
        };
        component.ensure_found_by();
        component
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_type(mut self, component_type: ComponentType) -> Self {
        self.component_type = component_type;
        self
    }

    pub fn with_property(mut self, property: Property) -> Self {
        self.properties.push(property);
        self
    }

    pub fn with_external_reference(mut self, url: impl Into<String>) -> Self {
        self.external_references
            .get_or_insert_with(Vec::new)
            .push(ExternalReference {
                url: url.into(),
                ref_type: "distribution".to_string(),
            });
        self
    }

    fn ensure_found_by(&mut self) {
        if !self.properties.iter().any(|p| p.name == FOUND_BY) {
            self.properties.push(Property::found_by_hermeto());
        }
    }

    /// Identity for merging and sorting purposes: the purl string, exactly.
    pub fn key(&self) -> &str {
        &self.purl
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tool {
    pub vendor: String,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Metadata {
    pub tools: Vec<Tool>,
}

impl Default for Metadata {
    fn default() -> Self {
        Self {
            tools: vec![Tool {
                vendor: "red hat".to_string(),
                name: "cachi2".to_string(),
            }],
        }
    }
}

/// Software bill of materials in CycloneDX 1.4 JSON form.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sbom {
    #[serde(rename = "bomFormat")]
    pub bom_format: String,
    #[serde(rename = "specVersion")]
    pub spec_version: String,
    pub version: u32,
    pub metadata: Metadata,
    pub components: Vec<Component>,
}

impl Default for Sbom {
    fn default() -> Self {
        Self {
            bom_format: "CycloneDX".to_string(),
            spec_version: "1.4".to_string(),
            version: 1,
            metadata: Metadata::default(),
            components: Vec::new(),
        }
    }
}

impl Sbom {
    pub fn from_components(components: Vec<Component>) -> Self {
        Self {
            components: merge_component_properties(components),
            ..Default::default()
        }
    }
}

/// The normalized semantic form of a component's `properties` list, used for
/// deterministic merging. See spec.md §4.8 for the merge laws.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PropertySet {
    pub found_by: Option<String>,
    pub missing_hash_in_file: BTreeSet<String>,
    pub npm_bundled: bool,
    pub npm_development: bool,
    pub pip_package_binary: bool,
    pub bundler_package_binary: bool,
}

impl PropertySet {
    pub fn from_properties(props: &[Property]) -> Self {
        let mut set = Self::default();
        for prop in props {
            match prop.name.as_str() {
                FOUND_BY => set.found_by = Some(prop.value.clone()),
                MISSING_HASH_IN_FILE => {
                    set.missing_hash_in_file.insert(prop.value.clone());
                }
                NPM_BUNDLED => set.npm_bundled = true,
                NPM_DEVELOPMENT => set.npm_development = true,
                PIP_BINARY => set.pip_package_binary = true,
                BUNDLER_BINARY => set.bundler_package_binary = true,
                _ => {
                    // Unknown properties pass through silently: a merge must
                    // never fail just because some component carries a
                    // property this vocabulary doesn't know about yet.
                }
            }
        }
        set
    }

    pub fn to_properties(&self) -> Vec<Property> {
        let mut props = Vec::new();
        if let Some(found_by) = &self.found_by {
            props.push(Property::new(FOUND_BY, found_by.clone()));
        }
        for file in &self.missing_hash_in_file {
            props.push(Property::new(MISSING_HASH_IN_FILE, file.clone()));
        }
        if self.npm_bundled {
            props.push(Property::new(NPM_BUNDLED, "true"));
        }
        if self.npm_development {
            props.push(Property::new(NPM_DEVELOPMENT, "true"));
        }
        if self.pip_package_binary {
            props.push(Property::new(PIP_BINARY, "true"));
        }
        if self.bundler_package_binary {
            props.push(Property::new(BUNDLER_BINARY, "true"));
        }
        props.sort_by(|a, b| (a.name.clone(), a.value.clone()).cmp(&(b.name.clone(), b.value.clone())));
        props
    }

    /// Commutative, idempotent, associative merge (spec.md §4.8, §8 property 4).
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            found_by: self.found_by.clone().or_else(|| other.found_by.clone()),
            missing_hash_in_file: self
                .missing_hash_in_file
                .union(&other.missing_hash_in_file)
                .cloned()
                .collect(),
            npm_bundled: self.npm_bundled && other.npm_bundled,
            npm_development: self.npm_development && other.npm_development,
            pip_package_binary: self.pip_package_binary || other.pip_package_binary,
            bundler_package_binary: self.bundler_package_binary || other.bundler_package_binary,
        }
    }
}

/// Sort and de-duplicate components by purl, merging their `properties`
/// for any group sharing a purl (spec.md §4.8 / §9.9).
pub fn merge_component_properties(components: Vec<Component>) -> Vec<Component> {
    let mut sorted = components;
    sorted.sort_by(|a, b| a.key().cmp(b.key()));

    let mut merged: Vec<Component> = Vec::with_capacity(sorted.len());
    for component in sorted {
        match merged.last_mut().filter(|last| last.key() == component.key()) {
            Some(last) => {
                let merged_set = PropertySet::from_properties(&last.properties)
                    .merge(&PropertySet::from_properties(&component.properties));
                last.properties = merged_set.to_properties();
            }
            None => merged.push(component),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(purl: &str, props: Vec<Property>) -> Component {
        let mut c = Component::new("x", purl);
        c.properties = props;
        c
    }

    #[test]
    fn new_component_always_carries_found_by() {
        let c = Component::new("bar", "pkg:npm/bar@1.0.0");
        assert!(c.properties.contains(&Property::found_by_hermeto()));
    }

    #[test]
    fn merge_is_commutative_idempotent_associative() {
        let a = PropertySet {
            found_by: Some("cachi2".into()),
            missing_hash_in_file: BTreeSet::from(["requirements.txt".to_string()]),
            npm_bundled: true,
            npm_development: false,
            pip_package_binary: false,
            bundler_package_binary: false,
        };
        let b = PropertySet {
            missing_hash_in_file: BTreeSet::from(["requirements-build.txt".to_string()]),
            npm_bundled: false,
            pip_package_binary: true,
            ..Default::default()
        };
        let c = PropertySet {
            bundler_package_binary: true,
            ..Default::default()
        };

        assert_eq!(a.merge(&b), b.merge(&a));
        assert_eq!(a.merge(&a), a);
        assert_eq!(a.merge(&b).merge(&c), a.merge(&b.merge(&c)));
    }

    #[test]
    fn properties_roundtrip_and_are_sorted() {
        let set = PropertySet {
            found_by: Some("cachi2".into()),
            missing_hash_in_file: BTreeSet::from(["b.txt".to_string(), "a.txt".to_string()]),
            npm_bundled: true,
            npm_development: true,
            pip_package_binary: true,
            bundler_package_binary: true,
        };
        let props = set.to_properties();
        assert_eq!(PropertySet::from_properties(&props), set);

        let mut sorted = props.clone();
        sorted.sort_by(|a, b| (a.name.clone(), a.value.clone()).cmp(&(b.name.clone(), b.value.clone())));
        assert_eq!(props, sorted);
    }

    #[test]
    fn merge_component_properties_unions_missing_hash_sightings() {
        let components = vec![
            component(
                "pkg:pypi/bar@1.0",
                vec![Property::new(MISSING_HASH_IN_FILE, "requirements.txt")],
            ),
            component(
                "pkg:pypi/bar@1.0",
                vec![Property::new(MISSING_HASH_IN_FILE, "requirements-build.txt")],
            ),
        ];
        let merged = merge_component_properties(components);
        assert_eq!(merged.len(), 1);
        let set = PropertySet::from_properties(&merged[0].properties);
        assert_eq!(set.missing_hash_in_file.len(), 2);
    }

    #[test]
    fn merge_component_properties_ands_bundled_and_dev_flags() {
        let components = vec![
            component("pkg:npm/bar@1.0", vec![Property::new(NPM_BUNDLED, "true")]),
            component("pkg:npm/bar@1.0", vec![]),
        ];
        let merged = merge_component_properties(components);
        let set = PropertySet::from_properties(&merged[0].properties);
        assert!(!set.npm_bundled);
    }

    #[test]
    fn sbom_idempotence_under_self_merge() {
        let components = vec![
            component("pkg:npm/bar@1.0", vec![Property::new(NPM_BUNDLED, "true")]),
            component("pkg:pypi/foo@2.0", vec![]),
        ];
        let once = merge_component_properties(components.clone());
        let twice = merge_component_properties([once.clone(), once.clone()].concat());
        assert_eq!(once, twice);
    }
}
