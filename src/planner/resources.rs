//! Normalization of `resources.<group>.<name>` into a flat resource set.

use std::collections::BTreeMap;

use crate::dyn_value::{Path, Value, ValueKind};
use crate::error::PlanError;
use crate::interpolation::ResourceTypeTable;

/// A `group.name` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// Resource group, e.g. `jobs`.
    pub group: String,
    /// Resource name within the group.
    pub name: String,
}

impl ResourceKey {
    /// Creates a key.
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Parses a `group.name` identity.
    #[must_use]
    pub fn parse(identity: &str) -> Option<Self> {
        let (group, name) = identity.split_once('.')?;
        if group.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(group, name))
    }

    /// The `group.name` identity.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }

    /// Path of the resource inside a bundle tree.
    #[must_use]
    pub fn path(&self) -> Path {
        Path::from_keys(["resources", self.group.as_str(), self.name.as_str()])
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

/// One resource as the bundle wants it.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredResource {
    /// Identity.
    pub key: ResourceKey,
    /// Resource configuration mapping.
    pub config: Value,
}

/// Every resource of a bundle, keyed by identity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceSet {
    resources: BTreeMap<String, DesiredResource>,
}

/// Same shape as a key inside a `${...}` token, so every resource can be
/// referenced.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

impl ResourceSet {
    /// Collects the resources of a bundle tree.
    ///
    /// A missing or null `resources` key yields an empty set.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown group, invalid resource name or
    /// non-mapping node. No partial set is returned.
    pub fn from_tree(tree: &Value, table: &ResourceTypeTable) -> Result<Self, PlanError> {
        let mut set = Self::default();
        let Some(resources) = tree.get_key("resources") else {
            return Ok(set);
        };
        let groups = match resources.kind() {
            ValueKind::Null => return Ok(set),
            ValueKind::Mapping(groups) => groups,
            _ => {
                return Err(PlanError::InvalidResource {
                    path: String::from("resources"),
                    message: format!("expected a mapping, found {}", resources.kind_name()),
                    locations: resources.locations().to_vec(),
                });
            }
        };

        for (group, members) in groups {
            if !table.knows_group(group) {
                return Err(PlanError::UnknownGroup {
                    group: group.clone(),
                    locations: members.locations().to_vec(),
                });
            }
            let members = match members.kind() {
                ValueKind::Null => continue,
                ValueKind::Mapping(members) => members,
                _ => {
                    return Err(PlanError::InvalidResource {
                        path: format!("resources.{group}"),
                        message: format!("expected a mapping, found {}", members.kind_name()),
                        locations: members.locations().to_vec(),
                    });
                }
            };

            for (name, config) in members {
                let path = format!("resources.{group}.{name}");
                if !is_valid_name(name) {
                    return Err(PlanError::InvalidResource {
                        path,
                        message: String::from(
                            "resource names must start with a letter and contain only letters, digits, '_' and '-'",
                        ),
                        locations: config.locations().to_vec(),
                    });
                }
                if config.as_mapping().is_none() {
                    return Err(PlanError::InvalidResource {
                        path,
                        message: format!("expected a mapping, found {}", config.kind_name()),
                        locations: config.locations().to_vec(),
                    });
                }
                let key = ResourceKey::new(group.clone(), name.clone());
                set.resources.insert(
                    key.identity(),
                    DesiredResource {
                        key,
                        config: config.clone(),
                    },
                );
            }
        }

        Ok(set)
    }

    /// Builds a set directly from resources.
    pub fn from_resources(resources: impl IntoIterator<Item = DesiredResource>) -> Self {
        Self {
            resources: resources
                .into_iter()
                .map(|r| (r.key.identity(), r))
                .collect(),
        }
    }

    /// Gets a resource by identity.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&DesiredResource> {
        self.resources.get(identity)
    }

    /// True when the identity is part of the set.
    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.resources.contains_key(identity)
    }

    /// Resources ordered by identity.
    pub fn iter(&self) -> impl Iterator<Item = &DesiredResource> {
        self.resources.values()
    }

    /// Identities ordered.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    /// Number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// True when the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
