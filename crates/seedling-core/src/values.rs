//! Value resolution. Turns a service template plus managed values into
//! concrete deployment parameter assignments.
//!
//! Resolution is pure: the same definition and the same managed values
//! always produce the same assignments, in catalog declaration order.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::catalog::{Manager, ServiceDefinition};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("value `{value}` needs manager `{}` but no value was provided", .manager.as_str())]
    UnresolvedManager { value: String, manager: Manager },
}

/// Concrete values supplied by managers for one installation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedValues {
    values: BTreeMap<Manager, String>,
}

impl ManagedValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, manager: Manager, value: impl Into<String>) -> Self {
        self.insert(manager, value);
        self
    }

    pub fn insert(&mut self, manager: Manager, value: impl Into<String>) {
        self.values.insert(manager, value.into());
    }

    pub fn get(&self, manager: Manager) -> Option<&str> {
        self.values.get(&manager).map(String::as_str)
    }
}

/// `path = value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalarAssignment {
    pub path: String,
    pub value: String,
}

/// `path = {sub_key: value}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StructuredAssignment {
    pub path: String,
    pub sub_key: String,
    pub value: String,
}

impl StructuredAssignment {
    /// The single-entry object placed at `path`.
    pub fn object(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        map.insert(
            self.sub_key.clone(),
            serde_json::Value::String(self.value.clone()),
        );
        serde_json::Value::Object(map)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolvedValues {
    pub scalars: Vec<ScalarAssignment>,
    pub structured: Vec<StructuredAssignment>,
}

impl ResolvedValues {
    pub fn len(&self) -> usize {
        self.scalars.len() + self.structured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Scalar assignments as `path=value` pairs for `--set`.
    pub fn set_args(&self) -> Vec<String> {
        self.scalars
            .iter()
            .map(|a| format!("{}={}", a.path, a.value))
            .collect()
    }

    /// Structured assignments as `path={"key":"value"}` pairs for `--set-json`.
    pub fn set_json_args(&self) -> Vec<String> {
        self.structured
            .iter()
            .map(|a| format!("{}={}", a.path, a.object()))
            .collect()
    }
}

/// Resolve every value mapping of `definition` into assignments.
///
/// Exactly one assignment is produced per declared target path. A mapping
/// with a manager takes that manager's value instead of its literal default;
/// a manager missing from `managed` fails the whole resolution.
pub fn resolve(
    definition: &ServiceDefinition,
    managed: &ManagedValues,
) -> Result<ResolvedValues, ResolveError> {
    let mut resolved = ResolvedValues::default();

    for mapping in &definition.template.values {
        let value = match mapping.manager {
            Some(manager) => managed
                .get(manager)
                .ok_or_else(|| ResolveError::UnresolvedManager {
                    value: mapping.name.clone(),
                    manager,
                })?,
            None => mapping.default.as_str(),
        };

        for target in &mapping.targets {
            match &target.sub_key {
                Some(sub_key) => resolved.structured.push(StructuredAssignment {
                    path: target.path.clone(),
                    sub_key: sub_key.clone(),
                    value: value.to_string(),
                }),
                None => resolved.scalars.push(ScalarAssignment {
                    path: target.path.clone(),
                    value: value.to_string(),
                }),
            }
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::from_json_str(
            &json!({
                "managers": {"port_allocator": {"start_port": 30000, "end_port": 30010}},
                "services": [
                    {
                        "key": "wordpress",
                        "name": "WordPress",
                        "helm": {
                            "remote_type": "oci",
                            "oci": {"chart_url": "oci://registry-1.docker.io/bitnamicharts/wordpress"},
                            "values": [
                                {
                                    "name": "service type",
                                    "path": [{"path": "service.type"}],
                                    "default": "NodePort"
                                },
                                {
                                    "name": "port",
                                    "path": [
                                        {"path": "service.nodePorts.http"},
                                        {"path": "service.annotations", "key": "seedling/port"},
                                        {"path": "ingress.port"}
                                    ],
                                    "default": "80",
                                    "manager": "port_allocator"
                                },
                                {
                                    "name": "labels",
                                    "path": [{"path": "commonLabels", "key": "tier"}],
                                    "default": "web"
                                }
                            ]
                        }
                    },
                    {
                        "key": "static",
                        "name": "Static",
                        "helm": {
                            "remote_type": "repo",
                            "repo": {"repo_url": "https://charts.example.com", "chart_name": "static"},
                            "values": [
                                {"name": "replicas", "path": [{"path": "replicaCount"}], "default": "1"}
                            ]
                        }
                    }
                ]
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn one_assignment_per_path_in_declaration_order() {
        let catalog = catalog();
        let def = catalog.lookup("wordpress").unwrap();
        let managed = ManagedValues::new().with(Manager::PortAllocator, "30007");

        let resolved = resolve(def, &managed).unwrap();

        assert_eq!(resolved.len(), 5);
        assert_eq!(
            resolved.scalars,
            vec![
                ScalarAssignment {
                    path: "service.type".into(),
                    value: "NodePort".into()
                },
                ScalarAssignment {
                    path: "service.nodePorts.http".into(),
                    value: "30007".into()
                },
                ScalarAssignment {
                    path: "ingress.port".into(),
                    value: "30007".into()
                },
            ]
        );
        assert_eq!(
            resolved.structured,
            vec![
                StructuredAssignment {
                    path: "service.annotations".into(),
                    sub_key: "seedling/port".into(),
                    value: "30007".into()
                },
                StructuredAssignment {
                    path: "commonLabels".into(),
                    sub_key: "tier".into(),
                    value: "web".into()
                },
            ]
        );
    }

    #[test]
    fn missing_manager_fails() {
        let catalog = catalog();
        let def = catalog.lookup("wordpress").unwrap();

        let err = resolve(def, &ManagedValues::new()).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnresolvedManager {
                value: "port".to_string(),
                manager: Manager::PortAllocator,
            }
        );
    }

    #[test]
    fn unmanaged_definitions_ignore_provider() {
        let catalog = catalog();
        let def = catalog.lookup("static").unwrap();

        let resolved = resolve(def, &ManagedValues::new()).unwrap();
        assert_eq!(resolved.set_args(), vec!["replicaCount=1".to_string()]);
        assert!(resolved.set_json_args().is_empty());
    }

    #[test]
    fn resolution_is_deterministic() {
        let catalog = catalog();
        let def = catalog.lookup("wordpress").unwrap();
        let managed = ManagedValues::new().with(Manager::PortAllocator, "30001");

        assert_eq!(resolve(def, &managed).unwrap(), resolve(def, &managed).unwrap());
    }

    #[test]
    fn renders_installer_arguments() {
        let catalog = catalog();
        let def = catalog.lookup("wordpress").unwrap();
        let managed = ManagedValues::new().with(Manager::PortAllocator, "30000");
        let resolved = resolve(def, &managed).unwrap();

        assert_eq!(
            resolved.set_args(),
            vec![
                "service.type=NodePort",
                "service.nodePorts.http=30000",
                "ingress.port=30000"
            ]
        );
        assert_eq!(
            resolved.set_json_args(),
            vec![
                r#"service.annotations={"seedling/port":"30000"}"#,
                r#"commonLabels={"tier":"web"}"#
            ]
        );
    }
}
