//! Differ - Compare desired state with current state
//!
//! Compares the desired attributes declared by the caller with the last known
//! state of a resource and reports which attributes changed, and whether the
//! change can be applied in place.

use std::collections::HashMap;

use crate::resource::{Resource, ResourceId, State, Value};
use crate::schema::ResourceSchema;

/// Attributes that never take part in a diff
const IGNORED_ATTRIBUTES: &[&str] = &["timeouts"];

/// Result of a diff operation
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    /// Resource does not exist -> needs creation
    Create(Resource),
    /// Resource exists with differences -> needs update
    Update {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// A force-new attribute changed -> needs delete then create
    Replace {
        id: ResourceId,
        from: State,
        to: Resource,
        changed_attributes: Vec<String>,
    },
    /// Resource exists with no differences -> no action needed
    NoChange(ResourceId),
}

/// Compare desired state with current state to compute a Diff
pub fn diff(desired: &Resource, current: &State, schema: &ResourceSchema) -> Diff {
    if !current.exists {
        return Diff::Create(desired.clone());
    }

    let changed = find_changed_attributes(&desired.attributes, &current.attributes, schema);

    if changed.is_empty() {
        Diff::NoChange(desired.id.clone())
    } else if !schema.replacement_attributes(&changed).is_empty() {
        Diff::Replace {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    } else {
        Diff::Update {
            id: desired.id.clone(),
            from: current.clone(),
            to: desired.clone(),
            changed_attributes: changed,
        }
    }
}

/// Find changed attributes between desired and current state
///
/// Computed attributes the caller left unset keep their observed value and are
/// not reported.
fn find_changed_attributes(
    desired: &HashMap<String, Value>,
    current: &HashMap<String, Value>,
    schema: &ResourceSchema,
) -> Vec<String> {
    let mut keys: Vec<&String> = desired.keys().chain(current.keys()).collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .filter(|key| !key.starts_with('_') && !IGNORED_ATTRIBUTES.contains(&key.as_str()))
        .filter(|key| {
            let new = desired.get(key.as_str());
            if new.is_none() && schema.is_computed(key) {
                return false;
            }
            if new.is_none() && !schema.attributes.contains_key(key.as_str()) {
                // Observed-only attribute the caller knows nothing about
                return false;
            }
            !same_value(current.get(key.as_str()), new)
        })
        .cloned()
        .collect()
}

/// Absent and zero values compare equal
fn same_value(old: Option<&Value>, new: Option<&Value>) -> bool {
    match (old, new) {
        (Some(a), Some(b)) => a == b || (a.is_zero() && b.is_zero()),
        (Some(v), None) | (None, Some(v)) => v.is_zero(),
        (None, None) => true,
    }
}

/// Attribute changes between the last known state and the desired resource
///
/// Update operations consult this to decide which API calls to issue.
#[derive(Debug, Clone)]
pub struct Changes<'a> {
    old: &'a HashMap<String, Value>,
    new: &'a HashMap<String, Value>,
}

impl<'a> Changes<'a> {
    pub fn new(from: &'a State, to: &'a Resource) -> Self {
        Self {
            old: &from.attributes,
            new: &to.attributes,
        }
    }

    /// Whether the attribute changed
    pub fn has_change(&self, key: &str) -> bool {
        !same_value(self.old.get(key), self.new.get(key))
    }

    pub fn old(&self, key: &str) -> Option<&'a Value> {
        self.old.get(key)
    }

    pub fn new_value(&self, key: &str) -> Option<&'a Value> {
        self.new.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};

    fn schema() -> ResourceSchema {
        ResourceSchema::new("aom_application")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("description", AttributeType::String))
            .attribute(
                AttributeSchema::new("enterprise_project_id", AttributeType::String)
                    .computed()
                    .force_new(),
            )
            .attribute(AttributeSchema::new("creator", AttributeType::String).read_only())
    }

    fn existing(attrs: &[(&str, &str)]) -> State {
        State::existing(
            ResourceId::new("aom_application", "app"),
            attrs
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(*v)))
                .collect(),
        )
    }

    #[test]
    fn diff_create_when_not_exists() {
        let desired = Resource::new("aom_application", "app");
        let current = State::not_found(ResourceId::new("aom_application", "app"));

        let result = diff(&desired, &current, &schema());
        assert!(matches!(result, Diff::Create(_)));
    }

    #[test]
    fn diff_no_change_ignores_computed_attributes() {
        let desired = Resource::new("aom_application", "app").with_attribute("name", "demo");
        let current = existing(&[
            ("name", "demo"),
            ("creator", "someone"),
            ("enterprise_project_id", "0"),
        ]);

        let result = diff(&desired, &current, &schema());
        assert!(matches!(result, Diff::NoChange(_)));
    }

    #[test]
    fn diff_update_when_different() {
        let desired = Resource::new("aom_application", "app")
            .with_attribute("name", "demo-update")
            .with_attribute("description", "");
        let current = existing(&[("name", "demo")]);

        match diff(&desired, &current, &schema()) {
            Diff::Update {
                changed_attributes, ..
            } => {
                assert_eq!(changed_attributes, vec!["name".to_string()]);
            }
            other => panic!("Expected Update, got {:?}", other),
        }
    }

    #[test]
    fn diff_replace_on_force_new_change() {
        let desired = Resource::new("aom_application", "app")
            .with_attribute("name", "demo")
            .with_attribute("enterprise_project_id", "eps-1");
        let current = existing(&[("name", "demo"), ("enterprise_project_id", "0")]);

        assert!(matches!(
            diff(&desired, &current, &schema()),
            Diff::Replace { .. }
        ));
    }

    #[test]
    fn changes_treat_unset_and_empty_alike() {
        let from = existing(&[("name", "demo"), ("description", "")]);
        let to = Resource::new("aom_application", "app")
            .with_attribute("name", "demo")
            .with_attribute("display_name", "Demo");

        let changes = Changes::new(&from, &to);
        assert!(!changes.has_change("description"));
        assert!(!changes.has_change("name"));
        assert!(changes.has_change("display_name"));
        assert_eq!(
            changes.new_value("display_name").and_then(Value::as_str),
            Some("Demo")
        );
    }
}
