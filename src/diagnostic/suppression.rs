use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use regex::Regex;

use crate::diagnostic::{DiagnosticValue, Location};
use crate::types::{MethodDescriptor, TypeDescriptor};

/// Scope a suppression applies to. Names accept dots or slashes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SuppressingLocation {
    InPackage(String),
    InClass(String),
    InMethod {
        owner: String,
        name: String,
    },
    InMethodWithType {
        owner: String,
        name: String,
        descriptor: MethodDescriptor,
    },
    InField {
        owner: String,
        name: String,
    },
    InFieldWithType {
        owner: String,
        name: String,
        descriptor: TypeDescriptor,
    },
}

impl SuppressingLocation {
    pub fn in_package(name: &str) -> Self {
        SuppressingLocation::InPackage(normalize(name))
    }

    pub fn in_class(name: &str) -> Self {
        SuppressingLocation::InClass(normalize(name))
    }

    pub fn in_method(owner: &str, name: &str) -> Self {
        SuppressingLocation::InMethod {
            owner: normalize(owner),
            name: name.to_string(),
        }
    }

    pub fn in_method_with_type(owner: &str, name: &str, descriptor: MethodDescriptor) -> Self {
        SuppressingLocation::InMethodWithType {
            owner: normalize(owner),
            name: name.to_string(),
            descriptor,
        }
    }

    pub fn in_field(owner: &str, name: &str) -> Self {
        SuppressingLocation::InField {
            owner: normalize(owner),
            name: name.to_string(),
        }
    }

    pub fn in_field_with_type(owner: &str, name: &str, descriptor: TypeDescriptor) -> Self {
        SuppressingLocation::InFieldWithType {
            owner: normalize(owner),
            name: name.to_string(),
            descriptor,
        }
    }
}

fn normalize(name: &str) -> String {
    name.replace('.', "/").trim_matches('/').to_string()
}

/// Constraint on one diagnostic parameter.
#[derive(Clone, Debug)]
pub enum SuppressingValue {
    Any,
    IntRange { min: i64, max: i64 },
    IntValue(i64),
    /// Must match the whole parameter.
    StringPattern(Regex),
    StringValue(String),
}

impl SuppressingValue {
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(&format!("^(?:{pattern})$")).map(SuppressingValue::StringPattern)
    }

    pub fn int_range(min: i64, max: i64) -> Self {
        SuppressingValue::IntRange { min, max }
    }

    pub fn matches(&self, value: &DiagnosticValue) -> bool {
        match (self, value) {
            (SuppressingValue::Any, _) => true,
            (SuppressingValue::IntRange { min, max }, DiagnosticValue::Int(value)) => {
                (*min..=*max).contains(value)
            }
            (SuppressingValue::IntValue(expected), DiagnosticValue::Int(value)) => expected == value,
            (SuppressingValue::StringPattern(pattern), DiagnosticValue::String(value)) => {
                pattern.is_match(value)
            }
            (SuppressingValue::StringValue(expected), DiagnosticValue::String(value)) => {
                expected == value
            }
            _ => false,
        }
    }
}

/// A suppression rule: a diagnostic id, an optional scope, and parameter constraints.
#[derive(Clone, Debug)]
pub struct SuppressingDiagnostic {
    pub location: Option<SuppressingLocation>,
    pub id: String,
    pub values: Vec<SuppressingValue>,
}

impl SuppressingDiagnostic {
    pub fn new(location: Option<SuppressingLocation>, id: &str, values: Vec<SuppressingValue>) -> Self {
        SuppressingDiagnostic {
            location,
            id: id.to_string(),
            values,
        }
    }

    /// Parameters beyond the rule's constraints are unconstrained.
    pub fn matches(&self, parameters: &[DiagnosticValue]) -> bool {
        parameters
            .iter()
            .zip(&self.values)
            .all(|(parameter, value)| value.matches(parameter))
    }
}

type RuleSet = Arc<[Arc<SuppressingDiagnostic>]>;

/// Suppression rules indexed by scope, with memoized lookups.
///
/// Lookups by location and by package are cached in two separate maps. Both
/// are filled by compute-if-absent; concurrent writers compute the same set.
#[derive(Debug, Default)]
pub struct SuppressionContainer {
    with_location: HashMap<(SuppressingLocation, String), Vec<Arc<SuppressingDiagnostic>>>,
    without_location: HashMap<String, Vec<Arc<SuppressingDiagnostic>>>,
    location_cache: DashMap<(Location, String), RuleSet>,
    package_cache: DashMap<(String, String), RuleSet>,
}

impl SuppressionContainer {
    pub fn new() -> Self {
        SuppressionContainer::default()
    }

    pub fn add(&mut self, diagnostic: SuppressingDiagnostic) {
        let diagnostic = Arc::new(diagnostic);
        match &diagnostic.location {
            Some(location) => self
                .with_location
                .entry((location.clone(), diagnostic.id.clone()))
                .or_default()
                .push(diagnostic),
            None => self
                .without_location
                .entry(diagnostic.id.clone())
                .or_default()
                .push(diagnostic),
        }
        self.location_cache.clear();
        self.package_cache.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.with_location.is_empty() && self.without_location.is_empty()
    }

    /// Every rule for `id` that applies at `location` or any enclosing scope.
    pub fn get_diagnostic_list(&self, location: &Location, id: &str) -> RuleSet {
        let key = (location.clone(), id.to_string());
        if let Some(cached) = self.location_cache.get(&key) {
            return cached.clone();
        }
        let computed: RuleSet = self.compute_diagnostic_list(location, id).into();
        self.location_cache.entry(key).or_insert(computed).clone()
    }

    fn compute_diagnostic_list(&self, location: &Location, id: &str) -> Vec<Arc<SuppressingDiagnostic>> {
        let mut rules = Vec::new();
        match location {
            Location::None => {}
            Location::Class { name } => {
                self.collect(&mut rules, &SuppressingLocation::InClass(name.clone()), id);
                let package = name.rsplit_once('/').map_or("", |(package, _)| package);
                extend_unique(&mut rules, &self.get_diagnostic_list_for_package(package, id));
            }
            Location::Method {
                owner,
                name,
                descriptor,
            }
            | Location::MethodLocal {
                owner,
                method: name,
                descriptor,
                ..
            } => {
                let class = Location::Class {
                    name: owner.clone(),
                };
                extend_unique(&mut rules, &self.get_diagnostic_list(&class, id));
                self.collect(&mut rules, &SuppressingLocation::in_method(owner, name), id);
                self.collect(
                    &mut rules,
                    &SuppressingLocation::in_method_with_type(owner, name, descriptor.clone()),
                    id,
                );
            }
            Location::Field {
                owner,
                name,
                descriptor,
            }
            | Location::RecordField {
                owner,
                name,
                descriptor,
            } => {
                let class = Location::Class {
                    name: owner.clone(),
                };
                extend_unique(&mut rules, &self.get_diagnostic_list(&class, id));
                self.collect(&mut rules, &SuppressingLocation::in_field(owner, name), id);
                self.collect(
                    &mut rules,
                    &SuppressingLocation::in_field_with_type(owner, name, descriptor.clone()),
                    id,
                );
            }
        }
        if let Some(global) = self.without_location.get(id) {
            extend_unique(&mut rules, global);
        }
        rules
    }

    /// Rules for `package` and each of its parent packages.
    fn get_diagnostic_list_for_package(&self, package: &str, id: &str) -> RuleSet {
        let key = (package.to_string(), id.to_string());
        if let Some(cached) = self.package_cache.get(&key) {
            return cached.clone();
        }
        let mut rules = Vec::new();
        let mut current = package;
        while !current.is_empty() {
            let parent_key = (current.to_string(), id.to_string());
            if let Some(cached) = self.package_cache.get(&parent_key) {
                extend_unique(&mut rules, &cached);
                break;
            }
            self.collect(
                &mut rules,
                &SuppressingLocation::InPackage(current.to_string()),
                id,
            );
            current = current.rsplit_once('/').map_or("", |(parent, _)| parent);
        }
        self.package_cache.entry(key).or_insert(rules.into()).clone()
    }

    fn collect(&self, rules: &mut Vec<Arc<SuppressingDiagnostic>>, location: &SuppressingLocation, id: &str) {
        if let Some(found) = self.with_location.get(&(location.clone(), id.to_string())) {
            extend_unique(rules, found);
        }
    }
}

fn extend_unique(rules: &mut Vec<Arc<SuppressingDiagnostic>>, more: &[Arc<SuppressingDiagnostic>]) {
    for rule in more {
        if !rules.iter().any(|existing| Arc::ptr_eq(existing, rule)) {
            rules.push(rule.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(name: &str) -> Location {
        Location::Class {
            name: name.to_string(),
        }
    }

    #[test]
    fn package_suppression_covers_nested_classes_only() {
        let mut container = SuppressionContainer::new();
        container.add(SuppressingDiagnostic::new(
            Some(SuppressingLocation::in_package("a.b")),
            "X",
            Vec::new(),
        ));

        assert_eq!(container.get_diagnostic_list(&class("a/b/c/D"), "X").len(), 1);
        assert_eq!(container.get_diagnostic_list(&class("a/b/D"), "X").len(), 1);
        assert!(container.get_diagnostic_list(&class("z/D"), "X").is_empty());
        assert!(container.get_diagnostic_list(&class("a/bc/D"), "X").is_empty());
        assert!(container.get_diagnostic_list(&class("a/b/c/D"), "Y").is_empty());
    }

    #[test]
    fn location_free_suppression_applies_everywhere() {
        let mut container = SuppressionContainer::new();
        container.add(SuppressingDiagnostic::new(None, "X", Vec::new()));

        assert_eq!(container.get_diagnostic_list(&Location::None, "X").len(), 1);
        assert_eq!(container.get_diagnostic_list(&class("z/D"), "X").len(), 1);
        let method = Location::Method {
            owner: "q/Q".to_string(),
            name: "run".to_string(),
            descriptor: MethodDescriptor::parse("()V").expect("parse descriptor"),
        };
        assert_eq!(container.get_diagnostic_list(&method, "X").len(), 1);
    }

    #[test]
    fn member_lookup_unions_class_and_member_rules() {
        let descriptor = MethodDescriptor::parse("(I)V").expect("parse descriptor");
        let mut container = SuppressionContainer::new();
        container.add(SuppressingDiagnostic::new(
            Some(SuppressingLocation::in_class("a.A")),
            "X",
            Vec::new(),
        ));
        container.add(SuppressingDiagnostic::new(
            Some(SuppressingLocation::in_method("a/A", "run")),
            "X",
            Vec::new(),
        ));
        container.add(SuppressingDiagnostic::new(
            Some(SuppressingLocation::in_method_with_type(
                "a/A",
                "run",
                descriptor.clone(),
            )),
            "X",
            Vec::new(),
        ));

        let method = Location::Method {
            owner: "a/A".to_string(),
            name: "run".to_string(),
            descriptor: descriptor.clone(),
        };
        assert_eq!(container.get_diagnostic_list(&method, "X").len(), 3);

        let other_overload = Location::Method {
            owner: "a/A".to_string(),
            name: "run".to_string(),
            descriptor: MethodDescriptor::parse("()V").expect("parse descriptor"),
        };
        assert_eq!(container.get_diagnostic_list(&other_overload, "X").len(), 2);

        let local = Location::MethodLocal {
            owner: "a/A".to_string(),
            method: "run".to_string(),
            descriptor,
            index: 0,
            name: "this".to_string(),
        };
        assert_eq!(container.get_diagnostic_list(&local, "X").len(), 3);
    }

    #[test]
    fn repeated_lookups_return_cached_sets() {
        let mut container = SuppressionContainer::new();
        container.add(SuppressingDiagnostic::new(
            Some(SuppressingLocation::in_package("a")),
            "X",
            Vec::new(),
        ));
        let first = container.get_diagnostic_list(&class("a/b/C"), "X");
        let second = container.get_diagnostic_list(&class("a/b/C"), "X");
        assert!(Arc::ptr_eq(&first, &second));
        // a sibling class shares the package cache entry
        assert_eq!(container.get_diagnostic_list(&class("a/b/D"), "X").len(), 1);
    }

    #[test]
    fn values_constrain_parameters() {
        let rule = SuppressingDiagnostic::new(
            None,
            "X",
            vec![
                SuppressingValue::pattern("com/acme/.*").expect("compile pattern"),
                SuppressingValue::Any,
            ],
        );
        assert!(rule.matches(&["com/acme/Foo".into(), "bar".into()]));
        assert!(!rule.matches(&["org/acme/Foo".into(), "bar".into()]));
        assert!(!rule.matches(&[DiagnosticValue::Int(3), "bar".into()]));

        assert!(SuppressingValue::int_range(1, 3).matches(&DiagnosticValue::Int(2)));
        assert!(!SuppressingValue::IntValue(1).matches(&DiagnosticValue::Int(2)));
        assert!(
            SuppressingValue::StringValue("a".to_string()).matches(&DiagnosticValue::from("a"))
        );
    }
}
