//! Concurrent mark phase: which classes and members the root classes need.
//!
//! Every reference is expanded at most once. The first caller to insert a
//! reference into the shared seen map wins and expands it in a child task of a
//! single [`rayon::scope`]; [`Reachability::compute`] returns once every child
//! task has finished.

pub mod reflect;
mod refs;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use rayon::Scope;
use rayon::prelude::*;
use tracing::{debug, info_span, trace};

use crate::classpath::{CombinedClassPath, LayerKind};
use crate::diagnostic::{DiagnosticHandler, Location, basic};
use crate::ir::ClassFile;
use crate::reachability::reflect::ReflectionMapping;
use crate::reachability::refs::Edges;
use crate::reference::{
    ClassReference, FieldReference, MethodReference, RecordFieldReference, Reference,
};
use crate::{Error, Result};

/// Everything reference computation reads but never changes.
pub struct ComputeReferenceEnvironment<'a> {
    pub(crate) keep_runtime_invisible_annotation: bool,
    pub(crate) reflection: &'a ReflectionMapping,
    pub(crate) classpath: &'a CombinedClassPath,
    pub(crate) handler: &'a dyn DiagnosticHandler,
    /// Overridden method to the root or embed methods overriding it.
    overrides: DashMap<MethodReference, Vec<MethodReference>>,
}

impl<'a> ComputeReferenceEnvironment<'a> {
    pub fn new(
        classpath: &'a CombinedClassPath,
        reflection: &'a ReflectionMapping,
        handler: &'a dyn DiagnosticHandler,
    ) -> Self {
        ComputeReferenceEnvironment {
            keep_runtime_invisible_annotation: false,
            reflection,
            classpath,
            handler,
            overrides: DashMap::new(),
        }
    }

    /// Also follow annotations that are not visible at run time.
    pub fn keep_runtime_invisible_annotation(mut self, keep: bool) -> Self {
        self.keep_runtime_invisible_annotation = keep;
        self
    }

    pub fn classpath(&self) -> &CombinedClassPath {
        self.classpath
    }

    /// Record, for every overridable method of the loaded root and embed classes,
    /// the nearest declaration it overrides through each direct supertype.
    fn compute_overrides(&self) -> Result<()> {
        let mut classes = self.classpath.layer(LayerKind::Root).classes();
        classes.extend(self.classpath.layer(LayerKind::Embed).classes());
        classes
            .par_iter()
            .try_for_each(|class| self.overrides_of(class))
    }

    fn overrides_of(&self, class: &ClassFile) -> Result<()> {
        let supertypes: Vec<&ClassReference> = class
            .super_class
            .iter()
            .chain(class.interfaces.iter())
            .collect();
        for method in &class.methods {
            if method.is_static() || method.is_private() || method.name.starts_with('<') {
                continue;
            }
            let child = class.method_reference(method);
            for supertype in &supertypes {
                let candidate =
                    MethodReference::new((*supertype).clone(), &method.name, method.descriptor.clone());
                // missing parents are reported when the class itself is expanded
                if let Some(parent) = self.classpath.find_method(&candidate)? {
                    self.overrides.entry(parent).or_default().push(child.clone());
                }
            }
        }
        Ok(())
    }
}

/// A source of starting points for the walk.
pub trait ReferenceCollector: Sync {
    fn collect(&self, context: &ReferencesCollectContext<'_, '_>) -> Result<()>;
}

/// Seeds every root-layer class with all of its members.
#[derive(Debug, Default)]
pub struct RootCollector;

impl ReferenceCollector for RootCollector {
    fn collect(&self, context: &ReferencesCollectContext<'_, '_>) -> Result<()> {
        for class in context.env.classpath.layer(LayerKind::Root).classes() {
            context.collect_references_of(class.name.clone(), Location::None);
            for method in &class.methods {
                context.collect_references_of(class.method_reference(method), Location::None);
            }
            for field in &class.fields {
                context.collect_references_of(class.field_reference(field), Location::None);
            }
            for component in class.record_fields.iter().flatten() {
                context.collect_references_of(class.record_field_reference(component), Location::None);
            }
        }
        Ok(())
    }
}

enum ClassState {
    /// Not found yet; overriding methods to add once it is.
    Waiting(Vec<MethodReference>),
    Included,
}

#[derive(Default)]
struct CollectState {
    seen: DashMap<Reference, Location>,
    included: DashSet<Reference>,
    classes: DashMap<ClassReference, ClassState>,
    visits: AtomicUsize,
    #[cfg(test)]
    expansions: DashMap<Reference, usize>,
    failure: Mutex<Option<Error>>,
}

impl CollectState {
    fn failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn fail(&self, error: Error) {
        self.failure.lock().get_or_insert(error);
    }
}

/// Handle given to collectors and expansion tasks.
pub struct ReferencesCollectContext<'c, 'scope> {
    env: &'scope ComputeReferenceEnvironment<'scope>,
    state: &'scope CollectState,
    scope: &'c Scope<'scope>,
}

impl<'scope> ReferencesCollectContext<'_, 'scope> {
    pub fn env(&self) -> &ComputeReferenceEnvironment<'scope> {
        self.env
    }

    /// Mark `reference` as needed from `location`. Only the first caller for a
    /// reference expands it; later callers return immediately.
    pub fn collect_references_of(&self, reference: impl Into<Reference>, location: Location) {
        let reference = reference.into();
        match self.state.seen.entry(reference.clone()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(entry) => {
                entry.insert(location.clone());
            }
        }
        self.run_child_thread(move |context| context.expand(reference, location));
    }

    /// Run `task` on the pool; [`Reachability::compute`] waits for it.
    pub fn run_child_thread<F>(&self, task: F)
    where
        F: FnOnce(&ReferencesCollectContext<'_, 'scope>) -> Result<()> + Send + 'scope,
    {
        let env = self.env;
        let state = self.state;
        self.scope.spawn(move |scope| {
            if state.failed() {
                return;
            }
            let context = ReferencesCollectContext { env, state, scope };
            if let Err(error) = task(&context) {
                state.fail(error);
            }
        });
    }

    fn add_all(&self, edges: Vec<(Reference, Location)>) {
        for (reference, location) in edges {
            self.collect_references_of(reference, location);
        }
    }

    fn report(&self, diagnostic: crate::diagnostic::Diagnostic) -> Result<()> {
        self.env.handler.handle(&diagnostic)
    }

    fn expand(&self, reference: Reference, location: Location) -> Result<()> {
        self.state.visits.fetch_add(1, Ordering::Relaxed);
        #[cfg(test)]
        {
            *self.state.expansions.entry(reference.clone()).or_default() += 1;
        }
        trace!(%reference, "expanding");
        match reference {
            Reference::Class(class) => self.expand_class(class, location),
            Reference::Method(method) => self.expand_method(method, location),
            Reference::Field(field) => self.expand_field(field, location),
            Reference::RecordField(field) => self.expand_record_field(field, location),
            Reference::PartialMethod(method) => {
                let found = self.env.classpath.find_methods(&method)?;
                if found.is_empty() {
                    return self.report(basic::unresolvable_partial_method(&method, location));
                }
                for resolved in found {
                    self.collect_references_of(resolved, location.clone());
                }
                Ok(())
            }
            Reference::TypelessMethod(method) => {
                let found = self.env.classpath.find_typeless_methods(&method)?;
                if found.is_empty() {
                    return self.report(basic::unresolvable_typeless_method(&method, location));
                }
                for resolved in found {
                    self.collect_references_of(resolved, location.clone());
                }
                Ok(())
            }
            Reference::PartialField(field) => {
                let found = self.env.classpath.find_fields(&field)?;
                if found.is_empty() {
                    return self.report(basic::unresolvable_partial_field(&field, location));
                }
                for resolved in found {
                    self.collect_references_of(resolved, location.clone());
                }
                Ok(())
            }
        }
    }

    fn expand_class(&self, class: ClassReference, location: Location) -> Result<()> {
        if class.is_array() {
            if let Some(element) = class.array_element() {
                self.collect_references_of(element, location);
            }
            return Ok(());
        }
        let Some(loaded) = self.env.classpath.find_class(&class)? else {
            return self.report(basic::unresolvable_class(&class, location));
        };
        self.state.included.insert(class.clone().into());

        let waiting = match self.state.classes.insert(class.clone(), ClassState::Included) {
            Some(ClassState::Waiting(waiting)) => waiting,
            _ => Vec::new(),
        };
        for method in waiting {
            let location = Location::class(&method.owner);
            self.collect_references_of(method, location);
        }

        if loaded.layer == LayerKind::Refer {
            // library members stay resolvable so overrides of them are kept
            let location = Location::class(&class);
            for method in &loaded.class.methods {
                self.collect_references_of(loaded.class.method_reference(method), location.clone());
            }
            for field in &loaded.class.fields {
                self.collect_references_of(loaded.class.field_reference(field), location.clone());
            }
        } else {
            self.add_all(Edges::of_class(self.env, &loaded.class)?);
        }
        Ok(())
    }

    /// Resolve a member reference on `owner`. A reference declared elsewhere in
    /// the hierarchy is forwarded to its declaration.
    fn declaring_class(
        &self,
        reference: Reference,
        resolved: Reference,
        location: &Location,
    ) -> Result<Option<(Arc<ClassFile>, LayerKind)>> {
        self.collect_references_of(reference.owner().clone(), location.clone());
        if resolved != reference {
            self.collect_references_of(resolved, location.clone());
            return Ok(None);
        }
        self.state.included.insert(reference.clone());
        Ok(self
            .env
            .classpath
            .find_class(reference.owner())?
            .map(|loaded| (loaded.class, loaded.layer)))
    }

    fn expand_method(&self, method: MethodReference, location: Location) -> Result<()> {
        let Some(resolved) = self.env.classpath.find_method(&method)? else {
            return self.report(basic::unresolvable_method(&method, location));
        };
        let Some((class, layer)) =
            self.declaring_class(method.clone().into(), resolved.into(), &location)?
        else {
            return Ok(());
        };
        if layer != LayerKind::Refer {
            if let Some(declared) = class.find_method(&method.name, &method.descriptor) {
                self.add_all(Edges::of_method(self.env, &class, declared)?);
            }
        }
        self.retain_overrides(&method);
        Ok(())
    }

    /// Overriding methods of `method` are needed as soon as their class is.
    fn retain_overrides(&self, method: &MethodReference) {
        let Some(children) = self.env.overrides.get(method).map(|entry| entry.value().clone()) else {
            return;
        };
        for child in children {
            let included = match self.state.classes.entry(child.owner.clone()) {
                Entry::Occupied(mut entry) => match entry.get_mut() {
                    ClassState::Included => true,
                    ClassState::Waiting(waiting) => {
                        waiting.push(child.clone());
                        false
                    }
                },
                Entry::Vacant(entry) => {
                    entry.insert(ClassState::Waiting(vec![child.clone()]));
                    false
                }
            };
            if included {
                let location = Location::method(method);
                self.collect_references_of(child, location);
            }
        }
    }

    fn expand_field(&self, field: FieldReference, location: Location) -> Result<()> {
        let Some(resolved) = self.env.classpath.find_field(&field)? else {
            return self.report(basic::unresolvable_field(&field, location));
        };
        let Some((class, layer)) =
            self.declaring_class(field.clone().into(), resolved.into(), &location)?
        else {
            return Ok(());
        };
        if layer != LayerKind::Refer {
            if let Some(declared) = class.find_field(&field.name, &field.descriptor) {
                self.add_all(Edges::of_field(self.env, &class, declared)?);
            }
        }
        Ok(())
    }

    fn expand_record_field(&self, field: RecordFieldReference, location: Location) -> Result<()> {
        let Some(resolved) = self.env.classpath.find_record_field(&field)? else {
            return self.report(basic::unresolvable_record_field(&field, location));
        };
        let Some((class, layer)) =
            self.declaring_class(field.clone().into(), resolved.into(), &location)?
        else {
            return Ok(());
        };
        if layer != LayerKind::Refer {
            let declared = class.record_fields.iter().flatten().find(|component| {
                *component.name == *field.name && component.descriptor == field.descriptor
            });
            if let Some(declared) = declared {
                self.add_all(Edges::of_record_field(self.env, &class, declared)?);
            }
        }
        Ok(())
    }
}

/// What the walk found.
#[derive(Debug, Default)]
pub struct ReachableSet {
    included: HashSet<Reference>,
    locations: HashMap<Reference, Location>,
}

impl ReachableSet {
    pub fn contains_class(&self, class: &ClassReference) -> bool {
        self.included.contains(&Reference::Class(class.clone()))
    }

    pub fn contains_method(&self, method: &MethodReference) -> bool {
        self.included.contains(&Reference::Method(method.clone()))
    }

    pub fn contains_field(&self, field: &FieldReference) -> bool {
        self.included.contains(&Reference::Field(field.clone()))
    }

    pub fn contains_record_field(&self, field: &RecordFieldReference) -> bool {
        self.included.contains(&Reference::RecordField(field.clone()))
    }

    /// Reachable classes, sorted.
    pub fn classes(&self) -> Vec<ClassReference> {
        let mut classes: Vec<ClassReference> = self
            .included
            .iter()
            .filter_map(|reference| match reference {
                Reference::Class(class) => Some(class.clone()),
                _ => None,
            })
            .collect();
        classes.sort();
        classes
    }

    /// Every resolved class and member, sorted.
    pub fn references(&self) -> Vec<Reference> {
        let mut references: Vec<Reference> = self.included.iter().cloned().collect();
        references.sort();
        references
    }

    /// Where `reference` was first found to be needed.
    pub fn location_of(&self, reference: &Reference) -> Option<&Location> {
        self.locations.get(reference)
    }

    pub fn len(&self) -> usize {
        self.included.len()
    }

    pub fn is_empty(&self) -> bool {
        self.included.is_empty()
    }
}

/// Result of one mark phase.
#[derive(Debug)]
pub struct Reachability {
    reachable: ReachableSet,
    visit_count: usize,
    #[cfg(test)]
    expansions: HashMap<Reference, usize>,
}

impl Reachability {
    /// Walk from every collector's seeds until nothing new is found.
    pub fn compute(
        env: &ComputeReferenceEnvironment<'_>,
        collectors: &[&dyn ReferenceCollector],
    ) -> Result<Reachability> {
        let _span = info_span!("reachability").entered();
        env.overrides.clear();
        env.compute_overrides()?;
        debug!(overridden = env.overrides.len(), "override edges computed");

        let state = CollectState::default();
        rayon::scope(|scope| {
            let context = ReferencesCollectContext {
                env,
                state: &state,
                scope,
            };
            for collector in collectors {
                if let Err(error) = collector.collect(&context) {
                    state.fail(error);
                }
            }
        });

        if let Some(error) = state.failure.into_inner() {
            return Err(error);
        }
        let visit_count = state.visits.into_inner();
        #[cfg(test)]
        let expansions = state.expansions.into_iter().collect();
        let reachable = ReachableSet {
            included: state.included.into_iter().collect(),
            locations: state.seen.into_iter().collect(),
        };
        debug!(reachable = reachable.len(), visits = visit_count, "reachability done");
        Ok(Reachability {
            reachable,
            visit_count,
            #[cfg(test)]
            expansions,
        })
    }

    pub fn reachable(&self) -> &ReachableSet {
        &self.reachable
    }

    pub fn into_reachable(self) -> ReachableSet {
        self.reachable
    }

    /// Number of expansions performed; each reference is expanded at most once.
    pub fn visit_count(&self) -> usize {
        self.visit_count
    }
}
