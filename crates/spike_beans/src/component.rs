//! Component graph nodes and the observer-driven recomputation cascade

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use tracing::debug;
use uuid::Uuid;

use crate::error::{BeansError, BeansResult};

/// Core trait that every pipeline component implements.
///
/// A component optionally owns a [`Node`] (its observer set), may recompute
/// itself when something upstream changes, and describes which attributes and
/// methods it offers so that [`Predicate`](crate::Predicate)s can validate it at
/// wiring time. Typed access to the roles a component plays goes through
/// [`Component::interface`], normally generated with
/// [`provides_interfaces!`](crate::provides_interfaces).
pub trait Component: Any {
    /// Observer registration capability. Components returning `None` can still
    /// be resolved; the dependency edge is just not tracked for invalidation.
    fn node(&self) -> Option<&Node> {
        None
    }

    /// Recompute cached results. Called by [`Component::update`] and by the
    /// notification pass of every upstream component.
    fn recompute(&self) -> BeansResult<()> {
        Ok(())
    }

    /// Readable attributes this component exposes (e.g. `"signal"`).
    fn attributes(&self) -> &'static [&'static str] {
        &[]
    }

    /// Callable methods this component exposes.
    fn methods(&self) -> &'static [&'static str] {
        &[]
    }

    /// Get a human-readable type name for diagnostics
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    fn as_any(&self) -> &dyn Any;

    /// Hands this component out as the trait object identified by `id`, boxed as
    /// `Rc<dyn Trait>`. Returns `None` when the component does not play that role.
    fn interface(self: Rc<Self>, id: TypeId) -> Option<Box<dyn Any>> {
        let _ = id;
        None
    }

    /// Recompute every transitive dependent exactly once, in first-seen order.
    ///
    /// The pass aborts at the first failing `recompute`; dependents after it keep
    /// their previous (possibly stale) state.
    fn notify_observers(&self) -> BeansResult<()> {
        let Some(node) = self.node() else {
            return Ok(());
        };

        let dependents = node.dependents()?;
        debug!(
            component = self.type_name(),
            dependents = dependents.len(),
            "Notifying dependents"
        );
        for dependent in dependents {
            debug!(component = dependent.type_name(), "Recomputing dependent");
            dependent.recompute()?;
        }
        Ok(())
    }

    /// The "something changed" entry point: recompute self, then cascade.
    fn update(&self) -> BeansResult<()> {
        debug!(component = self.type_name(), "Update requested");
        self.recompute()?;
        self.notify_observers()
    }
}

impl std::fmt::Debug for dyn Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Component");
        out.field("type", &self.type_name());
        if let Some(node) = self.node() {
            out.field("node", &node.id());
        }
        out.finish()
    }
}

/// Observer bookkeeping for one component.
///
/// Observers are held as `Weak` references: the graph never owns a component's
/// lifetime. Observers that have been dropped are skipped and pruned.
pub struct Node {
    id: Uuid,
    observers: RefCell<Vec<Weak<dyn Component>>>,
}

impl Node {
    /// Create a node with no observers
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            observers: RefCell::new(Vec::new()),
        }
    }

    /// Unique id of this node, used in log output
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Register an observer. Returns `false` if it was already registered.
    pub fn register_observer(&self, observer: Weak<dyn Component>) -> bool {
        let mut observers = self.observers.borrow_mut();
        observers.retain(|o| o.strong_count() > 0);
        if observers.iter().any(|o| same_weak(o, &observer)) {
            return false;
        }
        observers.push(observer);
        debug!(node = %self.id, observers = observers.len(), "Observer registered");
        true
    }

    /// Unregister an observer. Returns `false` if it was not registered.
    pub fn unregister_observer(&self, observer: &Weak<dyn Component>) -> bool {
        let mut observers = self.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|o| !same_weak(o, observer));
        before != observers.len()
    }

    /// Live direct observers, in registration order.
    pub fn observers(&self) -> Vec<Rc<dyn Component>> {
        self.observers
            .borrow()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn observer_count(&self) -> usize {
        self.observers().len()
    }

    /// Direct observers followed by each observer's own transitive dependents,
    /// duplicates collapsed to their first occurrence.
    ///
    /// Returns [`BeansError::CyclicObservers`] if an observer is reached again
    /// while it is still being expanded.
    pub fn dependents(&self) -> BeansResult<Vec<Rc<dyn Component>>> {
        let mut path = Vec::new();
        let mut expanded = HashMap::new();
        self.collect_dependents(&mut path, &mut expanded)
    }

    /// `path` holds the observers being expanded, `expanded` the finished
    /// dependent lists of observers already visited during this call.
    fn collect_dependents(
        &self,
        path: &mut Vec<*const ()>,
        expanded: &mut HashMap<*const (), Vec<Rc<dyn Component>>>,
    ) -> BeansResult<Vec<Rc<dyn Component>>> {
        let direct = self.observers();
        let mut all = direct.clone();

        for observer in &direct {
            let addr = component_addr(observer);
            if path.contains(&addr) {
                return Err(BeansError::CyclicObservers {
                    component: observer.type_name().to_string(),
                });
            }
            if let Some(nested) = expanded.get(&addr) {
                all.extend(nested.iter().cloned());
                continue;
            }
            if let Some(node) = observer.node() {
                path.push(addr);
                let nested = node.collect_dependents(path, expanded);
                path.pop();
                let nested = nested?;
                all.extend(nested.iter().cloned());
                expanded.insert(addr, nested);
            }
        }

        let mut seen = HashSet::with_capacity(all.len());
        all.retain(|c| seen.insert(component_addr(c)));
        Ok(all)
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("observers", &self.observers.borrow().len())
            .finish()
    }
}

fn component_addr(component: &Rc<dyn Component>) -> *const () {
    Rc::as_ptr(component) as *const ()
}

fn same_weak(a: &Weak<dyn Component>, b: &Weak<dyn Component>) -> bool {
    std::ptr::addr_eq(a.as_ptr(), b.as_ptr())
}
