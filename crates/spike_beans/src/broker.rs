//! Feature broker: maps feature names to providers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::component::Component;
use crate::dependency::cast_interface;
use crate::error::{BeansError, BeansResult};

/// A zero-argument provider thunk stored in the broker.
type Thunk = Rc<dyn Fn() -> BeansResult<Rc<dyn Component>>>;

/// A registry mapping feature names to the components that provide them.
///
/// The broker is an explicit value: assembly code creates it, provides every
/// feature the pipeline needs and lends the `Rc<FeatureBroker>` to each
/// component. Providers are registered through `&self`, so the broker can be
/// shared before wiring is complete.
///
/// Components keep only a weak handle on the broker, so dropping the last
/// `Rc<FeatureBroker>` tears the pipeline down.
#[derive(Default)]
pub struct FeatureBroker {
    providers: RefCell<HashMap<String, Thunk>>,
    allow_replace: bool,
}

impl FeatureBroker {
    /// Create a broker that rejects duplicate feature names
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker where a later registration replaces an earlier one
    pub fn with_replace() -> Self {
        Self {
            providers: RefCell::new(HashMap::new()),
            allow_replace: true,
        }
    }

    pub fn allow_replace(&self) -> bool {
        self.allow_replace
    }

    /// Provide a plain value. Every resolution returns this same instance.
    pub fn provide(&self, feature: impl Into<String>, value: Rc<dyn Component>) -> BeansResult<()> {
        self.insert(feature.into(), Rc::new(move || Ok(Rc::clone(&value))))
    }

    /// Provide a factory. Every resolution invokes it and gets a fresh instance.
    pub fn provide_factory<C, F>(&self, feature: impl Into<String>, factory: F) -> BeansResult<()>
    where
        C: Component,
        F: Fn() -> BeansResult<Rc<C>> + 'static,
    {
        self.insert(
            feature.into(),
            Rc::new(move || factory().map(|c| c as Rc<dyn Component>)),
        )
    }

    /// Provide a factory bound to fixed construction arguments. The arguments
    /// are cloned into every invocation.
    pub fn provide_factory_with<C, A, F>(
        &self,
        feature: impl Into<String>,
        factory: F,
        args: A,
    ) -> BeansResult<()>
    where
        C: Component,
        A: Clone + 'static,
        F: Fn(A) -> BeansResult<Rc<C>> + 'static,
    {
        self.insert(
            feature.into(),
            Rc::new(move || factory(args.clone()).map(|c| c as Rc<dyn Component>)),
        )
    }

    /// Provide a factory that already yields type-erased components.
    pub fn provide_dyn_factory<F>(&self, feature: impl Into<String>, factory: F) -> BeansResult<()>
    where
        F: Fn() -> BeansResult<Rc<dyn Component>> + 'static,
    {
        self.insert(feature.into(), Rc::new(factory))
    }

    fn insert(&self, feature: String, thunk: Thunk) -> BeansResult<()> {
        let mut providers = self.providers.borrow_mut();
        if providers.contains_key(&feature) {
            if !self.allow_replace {
                return Err(BeansError::DuplicateFeature { feature });
            }
            warn!(feature = %feature, "Replacing provider");
        } else {
            debug!(feature = %feature, "Feature provided");
        }
        providers.insert(feature, thunk);
        Ok(())
    }

    /// Resolve a feature by invoking its provider.
    pub fn resolve(&self, feature: &str) -> BeansResult<Rc<dyn Component>> {
        // The borrow ends before the thunk runs; factories may use the broker.
        let thunk = self.providers.borrow().get(feature).cloned().ok_or_else(|| {
            BeansError::UnknownFeature {
                feature: feature.to_string(),
            }
        })?;
        let component = thunk()?;
        debug!(feature, component = component.type_name(), "Feature resolved");
        Ok(component)
    }

    /// Resolve a feature directly as the trait object `T`.
    ///
    /// Unlike a [`Dependency`](crate::Dependency), this neither caches nor registers
    /// an observer. Meant for assembly code and tests.
    pub fn resolve_as<T: ?Sized + 'static>(&self, feature: &str) -> BeansResult<Rc<T>> {
        let component = self.resolve(feature)?;
        cast_interface::<T>(feature, component)
    }

    pub fn contains(&self, feature: &str) -> bool {
        self.providers.borrow().contains_key(feature)
    }

    /// Names of every provided feature, sorted
    pub fn features(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.borrow().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.providers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.borrow().is_empty()
    }

    /// Drop every provider.
    pub fn clear(&self) {
        self.providers.borrow_mut().clear();
    }
}

impl std::fmt::Debug for FeatureBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureBroker")
            .field("features", &self.features())
            .field("allow_replace", &self.allow_replace)
            .finish()
    }
}
