//! Lazily resolved dependency declarations.

use std::any::TypeId;
use std::cell::OnceCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::broker::FeatureBroker;
use crate::component::Component;
use crate::error::{BeansError, BeansResult};
use crate::predicate::Predicate;

/// A consumer-side handle on a named feature.
///
/// The first call to [`Dependency::get`] resolves the feature through the
/// broker, registers the consumer as an observer of the resolved component (when
/// it has a [`Node`](crate::Node)), validates the predicate and casts the result
/// to `T`. The outcome is cached; later calls return it without touching the
/// broker again.
///
/// `T` is normally a capability trait object such as `dyn SignalSource`.
pub struct Dependency<T: ?Sized + 'static> {
    feature: String,
    predicate: Predicate,
    resolved: OnceCell<Rc<T>>,
}

impl<T: ?Sized + 'static> Dependency<T> {
    pub fn new(feature: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            feature: feature.into(),
            predicate,
            resolved: OnceCell::new(),
        }
    }

    /// A dependency without any predicate
    pub fn unchecked(feature: impl Into<String>) -> Self {
        Self::new(feature, Predicate::any())
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.get().is_some()
    }

    /// Get the resolved feature, resolving it on first access.
    pub fn get(&self, broker: &FeatureBroker, consumer: Weak<dyn Component>) -> BeansResult<Rc<T>> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(Rc::clone(resolved));
        }

        let resolved = self.request(broker, consumer)?;
        Ok(Rc::clone(self.resolved.get_or_init(|| resolved)))
    }

    /// [`Dependency::get`] for consumers that hold the broker weakly. Once
    /// resolved, the dependency no longer needs the broker.
    pub fn get_from(
        &self,
        broker: &Weak<FeatureBroker>,
        consumer: Weak<dyn Component>,
    ) -> BeansResult<Rc<T>> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(Rc::clone(resolved));
        }

        let broker = broker.upgrade().ok_or_else(|| BeansError::BrokerDropped {
            feature: self.feature.clone(),
        })?;
        self.get(&broker, consumer)
    }

    fn request(&self, broker: &FeatureBroker, consumer: Weak<dyn Component>) -> BeansResult<Rc<T>> {
        let component = broker.resolve(&self.feature)?;

        match component.node() {
            Some(node) => {
                node.register_observer(consumer);
            }
            None => {
                debug!(
                    feature = %self.feature,
                    component = component.type_name(),
                    "Resolved component does not accept observers"
                );
            }
        }

        if !self.predicate.test(component.as_ref()) {
            return Err(BeansError::CapabilityViolation {
                feature: self.feature.clone(),
                value: component.type_name().to_string(),
                criteria: self.predicate.description().to_string(),
            });
        }

        cast_interface::<T>(&self.feature, component)
    }
}

impl<T: ?Sized + 'static> std::fmt::Debug for Dependency<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependency")
            .field("feature", &self.feature)
            .field("predicate", &self.predicate)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Cast a resolved component to the trait object `T` through
/// [`Component::interface`].
pub(crate) fn cast_interface<T: ?Sized + 'static>(
    feature: &str,
    component: Rc<dyn Component>,
) -> BeansResult<Rc<T>> {
    let type_name = component.type_name();
    component
        .interface(TypeId::of::<T>())
        .and_then(|boxed| boxed.downcast::<Rc<T>>().ok())
        .map(|typed| *typed)
        .ok_or_else(|| BeansError::CapabilityViolation {
            feature: feature.to_string(),
            value: type_name.to_string(),
            criteria: format!("implements {}", std::any::type_name::<T>()),
        })
}
