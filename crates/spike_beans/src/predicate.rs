//! Capability predicates used to validate resolved features

use std::fmt;
use std::rc::Rc;

use crate::component::Component;

/// A named boolean check over a resolved component.
///
/// Predicates are evaluated once, when a [`Dependency`](crate::Dependency) is
/// first resolved. The description ends up in the
/// [`CapabilityViolation`](crate::BeansError::CapabilityViolation) error.
#[derive(Clone)]
pub struct Predicate {
    description: String,
    test: Rc<dyn Fn(&dyn Component) -> bool>,
}

impl Predicate {
    /// Build a predicate from an arbitrary check
    pub fn new<F>(description: impl Into<String>, test: F) -> Self
    where
        F: Fn(&dyn Component) -> bool + 'static,
    {
        Self {
            description: description.into(),
            test: Rc::new(test),
        }
    }

    /// No constraint.
    pub fn any() -> Self {
        Self::new("any", |_| true)
    }

    /// The concrete type of the component is `T`. Combine with [`Predicate::or`]
    /// to accept one of several types.
    pub fn instance_of<T: Component>() -> Self {
        Self::new(
            format!("instance of {}", std::any::type_name::<T>()),
            |c| c.as_any().is::<T>(),
        )
    }

    /// Every name is a readable attribute or a method of the component.
    pub fn has_attributes(attributes: &[&str]) -> Self {
        let attributes: Vec<String> = attributes.iter().map(|a| a.to_string()).collect();
        Self::new(
            format!("has attributes {:?}", attributes),
            move |c| {
                attributes
                    .iter()
                    .all(|a| offers(c.attributes(), a) || offers(c.methods(), a))
            },
        )
    }

    /// Every name is a callable method of the component.
    pub fn has_methods(methods: &[&str]) -> Self {
        let methods: Vec<String> = methods.iter().map(|m| m.to_string()).collect();
        Self::new(format!("has methods {:?}", methods), move |c| {
            methods.iter().all(|m| offers(c.methods(), m))
        })
    }

    /// Both predicates hold
    pub fn and(self, other: Predicate) -> Self {
        let description = format!("({} and {})", self.description, other.description);
        Self::new(description, move |c| self.test(c) && other.test(c))
    }

    /// Either predicate holds
    pub fn or(self, other: Predicate) -> Self {
        let description = format!("({} or {})", self.description, other.description);
        Self::new(description, move |c| self.test(c) || other.test(c))
    }

    pub fn test(&self, component: &dyn Component) -> bool {
        (self.test)(component)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

fn offers(names: &[&'static str], name: &str) -> bool {
    names.iter().any(|n| *n == name)
}

impl Default for Predicate {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.description).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recording;

    impl Component for Recording {
        fn attributes(&self) -> &'static [&'static str] {
            &["signal", "events"]
        }

        fn methods(&self) -> &'static [&'static str] {
            &["write_signal"]
        }

        provides_interfaces!();
    }

    struct Blank;

    impl Component for Blank {
        provides_interfaces!();
    }

    #[test]
    fn test_any_accepts_everything() {
        assert!(Predicate::any().test(&Recording));
        assert!(Predicate::default().test(&Blank));
    }

    #[test]
    fn test_instance_of() {
        let is_recording = Predicate::instance_of::<Recording>();
        assert!(is_recording.test(&Recording));
        assert!(!is_recording.test(&Blank));

        let either = Predicate::instance_of::<Recording>().or(Predicate::instance_of::<Blank>());
        assert!(either.test(&Blank));
    }

    #[test]
    fn test_has_attributes() {
        assert!(Predicate::has_attributes(&["signal"]).test(&Recording));
        assert!(Predicate::has_attributes(&["signal", "events"]).test(&Recording));
        // A method counts as an attribute
        assert!(Predicate::has_attributes(&["write_signal"]).test(&Recording));
        assert!(!Predicate::has_attributes(&["signal", "labels"]).test(&Recording));
        assert!(!Predicate::has_attributes(&["signal"]).test(&Blank));
    }

    #[test]
    fn test_has_methods_requires_callable() {
        assert!(Predicate::has_methods(&["write_signal"]).test(&Recording));
        // `signal` is an attribute, not a method
        assert!(!Predicate::has_methods(&["signal"]).test(&Recording));
    }

    #[test]
    fn test_and_description() {
        let p = Predicate::has_attributes(&["signal"]).and(Predicate::has_methods(&["write_signal"]));
        assert!(p.test(&Recording));
        assert!(p.description().contains("and"));
    }
}
