//! Utility macros for the spike_beans crate.

/// Generates `as_any` and `interface` for a [`Component`](crate::Component) impl.
///
/// List every capability trait the component plays; `dyn Component` itself is
/// always included. Invoke it inside the `impl Component for ...` block.
///
/// # Example
///
/// ```ignore
/// impl Component for SpikeDetector {
///     fn node(&self) -> Option<&Node> {
///         Some(&self.node)
///     }
///
///     provides_interfaces!(dyn SpikeMarkerSource);
/// }
/// ```
#[macro_export]
macro_rules! provides_interfaces {
    ($($iface:ty),* $(,)?) => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn interface(
            self: ::std::rc::Rc<Self>,
            id: ::std::any::TypeId,
        ) -> ::std::option::Option<::std::boxed::Box<dyn ::std::any::Any>> {
            if id == ::std::any::TypeId::of::<dyn $crate::Component>() {
                return ::std::option::Option::Some(::std::boxed::Box::new(
                    self as ::std::rc::Rc<dyn $crate::Component>,
                ));
            }
            $(
                if id == ::std::any::TypeId::of::<$iface>() {
                    return ::std::option::Option::Some(::std::boxed::Box::new(
                        self as ::std::rc::Rc<$iface>,
                    ));
                }
            )*
            ::std::option::Option::None
        }
    };
}
