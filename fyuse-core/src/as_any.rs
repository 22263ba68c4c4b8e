//! Generates the boilerplate needed to downcast a `dyn Trait` object back to its concrete type.

/// Declares a marker trait `$as_any` that extends [`std::any::Any`] and is blanket-implemented
/// for every type implementing `$trait`, then re-exposes `as_any`/`as_any_mut` so that trait
/// objects of `$trait` can be downcast with [`std::any::Any::downcast_ref`].
///
/// ```ignore
/// define_as_any_trait!(GpuBufferAsAny => GpuBufferTrait);
/// pub trait GpuBufferTrait: GpuBufferAsAny { /* ... */ }
/// ```
#[macro_export]
macro_rules! define_as_any_trait {
    ($as_any_trait:ident => $trait:ident) => {
        #[doc = "Extends a trait object with `Any` so it can be downcast back to its concrete type."]
        pub trait $as_any_trait: ::std::any::Any {
            #[doc = "Returns `self` as a `&dyn Any`."]
            fn as_any(&self) -> &dyn ::std::any::Any;
            #[doc = "Returns `self` as a `&mut dyn Any`."]
            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any;
        }

        impl<T: $trait> $as_any_trait for T {
            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
                self
            }
        }
    };
}
