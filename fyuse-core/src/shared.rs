//! Generates a cheap, `Rc`-backed shared handle over a `dyn Trait` object.

/// Declares a newtype `$name` wrapping `Rc<$ty>` (`$ty` is usually a trait object such as
/// `dyn GpuBufferTrait`), with `Clone` and `Deref`. Used for every GPU resource handle that needs
/// to be shared between a layer and the buffer manager without duplicating the underlying GPU
/// object.
///
/// ```ignore
/// define_shared_wrapper!(GpuBuffer<dyn GpuBufferTrait>);
/// ```
#[macro_export]
macro_rules! define_shared_wrapper {
    ($name:ident<$ty:ty>) => {
        #[derive(Clone)]
        #[doc(hidden)]
        pub struct $name(pub ::std::rc::Rc<$ty>);

        impl ::std::ops::Deref for $name {
            type Target = $ty;

            fn deref(&self) -> &Self::Target {
                self.0.deref()
            }
        }
    };
}
