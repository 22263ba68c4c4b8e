//! The parameter-provider contract a [`crate::layer::Layer`] pulls its weights through. Lives in
//! this crate (rather than `fyuse-engine`, which depends on `fyuse-layer`) because
//! [`crate::layer::Layer::load_parameters`] needs to name the trait without creating a dependency
//! cycle; `fyuse-engine::params` supplies the concrete provider(s) and the scoped-access
//! convenience built on top of this trait. Grounded on `spec.md` §4.10.

use fyuse_core::CoreError;
use fyuse_tensor::shape::ElementType;
use std::any::Any;
use std::rc::Rc;

/// A single named parameter blob, ref-counted so a layer may hold it while it extracts values and
/// release it afterward without the provider needing to track per-layer lifetimes. Mirrors
/// `spec.md` §4.10's `Blob` (`Any` pointer + refcount + owned destructor — here, `Rc<dyn Any>`
/// provides both the refcount and the destructor for free).
#[derive(Clone)]
pub struct Blob(pub Rc<dyn Any>);

impl Blob {
    /// Wraps a concrete value as a blob.
    pub fn new<T: Any>(value: T) -> Self {
        Self(Rc::new(value))
    }

    /// Runs `f` with the blob downcast to `&T`, failing with [`CoreError::Protocol`] if the
    /// blob's concrete type doesn't match. Mirrors `spec.md` §4.10's scoped `with(|any| ...)`
    /// access discipline: the reference never outlives this call, so a layer cannot accidentally
    /// hold a borrow past the point it should have released the blob.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, CoreError> {
        self.0
            .downcast_ref::<T>()
            .map(f)
            .ok_or_else(|| CoreError::Protocol("parameter blob has unexpected concrete type".into()))
    }
}

/// Lazy, named lookup of weight/bias/norm blobs by layer name and sub-index. Grounded on
/// `spec.md` §4.10: `name` follows the `"<layerName>.<suffix>"` convention, `suffix` ranging over
/// `weights`/`bias`/`bn` plus implementation-defined suffixes for quantized tensors.
pub trait ParameterProvider {
    /// Fetches the blob named `name` for `layer_no`/`sub_index`. `sub_index` selects among
    /// multiple blobs that share a name prefix (e.g. per-head attention weights).
    fn get(&self, name: &str, layer_no: i32, sub_index: usize) -> Result<Blob, CoreError>;

    /// Reports the on-disk/on-device precision of the named parameter, which the provider is free
    /// to store as FP16, FP32, or a packed integer format regardless of what a layer ultimately
    /// computes in.
    fn data_type(&self, name: &str, layer_no: i32, sub_index: usize) -> Result<ElementType, CoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f32);

    impl ParameterProvider for Fixed {
        fn get(&self, _name: &str, _layer_no: i32, _sub_index: usize) -> Result<Blob, CoreError> {
            Ok(Blob::new(vec![self.0; 4]))
        }

        fn data_type(&self, _name: &str, _layer_no: i32, _sub_index: usize) -> Result<ElementType, CoreError> {
            Ok(ElementType::Float32)
        }
    }

    #[test]
    fn blob_with_downcasts_to_the_right_type() {
        let blob = Blob::new(vec![1.0f32, 2.0, 3.0]);
        let sum: f32 = blob.with(|v: &Vec<f32>| v.iter().sum()).unwrap();
        assert_eq!(sum, 6.0);
    }

    #[test]
    fn blob_with_wrong_type_fails() {
        let blob = Blob::new(vec![1.0f32]);
        let result = blob.with(|_: &Vec<i32>| 0);
        assert!(matches!(result, Err(CoreError::Protocol(_))));
    }

    #[test]
    fn provider_resolves_by_name_and_layer() {
        let provider = Fixed(2.5);
        let blob = provider.get("conv1.weights", 0, 0).unwrap();
        let values: Vec<f32> = blob.with(|v: &Vec<f32>| v.clone()).unwrap();
        assert_eq!(values, vec![2.5; 4]);
        assert_eq!(provider.data_type("conv1.weights", 0, 0).unwrap(), ElementType::Float32);
    }
}
