//! Concrete [`fyuse_layer::ParameterProvider`] implementation(s). The trait itself lives in
//! `fyuse-layer` (see that crate's `params` module for why); this module supplies the in-memory,
//! map-backed provider a caller populates from a checkpoint loader, plus a scoped-access
//! convenience that folds [`fyuse_layer::ParameterProvider::get`] and [`fyuse_layer::Blob::with`]
//! into a single call. Grounded on `spec.md` §4.10.

use fyuse_core::CoreError;
use fyuse_layer::{Blob, ParameterProvider};
use fyuse_tensor::shape::ElementType;
use std::collections::HashMap;

/// Key a stored blob is addressed by: its declared name plus the layer number and sub-index that
/// requested it (`spec.md` §4.10: the same name can resolve differently per requesting layer,
/// e.g. per-head attention weights share a name but differ by `sub_index`).
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
struct ParamKey {
    name: String,
    layer_no: i32,
    sub_index: usize,
}

/// An in-memory [`ParameterProvider`] backed by a plain map. A checkpoint loader populates one of
/// these via [`Self::insert`] before handing it to [`crate::engine::Engine::initialize_weights`];
/// this provider does no lazy I/O of its own.
#[derive(Default)]
pub struct MapParameterProvider {
    blobs: HashMap<ParamKey, (Blob, ElementType)>,
}

impl MapParameterProvider {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `blob`, typed as `data_type`, under `(name, layer_no, sub_index)`. Overwrites
    /// whatever was previously registered under the same key.
    pub fn insert(&mut self, name: impl Into<String>, layer_no: i32, sub_index: usize, blob: Blob, data_type: ElementType) {
        self.blobs.insert(
            ParamKey {
                name: name.into(),
                layer_no,
                sub_index,
            },
            (blob, data_type),
        );
    }

    /// Number of blobs currently registered.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

impl ParameterProvider for MapParameterProvider {
    fn get(&self, name: &str, layer_no: i32, sub_index: usize) -> Result<Blob, CoreError> {
        let key = ParamKey {
            name: name.to_string(),
            layer_no,
            sub_index,
        };
        self.blobs
            .get(&key)
            .map(|(blob, _)| blob.clone())
            .ok_or_else(|| {
                CoreError::Resource(format!(
                    "no parameter named \"{name}\" registered for layer {layer_no} (sub-index {sub_index})"
                ))
            })
    }

    fn data_type(&self, name: &str, layer_no: i32, sub_index: usize) -> Result<ElementType, CoreError> {
        let key = ParamKey {
            name: name.to_string(),
            layer_no,
            sub_index,
        };
        self.blobs
            .get(&key)
            .map(|(_, data_type)| *data_type)
            .ok_or_else(|| {
                CoreError::Resource(format!(
                    "no parameter named \"{name}\" registered for layer {layer_no} (sub-index {sub_index})"
                ))
            })
    }
}

/// Fetches the blob named `name` for `layer_no`/`sub_index` from `provider` and immediately runs
/// `f` against its downcast content, in one call — `spec.md` §4.10's scoped access discipline,
/// applied across the provider lookup as well as the blob itself.
pub fn with_param<T: std::any::Any, R>(
    provider: &dyn ParameterProvider,
    name: &str,
    layer_no: i32,
    sub_index: usize,
    f: impl FnOnce(&T) -> R,
) -> Result<R, CoreError> {
    provider.get(name, layer_no, sub_index)?.with(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_get_round_trips() {
        let mut provider = MapParameterProvider::new();
        provider.insert("conv1.weights", 3, 0, Blob::new(vec![1.0f32, 2.0, 3.0]), ElementType::Float32);
        let values: Vec<f32> = with_param(&provider, "conv1.weights", 3, 0, |v: &Vec<f32>| v.clone()).unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
        assert_eq!(provider.data_type("conv1.weights", 3, 0).unwrap(), ElementType::Float32);
    }

    #[test]
    fn missing_key_reports_resource_error() {
        let provider = MapParameterProvider::new();
        assert!(matches!(provider.get("missing", 0, 0), Err(CoreError::Resource(_))));
    }

    #[test]
    fn sub_index_distinguishes_otherwise_identical_names() {
        let mut provider = MapParameterProvider::new();
        provider.insert("attn.head", 1, 0, Blob::new(1.0f32), ElementType::Float32);
        provider.insert("attn.head", 1, 1, Blob::new(2.0f32), ElementType::Float32);
        let head0 = with_param(&provider, "attn.head", 1, 0, |v: &f32| *v).unwrap();
        let head1 = with_param(&provider, "attn.head", 1, 1, |v: &f32| *v).unwrap();
        assert_eq!(head0, 1.0);
        assert_eq!(head1, 2.0);
    }
}
