//! View models: the per-request composite result that handlers mutate.
//!
//! Any `Send + Sync + Debug + 'static` type is a [`ViewModel`]. When no view model
//! factory is registered the engine falls back to [`DynamicViewModel`], a
//! concurrent property bag keyed by name.
//!
//! # Example
//!
//! ```
//! use view_composer_core::view_model::DynamicViewModel;
//! use serde_json::json;
//!
//! let vm = DynamicViewModel::new();
//! vm.set("Greeting", json!("hi"));
//! vm.merge([("Count", json!(2))]).set("Other", json!(true));
//!
//! assert_eq!(vm.get("Greeting"), Some(json!("hi")));
//! assert_eq!(vm.keys().len(), 3);
//! ```

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Marker for types that can be returned as a composed view model.
///
/// Implemented for every `Send + Sync + Debug + 'static` type, so factories can
/// return statically structured result types as well as the default
/// [`DynamicViewModel`].
pub trait ViewModel: Any + Send + Sync + fmt::Debug {
    /// Borrow as [`Any`] for downcasting
    fn as_any(&self) -> &dyn Any;

    /// Convert a shared view model into a shared [`Any`] for downcasting
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T> ViewModel for T
where
    T: Any + Send + Sync + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Downcast a shared view model to its concrete type.
///
/// Returns `None` when the view model is of a different type.
#[must_use]
pub fn downcast_view_model<T>(view_model: &Arc<dyn ViewModel>) -> Option<Arc<T>>
where
    T: Any + Send + Sync,
{
    ViewModel::into_any_arc(Arc::clone(view_model))
        .downcast::<T>()
        .ok()
}

/// Default view model: a concurrent, string-keyed property bag.
///
/// All operations take `&self`; concurrent writers to the same name resolve as
/// last-write-wins.
#[derive(Debug, Default)]
pub struct DynamicViewModel {
    properties: RwLock<HashMap<String, Value>>,
}

impl DynamicViewModel {
    /// Create an empty property bag
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value stored under `name`
    ///
    /// Absent names yield `None`, never an error.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Check whether `name` is present
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Insert or replace the value stored under `name`
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        tracing::trace!(property = %name, "Setting view model property");
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, value);
    }

    /// Apply every pair of `source` as a [`set`](Self::set)
    ///
    /// `source` is drained before the write lock is taken, so it may read from
    /// this same view model. Returns `self` so calls can be chained.
    pub fn merge<I, K, V>(&self, source: I) -> &Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let pairs: Vec<(String, Value)> = source
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self.properties
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(pairs);
        self
    }

    /// Snapshot of the names stored at call time
    ///
    /// The snapshot does not observe later writes and can be iterated any
    /// number of times.
    #[must_use]
    pub fn keys(&self) -> Keys {
        let names: Arc<[String]> = self
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        Keys { names }
    }

    /// Number of stored properties
    #[must_use]
    pub fn len(&self) -> usize {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no property has been set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of every stored property
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.properties
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Serialize for DynamicViewModel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let snapshot = self.to_map();
        let mut map = serializer.serialize_map(Some(snapshot.len()))?;
        for (name, value) in &snapshot {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Restartable snapshot of property names, returned by [`DynamicViewModel::keys`].
#[derive(Debug, Clone)]
pub struct Keys {
    names: Arc<[String]>,
}

impl Keys {
    /// Iterate the snapshot from the start
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.names.iter()
    }

    /// Number of names in the snapshot
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if the snapshot is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl<'a> IntoIterator for &'a Keys {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
