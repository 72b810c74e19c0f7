//! Payload predicates used for input and output validation.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Opaque predicate over a payload: `(value) -> is T`.
///
/// The router never inspects payloads itself; it only asks a route's checks
/// whether a value is acceptable.
///
/// # Examples
///
/// ```
/// use chisel::Check;
/// use serde_json::json;
///
/// let number = Check::of::<f64>();
/// assert!(number.check(&json!(42)));
/// assert!(!number.check(&json!("42")));
///
/// let short = Check::new("short string", |v| v.as_str().is_some_and(|s| s.len() < 4));
/// assert!(short.check(&json!("abc")));
/// ```
#[derive(Clone)]
pub struct Check {
    name: Cow<'static, str>,
    predicate: Rc<dyn Fn(&Value) -> bool>,
}

impl Check {
    /// Build a named predicate from a closure.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + 'static,
    {
        Self {
            name: name.into(),
            predicate: Rc::new(predicate),
        }
    }

    /// Accept every value.
    pub fn any() -> Self {
        Self::new("any", |_| true)
    }

    /// Accept values that deserialize into `T`.
    pub fn of<T: DeserializeOwned + 'static>() -> Self {
        Self::new(std::any::type_name::<T>(), |value| {
            T::deserialize(value).is_ok()
        })
    }

    /// Evaluate the predicate.
    pub fn check(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    /// Human-readable name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}
