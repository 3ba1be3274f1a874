//! Cache keys.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use skalman_core::{MethodId, Value};

/// Key of a cached result: the method and its ordered argument values.
///
/// The key carries a precomputed hash, but equality compares the method and
/// every argument in full, so hash collisions never alias two calls.
#[derive(Clone)]
pub struct CacheKey {
    method: MethodId,
    args: Arc<[Value]>,
    hash: u64,
}

impl CacheKey {
    /// Create the key of a call.
    #[must_use]
    pub fn new(method: MethodId, args: &[Value]) -> Self {
        let hash = hash_call(&method, args);
        Self { method, args: Arc::from(args), hash }
    }

    /// The method.
    #[must_use]
    pub const fn method(&self) -> &MethodId {
        &self.method
    }

    /// The argument values.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The precomputed hash.
    #[must_use]
    pub const fn combined_hash(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
            && self.method == other.method
            && self.args.len() == other.args.len()
            && self.args.iter().zip(other.args.iter()).all(|(a, b)| a.identical(b))
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({self})")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

fn hash_call(method: &MethodId, args: &[Value]) -> u64 {
    let mut hasher = DefaultHasher::new();
    method.as_str().hash(&mut hasher);
    args.len().hash(&mut hasher);
    for arg in args {
        arg.hash_into(&mut hasher);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn key(method: &str, args: &[Value]) -> CacheKey {
        CacheKey::new(MethodId::new(method), args)
    }

    #[test]
    fn test_key_equality() {
        assert_eq!(key("f", &[Value::Int(7)]), key("f", &[Value::Int(7)]));
        assert_ne!(key("f", &[Value::Int(7)]), key("f", &[Value::Int(8)]));
        assert_ne!(key("f", &[Value::Int(7)]), key("g", &[Value::Int(7)]));
        assert_ne!(key("f", &[Value::Int(1)]), key("f", &[Value::Float(1.0)]));
        assert_ne!(key("f", &[]), key("f", &[Value::Null]));
    }

    #[test]
    fn test_argument_order_matters() {
        let ab = key("f", &[Value::Int(1), Value::Int(2)]);
        let ba = key("f", &[Value::Int(2), Value::Int(1)]);
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_nan_is_identical_to_itself() {
        assert_eq!(key("f", &[Value::Float(f64::NAN)]), key("f", &[Value::Float(f64::NAN)]));
    }

    #[test]
    fn test_display() {
        let k = key("f", &[Value::Int(7), Value::from("x")]);
        assert!(k.to_string().starts_with("f(7, "));
        assert_eq!(key("f", &[Value::Int(7)]).to_string(), "f(7)");
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_equal_keys_hash_equally(args in prop::collection::vec(arb_value(), 0..4)) {
            let a = key("m", &args);
            let b = key("m", &args.clone());
            prop_assert_eq!(a.combined_hash(), b.combined_hash());
            prop_assert_eq!(a, b);
        }

        #[test]
        fn prop_distinct_ints_distinct_keys(x in any::<i64>(), y in any::<i64>()) {
            prop_assume!(x != y);
            prop_assert_ne!(key("m", &[Value::Int(x)]), key("m", &[Value::Int(y)]));
        }
    }
}
