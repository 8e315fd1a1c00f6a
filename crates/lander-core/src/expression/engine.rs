//! Memoizing formula compiler

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::operators::OperatorRegistry;
use super::{strip_whitespace, Expression};
use crate::error::Result;

/// Compiles formulas against an operator registry and caches the results.
///
/// The cache is keyed by the whitespace-free source, so `Add(a, b)` and
/// `Add(a,b)` share one compiled tree. Failed compilations are not cached.
pub struct ExpressionEngine {
    registry: OperatorRegistry,
    cache: Mutex<HashMap<String, Arc<Expression>>>,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self::with_registry(OperatorRegistry::builtin())
    }

    pub fn with_registry(registry: OperatorRegistry) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &OperatorRegistry {
        &self.registry
    }

    /// Compile `formula`, returning the cached tree when one exists.
    pub fn compile(&self, formula: &str) -> Result<Arc<Expression>> {
        let key = strip_whitespace(formula);
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(Arc::clone(hit));
        }

        let compiled = Arc::new(Expression::parse_with(&key, &self.registry)?);
        debug!(formula = %key, "Compiled formula");

        let mut cache = self.cache.lock();
        Ok(Arc::clone(cache.entry(key).or_insert(compiled)))
    }

    /// Number of cached formulas.
    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ExpressionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionEngine")
            .field("registry", &self.registry)
            .field("cached", &self.cached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::NoFields;

    #[test]
    fn test_compile_is_memoized() {
        let engine = ExpressionEngine::new();
        let a = engine.compile("Add(1, 2)").unwrap();
        let b = engine.compile("Add(1,2)").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(engine.cached(), 1);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let engine = ExpressionEngine::new();
        assert!(engine.compile("Add(1,").is_err());
        assert_eq!(engine.cached(), 0);
    }

    #[test]
    fn test_custom_registry() {
        let mut registry = OperatorRegistry::builtin();
        registry.register("Half", 1, |a| a[0] / 2.0);
        let engine = ExpressionEngine::with_registry(registry);
        let expr = engine.compile("Half(9)").unwrap();
        assert_eq!(expr.evaluate(&NoFields), 4.5);
    }

    #[test]
    fn test_clear_cache() {
        let engine = ExpressionEngine::new();
        engine.compile("PI").unwrap();
        engine.clear_cache();
        assert_eq!(engine.cached(), 0);
    }
}
