use std::collections::HashMap;
use std::sync::Arc;

use foundry_eval_types::Category;

use crate::descriptor::EvaluatorDescriptor;
use crate::error::RegistryError;
use crate::evaluator::Evaluator;

/// A descriptor paired with the implementation that scores it locally.
#[derive(Clone)]
pub struct RegisteredEvaluator {
    pub descriptor: EvaluatorDescriptor,
    pub evaluator: Arc<dyn Evaluator>,
}

impl RegisteredEvaluator {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }
}

impl std::fmt::Debug for RegisteredEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredEvaluator")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Evaluators known to a process, in registration order.
///
/// Populated once at startup and shared behind an `Arc` afterwards; a run only ever
/// reads it.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    entries: Vec<RegisteredEvaluator>,
    index: HashMap<String, usize>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        descriptor: EvaluatorDescriptor,
        evaluator: Arc<dyn Evaluator>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateEvaluator(descriptor.name));
        }
        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(RegisteredEvaluator {
            descriptor,
            evaluator,
        });
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<&RegisteredEvaluator, RegistryError> {
        self.index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| RegistryError::UnknownEvaluator(name.to_string()))
    }

    pub fn descriptor(&self, name: &str) -> Result<&EvaluatorDescriptor, RegistryError> {
        self.resolve(name).map(|e| &e.descriptor)
    }

    pub fn by_category(&self, category: Category) -> Vec<&EvaluatorDescriptor> {
        self.entries
            .iter()
            .filter(|e| e.descriptor.category == category)
            .map(|e| &e.descriptor)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredEvaluator> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.descriptor.name.clone()).collect()
    }

    /// Registration position, used to keep report ordering stable.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::{from_async_fn, RawScore};

    fn noop(name: &str) -> Arc<dyn Evaluator> {
        from_async_fn(name, |_| async { Ok(RawScore::new(1.0)) })
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = Registry::new();
        let d = EvaluatorDescriptor::new("coherence", Category::GeneralPurpose);
        registry.register(d.clone(), noop("coherence")).unwrap();
        let err = registry.register(d, noop("coherence")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateEvaluator("coherence".into()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unknown_names_fail_to_resolve() {
        let registry = Registry::new();
        assert_eq!(
            registry.resolve("nope").unwrap_err(),
            RegistryError::UnknownEvaluator("nope".into())
        );
    }

    #[test]
    fn by_category_keeps_insertion_order() {
        let mut registry = Registry::new();
        for (name, cat) in [
            ("fluency", Category::GeneralPurpose),
            ("retrieval", Category::RagRetrieval),
            ("coherence", Category::GeneralPurpose),
            ("friendliness", Category::GeneralPurpose),
        ] {
            registry
                .register(EvaluatorDescriptor::new(name, cat), noop(name))
                .unwrap();
        }
        let names: Vec<_> = registry
            .by_category(Category::GeneralPurpose)
            .into_iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["fluency", "coherence", "friendliness"]);
        assert_eq!(registry.position("retrieval"), Some(1));
    }
}
