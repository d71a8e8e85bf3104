use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::recognizer::{FaceRecognizer, RecognitionCapability};

/// Named set of recognizer backends.
///
/// The control loop owns exactly one recognizer, so selection moves the
/// backend out of the registry.
pub struct RecognizerRegistry {
    backends: HashMap<String, Box<dyn FaceRecognizer>>,
    default_name: Option<String>,
}

impl RecognizerRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<R: FaceRecognizer + 'static>(&mut self, backend: R) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Box::new(backend));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.backends.contains_key(name) {
            return Err(anyhow!(
                "recognizer backend '{}' not registered (available: {})",
                name,
                self.list().join(", ")
            ));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    /// Take a backend by name.
    pub fn take(&mut self, name: &str) -> Result<Box<dyn FaceRecognizer>> {
        self.backends
            .remove(name)
            .ok_or_else(|| anyhow!("recognizer backend '{}' not registered", name))
    }

    /// Take a backend supporting `capability`, preferring the default.
    pub fn take_for_capability(
        &mut self,
        capability: RecognitionCapability,
    ) -> Result<Box<dyn FaceRecognizer>> {
        if let Some(default_name) = self.default_name.clone() {
            let supports = self
                .backends
                .get(&default_name)
                .is_some_and(|backend| backend.supports(capability));
            if supports {
                return self.take(&default_name);
            }
        }

        let fallback = self
            .list()
            .into_iter()
            .find(|name| self.backends[name].supports(capability));
        match fallback {
            Some(name) => {
                log::warn!(
                    "default recognizer does not support {:?}; using '{}'",
                    capability,
                    name
                );
                self.take(&name)
            }
            None => Err(anyhow!(
                "no registered recognizer supports capability {:?}",
                capability
            )),
        }
    }
}

impl Default for RecognizerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faces::backends::{CpuRecognizer, StubRecognizer};

    #[test]
    fn first_registered_is_default() {
        let mut registry = RecognizerRegistry::new();
        registry.register(CpuRecognizer::default());
        registry.register(StubRecognizer::new());
        assert_eq!(registry.list(), vec!["cpu", "stub"]);

        let backend = registry
            .take_for_capability(RecognitionCapability::Identify)
            .unwrap();
        assert_eq!(backend.name(), "cpu");
        assert!(!registry.contains("cpu"));
    }

    #[test]
    fn falls_back_when_default_lacks_capability() {
        let mut registry = RecognizerRegistry::new();
        registry.register(StubRecognizer::new());
        registry.register(CpuRecognizer::default());
        registry.set_default("stub").unwrap();

        let backend = registry
            .take_for_capability(RecognitionCapability::Enroll)
            .unwrap();
        assert_eq!(backend.name(), "cpu");
    }

    #[test]
    fn unknown_default_is_rejected() {
        let mut registry = RecognizerRegistry::new();
        registry.register(StubRecognizer::new());
        let err = registry.set_default("tract").unwrap_err();
        assert!(err.to_string().contains("available: stub"));
    }
}
