//! Topic to handler mapping, frozen once dispatch starts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use super::context::ExecutionContext;
use super::error::{HandlerError, RegistryError};

/// Type alias for boxed subscription handler functions.
pub type HandlerFn =
    Arc<dyn Fn(&ExecutionContext<'_>) -> Result<(), HandlerError> + Send + Sync>;

#[derive(Default)]
struct RegistryState {
    handlers: HashMap<String, HandlerFn>,
    frozen: bool,
}

/// Holds one handler per topic.
///
/// Cloning creates another handle to the same registry. Duplicate
/// registrations are rejected, as are registrations after [`freeze`].
///
/// [`freeze`]: SubscriptionRegistry::freeze
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handler` to `topic`.
    pub fn register<F>(&self, topic: &str, handler: F) -> Result<(), RegistryError>
    where
        F: Fn(&ExecutionContext<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        if topic.is_empty() {
            return Err(RegistryError::EmptyTopic);
        }

        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if state.frozen {
            return Err(RegistryError::Frozen(topic.to_string()));
        }
        if state.handlers.contains_key(topic) {
            return Err(RegistryError::Duplicate(topic.to_string()));
        }
        state.handlers.insert(topic.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Get the handler bound to `topic`.
    pub fn lookup(&self, topic: &str) -> Option<HandlerFn> {
        self.read().handlers.get(topic).cloned()
    }

    /// All registered topics, sorted.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.read().handlers.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Reject further registrations.
    pub fn freeze(&self) {
        self.state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.read().frozen
    }

    pub fn len(&self) -> usize {
        self.read().handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().handlers.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topics())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
