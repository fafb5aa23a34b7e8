use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::session::SessionId;

/// Handler for global (topic-less) messages.
pub type Handler<M> = Arc<dyn Fn(M) + Send + Sync>;

/// Handler for topic messages, called with the topic and the message.
pub type TopicHandler<M> = Arc<dyn Fn(&str, M) + Send + Sync>;

struct Registry<M> {
    global: HashMap<SessionId, Handler<M>>,
    topics: HashMap<String, HashMap<SessionId, TopicHandler<M>>>,
    session_topics: HashMap<SessionId, HashSet<String>>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            global: HashMap::new(),
            topics: HashMap::new(),
            session_topics: HashMap::new(),
        }
    }
}

impl<M> Registry<M> {
    fn remove_topic(&mut self, session: SessionId, topic: &str) -> bool {
        let removed = match self.topics.get_mut(topic) {
            Some(subscribers) => {
                let removed = subscribers.remove(&session).is_some();
                if subscribers.is_empty() {
                    self.topics.remove(topic);
                }
                removed
            }
            None => false,
        };
        if let Some(topics) = self.session_topics.get_mut(&session) {
            topics.remove(topic);
            if topics.is_empty() {
                self.session_topics.remove(&session);
            }
        }
        removed
    }
}

/// Fan-out of messages to per-session and per-topic subscribers.
///
/// A session holds at most one global handler and one handler per topic;
/// subscribing again replaces the previous handler. Each delivery runs on its
/// own blocking task, so a slow or panicking handler never holds up the
/// publisher or other subscribers.
///
/// Cloning a `Hub` yields another handle to the same subscriber tables.
pub struct Hub<M> {
    registry: Arc<RwLock<Registry<M>>>,
}

impl<M> Clone for Hub<M> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M> Default for Hub<M> {
    fn default() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }
}

impl<M> fmt::Debug for Hub<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("Hub")
            .field("global", &registry.global.len())
            .field("topics", &registry.topics.len())
            .finish()
    }
}

impl<M: Clone + Send + 'static> Hub<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, session: SessionId, handler: F)
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        tracing::debug!(session = %session, "pubsub.subscribe");
        let replaced = self
            .registry
            .write()
            .global
            .insert(session, Arc::new(handler))
            .is_some();
        if replaced {
            tracing::trace!(session = %session, "Replaced global handler");
        }
    }

    pub fn subscribe_topic<F>(&self, session: SessionId, topic: impl Into<String>, handler: F)
    where
        F: Fn(&str, M) + Send + Sync + 'static,
    {
        let topic = topic.into();
        tracing::debug!(session = %session, topic = %topic, "pubsub.subscribe_topic");
        let mut registry = self.registry.write();
        registry
            .topics
            .entry(topic.clone())
            .or_default()
            .insert(session, Arc::new(handler));
        registry
            .session_topics
            .entry(session)
            .or_default()
            .insert(topic);
    }

    /// Removes the session's global handler. Returns `false` if it had none.
    pub fn unsubscribe(&self, session: SessionId) -> bool {
        tracing::debug!(session = %session, "pubsub.unsubscribe");
        self.registry.write().global.remove(&session).is_some()
    }

    pub fn unsubscribe_topic(&self, session: SessionId, topic: &str) -> bool {
        tracing::debug!(session = %session, topic, "pubsub.unsubscribe_topic");
        self.registry.write().remove_topic(session, topic)
    }

    /// Removes every handler the session holds.
    pub fn unsubscribe_all(&self, session: SessionId) {
        tracing::debug!(session = %session, "pubsub.unsubscribe_all");
        let mut registry = self.registry.write();
        registry.global.remove(&session);
        let topics: Vec<String> = registry
            .session_topics
            .get(&session)
            .map(|t| t.iter().cloned().collect())
            .unwrap_or_default();
        for topic in topics {
            registry.remove_topic(session, &topic);
        }
    }

    /// Delivers to every global subscriber. Returns the number of handlers
    /// scheduled.
    pub fn send_all(&self, message: M) -> usize {
        tracing::debug!("pubsub.send_all");
        let handlers = self.global_handlers(None);
        self.dispatch_global(handlers, message)
    }

    pub fn send_others(&self, origin: SessionId, message: M) -> usize {
        tracing::debug!(origin = %origin, "pubsub.send_others");
        let handlers = self.global_handlers(Some(origin));
        self.dispatch_global(handlers, message)
    }

    pub fn send_all_on_topic(&self, topic: &str, message: M) -> usize {
        tracing::debug!(topic, "pubsub.send_all_on_topic");
        let handlers = self.topic_handlers(topic, None);
        self.dispatch_topic(handlers, topic, message)
    }

    pub fn send_others_on_topic(&self, origin: SessionId, topic: &str, message: M) -> usize {
        tracing::debug!(origin = %origin, topic, "pubsub.send_others_on_topic");
        let handlers = self.topic_handlers(topic, Some(origin));
        self.dispatch_topic(handlers, topic, message)
    }

    pub fn session_count(&self) -> usize {
        self.registry.read().global.len()
    }

    pub fn topic_subscriber_count(&self, topic: &str) -> usize {
        self.registry
            .read()
            .topics
            .get(topic)
            .map_or(0, HashMap::len)
    }

    fn global_handlers(&self, except: Option<SessionId>) -> Vec<(SessionId, Handler<M>)> {
        self.registry
            .read()
            .global
            .iter()
            .filter(|(session, _)| Some(**session) != except)
            .map(|(session, handler)| (*session, Arc::clone(handler)))
            .collect()
    }

    fn topic_handlers(
        &self,
        topic: &str,
        except: Option<SessionId>,
    ) -> Vec<(SessionId, TopicHandler<M>)> {
        self.registry
            .read()
            .topics
            .get(topic)
            .map(|subscribers| {
                subscribers
                    .iter()
                    .filter(|(session, _)| Some(**session) != except)
                    .map(|(session, handler)| (*session, Arc::clone(handler)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn dispatch_global(&self, handlers: Vec<(SessionId, Handler<M>)>, message: M) -> usize {
        let count = handlers.len();
        for (session, handler) in handlers {
            let message = message.clone();
            spawn_delivery(move || {
                if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                    tracing::error!(session = %session, "PubSub handler panicked");
                }
            });
        }
        count
    }

    fn dispatch_topic(
        &self,
        handlers: Vec<(SessionId, TopicHandler<M>)>,
        topic: &str,
        message: M,
    ) -> usize {
        let count = handlers.len();
        for (session, handler) in handlers {
            let message = message.clone();
            let topic = topic.to_string();
            spawn_delivery(move || {
                if catch_unwind(AssertUnwindSafe(|| handler(&topic, message))).is_err() {
                    tracing::error!(session = %session, topic = %topic, "PubSub topic handler panicked");
                }
            });
        }
        count
    }
}

/// Runs `f` on the tokio blocking pool, or on a fresh thread outside a runtime.
fn spawn_delivery<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn_blocking(f);
        }
        Err(_) => {
            std::thread::spawn(f);
        }
    }
}
