use super::hub::Hub;
use crate::session::SessionId;

/// A hub handle bound to one session: subscriptions are made on behalf of
/// the session and `send_others*` exclude it.
pub struct PubSubClient<M> {
    hub: Hub<M>,
    session: SessionId,
}

impl<M> Clone for PubSubClient<M> {
    fn clone(&self) -> Self {
        Self {
            hub: self.hub.clone(),
            session: self.session,
        }
    }
}

impl<M: Clone + Send + 'static> PubSubClient<M> {
    pub fn new(hub: Hub<M>, session: SessionId) -> Self {
        Self { hub, session }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn hub(&self) -> &Hub<M> {
        &self.hub
    }

    pub fn send_all(&self, message: M) -> usize {
        self.hub.send_all(message)
    }

    pub fn send_all_on_topic(&self, topic: &str, message: M) -> usize {
        self.hub.send_all_on_topic(topic, message)
    }

    pub fn send_others(&self, message: M) -> usize {
        self.hub.send_others(self.session, message)
    }

    pub fn send_others_on_topic(&self, topic: &str, message: M) -> usize {
        self.hub.send_others_on_topic(self.session, topic, message)
    }

    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        self.hub.subscribe(self.session, handler);
    }

    pub fn subscribe_topic<F>(&self, topic: impl Into<String>, handler: F)
    where
        F: Fn(&str, M) + Send + Sync + 'static,
    {
        self.hub.subscribe_topic(self.session, topic, handler);
    }

    pub fn unsubscribe(&self) -> bool {
        self.hub.unsubscribe(self.session)
    }

    pub fn unsubscribe_topic(&self, topic: &str) -> bool {
        self.hub.unsubscribe_topic(self.session, topic)
    }

    pub fn unsubscribe_all(&self) {
        self.hub.unsubscribe_all(self.session);
    }
}
