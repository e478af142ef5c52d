//! In-process channel broker.
//!
//! Channels are named `{prefix}.{param}`. A subscription is only granted when
//! the authorizer registered for the prefix accepts `(user_id, param)`; the
//! callback runs on every subscribe attempt.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::task::{Context, Poll};

use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use futures::stream::{Stream, StreamExt};
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{Error, Result};

/// What the core needs from whatever delivers events to clients.
pub trait ChannelBroker: Send + Sync {
    fn publish(&self, channel: &str, event: &str, payload: Value);
}

pub type Authorizer = Arc<dyn Fn(i32, &str) -> bool + Send + Sync>;

/// One delivered event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub channel: String,
    pub event: String,
    pub payload: Value,
}

struct Subscriber {
    user_id: i32,
    sender: UnboundedSender<Envelope>,
}

#[derive(Default)]
pub struct ChannelHub {
    authorizers: RwLock<HashMap<String, Authorizer>>,
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl ChannelHub {
    pub fn new() -> ChannelHub {
        ChannelHub::default()
    }

    /// Register the membership check for every channel named `{prefix}.*`.
    pub fn authorize<F>(&self, prefix: &str, callback: F)
    where
        F: Fn(i32, &str) -> bool + Send + Sync + 'static,
    {
        self.authorizers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(prefix.to_owned(), Arc::new(callback));
    }

    pub fn subscribe(&self, channel: &str, user_id: i32) -> Result<Subscription> {
        let forbidden = || Error::Forbidden(channel.to_owned());

        let (prefix, param) = channel.rsplit_once('.').ok_or_else(forbidden)?;

        // Clone the callback out so the lock is not held while it queries the store.
        let authorizer = self
            .authorizers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(prefix)
            .cloned()
            .ok_or_else(forbidden)?;

        if !(*authorizer)(user_id, param) {
            warn!("User {} was refused a subscription to {}", user_id, channel);
            return Err(forbidden());
        }

        let (sender, receiver) = mpsc::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel.to_owned())
            .or_insert_with(Vec::new)
            .push(Subscriber { user_id, sender });

        info!("User {} subscribed to {}", user_id, channel);

        Ok(Subscription {
            channel: channel.to_owned(),
            user_id,
            receiver,
        })
    }

    /// Live subscribers on `channel`. Dropped subscriptions are counted until
    /// the next publish prunes them.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .map_or(0, Vec::len)
    }
}

impl ChannelBroker for ChannelHub {
    fn publish(&self, channel: &str, event: &str, payload: Value) {
        let envelope = Envelope {
            channel: channel.to_owned(),
            event: event.to_owned(),
            payload,
        };

        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let listeners = match subscribers.get_mut(channel) {
            Some(listeners) => listeners,
            None => {
                debug!("No subscribers on {} for {}", channel, event);
                return;
            }
        };

        listeners.retain(|subscriber| {
            let delivered = subscriber.sender.unbounded_send(envelope.clone()).is_ok();
            if !delivered {
                debug!("Dropping closed subscription of user {} on {}", subscriber.user_id, channel);
            }
            delivered
        });

        debug!("Delivered {} to {} subscriber(s) on {}", event, listeners.len(), channel);

        if listeners.is_empty() {
            subscribers.remove(channel);
        }
    }
}

/// Events on one channel, in publish order.
pub struct Subscription {
    pub channel: String,
    pub user_id: i32,
    receiver: UnboundedReceiver<Envelope>,
}

impl Subscription {
    /// Everything delivered so far, without waiting.
    pub fn drain(&mut self) -> Vec<Envelope> {
        let mut delivered = Vec::new();
        while let Ok(envelope) = self.receiver.try_recv() {
            delivered.push(envelope);
        }
        delivered
    }
}

impl Stream for Subscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Envelope>> {
        self.receiver.poll_next_unpin(cx)
    }
}
