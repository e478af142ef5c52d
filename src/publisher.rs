use std::sync::Arc;

use actix_web::web;
use diesel::sqlite::SqliteConnection;

use super::broker::ChannelBroker;
use super::db::{Pool, Query};
use super::error::Result;
use super::events::TastingEvent;

/// The result of a state-changing command together with the events it
/// produced. Events are only published once the transaction has committed.
#[derive(Debug)]
pub struct Applied<T> {
    pub output: T,
    pub events: Vec<TastingEvent>,
}

impl<T> Applied<T> {
    pub fn quiet(output: T) -> Applied<T> {
        Applied {
            output,
            events: Vec::new(),
        }
    }

    pub fn with_events(output: T, events: Vec<TastingEvent>) -> Applied<T> {
        Applied { output, events }
    }
}

/// A state-changing operation, applied inside a single write transaction.
pub trait Command {
    type Output;

    fn apply(&self, conn: &mut SqliteConnection) -> Result<Applied<Self::Output>>;
}

#[derive(Clone)]
pub struct EventPublisher {
    broker: Arc<dyn ChannelBroker>,
}

impl EventPublisher {
    pub fn new(broker: Arc<dyn ChannelBroker>) -> EventPublisher {
        EventPublisher { broker }
    }

    /// Hand the event to the broker. Encoding failures are logged, never raised.
    pub fn publish(&self, event: &TastingEvent) {
        match event.to_payload() {
            Ok(payload) => {
                debug!(
                    "Publishing {} on {} ({:?})",
                    event.name(),
                    event.channel(),
                    event.delivery()
                );
                self.broker.publish(&event.channel(), event.name(), payload);
            }
            Err(e) => error!("Could not encode {} for {}: {}", event.name(), event.channel(), e),
        }
    }
}

/// Runs commands against the store and fans out their events.
#[derive(Clone)]
pub struct TastingService {
    pool: Pool,
    publisher: EventPublisher,
}

impl TastingService {
    pub fn new(pool: Pool, broker: Arc<dyn ChannelBroker>) -> TastingService {
        TastingService {
            pool,
            publisher: EventPublisher::new(broker),
        }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Apply `command` atomically, then publish what it emitted in order.
    ///
    /// The transaction takes SQLite's write lock up front, so two commands on
    /// the same session never interleave their reads and writes.
    pub fn run<C: Command>(&self, command: &C) -> Result<C::Output> {
        let mut conn = self.pool.get()?;

        let applied = match conn.immediate_transaction(|conn| command.apply(conn)) {
            Ok(applied) => applied,
            Err(e) => {
                if e.is_rejection() {
                    warn!("Command rejected: {}", e);
                } else {
                    error!("Command failed: {}", e);
                }
                return Err(e);
            }
        };

        for event in &applied.events {
            self.publisher.publish(event);
        }

        Ok(applied.output)
    }

    pub fn query<Q: Query>(&self, query: &Q) -> Result<Q::Item> {
        let mut conn = self.pool.get()?;
        query.execute(&mut conn)
    }

    /// [`run`](Self::run) on the blocking thread pool.
    pub async fn dispatch<C>(&self, command: C) -> Result<C::Output>
    where
        C: Command + Send + 'static,
        C::Output: Send + 'static,
    {
        let service = self.clone();

        web::block(move || service.run(&command)).await?
    }

    /// [`query`](Self::query) on the blocking thread pool.
    pub async fn fetch<Q>(&self, query: Q) -> Result<Q::Item>
    where
        Q: Query + Send + 'static,
        Q::Item: Send + 'static,
    {
        let service = self.clone();

        web::block(move || service.query(&query)).await?
    }
}
