//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tempfile::TempDir;

use crate::broker::{ChannelBroker, Envelope};
use crate::db::{self, Connection, Pool, Query};
use crate::drinks::{CreateDrink, DrinkForm};
use crate::models::DrinkType;
use crate::publisher::TastingService;

/// A fresh in-memory store. One connection, so every checkout sees the same
/// database.
pub fn pool() -> Pool {
    db::connect(":memory:", 1).expect("in-memory database")
}

/// A database file shared by `size` connections, for tests that need
/// transactions to contend. The file lives as long as the `TempDir`.
pub fn file_pool(size: u32) -> (TempDir, Pool) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("tasting.db");
    let pool = db::connect(&path.to_string_lossy(), size).expect("file database");
    (dir, pool)
}

/// Remembers everything published, in order.
#[derive(Default)]
pub struct RecordingBroker {
    published: Mutex<Vec<Envelope>>,
}

impl RecordingBroker {
    pub fn published(&self) -> Vec<Envelope> {
        self.published.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.published().into_iter().map(|e| e.event).collect()
    }

    pub fn clear(&self) {
        self.published.lock().unwrap().clear();
    }
}

impl ChannelBroker for RecordingBroker {
    fn publish(&self, channel: &str, event: &str, payload: Value) {
        self.published.lock().unwrap().push(Envelope {
            channel: channel.to_owned(),
            event: event.to_owned(),
            payload,
        });
    }
}

pub struct Fixture {
    pub service: TastingService,
    pub broker: Arc<RecordingBroker>,
    _store: Option<TempDir>,
}

pub fn fixture() -> Fixture {
    fixture_on(pool(), None)
}

/// A fixture over a file-backed pool of `size` connections.
pub fn shared_fixture(size: u32) -> Fixture {
    let (dir, pool) = file_pool(size);
    fixture_on(pool, Some(dir))
}

fn fixture_on(pool: Pool, store: Option<TempDir>) -> Fixture {
    let broker = Arc::new(RecordingBroker::default());
    Fixture {
        service: TastingService::new(pool, broker.clone()),
        broker,
        _store: store,
    }
}

impl Fixture {
    pub fn conn(&self) -> Connection {
        self.service.pool().get().unwrap()
    }

    pub fn user(&self, name: &str) -> i32 {
        db::CreateUser { name: name.into() }
            .execute(&mut self.conn())
            .unwrap()
            .id
    }

    pub fn drink(&self, name: &str) -> i32 {
        CreateDrink(DrinkForm {
            name: name.into(),
            description: None,
            drink_type: DrinkType::Beer,
            alcohol_percentage: Some(5.0),
            brand: None,
            origin: None,
            image_url: None,
        })
        .execute(&mut self.conn())
        .unwrap()
        .id
    }
}

/// Plain records for tests that never touch the store.
pub mod sample {
    use chrono::{NaiveDate, NaiveDateTime};

    use crate::events::{ParticipantWithUser, ReviewWithUser};
    use crate::models::{
        Drink, DrinkType, ParticipantRole, RoundStatus, SessionParticipant, SessionStatus, Tags,
        TastingReview, TastingRound, TastingSession, UserSummary,
    };
    use crate::session::RoundDetails;

    pub fn time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 1)
            .and_then(|d| d.and_hms_opt(20, 0, 0))
            .unwrap()
    }

    pub fn user(id: i32, name: &str) -> UserSummary {
        UserSummary {
            id,
            name: name.into(),
        }
    }

    /// Session 1, hosted by user 1.
    pub fn session(status: SessionStatus) -> TastingSession {
        TastingSession {
            id: 1,
            name: "Friday tasting".into(),
            description: None,
            host_id: 1,
            status,
            max_rounds: 3,
            current_round: if status == SessionStatus::Draft { 0 } else { 1 },
            invite_code: "ABCD1234".into(),
            starts_at: None,
            ends_at: None,
            created_at: time(),
            updated_at: time(),
        }
    }

    /// Round `number` of session 1. Its id is its number.
    pub fn round(number: i32, status: RoundStatus) -> TastingRound {
        TastingRound {
            id: number,
            session_id: 1,
            drink_id: 1,
            round_number: number,
            status,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn drink() -> Drink {
        Drink {
            id: 1,
            name: "Westmalle Tripel".into(),
            description: None,
            drink_type: DrinkType::Beer,
            alcohol_percentage: Some(9.5),
            brand: Some("Westmalle".into()),
            origin: Some("BE".into()),
            image_url: None,
            created_at: time(),
            updated_at: time(),
        }
    }

    pub fn details(round: TastingRound) -> RoundDetails {
        RoundDetails {
            round,
            drink: drink(),
            reviews: Vec::new(),
            average_rating: 0.0,
        }
    }

    /// Membership of `user_id` in session 1. The participant id is the user id.
    pub fn participant(user_id: i32, name: &str) -> ParticipantWithUser {
        ParticipantWithUser {
            participant: SessionParticipant {
                id: user_id,
                session_id: 1,
                user_id,
                role: ParticipantRole::Participant,
                joined_at: time(),
            },
            user: user(user_id, name),
        }
    }

    /// A review of round 1 by user 2.
    pub fn review(id: i32, rating: i32) -> ReviewWithUser {
        ReviewWithUser {
            review: TastingReview {
                id,
                round_id: 1,
                user_id: 2,
                rating,
                review: Some("Lovely".into()),
                tags: ["fruity", "sweet"].iter().map(|t| t.to_string()).collect::<Tags>(),
                created_at: time(),
                updated_at: time(),
            },
            user: user(2, "Robin"),
        }
    }
}
