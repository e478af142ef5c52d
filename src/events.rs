//! Realtime events broadcast on a session's channel.
//!
//! Every event is a fixed record built by one of the constructors below and
//! travels as `(channel, name, json payload)`. The same types decode the wire
//! form on the receiving side, see [`crate::reconciler`].

use derive_more::Display;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;

use super::models::{
    Drink, RoundStatus, SessionParticipant, SessionStatus, TastingReview, TastingRound,
    TastingSession, UserSummary,
};

pub const CHANNEL_PREFIX: &str = "tasting-session";

pub const PARTICIPANT_JOINED: &str = "participant.joined";
pub const REVIEW_SUBMITTED: &str = "review.submitted";
pub const ROUND_STATUS_CHANGED: &str = "round.status.changed";
pub const SESSION_STATUS_CHANGED: &str = "session.status.changed";

/// `tasting-session.{id}`
pub fn channel_name(session_id: i32) -> String {
    format!("{}.{}", CHANNEL_PREFIX, session_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantWithUser {
    #[serde(flatten)]
    pub participant: SessionParticipant,
    pub user: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewWithUser {
    #[serde(flatten)]
    pub review: TastingReview,
    pub user: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundWithDrink {
    #[serde(flatten)]
    pub round: TastingRound,
    pub drink: Drink,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundWithAverage {
    #[serde(flatten)]
    pub round: TastingRound,
    pub average_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionWithMembers {
    #[serde(flatten)]
    pub session: TastingSession,
    pub host: UserSummary,
    pub participants: Vec<ParticipantWithUser>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantJoined {
    pub session: TastingSession,
    pub participant: ParticipantWithUser,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSubmitted {
    pub review: ReviewWithUser,
    pub round: RoundWithAverage,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundStatusChanged {
    pub round: RoundWithDrink,
    pub session: TastingSession,
    #[serde(rename = "previousStatus")]
    pub previous_status: RoundStatus,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatusChanged {
    pub session: SessionWithMembers,
    #[serde(rename = "previousStatus")]
    pub previous_status: SessionStatus,
    pub message: String,
}

impl ParticipantJoined {
    pub fn new(session: TastingSession, participant: ParticipantWithUser) -> Self {
        let message = format!("{} joined the tasting!", participant.user.name);
        ParticipantJoined {
            session,
            participant,
            message,
        }
    }
}

impl ReviewSubmitted {
    pub fn new(review: ReviewWithUser, round: RoundWithAverage) -> Self {
        let message = format!("{} submitted a review!", review.user.name);
        ReviewSubmitted {
            review,
            round,
            message,
        }
    }
}

impl RoundStatusChanged {
    pub fn new(round: RoundWithDrink, session: TastingSession, previous_status: RoundStatus) -> Self {
        let message = round_message(round.round.round_number, round.round.status);
        RoundStatusChanged {
            round,
            session,
            previous_status,
            message,
        }
    }
}

impl SessionStatusChanged {
    pub fn new(session: SessionWithMembers, previous_status: SessionStatus) -> Self {
        let message = session_message(session.session.status);
        SessionStatusChanged {
            session,
            previous_status,
            message,
        }
    }
}

pub fn round_message(round_number: i32, status: RoundStatus) -> String {
    match status {
        RoundStatus::Active => format!("Round {} has started!", round_number),
        RoundStatus::Completed => format!("Round {} is finished!", round_number),
        _ => "Round status changed".to_owned(),
    }
}

pub fn session_message(status: SessionStatus) -> String {
    match status {
        SessionStatus::Active => "The tasting has started!".to_owned(),
        SessionStatus::Completed => "The tasting is finished! Check out the results.".to_owned(),
        _ => "Tasting status changed".to_owned(),
    }
}

/// How urgently the broker must hand an event to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// May sit in a queue for a moment.
    Queued,
    /// Must be enqueued before the command returns.
    Immediate,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TastingEvent {
    ParticipantJoined(ParticipantJoined),
    ReviewSubmitted(ReviewSubmitted),
    RoundStatusChanged(RoundStatusChanged),
    SessionStatusChanged(SessionStatusChanged),
}

#[derive(Debug, Display)]
pub enum WireError {
    #[display(fmt = "unknown event `{}`", _0)]
    UnknownEvent(String),

    #[display(fmt = "malformed `{}` payload: {}", _0, _1)]
    Malformed(String, serde_json::Error),
}

impl std::error::Error for WireError {}

impl TastingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TastingEvent::ParticipantJoined(_) => PARTICIPANT_JOINED,
            TastingEvent::ReviewSubmitted(_) => REVIEW_SUBMITTED,
            TastingEvent::RoundStatusChanged(_) => ROUND_STATUS_CHANGED,
            TastingEvent::SessionStatusChanged(_) => SESSION_STATUS_CHANGED,
        }
    }

    pub fn session_id(&self) -> i32 {
        match self {
            TastingEvent::ParticipantJoined(e) => e.session.id,
            TastingEvent::ReviewSubmitted(e) => e.round.round.session_id,
            TastingEvent::RoundStatusChanged(e) => e.session.id,
            TastingEvent::SessionStatusChanged(e) => e.session.session.id,
        }
    }

    pub fn channel(&self) -> String {
        channel_name(self.session_id())
    }

    pub fn delivery(&self) -> Delivery {
        match self {
            TastingEvent::ParticipantJoined(_) => Delivery::Queued,
            _ => Delivery::Immediate,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            TastingEvent::ParticipantJoined(e) => &e.message,
            TastingEvent::ReviewSubmitted(e) => &e.message,
            TastingEvent::RoundStatusChanged(e) => &e.message,
            TastingEvent::SessionStatusChanged(e) => &e.message,
        }
    }

    pub fn to_payload(&self) -> serde_json::Result<Value> {
        match self {
            TastingEvent::ParticipantJoined(e) => serde_json::to_value(e),
            TastingEvent::ReviewSubmitted(e) => serde_json::to_value(e),
            TastingEvent::RoundStatusChanged(e) => serde_json::to_value(e),
            TastingEvent::SessionStatusChanged(e) => serde_json::to_value(e),
        }
    }

    /// Decode an event received as `(name, payload)`.
    pub fn from_wire(name: &str, payload: Value) -> Result<TastingEvent, WireError> {
        let malformed = |e| WireError::Malformed(name.to_owned(), e);

        match name {
            PARTICIPANT_JOINED => serde_json::from_value(payload)
                .map(TastingEvent::ParticipantJoined)
                .map_err(malformed),
            REVIEW_SUBMITTED => serde_json::from_value(payload)
                .map(TastingEvent::ReviewSubmitted)
                .map_err(malformed),
            ROUND_STATUS_CHANGED => serde_json::from_value(payload)
                .map(TastingEvent::RoundStatusChanged)
                .map_err(malformed),
            SESSION_STATUS_CHANGED => serde_json::from_value(payload)
                .map(TastingEvent::SessionStatusChanged)
                .map_err(malformed),
            other => Err(WireError::UnknownEvent(other.to_owned())),
        }
    }
}
