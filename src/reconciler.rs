//! Client-side merge of channel events into a locally held session view.
//!
//! Applying the same event twice, or an older event after a newer one, leaves
//! the view unchanged: participants and reviews are keyed by id and statuses
//! never move backwards.

use std::time::Duration;

use serde_json::Value;

use super::events::{
    ParticipantJoined, ParticipantWithUser, ReviewSubmitted, RoundStatusChanged,
    SessionStatusChanged, TastingEvent, WireError,
};
use super::models::{RoundStatus, SessionStatus, TastingSession, UserSummary};
use super::session::{RoundDetails, SessionDetails};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Pause between seeing the session complete and switching to results.
    pub results_delay: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        ReconcilerConfig {
            results_delay: Duration::from_secs(2),
        }
    }
}

/// What the client should do after an event was merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    None,
    ShowResults { after: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub session: TastingSession,
    pub host: UserSummary,
    pub participants: Vec<ParticipantWithUser>,
    pub rounds: Vec<RoundDetails>,
    /// The round the client is focused on.
    pub current_round: Option<RoundDetails>,
    config: ReconcilerConfig,
}

impl SessionView {
    pub fn new(details: SessionDetails, config: ReconcilerConfig) -> SessionView {
        SessionView {
            session: details.session.session,
            host: details.session.host,
            participants: details.session.participants,
            rounds: details.rounds,
            current_round: details.current_round,
            config,
        }
    }

    /// Decode `(name, payload)` off the wire and merge it.
    pub fn apply_wire(&mut self, name: &str, payload: Value) -> Result<Reaction, WireError> {
        let event = TastingEvent::from_wire(name, payload)?;
        Ok(self.apply(&event))
    }

    pub fn apply(&mut self, event: &TastingEvent) -> Reaction {
        if event.session_id() != self.session.id {
            debug!(
                "Ignoring {} for session {} in view of session {}",
                event.name(),
                event.session_id(),
                self.session.id
            );
            return Reaction::None;
        }

        match event {
            TastingEvent::ParticipantJoined(e) => self.participant_joined(e),
            TastingEvent::ReviewSubmitted(e) => self.review_submitted(e),
            TastingEvent::RoundStatusChanged(e) => self.round_status_changed(e),
            TastingEvent::SessionStatusChanged(e) => return self.session_status_changed(e),
        }

        Reaction::None
    }

    fn participant_joined(&mut self, event: &ParticipantJoined) {
        let id = event.participant.participant.id;
        if self.participants.iter().all(|p| p.participant.id != id) {
            self.participants.push(event.participant.clone());
        }
    }

    fn review_submitted(&mut self, event: &ReviewSubmitted) {
        let round_id = event.round.round.id;
        let merge = |round: &mut RoundDetails| {
            if round.round.id != round_id {
                return;
            }
            match round
                .reviews
                .iter_mut()
                .find(|r| r.review.id == event.review.review.id)
            {
                Some(existing) => *existing = event.review.clone(),
                None => round.reviews.push(event.review.clone()),
            }
            // The server's average is authoritative.
            round.average_rating = event.round.average_rating;
        };

        for round in self.rounds.iter_mut() {
            merge(round);
        }
        if let Some(current) = self.current_round.as_mut() {
            merge(current);
        }
    }

    fn round_status_changed(&mut self, event: &RoundStatusChanged) {
        let incoming = &event.round;

        match self.rounds.iter_mut().find(|r| r.round.id == incoming.round.id) {
            Some(local) if local.round.status.rank() > incoming.round.status.rank() => {
                debug!("Ignoring stale status for round {}", incoming.round.id);
                return;
            }
            Some(local) => {
                local.round = incoming.round.clone();
                local.drink = incoming.drink.clone();
            }
            None => {
                self.rounds.push(RoundDetails {
                    round: incoming.round.clone(),
                    drink: incoming.drink.clone(),
                    reviews: Vec::new(),
                    average_rating: 0.0,
                });
                self.rounds.sort_by_key(|r| r.round.round_number);
            }
        }

        let snapshot = &event.session;
        if snapshot.status.rank() >= self.session.status.rank()
            && snapshot.current_round >= self.session.current_round
        {
            self.session.current_round = snapshot.current_round;
            self.session.status = snapshot.status;
        }

        let updated = self
            .rounds
            .iter()
            .find(|r| r.round.id == incoming.round.id)
            .cloned();
        let focused_here = self
            .current_round
            .as_ref()
            .map_or(false, |c| c.round.id == incoming.round.id);

        if incoming.round.status == RoundStatus::Active || focused_here {
            self.current_round = updated;
        }
    }

    fn session_status_changed(&mut self, event: &SessionStatusChanged) -> Reaction {
        let status = event.session.session.status;
        if status.rank() <= self.session.status.rank() {
            return Reaction::None;
        }

        self.session.status = status;

        if status == SessionStatus::Completed {
            Reaction::ShowResults {
                after: self.config.results_delay,
            }
        } else {
            Reaction::None
        }
    }
}
