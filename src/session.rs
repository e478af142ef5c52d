//! The session state machine.
//!
//! A session moves `draft -> active -> completed` and drives its rounds
//! `pending -> active -> completed` in lockstep. Every command below is applied
//! inside one write transaction (see [`TastingService::run`]) and returns the
//! events it produced, all of which embed the committed state of the session.
//!
//! [`TastingService::run`]: crate::publisher::TastingService::run

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_derive::{Deserialize, Serialize};

use super::db::{self, Pool, Query};
use super::error::{Error, Result};
use super::events::{
    ParticipantJoined, ParticipantWithUser, ReviewWithUser, RoundStatusChanged, RoundWithDrink,
    SessionStatusChanged, SessionWithMembers, TastingEvent,
};
use super::invite;
use super::ledger;
use super::models::{
    Drink, NewParticipant, NewRound, NewSession, ParticipantRole, RoundStatus, SessionParticipant,
    SessionStatus, TastingReview, TastingRound, TastingSession, UserSummary,
};
use super::publisher::{Applied, Command};
use super::schema::{drinks, session_participants, tasting_reviews, tasting_rounds, tasting_sessions, users};

pub const MAX_ROUNDS: i32 = 10;
pub const SESSIONS_PER_PAGE: i64 = 10;

/*************************************/
/** Create Session                  **/
/*************************************/

/// Create a draft session, enroll the host and lay out one round per drink.
///
/// Rounds are numbered in the order the drinks were given. Drinks beyond
/// `max_rounds` are dropped without error.
#[derive(Debug, Clone)]
pub struct CreateSession {
    pub host_id: i32,
    pub name: String,
    pub description: Option<String>,
    pub max_rounds: i32,
    pub drink_ids: Vec<i32>,
}

impl CreateSession {
    fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > 255 {
            return Err(Error::validation("name must be between 1 and 255 characters"));
        }
        if !(1..=MAX_ROUNDS).contains(&self.max_rounds) {
            return Err(Error::validation(format!(
                "max_rounds must be between 1 and {}",
                MAX_ROUNDS
            )));
        }
        if self.drink_ids.is_empty() {
            return Err(Error::validation("select at least one drink"));
        }
        Ok(())
    }
}

impl Command for CreateSession {
    type Output = TastingSession;

    fn apply(&self, conn: &mut SqliteConnection) -> Result<Applied<TastingSession>> {
        self.validate()?;
        db::find_user(conn, self.host_id)?;

        let known: HashSet<i32> = drinks::table
            .filter(drinks::id.eq_any(&self.drink_ids))
            .select(drinks::id)
            .load::<i32>(conn)?
            .into_iter()
            .collect();
        if let Some(missing) = self.drink_ids.iter().find(|id| !known.contains(*id)) {
            return Err(Error::validation(format!("drink {} does not exist", missing)));
        }

        let code = invite::generate(conn)?;
        let now = db::now();
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty());

        let session = diesel::insert_into(tasting_sessions::table)
            .values(&NewSession {
                name: self.name.trim(),
                description,
                host_id: self.host_id,
                status: SessionStatus::Draft,
                max_rounds: self.max_rounds,
                current_round: 0,
                invite_code: &code,
                created_at: now,
                updated_at: now,
            })
            .returning(TastingSession::as_returning())
            .get_result(conn)?;

        diesel::insert_into(session_participants::table)
            .values(&NewParticipant {
                session_id: session.id,
                user_id: self.host_id,
                role: ParticipantRole::Host,
                joined_at: now,
            })
            .execute(conn)?;

        let rounds: Vec<NewRound> = self
            .drink_ids
            .iter()
            .take(self.max_rounds as usize)
            .zip(1..)
            .map(|(&drink_id, round_number)| NewRound {
                session_id: session.id,
                drink_id,
                round_number,
                status: RoundStatus::Pending,
            })
            .collect();

        diesel::insert_into(tasting_rounds::table)
            .values(&rounds)
            .execute(conn)?;

        info!(
            "Created session {} ({}) with {} round(s), invite code {}",
            session.id,
            session.name,
            rounds.len(),
            session.invite_code
        );

        Ok(Applied::quiet(session))
    }
}

/*************************************/
/** Join Session                    **/
/*************************************/

#[derive(Debug, Clone)]
pub struct JoinSession {
    pub invite_code: String,
    pub user_id: i32,
}

/// Joining twice is not an error: the existing membership comes back as
/// `AlreadyJoined` and nothing is written or broadcast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "participant", rename_all = "snake_case")]
pub enum JoinOutcome {
    Joined(ParticipantWithUser),
    AlreadyJoined(ParticipantWithUser),
}

impl JoinOutcome {
    pub fn participant(&self) -> &ParticipantWithUser {
        match self {
            JoinOutcome::Joined(p) | JoinOutcome::AlreadyJoined(p) => p,
        }
    }
}

impl Command for JoinSession {
    type Output = JoinOutcome;

    fn apply(&self, conn: &mut SqliteConnection) -> Result<Applied<JoinOutcome>> {
        let code = invite::normalize(&self.invite_code)?;

        let session = tasting_sessions::table
            .filter(tasting_sessions::invite_code.eq(&code))
            .select(TastingSession::as_select())
            .first(conn)
            .optional()?
            .ok_or(Error::NotFound("session"))?;

        if session.status == SessionStatus::Completed {
            return Err(Error::SessionClosed(session.id));
        }

        let user = db::find_user(conn, self.user_id)?;

        if let Some(participant) = db::find_participant(conn, session.id, self.user_id)? {
            debug!("User {} is already in session {}", self.user_id, session.id);
            return Ok(Applied::quiet(JoinOutcome::AlreadyJoined(
                ParticipantWithUser { participant, user },
            )));
        }

        let participant = diesel::insert_into(session_participants::table)
            .values(&NewParticipant {
                session_id: session.id,
                user_id: self.user_id,
                role: ParticipantRole::Participant,
                joined_at: db::now(),
            })
            .returning(SessionParticipant::as_returning())
            .get_result(conn)?;

        info!("User {} joined session {}", self.user_id, session.id);

        let joined = ParticipantWithUser { participant, user };
        let event = TastingEvent::ParticipantJoined(ParticipantJoined::new(session, joined.clone()));

        Ok(Applied::with_events(JoinOutcome::Joined(joined), vec![event]))
    }
}

/*************************************/
/** Start Session                   **/
/*************************************/

/// Activate a draft session and its first round.
#[derive(Debug, Clone)]
pub struct StartSession {
    pub session_id: i32,
    pub actor: i32,
}

impl Command for StartSession {
    type Output = TastingSession;

    fn apply(&self, conn: &mut SqliteConnection) -> Result<Applied<TastingSession>> {
        let session = db::find_session(conn, self.session_id)?;
        db::require_participant(conn, session.id, self.actor)?;

        if session.status != SessionStatus::Draft {
            return Err(Error::invalid_transition(format!(
                "session {} is {}, only a draft session can start",
                session.id, session.status
            )));
        }
        if db::count_participants(conn, session.id)? == 0 {
            return Err(Error::invalid_transition("session has no participants"));
        }

        let now = db::now();
        let started = diesel::update(
            tasting_sessions::table
                .filter(tasting_sessions::id.eq(session.id))
                .filter(tasting_sessions::status.eq(SessionStatus::Draft)),
        )
        .set((
            tasting_sessions::status.eq(SessionStatus::Active),
            tasting_sessions::current_round.eq(1),
            tasting_sessions::starts_at.eq(now),
            tasting_sessions::updated_at.eq(now),
        ))
        .returning(TastingSession::as_returning())
        .get_result(conn)
        .optional()?
        .ok_or_else(|| Error::invalid_transition("session was started concurrently"))?;

        let mut events = vec![TastingEvent::SessionStatusChanged(SessionStatusChanged::new(
            with_members(conn, started.clone())?,
            SessionStatus::Draft,
        ))];

        if let Some(first) = db::find_round_by_number(conn, started.id, 1)? {
            let active = transition_round(conn, &first, RoundStatus::Active, now)?;
            events.push(round_event(conn, active, &started, first.status)?);
        }

        info!("Session {} started", started.id);

        Ok(Applied::with_events(started, events))
    }
}

/*************************************/
/** Advance Round                   **/
/*************************************/

/// Move an active session to its next round, or complete it after the last.
///
/// `from_round` is the round the caller believes is current. When given, the
/// command only succeeds if that is still true, so two racing callers cannot
/// both advance past the same round.
#[derive(Debug, Clone)]
pub struct AdvanceRound {
    pub session_id: i32,
    pub actor: i32,
    pub from_round: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Advanced {
    NextRound {
        session: TastingSession,
        round: Option<TastingRound>,
    },
    Completed {
        session: TastingSession,
    },
}

impl Advanced {
    pub fn session(&self) -> &TastingSession {
        match self {
            Advanced::NextRound { session, .. } | Advanced::Completed { session } => session,
        }
    }
}

impl Command for AdvanceRound {
    type Output = Advanced;

    fn apply(&self, conn: &mut SqliteConnection) -> Result<Applied<Advanced>> {
        let session = db::find_session(conn, self.session_id)?;
        db::require_participant(conn, session.id, self.actor)?;

        if session.status != SessionStatus::Active {
            return Err(Error::invalid_transition(format!(
                "session {} is {}, only an active session can advance",
                session.id, session.status
            )));
        }
        if let Some(expected) = self.from_round {
            if expected != session.current_round {
                return Err(Error::invalid_transition(format!(
                    "session {} is on round {}, not round {}",
                    session.id, session.current_round, expected
                )));
            }
        }

        let now = db::now();

        // Same row, same round: the filters turn a lost race into zero rows.
        let target = tasting_sessions::table
            .filter(tasting_sessions::id.eq(session.id))
            .filter(tasting_sessions::status.eq(SessionStatus::Active))
            .filter(tasting_sessions::current_round.eq(session.current_round));
        let lost_race = || Error::invalid_transition("session was advanced concurrently");

        if session.current_round >= session.max_rounds {
            let completed = diesel::update(target)
                .set((
                    tasting_sessions::status.eq(SessionStatus::Completed),
                    tasting_sessions::ends_at.eq(now),
                    tasting_sessions::updated_at.eq(now),
                ))
                .returning(TastingSession::as_returning())
                .get_result(conn)
                .optional()?
                .ok_or_else(lost_race)?;

            // The last round keeps whatever status it had.
            let event = TastingEvent::SessionStatusChanged(SessionStatusChanged::new(
                with_members(conn, completed.clone())?,
                SessionStatus::Active,
            ));

            info!("Session {} completed", completed.id);

            return Ok(Applied::with_events(
                Advanced::Completed { session: completed },
                vec![event],
            ));
        }

        let advanced = diesel::update(target)
            .set((
                tasting_sessions::current_round.eq(session.current_round + 1),
                tasting_sessions::updated_at.eq(now),
            ))
            .returning(TastingSession::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or_else(lost_race)?;

        let mut events = Vec::new();

        if let Some(previous) = db::find_round_by_number(conn, session.id, session.current_round)? {
            if previous.status.can_become(RoundStatus::Completed) {
                let done = transition_round(conn, &previous, RoundStatus::Completed, now)?;
                events.push(round_event(conn, done, &advanced, previous.status)?);
            }
        }

        let next = match db::find_round_by_number(conn, session.id, advanced.current_round)? {
            Some(next) if next.status.can_become(RoundStatus::Active) => {
                let active = transition_round(conn, &next, RoundStatus::Active, now)?;
                events.push(round_event(conn, active.clone(), &advanced, next.status)?);
                Some(active)
            }
            Some(next) => Some(next),
            None => {
                debug!(
                    "Session {} has no round {}, nothing to activate",
                    advanced.id, advanced.current_round
                );
                None
            }
        };

        info!("Session {} advanced to round {}", advanced.id, advanced.current_round);

        Ok(Applied::with_events(
            Advanced::NextRound {
                session: advanced,
                round: next,
            },
            events,
        ))
    }
}

/// Compare-and-set a round's status, stamping the matching timestamp.
fn transition_round(
    conn: &mut SqliteConnection,
    round: &TastingRound,
    next: RoundStatus,
    now: NaiveDateTime,
) -> Result<TastingRound> {
    if !round.status.can_become(next) {
        return Err(Error::invalid_transition(format!(
            "round {} cannot go from {} to {}",
            round.id, round.status, next
        )));
    }

    let target = tasting_rounds::table
        .filter(tasting_rounds::id.eq(round.id))
        .filter(tasting_rounds::status.eq(round.status));

    let updated = match next {
        RoundStatus::Active => diesel::update(target)
            .set((
                tasting_rounds::status.eq(next),
                tasting_rounds::started_at.eq(now),
            ))
            .returning(TastingRound::as_returning())
            .get_result(conn),
        _ => diesel::update(target)
            .set((
                tasting_rounds::status.eq(next),
                tasting_rounds::completed_at.eq(now),
            ))
            .returning(TastingRound::as_returning())
            .get_result(conn),
    };

    updated.optional()?.ok_or_else(|| {
        Error::invalid_transition(format!("round {} changed concurrently", round.id))
    })
}

fn round_event(
    conn: &mut SqliteConnection,
    round: TastingRound,
    session: &TastingSession,
    previous: RoundStatus,
) -> Result<TastingEvent> {
    let drink = drinks::table
        .find(round.drink_id)
        .select(Drink::as_select())
        .first(conn)?;

    Ok(TastingEvent::RoundStatusChanged(RoundStatusChanged::new(
        RoundWithDrink { round, drink },
        session.clone(),
        previous,
    )))
}

fn with_members(conn: &mut SqliteConnection, session: TastingSession) -> Result<SessionWithMembers> {
    let host = db::find_user(conn, session.host_id)?;
    let participants = db::participants_with_users(conn, session.id)?;

    Ok(SessionWithMembers {
        session,
        host,
        participants,
    })
}

/// Channel authorization: `user_id` may listen on `tasting-session.{param}`
/// only while they are a participant of that session.
pub fn is_channel_member(pool: &Pool, user_id: i32, param: &str) -> bool {
    let session_id = match param.parse::<i32>() {
        Ok(id) => id,
        Err(_) => return false,
    };

    let membership = pool
        .get()
        .map_err(Error::from)
        .and_then(|mut conn| db::find_participant(&mut conn, session_id, user_id));

    match membership {
        Ok(found) => found.is_some(),
        Err(e) => {
            error!("Could not check membership of user {} in session {}: {}", user_id, session_id, e);
            false
        }
    }
}

/*************************************/
/** Read models                     **/
/*************************************/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundDetails {
    #[serde(flatten)]
    pub round: TastingRound,
    pub drink: Drink,
    pub reviews: Vec<ReviewWithUser>,
    pub average_rating: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDetails {
    pub session: SessionWithMembers,
    pub rounds: Vec<RoundDetails>,
    pub current_round: Option<RoundDetails>,
    pub membership: Option<SessionParticipant>,
    pub can_manage: bool,
}

/// Rounds of a session in order, each with drink, reviews and average.
fn round_details(conn: &mut SqliteConnection, session_id: i32) -> Result<Vec<RoundDetails>> {
    let rounds = tasting_rounds::table
        .inner_join(drinks::table)
        .filter(tasting_rounds::session_id.eq(session_id))
        .order(tasting_rounds::round_number.asc())
        .select((TastingRound::as_select(), Drink::as_select()))
        .load::<(TastingRound, Drink)>(conn)?;

    let round_ids: Vec<i32> = rounds.iter().map(|(round, _)| round.id).collect();
    let mut reviews: BTreeMap<i32, Vec<ReviewWithUser>> = BTreeMap::new();
    for (review, user) in tasting_reviews::table
        .inner_join(users::table)
        .filter(tasting_reviews::round_id.eq_any(&round_ids))
        .order(tasting_reviews::id.asc())
        .select((TastingReview::as_select(), UserSummary::as_select()))
        .load::<(TastingReview, UserSummary)>(conn)?
    {
        reviews
            .entry(review.round_id)
            .or_default()
            .push(ReviewWithUser { review, user });
    }

    Ok(rounds
        .into_iter()
        .map(|(round, drink)| {
            let reviews = reviews.remove(&round.id).unwrap_or_default();
            let average_rating = ledger::average_rating(reviews.iter().map(|r| r.review.rating));
            RoundDetails {
                round,
                drink,
                reviews,
                average_rating,
            }
        })
        .collect())
}

/// Everything a client needs to render a session for `viewer`.
#[derive(Debug, Clone)]
pub struct ShowSession {
    pub session_id: i32,
    pub viewer: i32,
}

impl Query for ShowSession {
    type Item = SessionDetails;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<SessionDetails> {
        let session = db::find_session(conn, self.session_id)?;
        let membership = db::find_participant(conn, session.id, self.viewer)?;
        let can_manage = session.host_id == self.viewer
            || membership.as_ref().map_or(false, SessionParticipant::is_host);

        let rounds = round_details(conn, session.id)?;
        let current_round = rounds
            .iter()
            .find(|r| r.round.round_number == session.current_round)
            .cloned();

        Ok(SessionDetails {
            session: with_members(conn, session)?,
            rounds,
            current_round,
            membership,
            can_manage,
        })
    }
}

/// Sessions `user_id` hosts or takes part in, newest first.
#[derive(Debug, Clone)]
pub struct ListSessions {
    pub user_id: i32,
    pub page: i64,
}

impl Query for ListSessions {
    type Item = Vec<TastingSession>;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<Vec<TastingSession>> {
        let joined = session_participants::table
            .filter(session_participants::user_id.eq(self.user_id))
            .select(session_participants::session_id);

        let offset = db::page_offset(SESSIONS_PER_PAGE, self.page)?;

        Ok(tasting_sessions::table
            .filter(
                tasting_sessions::host_id
                    .eq(self.user_id)
                    .or(tasting_sessions::id.eq_any(joined)),
            )
            .order((tasting_sessions::created_at.desc(), tasting_sessions::id.desc()))
            .limit(SESSIONS_PER_PAGE)
            .offset(offset)
            .select(TastingSession::as_select())
            .load(conn)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundResult {
    pub round_number: i32,
    pub drink: Drink,
    pub average_rating: f64,
    pub total_reviews: usize,
    pub reviews: Vec<ReviewWithUser>,
}

/// Final standings of a completed session, best-rated round first.
#[derive(Debug, Clone)]
pub struct SessionResults {
    pub session_id: i32,
}

impl Query for SessionResults {
    type Item = Vec<RoundResult>;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<Vec<RoundResult>> {
        let session = db::find_session(conn, self.session_id)?;
        if session.status != SessionStatus::Completed {
            return Err(Error::invalid_transition(format!(
                "session {} is {}, results are available once it is completed",
                session.id, session.status
            )));
        }

        let mut results: Vec<RoundResult> = round_details(conn, session.id)?
            .into_iter()
            .map(|details| RoundResult {
                round_number: details.round.round_number,
                drink: details.drink,
                average_rating: details.average_rating,
                total_reviews: details.reviews.len(),
                reviews: details.reviews,
            })
            .collect();

        // Rounds arrive ordered by number, and the sort is stable.
        results.sort_by(|a, b| b.average_rating.total_cmp(&a.average_rating));

        Ok(results)
    }
}

#[cfg(test)]
mod tests;
