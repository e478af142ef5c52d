use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use super::error::{Error, Result};
use super::events::ParticipantWithUser;
use super::models::{self, SessionParticipant, TastingRound, TastingSession, UserSummary};
use super::schema::{session_participants, tasting_rounds, tasting_sessions, users};

pub type Pool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type Connection = r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Per-connection pragmas. SQLite leaves foreign keys off unless asked.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> ::std::result::Result<(), r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;",
            self.busy_timeout.as_millis()
        ))
        .map_err(r2d2::Error::QueryError)
    }
}

/// Open a connection pool on `database_url` and bring the schema up to date.
pub fn connect(database_url: &str, pool_size: u32) -> Result<Pool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(pool_size)
        .connection_customizer(Box::new(ConnectionOptions {
            busy_timeout: Duration::from_secs(5),
        }))
        .build(manager)?;

    let mut conn = pool.get()?;
    run_migrations(&mut conn)?;

    Ok(pool)
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Migration(e.to_string()))?;

    for version in applied {
        info!("Applied migration {}", version);
    }

    Ok(())
}

/// Timestamps are stored as naive UTC.
pub fn now() -> NaiveDateTime {
    Utc::now().naive_utc()
}

/// Rows to skip for a 1-based `page`. Pages below 1 read as the first.
pub fn page_offset(per_page: i64, page: i64) -> Result<i64> {
    per_page
        .checked_mul(page.max(1) - 1)
        .ok_or_else(|| Error::validation(format!("page {} is out of range", page)))
}

pub trait Query {
    type Item;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<Self::Item>;
}

/*************************************/
/** Lookups shared by the commands  **/
/*************************************/

pub fn find_session(conn: &mut SqliteConnection, session_id: i32) -> Result<TastingSession> {
    tasting_sessions::table
        .find(session_id)
        .select(TastingSession::as_select())
        .first(conn)
        .optional()?
        .ok_or(Error::NotFound("session"))
}

pub fn find_round(conn: &mut SqliteConnection, round_id: i32) -> Result<TastingRound> {
    tasting_rounds::table
        .find(round_id)
        .select(TastingRound::as_select())
        .first(conn)
        .optional()?
        .ok_or(Error::NotFound("round"))
}

pub fn find_round_by_number(
    conn: &mut SqliteConnection,
    session_id: i32,
    round_number: i32,
) -> Result<Option<TastingRound>> {
    Ok(tasting_rounds::table
        .filter(tasting_rounds::session_id.eq(session_id))
        .filter(tasting_rounds::round_number.eq(round_number))
        .select(TastingRound::as_select())
        .first(conn)
        .optional()?)
}

pub fn find_user(conn: &mut SqliteConnection, user_id: i32) -> Result<UserSummary> {
    users::table
        .find(user_id)
        .select(UserSummary::as_select())
        .first(conn)
        .optional()?
        .ok_or(Error::NotFound("user"))
}

pub fn find_participant(
    conn: &mut SqliteConnection,
    session_id: i32,
    user_id: i32,
) -> Result<Option<SessionParticipant>> {
    Ok(session_participants::table
        .filter(session_participants::session_id.eq(session_id))
        .filter(session_participants::user_id.eq(user_id))
        .select(SessionParticipant::as_select())
        .first(conn)
        .optional()?)
}

/// The membership of `user_id`, or `NotAParticipant`.
pub fn require_participant(
    conn: &mut SqliteConnection,
    session_id: i32,
    user_id: i32,
) -> Result<SessionParticipant> {
    find_participant(conn, session_id, user_id)?.ok_or(Error::NotAParticipant {
        session_id,
        user_id,
    })
}

pub fn count_participants(conn: &mut SqliteConnection, session_id: i32) -> Result<i64> {
    Ok(session_participants::table
        .filter(session_participants::session_id.eq(session_id))
        .count()
        .get_result(conn)?)
}

/// Participants of a session in join order, each with their user.
pub fn participants_with_users(
    conn: &mut SqliteConnection,
    session_id: i32,
) -> Result<Vec<ParticipantWithUser>> {
    let rows = session_participants::table
        .inner_join(users::table)
        .filter(session_participants::session_id.eq(session_id))
        .order((
            session_participants::joined_at.asc(),
            session_participants::id.asc(),
        ))
        .select((SessionParticipant::as_select(), UserSummary::as_select()))
        .load::<(SessionParticipant, UserSummary)>(conn)?;

    Ok(rows
        .into_iter()
        .map(|(participant, user)| ParticipantWithUser { participant, user })
        .collect())
}

/*************************************/
/** Create User                     **/
/*************************************/

/// Users exist only as the owners of memberships and reviews.
#[derive(Clone)]
pub struct CreateUser {
    pub name: String,
}

impl Query for CreateUser {
    type Item = models::User;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<Self::Item> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > 255 {
            return Err(Error::validation("name must be between 1 and 255 characters"));
        }

        let user = diesel::insert_into(users::table)
            .values(&models::NewUser {
                name,
                created_at: now(),
            })
            .returning(models::User::as_returning())
            .get_result(conn)?;

        debug!("Created user {} ({})", user.id, user.name);

        Ok(user)
    }
}
