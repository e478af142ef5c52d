use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use derive_more::Display;
use diesel::backend::Backend;
use diesel::deserialize::{self, FromSql, FromSqlRow};
use diesel::expression::AsExpression;
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::sqlite::Sqlite;
use serde_derive::{Deserialize, Serialize};

use super::schema::*;

/// A stored text value did not name any variant of the enum it was read into.
#[derive(Debug, Display)]
#[display(fmt = "`{}` is not a valid {}", value, kind)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl std::error::Error for UnknownVariant {}

/// Declares a closed enum that is stored as lowercase text in SQLite and
/// serialized the same way on the wire.
macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident => $text:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsExpression, FromSqlRow)]
        #[diesel(sql_type = Text)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: stringify!($name),
                        value: other.to_owned(),
                    }),
                }
            }
        }

        impl ToSql<Text, Sqlite> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
                out.set_value(self.as_str());
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Sqlite> for $name {
            fn from_sql(value: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
                let text = <String as FromSql<Text, Sqlite>>::from_sql(value)?;
                Ok(text.parse()?)
            }
        }
    };
}

text_enum! {
    /// Catalog category of a drink.
    pub enum DrinkType {
        Beer => "beer",
        Wine => "wine",
        Spirits => "spirits",
        Cocktail => "cocktail",
        Other => "other",
    }
}

text_enum! {
    /// Lifecycle of a tasting session. Only ever moves forward.
    pub enum SessionStatus {
        Draft => "draft",
        Active => "active",
        Completed => "completed",
    }
}

text_enum! {
    /// Lifecycle of a single round, driven by the session.
    pub enum RoundStatus {
        Pending => "pending",
        Active => "active",
        Completed => "completed",
    }
}

text_enum! {
    pub enum ParticipantRole {
        Host => "host",
        Participant => "participant",
    }
}

impl SessionStatus {
    /// Position in the lifecycle; a later status never returns to an earlier one.
    pub fn rank(self) -> u8 {
        match self {
            SessionStatus::Draft => 0,
            SessionStatus::Active => 1,
            SessionStatus::Completed => 2,
        }
    }

    /// Whether `self -> next` is one of the two legal forward steps.
    pub fn can_become(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Draft, SessionStatus::Active)
                | (SessionStatus::Active, SessionStatus::Completed)
        )
    }
}

impl RoundStatus {
    pub fn rank(self) -> u8 {
        match self {
            RoundStatus::Pending => 0,
            RoundStatus::Active => 1,
            RoundStatus::Completed => 2,
        }
    }

    pub fn can_become(self, next: RoundStatus) -> bool {
        matches!(
            (self, next),
            (RoundStatus::Pending, RoundStatus::Active)
                | (RoundStatus::Active, RoundStatus::Completed)
        )
    }
}

/// Free-form review tags such as "bitter" or "fruity", stored as a JSON array.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, AsExpression, FromSqlRow,
)]
#[diesel(sql_type = Text)]
#[serde(transparent)]
pub struct Tags(pub BTreeSet<String>);

impl Tags {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Tags {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Tags(iter.into_iter().map(Into::into).collect())
    }
}

impl ToSql<Text, Sqlite> for Tags {
    fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
        out.set_value(serde_json::to_string(&self.0)?);
        Ok(IsNull::No)
    }
}

impl FromSql<Text, Sqlite> for Tags {
    fn from_sql(value: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
        let text = <String as FromSql<Text, Sqlite>>::from_sql(value)?;
        Ok(Tags(serde_json::from_str(&text)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
pub struct User {
    pub id: i32,
    pub name: String,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub name: &'a str,
    pub created_at: NaiveDateTime,
}

/// The part of a user that goes into event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = users)]
pub struct UserSummary {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = drinks)]
pub struct Drink {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub drink_type: DrinkType,
    pub alcohol_percentage: Option<f64>,
    pub brand: Option<String>,
    pub origin: Option<String>,
    pub image_url: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Editable drink columns, used for both insert and update.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = drinks, treat_none_as_null = true)]
pub struct DrinkFields {
    pub name: String,
    pub description: Option<String>,
    pub drink_type: DrinkType,
    pub alcohol_percentage: Option<f64>,
    pub brand: Option<String>,
    pub origin: Option<String>,
    pub image_url: Option<String>,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = tasting_sessions)]
pub struct TastingSession {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub host_id: i32,
    pub status: SessionStatus,
    pub max_rounds: i32,
    pub current_round: i32,
    pub invite_code: String,
    pub starts_at: Option<NaiveDateTime>,
    pub ends_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = tasting_sessions)]
pub struct NewSession<'a> {
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub host_id: i32,
    pub status: SessionStatus,
    pub max_rounds: i32,
    pub current_round: i32,
    pub invite_code: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = session_participants)]
pub struct SessionParticipant {
    pub id: i32,
    pub session_id: i32,
    pub user_id: i32,
    pub role: ParticipantRole,
    pub joined_at: NaiveDateTime,
}

impl SessionParticipant {
    pub fn is_host(&self) -> bool {
        self.role == ParticipantRole::Host
    }
}

#[derive(Insertable)]
#[diesel(table_name = session_participants)]
pub struct NewParticipant {
    pub session_id: i32,
    pub user_id: i32,
    pub role: ParticipantRole,
    pub joined_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = tasting_rounds)]
pub struct TastingRound {
    pub id: i32,
    pub session_id: i32,
    pub drink_id: i32,
    pub round_number: i32,
    pub status: RoundStatus,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Insertable)]
#[diesel(table_name = tasting_rounds)]
pub struct NewRound {
    pub session_id: i32,
    pub drink_id: i32,
    pub round_number: i32,
    pub status: RoundStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = tasting_reviews)]
pub struct TastingReview {
    pub id: i32,
    pub round_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub review: Option<String>,
    pub tags: Tags,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = tasting_reviews)]
pub struct NewReview<'a> {
    pub round_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub review: Option<&'a str>,
    pub tags: &'a Tags,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
