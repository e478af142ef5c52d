//! The review ledger: at most one review per participant per round, and
//! the live average rating of a round.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::db;
use super::error::{Error, Result};
use super::events::{ReviewSubmitted, ReviewWithUser, RoundWithAverage, TastingEvent};
use super::models::{NewReview, RoundStatus, Tags, TastingReview};
use super::publisher::{Applied, Command};
use super::schema::tasting_reviews;

pub const MIN_RATING: i32 = 1;
pub const MAX_RATING: i32 = 5;
pub const MAX_REVIEW_LEN: usize = 1000;
pub const MAX_TAG_LEN: usize = 50;

/// `sum / count`, or `0.0` for a round nobody has rated yet.
pub fn average_rating<I: IntoIterator<Item = i32>>(ratings: I) -> f64 {
    let (sum, count) = ratings
        .into_iter()
        .fold((0i64, 0u32), |(sum, count), rating| (sum + i64::from(rating), count + 1));

    if count == 0 {
        0.0
    } else {
        sum as f64 / f64::from(count)
    }
}

/// Average over the reviews currently stored for `round_id`.
pub fn round_average(conn: &mut SqliteConnection, round_id: i32) -> Result<f64> {
    let ratings = tasting_reviews::table
        .filter(tasting_reviews::round_id.eq(round_id))
        .select(tasting_reviews::rating)
        .load::<i32>(conn)?;

    Ok(average_rating(ratings))
}

/*************************************/
/** Submit Review                   **/
/*************************************/

/// Record `user_id`'s review of an active round. A second submission
/// overwrites the first; there is no history.
#[derive(Debug, Clone)]
pub struct SubmitReview {
    pub round_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub review: Option<String>,
    pub tags: Vec<String>,
}

impl SubmitReview {
    fn validated_tags(&self) -> Result<Tags> {
        let mut tags = Tags::default();
        for tag in &self.tags {
            let tag = tag.trim();
            if tag.is_empty() || tag.chars().count() > MAX_TAG_LEN {
                return Err(Error::validation(format!(
                    "tags must be between 1 and {} characters",
                    MAX_TAG_LEN
                )));
            }
            tags.0.insert(tag.to_owned());
        }
        Ok(tags)
    }

    fn validated_text(&self) -> Result<Option<&str>> {
        let text = self.review.as_deref().map(str::trim).filter(|t| !t.is_empty());
        match text {
            Some(t) if t.chars().count() > MAX_REVIEW_LEN => Err(Error::validation(format!(
                "review must be at most {} characters",
                MAX_REVIEW_LEN
            ))),
            _ => Ok(text),
        }
    }
}

impl Command for SubmitReview {
    type Output = ReviewWithUser;

    fn apply(&self, conn: &mut SqliteConnection) -> Result<Applied<ReviewWithUser>> {
        if !(MIN_RATING..=MAX_RATING).contains(&self.rating) {
            return Err(Error::validation(format!(
                "rating must be between {} and {}",
                MIN_RATING, MAX_RATING
            )));
        }
        let text = self.validated_text()?;
        let tags = self.validated_tags()?;

        let round = db::find_round(conn, self.round_id)?;
        if round.status != RoundStatus::Active {
            return Err(Error::RoundNotActive(round.id));
        }
        db::require_participant(conn, round.session_id, self.user_id)?;
        let user = db::find_user(conn, self.user_id)?;

        let now = db::now();
        let review = diesel::insert_into(tasting_reviews::table)
            .values(&NewReview {
                round_id: round.id,
                user_id: self.user_id,
                rating: self.rating,
                review: text,
                tags: &tags,
                created_at: now,
                updated_at: now,
            })
            .on_conflict((tasting_reviews::round_id, tasting_reviews::user_id))
            .do_update()
            .set((
                tasting_reviews::rating.eq(self.rating),
                tasting_reviews::review.eq(text),
                tasting_reviews::tags.eq(&tags),
                tasting_reviews::updated_at.eq(now),
            ))
            .returning(TastingReview::as_returning())
            .get_result(conn)?;

        let average_rating = round_average(conn, round.id)?;

        info!(
            "User {} rated round {} with {} (average now {:.2})",
            self.user_id, round.id, review.rating, average_rating
        );

        let submitted = ReviewWithUser { review, user };
        let event = TastingEvent::ReviewSubmitted(ReviewSubmitted::new(
            submitted.clone(),
            RoundWithAverage {
                round,
                average_rating,
            },
        ));

        Ok(Applied::with_events(submitted, vec![event]))
    }
}
