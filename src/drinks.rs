//! The drink catalog. Deleting a drink takes the rounds that poured it along.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};

use super::db::{self, Query};
use super::error::{Error, Result};
use super::ledger;
use super::models::{Drink, DrinkFields, DrinkType, TastingRound};
use super::schema::{drinks, tasting_reviews, tasting_rounds, tasting_sessions};

pub const DRINKS_PER_PAGE: i64 = 12;

lazy_static! {
    static ref HTTP_URL: Regex = Regex::new(r"^https?://[^\s/?#]+[^\s]*$").expect("url pattern");
}

/// A drink as submitted by a client.
#[derive(Debug, Clone, Deserialize)]
pub struct DrinkForm {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub drink_type: DrinkType,
    pub alcohol_percentage: Option<f64>,
    pub brand: Option<String>,
    pub origin: Option<String>,
    pub image_url: Option<String>,
}

fn optional_text(value: &Option<String>, field: &str, max: usize) -> Result<Option<String>> {
    match value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) if v.chars().count() > max => Err(Error::validation(format!(
            "{} must be at most {} characters",
            field, max
        ))),
        v => Ok(v.map(str::to_owned)),
    }
}

impl DrinkForm {
    pub fn validate(&self) -> Result<DrinkFields> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > 255 {
            return Err(Error::validation("name must be between 1 and 255 characters"));
        }

        if let Some(abv) = self.alcohol_percentage {
            if !(0.0..=100.0).contains(&abv) {
                return Err(Error::validation("alcohol_percentage must be between 0 and 100"));
            }
        }

        let image_url = optional_text(&self.image_url, "image_url", 2048)?;
        if let Some(url) = &image_url {
            if !HTTP_URL.is_match(url) {
                return Err(Error::validation("image_url must be an http(s) URL"));
            }
        }

        Ok(DrinkFields {
            name: name.to_owned(),
            description: optional_text(&self.description, "description", 10_000)?,
            drink_type: self.drink_type,
            alcohol_percentage: self.alcohol_percentage,
            brand: optional_text(&self.brand, "brand", 255)?,
            origin: optional_text(&self.origin, "origin", 255)?,
            image_url,
            updated_at: db::now(),
        })
    }
}

pub struct CreateDrink(pub DrinkForm);

impl Query for CreateDrink {
    type Item = Drink;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<Drink> {
        let fields = self.0.validate()?;

        let drink = diesel::insert_into(drinks::table)
            .values(&fields)
            .returning(Drink::as_returning())
            .get_result(conn)?;

        info!("Added drink {} ({})", drink.id, drink.name);

        Ok(drink)
    }
}

pub struct UpdateDrink {
    pub id: i32,
    pub form: DrinkForm,
}

impl Query for UpdateDrink {
    type Item = Drink;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<Drink> {
        let fields = self.form.validate()?;

        diesel::update(drinks::table.find(self.id))
            .set(&fields)
            .returning(Drink::as_returning())
            .get_result(conn)
            .optional()?
            .ok_or(Error::NotFound("drink"))
    }
}

/// Deleting a drink also deletes every round that poured it.
pub struct DeleteDrink {
    pub id: i32,
}

impl Query for DeleteDrink {
    type Item = ();

    fn execute(&self, conn: &mut SqliteConnection) -> Result<()> {
        let deleted = diesel::delete(drinks::table.find(self.id)).execute(conn)?;
        if deleted == 0 {
            return Err(Error::NotFound("drink"));
        }

        info!("Deleted drink {}", self.id);

        Ok(())
    }
}

pub struct ListDrinks {
    pub page: i64,
}

impl Query for ListDrinks {
    type Item = Vec<Drink>;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<Vec<Drink>> {
        Ok(drinks::table
            .order((drinks::name.asc(), drinks::id.asc()))
            .limit(DRINKS_PER_PAGE)
            .offset(db::page_offset(DRINKS_PER_PAGE, self.page)?)
            .select(Drink::as_select())
            .load(conn)?)
    }
}

/// One round in which a drink was poured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Appearance {
    #[serde(flatten)]
    pub round: TastingRound,
    pub session_name: String,
    pub average_rating: f64,
    pub total_reviews: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrinkDetails {
    #[serde(flatten)]
    pub drink: Drink,
    pub appearances: Vec<Appearance>,
}

pub struct ShowDrink {
    pub id: i32,
}

impl Query for ShowDrink {
    type Item = DrinkDetails;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<DrinkDetails> {
        let drink = drinks::table
            .find(self.id)
            .select(Drink::as_select())
            .first(conn)
            .optional()?
            .ok_or(Error::NotFound("drink"))?;

        let rounds = tasting_rounds::table
            .inner_join(tasting_sessions::table)
            .filter(tasting_rounds::drink_id.eq(drink.id))
            .order((tasting_sessions::created_at.desc(), tasting_rounds::id.asc()))
            .select((TastingRound::as_select(), tasting_sessions::name))
            .load::<(TastingRound, String)>(conn)?;

        let mut appearances = Vec::with_capacity(rounds.len());
        for (round, session_name) in rounds {
            let ratings = tasting_reviews::table
                .filter(tasting_reviews::round_id.eq(round.id))
                .select(tasting_reviews::rating)
                .load::<i32>(conn)?;

            appearances.push(Appearance {
                round,
                session_name,
                total_reviews: ratings.len(),
                average_rating: ledger::average_rating(ratings),
            });
        }

        Ok(DrinkDetails { drink, appearances })
    }
}

/*************************************/
/** Starter catalog                 **/
/*************************************/

// (name, description, type, brand, alcohol percentage, origin)
const STARTER_CATALOG: &[(&str, &str, DrinkType, Option<&str>, f64, &str)] = &[
    ("Heineken", "Dutch premium lager, light and crisp", DrinkType::Beer, Some("Heineken"), 5.0, "Netherlands"),
    ("Duvel", "Belgian strong golden ale, complex and fruity", DrinkType::Beer, Some("Duvel Moortgat"), 8.5, "Belgium"),
    ("Grolsch Premium Lager", "Dutch pilsner from the swing-top bottle", DrinkType::Beer, Some("Grolsch"), 5.0, "Netherlands"),
    ("La Chouffe", "Belgian blonde ale with spicy notes", DrinkType::Beer, Some("Achouffe"), 8.0, "Belgium"),
    ("Chardonnay", "Dry white wine with apple and pear", DrinkType::Wine, Some("Domaine de la Côte"), 13.5, "France"),
    ("Pinot Noir", "Light red wine with soft tannins and cherry", DrinkType::Wine, Some("Burgundy Estate"), 12.5, "France"),
    ("Prosecco", "Italian sparkling wine, light and fresh", DrinkType::Wine, Some("Villa Sandi"), 11.0, "Italy"),
    ("Ketel One Vodka", "Dutch wheat vodka, distilled since 1691", DrinkType::Spirits, Some("Ketel One"), 40.0, "Netherlands"),
    ("Jameson Irish Whiskey", "Triple distilled, smooth and round", DrinkType::Spirits, Some("Jameson"), 40.0, "Ireland"),
    ("Bombay Sapphire Gin", "London dry gin with ten botanicals", DrinkType::Spirits, Some("Bombay Sapphire"), 47.0, "England"),
    ("Mojito", "White rum, mint, lime and soda", DrinkType::Cocktail, None, 12.0, "Cuba"),
    ("Old Fashioned", "Whiskey with sugar, bitters and orange", DrinkType::Cocktail, None, 35.0, "United States"),
];

/// Fill an empty catalog with a dozen well-known drinks. Returns how many
/// were added; a catalog that already has drinks is left alone.
pub struct SeedDrinks;

impl Query for SeedDrinks {
    type Item = usize;

    fn execute(&self, conn: &mut SqliteConnection) -> Result<usize> {
        let existing: i64 = drinks::table.count().get_result(conn)?;
        if existing > 0 {
            debug!("Catalog already has {} drinks, not seeding", existing);
            return Ok(0);
        }

        conn.transaction(|conn| {
            for &(name, description, drink_type, brand, abv, origin) in STARTER_CATALOG {
                CreateDrink(DrinkForm {
                    name: name.into(),
                    description: Some(description.into()),
                    drink_type,
                    alcohol_percentage: Some(abv),
                    brand: brand.map(str::to_owned),
                    origin: Some(origin.into()),
                    image_url: None,
                })
                .execute(conn)?;
            }
            Ok::<_, Error>(())
        })?;

        info!("Seeded {} drinks", STARTER_CATALOG.len());

        Ok(STARTER_CATALOG.len())
    }
}
