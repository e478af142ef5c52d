//! Invite codes: eight uppercase alphanumerics, unique across sessions.

use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use regex::Regex;
use textnonce::TextNonce;

use super::error::{Error, Result};
use super::schema::tasting_sessions;

pub const INVITE_CODE_LEN: usize = 8;

const MAX_ATTEMPTS: usize = 16;

lazy_static! {
    static ref INVITE_CODE: Regex = Regex::new(r"^[A-Z0-9]{8}$").expect("invite code pattern");
}

/// Canonical form of a code typed in by a user.
pub fn normalize(input: &str) -> Result<String> {
    let code = input.trim().to_ascii_uppercase();

    if INVITE_CODE.is_match(&code) {
        Ok(code)
    } else {
        Err(Error::validation(format!(
            "invite code must be {} letters or digits",
            INVITE_CODE_LEN
        )))
    }
}

/// One random code, taken from the random tail of a nonce.
fn candidate() -> Option<String> {
    let nonce = TextNonce::new().into_string();
    let code: String = nonce
        .chars()
        .rev()
        .filter(char::is_ascii_alphanumeric)
        .take(INVITE_CODE_LEN)
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if code.len() == INVITE_CODE_LEN {
        Some(code)
    } else {
        None
    }
}

/// Generate a code no existing session uses.
pub fn generate(conn: &mut SqliteConnection) -> Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        let code = match candidate() {
            Some(code) => code,
            None => continue,
        };

        let taken: bool = diesel::select(exists(
            tasting_sessions::table.filter(tasting_sessions::invite_code.eq(&code)),
        ))
        .get_result(conn)?;

        if !taken {
            return Ok(code);
        }

        debug!("Invite code {} is taken, drawing another", code);
    }

    Err(Error::Internal(format!(
        "no free invite code after {} attempts",
        MAX_ATTEMPTS
    )))
}
