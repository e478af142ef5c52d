use actix_web::{web, HttpResponse};
use serde_derive::{Deserialize, Serialize};

use super::{Actor, ApiResponse, AppState, PageQuery};
use crate::error::Result;
use crate::ledger::SubmitReview;
use crate::session::{
    Advanced, AdvanceRound, CreateSession, JoinOutcome, JoinSession, ListSessions, SessionResults,
    SessionDetails, ShowSession, StartSession,
};

/*************************************/
/** Sessions                        **/
/*************************************/

#[derive(Deserialize)]
pub struct SessionForm {
    name: String,
    description: Option<String>,
    max_rounds: i32,
    drink_ids: Vec<i32>,
}

pub async fn index(
    state: web::Data<AppState>,
    actor: Actor,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let sessions = state
        .service
        .fetch(ListSessions {
            user_id: actor.0,
            page: query.page(),
        })
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("sessions", sessions)))
}

/// The actor becomes the host of the new session.
pub async fn create(
    state: web::Data<AppState>,
    actor: Actor,
    form: web::Json<SessionForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let session = state
        .service
        .dispatch(CreateSession {
            host_id: actor.0,
            name: form.name,
            description: form.description,
            max_rounds: form.max_rounds,
            drink_ids: form.drink_ids,
        })
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::new("session", session)))
}

#[derive(Deserialize)]
pub struct JoinForm {
    invite_code: String,
}

pub async fn join(
    state: web::Data<AppState>,
    actor: Actor,
    form: web::Json<JoinForm>,
) -> Result<HttpResponse> {
    let outcome = state
        .service
        .dispatch(JoinSession {
            invite_code: form.into_inner().invite_code,
            user_id: actor.0,
        })
        .await?;

    let message = match outcome {
        JoinOutcome::Joined(_) => "You joined the tasting",
        JoinOutcome::AlreadyJoined(_) => "You are already part of this tasting",
    };

    Ok(HttpResponse::Ok().json(ApiResponse::new("join", outcome).with_message(message)))
}

/// The session page, plus how long clients wait before showing results.
#[derive(Serialize)]
struct SessionPage {
    #[serde(flatten)]
    details: SessionDetails,
    results_delay_ms: u64,
}

pub async fn show(
    state: web::Data<AppState>,
    actor: Actor,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let details = state
        .service
        .fetch(ShowSession {
            session_id: path.into_inner(),
            viewer: actor.0,
        })
        .await?;

    let page = SessionPage {
        details,
        results_delay_ms: state.reconciler.results_delay.as_millis() as u64,
    };

    Ok(HttpResponse::Ok().json(ApiResponse::new("session", page)))
}

pub async fn start(
    state: web::Data<AppState>,
    actor: Actor,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let session = state
        .service
        .dispatch(StartSession {
            session_id: path.into_inner(),
            actor: actor.0,
        })
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("session", session)))
}

#[derive(Deserialize, Default)]
pub struct AdvanceForm {
    /// The round the client believes is current.
    from_round: Option<i32>,
}

/// The body is optional; without `from_round` the advance is unconditional.
pub async fn next_round(
    state: web::Data<AppState>,
    actor: Actor,
    path: web::Path<i32>,
    form: Option<web::Json<AdvanceForm>>,
) -> Result<HttpResponse> {
    let form = form.map(web::Json::into_inner).unwrap_or_default();

    let advanced = state
        .service
        .dispatch(AdvanceRound {
            session_id: path.into_inner(),
            actor: actor.0,
            from_round: form.from_round,
        })
        .await?;

    let message = match &advanced {
        Advanced::NextRound { session, .. } => format!("Round {} is up", session.current_round),
        Advanced::Completed { .. } => "The tasting is finished".to_owned(),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::new("advance", advanced).with_message(message)))
}

pub async fn results(
    state: web::Data<AppState>,
    _actor: Actor,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let results = state
        .service
        .fetch(SessionResults {
            session_id: path.into_inner(),
        })
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("results", results)))
}

/*************************************/
/** Reviews                         **/
/*************************************/

#[derive(Deserialize)]
pub struct ReviewForm {
    rating: i32,
    review: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

pub async fn review(
    state: web::Data<AppState>,
    actor: Actor,
    path: web::Path<i32>,
    form: web::Json<ReviewForm>,
) -> Result<HttpResponse> {
    let form = form.into_inner();
    let review = state
        .service
        .dispatch(SubmitReview {
            round_id: path.into_inner(),
            user_id: actor.0,
            rating: form.rating,
            review: form.review,
            tags: form.tags,
        })
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("review", review)))
}
