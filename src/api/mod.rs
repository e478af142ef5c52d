use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};
use serde::ser::{Serialize, SerializeStruct, Serializer};
use serde_derive::{Deserialize, Serialize};

use crate::broker::ChannelHub;
use crate::db::Pool;
use crate::error::Error;
use crate::events::CHANNEL_PREFIX;
use crate::publisher::TastingService;
use crate::reconciler::ReconcilerConfig;
use crate::session;

mod drinks;
mod sessions;
mod stream;
mod users;


pub const ACTOR_HEADER: &str = "X-User-Id";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    /// The request was refused; `messages` says why.
    Fail,
    Error,
}

/// Envelope type for API responses
///
/// When serializing as JSON, this will result in a JSON object with the inner object returned
/// under the field name given to [`ApiResponse::new`].
pub struct ApiResponseEnvelope<T: Serialize> {
    name: &'static str,
    value: T,
}

#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    pub status: ResponseStatus,
    pub data: Option<ApiResponseEnvelope<T>>,
    pub messages: Option<Vec<String>>,
}

impl<T> Serialize for ApiResponseEnvelope<T>
where
    T: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ApiResponseEnvelope", 1)?;
        state.serialize_field(self.name, &self.value)?;
        state.end()
    }
}

impl<T> ApiResponse<T>
where
    T: Serialize,
{
    pub fn new(name: &'static str, data: T) -> ApiResponse<T> {
        ApiResponse {
            status: ResponseStatus::Success,
            data: Some(ApiResponseEnvelope { name, value: data }),
            messages: None,
        }
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> ApiResponse<T> {
        self.messages
            .get_or_insert_with(Vec::new)
            .push(message.into());
        self
    }
}

impl ApiResponse<()> {
    /// The caller asked for something the rules do not allow.
    pub fn rejected<S: Into<String>>(message: S) -> ApiResponse<()> {
        ApiResponse {
            status: ResponseStatus::Fail,
            data: None,
            messages: Some(vec![message.into()]),
        }
    }

    /// Something broke on our side.
    pub fn failed<S: Into<String>>(message: S) -> ApiResponse<()> {
        ApiResponse {
            status: ResponseStatus::Error,
            data: None,
            messages: Some(vec![message.into()]),
        }
    }
}

/// The user on whose behalf a request is made, from the `X-User-Id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub i32);

impl FromRequest for Actor {
    type Error = Error;
    type Future = Ready<Result<Actor, Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let actor = req
            .headers()
            .get(ACTOR_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i32>().ok())
            .filter(|id| *id > 0)
            .map(Actor)
            .ok_or(Error::Unauthenticated);

        ready(actor)
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}

impl PageQuery {
    pub fn page(&self) -> i64 {
        self.page.unwrap_or(1).max(1)
    }
}

pub struct AppState {
    pub service: TastingService,
    pub hub: Arc<ChannelHub>,
    /// Handed to clients so they know how long to linger on a finished round.
    pub reconciler: ReconcilerConfig,
}

impl AppState {
    /// Wire the store to an in-process hub. Only participants may listen on a
    /// session's channel.
    pub fn new(pool: Pool, reconciler: ReconcilerConfig) -> AppState {
        let hub = Arc::new(ChannelHub::new());

        let members = pool.clone();
        hub.authorize(CHANNEL_PREFIX, move |user_id, param| {
            session::is_channel_member(&members, user_id, param)
        });

        AppState {
            service: TastingService::new(pool, hub.clone()),
            hub,
            reconciler,
        }
    }
}

/// Malformed JSON bodies are validation failures, not bare 400s.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| Error::validation(err.to_string()).into())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(web::resource("/users").route(web::post().to(users::create)))
        .service(
            web::resource("/drinks")
                .route(web::get().to(drinks::index))
                .route(web::post().to(drinks::create)),
        )
        .service(
            web::resource("/drinks/{id}")
                .route(web::get().to(drinks::show))
                .route(web::put().to(drinks::update))
                .route(web::delete().to(drinks::delete)),
        )
        .service(
            web::resource("/sessions")
                .route(web::get().to(sessions::index))
                .route(web::post().to(sessions::create)),
        )
        .service(web::resource("/sessions/join").route(web::post().to(sessions::join)))
        .service(web::resource("/sessions/{id}").route(web::get().to(sessions::show)))
        .service(web::resource("/sessions/{id}/start").route(web::post().to(sessions::start)))
        .service(
            web::resource("/sessions/{id}/next-round").route(web::post().to(sessions::next_round)),
        )
        .service(web::resource("/sessions/{id}/results").route(web::get().to(sessions::results)))
        .service(web::resource("/sessions/{id}/events").route(web::get().to(stream::events)))
        .service(web::resource("/rounds/{id}/review").route(web::post().to(sessions::review)));
}
