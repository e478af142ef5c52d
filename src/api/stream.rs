//! Server-Sent Events bridge from the channel hub to HTTP clients.

use std::convert::Infallible;

use actix_web::web::{self, Bytes};
use actix_web::HttpResponse;
use futures::StreamExt;

use super::{Actor, AppState};
use crate::broker::Envelope;
use crate::error::Result;
use crate::events::channel_name;

/// `event: <name>` / `data: <json>`, terminated by a blank line.
pub fn frame(envelope: &Envelope) -> Bytes {
    Bytes::from(format!(
        "event: {}\ndata: {}\n\n",
        envelope.event, envelope.payload
    ))
}

/// Stream a session's channel. Refused with 403 unless the actor is a
/// participant.
pub async fn events(
    state: web::Data<AppState>,
    actor: Actor,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let channel = channel_name(path.into_inner());
    let hub = state.hub.clone();

    // The authorizer reads the store.
    let subscription = web::block(move || hub.subscribe(&channel, actor.0)).await??;

    let body = subscription.map(|envelope| Ok::<_, Infallible>(frame(&envelope)));

    Ok(HttpResponse::Ok()
        .content_type("text/event-stream")
        .insert_header(("Cache-Control", "no-cache"))
        .streaming(body))
}
