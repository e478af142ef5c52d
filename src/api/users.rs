use actix_web::{web, HttpResponse};
use serde_derive::Deserialize;

use super::{ApiResponse, AppState};
use crate::db::CreateUser;
use crate::error::Result;

#[derive(Deserialize)]
pub struct UserForm {
    name: String,
}

/// Users carry nothing but a display name; the returned id goes into `X-User-Id`.
pub async fn create(state: web::Data<AppState>, form: web::Json<UserForm>) -> Result<HttpResponse> {
    let user = state
        .service
        .fetch(CreateUser {
            name: form.into_inner().name,
        })
        .await?;

    Ok(HttpResponse::Created().json(ApiResponse::new("user", user)))
}
