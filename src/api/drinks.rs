use actix_web::{web, HttpResponse};

use super::{Actor, ApiResponse, AppState, PageQuery};
use crate::drinks::{CreateDrink, DeleteDrink, DrinkForm, ListDrinks, ShowDrink, UpdateDrink};
use crate::error::Result;

pub async fn index(state: web::Data<AppState>, query: web::Query<PageQuery>) -> Result<HttpResponse> {
    let drinks = state.service.fetch(ListDrinks { page: query.page() }).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("drinks", drinks)))
}

pub async fn show(state: web::Data<AppState>, path: web::Path<i32>) -> Result<HttpResponse> {
    let drink = state
        .service
        .fetch(ShowDrink {
            id: path.into_inner(),
        })
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("drink", drink)))
}

pub async fn create(
    state: web::Data<AppState>,
    actor: Actor,
    form: web::Json<DrinkForm>,
) -> Result<HttpResponse> {
    let drink = state.service.fetch(CreateDrink(form.into_inner())).await?;

    debug!("User {} added drink {}", actor.0, drink.id);

    Ok(HttpResponse::Created().json(ApiResponse::new("drink", drink)))
}

pub async fn update(
    state: web::Data<AppState>,
    _actor: Actor,
    path: web::Path<i32>,
    form: web::Json<DrinkForm>,
) -> Result<HttpResponse> {
    let drink = state
        .service
        .fetch(UpdateDrink {
            id: path.into_inner(),
            form: form.into_inner(),
        })
        .await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("drink", drink)))
}

pub async fn delete(
    state: web::Data<AppState>,
    _actor: Actor,
    path: web::Path<i32>,
) -> Result<HttpResponse> {
    let id = path.into_inner();
    state.service.fetch(DeleteDrink { id }).await?;

    Ok(HttpResponse::Ok().json(ApiResponse::new("deleted", id).with_message("Drink deleted")))
}
