#[macro_use]
extern crate log;

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};

use tasting_club::api::{self, AppState};
use tasting_club::config::Config;
use tasting_club::db::{self, Query};
use tasting_club::drinks::SeedDrinks;
use tasting_club::error::Error;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    // Create a connection pool to the database
    let pool = match db::connect(&config.database_url, config.pool_size) {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open {}: {}", config.database_url, e);
            std::process::exit(1);
        }
    };

    if config.seed_drinks {
        let seeded = pool
            .get()
            .map_err(Error::from)
            .and_then(|mut conn| SeedDrinks.execute(&mut conn));
        if let Err(e) = seeded {
            error!("Failed to seed the drink catalog: {}", e);
            std::process::exit(1);
        }
    }

    let state = web::Data::new(AppState::new(pool, config.reconciler));

    info!("Listening on {}", config.listen_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(Cors::permissive())
            .configure(api::configure)
    })
    .bind(config.listen_addr)?
    .run()
    .await
}
