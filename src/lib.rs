#[macro_use]
extern crate rocket;

pub mod api;
pub mod camera;
pub mod config;
pub mod hash_store;
pub mod images;

use rocket::fairing::AdHoc;
use rocket::figment::Figment;
use rocket::{Build, Rocket};

use camera::ClientPool;
use config::AppConfig;
use hash_store::{HashSecret, HashStore};

/// Builds the HTTP server around already started clients and hash store.
/// Both are shut down when rocket shuts down.
pub fn build_rocket(
    figment: Figment,
    config: AppConfig,
    pool: ClientPool,
    hash_store: HashStore,
    secret: HashSecret,
) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(config)
        .manage(pool)
        .manage(hash_store)
        .manage(secret)
        .mount("/api/v0", api::routes())
        .attach(AdHoc::on_shutdown("Camera shutdown", |rocket| {
            Box::pin(async move {
                if let Some(pool) = rocket.state::<ClientPool>() {
                    pool.shutdown().await;
                }
                if let Some(hash_store) = rocket.state::<HashStore>() {
                    hash_store.shutdown().await;
                }
            })
        }))
}
