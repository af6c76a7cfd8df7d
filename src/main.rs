#[macro_use]
extern crate rocket;

use dotenv::dotenv;
use env_logger::Env;
use log::{error, info};
use rocket::{
    figment::{
        providers::{Format, Toml},
        Figment, Profile,
    },
    Config,
};

use camcache::camera::{Client, ClientPool};
use camcache::config::AppConfig;
use camcache::hash_store::{HashSecret, HashStore};

#[launch]
async fn rocket() -> _ {
    dotenv().ok();

    // Initialize logger
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    // Load config
    let figment = Figment::from(Config::default())
        .merge(Toml::file("App.toml").nested())
        .select(Profile::from_env_or("APP_PROFILE", "default"));

    let config = figment.extract::<AppConfig>().unwrap();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    info!("Configuration loaded successfully");

    // Start one client per camera, a broken camera must not keep the others down
    let pool = ClientPool::new();
    for camera in config.camera_configs() {
        let name = camera.name.clone();
        match Client::run(camera).await {
            Ok(client) => {
                pool.add_client(client);
            }
            Err(e) => error!("cameraClient[{}]: cannot start: {}", name, e),
        }
    }

    if pool.is_empty() {
        error!("No camera client could be started");
        std::process::exit(1);
    }
    info!("Started {} camera clients: {}", pool.len(), pool.names().join(", "));

    let hash_store = HashStore::new(config.hash_timeout());
    let secret = HashSecret::generate();

    info!("Starting camera API server on {}:{}", config.address, config.port);

    camcache::build_rocket(figment, config, pool, hash_store, secret)
}
