use actix_cors::Cors;
use actix_files::Files;
use actix_web::{web, App, HttpServer};
use log::{error, info};
use mongodb::{options::ClientOptions, Client};

use souqrust::chat;
use souqrust::chat::registry::Registry;
use souqrust::config::Config;
use souqrust::controllers::{chatrooms, favorites, listings, users};
use souqrust::router;

#[actix_rt::main]
async fn main() -> std::io::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,actix_web=debug");
    }
    env_logger::init();

    let config = Config::from_env();
    let mut client_options = ClientOptions::parse(&config.mongo_uri)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    client_options.app_name = Some("souqrust".to_string());
    let client = Client::with_options(client_options)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let registry = Registry::default();
    {
        let registry = registry.clone();
        let client = client.clone();
        let addr = config.socket_addr();
        tokio::spawn(async move {
            if let Err(e) = chat::run(addr, registry, client).await {
                error!("socket gateway failed: {}", e);
            }
        });
    }

    let client = web::Data::new(client);
    let registry = web::Data::new(registry);
    let photo_dir = config.photo_dir.clone();
    info!("http server listening on {}:{}", config.http_host, config.http_port);

    HttpServer::new(move || {
        let cors = Cors::permissive();
        App::new()
            .wrap(cors)
            .app_data(client.clone())
            .app_data(registry.clone())
            .configure(|cfg| {
                router::register("/api/v1/listings", listings::routes(), cfg);
                router::register("/api/v1/users", users::routes(), cfg);
                router::register("/api/v1/favorites", favorites::routes(), cfg);
                router::register("/api/v1/chatrooms", chatrooms::routes(), cfg);
            })
            .service(Files::new("/img", photo_dir.clone()))
    })
    .bind(config.http_addr())?
    .run()
    .await
}
