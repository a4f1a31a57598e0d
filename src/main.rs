use std::{io, sync::Arc};

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use mongodb::Client;
use tracing_subscriber::EnvFilter;

use splitledger::config::Config;
use splitledger::events::{watch_settlements, LedgerEvents};
use splitledger::routes::{self, AppState};
use splitledger::store::{LedgerStore, MemoryStore, MongoStore};

const EVENT_BUFFER: usize = 256;

#[actix_web::main]
async fn main() -> io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env().map_err(|err| {
        tracing::error!(%err, "invalid configuration");
        io::Error::new(io::ErrorKind::InvalidInput, err)
    })?;

    let store: Arc<dyn LedgerStore> = match &config.mongodb_uri {
        Some(uri) => {
            let client = Client::with_uri_str(uri).await.map_err(|err| {
                tracing::error!(%err, "failed to connect to MongoDB");
                io::Error::new(io::ErrorKind::ConnectionRefused, err)
            })?;
            tracing::info!(database = %config.database, "connected to MongoDB");
            let mongo = MongoStore::new(client.database(&config.database));
            mongo.ensure_indexes().await.map_err(|err| {
                tracing::error!(%err, "failed to create MongoDB indexes");
                io::Error::new(io::ErrorKind::Other, err)
            })?;
            Arc::new(mongo)
        }
        None => {
            tracing::warn!("MONGODB_URI is not set, receipts are kept in memory only");
            Arc::new(MemoryStore::default())
        }
    };

    let events = LedgerEvents::new(EVENT_BUFFER);
    actix_web::rt::spawn(watch_settlements(
        events.subscribe(),
        store.clone(),
        config.threshold,
    ));

    let state = web::Data::new(AppState {
        store,
        events,
        auth_secret: config.auth_secret.clone(),
        service_token: config.service_token.clone(),
        threshold: config.threshold,
        invite_ttl: config.invite_ttl,
    });

    tracing::info!(addr = %config.bind_addr, port = config.port, "starting server");
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(routes::configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await
}
