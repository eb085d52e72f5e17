use foodgram_core::{
    config::Config,
    error::Error,
    invalidate_catalog_cache,
    jwt::jwt_key,
    postgres::PgStore,
    routes::{self, handle_rejection, App},
};
use warp::Filter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;

    let store = PgStore::connect(&config.database_url).await?;
    store.migrate().await?;

    let mut app = App::new(store, jwt_key(&config.jwt_secret)?, config.page_size);

    match &config.redis_url {
        Some(url) => match connect_cache(url).await {
            Ok(mut cache) => {
                invalidate_catalog_cache(&mut cache).await?;
                app = app.with_cache(cache);
            }
            Err(e) => log::warn!("Redis unavailable, catalog cache disabled: {e}"),
        },
        None => log::info!("REDIS_URL not set, catalog cache disabled"),
    }

    log::info!("Listening on {}", config.bind_addr);
    warp::serve(routes::api(app).recover(handle_rejection))
        .run(config.bind_addr)
        .await;

    Ok(())
}

async fn connect_cache(url: &str) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
    let client = redis::Client::open(url)?;
    client.get_multiplexed_async_connection().await
}
