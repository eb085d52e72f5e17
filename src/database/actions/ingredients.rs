use redis::aio::MultiplexedConnection;

use crate::{
    cache::cache::{CacheKeyType, RedisValue},
    error::{Error, ErrorKind},
    schema::{Ingredient, Uuid},
    store::Store,
};

/// Ingredients by name, narrowed to a case-insensitive name prefix when given.
/// Only the unfiltered catalog goes through the cache.
pub async fn list_ingredients<S: Store>(
    store: &S,
    name: Option<&str>,
    cache: Option<MultiplexedConnection>,
) -> Result<Vec<Ingredient>, Error> {
    let prefix = name.map(str::trim).filter(|name| !name.is_empty());

    let mut cache = match (prefix, cache) {
        (None, Some(cache)) => cache,
        _ => return store.list_ingredients(prefix).await,
    };

    let source = store.clone();
    let cached = RedisValue::get_or(
        CacheKeyType::Ingredients.new("all"),
        &mut cache,
        move || async move { source.list_ingredients(None).await },
    )
    .await;

    match cached {
        Ok(ingredients) => Ok(ingredients.value),
        Err(e) => {
            log::warn!("Ingredient cache unavailable: {e}");
            store.list_ingredients(None).await
        }
    }
}

pub async fn get_ingredient<S: Store>(store: &S, id: Uuid) -> Result<Ingredient, Error> {
    store
        .get_ingredient(id)
        .await?
        .ok_or_else(|| ErrorKind::NotFound.new("No ingredient exists with specified id"))
}
