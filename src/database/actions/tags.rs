use redis::aio::MultiplexedConnection;

use crate::{
    cache::cache::{CacheKeyType, RedisValue},
    error::{Error, ErrorKind},
    schema::{Tag, Uuid},
    store::Store,
};

pub async fn list_tags<S: Store>(
    store: &S,
    cache: Option<MultiplexedConnection>,
) -> Result<Vec<Tag>, Error> {
    let Some(mut cache) = cache else {
        return store.list_tags().await;
    };

    let source = store.clone();
    let cached = RedisValue::get_or(CacheKeyType::Tags.new("all"), &mut cache, move || async move {
        source.list_tags().await
    })
    .await;

    match cached {
        Ok(tags) => Ok(tags.value),
        Err(e) => {
            log::warn!("Tag cache unavailable: {e}");
            store.list_tags().await
        }
    }
}

pub async fn get_tag<S: Store>(store: &S, id: Uuid) -> Result<Tag, Error> {
    store
        .get_tag(id)
        .await?
        .ok_or_else(|| ErrorKind::NotFound.new("No tag exists with specified id"))
}
