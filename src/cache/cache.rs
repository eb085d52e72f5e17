use std::future::Future;

use redis::{aio::MultiplexedConnection, AsyncCommands, FromRedisValue, ToRedisArgs};
use redis_macros::{FromRedisValue, ToRedisArgs};
use serde::{Deserialize, Serialize};

use crate::{
    constants::CATALOG_CACHE_KEY,
    error::{CacheError, Error, ErrorKind},
};

// Caching - keys

#[derive(Serialize, Clone, Debug)]
pub struct CacheKey<T: ToString + Serialize> {
    _value: T,
    _type: CacheKeyType,
}

impl<T: ToString + Serialize> CacheKey<T> {
    pub fn from(r#type: CacheKeyType, key: T) -> Self {
        Self {
            _value: key,
            _type: r#type,
        }
    }
}

impl<T: ToString + Serialize> std::fmt::Display for CacheKey<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self._type {
            CacheKeyType::Tags => write!(f, "tags-{}", self._value.to_string()),
            CacheKeyType::Ingredients => write!(f, "ingredients-{}", self._value.to_string()),
            CacheKeyType::Custom(_) => write!(f, "{}", self._value.to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum CacheKeyType {
    Tags,
    Ingredients,
    Custom(String),
}

impl CacheKeyType {
    pub fn new<T: ToString + Serialize>(self, key: T) -> CacheKey<T> {
        CacheKey::from(self, key)
    }
}

impl<T: ToString + Serialize> From<&CacheKey<T>> for CacheLifetime {
    fn from(key: &CacheKey<T>) -> Self {
        match &key._type {
            CacheKeyType::Tags | CacheKeyType::Ingredients => CacheLifetime::BindCatalogCache,
            CacheKeyType::Custom(value) => CacheLifetime::Custom(value.to_owned()),
        }
    }
}

// Cache - wrappers

#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum CacheLifetime {
    Custom(String),
    BindCatalogCache,
}

impl CacheLifetime {
    pub async fn get_cache_bind(
        &self,
        cache: &mut MultiplexedConnection,
    ) -> Result<Option<String>, Error> {
        match self {
            CacheLifetime::BindCatalogCache => {
                get_cache_value::<&str, String>(CATALOG_CACHE_KEY, cache).await
            }
            CacheLifetime::Custom(value) => Ok(Some(value.to_owned())),
        }
    }

    pub async fn validate_cache_bind(
        &self,
        bind: &Option<String>,
        lifetime: Self,
        cache: &mut MultiplexedConnection,
    ) -> Result<bool, Error> {
        match self {
            CacheLifetime::Custom(value) => match lifetime {
                CacheLifetime::Custom(other) => Ok(value == &other),
                _ => {
                    log::error!("Found conflicting bindings");
                    Err(ErrorKind::InternalServerError.new("Conflicting cache bindings"))
                }
            },
            _ => Ok(bind == &self.get_cache_bind(cache).await?),
        }
    }
}

#[derive(Serialize, Deserialize, FromRedisValue, ToRedisArgs, Clone, Debug)]
pub struct RedisValue<T: Serialize + Send + Sync + Clone> {
    pub value: T,
    _lifetime: CacheLifetime,
    _bind: Option<String>,
}

impl<T: Serialize + Send + Sync + Clone + for<'a> Deserialize<'a>> RedisValue<T> {
    async fn new(
        value: T,
        lifetime: CacheLifetime,
        cache: &mut MultiplexedConnection,
    ) -> Result<Self, Error> {
        let bind = lifetime.get_cache_bind(cache).await?;

        Ok(Self {
            value,
            _lifetime: lifetime,
            _bind: bind,
        })
    }

    async fn validate<K: ToString + Serialize>(
        &self,
        key: &CacheKey<K>,
        cache: &mut MultiplexedConnection,
    ) -> Result<bool, Error> {
        self._lifetime
            .validate_cache_bind(&self._bind, key.into(), cache)
            .await
    }

    /// Cached value under `key` while its binding is current; otherwise runs
    /// `callback` and stores the fresh value.
    pub async fn get_or<F, Fut, K>(
        key: CacheKey<K>,
        cache: &mut MultiplexedConnection,
        callback: F,
    ) -> Result<RedisValue<T>, Error>
    where
        K: ToString + Serialize + Clone + Send + Sync,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, Error>> + Send,
    {
        let value = get_cache_value::<String, RedisValue<T>>(key.to_string(), cache)
            .await
            .unwrap_or_else(|_| {
                let mut c = cache.clone();
                let k = key.to_string();
                tokio::spawn(async move {
                    log::error!("> Failed to deserialize cached value. Deleting {}", &k);
                    if let Err(e) = delete_cache_value(k, &mut c).await {
                        log::error!("> Failed to delete cached value! {e}");
                    }
                });
                None
            });

        let value = match value {
            Some(value) => {
                log::trace!("> Found {}", key);
                match value.validate(&key, cache).await? {
                    true => Some(value),
                    false => {
                        log::trace!("> Invalidated {}", key);
                        None
                    }
                }
            }
            None => None,
        };

        match value {
            Some(value) => Ok(value),
            None => {
                log::trace!("> Fetching {}", key);
                let value = callback().await?;
                let lifetime = CacheLifetime::from(&key);
                let value = RedisValue::new(value, lifetime, cache).await?;

                if let Err(e) =
                    set_cache_value::<String, RedisValue<T>>(key.to_string(), value.clone(), cache)
                        .await
                {
                    log::error!("{e}");
                }

                Ok(value)
            }
        }
    }
}

/// Rotates the catalog binding so every catalog entry cached so far is stale.
pub async fn invalidate_catalog_cache(cache: &mut MultiplexedConnection) -> Result<(), Error> {
    let bind = uuid::Uuid::new_v4().to_string();
    log::info!("Catalog cache bound to {bind}");

    set_cache_value(CATALOG_CACHE_KEY, bind, cache).await
}

// Cache - raw handlers

pub async fn set_cache_value<K: ToRedisArgs + Send + Sync, V: ToRedisArgs + Send + Sync>(
    key: K,
    value: V,
    cache: &mut MultiplexedConnection,
) -> Result<(), Error> {
    let _: () = cache.set(key, value).await.map_err(CacheError::from)?;

    Ok(())
}

pub async fn delete_cache_value<K: ToRedisArgs + Send + Sync>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<(), Error> {
    let _: () = cache.del(key).await.map_err(CacheError::from)?;

    Ok(())
}

pub async fn get_cache_value<K: ToRedisArgs + Send + Sync, V: FromRedisValue>(
    key: K,
    cache: &mut MultiplexedConnection,
) -> Result<Option<V>, Error> {
    let value: Option<V> = cache.get(key).await.map_err(CacheError::from)?;

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_keys_share_one_binding() {
        let tags = CacheKeyType::Tags.new("all");
        let ingredients = CacheKeyType::Ingredients.new("sa");

        assert_eq!(tags.to_string(), "tags-all");
        assert_eq!(ingredients.to_string(), "ingredients-sa");
        assert!(matches!(
            CacheLifetime::from(&ingredients),
            CacheLifetime::BindCatalogCache
        ));
    }

    #[test]
    fn custom_keys_bind_to_themselves() {
        let key = CacheKeyType::Custom(String::from("v1")).new("shopping");
        assert_eq!(key.to_string(), "shopping");
        assert!(matches!(CacheLifetime::from(&key), CacheLifetime::Custom(v) if v == "v1"));
    }
}
