use std::str::FromStr;

use super::error::{Error, TypeError};

/// Decoded `application/x-www-form-urlencoded` query string. Keys may repeat,
/// as in `?tags=lunch&tags=dinner`.
#[derive(Debug, Clone, Default)]
pub struct Form {
    inner: Vec<(String, String)>,
}

impl Form {
    pub fn from_query(query: &str) -> Result<Self, Error> {
        let inner: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|_e| TypeError::new("Malformed query string"))?;

        Ok(Self { inner })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<String> {
        self.inner
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.to_owned())
            .collect()
    }

    pub fn get_number<T>(&self, key: &str) -> Result<Option<T>, Error>
    where
        T: FromStr,
    {
        match self.get_str(key) {
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_e| TypeError::new(&format!("Invalid number for {key}")).into()),
            None => Ok(None),
        }
    }

    /// Accepts `1`/`0` and `true`/`false`.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, Error> {
        match self.get_str(key) {
            Some("1") | Some("true") | Some("True") => Ok(Some(true)),
            Some("0") | Some("false") | Some("False") => Ok(Some(false)),
            Some(_) => Err(TypeError::new(&format!("Invalid boolean for {key}")).into()),
            None => Ok(None),
        }
    }
}
