use warp::{reject::Rejection, Filter};

use crate::error::ErrorKind;

use super::jwt::{verify_jwt_session, SessionData, SessionKey};

fn strip_scheme(header: &str) -> Option<&str> {
    header
        .strip_prefix("Token ")
        .or_else(|| header.strip_prefix("Bearer "))
        .map(str::trim)
}

pub fn with_session(
    key: SessionKey,
) -> impl Filter<Extract = (SessionData,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let key = key.clone();
        async move {
            let token = match header.as_deref().and_then(strip_scheme) {
                Some(token) => token,
                None => return Err(warp::reject::custom(ErrorKind::Unauthorized.default())),
            };

            verify_jwt_session(token, &key)
                .map(SessionData::from)
                .map_err(warp::reject::custom)
        }
    })
}

/// Anonymous when the header is missing or the token doesn't verify.
pub fn with_possible_session(
    key: SessionKey,
) -> impl Filter<Extract = (Option<SessionData>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").map(move |header: Option<String>| {
        header
            .as_deref()
            .and_then(strip_scheme)
            .and_then(|token| verify_jwt_session(token, &key).ok())
            .map(SessionData::from)
    })
}
