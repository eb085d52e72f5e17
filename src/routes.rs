use std::convert::Infallible;

use redis::aio::MultiplexedConnection;
use serde::{de::DeserializeOwned, Serialize};
use warp::{
    filters::BoxedFilter,
    http::StatusCode,
    hyper::body::Bytes,
    reject::{self, Rejection},
    reply::{self, Reply, Response},
    Filter,
};

use crate::{
    actions::{ingredients, recipes, relations, shopping_cart, tags, users},
    constants::SHOPPING_LIST_FILENAME,
    error::{Error, ErrorKind},
    form::Form,
    jwt::{SessionData, SessionKey},
    middleware::{with_possible_session, with_session},
    pagination::PageRequest,
    schema::{RecipeDraft, RecipePatch, Relation, Uuid},
    shopping::PageLayout,
    store::Store,
};

/// Shared request context.
#[derive(Clone)]
pub struct App<S: Store> {
    pub store: S,
    pub key: SessionKey,
    pub cache: Option<MultiplexedConnection>,
    pub page_size: i64,
    pub layout: PageLayout,
}

impl<S: Store> App<S> {
    pub fn new(store: S, key: SessionKey, page_size: i64) -> Self {
        Self {
            store,
            key,
            cache: None,
            page_size,
            layout: PageLayout::default(),
        }
    }

    pub fn with_cache(mut self, cache: MultiplexedConnection) -> Self {
        self.cache = Some(cache);
        self
    }
}

fn with_app<S: Store>(app: App<S>) -> impl Filter<Extract = (App<S>,), Error = Infallible> + Clone {
    warp::any().map(move || app.clone())
}

/// Raw query string as a [`Form`]; a missing query is an empty form.
fn with_form() -> impl Filter<Extract = (Form,), Error = Rejection> + Clone {
    warp::query::raw()
        .or(warp::any().map(String::new))
        .unify()
        .and_then(|raw: String| async move { Form::from_query(&raw).map_err(reject::custom) })
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Rejection> {
    serde_json::from_slice(body)
        .map_err(|e| reject::custom(ErrorKind::InvalidRequest.new(&format!("Malformed body: {e}"))))
}

fn json<T: Serialize>(value: &T, status: StatusCode) -> Response {
    reply::with_status(reply::json(value), status).into_response()
}

fn no_content() -> Response {
    reply::with_status(warp::reply(), StatusCode::NO_CONTENT).into_response()
}

pub fn api<S: Store>(app: App<S>) -> BoxedFilter<(Response,)> {
    warp::path("api")
        .and(
            catalog_routes(app.clone())
                .or(recipe_routes(app.clone()))
                .unify()
                .or(user_routes(app))
                .unify(),
        )
        .boxed()
}

fn catalog_routes<S: Store>(app: App<S>) -> BoxedFilter<(Response,)> {
    let list_tags = warp::path!("tags")
        .and(warp::get())
        .and(with_app(app.clone()))
        .and_then(handle_list_tags::<S>);

    let get_tag = warp::path!("tags" / Uuid)
        .and(warp::get())
        .and(with_app(app.clone()))
        .and_then(handle_get_tag::<S>);

    let list_ingredients = warp::path!("ingredients")
        .and(warp::get())
        .and(with_form())
        .and(with_app(app.clone()))
        .and_then(handle_list_ingredients::<S>);

    let get_ingredient = warp::path!("ingredients" / Uuid)
        .and(warp::get())
        .and(with_app(app))
        .and_then(handle_get_ingredient::<S>);

    list_tags
        .or(get_tag)
        .unify()
        .or(list_ingredients)
        .unify()
        .or(get_ingredient)
        .unify()
        .boxed()
}

fn recipe_routes<S: Store>(app: App<S>) -> BoxedFilter<(Response,)> {
    let key = app.key.clone();

    let download = warp::path!("recipes" / "download_shopping_cart")
        .and(warp::get())
        .and(with_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_download_shopping_cart::<S>);

    let list = warp::path!("recipes")
        .and(warp::get())
        .and(with_form())
        .and(with_possible_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_list_recipes::<S>);

    let create = warp::path!("recipes")
        .and(warp::post())
        .and(with_session(key.clone()))
        .and(warp::body::bytes())
        .and(with_app(app.clone()))
        .and_then(handle_create_recipe::<S>);

    let get = warp::path!("recipes" / Uuid)
        .and(warp::get())
        .and(with_possible_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_get_recipe::<S>);

    let update = warp::path!("recipes" / Uuid)
        .and(warp::patch())
        .and(with_session(key.clone()))
        .and(warp::body::bytes())
        .and(with_app(app.clone()))
        .and_then(handle_update_recipe::<S>);

    let delete = warp::path!("recipes" / Uuid)
        .and(warp::delete())
        .and(with_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_delete_recipe::<S>);

    let favorite = warp::path!("recipes" / Uuid / "favorite")
        .and(warp::any().map(|| Relation::Favorite));
    let shopping_cart = warp::path!("recipes" / Uuid / "shopping_cart")
        .and(warp::any().map(|| Relation::ShoppingCart));
    let relation = favorite.or(shopping_cart).unify();

    let add_relation = relation
        .clone()
        .and(warp::post())
        .and(with_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_add_recipe_relation::<S>);

    let remove_relation = relation
        .and(warp::delete())
        .and(with_session(key))
        .and(with_app(app))
        .and_then(handle_remove_recipe_relation::<S>);

    download
        .or(list)
        .unify()
        .or(create)
        .unify()
        .or(get)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .or(add_relation)
        .unify()
        .or(remove_relation)
        .unify()
        .boxed()
}

fn user_routes<S: Store>(app: App<S>) -> BoxedFilter<(Response,)> {
    let key = app.key.clone();

    let me = warp::path!("users" / "me")
        .and(warp::get())
        .and(with_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_me::<S>);

    let subscriptions = warp::path!("users" / "subscriptions")
        .and(warp::get())
        .and(with_form())
        .and(with_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_list_subscriptions::<S>);

    let get = warp::path!("users" / Uuid)
        .and(warp::get())
        .and(with_possible_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_get_user::<S>);

    let subscribe = warp::path!("users" / Uuid / "subscribe")
        .and(warp::post())
        .and(with_form())
        .and(with_session(key.clone()))
        .and(with_app(app.clone()))
        .and_then(handle_subscribe::<S>);

    let unsubscribe = warp::path!("users" / Uuid / "subscribe")
        .and(warp::delete())
        .and(with_session(key))
        .and(with_app(app))
        .and_then(handle_unsubscribe::<S>);

    me.or(subscriptions)
        .unify()
        .or(get)
        .unify()
        .or(subscribe)
        .unify()
        .or(unsubscribe)
        .unify()
        .boxed()
}

// Catalog

async fn handle_list_tags<S: Store>(app: App<S>) -> Result<Response, Rejection> {
    let tags = tags::list_tags(&app.store, app.cache.clone())
        .await
        .map_err(reject::custom)?;

    Ok(json(&tags, StatusCode::OK))
}

async fn handle_get_tag<S: Store>(id: Uuid, app: App<S>) -> Result<Response, Rejection> {
    let tag = tags::get_tag(&app.store, id).await.map_err(reject::custom)?;

    Ok(json(&tag, StatusCode::OK))
}

async fn handle_list_ingredients<S: Store>(form: Form, app: App<S>) -> Result<Response, Rejection> {
    let list = ingredients::list_ingredients(&app.store, form.get_str("name"), app.cache.clone())
        .await
        .map_err(reject::custom)?;

    Ok(json(&list, StatusCode::OK))
}

async fn handle_get_ingredient<S: Store>(id: Uuid, app: App<S>) -> Result<Response, Rejection> {
    let ingredient = ingredients::get_ingredient(&app.store, id)
        .await
        .map_err(reject::custom)?;

    Ok(json(&ingredient, StatusCode::OK))
}

// Recipes

async fn handle_list_recipes<S: Store>(
    form: Form,
    viewer: Option<SessionData>,
    app: App<S>,
) -> Result<Response, Rejection> {
    let query = recipes::RecipeQuery::from_form(&form).map_err(reject::custom)?;
    let page = PageRequest::from_form(&form, app.page_size).map_err(reject::custom)?;

    let recipes = recipes::fetch_recipes(&app.store, viewer.as_ref(), &query, &page)
        .await
        .map_err(reject::custom)?;

    Ok(json(&recipes, StatusCode::OK))
}

async fn handle_create_recipe<S: Store>(
    session: SessionData,
    body: Bytes,
    app: App<S>,
) -> Result<Response, Rejection> {
    let draft: RecipeDraft = parse_body(&body)?;
    let recipe = recipes::create_recipe(&app.store, &session, &draft)
        .await
        .map_err(reject::custom)?;

    Ok(json(&recipe, StatusCode::CREATED))
}

async fn handle_get_recipe<S: Store>(
    id: Uuid,
    viewer: Option<SessionData>,
    app: App<S>,
) -> Result<Response, Rejection> {
    let recipe = recipes::get_recipe(&app.store, viewer.as_ref(), id)
        .await
        .map_err(reject::custom)?;

    Ok(json(&recipe, StatusCode::OK))
}

async fn handle_update_recipe<S: Store>(
    id: Uuid,
    session: SessionData,
    body: Bytes,
    app: App<S>,
) -> Result<Response, Rejection> {
    let patch: RecipePatch = parse_body(&body)?;
    let recipe = recipes::update_recipe(&app.store, &session, id, &patch)
        .await
        .map_err(reject::custom)?;

    Ok(json(&recipe, StatusCode::OK))
}

async fn handle_delete_recipe<S: Store>(
    id: Uuid,
    session: SessionData,
    app: App<S>,
) -> Result<Response, Rejection> {
    recipes::delete_recipe(&app.store, &session, id)
        .await
        .map_err(reject::custom)?;

    Ok(no_content())
}

async fn handle_add_recipe_relation<S: Store>(
    id: Uuid,
    relation: Relation,
    session: SessionData,
    app: App<S>,
) -> Result<Response, Rejection> {
    let recipe = relations::add_recipe_relation(&app.store, &session, relation, id)
        .await
        .map_err(reject::custom)?;

    Ok(json(&recipe, StatusCode::CREATED))
}

async fn handle_remove_recipe_relation<S: Store>(
    id: Uuid,
    relation: Relation,
    session: SessionData,
    app: App<S>,
) -> Result<Response, Rejection> {
    relations::remove_recipe_relation(&app.store, &session, relation, id)
        .await
        .map_err(reject::custom)?;

    Ok(no_content())
}

async fn handle_download_shopping_cart<S: Store>(
    session: SessionData,
    app: App<S>,
) -> Result<Response, Rejection> {
    let list = shopping_cart::download_shopping_cart(&app.store, &session, &app.layout)
        .await
        .map_err(reject::custom)?;

    let reply = reply::with_header(
        list.to_text(),
        "content-disposition",
        format!("attachment; filename={SHOPPING_LIST_FILENAME}"),
    );

    Ok(reply.into_response())
}

// Users

async fn handle_me<S: Store>(session: SessionData, app: App<S>) -> Result<Response, Rejection> {
    let user = users::me(&app.store, &session)
        .await
        .map_err(reject::custom)?;

    Ok(json(&user, StatusCode::OK))
}

async fn handle_get_user<S: Store>(
    id: Uuid,
    viewer: Option<SessionData>,
    app: App<S>,
) -> Result<Response, Rejection> {
    let user = users::get_user_view(&app.store, viewer.as_ref(), id)
        .await
        .map_err(reject::custom)?;

    Ok(json(&user, StatusCode::OK))
}

async fn handle_list_subscriptions<S: Store>(
    form: Form,
    session: SessionData,
    app: App<S>,
) -> Result<Response, Rejection> {
    let page = PageRequest::from_form(&form, app.page_size).map_err(reject::custom)?;
    let limit = users::recipes_limit(&form).map_err(reject::custom)?;

    let subscriptions = users::fetch_subscriptions(&app.store, &session, &page, limit)
        .await
        .map_err(reject::custom)?;

    Ok(json(&subscriptions, StatusCode::OK))
}

async fn handle_subscribe<S: Store>(
    id: Uuid,
    form: Form,
    session: SessionData,
    app: App<S>,
) -> Result<Response, Rejection> {
    let limit = users::recipes_limit(&form).map_err(reject::custom)?;
    let subscription = users::subscribe(&app.store, &session, id, limit)
        .await
        .map_err(reject::custom)?;

    Ok(json(&subscription, StatusCode::CREATED))
}

async fn handle_unsubscribe<S: Store>(
    id: Uuid,
    session: SessionData,
    app: App<S>,
) -> Result<Response, Rejection> {
    users::unsubscribe(&app.store, &session, id)
        .await
        .map_err(reject::custom)?;

    Ok(no_content())
}

/// Renders every rejection as `{"errors": ..}` with the matching status.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let error: Error = if let Some(e) = err.find::<Error>() {
        e.clone()
    } else if err.is_not_found() {
        ErrorKind::NotFound.default()
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        ErrorKind::MethodNotAllowed.default()
    } else if let Some(e) = err.find::<reject::InvalidQuery>() {
        ErrorKind::InvalidRequest.new(&e.to_string())
    } else if let Some(e) = err.find::<reject::InvalidHeader>() {
        ErrorKind::InvalidRequest.new(&e.to_string())
    } else {
        log::error!("Unhandled rejection: {err:?}");
        ErrorKind::InternalServerError.default()
    };

    if error.kind == ErrorKind::InternalServerError {
        log::error!("{error}");
    }

    Ok(json(&error.body(), error.kind.status()))
}
