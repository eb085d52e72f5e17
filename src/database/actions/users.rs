use crate::{
    authentication::jwt::SessionData,
    error::{Error, ErrorKind},
    form::Form,
    pagination::{PageContext, PageRequest},
    schema::{RecipeShort, Relation, SubscriptionView, User, UserView, Uuid},
    store::Store,
};

use super::relations::{add_relation, remove_relation};

async fn existing_user<S: Store>(store: &S, id: Uuid) -> Result<User, Error> {
    store
        .get_user(id)
        .await?
        .ok_or_else(|| ErrorKind::NotFound.new("No user exists with specified id"))
}

pub async fn get_user_view<S: Store>(
    store: &S,
    viewer: Option<&SessionData>,
    id: Uuid,
) -> Result<UserView, Error> {
    let user = existing_user(store, id).await?;
    let is_subscribed = match viewer {
        Some(session) => {
            store
                .relation_exists(Relation::Subscription, session.user_id, user.id)
                .await?
        }
        None => false,
    };

    Ok(UserView::from_user(user, is_subscribed))
}

pub async fn me<S: Store>(store: &S, session: &SessionData) -> Result<UserView, Error> {
    let user = existing_user(store, session.user_id).await?;

    Ok(UserView::from_user(user, false))
}

/// `recipes_limit` query parameter; absent means every recipe.
pub fn recipes_limit(form: &Form) -> Result<Option<i64>, Error> {
    match form.get_number::<i64>("recipes_limit")? {
        Some(limit) if limit < 0 => Err(ErrorKind::InvalidRequest.field(
            "recipes_limit",
            "recipes_limit can't be negative",
        )),
        limit => Ok(limit),
    }
}

async fn subscription_view<S: Store>(
    store: &S,
    author: User,
    recipes_limit: Option<i64>,
) -> Result<SubscriptionView, Error> {
    let (recipes, recipes_count) = store.list_author_recipes(author.id, recipes_limit).await?;

    Ok(SubscriptionView {
        author: UserView::from_user(author, true),
        recipes_count,
        recipes: recipes.into_iter().map(RecipeShort::from).collect(),
    })
}

pub async fn fetch_subscriptions<S: Store>(
    store: &S,
    session: &SessionData,
    page: &PageRequest,
    recipes_limit: Option<i64>,
) -> Result<PageContext<SubscriptionView>, Error> {
    let (authors, total_count) = store
        .fetch_subscriptions(session.user_id, page.limit, page.offset())
        .await?;

    let mut results = Vec::with_capacity(authors.len());
    for author in authors {
        results.push(subscription_view(store, author, recipes_limit).await?);
    }

    Ok(PageContext::from_rows(results, total_count, page))
}

pub async fn subscribe<S: Store>(
    store: &S,
    session: &SessionData,
    author_id: Uuid,
    recipes_limit: Option<i64>,
) -> Result<SubscriptionView, Error> {
    let author = existing_user(store, author_id).await?;
    if author.id == session.user_id {
        return Err(ErrorKind::Conflict.new("You can't subscribe to yourself"));
    }

    add_relation(store, session, Relation::Subscription, author.id).await?;
    log::info!("{} subscribed to {}", session.username, author.id);

    subscription_view(store, author, recipes_limit).await
}

pub async fn unsubscribe<S: Store>(
    store: &S,
    session: &SessionData,
    author_id: Uuid,
) -> Result<(), Error> {
    let author = existing_user(store, author_id).await?;
    if author.id == session.user_id {
        return Err(ErrorKind::Conflict.new("You can't unsubscribe from yourself"));
    }

    remove_relation(store, session, Relation::Subscription, author.id).await
}
