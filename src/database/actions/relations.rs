use crate::{
    authentication::jwt::SessionData,
    error::{Error, ErrorKind},
    schema::{RecipeShort, Relation, Uuid},
    store::{Store, StoreTx},
};

/// Adds the (user, target) row. A row that already exists is a conflict, both
/// when seen up front and when the insert itself reports it.
pub async fn add_relation<S: Store>(
    store: &S,
    session: &SessionData,
    relation: Relation,
    target_id: Uuid,
) -> Result<(), Error> {
    session.authenticate(relation.action())?;

    if store
        .relation_exists(relation, session.user_id, target_id)
        .await?
    {
        return Err(ErrorKind::Conflict.new(relation.exists_message()));
    }

    let mut tr = store.begin().await?;
    if !tr
        .insert_relation(relation, session.user_id, target_id)
        .await?
    {
        log::warn!(
            "{:?} {} -> {} was inserted concurrently",
            relation,
            session.user_id,
            target_id
        );
        return Err(ErrorKind::Conflict.new(relation.exists_message()));
    }
    tr.commit().await?;

    Ok(())
}

pub async fn remove_relation<S: Store>(
    store: &S,
    session: &SessionData,
    relation: Relation,
    target_id: Uuid,
) -> Result<(), Error> {
    session.authenticate(relation.action())?;

    let mut tr = store.begin().await?;
    if !tr
        .delete_relation(relation, session.user_id, target_id)
        .await?
    {
        return Err(ErrorKind::NotFound.new(relation.missing_message()));
    }
    tr.commit().await?;

    Ok(())
}

async fn existing_recipe<S: Store>(store: &S, recipe_id: Uuid) -> Result<RecipeShort, Error> {
    store
        .get_recipe(recipe_id)
        .await?
        .map(RecipeShort::from)
        .ok_or_else(|| ErrorKind::NotFound.new("No recipe exists with specified id"))
}

/// Favorite or cart add; returns the short projection of the recipe.
pub async fn add_recipe_relation<S: Store>(
    store: &S,
    session: &SessionData,
    relation: Relation,
    recipe_id: Uuid,
) -> Result<RecipeShort, Error> {
    let recipe = existing_recipe(store, recipe_id).await?;
    add_relation(store, session, relation, recipe_id).await?;

    Ok(recipe)
}

pub async fn remove_recipe_relation<S: Store>(
    store: &S,
    session: &SessionData,
    relation: Relation,
    recipe_id: Uuid,
) -> Result<(), Error> {
    existing_recipe(store, recipe_id).await?;
    remove_relation(store, session, relation, recipe_id).await
}
