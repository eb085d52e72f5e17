use async_trait::async_trait;

use crate::{
    error::Error,
    schema::{
        Ingredient, IngredientAmount, Recipe, RecipeAggregate, RecipeDraft, RecipeFilter,
        Relation, ShoppingListLine, Tag, Uuid, User,
    },
};

/// Storage collaborator. Reads run against committed state; every mutation
/// goes through a [`StoreTx`] obtained from [`Store::begin`].
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx, Error>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Error>;
    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, Error>;

    async fn list_tags(&self) -> Result<Vec<Tag>, Error>;
    async fn get_tag(&self, id: Uuid) -> Result<Option<Tag>, Error>;
    async fn find_tags(&self, ids: &[Uuid]) -> Result<Vec<Tag>, Error>;

    /// Ingredients whose name starts with `prefix` (case-insensitive), by name.
    async fn list_ingredients(&self, prefix: Option<&str>) -> Result<Vec<Ingredient>, Error>;
    async fn get_ingredient(&self, id: Uuid) -> Result<Option<Ingredient>, Error>;
    async fn find_ingredients(&self, ids: &[Uuid]) -> Result<Vec<Ingredient>, Error>;

    async fn get_recipe(&self, id: Uuid) -> Result<Option<Recipe>, Error>;

    /// Recipe with its ingredient lines and tags, read from a single snapshot.
    async fn load_recipe(&self, id: Uuid) -> Result<Option<RecipeAggregate>, Error>;

    /// One page of recipes, newest first, and the total number of matches.
    async fn fetch_recipes(
        &self,
        filter: &RecipeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RecipeAggregate>, i64), Error>;

    /// Recipes of an author, newest first, optionally truncated, and their total count.
    async fn list_author_recipes(
        &self,
        author_id: Uuid,
        limit: Option<i64>,
    ) -> Result<(Vec<Recipe>, i64), Error>;

    /// The subset of `target_ids` the user is related to.
    async fn list_related(
        &self,
        relation: Relation,
        user_id: Uuid,
        target_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, Error>;

    async fn relation_exists(
        &self,
        relation: Relation,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, Error> {
        Ok(!self
            .list_related(relation, user_id, &[target_id])
            .await?
            .is_empty())
    }

    /// Authors the user subscribes to, most recent first, and their total count.
    async fn fetch_subscriptions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), Error>;

    /// Ingredient totals over every recipe in the user's cart, sorted by name then unit.
    async fn sum_shopping_cart(&self, user_id: Uuid) -> Result<Vec<ShoppingListLine>, Error>;
}

/// Transaction scope. Dropping it without [`StoreTx::commit`] discards every write.
#[async_trait]
pub trait StoreTx: Send {
    async fn insert_recipe(&mut self, author_id: Uuid, draft: &RecipeDraft)
        -> Result<Recipe, Error>;
    /// Returns `false` when the recipe no longer exists.
    async fn update_recipe(&mut self, recipe: &Recipe) -> Result<bool, Error>;

    /// Removes the recipe and every row referring to it.
    async fn delete_recipe(&mut self, id: Uuid) -> Result<bool, Error>;

    async fn delete_recipe_ingredients(&mut self, recipe_id: Uuid) -> Result<u64, Error>;
    async fn insert_recipe_ingredients(
        &mut self,
        recipe_id: Uuid,
        lines: &[IngredientAmount],
    ) -> Result<(), Error>;

    async fn delete_recipe_tags(&mut self, recipe_id: Uuid) -> Result<u64, Error>;
    async fn insert_recipe_tags(&mut self, recipe_id: Uuid, tags: &[Uuid]) -> Result<(), Error>;

    /// Returns `false` when the relation already exists.
    async fn insert_relation(
        &mut self,
        relation: Relation,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, Error>;

    /// Returns `false` when there was nothing to remove.
    async fn delete_relation(
        &mut self,
        relation: Relation,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, Error>;

    async fn commit(self) -> Result<(), Error>;
}
