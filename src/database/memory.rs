use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{
    constants::{MIN_AMOUNT, MIN_COOKING_TIME},
    error::{Error, ErrorKind},
    shopping::aggregate_lines,
    schema::{
        Ingredient, IngredientAmount, Recipe, RecipeAggregate, RecipeDraft, RecipeFilter,
        RecipePart, Relation, ShoppingListLine, Tag, User, UserRole, Uuid,
    },
    store::{Store, StoreTx},
};

static COLOR_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
static SLUG_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn pattern(
    cell: &'static OnceLock<Result<Regex, regex::Error>>,
    source: &str,
) -> Result<&'static Regex, Error> {
    cell.get_or_init(|| Regex::new(source))
        .as_ref()
        .map_err(|e| ErrorKind::InternalServerError.new(&e.to_string()))
}

/// Same checks as the `tags` table constraints.
fn check_tag(name: &str, color: &str, slug: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(ErrorKind::InvalidRequest.field("name", "Tag name can't be empty"));
    }
    if !pattern(&COLOR_PATTERN, r"^#(?:[0-9a-fA-F]{3}){1,2}$")?.is_match(color) {
        return Err(ErrorKind::InvalidRequest.field("color", "Color must be a hex color like #E26C2D"));
    }
    if !pattern(&SLUG_PATTERN, r"^[-a-zA-Z0-9_]+$")?.is_match(slug) {
        return Err(ErrorKind::InvalidRequest.field("slug", "Slug may only contain letters, digits, - and _"));
    }

    Ok(())
}

#[derive(Clone, Default)]
struct State {
    next_id: Uuid,
    users: BTreeMap<Uuid, User>,
    ingredients: BTreeMap<Uuid, Ingredient>,
    tags: BTreeMap<Uuid, Tag>,
    recipes: BTreeMap<Uuid, Recipe>,
    // (recipe, ingredient, amount) in insertion order
    recipe_ingredients: Vec<(Uuid, Uuid, i32)>,
    recipe_tags: Vec<(Uuid, Uuid)>,
    relations: Vec<(Relation, Uuid, Uuid)>,
}

impl State {
    fn next_id(&mut self) -> Uuid {
        self.next_id += 1;
        self.next_id
    }

    fn aggregate(&self, recipe: &Recipe) -> RecipeAggregate {
        let ingredients = self
            .recipe_ingredients
            .iter()
            .filter(|(recipe_id, _, _)| *recipe_id == recipe.id)
            .filter_map(|(recipe_id, ingredient_id, amount)| {
                self.ingredients.get(ingredient_id).map(|i| RecipePart {
                    recipe_id: *recipe_id,
                    ingredient_id: i.id,
                    name: i.name.to_owned(),
                    measurement_unit: i.measurement_unit.to_owned(),
                    amount: *amount,
                })
            })
            .collect();

        let tags = self
            .recipe_tags
            .iter()
            .filter(|(recipe_id, _)| *recipe_id == recipe.id)
            .filter_map(|(_, tag_id)| self.tags.get(tag_id).cloned())
            .collect();

        RecipeAggregate {
            recipe: recipe.clone(),
            ingredients,
            tags,
        }
    }

    fn has_relation(&self, relation: Relation, user_id: Uuid, target_id: Uuid) -> bool {
        self.relations.contains(&(relation, user_id, target_id))
    }

    fn matches(&self, recipe: &Recipe, filter: &RecipeFilter) -> bool {
        if filter.author.is_some_and(|author| author != recipe.author_id) {
            return false;
        }
        if !filter.tags.is_empty() {
            let tagged = self.recipe_tags.iter().any(|(recipe_id, tag_id)| {
                *recipe_id == recipe.id
                    && self
                        .tags
                        .get(tag_id)
                        .is_some_and(|tag| filter.tags.contains(&tag.slug))
            });
            if !tagged {
                return false;
            }
        }
        if let Some(user_id) = filter.favorited_by {
            if !self.has_relation(Relation::Favorite, user_id, recipe.id) {
                return false;
            }
        }
        if let Some(user_id) = filter.in_cart_of {
            if !self.has_relation(Relation::ShoppingCart, user_id, recipe.id) {
                return false;
            }
        }
        true
    }
}

/// In-process store with the same constraint semantics as the Postgres schema.
/// Writers are serialised; a transaction works on a private copy that replaces
/// the shared state on commit.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, username: &str, role: UserRole) -> User {
        let mut state = self.state.write().await;
        let user = User {
            id: state.next_id(),
            email: format!("{username}@foodgram.local"),
            username: username.to_owned(),
            first_name: username.to_owned(),
            last_name: String::new(),
            role,
        };
        state.users.insert(user.id, user.clone());
        user
    }

    pub async fn add_ingredient(&self, name: &str, measurement_unit: &str) -> Result<Ingredient, Error> {
        let mut state = self.state.write().await;
        if state
            .ingredients
            .values()
            .any(|i| i.name == name && i.measurement_unit == measurement_unit)
        {
            return Err(ErrorKind::Conflict.new("Ingredient already exists"));
        }

        let ingredient = Ingredient {
            id: state.next_id(),
            name: name.to_owned(),
            measurement_unit: measurement_unit.to_owned(),
        };
        state.ingredients.insert(ingredient.id, ingredient.clone());
        Ok(ingredient)
    }

    pub async fn add_tag(&self, name: &str, color: &str, slug: &str) -> Result<Tag, Error> {
        check_tag(name, color, slug)?;

        let mut state = self.state.write().await;
        if state.tags.values().any(|t| t.name == name || t.slug == slug) {
            return Err(ErrorKind::Conflict.new("Tag already exists"));
        }

        let tag = Tag {
            id: state.next_id(),
            name: name.to_owned(),
            color: color.to_owned(),
            slug: slug.to_owned(),
        };
        state.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    pub async fn recipe_count(&self) -> usize {
        self.state.read().await.recipes.len()
    }

    /// Number of (ingredient, tag) association rows stored for a recipe.
    pub async fn association_count(&self, recipe_id: Uuid) -> (usize, usize) {
        let state = self.state.read().await;
        (
            state
                .recipe_ingredients
                .iter()
                .filter(|(id, _, _)| *id == recipe_id)
                .count(),
            state
                .recipe_tags
                .iter()
                .filter(|(id, _)| *id == recipe_id)
                .count(),
        )
    }

    pub async fn relation_count(&self, relation: Relation) -> usize {
        self.state
            .read()
            .await
            .relations
            .iter()
            .filter(|(r, _, _)| *r == relation)
            .count()
    }
}

#[async_trait]
impl Store for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, Error> {
        let guard = self.state.clone().write_owned().await;
        let working = guard.clone();

        Ok(MemoryTx { guard, working })
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Error> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, Error> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id).cloned())
            .collect())
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, Error> {
        Ok(self.state.read().await.tags.values().cloned().collect())
    }

    async fn get_tag(&self, id: Uuid) -> Result<Option<Tag>, Error> {
        Ok(self.state.read().await.tags.get(&id).cloned())
    }

    async fn find_tags(&self, ids: &[Uuid]) -> Result<Vec<Tag>, Error> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.tags.get(id).cloned())
            .collect())
    }

    async fn list_ingredients(&self, prefix: Option<&str>) -> Result<Vec<Ingredient>, Error> {
        let prefix = prefix.map(str::to_lowercase);
        let state = self.state.read().await;

        let mut list: Vec<Ingredient> = state
            .ingredients
            .values()
            .filter(|i| {
                prefix
                    .as_deref()
                    .map_or(true, |prefix| i.name.to_lowercase().starts_with(prefix))
            })
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));

        Ok(list)
    }

    async fn get_ingredient(&self, id: Uuid) -> Result<Option<Ingredient>, Error> {
        Ok(self.state.read().await.ingredients.get(&id).cloned())
    }

    async fn find_ingredients(&self, ids: &[Uuid]) -> Result<Vec<Ingredient>, Error> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.ingredients.get(id).cloned())
            .collect())
    }

    async fn get_recipe(&self, id: Uuid) -> Result<Option<Recipe>, Error> {
        Ok(self.state.read().await.recipes.get(&id).cloned())
    }

    async fn load_recipe(&self, id: Uuid) -> Result<Option<RecipeAggregate>, Error> {
        let state = self.state.read().await;
        Ok(state.recipes.get(&id).map(|recipe| state.aggregate(recipe)))
    }

    async fn fetch_recipes(
        &self,
        filter: &RecipeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RecipeAggregate>, i64), Error> {
        let state = self.state.read().await;

        let mut matching: Vec<&Recipe> = state
            .recipes
            .values()
            .filter(|recipe| state.matches(recipe, filter))
            .collect();
        matching.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));

        let total_count = matching.len() as i64;
        let page = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|recipe| state.aggregate(recipe))
            .collect();

        Ok((page, total_count))
    }

    async fn list_author_recipes(
        &self,
        author_id: Uuid,
        limit: Option<i64>,
    ) -> Result<(Vec<Recipe>, i64), Error> {
        let state = self.state.read().await;

        let mut recipes: Vec<Recipe> = state
            .recipes
            .values()
            .filter(|recipe| recipe.author_id == author_id)
            .cloned()
            .collect();
        recipes.sort_by(|a, b| b.pub_date.cmp(&a.pub_date).then(b.id.cmp(&a.id)));

        let total_count = recipes.len() as i64;
        if let Some(limit) = limit {
            recipes.truncate(limit.max(0) as usize);
        }

        Ok((recipes, total_count))
    }

    async fn list_related(
        &self,
        relation: Relation,
        user_id: Uuid,
        target_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, Error> {
        let state = self.state.read().await;
        Ok(target_ids
            .iter()
            .filter(|target_id| state.has_relation(relation, user_id, **target_id))
            .copied()
            .collect())
    }

    async fn fetch_subscriptions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), Error> {
        let state = self.state.read().await;

        let authors: Vec<User> = state
            .relations
            .iter()
            .rev()
            .filter(|(relation, follower, _)| {
                *relation == Relation::Subscription && *follower == user_id
            })
            .filter_map(|(_, _, author_id)| state.users.get(author_id).cloned())
            .collect();

        let total_count = authors.len() as i64;
        let page = authors
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok((page, total_count))
    }

    async fn sum_shopping_cart(&self, user_id: Uuid) -> Result<Vec<ShoppingListLine>, Error> {
        let state = self.state.read().await;

        let parts = state
            .recipe_ingredients
            .iter()
            .filter(|(recipe_id, _, _)| state.has_relation(Relation::ShoppingCart, user_id, *recipe_id))
            .filter_map(|(_, ingredient_id, amount)| {
                state.ingredients.get(ingredient_id).map(|i| {
                    (
                        i.name.to_owned(),
                        i.measurement_unit.to_owned(),
                        i64::from(*amount),
                    )
                })
            });

        Ok(aggregate_lines(parts))
    }
}

pub struct MemoryTx {
    guard: OwnedRwLockWriteGuard<State>,
    working: State,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_recipe(
        &mut self,
        author_id: Uuid,
        draft: &RecipeDraft,
    ) -> Result<Recipe, Error> {
        if !self.working.users.contains_key(&author_id) {
            return Err(ErrorKind::InvalidRequest.new("Author doesn't exist"));
        }
        if draft.cooking_time < MIN_COOKING_TIME {
            return Err(ErrorKind::InvalidRequest.field("cooking_time", "Cooking time must be positive"));
        }

        let recipe = Recipe {
            id: self.working.next_id(),
            author_id,
            name: draft.name.to_owned(),
            image: draft.image.to_owned(),
            text: draft.text.to_owned(),
            cooking_time: draft.cooking_time,
            pub_date: Utc::now(),
        };
        self.working.recipes.insert(recipe.id, recipe.clone());

        Ok(recipe)
    }

    async fn update_recipe(&mut self, recipe: &Recipe) -> Result<bool, Error> {
        if recipe.cooking_time < MIN_COOKING_TIME {
            return Err(ErrorKind::InvalidRequest.field("cooking_time", "Cooking time must be positive"));
        }

        let Some(stored) = self.working.recipes.get_mut(&recipe.id) else {
            return Ok(false);
        };
        stored.name = recipe.name.to_owned();
        stored.image = recipe.image.to_owned();
        stored.text = recipe.text.to_owned();
        stored.cooking_time = recipe.cooking_time;

        Ok(true)
    }

    async fn delete_recipe(&mut self, id: Uuid) -> Result<bool, Error> {
        let state = &mut self.working;

        state.recipe_ingredients.retain(|(recipe_id, _, _)| *recipe_id != id);
        state.recipe_tags.retain(|(recipe_id, _)| *recipe_id != id);
        state.relations.retain(|(relation, _, target_id)| {
            *relation == Relation::Subscription || *target_id != id
        });

        Ok(state.recipes.remove(&id).is_some())
    }

    async fn delete_recipe_ingredients(&mut self, recipe_id: Uuid) -> Result<u64, Error> {
        let before = self.working.recipe_ingredients.len();
        self.working
            .recipe_ingredients
            .retain(|(id, _, _)| *id != recipe_id);

        Ok((before - self.working.recipe_ingredients.len()) as u64)
    }

    async fn insert_recipe_ingredients(
        &mut self,
        recipe_id: Uuid,
        lines: &[IngredientAmount],
    ) -> Result<(), Error> {
        let state = &mut self.working;
        if !state.recipes.contains_key(&recipe_id) {
            return Err(ErrorKind::InvalidRequest.new("Recipe doesn't exist"));
        }

        for line in lines {
            if line.amount < MIN_AMOUNT {
                return Err(ErrorKind::InvalidRequest.field("amount", "Amount must be positive"));
            }
            if !state.ingredients.contains_key(&line.id) {
                return Err(ErrorKind::InvalidRequest.field("ingredients", "Ingredient doesn't exist"));
            }
            if state
                .recipe_ingredients
                .iter()
                .any(|(r, i, _)| *r == recipe_id && *i == line.id)
            {
                return Err(ErrorKind::Conflict.field("ingredients", "Ingredient is already in the recipe"));
            }
            state.recipe_ingredients.push((recipe_id, line.id, line.amount));
        }

        Ok(())
    }

    async fn delete_recipe_tags(&mut self, recipe_id: Uuid) -> Result<u64, Error> {
        let before = self.working.recipe_tags.len();
        self.working.recipe_tags.retain(|(id, _)| *id != recipe_id);

        Ok((before - self.working.recipe_tags.len()) as u64)
    }

    async fn insert_recipe_tags(&mut self, recipe_id: Uuid, tags: &[Uuid]) -> Result<(), Error> {
        let state = &mut self.working;
        if !state.recipes.contains_key(&recipe_id) {
            return Err(ErrorKind::InvalidRequest.new("Recipe doesn't exist"));
        }

        for tag_id in tags {
            if !state.tags.contains_key(tag_id) {
                return Err(ErrorKind::InvalidRequest.field("tags", "Tag doesn't exist"));
            }
            if state.recipe_tags.contains(&(recipe_id, *tag_id)) {
                return Err(ErrorKind::Conflict.field("tags", "Tag is already in the recipe"));
            }
            state.recipe_tags.push((recipe_id, *tag_id));
        }

        Ok(())
    }

    async fn insert_relation(
        &mut self,
        relation: Relation,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, Error> {
        let state = &mut self.working;

        let target_exists = match relation {
            Relation::Favorite | Relation::ShoppingCart => state.recipes.contains_key(&target_id),
            Relation::Subscription => state.users.contains_key(&target_id),
        };
        if !state.users.contains_key(&user_id) || !target_exists {
            return Err(ErrorKind::InvalidRequest.new("Referenced row doesn't exist"));
        }
        if relation == Relation::Subscription && user_id == target_id {
            return Err(ErrorKind::Conflict.new("You can't subscribe to yourself"));
        }
        if state.has_relation(relation, user_id, target_id) {
            return Ok(false);
        }

        state.relations.push((relation, user_id, target_id));
        Ok(true)
    }

    async fn delete_relation(
        &mut self,
        relation: Relation,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, Error> {
        let before = self.working.relations.len();
        self.working
            .relations
            .retain(|row| *row != (relation, user_id, target_id));

        Ok(self.working.relations.len() < before)
    }

    async fn commit(self) -> Result<(), Error> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(name: &str) -> RecipeDraft {
        RecipeDraft {
            name: name.to_owned(),
            text: String::from("Mix"),
            image: String::new(),
            cooking_time: 5,
            ingredients: vec![],
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn dropped_transaction_leaves_no_trace() {
        let store = MemoryStore::new();
        let author = store.add_user("chef", UserRole::User).await;

        let mut tr = store.begin().await.unwrap();
        tr.insert_recipe(author.id, &draft("Soup")).await.unwrap();
        drop(tr);

        assert_eq!(store.recipe_count().await, 0);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let store = MemoryStore::new();
        let author = store.add_user("chef", UserRole::User).await;

        let mut tr = store.begin().await.unwrap();
        let recipe = tr.insert_recipe(author.id, &draft("Soup")).await.unwrap();
        tr.commit().await.unwrap();

        assert_eq!(store.get_recipe(recipe.id).await.unwrap(), Some(recipe));
    }

    #[tokio::test]
    async fn duplicate_relation_is_reported_not_raised() {
        let store = MemoryStore::new();
        let author = store.add_user("chef", UserRole::User).await;
        let reader = store.add_user("reader", UserRole::User).await;

        let mut tr = store.begin().await.unwrap();
        assert!(tr
            .insert_relation(Relation::Subscription, reader.id, author.id)
            .await
            .unwrap());
        assert!(!tr
            .insert_relation(Relation::Subscription, reader.id, author.id)
            .await
            .unwrap());
        tr.commit().await.unwrap();

        assert_eq!(store.relation_count(Relation::Subscription).await, 1);
    }

    #[tokio::test]
    async fn self_subscription_violates_the_check() {
        let store = MemoryStore::new();
        let author = store.add_user("chef", UserRole::User).await;

        let mut tr = store.begin().await.unwrap();
        let err = tr
            .insert_relation(Relation::Subscription, author.id, author.id)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn updating_a_missing_recipe_reports_false() {
        let store = MemoryStore::new();
        let author = store.add_user("chef", UserRole::User).await;

        let mut tr = store.begin().await.unwrap();
        let mut recipe = tr.insert_recipe(author.id, &draft("Soup")).await.unwrap();
        tr.commit().await.unwrap();

        let mut tr = store.begin().await.unwrap();
        assert!(tr.update_recipe(&recipe).await.unwrap());
        assert!(tr.delete_recipe(recipe.id).await.unwrap());
        recipe.name = String::from("Stew");
        assert!(!tr.update_recipe(&recipe).await.unwrap());
    }

    #[tokio::test]
    async fn tags_follow_the_table_constraints() {
        let store = MemoryStore::new();
        assert!(store.add_tag("Lunch", "#E26C2D", "lunch").await.is_ok());
        assert!(store.add_tag("Brunch", "#fff", "late-brunch_2").await.is_ok());

        for color in ["E26C2D", "#E26C2", "#GGGGGG", ""] {
            let err = store.add_tag("Dinner", color, "dinner").await.unwrap_err();
            assert_eq!(err.field, Some("color"));
        }

        let err = store.add_tag("Dinner", "#fff", "late dinner").await.unwrap_err();
        assert_eq!(err.field, Some("slug"));

        let err = store.add_tag("Lunch", "#000", "lunch-2").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn catalog_rejects_duplicate_ingredient() {
        let store = MemoryStore::new();
        store.add_ingredient("Salt", "g").await.unwrap();
        store.add_ingredient("Salt", "kg").await.unwrap();

        let err = store.add_ingredient("Salt", "g").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }
}
