use std::collections::{HashMap, HashSet};

use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    constants::{MAX_INGREDIENTS, MAX_NAME_LENGTH, MAX_TAGS, MIN_AMOUNT, MIN_COOKING_TIME},
    error::{Error, ErrorKind},
    form::Form,
    pagination::{PageContext, PageRequest},
    schema::{
        IngredientAmount, Recipe, RecipeAggregate, RecipeDraft, RecipeFilter, RecipePatch,
        RecipeView, Relation, UserView, Uuid,
    },
    store::{Store, StoreTx},
};

// Validation

fn validate_name(name: &str) -> Result<(), Error> {
    if name.trim().is_empty() {
        return Err(ErrorKind::InvalidRequest.field("name", "Recipe name can't be empty"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(ErrorKind::InvalidRequest.field(
            "name",
            &format!("Recipe name can be at most {MAX_NAME_LENGTH} characters"),
        ));
    }
    Ok(())
}

fn validate_text(text: &str) -> Result<(), Error> {
    if text.trim().is_empty() {
        return Err(ErrorKind::InvalidRequest.field("text", "Recipe description can't be empty"));
    }
    Ok(())
}

fn validate_image(image: &str) -> Result<(), Error> {
    if image.trim().is_empty() {
        return Err(ErrorKind::InvalidRequest.field("image", "Recipe needs an image"));
    }
    Ok(())
}

fn validate_cooking_time(cooking_time: i32) -> Result<(), Error> {
    if cooking_time < MIN_COOKING_TIME {
        return Err(ErrorKind::InvalidRequest.field(
            "cooking_time",
            &format!("Cooking time must be at least {MIN_COOKING_TIME} minute"),
        ));
    }
    Ok(())
}

fn validate_ingredients(ingredients: &[IngredientAmount]) -> Result<(), Error> {
    if ingredients.is_empty() {
        return Err(ErrorKind::InvalidRequest.field("ingredients", "Recipe needs at least one ingredient"));
    }
    if ingredients.len() > MAX_INGREDIENTS {
        return Err(ErrorKind::InvalidRequest.field(
            "ingredients",
            &format!("Recipe can have at most {MAX_INGREDIENTS} ingredients"),
        ));
    }

    let mut seen = HashSet::new();
    for line in ingredients {
        if !seen.insert(line.id) {
            return Err(ErrorKind::InvalidRequest.field(
                "ingredients",
                &format!("Ingredient {} is listed more than once", line.id),
            ));
        }
        if line.amount < MIN_AMOUNT {
            return Err(ErrorKind::InvalidRequest.field(
                "amount",
                &format!("Amount must be at least {MIN_AMOUNT}"),
            ));
        }
    }
    Ok(())
}

fn validate_tags(tags: &[Uuid]) -> Result<(), Error> {
    if tags.is_empty() {
        return Err(ErrorKind::InvalidRequest.field("tags", "Recipe needs at least one tag"));
    }
    if tags.len() > MAX_TAGS {
        return Err(ErrorKind::InvalidRequest.field(
            "tags",
            &format!("Recipe can have at most {MAX_TAGS} tags"),
        ));
    }

    let mut seen = HashSet::new();
    if let Some(tag) = tags.iter().find(|tag| !seen.insert(**tag)) {
        return Err(ErrorKind::InvalidRequest.field(
            "tags",
            &format!("Tag {tag} is listed more than once"),
        ));
    }
    Ok(())
}

pub fn validate_draft(draft: &RecipeDraft) -> Result<(), Error> {
    validate_name(&draft.name)?;
    validate_text(&draft.text)?;
    validate_image(&draft.image)?;
    validate_cooking_time(draft.cooking_time)?;
    validate_ingredients(&draft.ingredients)?;
    validate_tags(&draft.tags)
}

/// Present fields follow the same rules as on create.
pub fn validate_patch(patch: &RecipePatch) -> Result<(), Error> {
    if let Some(name) = &patch.name {
        validate_name(name)?;
    }
    if let Some(text) = &patch.text {
        validate_text(text)?;
    }
    if let Some(image) = &patch.image {
        validate_image(image)?;
    }
    if let Some(cooking_time) = patch.cooking_time {
        validate_cooking_time(cooking_time)?;
    }
    if let Some(ingredients) = &patch.ingredients {
        validate_ingredients(ingredients)?;
    }
    if let Some(tags) = &patch.tags {
        validate_tags(tags)?;
    }
    Ok(())
}

/// Every referenced ingredient and tag must exist in the catalog.
async fn check_catalog<S: Store>(
    store: &S,
    ingredients: Option<&[IngredientAmount]>,
    tags: Option<&[Uuid]>,
) -> Result<(), Error> {
    if let Some(ingredients) = ingredients {
        let ids: Vec<Uuid> = ingredients.iter().map(|line| line.id).collect();
        let known: HashSet<Uuid> = store
            .find_ingredients(&ids)
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect();

        if let Some(id) = ids.iter().find(|id| !known.contains(*id)) {
            return Err(ErrorKind::InvalidRequest.field(
                "ingredients",
                &format!("Ingredient {id} doesn't exist"),
            ));
        }
    }

    if let Some(tags) = tags {
        let known: HashSet<Uuid> = store
            .find_tags(tags)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        if let Some(id) = tags.iter().find(|id| !known.contains(*id)) {
            return Err(ErrorKind::InvalidRequest.field("tags", &format!("Tag {id} doesn't exist")));
        }
    }

    Ok(())
}

// Writer

pub async fn create_recipe<S: Store>(
    store: &S,
    session: &SessionData,
    draft: &RecipeDraft,
) -> Result<RecipeView, Error> {
    session.authenticate(ActionType::CreateRecipes)?;
    validate_draft(draft)?;
    check_catalog(store, Some(&draft.ingredients), Some(&draft.tags)).await?;

    let mut tr = store.begin().await?;
    let recipe = tr.insert_recipe(session.user_id, draft).await?;
    tr.insert_recipe_ingredients(recipe.id, &draft.ingredients)
        .await?;
    tr.insert_recipe_tags(recipe.id, &draft.tags).await?;
    tr.commit().await?;

    log::info!("{} created recipe {}", session.username, recipe.id);

    get_recipe(store, Some(session), recipe.id).await
}

/// The recipe, if the session may modify it.
pub async fn get_recipe_mut<S: Store>(
    store: &S,
    session: &SessionData,
    id: Uuid,
) -> Result<Recipe, Error> {
    session.authenticate(ActionType::ManageOwnRecipes)?;
    let recipe = store.get_recipe(id).await?;

    match recipe {
        Some(recipe) => match session.authenticate(ActionType::ManageAllRecipes) {
            Ok(_) => Ok(recipe),
            Err(_) => {
                if recipe.author_id != session.user_id {
                    Err(ErrorKind::Forbidden.new("Only the author may change this recipe"))
                } else {
                    Ok(recipe)
                }
            }
        },
        None => Err(ErrorKind::NotFound.new("No recipe exists with specified id")),
    }
}

/// Scalar fields and any present association list are written in one
/// transaction; a present list replaces the stored one wholesale.
pub async fn update_recipe<S: Store>(
    store: &S,
    session: &SessionData,
    id: Uuid,
    patch: &RecipePatch,
) -> Result<RecipeView, Error> {
    let mut recipe = get_recipe_mut(store, session, id).await?;
    validate_patch(patch)?;
    check_catalog(store, patch.ingredients.as_deref(), patch.tags.as_deref()).await?;

    patch.apply(&mut recipe);

    let mut tr = store.begin().await?;
    if !tr.update_recipe(&recipe).await? {
        return Err(ErrorKind::NotFound.new("No recipe exists with specified id"));
    }
    if let Some(ingredients) = &patch.ingredients {
        tr.delete_recipe_ingredients(recipe.id).await?;
        tr.insert_recipe_ingredients(recipe.id, ingredients).await?;
    }
    if let Some(tags) = &patch.tags {
        tr.delete_recipe_tags(recipe.id).await?;
        tr.insert_recipe_tags(recipe.id, tags).await?;
    }
    tr.commit().await?;

    get_recipe(store, Some(session), recipe.id).await
}

pub async fn delete_recipe<S: Store>(
    store: &S,
    session: &SessionData,
    id: Uuid,
) -> Result<(), Error> {
    let recipe = get_recipe_mut(store, session, id).await?;

    let mut tr = store.begin().await?;
    if !tr.delete_recipe(recipe.id).await? {
        return Err(ErrorKind::NotFound.new("No recipe exists with specified id"));
    }
    tr.commit().await?;

    log::info!("{} deleted recipe {}", session.username, recipe.id);

    Ok(())
}

// Query layer

/// Listing filters as requested; the viewer decides which of them apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecipeQuery {
    pub author: Option<Uuid>,
    pub tags: Vec<String>,
    pub is_favorited: bool,
    pub is_in_shopping_cart: bool,
}

impl RecipeQuery {
    pub fn from_form(form: &Form) -> Result<Self, Error> {
        Ok(Self {
            author: form.get_number("author")?,
            tags: form.get_all("tags"),
            is_favorited: form.get_bool("is_favorited")?.unwrap_or(false),
            is_in_shopping_cart: form.get_bool("is_in_shopping_cart")?.unwrap_or(false),
        })
    }

    /// Favorite and cart filters only narrow the listing for a signed-in viewer.
    pub fn to_filter(&self, viewer: Option<&SessionData>) -> RecipeFilter {
        let user_id = viewer.map(|session| session.user_id);

        RecipeFilter {
            author: self.author,
            tags: self.tags.to_owned(),
            favorited_by: user_id.filter(|_| self.is_favorited),
            in_cart_of: user_id.filter(|_| self.is_in_shopping_cart),
        }
    }
}

async fn related_set<S: Store>(
    store: &S,
    relation: Relation,
    viewer: Option<&SessionData>,
    ids: &[Uuid],
) -> Result<HashSet<Uuid>, Error> {
    match viewer {
        Some(session) => Ok(store
            .list_related(relation, session.user_id, ids)
            .await?
            .into_iter()
            .collect()),
        None => Ok(HashSet::new()),
    }
}

/// Projects aggregates for a viewer. Anonymous viewers get every flag false.
pub async fn build_views<S: Store>(
    store: &S,
    viewer: Option<&SessionData>,
    aggregates: Vec<RecipeAggregate>,
) -> Result<Vec<RecipeView>, Error> {
    let recipe_ids: Vec<Uuid> = aggregates.iter().map(|a| a.recipe.id).collect();
    let mut author_ids: Vec<Uuid> = aggregates.iter().map(|a| a.recipe.author_id).collect();
    author_ids.sort_unstable();
    author_ids.dedup();

    let authors: HashMap<Uuid, _> = store
        .find_users(&author_ids)
        .await?
        .into_iter()
        .map(|user| (user.id, user))
        .collect();

    let favorited = related_set(store, Relation::Favorite, viewer, &recipe_ids).await?;
    let in_cart = related_set(store, Relation::ShoppingCart, viewer, &recipe_ids).await?;
    let subscribed = related_set(store, Relation::Subscription, viewer, &author_ids).await?;

    aggregates
        .into_iter()
        .map(|RecipeAggregate { recipe, ingredients, tags }| -> Result<RecipeView, Error> {
            let author = authors.get(&recipe.author_id).cloned().ok_or_else(|| {
                ErrorKind::InternalServerError.new("Recipe author is missing")
            })?;

            Ok(RecipeView {
                id: recipe.id,
                tags,
                author: UserView::from_user(author, subscribed.contains(&recipe.author_id)),
                ingredients,
                is_favorited: favorited.contains(&recipe.id),
                is_in_shopping_cart: in_cart.contains(&recipe.id),
                name: recipe.name,
                image: recipe.image,
                text: recipe.text,
                cooking_time: recipe.cooking_time,
                pub_date: recipe.pub_date,
            })
        })
        .collect()
}

pub async fn get_recipe<S: Store>(
    store: &S,
    viewer: Option<&SessionData>,
    id: Uuid,
) -> Result<RecipeView, Error> {
    let aggregate = store
        .load_recipe(id)
        .await?
        .ok_or_else(|| ErrorKind::NotFound.new("No recipe exists with specified id"))?;

    let mut views = build_views(store, viewer, vec![aggregate]).await?;
    views
        .pop()
        .ok_or_else(|| ErrorKind::NotFound.new("No recipe exists with specified id"))
}

pub async fn fetch_recipes<S: Store>(
    store: &S,
    viewer: Option<&SessionData>,
    query: &RecipeQuery,
    page: &PageRequest,
) -> Result<PageContext<RecipeView>, Error> {
    let filter = query.to_filter(viewer);
    let (aggregates, total_count) = store
        .fetch_recipes(&filter, page.limit, page.offset())
        .await?;

    let views = build_views(store, viewer, aggregates).await?;
    Ok(PageContext::from_rows(views, total_count, page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::UserRole;

    fn draft() -> RecipeDraft {
        RecipeDraft {
            name: String::from("Pancakes"),
            text: String::from("Whisk and fry"),
            image: String::from("data:image/png;base64,iVBORw0KGgo="),
            cooking_time: 20,
            ingredients: vec![
                IngredientAmount { id: 1, amount: 200 },
                IngredientAmount { id: 2, amount: 2 },
            ],
            tags: vec![1],
        }
    }

    #[test]
    fn valid_draft_passes() {
        assert!(validate_draft(&draft()).is_ok());
    }

    #[test]
    fn empty_ingredient_list_is_rejected() {
        let mut d = draft();
        d.ingredients.clear();
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("ingredients"));
    }

    #[test]
    fn duplicate_ingredient_is_rejected() {
        let mut d = draft();
        d.ingredients.push(IngredientAmount { id: 1, amount: 5 });
        let err = validate_draft(&d).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert_eq!(err.field, Some("ingredients"));
    }

    #[test]
    fn amounts_and_time_have_a_floor() {
        let mut d = draft();
        d.ingredients[0].amount = 0;
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("amount"));

        let mut d = draft();
        d.cooking_time = 0;
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("cooking_time"));
    }

    #[test]
    fn tags_must_be_present_and_distinct() {
        let mut d = draft();
        d.tags.clear();
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("tags"));

        let mut d = draft();
        d.tags = vec![3, 3];
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("tags"));
    }

    #[test]
    fn image_is_required() {
        let mut d = draft();
        d.image = String::new();
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("image"));

        let patch = RecipePatch {
            image: Some(String::from(" ")),
            ..Default::default()
        };
        assert_eq!(validate_patch(&patch).unwrap_err().field, Some("image"));
    }

    #[test]
    fn oversized_lists_are_rejected() {
        let mut d = draft();
        d.ingredients = (1..=MAX_INGREDIENTS as i32 + 1)
            .map(|id| IngredientAmount { id, amount: 1 })
            .collect();
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("ingredients"));

        let mut d = draft();
        d.tags = (1..=MAX_TAGS as i32 + 1).collect();
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("tags"));
    }

    #[test]
    fn long_names_are_rejected() {
        let mut d = draft();
        d.name = "a".repeat(MAX_NAME_LENGTH + 1);
        assert_eq!(validate_draft(&d).unwrap_err().field, Some("name"));
    }

    #[test]
    fn patch_checks_only_present_fields() {
        assert!(validate_patch(&RecipePatch::default()).is_ok());

        let patch = RecipePatch {
            ingredients: Some(vec![]),
            ..Default::default()
        };
        assert_eq!(validate_patch(&patch).unwrap_err().field, Some("ingredients"));
    }

    #[test]
    fn anonymous_viewer_ignores_personal_filters() {
        let query = RecipeQuery {
            author: Some(4),
            tags: vec![String::from("lunch")],
            is_favorited: true,
            is_in_shopping_cart: true,
        };

        let filter = query.to_filter(None);
        assert_eq!(filter.favorited_by, None);
        assert_eq!(filter.in_cart_of, None);
        assert_eq!(filter.author, Some(4));

        let session = SessionData {
            user_id: 9,
            username: String::from("reader"),
            role: UserRole::User,
            is_admin: false,
        };
        let filter = query.to_filter(Some(&session));
        assert_eq!(filter.favorited_by, Some(9));
        assert_eq!(filter.in_cart_of, Some(9));
    }

    #[test]
    fn query_is_read_from_the_form() {
        let form = Form::from_query("author=2&tags=lunch&tags=dinner&is_favorited=1").unwrap();
        let query = RecipeQuery::from_form(&form).unwrap();

        assert_eq!(query.author, Some(2));
        assert_eq!(query.tags, vec!["lunch", "dinner"]);
        assert!(query.is_favorited);
        assert!(!query.is_in_shopping_cart);
    }
}
