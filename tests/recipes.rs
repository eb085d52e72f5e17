mod common;

use std::collections::HashSet;

use common::{session, Fixture};
use foodgram_core::{
    actions::recipes::{
        create_recipe, delete_recipe, fetch_recipes, get_recipe, update_recipe, RecipeQuery,
    },
    actions::relations::add_recipe_relation,
    error::ErrorKind,
    pagination::PageRequest,
    schema::{IngredientAmount, RecipePatch, Relation},
    store::{Store, StoreTx},
};

#[tokio::test]
async fn created_recipe_reads_back_unchanged() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    let draft = f.draft(
        "Pancakes",
        &[(f.flour.id, 200), (f.sugar.id, 20)],
        &[f.lunch.id, f.dinner.id],
    );

    let created = create_recipe(&f.store, &chef, &draft).await.unwrap();
    let read = get_recipe(&f.store, Some(&chef), created.id).await.unwrap();

    assert_eq!(read.name, draft.name);
    assert_eq!(read.text, draft.text);
    assert_eq!(read.cooking_time, draft.cooking_time);
    assert_eq!(read.author.id, f.chef.id);

    let lines: HashSet<_> = read
        .ingredients
        .iter()
        .map(|part| (part.ingredient_id, part.amount))
        .collect();
    assert_eq!(lines, HashSet::from([(f.flour.id, 200), (f.sugar.id, 20)]));

    let tags: HashSet<_> = read.tags.iter().map(|tag| tag.id).collect();
    assert_eq!(tags, HashSet::from([f.lunch.id, f.dinner.id]));
}

#[tokio::test]
async fn empty_ingredient_list_persists_nothing() {
    let f = Fixture::new().await;
    let draft = f.draft("Air", &[], &[f.lunch.id]);

    let err = create_recipe(&f.store, &session(&f.chef), &draft)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(err.field, Some("ingredients"));
    assert_eq!(f.store.recipe_count().await, 0);
}

#[tokio::test]
async fn duplicate_ingredient_is_a_validation_error() {
    let f = Fixture::new().await;
    let draft = f.draft("Salty", &[(f.salt.id, 1), (f.salt.id, 2)], &[f.lunch.id]);

    let err = create_recipe(&f.store, &session(&f.chef), &draft)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    assert_eq!(f.store.recipe_count().await, 0);
}

#[tokio::test]
async fn unknown_catalog_references_are_rejected() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);

    let err = create_recipe(&f.store, &chef, &f.draft("Ghost", &[(999, 1)], &[f.lunch.id]))
        .await
        .unwrap_err();
    assert_eq!(err.field, Some("ingredients"));

    let err = create_recipe(&f.store, &chef, &f.draft("Ghost", &[(f.salt.id, 1)], &[999]))
        .await
        .unwrap_err();
    assert_eq!(err.field, Some("tags"));

    assert_eq!(f.store.recipe_count().await, 0);
}

#[tokio::test]
async fn ingredient_list_is_replaced_wholesale() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    let draft = f.draft("Mix", &[(f.salt.id, 2), (f.sugar.id, 3)], &[f.lunch.id]);
    let recipe = create_recipe(&f.store, &chef, &draft).await.unwrap();

    let patch = RecipePatch {
        ingredients: Some(vec![IngredientAmount {
            id: f.salt.id,
            amount: 5,
        }]),
        ..Default::default()
    };
    let updated = update_recipe(&f.store, &chef, recipe.id, &patch).await.unwrap();

    assert_eq!(updated.ingredients.len(), 1);
    assert_eq!(updated.ingredients[0].ingredient_id, f.salt.id);
    assert_eq!(updated.ingredients[0].amount, 5);
    assert_eq!(f.store.association_count(recipe.id).await, (1, 1));

    // untouched fields survive
    assert_eq!(updated.name, "Mix");
    assert_eq!(updated.tags, recipe.tags);
}

#[tokio::test]
async fn failed_update_leaves_the_old_sets() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    let recipe = create_recipe(
        &f.store,
        &chef,
        &f.draft("Mix", &[(f.salt.id, 2)], &[f.lunch.id]),
    )
    .await
    .unwrap();

    let patch = RecipePatch {
        name: Some(String::from("Renamed")),
        ingredients: Some(vec![IngredientAmount {
            id: f.sugar.id,
            amount: 0,
        }]),
        ..Default::default()
    };
    let err = update_recipe(&f.store, &chef, recipe.id, &patch)
        .await
        .unwrap_err();
    assert_eq!(err.field, Some("amount"));

    let read = get_recipe(&f.store, None, recipe.id).await.unwrap();
    assert_eq!(read.name, "Mix");
    assert_eq!(read.ingredients, recipe.ingredients);
}

#[tokio::test]
async fn failing_tag_insert_rolls_back_the_recipe_row() {
    let f = Fixture::new().await;
    let draft = f.draft("Soup", &[(f.salt.id, 2), (f.sugar.id, 1)], &[f.lunch.id, 999]);

    let mut tr = f.store.begin().await.unwrap();
    let recipe = tr.insert_recipe(f.chef.id, &draft).await.unwrap();
    tr.insert_recipe_ingredients(recipe.id, &draft.ingredients)
        .await
        .unwrap();
    let err = tr.insert_recipe_tags(recipe.id, &draft.tags).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    drop(tr);

    assert_eq!(f.store.recipe_count().await, 0);
    assert_eq!(f.store.association_count(recipe.id).await, (0, 0));
    assert_eq!(f.store.get_recipe(recipe.id).await.unwrap(), None);
}

#[tokio::test]
async fn failing_replace_step_keeps_the_stored_sets() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    let recipe = create_recipe(
        &f.store,
        &chef,
        &f.draft("Mix", &[(f.salt.id, 2), (f.sugar.id, 3)], &[f.lunch.id]),
    )
    .await
    .unwrap();
    let stored = f.store.get_recipe(recipe.id).await.unwrap().unwrap();

    let mut renamed = stored.clone();
    renamed.name = String::from("Renamed");

    let mut tr = f.store.begin().await.unwrap();
    assert!(tr.update_recipe(&renamed).await.unwrap());
    assert_eq!(tr.delete_recipe_ingredients(recipe.id).await.unwrap(), 2);
    let err = tr
        .insert_recipe_ingredients(recipe.id, &[IngredientAmount { id: 999, amount: 1 }])
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidRequest);
    drop(tr);

    assert_eq!(f.store.association_count(recipe.id).await, (2, 1));
    let read = get_recipe(&f.store, None, recipe.id).await.unwrap();
    assert_eq!(read.name, "Mix");
    assert_eq!(read.ingredients, recipe.ingredients);
}

#[tokio::test]
async fn only_the_author_or_an_admin_may_write() {
    let f = Fixture::new().await;
    let recipe = create_recipe(
        &f.store,
        &session(&f.chef),
        &f.draft("Soup", &[(f.salt.id, 1)], &[f.lunch.id]),
    )
    .await
    .unwrap();

    let patch = RecipePatch {
        cooking_time: Some(30),
        ..Default::default()
    };
    let err = update_recipe(&f.store, &session(&f.reader), recipe.id, &patch)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);

    let updated = update_recipe(&f.store, &session(&f.admin), recipe.id, &patch)
        .await
        .unwrap();
    assert_eq!(updated.cooking_time, 30);

    let err = delete_recipe(&f.store, &session(&f.reader), recipe.id)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Forbidden);
}

#[tokio::test]
async fn delete_cascades_to_every_association() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    let reader = session(&f.reader);
    let recipe = create_recipe(
        &f.store,
        &chef,
        &f.draft("Soup", &[(f.salt.id, 1), (f.flour.id, 4)], &[f.lunch.id]),
    )
    .await
    .unwrap();
    add_recipe_relation(&f.store, &reader, Relation::Favorite, recipe.id)
        .await
        .unwrap();
    add_recipe_relation(&f.store, &reader, Relation::ShoppingCart, recipe.id)
        .await
        .unwrap();

    delete_recipe(&f.store, &chef, recipe.id).await.unwrap();

    assert_eq!(f.store.recipe_count().await, 0);
    assert_eq!(f.store.association_count(recipe.id).await, (0, 0));
    assert_eq!(f.store.relation_count(Relation::Favorite).await, 0);
    assert_eq!(f.store.relation_count(Relation::ShoppingCart).await, 0);

    let err = delete_recipe(&f.store, &chef, recipe.id).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn anonymous_viewer_gets_false_flags() {
    let f = Fixture::new().await;
    let reader = session(&f.reader);
    let recipe = create_recipe(
        &f.store,
        &session(&f.chef),
        &f.draft("Soup", &[(f.salt.id, 1)], &[f.lunch.id]),
    )
    .await
    .unwrap();
    add_recipe_relation(&f.store, &reader, Relation::Favorite, recipe.id)
        .await
        .unwrap();
    add_recipe_relation(&f.store, &reader, Relation::ShoppingCart, recipe.id)
        .await
        .unwrap();

    let anonymous = get_recipe(&f.store, None, recipe.id).await.unwrap();
    assert!(!anonymous.is_favorited);
    assert!(!anonymous.is_in_shopping_cart);
    assert!(!anonymous.author.is_subscribed);

    let personal = get_recipe(&f.store, Some(&reader), recipe.id).await.unwrap();
    assert!(personal.is_favorited);
    assert!(personal.is_in_shopping_cart);
}

#[tokio::test]
async fn missing_recipe_is_not_found() {
    let f = Fixture::new().await;
    let err = get_recipe(&f.store, None, 12345).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn page_past_the_end_keeps_the_total() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    for name in ["Soup", "Stew", "Pie"] {
        create_recipe(&f.store, &chef, &f.draft(name, &[(f.salt.id, 1)], &[f.lunch.id]))
            .await
            .unwrap();
    }

    let page = fetch_recipes(&f.store, None, &RecipeQuery::default(), &PageRequest::new(5, 2))
        .await
        .unwrap();
    assert_eq!(page.count, 3);
    assert!(page.results.is_empty());
    assert_eq!(page.next, None);
    assert_eq!(page.previous, Some(4));
}

#[tokio::test]
async fn listing_filters_and_pages() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    let reader = session(&f.reader);

    let soup = create_recipe(&f.store, &chef, &f.draft("Soup", &[(f.salt.id, 1)], &[f.lunch.id]))
        .await
        .unwrap();
    let cake = create_recipe(&f.store, &reader, &f.draft("Cake", &[(f.sugar.id, 1)], &[f.dinner.id]))
        .await
        .unwrap();
    let bread = create_recipe(&f.store, &chef, &f.draft("Bread", &[(f.flour.id, 1)], &[f.dinner.id]))
        .await
        .unwrap();
    add_recipe_relation(&f.store, &reader, Relation::Favorite, soup.id)
        .await
        .unwrap();

    let all = fetch_recipes(&f.store, None, &RecipeQuery::default(), &PageRequest::new(1, 10))
        .await
        .unwrap();
    let ids: Vec<_> = all.results.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![bread.id, cake.id, soup.id]);
    assert_eq!(all.count, 3);

    let by_author = RecipeQuery {
        author: Some(f.chef.id),
        ..Default::default()
    };
    let page = fetch_recipes(&f.store, None, &by_author, &PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(page.count, 2);

    let by_tag = RecipeQuery {
        tags: vec![String::from("dinner")],
        ..Default::default()
    };
    let page = fetch_recipes(&f.store, None, &by_tag, &PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(page.count, 2);
    assert!(page.results.iter().all(|r| r.tags.iter().any(|t| t.slug == "dinner")));

    let favorites = RecipeQuery {
        is_favorited: true,
        ..Default::default()
    };
    let page = fetch_recipes(&f.store, Some(&reader), &favorites, &PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(page.count, 1);
    assert_eq!(page.results[0].id, soup.id);
    assert!(page.results[0].is_favorited);

    // personal filters don't apply to anonymous viewers
    let page = fetch_recipes(&f.store, None, &favorites, &PageRequest::new(1, 10))
        .await
        .unwrap();
    assert_eq!(page.count, 3);

    let first = fetch_recipes(&f.store, None, &RecipeQuery::default(), &PageRequest::new(1, 2))
        .await
        .unwrap();
    assert_eq!(first.results.len(), 2);
    assert_eq!(first.next, Some(2));
    assert_eq!(first.previous, None);

    let second = fetch_recipes(&f.store, None, &RecipeQuery::default(), &PageRequest::new(2, 2))
        .await
        .unwrap();
    assert_eq!(second.results.len(), 1);
    assert_eq!(second.next, None);
    assert_eq!(second.previous, Some(1));
}

#[tokio::test]
async fn snapshot_reads_see_complete_sets() {
    let f = Fixture::new().await;
    let chef = session(&f.chef);
    let recipe = create_recipe(
        &f.store,
        &chef,
        &f.draft("Mix", &[(f.salt.id, 2), (f.sugar.id, 3)], &[f.lunch.id]),
    )
    .await
    .unwrap();

    let writer = {
        let store = f.store.clone();
        let chef = chef.clone();
        let (salt, flour) = (f.salt.id, f.flour.id);
        tokio::spawn(async move {
            for amount in 1..20 {
                let patch = RecipePatch {
                    ingredients: Some(vec![
                        IngredientAmount { id: salt, amount },
                        IngredientAmount { id: flour, amount },
                    ]),
                    ..Default::default()
                };
                update_recipe(&store, &chef, recipe.id, &patch).await.unwrap();
            }
        })
    };

    for _ in 0..20 {
        let aggregate = f.store.load_recipe(recipe.id).await.unwrap().unwrap();
        assert_eq!(aggregate.ingredients.len(), 2);
        tokio::task::yield_now().await;
    }

    writer.await.unwrap();
}
