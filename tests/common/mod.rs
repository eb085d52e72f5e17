#![allow(dead_code)]

use foodgram_core::{
    jwt::{jwt_key, JwtSessionData, SessionData, SessionKey},
    memory::MemoryStore,
    schema::{Ingredient, IngredientAmount, RecipeDraft, Tag, User, UserRole, Uuid},
};
use jwt::SignWithKey;

pub const SECRET: &str = "test-secret";
pub const IMAGE: &str = "data:image/png;base64,iVBORw0KGgo=";

pub struct Fixture {
    pub store: MemoryStore,
    pub chef: User,
    pub reader: User,
    pub admin: User,
    pub salt: Ingredient,
    pub sugar: Ingredient,
    pub flour: Ingredient,
    pub lunch: Tag,
    pub dinner: Tag,
}

impl Fixture {
    pub async fn new() -> Self {
        let store = MemoryStore::new();

        let chef = store.add_user("chef", UserRole::User).await;
        let reader = store.add_user("reader", UserRole::User).await;
        let admin = store.add_user("admin", UserRole::Admin).await;

        let salt = store.add_ingredient("Salt", "g").await.unwrap();
        let sugar = store.add_ingredient("Sugar", "g").await.unwrap();
        let flour = store.add_ingredient("Flour", "g").await.unwrap();

        let lunch = store.add_tag("Lunch", "#E26C2D", "lunch").await.unwrap();
        let dinner = store.add_tag("Dinner", "#49B64E", "dinner").await.unwrap();

        Self {
            store,
            chef,
            reader,
            admin,
            salt,
            sugar,
            flour,
            lunch,
            dinner,
        }
    }

    pub fn draft(&self, name: &str, ingredients: &[(Uuid, i32)], tags: &[Uuid]) -> RecipeDraft {
        RecipeDraft {
            name: name.to_owned(),
            text: format!("How to make {name}"),
            image: IMAGE.to_owned(),
            cooking_time: 15,
            ingredients: ingredients
                .iter()
                .map(|(id, amount)| IngredientAmount {
                    id: *id,
                    amount: *amount,
                })
                .collect(),
            tags: tags.to_vec(),
        }
    }
}

pub fn session(user: &User) -> SessionData {
    SessionData {
        user_id: user.id,
        username: user.username.to_owned(),
        role: user.role,
        is_admin: user.role == UserRole::Admin,
    }
}

pub fn key() -> SessionKey {
    jwt_key(SECRET).unwrap()
}

pub fn token(user: &User) -> String {
    JwtSessionData::new(user.id, user.username.to_owned(), user.role)
        .sign_with_key(&key())
        .unwrap()
}
