use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, Pool, Postgres, QueryBuilder, Transaction};

use crate::{
    error::{Error, QueryError},
    schema::{
        Ingredient, IngredientAmount, LinkedRecipeTag, Recipe, RecipeAggregate, RecipeDraft,
        RecipeFilter, RecipePart, RecipeRow, Relation, ShoppingListLine, Tag, User, UserRow,
        Uuid,
    },
    store::{Store, StoreTx},
};

// Bind parameters Postgres accepts in one statement
const BIND_LIMIT: usize = 65535;

#[derive(Clone)]
pub struct PgStore {
    pool: Pool<Postgres>,
}

impl PgStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await
            .map_err(QueryError::from)?;

        Ok(Self::new(pool))
    }

    pub async fn migrate(&self) -> Result<(), Error> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueryError::from(sqlx::Error::from(e)))?;

        log::info!("Database migrations applied");
        Ok(())
    }

    /// Read-only snapshot so a recipe is never seen with half of its associations.
    async fn snapshot(&self) -> Result<Transaction<'static, Postgres>, Error> {
        let mut tr = self
            .pool
            .begin()
            .await
            .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tr)
            .await
            .map_err(QueryError::from)?;

        Ok(tr)
    }
}

fn push_recipe_filter(query_builder: &mut QueryBuilder<'_, Postgres>, filter: &RecipeFilter) {
    if let Some(author) = filter.author {
        query_builder.push(" AND r.author_id = ").push_bind(author);
    }
    if !filter.tags.is_empty() {
        query_builder
            .push(
                " AND EXISTS (SELECT 1 FROM recipe_tags rt INNER JOIN tags t ON t.id = rt.tag_id \
                 WHERE rt.recipe_id = r.id AND t.slug = ANY(",
            )
            .push_bind(filter.tags.clone())
            .push("))");
    }
    if let Some(user_id) = filter.favorited_by {
        query_builder
            .push(" AND EXISTS (SELECT 1 FROM favorites f WHERE f.recipe_id = r.id AND f.user_id = ")
            .push_bind(user_id)
            .push(")");
    }
    if let Some(user_id) = filter.in_cart_of {
        query_builder
            .push(" AND EXISTS (SELECT 1 FROM shopping_cart c WHERE c.recipe_id = r.id AND c.user_id = ")
            .push_bind(user_id)
            .push(")");
    }
}

/// Escapes `LIKE` wildcards so the prefix matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

async fn load_associations(
    recipes: Vec<Recipe>,
    tr: &mut Transaction<'static, Postgres>,
) -> Result<Vec<RecipeAggregate>, Error> {
    let ids: Vec<Uuid> = recipes.iter().map(|r| r.id).collect();

    let parts: Vec<RecipePart> = sqlx::query_as(
        "
        SELECT ri.recipe_id AS recipe_id, i.id AS ingredient_id, i.name AS name,
            i.measurement_unit AS measurement_unit, ri.amount AS amount
        FROM recipe_ingredients ri
        INNER JOIN ingredients i ON i.id = ri.ingredient_id
        WHERE ri.recipe_id = ANY($1)
        ORDER BY ri.id
    ",
    )
    .bind(&ids)
    .fetch_all(&mut **tr)
    .await
    .map_err(QueryError::from)?;

    let tags: Vec<LinkedRecipeTag> = sqlx::query_as(
        "
        SELECT rt.recipe_id AS recipe_id, t.id AS id, t.name AS name, t.color AS color, t.slug AS slug
        FROM recipe_tags rt
        INNER JOIN tags t ON t.id = rt.tag_id
        WHERE rt.recipe_id = ANY($1)
        ORDER BY rt.id
    ",
    )
    .bind(&ids)
    .fetch_all(&mut **tr)
    .await
    .map_err(QueryError::from)?;

    let mut part_map: HashMap<Uuid, Vec<RecipePart>> = HashMap::new();
    parts
        .into_iter()
        .for_each(|part| part_map.entry(part.recipe_id).or_default().push(part));

    let mut tag_map: HashMap<Uuid, Vec<Tag>> = HashMap::new();
    tags.into_iter()
        .for_each(|tag| tag_map.entry(tag.recipe_id).or_default().push(tag.into()));

    Ok(recipes
        .into_iter()
        .map(|recipe| RecipeAggregate {
            ingredients: part_map.remove(&recipe.id).unwrap_or_default(),
            tags: tag_map.remove(&recipe.id).unwrap_or_default(),
            recipe,
        })
        .collect())
}

#[async_trait]
impl Store for PgStore {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx, Error> {
        let tr = self
            .pool
            .begin()
            .await
            .map_err(|_| QueryError::new("Could not start transaction".to_owned()))?;

        Ok(PgTx { tr })
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, Error> {
        let row: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn find_users(&self, ids: &[Uuid]) -> Result<Vec<User>, Error> {
        let rows: Vec<User> = sqlx::query_as("SELECT * FROM users WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(rows)
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, Error> {
        let list: Vec<Tag> = sqlx::query_as("SELECT * FROM tags ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(list)
    }

    async fn get_tag(&self, id: Uuid) -> Result<Option<Tag>, Error> {
        let tag: Option<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(tag)
    }

    async fn find_tags(&self, ids: &[Uuid]) -> Result<Vec<Tag>, Error> {
        let list: Vec<Tag> = sqlx::query_as("SELECT * FROM tags WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(list)
    }

    async fn list_ingredients(&self, prefix: Option<&str>) -> Result<Vec<Ingredient>, Error> {
        let list: Vec<Ingredient> = match prefix {
            Some(prefix) => sqlx::query_as(
                r"SELECT * FROM ingredients WHERE LOWER(name) LIKE (LOWER($1) || '%') ESCAPE '\' ORDER BY name, id",
            )
            .bind(escape_like(prefix))
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?,
            None => sqlx::query_as("SELECT * FROM ingredients ORDER BY name, id")
                .fetch_all(&self.pool)
                .await
                .map_err(QueryError::from)?,
        };

        Ok(list)
    }

    async fn get_ingredient(&self, id: Uuid) -> Result<Option<Ingredient>, Error> {
        let row: Option<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn find_ingredients(&self, ids: &[Uuid]) -> Result<Vec<Ingredient>, Error> {
        let list: Vec<Ingredient> = sqlx::query_as("SELECT * FROM ingredients WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(list)
    }

    async fn get_recipe(&self, id: Uuid) -> Result<Option<Recipe>, Error> {
        let row: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(QueryError::from)?;

        Ok(row)
    }

    async fn load_recipe(&self, id: Uuid) -> Result<Option<RecipeAggregate>, Error> {
        let mut tr = self.snapshot().await?;

        let recipe: Option<Recipe> = sqlx::query_as("SELECT * FROM recipes WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *tr)
            .await
            .map_err(QueryError::from)?;

        let aggregate = match recipe {
            Some(recipe) => load_associations(vec![recipe], &mut tr).await?.pop(),
            None => None,
        };

        tr.commit()
            .await
            .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

        Ok(aggregate)
    }

    async fn fetch_recipes(
        &self,
        filter: &RecipeFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RecipeAggregate>, i64), Error> {
        let mut query_builder: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT r.*, COUNT(*) OVER() AS count FROM recipes r WHERE TRUE");
        push_recipe_filter(&mut query_builder, filter);
        query_builder
            .push(" ORDER BY r.pub_date DESC, r.id DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let mut tr = self.snapshot().await?;

        let rows: Vec<RecipeRow> = query_builder
            .build_query_as()
            .fetch_all(&mut *tr)
            .await
            .map_err(QueryError::from)?;

        let mut total_count = rows.first().map(|r| r.count).unwrap_or(0);
        if rows.is_empty() && offset > 0 {
            let mut count_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("SELECT COUNT(*) FROM recipes r WHERE TRUE");
            push_recipe_filter(&mut count_builder, filter);

            let count: (i64,) = count_builder
                .build_query_as()
                .fetch_one(&mut *tr)
                .await
                .map_err(QueryError::from)?;
            total_count = count.0;
        }

        let recipes: Vec<Recipe> = rows.into_iter().map(Recipe::from).collect();
        let aggregates = load_associations(recipes, &mut tr).await?;

        tr.commit()
            .await
            .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

        Ok((aggregates, total_count))
    }

    async fn list_author_recipes(
        &self,
        author_id: Uuid,
        limit: Option<i64>,
    ) -> Result<(Vec<Recipe>, i64), Error> {
        let rows: Vec<RecipeRow> = sqlx::query_as(
            "
            SELECT r.*, COUNT(*) OVER() AS count FROM recipes r
            WHERE r.author_id = $1
            ORDER BY r.pub_date DESC, r.id DESC
            LIMIT $2
        ",
        )
        .bind(author_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        let mut total_count = rows.first().map(|r| r.count).unwrap_or(0);
        if rows.is_empty() && limit == Some(0) {
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipes WHERE author_id = $1")
                .bind(author_id)
                .fetch_one(&self.pool)
                .await
                .map_err(QueryError::from)?;
            total_count = count.0;
        }

        Ok((rows.into_iter().map(Recipe::from).collect(), total_count))
    }

    async fn list_related(
        &self,
        relation: Relation,
        user_id: Uuid,
        target_ids: &[Uuid],
    ) -> Result<Vec<Uuid>, Error> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(&format!(
            "SELECT {target} FROM {table} WHERE user_id = $1 AND {target} = ANY($2)",
            target = relation.target_column(),
            table = relation.table(),
        ))
        .bind(user_id)
        .bind(target_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(rows.into_iter().map(|row| row.0).collect())
    }

    async fn fetch_subscriptions(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<User>, i64), Error> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "
            SELECT u.*, COUNT(*) OVER() AS count
            FROM subscriptions s
            INNER JOIN users u ON u.id = s.author_id
            WHERE s.user_id = $1
            ORDER BY s.id DESC
            LIMIT $2 OFFSET $3
        ",
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        let mut total_count = rows.first().map(|r| r.count).unwrap_or(0);
        if rows.is_empty() && offset > 0 {
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(QueryError::from)?;
            total_count = count.0;
        }

        Ok((rows.into_iter().map(User::from).collect(), total_count))
    }

    async fn sum_shopping_cart(&self, user_id: Uuid) -> Result<Vec<ShoppingListLine>, Error> {
        let rows: Vec<ShoppingListLine> = sqlx::query_as(
            r#"
            SELECT i.name AS name, i.measurement_unit AS measurement_unit, SUM(ri.amount)::BIGINT AS total
            FROM shopping_cart c
            INNER JOIN recipe_ingredients ri ON ri.recipe_id = c.recipe_id
            INNER JOIN ingredients i ON i.id = ri.ingredient_id
            WHERE c.user_id = $1
            GROUP BY i.name, i.measurement_unit
            ORDER BY i.name COLLATE "C", i.measurement_unit COLLATE "C"
        "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(QueryError::from)?;

        Ok(rows)
    }
}

pub struct PgTx {
    tr: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert_recipe(
        &mut self,
        author_id: Uuid,
        draft: &RecipeDraft,
    ) -> Result<Recipe, Error> {
        let recipe: Recipe = sqlx::query_as(
            "
            INSERT INTO recipes (author_id, name, image, text, cooking_time)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
        ",
        )
        .bind(author_id)
        .bind(&draft.name)
        .bind(&draft.image)
        .bind(&draft.text)
        .bind(draft.cooking_time)
        .fetch_one(&mut *self.tr)
        .await
        .map_err(QueryError::from)?;

        Ok(recipe)
    }

    async fn update_recipe(&mut self, recipe: &Recipe) -> Result<bool, Error> {
        let result = sqlx::query(
            "UPDATE recipes SET name = $1, image = $2, text = $3, cooking_time = $4 WHERE id = $5",
        )
        .bind(&recipe.name)
        .bind(&recipe.image)
        .bind(&recipe.text)
        .bind(recipe.cooking_time)
        .bind(recipe.id)
        .execute(&mut *self.tr)
        .await
        .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_recipe(&mut self, id: Uuid) -> Result<bool, Error> {
        for table in [
            "recipe_ingredients",
            "recipe_tags",
            Relation::Favorite.table(),
            Relation::ShoppingCart.table(),
        ] {
            sqlx::query(&format!("DELETE FROM {table} WHERE recipe_id = $1"))
                .bind(id)
                .execute(&mut *self.tr)
                .await
                .map_err(QueryError::from)?;
        }

        let result = sqlx::query("DELETE FROM recipes WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tr)
            .await
            .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_recipe_ingredients(&mut self, recipe_id: Uuid) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM recipe_ingredients WHERE recipe_id = $1")
            .bind(recipe_id)
            .execute(&mut *self.tr)
            .await
            .map_err(QueryError::from)?;

        Ok(result.rows_affected())
    }

    async fn insert_recipe_ingredients(
        &mut self,
        recipe_id: Uuid,
        lines: &[IngredientAmount],
    ) -> Result<(), Error> {
        if lines.is_empty() {
            return Ok(());
        }

        for chunk in lines.chunks(BIND_LIMIT / 3) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, amount) ",
            );

            query_builder.push_values(chunk, |mut b, line| {
                b.push_bind(recipe_id)
                    .push_bind(line.id)
                    .push_bind(line.amount);
            });

            query_builder
                .build()
                .execute(&mut *self.tr)
                .await
                .map_err(QueryError::from)?;
        }

        Ok(())
    }

    async fn delete_recipe_tags(&mut self, recipe_id: Uuid) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM recipe_tags WHERE recipe_id = $1")
            .bind(recipe_id)
            .execute(&mut *self.tr)
            .await
            .map_err(QueryError::from)?;

        Ok(result.rows_affected())
    }

    async fn insert_recipe_tags(&mut self, recipe_id: Uuid, tags: &[Uuid]) -> Result<(), Error> {
        if tags.is_empty() {
            return Ok(());
        }

        for chunk in tags.chunks(BIND_LIMIT / 2) {
            let mut query_builder: QueryBuilder<Postgres> =
                QueryBuilder::new("INSERT INTO recipe_tags (recipe_id, tag_id) ");

            query_builder.push_values(chunk, |mut b, tag_id| {
                b.push_bind(recipe_id).push_bind(tag_id);
            });

            query_builder
                .build()
                .execute(&mut *self.tr)
                .await
                .map_err(QueryError::from)?;
        }

        Ok(())
    }

    async fn insert_relation(
        &mut self,
        relation: Relation,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, Error> {
        // The unique index decides; a lost race shows up as zero affected rows.
        let result = sqlx::query(&format!(
            "INSERT INTO {table} (user_id, {target}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            table = relation.table(),
            target = relation.target_column(),
        ))
        .bind(user_id)
        .bind(target_id)
        .execute(&mut *self.tr)
        .await
        .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_relation(
        &mut self,
        relation: Relation,
        user_id: Uuid,
        target_id: Uuid,
    ) -> Result<bool, Error> {
        let result = sqlx::query(&format!(
            "DELETE FROM {table} WHERE user_id = $1 AND {target} = $2",
            table = relation.table(),
            target = relation.target_column(),
        ))
        .bind(user_id)
        .bind(target_id)
        .execute(&mut *self.tr)
        .await
        .map_err(QueryError::from)?;

        Ok(result.rows_affected() > 0)
    }

    async fn commit(self) -> Result<(), Error> {
        self.tr
            .commit()
            .await
            .map_err(|_| QueryError::new("Could not commit transaction".to_owned()))?;

        Ok(())
    }
}
