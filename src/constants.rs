pub const MIN_AMOUNT: i32 = 1;
pub const MIN_COOKING_TIME: i32 = 1;
pub const MAX_NAME_LENGTH: usize = 200;
pub const MAX_INGREDIENTS: usize = 200;
pub const MAX_TAGS: usize = 50;

pub const DEFAULT_PAGE_SIZE: i64 = 6;
pub const MAX_PAGE_SIZE: i64 = 100;
// Keeps page * limit inside i64
pub const MAX_PAGE: i64 = i64::MAX / MAX_PAGE_SIZE;

pub const SHOPPING_LIST_HEADER: &str = "Список покупок:";
pub const SHOPPING_LIST_FILENAME: &str = "shopping-list.txt";

// Page geometry of the downloadable shopping list, in points
pub const PAGE_TOP: i32 = 800;
pub const PAGE_BOTTOM: i32 = 50;
pub const LINE_HEIGHT: i32 = 20;

pub const CATALOG_CACHE_KEY: &str = "catalog-cache-key";
