use crate::{
    authentication::{jwt::SessionData, permissions::ActionType},
    error::Error,
    shopping::{PageLayout, ShoppingList},
    store::Store,
};

/// Totals over every recipe in the viewer's cart. An empty cart renders the
/// header alone.
pub async fn download_shopping_cart<S: Store>(
    store: &S,
    session: &SessionData,
    layout: &PageLayout,
) -> Result<ShoppingList, Error> {
    session.authenticate(ActionType::ManageOwnShoppingCart)?;

    let lines = store.sum_shopping_cart(session.user_id).await?;
    let list = ShoppingList::render(&lines, layout);
    log::trace!(
        "Shopping list for {} has {} lines on {} pages",
        session.username,
        lines.len(),
        list.page_count()
    );

    Ok(list)
}
