use std::collections::BTreeMap;

use crate::{
    constants::{LINE_HEIGHT, PAGE_BOTTOM, PAGE_TOP, SHOPPING_LIST_HEADER},
    schema::ShoppingListLine,
};

/// Sums `(name, unit, amount)` parts per `(name, unit)`, sorted by name then unit.
pub fn aggregate_lines<I>(parts: I) -> Vec<ShoppingListLine>
where
    I: IntoIterator<Item = (String, String, i64)>,
{
    let mut totals: BTreeMap<(String, String), i64> = BTreeMap::new();
    for (name, measurement_unit, amount) in parts {
        *totals.entry((name, measurement_unit)).or_insert(0) += amount;
    }

    totals
        .into_iter()
        .map(|((name, measurement_unit), total)| ShoppingListLine {
            name,
            measurement_unit,
            total,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    pub top: i32,
    pub bottom: i32,
    pub line_height: i32,
}

impl Default for PageLayout {
    fn default() -> Self {
        Self {
            top: PAGE_TOP,
            bottom: PAGE_BOTTOM,
            line_height: LINE_HEIGHT,
        }
    }
}

impl PageLayout {
    /// Lines that fit on one page before the cursor crosses `bottom`.
    pub fn capacity(&self) -> usize {
        ((self.top - self.bottom) / self.line_height.max(1) + 1).max(1) as usize
    }
}

/// Rendered shopping list. Lines are never split across pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShoppingList {
    pages: Vec<Vec<String>>,
}

impl ShoppingList {
    pub fn render(lines: &[ShoppingListLine], layout: &PageLayout) -> Self {
        let mut pages = vec![];
        let mut page = vec![];
        let mut y = layout.top;

        let header = [SHOPPING_LIST_HEADER.to_owned(), String::new()];
        let body = lines
            .iter()
            .map(|line| format!("{}: {} {}", line.name, line.total, line.measurement_unit));

        for text in header.into_iter().chain(body) {
            if y < layout.bottom {
                pages.push(std::mem::take(&mut page));
                y = layout.top;
            }
            page.push(text);
            y -= layout.line_height;
        }
        pages.push(page);

        Self { pages }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Plain text with one line per row; pages are separated by a form feed.
    pub fn to_text(&self) -> String {
        self.pages
            .iter()
            .map(|page| {
                page.iter()
                    .map(|line| format!("{line}\n"))
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\x0c")
    }
}
