// src/core/catalog.rs
//! Static menu data: the main dishes and the option vocabulary per category.
//!
//! Item identifiers are globally unique across categories. The predictor's
//! output layer is a flat concatenation of all three vocabularies in
//! declaration order, so `flat_index` doubles as the output-neuron index.

use crate::core::types::Category;

pub const MAIN_DISHES: [&str; 4] = ["burger", "pizza", "salad", "pasta"];

pub const SIDES: [&str; 4] = ["fries", "onion_rings", "side_salad", "rice"];
pub const DRINKS: [&str; 4] = ["cola", "lemonade", "water", "iced_tea"];
pub const SAUCES: [&str; 5] = ["ketchup", "mayo", "bbq", "mustard", "none"];

/// Width of the flat item vector (all vocabularies concatenated).
pub const FLAT_LEN: usize = SIDES.len() + DRINKS.len() + SAUCES.len();

pub fn vocabulary(category: Category) -> &'static [&'static str] {
    match category {
        Category::Side => &SIDES,
        Category::Drink => &DRINKS,
        Category::Sauce => &SAUCES,
    }
}

pub fn is_valid_main_dish(id: &str) -> bool {
    MAIN_DISHES.contains(&id)
}

pub fn is_valid_item(category: Category, id: &str) -> bool {
    vocabulary(category).contains(&id)
}

pub fn main_dish_index(id: &str) -> Option<usize> {
    MAIN_DISHES.iter().position(|d| *d == id)
}

/// Offset of a category's block inside the flat item vector.
pub fn category_offset(category: Category) -> usize {
    match category {
        Category::Side => 0,
        Category::Drink => SIDES.len(),
        Category::Sauce => SIDES.len() + DRINKS.len(),
    }
}

/// Position of an item in the flat item vector, searching all categories.
pub fn flat_index(item: &str) -> Option<usize> {
    for category in Category::ALL {
        if let Some(i) = vocabulary(category).iter().position(|v| *v == item) {
            return Some(category_offset(category) + i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabularies_are_disjoint_across_categories() {
        let mut seen = std::collections::HashSet::new();
        for category in Category::ALL {
            for item in vocabulary(category) {
                assert!(seen.insert(*item), "item {item} appears in two categories");
            }
        }
        assert_eq!(seen.len(), FLAT_LEN);
    }

    #[test]
    fn flat_index_covers_every_item_exactly_once() {
        let mut indices: Vec<usize> = Category::ALL
            .iter()
            .flat_map(|c| vocabulary(*c).iter())
            .map(|item| flat_index(item).unwrap())
            .collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..FLAT_LEN).collect::<Vec<_>>());
        assert_eq!(flat_index("gravy"), None);
    }

    #[test]
    fn dish_validation() {
        assert!(is_valid_main_dish("burger"));
        assert!(!is_valid_main_dish("sushi"));
        assert_eq!(main_dish_index("pasta"), Some(3));
    }
}
