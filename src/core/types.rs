// src/core/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::catalog;

/// The three option categories a main dish selects among, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Side,
    Drink,
    Sauce,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Side, Category::Drink, Category::Sauce];

    pub fn name(self) -> &'static str {
        match self {
            Category::Side => "side",
            Category::Drink => "drink",
            Category::Sauce => "sauce",
        }
    }
}

/// One item with its current score. Scores start life as sigmoid outputs but
/// stop being a probability distribution once adjustments are added in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredItem {
    pub item: String,
    pub probability: f64,
}

/// Per-category score lists, each sorted descending and covering exactly the
/// catalog vocabulary for that category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub sides: Vec<ScoredItem>,
    pub drinks: Vec<ScoredItem>,
    pub sauces: Vec<ScoredItem>,
}

impl Prediction {
    pub fn category(&self, category: Category) -> &[ScoredItem] {
        match category {
            Category::Side => &self.sides,
            Category::Drink => &self.drinks,
            Category::Sauce => &self.sauces,
        }
    }

    pub fn category_mut(&mut self, category: Category) -> &mut Vec<ScoredItem> {
        match category {
            Category::Side => &mut self.sides,
            Category::Drink => &mut self.drinks,
            Category::Sauce => &mut self.sauces,
        }
    }

    /// Top item per category. Panics only on an empty category list, which the
    /// catalog invariants rule out.
    pub fn recommendation(&self) -> MealChoice {
        MealChoice {
            side: self.sides[0].item.clone(),
            drink: self.drinks[0].item.clone(),
            sauce: self.sauces[0].item.clone(),
        }
    }

    /// Uniform catalog-order scores, used when no trained model is available.
    /// The first-declared item of each category ends up on top.
    pub fn catalog_defaults() -> Self {
        let uniform = |category: Category| -> Vec<ScoredItem> {
            let vocab = catalog::vocabulary(category);
            let p = 1.0 / vocab.len() as f64;
            vocab
                .iter()
                .map(|item| ScoredItem { item: (*item).to_string(), probability: p })
                .collect()
        };
        Self {
            sides: uniform(Category::Side),
            drinks: uniform(Category::Drink),
            sauces: uniform(Category::Sauce),
        }
    }
}

/// A complete side/drink/sauce selection. Doubles as the engine's
/// recommendation and as the user's actual choice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MealChoice {
    pub side: String,
    pub drink: String,
    pub sauce: String,
}

impl MealChoice {
    pub fn new(side: &str, drink: &str, sauce: &str) -> Self {
        Self { side: side.to_string(), drink: drink.to_string(), sauce: sauce.to_string() }
    }

    pub fn item(&self, category: Category) -> &str {
        match category {
            Category::Side => &self.side,
            Category::Drink => &self.drink,
            Category::Sauce => &self.sauce,
        }
    }
}

/// Append-only record of one placed order; retraining fuel, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRecord {
    pub main_dish: String,
    pub side: String,
    pub drink: String,
    pub sauce: String,
    pub timestamp: DateTime<Utc>,
    pub recommended: MealChoice,
    /// Percent of categories where the recommendation matched. Diagnostic only.
    pub accuracy: f64,
}

impl OrderRecord {
    pub fn chosen(&self, category: Category) -> &str {
        match category {
            Category::Side => &self.side,
            Category::Drink => &self.drink,
            Category::Sauce => &self.sauce,
        }
    }
}

/// Monotonic order counter with a fixed retraining period.
///
/// Retraining is due exactly when the total count is a positive multiple of
/// the frequency; the count never resets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCounter {
    pub total_order_count: u64,
    pub training_frequency: u64,
    pub last_training_timestamp: Option<DateTime<Utc>>,
}

impl TrainingCounter {
    pub fn new(training_frequency: u64) -> Self {
        assert!(training_frequency > 0, "training frequency must be positive");
        Self { total_order_count: 0, training_frequency, last_training_timestamp: None }
    }

    /// Counts one more order and reports whether a retraining window opened.
    pub fn advance(&mut self) -> (u64, bool) {
        self.total_order_count += 1;
        let due = self.total_order_count % self.training_frequency == 0;
        (self.total_order_count, due)
    }
}

/// Per-category confidence percentages, derived from the gap between the top
/// two raw scores before adjustments are applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryConfidence {
    pub side: f64,
    pub drink: f64,
    pub sauce: f64,
}

impl CategoryConfidence {
    pub fn get(&self, category: Category) -> f64 {
        match category {
            Category::Side => self.side,
            Category::Drink => self.drink,
            Category::Sauce => self.sauce,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_fires_on_positive_multiples_only() {
        let mut counter = TrainingCounter::new(3);
        let fired: Vec<bool> = (0..9).map(|_| counter.advance().1).collect();
        assert_eq!(fired, vec![false, false, true, false, false, true, false, false, true]);
        assert_eq!(counter.total_order_count, 9);
    }

    #[test]
    fn catalog_defaults_put_first_declared_items_on_top() {
        let rec = Prediction::catalog_defaults().recommendation();
        assert_eq!(rec, MealChoice::new("fries", "cola", "ketchup"));
    }
}
