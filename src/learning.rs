// File: src/learning.rs
//! Tabular feedback layer: a signed bias per (main dish, category, item),
//! added on top of the predictor's raw scores.
//!
//! The update rule deliberately pushes harder toward what the user actually
//! picked (+0.03) than away from what was recommended and rejected (−0.02),
//! so recent behavior outweighs the model's prior. Biases are unbounded at
//! learn time; clamping happens only when they are applied.

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::catalog;
use crate::core::types::{Category, Prediction};
use crate::error::{RecommenderError, Result};
use crate::persistence::{StateStore, ADJUSTMENTS_BLOB_KEY};

pub const LEARNING_RATE: f64 = 0.1;

/// Post-adjustment scores are clamped into this window.
const SCORE_MIN: f64 = 0.01;
const SCORE_MAX: f64 = 0.99;

type CategoryBiases = HashMap<String, f64>;
type DishBiases = HashMap<Category, CategoryBiases>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdjustmentTable {
    adjustments: HashMap<String, DishBiases>,
}

impl AdjustmentTable {
    /// All-zero table over the full dish × category × item space.
    pub fn empty() -> Self {
        let adjustments = catalog::MAIN_DISHES
            .iter()
            .map(|dish| {
                let per_dish: DishBiases = Category::ALL
                    .iter()
                    .map(|category| {
                        let zeros: CategoryBiases = catalog::vocabulary(*category)
                            .iter()
                            .map(|item| ((*item).to_string(), 0.0))
                            .collect();
                        (*category, zeros)
                    })
                    .collect();
                ((*dish).to_string(), per_dish)
            })
            .collect();
        Self { adjustments }
    }

    /// Loads the persisted table, or starts from zeros. Never fatal.
    pub fn initialize(store: &dyn StateStore) -> Self {
        match store.load_blob(ADJUSTMENTS_BLOB_KEY) {
            Ok(Some(bytes)) => match bincode::deserialize(&bytes) {
                Ok(table) => table,
                Err(e) => {
                    warn!("persisted adjustment table is unreadable, starting fresh: {e}");
                    Self::empty()
                }
            },
            Ok(None) => Self::empty(),
            Err(e) => {
                warn!("could not load adjustment table, starting fresh: {e}");
                Self::empty()
            }
        }
    }

    pub fn bias(&self, main_dish: &str, category: Category, item: &str) -> f64 {
        self.adjustments
            .get(main_dish)
            .and_then(|dish| dish.get(&category))
            .and_then(|biases| biases.get(item))
            .copied()
            .unwrap_or(0.0)
    }

    /// Adds each item's bias to its raw score, clamps into
    /// [`SCORE_MIN`, `SCORE_MAX`] and re-sorts descending. The sort is stable,
    /// so ties fall back to catalog declaration order.
    pub fn apply(&self, main_dish: &str, prediction: &Prediction) -> Result<Prediction> {
        let dish = self
            .adjustments
            .get(main_dish)
            .ok_or_else(|| RecommenderError::UnknownMainDish(main_dish.to_string()))?;

        let mut adjusted = prediction.clone();
        for category in Category::ALL {
            let biases = dish.get(&category);
            let items = adjusted.category_mut(category);
            for scored in items.iter_mut() {
                let bias = biases
                    .and_then(|b| b.get(&scored.item))
                    .copied()
                    .unwrap_or(0.0);
                scored.probability = (scored.probability + bias).clamp(SCORE_MIN, SCORE_MAX);
            }
            items.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        }
        Ok(adjusted)
    }

    /// Feedback update for one category of one order.
    ///
    /// Accepted recommendation: `+0.1 · rate` on the item. Rejected:
    /// `−0.2 · rate` on the recommendation, `+0.3 · rate` on what was chosen
    /// instead. With the default rate that is +0.01 / −0.02 / +0.03.
    pub fn learn(
        &mut self,
        main_dish: &str,
        category: Category,
        recommended: &str,
        chosen: &str,
    ) -> Result<()> {
        let biases = self
            .adjustments
            .get_mut(main_dish)
            .ok_or_else(|| RecommenderError::UnknownMainDish(main_dish.to_string()))?
            .entry(category)
            .or_default();

        if recommended == chosen {
            *biases.entry(recommended.to_string()).or_insert(0.0) += LEARNING_RATE * 0.1;
        } else {
            *biases.entry(recommended.to_string()).or_insert(0.0) -= LEARNING_RATE * 0.2;
            *biases.entry(chosen.to_string()).or_insert(0.0) += LEARNING_RATE * 0.3;
        }
        Ok(())
    }

    /// Writes the whole table. The in-memory table stays authoritative if the
    /// save fails; callers decide whether that is fatal.
    pub fn persist(&self, store: &dyn StateStore) -> Result<()> {
        let bytes = bincode::serialize(self)?;
        store.save_blob(ADJUSTMENTS_BLOB_KEY, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ScoredItem;
    use crate::persistence::MemoryStore;

    const EPS: f64 = 1e-12;

    fn flat_prediction() -> Prediction {
        Prediction::catalog_defaults()
    }

    fn score_of(prediction: &Prediction, category: Category, item: &str) -> f64 {
        prediction
            .category(category)
            .iter()
            .find(|s| s.item == item)
            .map(|s| s.probability)
            .unwrap()
    }

    #[test]
    fn empty_table_covers_full_space_with_zeros() {
        let table = AdjustmentTable::empty();
        for dish in catalog::MAIN_DISHES {
            for category in Category::ALL {
                for item in catalog::vocabulary(category) {
                    assert_eq!(table.bias(dish, category, item), 0.0);
                }
            }
        }
    }

    #[test]
    fn reinforcement_bumps_only_the_accepted_item() {
        let mut table = AdjustmentTable::empty();
        table.learn("burger", Category::Side, "fries", "fries").unwrap();
        assert!((table.bias("burger", Category::Side, "fries") - 0.01).abs() < EPS);
        for item in catalog::SIDES.iter().skip(1) {
            assert_eq!(table.bias("burger", Category::Side, item), 0.0);
        }
        // Other dishes' rows are untouched.
        assert_eq!(table.bias("pizza", Category::Side, "fries"), 0.0);
    }

    #[test]
    fn correction_applies_asymmetric_deltas() {
        let mut table = AdjustmentTable::empty();
        table.learn("burger", Category::Sauce, "ketchup", "mustard").unwrap();
        assert!((table.bias("burger", Category::Sauce, "ketchup") + 0.02).abs() < EPS);
        assert!((table.bias("burger", Category::Sauce, "mustard") - 0.03).abs() < EPS);
        for item in ["mayo", "bbq", "none"] {
            assert_eq!(table.bias("burger", Category::Sauce, item), 0.0);
        }
    }

    #[test]
    fn biases_drift_unbounded_but_applied_scores_are_clamped() {
        let mut table = AdjustmentTable::empty();
        for _ in 0..200 {
            table.learn("burger", Category::Drink, "cola", "water").unwrap();
        }
        assert!(table.bias("burger", Category::Drink, "cola") < -1.0);
        assert!(table.bias("burger", Category::Drink, "water") > 1.0);

        let adjusted = table.apply("burger", &flat_prediction()).unwrap();
        for scored in adjusted.category(Category::Drink) {
            assert!(scored.probability >= 0.01 && scored.probability <= 0.99);
        }
        assert_eq!(score_of(&adjusted, Category::Drink, "cola"), 0.01);
        assert_eq!(score_of(&adjusted, Category::Drink, "water"), 0.99);
    }

    #[test]
    fn apply_is_idempotent_without_intervening_learn() {
        let mut table = AdjustmentTable::empty();
        table.learn("pizza", Category::Side, "side_salad", "fries").unwrap();
        let first = table.apply("pizza", &flat_prediction()).unwrap();
        let second = table.apply("pizza", &flat_prediction()).unwrap();
        for category in Category::ALL {
            assert_eq!(first.category(category), second.category(category));
        }
    }

    #[test]
    fn ties_resolve_to_catalog_declaration_order() {
        let table = AdjustmentTable::empty();
        // Uniform scores, zero biases: every item ties.
        let adjusted = table.apply("salad", &flat_prediction()).unwrap();
        let sides: Vec<&str> = adjusted
            .category(Category::Side)
            .iter()
            .map(|s| s.item.as_str())
            .collect();
        assert_eq!(sides, catalog::SIDES);
    }

    #[test]
    fn apply_rejects_unknown_dish() {
        let table = AdjustmentTable::empty();
        assert!(matches!(
            table.apply("sushi", &flat_prediction()),
            Err(RecommenderError::UnknownMainDish(_))
        ));
    }

    #[test]
    fn adjusted_ordering_reflects_learned_bias() {
        let mut table = AdjustmentTable::empty();
        let mut prediction = flat_prediction();
        // Give fries a small raw lead, then learn against it.
        prediction.category_mut(Category::Side)[0] = ScoredItem {
            item: "fries".to_string(),
            probability: 0.30,
        };
        for _ in 0..3 {
            table.learn("burger", Category::Side, "fries", "rice").unwrap();
        }
        let adjusted = table.apply("burger", &prediction).unwrap();
        assert_eq!(adjusted.category(Category::Side)[0].item, "rice");
    }

    #[test]
    fn persisted_table_roundtrips_through_store() {
        let store = MemoryStore::new(10);
        let mut table = AdjustmentTable::empty();
        table.learn("pasta", Category::Drink, "iced_tea", "water").unwrap();
        table.persist(&store).unwrap();

        let reloaded = AdjustmentTable::initialize(&store);
        assert_eq!(
            reloaded.bias("pasta", Category::Drink, "water"),
            table.bias("pasta", Category::Drink, "water")
        );
    }
}
