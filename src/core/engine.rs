// src/core/engine.rs
use std::sync::Arc;

use chrono::{Local, Utc};
use log::{debug, warn};

use crate::core::catalog;
use crate::core::predictor::FoodPredictor;
use crate::core::types::{
    Category, CategoryConfidence, MealChoice, OrderRecord, Prediction, ScoredItem,
};
use crate::error::{RecommenderError, Result};
use crate::learning::AdjustmentTable;
use crate::persistence::StateStore;

/// What the UI gets back from one `recommend` call.
#[derive(Debug, Clone)]
pub struct RecommendationView {
    /// Post-adjustment scores, sorted descending per category.
    pub prediction: Prediction,
    /// Top item per category.
    pub recommendation: MealChoice,
    /// Gap between the top two raw scores, as a percentage per category.
    pub confidence: CategoryConfidence,
}

struct PendingRecommendation {
    main_dish: String,
    recommended: MealChoice,
}

/// The hybrid recommender: predictor scores, feedback-table adjustment, and
/// the record/retrain loop, behind a plain request/response API.
///
/// One engine instance serves one session: the pending-recommendation slot
/// holds at most the single most recent `recommend` result, and a newer call
/// silently replaces an unconsumed one. The instance owns exclusive access to
/// its mutable state; embedders sharing it across threads wrap it in a lock.
pub struct RecommendationEngine {
    store: Arc<dyn StateStore>,
    predictor: FoodPredictor,
    adjustments: AdjustmentTable,
    pending: Option<PendingRecommendation>,
    debug_trace: Vec<String>,
    initialized: bool,
}

impl RecommendationEngine {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            predictor: FoodPredictor::new(),
            adjustments: AdjustmentTable::empty(),
            pending: None,
            debug_trace: Vec::new(),
            initialized: false,
        }
    }

    /// Loads or cold-starts both models. Never fatal: missing or unreadable
    /// persisted state degrades to freshly trained in-memory models.
    pub fn initialize(&mut self) {
        self.predictor.initialize(&*self.store);
        self.adjustments = AdjustmentTable::initialize(&*self.store);
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Runs one recommendation cycle for `main_dish`: predict, adjust, rank.
    ///
    /// The result is parked in the pending slot so the following `record`
    /// call knows what was recommended. The debug trace restarts here.
    pub fn recommend(&mut self, main_dish: &str) -> Result<RecommendationView> {
        if !self.initialized {
            return Err(RecommenderError::NotInitialized);
        }
        if !catalog::is_valid_main_dish(main_dish) {
            return Err(RecommenderError::UnknownMainDish(main_dish.to_string()));
        }

        self.debug_trace.clear();
        self.trace(format!("User selected: {main_dish}"));

        let (raw, have_model) = match self.predictor.predict(main_dish) {
            Ok(prediction) => (prediction, true),
            Err(RecommenderError::NotInitialized) => {
                warn!("no trained model available, serving catalog defaults");
                self.trace("No trained model available, using catalog defaults".to_string());
                (Prediction::catalog_defaults(), false)
            }
            Err(e) => return Err(e),
        };

        self.trace("Predictor scores:".to_string());
        for category in Category::ALL {
            let line = format!(
                "{} options: {}",
                capitalize(category.name()),
                format_scores(raw.category(category))
            );
            self.trace(line);
        }

        let confidence = confidence_of(&raw);
        self.trace(format!(
            "Model confidence - Side: {:.2}%, Drink: {:.2}%, Sauce: {:.2}%",
            confidence.side, confidence.drink, confidence.sauce
        ));

        // Without a model there is nothing worth adjusting; the defaults go
        // out as-is.
        let adjusted = if have_model {
            self.adjustments.apply(main_dish, &raw)?
        } else {
            raw
        };
        let recommendation = adjusted.recommendation();

        for category in Category::ALL {
            let item = recommendation.item(category);
            let bias = self.adjustments.bias(main_dish, category, item);
            self.trace(format!(
                "{} \"{item}\": adjustment {:+.3}",
                capitalize(category.name()),
                bias
            ));
        }
        self.trace(format!(
            "Recommended - Side: {}, Drink: {}, Sauce: {}",
            recommendation.side, recommendation.drink, recommendation.sauce
        ));

        self.pending = Some(PendingRecommendation {
            main_dish: main_dish.to_string(),
            recommended: recommendation.clone(),
        });

        Ok(RecommendationView { prediction: adjusted, recommendation, confidence })
    }

    /// Records what the user actually ordered and learns from it.
    ///
    /// Requires the pending slot to hold this dish's recommendation. All
    /// inputs are validated before any learning mutates state, so a failed
    /// call applies nothing. Returns whether the order triggered a predictor
    /// retraining pass; retraining problems never fail the call itself.
    pub fn record(&mut self, main_dish: &str, choice: &MealChoice) -> Result<bool> {
        if !self.initialized {
            return Err(RecommenderError::NotInitialized);
        }
        let matches = self
            .pending
            .as_ref()
            .map(|p| p.main_dish == main_dish)
            .unwrap_or(false);
        if !matches {
            return Err(RecommenderError::NoPendingRecommendation(main_dish.to_string()));
        }
        for category in Category::ALL {
            let item = choice.item(category);
            if !catalog::is_valid_item(category, item) {
                return Err(RecommenderError::UnknownItem {
                    category: category.name(),
                    item: item.to_string(),
                });
            }
        }

        let pending = match self.pending.take() {
            Some(p) => p,
            None => return Err(RecommenderError::NoPendingRecommendation(main_dish.to_string())),
        };

        self.trace(format!(
            "Order placed - Side: {}, Drink: {}, Sauce: {}",
            choice.side, choice.drink, choice.sauce
        ));
        let accuracy = accuracy_of(&pending.recommended, choice);
        self.trace(format!(
            "Recommendation accuracy: {accuracy:.2}% (Side: {}, Drink: {}, Sauce: {})",
            tick(pending.recommended.side == choice.side),
            tick(pending.recommended.drink == choice.drink),
            tick(pending.recommended.sauce == choice.sauce)
        ));

        self.trace("Learning outcome:".to_string());
        for category in Category::ALL {
            let recommended = pending.recommended.item(category);
            let chosen = choice.item(category);
            self.adjustments.learn(main_dish, category, recommended, chosen)?;
            let line = if recommended == chosen {
                format!("  {}: Reinforcing \"{recommended}\" (+0.01)", capitalize(category.name()))
            } else {
                format!(
                    "  {}: Decreasing \"{recommended}\" (-0.02), Increasing \"{chosen}\" (+0.03)",
                    capitalize(category.name())
                )
            };
            self.trace(line);
        }

        // In-memory learning already happened; storage is best effort.
        if let Err(e) = self.adjustments.persist(&*self.store) {
            warn!("could not persist adjustment table: {e}");
            self.trace(format!("Warning: could not persist adjustments ({e})"));
        }

        let record = OrderRecord {
            main_dish: main_dish.to_string(),
            side: choice.side.clone(),
            drink: choice.drink.clone(),
            sauce: choice.sauce.clone(),
            timestamp: Utc::now(),
            recommended: pending.recommended,
            accuracy,
        };
        if let Err(e) = self.store.append_order(&record) {
            warn!("could not append order record: {e}");
            self.trace(format!("Warning: could not save order ({e})"));
        }

        let (count, due) = match self.store.increment_and_check_counter() {
            Ok(result) => result,
            Err(e) => {
                warn!("could not advance order counter: {e}");
                self.trace(format!("Warning: could not advance order counter ({e})"));
                return Ok(false);
            }
        };
        if !due {
            return Ok(false);
        }

        self.trace(format!("Retraining threshold reached at order {count}"));
        let history = match self.store.all_orders() {
            Ok(history) => history,
            Err(e) => {
                warn!("could not load order history for retraining: {e}");
                self.trace(format!("Warning: could not load order history ({e})"));
                return Ok(false);
            }
        };
        match self.predictor.retrain(&*self.store, &history) {
            Ok(()) => {
                if let Err(e) = self.store.mark_trained(Utc::now()) {
                    warn!("could not stamp training timestamp: {e}");
                }
                self.trace(format!("Predictor retrained on {} orders", history.len()));
                Ok(true)
            }
            Err(RecommenderError::InsufficientHistory { have, need }) => {
                // Too few orders yet; skip silently and try again next window.
                debug!("skipping retraining: {have} of {need} orders");
                Ok(false)
            }
            Err(e) => {
                warn!("retraining failed, keeping previous model: {e}");
                self.trace(format!("Warning: retraining failed ({e})"));
                Ok(false)
            }
        }
    }

    /// Human-readable trace of the current cycle, oldest line first. Cleared
    /// at the start of every `recommend` call.
    pub fn debug_log(&self) -> &[String] {
        &self.debug_trace
    }

    /// Current learned bias for one item; observability hook for debug panels.
    pub fn adjustment(&self, main_dish: &str, category: Category, item: &str) -> f64 {
        self.adjustments.bias(main_dish, category, item)
    }

    fn trace(&mut self, message: String) {
        debug!("{message}");
        self.debug_trace
            .push(format!("[{}] {message}", Local::now().format("%H:%M:%S")));
    }
}

/// Percent of categories where the recommendation matched the actual choice.
/// Diagnostic only; never feeds back into learning.
fn accuracy_of(recommended: &MealChoice, choice: &MealChoice) -> f64 {
    let hits = Category::ALL
        .iter()
        .filter(|c| recommended.item(**c) == choice.item(**c))
        .count();
    hits as f64 / Category::ALL.len() as f64 * 100.0
}

fn confidence_of(prediction: &Prediction) -> CategoryConfidence {
    let per_category = |items: &[ScoredItem]| -> f64 {
        if items.len() < 2 {
            return 100.0;
        }
        ((items[0].probability - items[1].probability) * 100.0).clamp(0.0, 100.0)
    };
    CategoryConfidence {
        side: per_category(&prediction.sides),
        drink: per_category(&prediction.drinks),
        sauce: per_category(&prediction.sauces),
    }
}

fn format_scores(items: &[ScoredItem]) -> String {
    items
        .iter()
        .map(|s| format!("{}: {:.2}%", s.item, s.probability * 100.0))
        .collect::<Vec<_>>()
        .join(", ")
}

fn tick(hit: bool) -> &'static str {
    if hit {
        "✓"
    } else {
        "✗"
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn ready_engine(frequency: u64) -> (RecommendationEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new(frequency));
        let mut engine = RecommendationEngine::new(store.clone());
        engine.initialize();
        (engine, store)
    }

    #[test]
    fn recommend_before_initialize_is_rejected() {
        let store = Arc::new(MemoryStore::new(10));
        let mut engine = RecommendationEngine::new(store);
        assert!(matches!(
            engine.recommend("burger"),
            Err(RecommenderError::NotInitialized)
        ));
    }

    #[test]
    fn recommend_rejects_unknown_dish() {
        let (mut engine, _) = ready_engine(10);
        assert!(matches!(
            engine.recommend("sushi"),
            Err(RecommenderError::UnknownMainDish(_))
        ));
    }

    #[test]
    fn every_dish_gets_one_valid_item_per_category() {
        let (mut engine, _) = ready_engine(10);
        for dish in catalog::MAIN_DISHES {
            let view = engine.recommend(dish).unwrap();
            for category in Category::ALL {
                let item = view.recommendation.item(category);
                assert!(catalog::is_valid_item(category, item), "{dish}/{item}");
                assert_eq!(
                    view.prediction.category(category).len(),
                    catalog::vocabulary(category).len()
                );
            }
        }
    }

    #[test]
    fn record_without_recommend_is_rejected() {
        let (mut engine, _) = ready_engine(10);
        let choice = MealChoice::new("fries", "cola", "ketchup");
        assert!(matches!(
            engine.record("burger", &choice),
            Err(RecommenderError::NoPendingRecommendation(_))
        ));
    }

    #[test]
    fn newer_recommendation_overwrites_the_pending_slot() {
        let (mut engine, _) = ready_engine(10);
        engine.recommend("burger").unwrap();
        engine.recommend("pizza").unwrap();
        let choice = MealChoice::new("fries", "cola", "ketchup");
        assert!(matches!(
            engine.record("burger", &choice),
            Err(RecommenderError::NoPendingRecommendation(_))
        ));
        // The pizza recommendation is still live and consumable.
        assert!(engine.record("pizza", &choice).is_ok());
    }

    #[test]
    fn record_validates_choice_before_learning() {
        let (mut engine, store) = ready_engine(10);
        let recommended = engine.recommend("burger").unwrap().recommendation;
        let bad = MealChoice::new("fries", "cola", "hot_sauce");
        assert!(matches!(
            engine.record("burger", &bad),
            Err(RecommenderError::UnknownItem { .. })
        ));
        // Nothing was learned or stored, and the pending slot survives.
        assert_eq!(store.order_count(), 0);
        let choice = MealChoice::new(&recommended.side, &recommended.drink, &recommended.sauce);
        assert!(engine.record("burger", &choice).is_ok());
    }

    #[test]
    fn pending_slot_is_consumed_by_record() {
        let (mut engine, _) = ready_engine(10);
        let rec = engine.recommend("burger").unwrap().recommendation;
        engine.record("burger", &rec).unwrap();
        assert!(matches!(
            engine.record("burger", &rec),
            Err(RecommenderError::NoPendingRecommendation(_))
        ));
    }

    #[test]
    fn storage_failure_does_not_fail_record() {
        let (mut engine, store) = ready_engine(10);
        let rec = engine.recommend("burger").unwrap().recommendation;
        store.set_fail_saves(true);
        // Learning applied in memory, nothing persisted, no retraining, no error.
        assert_eq!(engine.record("burger", &rec).unwrap(), false);
        assert_eq!(store.order_count(), 0);
        assert!(engine
            .debug_log()
            .iter()
            .any(|line| line.contains("could not persist adjustments")));
    }

    #[test]
    fn debug_log_restarts_with_each_recommend() {
        let (mut engine, _) = ready_engine(10);
        engine.recommend("burger").unwrap();
        let first_len = engine.debug_log().len();
        assert!(first_len > 0);
        assert!(engine.debug_log()[0].contains("User selected: burger"));

        engine.recommend("pasta").unwrap();
        assert!(engine.debug_log()[0].contains("User selected: pasta"));
    }

    #[test]
    fn accuracy_is_fraction_of_matched_categories() {
        let rec = MealChoice::new("fries", "cola", "ketchup");
        assert_eq!(accuracy_of(&rec, &rec), 100.0);
        let two_of_three = MealChoice::new("fries", "cola", "mustard");
        assert!((accuracy_of(&rec, &two_of_three) - 200.0 / 3.0).abs() < 1e-9);
        let none = MealChoice::new("rice", "water", "none");
        assert_eq!(accuracy_of(&rec, &none), 0.0);
    }

    #[test]
    fn confidence_is_clamped_top_two_gap() {
        let mut prediction = Prediction::catalog_defaults();
        prediction.sides[0].probability = 0.9;
        prediction.sides[1].probability = 0.2;
        let confidence = confidence_of(&prediction);
        assert!((confidence.side - 70.0).abs() < 1e-9);
        // Uniform scores leave zero separation.
        assert_eq!(confidence.drink, 0.0);
    }
}
