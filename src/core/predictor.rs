// src/core/predictor.rs
//! Trainable predictor: one-hot main dish in, a flat vector of item scores
//! out, split per category afterwards.
//!
//! The model is a small feed-forward net (4 sigmoid hidden units, sigmoid
//! outputs) trained by plain backpropagation with momentum. Everything is
//! deterministic: weights come from a fixed-seed generator and examples are
//! visited in a fixed order, so the same dataset always yields the same
//! model. Inference never uses randomness.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::core::catalog::{self, FLAT_LEN, MAIN_DISHES};
use crate::core::types::{Category, OrderRecord, Prediction, ScoredItem};
use crate::error::{RecommenderError, Result};
use crate::persistence::{StateStore, INIT_MARKER_KEY, MODEL_BLOB_KEY};

const INPUTS: usize = MAIN_DISHES.len();
const HIDDEN_UNITS: usize = 4;

const TRAIN_ITERATIONS: usize = 2000;
const ERROR_THRESHOLD: f64 = 0.005;
const TRAIN_RATE: f64 = 0.3;
const MOMENTUM: f64 = 0.1;

const WEIGHT_SEED: u64 = 0x5EED_F00D;

/// Retraining below this many orders is refused.
pub const MIN_TRAINING_ORDERS: usize = 5;

/// Hand-authored prototypical preferences: one labeled distribution per
/// category per dish, used only for cold-start training.
const SEED_PREFERENCES: [(&str, &[(&str, f64)]); 12] = [
    ("burger", &[("fries", 0.53), ("onion_rings", 0.27), ("side_salad", 0.13), ("rice", 0.07)]),
    ("burger", &[("cola", 0.47), ("lemonade", 0.33), ("water", 0.13), ("iced_tea", 0.07)]),
    ("burger", &[("ketchup", 0.30), ("mayo", 0.26), ("bbq", 0.22), ("mustard", 0.17), ("none", 0.05)]),
    ("pizza", &[("side_salad", 0.47), ("fries", 0.27), ("onion_rings", 0.20), ("rice", 0.06)]),
    ("pizza", &[("lemonade", 0.38), ("cola", 0.31), ("iced_tea", 0.19), ("water", 0.12)]),
    ("pizza", &[("none", 0.33), ("bbq", 0.27), ("ketchup", 0.20), ("mayo", 0.13), ("mustard", 0.07)]),
    ("salad", &[("rice", 0.64), ("fries", 0.18), ("side_salad", 0.09), ("onion_rings", 0.09)]),
    ("salad", &[("water", 0.44), ("iced_tea", 0.33), ("lemonade", 0.17), ("cola", 0.06)]),
    ("salad", &[("none", 0.50), ("mayo", 0.21), ("mustard", 0.14), ("bbq", 0.07), ("ketchup", 0.07)]),
    ("pasta", &[("side_salad", 0.54), ("rice", 0.23), ("fries", 0.15), ("onion_rings", 0.08)]),
    ("pasta", &[("iced_tea", 0.38), ("water", 0.31), ("lemonade", 0.19), ("cola", 0.12)]),
    ("pasta", &[("none", 0.46), ("mayo", 0.23), ("bbq", 0.15), ("mustard", 0.08), ("ketchup", 0.08)]),
];

#[derive(Serialize, Deserialize)]
struct InitMarker {
    completed: bool,
    timestamp: DateTime<Utc>,
}

struct TrainingExample {
    input: Vec<f64>,
    target: Vec<f64>,
}

/// Deterministic weight initialization source.
struct Lcg(u64);

impl Lcg {
    fn next_f64(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform in (-0.2, 0.2), the usual small-weight window.
    fn next_weight(&mut self) -> f64 {
        self.next_f64() * 0.4 - 0.2
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Clone, Serialize, Deserialize)]
struct Network {
    hidden_weights: Vec<Vec<f64>>,
    hidden_bias: Vec<f64>,
    output_weights: Vec<Vec<f64>>,
    output_bias: Vec<f64>,
}

impl Network {
    fn seeded() -> Self {
        let mut rng = Lcg(WEIGHT_SEED);
        let mut matrix = |rows: usize, cols: usize| -> Vec<Vec<f64>> {
            (0..rows).map(|_| (0..cols).map(|_| rng.next_weight()).collect()).collect()
        };
        let hidden_weights = matrix(HIDDEN_UNITS, INPUTS);
        let output_weights = matrix(FLAT_LEN, HIDDEN_UNITS);
        let mut bias = |n: usize| -> Vec<f64> { (0..n).map(|_| rng.next_weight()).collect() };
        Self {
            hidden_weights,
            output_weights,
            hidden_bias: bias(HIDDEN_UNITS),
            output_bias: bias(FLAT_LEN),
        }
    }

    fn forward(&self, input: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let hidden: Vec<f64> = (0..HIDDEN_UNITS)
            .map(|j| {
                let sum: f64 = self.hidden_weights[j]
                    .iter()
                    .zip(input)
                    .map(|(w, x)| w * x)
                    .sum();
                sigmoid(sum + self.hidden_bias[j])
            })
            .collect();
        let output: Vec<f64> = (0..FLAT_LEN)
            .map(|k| {
                let sum: f64 = self.output_weights[k]
                    .iter()
                    .zip(&hidden)
                    .map(|(w, h)| w * h)
                    .sum();
                sigmoid(sum + self.output_bias[k])
            })
            .collect();
        (hidden, output)
    }

    fn run(&self, input: &[f64]) -> Vec<f64> {
        self.forward(input).1
    }

    /// Online backprop with momentum over a fixed example order. Stops early
    /// once mean squared error drops under the threshold; returns final MSE.
    fn train(&mut self, data: &[TrainingExample]) -> f64 {
        let mut prev_out_w = vec![vec![0.0; HIDDEN_UNITS]; FLAT_LEN];
        let mut prev_out_b = vec![0.0; FLAT_LEN];
        let mut prev_hid_w = vec![vec![0.0; INPUTS]; HIDDEN_UNITS];
        let mut prev_hid_b = vec![0.0; HIDDEN_UNITS];

        let mut mse = f64::MAX;
        for _ in 0..TRAIN_ITERATIONS {
            let mut error_sum = 0.0;
            for example in data {
                let (hidden, output) = self.forward(&example.input);

                let mut out_delta = vec![0.0; FLAT_LEN];
                for k in 0..FLAT_LEN {
                    let err = example.target[k] - output[k];
                    error_sum += err * err;
                    out_delta[k] = err * output[k] * (1.0 - output[k]);
                }

                let mut hid_delta = vec![0.0; HIDDEN_UNITS];
                for j in 0..HIDDEN_UNITS {
                    let back: f64 = (0..FLAT_LEN)
                        .map(|k| out_delta[k] * self.output_weights[k][j])
                        .sum();
                    hid_delta[j] = back * hidden[j] * (1.0 - hidden[j]);
                }

                for k in 0..FLAT_LEN {
                    for j in 0..HIDDEN_UNITS {
                        let change = TRAIN_RATE * out_delta[k] * hidden[j]
                            + MOMENTUM * prev_out_w[k][j];
                        self.output_weights[k][j] += change;
                        prev_out_w[k][j] = change;
                    }
                    let change = TRAIN_RATE * out_delta[k] + MOMENTUM * prev_out_b[k];
                    self.output_bias[k] += change;
                    prev_out_b[k] = change;
                }

                for j in 0..HIDDEN_UNITS {
                    for i in 0..INPUTS {
                        let change = TRAIN_RATE * hid_delta[j] * example.input[i]
                            + MOMENTUM * prev_hid_w[j][i];
                        self.hidden_weights[j][i] += change;
                        prev_hid_w[j][i] = change;
                    }
                    let change = TRAIN_RATE * hid_delta[j] + MOMENTUM * prev_hid_b[j];
                    self.hidden_bias[j] += change;
                    prev_hid_b[j] = change;
                }
            }
            mse = error_sum / (data.len() * FLAT_LEN) as f64;
            if mse < ERROR_THRESHOLD {
                break;
            }
        }
        mse
    }
}

fn one_hot_dish(index: usize) -> Vec<f64> {
    let mut input = vec![0.0; INPUTS];
    input[index] = 1.0;
    input
}

fn seed_examples() -> Vec<TrainingExample> {
    SEED_PREFERENCES
        .iter()
        .filter_map(|(dish, dist)| {
            let dish_index = catalog::main_dish_index(dish)?;
            let mut target = vec![0.0; FLAT_LEN];
            for (item, p) in *dist {
                if let Some(i) = catalog::flat_index(item) {
                    target[i] = *p;
                }
            }
            Some(TrainingExample { input: one_hot_dish(dish_index), target })
        })
        .collect()
}

fn history_examples(history: &[OrderRecord]) -> Vec<TrainingExample> {
    history
        .iter()
        .filter_map(|order| {
            let dish_index = catalog::main_dish_index(&order.main_dish)?;
            let mut target = vec![0.0; FLAT_LEN];
            for category in Category::ALL {
                if let Some(i) = catalog::flat_index(order.chosen(category)) {
                    target[i] = 1.0;
                }
            }
            Some(TrainingExample { input: one_hot_dish(dish_index), target })
        })
        .collect()
}

/// The trainable predictor. The live network sits behind a read-write lock so
/// inference stays shared while retraining swaps in a replacement wholesale.
pub struct FoodPredictor {
    net: Arc<RwLock<Option<Network>>>,
}

impl FoodPredictor {
    pub fn new() -> Self {
        Self { net: Arc::new(RwLock::new(None)) }
    }

    pub fn is_initialized(&self) -> bool {
        self.net.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Loads the persisted model, or cold-starts from the seed dataset.
    ///
    /// Never fatal: a missing, unreadable or unsaveable blob degrades to an
    /// in-memory seed-trained model and the engine carries on.
    pub fn initialize(&self, store: &dyn StateStore) {
        let marker_present = match store.load_blob(INIT_MARKER_KEY) {
            Ok(Some(bytes)) => serde_json::from_slice::<InitMarker>(&bytes)
                .map(|m| m.completed)
                .unwrap_or(false),
            Ok(None) => false,
            Err(e) => {
                warn!("could not read initialization marker: {e}");
                false
            }
        };

        if marker_present {
            match store.load_blob(MODEL_BLOB_KEY) {
                Ok(Some(bytes)) => match bincode::deserialize::<Network>(&bytes) {
                    Ok(net) => {
                        self.install(net);
                        info!("loaded persisted predictor model");
                        return;
                    }
                    Err(e) => warn!("persisted model is unreadable, retraining from seed: {e}"),
                },
                // Marker without a model is an unusual state; retrain.
                Ok(None) => warn!("initialization marker found but no model, retraining from seed"),
                Err(e) => warn!("could not load persisted model, retraining from seed: {e}"),
            }
            self.train_from_seed(store);
            return;
        }

        info!("first-time initialization, training predictor on seed data");
        self.train_from_seed(store);
        let marker = InitMarker { completed: true, timestamp: Utc::now() };
        match serde_json::to_vec(&marker) {
            Ok(bytes) => {
                if let Err(e) = store.save_blob(INIT_MARKER_KEY, &bytes) {
                    warn!("could not save initialization marker: {e}");
                }
            }
            Err(e) => warn!("could not encode initialization marker: {e}"),
        }
    }

    fn train_from_seed(&self, store: &dyn StateStore) {
        let mut net = Network::seeded();
        let mse = net.train(&seed_examples());
        info!("seed training finished, mse {mse:.5}");
        self.persist(store, &net);
        self.install(net);
    }

    fn install(&self, net: Network) {
        *self.net.write().unwrap_or_else(|p| p.into_inner()) = Some(net);
    }

    // Best effort: in-memory weights are authoritative, storage may lag.
    fn persist(&self, store: &dyn StateStore, net: &Network) {
        match bincode::serialize(net) {
            Ok(bytes) => {
                if let Err(e) = store.save_blob(MODEL_BLOB_KEY, &bytes) {
                    warn!("could not persist predictor model: {e}");
                }
            }
            Err(e) => warn!("could not encode predictor model: {e}"),
        }
    }

    /// Raw per-category scores for one main dish, each list sorted descending
    /// (catalog order breaks ties).
    pub fn predict(&self, main_dish: &str) -> Result<Prediction> {
        let dish_index = catalog::main_dish_index(main_dish)
            .ok_or_else(|| RecommenderError::UnknownMainDish(main_dish.to_string()))?;

        let guard = self.net.read().unwrap_or_else(|p| p.into_inner());
        let net = guard.as_ref().ok_or(RecommenderError::NotInitialized)?;
        let output = net.run(&one_hot_dish(dish_index));

        let extract = |category: Category| {
            let offset = catalog::category_offset(category);
            let mut items: Vec<ScoredItem> = catalog::vocabulary(category)
                .iter()
                .enumerate()
                .map(|(i, item)| ScoredItem {
                    item: (*item).to_string(),
                    probability: output[offset + i],
                })
                .collect();
            items.sort_by(|a, b| b.probability.total_cmp(&a.probability));
            items
        };

        Ok(Prediction {
            sides: extract(Category::Side),
            drinks: extract(Category::Drink),
            sauces: extract(Category::Sauce),
        })
    }

    /// Refits the model on the full order history and swaps it in.
    ///
    /// The live network stays untouched until the replacement is fully
    /// trained, so a short or unusable history never degrades predictions.
    pub fn retrain(&self, store: &dyn StateStore, history: &[OrderRecord]) -> Result<()> {
        if history.len() < MIN_TRAINING_ORDERS {
            return Err(RecommenderError::InsufficientHistory {
                have: history.len(),
                need: MIN_TRAINING_ORDERS,
            });
        }
        let examples = history_examples(history);
        if examples.len() < MIN_TRAINING_ORDERS {
            return Err(RecommenderError::InsufficientHistory {
                have: examples.len(),
                need: MIN_TRAINING_ORDERS,
            });
        }

        let mut candidate = {
            let guard = self.net.read().unwrap_or_else(|p| p.into_inner());
            guard.as_ref().ok_or(RecommenderError::NotInitialized)?.clone()
        };
        let mse = candidate.train(&examples);
        info!("retrained predictor on {} orders, mse {mse:.5}", examples.len());

        self.persist(store, &candidate);
        self.install(candidate);
        Ok(())
    }
}

impl Default for FoodPredictor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MealChoice;
    use crate::persistence::MemoryStore;

    fn seeded_predictor(store: &MemoryStore) -> FoodPredictor {
        let predictor = FoodPredictor::new();
        predictor.initialize(store);
        predictor
    }

    fn order(dish: &str, side: &str, drink: &str, sauce: &str) -> OrderRecord {
        OrderRecord {
            main_dish: dish.to_string(),
            side: side.to_string(),
            drink: drink.to_string(),
            sauce: sauce.to_string(),
            timestamp: Utc::now(),
            recommended: MealChoice::new(side, drink, sauce),
            accuracy: 100.0,
        }
    }

    #[test]
    fn predict_before_initialize_fails() {
        let predictor = FoodPredictor::new();
        assert!(matches!(
            predictor.predict("burger"),
            Err(RecommenderError::NotInitialized)
        ));
    }

    #[test]
    fn seed_training_reproduces_prototypical_preferences() {
        let store = MemoryStore::new(10);
        let predictor = seeded_predictor(&store);
        let rec = predictor.predict("burger").unwrap().recommendation();
        assert_eq!(rec, MealChoice::new("fries", "cola", "ketchup"));
    }

    #[test]
    fn prediction_covers_whole_vocabulary_sorted_descending() {
        let store = MemoryStore::new(10);
        let predictor = seeded_predictor(&store);
        let prediction = predictor.predict("pizza").unwrap();
        for category in Category::ALL {
            let items = prediction.category(category);
            assert_eq!(items.len(), catalog::vocabulary(category).len());
            for pair in items.windows(2) {
                assert!(pair[0].probability >= pair[1].probability);
            }
            for item in items {
                assert!(catalog::is_valid_item(category, &item.item));
                assert!(item.probability >= 0.0);
            }
        }
    }

    #[test]
    fn inference_is_deterministic_for_fixed_state() {
        let store_a = MemoryStore::new(10);
        let store_b = MemoryStore::new(10);
        let a = seeded_predictor(&store_a);
        let b = seeded_predictor(&store_b);
        for dish in MAIN_DISHES {
            let pa = a.predict(dish).unwrap();
            let pb = b.predict(dish).unwrap();
            for category in Category::ALL {
                assert_eq!(pa.category(category), pb.category(category));
            }
        }
    }

    #[test]
    fn initialize_persists_model_and_marker() {
        let store = MemoryStore::new(10);
        let _ = seeded_predictor(&store);
        assert!(store.has_blob(MODEL_BLOB_KEY));
        assert!(store.has_blob(INIT_MARKER_KEY));
    }

    #[test]
    fn initialize_survives_storage_failure() {
        let store = MemoryStore::new(10);
        store.set_fail_saves(true);
        let predictor = seeded_predictor(&store);
        assert!(predictor.predict("salad").is_ok());
        assert!(!store.has_blob(MODEL_BLOB_KEY));
    }

    #[test]
    fn retrain_refuses_thin_history() {
        let store = MemoryStore::new(10);
        let predictor = seeded_predictor(&store);
        let history = vec![order("burger", "fries", "cola", "ketchup"); 4];
        assert!(matches!(
            predictor.retrain(&store, &history),
            Err(RecommenderError::InsufficientHistory { have: 4, need: 5 })
        ));
    }

    #[test]
    fn retrain_follows_consistent_history() {
        let store = MemoryStore::new(10);
        let predictor = seeded_predictor(&store);
        // Seed data puts rice/water/none on top for salad; the user disagrees.
        let history = vec![order("salad", "fries", "cola", "bbq"); 8];
        predictor.retrain(&store, &history).unwrap();
        let rec = predictor.predict("salad").unwrap().recommendation();
        assert_eq!(rec, MealChoice::new("fries", "cola", "bbq"));
    }
}
