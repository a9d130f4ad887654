// A scripted run: synthetic diners order for a while and the engine's
// recommendation accuracy is printed as it learns. Nothing touches disk.

use crossterm::style::Stylize;
use meal_core::core::types::Category;
use meal_core::persistence::MemoryStore;
use meal_core::{MealChoice, RecommendationEngine};
use std::sync::Arc;

const TRAINING_FREQUENCY: u64 = 10;
const TOTAL_ORDERS: usize = 40;

/// Fixed synthetic taste per dish. Deliberately disagrees with the seed data
/// in places so the learning has visible work to do.
const DINER_TASTES: [(&str, &str, &str, &str); 4] = [
    ("burger", "fries", "cola", "mustard"),
    ("pizza", "fries", "cola", "bbq"),
    ("salad", "side_salad", "water", "none"),
    ("pasta", "side_salad", "iced_tea", "none"),
];

struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

fn main() {
    env_logger::init();

    let store = Arc::new(MemoryStore::new(TRAINING_FREQUENCY));
    let mut engine = RecommendationEngine::new(store);
    engine.initialize();
    let mut rng = Lcg(42);

    println!("{}", "Meal recommendation simulator".bold());
    println!("{TOTAL_ORDERS} orders, retraining every {TRAINING_FREQUENCY}\n");

    let mut hits = 0usize;
    let mut total = 0usize;

    for i in 0..TOTAL_ORDERS {
        let (dish, side, drink, sauce) = DINER_TASTES[(rng.next() % 4) as usize];
        let view = match engine.recommend(dish) {
            Ok(view) => view,
            Err(e) => {
                eprintln!("recommend failed: {e}");
                return;
            }
        };
        let choice = MealChoice::new(side, drink, sauce);

        for category in Category::ALL {
            total += 1;
            if view.recommendation.item(category) == choice.item(category) {
                hits += 1;
            }
        }

        let retrained = match engine.record(dish, &choice) {
            Ok(retrained) => retrained,
            Err(e) => {
                eprintln!("record failed: {e}");
                return;
            }
        };

        let running = hits as f64 / total as f64 * 100.0;
        let accuracy = format!("{running:5.1}%");
        let accuracy = if running >= 66.0 { accuracy.green() } else { accuracy.yellow() };
        print!(
            "#{:02} {:<7} got {:<11}/{:<8}/{:<7} cumulative accuracy {accuracy}",
            i + 1,
            dish,
            view.recommendation.side,
            view.recommendation.drink,
            view.recommendation.sauce
        );
        if retrained {
            print!("  {}", "[model retrained]".cyan());
        }
        println!();
    }

    println!(
        "\nFinal cumulative accuracy: {:.1}% over {} category picks",
        hits as f64 / total as f64 * 100.0,
        total
    );
    println!("\nLast cycle debug trace:");
    for line in engine.debug_log() {
        println!("  {}", line.as_str().dark_grey());
    }
}
