use meal_core::core::catalog;
use meal_core::persistence::{FileStore, DEFAULT_TRAINING_FREQUENCY};
use meal_core::{MealChoice, RecommendationEngine};
use std::io::{stdin, stdout, Write};
use std::sync::Arc;

const DATA_DIR: &str = "meal_data";

fn main() {
    env_logger::init();

    let store = match FileStore::open(DATA_DIR, DEFAULT_TRAINING_FREQUENCY) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("[ERROR] Could not open data directory '{DATA_DIR}': {e}");
            return;
        }
    };
    let mut engine = RecommendationEngine::new(store);
    engine.initialize();

    println!("Smart Meal Assistant. Type a main dish to get a combo, 'exit' to quit.");
    println!("Main dishes: {}", catalog::MAIN_DISHES.join(", "));
    println!("---------------------------------------------------------------");

    loop {
        print!("\ndish> ");
        stdout().flush().unwrap();
        let mut input = String::new();
        if stdin().read_line(&mut input).unwrap() == 0 {
            break;
        }
        let cmd = input.trim();

        match cmd {
            "exit" => break,
            "debug" => {
                for line in engine.debug_log() {
                    println!("{line}");
                }
            }
            "" => continue,
            dish => {
                let view = match engine.recommend(dish) {
                    Ok(view) => view,
                    Err(e) => {
                        println!("{e}");
                        continue;
                    }
                };
                println!(
                    "Recommended: side={}, drink={}, sauce={}",
                    view.recommendation.side, view.recommendation.drink, view.recommendation.sauce
                );
                println!(
                    "Confidence:  side={:.0}%, drink={:.0}%, sauce={:.0}%",
                    view.confidence.side, view.confidence.drink, view.confidence.sauce
                );

                let choice = match read_choice(&view.recommendation) {
                    Some(choice) => choice,
                    None => {
                        println!("Expected 'side drink sauce' or an empty line to accept.");
                        continue;
                    }
                };
                match engine.record(dish, &choice) {
                    Ok(true) => println!("Order saved. Model retrained on full history."),
                    Ok(false) => println!("Order saved."),
                    Err(e) => println!("Could not record order: {e}"),
                }
            }
        }
    }

    println!("Bye.");
}

// Empty line accepts the recommendation; otherwise three whitespace-separated
// item ids override it.
fn read_choice(recommended: &MealChoice) -> Option<MealChoice> {
    print!("your order (enter = accept)> ");
    stdout().flush().unwrap();
    let mut input = String::new();
    stdin().read_line(&mut input).unwrap();
    let input = input.trim();

    if input.is_empty() {
        return Some(recommended.clone());
    }
    let parts: Vec<&str> = input.split_whitespace().collect();
    if parts.len() != 3 {
        return None;
    }
    Some(MealChoice::new(parts[0], parts[1], parts[2]))
}
