use crate::cli::PredictArgs;
use crate::exit_codes;
use crate::output;
use chrono::Utc;
use serde::Serialize;
use weather_link::predictor;
use weather_link::{PredictionLabel, Reading};

#[derive(Serialize)]
struct PredictOutput {
    label: PredictionLabel,
    description: &'static str,
    temperature: f32,
    humidity: f32,
    pressure: f32,
}

pub fn execute(args: PredictArgs) -> i32 {
    let reading = match Reading::new(args.temperature, args.humidity, args.pressure, Utc::now()) {
        Ok(reading) => reading,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let prediction = predictor::predict_reading(&reading);

    if args.json {
        let result = PredictOutput {
            label: prediction.label,
            description: prediction.label.as_str(),
            temperature: reading.temperature(),
            humidity: reading.humidity(),
            pressure: reading.pressure(),
        };
        if !output::print_json(&result, false) {
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        println!("{}", prediction);
    }

    exit_codes::SUCCESS
}
