use crate::cli::DecodeArgs;
use crate::exit_codes;
use crate::output;
use weather_link::codec;
use weather_link::{Medium, RawPayload};

pub fn execute(args: DecodeArgs) -> i32 {
    let bytes = if args.hex {
        let digits: String = args.payload.split_whitespace().collect();
        match hex::decode(&digits) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Error: invalid hex payload: {}", e);
                return exit_codes::INPUT_ERROR;
            }
        }
    } else {
        args.payload.into_bytes()
    };

    let medium: Medium = args.medium.into();
    let raw = RawPayload::new(medium, bytes);

    let reading = match codec::decode(&raw) {
        Ok(reading) => reading,
        Err(e) => {
            eprintln!("Error: cannot decode {} payload: {}", medium, e);
            return exit_codes::INPUT_ERROR;
        }
    };

    if args.json {
        if !output::print_json(&reading, false) {
            return exit_codes::EXECUTION_ERROR;
        }
    } else {
        println!("{}", reading);
    }

    exit_codes::SUCCESS
}
