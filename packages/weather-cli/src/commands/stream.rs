use crate::cli::StreamArgs;
use crate::exit_codes;
use crate::output;
use std::time::Duration;
use weather_link::{
    ConnectionManager, ConnectionState, HttpForecastService, LinkConfig, LinkEvent, Subscription,
};

pub async fn execute(args: StreamArgs) -> i32 {
    let config = match LinkConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let candidates = args.candidates(&config);
    let manager = ConnectionManager::new(config);
    let mut events = manager.subscribe();

    let connected = manager.connect_any(&candidates).await;
    // Failures of candidates tried before the one that opened are history
    drain(&mut events, args.json);
    match connected {
        Ok(kind) => log::info!("Streaming from {}", kind),
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    }

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut refresh = args
        .refresh_every
        .filter(|secs| *secs > 0)
        .map(|secs| tokio::time::interval(Duration::from_secs(secs)));

    let mut exit_code = exit_codes::SUCCESS;
    if let ConnectionState::Failed { reason } = manager.current_state() {
        eprintln!("Error: {}", reason);
        exit_code = exit_codes::EXECUTION_ERROR;
    }

    while exit_code == exit_codes::SUCCESS {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            _ = &mut deadline => break,
            _ = tick(&mut refresh) => {
                if let Err(e) = manager.refresh_now() {
                    log::warn!("Refresh failed: {}", e);
                }
            }
            event = events.recv() => match event {
                Some(event) => {
                    if !print_event(&event, args.json) {
                        exit_code = exit_codes::EXECUTION_ERROR;
                        break;
                    }
                    if let LinkEvent::StateChanged(ConnectionState::Failed { reason }) = event {
                        eprintln!("Error: {}", reason);
                        exit_code = exit_codes::EXECUTION_ERROR;
                        break;
                    }
                }
                None => break,
            },
        }
    }

    if args.forecast && exit_code == exit_codes::SUCCESS {
        let url = manager.config().forecast_url.clone();
        exit_code = run_forecast(&manager, url, args.json).await;
    }

    if let Err(e) = manager.disconnect().await {
        log::warn!("Disconnect failed: {}", e);
    }
    drain(&mut events, args.json);

    exit_code
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run_forecast(manager: &ConnectionManager, url: Option<String>, json: bool) -> i32 {
    let Some(url) = url else {
        eprintln!("Error: --forecast needs FORECAST_URL to be set");
        return exit_codes::INPUT_ERROR;
    };

    let service = match HttpForecastService::new(url) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    match manager.forecast(&service).await {
        Ok(Some(forecast)) => {
            if json {
                if !output::print_json(&forecast, true) {
                    return exit_codes::EXECUTION_ERROR;
                }
            } else {
                match forecast.confidence {
                    Some(c) => println!("forecast: {} (confidence {:.2})", forecast.label, c),
                    None => println!("forecast: {}", forecast.label),
                }
            }
            exit_codes::SUCCESS
        }
        Ok(None) => {
            eprintln!("No reading received, skipping forecast");
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: forecast failed: {}", e);
            exit_codes::EXECUTION_ERROR
        }
    }
}

/// Print whatever is already queued
fn drain(events: &mut Subscription, json: bool) {
    while let Some(event) = events.try_recv() {
        print_event(&event, json);
    }
}

fn print_event(event: &LinkEvent, json: bool) -> bool {
    if json {
        return output::print_json(event, true);
    }

    match event {
        LinkEvent::StateChanged(state) => println!("state: {}", state),
        LinkEvent::Reading(reading) => println!("reading: {}", reading),
        LinkEvent::Prediction(prediction) => println!("prediction: {}", prediction),
        LinkEvent::DecodeFailed { medium, error } => {
            eprintln!("warning: undecodable {} payload: {}", medium, error)
        }
    }
    true
}
