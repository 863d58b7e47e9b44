use crate::cli::PortsArgs;
use crate::exit_codes;
use crate::output;
use weather_link::transport::list_serial_ports;

pub fn execute(args: PortsArgs) -> i32 {
    let ports = match list_serial_ports() {
        Ok(ports) => ports,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if args.json {
        if !output::print_json(&ports, false) {
            return exit_codes::EXECUTION_ERROR;
        }
    } else if ports.is_empty() {
        println!("No serial ports found");
    } else {
        println!("{:<24} TYPE", "PORT");
        for port in &ports {
            println!("{:<24} {}", port.name, port.kind);
        }
    }

    exit_codes::SUCCESS
}
