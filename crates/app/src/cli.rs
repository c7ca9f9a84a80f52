use anyhow::Result;

use crate::counting;

pub(crate) const USAGE: &str = "Usage: linetally <command>\n\n\
Commands:\n  \
count    run the counting pipeline (see `linetally count` for flags)\n  \
ports    list serial ports usable with `count --serial`";

pub(crate) fn handle_commands(args: &[String]) -> Result<bool> {
    match args.get(1).map(|s| s.as_str()) {
        Some("count") => {
            counting::run_from_args(args)?;
            Ok(true)
        }
        Some("ports") => {
            list_serial_ports()?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn list_serial_ports() -> Result<()> {
    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("no serial ports detected");
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}
