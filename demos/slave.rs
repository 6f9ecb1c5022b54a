use ptp_lite::time::util::format_millis;
use ptp_lite::{Config, Slave};

fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    // Optional JSON config path; defaults otherwise.
    match std::env::args().nth(1) {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();

    let config = load_config()?;
    println!("Starting slave on group {}", config.sync_target());

    let slave = Slave::bind(config)?.spawn()?;
    let mut reports = slave.subscribe();

    loop {
        tokio::select! {
            changed = reports.changed() => {
                if changed.is_err() {
                    break;
                }
                let report = *reports.borrow_and_update();
                if let Some(report) = report {
                    println!(
                        "[{}] gap {}ms, delay {}ms, master time {}",
                        report.sync_id,
                        report.gap,
                        report.delay,
                        format_millis(report.local_time_estimate)
                    );
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    slave.shutdown().await;
    Ok(())
}
