use ptp_lite::{Config, Master};

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
    println!("Starting master:");
    println!("- Group: {}", config.sync_target());
    println!("- Delay port: {}", config.delay_port);
    println!("- Sync interval: {:?}", config.sync_interval);

    let master = Master::bind(config)?.spawn()?;
    println!("\nRunning until Ctrl-C...");

    tokio::signal::ctrl_c().await?;
    master.shutdown().await;
    Ok(())
}
