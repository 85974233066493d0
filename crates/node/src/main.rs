use clap::Parser;

use mvf_node::config::{load_config_file, Cli, RuntimeConfig};
use mvf_node::logging::init_logging;
use mvf_node::Node;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load config file if specified.
    let config_file = match load_config_file(cli.config.as_ref()) {
        Ok(cf) => cf,
        Err(e) => {
            eprintln!("error loading config file: {}", e);
            std::process::exit(1);
        }
    };

    // Merge CLI and file config.
    let runtime_config = match RuntimeConfig::from_cli_and_file(&cli, config_file) {
        Ok(rc) => rc,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging (after merge so config file log_level is respected).
    if let Err(e) = init_logging(&runtime_config.log_level, runtime_config.log_file.as_deref()) {
        eprintln!("failed to open log file: {}", e);
        std::process::exit(1);
    }

    // Create and run the node.
    let node = Node::new(runtime_config);
    if let Err(e) = node.run().await {
        eprintln!("node error: {}", e);
        std::process::exit(1);
    }
}
