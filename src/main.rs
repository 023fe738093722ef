use std::net::TcpListener;
use std::sync::Arc;

use clap::Parser;
use env_logger::Env;

use ofp_multipath::config::Cli;
use ofp_multipath::ofp_controller::OfpController;
use ofp_multipath::topology::StaticTopology;
use ofp_multipath::ForwardingEngine;

fn main() -> ofp_multipath::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let topology = Arc::new(StaticTopology::from_file(&cli.topology)?);
    let engine = Arc::new(ForwardingEngine::new(topology, cli.engine_config()));

    let listener = TcpListener::bind(cli.listen)?;
    log::info!("[Main] listening for switches on {}", listener.local_addr()?);
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::warn!("[Main] accept failed: {}", e);
                continue;
            }
        };
        let engine = engine.clone();
        std::thread::spawn(move || {
            if let Err(e) = engine.handle_client_connected(stream) {
                log::warn!("[Main] switch connection closed: {}", e);
            }
        });
    }
    Ok(())
}
