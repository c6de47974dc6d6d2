use tandem::config::RendezvousConfig;
use tandem::rendezvous::RendezvousServer;

#[tokio::main]
async fn main() -> tandem::Result<()> {
    tracing_subscriber::fmt::init();

    let config = RendezvousConfig::from_env();

    println!("   Tandem Rendezvous Server");
    println!("   Binding to {}", config.bind_addr);
    println!("   Press Ctrl+C to stop\n");

    let server = RendezvousServer::new(config);
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\n   Shutting down");
            Ok(())
        }
    }
}
