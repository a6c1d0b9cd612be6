use anyhow::bail;
use tracing::{error, info};

use eventhttp::config::Config;
use eventhttp::{HttpServer, Reactor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;

    let mut server = HttpServer::with_config(Reactor::new()?, &cfg.server);
    for listen in &cfg.listen {
        // One failed address does not take the others down.
        if let Err(e) = server.bind(&listen.host, listen.port) {
            error!(host = %listen.host, port = listen.port, error = %e, "bind failed");
        }
    }
    if server.local_addrs().is_empty() {
        bail!("no listener could be bound");
    }

    server.set_callback("/about", |req, reply| {
        info!(uri = %req.uri, "about requested");
        let _ = reply.reply(200, "OK");
    })?;

    let stop = server.stop_handle();
    let mut serving = tokio::task::spawn_blocking(move || server.dispatch());

    tokio::select! {
        res = &mut serving => {
            res??;
        }

        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            stop.stop();
            serving.await??;
        }
    }

    Ok(())
}
