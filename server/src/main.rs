use clap::Parser;
use log::info;
use server::config::DEFAULT_ALLOWED_ORIGINS;
use server::{OriginPolicy, Server, ServerConfig};
use shared::{Color, DEFAULT_BACKGROUND, DEFAULT_GRID_HEIGHT, DEFAULT_GRID_WIDTH};
use std::future::Future;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    port: u16,

    /// Canvas width in cells
    #[arg(long, default_value_t = DEFAULT_GRID_WIDTH)]
    width: usize,

    /// Canvas height in cells
    #[arg(long, default_value_t = DEFAULT_GRID_HEIGHT)]
    height: usize,

    /// Initial color of every cell
    #[arg(long, default_value = DEFAULT_BACKGROUND)]
    background: String,

    /// Participant colors, comma separated (defaults to the built-in palette)
    #[arg(long, value_delimiter = ',')]
    palette: Vec<String>,

    /// Only accept handshakes from allowed origins
    #[arg(long, env = "RESTRICT_ORIGINS")]
    restrict_origins: bool,

    /// Extra allowed origin, repeatable
    #[arg(long = "allow-origin")]
    allow_origins: Vec<String>,

    /// Frontend origin added to the allow-list
    #[arg(long, env = "FRONTEND_URL")]
    frontend_url: Option<String>,

    /// Frames buffered per connection before it is dropped as too slow
    /// (defaults to one canvas worth of changes plus headroom)
    #[arg(long)]
    outbound_buffer: Option<usize>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();

        let palette = if self.palette.is_empty() {
            defaults.palette
        } else {
            self.palette.into_iter().map(Color::from).collect()
        };

        let origin_policy = if self.restrict_origins {
            let mut origins: Vec<String> = DEFAULT_ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.to_string())
                .collect();
            origins.extend(self.frontend_url);
            origins.extend(self.allow_origins);
            OriginPolicy::AllowList(origins)
        } else {
            OriginPolicy::AllowAny
        };

        ServerConfig {
            bind_addr: format!("{}:{}", self.host, self.port),
            grid_width: self.width,
            grid_height: self.height,
            background: Color::from(self.background),
            palette,
            outbound_capacity: self.outbound_buffer,
            origin_policy,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = Args::parse().into_config();
    let server = Server::bind(config).await?;

    serve(server, async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    })
    .await
}

/// Runs the server until `stop` resolves, then shuts it down through its
/// handle so every connection is closed before returning.
async fn serve(
    server: Server,
    stop: impl Future<Output = ()>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = server.handle();
    let mut running = tokio::spawn(server.run());

    tokio::select! {
        result = &mut running => return Ok(result?),
        _ = stop => {}
    }

    if handle.shutdown().await.is_ok() {
        running.await?;
    }
    Ok(())
}
