use clap::Parser;
use client::network::{Client, SyncEvent};
use log::{debug, info};
use rand::Rng;
use shared::Color;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Display name to use after joining
    #[arg(short = 'n', long)]
    name: Option<String>,

    /// Number of random pixels to paint
    #[arg(long, default_value = "20")]
    strokes: usize,

    /// Paint color (defaults to the color the server assigns)
    #[arg(short = 'c', long)]
    color: Option<String>,

    /// Pause between strokes in milliseconds
    #[arg(short = 'i', long, default_value = "100")]
    interval_ms: u64,

    /// Bucket fill starting at X,Y before painting
    #[arg(long, value_parser = parse_point)]
    fill: Option<(i64, i64)>,
}

fn parse_point(value: &str) -> Result<(i64, i64), String> {
    let (x, y) = value
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got {:?}", value))?;
    let x = x.trim().parse().map_err(|e| format!("bad X: {}", e))?;
    let y = y.trim().parse().map_err(|e| format!("bad Y: {}", e))?;
    Ok((x, y))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let mut client = Client::connect(&args.server).await?;
    client.wait_until_synced().await?;

    let mirror = client.mirror();
    let width = mirror.canvas().width() as i64;
    let height = mirror.canvas().height() as i64;
    let color = match (&args.color, mirror.user_color()) {
        (Some(color), _) => Color::from(color.as_str()),
        (None, Some(assigned)) => assigned.clone(),
        (None, None) => Color::from("#000000"),
    };
    info!(
        "Joined as {} on a {}x{} canvas, painting with {}",
        mirror.user_id().unwrap_or("?"),
        width,
        height,
        color
    );

    if let Some(name) = &args.name {
        client.change_name(name).await?;
    }

    if let Some((x, y)) = args.fill {
        let cells = client.fill(x, y, color.clone()).await?;
        info!("Filled {} cells from ({}, {})", cells, x, y);
    }

    if width > 0 && height > 0 {
        let mut rng = rand::thread_rng();
        for _ in 0..args.strokes {
            let x = rng.gen_range(0..width);
            let y = rng.gen_range(0..height);
            client.paint(x, y, color.clone()).await?;
            client.move_cursor(x as f32 + 0.5, y as f32 + 0.5).await?;
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
        info!("Painted {} pixels", args.strokes);
    }

    loop {
        tokio::select! {
            event = client.next_event() => {
                match event? {
                    SyncEvent::RosterUpdated(users) => {
                        info!("{} participants online", users.len());
                    }
                    SyncEvent::UserLeft { user_id } => info!("{} left", user_id),
                    other => debug!("{:?}", other),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}
