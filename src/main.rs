mod bulb;
mod capture;
mod color;
mod config;
mod decode;
mod error;
mod reduce;
mod sample_loop;
mod smoothing;

use clap::Parser;
use std::process::ExitCode;
use tokio::sync::watch;

use crate::bulb::BulbClient;
use crate::capture::GrimFrameSource;
use crate::config::{Config, Settings};
use crate::decode::ImageFrameDecoder;
use crate::error::AppError;
use crate::reduce::ColorReducer;
use crate::sample_loop::SampleLoop;
use crate::smoothing::Smoother;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::parse();

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_fatal() => {
            tracing::error!("{}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> Result<(), AppError> {
    let settings = config.validate()?;
    let sample_loop = build_loop(&settings).await?;

    tracing::info!(
        "Sampling every {:?} (alpha {}, capturing {})",
        settings.interval,
        settings.alpha,
        settings
            .window_class
            .as_deref()
            .map(|class| format!("window {:?}", class))
            .unwrap_or_else(|| "whole screen".to_string())
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Stopping ambilight");
                let _ = stop_tx.send(true);
            }
            Err(e) => {
                // keep the sender alive so the loop is not stopped by accident
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        }
    });

    sample_loop.run(stop_rx).await;
    Ok(())
}

async fn build_loop(settings: &Settings) -> Result<SampleLoop, AppError> {
    let source = GrimFrameSource::new(
        settings.grim_path.clone(),
        settings.window_class.clone(),
        settings.capture_timeout,
    );
    let client = BulbClient::connect(settings.target, settings.send_timeout).await?;
    tracing::info!("Target bulb: {}", client.target());

    Ok(SampleLoop::new(
        Box::new(source),
        Box::new(ImageFrameDecoder),
        ColorReducer::new(settings.shaping),
        Smoother::new(settings.alpha),
        Box::new(client),
        settings.interval,
    ))
}
