mod button;
mod controller;

use button::{ButtonDriver, MockButton};
#[cfg(target_os = "linux")]
use button::GpioButton;
use clap::Parser;
use controller::Controller;
use museum_core::config::RoomConfig;
use museum_core::{log_critical, log_info};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(version, about = "Room-level museum show controller")]
struct Cli {
    /// Path to the room's TOML configuration file.
    #[arg(short, long, value_name = "FILE", default_value = "config/room.toml")]
    config: String,

    /// Force the mock button driver even on Linux.
    #[arg(long, default_value_t = false)]
    mock_button: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    museum_core::init_standalone();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_critical!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RoomConfig::load(&cli.config)?;
    log_info!("Room '{}' configuration loaded from {}", config.room.id, cli.config);

    let button = select_button(&config, cli.mock_button);
    let controller = Controller::start(config, button).await?;

    let health_handle = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.run_health_loop().await })
    };

    wait_for_shutdown_signal().await;
    log_info!("Signal received, shutting down...");
    controller.request_shutdown();
    controller.scene_runner().stop_scene();
    let _ = health_handle.await;

    log_info!("Controller stopped cleanly");
    Ok(())
}

#[cfg(target_os = "linux")]
fn select_button(config: &RoomConfig, force_mock: bool) -> Box<dyn ButtonDriver> {
    if force_mock {
        return Box::new(MockButton::new());
    }
    match GpioButton::new(config.gpio.button_pin, config.gpio.debounce_ms) {
        Ok(button) => Box::new(button),
        Err(e) => {
            museum_core::log_warn!("GPIO button unavailable, using mock: {e}");
            Box::new(MockButton::new())
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn select_button(_config: &RoomConfig, _force_mock: bool) -> Box<dyn ButtonDriver> {
    Box::new(MockButton::new())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
