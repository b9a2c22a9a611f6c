//! Command-line argument parsing

use std::path::PathBuf;

use clap::Parser;

/// Get default config path help text for current platform
fn default_config_help() -> String {
    #[cfg(target_os = "linux")]
    return "Config file path (default: ~/.config/parley/config.json)".to_string();

    #[cfg(target_os = "macos")]
    return "Config file path (default: ~/Library/Application Support/parley/config.json)"
        .to_string();

    #[cfg(target_os = "windows")]
    return "Config file path (default: %APPDATA%\\parley\\config.json)".to_string();

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    return "Config file path (overrides platform default)".to_string();
}

/// Parley voice channel client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Voice channel to join
    #[arg(short, long, required_unless_present = "list_devices")]
    pub channel: Option<String>,

    /// Signaling server WebSocket URL (overrides config)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Participant id to join as (overrides config)
    #[arg(short, long)]
    pub participant: Option<String>,

    /// Microphone to capture from (empty = system default)
    #[arg(long)]
    pub input_device: Option<String>,

    /// Playback device (empty = system default)
    #[arg(long)]
    pub output_device: Option<String>,

    /// Config file path (overrides platform default)
    #[arg(long, help = default_config_help())]
    pub config: Option<PathBuf>,

    /// List audio devices and exit
    #[arg(long, default_value = "false")]
    pub list_devices: bool,

    /// Log filter such as `debug` or `parley_client=trace` (overrides RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,
}
