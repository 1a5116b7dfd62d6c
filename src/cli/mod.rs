mod client;
mod serve;

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use crate::core::config::GatewayConfig;
use crate::core::terminal::{self, GuideSection, print_error};
use crate::logging;

fn print_help() {
    terminal::print_banner();

    GuideSection::new("Gateway")
        .command("serve", "Start the webhook gateway")
        .command("config", "Print the effective configuration")
        .command("keygen", "Generate a new API key")
        .print();

    GuideSection::new("Client")
        .command("status", "Show agent and webhook statistics")
        .command("send", "Post a webhook to a running gateway")
        .command("trigger", "Run an agent on a running gateway")
        .print();

    GuideSection::new("Options")
        .command("--config <path>", "Config file (default ~/.alchemy/gateway.toml)")
        .command("--host / --port", "Override the listen address for serve")
        .command("--api-url <url>", "Gateway address for client commands")
        .command("--key <key>", "API key for client commands (or $ALCHEMY_API_KEY)")
        .print();

    println!(
        "\n {} {} <command> [options]\n",
        style("Usage:").bold(),
        style("alchemy-gateway").green()
    );
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ServeArgs {
    pub config: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

pub(crate) fn parse_serve_args(args: &[String], start: usize) -> Result<ServeArgs> {
    let mut parsed = ServeArgs::default();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--host" => {
                if i + 1 < args.len() {
                    parsed.host = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    i += 1;
                }
            }
            "--port" => {
                if i + 1 < args.len() {
                    let port = args[i + 1]
                        .parse()
                        .map_err(|_| anyhow::anyhow!("invalid port '{}'", args[i + 1]))?;
                    parsed.port = Some(port);
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    Ok(parsed)
}

pub(crate) fn parse_keygen_name(args: &[String], start: usize) -> String {
    let mut name = "n8n_main".to_string();
    let mut i = start;
    while i < args.len() {
        match args[i].as_str() {
            "--name" | "-n" => {
                if i + 1 < args.len() {
                    name = args[i + 1].clone();
                    i += 2;
                } else {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }
    name
}

/// `ak_` followed by 32 hex characters.
pub(crate) fn generate_api_key() -> String {
    format!("ak_{}", hex::encode(rand::random::<[u8; 16]>()))
}

fn load_config(serve: &ServeArgs) -> Result<GatewayConfig> {
    let mut config = GatewayConfig::load(serve.config.as_deref())?;
    if let Some(host) = &serve.host {
        config.server.host = host.clone();
    }
    if let Some(port) = serve.port {
        config.server.port = port;
    }
    config.validate()?;
    Ok(config)
}

pub async fn run_main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let Some(cmd) = args.get(1) else {
        print_help();
        return Ok(());
    };

    match cmd.as_str() {
        "serve" | "start" => {
            let serve_args = parse_serve_args(&args, 2)?;
            let config = load_config(&serve_args)?;
            logging::init(&config.logging);
            terminal::print_banner();
            serve::run_gateway(config).await
        }
        "config" => {
            let serve_args = parse_serve_args(&args, 2)?;
            let config = load_config(&serve_args)?;
            let path = GatewayConfig::resolve_path(serve_args.config.as_deref());
            GuideSection::new("Effective Configuration")
                .status(
                    "Source",
                    &path
                        .filter(|p| p.exists())
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "defaults".to_string()),
                )
                .print();
            println!("\n{}", config.to_toml()?);
            Ok(())
        }
        "keygen" => {
            let name = parse_keygen_name(&args, 2);
            let key = generate_api_key();
            GuideSection::new("New API Key")
                .status("Name", &name)
                .status("Key", &format!("{}", style(&key).bold().green()))
                .blank()
                .info("Add it to your gateway config:")
                .text(&format!("[security.api_keys]\n  {} = \"{}\"", name, key))
                .blank()
                .info("Then use it in N8N as an 'Authorization: Bearer <key>' header.")
                .print();
            println!();
            Ok(())
        }
        "status" => client::run_status(&client::parse_client_args(&args, 2)).await,
        "send" => client::run_send(&client::parse_client_args(&args, 2)).await,
        "trigger" => client::run_trigger(&client::parse_client_args(&args, 2)).await,
        "help" | "--help" | "-h" => {
            print_help();
            Ok(())
        }
        _ => {
            print_error(&format!("Unknown command: {}", cmd));
            print_help();
            Ok(())
        }
    }
}
