use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ingress-cli")]
#[command(about = "Operator CLI for the render ingress gateway", long_about = None)]
struct Cli {
    #[arg(short, long, env = "INGRESS_ADMIN_URL", default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, env = "INGRESS_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version, uptime and readiness
    Status,
    /// Circuit breaker state per route
    Breakers,
    /// Job queue backlog monitor
    Backlog,
    /// Telemetry retry spool counters
    Spool,
}

impl Commands {
    fn path(&self) -> &'static str {
        match self {
            Commands::Status => "/admin/status",
            Commands::Breakers => "/admin/breakers",
            Commands::Backlog => "/admin/backlog",
            Commands::Spool => "/admin/spool",
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let url = format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path());
    let res = client.get(url).headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(ExitCode::FAILURE);
    }

    let envelope: Value = res.json().await?;
    let body = envelope.get("data").unwrap_or(&envelope);
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(ExitCode::SUCCESS)
}
