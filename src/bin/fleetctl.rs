use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(about = "Operator CLI for the elastic pool admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8081", env = "FLEETCTL_URL")]
    url: String,

    #[arg(short, long, env = "FLEETCTL_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pool capacity, member counts and fleet health
    Status,
    /// List members with state and health
    Members,
    /// Alarm streaks and last samples
    Alarms,
    /// Scaling policies and cooldowns
    Policies,
    /// Request a desired capacity (clamped to bounds)
    SetCapacity { desired: u32 },
    /// Return a draining member to service
    CancelDrain { id: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let request = match &cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Members => client.get(format!("{}/admin/members", cli.url)),
        Commands::Alarms => client.get(format!("{}/admin/alarms", cli.url)),
        Commands::Policies => client.get(format!("{}/admin/policies", cli.url)),
        Commands::SetCapacity { desired } => client
            .put(format!("{}/admin/capacity", cli.url))
            .json(&json!({ "desired": desired })),
        Commands::CancelDrain { id } => client.post(format!("{}/admin/members/{}/cancel-drain", cli.url, id)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
