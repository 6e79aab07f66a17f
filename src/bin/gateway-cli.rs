use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;

use zt_gateway::auth::{IdentityClaims, IdentityVerifier};

#[derive(Parser)]
#[command(name = "zt-gateway-cli")]
#[command(about = "Helper CLI for the zero-trust edge gateway", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mint a signed HS256 identity token
    Token {
        #[arg(long, env = "ZT_GATEWAY_JWT_SECRET")]
        secret: String,

        #[arg(long)]
        sub: String,

        #[arg(long)]
        email: String,

        #[arg(long, default_value = "user")]
        role: String,

        #[arg(long)]
        tenant: Option<String>,

        /// Comma-separated scopes
        #[arg(long, value_delimiter = ',')]
        scopes: Vec<String>,

        #[arg(long)]
        issuer: Option<String>,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: i64,
    },
    /// Query a running gateway's readiness endpoint
    Health {
        #[arg(short, long, default_value = "http://localhost:3001")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Token {
            secret,
            sub,
            email,
            role,
            tenant,
            scopes,
            issuer,
            ttl,
        } => {
            let iat = Utc::now().timestamp();
            let claims = IdentityClaims {
                sub,
                email,
                role,
                tenant,
                scopes: if scopes.is_empty() { None } else { Some(scopes) },
                iat,
                exp: iat + ttl,
                iss: issuer,
            };
            let token = IdentityVerifier::from_secret(&secret).issue(&claims)?;
            println!("{token}");
        }
        Commands::Health { url } => {
            let client = reqwest::Client::new();
            let res = client
                .get(format!("{}/health/ready", url.trim_end_matches('/')))
                .send()
                .await?;
            print_response(res).await?;
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
