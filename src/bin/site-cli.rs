use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "site-cli")]
#[command(about = "Operator CLI for the site's request-defense layer", long_about = None)]
struct Cli {
    #[arg(short, long, env = "SITE_URL", default_value = "http://localhost:5000")]
    url: String,

    #[arg(short, long, env = "ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Server status and block counts
    Status,
    /// Rate limit monitor snapshot
    Metrics {
        /// Reset the monitor after printing
        #[arg(long)]
        reset: bool,
    },
    /// List permanent and temporary blocks
    Blocked,
    /// Block an address for a duration
    Block {
        ip: String,
        #[arg(short, long, default_value_t = 3600)]
        duration_secs: u64,
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Remove every block for an address
    Unblock { ip: String },
    /// Exempt an address from rate limiting
    Allow { ip: String },
    /// Remove an address from the allowlist
    Disallow { ip: String },
    /// Add an address to the permanent blocklist
    Deny { ip: String },
    /// Recent security events
    Events {
        #[arg(short, long, default_value_t = 50)]
        count: usize,
    },
}

struct AdminClient {
    client: reqwest::Client,
    base: String,
    headers: HeaderMap,
}

impl AdminClient {
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/api/admin{}", self.base.trim_end_matches('/'), path))
            .headers(self.headers.clone())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );
    let admin = AdminClient {
        client: reqwest::Client::new(),
        base: cli.url,
        headers,
    };

    let request = match cli.command {
        Commands::Status => admin.request(Method::GET, "/status"),
        Commands::Metrics { reset } => {
            print_response(admin.request(Method::GET, "/metrics").send().await?).await?;
            if !reset {
                return Ok(());
            }
            admin.request(Method::POST, "/metrics/reset")
        }
        Commands::Blocked => admin.request(Method::GET, "/blocked"),
        Commands::Block {
            ip,
            duration_secs,
            reason,
        } => admin
            .request(Method::POST, "/block")
            .json(&json!({ "ip": ip, "durationSecs": duration_secs, "reason": reason })),
        Commands::Unblock { ip } => admin.request(Method::DELETE, &format!("/block/{ip}")),
        Commands::Allow { ip } => admin
            .request(Method::POST, "/allowlist")
            .json(&json!({ "ip": ip })),
        Commands::Disallow { ip } => admin.request(Method::DELETE, &format!("/allowlist/{ip}")),
        Commands::Deny { ip } => admin
            .request(Method::POST, "/blocklist")
            .json(&json!({ "ip": ip })),
        Commands::Events { count } => admin
            .request(Method::GET, "/events")
            .query(&[("count", count)]),
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
