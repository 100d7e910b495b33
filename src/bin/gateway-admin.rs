use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Map, Value};

#[derive(Parser)]
#[command(name = "gateway-admin")]
#[command(about = "Management CLI for the upgrade gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// Connection statistics
    Stats,
    /// List every managed connection
    List,
    /// Show one connection
    Show { id: String },
    /// Close connections matching a filter
    Close {
        /// Require this tag (repeatable)
        #[arg(long = "tag")]
        tags: Vec<String>,
        #[arg(long)]
        remote_key: Option<String>,
        #[arg(long)]
        pool: Option<String>,
        #[arg(long)]
        min_age_ms: Option<u64>,
        #[arg(long)]
        min_idle_ms: Option<u64>,
        #[arg(long, default_value_t = 1000)]
        code: u16,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Run a health check cycle now
    Health,
    /// Tag a connection
    Tag { id: String, tag: String },
    /// Remove a tag from a connection
    Untag { id: String, tag: String },
    /// Set a metadata value (parsed as JSON, falling back to a string)
    SetMeta { id: String, key: String, value: String },
    /// Gracefully shut the gateway down
    Shutdown {
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        code: Option<u16>,
        #[arg(long)]
        reason: Option<String>,
    },
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

    let base = cli.url.trim_end_matches('/');
    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", base)),
        Commands::Stats => client.get(format!("{}/admin/connections", base)),
        Commands::List => client.get(format!("{}/admin/connections/list", base)),
        Commands::Show { id } => client.get(format!("{}/admin/connections/{}", base, id)),
        Commands::Close {
            tags,
            remote_key,
            pool,
            min_age_ms,
            min_idle_ms,
            code,
            reason,
        } => client
            .post(format!("{}/admin/connections/close", base))
            .json(&json!({
                "filter": {
                    "tags": tags,
                    "remote_key": remote_key,
                    "pool": pool,
                    "min_age_ms": min_age_ms,
                    "min_idle_ms": min_idle_ms,
                },
                "code": code,
                "reason": reason,
            })),
        Commands::Health => client.post(format!("{}/admin/health", base)),
        Commands::Tag { id, tag } => {
            client.put(format!("{}/admin/connections/{}/tags/{}", base, id, tag))
        }
        Commands::Untag { id, tag } => {
            client.delete(format!("{}/admin/connections/{}/tags/{}", base, id, tag))
        }
        Commands::SetMeta { id, key, value } => {
            let value: Value = serde_json::from_str(&value).unwrap_or(Value::String(value));
            client
                .put(format!("{}/admin/connections/{}/metadata/{}", base, id, key))
                .json(&value)
        }
        Commands::Shutdown {
            timeout_ms,
            code,
            reason,
        } => {
            let mut body = Map::new();
            if let Some(timeout_ms) = timeout_ms {
                body.insert("timeout_ms".into(), json!(timeout_ms));
            }
            if let Some(code) = code {
                body.insert("close_code".into(), json!(code));
            }
            if let Some(reason) = reason {
                body.insert("close_reason".into(), json!(reason));
            }
            client
                .post(format!("{}/admin/shutdown", base))
                .json(&Value::Object(body))
        }
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
        return Ok(());
    }

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("ok");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
