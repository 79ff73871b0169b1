use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::codec::encode_data_url;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall face enrollment and recognition CLI")]
struct Cli {
    /// Base URL of the rollcalld server
    #[arg(long, global = true, default_value = "http://127.0.0.1:5006")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the face(s) in an image under a person id
    Enroll {
        /// Person id (USN) to enroll under
        #[arg(short, long)]
        usn: String,
        /// Image file containing the face
        image: PathBuf,
    },
    /// Identify the faces in an image
    Recognize {
        /// Image file to identify
        image: PathBuf,
    },
    /// Mirror the remote bucket into the server's gallery
    Sync,
    /// Check that the server is up
    Health,
}

/// Read an image file and wrap it as a data URL with its sniffed MIME type.
fn image_data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let format = image::guess_format(&bytes)
        .with_context(|| format!("{} is not a recognized image", path.display()))?;
    Ok(encode_data_url(format.to_mime_type(), &bytes))
}

async fn send(req: reqwest::RequestBuilder) -> Result<Value> {
    let resp = req.send().await.context("request failed")?;
    let status = resp.status();
    let text = resp.text().await.context("failed to read response")?;
    let body: Value = serde_json::from_str(&text).unwrap_or(Value::String(text));
    tracing::debug!(%status, "server responded");

    if !status.is_success() {
        bail!("server returned {status}: {body}");
    }
    Ok(body)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base = cli.server.trim_end_matches('/');
    let client = reqwest::Client::new();

    let body = match cli.command {
        Commands::Enroll { usn, image } => {
            let payload = json!({ "usn": usn, "image": image_data_url(&image)? });
            send(client.post(format!("{base}/enroll")).json(&payload)).await?
        }
        Commands::Recognize { image } => {
            let payload = json!({ "image": image_data_url(&image)? });
            send(client.post(format!("{base}/recognize")).json(&payload)).await?
        }
        Commands::Sync => send(client.post(format!("{base}/sync"))).await?,
        Commands::Health => send(client.get(format!("{base}/health"))).await?,
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
