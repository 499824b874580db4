use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use callguard_core::{
    config::Config,
    envelope::CallEnvelope,
    model::{ChatMessage, ChatRequest},
    storage::{StorageAdapter, UploadOptions, UrlOptions},
    telemetry::TracingSink,
    textgen::{OpenAiClient, TextGenAdapter},
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "callguard CLI: storage and text-generation calls with monitoring", long_about = None)]
struct Cli {
    /// JSON or TOML config file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file to the configured storage provider
    Upload {
        file: PathBuf,
        #[arg(long, default_value = "")]
        folder: String,
        /// Stored name; defaults to the local file name
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        public: bool,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Delete a stored file
    Delete { path: String },
    /// Print an access URL for a stored file
    Url {
        path: String,
        #[arg(long)]
        public: bool,
        /// Signed URL lifetime in seconds
        #[arg(long)]
        expires: Option<u64>,
    },
    /// Write a stored file's bytes to stdout
    Cat { path: String },
    /// Send a chat completion request
    Chat {
        #[arg(long)]
        model: Option<String>,
        #[arg(short, long, help = "Message from the user")]
        message: String,
        #[arg(long)]
        user: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref())?;
    let envelope = Arc::new(CallEnvelope::from_config(&cfg, Arc::new(TracingSink)));

    match cli.command {
        Commands::Upload {
            file,
            folder,
            name,
            public,
            content_type,
        } => {
            let name = match name {
                Some(n) => n,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or_else(|| anyhow::anyhow!("{} has no file name", file.display()))?,
            };
            let data = tokio::fs::read(&file).await?;
            let storage = StorageAdapter::from_config(&cfg, envelope);
            let options = UploadOptions {
                public,
                content_type,
                ..UploadOptions::default()
            };
            let stored = storage.upload_file(data, &name, &folder, &options).await?;
            println!("{} {} bytes -> {}", stored.provider, stored.size, stored.path);
            println!("{}", stored.url);
        }
        Commands::Delete { path } => {
            let storage = StorageAdapter::from_config(&cfg, envelope);
            if !storage.delete_file(&path).await {
                anyhow::bail!("could not delete {path}");
            }
            println!("deleted {path}");
        }
        Commands::Url {
            path,
            public,
            expires,
        } => {
            let storage = StorageAdapter::from_config(&cfg, envelope);
            let options = UrlOptions {
                public,
                expires_in: expires.map(Duration::from_secs),
            };
            println!("{}", storage.get_file_url(&path, &options).await?);
        }
        Commands::Cat { path } => {
            let storage = StorageAdapter::from_config(&cfg, envelope);
            let data = storage.get_file_content(&path).await?;
            let mut out = std::io::stdout().lock();
            out.write_all(&data)?;
            out.flush()?;
        }
        Commands::Chat {
            model,
            message,
            user,
        } => {
            let client = OpenAiClient::from_config(&cfg)?;
            let textgen = TextGenAdapter::from_config(&cfg, envelope);
            let model = model.unwrap_or_else(|| textgen.pricing().default_model().to_string());
            let req = ChatRequest::new(model, vec![ChatMessage::user(message)]);
            let resp = textgen.complete(&client, &req, user.as_deref()).await?;
            println!("{} -> {}", resp.model, resp.text().unwrap_or_default());
            if let Some(usage) = resp.usage {
                let cost = textgen
                    .pricing()
                    .cost(Some(resp.model.as_str()), Some(usage.prompt_tokens), Some(usage.completion_tokens));
                tracing::info!(
                    tokens.total = usage.total_tokens,
                    cost.usd = %format!("{cost:.6}"),
                    "chat usage"
                );
            }
        }
    }

    Ok(())
}
