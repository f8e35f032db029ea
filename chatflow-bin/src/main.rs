use std::io::{self, Write};
use std::path::Path;

use chatflow_core::{
    client::ChatClient,
    config::{FileConfig, RequestConfig, SecretString},
    model::{ChatMessage, Role},
    service::{ChatService, NullService},
    stream::StreamEvent,
};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const API_KEY_VAR: &str = "CHATFLOW_API_KEY";

#[derive(Parser)]
#[command(author, version, about = "chatflow CLI smoke tool", long_about = None)]
struct Cli {
    /// Config file (JSON or TOML). When set, endpoint/model flags are
    /// ignored in favor of the file.
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a chat completion request
    Chat {
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Stream a chat completion (prints deltas live)
    ChatStream {
        #[arg(long, default_value = DEFAULT_ENDPOINT)]
        endpoint: String,
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chat {
            endpoint,
            model,
            message,
        } => {
            let config = build_config(cli.config.as_deref(), endpoint, model, false)?;
            let service = pick_service(&config)?;
            let messages = vec![ChatMessage::new(Role::User, message)];
            let resp = service.complete(messages, &config).await?;
            println!("{}", resp.content);
            if let Some(usage) = resp.usage {
                eprintln!(
                    "[tokens: {} prompt / {} completion]",
                    usage.prompt_tokens, usage.completion_tokens
                );
            }
        }
        Commands::ChatStream {
            endpoint,
            model,
            message,
        } => {
            let config = build_config(cli.config.as_deref(), endpoint, model, true)?;
            let service = pick_service(&config)?;
            let messages = vec![ChatMessage::new(Role::User, message)];
            let mut session = service.start_session(messages, config)?;

            let mut saw_delta = false;
            while let Some(ev) = session.next().await {
                match ev {
                    StreamEvent::Delta(txt) => {
                        saw_delta = true;
                        print!("{}", txt);
                        io::stdout().flush().ok();
                    }
                    StreamEvent::Usage { .. } => {}
                    StreamEvent::Completed(resp) => {
                        if saw_delta {
                            println!();
                        } else {
                            // Nothing streamed (e.g. empty response); show
                            // whatever the aggregate holds.
                            println!("{}", resp.content);
                        }
                        eprintln!("[stop: {:?}]", resp.stop_reason);
                    }
                    StreamEvent::Failed(err) => {
                        eprintln!("[error: {}]", err);
                        std::process::exit(1);
                    }
                    StreamEvent::Cancelled => {
                        eprintln!("[cancelled]");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

fn build_config(
    path: Option<&Path>,
    endpoint: String,
    model: String,
    stream: bool,
) -> anyhow::Result<RequestConfig> {
    if let Some(p) = path {
        let file = FileConfig::from_path(p)?;
        let mut config = file.request_config()?;
        config.stream = stream;
        return Ok(config);
    }
    let mut config = RequestConfig::new(endpoint, model);
    config.stream = stream;
    if let Ok(key) = std::env::var(API_KEY_VAR) {
        config = config.with_credential(SecretString::from(key));
    }
    Ok(config)
}

fn pick_service(config: &RequestConfig) -> anyhow::Result<Box<dyn ChatService>> {
    if config.credential.is_some() {
        Ok(Box::new(ChatClient::new_default()?))
    } else {
        eprintln!("[no {API_KEY_VAR} set; using the offline null service]");
        Ok(Box::new(NullService))
    }
}
