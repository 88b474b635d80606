use clap::{Parser, Subcommand};
use postbox::message::Message;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "postbox")]
#[command(about = "Postbox CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: POSTBOX_CONFIG_PATH or ~/.postbox/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the server (dashboard, message API and the reply workflow).
    Serve {
        /// Config file path (default: POSTBOX_CONFIG_PATH or ~/.postbox/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 3000)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Submit a message to a running server.
    Post {
        /// Config file path (default: POSTBOX_CONFIG_PATH or ~/.postbox/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Server base URL (default: http://<server.bind>:<server.port> from config)
        #[arg(long, value_name = "URL")]
        server: Option<String>,

        /// User id sent in the identity header (default: auth.devUserId from config)
        #[arg(long, short, value_name = "ID")]
        user: Option<String>,

        /// Message text
        text: String,
    },

    /// Print the latest message from a running server.
    Latest {
        /// Config file path (default: POSTBOX_CONFIG_PATH or ~/.postbox/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Server base URL (default: http://<server.bind>:<server.port> from config)
        #[arg(long, value_name = "URL")]
        server: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("postbox {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                exit_with_error("init", &e);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                exit_with_error("server", &e);
            }
        }
        Some(Commands::Post {
            config,
            server,
            user,
            text,
        }) => {
            if let Err(e) = run_post(config, server, user, text).await {
                exit_with_error("post", &e);
            }
        }
        Some(Commands::Latest { config, server }) => {
            if let Err(e) = run_latest(config, server).await {
                exit_with_error("latest", &e);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn failure_message(command: &str, e: &anyhow::Error) -> String {
    format!("{} failed: {:#}", command, e)
}

/// Log the failure with its context chain and exit with status 1.
fn exit_with_error(command: &str, e: &anyhow::Error) -> ! {
    log::error!("{}", failure_message(command, e));
    std::process::exit(1);
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(postbox::config::default_config_path);
    let dir = postbox::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = postbox::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!("starting server on {}:{}", config.server.bind, config.server.port);
    postbox::web::run_server(config, path).await
}

/// Base URL for a server started from this config; wildcard binds are reached via loopback.
fn server_url(config: &postbox::config::Config, server: Option<String>) -> String {
    if let Some(s) = server {
        return s.trim_end_matches('/').to_string();
    }
    let bind = match config.server.bind.trim() {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "[::1]",
        b => b,
    };
    format!("http://{}:{}", bind, config.server.port)
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct LatestBody {
    message: Option<Message>,
}

async fn error_from(resp: reqwest::Response) -> anyhow::Error {
    let status = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(body) => anyhow::anyhow!("{} ({})", body.error, status),
        Err(_) => anyhow::anyhow!("server returned {}", status),
    }
}

async fn run_post(
    config_path: Option<std::path::PathBuf>,
    server: Option<String>,
    user: Option<String>,
    text: String,
) -> anyhow::Result<()> {
    let (config, _) = postbox::config::load_config(config_path)?;
    let base = server_url(&config, server);
    let user = user.or_else(|| config.auth.dev_user_id.clone());

    let mut req = reqwest::Client::new()
        .post(format!("{}/api/messages", base))
        .json(&serde_json::json!({ "text": text }));
    if let Some(u) = user {
        req = req.header(config.auth.user_header.as_str(), u);
    }
    let resp = req.send().await?;
    if !resp.status().is_success() {
        return Err(error_from(resp).await);
    }
    let message: Message = resp.json().await?;
    println!("{} {}", message.id, message.created_at.to_rfc3339());
    Ok(())
}

async fn run_latest(
    config_path: Option<std::path::PathBuf>,
    server: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = postbox::config::load_config(config_path)?;
    let base = server_url(&config, server);
    let resp = reqwest::get(format!("{}/api/messages/latest", base)).await?;
    if !resp.status().is_success() {
        return Err(error_from(resp).await);
    }
    let body: LatestBody = resp.json().await?;
    match body.message {
        Some(m) => println!("{}: {}", m.author, m.text),
        None => println!("No messages yet."),
    }
    Ok(())
}
