//! # Embedded Signup CLI
//!
//! Operator tool for checking a signup deployment: fetch the provider config the
//! popup would be launched with, replay a code exchange against the backend, or
//! check how the session listener would treat a popup message.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use embedded_signup::{
    ExchangeError, ExchangeRequest, HttpSignupBackend, InboundMessage, ListenerSignal, LoginRequest,
    SdkInitParams, SessionCaptureListener, SessionPayload, SignupBackend, SignupSettings,
};

#[derive(Parser)]
#[command(name = "signup-cli")]
#[command(about = "Embedded Signup connection tooling")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to <config dir>/embedded-signup/settings.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Override the admin backend base URL
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the provider config and print the SDK init and login parameters
    Config,

    /// Exchange an authorization code for a provisioned connection
    Complete {
        /// Authorization code returned by the provider popup
        #[arg(long)]
        code: String,

        /// Entity the connection is provisioned for
        #[arg(long)]
        entity_id: String,

        /// Session info captured from the popup, as a JSON object
        #[arg(long)]
        session_info: Option<String>,
    },

    /// Show how the session listener classifies a popup message
    Classify {
        /// Origin the message was posted from
        #[arg(long)]
        origin: String,

        /// Raw message data
        #[arg(long)]
        data: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let path = cli.settings.or_else(SignupSettings::default_path);
    let mut settings = SignupSettings::resolve(path.as_deref())?;
    if let Some(url) = cli.backend_url {
        settings.backend_url = url;
        settings.validate()?;
    }

    match cli.command {
        Commands::Config => execute_config_command(&settings).await,
        Commands::Complete {
            code,
            entity_id,
            session_info,
        } => execute_complete_command(&settings, code, entity_id, session_info).await,
        Commands::Classify { origin, data } => execute_classify_command(&settings, origin, data),
    }
}

async fn execute_config_command(settings: &SignupSettings) -> Result<(), Box<dyn std::error::Error>> {
    let backend = HttpSignupBackend::new(settings)?;
    let config = backend.fetch_config().await?;

    let output = serde_json::json!({
        "init": SdkInitParams::new(&config, &settings.sdk_version),
        "login": LoginRequest::new(&config, settings),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn execute_complete_command(
    settings: &SignupSettings,
    code: String,
    entity_id: String,
    session_info: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session_info = match session_info {
        Some(raw) => Some(serde_json::from_str::<SessionPayload>(&raw)?),
        None => None,
    };

    let backend = HttpSignupBackend::new(settings)?;
    let request = ExchangeRequest {
        code,
        entity_id,
        session_info,
    };

    match backend.complete_signup(&request).await {
        Ok(result) => {
            println!("✓ Connection provisioned");
            if let Some(data) = result.data {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
            Ok(())
        }
        Err(err) => {
            tracing::debug!("Exchange failed: {}", err);
            Err(Box::new(ExchangeError::from(&err)))
        }
    }
}

fn execute_classify_command(
    settings: &SignupSettings,
    origin: String,
    data: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = SessionCaptureListener::from_settings(settings);

    match listener.classify(&InboundMessage::new(origin, data)) {
        Some(ListenerSignal::SessionInfo(payload)) => {
            println!("session_info");
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Some(ListenerSignal::Cancel) => println!("cancel"),
        None => println!("ignored"),
    }
    Ok(())
}
