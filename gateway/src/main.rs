use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub mod console;

use console::ConsoleEventHandler;
use event_bridge::{
    BridgeConfig, ConnectionError, ConnectionIdentity, LongPollingTransport, SubscriptionDescriptor,
    SubscriptionSession, Transport, WebSocketTransport,
};
use session_client::{SessionClient, SessionError};

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// OpenAccess Event Gateway
///
/// Logs in to the OpenAccess service, subscribes to business events through
/// the web event bridge and prints them until ENTER or Ctrl+C is pressed.
#[derive(Parser, Debug)]
#[command(name = "openaccess-gateway")]
#[command(about = "Print OpenAccess business events received through the web event bridge")]
#[command(version)]
pub struct Args {
    /// OpenAccess service URL, ending with '/'
    #[arg(long)]
    pub service_url: Option<String>,

    /// Application id sent with every request
    #[arg(long)]
    pub application_id: Option<String>,

    /// User name to log in with
    #[arg(short, long)]
    pub username: Option<String>,

    /// Password to log in with
    #[arg(short, long)]
    pub password: Option<String>,

    /// Authentication directory of the user
    #[arg(long, default_value = session_client::INTERNAL_DIRECTORY_ID)]
    pub directory_id: String,

    /// Server-side filter expression for the subscription
    #[arg(short, long, default_value = "business_event_class eq 'hardware_event'")]
    pub filter: String,

    /// Description attached to the subscription
    #[arg(long, default_value = "Rust event gateway")]
    pub description: String,

    /// Ask the bridge to keep the subscription across disconnects
    #[arg(long)]
    pub durable: bool,

    /// Seconds to wait for the bridge to answer an invocation
    #[arg(long, default_value = "30")]
    pub invoke_timeout: u64,

    /// Reach the bridge with HTTP long polling instead of a WebSocket
    #[arg(long)]
    pub long_polling: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Args {
    /// Apply environment overrides using `lookup` to read variables
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OPENACCESS_URL") {
            self.service_url = Some(url);
        }

        if let Some(application_id) = lookup("OPENACCESS_APPLICATION_ID") {
            self.application_id = Some(application_id);
        }

        if let Some(username) = lookup("OPENACCESS_USERNAME") {
            self.username = Some(username);
        }

        if let Some(password) = lookup("OPENACCESS_PASSWORD") {
            self.password = Some(password);
        }

        if let Some(log_level) = lookup("OPENACCESS_LOG_LEVEL") {
            self.log_level = log_level;
        }
    }

    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("service URL", "--service-url", "OPENACCESS_URL", &self.service_url),
            (
                "application id",
                "--application-id",
                "OPENACCESS_APPLICATION_ID",
                &self.application_id,
            ),
            ("username", "--username", "OPENACCESS_USERNAME", &self.username),
            ("password", "--password", "OPENACCESS_PASSWORD", &self.password),
        ];

        for (name, flag, var, value) in required {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(anyhow::anyhow!(
                    "Missing {}: pass {} or set {}",
                    name,
                    flag,
                    var
                ));
            }
        }

        if let Some(url) = &self.service_url {
            if !url.ends_with('/') {
                return Err(anyhow::anyhow!(
                    "Service URL '{}' must end with '/'",
                    url
                ));
            }
        }

        if self.invoke_timeout == 0 {
            return Err(anyhow::anyhow!("Invoke timeout must be positive"));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}'. Valid levels: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }

        Ok(())
    }
}

/// Configuration derived from command line arguments and environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub service_url: String,
    pub application_id: String,
    pub username: String,
    pub password: String,
    pub directory_id: String,
    pub filter: String,
    pub description: String,
    pub durable: bool,
    pub invoke_timeout: Duration,
    pub long_polling: bool,
    pub log_level: String,
}

impl Config {
    /// Create configuration from command line arguments and environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_sources(Args::parse(), |name| std::env::var(name).ok())
    }

    pub fn from_sources(mut args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        args.apply_env(lookup);
        args.validate()?;

        Ok(Self {
            service_url: args.service_url.unwrap_or_default(),
            application_id: args.application_id.unwrap_or_default(),
            username: args.username.unwrap_or_default(),
            password: args.password.unwrap_or_default(),
            directory_id: args.directory_id,
            filter: args.filter,
            description: args.description,
            durable: args.durable,
            invoke_timeout: Duration::from_secs(args.invoke_timeout),
            long_polling: args.long_polling,
            log_level: args.log_level.to_lowercase(),
        })
    }

    /// URL of the web event bridge under the service URL
    pub fn bridge_url(&self) -> String {
        format!("{}eventbridge/", self.service_url)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig::default().with_invoke_timeout(self.invoke_timeout)
    }

    /// Transport selected by `--long-polling`
    pub fn bridge_transport(&self) -> Result<Arc<dyn Transport>, ConnectionError> {
        let bridge_url = self.bridge_url();
        let transport: Arc<dyn Transport> = if self.long_polling {
            Arc::new(LongPollingTransport::new(&bridge_url, self.bridge_config())?)
        } else {
            Arc::new(WebSocketTransport::new(&bridge_url, self.bridge_config())?)
        };
        Ok(transport)
    }

    /// Log configuration summary
    pub fn print_summary(&self) {
        info!("Configuration:");
        info!("  Service URL: {}", self.service_url);
        info!("  Application id: {}", self.application_id);
        info!("  Username: {}", self.username);
        info!("  Directory id: {}", self.directory_id);
        info!("  Filter: {}", self.filter);
        info!("  Description: {}", self.description);
        info!("  Durable: {}", self.durable);
        info!("  Invoke timeout: {}s", self.invoke_timeout.as_secs());
        info!("  Long polling: {}", self.long_polling);
        info!("  Log level: {}", self.log_level);
    }
}

/// Initialize tracing with the configured level unless RUST_LOG is set
fn init_tracing(log_level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

fn print_env_help() {
    println!("Environment Variables:");
    println!("  OPENACCESS_URL              Service URL ending with '/'");
    println!("  OPENACCESS_APPLICATION_ID   Application id");
    println!("  OPENACCESS_USERNAME         User name");
    println!("  OPENACCESS_PASSWORD         Password");
    println!("  OPENACCESS_LOG_LEVEL        Log level (default: warn)");
    println!();
}

/// Console lines, read by a single thread for the whole process.
///
/// Every prompt takes its line from here, so a read left pending by Ctrl+C
/// still answers the next prompt. The thread is detached and cannot keep
/// the runtime from shutting down.
struct ConsoleInput {
    lines: mpsc::UnboundedReceiver<String>,
}

impl ConsoleInput {
    fn stdin() -> Self {
        Self::spawn(std::io::BufReader::new(std::io::stdin()))
    }

    fn spawn<R: BufRead + Send + 'static>(reader: R) -> Self {
        let (tx, lines) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for line in reader.lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Failed to read console input");
                        break;
                    }
                }
            }
        });
        Self { lines }
    }

    /// Next line typed on the console, or `None` once input is closed
    async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }
}

/// Wait for ENTER or Ctrl+C
async fn wait_for_stop(console: &mut ConsoleInput) {
    tokio::select! {
        line = console.next_line() => match line {
            Some(_) => debug!("Stop requested from the console"),
            None => debug!("Console input closed"),
        },
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => info!("Received Ctrl+C"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        },
    }
}

/// Receive events until the operator asks to stop.
///
/// The session is closed on every path, including failures to start.
async fn receive_events(
    config: &Config,
    session_token: String,
    handler: Arc<ConsoleEventHandler<std::io::Stdout>>,
    console: &mut ConsoleInput,
) -> Result<()> {
    let bridge_url = config.bridge_url();
    println!("Connecting to the Web Event Bridge at {}...", bridge_url);

    let descriptor = SubscriptionDescriptor::new(&config.description, &config.filter)
        .with_durable(config.durable);
    let transport = config
        .bridge_transport()
        .context("Invalid web event bridge URL")?;
    let session = SubscriptionSession::new(
        transport,
        ConnectionIdentity::new(session_token, &config.application_id),
        descriptor,
        handler,
        config.bridge_config(),
    );

    let outcome = async {
        session.start_receiving().await?;
        wait_for_stop(console).await;
        session.stop_receiving().await
    }
    .await;

    session.close();
    outcome.context("Event subscription failed")
}

/// Log in, receive events and log out.
async fn run(config: Config, console: &mut ConsoleInput) -> Result<()> {
    println!(
        "Connecting to the OpenAccess service at {} with application id {}...",
        config.service_url, config.application_id
    );

    let mut client = SessionClient::new(&config.service_url, &config.application_id);
    let (mut client, session_token) = tokio::task::spawn_blocking({
        let username = config.username.clone();
        let password = config.password.clone();
        let directory_id = config.directory_id.clone();
        move || {
            let token = client.login(&username, &password, &directory_id);
            (client, token)
        }
    })
    .await
    .context("Login task failed")?;
    let session_token = session_token?;

    println!("Successfully connected to the OpenAccess service.");

    let handler = Arc::new(ConsoleEventHandler::new(std::io::stdout()));
    let received = receive_events(&config, session_token, handler.clone(), console).await;
    info!("{}", handler.stats().summary());
    received?;

    tokio::task::spawn_blocking(move || client.logout())
        .await
        .context("Logout task failed")??;

    info!("Logged out of the OpenAccess service");
    Ok(())
}

/// Print an error the way the operator expects to see it
fn report_error(error: &anyhow::Error) {
    let service_error = error.chain().find_map(|cause| match cause.downcast_ref::<SessionError>() {
        Some(SessionError::Service { code, message }) => Some((code, message)),
        _ => None,
    });

    match service_error {
        Some((code, message)) => println!(
            "Error communicating with the OpenAccess API: {} - {}",
            code, message
        ),
        None => println!("Error: {:#}", error),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            eprintln!();
            print_env_help();
            std::process::exit(2);
        }
    };

    init_tracing(&config.log_level)?;
    config.print_summary();

    let mut console = ConsoleInput::stdin();
    if let Err(error) = run(config, &mut console).await {
        tracing::error!("Gateway failed: {:#}", error);
        report_error(&error);
        println!("Press enter to exit...");
        let _ = console.next_line().await;
    }

    Ok(())
}
