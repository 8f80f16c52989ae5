//! Dashboard client.
//!
//! Each invocation opens one connection. Pass `--email`/`--password` to log
//! in on that connection before running the command; over the fallback
//! transport every call is anonymous, so only public servers are listed.
//!
//! Run:
//!   cargo run -p tether-example-dashboard --bin dashboard-client -- servers --watch
//!   cargo run -p tether-example-dashboard --bin dashboard-client -- \
//!     --email samvv@pm.me --password blabla add-server atlas --public

use clap::{Parser, Subcommand};
use dashboard::protocol::{Fallible, Person, Server, Status};
use serde_json::json;
use tether_client::{Client, ClientConfig, TransportMode};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "dashboard-client")]
#[command(about = "Talk to a dashboard server")]
struct Cli {
    /// WebSocket URL of the server
    #[arg(long, env = "DASHBOARD_URL", default_value = "ws://127.0.0.1:3000")]
    url: String,

    /// Prefix of the fallback endpoints
    #[arg(long, env = "DASHBOARD_FALLBACK_URL", default_value = "http://127.0.0.1:3000/fallback")]
    fallback_url: String,

    /// auto, push or fallback
    #[arg(long, default_value = "auto")]
    mode: TransportMode,

    /// Shortest allowed poll period in milliseconds
    #[arg(long, default_value = "1000")]
    min_poll_ms: u64,

    #[arg(long, env = "DASHBOARD_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "DASHBOARD_PASSWORD", requires = "email")]
    password: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check credentials and print the account
    Login { email: String, password: String },
    /// End the session
    Logout,
    /// List the servers you may see
    Servers {
        /// Keep printing the list as it changes
        #[arg(long)]
        watch: bool,
    },
    /// Register a new server
    AddServer {
        name: String,
        #[arg(long)]
        friendly_name: Option<String>,
        #[arg(long)]
        ipv4: Option<String>,
        #[arg(long)]
        public: bool,
        /// Owner id; defaults to the logged-in person
        #[arg(long)]
        owner: Option<Uuid>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tether_client=warn".parse()?))
        .init();

    let cli = Cli::parse();
    let config = ClientConfig {
        url: cli.url,
        fallback_url: cli.fallback_url,
        min_poll_ms: cli.min_poll_ms,
        mode: cli.mode,
        ..ClientConfig::default()
    };
    let client = Client::connect(&config).await?;
    tracing::info!("Connected over {}", client.transport_kind());

    let me = match (cli.email, cli.password) {
        (Some(email), Some(password)) => Some(login(&client, &email, &password).await?),
        _ => None,
    };

    match cli.command {
        Commands::Login { email, password } => {
            let person = login(&client, &email, &password).await?;
            println!("{} <{}> ({})", person.full_name, person.email, person.id);
        }
        Commands::Logout => {
            client.call("logout", vec![]).await?;
            println!("Logged out");
        }
        Commands::Servers { watch: false } => {
            let servers = client.watch("listServers", vec![]).await?;
            print_servers(&servers.get_as::<Vec<Server>>()?);
            servers.close().await?;
        }
        Commands::Servers { watch: true } => {
            let servers = client.watch("listServers", vec![]).await?;
            let _subscription = servers.subscribe(|value| {
                match serde_json::from_value::<Vec<Server>>(value.clone()) {
                    Ok(list) => print_servers(&list),
                    Err(e) => eprintln!("Unreadable server list: {e}"),
                }
            })?;
            tokio::signal::ctrl_c().await?;
            servers.close().await?;
        }
        Commands::AddServer {
            name,
            friendly_name,
            ipv4,
            public,
            owner,
        } => {
            let owner_id = owner
                .or(me.as_ref().map(|p| p.id))
                .ok_or_else(|| anyhow::anyhow!("pass --owner or log in with --email"))?;
            let server = Server {
                id: None,
                name,
                friendly_name,
                description: None,
                owner_id,
                ipv4,
                ipv6: None,
                status: Status::Offline,
                is_public: public,
            };
            let added: Fallible<Server> = client.call_plain("addServer", vec![json!(server)]).await?;
            match added.into_result() {
                Ok(server) => println!("Added {}", describe(&server)),
                Err(diagnostics) => report(&diagnostics),
            }
        }
    }
    Ok(())
}

async fn login(client: &Client, email: &str, password: &str) -> anyhow::Result<Person> {
    let result: Fallible<Person> = client
        .call_plain("login", vec![json!(email), json!(password)])
        .await?;
    result.into_result().map_err(|diagnostics| {
        report(&diagnostics);
        anyhow::anyhow!("login failed")
    })
}

fn report(diagnostics: &[dashboard::protocol::Diagnostic]) {
    for d in diagnostics {
        eprintln!("error: {}", d.message);
    }
}

fn describe(server: &Server) -> String {
    let label = server.friendly_name.as_deref().unwrap_or(&server.name);
    let id = server.id.map(|id| id.to_string()).unwrap_or_default();
    let address = server.ipv4.as_deref().or(server.ipv6.as_deref()).unwrap_or("-");
    let visibility = if server.is_public { "public" } else { "private" };
    format!("{label} [{id}] {address} {:?} {visibility}", server.status)
}

fn print_servers(servers: &[Server]) {
    println!("{} server(s)", servers.len());
    for server in servers {
        println!("  {}", describe(server));
    }
}
