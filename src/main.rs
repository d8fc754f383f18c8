//! uagw CLI entry point.
//!
//! `uagw service` runs the gateway for one connection; `get`, `set`,
//! `browse` and `info` talk to a running gateway picked by connection name.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use uagw::codec::bitfield::parse_bit_names;
use uagw::codec::line_protocol::now_nanos;
use uagw::core::logging;
use uagw::gateway::browse::{DEFAULT_MAX_DEPTH, DEFAULT_ROOT};
use uagw::gateway::client::{
    render_browse, render_info, render_reads, render_write, GatewayClient, InfluxOptions,
    OutputFormat,
};
use uagw::gateway::config::GatewayConfig;
use uagw::gateway::factory::create_connector;
use uagw::gateway::service;
use uagw::{AuthMethod, NodeAddress, Result, SecurityMode, SecurityPolicy};

/// OPC UA gateway: one long-lived session, many short-lived clients
#[derive(Parser, Debug)]
#[command(name = "uagw", version, about, long_about = None)]
struct Cli {
    /// Connection name; selects the gateway port
    #[arg(short = 'n', long, global = true)]
    connection: Option<String>,

    /// Base port used by the `default` connection
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Gateway host (bind address in service mode)
    #[arg(long, global = true)]
    host: Option<String>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Influx)]
    format: OutputFormat,

    /// TOML configuration file; flags override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the gateway service for one connection
    Service {
        /// OPC UA endpoint URL (opc.tcp://host:port or virtual://demo)
        #[arg(short, long)]
        endpoint: Option<String>,

        #[arg(short, long)]
        username: Option<String>,

        #[arg(long)]
        password: Option<String>,

        /// Anonymous or UserName
        #[arg(long)]
        auth_method: Option<AuthMethod>,

        /// None, Basic128Rsa15, Basic256, Basic256Sha256, ...
        #[arg(long)]
        security_policy: Option<SecurityPolicy>,

        /// None, Sign or SignAndEncrypt
        #[arg(long)]
        security_mode: Option<SecurityMode>,

        /// Client certificate file
        #[arg(long)]
        cert: Option<PathBuf>,

        /// Client private key file
        #[arg(long)]
        key: Option<PathBuf>,

        /// Create a self-signed keypair when none exists
        #[arg(long)]
        gen_cert: Option<bool>,

        /// Connect timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Read one or more nodes
    Get {
        /// Node ids, e.g. ns=2;s=Line1.Speed
        #[arg(required = true)]
        node_ids: Vec<String>,

        /// Measurement name for line records
        #[arg(short, long, default_value = "opcua")]
        measurement: String,

        /// Expand 32-bit values into one record per bit
        #[arg(long)]
        bits: bool,

        /// 32 comma-separated bit names (with --bits)
        #[arg(long)]
        bit_names: Option<String>,
    },

    /// Write a node value with an explicit data type
    Set {
        node_id: String,
        value: String,
        /// boolean, sbyte, byte, int16, uint16, int32, uint32, int64, uint64, float, double, string
        data_type: String,
    },

    /// Browse variables below a node
    Browse {
        #[arg(default_value = DEFAULT_ROOT)]
        node_id: String,

        #[arg(default_value_t = 3)]
        max_depth: u32,
    },

    /// Show gateway status
    Info,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_toml_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(connection) = &cli.connection {
        config.connection = connection.clone();
    }
    if let Some(port) = cli.port {
        config.base_port = port;
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }

    let client = GatewayClient::for_connection(&config.host, &config.connection, config.base_port);
    let format = cli.format;

    match cli.command {
        Commands::Service {
            endpoint,
            username,
            password,
            auth_method,
            security_policy,
            security_mode,
            cert,
            key,
            gen_cert,
            timeout,
        } => {
            if let Some(v) = endpoint {
                config.endpoint = v;
            }
            if let Some(v) = username {
                config.username = v;
            }
            if let Some(v) = password {
                config.password = v;
            }
            if let Some(v) = auth_method {
                config.auth_method = v;
            }
            if let Some(v) = security_policy {
                config.security_policy = v;
            }
            if let Some(v) = security_mode {
                config.security_mode = v;
            }
            if let Some(v) = cert {
                config.cert_file = v;
            }
            if let Some(v) = key {
                config.key_file = v;
            }
            if let Some(v) = gen_cert {
                config.generate_cert = v;
            }
            if let Some(v) = timeout {
                config.timeouts.connect_secs = v;
            }

            config.validate()?;
            let connector = create_connector(&config)?;
            service::run(config, connector).await
        }

        Commands::Get {
            node_ids,
            measurement,
            bits,
            bit_names,
        } => {
            let addresses = node_ids
                .iter()
                .map(|id| NodeAddress::parse(id))
                .collect::<Result<Vec<_>>>()?;
            let bit_names = match bit_names.as_deref() {
                Some(csv) => parse_bit_names(csv)?,
                None => None,
            };

            let replies = client.read_many(&addresses).await?;
            let endpoint = match format {
                OutputFormat::Influx => client.endpoint_tag().await,
                _ => String::new(),
            };
            let influx = InfluxOptions {
                measurement,
                endpoint,
                bits,
                bit_names,
            };
            print_output(render_reads(format, &addresses, &replies, &influx)?);
            Ok(())
        }

        Commands::Set {
            node_id,
            value,
            data_type,
        } => {
            let address = NodeAddress::parse(&node_id)?;
            let reply = client.write(&address, &value, &data_type).await?;
            let endpoint = match format {
                OutputFormat::Influx => client.endpoint_tag().await,
                _ => String::new(),
            };
            print_output(render_write(
                format, &address, &value, &data_type, &reply, &client, &endpoint,
            )?);
            Ok(())
        }

        Commands::Browse { node_id, max_depth } => {
            let max_depth = if max_depth == 0 { DEFAULT_MAX_DEPTH } else { max_depth };
            let nodes = client.browse(&node_id, max_depth).await?;
            let endpoint = match format {
                OutputFormat::Influx => client.endpoint_tag().await,
                _ => String::new(),
            };
            print_output(render_browse(format, &nodes, &endpoint, now_nanos())?);
            Ok(())
        }

        Commands::Info => {
            let info = client.info().await?;
            print_output(render_info(format, &info)?);
            Ok(())
        }
    }
}

fn print_output(text: String) {
    if !text.is_empty() {
        println!("{}", text);
    }
}
