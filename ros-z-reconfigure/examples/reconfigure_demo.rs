use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use ros_z_reconfigure::{
    BaseConfig, Builder, JsonFileParamStore, ParamType, ParamValue, ParameterSet,
    ReconfigureClient, ReconfigureServer, Reconfigurable, ZenohTransport,
};

#[derive(Debug, Parser)]
#[command(
    name = "reconfigure_demo",
    about = "Serve or update a reconfigurable parameter set over zenoh"
)]
struct Args {
    /// Node name of the server
    #[arg(short, long, default_value = "reconfigure_demo")]
    node: String,

    /// Node namespace
    #[arg(long, default_value = "")]
    namespace: String,

    /// Zenoh session mode (peer, client, router)
    #[arg(short, long, default_value = "peer")]
    mode: String,

    /// Zenoh endpoint to connect to (e.g., tcp/localhost:7447)
    #[arg(short, long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a server exposing bool_name, double_name, int_name and str_name
    Server {
        /// JSON file holding persisted values
        #[arg(short, long, default_value = "reconfigure_demo.json")]
        store: String,

        /// Number of updates to handle before exiting (0 for unlimited)
        #[arg(short, long, default_value = "0")]
        count: usize,
    },
    /// Send `name=value` updates to a running server
    Client {
        #[arg(required = true)]
        updates: Vec<String>,

        /// Seconds to wait for the server
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },
}

#[derive(Clone)]
struct DemoConfig(BaseConfig);

impl DemoConfig {
    fn new() -> ros_z_reconfigure::Result<Self> {
        let mut base = BaseConfig::new();
        base.add_field("bool_name", ParamType::Bool, 1, "A bool", true, None, None)?;
        base.add_field(
            "double_name",
            ParamType::Double,
            2,
            "A double between 0 and 88",
            8.8,
            Some(ParamValue::Double(0.0)),
            Some(ParamValue::Double(88.0)),
        )?;
        base.add_field(
            "int_name",
            ParamType::Int,
            4,
            "An int between 0 and 88",
            8,
            Some(ParamValue::Int(0)),
            Some(ParamValue::Int(88)),
        )?;
        base.add_field("str_name", ParamType::Str, 8, "A string", "default", None, None)?;
        Ok(Self(base))
    }
}

impl Reconfigurable for DemoConfig {
    fn base(&self) -> &BaseConfig {
        &self.0
    }

    fn base_mut(&mut self) -> &mut BaseConfig {
        &mut self.0
    }
}

fn print_config(config: &ParameterSet) {
    for param in config {
        println!("  {} ({}) = {}", param.name, param.param_type(), param.value);
    }
}

fn run_server(args: &Args, transport: ZenohTransport, store: &str, count: usize) -> Result<()> {
    let (tx, rx) = flume::unbounded();
    let server = ReconfigureServer::builder(&args.node, DemoConfig::new()?, move |config, level| {
        println!("Reconfigure request, level {:#x}:", level);
        print_config(config.base().current_config());
        let _ = tx.send(());
        Some(config)
    })
    .with_namespace(&args.namespace)
    .with_transport(transport)
    .with_store(JsonFileParamStore::open(store)?)
    .build()?;

    println!("Serving {}, waiting for updates...", server.owner());
    // The first callback is the initial publish.
    let mut handled = 0usize;
    while rx.recv().is_ok() {
        handled += 1;
        if count != 0 && handled > count {
            break;
        }
    }
    server.close();
    Ok(())
}

fn parse_update(client: &ReconfigureClient, updates: &[String], timeout: Duration) -> Result<ParameterSet> {
    let description = client
        .wait_for_description(timeout)
        .context("no description received from the server")?;

    let mut set = ParameterSet::new();
    for update in updates {
        let (name, text) = update
            .split_once('=')
            .ok_or_else(|| anyhow!("expected name=value, got '{}'", update))?;
        let Some(param) = description.param(name) else {
            bail!("server has no parameter '{}'", name);
        };
        set = set.with(name, ParamValue::parse(name, param.ty, text)?);
    }
    Ok(set)
}

fn run_client(args: &Args, transport: ZenohTransport, updates: &[String], timeout: u64) -> Result<()> {
    let timeout = Duration::from_secs(timeout);
    let client = ReconfigureClient::builder(&args.node)
        .with_namespace(&args.namespace)
        .with_transport(transport)
        .build()?;

    let update = parse_update(&client, updates, timeout)?;
    let applied = client.update_configuration(&update)?.wait(timeout)?;
    println!("Server applied:");
    print_config(&applied);
    client.close();
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    zenoh::init_log_from_env_or("error");

    let mut builder = ZenohTransport::builder().with_mode(&args.mode);
    if let Some(e) = &args.endpoint {
        builder = builder.with_connect_endpoints([e.as_str()]);
    }
    let transport = builder.build()?;

    match &args.command {
        Command::Server { store, count } => run_server(&args, transport, store, *count),
        Command::Client { updates, timeout } => run_client(&args, transport, updates, *timeout),
    }
}
