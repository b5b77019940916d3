use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use mgmt_core::{ControllerConfig, Domain, DomainBootstrap, DomainBuilder, OperationRequest};
use mgmt_model::PathAddress;
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    let bootstrap = Arg::new("bootstrap")
        .long("bootstrap")
        .required(true)
        .value_parser(clap::value_parser!(PathBuf))
        .help("Domain bootstrap file (.toml, .yaml or .yml)");
    let user = Arg::new("user")
        .long("user")
        .required(true)
        .help("Bootstrap user to run as");

    Command::new("mgmt-controller")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Domain management controller")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(clap::value_parser!(PathBuf))
                .help("Controller configuration (TOML)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .help("Log filter, overrides RUST_LOG"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("exec")
                .about("Boot the domain and execute one operation")
                .arg(bootstrap.clone())
                .arg(user.clone())
                .arg(
                    Arg::new("request")
                        .long("request")
                        .conflicts_with("request-file")
                        .help("Operation request as JSON"),
                )
                .arg(
                    Arg::new("request-file")
                        .long("request-file")
                        .value_parser(clap::value_parser!(PathBuf))
                        .help("File holding the operation request"),
                ),
        )
        .subcommand(
            Command::new("validate")
                .about("Validate an address against the domain")
                .arg(bootstrap.clone())
                .arg(user)
                .arg(Arg::new("address").required(true).help("Address such as /host=primary/server=s1")),
        )
        .subcommand(
            Command::new("topology")
                .about("Print host session states")
                .arg(bootstrap),
        )
}

fn init_logging(matches: &ArgMatches) {
    let env_filter = matches
        .get_one::<String>("log-level")
        .map(EnvFilter::new)
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    if matches.get_flag("log-json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn boot(args: &ArgMatches) -> Result<Domain> {
    let config = match args.get_one::<PathBuf>("config") {
        Some(path) => ControllerConfig::load(path)?,
        None => ControllerConfig::default(),
    };
    let path = args
        .get_one::<PathBuf>("bootstrap")
        .context("missing --bootstrap")?;
    let bootstrap = DomainBootstrap::load(path)?;
    Ok(DomainBuilder::new(bootstrap).with_config(config).boot().await?)
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn exec(domain: &Domain, args: &ArgMatches) -> Result<bool> {
    let user = args.get_one::<String>("user").context("missing --user")?;
    let raw = match (args.get_one::<String>("request"), args.get_one::<PathBuf>("request-file")) {
        (Some(raw), _) => raw.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => bail!("one of --request or --request-file is required"),
    };
    let request: Value = serde_json::from_str(&raw).context("request is not JSON")?;
    let response = domain.execute_json(user, &request).await;
    print(&response.to_json())?;
    Ok(response.is_success())
}

async fn validate(domain: &Domain, args: &ArgMatches) -> Result<bool> {
    let user = args.get_one::<String>("user").context("missing --user")?;
    let address = args.get_one::<String>("address").context("missing address")?;
    let request = OperationRequest::new(PathAddress::root(), "validate-address")
        .with_param("value", address.as_str());
    let response = domain.execute(user, request).await;
    print(&response.to_json())?;
    Ok(response.is_success())
}

fn topology(domain: &Domain) -> Result<bool> {
    let hosts: serde_json::Map<String, Value> = domain
        .topology()
        .states()
        .into_iter()
        .map(|(host, state)| (host, Value::from(state.as_str())))
        .collect();
    print(&json!({
        "primary": domain.controller().config().primary_host,
        "controller-state": domain.controller().state().as_str(),
        "hosts": hosts,
    }))?;
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let Some((command, args)) = matches.subcommand() else {
        bail!("no subcommand given");
    };
    // global options are propagated into the subcommand's matches
    init_logging(args);

    let domain = boot(args).await?;
    let succeeded = match command {
        "exec" => exec(&domain, args).await,
        "validate" => validate(&domain, args).await,
        "topology" => topology(&domain),
        other => Err(anyhow::anyhow!("unknown subcommand '{other}'")),
    };
    domain.shutdown().await;
    if !succeeded? {
        std::process::exit(1);
    }
    Ok(())
}
