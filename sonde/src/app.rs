use clap::{Arg, ArgAction, ArgMatches, Command as ClapCommand};
use console::Term;
use itertools::Itertools;
use sonde_core::{
    config::Config,
    http::Client,
    reporter::{Reporter, ReporterType},
    spec, ApiTree, Runner,
};
use std::{
    collections::{HashMap, VecDeque},
    path::PathBuf,
    str::FromStr,
};
use tracing::*;
use tracing_subscriber::EnvFilter;

fn spec_arg() -> Arg {
    Arg::new("spec")
        .short('s')
        .long("spec")
        .help("Path of the API tree file (YAML, or JSON by extension). Default is \"spec\" from sonde.toml")
        .value_parser(clap::value_parser!(PathBuf))
}

fn config_arg() -> Arg {
    Arg::new("config")
        .long("config")
        .help("Path of sonde.toml [env: SONDE_CONFIG]")
        .value_parser(clap::value_parser!(PathBuf))
}

/// Build the CLI with clap's builder pattern
fn build_cli<'a>(third_party_reporters: impl Iterator<Item = &'a String>) -> ClapCommand {
    let mut reporter_choices: VecDeque<_> = third_party_reporters.map(|s| s.to_string()).collect();
    reporter_choices.push_front(ReporterType::Null.to_string());
    reporter_choices.push_front(ReporterType::List.to_string());
    ClapCommand::new("sonde")
        .about("sonde runs the requests of an API tree and checks their responses")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(Arg::new("log-level")
            .long("log-level")
            .help("Log level filter, overridden by RUST_LOG")
            .global(true)
            .default_value("warn"))
        .subcommand(
            ClapCommand::new("run")
                .about("Execute every request of the API tree")
                .arg(spec_arg())
                .arg(config_arg())
                .arg(Arg::new("capture-http")
                    .long("capture-http")
                    .help("Print requests and responses, with sensitive fields masked")
                    .action(ArgAction::SetTrue))
                .arg(Arg::new("reporters")
                    .long("reporters")
                    .help(format!("Specify the reporters to use in comma-separated string. Default is \"list\". [possible values: {}]", reporter_choices.into_iter().join(", ")))
                    .value_delimiter(',')
                    .action(ArgAction::Append))
                .arg(Arg::new("color")
                    .long("color")
                    .help("Produce color output. Default is \"auto\" [env: CARGO_TERM_COLOR]")
                    .value_parser(["auto", "always", "never"]))
        )
        .subcommand(
            ClapCommand::new("ls")
                .about("List requests and their tests")
                .arg(spec_arg())
                .arg(config_arg())
        )
}

/// sonde CLI.
#[derive(Default)]
pub struct App {
    third_party_reporters: HashMap<String, Box<dyn Reporter>>,
}

impl App {
    pub fn new() -> App {
        App {
            third_party_reporters: HashMap::new(),
        }
    }

    /// Install a third-party reporter.
    pub fn install_reporter(&mut self, name: impl Into<String>, reporter: impl Reporter + 'static) {
        self.third_party_reporters
            .insert(name.into(), Box::new(reporter));
    }

    /// Parse command-line args and run sonde CLI sub command.
    pub async fn run(self) -> eyre::Result<()> {
        let matches = build_cli(self.third_party_reporters.keys()).get_matches();
        color_eyre::install()?;
        init_tracing(&matches)?;

        match matches.subcommand() {
            Some(("run", run_matches)) => self.run_tree(run_matches).await,
            Some(("ls", ls_matches)) => list(ls_matches),
            _ => eyre::bail!("a subcommand is required"),
        }
    }

    async fn run_tree(mut self, matches: &ArgMatches) -> eyre::Result<()> {
        let capture_http = matches.get_flag("capture-http");
        let reporters_arg = matches
            .get_many::<String>("reporters")
            .map(|vals| vals.cloned().collect::<Vec<_>>())
            .unwrap_or_else(|| vec![ReporterType::List.to_string()]);
        let color_command = matches
            .get_one::<String>("color")
            .and_then(|s| Color::from_str(s).ok());

        let (cfg, mut tree) = load(matches)?;
        let mut runner = Runner::new(Client::new()?).with_redactor(cfg.redactor());

        for name in reporters_arg {
            let reporter = match ReporterType::from_str(&name) {
                Ok(builtin) => builtin.build(capture_http),
                Err(_) => self
                    .third_party_reporters
                    .remove(&name)
                    .ok_or_else(|| eyre::eyre!("Unknown reporter: {name}"))?,
            };
            runner.add_boxed_reporter(reporter);
        }

        apply_color(color_command, std::env::var("CARGO_TERM_COLOR").ok());

        let summary = runner.run(&mut tree).await?;
        if !summary.no_failure() {
            eyre::bail!(
                "{} request(s) with failing tests: {}",
                summary.failed_requests.len(),
                summary.failed_requests.iter().join(", ")
            );
        }
        Ok(())
    }
}

fn init_tracing(matches: &ArgMatches) -> eyre::Result<()> {
    let level = matches
        .get_one::<String>("log-level")
        .map(String::as_str)
        .unwrap_or("warn");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| eyre::eyre!("failed to initialize logging: {e}"))
}

/// Configuration and API tree named by the command-line arguments.
fn load(matches: &ArgMatches) -> eyre::Result<(Config, ApiTree)> {
    let cfg = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let path = matches
        .get_one::<PathBuf>("spec")
        .cloned()
        .unwrap_or_else(|| cfg.spec.clone());
    debug!("loading API tree from {}", path.display());

    let root = spec::load_from(&path)?;
    let tree = ApiTree::from_env(root)?;
    Ok((cfg, tree))
}

fn list(matches: &ArgMatches) -> eyre::Result<()> {
    let (_, tree) = load(matches)?;
    let term = Term::stdout();
    for request in tree.requests() {
        let method = request
            .http_method()
            .map(|m| m.to_string())
            .unwrap_or_else(|_| "INVALID".into());
        term.write_line(&format!("* {method} {}", request.full_name()))?;
        for test in request.tests() {
            term.write_line(&format!("  - {}", test.name()))?;
        }
    }
    Ok(())
}

fn apply_color(color_command: Option<Color>, color_env: Option<String>) {
    match resolve_color(color_command, color_env) {
        Some(Color::Always) => {
            console::set_colors_enabled(true);
            console::set_colors_enabled_stderr(true);
        }
        Some(Color::Never) => {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }
        _ => {}
    }
}

/// Command-line choice first, then `CARGO_TERM_COLOR`.
fn resolve_color(color_command: Option<Color>, color_env: Option<String>) -> Option<Color> {
    match (color_command, color_env) {
        (color @ Some(Color::Always), _) => color,
        (color @ Some(Color::Never), _) => color,
        (None, Some(color)) => Color::from_str(&color).ok(),
        _ => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Color {
    #[default]
    Auto,
    Always,
    Never,
}
