use std::path::Path;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::CompleteEnv;
use color_eyre::eyre::{Result, bail};
use tracing_subscriber::EnvFilter;

use dockdriver::{CreateParams, Driver, StackedConfig, container_name};

#[derive(Parser)]
#[command(name = "dockdriver")]
#[command(about = "Manage container lifecycle through the docker CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and run a container, printing its id
    Create(CreateArgs),
    /// Whether a container exists (running or stopped)
    Created { id: String },
    /// Whether a container is running
    Running { id: String },
    /// Whether a container runs in privileged mode
    Privileged { id: String },
    /// Print running, stopped or not_created
    State { id: String },
    /// Start a container unless it is already running
    Start { id: String },
    /// Stop a container if it is running
    Stop {
        id: String,
        /// Seconds to wait before killing (defaults to docker.stop_timeout)
        #[arg(long, short)]
        timeout: Option<u32>,
    },
    /// Force-remove a container and its volumes if it exists
    Rm { id: String },
    /// Pull an image (defaults to the configured image)
    Pull { image: Option<String> },
    /// Print a container's inspect data as JSON
    Inspect { id: String },
    /// List the ids of all containers
    List,
    /// Print the IPv4 address of the docker bridge interface
    BridgeIp,
}

#[derive(Args, Default)]
struct CreateArgs {
    /// Image to run (defaults to the configured image)
    #[arg(long)]
    image: Option<String>,
    /// Container name (defaults to one derived from the project directory)
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    hostname: Option<String>,
    /// Port mapping, e.g. 8080:80
    #[arg(short, long = "port")]
    ports: Vec<String>,
    /// Volume mapping, e.g. /host:/container
    #[arg(short, long = "volume")]
    volumes: Vec<String>,
    /// Link to another container as NAME:ALIAS
    #[arg(long = "link", value_parser = parse_link)]
    links: Vec<(String, String)>,
    /// Environment variable as KEY=VALUE
    #[arg(short, long = "env", value_parser = parse_env)]
    env: Vec<(String, String)>,
    #[arg(long)]
    privileged: bool,
    /// Run attached instead of detached
    #[arg(long)]
    foreground: bool,
    /// Command to run in the container
    #[arg(trailing_var_arg = true)]
    cmd: Vec<String>,
}

fn split_pair(value: &str, separator: char, expected: &str) -> Result<(String, String), String> {
    match value.split_once(separator) {
        Some((left, right)) if !left.is_empty() => Ok((left.to_string(), right.to_string())),
        _ => Err(format!("expected {expected}, got `{value}`")),
    }
}

fn parse_link(value: &str) -> Result<(String, String), String> {
    split_pair(value, ':', "NAME:ALIAS")
}

fn parse_env(value: &str) -> Result<(String, String), String> {
    split_pair(value, '=', "KEY=VALUE")
}

/// Merge command-line flags over the configured defaults.
fn create_params(
    args: CreateArgs,
    config: &StackedConfig,
    project_dir: &Path,
) -> Result<CreateParams> {
    let mut params = config.create_params();

    if let Some(image) = args.image {
        params.image = image;
    }
    if params.image.is_empty() {
        bail!("No image given; pass --image or set `image` in config.yml");
    }

    params.name = args
        .name
        .or(params.name)
        .or_else(|| Some(container_name(project_dir)));
    if args.hostname.is_some() {
        params.hostname = args.hostname;
    }
    params.ports.extend(args.ports);
    params.volumes.extend(args.volumes);
    for (container, alias) in args.links {
        match params.links.iter_mut().find(|(name, _)| *name == container) {
            Some(link) => link.1 = alias,
            None => params.links.push((container, alias)),
        }
    }
    params.env.extend(args.env);
    params.privileged |= args.privileged;
    params.detach = !args.foreground;
    if !args.cmd.is_empty() {
        params.cmd = args.cmd;
    }

    Ok(params)
}

fn stop_timeout(timeout: Option<u32>, config: &StackedConfig) -> u32 {
    timeout.unwrap_or_else(|| config.stop_timeout())
}

fn pull_image<'a>(image: Option<&'a str>, config: &'a StackedConfig) -> Result<&'a str> {
    let Some(image) = image.or(config.image()) else {
        bail!("No image given; pass one or set `image` in config.yml");
    };
    Ok(image)
}

fn main() -> Result<()> {
    CompleteEnv::with_factory(Cli::command).complete();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let project_dir = std::env::current_dir()?;
    let xdg = xdg::BaseDirectories::with_prefix("dockdriver");
    let config = StackedConfig::load(&xdg, Some(&project_dir))?;
    let driver = Driver::from_config(&config);

    match cli.command {
        Commands::Create(args) => {
            let params = create_params(args, &config, &project_dir)?;
            println!("{}", driver.create(&params)?);
        }
        Commands::Created { id } => println!("{}", driver.is_created(&id)?),
        Commands::Running { id } => println!("{}", driver.is_running(&id)?),
        Commands::Privileged { id } => println!("{}", driver.is_privileged(&id)?),
        Commands::State { id } => println!("{}", driver.state(&id)?),
        Commands::Start { id } => driver.start(&id)?,
        Commands::Stop { id, timeout } => driver.stop(&id, stop_timeout(timeout, &config))?,
        Commands::Rm { id } => driver.rm(&id)?,
        Commands::Pull { image } => driver.pull(pull_image(image.as_deref(), &config)?)?,
        Commands::Inspect { id } => {
            let info = driver.inspect_container(&id)?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        Commands::List => {
            for id in driver.all_containers()? {
                println!("{}", id);
            }
        }
        Commands::BridgeIp => println!("{}", driver.docker_bridge_ip()?),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use dockdriver::config::{Config, ConfigSource};

    use super::*;

    fn parse_create(args: &[&str]) -> CreateArgs {
        let argv = ["dockdriver", "create"].iter().chain(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Create(args) => args,
            _ => panic!("expected create"),
        }
    }

    fn configured(yaml: &str) -> StackedConfig {
        let mut config = StackedConfig::with_defaults();
        let data: Config = serde_yaml_ng::from_str(yaml).unwrap();
        config.add_layer(ConfigSource::Project, data, PathBuf::from("/project/.dockdriver"));
        config
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_link_and_env() {
        assert_eq!(
            parse_link("db:database").unwrap(),
            ("db".to_string(), "database".to_string())
        );
        assert_eq!(
            parse_env("KEY=a=b").unwrap(),
            ("KEY".to_string(), "a=b".to_string())
        );
        assert!(parse_link("db").is_err());
        assert!(parse_env("=value").is_err());
    }

    #[test]
    fn create_flags_and_trailing_command() {
        let args = parse_create(&[
            "--image",
            "busybox",
            "-p",
            "8080:80",
            "--link",
            "db:database",
            "-e",
            "FOO=bar",
            "--privileged",
            "sh",
            "-c",
            "echo hi",
        ]);
        assert_eq!(args.image.as_deref(), Some("busybox"));
        assert_eq!(args.ports, ["8080:80"]);
        assert_eq!(args.links, [("db".to_string(), "database".to_string())]);
        assert!(args.privileged);
        assert_eq!(args.cmd, ["sh", "-c", "echo hi"]);
    }

    #[test]
    fn create_params_merge_flags_over_config() {
        let config = configured(
            r#"
image: configured
hostname: box
cmd: [sleep, infinity]
ports: ["2222:22"]
env:
  FOO: from-config
  KEEP: kept
"#,
        );
        let args = parse_create(&[
            "--image",
            "busybox",
            "-p",
            "8080:80",
            "-e",
            "FOO=from-flag",
            "--name",
            "named",
        ]);

        let params = create_params(args, &config, Path::new("/project")).unwrap();
        assert_eq!(params.image, "busybox");
        assert_eq!(params.name.as_deref(), Some("named"));
        assert_eq!(params.hostname.as_deref(), Some("box"));
        assert_eq!(params.ports, ["2222:22", "8080:80"]);
        assert_eq!(params.env.get("FOO").unwrap(), "from-flag");
        assert_eq!(params.env.get("KEEP").unwrap(), "kept");
        assert_eq!(params.cmd, ["sleep", "infinity"]);
        assert!(params.detach);
    }

    #[test]
    fn create_params_derive_name_from_project() {
        let config = configured("image: busybox\n");
        let params =
            create_params(parse_create(&["--foreground"]), &config, Path::new("/tmp/myproj"))
                .unwrap();
        assert!(params.name.unwrap().starts_with("dockdriver-myproj-"));
        assert!(!params.detach);
    }

    #[test]
    fn create_params_require_image() {
        let config = StackedConfig::with_defaults();
        assert!(create_params(CreateArgs::default(), &config, Path::new("/project")).is_err());
    }

    #[test]
    fn create_params_flag_link_replaces_configured_alias() {
        let config = configured(
            r#"
image: busybox
links:
  db: database
  cache: redis
"#,
        );
        let args = parse_create(&["--link", "db:primary", "--link", "queue:rabbit"]);

        let params = create_params(args, &config, Path::new("/project")).unwrap();
        assert_eq!(
            params.links,
            [
                ("cache".to_string(), "redis".to_string()),
                ("db".to_string(), "primary".to_string()),
                ("queue".to_string(), "rabbit".to_string()),
            ]
        );
        let link_flags = params.to_args().iter().filter(|a| *a == "--link").count();
        assert_eq!(link_flags, 3);
    }

    #[test]
    fn stop_timeout_prefers_flag() {
        let config = configured("docker:\n  stop_timeout: 20\n");
        assert_eq!(stop_timeout(Some(5), &config), 5);
    }

    #[test]
    fn stop_timeout_falls_back_to_config() {
        let config = configured("docker:\n  stop_timeout: 20\n");
        assert_eq!(stop_timeout(None, &config), 20);
        assert_eq!(stop_timeout(None, &StackedConfig::with_defaults()), 1);
    }

    #[test]
    fn pull_image_prefers_argument() {
        let config = configured("image: configured\n");
        assert_eq!(pull_image(Some("busybox"), &config).unwrap(), "busybox");
    }

    #[test]
    fn pull_image_falls_back_to_config() {
        let config = configured("image: ubuntu:24.04\n");
        assert_eq!(pull_image(None, &config).unwrap(), "ubuntu:24.04");
        assert!(pull_image(None, &StackedConfig::with_defaults()).is_err());
    }
}
