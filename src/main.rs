use anyhow::Result;
use clap::Parser;
use pkgman::commands::{self, Options};
use pkgman::runtime::RealRuntime;
use std::path::PathBuf;
use std::sync::Arc;

/// pkgman - catalog-driven package manager
///
/// Installs, removes and updates software packages described by one or more
/// catalog sources. Packages land in `<root>/<package>-<version>`.
///
/// If the PKGMAN_TOKEN environment variable is set, it is sent as a bearer
/// token with every request.
///
/// Examples:
///   pkgman sources add https://example.org/catalog.json
///   pkgman install org.example.Tool       # newest installable version
///   pkgman install org.example.Tool@1.2   # a specific version
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Installation root directory (overrides defaults; also via PKGMAN_ROOT)
    #[arg(
        long = "root",
        short = 'r',
        env = "PKGMAN_ROOT",
        value_name = "PATH",
        global = true
    )]
    pub install_root: Option<PathBuf>,

    /// Catalog source to use instead of the configured ones (repeatable)
    #[arg(long = "source", short = 's', value_name = "URL", global = true)]
    pub sources: Vec<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List the packages of the catalog
    List {
        /// Only show installed package versions
        #[arg(long)]
        installed: bool,
    },

    /// Install packages and their dependencies
    Install {
        #[arg(required = true, value_name = "PACKAGE[@VERSION]")]
        packages: Vec<String>,
    },

    /// Uninstall packages
    Uninstall {
        #[arg(required = true, value_name = "PACKAGE[@VERSION]")]
        packages: Vec<String>,
    },

    /// Update packages to their newest version
    Update {
        #[arg(required = true, value_name = "PACKAGE")]
        packages: Vec<String>,
    },

    /// Manage catalog sources
    Sources {
        #[command(subcommand)]
        action: Option<SourcesCommand>,
    },
}

#[derive(clap::Subcommand, Debug)]
enum SourcesCommand {
    /// Append a catalog source
    Add { url: String },
    /// Remove a catalog source
    Remove { url: String },
    /// Show the configured catalog sources in priority order
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = Arc::new(RealRuntime);

    if let Commands::Sources { action } = &cli.command {
        return match action {
            Some(SourcesCommand::Add { url }) => commands::sources_add(&*runtime, url),
            Some(SourcesCommand::Remove { url }) => commands::sources_remove(&*runtime, url),
            Some(SourcesCommand::List) | None => commands::sources_list(&*runtime),
        };
    }

    let options = Options {
        install_root: cli.install_root,
        sources: cli.sources,
    };
    let manager = commands::manager(runtime, &options)?;

    match cli.command {
        Commands::List { installed } => commands::list(&manager, installed).await?,
        Commands::Install { packages } => commands::install(&manager, &packages).await?,
        Commands::Uninstall { packages } => commands::uninstall(&manager, &packages).await?,
        Commands::Update { packages } => commands::update(&manager, &packages).await?,
        Commands::Sources { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_install_parsing() {
        let cli = Cli::try_parse_from(["pkgman", "install", "org.example.Tool@1.2", "org.example.Lib"])
            .unwrap();
        match cli.command {
            Commands::Install { packages } => {
                assert_eq!(packages, vec!["org.example.Tool@1.2", "org.example.Lib"])
            }
            _ => panic!("Expected Install command"),
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "pkgman",
            "list",
            "--installed",
            "--root",
            "/tmp/root",
            "--source",
            "https://a.example.org",
            "-s",
            "https://b.example.org",
        ])
        .unwrap();
        assert_eq!(cli.install_root, Some(PathBuf::from("/tmp/root")));
        assert_eq!(cli.sources, vec!["https://a.example.org", "https://b.example.org"]);
        assert!(matches!(cli.command, Commands::List { installed: true }));
    }

    #[test]
    fn test_cli_install_requires_a_package() {
        assert!(Cli::try_parse_from(["pkgman", "install"]).is_err());
    }

    #[test]
    fn test_cli_sources_subcommands() {
        let cli = Cli::try_parse_from(["pkgman", "sources", "add", "https://a.example.org"]).unwrap();
        match cli.command {
            Commands::Sources {
                action: Some(SourcesCommand::Add { url }),
            } => assert_eq!(url, "https://a.example.org"),
            _ => panic!("Expected sources add"),
        }
    }
}
