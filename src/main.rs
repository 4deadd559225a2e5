use clap::{Parser, Subcommand};
use sitegraph::{config, output, site::Site};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sitegraph")]
#[command(about = "Static site generator built around a cross-referenced content graph")]
#[command(long_about = "\
Static site generator built around a cross-referenced content graph

Every file below the content directory becomes a page. Markdown files are
rendered, everything else is copied through. Directories without an index
page get a generated listing.

Project structure:

  project/
  ├── sitegraph.toml               # Settings (optional)
  ├── content/
  │   ├── .sitegraph               # Directory config: rules, ignores, metadata
  │   ├── index.md                 # Home page; its title names the site
  │   ├── about.md                 # → about/index.html
  │   └── blog/
  │       ├── .sitegraph           # e.g. files: {\"*.md\": {author: Ann}}
  │       ├── first.md             # tags: [rust] → tags/rust/index.html
  │       └── photo.jpg            # copied through
  └── web/                         # Output; stale files are removed

Metadata resolution (first available wins):
  Page front matter → matching `files:` rule → directory metadata
  → inherited from the parent directory

Run 'sitegraph gen-config' to generate a documented sitegraph.toml.")]
#[command(version)]
struct Cli {
    /// Project directory holding sitegraph.toml
    #[arg(long, default_value = ".", global = true)]
    project: PathBuf,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load the site and write it to the output directory
    Build {
        /// Output directory, overriding the configured one
        #[arg(long)]
        output: Option<PathBuf>,

        /// Disable the render cache
        #[arg(long)]
        no_cache: bool,

        /// Publish pages dated in the future
        #[arg(long)]
        draft: bool,
    },
    /// Load the site and print its page tree without writing anything
    Check,
    /// Print a stock sitegraph.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Build {
            output: output_override,
            no_cache,
            draft,
        } => {
            let mut settings = config::load_config(&cli.project)?;
            if draft {
                settings.draft = true;
            }
            if no_cache {
                settings.cache_rebuilds = false;
            }
            init_thread_pool(&settings.render);

            let mut site = Site::with_default_features(settings, &cli.project)?;
            println!("==> Loading {}", site.content_dir().display());
            site.load()?;

            let output_dir = output_override.unwrap_or_else(|| site.output_dir());
            println!("==> Writing {}", output_dir.display());
            let caches = site.caches();
            let report = site.write(&output_dir, &caches)?;
            output::print_build_report(&report);
            if report.failed > 0 {
                return Err(format!("{} page(s) failed to render", report.failed).into());
            }
            println!("==> Build complete: {}", output_dir.display());
        }
        Command::Check => {
            let settings = config::load_config(&cli.project)?;
            let mut site = Site::with_default_features(settings, &cli.project)?;
            println!("==> Checking {}", site.content_dir().display());
            site.load()?;
            output::print_features(site.features());
            println!();
            output::print_tree(site.graph());
            println!("==> Content is valid");
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` when set.
fn init_tracing(verbose: bool) {
    let default = if verbose { "sitegraph=debug" } else { "sitegraph=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize the rayon thread pool based on render config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(render: &config::RenderConfig) {
    let threads = config::effective_threads(render);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
