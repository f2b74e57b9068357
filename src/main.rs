//! ag330 - AeroGennis A330-300 installer for X-Plane

use ag330::archive::{extract_archive, ExtractionTarget, Placement};
use ag330::catalog::{LiveryCatalog, CATALOG_FILE_NAME};
use ag330::console::ConsoleObserver;
use ag330::downloaders::{download_file, DownloadPolicy, HttpClient};
use ag330::installer::progress::spawn_consumer;
use ag330::installer::{
    BatchReport, InstallStatus, Installer, InstallerConfig, ProgressSink, UninstallReport,
};
use ag330::menu::{Menu, MenuAction};
use ag330::paths::RootValidator;
use ag330::settings::{Settings, SettingsStore};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ag330")]
#[command(version)]
#[command(about = "Installer and livery manager for the AeroGennis A330-300 in X-Plane")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to Ag330UpdaterConf.txt beside the executable)
    #[arg(long, global = true, env = "AG330_CONFIG")]
    config: Option<PathBuf>,

    /// Livery catalog file (defaults to LiveriesList.txt beside the settings)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// X-Plane directory for this run, without saving it
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Concurrent livery downloads
    #[arg(short = 'j', long, global = true)]
    concurrency: Option<usize>,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show X-Plane directory and aircraft status
    Status,

    /// Install or reinstall the aircraft package
    Install,

    /// Remove the aircraft package
    Uninstall {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage liveries
    Liveries {
        #[command(subcommand)]
        command: LiveryCommands,
    },

    /// Download the latest updater executable
    FetchUpdater {
        /// Target directory (defaults to the application directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show or change saved settings
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },

    /// Download a single URL from an allowed host
    Download {
        url: String,
        output: PathBuf,

        /// Continue a partial download
        #[arg(long)]
        resume: bool,

        /// Extra allowed host (replaces the default list)
        #[arg(long = "allow-host")]
        allow_hosts: Vec<String>,

        /// Permit plain http:// URLs
        #[arg(long)]
        allow_http: bool,
    },

    /// Extract a zip archive
    Extract {
        archive: PathBuf,
        destination: PathBuf,

        /// Place everything inside this folder
        #[arg(long, conflicts_with = "strip_prefix")]
        subfolder: Option<String>,

        /// Drop this leading folder from entry names
        #[arg(long)]
        strip_prefix: Option<String>,
    },

    /// Interactive menu (default when no command is given)
    Menu,
}

#[derive(Subcommand)]
enum LiveryCommands {
    /// List catalog and installed liveries
    List,

    /// Install liveries by catalog name
    Install {
        names: Vec<String>,

        /// Install every livery in the catalog
        #[arg(long)]
        all: bool,
    },

    /// Remove installed liveries by folder name
    Uninstall { names: Vec<String> },

    /// Download the latest livery list
    Update,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Save the X-Plane directory
    SetRoot { path: PathBuf },

    /// Save a manual aircraft directory
    SetOverride { path: PathBuf },

    /// Forget the manual aircraft directory
    ClearOverride,

    /// Save the language tag
    SetLanguage { language: String },
}

/// Shared state across commands
struct App {
    store: SettingsStore,
    settings: Settings,
    catalog_path: PathBuf,
    root_override: Option<PathBuf>,
    concurrency: Option<usize>,
    json: bool,
}

impl App {
    fn load(cli: &Cli) -> Result<Self> {
        let store = match &cli.config {
            Some(path) => SettingsStore::new(path),
            None => SettingsStore::beside_executable()?,
        };
        let settings = store.load();
        let catalog_path = match &cli.catalog {
            Some(path) => path.clone(),
            None => store
                .path()
                .parent()
                .map(|dir| dir.join(CATALOG_FILE_NAME))
                .unwrap_or_else(|| PathBuf::from(CATALOG_FILE_NAME)),
        };
        Ok(Self {
            store,
            settings,
            catalog_path,
            root_override: cli.root.clone(),
            concurrency: cli.concurrency,
            json: cli.json,
        })
    }

    fn installer_config(&self) -> InstallerConfig {
        let mut config = InstallerConfig::from_settings(&self.settings, &self.catalog_path);
        if let Some(root) = &self.root_override {
            config.root_path = Some(root.clone());
        }
        if let Some(n) = self.concurrency {
            config.concurrency = n;
        }
        config
    }

    fn installer(&self) -> Result<Installer> {
        Installer::new(self.installer_config())
    }

    fn save(&self) -> Result<()> {
        self.store.save(&self.settings)?;
        info!("Settings saved to {}", self.store.path().display());
        Ok(())
    }

    fn set_override(&mut self, path: Option<PathBuf>) -> Result<()> {
        self.settings.override_path = path;
        self.save()
    }

    fn catalog(&self) -> Result<LiveryCatalog> {
        LiveryCatalog::load(&self.catalog_path)
    }

    fn observer(&self) -> ConsoleObserver {
        if self.json {
            ConsoleObserver::hidden()
        } else {
            ConsoleObserver::new()
        }
    }

    /// Print `value` as JSON, or run `human` to print it for people
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            human(value);
        }
        Ok(())
    }
}

fn init_logging(cli: &Cli) -> Result<Option<WorkerGuard>> {
    let console = cli.verbose || std::env::var("RUST_LOG").is_ok();
    if !console && cli.log_file.is_none() {
        return Ok(None);
    }

    let level = if cli.verbose {
        "ag330=debug"
    } else if cli.log_file.is_some() {
        "ag330=info"
    } else {
        "ag330=warn"
    };
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);

    let console_layer = console.then(|| fmt::layer().with_writer(std::io::stderr));
    let (file_layer, guard) = match &cli.log_file {
        Some(path) => {
            let dir = match path.parent() {
                Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let name = path
                .file_name()
                .context("--log-file must name a file")?
                .to_os_string();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Drain the progress channel of a single-item flow and clear its bars
async fn finish_progress(sink: ProgressSink, consumer: JoinHandle<ConsoleObserver>) -> Result<()> {
    drop(sink);
    let mut observer = consumer.await.context("Progress consumer failed")?;
    observer.finish();
    Ok(())
}

fn print_status(status: &InstallStatus) {
    match (&status.root_path, &status.root) {
        (Some(path), Some(v)) if v.ok => println!("X-Plane directory: {} (ok)", path.display()),
        (Some(path), Some(v)) => {
            println!("X-Plane directory: {} (invalid)", path.display());
            for missing in &v.missing {
                println!("  missing: {}", missing);
            }
        }
        _ => println!("X-Plane directory: not set"),
    }
    let package = &status.package;
    match (&package.resolved_path, package.installed) {
        (Some(path), true) => println!(
            "Aircraft: installed at {} ({})",
            path.display(),
            ag330::installer::progress::format_bytes(package.size_on_disk)
        ),
        (Some(path), false) => println!(
            "Aircraft: incomplete at {} ({})",
            path.display(),
            ag330::installer::progress::format_bytes(package.size_on_disk)
        ),
        (None, _) => println!("Aircraft: not installed"),
    }
}

fn print_batch(report: &BatchReport) {
    if report.executed() == 0 {
        println!("No liveries were installed.");
    }
}

fn print_uninstall(report: &UninstallReport) {
    for name in &report.removed {
        println!("Removed {}", name);
    }
    for failure in &report.failed {
        println!("FAILED {}: {}", failure.id, failure.error);
    }
}

async fn install_package(app: &mut App) -> Result<()> {
    let mut installer = app.installer()?;
    let (sink, consumer) = spawn_consumer(app.observer());
    let result = installer.install_package(&sink).await;
    finish_progress(sink, consumer).await?;
    let probe = result?;

    app.set_override(installer.into_config().override_path)?;
    app.emit(&probe, |p| {
        if p.installed {
            println!("Aircraft installed.");
        } else {
            println!("Aircraft extracted, but the installation looks incomplete.");
        }
    })
}

async fn install_liveries(app: &App, names: Vec<String>, all: bool) -> Result<()> {
    let catalog = app.catalog()?;
    let names = if all {
        catalog.liveries().iter().map(|l| l.name.clone()).collect()
    } else {
        names
    };
    if names.is_empty() {
        bail!("No liveries given (pass names or --all)");
    }
    let (report, _) = app
        .installer()?
        .install_liveries(&names, &catalog, app.observer())
        .await?;
    app.emit(&report, print_batch)
}

async fn update_catalog(app: &App) -> Result<()> {
    let installer = app.installer()?;
    let (sink, consumer) = spawn_consumer(app.observer());
    let result = installer.update_catalog(&sink).await;
    finish_progress(sink, consumer).await?;
    let catalog = result?;
    app.emit(&catalog.liveries(), |l| println!("Livery list updated: {} entries", l.len()))
}

async fn fetch_updater(app: &App, dir: Option<PathBuf>) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None => ag330::settings::app_dir()?,
    };
    let installer = app.installer()?;
    let (sink, consumer) = spawn_consumer(app.observer());
    let result = installer.fetch_updater(&dir, &sink).await;
    finish_progress(sink, consumer).await?;
    let download = result?;
    app.emit(&download, |d| {
        println!("Saved {}", d.job.destination.display());
        println!("Close this program and run the new updater to finish.");
    })
}

fn uninstall_package(app: &mut App) -> Result<()> {
    let mut installer = app.installer()?;
    let removed = installer.uninstall_package()?;
    app.set_override(None)?;
    app.emit(&removed, |p| println!("Removed {}", p.display()))
}

fn confirm_on_stdin(question: &str) -> Result<bool> {
    let stdin = std::io::stdin();
    let mut menu = Menu::new(stdin.lock(), std::io::stdout());
    menu.confirm(question)
}

/// Keep asking for a root until it validates, then save it.
///
/// Returns `false` when input ends before a valid root is given.
fn ensure_root<R: std::io::BufRead, W: Write>(app: &mut App, menu: &mut Menu<R, W>) -> Result<bool> {
    let validator = RootValidator::default();
    let current = app
        .root_override
        .clone()
        .or_else(|| app.settings.root_path.clone());
    if let Some(root) = &current {
        if validator.validate(root).ok {
            return Ok(true);
        }
        writeln!(menu.output(), "Saved X-Plane directory {} is not valid.", root.display())?;
    }
    match menu.prompt_root(&validator)? {
        Some(root) => {
            app.root_override = None;
            app.settings.root_path = Some(root);
            app.save()?;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn run_menu(app: &mut App) -> Result<()> {
    let stdin = std::io::stdin();
    let mut menu = Menu::new(stdin.lock(), std::io::stdout());

    if !ensure_root(app, &mut menu)? {
        return Ok(());
    }

    loop {
        let action = menu.choose()?;
        let outcome = match action {
            MenuAction::Exit => return Ok(()),
            MenuAction::Status => app.installer()?.status().map(|s| print_status(&s)),
            MenuAction::InstallPackage => {
                let installed = app.installer()?.status()?.package.installed;
                if installed && !menu.confirm("The aircraft is already installed. Reinstall?")? {
                    continue;
                }
                install_package(app).await
            }
            MenuAction::InstallLiveries => {
                let catalog = match app.catalog() {
                    Ok(catalog) => catalog,
                    Err(e) => {
                        writeln!(menu.output(), "Error: {:#}", e)?;
                        continue;
                    }
                };
                let names: Vec<String> = catalog.liveries().iter().map(|l| l.name.clone()).collect();
                let picked = menu.select("Available liveries:", &names)?;
                if picked.is_empty() {
                    continue;
                }
                install_liveries(app, picked, false).await
            }
            MenuAction::UninstallLiveries => {
                let installer = app.installer()?;
                match installer.installed_liveries() {
                    Ok(installed) => {
                        let picked = menu.select("Installed liveries:", &installed)?;
                        if picked.is_empty() {
                            continue;
                        }
                        installer
                            .uninstall_liveries(&picked)
                            .map(|r| print_uninstall(&r))
                    }
                    Err(e) => Err(e),
                }
            }
            MenuAction::UpdateCatalog => update_catalog(app).await,
            MenuAction::FetchUpdater => fetch_updater(app, None).await,
            MenuAction::ChangeRoot => {
                let validator = RootValidator::default();
                match menu.prompt_root(&validator)? {
                    Some(root) => {
                        app.root_override = None;
                        app.settings.root_path = Some(root);
                        app.save()
                    }
                    None => return Ok(()),
                }
            }
            MenuAction::SetOverride => {
                let Some(line) = menu.prompt_line("Aircraft directory (empty to clear): ")? else {
                    return Ok(());
                };
                if line.is_empty() {
                    app.set_override(None)
                } else if Path::new(&line).is_dir() {
                    app.set_override(Some(PathBuf::from(line)))
                } else {
                    writeln!(menu.output(), "Not a directory: {}", line)?;
                    continue;
                }
            }
            MenuAction::UninstallPackage => {
                if !menu.confirm("Remove the aircraft and all its liveries?")? {
                    continue;
                }
                uninstall_package(app)
            }
        };
        if let Err(e) = outcome {
            writeln!(menu.output(), "Error: {:#}", e)?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(&cli)?;
    let mut app = App::load(&cli)?;

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Status => {
            let status = app.installer()?.status()?;
            app.emit(&status, print_status)?;
        }

        Commands::Install => install_package(&mut app).await?,

        Commands::Uninstall { yes } => {
            if !yes && !confirm_on_stdin("Remove the aircraft and all its liveries?")? {
                println!("Aborted.");
                return Ok(());
            }
            uninstall_package(&mut app)?;
        }

        Commands::Liveries { command } => match command {
            LiveryCommands::List => {
                #[derive(Serialize)]
                struct Listing {
                    catalog: Vec<String>,
                    installed: Vec<String>,
                }
                let catalog = app.catalog()?;
                let installed = app.installer()?.installed_liveries_if_present()?;
                let listing = Listing {
                    catalog: catalog.liveries().iter().map(|l| l.name.clone()).collect(),
                    installed,
                };
                app.emit(&listing, |l| {
                    println!("=== Catalog ({}) ===", l.catalog.len());
                    for name in &l.catalog {
                        let mark = if l.installed.contains(name) { "*" } else { " " };
                        println!(" {} {}", mark, name);
                    }
                    println!("\n=== Installed ({}) ===", l.installed.len());
                    for name in &l.installed {
                        println!("   {}", name);
                    }
                })?;
            }
            LiveryCommands::Install { names, all } => install_liveries(&app, names, all).await?,
            LiveryCommands::Uninstall { names } => {
                if names.is_empty() {
                    bail!("No liveries given");
                }
                let report = app.installer()?.uninstall_liveries(&names)?;
                app.emit(&report, print_uninstall)?;
            }
            LiveryCommands::Update => update_catalog(&app).await?,
        },

        Commands::FetchUpdater { dir } => fetch_updater(&app, dir).await?,

        Commands::Config { command } => {
            match command {
                None => {}
                Some(ConfigCommands::SetRoot { path }) => {
                    RootValidator::default().require(&path)?;
                    app.settings.root_path = Some(path);
                    app.save()?;
                }
                Some(ConfigCommands::SetOverride { path }) => {
                    if !path.is_dir() {
                        bail!("Not a directory: {}", path.display());
                    }
                    app.set_override(Some(path))?;
                }
                Some(ConfigCommands::ClearOverride) => app.set_override(None)?,
                Some(ConfigCommands::SetLanguage { language }) => {
                    app.settings.language = Some(language);
                    app.save()?;
                }
            }
            app.emit(&app.settings, |s| {
                let show = |p: &Option<PathBuf>| {
                    p.as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "(not set)".to_string())
                };
                println!("Settings file:      {}", app.store.path().display());
                println!("X-Plane directory:  {}", show(&s.root_path));
                println!("Language:           {}", s.language.as_deref().unwrap_or("(not set)"));
                println!("Aircraft directory: {}", show(&s.override_path));
            })?;
        }

        Commands::Download {
            url,
            output,
            resume,
            allow_hosts,
            allow_http,
        } => {
            let mut policy = if allow_hosts.is_empty() {
                DownloadPolicy::default()
            } else {
                DownloadPolicy::new(allow_hosts)
            };
            if allow_http {
                policy = policy.allow_plain_http();
            }
            let client = HttpClient::new(policy)?;
            let (sink, consumer) = spawn_consumer(app.observer());
            let result = download_file(&client, &url, &output, resume, &sink).await;
            finish_progress(sink, consumer).await?;
            let download = result?;
            app.emit(&download, |d| {
                println!(
                    "Downloaded {} to {}",
                    ag330::installer::progress::format_bytes(d.size),
                    d.job.destination.display()
                );
            })?;
        }

        Commands::Extract {
            archive,
            destination,
            subfolder,
            strip_prefix,
        } => {
            let placement = match (subfolder, strip_prefix) {
                (Some(name), _) => Placement::Subfolder(name),
                (None, Some(prefix)) => Placement::StripPrefix(prefix),
                (None, None) => Placement::Direct,
            };
            let target = ExtractionTarget::new(archive, destination).with_placement(placement);
            let (sink, consumer) = spawn_consumer(app.observer());
            let task_sink = sink.clone();
            let result = tokio::task::spawn_blocking(move || extract_archive(&target, &task_sink))
                .await
                .context("Extraction task failed")?;
            finish_progress(sink, consumer).await?;
            let stats = result?;
            app.emit(&stats, |s| {
                println!(
                    "Extracted {} files, {} directories ({})",
                    s.files,
                    s.directories,
                    ag330::installer::progress::format_bytes(s.bytes_written)
                );
            })?;
        }

        Commands::Menu => run_menu(&mut app).await?,
    }

    Ok(())
}
