use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use softshelf::app::{
    Action, ActionKind, ActionReport, App, CatalogResult, InstallTarget, ListResult,
    NullProgress, ProgressSinkKind,
};
use softshelf::artifact::ArtifactPipeline;
use softshelf::config::{ConfigLoader, ResolvedConfig};
use softshelf::domain::{InstalledRecord, PackageId};
use softshelf::error::{ErrorCategory, ShelfError};
use softshelf::fs_util::ArchivePathPolicy;
use softshelf::output::{ActionOutcome, BatchResult, JsonOutput, OutputMode, category_message};
use softshelf::remote::HttpStoreClient;
use softshelf::shortcut::{ShortcutIntegration, shortcuts_for};
use softshelf::store::RecordStore;
use softshelf::tui::Tui;

type ShelfApp = App<HttpStoreClient, HttpStoreClient, Box<dyn ShortcutIntegration>>;

#[derive(Parser)]
#[command(name = "softshelf")]
#[command(about = "Install, update and remove applications from a remote software catalog")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    /// Install root for this invocation, overriding the config.
    #[arg(long, global = true)]
    install_root: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Show the remote catalog with local install state")]
    Catalog,
    #[command(about = "List installed packages")]
    List,
    #[command(about = "Show the ledger record of an installed package")]
    Info(InfoArgs),
    #[command(about = "Install packages from the catalog")]
    Install(PackageArgs),
    #[command(about = "Update packages (all outdated ones when no id is given)")]
    Update(UpdateArgs),
    #[command(about = "Remove installed packages", alias = "delete")]
    Remove(PackageArgs),
}

#[derive(Args)]
struct InfoArgs {
    id: String,
}

#[derive(Args)]
struct PackageArgs {
    #[arg(required = true)]
    ids: Vec<String>,
}

#[derive(Args)]
struct UpdateArgs {
    ids: Vec<String>,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<ShelfError>() {
                return ExitCode::from(map_exit_code(err.category()));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(category: ErrorCategory) -> u8 {
    match category {
        ErrorCategory::NotFound => 2,
        ErrorCategory::NetworkFailure => 3,
        ErrorCategory::DecodeFailure | ErrorCategory::StoreCorrupt => 4,
        ErrorCategory::FilesystemFailure => 5,
        ErrorCategory::Integration | ErrorCategory::Usage => 1,
    }
}

fn run() -> miette::Result<u8> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let target = InstallTarget::new(
        cli.install_root
            .clone()
            .unwrap_or_else(|| config.install_root.clone()),
    );
    let app = build_app(&config)?;

    match cli.command {
        Command::Catalog => {
            let result = app.overview(&NullProgress)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_catalog(&result).into_diagnostic()?,
                OutputMode::Interactive => print_catalog(&result),
            }
            Ok(0)
        }
        Command::List => {
            let result = app.installed()?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_list(&result).into_diagnostic()?,
                OutputMode::Interactive => print_list(&result),
            }
            Ok(0)
        }
        Command::Info(args) => {
            let id: PackageId = args.id.parse()?;
            let record = app.info(&id)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_info(&record).into_diagnostic()?,
                OutputMode::Interactive => print_record(&record),
            }
            Ok(0)
        }
        Command::Install(args) => {
            let ids = parse_ids(&args.ids)?;
            let actions = app
                .catalog_entries(&ids)?
                .into_iter()
                .map(Action::Install)
                .collect();
            run_actions(app, actions, target, ProgressSinkKind::Install, output_mode)
        }
        Command::Update(args) => {
            let entries = if args.ids.is_empty() {
                app.outdated()?
            } else {
                app.catalog_entries(&parse_ids(&args.ids)?)?
            };
            if entries.is_empty() {
                match output_mode {
                    OutputMode::NonInteractive => {
                        JsonOutput::print_batch(&BatchResult::default()).into_diagnostic()?
                    }
                    OutputMode::Interactive => println!("everything is up to date"),
                }
                return Ok(0);
            }
            let actions = entries.into_iter().map(Action::Update).collect();
            run_actions(app, actions, target, ProgressSinkKind::Update, output_mode)
        }
        Command::Remove(args) => {
            let actions = parse_ids(&args.ids)?
                .into_iter()
                .map(Action::Delete)
                .collect();
            run_actions(app, actions, target, ProgressSinkKind::Remove, output_mode)
        }
    }
}

fn build_app(config: &ResolvedConfig) -> miette::Result<ShelfApp> {
    let client = HttpStoreClient::new(&config.base_url, config.timeout)?;
    let policy = if config.harden_archive_paths {
        ArchivePathPolicy::Hardened
    } else {
        ArchivePathPolicy::Lenient
    };
    Ok(App::new(
        RecordStore::new(config.ledger_path.clone()),
        client.clone(),
        ArtifactPipeline::new(client, policy),
        shortcuts_for(config.shortcut_dir.as_deref()),
    ))
}

fn parse_ids(values: &[String]) -> Result<Vec<PackageId>, ShelfError> {
    values.iter().map(|value| value.parse()).collect()
}

fn run_actions(
    app: ShelfApp,
    actions: Vec<Action>,
    target: InstallTarget,
    kind: ProgressSinkKind,
    output_mode: OutputMode,
) -> miette::Result<u8> {
    let labels: Vec<_> = actions
        .iter()
        .map(|action| (action.id().clone(), action.kind()))
        .collect();

    let results = match output_mode {
        OutputMode::NonInteractive => app.run_batch(&actions, &target, &JsonOutput),
        OutputMode::Interactive => {
            let mut tui = Tui::new(kind);
            tui.run(move |sink| Ok(app.run_batch(&actions, &target, sink)))?
        }
    };

    let exit_code = results
        .iter()
        .find_map(|result| result.as_ref().err())
        .map(|err| map_exit_code(err.category()))
        .unwrap_or(0);

    if matches!(output_mode, OutputMode::Interactive) {
        for ((id, _), result) in labels.iter().zip(&results) {
            match result {
                Ok(report) => print_report(report),
                Err(err) => eprintln!("\x1b[31mx {id}: {}\x1b[0m", category_message(err)),
            }
        }
    }

    let batch = BatchResult {
        outcomes: labels
            .into_iter()
            .zip(results)
            .map(|((id, action), result)| ActionOutcome::new(id, action, result))
            .collect(),
    };
    if matches!(output_mode, OutputMode::NonInteractive) {
        JsonOutput::print_batch(&batch).into_diagnostic()?;
    } else if batch.failed() > 0 {
        eprintln!("{} of {} actions failed", batch.failed(), batch.outcomes.len());
    }
    Ok(exit_code)
}

fn print_report(report: &ActionReport) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";
    let record = &report.record;
    let verb = match report.action {
        ActionKind::Install => "installed",
        ActionKind::Update => "updated",
        ActionKind::Delete => "removed",
    };
    println!(
        "{green}+ {} {} {verb}{reset} ({})",
        record.id, record.version, record.dir_path
    );
    if let Some(warning) = &report.shortcut_warning {
        println!("{yellow}  ! shortcut: {warning}{reset}");
    }
}

fn print_catalog(result: &CatalogResult) {
    if result.packages.is_empty() {
        println!("catalog is empty");
        return;
    }
    for package in &result.packages {
        let installed = package
            .installed_version
            .as_deref()
            .map(|version| format!(" (installed {version})"))
            .unwrap_or_default();
        println!(
            "{:<20} {:<28} {:<10} {}{installed}",
            package.id.as_str(),
            package.name,
            package.version,
            package.state.to_string()
        );
    }
}

fn print_list(result: &ListResult) {
    if result.installed.is_empty() {
        println!("no packages installed");
        return;
    }
    for record in &result.installed {
        println!(
            "{:<20} {:<28} {:<10} {}",
            record.id.as_str(),
            record.name,
            record.version,
            record.dir_path
        );
    }
}

fn print_record(record: &InstalledRecord) {
    println!("id:        {}", record.id);
    println!("name:      {}", record.name);
    println!("version:   {}", record.version);
    println!("directory: {}", record.dir_path);
    println!("main file: {}", record.main_file_path());
    println!("icon:      {}", record.icon_file_path());
    println!("installed: {}", record.download_date);
}
