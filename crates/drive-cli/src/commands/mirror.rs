//! Mirror command implementation

use colored::Colorize;
use drive_core::report::format_diff;
use drive_core::{
    DiffEvent, DiffOp, DriveStore, DrivesConfig, Error as CoreError, MirrorObserver, MirrorSession,
    Summary, parse_version,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::notice_storage;
use crate::error::Result;

/// Arguments of the mirror command
#[derive(Debug, Clone, Default)]
pub struct MirrorArgs {
    pub src: String,
    pub dst: Option<String>,
    pub live: bool,
    pub checkout: Option<String>,
    pub prefix: Option<String>,
    pub filter: Vec<String>,
    pub dry_run: bool,
}

/// Prints diff lines and the first summary to the terminal.
struct ConsoleObserver {
    live: bool,
}

impl MirrorObserver for ConsoleObserver {
    fn on_diff(&self, event: &DiffEvent) {
        let line = format_diff(event);
        let line = match event.op {
            DiffOp::Add => line.green(),
            DiffOp::Remove => line.red(),
            DiffOp::Change => line.yellow(),
        };
        println!("{line}");
    }

    fn on_summary(&self, summary: &Summary) {
        if summary.count.has_changes() {
            println!();
        }
        println!("{} {}", "OK".green().bold(), summary);
        if self.live {
            println!();
        }
    }

    fn on_error(&self, error: &CoreError) {
        eprintln!("{}: {}", "warning".yellow().bold(), error);
    }
}

/// Run the mirror command
///
/// Command line flags add to the `[mirror]` section of the config file.
pub async fn run_mirror(store: &DriveStore, args: MirrorArgs, config: DrivesConfig) -> Result<()> {
    let mut options = config.mirror;
    options.live |= args.live;
    options.dry_run |= args.dry_run;
    if args.prefix.is_some() {
        options.prefix = args.prefix;
    }
    options.filter.extend(args.filter);
    if let Some(raw) = &args.checkout {
        options.version = Some(parse_version(raw)?);
    }

    notice_storage(store, &[Some(&args.src), args.dst.as_deref()]);

    let session = MirrorSession::open(store, &args.src, args.dst.as_deref(), &options, config.watch).await?;
    println!("{} {}", "Source:".dimmed(), session.source().label());
    println!("{} {}", "Destination:".dimmed(), session.destination().label().magenta());
    if options.dry_run {
        println!("{}", "Dry run, nothing will be written.".yellow());
    }
    println!();

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let observer = ConsoleObserver { live: options.live };
    let report = session.run(&observer, cancel).await?;
    debug!(
        passes = report.passes,
        stopped = report.stopped,
        add = report.total.add,
        remove = report.total.remove,
        change = report.total.change,
        "Mirror finished"
    );
    Ok(())
}
