use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use rtstructreg::config::Settings;
use rtstructreg::entry::{run_batch, run_transform};
use rtstructreg::io::batch::{read_batch_csv, BatchJob};
use rtstructreg::io::RecordFormat;
use rtstructreg::logging::{init_logging, level_for_verbosity};
use rtstructreg::processing::structure::StructureTransformer;

/// Apply a spatial registration to an RT structure set.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Structure set to transform
    #[arg(long)]
    rtstruct: Option<PathBuf>,

    /// Registration record holding the matrix
    #[arg(long)]
    reg: Option<PathBuf>,

    /// Output file, e.g. transformed_20240115_patientA.dcm
    #[arg(long)]
    out: Option<PathBuf>,

    /// Structure set whose frame-of-reference linkage is copied
    #[arg(long)]
    ref_rtstruct: Option<PathBuf>,

    /// CSV with columns rtstruct,reg,out[,ref_rtstruct]
    #[arg(long, conflicts_with_all = ["rtstruct", "reg", "out", "ref_rtstruct"])]
    batch: Option<PathBuf>,

    /// Record format: dicom or json
    #[arg(long)]
    format: Option<RecordFormat>,

    /// TOML settings file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Explicit tracing filter, overrides -v and the config file
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => match Settings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::from(2);
            }
        },
        None => Settings::default(),
    };

    let directive = cli
        .log_level
        .clone()
        .or_else(|| (cli.verbose == 0).then(|| settings.logging.level.clone()).flatten())
        .unwrap_or_else(|| level_for_verbosity(cli.verbose).to_string());
    if let Err(e) = init_logging(&directive) {
        eprintln!("{e:#}");
    }

    let uids = match settings.uid_generator() {
        Ok(uids) => uids,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(2);
        }
    };
    let transformer = StructureTransformer::new(uids);
    let format = cli.format.unwrap_or(settings.format);
    let store = format.store();
    info!(%format, "record format");

    if let Some(batch) = &cli.batch {
        let units = match read_batch_csv(batch) {
            Ok(units) => units,
            Err(e) => {
                error!("{e:#}");
                return ExitCode::FAILURE;
            }
        };
        let summary = run_batch(store.as_ref(), &transformer, units);
        println!("{summary}");
        return ExitCode::SUCCESS;
    }

    let (rtstruct, reg, out) = match (&cli.rtstruct, &cli.reg, &cli.out) {
        (Some(rtstruct), Some(reg), Some(out)) => (rtstruct, reg, out),
        _ => {
            let missing: Vec<&str> = [
                ("--rtstruct", cli.rtstruct.is_none()),
                ("--reg", cli.reg.is_none()),
                ("--out", cli.out.is_none()),
            ]
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(flag, _)| *flag)
            .collect();
            eprintln!("missing arguments: {} (or use --batch <csv>)", missing.join(" "));
            return ExitCode::from(2);
        }
    };

    let job = BatchJob {
        rtstruct: rtstruct.clone(),
        reg: reg.clone(),
        out: out.clone(),
        ref_rtstruct: cli.ref_rtstruct.clone(),
    };
    match run_transform(store.as_ref(), &transformer, &job) {
        Ok(outcome) => {
            println!(
                "wrote {} ({} contours transformed)",
                job.out.display(),
                outcome.report.changed_contours
            );
        }
        Err(e) => error!("{e:#}"),
    }
    ExitCode::SUCCESS
}
