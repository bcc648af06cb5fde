// ========================================================================================
//
//                       THE ENTRY POINT: PROGNOS
//
// ========================================================================================
//
// Resolves the run configuration and hands it to the pipeline. With no arguments the
// binary reads `ehr_data.csv`, `proms_data.csv`, `wearable_data.csv`, and
// `sdoh_data.csv` from the current directory and prints the accuracy line followed by
// the report confirmation. Diagnostics go to stderr through `env_logger`.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use prognos::config::PipelineConfig;
use prognos::pipeline::Pipeline;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process;

#[derive(Parser, Debug)]
#[clap(
    name = "prognos",
    version,
    about = "Predicts a clinical outcome from EHR, PROMs, wearable, and SDOH tables."
)]
struct Args {
    /// Directory holding the input tables. Relative input paths resolve against it.
    #[clap(default_value = ".")]
    data_dir: PathBuf,

    /// Optional TOML file overriding input names, imputation, and training settings.
    #[clap(long)]
    config: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match PipelineConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {e}");
                process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };
    config.inputs.resolve_against(&args.data_dir);
    log::info!("Running with configuration: {config:?}");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match Pipeline::new(config).run(&mut out) {
        Ok(summary) => {
            log::info!(
                "Run complete: {} test rows, accuracy {}",
                summary.test_rows,
                summary.accuracy
            );
            if let Err(e) = out.flush() {
                eprintln!("Error: could not flush output: {e}");
                process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    }
}
