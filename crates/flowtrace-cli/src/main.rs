//! Command-line interface: record a script and write the graph as GraphML.

use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use flowtrace::{
    AnnotationDb, Config, RecordOptions, Recording, RemoteAnnotationDb, record_script,
    write_graphml,
};
use log::debug;

/// Record an object flow graph from a Python program.
#[derive(Debug, Parser)]
#[command(name = "flowtrace", version, about)]
struct Cli {
    /// Program to execute and record.
    script: PathBuf,

    /// Write the GraphML output here instead of standard output.
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Configuration file with the annotation-store base URL.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Do not capture annotated object slots.
    #[arg(long)]
    no_slots: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load(cli.config.as_deref())?;
    debug!("annotation store: {:?}", config.api_url);
    let db: Box<dyn AnnotationDb> = Box::new(RemoteAnnotationDb::from_config(&config));

    let options = RecordOptions {
        db,
        store_slots: !cli.no_slots,
        ..RecordOptions::default()
    };
    let Recording { graph, .. } = record_script(&cli.script, options)?;

    match &cli.out {
        Some(path) => {
            let mut file = File::create(path)?;
            write_graphml(&graph, &mut file)?;
        }
        None => {
            let stdout = std::io::stdout();
            let mut handle = stdout.lock();
            write_graphml(&graph, &mut handle)?;
        }
    }
    Ok(())
}
