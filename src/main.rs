//! demand-atlas entry point: CLI parsing, config loading and stage dispatch.

use std::process;

use demand_atlas::cli::parse_args;
use demand_atlas::config::PipelineConfig;
use demand_atlas::runner;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("error: {e}");
            demand_atlas::cli::print_usage();
            process::exit(2);
        }
    };

    let config = match opts.config.as_deref() {
        Some(path) => match PipelineConfig::from_toml_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("{e}");
                process::exit(1);
            }
        },
        None => PipelineConfig::default(),
    };

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("{e}");
        }
        process::exit(1);
    }

    if let Err(e) = runner::execute(&config, &opts) {
        log::error!("{e}");
        process::exit(1);
    }
}
