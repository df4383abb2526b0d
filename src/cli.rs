use std::env;
use std::path::PathBuf;

/// Pipeline stage selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Generate,
    Aggregate,
    Daily,
    Bind,
    Unify,
    Region { name: String },
    /// Generate, aggregate, daily series and bind, in that order.
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliOptions {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub resume: bool,
    pub refresh: bool,
    pub out: Option<PathBuf>,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    parse_args_from(args)
}

pub fn parse_args_from(args: Vec<String>) -> Result<CliOptions, String> {
    if args.is_empty() || (args.len() == 1 && (args[0] == "--help" || args[0] == "-h")) {
        print_usage();
        std::process::exit(if args.is_empty() { 1 } else { 0 });
    }
    parse_options(&args)
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut command = None;
    let mut config = None;
    let mut resume = false;
    let mut refresh = false;
    let mut out = None;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --config (expected a TOML file path)")?;
                if config.replace(PathBuf::from(path)).is_some() {
                    return Err("--config provided more than once".to_string());
                }
            }
            "--out" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --out (expected a file path)")?;
                if out.replace(PathBuf::from(path)).is_some() {
                    return Err("--out provided more than once".to_string());
                }
            }
            "--resume" => resume = true,
            "--refresh" => refresh = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            flag if flag.starts_with('-') => return Err(format!("unknown argument: {flag}")),
            word => {
                if command.is_some() {
                    return Err(format!("unexpected argument: {word}"));
                }
                command = Some(match word {
                    "generate" => Command::Generate,
                    "aggregate" => Command::Aggregate,
                    "daily" => Command::Daily,
                    "bind" => Command::Bind,
                    "unify" => Command::Unify,
                    "run" => Command::Run,
                    "region" => {
                        i += 1;
                        let name = args.next_or_err(i, "missing value for region (expected a region name)")?;
                        Command::Region { name: name.to_string() }
                    }
                    other => return Err(format!("unknown command: {other}")),
                });
            }
        }
        i += 1;
    }

    let command = command.ok_or_else(|| "missing command".to_string())?;

    if resume && !matches!(command, Command::Generate | Command::Run) {
        return Err("--resume only applies to `generate` and `run`".to_string());
    }
    if out.is_some() && matches!(command, Command::Run) {
        return Err("--out cannot be combined with `run`; set output paths in the config".to_string());
    }

    Ok(CliOptions {
        command,
        config,
        resume,
        refresh,
        out,
    })
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index).map(String::as_str).ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  demand-atlas <command> [--config <path>] [--out <path>] [--resume] [--refresh]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  generate         Simulate every unit and write checkpoints");
    eprintln!("  aggregate        Roll checkpoints up into per-unit statistics");
    eprintln!("  daily            Collect the daily-average profiles");
    eprintln!("  bind             Join normalized statistics onto the geometry");
    eprintln!("  unify            Merge geographic layers into one web-map layer");
    eprintln!("  region <name>    Print one region of the unified layer as CSV");
    eprintln!("  run              generate, aggregate, daily and bind in sequence");
    eprintln!();
    eprintln!("Without --config, built-in defaults are used.");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn supports_config_cli() {
        let opts = parse_args_from(args(&["generate", "--config", "atlas.toml", "--resume"]))
            .expect("parse should succeed");
        assert_eq!(opts.command, Command::Generate);
        assert_eq!(opts.config.as_deref().and_then(|p| p.to_str()), Some("atlas.toml"));
        assert!(opts.resume);
        assert!(!opts.refresh);
    }

    #[test]
    fn region_takes_a_name() {
        let opts = parse_args_from(args(&["--out", "ikeja.csv", "region", "Ikeja"])).expect("parse should succeed");
        assert_eq!(opts.command, Command::Region { name: "Ikeja".to_string() });
        assert_eq!(opts.out, Some(PathBuf::from("ikeja.csv")));
    }

    #[test]
    fn rejects_duplicate_config() {
        let err = parse_args_from(args(&["bind", "--config", "a.toml", "--config", "b.toml"]));
        assert_eq!(err, Err("--config provided more than once".to_string()));
    }

    #[test]
    fn rejects_missing_values_and_unknown_input() {
        assert!(parse_args_from(args(&["region"])).is_err());
        assert!(parse_args_from(args(&["aggregate", "--config"])).is_err());
        assert!(parse_args_from(args(&["plot"])).is_err());
        assert!(parse_args_from(args(&["bind", "--verbose"])).is_err());
        assert!(parse_args_from(args(&["bind", "unify"])).is_err());
        assert!(parse_args_from(args(&["--refresh"])).is_err());
    }

    #[test]
    fn resume_only_for_generation() {
        assert!(parse_args_from(args(&["run", "--resume", "--refresh"])).is_ok());
        assert!(parse_args_from(args(&["aggregate", "--resume"])).is_err());
    }
}
