/*!
# Introduction

kea-committer brings Kea's configuration documents in line with a batch of desired records.

`kea-committer apply` reads a JSON array of records from `--records` (or stdin), for example:

```json
[
  {"kind": "dhcp4-server", "name": "dhcp4", "options": [{"name": "domain-name", "data": "example.com"}]},
  {"kind": "dhcp4-scope", "name": "office", "subnet": "192.0.2.0/24", "pools": ["192.0.2.100 - 192.0.2.199"]},
  {"kind": "dhcp4-reservation", "name": "printer", "identifier-type": "hw-address",
   "identifier": "00:11:22:33:44:55", "ip-address": "192.0.2.10"}
]
```

Each document that changed is written to a staging directory, checked with the daemon's own
`-t` mode, and only then swapped in.
Records of a family whose server record is part of the batch are committed together, once.
A JSON report with each record's outcome and stored state is printed to stdout; the program
exits non-zero if any record or commit failed.

With `--dry-run`, documents are staged and checked but never replaced.

`kea-committer list --family dhcp4` prints every record found in a document.

The TOML configuration (`--config-path`, default `/etc/kea-committer.toml`) can set document
paths, validator commands, the validator timeout, and the identity tag key.
*/

#[macro_use]
extern crate log;

use argh::FromArgs;
use keastore::{CommandValidator, Config, DesiredRecord, DocumentFamily, Reconciler};
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, TermLogger, TerminalMode};
use snafu::{ensure, ResultExt};
use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

type Result<T> = std::result::Result<T, error::Error>;

/// Stores user-supplied global arguments
#[derive(FromArgs, Debug)]
struct Args {
    /// log-level trace|debug|info|warn|error
    #[argh(option, default = "LevelFilter::Info", short = 'l')]
    log_level: LevelFilter,
    /// path to the kea-committer TOML configuration
    #[argh(
        option,
        default = "PathBuf::from(constants::DEFAULT_CONFIG_FILE)",
        short = 'c'
    )]
    config_path: PathBuf,
    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Subcommand {
    Apply(ApplyArgs),
    List(ListArgs),
}

/// Reconciles a batch of desired records
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "apply")]
struct ApplyArgs {
    /// JSON file with the desired records; '-' or absent reads stdin
    #[argh(option, short = 'r')]
    records: Option<PathBuf>,
    /// stage and validate documents without replacing them
    #[argh(switch)]
    dry_run: bool,
}

/// Lists the records stored in a document
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "list")]
struct ListArgs {
    /// document family: dhcp4, dhcp6, or ddns
    #[argh(option, short = 'f')]
    family: DocumentFamily,
    /// document to read; defaults to the configured path for the family
    #[argh(option, short = 'p')]
    path: Option<PathBuf>,
}

fn setup_logger(args: &Args) -> Result<()> {
    // stdout carries the report, so all logging goes to stderr
    TermLogger::init(
        args.log_level,
        LogConfig::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context(error::LoggerSnafu)
}

/// Reads the records to apply from a file, or stdin.
fn read_records(source: Option<&PathBuf>) -> Result<Vec<DesiredRecord>> {
    let (name, text) = match source.filter(|path| path.as_os_str() != "-") {
        Some(path) => {
            let text = fs::read_to_string(path).context(error::RecordsReadSnafu {
                source_name: path.display().to_string(),
            })?;
            (path.display().to_string(), text)
        }
        None => {
            let mut text = String::new();
            io::stdin()
                .read_to_string(&mut text)
                .context(error::RecordsReadSnafu {
                    source_name: "stdin",
                })?;
            ("stdin".to_string(), text)
        }
    };
    serde_json::from_str(&text).context(error::RecordsParseSnafu { source_name: name })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context(error::ReportSnafu)?;
    println!("{}", output);
    Ok(())
}

fn apply(config: Config, args: ApplyArgs) -> Result<()> {
    let records = read_records(args.records.as_ref())?;
    info!("Reconciling {} records", records.len());

    let validator = CommandValidator::from_config(&config);
    let mut reconciler = Reconciler::new(config, validator);
    reconciler.set_dry_run(args.dry_run);
    let report = reconciler.run(&records);
    print_json(&report)?;

    let failures = report.failures();
    ensure!(failures == 0, error::FailuresSnafu { failures });
    Ok(())
}

fn list(config: Config, args: ListArgs) -> Result<()> {
    let validator = CommandValidator::from_config(&config);
    let mut reconciler = Reconciler::new(config, validator);
    let listings = reconciler
        .list(args.family, args.path.as_deref())
        .context(error::ListSnafu {
            family: args.family,
        })?;
    print_json(&listings)
}

fn run() -> Result<()> {
    let args: Args = argh::from_env();
    setup_logger(&args)?;

    let config = Config::load(&args.config_path).context(error::ConfigSnafu {
        path: &args.config_path,
    })?;
    debug!("Loaded configuration: {:?}", config);

    match args.subcommand {
        Subcommand::Apply(apply_args) => apply(config, apply_args),
        Subcommand::List(list_args) => list(config, list_args),
    }
}

fn main() {
    if let Err(e) = run() {
        error!("{}", e);
        process::exit(1);
    }
}

mod error {
    use keastore::DocumentFamily;
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display("Failed to load configuration '{}': {}", path.display(), source))]
        Config {
            path: PathBuf,
            source: keastore::Error,
        },

        #[snafu(display("Failed to read records from {}: {}", source_name, source))]
        RecordsRead {
            source_name: String,
            source: std::io::Error,
        },

        #[snafu(display("Invalid records in {}: {}", source_name, source))]
        RecordsParse {
            source_name: String,
            source: serde_json::Error,
        },

        #[snafu(display("Failed to list {} records: {}", family, source))]
        List {
            family: DocumentFamily,
            source: keastore::Error,
        },

        #[snafu(display("Failed to serialize report: {}", source))]
        Report { source: serde_json::Error },

        #[snafu(display("{} records or commits failed, see report", failures))]
        Failures { failures: usize },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use keastore::RecordKind;

    #[test]
    fn records_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        fs::write(
            &path,
            r#"[{"kind": "dhcp4-scope", "name": "office", "subnet": "192.0.2.0/24"},
                {"kind": "tsig-key", "name": "k", "ensure": "absent",
                 "key-name": "k.", "algorithm": "HMAC-SHA256", "secret": "c2VjcmV0"}]"#,
        )
        .unwrap();
        let records = read_records(Some(&path)).unwrap();
        let kinds: Vec<_> = records.iter().map(DesiredRecord::kind).collect();
        assert_eq!(kinds, vec![RecordKind::Dhcp4Scope, RecordKind::TsigKey]);
    }

    #[test]
    fn bad_records_named() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        fs::write(&path, r#"{"kind": "dhcp4-scope"}"#).unwrap();
        let err = read_records(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("records.json"));
    }

    #[test]
    fn misspelled_field_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("records.json");
        fs::write(
            &path,
            r#"[{"kind": "dhcp4-scope", "name": "office", "subnet": "192.0.2.0/24",
                 "pool": ["192.0.2.10 - 192.0.2.20"]}]"#,
        )
        .unwrap();
        let err = read_records(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("pool"), "{}", err);
    }
}
