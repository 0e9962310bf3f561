use std::{
    fmt::Write as _,
    io::Write as _,
    path::PathBuf,
};

use anyhow::{bail, Result};
use branchcov_core::{init_tracing, CoverConfig, CoveredCode, CoverError, Evaluator};
use clap::{Arg, ArgMatches, Command};
use tracing::{debug, warn};

/// What to cover and how to print it
#[derive(Debug, Clone, PartialEq, Eq)]
struct Options {
    input: Input,
    lineno: usize,
    json: bool,
    instrumented: bool,
    debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    File(PathBuf),
    Inline(String),
}

fn main() -> Result<()> {
    let matches = command().get_matches();
    let options = options_from(&matches)?;
    init_tracing(options.debug);

    let outcome = run(&options)?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(outcome.rendered.as_bytes())?;
    stdout.flush()?;
    if let Some(error) = outcome.failure {
        eprintln!("{error}");
        std::process::exit(1);
    }
    Ok(())
}

fn command() -> Command {
    Command::new("branchcov")
        .version(branchcov_core::VERSION)
        .about("Branch-level coverage for Ruby code")
        .arg(
            Arg::new("file")
                .value_name("FILE")
                .help("Ruby file to run under coverage")
                .index(1)
                .conflicts_with("eval"),
        )
        .arg(
            Arg::new("eval")
                .short('e')
                .long("eval")
                .value_name("CODE")
                .help("Ruby code to run under coverage"),
        )
        .arg(
            Arg::new("lineno")
                .long("lineno")
                .value_name("LINE")
                .help("Line number of the first source line")
                .value_parser(clap::value_parser!(usize))
                .default_value("1"),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the coverage report as JSON")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("instrumented")
                .long("instrumented")
                .help("Print the instrumented source instead of running it")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .help("Log branchcov internals at debug level")
                .action(clap::ArgAction::SetTrue),
        )
}

fn options_from(matches: &ArgMatches) -> Result<Options> {
    let input = match (
        matches.get_one::<String>("file"),
        matches.get_one::<String>("eval"),
    ) {
        (Some(path), None) => Input::File(PathBuf::from(path)),
        (None, Some(code)) => Input::Inline(code.clone()),
        _ => bail!("expected a FILE or --eval CODE"),
    };

    Ok(Options {
        input,
        lineno: matches.get_one::<usize>("lineno").copied().unwrap_or(1),
        json: matches.get_flag("json"),
        instrumented: matches.get_flag("instrumented"),
        debug: matches.get_flag("debug"),
    })
}

/// Text to print, plus the program's own failure if it raised
struct Outcome {
    rendered: String,
    failure: Option<CoverError>,
}

fn run(options: &Options) -> Result<Outcome> {
    let builder = CoveredCode::builder()
        .config(CoverConfig::default())
        .lineno(options.lineno);
    let builder = match &options.input {
        Input::File(path) => builder.path(path),
        Input::Inline(code) => builder.source(code.clone()),
    };
    let mut unit = builder.build()?;
    debug!("Covering {}", unit.name());

    if options.instrumented {
        let mut rendered = unit.instrumented_source()?.to_string();
        if !rendered.ends_with('\n') {
            rendered.push('\n');
        }
        return Ok(Outcome {
            rendered,
            failure: None,
        });
    }

    let mut evaluator = Evaluator::with_registry(unit.registry().clone())?;
    let failure = match unit.execute(&mut evaluator) {
        Ok(()) => None,
        Err(error @ CoverError::Execution(_)) => {
            warn!("{} stopped early: {}", unit.name(), error);
            Some(error)
        }
        Err(error) => return Err(error.into()),
    };

    let mut rendered = String::new();
    if options.json {
        let report = unit.report()?;
        rendered.push_str(&serde_json::to_string_pretty(&report)?);
        rendered.push('\n');
    } else {
        rendered.push_str(&evaluator.output());
        let source = unit.buffer().source().to_string();
        for (line, marks) in source.lines().zip(unit.branch_coverage()?) {
            writeln!(rendered, "{line}")?;
            if !marks.trim().is_empty() {
                writeln!(rendered, "{marks}")?;
            }
        }
    }
    unit.purge();

    Ok(Outcome { rendered, failure })
}
