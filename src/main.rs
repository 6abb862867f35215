use std::fs::File;
use std::io::{self, BufRead, Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use rox::ast_printer::AstPrinter;
use rox::error::LoxError;
use rox::interpreter::Interpreter;
use rox::lox::{Lox, RunOutcome};
use rox::parser::Parser;
use rox::resolver::Resolver;
use rox::scanner::{scan_tokens, Scanner};

/// Exit status for lexical, syntax and resolution errors.
const EXIT_STATIC_ERROR: i32 = 65;

/// Exit status for runtime errors.
const EXIT_RUNTIME_ERROR: i32 = 70;

#[derive(ClapParser, Debug)]
#[command(version, about = "Lox language interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input, printing each token
    Tokenize {
        filename: Option<PathBuf>,

        /// Print the tokens as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Parses input as a single expression and prints its AST
    Parse { filename: Option<PathBuf> },

    /// Evaluates input as a single expression and prints the result
    Evaluate { filename: Option<PathBuf> },

    /// Runs input as a Lox program
    Run { filename: Option<PathBuf> },

    /// Reads lines from standard input and runs each in one session
    Repl,
}

/// Reads the source text from `filename`, or from stdin if none was given.
fn read_source(filename: Option<PathBuf>) -> Result<String> {
    let Some(filename) = filename else {
        info!("Reading source from stdin");
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        return Ok(buf);
    };

    info!("Reading file: {:?}", filename);
    let file = File::open(&filename).context(format!("Failed to open file {:?}", filename))?;

    let len = file
        .metadata()
        .context(format!("Failed to stat file {:?}", filename))?
        .len();

    // Zero-length files cannot be mapped.
    if len == 0 {
        info!("{:?} is empty", filename);
        return Ok(String::new());
    }

    // SAFETY: the mapping is read-only and copied out before it is dropped.
    let map = unsafe { Mmap::map(&file) }.context(format!("Failed to map file {:?}", filename))?;

    let source = std::str::from_utf8(&map)
        .context(format!("{:?} is not valid UTF-8", filename))?
        .to_owned();

    info!("Read {} bytes from {:?}", source.len(), filename);

    Ok(source)
}

fn init_logger() -> Result<()> {
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    // `[module:line] - message`, default Debug, RUST_LOG wins when set
    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            writeln!(
                buf,
                "[{}:{}] - {}",
                module.strip_prefix("rox::").unwrap_or(module),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

fn report(errors: &[LoxError]) {
    for e in errors {
        debug!("Reporting: {:?}", e);
        eprintln!("{}", e);
    }
}

fn tokenize(source: &str, json: bool) -> Result<()> {
    if json {
        let (tokens, errors) = scan_tokens(source);
        report(&errors);

        println!(
            "{}",
            serde_json::to_string_pretty(&tokens).context("Failed to serialize tokens")?
        );

        if !errors.is_empty() {
            process::exit(EXIT_STATIC_ERROR);
        }

        return Ok(());
    }

    let mut tokenized = true;

    for token in Scanner::new(source) {
        match token {
            Ok(token) => println!("{}", token),

            Err(e) => {
                tokenized = false;
                eprintln!("{}", e);
            }
        }
    }

    if !tokenized {
        debug!("Tokenization failed, exiting with code {}", EXIT_STATIC_ERROR);
        process::exit(EXIT_STATIC_ERROR);
    }

    info!("Tokenization completed successfully");
    Ok(())
}

/// Scan and parse exactly one expression, exiting on any static error.
fn parse_single(source: &str) -> rox::ast::Expr {
    let (tokens, errors) = scan_tokens(source);

    let parsed = Parser::new(tokens).parse_expression();

    if !errors.is_empty() {
        report(&errors);
        if let Err(e) = &parsed {
            report(std::slice::from_ref(e));
        }
        process::exit(EXIT_STATIC_ERROR);
    }

    match parsed {
        Ok(expr) => expr,
        Err(e) => {
            report(&[e]);
            process::exit(EXIT_STATIC_ERROR);
        }
    }
}

fn evaluate(source: &str) {
    let expr = parse_single(source);
    let mut interpreter = Interpreter::new();

    match Resolver::new().resolve_expression(&expr) {
        Ok(bindings) => interpreter.add_bindings(bindings),
        Err(errors) => {
            report(&errors);
            process::exit(EXIT_STATIC_ERROR);
        }
    }

    match interpreter.evaluate(&expr) {
        Ok(value) => println!("{}", value),

        Err(e) => {
            report(&[e]);
            process::exit(EXIT_RUNTIME_ERROR);
        }
    }
}

fn exit_code(outcome: &RunOutcome) -> Option<i32> {
    if outcome.had_static_error {
        Some(EXIT_STATIC_ERROR)
    } else if outcome.had_runtime_error {
        Some(EXIT_RUNTIME_ERROR)
    } else {
        None
    }
}

fn repl() -> Result<()> {
    let mut lox = Lox::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line.context("Failed to read from stdin")?;

        if line.trim().is_empty() {
            continue;
        }

        let outcome = lox.run_repl(&line);
        report(&outcome.diagnostics);

        if let Some(value) = outcome.value {
            println!("{}", value);
        }
    }

    info!("REPL session ended");
    Ok(())
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    if args.log {
        init_logger()?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    info!("CLI arguments: {:?}", args);

    match args.commands {
        Commands::Tokenize { filename, json } => {
            info!("Running Tokenize subcommand");
            let source = read_source(filename)?;
            tokenize(&source, json)?;
        }

        Commands::Parse { filename } => {
            info!("Running Parse subcommand");
            let source = read_source(filename)?;
            let expr = parse_single(&source);
            println!("{}", AstPrinter::print(&expr));
        }

        Commands::Evaluate { filename } => {
            info!("Running Evaluate subcommand");
            let source = read_source(filename)?;
            evaluate(&source);
        }

        Commands::Run { filename } => {
            info!("Running Run subcommand");
            let source = read_source(filename)?;

            let outcome = Lox::new().run(&source);
            report(&outcome.diagnostics);

            if let Some(code) = exit_code(&outcome) {
                debug!("Run failed, exiting with code {}", code);
                process::exit(code);
            }
        }

        Commands::Repl => {
            info!("Running Repl subcommand");
            repl()?;
        }
    }

    Ok(())
}
