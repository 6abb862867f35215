//! A Lox session: one interpreter fed by any number of source texts.
//!
//! Each run goes scan → parse → resolve → interpret. Any lexical, syntax or
//! resolution error stops the run before execution; the session itself stays
//! usable and keeps its globals for the next run.

use std::io::Write;

use log::{debug, info};

use crate::error::LoxError;
use crate::interpreter::Interpreter;
use crate::parser::Parser;
use crate::resolver::Resolver;
use crate::scanner::scan_tokens;

/// What a single run produced.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Every diagnostic, static ones in source order, then at most one
    /// runtime error.
    pub diagnostics: Vec<LoxError>,
    pub had_static_error: bool,
    pub had_runtime_error: bool,
    /// Display form of a bare expression's value (interactive runs only).
    pub value: Option<String>,
}

impl RunOutcome {
    pub fn is_ok(&self) -> bool {
        !self.had_static_error && !self.had_runtime_error
    }

    fn static_errors(diagnostics: Vec<LoxError>) -> Self {
        RunOutcome {
            diagnostics,
            had_static_error: true,
            ..Default::default()
        }
    }

    fn runtime_error(mut self, error: LoxError) -> Self {
        self.diagnostics.push(error);
        self.had_runtime_error = true;
        self
    }
}

pub struct Lox {
    interpreter: Interpreter,
}

impl Default for Lox {
    fn default() -> Self {
        Self::new()
    }
}

impl Lox {
    /// Session printing to standard output.
    pub fn new() -> Self {
        Lox {
            interpreter: Interpreter::new(),
        }
    }

    /// Session whose `print` output goes to `out`.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Lox {
            interpreter: Interpreter::with_output(out),
        }
    }

    /// Run `source` as a program.
    pub fn run(&mut self, source: &str) -> RunOutcome {
        info!("Running program of {} bytes", source.len());

        let (tokens, mut diagnostics) = scan_tokens(source);

        // Parse even after lexical errors so syntax errors are reported too.
        let statements = match Parser::new(tokens).parse() {
            Ok(statements) => statements,
            Err(errors) => {
                diagnostics.extend(errors);
                return RunOutcome::static_errors(diagnostics);
            }
        };

        if !diagnostics.is_empty() {
            return RunOutcome::static_errors(diagnostics);
        }

        match Resolver::new().resolve(&statements) {
            Ok(bindings) => self.interpreter.add_bindings(bindings),
            Err(errors) => return RunOutcome::static_errors(errors),
        }

        debug!("Executing {} statement(s)", statements.len());

        match self.interpreter.interpret_statements(&statements) {
            Ok(()) => RunOutcome::default(),
            Err(error) => RunOutcome::default().runtime_error(error),
        }
    }

    /// Run one line of interactive input. If it ends in a bare expression,
    /// that expression's value is returned in [`RunOutcome::value`].
    pub fn run_repl(&mut self, source: &str) -> RunOutcome {
        info!("Running interactive input: {:?}", source);

        let (tokens, mut diagnostics) = scan_tokens(source);

        let program = match Parser::new(tokens).parse_repl() {
            Ok(program) => program,
            Err(errors) => {
                diagnostics.extend(errors);
                return RunOutcome::static_errors(diagnostics);
            }
        };

        if !diagnostics.is_empty() {
            return RunOutcome::static_errors(diagnostics);
        }

        match Resolver::new().resolve_program(&program) {
            Ok(bindings) => self.interpreter.add_bindings(bindings),
            Err(errors) => return RunOutcome::static_errors(errors),
        }

        match self.interpreter.interpret(&program) {
            Ok(value) => RunOutcome {
                value,
                ..Default::default()
            },
            Err(error) => RunOutcome::default().runtime_error(error),
        }
    }
}
