// ABOUTME: CLI entry point: dispatches between script execution and the REPL

use std::path::PathBuf;
use std::process::ExitCode;
use std::{env, fs};

use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use corvid_lang::config;
use corvid_lang::error::Diagnostics;
use corvid_lang::eval::Interpreter;
use corvid_lang::parser;
use corvid_lang::resolver;
use corvid_lang::scanner::Scanner;

/// A single optional positional script path. Argument-count dispatch itself
/// happens by hand in `main` before this is parsed, so that a program
/// invoked with two or more arguments prints the exact "argc" message the
/// Language mandates rather than clap's own usage error.
#[derive(Parser, Debug)]
#[command(name = "corvid", version = config::VERSION, about = "A tree-walking interpreter")]
struct CliArgs {
    script: Option<PathBuf>,
}

fn main() -> ExitCode {
    let argv: Vec<String> = env::args().collect();
    if argv.len() > 2 {
        eprintln!("usage: corvid [script]\nobserved {} arguments", argv.len() - 1);
        return ExitCode::FAILURE;
    }

    let args = CliArgs::parse();
    match args.script {
        Some(path) => run_file(&path),
        None => run_prompt(),
    }
}

fn run_file(path: &PathBuf) -> ExitCode {
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("could not read file '{}': {}", path.display(), err);
            return ExitCode::FAILURE;
        }
    };

    let mut diag = Diagnostics::new();
    let mut interpreter = Interpreter::new();
    run(&source, &mut interpreter, &mut diag);

    if diag.had_error {
        ExitCode::from(65)
    } else if diag.had_runtime_error {
        ExitCode::from(70)
    } else {
        ExitCode::SUCCESS
    }
}

fn run_prompt() -> ExitCode {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            eprintln!("could not start the line editor: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut diag = Diagnostics::new();
    let mut interpreter = Interpreter::new();

    loop {
        match editor.readline(config::REPL_PROMPT) {
            Ok(line) => {
                if line.is_empty() {
                    break;
                }
                run(&line, &mut interpreter, &mut diag);
                diag.reset_had_error();
            }
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(err) => {
                eprintln!("readline error: {err}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}

fn run(source: &str, interpreter: &mut Interpreter, diag: &mut Diagnostics) {
    let tokens = Scanner::new(source).scan_tokens(diag);
    let statements = parser::parse(tokens, diag);
    if diag.had_error {
        return;
    }

    let locals = resolver::resolve(&statements, diag);
    if diag.had_error {
        return;
    }

    interpreter.interpret(&statements, locals, diag);
}
