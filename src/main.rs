#![warn(clippy::all)]

use std::io::Read;

use mython::lexer::{Lexer, Token};
use mython::runtime::SimpleContext;
use mython::{interpreter, parser};

fn usage() {
    eprintln!("Usage: mython [file]            Run a program from a file (or stdin)");
    eprintln!("       mython --tokens [file]   Print the token stream as JSON");
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut tokens_only = false;
    let mut path: Option<String> = None;
    for arg in args {
        if arg == "--tokens" {
            tokens_only = true;
        } else if arg == "--help" || arg == "-h" {
            usage();
            return;
        } else if arg == "--version" || arg == "-V" {
            println!("mython {}", env!("CARGO_PKG_VERSION"));
            return;
        } else if path.is_none() && !arg.starts_with('-') {
            path = Some(arg);
        } else {
            eprintln!("unknown argument: {arg}");
            usage();
            std::process::exit(2);
        }
    }

    let source = match &path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("error reading {p}: {e}");
                std::process::exit(1);
            }
        },
        None => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("error reading stdin: {e}");
                std::process::exit(1);
            }
            buf
        }
    };

    let mut lex = match Lexer::new(&source) {
        Ok(lex) => lex,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if tokens_only {
        let mut tokens = vec![lex.current().clone()];
        while *lex.current() != Token::Eof {
            tokens.push(lex.next().clone());
        }
        match serde_json::to_string_pretty(&tokens) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("failed to serialize tokens: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    let program = match parser::parse(lex) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut context = SimpleContext::new(&mut out);
    if let Err(e) = interpreter::run(&program, &mut context) {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
