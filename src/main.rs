use clap::Parser;
use rscheme::ast::Object;
use rscheme::runtime::{self, CollectionReport};
use rscheme::{Env, Interpreter, InterpreterConfig, MAX_EVAL_DEPTH, ParseConfig};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "rscheme", version, about = "A small Scheme interpreter")]
struct Cli {
    /// Scheme source file to run
    file: Option<PathBuf>,

    /// Evaluate an expression and print its value
    #[arg(short, long, value_name = "EXPR")]
    eval: Option<String>,

    /// Enter the REPL after running FILE or EXPR
    #[arg(short = 'i', long = "repl")]
    repl: bool,

    /// Echo top-level results of loaded files and log at info level
    #[arg(long)]
    verbose: bool,

    /// Enable runtime debug mode and log at debug level
    #[arg(long)]
    debug: bool,

    /// Maximum evaluation depth
    #[arg(long, value_name = "N", default_value_t = MAX_EVAL_DEPTH)]
    max_depth: usize,
}

/// Install a subscriber when RUST_LOG or a logging flag asks for one.
fn init_tracing(cli: &Cli) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if cli.debug => EnvFilter::new("rscheme=debug"),
        Err(_) if cli.verbose => EnvFilter::new("rscheme=info"),
        Err(_) => return,
    };
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    runtime::set_debug_mode(cli.debug);

    let mut interp = Interpreter::with_config(InterpreterConfig {
        max_eval_depth: cli.max_depth,
        parse: ParseConfig::default(),
        echo_results: cli.verbose,
    });

    if let Some(file) = &cli.file
        && let Err(e) = interp.load_file(file)
    {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    if let Some(expr) = &cli.eval {
        match interp.eval_str(expr) {
            Ok(value) if !value.is_nil() => println!("{value}"),
            Ok(_) => {}
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if cli.repl || (cli.file.is_none() && cli.eval.is_none()) {
        interp.clear_fault();
        if let Err(e) = run_repl(&mut interp) {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}

fn run_repl(interp: &mut Interpreter) -> Result<(), ReadlineError> {
    let mut rl = DefaultEditor::new()?;

    println!("rscheme {}", env!("CARGO_PKG_VERSION"));
    println!("Type :help for commands, :quit or Ctrl+D to exit.");
    println!();

    let mut buffer = String::new();

    loop {
        let prompt = if buffer.is_empty() {
            "rscheme> "
        } else {
            "     ... "
        };
        match rl.readline(prompt) {
            Ok(line) => {
                if buffer.is_empty() {
                    match line.trim() {
                        "" => continue,
                        ":quit" | ":exit" | "quit" | "exit" => break,
                        ":help" => {
                            print_help();
                            continue;
                        }
                        ":env" => {
                            print_environment(interp.global_env());
                            continue;
                        }
                        ":stats" => {
                            println!("{}", runtime::memory_stats());
                            continue;
                        }
                        ":gc" => {
                            print_collection(&runtime::collect(interp.global_env()));
                            continue;
                        }
                        _ => {}
                    }
                }

                buffer.push_str(&line);
                buffer.push('\n');

                // A form that is still open keeps reading; nothing has been
                // evaluated yet because the whole input failed to read.
                let result = interp.eval_str(&buffer);
                interp.clear_fault();
                if let Err(e) = &result
                    && e.is_incomplete_input()
                {
                    continue;
                }

                let input = std::mem::take(&mut buffer);
                let _ = rl.add_history_entry(input.trim_end());
                match result {
                    Ok(value) if !value.is_nil() => println!("{value}"),
                    Ok(_) => {}
                    Err(e) => eprintln!("Error: {e}"),
                }
            }
            Err(ReadlineError::Interrupted) if !buffer.is_empty() => {
                buffer.clear();
                println!("^C");
            }
            Err(ReadlineError::Eof | ReadlineError::Interrupted) => break,
            Err(err) => return Err(err),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn print_help() {
    println!("REPL commands:");
    println!("  :help    - Show this help message");
    println!("  :env     - Show global environment bindings");
    println!("  :stats   - Show memory statistics");
    println!("  :gc      - Run a collection and report reachable objects");
    println!("  :quit    - Exit the interpreter (also quit, exit, Ctrl+D)");
    println!();
    println!("Unfinished forms continue on the next line; Ctrl+C discards them.");
    println!();
    println!("Examples:");
    println!("  (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))");
    println!("  (fact 10)");
    println!("  (map (lambda (x) (* x x)) '(1 2 3))");
    println!();
}

fn print_environment(env: &Env) {
    let bindings = env.get_all_bindings();

    if bindings.is_empty() {
        println!("Environment is empty.");
        return;
    }

    println!("Environment bindings ({} total):", bindings.len());
    println!();

    let (primitives, user_defined): (Vec<_>, Vec<_>) = bindings
        .into_iter()
        .partition(|(_, value)| matches!(&**value, Object::Primitive(_)));

    if !primitives.is_empty() {
        println!("Primitives ({}):", primitives.len());
        for row in primitives.chunks(4) {
            for (name, _) in row {
                print!("  {name:<18}");
            }
            println!();
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("User-defined values ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}

fn print_collection(report: &CollectionReport) {
    if report.skipped {
        println!("Collection skipped: gc is disabled.");
        return;
    }
    println!("Reachable objects: {}", report.reachable_objects);
    println!("Reachable frames:  {}", report.reachable_frames);
    println!("Registered roots:  {}", report.registered_roots);
    println!("Live objects:      {}", report.live_objects);
    println!("Held by cycles:    {}", report.unreachable());
    println!("Reclaimed:         {}", report.reclaimed);
}
