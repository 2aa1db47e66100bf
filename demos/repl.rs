use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use schemexp::builtinops::create_global_env;
use schemexp::entity::Entity;
use schemexp::evaluator::eval;
use schemexp::scheme::parse_program;
use schemexp::{Verbosity, set_verbosity};

fn main() {
    env_logger::init();
    run_repl();
}

fn run_repl() {
    println!("schemexp continuation-based Scheme core");
    println!("Enter forms like: (+ 1 2), (call/cc (lambda (k) (k 42)))");
    println!("Type :help for commands, Ctrl+D to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("could not initialize line editor");
    let env = create_global_env();

    loop {
        match rl.readline("schemexp> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        print_help();
                        continue;
                    }
                    ":verbose" => {
                        set_verbosity(Verbosity::Fine);
                        println!("verbosity: fine (procedures print their source)");
                        continue;
                    }
                    ":quiet" => {
                        set_verbosity(Verbosity::Info);
                        println!("verbosity: info");
                        continue;
                    }
                    _ => {}
                }

                match parse_program(line) {
                    Ok(forms) => {
                        for form in forms {
                            match eval(&form, &env) {
                                Ok(Entity::Void) => {}
                                Ok(value) => println!("{value}"),
                                Err(e) => {
                                    println!("Error: {e}");
                                    break;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        println!("Parse error: {}", e.message);
                        if let Some(found) = &e.found {
                            println!("  found: {found}");
                        }
                    }
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(e) => {
                println!("Input error: {e}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Commands:");
    println!("  :help      show this help");
    println!("  :verbose   print procedures with their full source");
    println!("  :quiet     print procedures as opaque tags");
    println!();
    println!("Examples:");
    println!("  (define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))");
    println!("  (fact 10)");
    println!("  (define saved #f)");
    println!("  (+ 1 (call/cc (lambda (k) (set! saved k) 1)))");
    println!("  (saved 100)");
}
