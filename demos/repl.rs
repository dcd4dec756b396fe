use lispvm::builtinops::Arity;
use lispvm::intooperation::ValueIter;
use lispvm::reader::parse_program;
use lispvm::{Value, Vm};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::EnvFilter;

fn main() {
    // RUST_LOG=lispvm=trace shows every dispatched instruction
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let result = panic::catch_unwind(|| {
        run_repl();
    });

    if let Err(panic_info) = result {
        eprintln!("The REPL encountered an unexpected error and must exit.");

        if let Some(msg) = panic_info.downcast_ref::<&str>() {
            eprintln!("Error: {msg}");
        } else if let Some(msg) = panic_info.downcast_ref::<String>() {
            eprintln!("Error: {msg}");
        } else {
            eprintln!("Error: Unknown panic occurred");
        }

        process::exit(1);
    }
}

fn run_repl() {
    println!("lispvm instruction REPL");
    println!("Enter instructions like: (get-global +) (push 5) (push 3) (call 2)");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    let mut rl = DefaultEditor::new().expect("Could not initialize REPL");
    let mut vm = Vm::new();

    // Extra native for demonstration purposes
    vm.register_variadic_native::<(ValueIter<'static>,), _>(
        "list",
        Arity::Any,
        |args: ValueIter<'_>| Value::list(args.cloned()),
    );

    loop {
        match rl.readline("lispvm> ") {
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
                    ":globals" => {
                        print_globals(&vm);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                match parse_program(line).and_then(|tree| vm.run_expr(tree)) {
                    Ok(result) => println!("{result}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() {
    println!("Each line is read as a sequence of instructions and run to a single value.");
    println!("Globals persist between lines.");
    println!("  :help      - Show this help message");
    println!("  :globals   - Show current global bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Instructions:");
    println!("  (push VALUE)               (pop)");
    println!("  (access N)                 (call N)");
    println!("  (closure ARITY REST CODE)  (if THEN ELSE)");
    println!("  (get-global SYM)           (set-global SYM)");
    println!();
    println!("Examples:");
    println!("  (get-global +) (push 5) (push 3) (call 2)");
    println!("  (closure 1 #f ((access 0))) (push 42) (call 1)");
    println!("  (push #f) (if ((push 1)) ((push 2)))");
    println!("  (closure 0 #t ((access 0))) (set-global gather)");
    println!("  (get-global gather) (push 1) (push 2) (call 2)");
    println!();
}

fn print_globals(vm: &Vm) {
    let bindings = vm.globals();

    if bindings.is_empty() {
        println!("No globals are bound.");
        return;
    }

    println!("Global bindings ({} total):", bindings.len());
    println!();

    let mut natives = Vec::new();
    let mut user_defined = Vec::new();

    for (name, value) in bindings {
        match value {
            Value::Native(_) | Value::Apply => natives.push(name),
            _ => user_defined.push((name, value)),
        }
    }

    if !natives.is_empty() {
        println!("Natives ({}):", natives.len());
        let mut col = 0;
        for name in natives {
            print!("  {name:<15}");
            col += 1;
            if col % 4 == 0 {
                println!();
            }
        }
        if col % 4 != 0 {
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
