//! Scenario probe for the fault-propagation runtime.
//!
//! Each subcommand drives one end-to-end behavior from a real process:
//! nested recovery, termination on unprotected or unmatched faults, the
//! depth guard, and the signal bridge. The integration tests assert on the
//! exit statuses and streams these scenarios produce.

use clap::{Parser, Subcommand};
use faultline_runtime::{
    install_signal_bridge, last_diagnostic, last_fault, logging, protect, raise_with, FaultCode,
    MAX_DEPTH,
};

#[derive(Parser)]
#[command(name = "faultline")]
#[command(author, version, about = "Scenario probe for the faultline fault-propagation runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk nested blocks: specific catches, catch-all, propagation
    Demo,
    /// Raise a fault with no protected block on the stack (terminates)
    Unprotected,
    /// Nest protected blocks past the depth guard and catch the overflow
    Overflow,
    /// Raise a fault the only block has no clause for (terminates)
    Unmatched,
    /// Install the signal bridge and fault on an invalid read
    Crash {
        /// Skip the protected block so the signal kills the process
        #[arg(long)]
        unprotected: bool,
    },
}

fn main() {
    logging::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Demo => demo(),
        Commands::Unprotected => unprotected(),
        Commands::Overflow => overflow(),
        Commands::Unmatched => unmatched(),
        Commands::Crash { unprotected } => crash(unprotected),
    }
}

/// Stand-in for the data-access layer: remembers project names and raises
/// the faults a real storage backend would.
struct Store {
    projects: Vec<String>,
}

impl Store {
    fn new() -> Self {
        Self {
            projects: Vec::new(),
        }
    }

    fn add_project(&mut self, name: &str) {
        if name.contains(['"', '=', '&']) {
            raise_with(
                FaultCode::INVALID_NAME,
                format!("forbidden character in {name:?}"),
            );
        }
        if self.projects.iter().any(|project| project == name) {
            raise_with(
                FaultCode::NAME_ALREADY_USED,
                format!("project {name:?} already recorded"),
            );
        }
        self.projects.push(name.to_string());
    }
}

/// Report a caught fault the way an interactive consumer would.
fn print_caught(context: &str) {
    if let Some(code) = last_fault() {
        eprintln!("caught fault {code} during {context}");
    }
    if let Some(diagnostic) = last_diagnostic() {
        eprintln!("{diagnostic}");
    }
}

fn demo() {
    let mut store = Store::new();

    protect(|| {
        store.add_project("room-temperature");
        println!("project room-temperature registered");
    })
    .catch_all(|_| {
        print_caught("add_project");
        std::process::exit(1);
    })
    .run();

    // A duplicate insert is a recoverable fault with a specific clause.
    protect(|| {
        store.add_project("room-temperature");
    })
    .catch(FaultCode::NAME_ALREADY_USED, |_| {
        println!("project room-temperature already in the store");
    })
    .run();

    protect(|| {
        store.add_project("temp=humidity");
    })
    .catch(FaultCode::INVALID_NAME, |fault| {
        println!("rejected: {fault}");
    })
    .run();

    // A fault no inner clause claims reports itself and climbs to the next
    // enclosing block.
    let recovered = protect(|| {
        protect(|| {
            raise_with(FaultCode::SQL_EXECUTION_FAILURE, "no such table: measure");
        })
        .catch(FaultCode::OPEN_FAILURE, |_| false)
        .run()
    })
    .catch_all(|fault| {
        println!("outer block recovered from {}", fault.code);
        true
    })
    .run();

    println!("demo finished (recovered = {recovered})");
}

fn unprotected() {
    // No block anywhere on this thread, so the raise must terminate the
    // process after reporting.
    raise_with(
        FaultCode::ALLOCATION_FAILURE,
        "out of memory while building the request body",
    );
}

fn overflow() {
    fn nest(levels: usize) -> usize {
        if levels == 0 {
            return faultline_runtime::depth();
        }
        protect(|| nest(levels - 1))
            .catch(FaultCode::RECOVERY_STACK_OVERFLOW, |fault| {
                println!(
                    "depth guard tripped: {}",
                    fault.diagnostic.unwrap_or_default()
                );
                0
            })
            .run()
    }

    let _ = nest(MAX_DEPTH + 1);
}

fn unmatched() {
    protect(|| {
        raise_with(FaultCode::SQL_EXECUTION_FAILURE, "database is locked");
    })
    .catch(FaultCode::OPEN_FAILURE, |_| ())
    .run();
}

fn crash(unprotected: bool) {
    if let Err(err) = install_signal_bridge() {
        eprintln!("cannot install signal bridge: {err}");
        std::process::exit(2);
    }

    if unprotected {
        // No protected block armed: the signal must kill the process with
        // the usual status.
        let _ = unsafe { std::ptr::null::<u8>().read_volatile() };
        return;
    }

    protect(|| {
        let _ = unsafe { std::ptr::null::<u8>().read_volatile() };
    })
    .catch_all(|fault| {
        println!("caught {fault}");
    })
    .run();

    println!("still alive after the fault");
}
