//! Process-level tests for the faultline probe binary.
//!
//! These cover the behaviors that need a real process boundary: unprotected
//! raises and unmatched faults terminating with a report, the depth guard,
//! and the signal bridge absorbing (or declining to absorb) a memory fault.

use assert_cmd::Command;
use predicates::prelude::*;

/// Helper to get the probe binary.
fn probe() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("faultline"))
}

#[test]
fn test_cli_help() {
    probe()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Scenario probe"));
}

#[test]
fn test_demo_recovers_at_every_level() {
    probe()
        .arg("demo")
        .assert()
        .success()
        .stdout(predicate::str::contains("project room-temperature registered"))
        .stdout(predicate::str::contains(
            "project room-temperature already in the store",
        ))
        .stdout(predicate::str::contains("rejected: invalid-name"))
        .stdout(predicate::str::contains(
            "outer block recovered from sql-execution-failure",
        ))
        .stdout(predicate::str::contains("demo finished (recovered = true)"))
        // The inner block had no matching clause, so its fallback reported
        // before propagating.
        .stderr(predicate::str::contains(
            "unhandled fault sql-execution-failure",
        ));
}

#[test]
fn test_unprotected_raise_terminates_with_report() {
    probe()
        .arg("unprotected")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("allocation-failure"))
        .stderr(predicate::str::contains(
            "out of memory while building the request body",
        ));
}

#[test]
fn test_depth_guard_trips_instead_of_overrunning() {
    probe()
        .arg("overflow")
        .assert()
        .success()
        .stdout(predicate::str::contains("nesting exceeded 64 levels"));
}

#[test]
fn test_unmatched_fault_terminates_after_reporting() {
    probe()
        .arg("unmatched")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "unhandled fault sql-execution-failure",
        ))
        .stderr(predicate::str::contains("database is locked"));
}

#[cfg(unix)]
#[test]
fn test_memory_fault_caught_inside_protected_block() {
    probe()
        .arg("crash")
        .assert()
        .success()
        .stdout(predicate::str::contains("caught fatal-memory-access"))
        .stdout(predicate::str::contains("still alive after the fault"));
}

#[cfg(unix)]
#[test]
fn test_memory_fault_without_block_kills_process() {
    // 128 + SIGSEGV: the handler declines to absorb the crash when no
    // protected block is armed.
    probe()
        .args(["crash", "--unprotected"])
        .assert()
        .failure()
        .code(139);
}
