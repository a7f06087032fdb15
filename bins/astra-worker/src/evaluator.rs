/// Result Evaluator - Log Scraping and Run Classification
///
/// **Core Responsibility:**
/// Turn the raw sandbox outcome plus the on-disk logs into a `RunnerResult`.
///
/// **Critical Properties:**
/// - Knows nothing about Docker
/// - Knows nothing about toolchains beyond the `COMPILE_ERROR` sentinel
/// - Pure function: (outcome, logs) → result
///
/// **Classification Rules (first match wins):**
/// 1. exit code 124 → timeout (no test parsing)
/// 2. stdout carries the sentinel, or exit code is nonzero → compile_error
/// 3. otherwise parse markers: none → runtime_error, any FAIL → failed, else passed
///
/// A nonzero exit always beats test output that looks successful. A testbench
/// whose simulator exits nonzero after reporting results is graded compile_error.
///
/// **Marker Protocol (best effort, unmatched lines are skipped):**
/// - `TEST:<name> STATUS:<PASS|FAIL> [EXP:<v> GOT:<v>]`
/// - `<name>:<PASS|FAIL> [EXP:<v> GOT:<v>]` for lines the first form misses

use crate::script::COMPILE_ERROR_SENTINEL;
use astra_common::types::{RunnerResult, TestCaseResult, Verdict};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Exit code reported for a run killed by the wall-clock timer
pub const TIMEOUT_EXIT_CODE: i64 = 124;

static TEST_STATUS_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)TEST:([A-Za-z0-9_]+)\s+STATUS:(PASS|FAIL)(?:\s+EXP:(\S+)\s+GOT:(\S+))?")
        .expect("marker pattern is valid")
});

static SHORT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([A-Za-z0-9_]+):(PASS|FAIL)(?:\s+EXP:(\S+)\s+GOT:(\S+))?")
        .expect("marker pattern is valid")
});

/// Raw result of running the job script in the sandbox.
/// Produced once by the engine, consumed by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub execution_time_ms: u64,
}

/// Log files the script may have left in the workspace
#[derive(Debug, Clone, Default)]
pub struct RunLogs {
    pub compile_log: Option<String>,
    pub sim_log: Option<String>,
}

/// Extract test verdicts from a simulation log, in order of appearance
pub fn parse_test_results(log: &str) -> Vec<TestCaseResult> {
    log.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<TestCaseResult> {
    TEST_STATUS_MARKER
        .captures(line)
        .or_else(|| SHORT_MARKER.captures(line))
        .map(|caps| from_captures(&caps))
}

fn from_captures(caps: &Captures<'_>) -> TestCaseResult {
    let status = if caps[2].eq_ignore_ascii_case("PASS") {
        Verdict::Pass
    } else {
        Verdict::Fail
    };

    TestCaseResult {
        name: caps[1].to_string(),
        status,
        expected: caps.get(3).map(|m| m.as_str().to_string()),
        actual: caps.get(4).map(|m| m.as_str().to_string()),
    }
}

/// Diagnostics for a compile_error result; never empty
fn compile_diagnostics(outcome: &ExecutionOutcome, logs: &RunLogs) -> String {
    [logs.compile_log.as_deref(), Some(outcome.stderr.as_str()), Some(outcome.stdout.as_str())]
        .into_iter()
        .flatten()
        .find(|text| !text.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Process exited with code {}", outcome.exit_code))
}

/// Classify a finished run.
///
/// The sim log falls back to captured stdout when the script never produced
/// `sim.log`.
pub fn evaluate(job_id: &str, outcome: &ExecutionOutcome, logs: &RunLogs) -> RunnerResult {
    let sim_log = logs
        .sim_log
        .clone()
        .unwrap_or_else(|| outcome.stdout.clone());

    let mut result = if outcome.exit_code == TIMEOUT_EXIT_CODE {
        RunnerResult::timeout(job_id, sim_log)
    } else if outcome.stdout.contains(COMPILE_ERROR_SENTINEL) || outcome.exit_code != 0 {
        RunnerResult::compile_error(job_id, compile_diagnostics(outcome, logs))
    } else {
        let test_cases = parse_test_results(&sim_log);
        RunnerResult::from_test_cases(job_id, test_cases, sim_log)
    };

    result.execution_time_ms = outcome.execution_time_ms;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use astra_common::types::RunStatus;

    /// Helper to create a clean exit
    fn make_outcome(stdout: &str, exit_code: i64) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
            timed_out: false,
            execution_time_ms: 12,
        }
    }

    fn sim_logs(sim: &str) -> RunLogs {
        RunLogs {
            compile_log: None,
            sim_log: Some(sim.to_string()),
        }
    }

    fn assert_counts(result: &RunnerResult) {
        assert_eq!(result.total_tests, result.passed_tests + result.failed_tests);
        assert_eq!(result.total_tests as usize, result.test_cases.len());
    }

    #[test]
    fn test_full_marker_with_values() {
        let cases = parse_test_results("TEST:clk_edge STATUS:FAIL EXP:1 GOT:0");
        assert_eq!(
            cases,
            vec![TestCaseResult {
                name: "clk_edge".to_string(),
                status: Verdict::Fail,
                expected: Some("1".to_string()),
                actual: Some("0".to_string()),
            }]
        );
    }

    #[test]
    fn test_short_marker_without_values() {
        let cases = parse_test_results("adder_tc1:PASS");
        assert_eq!(
            cases,
            vec![TestCaseResult {
                name: "adder_tc1".to_string(),
                status: Verdict::Pass,
                expected: None,
                actual: None,
            }]
        );
    }

    #[test]
    fn test_short_marker_with_values() {
        let cases = parse_test_results("sum_check:fail EXP:0101 GOT:0110");
        assert_eq!(cases[0].name, "sum_check");
        assert_eq!(cases[0].status, Verdict::Fail);
        assert_eq!(cases[0].expected.as_deref(), Some("0101"));
        assert_eq!(cases[0].actual.as_deref(), Some("0110"));
    }

    #[test]
    fn test_verdict_case_insensitive() {
        let cases = parse_test_results("TEST:a STATUS:pass\nb:Fail\ntest:c status:PASS");
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].status, Verdict::Pass);
        assert_eq!(cases[1].status, Verdict::Fail);
        assert_eq!(cases[2].name, "c");
    }

    #[test]
    fn test_full_marker_not_duplicated() {
        // the line also contains `STATUS:PASS`, which the short form would match
        let cases = parse_test_results("TEST:T1 STATUS:PASS");
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].name, "T1");
    }

    #[test]
    fn test_order_preserved() {
        let log = "zeta:PASS\nTEST:alpha STATUS:FAIL\nnoise line\nmid:PASS\r\nTEST:beta STATUS:PASS\n";
        let names: Vec<_> = parse_test_results(log).into_iter().map(|tc| tc.name).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid", "beta"]);
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let log = "=== Running Simulation ===\nTEST:STATUS\n:PASS\nVCD info: dumpfile wave.vcd opened\nresult=PASS\n";
        assert!(parse_test_results(log).is_empty());
    }

    #[test]
    fn test_incomplete_values_omitted() {
        // EXP without GOT is not a value pair
        let cases = parse_test_results("TEST:t STATUS:FAIL EXP:1");
        assert_eq!(cases[0].expected, None);
        assert_eq!(cases[0].actual, None);
    }

    #[test]
    fn test_parsing_is_idempotent() {
        let log = "TEST:T1 STATUS:PASS\nT2:FAIL EXP:5 GOT:3\n";
        assert_eq!(parse_test_results(log), parse_test_results(log));
    }

    #[test]
    fn test_timeout_wins() {
        let mut outcome = make_outcome("COMPILE_ERROR\nTEST:T1 STATUS:PASS", TIMEOUT_EXIT_CODE);
        outcome.timed_out = true;

        let result = evaluate("j", &outcome, &sim_logs("TEST:T1 STATUS:PASS"));

        assert_eq!(result.status, RunStatus::Timeout);
        assert_eq!(result.log, "Execution timeout");
        assert_eq!(result.total_tests, 0);
        assert!(result.test_cases.is_empty());
        assert_eq!(result.simulation_log, "TEST:T1 STATUS:PASS");
    }

    #[test]
    fn test_exit_124_is_timeout_even_without_kill() {
        let result = evaluate("j", &make_outcome("", 124), &RunLogs::default());
        assert_eq!(result.status, RunStatus::Timeout);
    }

    #[test]
    fn test_sentinel_is_compile_error() {
        let outcome = ExecutionOutcome {
            stderr: "ignored".to_string(),
            ..make_outcome("=== Compiling Verilog ===\nCOMPILE_ERROR\nstudent.v:3: syntax error", 1)
        };
        let logs = RunLogs {
            compile_log: Some("student.v:3: syntax error\n".to_string()),
            sim_log: None,
        };

        let result = evaluate("j", &outcome, &logs);

        assert_eq!(result.status, RunStatus::CompileError);
        assert_eq!(result.total_tests, 0);
        assert_eq!(result.compile_errors.as_deref(), Some("student.v:3: syntax error\n"));
        assert_eq!(result.log, "student.v:3: syntax error\n");
        assert!(result.simulation_log.is_empty());
    }

    #[test]
    fn test_sentinel_with_zero_exit_still_compile_error() {
        let result = evaluate("j", &make_outcome("COMPILE_ERROR", 0), &RunLogs::default());
        assert_eq!(result.status, RunStatus::CompileError);
    }

    #[test]
    fn test_nonzero_exit_beats_test_output() {
        let outcome = ExecutionOutcome {
            stderr: "vvp: aborted".to_string(),
            ..make_outcome("TEST:T1 STATUS:PASS", 2)
        };
        let result = evaluate("j", &outcome, &sim_logs("TEST:T1 STATUS:PASS"));

        assert_eq!(result.status, RunStatus::CompileError);
        assert_eq!(result.total_tests, 0);
        // no compile.log, so stderr is reported
        assert_eq!(result.compile_errors.as_deref(), Some("vvp: aborted"));
    }

    #[test]
    fn test_compile_errors_never_empty() {
        let result = evaluate("j", &make_outcome("", 137), &RunLogs::default());
        assert_eq!(result.status, RunStatus::CompileError);
        assert_eq!(result.compile_errors.as_deref(), Some("Process exited with code 137"));

        let logs = RunLogs {
            compile_log: Some(String::new()),
            sim_log: None,
        };
        let result = evaluate("j", &make_outcome("COMPILE_ERROR", 1), &logs);
        assert_eq!(result.compile_errors.as_deref(), Some("COMPILE_ERROR"));
    }

    #[test]
    fn test_mixed_results_failed() {
        let log = "TEST:T1 STATUS:PASS\nTEST:T2 STATUS:FAIL EXP:5 GOT:3\n";
        let result = evaluate("j", &make_outcome(log, 0), &sim_logs(log));

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.total_tests, 2);
        assert_eq!(result.passed_tests, 1);
        assert_eq!(result.failed_tests, 1);
        assert_eq!(result.test_cases[1].expected.as_deref(), Some("5"));
        assert_eq!(result.log, log);
        assert_counts(&result);
    }

    #[test]
    fn test_all_pass() {
        let log = "a:PASS\nb:PASS\n";
        let result = evaluate("j", &make_outcome(log, 0), &sim_logs(log));
        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.passed_tests, 2);
        assert_eq!(result.execution_time_ms, 12);
        assert_counts(&result);
    }

    #[test]
    fn test_no_markers_runtime_error() {
        let log = "simulation finished at 100ns\n";
        let result = evaluate("j", &make_outcome(log, 0), &sim_logs(log));
        assert_eq!(result.status, RunStatus::RuntimeError);
        assert_eq!(result.total_tests, 0);
        assert_counts(&result);
    }

    #[test]
    fn test_sim_log_falls_back_to_stdout() {
        let result = evaluate("j", &make_outcome("x:PASS\n", 0), &RunLogs::default());
        assert_eq!(result.status, RunStatus::Passed);
        assert_eq!(result.simulation_log, "x:PASS\n");
    }

    #[test]
    fn test_sim_log_file_preferred_over_stdout() {
        let outcome = make_outcome("=== Running Simulation ===\nstale:FAIL\n", 0);
        let result = evaluate("j", &outcome, &sim_logs("fresh:PASS\n"));
        assert_eq!(result.test_cases.len(), 1);
        assert_eq!(result.test_cases[0].name, "fresh");
    }
}
