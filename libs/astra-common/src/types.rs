use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// HDL flavours the runner knows how to build and simulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Verilog,
    Vhdl,
}

impl Language {
    /// File extension used for `student.<ext>` and `testbench.<ext>`
    pub fn extension(&self) -> &'static str {
        match self {
            Language::Verilog => "v",
            Language::Vhdl => "vhd",
        }
    }

    pub fn student_file(&self) -> String {
        format!("student.{}", self.extension())
    }

    pub fn testbench_file(&self) -> String {
        format!("testbench.{}", self.extension())
    }

    /// Catalog key, matches the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Verilog => "VERILOG",
            Language::Vhdl => "VHDL",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "verilog" | "v" => Ok(Language::Verilog),
            "vhdl" | "vhd" => Ok(Language::Vhdl),
            other => Err(format!("unsupported language '{}' (expected verilog or vhdl)", other)),
        }
    }
}

/// One grading request as handed over by the submission collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSpec {
    pub submission_id: String,
    pub problem_id: String,
    pub language: Language,
    pub student_code: String,
    /// Inline testbench; when absent the catalog is consulted
    #[serde(default)]
    pub testbench: Option<String>,
    /// Wall-clock limit override in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
}

/// One named verdict scraped from the simulation log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseResult {
    pub name: String,
    pub status: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    CompileError,
    RuntimeError,
    Timeout,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Passed => "passed",
            RunStatus::Failed => "failed",
            RunStatus::CompileError => "compile_error",
            RunStatus::RuntimeError => "runtime_error",
            RunStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// Final outcome of one job, always well-formed even when the pipeline failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerResult {
    pub job_id: String,
    pub status: RunStatus,
    pub total_tests: u32,
    pub passed_tests: u32,
    pub failed_tests: u32,
    pub test_cases: Vec<TestCaseResult>,
    /// Learner-facing text for this run
    pub log: String,
    /// Raw simulator output
    pub simulation_log: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compile_errors: Option<String>,
    pub waveform_path: Option<String>,
    pub execution_time_ms: u64,
}

impl RunnerResult {
    fn empty(job_id: &str, status: RunStatus, log: String) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            total_tests: 0,
            passed_tests: 0,
            failed_tests: 0,
            test_cases: Vec::new(),
            log,
            simulation_log: String::new(),
            compile_errors: None,
            waveform_path: None,
            execution_time_ms: 0,
        }
    }

    pub fn timeout(job_id: &str, partial_sim_log: String) -> Self {
        Self {
            simulation_log: partial_sim_log,
            ..Self::empty(job_id, RunStatus::Timeout, "Execution timeout".to_string())
        }
    }

    pub fn compile_error(job_id: &str, diagnostics: String) -> Self {
        Self {
            compile_errors: Some(diagnostics.clone()),
            ..Self::empty(job_id, RunStatus::CompileError, diagnostics)
        }
    }

    pub fn runtime_error(job_id: &str, message: impl fmt::Display) -> Self {
        Self::empty(job_id, RunStatus::RuntimeError, format!("Runtime error: {}", message))
    }

    /// Build a result from parsed markers; status follows from the counts
    pub fn from_test_cases(job_id: &str, test_cases: Vec<TestCaseResult>, sim_log: String) -> Self {
        let total_tests = test_cases.len() as u32;
        let passed_tests = test_cases.iter().filter(|tc| tc.status == Verdict::Pass).count() as u32;
        let failed_tests = total_tests - passed_tests;

        let status = if total_tests == 0 {
            RunStatus::RuntimeError
        } else if failed_tests > 0 {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        };

        Self {
            job_id: job_id.to_string(),
            status,
            total_tests,
            passed_tests,
            failed_tests,
            test_cases,
            log: sim_log.clone(),
            simulation_log: sim_log,
            compile_errors: None,
            waveform_path: None,
            execution_time_ms: 0,
        }
    }

    /// Label shown to learners: anything short of a clean pass reads as FAILED
    pub fn submission_label(&self) -> &'static str {
        if self.failed_tests == 0 && self.total_tests > 0 {
            "PASSED"
        } else {
            "FAILED"
        }
    }
}
