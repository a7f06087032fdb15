/// Script Synthesizer - Toolchain Invocation per Language
///
/// **Responsibility:**
/// Produce the `run.sh` executed inside the sandbox for a job.
///
/// **Contract with the evaluator:**
/// - Any compile/analyze/elaborate failure prints the `COMPILE_ERROR` sentinel line,
///   dumps `compile.log` and exits 1
/// - Simulation output is tee'd into `sim.log`
/// - The sentinel is never printed on any other path

use astra_common::types::Language;

/// Sentinel line marking a toolchain failure before simulation
pub const COMPILE_ERROR_SENTINEL: &str = "COMPILE_ERROR";

pub const SCRIPT_FILE: &str = "run.sh";
pub const COMPILE_LOG: &str = "compile.log";
pub const SIM_LOG: &str = "sim.log";
pub const WAVEFORM_FILE: &str = "wave.vcd";

const VERILOG_SCRIPT: &str = r#"#!/bin/bash

echo "=== Compiling Verilog ==="
if ! iverilog -o sim.out student.v testbench.v 2> compile.log; then
    echo "COMPILE_ERROR"
    cat compile.log
    exit 1
fi

echo "=== Running Simulation ==="
vvp sim.out 2>&1 | tee sim.log

echo "=== Simulation Complete ==="
exit 0
"#;

const VHDL_SCRIPT: &str = r#"#!/bin/bash

echo "=== Analyzing VHDL Files ==="
if ! ghdl -a student.vhd 2> compile.log; then
    echo "COMPILE_ERROR"
    cat compile.log
    exit 1
fi

if ! ghdl -a testbench.vhd 2>> compile.log; then
    echo "COMPILE_ERROR"
    cat compile.log
    exit 1
fi

echo "=== Elaborating Design ==="
if ! ghdl -e tb 2>> compile.log; then
    echo "COMPILE_ERROR"
    cat compile.log
    exit 1
fi

echo "=== Running Simulation ==="
ghdl -r tb --vcd=wave.vcd 2>&1 | tee sim.log

echo "=== Simulation Complete ==="
exit 0
"#;

/// The run script for `language`
pub fn run_script(language: Language) -> &'static str {
    match language {
        Language::Verilog => VERILOG_SCRIPT,
        Language::Vhdl => VHDL_SCRIPT,
    }
}
