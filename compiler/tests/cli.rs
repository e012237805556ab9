// CLI tests for `patchc`: emit stages, hot-swap runs, and exit codes.
//
// Exit codes: 0 ok, 1 compile error, 2 I/O error.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn patchc_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_patchc"))
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn patchc(args: &[&str], source: &Path) -> Output {
    Command::new(patchc_binary())
        .arg(source)
        .args(args)
        .output()
        .expect("failed to run patchc")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn emit_layout_prints_state_ids() {
    let output = patchc(&["--emit", "layout"], &fixture("counter.patch"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.starts_with("layout slots=4\n"), "stdout: {out}");
    assert!(out.contains("scalar v:accum slots=0..1"));
    assert!(out.contains("field s:accum @dots slots=1..4 lanes=3"));
}

#[test]
fn emit_build_info_is_json() {
    let output = patchc(&["--emit", "build-info"], &fixture("counter.patch"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).expect("valid JSON");
    for key in ["source_hash", "registry_fingerprint", "layout_fingerprint"] {
        assert_eq!(json[key].as_str().map(str::len), Some(64), "{key}");
    }
    assert_eq!(json["compiler_version"], env!("CARGO_PKG_VERSION"));
}

#[test]
fn emit_ast_needs_only_parsing() {
    // add(1) has the wrong arity but parses fine
    let output = patchc(&["--emit", "ast"], &fixture("broken.patch"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("Block"));
}

#[test]
fn run_prints_probed_blocks() {
    let output = patchc(&["--frames", "3", "--probe", "v"], &fixture("counter.patch"));
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert_eq!(stdout(&output), "frame 3\n  v = 3\n");
}

#[test]
fn run_with_swap_migrates_state() {
    let edited = fixture("counter_edited.patch");
    let output = patchc(
        &[
            "--frames",
            "10",
            "--swap",
            edited.to_str().unwrap(),
            "--then",
            "1",
            "--probe",
            "v",
            "--probe",
            "s",
        ],
        &fixture("counter.patch"),
    );
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        vec![
            "frame 10",
            "  v = 10",
            "  s = [0.0, 10.0, 20.0]",
            r#"{"state_id":"g:accum","outcome":"defaulted","lanes_copied":0,"lanes_defaulted":1}"#,
            r#"{"state_id":"v:accum","outcome":"migrated","lanes_copied":1,"lanes_defaulted":0}"#,
            r#"{"state_id":"s:accum","outcome":"migrated","lanes_copied":3,"lanes_defaulted":1}"#,
            "frame 11",
            "  v = 11",
            "  s = [20.0, 1.0, 2.0, 13.0]",
        ]
    );
}

#[test]
fn compile_error_exits_with_1() {
    let output = patchc(&["--emit", "layout"], &fixture("broken.patch"));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("error[E0106]"), "stderr: {}", stderr(&output));
}

#[test]
fn compile_error_in_swap_source_exits_with_1() {
    let broken = fixture("broken.patch");
    let output = patchc(
        &["--swap", broken.to_str().unwrap()],
        &fixture("counter.patch"),
    );
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn missing_source_exits_with_2() {
    let output = patchc(&[], &fixture("does_not_exist.patch"));
    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("does_not_exist.patch"));
}

#[test]
fn verbose_logs_to_stderr_only() {
    let output = patchc(&["--verbose", "--probe", "v"], &fixture("counter.patch"));
    assert!(output.status.success());
    assert!(stderr(&output).contains("parse complete"));
    assert_eq!(stdout(&output), "frame 1\n  v = 1\n");
}
