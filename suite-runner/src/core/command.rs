//! Construction of the external test-runner command line.

use std::path::{Path, PathBuf};

/// Log file name passed to the runner.
pub const LOG_FILE: &str = "log.html";
/// Report file name passed to the runner.
pub const REPORT_FILE: &str = "report.html";
/// Machine-readable output the runner writes next to the log and report.
pub const OUTPUT_XML_FILE: &str = "output.xml";

/// Build `launcher -i <tag> -d <out_dir> --log log.html --report report.html <suites..>`.
pub fn build_runner_command(
    launcher: &[String],
    tag: &str,
    out_dir: &Path,
    suites: &[PathBuf],
) -> Vec<String> {
    let mut cmd: Vec<String> = launcher.to_vec();
    cmd.extend([
        "-i".to_string(),
        tag.to_string(),
        "-d".to_string(),
        out_dir.display().to_string(),
        "--log".to_string(),
        LOG_FILE.to_string(),
        "--report".to_string(),
        REPORT_FILE.to_string(),
    ]);
    cmd.extend(suites.iter().map(|suite| suite.display().to_string()));
    cmd
}
