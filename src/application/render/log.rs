//! LaTeX log condensing.
//!
//! Engine logs are long and mostly noise; the error report a caller wants is
//! the slice between the first `! ` error line and TeX's memory summary.
//! When that window cannot be located the log is returned unchanged rather
//! than losing information.

const ERROR_START: &str = "\n! ";
const ERROR_END: &str = "\nHere is how much of TeX's memory";

const OMITTED_PREFIXES: &[&str] = &[
    "See the LaTeX manual or LaTeX",
    "Type  H <return>  for",
    " ...",
];

/// Condense a raw engine log down to its error report.
pub fn abstract_latex_log(log: &str) -> String {
    let Some(start) = log.find(ERROR_START) else {
        return log.to_string();
    };
    let tail = &log[start + 1..];
    let window = match tail.find(ERROR_END) {
        Some(end) => &tail[..end],
        None => tail,
    };

    let mut lines: Vec<&str> = Vec::new();
    for line in window.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if OMITTED_PREFIXES.iter().any(|p| line.starts_with(p)) {
            continue;
        }
        lines.push(line);
    }
    lines.join("\n")
}
