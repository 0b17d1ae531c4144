//! Source preprocessing, run before parsing.
//!
//! Text between balanced `##` marker pairs is interpreted as
//! `##<command>##<payload>##`: the payload is written to `tabic_pre.src`,
//! the command is executed via the host shell, and the resulting
//! `tabic_pre.dst` replaces the entire block in the source text.

use std::fs;
use std::process::Command;

use crate::diag::{Diagnostic, Kind};

const DELIMITER: &str = "##";
const SRC_FILE: &str = "tabic_pre.src";
const DST_FILE: &str = "tabic_pre.dst";

/// Expands every preprocessor block in `src`, returning the rewritten
/// source. Unbalanced markers or a failing command are creation-stage
/// diagnostics attributed to the opening marker.
pub fn preprocess(src: &str) -> Result<String, Diagnostic> {
    let mut out = String::from(src);
    let mut cursor = 0usize;
    while let Some(opener) = out[cursor..].find(DELIMITER).map(|k| k + cursor) {
        let command_start = opener + DELIMITER.len();
        let Some(command_end) = out[command_start..].find(DELIMITER).map(|k| k + command_start) else {
            return Err(unbalanced(&out, opener));
        };
        let payload_start = command_end + DELIMITER.len();
        let Some(closer) = out[payload_start..].find(DELIMITER).map(|k| k + payload_start) else {
            return Err(unbalanced(&out, opener));
        };
        let command = out[command_start..command_end].to_string();
        let payload = out[payload_start..closer].to_string();

        let (line, col) = position(&out, opener);
        fs::write(SRC_FILE, payload)
            .map_err(|e| Diagnostic::new(Kind::CannotRead, line, col, format!("writing {SRC_FILE}: {e}")))?;
        let status = shell(&command)
            .map_err(|e| Diagnostic::new(Kind::CannotRead, line, col, format!("running `{command}`: {e}")))?;
        if !status.success() {
            return Err(Diagnostic::new(
                Kind::CannotRead,
                line,
                col,
                format!("preprocessor command `{command}` exited with {status}"),
            ));
        }
        let replacement = fs::read_to_string(DST_FILE)
            .map_err(|e| Diagnostic::new(Kind::CannotRead, line, col, format!("reading {DST_FILE}: {e}")))?;
        out.replace_range(opener..closer + DELIMITER.len(), &replacement);
        cursor = opener + replacement.len();
    }
    Ok(out)
}

fn shell(command: &str) -> std::io::Result<std::process::ExitStatus> {
    if cfg!(windows) {
        Command::new("cmd").args(["/C", command]).status()
    } else {
        Command::new("sh").args(["-c", command]).status()
    }
}

fn unbalanced(src: &str, opener: usize) -> Diagnostic {
    let (line, col) = position(src, opener);
    Diagnostic::new(Kind::SyntaxError, line, col, "unbalanced preprocessor markers")
}

fn position(src: &str, offset: usize) -> (u32, u32) {
    let mut line = 1u32;
    let mut col = 1u32;
    for ch in src[..offset].chars() {
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_without_markers_is_unchanged() {
        let src = "function main () -> Int { return 0 }";
        assert_eq!(preprocess(src).unwrap(), src);
    }

    #[test]
    fn unbalanced_markers_are_reported() {
        let err = preprocess("before ##cat tabic_pre.src\nafter").unwrap_err();
        assert_eq!(err.kind, Kind::SyntaxError);
        assert_eq!(err.line, 1);
    }
}
