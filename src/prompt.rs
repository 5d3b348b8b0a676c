//! Prompt assembly: the query words plus whatever terminal context is
//! available (piped stdin, recent tmux pane history).

use std::io::Read;
use std::process::Command;
use tracing::warn;

/// Build the full prompt for the first user turn.
pub fn build_prompt(query: &[String]) -> String {
    assemble(query, read_stdin(), capture_pane())
}

/// Pure assembly of the prompt parts.
///
/// Piped input is appended verbatim; pane capture is trimmed. Each part is
/// separated from the query by a blank line.
fn assemble(query: &[String], stdin: Option<String>, pane: Option<String>) -> String {
    let mut prompt = query.join(" ");
    if let Some(input) = stdin {
        prompt.push_str("\n\n");
        prompt.push_str(&input);
    }
    if let Some(captured) = pane {
        prompt.push_str("\n\n");
        prompt.push_str(captured.trim());
    }
    prompt
}

/// Read piped input to end-of-stream when stdin is not an interactive
/// terminal.
fn read_stdin() -> Option<String> {
    if atty::is(atty::Stream::Stdin) {
        return None;
    }
    let mut input = String::new();
    match std::io::stdin().read_to_string(&mut input) {
        Ok(_) => Some(input),
        Err(e) => {
            warn!("failed to read stdin: {e}");
            None
        }
    }
}

/// Capture the visible scrollback of the current tmux pane.
///
/// Only attempted inside a tmux session. Capture failure is non-fatal: the
/// pane content is an enhancement, not a requirement.
fn capture_pane() -> Option<String> {
    if std::env::var_os("TMUX").is_none() {
        return None;
    }
    run_capture("tmux")
}

/// Run the pane-capture command, asking for the last 100 lines.
fn run_capture(program: &str) -> Option<String> {
    let output = match Command::new(program)
        .args(["capture-pane", "-p", "-S", "-100"])
        .output()
    {
        Ok(output) => output,
        Err(e) => {
            warn!("failed to run {program} capture-pane: {e}");
            return None;
        }
    };
    if !output.status.success() {
        warn!("{program} capture-pane exited with {}", output.status);
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_assemble_joins_query_words() {
        assert_eq!(assemble(&words(&["explain", "foo"]), None, None), "explain foo");
    }

    #[test]
    fn test_assemble_appends_stdin_verbatim() {
        let prompt = assemble(&words(&["explain", "foo"]), Some("bar\n".to_string()), None);
        assert_eq!(prompt, "explain foo\n\nbar\n");
    }

    #[test]
    fn test_assemble_trims_pane_capture() {
        let prompt = assemble(
            &words(&["what", "failed"]),
            None,
            Some("\n$ make\nerror: boom\n\n".to_string()),
        );
        assert_eq!(prompt, "what failed\n\n$ make\nerror: boom");
    }

    #[test]
    fn test_assemble_orders_stdin_before_pane() {
        let prompt = assemble(
            &words(&["summarize"]),
            Some("piped\n".to_string()),
            Some("pane".to_string()),
        );
        assert_eq!(prompt, "summarize\n\npiped\n\n\npane");
    }

    #[test]
    fn test_run_capture_tolerates_missing_program() {
        assert!(run_capture("tq-no-such-capture-tool").is_none());
    }

    #[test]
    fn test_run_capture_tolerates_nonzero_exit() {
        // `false` ignores its arguments and always fails.
        assert!(run_capture("false").is_none());
    }
}
