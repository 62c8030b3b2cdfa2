//! Output-token prediction via an external predictor command.
//!
//! The composite scorer needs an estimate of how many tokens a prompt
//! will generate. A configured predictor command line is run through the
//! shell with the prompt appended as a single-quoted argument (the
//! command may carry its own env/cwd setup). Anything that is not a
//! positive float under 10000 on stdout falls back to the default.

use std::process::Command;

/// Token count assumed when prediction fails.
pub const DEFAULT_TOKENS: f64 = 75.0;

/// Upper bound on a plausible prediction.
const MAX_TOKENS: f64 = 10_000.0;

/// Escape a string for inclusion inside single quotes in a shell command.
pub fn shell_escape_single_quotes(s: &str) -> String {
    s.replace('\'', "'\\''")
}

/// Run the predictor for a prompt, falling back to [`DEFAULT_TOKENS`].
pub fn predict_tokens(command: &str, prompt: &str) -> f64 {
    let line = format!("{} '{}'", command, shell_escape_single_quotes(prompt));

    let output = match Command::new("sh").arg("-c").arg(&line).output() {
        Ok(out) => out,
        Err(e) => {
            tracing::warn!(error = %e, "Predictor failed to run, using default token count");
            return DEFAULT_TOKENS;
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    match stdout.trim().parse::<f64>() {
        Ok(v) if v > 0.0 && v < MAX_TOKENS => v,
        _ => {
            tracing::warn!(
                stdout = %stdout.trim(),
                "Predictor returned an invalid value, using default token count"
            );
            DEFAULT_TOKENS
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape_single_quotes("plain"), "plain");
        assert_eq!(shell_escape_single_quotes("it's"), "it'\\''s");
        assert_eq!(shell_escape_single_quotes("''"), "'\\'''\\''");
    }

    #[test]
    fn test_predictor_parses_stdout() {
        assert_eq!(predict_tokens("echo 42", "ignored"), 42.0);
    }

    #[test]
    fn test_predictor_rejects_out_of_range() {
        assert_eq!(predict_tokens("echo -5", "p"), DEFAULT_TOKENS);
        assert_eq!(predict_tokens("echo 50000", "p"), DEFAULT_TOKENS);
        assert_eq!(predict_tokens("echo not-a-number", "p"), DEFAULT_TOKENS);
    }

    #[test]
    fn test_predictor_missing_binary_falls_back() {
        assert_eq!(
            predict_tokens("/definitely/not/a/predictor", "p"),
            DEFAULT_TOKENS
        );
    }

    #[test]
    fn test_prompt_with_quotes_reaches_predictor_intact() {
        // `echo` sees exactly the original prompt after shell unquoting, so a
        // numeric prompt round-trips through the argument position.
        let v = predict_tokens("printf %s", "123");
        assert_eq!(v, 123.0);
    }
}
