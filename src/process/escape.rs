//! Command-line assembly
//!
//! Flattens an argument vector into the single command-line string the host
//! process launcher expects. Switch-style arguments (leading `/`) pass
//! through verbatim; everything else is quoted.

/// Join an argument vector into one shell-safe command line.
///
/// Each argument is wrapped in double quotes with backslashes doubled and
/// embedded quotes escaped, except arguments beginning with `/`, which are
/// emitted as-is. An empty vector produces the empty string.
pub fn escape_arguments<S: AsRef<str>>(arguments: &[S]) -> String {
    arguments
        .iter()
        .map(|a| escape_argument(a.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn escape_argument(argument: &str) -> String {
    if argument.starts_with('/') {
        return argument.to_string();
    }

    let escaped = argument.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_vector() {
        let none: [&str; 0] = [];
        assert_eq!(escape_arguments(&none), "");
    }

    #[test]
    fn test_plain_arguments_are_quoted() {
        assert_eq!(escape_arguments(&["foo", "bar baz"]), r#""foo" "bar baz""#);
    }

    #[test]
    fn test_switches_pass_through_verbatim() {
        assert_eq!(escape_arguments(&["/flag", "/p:x y"]), "/flag /p:x y");
    }

    #[test]
    fn test_quotes_and_backslashes_are_escaped() {
        assert_eq!(
            escape_arguments(&["foo", "/flag", "has \"quote\"", "back\\slash"]),
            r#""foo" /flag "has \"quote\"" "back\\slash""#
        );
    }

    #[test]
    fn test_backslash_before_quote() {
        // Backslash doubling happens before quote escaping
        assert_eq!(escape_arguments(&["a\\\"b"]), r#""a\\\"b""#);
    }
}
