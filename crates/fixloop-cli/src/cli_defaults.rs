use std::ffi::OsString;

const PREDEFINED_COMMANDS: &[&str] = &["repl", "task", "exec", "languages", "help"];

/// `fixloop "print primes"` is shorthand for `fixloop task "print primes"`.
pub(crate) fn normalize_cli_args<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut normalized: Vec<OsString> = args.into_iter().collect();
    if normalized.len() < 2 {
        return normalized;
    }

    let first = normalized[1].to_string_lossy();
    let is_known_subcommand = PREDEFINED_COMMANDS.iter().any(|c| *c == first.as_ref());
    let is_flag = first.starts_with('-');

    if !is_known_subcommand && !is_flag {
        normalized.insert(1, OsString::from("task"));
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::normalize_cli_args;
    use std::ffi::OsString;

    fn args(items: &[&str]) -> Vec<OsString> {
        items.iter().map(OsString::from).collect()
    }

    #[test]
    fn bare_prompt_becomes_task() {
        let normalized = normalize_cli_args(args(&["fixloop", "list files here"]));
        assert_eq!(normalized, args(&["fixloop", "task", "list files here"]));
    }

    #[test]
    fn known_commands_and_flags_untouched() {
        for input in [
            vec!["fixloop", "exec", "-"],
            vec!["fixloop", "languages"],
            vec!["fixloop", "--help"],
            vec!["fixloop"],
        ] {
            assert_eq!(normalize_cli_args(args(&input)), args(&input));
        }
    }
}
