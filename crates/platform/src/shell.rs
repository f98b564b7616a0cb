//! Shell-string helpers and filename predicates

/// Characters (besides whitespace) that force an argument to be quoted.
const SHELL_SPECIALS: &[char] = &['&', '|', ';', '(', ')'];

/// Join an argv into a single string safe to hand to `sh -c`.
///
/// Any argument containing whitespace or one of `& | ; ( )` is wrapped in
/// double quotes.
pub fn join_command(command: &[String]) -> String {
    let mut out = String::new();
    for (i, arg) in command.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let needs_quoting =
            arg.chars().any(|c| c.is_whitespace()) || arg.chars().any(|c| SHELL_SPECIALS.contains(&c));
        if needs_quoting {
            out.push('"');
            out.push_str(arg);
            out.push('"');
        } else {
            out.push_str(arg);
        }
    }
    out
}

/// Whether a path names a shared library.
///
/// True for a terminal `.so` and for versioned names such as
/// `libfoo.so.1.2.3`. `libfoo.son` and `libfoo.so.a` are not shared
/// libraries.
pub fn is_shared_lib(path: &str) -> bool {
    if path.ends_with(".so") {
        return true;
    }

    // libfoo.so.<digits-and-dots>
    if let Some(idx) = path.rfind(".so.") {
        let suffix = &path[idx + 4..];
        return !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit() || c == '.');
    }

    false
}
