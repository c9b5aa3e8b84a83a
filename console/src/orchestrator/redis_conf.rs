//! `requirepass` handling for the cache engine's config file

const DIRECTIVE: &str = "requirepass";

fn is_active(line: &str) -> bool {
    line.split_whitespace().next() == Some(DIRECTIVE)
}

fn is_commented(line: &str) -> bool {
    line.trim_start().strip_prefix('#').is_some_and(is_active)
}

/// Rewrite the authentication line of a redis config for `secret`.
///
/// The first active `requirepass` line is replaced and any further active
/// ones dropped. Without an active line, the first commented one is
/// activated, or a new line appended. An empty secret removes active lines
/// instead. Returns `None` when the file would not change.
pub fn rewrite_requirepass(config: &str, secret: &str) -> Option<String> {
    let wanted = format!("{} {}", DIRECTIVE, secret);
    let mut lines: Vec<String> = config.split('\n').map(str::to_string).collect();

    if lines.iter().any(|l| is_active(l)) {
        let mut replaced = false;
        lines.retain_mut(|line| {
            if !is_active(line) {
                return true;
            }
            if secret.is_empty() || replaced {
                return false;
            }
            *line = wanted.clone();
            replaced = true;
            true
        });
    } else if !secret.is_empty() {
        match lines.iter().position(|l| is_commented(l)) {
            Some(i) => lines[i] = wanted,
            None => {
                // keep a trailing newline trailing
                if lines.last().map(String::is_empty).unwrap_or(false) {
                    let at = lines.len() - 1;
                    lines.insert(at, wanted);
                } else {
                    lines.push(wanted);
                }
            }
        }
    }

    let rewritten = lines.join("\n");
    if rewritten == config {
        None
    } else {
        Some(rewritten)
    }
}
