use anyhow::{Result, bail};

/// Replaces `${NAME}` references in `input` using `lookup`.
///
/// `$$` yields a literal `$`; a `$` not followed by `{` is kept as is.
///
/// # Errors
///
/// Fails when a referenced variable is unset or a reference is not closed.
pub fn expand_env<F>(input: &str, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        if let Some(after) = tail.strip_prefix('$') {
            out.push('$');
            rest = after;
        } else if let Some(body) = tail.strip_prefix('{') {
            let Some(end) = body.find('}') else {
                bail!("unterminated variable reference `${{{body}`");
            };
            let name = &body[..end];
            match lookup(name) {
                Some(value) => out.push_str(&value),
                None => bail!("environment variable `{name}` is not set"),
            }
            rest = &body[end + 1..];
        } else {
            out.push('$');
            rest = tail;
        }
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(name: &str) -> Option<String> {
        (name == "HOME").then(|| "/home/tools".to_owned())
    }

    #[test]
    fn substitutes_references() {
        assert_eq!(expand_env("dir: ${HOME}/cache", vars).unwrap(), "dir: /home/tools/cache");
        assert_eq!(expand_env("cost: $5 or $$HOME", vars).unwrap(), "cost: $5 or $HOME");
    }

    #[test]
    fn unset_and_unterminated_fail() {
        assert!(expand_env("${MISSING}", vars).unwrap_err().to_string().contains("MISSING"));
        assert!(expand_env("${HOME", vars).is_err());
    }
}
