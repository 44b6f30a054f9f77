//! Light lexical inspection of guest source.
//!
//! Only identifiers are extracted; string, template and regex literals and
//! comments are skipped so a `return` inside a message does not count.

/// Keywords after which a `/` opens a regular expression literal.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "case", "in", "of", "new", "delete", "void", "throw", "instanceof",
    "yield", "await", "do", "else",
];

/// Identifier-like tokens recovered from guest source.
struct Scan<'a> {
    identifiers: Vec<&'a str>,
    /// `false` when a string, template or comment ran to the end of input.
    complete: bool,
}

fn scan(code: &str) -> Scan<'_> {
    let bytes = code.as_bytes();
    let mut identifiers = Vec::new();
    let mut complete = true;
    // Whether a `/` at this point starts a regex rather than a division.
    let mut regex_allowed = true;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        match b {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                complete &= i < bytes.len();
                i += 2;
            }
            b'/' if regex_allowed => {
                match skip_regex(bytes, i + 1) {
                    Some(end) => {
                        i = end;
                        regex_allowed = false;
                    }
                    None => i += 1,
                }
            }
            b'\'' | b'"' | b'`' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
                complete &= i < bytes.len();
                i += 1;
                regex_allowed = false;
            }
            _ if is_ident_start(b) => {
                let start = i;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                let word = &code[start..i];
                regex_allowed = REGEX_PREFIX_KEYWORDS.contains(&word);
                identifiers.push(word);
            }
            _ if b.is_ascii_digit() => {
                while i < bytes.len() && (is_ident_continue(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                regex_allowed = false;
            }
            _ if b.is_ascii_whitespace() => i += 1,
            b')' | b']' => {
                regex_allowed = false;
                i += 1;
            }
            _ => {
                regex_allowed = true;
                i += 1;
            }
        }
    }
    Scan { identifiers, complete }
}

/// Skips a regex body starting just after its opening `/`, returning the
/// index past its flags. `None` when no closing `/` appears on the line.
fn skip_regex(bytes: &[u8], mut i: usize) -> Option<usize> {
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b'\n' | b'\r' => return None,
            b'[' => in_class = true,
            b']' => in_class = false,
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                return Some(i);
            }
            _ => {}
        }
        i += 1;
    }
    None
}

const fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'$' || b >= 0x80
}

const fn is_ident_continue(b: u8) -> bool {
    is_ident_start(b) || b.is_ascii_digit()
}

/// Returns `true` if the code uses a `return` statement anywhere.
///
/// Source the lexer cannot close falls back to a plain substring check.
pub(crate) fn has_return(code: &str) -> bool {
    let scan = scan(code);
    if scan.complete {
        scan.identifiers.contains(&"return")
    } else {
        code.contains("return")
    }
}

/// Returns `true` if the code declares an `execute` entry point.
pub(crate) fn declares_execute(code: &str) -> bool {
    let scan = scan(code);
    if !scan.complete {
        return ["function execute", "const execute", "let execute", "var execute"]
            .iter()
            .any(|pattern| code.contains(pattern));
    }
    scan.identifiers.windows(2).any(|pair| {
        matches!(pair[0], "function" | "const" | "let" | "var") && pair[1] == "execute"
    })
}

/// Wraps code so its result can be captured and its declarations stay local.
///
/// Code with a `return` becomes an immediately-invoked function. Anything
/// else runs inside a block, whose completion value is the last expression.
pub(crate) fn prepare(code: &str) -> String {
    if has_return(code) {
        format!("(function () {{\n{code}\n}})()")
    } else {
        format!("{{\n{code}\n}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_strings_and_comments() {
        assert!(!has_return("'no return here' // return\n/* return */ `return`"));
        assert!(has_return("if (x) { return 1 }"));
        assert!(!has_return("const returned = 1; returned"));
    }

    #[test]
    fn escaped_quotes_do_not_end_strings() {
        assert!(!has_return(r#""a \" return"; 1"#));
    }

    #[test]
    fn detects_execute_declarations() {
        assert!(declares_execute("function execute(context) { return 1 }"));
        assert!(declares_execute("async function execute(ctx) {}"));
        assert!(declares_execute("const execute = (ctx) => ctx.args"));
        assert!(!declares_execute("executeLater(); // function execute"));
        assert!(!declares_execute("obj.execute = 1"));
    }

    #[test]
    fn quotes_inside_regex_literals_are_not_strings() {
        let code = r#"const s = "it's".replace(/'/g, ""); return s;"#;
        assert!(has_return(code));
        assert!(prepare(code).starts_with("(function () {"));
        assert!(declares_execute("const q = /`/; function execute(context) { return 1 }"));
        assert!(has_return(r#"const re = /["\/]/; return re.test(x)"#));
        assert!(has_return("const re = /[/'`]+/gi; return 1"));
    }

    #[test]
    fn regex_after_keyword_is_skipped() {
        assert!(!has_return("typeof /return/"));
        assert!(has_return("if (ok) return /a'b/.test(s)"));
    }

    #[test]
    fn division_is_not_a_regex() {
        assert!(!has_return("a / b"));
        assert!(has_return("x = a / b / c; return x"));
        assert!(has_return("const half = (n) / 2; const q = arr[0] / 'x'.length; return half"));
        assert!(has_return("let n = 1.5 / 3; return n"));
    }

    #[test]
    fn unterminated_input_falls_back_to_substrings() {
        assert!(has_return("const s = 'open; return s"));
        assert!(declares_execute("const t = `open; function execute(context) {}"));
        assert!(!has_return("'open"));
    }

    #[test]
    fn wraps_by_return_presence() {
        assert_eq!(prepare("1 + 2"), "{\n1 + 2\n}");
        assert!(prepare("return 3").starts_with("(function () {"));
    }
}
