//! Lexical structure check for Python sources
//!
//! Not a parser and not a grammar check. It scans tokens only far enough to
//! catch unterminated strings, unbalanced brackets, broken indentation and
//! tab/space mixing. A file that passes can still be rejected by the
//! interpreter, e.g. `x = = 1` or `print(1 2)`.

use std::fmt;

/// First structural problem found in a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxIssue {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for SyntaxIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

fn issue(line: usize, message: impl Into<String>) -> SyntaxIssue {
    SyntaxIssue {
        line,
        message: message.into(),
    }
}

struct OpenString {
    quote: char,
    triple: bool,
    line: usize,
}

#[derive(Default)]
struct Scanner {
    brackets: Vec<(char, usize)>,
    indents: Vec<usize>,
    /// Line of a `:` that still needs an indented body
    pending_block: Option<usize>,
    string: Option<OpenString>,
    continuation: bool,
}

/// Run the structural scan over a Python source file
///
/// `Ok` means no structural defect was found, not that the file parses.
pub fn check(source: &str) -> Result<(), SyntaxIssue> {
    let mut scanner = Scanner {
        indents: vec![0],
        ..Scanner::default()
    };

    let mut last_line = 0;
    for (index, line) in source.lines().enumerate() {
        let lineno = index + 1;
        last_line = lineno;
        scanner.line(line, lineno)?;
    }

    scanner.finish(last_line)
}

impl Scanner {
    fn line(&mut self, line: &str, lineno: usize) -> Result<(), SyntaxIssue> {
        let logical_start =
            self.brackets.is_empty() && self.string.is_none() && !self.continuation;
        self.continuation = false;

        if logical_start {
            let content = line.trim_start_matches([' ', '\t', '\x0c']);
            if content.is_empty() || content.starts_with('#') {
                return Ok(());
            }

            let leading = &line[..line.len() - content.len()];
            if leading.contains(' ') && leading.contains('\t') {
                return Err(issue(
                    lineno,
                    "inconsistent use of tabs and spaces in indentation",
                ));
            }
            self.indent(indent_width(leading), lineno)?;
        }

        let last_significant = self.scan(line, lineno)?;

        let logical_end =
            self.brackets.is_empty() && self.string.is_none() && !self.continuation;
        if logical_end && last_significant == Some(':') {
            self.pending_block = Some(lineno);
        }

        Ok(())
    }

    fn indent(&mut self, width: usize, lineno: usize) -> Result<(), SyntaxIssue> {
        let top = self.indents.last().copied().unwrap_or(0);

        if let Some(opened) = self.pending_block.take() {
            if width > top {
                self.indents.push(width);
                return Ok(());
            }
            return Err(issue(
                lineno,
                format!("expected an indented block after line {}", opened),
            ));
        }

        if width > top {
            return Err(issue(lineno, "unexpected indent"));
        }

        while self.indents.last().copied().unwrap_or(0) > width {
            self.indents.pop();
        }
        if self.indents.last().copied().unwrap_or(0) != width {
            return Err(issue(
                lineno,
                "unindent does not match any outer indentation level",
            ));
        }

        Ok(())
    }

    /// Tokenise one physical line; returns the last non-blank character outside strings and comments
    fn scan(&mut self, line: &str, lineno: usize) -> Result<Option<char>, SyntaxIssue> {
        let chars: Vec<char> = line.chars().collect();
        let len = chars.len();
        let mut last = None;
        let mut escaped_newline = false;
        let mut i = 0;

        while i < len {
            let c = chars[i];

            if let Some(open) = &self.string {
                if c == '\\' {
                    escaped_newline = i + 1 == len;
                    i += 2;
                    continue;
                }
                if c == open.quote {
                    if !open.triple {
                        self.string = None;
                        i += 1;
                        continue;
                    }
                    if i + 2 < len && chars[i + 1] == c && chars[i + 2] == c {
                        self.string = None;
                        i += 3;
                        continue;
                    }
                }
                i += 1;
                continue;
            }

            match c {
                '#' => break,
                '"' | '\'' => {
                    let triple = i + 2 < len && chars[i + 1] == c && chars[i + 2] == c;
                    self.string = Some(OpenString {
                        quote: c,
                        triple,
                        line: lineno,
                    });
                    last = Some(c);
                    i += if triple { 3 } else { 1 };
                    continue;
                }
                '(' | '[' | '{' => self.brackets.push((c, lineno)),
                ')' | ']' | '}' => match self.brackets.pop() {
                    Some((open, _)) if matching(open) == c => {}
                    Some((open, opened_at)) => {
                        return Err(issue(
                            lineno,
                            format!(
                                "closing '{}' does not match opening '{}' on line {}",
                                c, open, opened_at
                            ),
                        ))
                    }
                    None => return Err(issue(lineno, format!("unmatched '{}'", c))),
                },
                '\\' => {
                    if chars[i + 1..].iter().all(|c| c.is_whitespace()) {
                        self.continuation = true;
                        break;
                    }
                    return Err(issue(
                        lineno,
                        "unexpected character after line continuation character",
                    ));
                }
                _ => {}
            }

            if !c.is_whitespace() {
                last = Some(c);
            }
            i += 1;
        }

        if let Some(open) = &self.string {
            if !open.triple && !escaped_newline {
                return Err(issue(open.line, "unterminated string literal"));
            }
        }

        Ok(last)
    }

    fn finish(&self, last_line: usize) -> Result<(), SyntaxIssue> {
        if let Some(open) = &self.string {
            let what = if open.triple {
                "unterminated triple-quoted string literal"
            } else {
                "unterminated string literal"
            };
            return Err(issue(open.line, what));
        }

        if let Some((open, line)) = self.brackets.last() {
            return Err(issue(*line, format!("'{}' was never closed", open)));
        }

        if let Some(opened) = self.pending_block {
            return Err(issue(
                last_line,
                format!("expected an indented block after line {}", opened),
            ));
        }

        if self.continuation {
            return Err(issue(last_line, "unexpected end of file after line continuation"));
        }

        Ok(())
    }
}

fn matching(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

/// Column of the first non-blank character, tabs advancing to multiples of 8
fn indent_width(leading: &str) -> usize {
    leading.chars().fold(0, |col, c| match c {
        '\t' => (col / 8 + 1) * 8,
        _ => col + 1,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_module_passes() {
        let source = r#"
from django.db import models


class Product(models.Model):
    """Inventory product.

    Spans several lines.
    """
    name = models.CharField(max_length=100)  # trailing comment
    tags = [
        "a",
        'b',
    ]

    class Meta:
        db_table = "inventory_product"

    def label(self):
        if self.name:
            return f"{self.name} ({len(self.tags)})"
        total = 1 + \
            2
        return "it's" + 'say "hi"' + "\\"
"#;
        assert_eq!(check(source), Ok(()));
    }

    #[test]
    fn test_unterminated_string() {
        let err = check("x = 1\nname = 'abc\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn test_unterminated_triple_string() {
        let err = check("doc = \"\"\"start\nmore\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("triple-quoted"));
    }

    #[test]
    fn test_unclosed_bracket() {
        let err = check("values = [1, 2,\n3\n").unwrap_err();
        assert_eq!(err, issue(1, "'[' was never closed"));
    }

    #[test]
    fn test_mismatched_bracket() {
        let err = check("call(1, 2]\n").unwrap_err();
        assert!(err.message.contains("does not match"));
    }

    #[test]
    fn test_unexpected_indent() {
        let err = check("x = 1\n    y = 2\n").unwrap_err();
        assert_eq!(err, issue(2, "unexpected indent"));
    }

    #[test]
    fn test_missing_block() {
        let err = check("def f():\nreturn 1\n").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.message.contains("expected an indented block"));

        assert!(check("if ready:\n").is_err());
    }

    #[test]
    fn test_inconsistent_dedent() {
        let err = check("if a:\n        b = 1\n    c = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("unindent"));
    }

    #[test]
    fn test_mixed_tabs_and_spaces() {
        let err = check("if a:\n \tb = 1\n").unwrap_err();
        assert!(err.message.contains("tabs and spaces"));
    }

    #[test]
    fn test_grammar_errors_are_out_of_reach() {
        // Structurally sound but not valid Python
        assert_eq!(check("x = = 1\n"), Ok(()));
        assert_eq!(check("print(1 2)\n"), Ok(()));
    }

    #[test]
    fn test_colons_inside_brackets_do_not_open_blocks() {
        assert_eq!(check("d = {\n    'a':\n        1,\n}\nx = d['a']\n"), Ok(()));
    }
}
