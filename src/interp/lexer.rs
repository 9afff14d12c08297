//! Tokenizer for MiniPython source
//!
//! Line oriented: each logical line is one physical line, blank and
//! comment-only lines are skipped, and leading whitespace turns into
//! `Indent` / `Dedent` tokens against an indentation stack.

use std::iter::Peekable;
use std::str::Chars;

/// Tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Identifier or keyword
    Name(String),
    /// Integer literal
    Int(i64),
    /// String literal, escapes resolved
    Str(String),
    /// f-string literal, raw body
    FStr(String),
    /// Operator or punctuation
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

/// A token with the line it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    pub token: Token,
    pub line: usize,
}

/// Syntax error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SyntaxError: {} (line {})", self.message, self.line)
    }
}

impl std::error::Error for SyntaxError {}

const TAB_WIDTH: usize = 4;

/// Tokenize a whole program
pub fn tokenize(source: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut out = Vec::new();
    let mut indents = vec![0usize];
    let mut last_line = 0;

    for (idx, raw) in source.lines().enumerate() {
        let line = idx + 1;
        let body = raw.trim_start();
        if body.is_empty() || body.starts_with('#') {
            continue;
        }
        last_line = line;

        let width = indentation(raw);
        let current = indents.last().copied().unwrap_or(0);
        if width > current {
            indents.push(width);
            out.push(Spanned {
                token: Token::Indent,
                line,
            });
        } else {
            while width < indents.last().copied().unwrap_or(0) {
                indents.pop();
                out.push(Spanned {
                    token: Token::Dedent,
                    line,
                });
            }
            if width != indents.last().copied().unwrap_or(0) {
                return Err(SyntaxError::new(
                    line,
                    "unindent does not match any outer indentation level",
                ));
            }
        }

        Lexer::new(body, line).run(&mut out)?;
        out.push(Spanned {
            token: Token::Newline,
            line,
        });
    }

    while indents.len() > 1 {
        indents.pop();
        out.push(Spanned {
            token: Token::Dedent,
            line: last_line,
        });
    }
    out.push(Spanned {
        token: Token::Eof,
        line: last_line,
    });
    Ok(out)
}

/// Tokenize a single expression (used for f-string fields)
pub fn tokenize_expr(text: &str, line: usize) -> Result<Vec<Spanned>, SyntaxError> {
    let mut out = Vec::new();
    Lexer::new(text, line).run(&mut out)?;
    out.push(Spanned {
        token: Token::Eof,
        line,
    });
    Ok(out)
}

fn indentation(raw: &str) -> usize {
    raw.chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
        .sum()
}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
    line: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str, line: usize) -> Self {
        Self {
            chars: text.chars().peekable(),
            line,
        }
    }

    fn run(mut self, out: &mut Vec<Spanned>) -> Result<(), SyntaxError> {
        while let Some(&c) = self.chars.peek() {
            let token = match c {
                ' ' | '\t' => {
                    self.chars.next();
                    continue;
                }
                '#' => break,
                '0'..='9' => self.number()?,
                '\'' | '"' => {
                    self.chars.next();
                    Token::Str(self.string(c)?)
                }
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => Token::Op(self.operator()?),
            };
            out.push(Spanned {
                token,
                line: self.line,
            });
        }
        Ok(())
    }

    fn number(&mut self) -> Result<Token, SyntaxError> {
        let mut digits = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.chars.next();
            } else if c == '_' {
                self.chars.next();
            } else {
                break;
            }
        }
        digits
            .parse()
            .map(Token::Int)
            .map_err(|_| SyntaxError::new(self.line, "integer literal too large"))
    }

    fn word(&mut self) -> Result<Token, SyntaxError> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }

        if matches!(word.as_str(), "f" | "F") {
            if let Some(&quote) = self.chars.peek() {
                if quote == '\'' || quote == '"' {
                    self.chars.next();
                    return Ok(Token::FStr(self.string(quote)?));
                }
            }
        }
        Ok(Token::Name(word))
    }

    fn string(&mut self, quote: char) -> Result<String, SyntaxError> {
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(value),
                Some('\\') => match self.chars.next() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('r') => value.push('\r'),
                    Some('0') => value.push('\0'),
                    Some('\\') => value.push('\\'),
                    Some('\'') => value.push('\''),
                    Some('"') => value.push('"'),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => break,
                },
                Some(c) => value.push(c),
                None => break,
            }
        }
        Err(SyntaxError::new(self.line, "unterminated string literal"))
    }

    fn operator(&mut self) -> Result<&'static str, SyntaxError> {
        let c = self.chars.next().unwrap_or('\0');
        let next = self.chars.peek().copied();
        let two = match (c, next) {
            ('/', Some('/')) => Some("//"),
            ('=', Some('=')) => Some("=="),
            ('!', Some('=')) => Some("!="),
            ('<', Some('=')) => Some("<="),
            ('>', Some('=')) => Some(">="),
            ('+', Some('=')) => Some("+="),
            ('-', Some('=')) => Some("-="),
            ('*', Some('=')) => Some("*="),
            _ => None,
        };
        if let Some(op) = two {
            self.chars.next();
            return Ok(op);
        }

        match c {
            '+' => Ok("+"),
            '-' => Ok("-"),
            '*' => Ok("*"),
            '%' => Ok("%"),
            '<' => Ok("<"),
            '>' => Ok(">"),
            '=' => Ok("="),
            '(' => Ok("("),
            ')' => Ok(")"),
            ',' => Ok(","),
            ':' => Ok(":"),
            _ => Err(SyntaxError::new(
                self.line,
                format!("invalid character '{}'", c),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_simple_call() {
        assert_eq!(
            tokens("print('hi')"),
            vec![
                Token::Name("print".into()),
                Token::Op("("),
                Token::Str("hi".into()),
                Token::Op(")"),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_and_dedent() {
        let toks = tokens("while x:\n    x -= 1\nprint(x)\n");
        assert!(toks.contains(&Token::Indent));
        assert!(toks.contains(&Token::Dedent));
        assert!(toks.contains(&Token::Op("-=")));
    }

    #[test]
    fn test_blank_and_comment_lines_skipped() {
        let toks = tokens("# header\n\nx = 1  # trailing\n");
        assert_eq!(
            toks,
            vec![
                Token::Name("x".into()),
                Token::Op("="),
                Token::Int(1),
                Token::Newline,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_fstring_and_escapes() {
        let toks = tokens("f\"sum {z}\\n\"");
        assert_eq!(toks[0], Token::FStr("sum {z}\n".into()));
    }

    #[test]
    fn test_floor_div_operator() {
        let toks = tokens("a // b");
        assert_eq!(toks[1], Token::Op("//"));
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n        y = 1\n    z = 2\n").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("print('oops)").unwrap_err();
        assert_eq!(err.message, "unterminated string literal");
    }
}
