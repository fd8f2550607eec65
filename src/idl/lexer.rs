//! Tokenizer for Avro IDL source.

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier or keyword; may be dotted (`events.schemas.Page`)
    Ident(String),
    Str(String),
    /// Numeric literal, kept as written so it can be re-read as JSON
    Number(String),
    /// `@name`, with the leading `@` stripped
    Annotation(String),
    /// `/** ... */` documentation comment
    Doc(String),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub struct IdlLexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

impl<'a> IdlLexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
        }
    }

    pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
        let mut lexer = IdlLexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn next_token(&mut self) -> Result<Token, String> {
        loop {
            let Some(&c) = self.chars.peek() else {
                return Ok(self.token(TokenKind::Eof));
            };

            if c.is_whitespace() {
                self.bump();
                continue;
            }

            if c == '/' {
                self.bump();
                match self.chars.peek() {
                    Some('/') => {
                        while let Some(c) = self.bump() {
                            if c == '\n' {
                                break;
                            }
                        }
                        continue;
                    }
                    Some('*') => {
                        self.bump();
                        let line = self.line;
                        let is_doc = self.chars.peek() == Some(&'*');
                        let body = self.block_comment(line)?;
                        if is_doc {
                            let text = body.trim_start_matches('*');
                            return Ok(Token {
                                kind: TokenKind::Doc(clean_doc(text)),
                                line,
                            });
                        }
                        continue;
                    }
                    _ => return Err(format!("line {}: unexpected '/'", self.line)),
                }
            }

            let line = self.line;
            let kind = match c {
                '"' => {
                    self.bump();
                    TokenKind::Str(self.string_literal()?)
                }
                '`' => {
                    self.bump();
                    let mut ident = String::new();
                    loop {
                        match self.bump() {
                            Some('`') => break,
                            Some(c) => ident.push(c),
                            None => return Err(format!("line {}: unterminated quoted identifier", line)),
                        }
                    }
                    TokenKind::Ident(ident)
                }
                '@' => {
                    self.bump();
                    let name = self.take_while(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
                    if name.is_empty() {
                        return Err(format!("line {}: annotation without a name", line));
                    }
                    TokenKind::Annotation(name)
                }
                c if c == '-' || c.is_ascii_digit() => {
                    let number = self.take_while(|c| {
                        c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
                    });
                    TokenKind::Number(number)
                }
                c if c.is_alphabetic() || c == '_' => {
                    TokenKind::Ident(self.take_while(|c| c.is_alphanumeric() || c == '_' || c == '.'))
                }
                '{' | '}' | '(' | ')' | '<' | '>' | '[' | ']' | ',' | ';' | '=' | '?' | ':' => {
                    self.bump();
                    TokenKind::Punct(c)
                }
                other => return Err(format!("line {}: unexpected character '{}'", line, other)),
            };
            return Ok(Token { kind, line });
        }
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token { kind, line: self.line }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(&c) = self.chars.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }

    fn block_comment(&mut self, start_line: usize) -> Result<String, String> {
        let mut body = String::new();
        loop {
            match self.bump() {
                Some('*') if self.chars.peek() == Some(&'/') => {
                    self.bump();
                    return Ok(body);
                }
                Some(c) => body.push(c),
                None => return Err(format!("line {}: unterminated comment", start_line)),
            }
        }
    }

    fn string_literal(&mut self) -> Result<String, String> {
        let start = self.line;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(format!("line {}: unterminated string literal", start))
    }
}

fn clean_doc(text: &str) -> String {
    text.lines()
        .map(|l| l.trim().trim_start_matches('*').trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        IdlLexer::tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_field() {
        assert_eq!(
            kinds("union { null, string } source = null; // trailing"),
            vec![
                TokenKind::Ident("union".into()),
                TokenKind::Punct('{'),
                TokenKind::Ident("null".into()),
                TokenKind::Punct(','),
                TokenKind::Ident("string".into()),
                TokenKind::Punct('}'),
                TokenKind::Ident("source".into()),
                TokenKind::Punct('='),
                TokenKind::Ident("null".into()),
                TokenKind::Punct(';'),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_doc_comment_and_annotation() {
        let tokens = kinds("/** A page\n * view */ @namespace(\"events.schemas.web\") record");
        assert_eq!(tokens[0], TokenKind::Doc("A page view".into()));
        assert_eq!(tokens[1], TokenKind::Annotation("namespace".into()));
        assert_eq!(tokens[3], TokenKind::Str("events.schemas.web".into()));
    }

    #[test]
    fn test_line_numbers() {
        let tokens = IdlLexer::tokenize("protocol\n\n/* skip */ X").unwrap();
        assert_eq!(tokens[1].line, 3);
    }

    #[test]
    fn test_unterminated_string() {
        assert!(IdlLexer::tokenize("\"open").is_err());
    }
}
