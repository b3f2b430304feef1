//! Tokenizer for the snippet language.

use super::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Template(Vec<TemplateChunk>),
    /// Identifiers and keywords; the parser tells them apart.
    Ident(String),
    Punct(&'static str),
    Eof,
}

/// Raw piece of a template literal. Interpolations keep their source
/// text and offset; the parser parses them as expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateChunk {
    Text(String),
    Interpolation { source: String, offset: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub offset: usize,
    /// A line break separates this token from the previous one.
    pub newline_before: bool,
}

/// Longest first, so that `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "...", "===", "!==", "**=", "=>", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--",
    "+=", "-=", "*=", "/=", "%=", "**", "+", "-", "*", "/", "%", "<", ">", "=", "!", "?", ":",
    ".", ",", ";", "(", ")", "[", "]", "{", "}",
];

pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Added to every offset so nested template sources report positions
    /// relative to the whole snippet.
    base: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, base: usize) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            base,
        }
    }

    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let newline_before = self.skip_trivia()?;
            let offset = self.base + self.pos;
            let Some(c) = self.peek_char() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    offset,
                    newline_before,
                });
                return Ok(tokens);
            };

            let kind = if c.is_ascii_digit()
                || (c == '.' && self.peek_byte(1).is_some_and(|b| b.is_ascii_digit()))
            {
                self.number()?
            } else if c == '"' || c == '\'' {
                self.string(c)?
            } else if c == '`' {
                self.template()?
            } else if is_ident_start(c) {
                TokenKind::Ident(self.ident())
            } else {
                self.punct(c)?
            };

            tokens.push(Token {
                kind,
                offset,
                newline_before,
            });
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_byte(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.base + self.pos)
    }

    /// Skips whitespace and comments; reports whether a newline was seen.
    fn skip_trivia(&mut self) -> Result<bool, ParseError> {
        let mut newline = false;
        loop {
            match self.peek_char() {
                Some('\n') => {
                    newline = true;
                    self.pos += 1;
                }
                Some(c) if c.is_whitespace() => self.pos += c.len_utf8(),
                Some('/') if self.peek_byte(1) == Some(b'/') => {
                    while let Some(c) = self.peek_char() {
                        if c == '\n' {
                            break;
                        }
                        self.pos += c.len_utf8();
                    }
                }
                Some('/') if self.peek_byte(1) == Some(b'*') => {
                    let rest = &self.source[self.pos + 2..];
                    let Some(end) = rest.find("*/") else {
                        return Err(self.error("unterminated comment"));
                    };
                    newline |= rest[..end].contains('\n');
                    self.pos += end + 4;
                }
                _ => return Ok(newline),
            }
        }
    }

    fn number(&mut self) -> Result<TokenKind, ParseError> {
        let start = self.pos;
        if self.peek_byte(0) == Some(b'0')
            && matches!(self.peek_byte(1), Some(b'x') | Some(b'X'))
        {
            self.pos += 2;
            while self.peek_byte(0).is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let digits = &self.source[start + 2..self.pos];
            return u64::from_str_radix(digits, 16)
                .map(|n| TokenKind::Number(n as f64))
                .map_err(|_| self.error("invalid hexadecimal literal"));
        }

        while self.peek_byte(0).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek_byte(0) == Some(b'.') {
            self.pos += 1;
            while self.peek_byte(0).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek_byte(0), Some(b'e') | Some(b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_byte(1), Some(b'+') | Some(b'-')) {
                ahead = 2;
            }
            if self.peek_byte(ahead).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += ahead;
                while self.peek_byte(0).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }
        if self.peek_char().is_some_and(is_ident_start) {
            return Err(self.error("identifier starts immediately after numeric literal"));
        }

        self.source[start..self.pos]
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| self.error("invalid numeric literal"))
    }

    fn string(&mut self, quote: char) -> Result<TokenKind, ParseError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek_char() {
                None | Some('\n') => return Err(self.error("unterminated string literal")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(TokenKind::Str(out));
                }
                Some('\\') => {
                    self.pos += 1;
                    out.push(self.escape()?);
                }
                Some(c) => {
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    /// Decodes one escape sequence; the backslash is already consumed.
    fn escape(&mut self) -> Result<char, ParseError> {
        let Some(c) = self.peek_char() else {
            return Err(self.error("unterminated escape sequence"));
        };
        self.pos += c.len_utf8();
        let decoded = match c {
            'n' => '\n',
            't' => '\t',
            'r' => '\r',
            'b' => '\u{8}',
            'f' => '\u{c}',
            'v' => '\u{b}',
            '0' => '\0',
            'x' => self.hex_escape(2)?,
            'u' if self.peek_byte(0) == Some(b'{') => {
                let rest = &self.source[self.pos + 1..];
                let end = rest
                    .find('}')
                    .ok_or_else(|| self.error("unterminated unicode escape"))?;
                let code = u32::from_str_radix(&rest[..end], 16)
                    .map_err(|_| self.error("invalid unicode escape"))?;
                self.pos += end + 2;
                char::from_u32(code).ok_or_else(|| self.error("invalid unicode code point"))?
            }
            'u' => self.hex_escape(4)?,
            other => other,
        };
        Ok(decoded)
    }

    fn hex_escape(&mut self, len: usize) -> Result<char, ParseError> {
        let digits = self
            .source
            .get(self.pos..self.pos + len)
            .ok_or_else(|| self.error("truncated escape sequence"))?;
        let code =
            u32::from_str_radix(digits, 16).map_err(|_| self.error("invalid escape sequence"))?;
        self.pos += len;
        // Lone surrogates have no `char`; substitute the replacement character.
        Ok(char::from_u32(code).unwrap_or('\u{FFFD}'))
    }

    fn template(&mut self) -> Result<TokenKind, ParseError> {
        self.pos += 1;
        let mut chunks = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek_char() {
                None => return Err(self.error("unterminated template literal")),
                Some('`') => {
                    self.pos += 1;
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(text));
                    }
                    return Ok(TokenKind::Template(chunks));
                }
                Some('\\') => {
                    self.pos += 1;
                    text.push(self.escape()?);
                }
                Some('$') if self.peek_byte(1) == Some(b'{') => {
                    if !text.is_empty() {
                        chunks.push(TemplateChunk::Text(std::mem::take(&mut text)));
                    }
                    self.pos += 2;
                    let start = self.pos;
                    let end = self.interpolation_end()?;
                    chunks.push(TemplateChunk::Interpolation {
                        source: self.source[start..end].to_string(),
                        offset: self.base + start,
                    });
                    self.pos = end + 1;
                }
                Some(c) => {
                    text.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    /// Finds the `}` closing an interpolation, skipping nested braces and
    /// quoted strings.
    fn interpolation_end(&self) -> Result<usize, ParseError> {
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        let mut i = self.pos;
        while let Some(&b) = self.bytes.get(i) {
            match quote {
                Some(q) => {
                    if b == b'\\' {
                        i += 1;
                    } else if b == q {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' | b'`' => quote = Some(b),
                    b'{' => depth += 1,
                    b'}' if depth == 0 => return Ok(i),
                    b'}' => depth -= 1,
                    _ => {}
                },
            }
            i += 1;
        }
        Err(self.error("unterminated template interpolation"))
    }

    fn ident(&mut self) -> String {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if !is_ident_part(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        self.source[start..self.pos].to_string()
    }

    fn punct(&mut self, c: char) -> Result<TokenKind, ParseError> {
        let rest = &self.source[self.pos..];
        for p in PUNCTUATORS {
            if rest.starts_with(p) {
                // `a ?.5 : b` is a conditional, not optional chaining
                if *p == "?." && rest.as_bytes().get(2).is_some_and(|b| b.is_ascii_digit()) {
                    continue;
                }
                self.pos += p.len();
                return Ok(TokenKind::Punct(p));
            }
        }
        Err(self.error(format!("unexpected character '{c}'")))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::new(source, 0)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_punctuators_prefer_longest() {
        assert_eq!(
            kinds("a === b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Punct("==="),
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(kinds("1.5e3")[0], TokenKind::Number(1500.0));
        assert_eq!(kinds("0xff")[0], TokenKind::Number(255.0));
        assert_eq!(kinds(".25")[0], TokenKind::Number(0.25));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\n\"bA""#)[0], TokenKind::Str("a\n\"bA".into()));
        assert_eq!(kinds("'it\\'s'")[0], TokenKind::Str("it's".into()));
    }

    #[test]
    fn test_comments_and_newlines() {
        let tokens = Lexer::new("a // note\n/* block */ b", 0).tokenize().unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Ident("b".into()));
        assert!(tokens[1].newline_before);
        assert!(!tokens[0].newline_before);
    }

    #[test]
    fn test_template_chunks() {
        let kinds = kinds("`Hi ${args.name}!`");
        assert_eq!(
            kinds[0],
            TokenKind::Template(vec![
                TemplateChunk::Text("Hi ".into()),
                TemplateChunk::Interpolation {
                    source: "args.name".into(),
                    offset: 6,
                },
                TemplateChunk::Text("!".into()),
            ])
        );
    }

    #[test]
    fn test_template_interpolation_with_braces() {
        let kinds = kinds("`${ {a: '}'}.a }`");
        assert!(matches!(
            &kinds[0],
            TokenKind::Template(chunks) if matches!(
                &chunks[0],
                TemplateChunk::Interpolation { source, .. } if source == " {a: '}'}.a "
            )
        ));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        assert!(Lexer::new("'abc", 0).tokenize().is_err());
    }

    #[test]
    fn test_unexpected_character() {
        let err = Lexer::new("a # b", 0).tokenize().unwrap_err();
        assert_eq!(err.offset, 2);
    }
}
