//! T-SQL lexing on top of the `sqlparser` tokenizer.
//!
//! Comments and whitespace are dropped here, so nothing downstream can be
//! fooled by keywords inside comments. String literals stay single tokens.

use sqlparser::dialect::MsSqlDialect;
use sqlparser::tokenizer::{Token, Tokenizer};

/// Token kinds the parser distinguishes.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenKind {
    Word { value: String, quoted: bool },
    Number(String),
    Str { value: String, national: bool },
    Comma,
    Period,
    LParen,
    RParen,
    SemiColon,
    Star,
    Eq,
    /// Any other operator or punctuation, kept by its display text.
    Op(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct SqlToken {
    pub kind: TokenKind,
    /// Source rendering of the token (quotes included).
    pub text: String,
}

impl SqlToken {
    /// Upper-cased value when the token is an unquoted word.
    pub fn keyword(&self) -> Option<String> {
        match &self.kind {
            TokenKind::Word {
                value,
                quoted: false,
            } => Some(value.to_ascii_uppercase()),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        matches!(&self.kind, TokenKind::Word { value, quoted: false } if value.eq_ignore_ascii_case(keyword))
    }

    /// Identifier value for any word, quoted or not.
    pub fn ident(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Word { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }

    /// `@name` variables and parameters (`@@ROWCOUNT` included).
    pub fn is_variable(&self) -> bool {
        matches!(&self.kind, TokenKind::Word { value, quoted: false } if value.starts_with('@'))
    }
}

/// Tokenize a definition; comments and whitespace are removed.
pub fn tokenize(sql: &str) -> Result<Vec<SqlToken>, String> {
    let dialect = MsSqlDialect {};
    let raw = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| format!("tokenizer: {e}"))?;

    let mut tokens: Vec<SqlToken> = Vec::with_capacity(raw.len());
    let mut index = 0;
    while index < raw.len() {
        let token = &raw[index];
        index += 1;
        if matches!(token, Token::Whitespace(_) | Token::EOF) {
            continue;
        }
        // Some tokenizer versions split `@@ROWCOUNT` or `#temp` into a prefix
        // token plus a word; glue them back together.
        let rendered = token.to_string();
        if matches!(rendered.as_str(), "@" | "@@" | "#" | "##") {
            if let Some(Token::Word(word)) = raw.get(index) {
                if word.quote_style.is_none() {
                    index += 1;
                    let value = format!("{rendered}{}", word.value);
                    tokens.push(SqlToken {
                        text: value.clone(),
                        kind: TokenKind::Word {
                            value,
                            quoted: false,
                        },
                    });
                    continue;
                }
            }
        }
        tokens.push(convert(token, rendered));
    }
    Ok(tokens)
}

fn convert(token: &Token, text: String) -> SqlToken {
    let kind = match token {
        Token::Word(word) => TokenKind::Word {
            value: word.value.clone(),
            quoted: word.quote_style.is_some(),
        },
        Token::Number(value, _) => TokenKind::Number(value.clone()),
        Token::SingleQuotedString(value) => TokenKind::Str {
            value: value.clone(),
            national: false,
        },
        Token::NationalStringLiteral(value) => TokenKind::Str {
            value: value.clone(),
            national: true,
        },
        Token::Comma => TokenKind::Comma,
        Token::Period => TokenKind::Period,
        Token::LParen => TokenKind::LParen,
        Token::RParen => TokenKind::RParen,
        Token::SemiColon => TokenKind::SemiColon,
        Token::Mul => TokenKind::Star,
        Token::Eq => TokenKind::Eq,
        _ => TokenKind::Op(text.clone()),
    };
    SqlToken { kind, text }
}

/// Re-render a token range as normalized source text.
pub fn render(tokens: &[SqlToken]) -> String {
    tokens
        .iter()
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}
