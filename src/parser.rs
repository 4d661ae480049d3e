//! Text format for synchronous grammars.
//!
//! One rule per line, fields separated by `|||`:
//!
//! ```text
//! # lhs ||| source ||| target ||| scores
//! [X] ||| das haus ||| the house ||| -0.5 -1.2
//! [X] ||| [X,1] de [X,2] ||| [X,2] of [X,1] ||| -2.0 0
//! ```
//!
//! Non-terminals are written `[LABEL,k]`; the co-index `k` ties a target
//! non-terminal to the source non-terminal with the same index. Lines starting
//! with `#` are comments.
//!
//! # Example
//!
//! ```rust
//! use chart_decoder::parser::parse_grammar;
//!
//! let grammar = parse_grammar(r#"
//!     [X] ||| das ||| the ||| -1
//!     [X] ||| haus ||| house ||| -2
//!     [X] ||| [X,1] [X,2] ||| [X,1] [X,2] ||| 0
//! "#).unwrap();
//!
//! assert_eq!(grammar.num_rules(), 3);
//! ```

use crate::error::Result;
use crate::grammar::{GrammarMatcher, GrammarRule, SourceSymbol, SynchronousGrammar};
use crate::rule::TargetSymbol;
use rustc_hash::FxHashMap;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// Parser error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("expected {expected}, found {found}")]
    Expected { expected: String, found: String },
    #[error("invalid number: {0}")]
    InvalidNumber(String),
    #[error("co-index {0} has no source non-terminal")]
    UnknownCoIndex(usize),
    #[error("co-index {0} is used twice on one side")]
    DuplicateCoIndex(usize),
    #[error("expected {expected} scores, found {found}")]
    ScoreArity { expected: usize, found: usize },
    #[error("line {line}: {error}")]
    AtLine { line: usize, error: Box<ParseError> },
}

/// Result type for parsing operations.
pub type ParseResult<T> = std::result::Result<T, ParseError>;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    /// `[LABEL]` or `[LABEL,k]`
    NonTerminal(String, Option<usize>),
    Separator, // |||
    Newline,
    Eof,
}

/// Lexer for the rule format.
struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Lexer {
            input: input.chars().peekable(),
            line: 1,
            at_line_start: true,
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn skip_blanks(&mut self) {
        while let Some(c) = self.peek() {
            if c == '#' && self.at_line_start {
                while let Some(c) = self.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
            } else if c.is_whitespace() && c != '\n' {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_while<F: Fn(char) -> bool>(&mut self, predicate: F) -> String {
        let mut result = String::new();
        while let Some(c) = self.peek() {
            if predicate(c) {
                result.push(c);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_nonterminal(&mut self) -> ParseResult<Token> {
        let body = self.read_while(|c| c != ']' && c != '\n');
        if self.advance() != Some(']') {
            return Err(ParseError::Expected {
                expected: "']'".to_string(),
                found: format!("'[{}'", body),
            });
        }
        match body.split_once(',') {
            None => Ok(Token::NonTerminal(body, None)),
            Some((label, index)) => {
                let index = index
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidNumber(index.to_string()))?;
                Ok(Token::NonTerminal(label.trim().to_string(), Some(index)))
            }
        }
    }

    fn next_token(&mut self) -> ParseResult<Token> {
        self.skip_blanks();
        let token = match self.peek() {
            None => Token::Eof,
            Some('\n') => {
                self.advance();
                self.at_line_start = true;
                return Ok(Token::Newline);
            }
            Some('[') => {
                self.advance();
                self.read_nonterminal()?
            }
            Some(_) => {
                let word = self.read_while(|c| !c.is_whitespace());
                if word == "|||" {
                    Token::Separator
                } else {
                    Token::Word(word)
                }
            }
        };
        self.at_line_start = false;
        Ok(token)
    }
}

/// One source or target symbol before interning.
#[derive(Debug, Clone, PartialEq)]
enum RawSymbol {
    Word(String),
    NonTerminal(String, usize),
}

/// A rule as written, before its symbols are interned.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRule {
    lhs: String,
    source: Vec<RawSymbol>,
    target: Vec<RawSymbol>,
    scores: Vec<f64>,
}

impl RawRule {
    /// Intern the rule's symbols into `grammar`, resolving co-indices to slot
    /// positions.
    pub fn intern(&self, grammar: &mut SynchronousGrammar) -> ParseResult<GrammarRule> {
        let mut slot_of: FxHashMap<usize, usize> = FxHashMap::default();
        let mut source = Vec::with_capacity(self.source.len());
        for sym in &self.source {
            match sym {
                RawSymbol::Word(w) => source.push(SourceSymbol::Word(grammar.word(w))),
                RawSymbol::NonTerminal(label, k) => {
                    let slot = slot_of.len();
                    if slot_of.insert(*k, slot).is_some() {
                        return Err(ParseError::DuplicateCoIndex(*k));
                    }
                    source.push(SourceSymbol::NonTerminal(grammar.label(label)));
                }
            }
        }

        let mut used = vec![false; slot_of.len()];
        let mut target = Vec::with_capacity(self.target.len());
        for sym in &self.target {
            match sym {
                RawSymbol::Word(w) => target.push(TargetSymbol::Word(grammar.word(w))),
                RawSymbol::NonTerminal(_, k) => {
                    let slot = *slot_of.get(k).ok_or(ParseError::UnknownCoIndex(*k))?;
                    if std::mem::replace(&mut used[slot], true) {
                        return Err(ParseError::DuplicateCoIndex(*k));
                    }
                    target.push(TargetSymbol::Slot(slot));
                }
            }
        }

        Ok(GrammarRule {
            lhs: grammar.label(&self.lhs),
            source,
            target,
            scores: self.scores.clone(),
        })
    }
}

/// Parser for the rule format.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    num_scores: Option<usize>,
}

impl<'a> Parser<'a> {
    /// Create a parser. With `num_scores` set, every rule must carry exactly
    /// that many scores; otherwise the first rule decides.
    pub fn new(input: &'a str, num_scores: Option<usize>) -> ParseResult<Self> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current,
            num_scores,
        })
    }

    fn advance(&mut self) -> ParseResult<Token> {
        let prev = std::mem::replace(&mut self.current, self.lexer.next_token()?);
        Ok(prev)
    }

    fn found(&self) -> String {
        match &self.current {
            Token::Word(w) => format!("'{}'", w),
            Token::NonTerminal(l, Some(k)) => format!("'[{},{}]'", l, k),
            Token::NonTerminal(l, None) => format!("'[{}]'", l),
            Token::Separator => "'|||'".to_string(),
            Token::Newline => "end of line".to_string(),
            Token::Eof => "end of input".to_string(),
        }
    }

    fn expect_separator(&mut self) -> ParseResult<()> {
        match self.current {
            Token::Separator => {
                self.advance()?;
                Ok(())
            }
            Token::Eof => Err(ParseError::UnexpectedEof),
            _ => Err(ParseError::Expected {
                expected: "'|||'".to_string(),
                found: self.found(),
            }),
        }
    }

    /// Symbols up to the next separator.
    fn parse_side(&mut self) -> ParseResult<Vec<RawSymbol>> {
        let mut symbols = Vec::new();
        loop {
            match self.current.clone() {
                Token::Word(w) => symbols.push(RawSymbol::Word(w)),
                Token::NonTerminal(label, Some(k)) => symbols.push(RawSymbol::NonTerminal(label, k)),
                Token::NonTerminal(..) => {
                    return Err(ParseError::Expected {
                        expected: "a co-indexed non-terminal".to_string(),
                        found: self.found(),
                    })
                }
                _ => return Ok(symbols),
            }
            self.advance()?;
        }
    }

    fn parse_scores(&mut self) -> ParseResult<Vec<f64>> {
        let mut scores = Vec::new();
        while let Token::Word(w) = &self.current {
            let score = w.parse::<f64>().map_err(|_| ParseError::InvalidNumber(w.clone()))?;
            scores.push(score);
            self.advance()?;
        }
        let expected = *self.num_scores.get_or_insert(scores.len());
        if scores.len() != expected {
            return Err(ParseError::ScoreArity {
                expected,
                found: scores.len(),
            });
        }
        Ok(scores)
    }

    /// Parse one rule, ending at a newline or the end of input.
    fn parse_rule(&mut self) -> ParseResult<RawRule> {
        let lhs = match self.advance()? {
            Token::NonTerminal(label, None) => label,
            Token::Eof => return Err(ParseError::UnexpectedEof),
            other => {
                return Err(ParseError::Expected {
                    expected: "a left-hand side like '[X]'".to_string(),
                    found: format!("{:?}", other),
                })
            }
        };
        self.expect_separator()?;
        let source = self.parse_side()?;
        self.expect_separator()?;
        let target = self.parse_side()?;
        self.expect_separator()?;
        let scores = self.parse_scores()?;

        match self.current {
            Token::Newline | Token::Eof => Ok(RawRule {
                lhs,
                source,
                target,
                scores,
            }),
            _ => Err(ParseError::Expected {
                expected: "end of line".to_string(),
                found: self.found(),
            }),
        }
    }

    /// Parse every rule in the input.
    pub fn parse_rules(&mut self) -> ParseResult<Vec<RawRule>> {
        let mut rules = Vec::new();
        loop {
            match self.current {
                Token::Eof => return Ok(rules),
                Token::Newline => {
                    self.advance()?;
                }
                _ => {
                    let line = self.lexer.line;
                    let rule = self.parse_rule().map_err(|error| ParseError::AtLine {
                        line,
                        error: Box::new(error),
                    })?;
                    rules.push(rule);
                }
            }
        }
    }
}

/// Parse rules and add them to an existing grammar. Returns the number of
/// rules added.
pub fn parse_rules_into(grammar: &mut SynchronousGrammar, input: &str) -> Result<usize> {
    let mut parser = Parser::new(input, Some(grammar.num_rule_scores()))?;
    let rules = parser.parse_rules()?;
    for raw in &rules {
        let rule = raw.intern(grammar)?;
        grammar.add_rule(rule)?;
    }
    Ok(rules.len())
}

/// Parse a whole grammar. The score count is taken from the first rule.
pub fn parse_grammar(input: &str) -> Result<SynchronousGrammar> {
    let mut parser = Parser::new(input, None)?;
    let rules = parser.parse_rules()?;
    let mut grammar = SynchronousGrammar::new(parser.num_scores.unwrap_or(0));
    for raw in &rules {
        let rule = raw.intern(&mut grammar)?;
        grammar.add_rule(rule)?;
    }
    log::debug!("parsed {} rules", grammar.num_rules());
    Ok(grammar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::grammar::GrammarMatcher;

    fn single(input: &str) -> ParseResult<RawRule> {
        Parser::new(input, None)?.parse_rule()
    }

    #[test]
    fn test_parse_lexical() {
        let rule = single("[X] ||| das haus ||| the house ||| -0.5 1").unwrap();
        assert_eq!(rule.lhs, "X");
        assert_eq!(rule.source.len(), 2);
        assert_eq!(rule.target, vec![RawSymbol::Word("the".into()), RawSymbol::Word("house".into())]);
        assert_eq!(rule.scores, vec![-0.5, 1.0]);
    }

    #[test]
    fn test_parse_coindexed() {
        let rule = single("[X] ||| [X,1] de [Y,2] ||| [Y,2] of [X,1] ||| 0").unwrap();
        let mut g = SynchronousGrammar::new(1);
        let grammar_rule = rule.intern(&mut g).unwrap();
        assert_eq!(
            grammar_rule.target,
            vec![TargetSymbol::Slot(1), TargetSymbol::Word(g.word("of")), TargetSymbol::Slot(0)]
        );
        assert_eq!(grammar_rule.source[2], SourceSymbol::NonTerminal(g.label("Y")));
    }

    #[test]
    fn test_punctuation_words() {
        let rule = single("[X] ||| , ||| , ||| 0").unwrap();
        assert_eq!(rule.source, vec![RawSymbol::Word(",".into())]);
    }

    #[test]
    fn test_missing_fields() {
        assert_eq!(single("[X] ||| a ||| b"), Err(ParseError::UnexpectedEof));
        assert!(matches!(single("X ||| a ||| b ||| 0"), Err(ParseError::Expected { .. })));
        assert!(matches!(single("[X] ||| [X] ||| b ||| 0"), Err(ParseError::Expected { .. })));
    }

    #[test]
    fn test_invalid_score() {
        assert_eq!(
            single("[X] ||| a ||| b ||| high"),
            Err(ParseError::InvalidNumber("high".into()))
        );
    }

    #[test]
    fn test_coindex_errors() {
        let mut g = SynchronousGrammar::new(1);
        let unknown = single("[X] ||| [X,1] a ||| [X,2] ||| 0").unwrap();
        assert_eq!(unknown.intern(&mut g), Err(ParseError::UnknownCoIndex(2)));

        let twice = single("[X] ||| [X,1] [X,1] ||| [X,1] ||| 0").unwrap();
        assert_eq!(twice.intern(&mut g), Err(ParseError::DuplicateCoIndex(1)));
    }

    #[test]
    fn test_score_arity_reported_with_line() {
        let input = "[X] ||| a ||| b ||| 0 0\n\n[X] ||| c ||| d ||| 0\n";
        let err = Parser::new(input, None).unwrap().parse_rules().unwrap_err();
        assert_eq!(
            err,
            ParseError::AtLine {
                line: 3,
                error: Box::new(ParseError::ScoreArity { expected: 2, found: 1 }),
            }
        );
        assert_eq!(err.to_string(), "line 3: expected 2 scores, found 1");
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let grammar = parse_grammar(
            r#"
            # lexical entries
            [X] ||| a ||| A ||| -1
            [X] ||| b ||| B # not a comment ||| -2
            "#,
        )
        .unwrap();
        assert_eq!(grammar.num_rules(), 2);
        assert_eq!(grammar.num_rule_scores(), 1);
    }

    #[test]
    fn test_parse_rules_into_checks_arity() {
        let mut g = SynchronousGrammar::new(2);
        let err = parse_rules_into(&mut g, "[X] ||| a ||| b ||| 0").unwrap_err();
        assert!(matches!(err, DecodeError::Parse(ParseError::AtLine { .. })));
    }

    #[test]
    fn test_invalid_rule_surfaces_as_decode_error() {
        // a lone source non-terminal would fill its own span
        let err = parse_grammar("[S] ||| [X,1] ||| [X,1] ||| 0").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidRule(_)));
    }
}
