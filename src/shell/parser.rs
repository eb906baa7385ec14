//! Shell command parser
//!
//! Splits a command line into a program name and its arguments. Words are
//! separated by whitespace; single and double quotes group words, and may
//! appear mid-word (`say"hello world"` is one word). Backslash escapes the
//! next character inside double quotes.

use std::iter::Peekable;
use std::str::Chars;

/// A parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub program: String,
    pub args: Vec<String>,
}

impl Command {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Arguments from `index` on, joined by single spaces
    pub fn rest(&self, index: usize) -> String {
        self.args.get(index..).map(|a| a.join(" ")).unwrap_or_default()
    }
}

/// Parse error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unterminated quoted string
    UnterminatedQuote(char),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnterminatedQuote(c) => write!(f, "unterminated {} quote", c),
        }
    }
}

impl std::error::Error for ParseError {}

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn next_word(&mut self) -> Result<Option<String>, ParseError> {
        self.skip_whitespace();
        if self.chars.peek().is_none() {
            return Ok(None);
        }

        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                c if c.is_whitespace() => break,
                '"' | '\'' => {
                    self.chars.next();
                    word.push_str(&self.read_quoted(c)?);
                }
                _ => {
                    word.push(c);
                    self.chars.next();
                }
            }
        }
        Ok(Some(word))
    }

    fn read_quoted(&mut self, quote: char) -> Result<String, ParseError> {
        let mut content = String::new();
        loop {
            match self.chars.next() {
                Some(c) if c == quote => return Ok(content),
                Some('\\') if quote == '"' => match self.chars.next() {
                    Some(escaped) => content.push(escaped),
                    None => return Err(ParseError::UnterminatedQuote(quote)),
                },
                Some(c) => content.push(c),
                None => return Err(ParseError::UnterminatedQuote(quote)),
            }
        }
    }
}

/// Parse a command line. Blank lines give `None`.
pub fn parse(input: &str) -> Result<Option<Command>, ParseError> {
    let mut lexer = Lexer::new(input);
    let Some(program) = lexer.next_word()? else {
        return Ok(None);
    };
    let mut command = Command::new(program);
    while let Some(word) = lexer.next_word()? {
        command.args.push(word);
    }
    Ok(Some(command))
}
