//! Command line tokenizer
//!
//! Splits a trimmed command line into a program name and its arguments.
//! Words are separated by whitespace runs; quoting, globbing, variables and
//! redirections are not interpreted, every word is passed to the process
//! as-is.

use logos::Logos;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
pub enum Token {
    #[regex(r"[^ \t\r\n\f]+", |lex| lex.slice().to_string())]
    Word(String),
}

/// Program name plus positional arguments, element 0 of the original line
/// is always the program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentList {
    pub program: String,
    pub args: Vec<String>,
}

impl ArgumentList {
    /// Total number of words, program included
    pub fn len(&self) -> usize {
        1 + self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

pub struct Lexer<'a> {
    inner: logos::Lexer<'a, Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            inner: Token::lexer(input),
        }
    }

    pub fn tokenize(input: &str) -> Result<Vec<Token>, LexerError> {
        Lexer::new(input).collect()
    }

    /// Tokenize a command line into an [`ArgumentList`].
    ///
    /// Returns [`LexerError::Empty`] when the line holds no words; callers
    /// reject empty commands before getting here, so that case is an
    /// internal error.
    pub fn split_command(input: &str) -> Result<ArgumentList, LexerError> {
        let mut words = Self::tokenize(input)?.into_iter().map(|token| match token {
            Token::Word(word) => word,
        });

        let program = words.next().ok_or(LexerError::Empty)?;

        Ok(ArgumentList {
            program,
            args: words.collect(),
        })
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexerError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|result| {
            result.map_err(|_| LexerError::InvalidToken {
                position: self.inner.span().start,
                text: self.inner.slice().to_string(),
            })
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LexerError {
    #[error("Invalid token at position {position}: '{text}'")]
    InvalidToken { position: usize, text: String },

    #[error("Command line contains no words")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_command() {
        let list = Lexer::split_command("ls -la /home").unwrap();
        assert_eq!(list.program, "ls");
        assert_eq!(list.args, vec!["-la", "/home"]);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn test_program_only() {
        let list = Lexer::split_command("pwd").unwrap();
        assert_eq!(list.program, "pwd");
        assert!(list.args.is_empty());
    }

    #[test]
    fn test_whitespace_runs_collapse() {
        let list = Lexer::split_command("echo   hello \t world").unwrap();
        assert_eq!(list.args, vec!["hello", "world"]);
    }

    #[test]
    fn test_metacharacters_are_plain_words() {
        let list = Lexer::split_command("echo $HOME | wc > out *.rs").unwrap();
        assert_eq!(list.program, "echo");
        assert_eq!(list.args, vec!["$HOME", "|", "wc", ">", "out", "*.rs"]);
    }

    #[test]
    fn test_quotes_are_not_interpreted() {
        let tokens = Lexer::tokenize(r#"echo "hello world""#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Word("echo".to_string()),
                Token::Word("\"hello".to_string()),
                Token::Word("world\"".to_string()),
            ]
        );
    }

    #[test]
    fn test_non_ascii_words() {
        let list = Lexer::split_command("echo año ñandú").unwrap();
        assert_eq!(list.args, vec!["año", "ñandú"]);
    }

    #[test]
    fn test_empty_input_is_error() {
        assert!(matches!(Lexer::split_command(""), Err(LexerError::Empty)));
        assert!(matches!(Lexer::split_command("  \t "), Err(LexerError::Empty)));
    }
}
