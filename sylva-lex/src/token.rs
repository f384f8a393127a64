/// Index of a lexer pattern, assigned sequentially by
/// [`Lexer::add_pattern`](crate::Lexer::add_pattern).
pub type PatternId = usize;

/// A lexed token. Positions are byte offsets into the input;
/// `start..end` covers the lexeme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub pattern: PatternId,
    pub lexeme: String,
    pub start: usize,
    pub end: usize,
}
