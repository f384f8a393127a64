use std::fmt;
use sylva_core::{Tree, TreeRef};
use sylva_diagnostic::{Diagnostic, Location, Message, Source};

pub type EvalResult<'heap, T = TreeRef<'heap>> = Result<T, EvalError<'heap>>;

/**
An evaluation failure, pointing at the offending subtree.

Errors raised deep inside primitives start out without `context`; the
nearest `eval` or `expand` frame fills it in with the surrounding tree.
*/
#[derive(Debug)]
pub struct EvalError<'heap> {
    pub message: String,
    pub at: TreeRef<'heap>,
    pub context: Option<TreeRef<'heap>>,
}

impl<'heap> EvalError<'heap> {
    pub fn partial(message: impl Into<String>, at: TreeRef<'heap>) -> Self {
        EvalError {
            message: message.into(),
            at,
            context: None,
        }
    }

    pub fn full(message: impl Into<String>, at: TreeRef<'heap>, context: TreeRef<'heap>) -> Self {
        EvalError {
            message: message.into(),
            at,
            context: Some(context),
        }
    }

    /// Attach the surrounding tree, unless an inner frame already did.
    pub fn with_context(mut self, context: TreeRef<'heap>) -> Self {
        if self.context.is_none() {
            self.context = Some(context);
        }
        self
    }

    pub fn report(&self, source: &Source, diagnostic: &mut Diagnostic) {
        diagnostic.item(
            Some(Location {
                source: source.clone(),
                offset: None,
            }),
            Message {
                content: self.message.clone(),
                addendum: self.context.map(|context| format!("in: {}", context)),
            },
        );
    }
}

impl<'heap> fmt::Display for EvalError<'heap> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}, at {}", self.message, self.at)?;
        if let Some(context) = self.context {
            write!(f, ", in {}", context)?;
        }
        Ok(())
    }
}

/// A lexing or parsing failure popped from the side channel; never aborts
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsingError {
    pub message: String,
    pub start: usize,
    pub end: usize,
}

impl ParsingError {
    pub fn report(&self, source: &Source, diagnostic: &mut Diagnostic) {
        diagnostic.item(
            Some(Location {
                source: source.clone(),
                offset: Some(self.start),
            }),
            Message {
                content: self.message.clone(),
                addendum: None,
            },
        );
    }
}

pub fn expect_cons<'heap>(
    e: TreeRef<'heap>,
) -> EvalResult<'heap, (TreeRef<'heap>, TreeRef<'heap>)> {
    match e {
        Tree::Cons(cell) => Ok((cell.head(), cell.tail())),
        _ => Err(EvalError::partial(format!("expected cons, got {}", e), e)),
    }
}

pub fn expect_nil<'heap>(e: TreeRef<'heap>) -> EvalResult<'heap, ()> {
    match e {
        Tree::Nil => Ok(()),
        _ => Err(EvalError::partial(format!("expected nil, got {}", e), e)),
    }
}

pub fn expect_symbol<'heap>(e: TreeRef<'heap>) -> EvalResult<'heap, &'heap str> {
    match e {
        Tree::Symbol(name) => Ok(name),
        _ => Err(EvalError::partial(format!("expected symbol, got {}", e), e)),
    }
}

pub fn expect_string<'heap>(e: TreeRef<'heap>) -> EvalResult<'heap, &'heap [u8]> {
    match e {
        Tree::String(bytes) => Ok(bytes),
        _ => Err(EvalError::partial(format!("expected string, got {}", e), e)),
    }
}

pub fn expect_nat<'heap>(e: TreeRef<'heap>) -> EvalResult<'heap, u64> {
    match e {
        Tree::Nat64(value) => Ok(*value),
        _ => Err(EvalError::partial(format!("expected nat64, got {}", e), e)),
    }
}

pub fn expect_bool<'heap>(e: TreeRef<'heap>) -> EvalResult<'heap, bool> {
    match e {
        Tree::Bool(value) => Ok(*value),
        _ => Err(EvalError::partial(format!("expected bool, got {}", e), e)),
    }
}

pub fn expect_closure<'heap>(e: TreeRef<'heap>) -> EvalResult<'heap, sylva_core::Closure<'heap>> {
    match e {
        Tree::Closure(closure) => Ok(*closure),
        _ => Err(EvalError::partial(format!("expected closure, got {}", e), e)),
    }
}
