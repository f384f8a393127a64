#[cfg(test)]
mod test;

pub mod error;
mod prelude;
mod resolve;
mod syntax;

pub use error::{EvalError, EvalResult, ParsingError};
pub use resolve::DEFAULT_RESOLVE_DEPTH;
pub use syntax::{IGNORED_SYMBOL, START_SYMBOL};

use error::{expect_cons, expect_nil};
use fnv::FnvHashMap;
use std::io;
use std::ptr;
use sylva_core::{Closure, Cons, Tree, TreeRef};
use sylva_lex::Lexer;
use sylva_parse::{Parser, Symbol};
use typed_arena::Arena;

/// What a primitive asks the evaluator to do next: either a finished
/// value, or a tail call — continue the interpreter loop with a new
/// environment and expression.
pub enum Control<'heap> {
    Done(TreeRef<'heap>),
    Tail {
        env: TreeRef<'heap>,
        expr: TreeRef<'heap>,
    },
}

pub type PrimFn<'io, 'heap> = fn(
    &mut Evaluator<'io, 'heap>,
    TreeRef<'heap>,
    TreeRef<'heap>,
) -> EvalResult<'heap, Control<'heap>>;

/// A named built-in. Forms (`eval_args: false`) receive their argument
/// list unevaluated; procedures receive it evaluated.
#[derive(Clone, Copy)]
pub struct Primitive<'io, 'heap> {
    pub eval_args: bool,
    pub run: PrimFn<'io, 'heap>,
}

/**
The evaluation core: parser tables, macro and primitive registries, the
global environment, and the interpreter loop over arena-allocated trees.

The evaluator is strictly single-threaded. All trees live in the two
caller-owned arenas for the evaluator's whole `'heap` lifetime; `display`
writes to the injected `'io` writer so embedders and tests can capture
output.

```text
source text -> lexer -> parser -> resolve -> expand -> eval -> value
```
*/
pub struct Evaluator<'io, 'heap> {
    trees: &'heap Arena<Tree<'heap>>,
    bytes: &'heap Arena<u8>,
    stdout: &'io mut dyn io::Write,

    lexer: Lexer,
    parser: Parser,

    nil: TreeRef<'heap>,
    unit: TreeRef<'heap>,
    btrue: TreeRef<'heap>,
    bfalse: TreeRef<'heap>,

    /// The installed syntax, as the trees that were handed to `set_syntax`.
    patterns: TreeRef<'heap>,
    rules: TreeRef<'heap>,
    /// Symbol id -> name; ids 0 and 1 are the reserved ignored/start
    /// symbols, both named "_".
    pub(crate) symbol_names: Vec<String>,
    pub(crate) name_symbols: FnvHashMap<String, Symbol>,
    pub(crate) pattern_names: Vec<String>,
    pub(crate) rule_names: Vec<String>,

    global_env: TreeRef<'heap>,
    macros: Vec<Closure<'heap>>,
    name_macros: FnvHashMap<String, usize>,
    prims: Vec<Primitive<'io, 'heap>>,
    name_prims: FnvHashMap<String, usize>,
}

impl<'io, 'heap> Evaluator<'io, 'heap> {
    /// Build an evaluator and install the bootstrap S-expression syntax,
    /// macros, and primitives through the same `set_syntax`/`add_macro`
    /// path a user program would use.
    pub fn new(
        trees: &'heap Arena<Tree<'heap>>,
        bytes: &'heap Arena<u8>,
        stdout: &'io mut dyn io::Write,
    ) -> Self {
        let nil: TreeRef = trees.alloc(Tree::Nil);
        let unit: TreeRef = trees.alloc(Tree::Unit);
        let btrue: TreeRef = trees.alloc(Tree::Bool(true));
        let bfalse: TreeRef = trees.alloc(Tree::Bool(false));
        let mut evaluator = Evaluator {
            trees,
            bytes,
            stdout,
            lexer: Lexer::new(),
            parser: Parser::new(),
            nil,
            unit,
            btrue,
            bfalse,
            patterns: nil,
            rules: nil,
            symbol_names: Vec::new(),
            name_symbols: FnvHashMap::default(),
            pattern_names: Vec::new(),
            rule_names: Vec::new(),
            global_env: nil,
            macros: Vec::new(),
            name_macros: FnvHashMap::default(),
            prims: Vec::new(),
            name_prims: FnvHashMap::default(),
        };
        evaluator.install_prelude();
        evaluator
    }

    // ----- allocation helpers -----

    pub fn alloc(&self, tree: Tree<'heap>) -> TreeRef<'heap> {
        self.trees.alloc(tree)
    }

    pub fn cons(&self, head: TreeRef<'heap>, tail: TreeRef<'heap>) -> TreeRef<'heap> {
        self.alloc(Tree::cons(head, tail))
    }

    pub fn sym(&self, name: &str) -> TreeRef<'heap> {
        self.alloc(Tree::Symbol(self.bytes.alloc_str(name)))
    }

    pub fn string(&self, bytes: &[u8]) -> TreeRef<'heap> {
        self.alloc(Tree::String(self.bytes.alloc_extend(bytes.iter().copied())))
    }

    pub fn nat(&self, value: u64) -> TreeRef<'heap> {
        self.alloc(Tree::Nat64(value))
    }

    pub fn boolean(&self, value: bool) -> TreeRef<'heap> {
        if value {
            self.btrue
        } else {
            self.bfalse
        }
    }

    pub fn nil(&self) -> TreeRef<'heap> {
        self.nil
    }

    pub fn unit(&self) -> TreeRef<'heap> {
        self.unit
    }

    pub fn list(&self, items: &[TreeRef<'heap>]) -> TreeRef<'heap> {
        let mut result = self.nil;
        for &item in items.iter().rev() {
            result = self.cons(item, result);
        }
        result
    }

    pub fn global_env(&self) -> TreeRef<'heap> {
        self.global_env
    }

    // ----- environments -----

    /// Environment entries are two-element lists `(symbol value)`; the
    /// newest entry shadows.
    pub fn extend(
        &self,
        env: TreeRef<'heap>,
        name: &str,
        value: TreeRef<'heap>,
    ) -> TreeRef<'heap> {
        self.cons(self.cons(self.sym(name), self.cons(value, self.nil)), env)
    }

    /// First matching binding, head-first. A `Unit` placeholder counts as
    /// "declared but not yet assigned" and reads as unbound.
    pub fn lookup(&self, env: TreeRef<'heap>, name: &str) -> Option<TreeRef<'heap>> {
        for entry in env.iter_list() {
            let entry = match entry {
                Tree::Cons(cell) => cell,
                _ => continue,
            };
            let slot = match entry.tail() {
                Tree::Cons(cell) => cell,
                _ => continue,
            };
            if let Tree::Symbol(bound) = entry.head() {
                if *bound == name {
                    let value = slot.head();
                    return match value {
                        Tree::Unit => None,
                        _ => Some(value),
                    };
                }
            }
        }
        None
    }

    pub(crate) fn add_macro(&mut self, name: &str, closure: Closure<'heap>) {
        let index = self.macros.len();
        self.macros.push(closure);
        self.name_macros.insert(name.to_string(), index);
    }

    pub fn add_primitive(&mut self, name: &str, eval_args: bool, run: PrimFn<'io, 'heap>) {
        let index = self.prims.len();
        self.prims.push(Primitive { eval_args, run });
        self.name_prims.insert(name.to_string(), index);
    }

    // ----- pattern matching -----

    /**
    Destructure `e` against the pattern `pat`, binding symbols into
    `env`. In normal mode a symbol pattern binds (except `_`); `quote`
    switches to literal matching and `unquote` switches back; `...`
    matches any list. `env` is only meaningful on success — snapshot it
    before a speculative match.
    */
    pub fn match_pattern(
        &mut self,
        e: TreeRef<'heap>,
        pat: TreeRef<'heap>,
        env: &mut TreeRef<'heap>,
        quote_mode: bool,
    ) -> EvalResult<'heap, bool> {
        if let Tree::Symbol(name) = pat {
            if !quote_mode {
                if *name != "_" {
                    *env = self.extend(env, name, e);
                }
                return Ok(true);
            }
        }
        if let Tree::Cons(cell) = pat {
            let head = cell.head();
            let tail = cell.tail();
            if let Tree::Symbol(name) = head {
                if *name == "quote" && !quote_mode {
                    return self.match_pattern(e, expect_cons(tail)?.0, env, true);
                }
                if *name == "unquote" && quote_mode {
                    return self.match_pattern(e, expect_cons(tail)?.0, env, false);
                }
                if *name == "..." {
                    return Ok(e.is_list());
                }
            }
            return match e {
                Tree::Cons(ecell) => Ok(self
                    .match_pattern(ecell.head(), head, env, quote_mode)?
                    && self.match_pattern(ecell.tail(), tail, env, quote_mode)?),
                _ => Ok(false),
            };
        }
        Ok(e == pat)
    }

    // ----- macro expansion -----

    /// Expand macro applications inside-out: elements first, then the
    /// list itself if its head names a macro.
    pub fn expand(&mut self, e: TreeRef<'heap>) -> EvalResult<'heap> {
        if !matches!(e, Tree::Cons(_)) {
            return Ok(e);
        }
        self.expand_cons(e).map_err(|err| err.with_context(e))
    }

    fn expand_cons(&mut self, e: TreeRef<'heap>) -> EvalResult<'heap> {
        let e = self.expand_list(e)?;
        if let Tree::Cons(cell) = e {
            if let Tree::Symbol(name) = cell.head() {
                if let Some(&index) = self.name_macros.get(*name) {
                    let mac = self.macros[index];
                    let tail = cell.tail();
                    let mut env = mac.env;
                    if !self.match_pattern(tail, mac.formal, &mut env, false)? {
                        return Err(EvalError::full(
                            format!("pattern matching failed: {} ?= {}", mac.formal, tail),
                            tail,
                            e,
                        ));
                    }
                    let body = self.begin_list(env, mac.body)?;
                    return self.eval(env, body);
                }
            }
        }
        Ok(e)
    }

    /// Expand every element of a list, preserving identity when nothing
    /// changed.
    pub fn expand_list(&mut self, e: TreeRef<'heap>) -> EvalResult<'heap> {
        match e {
            Tree::Nil => Ok(e),
            Tree::Cons(cell) => {
                let head = cell.head();
                let tail = cell.tail();
                let ehead = self.expand(head)?;
                let etail = self.expand_list(tail)?;
                if ptr::eq(ehead, head) && ptr::eq(etail, tail) {
                    Ok(e)
                } else {
                    Ok(self.cons(ehead, etail))
                }
            }
            _ => self.expand(e),
        }
    }

    // ----- evaluation -----

    /**
    Evaluate `e` under `env`.

    The loop is the sole tail-call mechanism: primitives and closure
    applications that end in tail position hand back a new `(env, e)`
    pair instead of recursing, so mutually recursive tail calls run in
    constant stack space.
    */
    pub fn eval(&mut self, env: TreeRef<'heap>, e: TreeRef<'heap>) -> EvalResult<'heap> {
        let mut env = env;
        let mut e = e;
        loop {
            match e {
                Tree::Symbol(name) => {
                    if let Some(value) = self.lookup(env, name) {
                        return Ok(value);
                    }
                    if let Some(&id) = self.name_prims.get(*name) {
                        return Ok(self.alloc(Tree::Prim(id)));
                    }
                    return Err(EvalError::partial(
                        format!("unbound symbol \"{}\"", name),
                        e,
                    ));
                }
                Tree::Cons(cell) => {
                    let head = cell.head();
                    let tail = cell.tail();
                    let control = self
                        .apply(env, head, tail)
                        .map_err(|err| err.with_context(e))?;
                    match control {
                        Control::Done(value) => return Ok(value),
                        Control::Tail {
                            env: next_env,
                            expr,
                        } => {
                            env = next_env;
                            e = expr;
                        }
                    }
                }
                _ => return Ok(e),
            }
        }
    }

    /// One application step: evaluate the head, then dispatch on
    /// primitive vs. closure.
    fn apply(
        &mut self,
        env: TreeRef<'heap>,
        head: TreeRef<'heap>,
        tail: TreeRef<'heap>,
    ) -> EvalResult<'heap, Control<'heap>> {
        let ehead = self.eval(env, head)?;
        match ehead {
            Tree::Prim(id) => {
                let prim = self.prims[*id];
                let args = if prim.eval_args {
                    self.eval_list(env, tail)?
                } else {
                    tail
                };
                (prim.run)(self, env, args)
            }
            Tree::Closure(closure) => {
                let closure = *closure;
                let args = self.eval_list(env, tail)?;
                let mut call_env = closure.env;
                if !self.match_pattern(args, closure.formal, &mut call_env, false)? {
                    return Err(EvalError::partial(
                        format!("pattern matching failed: {} ?= {}", closure.formal, args),
                        tail,
                    ));
                }
                let body = self.begin_list(call_env, closure.body)?;
                Ok(Control::Tail {
                    env: call_env,
                    expr: body,
                })
            }
            _ => Err(EvalError::partial(
                format!("head element {} is not a function", ehead),
                head,
            )),
        }
    }

    /// Evaluate every element of a list, preserving identity when nothing
    /// changed.
    pub fn eval_list(&mut self, env: TreeRef<'heap>, e: TreeRef<'heap>) -> EvalResult<'heap> {
        match e {
            Tree::Nil => Ok(e),
            Tree::Cons(cell) => {
                let head = cell.head();
                let tail = cell.tail();
                let ehead = self.eval(env, head)?;
                let etail = self.eval_list(env, tail)?;
                if ptr::eq(ehead, head) && ptr::eq(etail, tail) {
                    Ok(e)
                } else {
                    Ok(self.cons(ehead, etail))
                }
            }
            _ => self.eval(env, e),
        }
    }

    /// Evaluate every element but the last for effect; return the last
    /// one unevaluated so the caller can tail-call into it. The empty
    /// list begins to `#unit`.
    pub fn begin_list(&mut self, env: TreeRef<'heap>, e: TreeRef<'heap>) -> EvalResult<'heap> {
        let mut rest = e;
        while let Tree::Cons(cell) = rest {
            let head = cell.head();
            let tail = cell.tail();
            if !matches!(tail, Tree::Cons(_)) {
                expect_nil(tail)?;
                return Ok(head);
            }
            self.eval(env, head)?;
            rest = tail;
        }
        expect_nil(rest)?;
        Ok(self.unit)
    }

    /// Structural traversal that evaluates and splices `(unquote x)`
    /// forms, preserving identity when nothing changed.
    pub fn quasiquote(&mut self, env: TreeRef<'heap>, e: TreeRef<'heap>) -> EvalResult<'heap> {
        if let Tree::Cons(cell) = e {
            let head = cell.head();
            let tail = cell.tail();
            if matches!(head, Tree::Symbol(name) if *name == "unquote") {
                return self.eval(env, expect_cons(tail)?.0);
            }
            let qhead = self.quasiquote(env, head)?;
            let qtail = self.quasiquote(env, tail)?;
            if ptr::eq(qhead, head) && ptr::eq(qtail, tail) {
                return Ok(e);
            }
            return Ok(self.cons(qhead, qtail));
        }
        Ok(e)
    }

    // ----- statement driver -----

    /// Point the lexer at new source text, discarding any lookahead
    /// buffered from previous input.
    pub fn set_source(&mut self, source: &str) {
        self.lexer.set_string(source);
        self.parser.discard_lookahead();
    }

    pub fn parse_next_statement(&mut self) -> bool {
        self.parser.next_sentence(&mut self.lexer)
    }

    /// Resolve, expand, and evaluate the statement recognized by the
    /// last `parse_next_statement`.
    ///
    /// A failing statement is not rolled back: whatever `define`,
    /// `define_macro`, `set`, `set_syntax` or `set_global_env` already
    /// executed stays in effect.
    pub fn eval_parsed_statement(&mut self) -> EvalResult<'heap> {
        let e = self.resolve()?;
        let e = self.expand(e)?;
        self.eval(self.global_env, e)
    }

    /// Drain the lexer's and parser's error side channels.
    pub fn pop_parsing_errors(&mut self) -> Vec<ParsingError> {
        let mut result = Vec::new();
        for error in self.lexer.pop_errors() {
            result.push(ParsingError {
                message: format!("parsing error, unexpected characters: {}", error.lexeme),
                start: error.start,
                end: error.end,
            });
        }
        for error in self.parser.pop_errors() {
            let mut message = String::from("parsing error, expected one of: ");
            for symbol in &error.expected {
                message.push_str(&format!("<{}>, ", self.symbol_names[*symbol]));
            }
            match error.got {
                Some(symbol) => {
                    message.push_str(&format!("got token <{}>", self.symbol_names[symbol]))
                }
                None => message.push_str("but reached the end of file"),
            }
            result.push(ParsingError {
                message,
                start: error.start,
                end: error.end,
            });
        }
        result
    }

    /// Evaluate every statement in `source`, returning the value of each.
    /// Stops at the first evaluation error; parse errors only skip the
    /// statements they invalidate.
    pub fn run(&mut self, source: &str) -> EvalResult<'heap, Vec<TreeRef<'heap>>> {
        self.set_source(source);
        let mut results = Vec::new();
        while self.parse_next_statement() {
            results.push(self.eval_parsed_statement()?);
        }
        Ok(results)
    }

    /// Pre-extend `env` with `#unit` placeholders for each name, handing
    /// back the value cells so `letrec` can assign them in order.
    pub(crate) fn declare(
        &mut self,
        env: TreeRef<'heap>,
        name: &str,
    ) -> (TreeRef<'heap>, &'heap std::cell::Cell<TreeRef<'heap>>) {
        let env = self.extend(env, name, self.unit);
        let entry: &'heap Cons<'heap> = match env {
            Tree::Cons(cell) => match cell.head() {
                Tree::Cons(entry) => entry,
                _ => unreachable!("extend built the entry"),
            },
            _ => unreachable!("extend consed the environment"),
        };
        let slot = match entry.tail() {
            Tree::Cons(slot) => &slot.head,
            _ => unreachable!("extend built the value slot"),
        };
        (env, slot)
    }
}
