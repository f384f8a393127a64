use crate::error::{expect_cons, expect_nat, expect_string, expect_symbol, EvalError, EvalResult};
use crate::Evaluator;
use sylva_core::TreeRef;
use sylva_lex::Nfa;
use sylva_parse::{Prec, Symbol};

/// Reserved symbol id for the whitespace/comment class.
pub const IGNORED_SYMBOL: Symbol = 0;
/// Reserved symbol id for the grammar start nonterminal.
pub const START_SYMBOL: Symbol = 1;

impl<'io, 'heap> Evaluator<'io, 'heap> {
    /// Intern a grammar symbol name. The reserved ids are never handed
    /// out for user symbols.
    pub(crate) fn get_symbol(&mut self, name: &str) -> Symbol {
        if let Some(&symbol) = self.name_symbols.get(name) {
            return symbol;
        }
        let symbol = self.symbol_names.len();
        self.symbol_names.push(name.to_string());
        self.name_symbols.insert(name.to_string(), symbol);
        symbol
    }

    /**
    Replace the whole installed syntax.

    `patterns` is a list of `(name (category precedence) body)` entries
    and `rules` a list of `(name (nonterminal precedence) rhs)` entries;
    a `_` category routes to the ignored symbol and a `_` nonterminal to
    the start symbol. Pattern and rule ids are assigned in list order;
    the lexer and parser handing back anything else is a bug, not an
    input error.
    */
    pub fn set_syntax(
        &mut self,
        patterns: TreeRef<'heap>,
        rules: TreeRef<'heap>,
    ) -> EvalResult<'heap, ()> {
        self.symbol_names.clear();
        self.name_symbols.clear();
        self.pattern_names.clear();
        self.rule_names.clear();
        self.lexer.clear_patterns();
        self.parser.clear_patterns();
        self.parser.clear_rules();

        self.patterns = patterns;
        self.rules = rules;

        self.symbol_names.push("_".to_string());
        self.parser.set_ignored_symbol(IGNORED_SYMBOL);
        self.symbol_names.push("_".to_string());
        self.parser.set_start_symbol(START_SYMBOL);

        for entry in patterns.iter_list() {
            let (name, t) = expect_cons(entry)?;
            let (lhs, u) = expect_cons(t)?;
            let (body, _) = expect_cons(u)?;
            let (category, v) = expect_cons(lhs)?;
            let (prec, _) = expect_cons(v)?;
            let category = expect_symbol(category)?;
            let symbol = if category == "_" {
                IGNORED_SYMBOL
            } else {
                self.get_symbol(category)
            };
            let prec = expect_nat(prec)?;
            let id = self.pattern_names.len();
            self.pattern_names.push(expect_symbol(name)?.to_string());
            let nfa = self.tree_pattern(body)?;
            assert_eq!(
                self.lexer.add_pattern(nfa),
                id,
                "lexer pattern ids must be sequential"
            );
            assert_eq!(
                self.parser.add_pattern(symbol, prec),
                id,
                "parser pattern ids must be sequential"
            );
        }

        for entry in rules.iter_list() {
            let (name, t) = expect_cons(entry)?;
            let (lhs, u) = expect_cons(t)?;
            let (rhs, _) = expect_cons(u)?;
            let (nonterminal, v) = expect_cons(lhs)?;
            let (prec, _) = expect_cons(v)?;
            let nonterminal = expect_symbol(nonterminal)?;
            let symbol = if nonterminal == "_" {
                START_SYMBOL
            } else {
                self.get_symbol(nonterminal)
            };
            let prec = expect_nat(prec)?;
            let rhs = self.list_symbols(rhs)?;
            let id = self.rule_names.len();
            self.rule_names.push(expect_symbol(name)?.to_string());
            assert_eq!(
                self.parser.add_rule(symbol, prec, rhs),
                id,
                "rule ids must be sequential"
            );
        }

        Ok(())
    }

    /// Compile a tree-encoded regular expression into an NFA fragment.
    pub(crate) fn tree_pattern(&mut self, e: TreeRef<'heap>) -> EvalResult<'heap, Nfa> {
        let (tag, t) = expect_cons(e)?;
        let tag = expect_symbol(tag)?;
        match tag {
            "empty" => Ok(self.lexer.empty()),
            "any" => Ok(self.lexer.any()),
            "utf8seg" => Ok(self.lexer.utf8_segment()),
            "char" => {
                let bytes = expect_string(expect_cons(t)?.0)?;
                Ok(self.lexer.chars(bytes))
            }
            "except" => {
                let bytes = expect_string(expect_cons(t)?.0)?;
                Ok(self.lexer.except(bytes))
            }
            "range" => {
                let (lower, u) = expect_cons(t)?;
                let (upper, _) = expect_cons(u)?;
                let lower = expect_nat(lower)? as u8;
                let upper = expect_nat(upper)? as u8;
                Ok(self.lexer.range(lower, upper))
            }
            "word" => {
                let bytes = expect_string(expect_cons(t)?.0)?;
                Ok(self.lexer.word(bytes))
            }
            "alt" => {
                let fragments = self.list_patterns(t)?;
                Ok(self.lexer.alt(fragments))
            }
            "concat" => {
                let fragments = self.list_patterns(t)?;
                Ok(self.lexer.concat(fragments))
            }
            "opt" => {
                let inner = self.tree_pattern(expect_cons(t)?.0)?;
                Ok(self.lexer.opt(inner))
            }
            "star" => {
                let inner = self.tree_pattern(expect_cons(t)?.0)?;
                Ok(self.lexer.star(inner))
            }
            "plus" => {
                let inner = self.tree_pattern(expect_cons(t)?.0)?;
                Ok(self.lexer.plus(inner))
            }
            _ => Err(EvalError::partial(
                format!("unknown pattern tag \"{}\"", tag),
                e,
            )),
        }
    }

    fn list_patterns(&mut self, e: TreeRef<'heap>) -> EvalResult<'heap, Vec<Nfa>> {
        let mut result = Vec::new();
        for item in e.iter_list() {
            result.push(self.tree_pattern(item)?);
        }
        Ok(result)
    }

    /// An rhs is a list of `(symbol precedence)` pairs.
    fn list_symbols(&mut self, e: TreeRef<'heap>) -> EvalResult<'heap, Vec<(Symbol, Prec)>> {
        let mut result = Vec::new();
        for item in e.iter_list() {
            let (symbol, t) = expect_cons(item)?;
            let (prec, _) = expect_cons(t)?;
            let name = expect_symbol(symbol)?;
            let symbol = self.get_symbol(name);
            result.push((symbol, expect_nat(prec)?));
        }
        Ok(result)
    }
}
