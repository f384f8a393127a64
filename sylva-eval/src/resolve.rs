use crate::error::{EvalError, EvalResult};
use crate::syntax::START_SYMBOL;
use crate::Evaluator;
use std::fmt::Write;
use sylva_core::TreeRef;
use sylva_parse::{Child, Location};

/// Default depth budget for walking the parse forest. The budget is the
/// sole guard against divergence on cyclic grammars; callers with
/// pathological grammars can lower it through
/// [`Evaluator::resolve_with_depth`].
pub const DEFAULT_RESOLVE_DEPTH: usize = 4096;

impl<'io, 'heap> Evaluator<'io, 'heap> {
    /// Resolve the parse forest of the last recognized sentence into a
    /// single tree, with the default depth budget.
    pub fn resolve(&self) -> EvalResult<'heap> {
        self.resolve_with_depth(DEFAULT_RESOLVE_DEPTH)
    }

    /**
    Reconstruct every concrete parse reachable from a completed
    start-symbol item at the sentence end. Exactly one parse is the
    only acceptable outcome: none is a parse failure, several is an
    ambiguity, and both abort the statement with every candidate
    attached for diagnosis.
    */
    pub fn resolve_with_depth(&self, max_depth: usize) -> EvalResult<'heap> {
        let pos = self.parser.sentence().len();
        let forest = self.parser.forest();
        assert!(pos < forest.len(), "forest must cover the sentence");

        let mut all: Vec<TreeRef<'heap>> = Vec::new();
        for i in 0..forest[pos].len() {
            let state = forest[pos][i].state;
            let rule = self.parser.rule(state.rule);
            if state.start == 0
                && rule.lhs.0 == START_SYMBOL
                && state.progress == rule.rhs.len()
            {
                all.extend(self.resolve_location(Location { pos, i }, &[self.nil], max_depth));
            }
        }

        match all.len() {
            0 => Err(EvalError::partial(
                "parsing failed: no tree could be resolved from the forest",
                self.nil,
            )),
            1 => Ok(all[0]),
            _ => {
                let mut message = String::from("ambiguous parse:");
                for candidate in &all {
                    write!(message, "\n  {}", candidate).unwrap();
                }
                Err(EvalError::partial(message, self.nil))
            }
        }
    }

    /// Walk one forest item right-to-left, accumulating fully resolved
    /// right siblings. A zero budget prunes the walk, yielding no trees.
    fn resolve_location(
        &self,
        loc: Location,
        right: &[TreeRef<'heap>],
        depth: usize,
    ) -> Vec<TreeRef<'heap>> {
        if depth == 0 {
            return Vec::new();
        }
        let item = &self.parser.forest()[loc.pos][loc.i];
        let state = item.state;

        if state.progress == 0 {
            // The whole rule has been unwound; emit (rule-name . right).
            let name = self.sym(&self.rule_names[state.rule]);
            return right.iter().map(|&r| self.cons(name, r)).collect();
        }

        let mut result = Vec::new();
        for &(prev, child) in &item.links {
            let children: Vec<TreeRef<'heap>> = match child {
                Child::Leaf => {
                    let token = &self.parser.sentence()[loc.pos - 1];
                    let name = self.sym(&self.pattern_names[token.pattern]);
                    let lexeme = self.string(token.lexeme.as_bytes());
                    vec![self.cons(name, self.cons(lexeme, self.nil))]
                }
                Child::Node(child_loc) => self.resolve_location(child_loc, &[self.nil], depth - 1),
            };
            let mut accumulated = Vec::with_capacity(children.len() * right.len());
            for &c in &children {
                for &r in right {
                    accumulated.push(self.cons(c, r));
                }
            }
            result.extend(self.resolve_location(prev, &accumulated, depth));
        }
        result
    }
}
