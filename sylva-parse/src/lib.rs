
use fnv::FnvHashMap;
use std::collections::VecDeque;
use sylva_lex::token::Token;
use sylva_lex::Lexer;

/// Grammar symbol id. The caller owns the numbering; by convention id 0 is
/// the ignored symbol and id 1 the start symbol.
pub type Symbol = usize;
pub type Prec = u64;
pub type RuleId = usize;
pub type PatternId = usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub lhs: (Symbol, Prec),
    pub rhs: Vec<(Symbol, Prec)>,
}

/// An Earley item key: `progress` symbols of `rule`'s rhs have been
/// matched, starting at sentence position `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct State {
    pub rule: RuleId,
    pub start: usize,
    pub progress: usize,
}

/// Position of an item in the forest: `forest()[pos][i]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub pos: usize,
    pub i: usize,
}

/// What the most recently matched rhs symbol derived: the token at
/// `pos - 1` for a terminal, or a completed item for a nonterminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Child {
    Leaf,
    Node(Location),
}

/// A chart item together with its derivation back-links. An item with
/// more than one link packs an ambiguity.
#[derive(Debug)]
pub struct Item {
    pub state: State,
    pub links: Vec<(Location, Child)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// Symbols that could have continued the sentence.
    pub expected: Vec<Symbol>,
    /// The symbol actually seen, or `None` at end of input.
    pub got: Option<Symbol>,
    pub start: usize,
    pub end: usize,
}

/**
An Earley recognizer over a caller-numbered symbol space.

Tokens are pulled lazily from the lexer, one sentence at a time; tokens
lexed past the end of a sentence are buffered and replayed on the next
call. Every chart item records how it was derived, so after
[`Parser::next_sentence`] the chart itself is the shared-packed parse
forest the caller's resolver walks.
*/
pub struct Parser {
    /// Terminal symbol and precedence per lexer pattern id.
    patterns: Vec<(Symbol, Prec)>,
    rules: Vec<Rule>,
    ignored: Symbol,
    start: Symbol,
    sentence: Vec<Token>,
    forest: Vec<Vec<Item>>,
    pending: VecDeque<Token>,
    errors: Vec<ParseError>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser {
            patterns: Vec::new(),
            rules: Vec::new(),
            ignored: 0,
            start: 1,
            sentence: Vec::new(),
            forest: Vec::new(),
            pending: VecDeque::new(),
            errors: Vec::new(),
        }
    }

    /// Also drops buffered lookahead tokens: their pattern ids belong to
    /// the lexis being cleared.
    pub fn clear_patterns(&mut self) {
        self.patterns.clear();
        self.pending.clear();
    }

    pub fn clear_rules(&mut self) {
        self.rules.clear();
    }

    pub fn set_ignored_symbol(&mut self, symbol: Symbol) {
        self.ignored = symbol;
    }

    pub fn set_start_symbol(&mut self, symbol: Symbol) {
        self.start = symbol;
    }

    pub fn add_pattern(&mut self, symbol: Symbol, prec: Prec) -> PatternId {
        self.patterns.push((symbol, prec));
        self.patterns.len() - 1
    }

    pub fn add_rule(&mut self, symbol: Symbol, prec: Prec, rhs: Vec<(Symbol, Prec)>) -> RuleId {
        self.rules.push(Rule {
            lhs: (symbol, prec),
            rhs,
        });
        self.rules.len() - 1
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        &self.rules[id]
    }

    pub fn sentence(&self) -> &[Token] {
        &self.sentence
    }

    pub fn forest(&self) -> &[Vec<Item>] {
        &self.forest
    }

    pub fn pop_errors(&mut self) -> Vec<ParseError> {
        std::mem::take(&mut self.errors)
    }

    /// Drop buffered lookahead tokens, for when the driver switches to a
    /// new input stream.
    pub fn discard_lookahead(&mut self) {
        self.pending.clear();
    }

    /**
    Recognize the next sentence: the longest token prefix after which a
    completed start-symbol item spans the whole prefix. The first token
    that cannot extend the chart is buffered for the next call. A prefix
    with no complete parse logs a [`ParseError`], discards one token,
    and retries. Returns `false` only at clean end of input.
    */
    pub fn next_sentence(&mut self, lexer: &mut Lexer) -> bool {
        loop {
            self.sentence.clear();
            self.forest.clear();
            self.forest.push(Vec::new());
            self.seed();
            self.closure(0);

            let mut last_complete: Option<usize> = None;
            let mut failed: Option<Token> = None;
            loop {
                let token = match self.pull_token(lexer) {
                    Some(token) => token,
                    None => break,
                };
                if !self.scan(&token) {
                    failed = Some(token);
                    break;
                }
                self.sentence.push(token);
                let pos = self.sentence.len();
                self.closure(pos);
                if self.has_completed_start(pos) {
                    last_complete = Some(pos);
                }
            }

            match last_complete {
                Some(length) => {
                    if let Some(token) = failed {
                        self.pending.push_front(token);
                    }
                    while self.sentence.len() > length {
                        let token = self.sentence.pop().unwrap();
                        self.pending.push_front(token);
                    }
                    self.forest.truncate(length + 1);
                    return true;
                }
                None => {
                    if self.sentence.is_empty() && failed.is_none() {
                        return false;
                    }
                    self.log_error(failed.as_ref());
                    if let Some(token) = failed {
                        self.pending.push_front(token);
                    }
                    while let Some(token) = self.sentence.pop() {
                        self.pending.push_front(token);
                    }
                    self.pending.pop_front();
                }
            }
        }
    }

    fn pull_token(&mut self, lexer: &mut Lexer) -> Option<Token> {
        loop {
            let token = match self.pending.pop_front() {
                Some(token) => token,
                None => lexer.next_token()?,
            };
            let (symbol, _) = self.patterns[token.pattern];
            if symbol != self.ignored {
                return Some(token);
            }
        }
    }

    fn seed(&mut self) {
        for rule in 0..self.rules.len() {
            if self.rules[rule].lhs.0 == self.start {
                self.forest[0].push(Item {
                    state: State {
                        rule,
                        start: 0,
                        progress: 0,
                    },
                    links: Vec::new(),
                });
            }
        }
    }

    fn has_completed_start(&self, pos: usize) -> bool {
        // A completed empty sentence is deliberately not accepted: a
        // nullable start symbol must never produce zero-token statements,
        // or the driver loop would not terminate.
        pos > 0
            && self.forest[pos].iter().any(|item| {
                let rule = &self.rules[item.state.rule];
                item.state.start == 0
                    && item.state.progress == rule.rhs.len()
                    && rule.lhs.0 == self.start
            })
    }

    /// Advance every item at the newest position that expects the token's
    /// terminal symbol. Returns false (leaving the chart untouched) if
    /// nothing can shift the token.
    fn scan(&mut self, token: &Token) -> bool {
        let pos = self.sentence.len();
        let (terminal, token_prec) = self.patterns[token.pattern];
        let mut column: Vec<Item> = Vec::new();
        let mut index: FnvHashMap<State, usize> = FnvHashMap::default();
        for i in 0..self.forest[pos].len() {
            let state = self.forest[pos][i].state;
            let rule = &self.rules[state.rule];
            if state.progress >= rule.rhs.len() {
                continue;
            }
            let (needed, needed_prec) = rule.rhs[state.progress];
            if needed == terminal && token_prec >= needed_prec {
                let advanced = State {
                    rule: state.rule,
                    start: state.start,
                    progress: state.progress + 1,
                };
                Self::add_item(
                    &mut column,
                    &mut index,
                    advanced,
                    Some((Location { pos, i }, Child::Leaf)),
                );
            }
        }
        if column.is_empty() {
            return false;
        }
        self.forest.push(column);
        true
    }

    /// Predict/complete fixpoint at `pos`. Prediction re-checks items
    /// already completed at the same position, which is what makes empty
    /// rules complete in place.
    fn closure(&mut self, pos: usize) {
        let mut index: FnvHashMap<State, usize> = self.forest[pos]
            .iter()
            .enumerate()
            .map(|(i, item)| (item.state, i))
            .collect();

        let mut i = 0;
        while i < self.forest[pos].len() {
            let state = self.forest[pos][i].state;
            let rhs_len = self.rules[state.rule].rhs.len();

            if state.progress == rhs_len {
                // Complete: advance items waiting at the origin position.
                let (lhs, lhs_prec) = self.rules[state.rule].lhs;
                let origin = state.start;
                let mut j = 0;
                while j < self.forest[origin].len() {
                    let waiting = self.forest[origin][j].state;
                    let waiting_rhs = &self.rules[waiting.rule].rhs;
                    if waiting.progress < waiting_rhs.len() {
                        let (needed, needed_prec) = waiting_rhs[waiting.progress];
                        if needed == lhs && lhs_prec >= needed_prec {
                            let advanced = State {
                                rule: waiting.rule,
                                start: waiting.start,
                                progress: waiting.progress + 1,
                            };
                            let link = (
                                Location { pos: origin, i: j },
                                Child::Node(Location { pos, i }),
                            );
                            let column = &mut self.forest[pos];
                            // `column` and `forest[origin]` are the same
                            // vector when origin == pos; re-borrow per push.
                            Self::add_item(column, &mut index, advanced, Some(link));
                        }
                    }
                    j += 1;
                }
            } else {
                // Predict the next symbol's rules.
                let (needed, needed_prec) = self.rules[state.rule].rhs[state.progress];
                for rule in 0..self.rules.len() {
                    let (lhs, lhs_prec) = self.rules[rule].lhs;
                    if lhs == needed && lhs_prec >= needed_prec {
                        let predicted = State {
                            rule,
                            start: pos,
                            progress: 0,
                        };
                        Self::add_item(&mut self.forest[pos], &mut index, predicted, None);
                    }
                }
                // An empty rule may already have completed here before
                // this item was added; advance over it now.
                let mut j = 0;
                while j < self.forest[pos].len() {
                    let done = self.forest[pos][j].state;
                    let done_rule = &self.rules[done.rule];
                    if done.start == pos
                        && done.progress == done_rule.rhs.len()
                        && done_rule.lhs.0 == needed
                        && done_rule.lhs.1 >= needed_prec
                    {
                        let advanced = State {
                            rule: state.rule,
                            start: state.start,
                            progress: state.progress + 1,
                        };
                        let link = (Location { pos, i }, Child::Node(Location { pos, i: j }));
                        Self::add_item(&mut self.forest[pos], &mut index, advanced, Some(link));
                    }
                    j += 1;
                }
            }
            i += 1;
        }
    }

    fn add_item(
        column: &mut Vec<Item>,
        index: &mut FnvHashMap<State, usize>,
        state: State,
        link: Option<(Location, Child)>,
    ) -> usize {
        match index.get(&state) {
            Some(&i) => {
                if let Some(link) = link {
                    if !column[i].links.contains(&link) {
                        column[i].links.push(link);
                    }
                }
                i
            }
            None => {
                let i = column.len();
                index.insert(state, i);
                column.push(Item {
                    state,
                    links: link.into_iter().collect(),
                });
                i
            }
        }
    }

    fn log_error(&mut self, got: Option<&Token>) {
        let pos = self.sentence.len();
        let mut expected: Vec<Symbol> = self.forest[pos]
            .iter()
            .filter_map(|item| {
                let rule = &self.rules[item.state.rule];
                rule.rhs.get(item.state.progress).map(|&(symbol, _)| symbol)
            })
            .collect();
        expected.sort_unstable();
        expected.dedup();
        let (start, end) = match got {
            Some(token) => (token.start, token.end),
            None => {
                let end = self.sentence.last().map(|t| t.end).unwrap_or(0);
                (end, end)
            }
        };
        self.errors.push(ParseError {
            expected,
            got: got.map(|token| self.patterns[token.pattern].0),
            start,
            end,
        });
    }
}
